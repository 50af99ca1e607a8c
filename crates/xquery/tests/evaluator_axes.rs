use rstest::{fixture, rstest};
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{DynamicContextBuilder, Node, XdmItem, evaluate_expr, serialize_sequence};
use sylva_xquery::SerializationOptions;

const SAMPLE: &str = r#"<r>
  <a id="1"><b/><c><d/></c></a>
  <e xmlns:p="urn:p" p:x="2">tail</e>
  <!--note-->
</r>"#;

#[fixture]
fn doc() -> Node {
    parse_document(SAMPLE, Some("/db/test/axes.xml".into()), true, ParseOptions::default())
        .unwrap()
        .root()
}

fn run(doc: &Node, query: &str) -> String {
    let ctx = DynamicContextBuilder::new()
        .with_context_item(XdmItem::Node(doc.clone()))
        .build();
    let out = evaluate_expr(query, &ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    let mut opts = SerializationOptions::default();
    opts.indent = false;
    serialize_sequence(&out, &opts).unwrap()
}

#[rstest]
#[case("count(/r/a/child::*)", "2")]
#[case("count(/r/a/descendant::*)", "3")]
#[case("count(/r/a/descendant-or-self::*)", "4")]
#[case("string-join(/r/a/c/d/ancestor::*/name(), ',')", "r,a,c")]
#[case("count(/r/a/c/d/ancestor-or-self::*)", "4")]
#[case("name(/r/a/c/parent::*)", "a")]
#[case("name(/r/a/following-sibling::*)", "e")]
#[case("count(/r/e/preceding-sibling::node())", "1")]
#[case("string-join(/r/a/b/following::*/name(), ',')", "c,d,e")]
#[case("string-join(/r/e/preceding::*/name(), ',')", "a,b,c,d")]
#[case("string(/r/a/attribute::id)", "1")]
#[case("name(/r/a/self::a)", "a")]
#[case("count(/r/e/namespace::*) ge 1", "true")]
fn all_axes(doc: Node, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(&doc, query), expected, "query: {query}");
}

#[rstest]
#[case("/r/a/c/d/ancestor::*[1]/name()", "c")]
#[case("/r/a/c/d/ancestor::*[last()]/name()", "r")]
#[case("(/r/a/c/d/ancestor::*)[1]/name()", "r")]
#[case("/r/*[last() - 1]/name()", "a")]
#[case("/r/*[position() = 2]/name()", "e")]
fn reverse_axis_positions(doc: Node, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(&doc, query), expected, "query: {query}");
}

#[rstest]
fn abbreviations(doc: Node) {
    assert_eq!(run(&doc, "count(//*)"), "6");
    assert_eq!(run(&doc, "name(//d/..)"), "c");
    assert_eq!(run(&doc, "string(//@id)"), "1");
    assert_eq!(run(&doc, "count(/r/e/@*)"), "1");
    assert_eq!(run(&doc, "count(/r//node()[self::comment()])"), "1");
}

#[rstest]
fn path_results_are_in_document_order_without_duplicates(doc: Node) {
    assert_eq!(run(&doc, "string-join((//d, //b, //d)/name(), ',')"), "d,b,d");
    assert_eq!(run(&doc, "string-join((//d | //b | //d)/name(), ',')"), "b,d");
    assert_eq!(run(&doc, "count(//*/..)"), "4");
}

#[rstest]
fn node_comparisons(doc: Node) {
    assert_eq!(run(&doc, "//b << //d"), "true");
    assert_eq!(run(&doc, "//e >> //a"), "true");
    assert_eq!(run(&doc, "/r/a is //a"), "true");
}

#[rstest]
fn text_nodes_and_kind_tests(doc: Node) {
    assert_eq!(run(&doc, "/r/e/text()"), "tail");
    assert_eq!(run(&doc, "count(/r/a/node())"), "2");
    assert_eq!(run(&doc, "count(/r/element(a))"), "1");
    assert_eq!(run(&doc, "count(/r/e/attribute(*))"), "1");
}
