use rstest::{fixture, rstest};
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{
    DynamicContextBuilder, ErrorCode, Node, SerializationOptions, XdmItem, evaluate_expr,
    serialize_sequence,
};

const ITEMS: &str = r#"<items>
  <item cat="a" price="10">i1</item>
  <item cat="b" price="20">i2</item>
  <item cat="a" price="30">i3</item>
  <item cat="c" price="5">i4</item>
  <item cat="d" price="15">i5</item>
  <item cat="b" price="25">i6</item>
  <item cat="c" price="35">i7</item>
  <item cat="a" price="1">i8</item>
</items>"#;

#[fixture]
fn items() -> Node {
    parse_document(ITEMS, Some("/db/test/items.xml".into()), true, ParseOptions::default())
        .unwrap()
        .root()
}

fn run(ctx_node: Option<&Node>, query: &str) -> String {
    let mut builder = DynamicContextBuilder::new();
    if let Some(n) = ctx_node {
        builder = builder.with_context_item(XdmItem::Node(n.clone()));
    }
    let out = evaluate_expr(query, &builder.build()).unwrap_or_else(|e| panic!("{query}: {e}"));
    let mut opts = SerializationOptions::default();
    opts.indent = false;
    serialize_sequence(&out, &opts).unwrap()
}

#[rstest]
fn exist_group_by_partitions_items(items: Node) {
    let q = r#"
        for $i in //item
        group $i as $part by $i/@cat as $cat
        return concat($cat, ':', count($part))
    "#;
    assert_eq!(run(Some(&items), q), "a:3 b:2 c:2 d:1");
}

#[rstest]
fn exist_group_by_orders_groups(items: Node) {
    let q = r#"
        for $i in //item
        group $i as $part by $i/@cat as $cat
        order by sum($part/@price) descending
        return $cat
    "#;
    assert_eq!(run(Some(&items), q), "b a c d");
}

#[rstest]
fn exist_group_by_with_two_keys(items: Node) {
    let q = r#"
        for $i in //item
        group $i as $part by $i/@cat as $cat, xs:integer($i/@price) gt 10 as $dear
        return concat($cat, '-', $dear, '=', string-join($part, '+'))
    "#;
    assert_eq!(
        run(Some(&items), q),
        "a-false=i1+i8 b-true=i2+i6 a-true=i3 c-false=i4 d-true=i5 c-true=i7"
    );
}

#[rstest]
fn standard_group_by_concatenates_non_key_variables(items: Node) {
    let q = r#"
        for $i in //item
        let $p := xs:integer($i/@price)
        group by $cat := string($i/@cat)
        return concat($cat, '=', sum($p))
    "#;
    assert_eq!(run(Some(&items), q), "a=41 b=45 c=40 d=15");
}

#[rstest]
#[case("for $x in (3, 1, 2) order by $x return $x", "1 2 3")]
#[case("for $x in (3, 1, 2) order by $x descending return $x", "3 2 1")]
#[case("for $x at $i in ('a', 'b', 'c') return $i", "1 2 3")]
#[case("for $x in (1, 2), $y in (10, 20) return $x + $y", "11 21 12 22")]
#[case("for $x in 1 to 10 where $x mod 3 = 0 return $x", "3 6 9")]
#[case("let $s := (1, 2, 3) return sum($s)", "6")]
#[case("for $x in ((), 2, 1) order by $x empty greatest return $x", "1 2")]
fn flwor_basics(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(None, query), expected, "query: {query}");
}

#[test]
fn order_by_empty_least_puts_empty_keys_first() {
    let q = r#"
        for $p in (<p><k>2</k></p>, <p/>, <p><k>1</k></p>)
        order by $p/k/number() empty least
        return count($p/k)
    "#;
    assert_eq!(run(None, q), "0 1 1");
    let q = r#"
        for $p in (<p><k>2</k></p>, <p/>, <p><k>1</k></p>)
        order by $p/k/number() empty greatest
        return count($p/k)
    "#;
    assert_eq!(run(None, q), "1 1 0");
}

#[test]
fn stable_order_keeps_input_order_for_equal_keys() {
    let q = r#"
        for $p in (<p k="1">a</p>, <p k="0">b</p>, <p k="1">c</p>, <p k="0">d</p>)
        stable order by xs:integer($p/@k)
        return string($p)
    "#;
    assert_eq!(run(None, q), "b d a c");
}

#[test]
fn group_key_must_be_a_single_atomic() {
    let q = "for $x in (1, 2) group $x as $p by ($x, $x) as $k return $k";
    let err = evaluate_expr(q, &DynamicContextBuilder::new().build()).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[test]
fn quantified_expressions() {
    assert_eq!(run(None, "some $x in (1, 2, 3) satisfies $x gt 2"), "true");
    assert_eq!(run(None, "every $x in (1, 2, 3) satisfies $x gt 2"), "false");
    assert_eq!(run(None, "every $x in () satisfies false()"), "true");
}
