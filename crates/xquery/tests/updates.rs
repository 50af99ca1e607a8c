use rstest::{fixture, rstest};
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{
    DynamicContextBuilder, ErrorCode, Node, SerializationOptions, XdmItem, evaluate_expr,
    serialize_sequence,
};

#[fixture]
fn products() -> Node {
    let mut xml = String::from("<products>");
    for i in 1..=1000 {
        xml.push_str(&format!(
            r#"<product id="{i}"><name>Product {i}</name><price>{}</price></product>"#,
            i % 100
        ));
    }
    xml.push_str("</products>");
    parse_document(&xml, Some("/db/shop/products.xml".into()), true, ParseOptions::default())
        .unwrap()
        .root()
}

#[fixture]
fn small() -> Node {
    parse_document(
        r#"<r><a id="1">one</a><b>two</b></r>"#,
        Some("/db/test/small.xml".into()),
        true,
        ParseOptions::default(),
    )
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
fn insert_positions(small: Node) {
    run(&small, "update insert <c/> into /r");
    run(&small, "update insert <first/> as first into /r");
    run(&small, "update insert <after-a/> following /r/a");
    run(&small, "update insert <before-b/> preceding /r/b");
    assert_eq!(
        run(&small, "string-join(/r/*/name(), ',')"),
        "first,a,after-a,before-b,b,c"
    );
}

#[rstest]
fn replace_value_and_rename(small: Node) {
    run(&small, "update replace /r/b with <bb>new</bb>");
    run(&small, "update value /r/a with 'uno'");
    run(&small, "update value /r/a/@id with '7'");
    run(&small, "update rename /r/bb as 'c'");
    assert_eq!(run(&small, "/r"), r#"<r><a id="7">uno</a><c>new</c></r>"#);
}

#[rstest]
fn delete_removes_every_target(small: Node) {
    run(&small, "update delete /r/*");
    assert_eq!(run(&small, "count(/r/node())"), "0");
}

#[rstest]
fn update_applies_once_per_target(products: Node) {
    run(&products, "update insert <stock>1</stock> into //product[price = 0]");
    assert_eq!(run(&products, "count(//stock)"), "10");
    run(&products, "update delete //product[price ge 50]");
    assert_eq!(run(&products, "count(//product)"), "500");
    run(&products, "update value //product[@id = '42']/price with 99");
    assert_eq!(run(&products, "string(//product[@id = '42']/price)"), "99");
}

#[rstest]
fn flwor_driven_updates_see_earlier_mutations(products: Node) {
    let q = r#"
        for $p in //product[xs:integer(@id) le 3]
        return update insert <tag>{ count(//tag) }</tag> into $p
    "#;
    run(&products, q);
    assert_eq!(run(&products, "string-join(//tag, ',')"), "0,1,2");
}

#[test]
fn updating_a_constructed_node_is_an_error() {
    let err = evaluate_expr(
        "update insert <x/> into <r/>",
        &DynamicContextBuilder::new().build(),
    )
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUDY0014);
}

#[rstest]
fn updating_an_atomic_target_is_a_type_error(small: Node) {
    let ctx = DynamicContextBuilder::new()
        .with_context_item(XdmItem::Node(small.clone()))
        .build();
    let err = evaluate_expr("update delete (1, 2)", &ctx).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUTY0008);
}
