use rstest::rstest;
use sylva_xquery::{DynamicContextBuilder, ErrorCode, compile, evaluate_expr};

fn code(query: &str) -> ErrorCode {
    evaluate_expr(query, &DynamicContextBuilder::new().build())
        .expect_err(query)
        .code_enum()
}

#[rstest]
#[case("1 +", ErrorCode::XPST0003)]
#[case("for $x in (1, 2) retrun $x", ErrorCode::XPST0003)]
#[case("$undeclared", ErrorCode::XPST0008)]
#[case("undefined:f()", ErrorCode::XPST0081)]
#[case("local:nothing()", ErrorCode::XPST0017)]
#[case("count(1, 2)", ErrorCode::XPST0017)]
#[case("declare function fn:mine() { 1 }; 1", ErrorCode::XQST0045)]
#[case("declare function local:f($a, $a) { $a }; 1", ErrorCode::XQST0039)]
#[case("declare variable $v := 1; declare variable $v := 2; $v", ErrorCode::XQST0049)]
#[case("declare namespace p = 'urn:a'; declare namespace p = 'urn:b'; 1", ErrorCode::XQST0033)]
#[case("1 cast as xs:unknownType", ErrorCode::XPST0051)]
#[case("1 cast as xs:anyAtomicType", ErrorCode::XPST0080)]
fn static_errors_are_raised_at_compile_time(#[case] query: &str, #[case] expected: ErrorCode) {
    let err = compile(query).expect_err(query);
    assert_eq!(err.code_enum(), expected, "query: {query}");
}

#[rstest]
#[case(".", ErrorCode::XPDY0002)]
#[case("name()", ErrorCode::XPDY0002)]
#[case("'a' + 1", ErrorCode::XPTY0004)]
#[case("(1, 2) eq 1", ErrorCode::XPTY0004)]
#[case("1/a", ErrorCode::XPTY0019)]
#[case("xs:integer('x')", ErrorCode::FORG0001)]
#[case("<a>{ <b/> }{ attribute x { 1 } }</a>", ErrorCode::XQTY0024)]
#[case("<a x='1'>{ attribute x { 2 } }</a>", ErrorCode::XQDY0025)]
#[case("comment { 'a--b' }", ErrorCode::XQDY0072)]
#[case("processing-instruction xml { 'x' }", ErrorCode::XQDY0064)]
#[case("1 idiv 0", ErrorCode::FOAR0001)]
#[case("<a/> treat as xs:integer", ErrorCode::XPDY0050)]
fn dynamic_errors_carry_their_codes(#[case] query: &str, #[case] expected: ErrorCode) {
    assert_eq!(code(query), expected, "query: {query}");
}

#[test]
fn try_catch_matches_by_code() {
    let ctx = DynamicContextBuilder::new().build();
    let q = r#"
        try { 1 idiv 0 }
        catch err:FORG0001 { 'wrong' }
        catch err:FOAR0001 { 'division' }
    "#;
    let out = evaluate_expr(q, &ctx).unwrap();
    assert_eq!(out[0].to_string(), "division");
}

#[test]
fn try_catch_exposes_error_variables() {
    let ctx = DynamicContextBuilder::new().build();
    let q = r#"
        try { xs:integer('nope') }
        catch * { local-name-from-QName($err:code) }
    "#;
    let out = evaluate_expr(q, &ctx).unwrap();
    assert_eq!(out[0].to_string(), "FORG0001");
}

#[test]
fn uncaught_codes_propagate_out_of_try() {
    let q = "try { 1 idiv 0 } catch err:XPTY0004 { 0 }";
    assert_eq!(code(q), ErrorCode::FOAR0001);
}

#[test]
fn static_errors_are_not_caught_by_try() {
    let err = compile("try { $missing } catch * { 0 }").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0008);
}

#[test]
fn error_message_names_the_code() {
    let err = evaluate_expr("1 idiv 0", &DynamicContextBuilder::new().build()).unwrap_err();
    assert!(err.to_string().contains("FOAR0001"), "{err}");
}
