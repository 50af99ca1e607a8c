use rstest::rstest;
use sylva_xquery::{
    DynamicContextBuilder, ErrorCode, SerializationOptions, evaluate_expr, serialize_sequence,
};

fn run(query: &str) -> String {
    let ctx = DynamicContextBuilder::new().build();
    let out = evaluate_expr(query, &ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    let mut opts = SerializationOptions::default();
    opts.indent = false;
    serialize_sequence(&out, &opts).unwrap()
}

fn code(query: &str) -> ErrorCode {
    let ctx = DynamicContextBuilder::new().build();
    evaluate_expr(query, &ctx)
        .expect_err(query)
        .code_enum()
}

#[rstest]
#[case("concat('a', 1, (), 'b')", "a1b")]
#[case("string-join(('x', 'y', 'z'), '-')", "x-y-z")]
#[case("substring('12345', 1.5, 2.6)", "234")]
#[case("substring('12345', 0, 3)", "12")]
#[case("string-length('héllo')", "5")]
#[case("normalize-space('  a   b ')", "a b")]
#[case("upper-case('abc')", "ABC")]
#[case("translate('bar', 'abc', 'ABC')", "BAr")]
#[case("contains('database', 'tab')", "true")]
#[case("starts-with('database', 'data')", "true")]
#[case("ends-with('database', 'base')", "true")]
#[case("substring-before('a=b', '=')", "a")]
#[case("substring-after('a=b', '=')", "b")]
#[case("compare('a', 'b')", "-1")]
#[case("codepoints-to-string((72, 105))", "Hi")]
#[case("string-to-codepoints('AB')", "65 66")]
#[case("matches('abc123', '^[a-z]+\\d+$')", "true")]
#[case("replace('aaa', 'a', 'b')", "bbb")]
#[case("replace('abc', '(b)', '[$1]')", "a[b]c")]
#[case("string-join(tokenize('a, b,c', ',\\s*'), '|')", "a|b|c")]
#[case("encode-for-uri('a b/c')", "a%20b%2Fc")]
fn string_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(query), expected, "query: {query}");
}

#[rstest]
#[case("abs(-3)", "3")]
#[case("ceiling(1.2)", "2")]
#[case("floor(-1.2)", "-2")]
#[case("round(2.5)", "3")]
#[case("round(-2.5)", "-2")]
#[case("round-half-to-even(2.5)", "2")]
#[case("round-half-to-even(3.567, 2)", "3.57")]
#[case("sum((1, 2, 3))", "6")]
#[case("sum(())", "0")]
#[case("avg((1, 2, 3, 4))", "2.5")]
#[case("min((3, 1, 2))", "1")]
#[case("max(('b', 'c', 'a'))", "c")]
#[case("count((1, 2, (), 3))", "3")]
#[case("number('12')", "12")]
#[case("string(number('x'))", "NaN")]
fn numeric_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(query), expected, "query: {query}");
}

#[rstest]
#[case("distinct-values((1, 2, 1, 2.0, 'a', 'a'))", "1 2 a")]
#[case("index-of((10, 20, 10), 10)", "1 3")]
#[case("insert-before((1, 2, 3), 2, 'x')", "1 x 2 3")]
#[case("remove((1, 2, 3), 2)", "1 3")]
#[case("reverse((1, 2, 3))", "3 2 1")]
#[case("subsequence((1, 2, 3, 4, 5), 2, 3)", "2 3 4")]
#[case("subsequence((1, 2, 3), 0)", "1 2 3")]
#[case("empty(())", "true")]
#[case("exists((1))", "true")]
#[case("zero-or-one(())", "")]
#[case("exactly-one(5)", "5")]
#[case("deep-equal((1, 'a'), (1, 'a'))", "true")]
#[case("deep-equal(<a x='1'><b/></a>, <a x='1'><b/></a>)", "true")]
#[case("deep-equal(<a x='1'/>, <a x='2'/>)", "false")]
fn sequence_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(query), expected, "query: {query}");
}

#[rstest]
#[case("name(<p:a xmlns:p='urn:p'/>)", "p:a")]
#[case("local-name(<p:a xmlns:p='urn:p'/>)", "a")]
#[case("namespace-uri(<p:a xmlns:p='urn:p'/>)", "urn:p")]
#[case("local-name-from-QName(QName('urn:x', 'x:y'))", "y")]
#[case("prefix-from-QName(QName('urn:x', 'x:y'))", "x")]
#[case("namespace-uri-from-QName(QName('urn:x', 'x:y'))", "urn:x")]
#[case("lang('en', <p xml:lang='en-GB'><q/></p>/q)", "true")]
#[case("lang('de', <p xml:lang='en'/>)", "false")]
#[case("name(root(<a><b/></a>/b))", "a")]
fn node_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(query), expected, "query: {query}");
}

#[rstest]
#[case("year-from-date(xs:date('2024-02-29'))", "2024")]
#[case("month-from-dateTime(xs:dateTime('2024-02-29T10:00:00Z'))", "2")]
#[case("hours-from-time(xs:time('13:45:00'))", "13")]
#[case("days-from-duration(xs:dayTimeDuration('P3DT4H'))", "3")]
#[case("years-from-duration(xs:yearMonthDuration('P2Y5M'))", "2")]
#[case("string(dateTime(xs:date('2024-01-01Z'), xs:time('12:00:00Z')))", "2024-01-01T12:00:00Z")]
#[case("current-dateTime() eq current-dateTime()", "true")]
fn date_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(run(query), expected, "query: {query}");
}

#[rstest]
#[case("zero-or-one((1, 2))", ErrorCode::FORG0003)]
#[case("one-or-more(())", ErrorCode::FORG0004)]
#[case("exactly-one((1, 2))", ErrorCode::FORG0005)]
#[case("codepoints-to-string(0)", ErrorCode::FOCH0001)]
#[case("error()", ErrorCode::FOER0000)]
#[case("1 div 0", ErrorCode::FOAR0001)]
#[case("doc('/db/missing.xml')", ErrorCode::FODC0002)]
#[case("matches('a', '(')", ErrorCode::FORX0002)]
#[case("unknown-function(1)", ErrorCode::XPST0017)]
#[case("concat('a')", ErrorCode::XPST0017)]
fn function_errors(#[case] query: &str, #[case] expected: ErrorCode) {
    assert_eq!(code(query), expected, "query: {query}");
}

#[test]
fn error_with_user_code_is_catchable() {
    let q = r#"
        try { error(QName('urn:app', 'app:oops'), 'boom', 42) }
        catch * { concat($err:description, '/', $err:value) }
    "#;
    assert_eq!(run(q), "boom/42");
}

#[test]
fn text_match_functions_return_matching_nodes() {
    let q = r#"
        let $d := <d><p>The quick brown fox</p><p>lazy dogs</p><p>quick dogs</p></d>
        return (count(text:match-all($d/p, 'quick', 'dog.*')), count(text:match-any($d/p, 'fox', 'lazy')))
    "#;
    assert_eq!(run(q), "1 2");
}

#[test]
fn util_node_id_counts_attributes_first() {
    let q = r#"
        let $d := document { <r a="1"><x/><y/></r> }
        return (util:node-id($d/r), util:node-id($d/r/@a), util:node-id($d/r/y))
    "#;
    assert_eq!(run(q), "1.1 1.1.1 1.1.3");
}
