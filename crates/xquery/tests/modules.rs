use parking_lot::Mutex;
use rstest::rstest;
use std::collections::HashMap;
use std::sync::Arc;
use sylva_xquery::runtime::StaticContextBuilder;
use sylva_xquery::{
    DynamicContextBuilder, Error, ErrorCode, ModuleLocation, ModuleResolver, ModuleSource,
    compile_with_context, evaluate,
};

/// Modules served from memory under database paths.
#[derive(Default)]
struct MemorySource {
    modules: Mutex<HashMap<String, String>>,
}

impl MemorySource {
    fn put(&self, path: &str, text: &str) {
        self.modules.lock().insert(path.to_string(), text.to_string());
    }
}

impl ModuleSource for MemorySource {
    fn load(&self, location: &ModuleLocation) -> Result<Option<String>, Error> {
        let ModuleLocation::Database(path) = location else {
            return Ok(None);
        };
        Ok(self.modules.lock().get(path).cloned())
    }
}

fn setup() -> (Arc<MemorySource>, Arc<ModuleResolver>) {
    let source = Arc::new(MemorySource::default());
    let resolver = Arc::new(ModuleResolver::new().with_source(source.clone()));
    (source, resolver)
}

fn run(resolver: &Arc<ModuleResolver>, query: &str) -> Result<String, Error> {
    let sc = StaticContextBuilder::new()
        .with_modules(Arc::clone(resolver))
        .with_module_base("/db/app")
        .build();
    let compiled = compile_with_context(query, &sc)?;
    let out = evaluate(&compiled, &DynamicContextBuilder::new().build())?;
    Ok(out.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "))
}

#[rstest]
fn same_namespace_from_two_locations_is_cached_separately() {
    let (source, resolver) = setup();
    source.put(
        "/db/app/v1/m.xqm",
        r#"module namespace m = "urn:m"; declare function m:version() { 1 };"#,
    );
    source.put(
        "/db/app/v2/m.xqm",
        r#"module namespace m = "urn:m"; declare function m:version() { 2 };"#,
    );
    let q1 = r#"import module namespace m = "urn:m" at "v1/m.xqm"; m:version()"#;
    let q2 = r#"import module namespace m = "urn:m" at "v2/m.xqm"; m:version()"#;
    assert_eq!(run(&resolver, q1).unwrap(), "1");
    assert_eq!(run(&resolver, q2).unwrap(), "2");
    assert_eq!(run(&resolver, q1).unwrap(), "1");
    assert_eq!(resolver.cache().len(), 2);
}

#[rstest]
fn several_location_hints_compose_one_namespace() {
    let (source, resolver) = setup();
    source.put(
        "/db/app/a.xqm",
        r#"module namespace m = "urn:m"; declare function m:a() { 'a' };"#,
    );
    source.put(
        "/db/app/b.xqm",
        r#"module namespace m = "urn:m"; declare function m:b() { m:a() || 'b' };"#,
    );
    let q = r#"import module namespace m = "urn:m" at "a.xqm", "b.xqm"; m:b()"#;
    assert_eq!(run(&resolver, q).unwrap(), "ab");
}

#[rstest]
fn changed_module_text_is_reparsed() {
    let (source, resolver) = setup();
    let q = r#"import module namespace m = "urn:m" at "/db/app/m.xqm"; $m:v"#;
    source.put("/db/app/m.xqm", r#"module namespace m = "urn:m"; declare variable $m:v := 1;"#);
    assert_eq!(run(&resolver, q).unwrap(), "1");
    source.put("/db/app/m.xqm", r#"module namespace m = "urn:m"; declare variable $m:v := 2;"#);
    assert_eq!(run(&resolver, q).unwrap(), "2");
}

#[rstest]
fn relative_imports_resolve_against_the_importing_module() {
    let (source, resolver) = setup();
    source.put(
        "/db/app/lib/outer.xqm",
        r#"module namespace o = "urn:o";
           import module namespace i = "urn:i" at "../shared/inner.xqm";
           declare function o:f() { i:g() * 2 };"#,
    );
    source.put(
        "/db/app/shared/inner.xqm",
        r#"module namespace i = "urn:i"; declare function i:g() { 21 };"#,
    );
    let q = r#"import module namespace o = "urn:o" at "xmldb:exist:///db/app/lib/outer.xqm"; o:f()"#;
    assert_eq!(run(&resolver, q).unwrap(), "42");
}

#[rstest]
fn module_variables_initialize_lazily_and_detect_cycles() {
    let (source, resolver) = setup();
    source.put(
        "/db/app/c.xqm",
        r#"module namespace c = "urn:c";
           declare variable $c:a := $c:b + 1;
           declare variable $c:b := $c:a + 1;
           declare variable $c:ok := 5;"#,
    );
    let ok = r#"import module namespace c = "urn:c" at "c.xqm"; $c:ok"#;
    assert_eq!(run(&resolver, ok).unwrap(), "5");
    let cyclic = r#"import module namespace c = "urn:c" at "c.xqm"; $c:a"#;
    assert_eq!(
        run(&resolver, cyclic).unwrap_err().code_enum(),
        ErrorCode::XQDY0054
    );
}

#[rstest]
#[case(r#"import module namespace m = "urn:none" at "missing.xqm"; 1"#, ErrorCode::XQST0059)]
#[case(r#"import module namespace xml = "urn:m" at "m.xqm"; 1"#, ErrorCode::XQST0070)]
#[case(r#"import module namespace m = "" at "m.xqm"; 1"#, ErrorCode::XQST0088)]
#[case(
    r#"import module namespace m = "urn:m" at "m.xqm"; import module namespace n = "urn:m" at "m.xqm"; 1"#,
    ErrorCode::XQST0047
)]
#[case(r#"import module namespace m = "urn:other" at "m.xqm"; 1"#, ErrorCode::XQST0059)]
fn import_errors(#[case] query: &str, #[case] expected: ErrorCode) {
    let (source, resolver) = setup();
    source.put("/db/app/m.xqm", r#"module namespace m = "urn:m"; declare function m:f() { 1 };"#);
    let err = run(&resolver, query).unwrap_err();
    assert_eq!(err.code_enum(), expected, "query: {query}");
}

#[rstest]
fn duplicate_function_across_locations_names_the_function() {
    let (source, resolver) = setup();
    source.put("/db/app/x.xqm", r#"module namespace m = "urn:m"; declare function m:f() { 1 };"#);
    source.put("/db/app/y.xqm", r#"module namespace m = "urn:m"; declare function m:f() { 2 };"#);
    let q = r#"import module namespace m = "urn:m" at "x.xqm", "y.xqm"; m:f()"#;
    let err = run(&resolver, q).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XQST0034);
    assert!(err.message.contains("{urn:m}f#0"), "{}", err.message);
}

#[test]
fn file_modules_resolve_against_the_search_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("util.xqm"),
        r#"module namespace u = "urn:u"; declare function u:twice($x) { $x * 2 };"#,
    )
    .unwrap();
    let resolver = Arc::new(ModuleResolver::new().with_search_path(dir.path()));
    let sc = StaticContextBuilder::new().with_modules(resolver).build();
    let compiled = compile_with_context(
        r#"import module namespace u = "urn:u" at "util.xqm"; u:twice(21)"#,
        &sc,
    )
    .unwrap();
    let out = evaluate(&compiled, &DynamicContextBuilder::new().build()).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to_string(), "42");
}
