use rstest::{fixture, rstest};
use sylva_store::Database;
use sylva_xquery::ErrorCode;

const GREET_V1: &str = r#"module namespace g = "urn:greet";
declare function g:hello($who) { concat("hello ", $who) };"#;

const GREET_V2: &str = r#"module namespace g = "urn:greet";
declare function g:hello($who) { concat("hi ", $who) };"#;

#[fixture]
fn db() -> Database {
    let db = Database::in_memory();
    db.store_binary("/db/apps/v1", "greet.xqm", GREET_V1).unwrap();
    db.store_binary("/db/apps/v2", "greet.xqm", GREET_V2).unwrap();
    db
}

fn run_in(db: &Database, collection: &str, query: &str) -> sylva_store::Result<String> {
    let mut session = db.session();
    session.set_collection(collection)?;
    session.serialization_mut().indent = false;
    session.query_to_string(query)
}

#[rstest]
fn one_namespace_at_two_locations(db: Database) {
    let q1 = r#"import module namespace g = "urn:greet" at "xmldb:exist:///db/apps/v1/greet.xqm"; g:hello("a")"#;
    let q2 = r#"import module namespace g = "urn:greet" at "/db/apps/v2/greet.xqm"; g:hello("a")"#;
    assert_eq!(run_in(&db, "/db", q1).unwrap(), "hello a");
    assert_eq!(run_in(&db, "/db", q2).unwrap(), "hi a");
    assert_eq!(run_in(&db, "/db", q1).unwrap(), "hello a");
    assert_eq!(db.modules().cache().len(), 2);
}

#[rstest]
fn relative_locations_resolve_against_the_session_collection(db: Database) {
    let q = r#"import module namespace g = "urn:greet" at "greet.xqm"; g:hello("b")"#;
    assert_eq!(run_in(&db, "/db/apps/v1", q).unwrap(), "hello b");
    assert_eq!(run_in(&db, "/db/apps/v2", q).unwrap(), "hi b");
    let up = r#"import module namespace g = "urn:greet" at "../v1/greet.xqm"; g:hello("c")"#;
    assert_eq!(run_in(&db, "/db/apps/v2", up).unwrap(), "hello c");
}

#[rstest]
fn modules_import_their_siblings(db: Database) {
    db.store_binary(
        "/db/apps/v1",
        "shout.xqm",
        r#"module namespace s = "urn:shout";
import module namespace g = "urn:greet" at "greet.xqm";
declare function s:hello($who) { upper-case(g:hello($who)) };"#,
    )
    .unwrap();
    let q = r#"import module namespace s = "urn:shout" at "/db/apps/v1/shout.xqm"; s:hello("d")"#;
    assert_eq!(run_in(&db, "/db", q).unwrap(), "HELLO D");
}

#[rstest]
fn circular_imports_compile(db: Database) {
    db.store_binary(
        "/db/apps/cycle",
        "a.xqm",
        r#"module namespace a = "urn:a";
import module namespace b = "urn:b" at "b.xqm";
declare function a:depth($n) { if ($n = 0) then "a" else b:depth($n - 1) };"#,
    )
    .unwrap();
    db.store_binary(
        "/db/apps/cycle",
        "b.xqm",
        r#"module namespace b = "urn:b";
import module namespace a = "urn:a" at "a.xqm";
declare function b:depth($n) { if ($n = 0) then "b" else a:depth($n - 1) };"#,
    )
    .unwrap();
    let q = r#"import module namespace a = "urn:a" at "a.xqm"; (a:depth(3), a:depth(4))"#;
    assert_eq!(run_in(&db, "/db/apps/cycle", q).unwrap(), "b a");
}

#[rstest]
fn replaced_modules_are_reparsed(db: Database) {
    let q = r#"import module namespace g = "urn:greet" at "/db/apps/v1/greet.xqm"; g:hello("e")"#;
    assert_eq!(run_in(&db, "/db", q).unwrap(), "hello e");
    db.store_binary("/db/apps/v1", "greet.xqm", GREET_V2).unwrap();
    assert_eq!(run_in(&db, "/db", q).unwrap(), "hi e");
}

#[rstest]
#[case(r#"import module namespace g = "urn:greet" at "/db/apps/none.xqm"; 1"#)]
#[case(r#"import module namespace g = "urn:other" at "/db/apps/v1/greet.xqm"; 1"#)]
#[case(r#"import module namespace g = "urn:greet" at "/db/apps/doc.xml"; 1"#)]
fn unusable_modules_are_static_errors(db: Database, #[case] query: &str) {
    db.store_document("/db/apps", "doc.xml", "<not-a-module/>").unwrap();
    let err = run_in(&db, "/db", query).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::XQST0059), "{query}");
}
