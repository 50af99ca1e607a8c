use rstest::{fixture, rstest};
use sylva_store::{Database, DatabaseConfig, StoreError};
use sylva_xquery::runtime::LockMode;
use sylva_xquery::{ErrorCode, ExpandedName, XdmAtomicValue, XdmItem};

#[fixture]
fn db() -> Database {
    let db = Database::in_memory();
    db.store_document(
        "/db/test",
        "progress.xml",
        r#"<progress total="100" done="0"/>"#,
    )
    .unwrap();
    db.store_document(
        "/db/test",
        "items.xml",
        "<items><item><key1>a</key1><key2>x</key2></item><item><key1>a</key1><key2>y</key2></item>\
         <item><key1>b</key1><key2>x</key2></item><item><key1>b</key1><key2>y</key2></item>\
         <item><key1>a</key1><key2>x</key2></item><item><key1>a</key1><key2>y</key2></item>\
         <item><key1>b</key1><key2>x</key2></item><item><key1>b</key1><key2>y</key2></item></items>",
    )
    .unwrap();
    db
}

fn text(db: &Database, query: &str) -> String {
    let mut s = db.session();
    s.serialization_mut().indent = false;
    s.query_to_string(query).unwrap_or_else(|e| panic!("{query}: {e}"))
}

#[rstest]
fn hundred_sequential_increments_do_not_drift(db: Database) {
    let session = db.session();
    let update = session
        .compile(
            "let $done := doc('/db/test/progress.xml')/progress/@done \
             return update value $done with xs:int($done + 1)",
        )
        .unwrap();
    assert!(update.is_updating());
    for _ in 0..100 {
        session.execute(&update, []).unwrap();
    }
    assert_eq!(text(&db, "string(doc('/db/test/progress.xml')/progress/@done)"), "100");
}

#[rstest]
fn external_variables_are_bound_at_execution(db: Database) {
    let session = db.session();
    let q = session
        .compile("declare variable $key external; count(doc('/db/test/items.xml')//item[key1 = $key])")
        .unwrap();
    let key = ExpandedName::new(None, "key");
    let out = session
        .execute(&q, [(key.clone(), vec![XdmItem::Atomic(XdmAtomicValue::String("a".into()))])])
        .unwrap();
    assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Integer(4))]);
    let err = session.execute(&q, []).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::XPDY0002));
}

#[rstest]
fn declared_variables_and_namespaces_carry_over(db: Database) {
    let mut session = db.session();
    session.declare_namespace("t", "urn:test");
    session.declare_variable(
        ExpandedName::new(Some("urn:test".into()), "limit"),
        vec![XdmItem::Atomic(XdmAtomicValue::Integer(3))],
    );
    session.serialization_mut().indent = false;
    assert_eq!(session.query_to_string("$t:limit * 2").unwrap(), "6");
    assert_eq!(
        session.query_to_string("namespace-uri(<t:x/>)").unwrap(),
        "urn:test"
    );
}

#[rstest]
fn query_resource_scopes_to_one_document(db: Database) {
    let mut session = db.session();
    session.set_collection("/db/test").unwrap();
    let out = session.query_resource("items.xml", "count(//item)").unwrap();
    assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Integer(8))]);
    let out = session.query_resource("progress.xml", "string(/progress/@total)").unwrap();
    assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::String("100".into()))]);
    assert!(matches!(
        session.query_resource("missing.xml", "."),
        Err(StoreError::ResourceNotFound(_))
    ));
}

#[rstest]
#[case("key1", 2)]
#[case("key1, key2", 4)]
fn group_by_counts_distinct_keys(db: Database, #[case] keys: &str, #[case] groups: usize) {
    let by = keys
        .split(", ")
        .map(|k| format!("$i/{k} as ${k}"))
        .collect::<Vec<_>>()
        .join(", ");
    let q = format!("count(for $i in doc('/db/test/items.xml')//item group $i as $g by {by} return <group/>)");
    assert_eq!(text(&db, &q), groups.to_string());
}

#[rstest]
fn relative_paths_follow_the_session_collection(db: Database) {
    let mut session = db.session();
    session.set_collection("test").unwrap();
    assert_eq!(session.collection(), "/db/test");
    session.serialization_mut().indent = false;
    assert_eq!(session.query_to_string("count(collection())").unwrap(), "2");
    assert_eq!(session.query_to_string("doc-available('items.xml')").unwrap(), "true");
    assert_eq!(
        session.query_to_string("util:collection-name(doc('items.xml'))").unwrap(),
        "/db/test"
    );
    assert!(matches!(
        session.set_collection("/db/nowhere"),
        Err(StoreError::CollectionNotFound(_))
    ));
}

#[rstest]
fn queries_manage_collections_and_documents(db: Database) {
    let out = text(
        &db,
        "(xmldb:create-collection('/db', 'made'), \
          xmldb:store('/db/made', 'n.xml', <note>hi</note>), \
          xmldb:collection-available('/db/made'))",
    );
    assert_eq!(out, "/db/made /db/made/n.xml true");
    assert_eq!(db.list("/db/made").unwrap().documents, vec!["n.xml"]);
    assert_eq!(text(&db, "string(doc('/db/made/n.xml')/note)"), "hi");

    text(&db, "xmldb:remove('/db/made', 'n.xml')");
    assert_eq!(text(&db, "doc-available('/db/made/n.xml')"), "false");
    text(&db, "xmldb:remove('/db/made')");
    assert!(!db.collection_exists("/db/made"));
}

#[rstest]
fn errors_carry_their_code(db: Database) {
    let session = db.session();
    let err = session.query("doc('/db/test/none.xml')").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::FODC0002));
    assert!(err.to_string().contains("FODC0002"));

    let err = session.compile("for $x in return 1").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::XPST0003));

    let err = session.query("collection('/db/nowhere')").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::FODC0004));
}

#[rstest]
fn serialize_option_overrides_session_defaults(db: Database) {
    let session = db.session();
    let q = session
        .compile(
            r#"declare option exist:serialize "method=text"; doc('/db/test/items.xml')//item[1]"#,
        )
        .unwrap();
    let items = session.execute(&q, []).unwrap();
    assert_eq!(session.serialize(&q, &items).unwrap(), "ax");
    let opts = session.serialization_for(&session.compile("1").unwrap()).unwrap();
    assert!(opts.indent);
}

#[rstest]
fn held_document_locks_time_out_queries() {
    let config = DatabaseConfig {
        lock_timeout_ms: 50,
        ..DatabaseConfig::default()
    };
    let db = Database::open(config).unwrap();
    db.store_document("/db", "a.xml", "<a>1</a>").unwrap();
    let session = db.session();
    let q = "util:shared-lock(doc('/db/a.xml'), string(doc('/db/a.xml')/a))";

    let token = db.lock_documents(&["/db/a.xml"], LockMode::Exclusive).unwrap();
    let err = session.query(q).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::EXLK0001));
    assert!(err.is_retryable());
    drop(token);

    let shared = db.lock_documents(&["a.xml"], LockMode::Shared).unwrap();
    assert_eq!(
        session.query(q).unwrap(),
        vec![XdmItem::Atomic(XdmAtomicValue::String("1".into()))]
    );
    drop(shared);
}

#[rstest]
fn concurrent_readers_see_whole_statements(db: Database) {
    let writer = db.clone();
    let handle = std::thread::spawn(move || {
        let session = writer.session();
        for _ in 0..20 {
            session
                .query(
                    "for $i in doc('/db/test/items.xml')//item \
                     return update value $i/key1 with upper-case($i/key1)",
                )
                .unwrap();
            session
                .query(
                    "for $i in doc('/db/test/items.xml')//item \
                     return update value $i/key1 with lower-case($i/key1)",
                )
                .unwrap();
        }
    });
    for _ in 0..40 {
        let upper = text(&db, "count(doc('/db/test/items.xml')//key1[. = ('A', 'B')])");
        assert!(upper == "0" || upper == "8", "saw a half-applied statement: {upper}");
    }
    handle.join().unwrap();
}
