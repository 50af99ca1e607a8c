use rstest::{fixture, rstest};
use sylva_store::{Database, Session};

const PLAY_CONFIG: &str = r#"
<collection xmlns="http://exist-db.org/collection-config/1.0">
    <index>
        <create qname="SPEAKER" type="xs:string"/>
        <create qname="@n" type="xs:integer"/>
        <create path="//product/price" type="xs:double"/>
        <fulltext default="none" attributes="false">
            <include path="//LINE"/>
        </fulltext>
    </index>
</collection>"#;

fn play_xml() -> String {
    let speakers = ["HAMLET", "HORATIO", "OPHELIA", "GHOST"];
    let mut xml = String::from("<PLAY>");
    for act in 1..=3 {
        xml.push_str("<ACT>");
        for i in 0..20 {
            let speaker = speakers[(act + i) % speakers.len()];
            xml.push_str(&format!(
                r#"<SPEECH n="{i}"><SPEAKER>{speaker}</SPEAKER><LINE>line {i} of act {act}</LINE>"#
            ));
            if i % 3 == 0 {
                xml.push_str("<LINE>love and the quick fox</LINE>");
            }
            xml.push_str("</SPEECH>");
        }
        xml.push_str("</ACT>");
    }
    xml.push_str("</PLAY>");
    xml
}

#[fixture]
fn db() -> Database {
    let db = Database::in_memory();
    db.configure_collection("/db/shakespeare", PLAY_CONFIG).unwrap();
    db.store_document("/db/shakespeare", "hamlet.xml", &play_xml()).unwrap();
    db.store_document(
        "/db/shakespeare",
        "nested.xml",
        "<test><a><t>1</t><a><t>2</t><a><t>3</t></a></a></a></test>",
    )
    .unwrap();
    db
}

fn session(db: &Database, collection: &str, optimize: bool) -> Session {
    let mut s = db.session();
    s.set_collection(collection).unwrap();
    s.set_optimize(optimize);
    s.serialization_mut().indent = false;
    s
}

fn run_in(db: &Database, collection: &str, query: &str, optimize: bool) -> String {
    session(db, collection, optimize)
        .query_to_string(query)
        .unwrap_or_else(|e| panic!("{query}: {e}"))
}

fn run(db: &Database, query: &str, optimize: bool) -> String {
    run_in(db, "/db/shakespeare", query, optimize)
}

#[rstest]
#[case("count(//SPEECH[SPEAKER = 'HAMLET'])")]
#[case("//SPEECH[SPEAKER eq 'OPHELIA']/@n/string()")]
#[case("count(//SPEECH[@n > 15])")]
#[case("count(//SPEECH[@n >= 3 and @n < 7])")]
#[case("count(//SPEECH[SPEAKER = 'GHOST' or @n = 1])")]
#[case("count(//SPEECH[starts-with(SPEAKER, 'HO')])")]
#[case("count(//SPEECH[ends-with(SPEAKER, 'LIA')])")]
#[case("count(//SPEECH[contains(SPEAKER, 'AML')])")]
#[case("count(//SPEECH[matches(SPEAKER, '^g', 'i')])")]
#[case("count(//LINE[. &= 'love fox'])")]
#[case("count(//LINE[. &= 'lo*'])")]
#[case("count(//LINE[. |= 'quick nothing'])")]
#[case("count(//SPEECH[LINE &= 'act'])")]
#[case("count(//SPEECH[text:match-any(LINE, 'qui.k')])")]
#[case("count(//SPEECH[SPEAKER = 'HAMLET'][LINE &= 'fox'])")]
#[case("//ACT[2]/SPEECH[SPEAKER = 'HAMLET'][1]/@n/string()")]
#[case("(//SPEECH[SPEAKER = 'HORATIO'])[3]/@n/string()")]
#[case("count(//SPEECH[SPEAKER = 'HAMLET'][position() = 2])")]
#[case("count(//SPEECH[SPEAKER = 'HAMLET'][position() eq 2])")]
#[case("for $a in /PLAY/ACT return count($a/SPEECH[SPEAKER = 'HORATIO'])")]
#[case("count(//SPEAKER[. = 'HAMLET']/ancestor::SPEECH)")]
#[case("count(//SPEECH[SPEAKER = 'HAMLET']/ancestor-or-self::*)")]
#[case("count(//a[ancestor::a[1]/t = '2'])")]
#[case("count(//a[ancestor::*[1]/t = '2'])")]
#[case("count(//t[parent::a/t = '3'])")]
fn optimized_and_plain_evaluation_agree(db: Database, #[case] query: &str) {
    let plain = run(&db, query, false);
    let optimized = run(&db, query, true);
    assert_eq!(plain, optimized, "query: {query}");
}

#[rstest]
fn ancestor_predicates_select_the_innermost_element(db: Database) {
    assert_eq!(run(&db, "count(//a[ancestor::a[1]/t = '2'])", true), "1");
    assert_eq!(run(&db, "count(//a[ancestor::*[1]/t = '2'])", true), "1");
    assert_eq!(run(&db, "//a[ancestor::a[1]/t = '2']/t/string()", true), "3");
}

#[rstest]
fn positional_forms_are_equivalent(db: Database) {
    let forms = [
        "//SPEECH[SPEAKER = 'GHOST'][4]/@n/string()",
        "//SPEECH[SPEAKER = 'GHOST'][position() = 4]/@n/string()",
        "//SPEECH[SPEAKER = 'GHOST'][position() eq 4]/@n/string()",
    ];
    let first = run(&db, forms[0], true);
    assert!(!first.is_empty());
    for q in forms {
        assert_eq!(run(&db, q, true), first, "{q}");
        assert_eq!(run(&db, q, false), first, "{q}");
    }
}

#[rstest]
fn configured_indexes_answer_lookups(db: Database) {
    let stats = db.index_stats("/db/shakespeare/hamlet.xml").unwrap().unwrap();
    assert_eq!(stats.value_entries, 120);
    assert_eq!(stats.conversion_failures, 0);
    assert_eq!(stats.fulltext_nodes, 81);

    let before = db.index_lookups();
    run(&db, "count(//SPEECH[SPEAKER = 'HAMLET'])", true);
    run(&db, "count(//LINE[. &= 'fox'])", true);
    assert!(db.index_lookups() >= before + 2);

    let before = db.index_lookups();
    run(&db, "count(//SPEECH[SPEAKER = 'HAMLET'])", false);
    assert_eq!(db.index_lookups(), before);
}

#[rstest]
fn optimize_option_overrides_the_session(db: Database) {
    let before = db.index_lookups();
    let q = r#"declare option exist:optimize "enable=no"; count(//SPEECH[SPEAKER = 'HAMLET'])"#;
    let out = run(&db, q, true);
    assert_eq!(db.index_lookups(), before);
    assert_eq!(out, run(&db, "count(//SPEECH[SPEAKER = 'HAMLET'])", true));
}

#[rstest]
fn changing_the_configuration_reindexes(db: Database) {
    db.store_document("/db/shakespeare/more", "short.xml", "<PLAY><SPEECH><SPEAKER>YORICK</SPEAKER></SPEECH></PLAY>")
        .unwrap();
    assert_eq!(db.index_stats("/db/shakespeare/more/short.xml").unwrap().unwrap().value_entries, 1);

    db.configure_collection(
        "/db/shakespeare/more",
        r#"<collection xmlns="http://exist-db.org/collection-config/1.0"><index/></collection>"#,
    )
    .unwrap();
    assert_eq!(db.index_stats("/db/shakespeare/more/short.xml").unwrap().unwrap().value_entries, 0);
    assert_eq!(db.index_stats("/db/shakespeare/hamlet.xml").unwrap().unwrap().value_entries, 120);

    db.remove_document("/db/system/config/db/shakespeare/more", "collection.xconf").unwrap();
    assert_eq!(db.index_stats("/db/shakespeare/more/short.xml").unwrap().unwrap().value_entries, 1);
    assert_eq!(run(&db, "count(collection('more')//SPEECH[SPEAKER = 'YORICK'])", true), "1");
}

#[rstest]
fn updates_are_visible_to_the_next_indexed_lookup(db: Database) {
    let q = "count(//SPEECH[SPEAKER = 'HAMLET'])";
    let before: usize = run(&db, q, true).parse().unwrap();
    run(&db, "update value (//SPEAKER[. = 'GHOST'])[1] with 'HAMLET'", true);
    let after: usize = run(&db, q, true).parse().unwrap();
    assert_eq!(after, before + 1);
    assert_eq!(run(&db, q, false), after.to_string());

    run(&db, "update delete //LINE[. &= 'fox']", true);
    assert_eq!(run(&db, "count(//LINE[. &= 'fox'])", true), "0");
    assert_eq!(run(&db, "count(//LINE[. &= 'fox'])", false), "0");
}

#[rstest]
fn appended_products_are_all_found() {
    let db = Database::in_memory();
    db.configure_collection("/db/shop", PLAY_CONFIG).unwrap();
    db.store_document("/db/shop", "products.xml", "<products/>").unwrap();
    let session = db.session();
    session
        .query(
            "for $i in 1 to 1000 return update insert \
             <product id='{$i}'><name>p{$i}</name><price>{$i * 1.5}</price></product> \
             into doc('/db/shop/products.xml')/products",
        )
        .unwrap();
    for optimize in [true, false] {
        assert_eq!(run_in(&db, "/db/shop", "count(doc('/db/shop/products.xml')//product)", optimize), "1000");
        assert_eq!(
            run_in(&db, "/db/shop", "count(doc('/db/shop/products.xml')//product[price > 0.0])", optimize),
            "1000"
        );
        assert_eq!(
            run_in(&db, "/db/shop", "count(doc('/db/shop/products.xml')//product[price < 15])", optimize),
            "9"
        );
    }
}

#[rstest]
fn unconvertible_values_fall_back_to_scanning() {
    let db = Database::in_memory();
    db.configure_collection("/db/shop", PLAY_CONFIG).unwrap();
    db.store_document(
        "/db/shop",
        "odd.xml",
        "<products><product><price>3</price></product><product><price>n/a</price></product></products>",
    )
    .unwrap();
    let stats = db.index_stats("/db/shop/odd.xml").unwrap().unwrap();
    assert_eq!(stats.conversion_failures, 1);
    let before = db.index_lookups();
    let q = "count(//product[price castable as xs:double][price = 3])";
    assert_eq!(run_in(&db, "/db/shop", q, true), "1");
    assert_eq!(run_in(&db, "/db/shop", q, false), "1");
    assert_eq!(db.index_lookups(), before);
}
