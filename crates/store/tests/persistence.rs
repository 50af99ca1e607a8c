use rstest::rstest;
use std::fs;
use sylva_store::{Database, DatabaseConfig};
use tempfile::TempDir;

const CONFIG: &str = r#"<collection xmlns="http://exist-db.org/collection-config/1.0">
    <index><create qname="@id" type="xs:integer"/></index>
</collection>"#;

fn open(dir: &TempDir) -> Database {
    Database::open(DatabaseConfig::default().with_data_dir(dir.path())).unwrap()
}

fn text(db: &Database, query: &str) -> String {
    let mut session = db.session();
    session.serialization_mut().indent = false;
    session.query_to_string(query).unwrap_or_else(|e| panic!("{query}: {e}"))
}

#[rstest]
fn stored_resources_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        db.store_document("/db/library", "books.xml", "<books><book id='1'>Dune</book></books>")
            .unwrap();
        db.store_binary("/db/library/lib", "util.xqm", "module namespace u = \"urn:u\"; declare function u:one() { 1 };")
            .unwrap();
        db.create_collection("/db/empty").unwrap();
    }
    assert!(dir.path().join("db/library/books.xml").is_file());

    let db = open(&dir);
    assert!(db.collection_exists("/db/empty"));
    let listing = db.list("/db/library").unwrap();
    assert_eq!(listing.documents, vec!["books.xml"]);
    assert_eq!(listing.collections, vec!["lib"]);
    assert_eq!(text(&db, "string(doc('/db/library/books.xml')//book)"), "Dune");
    assert_eq!(
        text(&db, r#"import module namespace u = "urn:u" at "/db/library/lib/util.xqm"; u:one()"#),
        "1"
    );
}

#[rstest]
fn updates_are_flushed_to_disk() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        db.store_document("/db/library", "books.xml", "<books/>").unwrap();
        text(
            &db,
            "update insert <book id='2'>Emma</book> into doc('/db/library/books.xml')/books",
        );
    }
    let on_disk = fs::read_to_string(dir.path().join("db/library/books.xml")).unwrap();
    assert!(on_disk.contains("Emma"), "{on_disk}");

    let db = open(&dir);
    assert_eq!(text(&db, "count(doc('/db/library/books.xml')//book)"), "1");
}

#[rstest]
fn removals_reach_the_data_directory() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.store_document("/db/a", "x.xml", "<x/>").unwrap();
    db.store_document("/db/b", "y.xml", "<y/>").unwrap();
    db.remove_document("/db/a", "x.xml").unwrap();
    db.remove_collection("/db/b").unwrap();
    assert!(!dir.path().join("db/a/x.xml").exists());
    assert!(!dir.path().join("db/b").exists());
    drop(db);

    let db = open(&dir);
    assert!(db.list("/db/a").unwrap().documents.is_empty());
    assert!(!db.collection_exists("/db/b"));
}

#[rstest]
fn index_configuration_is_restored() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        db.configure_collection("/db/library", CONFIG).unwrap();
        db.store_document("/db/library", "books.xml", "<books><book id='1'/><book id='2'/></books>")
            .unwrap();
    }
    let db = open(&dir);
    assert!(db.index_config("/db/library").is_some());
    let stats = db.index_stats("/db/library/books.xml").unwrap().unwrap();
    assert_eq!(stats.value_entries, 2);

    let before = db.index_lookups();
    assert_eq!(text(&db, "count(collection('/db/library')//book[@id = 2])"), "1");
    assert!(db.index_lookups() > before);
}

#[rstest]
fn unparsable_files_load_as_binary() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("db/raw")).unwrap();
    fs::write(dir.path().join("db/raw/broken.xml"), "<open>").unwrap();
    fs::write(dir.path().join("db/raw/notes.txt"), "<b>not xml</b>").unwrap();

    let db = open(&dir);
    let listing = db.list("/db/raw").unwrap();
    assert!(listing.documents.is_empty());
    assert_eq!(listing.binaries, vec!["broken.xml", "notes.txt"]);
    assert_eq!(db.get_binary("/db/raw/notes.txt").unwrap().as_slice(), b"<b>not xml</b>");
}
