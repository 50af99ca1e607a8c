use crate::{Cli, Command};
use clap::Parser;
use sylva_store::{Database, DatabaseConfig};
use tempfile::TempDir;

pub const BOOKS: &str = "<books>\
<book year='1815'><title>Emma</title><author>Austen</author></book>\
<book year='1965'><title>Dune</title><author>Herbert</author></book>\
<book year='1984'><title>Neuromancer</title><author>Gibson</author></book>\
</books>";

pub fn reopen(dir: &TempDir) -> Database {
    Database::open(DatabaseConfig::default().with_data_dir(dir.path().join("data"))).expect("database")
}

/// A database in a temporary directory holding `/db/library/books.xml`.
pub fn database_with_books() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = reopen(&dir);
    db.store_document("/db/library", "books.xml", BOOKS).expect("store");
    (dir, db)
}

pub fn parse_command(argv: &[&str]) -> Command {
    let mut full = vec!["sylva"];
    full.extend_from_slice(argv);
    Cli::try_parse_from(full).expect("arguments").command
}
