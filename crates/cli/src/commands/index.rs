use crate::util::{CliResult, read_text, yes_no};
use clap::Args;
use std::fmt::Write;
use std::path::PathBuf;
use sylva_store::Database;
use sylva_store::path::{CONFIG_FILE, ROOT, config_collection_for, normalize};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(value_name = "COLLECTION")]
    pub collection: String,
    /// Install this `collection.xconf` descriptor.
    #[arg(long, value_name = "FILE", conflicts_with = "clear")]
    pub set: Option<PathBuf>,
    /// Remove the collection's own descriptor.
    #[arg(long)]
    pub clear: bool,
}

pub fn run(db: &Database, args: &IndexArgs) -> CliResult<String> {
    let collection = normalize(&args.collection, ROOT)?;
    if let Some(path) = &args.set {
        db.configure_collection(&collection, &read_text(path)?)?;
        info!(collection = %collection, "installed index configuration");
    } else if args.clear {
        db.remove_document(&config_collection_for(&collection), CONFIG_FILE)?;
        info!(collection = %collection, "removed index configuration");
    }
    Ok(describe(db, &collection))
}

fn describe(db: &Database, collection: &str) -> String {
    let Some(config) = db.index_config(collection).filter(|c| !c.is_empty()) else {
        return format!("{collection}: no indexes");
    };
    let mut output = format!("{collection}:");
    for def in &config.values {
        let _ = write!(output, "\n  value {} as {:?}", def.pattern.source, def.key_type);
    }
    if let Some(ft) = &config.fulltext {
        let _ = write!(
            output,
            "\n  fulltext default={} attributes={}",
            if ft.default_all { "all" } else { "none" },
            yes_no(ft.attributes)
        );
        for p in &ft.includes {
            let _ = write!(output, "\n    include {}", p.source);
        }
        for p in &ft.excludes {
            let _ = write!(output, "\n    exclude {}", p.source);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::test_support::{database_with_books, parse_command};
    use rstest::rstest;

    const DESCRIPTOR: &str = r#"<collection xmlns="http://exist-db.org/collection-config/1.0">
    <index>
        <create qname="@year" type="xs:integer"/>
        <fulltext default="none" attributes="false"><include path="//title"/></fulltext>
    </index>
</collection>"#;

    fn index(db: &Database, argv: &[&str]) -> CliResult<String> {
        let mut full = vec!["index"];
        full.extend_from_slice(argv);
        let Command::Index(args) = parse_command(&full) else {
            panic!("not an index command");
        };
        run(db, &args)
    }

    #[rstest]
    fn set_show_and_clear() {
        let (dir, db) = database_with_books();
        let file = dir.path().join("collection.xconf");
        std::fs::write(&file, DESCRIPTOR).expect("write");

        let out = index(&db, &["/db/library", "--set", file.to_str().expect("utf-8")]).expect("set");
        assert_eq!(
            out,
            "/db/library:\n  value @year as Integer\n  fulltext default=none attributes=no\n    include //title"
        );
        // Sub-collections inherit the nearest configuration.
        assert!(index(&db, &["/db/library/old"]).expect("show").contains("value @year"));

        let out = index(&db, &["/db/library", "--clear"]).expect("clear");
        assert_eq!(out, "/db/library: no indexes");
    }

    #[rstest]
    fn invalid_descriptors_are_rejected() {
        let (dir, db) = database_with_books();
        let file = dir.path().join("bad.xconf");
        std::fs::write(
            &file,
            r#"<collection xmlns="http://exist-db.org/collection-config/1.0"><index><create qname="x" type="xs:nope"/></index></collection>"#,
        )
        .expect("write");
        assert!(index(&db, &["/db/library", "--set", file.to_str().expect("utf-8")]).is_err());
        assert_eq!(index(&db, &["/db/library"]).expect("show"), "/db/library: no indexes");
    }
}
