use crate::OutputFormat;
use crate::util::{CliResult, yes_no};
use clap::Args;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use sylva_store::Database;
use sylva_store::path::{ROOT, join};

#[derive(Args, Debug, Clone)]
pub struct LsArgs {
    #[arg(value_name = "COLLECTION", default_value = ROOT)]
    pub collection: String,
    /// Descend into sub-collections.
    #[arg(short, long)]
    pub recursive: bool,
    /// Show index statistics for each document.
    #[arg(long)]
    pub stats: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum Entry {
    Collection {
        path: String,
    },
    Document {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        indexed: Option<IndexSummary>,
    },
    Binary {
        path: String,
        size: usize,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct IndexSummary {
    value_entries: usize,
    fulltext_tokens: usize,
    usable: bool,
}

pub fn run(db: &Database, args: &LsArgs) -> CliResult<String> {
    let mut entries = Vec::new();
    collect(db, &args.collection, args, &mut entries)?;
    match args.format {
        OutputFormat::Text => Ok(render_text(&entries)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
    }
}

fn collect(db: &Database, collection: &str, args: &LsArgs, entries: &mut Vec<Entry>) -> CliResult<()> {
    let listing = db.list(collection)?;
    for doc in &listing.documents {
        let path = join(collection, doc);
        let indexed = if args.stats {
            db.index_stats(&path)?.map(|s| IndexSummary {
                value_entries: s.value_entries,
                fulltext_tokens: s.fulltext_tokens,
                usable: s.conversion_failures == 0,
            })
        } else {
            None
        };
        entries.push(Entry::Document { path, indexed });
    }
    for name in &listing.binaries {
        let path = join(collection, name);
        let size = db.get_binary(&path)?.len();
        entries.push(Entry::Binary { path, size });
    }
    for child in &listing.collections {
        let path = join(collection, child);
        entries.push(Entry::Collection { path: path.clone() });
        if args.recursive {
            collect(db, &path, args, entries)?;
        }
    }
    Ok(())
}

fn render_text(entries: &[Entry]) -> String {
    let mut output = String::new();
    for entry in entries {
        match entry {
            Entry::Collection { path } => {
                let label = format!("{path}/");
                let _ = writeln!(
                    output,
                    "{}",
                    label.if_supports_color(Stream::Stdout, |text| text.bold().blue().to_string())
                );
            }
            Entry::Document { path, indexed } => {
                let _ = write!(output, "{path}");
                if let Some(ix) = indexed {
                    let _ = write!(
                        output,
                        "  [values: {}, tokens: {}, usable: {}]",
                        ix.value_entries,
                        ix.fulltext_tokens,
                        yes_no(ix.usable)
                    );
                }
                output.push('\n');
            }
            Entry::Binary { path, size } => {
                let detail = format!("({size} bytes)");
                let _ = writeln!(
                    output,
                    "{path} {}",
                    detail.if_supports_color(Stream::Stdout, |text| text.dimmed().to_string())
                );
            }
        }
    }
    output.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::test_support::{database_with_books, parse_command};
    use rstest::rstest;

    fn ls(db: &Database, argv: &[&str]) -> CliResult<String> {
        let mut full = vec!["ls"];
        full.extend_from_slice(argv);
        let Command::Ls(args) = parse_command(&full) else {
            panic!("not an ls command");
        };
        run(db, &args)
    }

    #[rstest]
    fn recursive_json_listing() {
        let (_dir, db) = database_with_books();
        db.store_binary("/db/library/lib", "m.xqm", "module namespace m = \"urn:m\";").expect("store");
        let out = ls(&db, &["-r", "--format", "json"]).expect("ls");
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&out).expect("json");
        let paths: Vec<&str> = parsed.iter().filter_map(|e| e["path"].as_str()).collect();
        assert_eq!(
            paths,
            vec!["/db/library", "/db/library/books.xml", "/db/library/lib", "/db/library/lib/m.xqm"]
        );
        assert_eq!(parsed[3]["type"], "binary");
        assert_eq!(parsed[3]["size"], 29);
    }

    #[rstest]
    fn stats_show_index_usage() {
        let (_dir, db) = database_with_books();
        db.configure_collection(
            "/db/library",
            r#"<collection xmlns="http://exist-db.org/collection-config/1.0"><index><create qname="@year" type="xs:integer"/></index></collection>"#,
        )
        .expect("configure");
        let out = ls(&db, &["/db/library", "--stats"]).expect("ls");
        assert!(out.contains("/db/library/books.xml  [values: 3, tokens: 0, usable: yes]"), "{out}");
    }

    #[rstest]
    fn missing_collections_are_errors() {
        let (_dir, db) = database_with_books();
        assert!(ls(&db, &["/db/nowhere"]).is_err());
    }
}
