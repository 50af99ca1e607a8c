use crate::OutputFormat;
use crate::util::{CliResult, parse_assignment, parse_bindings, read_text};
use anyhow::{Context, bail};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use sylva_store::Database;
use sylva_xquery::{NodeKind, Sequence, XdmItem, XdmNode, serializer::serialize_item};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(value_name = "XQUERY", required_unless_present = "file")]
    pub expression: Option<String>,
    /// Read the query from a file instead.
    #[arg(short, long, value_name = "FILE", conflicts_with = "expression")]
    pub file: Option<PathBuf>,
    /// Collection that relative paths resolve against.
    #[arg(short, long, default_value = "/db")]
    pub collection: String,
    /// Bind an external variable, as a string.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,
    #[arg(long = "namespace", value_name = "PREFIX=URI")]
    pub namespaces: Vec<String>,
    /// Evaluate without index lookups.
    #[arg(long)]
    pub no_optimize: bool,
    #[arg(long)]
    pub no_indent: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct ItemSummary {
    kind: &'static str,
    value: String,
}

pub fn run(db: &Database, args: &QueryArgs) -> CliResult<String> {
    let source = match (&args.expression, &args.file) {
        (Some(expr), _) => expr.clone(),
        (None, Some(path)) => read_text(path)?,
        (None, None) => bail!("no query given"),
    };

    let mut session = db.session();
    session
        .set_collection(&args.collection)
        .with_context(|| format!("using collection {}", args.collection))?;
    for ns in &args.namespaces {
        let (prefix, uri) = parse_assignment(ns)?;
        session.declare_namespace(prefix, uri);
    }
    if args.no_optimize {
        session.set_optimize(false);
    }
    if args.no_indent {
        session.serialization_mut().indent = false;
    }

    let compiled = session.compile(&source)?;
    let started = Instant::now();
    let items = session.execute(&compiled, parse_bindings(&args.variables)?)?;
    info!(
        items = items.len(),
        elapsed_ms = started.elapsed().as_millis(),
        updating = compiled.is_updating(),
        "query evaluated"
    );

    match args.format {
        OutputFormat::Text => Ok(session.serialize(&compiled, &items)?),
        OutputFormat::Json => {
            let options = session.serialization_for(&compiled)?;
            let summaries = summarize(&items, |item| serialize_item(item, &options))?;
            Ok(serde_json::to_string_pretty(&summaries)?)
        }
    }
}

fn summarize<F>(items: &Sequence, mut render: F) -> CliResult<Vec<ItemSummary>>
where
    F: FnMut(&XdmItem<sylva_xquery::Node>) -> Result<String, sylva_xquery::Error>,
{
    items
        .iter()
        .map(|item| {
            let kind = match item {
                XdmItem::Atomic(a) => a.type_name(),
                XdmItem::Node(n) => node_kind_name(n.kind()),
            };
            Ok(ItemSummary {
                kind,
                value: render(item)?,
            })
        })
        .collect()
}

fn node_kind_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Document => "document-node()",
        NodeKind::Element => "element()",
        NodeKind::Attribute => "attribute()",
        NodeKind::Text => "text()",
        NodeKind::Comment => "comment()",
        NodeKind::ProcessingInstruction => "processing-instruction()",
        NodeKind::Namespace => "namespace-node()",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{database_with_books, parse_command};
    use crate::{Command, execute};
    use rstest::rstest;

    fn query(db: &Database, argv: &[&str]) -> CliResult<String> {
        let mut full = vec!["query"];
        full.extend_from_slice(argv);
        let Command::Query(args) = parse_command(&full) else {
            panic!("not a query command");
        };
        run(db, &args)
    }

    #[rstest]
    #[case(&["count(//book)"], "3")]
    #[case(&["-c", "/db/library", "string(doc('books.xml')//book[@year = 1965]/title)"], "Dune")]
    #[case(&["--var", "who=Austen", "declare variable $who external; //book[author = $who]/title/string()"], "Emma")]
    #[case(&["--no-optimize", "count(//book[@year > 1900])"], "2")]
    #[case(&["--namespace", "b=urn:books", "namespace-uri(<b:x/>)"], "urn:books")]
    fn text_output(#[case] argv: &[&str], #[case] expected: &str) {
        let (_dir, db) = database_with_books();
        assert_eq!(query(&db, argv).expect("query"), expected);
    }

    #[rstest]
    fn json_output_lists_kinds() {
        let (_dir, db) = database_with_books();
        let out = query(&db, &["--format", "json", "--no-indent", "(1, //book[1]/title, 'x')"]).expect("query");
        let parsed: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(parsed[0]["kind"], "xs:integer");
        assert_eq!(parsed[1]["kind"], "element()");
        assert_eq!(parsed[1]["value"], "<title>Emma</title>");
        assert_eq!(parsed[2]["value"], "x");
    }

    #[rstest]
    fn query_from_file_and_updates_persist() {
        let (dir, db) = database_with_books();
        let file = dir.path().join("add.xq");
        std::fs::write(
            &file,
            "update insert <book year='2001'><title>Atonement</title></book> into doc('/db/library/books.xml')/books",
        )
        .expect("write");
        query(&db, &["--file", file.to_str().expect("utf-8")]).expect("update");
        let reopened = crate::test_support::reopen(&dir);
        let out = execute(&reopened, &parse_command(&["query", "count(//book)"])).expect("count");
        assert_eq!(out, "4");
    }

    #[rstest]
    fn errors_keep_their_code() {
        let (_dir, db) = database_with_books();
        let err = query(&db, &["doc('/db/none.xml')"]).unwrap_err();
        assert!(format!("{err:#}").contains("FODC0002"));
        assert!(query(&db, &["-c", "/db/nowhere", "1"]).is_err());
    }
}
