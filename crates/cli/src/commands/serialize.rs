use crate::util::CliResult;
use anyhow::Context;
use clap::Args;
use std::fs;
use std::path::PathBuf;
use sylva_store::Database;
use sylva_xquery::serializer::serialize_node;

#[derive(Args, Debug, Clone)]
pub struct SerializeArgs {
    /// Database path of the document, e.g. `/db/library/books.xml`.
    #[arg(value_name = "RESOURCE")]
    pub resource: String,
    /// Serialization parameters, as in `exist:serialize` (`indent=no method=text`).
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Write to a file instead of standard output.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub fn run(db: &Database, args: &SerializeArgs) -> CliResult<String> {
    let document = db.get_document(&args.resource)?;
    let mut options = db.config().serialization.options();
    options.apply(&args.params.join(" "))?;
    let text = serialize_node(&document, &options)?;
    match &args.output {
        Some(path) => {
            fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
            Ok(String::new())
        }
        None => Ok(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::test_support::{database_with_books, parse_command};
    use rstest::rstest;

    fn serialize(db: &Database, argv: &[&str]) -> CliResult<String> {
        let mut full = vec!["serialize"];
        full.extend_from_slice(argv);
        let Command::Serialize(args) = parse_command(&full) else {
            panic!("not a serialize command");
        };
        run(db, &args)
    }

    #[rstest]
    #[case(&["-p", "indent=no"], "<books><book year=\"1815\"><title>Emma</title>")]
    #[case(&["-p", "method=text"], "EmmaAustenDuneHerbert")]
    #[case(&["-p", "indent=yes"], "<books>\n    <book year=\"1815\">")]
    #[case(&["-p", "indent=no", "-p", "omit-xml-declaration=no"], "<?xml")]
    fn parameters_shape_the_output(#[case] params: &[&str], #[case] prefix: &str) {
        let (_dir, db) = database_with_books();
        let mut argv = vec!["/db/library/books.xml"];
        argv.extend_from_slice(params);
        let out = serialize(&db, &argv).expect("serialize");
        assert!(out.starts_with(prefix), "{out}");
    }

    #[rstest]
    fn writes_to_a_file() {
        let (dir, db) = database_with_books();
        let target = dir.path().join("out.xml");
        let out = serialize(&db, &["/db/library/books.xml", "-p", "indent=no", "-o", target.to_str().expect("utf-8")])
            .expect("serialize");
        assert!(out.is_empty());
        let written = fs::read_to_string(target).expect("read");
        assert!(written.ends_with("</books>"));
    }

    #[rstest]
    #[case("/db/library/none.xml")]
    #[case("/db/library")]
    fn unknown_resources_fail(#[case] resource: &str) {
        let (_dir, db) = database_with_books();
        assert!(serialize(&db, &[resource]).is_err());
    }
}
