use crate::util::{CliResult, read_text};
use anyhow::{Context, anyhow, bail};
use clap::Args;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use sylva_store::Database;
use sylva_store::path::join;
use sylva_store::persist::is_binary_name;
use tracing::debug;

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Target collection; created when missing.
    #[arg(value_name = "COLLECTION")]
    pub collection: String,
    /// Files or directories to store. Directories become sub-collections.
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,
    /// Resource name for a single stored file.
    #[arg(long)]
    pub name: Option<String>,
    /// Store every file as a binary resource.
    #[arg(long)]
    pub binary: bool,
}

pub fn run(db: &Database, args: &StoreArgs) -> CliResult<String> {
    if args.name.is_some() && (args.paths.len() > 1 || args.paths.iter().any(|p| p.is_dir())) {
        bail!("--name only applies when storing a single file");
    }
    let mut output = String::new();
    for path in &args.paths {
        if path.is_dir() {
            store_dir(db, &args.collection, path, args.binary, &mut output)?;
        } else {
            let name = match &args.name {
                Some(n) => n.clone(),
                None => file_name(path)?,
            };
            store_file(db, &args.collection, &name, path, args.binary, &mut output)?;
        }
    }
    Ok(output.trim_end().to_owned())
}

fn file_name(path: &Path) -> CliResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))
}

fn store_dir(db: &Database, collection: &str, dir: &Path, binary: bool, output: &mut String) -> CliResult<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", dir.display()))?;
    entries.sort_by_key(fs::DirEntry::file_name);
    db.create_collection(collection)?;
    for entry in entries {
        let path = entry.path();
        let name = file_name(&path)?;
        if path.is_dir() {
            store_dir(db, &join(collection, &name), &path, binary, output)?;
        } else {
            store_file(db, collection, &name, &path, binary, output)?;
        }
    }
    Ok(())
}

fn store_file(
    db: &Database,
    collection: &str,
    name: &str,
    path: &Path,
    binary: bool,
    output: &mut String,
) -> CliResult<()> {
    if binary || is_binary_name(name) {
        let content = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        db.store_binary(collection, name, content)?;
        let _ = writeln!(output, "stored {} (binary)", join(collection, name));
    } else {
        let text = read_text(path)?;
        let id = db
            .store_document(collection, name, &text)
            .with_context(|| format!("storing {}", path.display()))?;
        debug!(document = %id, "stored");
        let _ = writeln!(output, "stored {}", join(collection, name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::test_support::{database_with_books, parse_command};
    use rstest::rstest;

    fn store(db: &Database, argv: &[&str]) -> CliResult<String> {
        let mut full = vec!["store"];
        full.extend_from_slice(argv);
        let Command::Store(args) = parse_command(&full) else {
            panic!("not a store command");
        };
        run(db, &args)
    }

    #[rstest]
    fn stores_a_directory_tree() {
        let (dir, db) = database_with_books();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("lib")).expect("mkdir");
        fs::write(src.join("a.xml"), "<a/>").expect("write");
        fs::write(src.join("lib/m.xqm"), "module namespace m = \"urn:m\";").expect("write");

        let out = store(&db, &["/db/app", src.to_str().expect("utf-8")]).expect("store");
        assert_eq!(out, "stored /db/app/a.xml\nstored /db/app/lib/m.xqm (binary)");
        assert_eq!(db.list("/db/app").expect("list").documents, vec!["a.xml"]);
        assert_eq!(db.list("/db/app/lib").expect("list").binaries, vec!["m.xqm"]);
    }

    #[rstest]
    #[case(false, "stored /db/x/renamed.xml")]
    #[case(true, "stored /db/x/renamed.xml (binary)")]
    fn single_file_with_a_new_name(#[case] binary: bool, #[case] expected: &str) {
        let (dir, db) = database_with_books();
        let file = dir.path().join("in.xml");
        fs::write(&file, "<in/>").expect("write");
        let mut argv = vec!["/db/x", file.to_str().expect("utf-8"), "--name", "renamed.xml"];
        if binary {
            argv.push("--binary");
        }
        assert_eq!(store(&db, &argv).expect("store"), expected);
    }

    #[rstest]
    fn malformed_xml_is_reported_with_its_path() {
        let (dir, db) = database_with_books();
        let file = dir.path().join("bad.xml");
        fs::write(&file, "<open>").expect("write");
        let err = store(&db, &["/db/x", file.to_str().expect("utf-8")]).unwrap_err();
        assert!(format!("{err:#}").contains("bad.xml"));
    }
}
