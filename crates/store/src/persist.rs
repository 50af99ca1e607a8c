//! On-disk mirror of the collection tree.
//!
//! `/db/a/b.xml` lives at `<data_dir>/db/a/b.xml`. XML documents are written
//! unindented and read back without whitespace stripping, so a reopened
//! database holds the same trees it had in memory.

use crate::error::{Result, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sylva_xquery::serializer::serialize_node;
use sylva_xquery::{Document, SerializationOptions};
use tracing::{debug, warn};

/// Extensions always loaded as raw bytes.
const BINARY_EXTENSIONS: &[&str] = &["xq", "xqm", "xql", "xquery", "txt", "json", "bin"];

pub fn is_binary_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A resource found while loading the data directory.
pub struct LoadedResource {
    pub collection: String,
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct Snapshot {
    /// Collections in parent-before-child order.
    pub collections: Vec<String>,
    pub resources: Vec<LoadedResource>,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn fs_path(&self, db_path: &str) -> PathBuf {
        self.dir.join(db_path.trim_start_matches('/'))
    }

    pub fn create_collection(&self, collection: &str) -> Result<()> {
        let p = self.fs_path(collection);
        fs::create_dir_all(&p).map_err(io_err(&p))
    }

    pub fn remove_collection(&self, collection: &str) -> Result<()> {
        let p = self.fs_path(collection);
        match fs::remove_dir_all(&p) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_err(&p)(e)),
            _ => Ok(()),
        }
    }

    pub fn write_document(&self, resource: &str, document: &std::sync::Arc<Document>) -> Result<()> {
        let options = SerializationOptions {
            indent: false,
            omit_xml_declaration: true,
            ..SerializationOptions::default()
        };
        let text = serialize_node(&document.root(), &options)?;
        self.write_binary(resource, text.as_bytes())
    }

    pub fn write_binary(&self, resource: &str, content: &[u8]) -> Result<()> {
        let p = self.fs_path(resource);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::write(&p, content).map_err(io_err(&p))?;
        debug!(resource, bytes = content.len(), "wrote resource");
        Ok(())
    }

    pub fn remove_resource(&self, resource: &str) -> Result<()> {
        let p = self.fs_path(resource);
        match fs::remove_file(&p) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_err(&p)(e)),
            _ => Ok(()),
        }
    }

    /// Everything below `<data_dir>/db`.
    pub fn load(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        let root = self.fs_path(crate::path::ROOT);
        if !root.is_dir() {
            return Ok(snapshot);
        }
        self.walk(&root, crate::path::ROOT, &mut snapshot)?;
        Ok(snapshot)
    }

    fn walk(&self, dir: &Path, collection: &str, snapshot: &mut Snapshot) -> Result<()> {
        snapshot.collections.push(collection.to_string());
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)
            .map_err(io_err(dir))?
            .collect::<io::Result<_>>()
            .map_err(io_err(dir))?;
        entries.sort_by_key(fs::DirEntry::file_name);
        for entry in entries {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "skipping file with a non UTF-8 name");
                continue;
            };
            if path.is_dir() {
                self.walk(&path, &crate::path::join(collection, &name), snapshot)?;
            } else {
                let content = fs::read(&path).map_err(io_err(&path))?;
                snapshot.resources.push(LoadedResource {
                    collection: collection.to_string(),
                    name,
                    content,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_xquery::xml::{ParseOptions, parse_document};

    #[test]
    fn writes_and_loads_the_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        store.create_collection("/db/empty").unwrap();
        let doc = parse_document("<a><b>x</b></a>", None, true, ParseOptions::default()).unwrap();
        store.write_document("/db/shop/a.xml", &doc).unwrap();
        store.write_binary("/db/lib/m.xqm", b"module namespace m = 'urn:m';").unwrap();

        let snap = store.load().unwrap();
        assert_eq!(snap.collections, vec!["/db", "/db/empty", "/db/lib", "/db/shop"]);
        let names: Vec<&str> = snap.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["m.xqm", "a.xml"]);
        assert_eq!(snap.resources[1].content, b"<a><b>x</b></a>");

        store.remove_collection("/db/shop").unwrap();
        store.remove_resource("/db/lib/m.xqm").unwrap();
        store.remove_resource("/db/lib/m.xqm").unwrap();
        assert!(store.load().unwrap().resources.is_empty());
    }

    #[test]
    fn module_files_are_binary() {
        assert!(is_binary_name("lib.xqm"));
        assert!(is_binary_name("MAIN.XQ"));
        assert!(!is_binary_name("data.xml"));
        assert!(!is_binary_name("collection.xconf"));
    }
}
