//! Library module lookup and the process-wide compiled module cache.
//!
//! A location hint from `import module ... at "hint"` resolves to a
//! [`ModuleLocation`]: either a database path or a file. The module text is
//! fetched from the registered [`ModuleSource`]s in order; the parsed module
//! is cached by `(namespace, location)`, so one namespace may be served by
//! different modules from different locations in the same process.

use crate::consts::XMLDB_SCHEME;
use crate::parser::{self, ast};
use crate::runtime::{Error, ErrorCode};
use core::fmt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleLocation {
    /// Absolute, normalized database path such as `/db/modules/a.xqm`.
    Database(String),
    File(PathBuf),
}

impl fmt::Display for ModuleLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(p) => write!(f, "{XMLDB_SCHEME}{p}"),
            Self::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Provides module text for a location; `Ok(None)` means "not here".
pub trait ModuleSource: Send + Sync {
    fn load(&self, location: &ModuleLocation) -> Result<Option<String>, Error>;
}

/// Reads modules from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileModuleSource;

impl ModuleSource for FileModuleSource {
    fn load(&self, location: &ModuleLocation) -> Result<Option<String>, Error> {
        let ModuleLocation::File(path) = location else {
            return Ok(None);
        };
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from_code(
                ErrorCode::XQST0059,
                format!("cannot read module {}: {e}", path.display()),
            )
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))),
        }
    }
}

struct CachedModule {
    text: String,
    module: Arc<ast::LibraryModule>,
}

/// Parsed library modules keyed by `(namespace, location)`.
///
/// An entry is reparsed when the text behind its location changes.
#[derive(Default)]
pub struct ModuleCache {
    entries: Mutex<HashMap<(String, ModuleLocation), CachedModule>>,
}

impl ModuleCache {
    fn get_or_parse(
        &self,
        namespace: &str,
        location: &ModuleLocation,
        text: String,
    ) -> Result<Arc<ast::LibraryModule>, Error> {
        let key = (namespace.to_string(), location.clone());
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(&key)
            && cached.text == text
        {
            return Ok(Arc::clone(&cached.module));
        }
        debug!(namespace, %location, "parsing library module");
        let module = match parser::parse_module(&text)? {
            ast::Module::Library(lib) => Arc::new(lib),
            ast::Module::Main(_) => {
                return Err(Error::from_code(
                    ErrorCode::XQST0059,
                    format!("{location} is not a library module"),
                ));
            }
        };
        entries.insert(
            key,
            CachedModule {
                text,
                module: Arc::clone(&module),
            },
        );
        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every parsed module, e.g. when the database shuts down.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

pub struct ModuleResolver {
    sources: Vec<Arc<dyn ModuleSource>>,
    search_path: Vec<PathBuf>,
    cache: ModuleCache,
    namespace_map: RwLock<HashMap<String, Vec<String>>>,
}

impl fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("sources", &self.sources.len())
            .field("search_path", &self.search_path)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleResolver {
    /// Resolver reading from the file system only.
    pub fn new() -> Self {
        Self {
            sources: vec![Arc::new(FileModuleSource)],
            search_path: Vec::new(),
            cache: ModuleCache::default(),
            namespace_map: RwLock::new(HashMap::new()),
        }
    }

    /// Add a source consulted before the ones already registered.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ModuleSource>) -> Self {
        self.sources.insert(0, source);
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_path.push(root.into());
        self
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Location used when a module is imported without `at` hints.
    pub fn register_namespace(&self, namespace: impl Into<String>, location: impl Into<String>) {
        self.namespace_map
            .write()
            .entry(namespace.into())
            .or_default()
            .push(location.into());
    }

    pub fn registered_locations(&self, namespace: &str) -> Vec<String> {
        self.namespace_map
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Candidate locations for a hint, most specific first.
    pub fn resolve_location(
        &self,
        hint: &str,
        importer: Option<&ModuleLocation>,
        module_base: Option<&str>,
    ) -> Vec<ModuleLocation> {
        let hint = hint.trim();
        if let Some(rest) = hint.strip_prefix(XMLDB_SCHEME) {
            return vec![ModuleLocation::Database(normalize_db_path(rest))];
        }
        if hint == "/db" || hint.starts_with("/db/") {
            return vec![ModuleLocation::Database(normalize_db_path(hint))];
        }
        if hint.starts_with("file:") {
            return url::Url::parse(hint)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .map(|p| vec![ModuleLocation::File(normalize_file_path(&p))])
                .unwrap_or_default();
        }
        let as_path = Path::new(hint);
        if as_path.is_absolute() {
            return vec![ModuleLocation::File(normalize_file_path(as_path))];
        }
        match importer {
            Some(ModuleLocation::Database(p)) => {
                let dir = p.rsplit_once('/').map_or("", |(d, _)| d);
                vec![ModuleLocation::Database(normalize_db_path(&format!("{dir}/{hint}")))]
            }
            Some(ModuleLocation::File(p)) => {
                let dir = p.parent().unwrap_or_else(|| Path::new(""));
                vec![ModuleLocation::File(normalize_file_path(&dir.join(hint)))]
            }
            None => {
                if let Some(base) = module_base {
                    return vec![ModuleLocation::Database(normalize_db_path(&format!("{base}/{hint}")))];
                }
                if self.search_path.is_empty() {
                    return vec![ModuleLocation::File(normalize_file_path(as_path))];
                }
                self.search_path
                    .iter()
                    .map(|root| ModuleLocation::File(normalize_file_path(&root.join(hint))))
                    .collect()
            }
        }
    }

    /// Find, fetch and parse the module for `namespace` at `hint`.
    pub fn load(
        &self,
        namespace: &str,
        hint: &str,
        importer: Option<&ModuleLocation>,
        module_base: Option<&str>,
    ) -> Result<(ModuleLocation, Arc<ast::LibraryModule>), Error> {
        for location in self.resolve_location(hint, importer, module_base) {
            let Some(text) = self.fetch(&location)? else {
                continue;
            };
            let module = self.cache.get_or_parse(namespace, &location, text)?;
            if module.namespace != namespace {
                return Err(Error::from_code(
                    ErrorCode::XQST0059,
                    format!(
                        "module at {location} declares namespace '{}', expected '{namespace}'",
                        module.namespace
                    ),
                ));
            }
            return Ok((location, module));
        }
        Err(Error::from_code(
            ErrorCode::XQST0059,
            format!("cannot find module '{namespace}' at '{hint}'"),
        ))
    }

    fn fetch(&self, location: &ModuleLocation) -> Result<Option<String>, Error> {
        for source in &self.sources {
            if let Some(text) = source.load(location)? {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }
}

/// Resolve `.` and `..` segments of an absolute database path.
pub fn normalize_db_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

fn normalize_file_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapSource(HashMap<ModuleLocation, String>);

    impl ModuleSource for MapSource {
        fn load(&self, location: &ModuleLocation) -> Result<Option<String>, Error> {
            Ok(self.0.get(location).cloned())
        }
    }

    fn db(path: &str) -> ModuleLocation {
        ModuleLocation::Database(path.to_string())
    }

    #[test]
    fn database_hints_normalize() {
        let r = ModuleResolver::new();
        assert_eq!(
            r.resolve_location("xmldb:exist:///db/test/mod.xqm", None, None),
            vec![db("/db/test/mod.xqm")]
        );
        let importer = db("/db/test/sub/a.xqm");
        assert_eq!(
            r.resolve_location("../b.xqm", Some(&importer), None),
            vec![db("/db/test/b.xqm")]
        );
        assert_eq!(
            r.resolve_location("c.xqm", None, Some("/db/test")),
            vec![db("/db/test/c.xqm")]
        );
    }

    #[test]
    fn cache_key_includes_the_location() {
        let mut map = HashMap::new();
        map.insert(
            db("/db/m1.xqm"),
            "module namespace m = 'http://moda'; declare function m:f() { 'module1' };".to_string(),
        );
        map.insert(
            db("/db/m2.xqm"),
            "module namespace m = 'http://moda'; declare function m:f() { 'module2' };".to_string(),
        );
        let r = ModuleResolver::new().with_source(Arc::new(MapSource(map)));
        let (l1, m1) = r.load("http://moda", "/db/m1.xqm", None, None).unwrap();
        let (l2, m2) = r.load("http://moda", "/db/m2.xqm", None, None).unwrap();
        assert_ne!(l1, l2);
        assert_ne!(m1, m2);
        assert_eq!(r.cache().len(), 2);
        let (_, again) = r.load("http://moda", "/db/m1.xqm", None, None).unwrap();
        assert!(Arc::ptr_eq(&m1, &again));
    }

    #[test]
    fn namespace_mismatch_is_reported() {
        let mut map = HashMap::new();
        map.insert(
            db("/db/m.xqm"),
            "module namespace m = 'urn:other'; declare variable $m:x := 1;".to_string(),
        );
        let r = ModuleResolver::new().with_source(Arc::new(MapSource(map)));
        let err = r.load("urn:expected", "/db/m.xqm", None, None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0059);
        let err = r.load("urn:expected", "/db/missing.xqm", None, None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0059);
    }
}
