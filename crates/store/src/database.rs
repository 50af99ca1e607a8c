//! The database: collections, stored documents, indexes and locks behind one handle.

use crate::collection::{CollectionTree, Resource};
use crate::config::DatabaseConfig;
use crate::error::{Result, StoreError};
use crate::index::config::IndexConfig;
use crate::index::{IndexManager, IndexStats};
use crate::lock::{LockManager, StatementGate, StatementGuard};
use crate::modules::DatabaseModuleSource;
use crate::path::{self, CONFIG_FILE, CONFIG_ROOT, ROOT};
use crate::persist::{DiskStore, is_binary_name};
use crate::session::Session;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use sylva_xquery::runtime::{
    DocumentResolver, Error as QueryError, LockMode, LockProvider, LockToken, UpdateListener,
};
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{Document, DocumentId, Fragment, ModuleResolver, Node};
use tracing::{debug, info, warn};

pub(crate) struct DbInner {
    pub(crate) config: DatabaseConfig,
    pub(crate) tree: RwLock<CollectionTree>,
    pub(crate) indexes: Arc<IndexManager>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) gate: StatementGate,
    pub(crate) modules: Arc<ModuleResolver>,
    disk: Option<DiskStore>,
    /// Documents changed by update statements and not yet written out.
    dirty: Mutex<HashSet<DocumentId>>,
}

/// What a collection contains, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub collections: Vec<String>,
    pub documents: Vec<String>,
    pub binaries: Vec<String>,
}

/// Shared handle to an open database; clones refer to the same data.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DbInner>,
}

impl Database {
    /// Open a database, loading the data directory if one is configured.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let db = Self::build(config);
        if let Some(disk) = &db.inner.disk {
            disk.create_collection(ROOT)?;
            db.load(disk)?;
            info!(dir = %disk.dir().display(), "opened database");
        } else {
            info!("opened in-memory database");
        }
        Ok(db)
    }

    pub fn in_memory() -> Self {
        Self::build(DatabaseConfig::in_memory())
    }

    fn build(config: DatabaseConfig) -> Self {
        let inner = Arc::new_cyclic(|weak| {
            let mut resolver = ModuleResolver::new().with_source(Arc::new(DatabaseModuleSource::new(weak.clone())));
            for dir in &config.module_search_path {
                resolver = resolver.with_search_path(dir.clone());
            }
            DbInner {
                tree: RwLock::new(CollectionTree::default()),
                indexes: Arc::new(IndexManager::new()),
                locks: Arc::new(LockManager::new(config.lock_timeout())),
                gate: StatementGate::new(config.lock_timeout()),
                modules: Arc::new(resolver),
                disk: config.data_dir.clone().map(DiskStore::new),
                dirty: Mutex::new(HashSet::new()),
                config,
            }
        });
        Self { inner }
    }

    fn load(&self, disk: &DiskStore) -> Result<()> {
        let snapshot = disk.load()?;
        let mut tree = self.inner.tree.write();
        for collection in &snapshot.collections {
            tree.create(collection);
        }
        let mut descriptors = Vec::new();
        let mut documents = Vec::new();
        for res in snapshot.resources {
            let resource_path = path::join(&res.collection, &res.name);
            let parsed = if is_binary_name(&res.name) {
                None
            } else {
                std::str::from_utf8(&res.content).ok().and_then(|text| {
                    let options = ParseOptions {
                        strip_whitespace: false,
                    };
                    parse_document(text, Some(resource_path.clone()), true, options)
                        .inspect_err(|e| warn!(resource = %resource_path, error = %e, "loading as binary"))
                        .ok()
                })
            };
            match parsed {
                Some(doc) => {
                    if res.name == CONFIG_FILE
                        && let Some(target) = path::configured_collection(&res.collection)
                    {
                        descriptors.push((target, doc.clone()));
                    }
                    tree.insert(&res.collection, &res.name, Resource::Xml(doc.clone()))?;
                    documents.push((res.collection, doc));
                }
                None => {
                    tree.insert(&res.collection, &res.name, Resource::Binary(Arc::new(res.content)))?;
                }
            }
        }
        drop(tree);
        for (target, doc) in descriptors {
            match IndexConfig::from_document(&doc.root(), &target) {
                Ok(cfg) => self.inner.indexes.set_config(&target, Some(cfg)),
                Err(e) => warn!(collection = %target, error = %e, "ignoring invalid index configuration"),
            }
        }
        for (collection, doc) in &documents {
            self.inner.indexes.register(doc, collection);
        }
        debug!(documents = documents.len(), "loaded stored documents");
        Ok(())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn modules(&self) -> &Arc<ModuleResolver> {
        &self.inner.modules
    }

    /// A query session whose relative paths resolve against `/db`.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    fn exclusive(&self) -> Result<StatementGuard> {
        Ok(self.inner.gate.enter(true)?)
    }

    pub fn create_collection(&self, collection: &str) -> Result<String> {
        let _guard = self.exclusive()?;
        self.inner.create_collection(&path::normalize(collection, ROOT)?)
    }

    pub fn remove_collection(&self, collection: &str) -> Result<()> {
        let _guard = self.exclusive()?;
        self.inner.remove_collection(&path::normalize(collection, ROOT)?)
    }

    pub fn collection_exists(&self, collection: &str) -> bool {
        path::normalize(collection, ROOT).is_ok_and(|p| self.inner.tree.read().exists(&p))
    }

    /// Parse and store an XML document, replacing any resource of that name.
    /// Missing collections are created.
    pub fn store_document(&self, collection: &str, name: &str, xml: &str) -> Result<DocumentId> {
        let _guard = self.exclusive()?;
        let collection = path::normalize(collection, ROOT)?;
        self.inner.ensure_collection(&collection)?;
        let resource = path::join(&collection, name);
        let options = ParseOptions {
            strip_whitespace: self.inner.config.strip_whitespace,
        };
        let doc = parse_document(xml, Some(resource), true, options)?;
        self.inner.put_document(&collection, name, doc)
    }

    /// Store raw bytes, such as a library module.
    pub fn store_binary(&self, collection: &str, name: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        let _guard = self.exclusive()?;
        let collection = path::normalize(collection, ROOT)?;
        self.inner.ensure_collection(&collection)?;
        self.inner.put_binary(&collection, name, content.into())
    }

    pub fn remove_document(&self, collection: &str, name: &str) -> Result<()> {
        let _guard = self.exclusive()?;
        self.inner.remove_resource(&path::normalize(collection, ROOT)?, name)
    }

    /// Document node of the XML resource at `path`.
    pub fn get_document(&self, resource: &str) -> Result<Node> {
        let resource = path::normalize(resource, ROOT)?;
        self.inner.document(&resource).map(|d| d.root())
    }

    pub fn get_binary(&self, resource: &str) -> Result<Arc<Vec<u8>>> {
        let resource = path::normalize(resource, ROOT)?;
        let (collection, name) = path::split(&resource).ok_or_else(|| StoreError::InvalidPath(resource.clone()))?;
        match self.inner.tree.read().resource(collection, name) {
            Some(Resource::Binary(bytes)) => Ok(bytes.clone()),
            Some(Resource::Xml(_)) => Err(StoreError::NotXml(resource)),
            None => Err(StoreError::ResourceNotFound(resource)),
        }
    }

    /// Document nodes in `collection` and below.
    pub fn documents(&self, collection: &str) -> Result<Vec<Node>> {
        let collection = path::normalize(collection, ROOT)?;
        let tree = self.inner.tree.read();
        if !tree.exists(&collection) {
            return Err(StoreError::CollectionNotFound(collection));
        }
        Ok(tree.documents_under(&collection).iter().map(Document::root).collect())
    }

    pub fn list(&self, collection: &str) -> Result<Listing> {
        let collection = path::normalize(collection, ROOT)?;
        let tree = self.inner.tree.read();
        let mut listing = Listing {
            collections: tree.children(&collection),
            documents: Vec::new(),
            binaries: Vec::new(),
        };
        for (name, res) in tree.resources(&collection)? {
            match res {
                Resource::Xml(_) => listing.documents.push(name.clone()),
                Resource::Binary(_) => listing.binaries.push(name.clone()),
            }
        }
        Ok(listing)
    }

    /// Store `descriptor` as the index configuration of `collection`.
    ///
    /// The descriptor lands at `/db/system/config<collection>/collection.xconf`
    /// and every document governed by it is reindexed.
    pub fn configure_collection(&self, collection: &str, descriptor: &str) -> Result<()> {
        let collection = path::normalize(collection, ROOT)?;
        let config_collection = path::config_collection_for(&collection);
        self.store_document(&config_collection, CONFIG_FILE, descriptor)?;
        Ok(())
    }

    /// Index configuration in effect for `collection`.
    pub fn index_config(&self, collection: &str) -> Option<Arc<IndexConfig>> {
        let collection = path::normalize(collection, ROOT).ok()?;
        self.inner.indexes.effective_config(&collection)
    }

    /// Index lookups answered since the database was opened.
    pub fn index_lookups(&self) -> usize {
        self.inner.indexes.answered_lookups()
    }

    pub fn index_stats(&self, resource: &str) -> Result<Option<IndexStats>> {
        let resource = path::normalize(resource, ROOT)?;
        let doc = self.inner.document(&resource)?;
        Ok(self.inner.indexes.stats(doc.id()))
    }

    /// Take advisory locks on stored documents, as `util:exclusive-lock` and
    /// `util:shared-lock` do. The locks are released when the token drops.
    pub fn lock_documents(&self, resources: &[&str], mode: LockMode) -> Result<LockToken> {
        let mut ids = Vec::with_capacity(resources.len());
        for r in resources {
            ids.push(self.inner.document(&path::normalize(r, ROOT)?)?.id());
        }
        Ok(self.inner.locks.acquire(&ids, mode)?)
    }

    /// Write documents changed by update statements to the data directory.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl DbInner {
    pub(crate) fn document(&self, resource: &str) -> Result<Arc<Document>> {
        let (collection, name) =
            path::split(resource).ok_or_else(|| StoreError::InvalidPath(resource.to_string()))?;
        match self.tree.read().resource(collection, name) {
            Some(Resource::Xml(doc)) => Ok(doc.clone()),
            Some(Resource::Binary(_)) => Err(StoreError::NotXml(resource.to_string())),
            None => Err(StoreError::ResourceNotFound(resource.to_string())),
        }
    }

    pub(crate) fn create_collection(&self, collection: &str) -> Result<String> {
        let created = self.tree.write().create(collection);
        if let Some(disk) = &self.disk {
            disk.create_collection(collection)?;
        }
        for c in &created {
            info!(collection = %c, "created collection");
        }
        Ok(collection.to_string())
    }

    fn ensure_collection(&self, collection: &str) -> Result<()> {
        if !self.tree.read().exists(collection) {
            self.create_collection(collection)?;
        }
        Ok(())
    }

    pub(crate) fn remove_collection(&self, collection: &str) -> Result<()> {
        let removed = self.tree.write().remove(collection)?;
        for doc in &removed {
            self.forget(doc);
        }
        if path::is_within(collection, CONFIG_ROOT) || path::is_within(CONFIG_ROOT, collection) {
            self.reload_configs();
        }
        if let Some(disk) = &self.disk {
            disk.remove_collection(collection)?;
        }
        info!(collection, documents = removed.len(), "removed collection");
        Ok(())
    }

    fn forget(&self, doc: &Arc<Document>) {
        self.indexes.unregister(doc.id());
        self.locks.forget(doc.id());
        self.dirty.lock().remove(&doc.id());
        doc.set_persistent(false);
    }

    pub(crate) fn put_document(&self, collection: &str, name: &str, doc: Arc<Document>) -> Result<DocumentId> {
        let resource = path::join(collection, name);
        let descriptor_for = match path::configured_collection(collection) {
            Some(target) if name == CONFIG_FILE => {
                Some((IndexConfig::from_document(&doc.root(), &target)?, target))
            }
            _ => None,
        };
        let old = self.tree.write().insert(collection, name, Resource::Xml(doc.clone()))?;
        if let Some(Resource::Xml(old)) = &old {
            self.forget(old);
        }
        if let Some(disk) = &self.disk {
            disk.write_document(&resource, &doc)?;
        }
        self.indexes.register(&doc, collection);
        if let Some((cfg, target)) = descriptor_for {
            self.indexes.set_config(&target, Some(cfg));
        }
        debug!(resource = %resource, document = %doc.id(), "stored document");
        Ok(doc.id())
    }

    pub(crate) fn put_binary(&self, collection: &str, name: &str, content: Vec<u8>) -> Result<()> {
        let resource = path::join(collection, name);
        if let Some(disk) = &self.disk {
            disk.write_binary(&resource, &content)?;
        }
        let old = self
            .tree
            .write()
            .insert(collection, name, Resource::Binary(Arc::new(content)))?;
        if let Some(Resource::Xml(old)) = &old {
            self.forget(old);
        }
        debug!(resource = %resource, "stored binary resource");
        Ok(())
    }

    pub(crate) fn remove_resource(&self, collection: &str, name: &str) -> Result<()> {
        let removed = self.tree.write().take(collection, name)?;
        if let Resource::Xml(doc) = &removed {
            self.forget(doc);
            if name == CONFIG_FILE
                && let Some(target) = path::configured_collection(collection)
            {
                self.indexes.set_config(&target, None);
            }
        }
        if let Some(disk) = &self.disk {
            disk.remove_resource(&path::join(collection, name))?;
        }
        debug!(collection, name, "removed resource");
        Ok(())
    }

    /// Reapply every stored descriptor after config collections changed wholesale.
    fn reload_configs(&self) {
        let stored: Vec<(String, Arc<Document>)> = self
            .tree
            .read()
            .documents_under(CONFIG_ROOT)
            .into_iter()
            .filter_map(|doc| {
                let uri = doc.uri()?;
                let (collection, name) = path::split(&uri)?;
                let target = path::configured_collection(collection)?;
                (name == CONFIG_FILE).then(|| (target, doc.clone()))
            })
            .collect();
        for target in self.indexes.configured_collections() {
            if !stored.iter().any(|(t, _)| *t == target) {
                self.indexes.set_config(&target, None);
            }
        }
        for (target, doc) in stored {
            self.apply_descriptor(&target, &doc);
        }
    }

    fn apply_descriptor(&self, target: &str, doc: &Arc<Document>) {
        match IndexConfig::from_document(&doc.root(), target) {
            Ok(cfg) => self.indexes.set_config(target, Some(cfg)),
            Err(e) => warn!(collection = target, error = %e, "keeping previous index configuration"),
        }
    }

    pub(crate) fn flush(&self) -> Result<()> {
        let Some(disk) = &self.disk else {
            self.dirty.lock().clear();
            return Ok(());
        };
        let ids: Vec<DocumentId> = self.dirty.lock().drain().collect();
        if ids.is_empty() {
            return Ok(());
        }
        let tree = self.tree.read();
        for id in &ids {
            let Some(resource) = tree.location(*id) else {
                continue;
            };
            let (collection, name) = path::split(resource).ok_or_else(|| StoreError::InvalidPath(resource.to_string()))?;
            if let Some(Resource::Xml(doc)) = tree.resource(collection, name) {
                disk.write_document(resource, doc)?;
            }
        }
        debug!(documents = ids.len(), "flushed updated documents");
        Ok(())
    }
}

impl UpdateListener for DbInner {
    fn document_modified(&self, node: &Node) {
        self.indexes.document_modified(node);
        let id = node.document_id();
        self.dirty.lock().insert(id);
        let descriptor = {
            let tree = self.tree.read();
            tree.location(id).and_then(|resource| {
                let (collection, name) = path::split(resource)?;
                let target = path::configured_collection(collection)?;
                (name == CONFIG_FILE).then_some(target)
            })
        };
        if let Some(target) = descriptor {
            self.apply_descriptor(&target, node.document());
        }
    }
}

/// Document access for one session; relative URIs resolve against its collection.
pub(crate) struct SessionResolver {
    pub(crate) db: Arc<DbInner>,
    pub(crate) base: String,
}

impl SessionResolver {
    fn resolve(&self, uri: &str) -> Option<String> {
        path::normalize(uri, &self.base).ok()
    }
}

impl DocumentResolver for SessionResolver {
    fn document(&self, uri: &str) -> std::result::Result<Option<Node>, QueryError> {
        let Some(resource) = self.resolve(uri) else {
            return Ok(None);
        };
        match self.db.document(&resource) {
            Ok(doc) => Ok(Some(doc.root())),
            Err(StoreError::ResourceNotFound(_) | StoreError::NotXml(_) | StoreError::InvalidPath(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn collection(&self, uri: Option<&str>) -> std::result::Result<Vec<Node>, QueryError> {
        let collection = match uri {
            Some(u) => self
                .resolve(u)
                .ok_or_else(|| StoreError::CollectionNotFound(u.to_string()))?,
            None => self.base.clone(),
        };
        let tree = self.db.tree.read();
        if !tree.exists(&collection) {
            return Err(StoreError::CollectionNotFound(collection).into());
        }
        // Index descriptors only show up when asked for explicitly.
        let hide_config = !path::is_within(&collection, CONFIG_ROOT);
        Ok(tree
            .documents_under(&collection)
            .iter()
            .filter(|d| !(hide_config && d.uri().is_some_and(|u| path::is_within(&u, CONFIG_ROOT))))
            .map(Document::root)
            .collect())
    }

    fn collection_available(&self, uri: &str) -> bool {
        self.resolve(uri).is_some_and(|c| self.db.tree.read().exists(&c))
    }

    fn store_document(&self, collection: &str, name: &str, content: &Fragment) -> std::result::Result<String, QueryError> {
        let collection = path::normalize(collection, &self.base).map_err(QueryError::from)?;
        let resource = path::join(&collection, name);
        let doc = Document::from_fragment(content, Some(resource.clone()), true);
        self.db.put_document(&collection, name, doc)?;
        Ok(resource)
    }

    fn remove_resource(&self, collection: &str, name: Option<&str>) -> std::result::Result<(), QueryError> {
        let collection = path::normalize(collection, &self.base).map_err(QueryError::from)?;
        match name {
            Some(n) => self.db.remove_resource(&collection, n)?,
            None => self.db.remove_collection(&collection)?,
        }
        Ok(())
    }

    fn create_collection(&self, parent: &str, name: &str) -> std::result::Result<String, QueryError> {
        let parent = path::normalize(parent, &self.base).map_err(QueryError::from)?;
        let target = path::normalize(name, &parent).map_err(QueryError::from)?;
        Ok(self.db.create_collection(&target)?)
    }
}
