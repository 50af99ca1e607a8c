//! Query sessions: compile and run statements against a [`Database`].

use crate::database::{Database, SessionResolver};
use crate::error::{Result, StoreError};
use crate::path::{self, ROOT};
use std::collections::HashMap;
use std::sync::Arc;
use sylva_xquery::consts::XMLDB_SCHEME;
use sylva_xquery::runtime::{DynamicContextBuilder, StaticContextBuilder};
use sylva_xquery::{
    CompiledQuery, ExpandedName, SerializationOptions, Sequence, compile_with_context, evaluate,
    serialize_sequence,
};
use tracing::debug;

/// Per-connection state: current collection, declared namespaces and
/// variables, and output settings. Sessions are cheap; make one per thread.
pub struct Session {
    db: Database,
    collection: String,
    namespaces: Vec<(String, String)>,
    variables: HashMap<ExpandedName, Sequence>,
    optimize: Option<bool>,
    serialization: SerializationOptions,
}

impl Session {
    pub(crate) fn new(db: Database) -> Self {
        let serialization = db.config().serialization.options();
        Self {
            db,
            collection: ROOT.to_string(),
            namespaces: Vec::new(),
            variables: HashMap::new(),
            optimize: None,
            serialization,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Make `collection` the base for relative document, collection and module paths.
    pub fn set_collection(&mut self, collection: &str) -> Result<()> {
        let collection = path::normalize(collection, &self.collection)?;
        if !self.db.collection_exists(&collection) {
            return Err(StoreError::CollectionNotFound(collection));
        }
        self.collection = collection;
        Ok(())
    }

    /// Override the database's optimizer default for this session.
    pub fn set_optimize(&mut self, optimize: bool) {
        self.optimize = Some(optimize);
    }

    pub fn serialization_mut(&mut self) -> &mut SerializationOptions {
        &mut self.serialization
    }

    /// Bind a prefix for every later compile.
    pub fn declare_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        self.namespaces.retain(|(p, _)| *p != prefix);
        self.namespaces.push((prefix, uri.into()));
    }

    /// Make `$name` visible to every later query with the given value.
    pub fn declare_variable(&mut self, name: ExpandedName, value: impl Into<Sequence>) {
        self.variables.insert(name, value.into());
    }

    pub fn compile(&self, source: &str) -> Result<CompiledQuery> {
        let mut builder = StaticContextBuilder::new()
            .with_base_uri(format!("{XMLDB_SCHEME}{}", self.collection))
            .with_module_base(self.collection.clone())
            .with_modules(self.db.modules().clone());
        for (prefix, uri) in &self.namespaces {
            builder = builder.with_namespace(prefix.clone(), uri.clone());
        }
        for name in self.variables.keys() {
            builder = builder.with_variable(name.clone());
        }
        Ok(compile_with_context(source, &builder.build())?)
    }

    /// Run a compiled query with extra external variable bindings.
    ///
    /// Updating statements run alone; read-only queries run side by side.
    pub fn execute(
        &self,
        query: &CompiledQuery,
        bindings: impl IntoIterator<Item = (ExpandedName, Sequence)>,
    ) -> Result<Sequence> {
        self.run(query, bindings, None)
    }

    fn run(
        &self,
        query: &CompiledQuery,
        bindings: impl IntoIterator<Item = (ExpandedName, Sequence)>,
        context: Option<sylva_xquery::Node>,
    ) -> Result<Sequence> {
        let inner = &self.db.inner;
        let updating = query.is_updating();
        let _guard = inner.gate.enter(updating)?;
        let resolver = Arc::new(SessionResolver {
            db: inner.clone(),
            base: self.collection.clone(),
        });
        let mut builder = DynamicContextBuilder::new()
            .with_documents(resolver)
            .with_indexes(inner.indexes.clone())
            .with_locks(inner.locks.clone())
            .with_update_listener(inner.clone())
            .with_optimize(self.optimize.unwrap_or(inner.config.optimize));
        for (name, value) in &self.variables {
            builder = builder.with_variable(name.clone(), value.clone());
        }
        for (name, value) in bindings {
            builder = builder.with_variable(name, value);
        }
        if let Some(node) = context {
            builder = builder.with_context_item(node);
        }
        let result = evaluate(query, &builder.build());
        if updating {
            inner.flush()?;
        }
        let result = result?;
        debug!(updating, items = result.len(), "query finished");
        Ok(result)
    }

    /// Compile and run `source`.
    pub fn query(&self, source: &str) -> Result<Sequence> {
        let compiled = self.compile(source)?;
        self.execute(&compiled, [])
    }

    /// Run `source` with the document `name` as context item.
    ///
    /// `name` resolves against the session collection.
    pub fn query_resource(&self, name: &str, source: &str) -> Result<Sequence> {
        let resource = path::normalize(name, &self.collection)?;
        let root = self.db.get_document(&resource)?;
        let compiled = self.compile(source)?;
        self.run(&compiled, [], Some(root))
    }

    /// Output settings for `query`: the session's, overridden by `exist:serialize`.
    pub fn serialization_for(&self, query: &CompiledQuery) -> Result<SerializationOptions> {
        let mut options = self.serialization.clone();
        if let Some(params) = query.serialization() {
            options.apply(params)?;
        }
        Ok(options)
    }

    pub fn serialize(&self, query: &CompiledQuery, items: &Sequence) -> Result<String> {
        let options = self.serialization_for(query)?;
        Ok(serialize_sequence(items, &options)?)
    }

    /// Compile, run and serialize `source`.
    pub fn query_to_string(&self, source: &str) -> Result<String> {
        let compiled = self.compile(source)?;
        let items = self.execute(&compiled, [])?;
        self.serialize(&compiled, &items)
    }
}
