//! Per-document indexes kept in step with collection configuration and updates.
//!
//! Each stored document gets the value and full-text indexes of the nearest
//! configured ancestor collection. Indexes are rebuilt lazily: a document
//! whose revision moved on since the last build, or that an update statement
//! reported, is reindexed on its next lookup.

pub mod config;
pub mod fulltext;
pub mod value;

use self::config::{IndexConfig, PatternStep, target_chain};
use self::fulltext::FullTextIndex;
use self::value::ValueIndex;
use crate::path;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use sylva_xquery::runtime::{Error, IndexPredicate, IndexProvider, IndexTarget, UpdateListener};
use sylva_xquery::{Document, DocumentId, Node, NodeKind, XdmNode};
use tracing::{debug, trace};

struct DocIndexes {
    document: Arc<Document>,
    collection: String,
    config: Option<Arc<IndexConfig>>,
    revision: u64,
    stale: bool,
    values: Vec<ValueIndex>,
    fulltext: Option<FullTextIndex>,
}

impl DocIndexes {
    fn rebuild(&mut self) {
        self.values.clear();
        self.fulltext = None;
        self.revision = self.document.revision();
        self.stale = false;
        let Some(config) = self.config.clone() else {
            return;
        };
        let root = self.document.root();
        self.values = config.values.iter().cloned().map(ValueIndex::new).collect();
        if !self.values.is_empty() {
            for node in root.descendants() {
                if node.kind() != NodeKind::Element {
                    continue;
                }
                for idx in &mut self.values {
                    idx.add(&node);
                }
                for attr in node.attributes() {
                    for idx in &mut self.values {
                        idx.add(&attr);
                    }
                }
            }
        }
        self.fulltext = config.fulltext.as_ref().map(|ft| FullTextIndex::build(&root, ft));
        debug!(
            document = %self.document.id(),
            collection = %self.collection,
            value_entries = self.values.iter().map(ValueIndex::len).sum::<usize>(),
            fulltext_nodes = self.fulltext.as_ref().map_or(0, FullTextIndex::len),
            "reindexed document"
        );
    }

    fn is_current(&self) -> bool {
        !self.stale && self.revision == self.document.revision()
    }
}

/// Entry counts of one document's indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub value_entries: usize,
    pub conversion_failures: usize,
    pub fulltext_nodes: usize,
    pub fulltext_tokens: usize,
}

#[derive(Default)]
pub struct IndexManager {
    configs: RwLock<BTreeMap<String, Arc<IndexConfig>>>,
    documents: RwLock<HashMap<DocumentId, DocIndexes>>,
    /// Lookups an index answered, as opposed to declined.
    answered: AtomicUsize,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration in effect for `collection`: its own, else the nearest ancestor's.
    pub fn effective_config(&self, collection: &str) -> Option<Arc<IndexConfig>> {
        let configs = self.configs.read();
        let mut current = collection;
        loop {
            if let Some(cfg) = configs.get(current) {
                return Some(cfg.clone());
            }
            current = path::split(current)?.0;
        }
    }

    /// Install (or with `None`, drop) the configuration of `collection` and
    /// reindex every document it governs.
    pub fn set_config(&self, collection: &str, config: Option<IndexConfig>) {
        {
            let mut configs = self.configs.write();
            match config {
                Some(cfg) => {
                    configs.insert(collection.to_string(), Arc::new(cfg));
                }
                None => {
                    configs.remove(collection);
                }
            }
        }
        let mut docs = self.documents.write();
        let mut affected = 0usize;
        for entry in docs.values_mut() {
            if path::is_within(&entry.collection, collection) {
                entry.config = self.effective_config(&entry.collection);
                entry.rebuild();
                affected += 1;
            }
        }
        debug!(collection, documents = affected, "index configuration changed");
    }

    pub fn answered_lookups(&self) -> usize {
        self.answered.load(Ordering::Relaxed)
    }

    pub fn configured_collections(&self) -> Vec<String> {
        self.configs.read().keys().cloned().collect()
    }

    /// Start indexing a stored document.
    pub fn register(&self, document: &Arc<Document>, collection: &str) {
        let mut entry = DocIndexes {
            document: document.clone(),
            collection: collection.to_string(),
            config: self.effective_config(collection),
            revision: 0,
            stale: true,
            values: Vec::new(),
            fulltext: None,
        };
        entry.rebuild();
        self.documents.write().insert(document.id(), entry);
    }

    pub fn unregister(&self, document: DocumentId) {
        if self.documents.write().remove(&document).is_some() {
            trace!(%document, "dropped document indexes");
        }
    }

    /// Current entry counts for a document, reindexing first if needed.
    pub fn stats(&self, document: DocumentId) -> Option<IndexStats> {
        self.refresh(document);
        let docs = self.documents.read();
        let entry = docs.get(&document)?;
        Some(IndexStats {
            value_entries: entry.values.iter().map(ValueIndex::len).sum(),
            conversion_failures: entry.values.iter().map(ValueIndex::failures).sum(),
            fulltext_nodes: entry.fulltext.as_ref().map_or(0, FullTextIndex::len),
            fulltext_tokens: entry.fulltext.as_ref().map_or(0, FullTextIndex::token_count),
        })
    }

    fn refresh(&self, document: DocumentId) {
        let current = self
            .documents
            .read()
            .get(&document)
            .is_none_or(DocIndexes::is_current);
        if current {
            return;
        }
        let mut docs = self.documents.write();
        if let Some(entry) = docs.get_mut(&document)
            && !entry.is_current()
        {
            entry.rebuild();
        }
    }
}

/// Keep only index hits that sit at the end of `chain`.
fn on_chain(nodes: Vec<Node>, chain: &[PatternStep]) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| {
            let mut current = Some(node.clone());
            for step in chain.iter().rev() {
                match &current {
                    Some(n) if step.matches_node(n) => current = n.parent(),
                    _ => return false,
                }
            }
            true
        })
        .collect()
}

impl IndexProvider for IndexManager {
    fn lookup(
        &self,
        document: DocumentId,
        target: &IndexTarget,
        predicate: &IndexPredicate,
    ) -> Result<Option<Vec<Node>>, Error> {
        self.refresh(document);
        let docs = self.documents.read();
        let Some(entry) = docs.get(&document) else {
            return Ok(None);
        };
        let chain = target_chain(&target.context, &target.path);
        let hits = match predicate {
            IndexPredicate::Compare { op, key } => entry
                .values
                .iter()
                .filter(|idx| idx.def.pattern.covers(&chain))
                .find_map(|idx| idx.compare(*op, key)),
            IndexPredicate::Strings(matcher) => {
                let mut found = None;
                for idx in entry.values.iter().filter(|idx| idx.def.pattern.covers(&chain)) {
                    if let Some(nodes) = idx.strings(matcher)? {
                        found = Some(nodes);
                        break;
                    }
                }
                found
            }
            IndexPredicate::FullText { terms, all } => {
                match (&entry.fulltext, entry.config.as_ref().and_then(|c| c.fulltext.as_ref())) {
                    (Some(index), Some(cfg)) if cfg.covers(&chain) => Some(index.query(terms, *all)?),
                    _ => None,
                }
            }
        };
        trace!(
            %document,
            context = %target.context,
            covered = hits.is_some(),
            "index lookup"
        );
        if hits.is_some() {
            self.answered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(hits.map(|nodes| on_chain(nodes, &chain)))
    }
}

impl UpdateListener for IndexManager {
    fn document_modified(&self, node: &Node) {
        if let Some(entry) = self.documents.write().get_mut(&node.document_id()) {
            entry.stale = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_xquery::compiler::ir::ComparisonOp;
    use sylva_xquery::runtime::{PathComponent, TermPattern};
    use sylva_xquery::xml::{ParseOptions, parse_document};
    use sylva_xquery::{ExpandedName, XdmAtomicValue};

    const CONFIG: &str = r#"
        <collection xmlns="http://exist-db.org/collection-config/1.0">
            <index>
                <create qname="SPEAKER" type="xs:string"/>
                <create path="//item/@price" type="xs:double"/>
                <fulltext default="none" attributes="false">
                    <include path="//LINE"/>
                </fulltext>
            </index>
        </collection>"#;

    fn doc() -> Arc<Document> {
        parse_document(
            r#"<play>
                 <SPEECH><SPEAKER>HAMLET</SPEAKER><LINE>to be or not to be</LINE></SPEECH>
                 <SPEECH><SPEAKER>GHOST</SPEAKER><LINE>remember me</LINE></SPEECH>
                 <item price="5"/><item price="12.5"/>
               </play>"#,
            Some("/db/shop/play.xml".into()),
            true,
            ParseOptions::default(),
        )
        .unwrap()
    }

    fn name(local: &str) -> ExpandedName {
        ExpandedName::new(None, local)
    }

    fn speaker_target() -> IndexTarget {
        IndexTarget {
            context: name("SPEECH"),
            path: vec![PathComponent::Child(name("SPEAKER"))],
        }
    }

    #[test]
    fn nearest_ancestor_config_applies() {
        let mgr = IndexManager::new();
        mgr.set_config("/db/shop", Some(IndexConfig::parse(CONFIG, "/db/shop").unwrap()));
        assert!(mgr.effective_config("/db/shop/archive/2024").is_some());
        assert!(mgr.effective_config("/db/other").is_none());
        assert!(mgr.effective_config("/db").is_none());
    }

    #[test]
    fn lookups_answer_covered_targets_only() {
        let mgr = IndexManager::new();
        mgr.set_config("/db/shop", Some(IndexConfig::parse(CONFIG, "/db/shop").unwrap()));
        let d = doc();
        mgr.register(&d, "/db/shop");

        let eq = IndexPredicate::Compare {
            op: ComparisonOp::Eq,
            key: XdmAtomicValue::String("HAMLET".into()),
        };
        let hits = mgr.lookup(d.id(), &speaker_target(), &eq).unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].string_value(), "HAMLET");

        let price = IndexTarget {
            context: name("item"),
            path: vec![PathComponent::Attribute(name("price"))],
        };
        let gt = IndexPredicate::Compare {
            op: ComparisonOp::Gt,
            key: XdmAtomicValue::Integer(10),
        };
        assert_eq!(mgr.lookup(d.id(), &price, &gt).unwrap().unwrap().len(), 1);

        let uncovered = IndexTarget {
            context: name("SPEECH"),
            path: vec![PathComponent::Child(name("LINE"))],
        };
        assert!(mgr.lookup(d.id(), &uncovered, &eq).unwrap().is_none());

        let ft = IndexPredicate::FullText {
            terms: vec![TermPattern::Word("remember".into())],
            all: true,
        };
        assert_eq!(mgr.lookup(d.id(), &uncovered, &ft).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn unconfigured_documents_are_not_covered() {
        let mgr = IndexManager::new();
        let d = doc();
        mgr.register(&d, "/db/shop");
        let eq = IndexPredicate::Compare {
            op: ComparisonOp::Eq,
            key: XdmAtomicValue::String("HAMLET".into()),
        };
        assert!(mgr.lookup(d.id(), &speaker_target(), &eq).unwrap().is_none());
        assert_eq!(mgr.stats(d.id()), Some(IndexStats::default()));
    }

    #[test]
    fn config_change_reindexes_governed_documents() {
        let mgr = IndexManager::new();
        let d = doc();
        mgr.register(&d, "/db/shop");
        mgr.set_config("/db", Some(IndexConfig::parse(CONFIG, "/db").unwrap()));
        let stats = mgr.stats(d.id()).unwrap();
        assert_eq!(stats.value_entries, 4);
        assert_eq!(stats.fulltext_nodes, 2);
        mgr.set_config("/db", None);
        assert_eq!(mgr.stats(d.id()).unwrap().value_entries, 0);
    }
}
