//! Arena-backed node storage.
//!
//! A [`Document`] owns every node of one tree in a flat arena guarded by a
//! `parking_lot::RwLock`; a [`Node`] is a cheap `(Arc<Document>, NodeId)`
//! handle. Document order is the preorder rank stored on each record and is
//! recomputed after every structural mutation, so handles held across updates
//! stay valid and keep comparing correctly.

use crate::model::{NodeKind, QName, XdmNode};
use crate::xdm::XdmItem;
use core::fmt;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(i: usize) -> Self {
        Self(u32::try_from(i).unwrap_or(u32::MAX))
    }
}

/// Identity of the node a copy was made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeOrigin {
    pub document: DocumentId,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    kind: NodeKind,
    name: Option<QName>,
    value: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: SmallVec<[NodeId; 4]>,
    namespaces: SmallVec<[NodeId; 2]>,
    origin: Option<NodeOrigin>,
    rank: u64,
}

impl NodeRecord {
    fn new(kind: NodeKind, name: Option<QName>, value: String) -> Self {
        Self {
            kind,
            name,
            value,
            parent: None,
            children: Vec::new(),
            attributes: SmallVec::new(),
            namespaces: SmallVec::new(),
            origin: None,
            rank: 0,
        }
    }
}

/// Owned, detached tree used for constructors, copies and insertion payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: NodeKind,
    pub name: Option<QName>,
    pub value: String,
    pub namespaces: Vec<(Option<String>, String)>,
    pub attributes: Vec<Fragment>,
    pub children: Vec<Fragment>,
    pub origin: Option<NodeOrigin>,
}

impl Fragment {
    fn leaf(kind: NodeKind, name: Option<QName>, value: String) -> Self {
        Self {
            kind,
            name,
            value,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            origin: None,
        }
    }

    pub fn document(children: Vec<Fragment>) -> Self {
        let mut f = Self::leaf(NodeKind::Document, None, String::new());
        f.children = children;
        f
    }

    pub fn element(name: QName) -> Self {
        Self::leaf(NodeKind::Element, Some(name), String::new())
    }

    pub fn attribute(name: QName, value: impl Into<String>) -> Self {
        Self::leaf(NodeKind::Attribute, Some(name), value.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::leaf(NodeKind::Text, None, value.into())
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Self::leaf(NodeKind::Comment, None, value.into())
    }

    pub fn processing_instruction(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::leaf(
            NodeKind::ProcessingInstruction,
            Some(QName::local(target)),
            value.into(),
        )
    }

    pub fn with_children(mut self, children: Vec<Fragment>) -> Self {
        self.children = children;
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Fragment>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Concatenated text of this fragment, as `fn:string` would report it.
    pub fn string_value(&self) -> String {
        match self.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                collect_fragment_text(self, &mut out);
                out
            }
            _ => self.value.clone(),
        }
    }
}

fn collect_fragment_text(f: &Fragment, out: &mut String) {
    for c in &f.children {
        match c.kind {
            NodeKind::Text => out.push_str(&c.value),
            NodeKind::Element => collect_fragment_text(c, out),
            _ => {}
        }
    }
}

pub struct DocumentData {
    uri: Option<String>,
    persistent: bool,
    nodes: Vec<NodeRecord>,
    revision: u64,
}

impl DocumentData {
    fn record(&self, id: NodeId) -> &NodeRecord {
        &self.nodes[id.index()]
    }

    fn record_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        &mut self.nodes[id.index()]
    }

    fn push(&mut self, record: NodeRecord) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(record);
        id
    }

    fn build(&mut self, frag: &Fragment, parent: Option<NodeId>) -> NodeId {
        let mut rec = NodeRecord::new(frag.kind, frag.name.clone(), frag.value.clone());
        rec.parent = parent;
        rec.origin = frag.origin;
        let id = self.push(rec);
        for (prefix, uri) in &frag.namespaces {
            let mut ns = NodeRecord::new(
                NodeKind::Namespace,
                Some(QName::local(prefix.clone().unwrap_or_default())),
                uri.clone(),
            );
            ns.parent = Some(id);
            let ns_id = self.push(ns);
            self.record_mut(id).namespaces.push(ns_id);
        }
        for attr in &frag.attributes {
            let a = self.build(attr, Some(id));
            self.record_mut(id).attributes.push(a);
        }
        for child in &frag.children {
            let c = self.build(child, Some(id));
            self.record_mut(id).children.push(c);
        }
        id
    }

    fn renumber(&mut self) {
        let mut rank = 0u64;
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            let rec = &mut self.nodes[id.index()];
            rec.rank = rank;
            rank += 1;
            let ns = rec.namespaces.clone();
            let attrs = rec.attributes.clone();
            let children = rec.children.clone();
            for n in ns.iter().chain(attrs.iter()) {
                self.nodes[n.index()].rank = rank;
                rank += 1;
            }
            stack.extend(children.iter().rev());
        }
        self.revision += 1;
    }

    /// Merge adjacent text children of `parent` and drop empty ones.
    fn normalize_text(&mut self, parent: NodeId) {
        let children = self.record(parent).children.clone();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for c in children {
            if self.record(c).kind == NodeKind::Text {
                if self.record(c).value.is_empty() {
                    self.record_mut(c).parent = None;
                    continue;
                }
                if let Some(&prev) = kept.last()
                    && self.record(prev).kind == NodeKind::Text
                {
                    let tail = self.record(c).value.clone();
                    self.record_mut(prev).value.push_str(&tail);
                    self.record_mut(c).parent = None;
                    continue;
                }
            }
            kept.push(c);
        }
        self.record_mut(parent).children = kept;
    }

    /// Add an attribute, overwriting the value of one with the same name.
    fn attach_attribute(&mut self, parent: NodeId, frag: &Fragment) -> NodeId {
        let existing = self.record(parent).attributes.iter().copied().find(|a| {
            matches!((&self.record(*a).name, &frag.name), (Some(x), Some(y)) if x.same_expanded(y))
        });
        if let Some(old) = existing {
            self.record_mut(old).value.clone_from(&frag.value);
            return old;
        }
        let id = self.build(frag, Some(parent));
        self.record_mut(parent).attributes.push(id);
        id
    }

    fn text_of(&self, id: NodeId, out: &mut String) {
        for &c in &self.record(id).children {
            let rec = self.record(c);
            match rec.kind {
                NodeKind::Text => out.push_str(&rec.value),
                NodeKind::Element => self.text_of(c, out),
                _ => {}
            }
        }
    }

    fn to_fragment(&self, doc: DocumentId, id: NodeId) -> Fragment {
        let rec = self.record(id);
        let mut f = Fragment::leaf(rec.kind, rec.name.clone(), rec.value.clone());
        f.origin = Some(rec.origin.unwrap_or(NodeOrigin { document: doc, node: id }));
        f.namespaces = rec
            .namespaces
            .iter()
            .map(|n| {
                let ns = self.record(*n);
                let prefix = ns.name.as_ref().map(|q| q.local.clone()).filter(|p| !p.is_empty());
                (prefix, ns.value.clone())
            })
            .collect();
        f.attributes = rec.attributes.iter().map(|a| self.to_fragment(doc, *a)).collect();
        f.children = rec.children.iter().map(|c| self.to_fragment(doc, *c)).collect();
        f
    }
}

pub struct Document {
    id: DocumentId,
    data: RwLock<DocumentData>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("uri", &self.data.read().uri)
            .finish()
    }
}

impl Document {
    /// Materialize a fragment as a new tree; the fragment's top node becomes the root.
    pub fn from_fragment(fragment: &Fragment, uri: Option<String>, persistent: bool) -> Arc<Self> {
        let mut data = DocumentData {
            uri,
            persistent,
            nodes: Vec::new(),
            revision: 0,
        };
        data.build(fragment, None);
        data.renumber();
        Arc::new(Self {
            id: DocumentId::next(),
            data: RwLock::new(data),
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn root(self: &Arc<Self>) -> Node {
        Node {
            doc: Arc::clone(self),
            id: NodeId::ROOT,
        }
    }

    pub fn node(self: &Arc<Self>, id: NodeId) -> Node {
        Node {
            doc: Arc::clone(self),
            id,
        }
    }

    pub fn uri(&self) -> Option<String> {
        self.data.read().uri.clone()
    }

    pub fn set_uri(&self, uri: Option<String>) {
        self.data.write().uri = uri;
    }

    pub fn is_persistent(&self) -> bool {
        self.data.read().persistent
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.data.write().persistent = persistent;
    }

    /// Incremented by every mutation; indexes compare it to detect stale entries.
    pub fn revision(&self) -> u64 {
        self.data.read().revision
    }

    /// Every node currently attached to the tree, in document order.
    pub fn attached_nodes(self: &Arc<Self>) -> Vec<Node> {
        let data = self.data.read();
        let mut out = Vec::new();
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            let rec = data.record(id);
            out.extend(rec.namespaces.iter().chain(rec.attributes.iter()));
            stack.extend(rec.children.iter().rev());
        }
        drop(data);
        out.into_iter().map(|id| self.node(id)).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, DocumentData> {
        self.data.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, DocumentData> {
        self.data.write()
    }

    /// Insert fragments under `parent`. Child kinds land at `index` (or the end);
    /// attribute fragments replace an existing attribute of the same name.
    pub fn insert(&self, parent: NodeId, index: Option<usize>, fragments: &[Fragment]) -> Vec<NodeId> {
        let mut data = self.write();
        let mut created = Vec::new();
        let mut at = index.unwrap_or(data.record(parent).children.len());
        for frag in fragments {
            match frag.kind {
                NodeKind::Attribute => created.push(data.attach_attribute(parent, frag)),
                NodeKind::Document => {
                    for child in &frag.children {
                        let id = data.build(child, Some(parent));
                        data.record_mut(parent).children.insert(at, id);
                        at += 1;
                        created.push(id);
                    }
                }
                NodeKind::Namespace => {}
                _ => {
                    let id = data.build(frag, Some(parent));
                    data.record_mut(parent).children.insert(at, id);
                    at += 1;
                    created.push(id);
                }
            }
        }
        data.normalize_text(parent);
        data.renumber();
        created
    }

    /// Remove a node from its parent. The record stays in the arena, unreachable.
    pub fn detach(&self, id: NodeId) {
        let mut data = self.write();
        let Some(parent) = data.record(id).parent else {
            return;
        };
        let p = data.record_mut(parent);
        p.children.retain(|c| *c != id);
        p.attributes.retain(|a| *a != id);
        data.record_mut(id).parent = None;
        data.normalize_text(parent);
        data.renumber();
    }

    /// Put `fragments` where `id` is. An attribute is replaced by the attribute
    /// fragments, any other node by the child-kind fragments, in one step.
    pub fn replace(&self, id: NodeId, fragments: &[Fragment]) -> Vec<NodeId> {
        let mut data = self.write();
        let Some(parent) = data.record(id).parent else {
            return Vec::new();
        };
        let mut created = Vec::new();
        if data.record(id).kind == NodeKind::Attribute {
            data.record_mut(parent).attributes.retain(|a| *a != id);
            data.record_mut(id).parent = None;
            for frag in fragments.iter().filter(|f| f.kind == NodeKind::Attribute) {
                created.push(data.attach_attribute(parent, frag));
            }
        } else {
            let Some(mut at) = data.record(parent).children.iter().position(|c| *c == id) else {
                return Vec::new();
            };
            data.record_mut(parent).children.remove(at);
            data.record_mut(id).parent = None;
            let flattened = fragments.iter().flat_map(|f| match f.kind {
                NodeKind::Document => f.children.iter().collect::<Vec<_>>(),
                _ => vec![f],
            });
            for frag in flattened.filter(|f| f.kind.is_child_kind()) {
                let c = data.build(frag, Some(parent));
                data.record_mut(parent).children.insert(at, c);
                at += 1;
                created.push(c);
            }
            data.normalize_text(parent);
        }
        data.renumber();
        created
    }

    /// Replace the value of an attribute, text, comment or PI node.
    pub fn set_value(&self, id: NodeId, value: String) {
        let mut data = self.write();
        data.record_mut(id).value = value;
        let parent = data.record(id).parent;
        if let Some(p) = parent
            && data.record(id).kind == NodeKind::Text
        {
            data.normalize_text(p);
        }
        data.renumber();
    }

    /// Replace all children of an element with the given fragments.
    pub fn replace_children(&self, id: NodeId, fragments: &[Fragment]) {
        let mut data = self.write();
        let old = std::mem::take(&mut data.record_mut(id).children);
        for c in old {
            data.record_mut(c).parent = None;
        }
        for frag in fragments {
            if frag.kind.is_child_kind() {
                let c = data.build(frag, Some(id));
                data.record_mut(id).children.push(c);
            }
        }
        data.normalize_text(id);
        data.renumber();
    }

    pub fn rename(&self, id: NodeId, name: QName) {
        let mut data = self.write();
        data.record_mut(id).name = Some(name);
        data.revision += 1;
    }
}

#[derive(Clone)]
pub struct Node {
    doc: Arc<Document>,
    id: NodeId,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.doc.id == other.doc.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc.id.hash(state);
        self.id.hash(state);
    }
}

impl From<Node> for XdmItem<Node> {
    fn from(node: Node) -> Self {
        XdmItem::Node(node)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.doc.read();
        let rec = data.record(self.id);
        match &rec.name {
            Some(n) => write!(f, "{:?}({n}@{}:{})", rec.kind, self.doc.id.0, self.id.0),
            None => write!(f, "{:?}(@{}:{})", rec.kind, self.doc.id.0, self.id.0),
        }
    }
}

impl Node {
    pub fn document(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn document_id(&self) -> DocumentId {
        self.doc.id
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn with<R>(&self, f: impl FnOnce(&NodeRecord) -> R) -> R {
        let data = self.doc.read();
        f(data.record(self.id))
    }

    fn handles(&self, ids: impl IntoIterator<Item = NodeId>) -> Vec<Node> {
        ids.into_iter().map(|id| self.doc.node(id)).collect()
    }

    /// Raw stored value: attribute/text/comment/PI content, namespace URI.
    pub fn value(&self) -> String {
        self.with(|r| r.value.clone())
    }

    pub fn origin(&self) -> Option<NodeOrigin> {
        self.with(|r| r.origin)
    }

    pub fn is_persistent(&self) -> bool {
        self.doc.is_persistent()
    }

    /// True unless the node was removed from its tree by an update.
    pub fn is_attached(&self) -> bool {
        let data = self.doc.read();
        let mut cur = self.id;
        loop {
            if cur == NodeId::ROOT {
                return true;
            }
            match data.record(cur).parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    pub fn root(&self) -> Node {
        let data = self.doc.read();
        let mut cur = self.id;
        while let Some(p) = data.record(cur).parent {
            cur = p;
        }
        drop(data);
        self.doc.node(cur)
    }

    pub fn attribute(&self, name: &QName) -> Option<Node> {
        let data = self.doc.read();
        let found = data.record(self.id).attributes.iter().copied().find(|a| {
            data.record(*a)
                .name
                .as_ref()
                .is_some_and(|n| n.same_expanded(name))
        });
        drop(data);
        found.map(|id| self.doc.node(id))
    }

    /// Prefix bindings visible on this node, innermost first wins.
    pub fn in_scope_namespaces(&self) -> Vec<(Option<String>, String)> {
        let data = self.doc.read();
        let mut out: Vec<(Option<String>, String)> = Vec::new();
        let mut cur = Some(self.id);
        while let Some(id) = cur {
            let rec = data.record(id);
            for ns in &rec.namespaces {
                let ns_rec = data.record(*ns);
                let prefix = ns_rec
                    .name
                    .as_ref()
                    .map(|q| q.local.clone())
                    .filter(|p| !p.is_empty());
                if !out.iter().any(|(p, _)| *p == prefix) {
                    out.push((prefix, ns_rec.value.clone()));
                }
            }
            cur = rec.parent;
        }
        out
    }

    /// All descendants in document order, excluding attributes and namespaces.
    pub fn descendants(&self) -> Vec<Node> {
        let data = self.doc.read();
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = data.record(self.id).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(data.record(id).children.iter().rev());
        }
        drop(data);
        self.handles(out)
    }

    /// Deep copy as an owned fragment; copies remember the node they came from.
    pub fn to_fragment(&self) -> Fragment {
        self.doc.read().to_fragment(self.doc.id, self.id)
    }

    pub fn document_uri(&self) -> Option<String> {
        self.doc.uri()
    }
}

impl XdmNode for Node {
    fn kind(&self) -> NodeKind {
        self.with(|r| r.kind)
    }

    fn name(&self) -> Option<QName> {
        self.with(|r| r.name.clone())
    }

    fn string_value(&self) -> String {
        let data = self.doc.read();
        let rec = data.record(self.id);
        match rec.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                data.text_of(self.id, &mut out);
                out
            }
            _ => rec.value.clone(),
        }
    }

    fn base_uri(&self) -> Option<String> {
        self.doc.uri()
    }

    fn parent(&self) -> Option<Self> {
        self.with(|r| r.parent).map(|p| self.doc.node(p))
    }

    fn children(&self) -> Vec<Self> {
        let ids = self.with(|r| r.children.clone());
        self.handles(ids)
    }

    fn attributes(&self) -> Vec<Self> {
        let ids = self.with(|r| r.attributes.clone());
        self.handles(ids)
    }

    fn namespaces(&self) -> Vec<Self> {
        let ids = self.with(|r| r.namespaces.clone());
        self.handles(ids)
    }

    fn doc_order_key(&self) -> (u64, u64) {
        (self.doc.id.0, self.with(|r| r.rank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<Document> {
        let item = Fragment::element(QName::local("item"))
            .with_attributes(vec![Fragment::attribute(QName::local("id"), "1")])
            .with_children(vec![Fragment::text("a"), Fragment::element(QName::local("b"))]);
        Document::from_fragment(&Fragment::document(vec![item]), Some("/db/t.xml".into()), true)
    }

    #[test]
    fn ranks_follow_preorder_with_attributes_before_children() {
        let doc = sample();
        let root = doc.root();
        let item = root.children()[0].clone();
        let attr = item.attributes()[0].clone();
        let text = item.children()[0].clone();
        assert!(root.doc_order_key() < item.doc_order_key());
        assert!(item.doc_order_key() < attr.doc_order_key());
        assert!(attr.doc_order_key() < text.doc_order_key());
    }

    #[test]
    fn inserting_text_next_to_text_merges() {
        let doc = sample();
        let item = doc.root().children()[0].clone();
        doc.insert(item.id(), Some(1), &[Fragment::text("b")]);
        let children = item.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].string_value(), "ab");
    }

    #[test]
    fn detached_nodes_are_unreachable_but_readable() {
        let doc = sample();
        let item = doc.root().children()[0].clone();
        let b = item.children()[1].clone();
        doc.detach(b.id());
        assert!(!b.is_attached());
        assert_eq!(item.children().len(), 1);
        assert_eq!(b.name().map(|n| n.local), Some("b".to_string()));
    }

    #[test]
    fn copies_keep_their_origin() {
        let doc = sample();
        let item = doc.root().children()[0].clone();
        let frag = item.to_fragment();
        assert_eq!(
            frag.origin,
            Some(NodeOrigin {
                document: doc.id(),
                node: item.id()
            })
        );
        assert_eq!(frag.string_value(), "a");
    }
}
