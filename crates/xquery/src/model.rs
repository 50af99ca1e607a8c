//! Read-side node abstraction shared by the axis walker, deep-equal and serializer.

use crate::xdm::ExpandedName;
use core::cmp::Ordering;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl NodeKind {
    /// Kinds that can appear in a parent's child list.
    pub fn is_child_kind(self) -> bool {
        matches!(
            self,
            Self::Element | Self::Text | Self::Comment | Self::ProcessingInstruction
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn new(prefix: Option<String>, local: impl Into<String>, ns_uri: Option<String>) -> Self {
        Self {
            prefix,
            local: local.into(),
            ns_uri,
        }
    }

    /// Unqualified name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local, None)
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName::new(self.ns_uri.clone(), self.local.clone())
    }

    /// Prefix and URI both matter only for serialization; equality of names is by URI.
    pub fn same_expanded(&self, other: &QName) -> bool {
        self.local == other.local && ns_eq(self.ns_uri.as_deref(), other.ns_uri.as_deref())
    }
}

/// Treat `None` and the empty string as the same "no namespace".
pub fn ns_eq(a: Option<&str>, b: Option<&str>) -> bool {
    a.unwrap_or("") == b.unwrap_or("")
}

/// Lexical form `prefix:local`.
impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) if !p.is_empty() => write!(f, "{p}:{}", self.local),
            _ => f.write_str(&self.local),
        }
    }
}

pub trait XdmNode: Clone + Eq + fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
    fn base_uri(&self) -> Option<String> {
        None
    }

    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    fn attributes(&self) -> Vec<Self>;
    fn namespaces(&self) -> Vec<Self> {
        Vec::new()
    }

    /// `(tree, preorder rank)`; nodes of distinct trees order by tree id.
    fn doc_order_key(&self) -> (u64, u64);

    fn compare_document_order(&self, other: &Self) -> Ordering {
        self.doc_order_key().cmp(&other.doc_order_key())
    }
}
