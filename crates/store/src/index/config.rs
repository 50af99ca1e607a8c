//! Collection index descriptors.
//!
//! A descriptor is an XML document in the collection-config namespace:
//!
//! ```xml
//! <collection xmlns="http://exist-db.org/collection-config/1.0">
//!     <index>
//!         <create qname="SPEAKER" type="xs:string"/>
//!         <create path="//item/@price" type="xs:double"/>
//!         <fulltext default="none" attributes="false">
//!             <include path="//LINE"/>
//!             <exclude path="//note"/>
//!             <create qname="title"/>
//!         </fulltext>
//!     </index>
//! </collection>
//! ```

use crate::error::{Result, StoreError};
use sylva_xquery::consts::COLLECTION_CONFIG_NS;
use sylva_xquery::model::ns_eq;
use sylva_xquery::runtime::PathComponent;
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{ExpandedName, Node, NodeKind, QName, XdmNode};
use tracing::debug;

/// Key type of a value index, from the `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Integer,
    Decimal,
    Double,
    Float,
    Boolean,
}

impl KeyType {
    fn parse(lexical: &str) -> Option<Self> {
        let local = lexical.rsplit_once(':').map_or(lexical, |(_, l)| l);
        Some(match local {
            "string" | "untypedAtomic" | "anyURI" => Self::String,
            "integer" | "int" | "long" | "short" | "nonNegativeInteger" | "positiveInteger" => Self::Integer,
            "decimal" => Self::Decimal,
            "double" => Self::Double,
            "float" => Self::Float,
            "boolean" => Self::Boolean,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal | Self::Double | Self::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    Element,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternStep {
    pub kind: StepKind,
    /// `None` is the `*` wildcard.
    pub name: Option<ExpandedName>,
}

impl PatternStep {
    pub(crate) fn matches_node(&self, node: &Node) -> bool {
        let kind_ok = match self.kind {
            StepKind::Element => node.kind() == NodeKind::Element,
            StepKind::Attribute => node.kind() == NodeKind::Attribute,
        };
        kind_ok
            && match &self.name {
                None => true,
                Some(want) => node.name().is_some_and(|q| names_equal(&q, want)),
            }
    }

    /// Could this step and `other` describe the same node?
    fn overlaps(&self, other: &PatternStep) -> bool {
        self.kind == other.kind
            && match (&self.name, &other.name) {
                (Some(a), Some(b)) => a.local == b.local && ns_eq(a.ns_uri.as_deref(), b.ns_uri.as_deref()),
                _ => true,
            }
    }

    /// Does this step match every node `other` matches?
    fn subsumes(&self, other: &PatternStep) -> bool {
        self.kind == other.kind
            && match (&self.name, &other.name) {
                (None, _) => true,
                (Some(a), Some(b)) => a.local == b.local && ns_eq(a.ns_uri.as_deref(), b.ns_uri.as_deref()),
                (Some(_), None) => false,
            }
    }
}

pub fn names_equal(q: &QName, e: &ExpandedName) -> bool {
    q.local == e.local && ns_eq(q.ns_uri.as_deref(), e.ns_uri.as_deref())
}

/// A `qname` or `path` selector. Unanchored patterns (`//a/b`, `b`) match at
/// any depth; anchored ones (`/a/b`) only from the document node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    pub steps: Vec<PatternStep>,
    pub anchored: bool,
    pub source: String,
}

impl NodePattern {
    pub fn matches(&self, node: &Node) -> bool {
        let mut current = Some(node.clone());
        for step in self.steps.iter().rev() {
            match &current {
                Some(n) if step.matches_node(n) => current = n.parent(),
                _ => return false,
            }
        }
        !self.anchored || current.is_some_and(|n| n.kind() == NodeKind::Document)
    }

    /// True when every node reached by `chain` is matched by this pattern.
    pub fn covers(&self, chain: &[PatternStep]) -> bool {
        !self.anchored
            && self.steps.len() <= chain.len()
            && self
                .steps
                .iter()
                .rev()
                .zip(chain.iter().rev())
                .all(|(p, c)| p.subsumes(c))
    }

    /// True when some node reached by `chain` might match this pattern.
    pub fn may_match(&self, chain: &[PatternStep]) -> bool {
        self.steps
            .iter()
            .rev()
            .zip(chain.iter().rev())
            .all(|(p, c)| p.overlaps(c))
    }
}

/// Steps from an index target: the context element followed by the path.
pub fn target_chain(context: &ExpandedName, path: &[PathComponent]) -> Vec<PatternStep> {
    let mut chain = vec![PatternStep {
        kind: StepKind::Element,
        name: Some(context.clone()),
    }];
    chain.extend(path.iter().map(|c| match c {
        PathComponent::Child(n) => PatternStep {
            kind: StepKind::Element,
            name: Some(n.clone()),
        },
        PathComponent::Attribute(n) => PatternStep {
            kind: StepKind::Attribute,
            name: Some(n.clone()),
        },
    }));
    chain
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueIndexDef {
    pub pattern: NodePattern,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextConfig {
    /// `default="all"`: index every element not excluded.
    pub default_all: bool,
    pub attributes: bool,
    pub includes: Vec<NodePattern>,
    pub excludes: Vec<NodePattern>,
}

impl FullTextConfig {
    pub fn indexes(&self, node: &Node) -> bool {
        if self.includes.iter().any(|p| p.matches(node)) {
            return true;
        }
        if self.excludes.iter().any(|p| p.matches(node)) {
            return false;
        }
        match node.kind() {
            NodeKind::Element => self.default_all,
            NodeKind::Attribute => self.default_all && self.attributes,
            _ => false,
        }
    }

    pub fn covers(&self, chain: &[PatternStep]) -> bool {
        if self.includes.iter().any(|p| p.covers(chain)) {
            return true;
        }
        let Some(last) = chain.last() else {
            return false;
        };
        let kind_ok = match last.kind {
            StepKind::Element => self.default_all,
            StepKind::Attribute => self.default_all && self.attributes,
        };
        kind_ok && !self.excludes.iter().any(|p| p.may_match(chain))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexConfig {
    pub values: Vec<ValueIndexDef>,
    pub fulltext: Option<FullTextConfig>,
}

impl IndexConfig {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.fulltext.is_none()
    }

    /// Read a descriptor; `collection` only labels errors.
    pub fn parse(text: &str, collection: &str) -> Result<Self> {
        let doc = parse_document(text, None, false, ParseOptions::default())?;
        Self::from_document(&doc.root(), collection)
    }

    /// Read a descriptor that is already a stored document.
    pub fn from_document(document: &Node, collection: &str) -> Result<Self> {
        let invalid = |message: String| StoreError::IndexConfig {
            collection: collection.to_string(),
            message,
        };
        let root = document
            .children()
            .into_iter()
            .find(|n| n.kind() == NodeKind::Element)
            .ok_or_else(|| invalid("descriptor has no root element".into()))?;
        if !is_config_element(&root, "collection") {
            return Err(invalid(format!(
                "root element must be <collection> in {COLLECTION_CONFIG_NS}"
            )));
        }
        let mut config = IndexConfig::default();
        for index in config_children(&root, "index") {
            for child in index.children().into_iter().filter(|n| n.kind() == NodeKind::Element) {
                let local = child.name().map(|q| q.local).unwrap_or_default();
                match local.as_str() {
                    "create" => config.values.push(value_def(&child).map_err(invalid)?),
                    "fulltext" => config.fulltext = Some(fulltext(&child).map_err(invalid)?),
                    other => debug!(element = other, collection, "ignoring index element"),
                }
            }
        }
        Ok(config)
    }
}

fn is_config_element(node: &Node, local: &str) -> bool {
    node.name()
        .is_some_and(|q| q.local == local && q.ns_uri.as_deref() == Some(COLLECTION_CONFIG_NS))
}

fn config_children(node: &Node, local: &str) -> Vec<Node> {
    node.children()
        .into_iter()
        .filter(|n| is_config_element(n, local))
        .collect()
}

fn attr(node: &Node, name: &str) -> Option<String> {
    node.attribute(&QName::local(name)).map(|a| a.string_value())
}

fn value_def(create: &Node) -> std::result::Result<ValueIndexDef, String> {
    let pattern = selector(create)?;
    let type_name = attr(create, "type").unwrap_or_else(|| "xs:string".to_string());
    let key_type = KeyType::parse(&type_name).ok_or_else(|| format!("unsupported index type {type_name}"))?;
    Ok(ValueIndexDef { pattern, key_type })
}

fn fulltext(node: &Node) -> std::result::Result<FullTextConfig, String> {
    let default_all = match attr(node, "default").as_deref() {
        None | Some("all") => true,
        Some("none") => false,
        Some(other) => return Err(format!("fulltext default must be 'all' or 'none', not '{other}'")),
    };
    let attributes = match attr(node, "attributes").as_deref() {
        None | Some("true" | "yes") => true,
        Some("false" | "no") => false,
        Some(other) => return Err(format!("fulltext attributes must be a boolean, not '{other}'")),
    };
    let mut config = FullTextConfig {
        default_all,
        attributes,
        includes: Vec::new(),
        excludes: Vec::new(),
    };
    for child in node.children().into_iter().filter(|n| n.kind() == NodeKind::Element) {
        let local = child.name().map(|q| q.local).unwrap_or_default();
        match local.as_str() {
            "include" | "create" => config.includes.push(selector(&child)?),
            "exclude" => config.excludes.push(selector(&child)?),
            other => debug!(element = other, "ignoring fulltext element"),
        }
    }
    Ok(config)
}

fn selector(node: &Node) -> std::result::Result<NodePattern, String> {
    let bindings = node.in_scope_namespaces();
    let resolve = |lexical: &str| -> std::result::Result<Option<ExpandedName>, String> {
        if lexical == "*" {
            return Ok(None);
        }
        match lexical.split_once(':') {
            Some((prefix, local)) => {
                let uri = bindings
                    .iter()
                    .find(|(p, _)| p.as_deref() == Some(prefix))
                    .map(|(_, u)| u.clone())
                    .ok_or_else(|| format!("undeclared prefix '{prefix}' in '{lexical}'"))?;
                Ok(Some(ExpandedName::new(Some(uri), local)))
            }
            // Unprefixed names are in no namespace, as in a path expression.
            None => Ok(Some(ExpandedName::new(None, lexical))),
        }
    };
    let step = |raw: &str| -> std::result::Result<PatternStep, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty step in index path".to_string());
        }
        match raw.strip_prefix('@') {
            Some(name) => Ok(PatternStep {
                kind: StepKind::Attribute,
                name: resolve(name)?,
            }),
            None => Ok(PatternStep {
                kind: StepKind::Element,
                name: resolve(raw)?,
            }),
        }
    };
    if let Some(qname) = attr(node, "qname") {
        let pattern = NodePattern {
            steps: vec![step(&qname)?],
            anchored: false,
            source: qname,
        };
        return Ok(pattern);
    }
    let Some(path) = attr(node, "path") else {
        return Err("index definition needs a 'qname' or 'path' attribute".to_string());
    };
    let (anchored, body) = match path.strip_prefix("//") {
        Some(rest) => (false, rest),
        None => match path.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, path.as_str()),
        },
    };
    if body.contains("//") {
        return Err(format!("'{path}': only a leading '//' is supported"));
    }
    let steps = body.split('/').map(step).collect::<std::result::Result<Vec<_>, _>>()?;
    let pattern = NodePattern {
        steps,
        anchored,
        source: path.clone(),
    };
    if pattern.steps[..pattern.steps.len() - 1]
        .iter()
        .any(|s| s.kind == StepKind::Attribute)
    {
        return Err(format!("'{path}': only the last step may select an attribute"));
    }
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
        <collection xmlns="http://exist-db.org/collection-config/1.0">
            <index xmlns:x="urn:x">
                <create qname="SPEAKER" type="xs:string"/>
                <create path="//item/@price" type="xs:double"/>
                <create qname="x:code" type="xs:integer"/>
                <fulltext default="none" attributes="false">
                    <include path="//SPEECH/LINE"/>
                    <exclude path="//note"/>
                    <create qname="title"/>
                </fulltext>
            </index>
        </collection>"#;

    fn chain(names: &[&str]) -> Vec<PatternStep> {
        names
            .iter()
            .map(|n| match n.strip_prefix('@') {
                Some(a) => PatternStep {
                    kind: StepKind::Attribute,
                    name: Some(ExpandedName::new(None, a)),
                },
                None => PatternStep {
                    kind: StepKind::Element,
                    name: Some(ExpandedName::new(None, *n)),
                },
            })
            .collect()
    }

    #[test]
    fn descriptor_is_read() {
        let cfg = IndexConfig::parse(DESCRIPTOR, "/db/test").unwrap();
        assert_eq!(cfg.values.len(), 3);
        assert_eq!(cfg.values[0].key_type, KeyType::String);
        assert_eq!(cfg.values[1].key_type, KeyType::Double);
        assert_eq!(cfg.values[1].pattern.steps.len(), 2);
        assert_eq!(
            cfg.values[2].pattern.steps[0].name,
            Some(ExpandedName::new(Some("urn:x".into()), "code"))
        );
        let ft = cfg.fulltext.unwrap();
        assert!(!ft.default_all);
        assert_eq!(ft.includes.len(), 2);
        assert_eq!(ft.excludes.len(), 1);
    }

    #[test]
    fn coverage_needs_a_suffix_match() {
        let cfg = IndexConfig::parse(DESCRIPTOR, "/db/test").unwrap();
        let speaker = &cfg.values[0].pattern;
        assert!(speaker.covers(&chain(&["SPEECH", "SPEAKER"])));
        assert!(!speaker.covers(&chain(&["SPEECH", "LINE"])));
        let price = &cfg.values[1].pattern;
        assert!(price.covers(&chain(&["item", "@price"])));
        assert!(!price.covers(&chain(&["product", "@price"])));
        let ft = cfg.fulltext.unwrap();
        assert!(ft.covers(&chain(&["SPEECH", "LINE"])));
        assert!(!ft.covers(&chain(&["LINE"])));
    }

    #[test]
    fn excludes_block_default_coverage() {
        let ft = FullTextConfig {
            default_all: true,
            attributes: false,
            includes: Vec::new(),
            excludes: vec![NodePattern {
                steps: chain(&["note"]),
                anchored: false,
                source: "//note".into(),
            }],
        };
        assert!(ft.covers(&chain(&["p"])));
        assert!(!ft.covers(&chain(&["note"])));
        assert!(!ft.covers(&chain(&["p", "@id"])));
    }

    #[test]
    fn patterns_match_nodes_by_ancestry() {
        let doc = parse_document("<a><b><c x='1'/></b><c/></a>", None, false, Default::default()).unwrap();
        let a = doc.root().children()[0].clone();
        let b = a.children()[0].clone();
        let nested_c = b.children()[0].clone();
        let top_c = a.children()[1].clone();
        let bc = NodePattern {
            steps: chain(&["b", "c"]),
            anchored: false,
            source: "//b/c".into(),
        };
        assert!(bc.matches(&nested_c));
        assert!(!bc.matches(&top_c));
        let anchored = NodePattern {
            steps: chain(&["a", "c"]),
            anchored: true,
            source: "/a/c".into(),
        };
        assert!(anchored.matches(&top_c));
        assert!(!anchored.matches(&nested_c));
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let wrong_root = "<index/>";
        assert!(matches!(
            IndexConfig::parse(wrong_root, "/db/x"),
            Err(StoreError::IndexConfig { .. })
        ));
        let bad_type = r#"<collection xmlns="http://exist-db.org/collection-config/1.0">
            <index><create qname="a" type="xs:dateTime"/></index></collection>"#;
        assert!(IndexConfig::parse(bad_type, "/db/x").is_err());
        let no_selector = r#"<collection xmlns="http://exist-db.org/collection-config/1.0">
            <index><create type="xs:string"/></index></collection>"#;
        assert!(IndexConfig::parse(no_selector, "/db/x").is_err());
    }
}
