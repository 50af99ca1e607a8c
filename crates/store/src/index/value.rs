//! Typed value index: one ordered map from key to nodes per index definition.

use super::config::{KeyType, ValueIndexDef};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use sylva_xquery::compiler::ir::ComparisonOp;
use sylva_xquery::engine::casting::{parse_boolean, parse_double};
use sylva_xquery::runtime::{Error, FancyRegexProvider, StringMatch};
use sylva_xquery::{Node, XdmAtomicValue, XdmNode};
use tracing::warn;

/// Index key. Numbers order by `total_cmp` with `-0` folded into `0`.
#[derive(Debug, Clone)]
pub enum Key {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Key {
    fn number(n: f64) -> Self {
        Key::Num(if n == 0.0 { 0.0 } else { n })
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Bool(_) => 0,
            Key::Num(_) => 1,
            Key::Str(_) => 2,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Str(a), Key::Str(b)) => a.cmp(b),
            (Key::Num(a), Key::Num(b)) => a.total_cmp(b),
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[derive(Debug)]
pub struct ValueIndex {
    pub def: ValueIndexDef,
    entries: BTreeMap<Key, Vec<Node>>,
    /// Values that could not be converted to the key type.
    failures: usize,
}

impl ValueIndex {
    pub fn new(def: ValueIndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
            failures: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Index `node` if the definition selects it.
    pub fn add(&mut self, node: &Node) {
        if !self.def.pattern.matches(node) {
            return;
        }
        let text = node.string_value();
        let key = match self.def.key_type {
            KeyType::String => Some(Key::Str(text.clone())),
            KeyType::Boolean => parse_boolean(&text).ok().map(Key::Bool),
            _ => parse_double(&text).ok().map(Key::number),
        };
        match key {
            Some(k) => self.entries.entry(k).or_default().push(node.clone()),
            None => {
                self.failures += 1;
                warn!(
                    index = %self.def.pattern.source,
                    value = %text,
                    "value does not convert to the index type"
                );
            }
        }
    }

    /// Key a literal compares against, or `None` when the comparison would not
    /// use this index's key semantics.
    fn literal_key(&self, literal: &XdmAtomicValue) -> Option<Key> {
        match self.def.key_type {
            KeyType::String => match literal {
                XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) | XdmAtomicValue::AnyUri(s) => {
                    Some(Key::Str(s.clone()))
                }
                _ => None,
            },
            KeyType::Boolean => match literal {
                XdmAtomicValue::Boolean(b) => Some(Key::Bool(*b)),
                _ => None,
            },
            _ => literal.as_f64().map(Key::number),
        }
    }

    /// Nodes whose key satisfies `key op literal`; `None` when this index
    /// cannot answer the comparison.
    pub fn compare(&self, op: ComparisonOp, literal: &XdmAtomicValue) -> Option<Vec<Node>> {
        if self.failures > 0 {
            return None;
        }
        let key = self.literal_key(literal)?;
        let range: Box<dyn Iterator<Item = (&Key, &Vec<Node>)>> = match op {
            ComparisonOp::Eq => Box::new(self.entries.range(key.clone()..=key)),
            ComparisonOp::Lt => Box::new(self.entries.range(..key)),
            ComparisonOp::Le => Box::new(self.entries.range(..=key)),
            ComparisonOp::Gt => Box::new(self.entries.range((Bound::Excluded(key), Bound::Unbounded))),
            ComparisonOp::Ge => Box::new(self.entries.range(key..)),
            ComparisonOp::Ne => Box::new(self.entries.iter()),
        };
        Some(range.flat_map(|(_, nodes)| nodes.iter().cloned()).collect())
    }

    /// Nodes whose string key satisfies a string function; string indexes only.
    pub fn strings(&self, matcher: &StringMatch) -> Result<Option<Vec<Node>>, Error> {
        if self.def.key_type != KeyType::String {
            return Ok(None);
        }
        let keys = self.entries.iter().filter_map(|(k, nodes)| match k {
            Key::Str(s) => Some((s.as_str(), nodes)),
            _ => None,
        });
        let mut out = Vec::new();
        match matcher {
            StringMatch::StartsWith(prefix) => {
                let from = Key::Str(prefix.clone());
                for (k, nodes) in self.entries.range(from..) {
                    match k {
                        Key::Str(s) if s.starts_with(prefix.as_str()) => out.extend(nodes.iter().cloned()),
                        _ => break,
                    }
                }
            }
            StringMatch::EndsWith(suffix) => {
                for (s, nodes) in keys {
                    if s.ends_with(suffix.as_str()) {
                        out.extend(nodes.iter().cloned());
                    }
                }
            }
            StringMatch::Contains(needle) => {
                for (s, nodes) in keys {
                    if s.contains(needle.as_str()) {
                        out.extend(nodes.iter().cloned());
                    }
                }
            }
            StringMatch::Matches { pattern, flags } => {
                let re = FancyRegexProvider::build_with_flags(pattern, flags)?;
                for (s, nodes) in keys {
                    if re.is_match(s)? {
                        out.extend(nodes.iter().cloned());
                    }
                }
            }
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::config::{NodePattern, PatternStep, StepKind};
    use sylva_xquery::ExpandedName;
    use sylva_xquery::xml::{ParseOptions, parse_document};

    fn index_over(xml: &str, name: &str, key_type: KeyType) -> ValueIndex {
        let doc = parse_document(xml, None, true, ParseOptions::default()).unwrap();
        let mut idx = ValueIndex::new(ValueIndexDef {
            pattern: NodePattern {
                steps: vec![PatternStep {
                    kind: StepKind::Element,
                    name: Some(ExpandedName::new(None, name)),
                }],
                anchored: false,
                source: name.to_string(),
            },
            key_type,
        });
        for n in doc.root().descendants() {
            idx.add(&n);
        }
        idx
    }

    fn values(nodes: Option<Vec<Node>>) -> Vec<String> {
        let mut v: Vec<String> = nodes.unwrap().iter().map(XdmNode::string_value).collect();
        v.sort();
        v
    }

    #[test]
    fn numeric_ranges() {
        let idx = index_over("<r><p>5</p><p>10</p><p>-0</p><p>7.5</p></r>", "p", KeyType::Double);
        assert_eq!(idx.len(), 4);
        assert_eq!(values(idx.compare(ComparisonOp::Gt, &XdmAtomicValue::Integer(5))), vec!["10", "7.5"]);
        assert_eq!(values(idx.compare(ComparisonOp::Le, &XdmAtomicValue::Integer(5))), vec!["-0", "5"]);
        assert_eq!(values(idx.compare(ComparisonOp::Eq, &XdmAtomicValue::Double(0.0))), vec!["-0"]);
        assert!(idx.compare(ComparisonOp::Eq, &XdmAtomicValue::String("5".into())).is_none());
    }

    #[test]
    fn conversion_failures_disable_the_index() {
        let idx = index_over("<r><p>5</p><p>n/a</p></r>", "p", KeyType::Integer);
        assert_eq!(idx.failures(), 1);
        assert!(idx.compare(ComparisonOp::Eq, &XdmAtomicValue::Integer(5)).is_none());
    }

    #[test]
    fn string_functions_use_string_keys() {
        let idx = index_over("<r><s>HAMLET</s><s>HORATIO</s><s>GHOST</s></r>", "s", KeyType::String);
        let sw = idx.strings(&StringMatch::StartsWith("H".into())).unwrap();
        assert_eq!(values(sw), vec!["HAMLET", "HORATIO"]);
        let ends = idx.strings(&StringMatch::EndsWith("ST".into())).unwrap();
        assert_eq!(values(ends), vec!["GHOST"]);
        let re = idx
            .strings(&StringMatch::Matches {
                pattern: "^h.*o$".into(),
                flags: "i".into(),
            })
            .unwrap();
        assert_eq!(values(re), vec!["HORATIO"]);
        let eq = idx.compare(ComparisonOp::Eq, &XdmAtomicValue::String("GHOST".into()));
        assert_eq!(values(eq), vec!["GHOST"]);
    }
}
