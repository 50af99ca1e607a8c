//! Sequence-level helpers shared by the evaluator and the function library.

use crate::model::{NodeKind, XdmNode};
use crate::runtime::{Error, ErrorCode, Item};
use crate::tree::Node;
use crate::xdm::{XdmAtomicValue, XdmItem};

/// Typed value of a node. Stored trees are untyped.
pub fn atomize_node(n: &Node) -> XdmAtomicValue {
    match n.kind() {
        NodeKind::Comment | NodeKind::ProcessingInstruction | NodeKind::Namespace => {
            XdmAtomicValue::String(n.string_value())
        }
        _ => XdmAtomicValue::UntypedAtomic(n.string_value()),
    }
}

pub fn atomize_item(item: &Item) -> XdmAtomicValue {
    match item {
        XdmItem::Atomic(a) => a.clone(),
        XdmItem::Node(n) => atomize_node(n),
    }
}

pub fn atomize(seq: &[Item]) -> Vec<XdmAtomicValue> {
    seq.iter().map(atomize_item).collect()
}

/// Effective boolean value.
pub fn ebv(seq: &[Item]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => {
                Ok(!s.is_empty())
            }
            XdmAtomicValue::Integer(i) => Ok(*i != 0),
            XdmAtomicValue::Decimal(d) => Ok(*d != 0.0),
            XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            XdmAtomicValue::Float(f) => Ok(*f != 0.0 && !f.is_nan()),
            other => Err(Error::from_code(
                ErrorCode::FORG0006,
                format!("effective boolean value is not defined for {}", other.type_name()),
            )),
        },
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of two or more atomic values",
        )),
    }
}

/// Sort into document order and drop duplicates.
pub fn sort_dedup(mut nodes: Vec<Node>) -> Vec<Node> {
    if nodes.len() < 2 {
        return nodes;
    }
    nodes.sort_by_cached_key(XdmNode::doc_order_key);
    nodes.dedup();
    nodes
}

/// Every item must be a node.
pub fn require_nodes(seq: Vec<Item>, what: &str) -> Result<Vec<Node>, Error> {
    seq.into_iter()
        .map(|item| match item {
            XdmItem::Node(n) => Ok(n),
            XdmItem::Atomic(a) => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} expects nodes, got {}", a.type_name()),
            )),
        })
        .collect()
}

pub fn zero_or_one<'a>(seq: &'a [Item], what: &str) -> Result<Option<&'a Item>, Error> {
    match seq {
        [] => Ok(None),
        [one] => Ok(Some(one)),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects at most one item, got {}", seq.len()),
        )),
    }
}

pub fn exactly_one<'a>(seq: &'a [Item], what: &str) -> Result<&'a Item, Error> {
    match seq {
        [one] => Ok(one),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects exactly one item, got {}", seq.len()),
        )),
    }
}

/// String value of an optional single item; the empty sequence is `""`.
pub fn string_of(seq: &[Item]) -> String {
    match seq.first() {
        None => String::new(),
        Some(XdmItem::Node(n)) => n.string_value(),
        Some(XdmItem::Atomic(a)) => a.string_value(),
    }
}

pub fn boolean(b: bool) -> Vec<Item> {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

pub fn single(v: XdmAtomicValue) -> Vec<Item> {
    vec![XdmItem::Atomic(v)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ebv_rules() {
        assert!(!ebv(&[]).unwrap());
        assert!(ebv(&single(XdmAtomicValue::String("x".into()))).unwrap());
        assert!(!ebv(&single(XdmAtomicValue::Double(f64::NAN))).unwrap());
        let two = vec![
            XdmItem::Atomic(XdmAtomicValue::Integer(1)),
            XdmItem::Atomic(XdmAtomicValue::Integer(2)),
        ];
        assert_eq!(ebv(&two).unwrap_err().code_enum(), ErrorCode::FORG0006);
        let date = single(XdmAtomicValue::YearMonthDuration(1));
        assert_eq!(ebv(&date).unwrap_err().code_enum(), ErrorCode::FORG0006);
    }
}
