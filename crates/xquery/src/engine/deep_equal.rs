//! `fn:deep-equal` over item sequences.
//!
//! Element content is compared as a sequence of logical parts: comments and
//! processing instructions are skipped and adjacent text nodes collapse into
//! one run before comparison. Constructed trees keep copied text nodes apart
//! from their neighbours, so `<v>{$a/text(), $b/text()}</v>` must still equal
//! `<v>AB</v>`.

use crate::engine::collation::Collation;
use crate::engine::compare::atomic_equal;
use crate::model::{NodeKind, XdmNode};
use crate::runtime::Item;
use crate::tree::Node;
use crate::xdm::XdmItem;
use core::cmp::Ordering;

pub fn deep_equal(a: &[Item], b: &[Item], collation: &dyn Collation) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| item_equal(x, y, collation))
}

fn item_equal(a: &Item, b: &Item, collation: &dyn Collation) -> bool {
    match (a, b) {
        (XdmItem::Atomic(x), XdmItem::Atomic(y)) => atomic_equal(x, y, collation),
        (XdmItem::Node(x), XdmItem::Node(y)) => node_equal(x, y, collation),
        _ => false,
    }
}

fn same_string(a: &str, b: &str, collation: &dyn Collation) -> bool {
    collation.compare(a, b) == Ordering::Equal
}

fn same_name(a: &Node, b: &Node) -> bool {
    match (a.name(), b.name()) {
        (Some(x), Some(y)) => x.same_expanded(&y),
        (None, None) => true,
        _ => false,
    }
}

fn node_equal(a: &Node, b: &Node, collation: &dyn Collation) -> bool {
    let kind = a.kind();
    if kind != b.kind() {
        return false;
    }
    match kind {
        NodeKind::Document => content_equal(a, b, collation),
        NodeKind::Element => {
            same_name(a, b) && attributes_equal(a, b, collation) && content_equal(a, b, collation)
        }
        NodeKind::Attribute => {
            same_name(a, b) && same_string(&a.string_value(), &b.string_value(), collation)
        }
        NodeKind::ProcessingInstruction | NodeKind::Namespace => {
            same_name(a, b) && a.string_value() == b.string_value()
        }
        NodeKind::Text | NodeKind::Comment => {
            same_string(&a.string_value(), &b.string_value(), collation)
        }
    }
}

/// Attributes compare as an unordered set of (name, value) pairs.
fn attributes_equal(a: &Node, b: &Node, collation: &dyn Collation) -> bool {
    let (xs, ys) = (a.attributes(), b.attributes());
    xs.len() == ys.len()
        && xs.iter().all(|x| {
            ys.iter().any(|y| {
                same_name(x, y) && same_string(&x.string_value(), &y.string_value(), collation)
            })
        })
}

enum Part {
    Text(String),
    Node(Node),
}

/// Children with comments and PIs removed and text runs merged.
fn logical_content(node: &Node) -> Vec<Part> {
    let mut parts: Vec<Part> = Vec::new();
    for child in node.children() {
        match child.kind() {
            NodeKind::Comment | NodeKind::ProcessingInstruction => {}
            NodeKind::Text => {
                let value = child.string_value();
                if value.is_empty() {
                    continue;
                }
                match parts.last_mut() {
                    Some(Part::Text(run)) => run.push_str(&value),
                    _ => parts.push(Part::Text(value)),
                }
            }
            _ => parts.push(Part::Node(child)),
        }
    }
    parts
}

fn content_equal(a: &Node, b: &Node, collation: &dyn Collation) -> bool {
    let (xs, ys) = (logical_content(a), logical_content(b));
    xs.len() == ys.len()
        && xs.iter().zip(&ys).all(|pair| match pair {
            (Part::Text(x), Part::Text(y)) => same_string(x, y, collation),
            (Part::Node(x), Part::Node(y)) => node_equal(x, y, collation),
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::CodepointCollation;
    use crate::model::QName;
    use crate::tree::{Document, Fragment};
    use crate::xdm::XdmAtomicValue;

    fn element(children: Vec<Fragment>) -> Item {
        let frag = Fragment::element(QName::local("v")).with_children(children);
        XdmItem::Node(Document::from_fragment(&frag, None, false).root())
    }

    #[test]
    fn split_text_equals_merged_text() {
        let split = element(vec![Fragment::text("A"), Fragment::text("B")]);
        let merged = element(vec![Fragment::text("AB")]);
        assert!(deep_equal(&[split.clone()], &[merged.clone()], &CodepointCollation));
        assert!(deep_equal(&[merged], &[split], &CodepointCollation));
    }

    #[test]
    fn attribute_order_is_irrelevant() {
        let attrs = |names: [&str; 2]| {
            let frag = Fragment::element(QName::local("e")).with_attributes(
                names
                    .iter()
                    .map(|n| Fragment::attribute(QName::local(*n), *n))
                    .collect(),
            );
            XdmItem::Node(Document::from_fragment(&frag, None, false).root())
        };
        assert!(deep_equal(&[attrs(["a", "b"])], &[attrs(["b", "a"])], &CodepointCollation));
    }

    #[test]
    fn comments_are_ignored_in_content() {
        let with = element(vec![Fragment::comment("x"), Fragment::text("t")]);
        let without = element(vec![Fragment::text("t")]);
        assert!(deep_equal(&[with], &[without], &CodepointCollation));
    }

    #[test]
    fn numbers_compare_after_promotion() {
        let one = |v| vec![XdmItem::Atomic(v)];
        assert!(deep_equal(
            &one(XdmAtomicValue::Decimal(1.0)),
            &one(XdmAtomicValue::Integer(1)),
            &CodepointCollation
        ));
        assert!(deep_equal(
            &one(XdmAtomicValue::Double(1.0)),
            &one(XdmAtomicValue::Integer(1)),
            &CodepointCollation
        ));
        let node = element(vec![Fragment::text("1")]);
        assert!(!deep_equal(&[node], &one(XdmAtomicValue::String("1".into())), &CodepointCollation));
    }
}
