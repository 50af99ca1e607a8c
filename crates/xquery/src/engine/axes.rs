//! The thirteen axes and node tests.
//!
//! Forward axes return nodes in document order, reverse axes nearest first,
//! which is the order `position()` counts in.

use crate::compiler::ir::{AxisIR, NameOrWildcard, NodeTestIR};
use crate::consts::XS;
use crate::model::{NodeKind, XdmNode, ns_eq};
use crate::tree::Node;
use crate::xdm::ExpandedName;

/// Nodes reachable from `node` along `axis`, in axis order.
pub fn axis_nodes(node: &Node, axis: AxisIR) -> Vec<Node> {
    match axis {
        AxisIR::Child => node.children(),
        AxisIR::Attribute => {
            if node.kind() == NodeKind::Element {
                node.attributes()
            } else {
                Vec::new()
            }
        }
        AxisIR::SelfAxis => vec![node.clone()],
        AxisIR::Parent => node.parent().into_iter().collect(),
        AxisIR::Descendant => node.descendants(),
        AxisIR::DescendantOrSelf => {
            let mut out = vec![node.clone()];
            out.extend(node.descendants());
            out
        }
        AxisIR::Ancestor => ancestors(node),
        AxisIR::AncestorOrSelf => {
            let mut out = vec![node.clone()];
            out.extend(ancestors(node));
            out
        }
        AxisIR::FollowingSibling => siblings(node, true),
        AxisIR::PrecedingSibling => {
            let mut s = siblings(node, false);
            s.reverse();
            s
        }
        AxisIR::Following => following(node),
        AxisIR::Preceding => preceding(node),
        AxisIR::Namespace => namespace_nodes(node),
    }
}

fn ancestors(node: &Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut cur = node.parent();
    while let Some(p) = cur {
        cur = p.parent();
        out.push(p);
    }
    out
}

fn is_tree_child(node: &Node) -> bool {
    !matches!(node.kind(), NodeKind::Attribute | NodeKind::Namespace | NodeKind::Document)
}

/// Siblings after (`after`) or before `node`, both in document order.
fn siblings(node: &Node, after: bool) -> Vec<Node> {
    if !is_tree_child(node) {
        return Vec::new();
    }
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    let children = parent.children();
    let Some(pos) = children.iter().position(|c| c == node) else {
        return Vec::new();
    };
    if after {
        children[pos + 1..].to_vec()
    } else {
        children[..pos].to_vec()
    }
}

fn following(node: &Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut cur = node.clone();
    if !is_tree_child(node) {
        let Some(owner) = node.parent() else {
            return out;
        };
        out.extend(owner.descendants());
        cur = owner;
    }
    loop {
        for s in siblings(&cur, true) {
            out.push(s.clone());
            out.extend(s.descendants());
        }
        match cur.parent() {
            Some(p) => cur = p,
            None => break,
        }
    }
    out
}

fn preceding(node: &Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut cur = match node.kind() {
        NodeKind::Attribute | NodeKind::Namespace => match node.parent() {
            Some(owner) => owner,
            None => return out,
        },
        _ => node.clone(),
    };
    loop {
        for s in siblings(&cur, false).into_iter().rev() {
            let mut subtree = vec![s.clone()];
            subtree.extend(s.descendants());
            out.extend(subtree.into_iter().rev());
        }
        match cur.parent() {
            Some(p) => cur = p,
            None => break,
        }
    }
    out
}

/// Namespace nodes in scope on an element: its own declarations, then inherited ones.
fn namespace_nodes(node: &Node) -> Vec<Node> {
    if node.kind() != NodeKind::Element {
        return Vec::new();
    }
    let mut out: Vec<Node> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut cur = Some(node.clone());
    while let Some(n) = cur {
        for ns in n.namespaces() {
            let prefix = ns.name().map(|q| q.local).unwrap_or_default();
            if !seen.contains(&prefix) {
                seen.push(prefix);
                out.push(ns);
            }
        }
        cur = n.parent().filter(|p| p.kind() == NodeKind::Element);
    }
    out
}

/// The kind a name test selects on this axis.
fn principal_kind(axis: AxisIR) -> NodeKind {
    match axis {
        AxisIR::Attribute => NodeKind::Attribute,
        AxisIR::Namespace => NodeKind::Namespace,
        _ => NodeKind::Element,
    }
}

fn name_matches(node: &Node, name: &ExpandedName) -> bool {
    node.name()
        .is_some_and(|q| q.local == name.local && ns_eq(q.ns_uri.as_deref(), name.ns_uri.as_deref()))
}

fn type_annotation_matches(ty: Option<&ExpandedName>, accepted: &[&str]) -> bool {
    match ty {
        None => true,
        Some(t) => t.ns_uri.as_deref() == Some(XS) && accepted.contains(&t.local.as_str()),
    }
}

pub fn matches_test(node: &Node, test: &NodeTestIR, axis: AxisIR) -> bool {
    let kind = node.kind();
    match test {
        NodeTestIR::AnyKind => true,
        NodeTestIR::Name(name) => kind == principal_kind(axis) && name_matches(node, name),
        NodeTestIR::WildcardAny => kind == principal_kind(axis),
        NodeTestIR::NsWildcard(uri) => {
            kind == principal_kind(axis)
                && node
                    .name()
                    .is_some_and(|q| ns_eq(q.ns_uri.as_deref(), Some(uri.as_str())))
        }
        NodeTestIR::LocalWildcard(local) => {
            kind == principal_kind(axis) && node.name().is_some_and(|q| &q.local == local)
        }
        NodeTestIR::KindText => kind == NodeKind::Text,
        NodeTestIR::KindComment => kind == NodeKind::Comment,
        NodeTestIR::KindNamespace => kind == NodeKind::Namespace,
        NodeTestIR::KindProcessingInstruction(target) => {
            kind == NodeKind::ProcessingInstruction
                && target
                    .as_ref()
                    .is_none_or(|t| node.name().is_some_and(|q| &q.local == t))
        }
        NodeTestIR::KindDocument(inner) => {
            kind == NodeKind::Document
                && inner.as_ref().is_none_or(|t| {
                    let elements: Vec<Node> = node
                        .children()
                        .into_iter()
                        .filter(|c| c.kind() == NodeKind::Element)
                        .collect();
                    elements.len() == 1 && matches_test(&elements[0], t, AxisIR::Child)
                })
        }
        NodeTestIR::KindElement { name, ty, .. } => {
            kind == NodeKind::Element
                && match name {
                    None | Some(NameOrWildcard::Any) => true,
                    Some(NameOrWildcard::Name(n)) => name_matches(node, n),
                }
                && type_annotation_matches(ty.as_ref(), &["untyped", "anyType"])
        }
        NodeTestIR::KindAttribute { name, ty } => {
            kind == NodeKind::Attribute
                && match name {
                    None | Some(NameOrWildcard::Any) => true,
                    Some(NameOrWildcard::Name(n)) => name_matches(node, n),
                }
                && type_annotation_matches(ty.as_ref(), &["untypedAtomic", "anySimpleType", "anyAtomicType"])
        }
        // no schema types are ever in scope
        NodeTestIR::KindSchemaElement(_) | NodeTestIR::KindSchemaAttribute(_) => false,
    }
}

/// One step from one context node, in axis order.
pub fn step_nodes(node: &Node, axis: AxisIR, test: &NodeTestIR) -> Vec<Node> {
    let mut nodes = axis_nodes(node, axis);
    nodes.retain(|n| matches_test(n, test, axis));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{ParseOptions, parse_document};

    fn doc(xml: &str) -> Node {
        parse_document(xml, None, false, ParseOptions::default()).unwrap().root()
    }

    fn names(nodes: &[Node]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| match n.name() {
                Some(q) => q.local,
                None => n.string_value(),
            })
            .collect()
    }

    fn first_named(root: &Node, local: &str) -> Node {
        root.descendants()
            .into_iter()
            .find(|n| n.name().is_some_and(|q| q.local == local))
            .unwrap()
    }

    #[test]
    fn reverse_axes_are_nearest_first() {
        let root = doc("<a><b><c><d/></c></b></a>");
        let d = first_named(&root, "d");
        let anc = step_nodes(&d, AxisIR::Ancestor, &NodeTestIR::WildcardAny);
        assert_eq!(names(&anc), vec!["c", "b", "a"]);
    }

    #[test]
    fn preceding_and_following_exclude_ancestors() {
        let root = doc("<r><a><a1/></a><b><b1/><x/><b2/></b><c/></r>");
        let x = first_named(&root, "x");
        let pre = step_nodes(&x, AxisIR::Preceding, &NodeTestIR::WildcardAny);
        assert_eq!(names(&pre), vec!["b1", "a1", "a"]);
        let fol = step_nodes(&x, AxisIR::Following, &NodeTestIR::WildcardAny);
        assert_eq!(names(&fol), vec!["b2", "c"]);
        let pre_sib = step_nodes(&x, AxisIR::PrecedingSibling, &NodeTestIR::AnyKind);
        assert_eq!(names(&pre_sib), vec!["b1"]);
    }

    #[test]
    fn improbable_combinations_are_empty() {
        let root = doc("<r a='1'><!--c--></r>");
        let r = first_named(&root, "r");
        assert!(step_nodes(&r, AxisIR::Attribute, &NodeTestIR::KindComment).is_empty());
        assert!(step_nodes(&r, AxisIR::SelfAxis, &NodeTestIR::KindAttribute { name: None, ty: None }).is_empty());
        let attr = &r.attributes()[0];
        assert!(step_nodes(attr, AxisIR::Child, &NodeTestIR::AnyKind).is_empty());
        assert!(step_nodes(attr, AxisIR::FollowingSibling, &NodeTestIR::AnyKind).is_empty());
    }

    #[test]
    fn wildcard_on_attribute_axis_selects_attributes() {
        let root = doc("<r a='1' b='2'><c/></r>");
        let r = first_named(&root, "r");
        assert_eq!(step_nodes(&r, AxisIR::Attribute, &NodeTestIR::WildcardAny).len(), 2);
        assert_eq!(step_nodes(&r, AxisIR::Child, &NodeTestIR::WildcardAny).len(), 1);
    }
}
