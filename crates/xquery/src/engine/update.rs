//! eXist update statements applied to stored trees.
//!
//! Each statement applies one mutation per target node, in target order.
//! Mutations take effect immediately; a failing mutation stops the statement
//! without undoing the ones before it. Every mutated document is reported to
//! the [`UpdateListener`] so indexes can catch up before the next lookup.

use crate::compiler::ir::InsertPositionIR;
use crate::engine::sequence::atomize_item;
use crate::model::{NodeKind, QName, XdmNode};
use crate::runtime::{Error, ErrorCode, Item, UpdateListener};
use crate::tree::{Fragment, Node};
use crate::xdm::XdmItem;
use tracing::trace;

/// Stored nodes an update statement may modify.
fn targets(seq: &[Item], what: &str) -> Result<Vec<Node>, Error> {
    let mut out = Vec::with_capacity(seq.len());
    for item in seq {
        let XdmItem::Node(n) = item else {
            return Err(Error::from_code(
                ErrorCode::XUTY0008,
                format!("the target of {what} must be a node"),
            ));
        };
        if !n.is_persistent() {
            return Err(Error::from_code(
                ErrorCode::XUDY0014,
                format!("the target of {what} is not part of a stored document"),
            ));
        }
        out.push(n.clone());
    }
    Ok(out)
}

/// Insertion payload: nodes are copied, runs of atomics become text.
fn payload(seq: &[Item]) -> Vec<Fragment> {
    let mut out = Vec::with_capacity(seq.len());
    let mut pending: Vec<String> = Vec::new();
    let flush = |pending: &mut Vec<String>, out: &mut Vec<Fragment>| {
        if !pending.is_empty() {
            out.push(Fragment::text(pending.join(" ")));
            pending.clear();
        }
    };
    for item in seq {
        match item {
            XdmItem::Atomic(a) => pending.push(a.string_value()),
            XdmItem::Node(n) => {
                flush(&mut pending, &mut out);
                match n.kind() {
                    NodeKind::Document => out.extend(n.children().iter().map(Node::to_fragment)),
                    _ => out.push(n.to_fragment()),
                }
            }
        }
    }
    flush(&mut pending, &mut out);
    out
}

fn notify(listener: Option<&dyn UpdateListener>, node: &Node) {
    if let Some(l) = listener {
        l.document_modified(node);
    }
}

fn position_in_parent(node: &Node) -> Result<(Node, usize), Error> {
    let parent = node.parent().filter(|_| node.kind().is_child_kind()).ok_or_else(|| {
        Error::from_code(
            ErrorCode::XUTY0008,
            "insert following/preceding needs a target with a parent",
        )
    })?;
    let index = parent
        .children()
        .iter()
        .position(|c| c == node)
        .ok_or_else(|| Error::from_code(ErrorCode::XUDY0027, "the update target was removed"))?;
    Ok((parent, index))
}

pub fn insert(
    source: &[Item],
    position: InsertPositionIR,
    target: &[Item],
    listener: Option<&dyn UpdateListener>,
) -> Result<(), Error> {
    let fragments = payload(source);
    for t in targets(target, "update insert")? {
        match position {
            InsertPositionIR::Into | InsertPositionIR::Last | InsertPositionIR::First => {
                if !matches!(t.kind(), NodeKind::Element | NodeKind::Document) {
                    return Err(Error::from_code(
                        ErrorCode::XUTY0008,
                        "update insert into needs an element or document target",
                    ));
                }
                let at = (position == InsertPositionIR::First).then_some(0);
                let created = t.document().insert(t.id(), at, &fragments);
                trace!(target = ?t, nodes = created.len(), "insert into");
            }
            InsertPositionIR::Following | InsertPositionIR::Preceding => {
                let (parent, index) = position_in_parent(&t)?;
                let at = if position == InsertPositionIR::Following {
                    index + 1
                } else {
                    index
                };
                let created = t.document().insert(parent.id(), Some(at), &fragments);
                trace!(target = ?t, nodes = created.len(), ?position, "insert beside");
            }
        }
        notify(listener, &t);
    }
    Ok(())
}

pub fn replace(target: &[Item], with: &[Item], listener: Option<&dyn UpdateListener>) -> Result<(), Error> {
    let fragments = payload(with);
    for t in targets(target, "update replace")? {
        if t.parent().is_none() {
            return Err(Error::from_code(
                ErrorCode::XUTY0008,
                "a document node cannot be replaced",
            ));
        }
        if t.kind() == NodeKind::Attribute
            && fragments.iter().any(|f| f.kind != NodeKind::Attribute)
        {
            return Err(Error::from_code(
                ErrorCode::XUTY0008,
                "an attribute can only be replaced by attributes",
            ));
        }
        let created = t.document().replace(t.id(), &fragments);
        trace!(target = ?t, nodes = created.len(), "replace");
        notify(listener, &t);
    }
    Ok(())
}

/// `update value`: elements get a single text child, leaf nodes a new value.
pub fn replace_value(target: &[Item], with: &[Item], listener: Option<&dyn UpdateListener>) -> Result<(), Error> {
    let value = with
        .iter()
        .map(|i| atomize_item(i).string_value())
        .collect::<Vec<_>>()
        .join(" ");
    for t in targets(target, "update value")? {
        let doc = t.document();
        match t.kind() {
            NodeKind::Element => doc.replace_children(t.id(), &[Fragment::text(value.clone())]),
            NodeKind::Attribute | NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                doc.set_value(t.id(), value.clone());
            }
            NodeKind::Document | NodeKind::Namespace => {
                return Err(Error::from_code(
                    ErrorCode::XUTY0008,
                    "update value needs an element, attribute or text target",
                ));
            }
        }
        trace!(target = ?t, value = %value, "replace value");
        notify(listener, &t);
    }
    Ok(())
}

pub fn delete(target: &[Item], listener: Option<&dyn UpdateListener>) -> Result<(), Error> {
    for t in targets(target, "update delete")? {
        if t.parent().is_none() {
            return Err(Error::from_code(
                ErrorCode::XUTY0008,
                "a document node cannot be deleted",
            ));
        }
        t.document().detach(t.id());
        trace!(target = ?t, "delete");
        notify(listener, &t);
    }
    Ok(())
}

pub fn rename(target: &[Item], name: &QName, listener: Option<&dyn UpdateListener>) -> Result<(), Error> {
    for t in targets(target, "update rename")? {
        match t.kind() {
            NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction => {
                t.document().rename(t.id(), name.clone());
            }
            _ => {
                return Err(Error::from_code(
                    ErrorCode::XUTY0012,
                    "update rename needs an element, attribute or processing-instruction target",
                ));
            }
        }
        trace!(target = ?t, name = %name, "rename");
        notify(listener, &t);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Document;
    use crate::xdm::XdmAtomicValue;
    use crate::xml::{ParseOptions, parse_document};
    use std::sync::Arc;

    fn stored(xml: &str) -> Arc<Document> {
        parse_document(xml, Some("/db/t.xml".into()), true, ParseOptions::default()).unwrap()
    }

    fn element(doc: &Arc<Document>, local: &str) -> Node {
        doc.root()
            .descendants()
            .into_iter()
            .find(|n| n.name().is_some_and(|q| q.local == local))
            .unwrap()
    }

    #[test]
    fn replace_keeps_sibling_text_in_place() {
        let doc = stored("<a>x<b/>y</a>");
        let b = element(&doc, "b");
        let with = vec![XdmItem::Atomic(XdmAtomicValue::String("-".into()))];
        replace(&[XdmItem::Node(b)], &with, None).unwrap();
        let a = element(&doc, "a");
        assert_eq!(a.string_value(), "x-y");
        assert_eq!(a.children().len(), 1);
    }

    #[test]
    fn repeated_value_updates_do_not_drift() {
        let doc = stored(r#"<progress total="100" done="0"/>"#);
        let p = element(&doc, "progress");
        let done = p.attribute(&QName::local("done")).unwrap();
        for i in 1..=100 {
            let v = vec![XdmItem::Atomic(XdmAtomicValue::Integer(i))];
            replace_value(&[XdmItem::Node(done.clone())], &v, None).unwrap();
        }
        assert_eq!(done.string_value(), "100");
    }

    #[test]
    fn transient_targets_are_rejected() {
        let doc = parse_document("<a/>", None, false, ParseOptions::default()).unwrap();
        let err = delete(&[XdmItem::Node(element(&doc, "a"))], None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XUDY0014);
        let err = delete(&[XdmItem::Atomic(XdmAtomicValue::Integer(1))], None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XUTY0008);
    }

    #[test]
    fn insert_positions() {
        let doc = stored("<r><m/></r>");
        let m = XdmItem::Node(element(&doc, "m"));
        let frag = |name: &str| {
            let d = Document::from_fragment(&Fragment::element(QName::local(name)), None, false);
            vec![XdmItem::Node(d.root())]
        };
        insert(&frag("before"), InsertPositionIR::Preceding, std::slice::from_ref(&m), None).unwrap();
        insert(&frag("after"), InsertPositionIR::Following, std::slice::from_ref(&m), None).unwrap();
        insert(&frag("inner"), InsertPositionIR::Into, std::slice::from_ref(&m), None).unwrap();
        let names: Vec<String> = element(&doc, "r")
            .descendants()
            .iter()
            .filter_map(|n| n.name().map(|q| q.local))
            .collect();
        assert_eq!(names, vec!["before", "m", "inner", "after"]);
    }
}
