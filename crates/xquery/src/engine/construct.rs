//! Node constructors: evaluated content sequences to [`Fragment`] trees.
//!
//! Each content part is one evaluated enclosed expression or literal run.
//! Atomic values inside a part are joined with single spaces; parts are not.
//! Text copied from a stored document keeps its origin and stays a separate
//! node; every other adjacent text merges.

use crate::consts::{XML_URI, XMLNS_URI};
use crate::engine::casting::is_ncname;
use crate::engine::sequence::atomize_item;
use crate::model::{NodeKind, QName, XdmNode};
use crate::runtime::{Error, ErrorCode, Item};
use crate::tree::{Fragment, Node};
use crate::xdm::{XdmAtomicValue, XdmItem};
use std::collections::HashMap;

/// Collects element or document content.
pub struct ContentBuilder {
    attributes: Vec<Fragment>,
    namespaces: Vec<(Option<String>, String)>,
    children: Vec<Fragment>,
    is_document: bool,
}

impl ContentBuilder {
    pub fn element() -> Self {
        Self {
            attributes: Vec::new(),
            namespaces: Vec::new(),
            children: Vec::new(),
            is_document: false,
        }
    }

    pub fn document() -> Self {
        Self {
            is_document: true,
            ..Self::element()
        }
    }

    pub fn push_part(&mut self, part: &[Item]) -> Result<(), Error> {
        let mut pending: Vec<String> = Vec::new();
        for item in part {
            match item {
                XdmItem::Atomic(a) => pending.push(a.string_value()),
                XdmItem::Node(n) => {
                    if !pending.is_empty() {
                        self.push_text(pending.join(" "));
                        pending.clear();
                    }
                    self.push_node(n)?;
                }
            }
        }
        if !pending.is_empty() {
            self.push_text(pending.join(" "));
        }
        Ok(())
    }

    fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.children.last_mut()
            && last.kind == NodeKind::Text
            && last.origin.is_none()
        {
            last.value.push_str(&text);
            return;
        }
        self.children.push(Fragment::text(text));
    }

    fn push_node(&mut self, node: &Node) -> Result<(), Error> {
        match node.kind() {
            NodeKind::Attribute => self.push_attribute(node.to_fragment()),
            NodeKind::Namespace => {
                let prefix = node.name().map(|q| q.local).filter(|p| !p.is_empty());
                add_binding(&mut self.namespaces, prefix, node.value());
                Ok(())
            }
            NodeKind::Document => {
                for child in node.children() {
                    self.push_node(&child)?;
                }
                Ok(())
            }
            NodeKind::Text if !node.is_persistent() => {
                self.push_text(node.value());
                Ok(())
            }
            NodeKind::Text => {
                if !node.value().is_empty() {
                    self.children.push(node.to_fragment());
                }
                Ok(())
            }
            _ => {
                self.children.push(node.to_fragment());
                Ok(())
            }
        }
    }

    pub fn push_attribute(&mut self, attr: Fragment) -> Result<(), Error> {
        if self.is_document {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "a document node cannot contain attributes",
            ));
        }
        if !self.children.is_empty() {
            return Err(Error::from_code(
                ErrorCode::XQTY0024,
                "attributes must come before other element content",
            ));
        }
        let name = attr.name.clone().unwrap_or_else(|| QName::local(""));
        if self
            .attributes
            .iter()
            .any(|a| a.name.as_ref().is_some_and(|n| n.same_expanded(&name)))
        {
            return Err(Error::from_code(
                ErrorCode::XQDY0025,
                format!("duplicate attribute '{name}'"),
            ));
        }
        self.attributes.push(attr);
        Ok(())
    }

    pub fn into_element(self, name: QName, declared: Vec<(Option<String>, String)>) -> Fragment {
        let mut namespaces = declared;
        for (prefix, uri) in self.namespaces {
            add_binding(&mut namespaces, prefix, uri);
        }
        if let Some(uri) = name.ns_uri.clone().filter(|u| !u.is_empty()) {
            add_binding(&mut namespaces, name.prefix.clone().filter(|p| !p.is_empty()), uri);
        }
        for attr in &self.attributes {
            if let Some(QName {
                prefix: Some(p),
                ns_uri: Some(uri),
                ..
            }) = &attr.name
                && p != "xml"
            {
                add_binding(&mut namespaces, Some(p.clone()), uri.clone());
            }
        }
        let mut element = Fragment::element(name)
            .with_attributes(self.attributes)
            .with_children(self.children);
        element.namespaces = namespaces;
        element
    }

    pub fn into_document(self) -> Fragment {
        Fragment::document(self.children)
    }
}

fn add_binding(namespaces: &mut Vec<(Option<String>, String)>, prefix: Option<String>, uri: String) {
    if !namespaces.iter().any(|(p, _)| *p == prefix) {
        namespaces.push((prefix, uri));
    }
}

/// String content of a part: atomized values joined with spaces.
fn part_string(part: &[Item]) -> String {
    part.iter()
        .map(|i| atomize_item(i).string_value())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn attribute(name: QName, parts: &[Vec<Item>]) -> Result<Fragment, Error> {
    let is_xmlns = name.prefix.as_deref() == Some("xmlns")
        || (name.prefix.is_none() && name.ns_uri.is_none() && name.local == "xmlns")
        || name.ns_uri.as_deref() == Some(XMLNS_URI);
    if is_xmlns {
        return Err(Error::from_code(
            ErrorCode::XQDY0044,
            format!("'{name}' cannot be used as an attribute name"),
        ));
    }
    let value: String = parts.iter().map(|p| part_string(p)).collect();
    Ok(Fragment::attribute(name, value))
}

/// `text { ... }`; the empty sequence constructs nothing.
pub fn text(content: &[Item]) -> Option<Fragment> {
    if content.is_empty() {
        return None;
    }
    Some(Fragment::text(part_string(content)))
}

pub fn comment(content: &[Item]) -> Result<Fragment, Error> {
    let value = part_string(content);
    if value.contains("--") || value.ends_with('-') {
        return Err(Error::from_code(
            ErrorCode::XQDY0072,
            "comment content must not contain '--' or end with '-'",
        ));
    }
    Ok(Fragment::comment(value))
}

pub fn processing_instruction(target: &str, content: &[Item]) -> Result<Fragment, Error> {
    if !is_ncname(target) {
        return Err(Error::from_code(
            ErrorCode::XQDY0041,
            format!("'{target}' is not a valid processing-instruction target"),
        ));
    }
    if target.eq_ignore_ascii_case("xml") {
        return Err(Error::from_code(
            ErrorCode::XQDY0064,
            "processing-instruction target must not be 'xml'",
        ));
    }
    let value = part_string(content).trim_start().to_string();
    if value.contains("?>") {
        return Err(Error::from_code(
            ErrorCode::XQDY0026,
            "processing-instruction content must not contain '?>'",
        ));
    }
    Ok(Fragment::processing_instruction(target, value))
}

/// Name of a computed constructor from its evaluated name expression.
pub fn computed_name(
    value: &[Item],
    namespaces: &HashMap<String, String>,
    default_ns: Option<&str>,
) -> Result<QName, Error> {
    let [item] = value else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("a constructor name must be a single value, got {} items", value.len()),
        ));
    };
    match atomize_item(item) {
        XdmAtomicValue::QName { ns_uri, prefix, local } => Ok(QName::new(prefix, local, ns_uri)),
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
            parse_lexical_name(s.trim(), namespaces, default_ns)
        }
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("a constructor name cannot be of type {}", other.type_name()),
        )),
    }
}

fn parse_lexical_name(
    s: &str,
    namespaces: &HashMap<String, String>,
    default_ns: Option<&str>,
) -> Result<QName, Error> {
    let bad = || Error::from_code(ErrorCode::XQDY0074, format!("'{s}' is not a valid name"));
    match s.split_once(':') {
        Some((prefix, local)) => {
            if !is_ncname(prefix) || !is_ncname(local) {
                return Err(bad());
            }
            let uri = if prefix == "xml" {
                XML_URI.to_string()
            } else {
                namespaces.get(prefix).cloned().ok_or_else(|| {
                    Error::from_code(
                        ErrorCode::XQDY0074,
                        format!("namespace prefix '{prefix}' is not declared"),
                    )
                })?
            };
            Ok(QName::new(Some(prefix.to_string()), local, Some(uri)))
        }
        None if is_ncname(s) => Ok(QName::new(None, s, default_ns.map(str::to_string))),
        None => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Document;

    fn atomic(s: &str) -> Item {
        XdmItem::Atomic(XdmAtomicValue::String(s.into()))
    }

    #[test]
    fn atomics_join_within_a_part_only() {
        let mut b = ContentBuilder::element();
        b.push_part(&[atomic("a"), atomic("b")]).unwrap();
        b.push_part(&[atomic("c")]).unwrap();
        let frag = b.into_element(QName::local("e"), Vec::new());
        assert_eq!(frag.children.len(), 1);
        assert_eq!(frag.string_value(), "a bc");
    }

    #[test]
    fn duplicate_and_late_attributes_are_rejected() {
        let mut b = ContentBuilder::element();
        b.push_attribute(Fragment::attribute(QName::local("x"), "1")).unwrap();
        let err = b
            .push_attribute(Fragment::attribute(QName::local("x"), "2"))
            .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQDY0025);

        let mut b = ContentBuilder::element();
        b.push_part(&[atomic("t")]).unwrap();
        let err = b
            .push_attribute(Fragment::attribute(QName::local("y"), "1"))
            .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQTY0024);
    }

    #[test]
    fn stored_text_copies_stay_separate() {
        let stored = Document::from_fragment(
            &Fragment::element(QName::local("r")).with_children(vec![Fragment::text("A")]),
            None,
            true,
        );
        let text = stored.root().children()[0].clone();
        let mut b = ContentBuilder::element();
        b.push_part(&[XdmItem::Node(text)]).unwrap();
        b.push_part(&[atomic("B")]).unwrap();
        let frag = b.into_element(QName::local("v"), Vec::new());
        assert_eq!(frag.children.len(), 2);
        assert!(frag.children[0].origin.is_some());
        assert_eq!(frag.string_value(), "AB");
    }

    #[test]
    fn computed_names_resolve_prefixes() {
        let mut ns = HashMap::new();
        ns.insert("p".to_string(), "urn:p".to_string());
        let q = computed_name(&[atomic("p:a")], &ns, None).unwrap();
        assert_eq!(q.ns_uri.as_deref(), Some("urn:p"));
        let err = computed_name(&[atomic("q:a")], &ns, None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQDY0074);
    }

    #[test]
    fn comment_and_pi_content_rules() {
        assert_eq!(comment(&[atomic("a--b")]).unwrap_err().code_enum(), ErrorCode::XQDY0072);
        assert_eq!(
            processing_instruction("xml", &[]).unwrap_err().code_enum(),
            ErrorCode::XQDY0064
        );
        let pi = processing_instruction("go", &[atomic("  now")]).unwrap();
        assert_eq!(pi.value, "now");
    }
}
