use super::common::{boolean, opt_atomic, opt_node, single, string, string_arg};
use crate::consts::XML_URI;
use crate::engine::casting::is_ncname;
use crate::model::{NodeKind, QName, XdmNode};
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence};
use crate::tree::Node;
use crate::xdm::{XdmAtomicValue, XdmItem};

fn qname_value(q: QName) -> XdmAtomicValue {
    XdmAtomicValue::QName {
        ns_uri: q.ns_uri,
        prefix: q.prefix,
        local: q.local,
    }
}

/// Names only exist on elements, attributes, PIs and namespace nodes.
fn named(n: &Node) -> Option<QName> {
    match n.kind() {
        NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction => n.name(),
        NodeKind::Namespace => n.name().filter(|q| !q.local.is_empty()),
        _ => None,
    }
}

pub(super) fn node_name_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(opt_node(&args[0], "fn:node-name")?
        .and_then(|n| named(&n))
        .map(|q| single(qname_value(q)))
        .unwrap_or_default())
}

/// Nothing is schema-validated, so elements are never nilled.
pub(super) fn nilled_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(match opt_node(&args[0], "fn:nilled")? {
        Some(n) if n.kind() == NodeKind::Element => boolean(false),
        _ => Vec::new(),
    })
}

pub(super) fn name_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let name = opt_node(&args[0], "fn:name")?
        .and_then(|n| named(&n))
        .map(|q| q.to_string())
        .unwrap_or_default();
    Ok(string(name))
}

pub(super) fn local_name_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let name = opt_node(&args[0], "fn:local-name")?
        .and_then(|n| named(&n))
        .map(|q| q.local)
        .unwrap_or_default();
    Ok(string(name))
}

pub(super) fn namespace_uri_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let uri = match opt_node(&args[0], "fn:namespace-uri")? {
        Some(n) if matches!(n.kind(), NodeKind::Element | NodeKind::Attribute) => {
            n.name().and_then(|q| q.ns_uri).unwrap_or_default()
        }
        _ => String::new(),
    };
    Ok(single(XdmAtomicValue::AnyUri(uri)))
}

pub(super) fn root_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(opt_node(&args[0], "fn:root")?
        .map(|n| vec![XdmItem::Node(n.root())])
        .unwrap_or_default())
}

pub(super) fn base_uri_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(n) = opt_node(&args[0], "fn:base-uri")? else {
        return Ok(Vec::new());
    };
    let uri = XdmNode::base_uri(&n)
        .or_else(|| n.document_uri())
        .or_else(|| ctx.static_ctx.base_uri.clone());
    Ok(uri.map(|u| single(XdmAtomicValue::AnyUri(u))).unwrap_or_default())
}

pub(super) fn document_uri_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(match opt_node(&args[0], "fn:document-uri")? {
        Some(n) if n.kind() == NodeKind::Document => n
            .document_uri()
            .map(|u| single(XdmAtomicValue::AnyUri(u)))
            .unwrap_or_default(),
        _ => Vec::new(),
    })
}

/// `fn:lang($testlang, $node)`: the nearest `xml:lang` decides, matching a
/// language or one of its subtags case-insensitively.
pub(super) fn lang_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let wanted = string_arg(&args[0], "fn:lang")?.to_lowercase();
    let Some(node) = args.get(1) else {
        return Err(Error::from_code(
            ErrorCode::XPDY0002,
            "fn:lang requires a context node",
        ));
    };
    let Some(node) = opt_node(node, "fn:lang")? else {
        return Err(Error::from_code(
            ErrorCode::XPDY0002,
            "fn:lang requires a context node",
        ));
    };
    let lang_name = QName::new(Some("xml".into()), "lang", Some(XML_URI.into()));
    let mut cur = Some(node);
    while let Some(n) = cur {
        if let Some(attr) = n.attribute(&lang_name) {
            let value = attr.value().to_lowercase();
            let hit = value == wanted
                || value
                    .strip_prefix(&wanted)
                    .is_some_and(|rest| rest.starts_with('-'));
            return Ok(boolean(hit));
        }
        cur = n.parent();
    }
    Ok(boolean(false))
}

fn element_arg(args: &[Sequence], index: usize, what: &str) -> Result<Node, Error> {
    match opt_node(&args[index], what)? {
        Some(n) if n.kind() == NodeKind::Element => Ok(n),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects an element"),
        )),
    }
}

pub(super) fn in_scope_prefixes_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let el = element_arg(args, 0, "fn:in-scope-prefixes")?;
    let mut out = vec![XdmItem::Atomic(XdmAtomicValue::String("xml".into()))];
    for (prefix, uri) in el.in_scope_namespaces() {
        // an empty default-namespace declaration undeclares it
        if prefix.is_none() && uri.is_empty() {
            continue;
        }
        let p = prefix.unwrap_or_default();
        if p != "xml" {
            out.push(XdmItem::Atomic(XdmAtomicValue::String(p)));
        }
    }
    Ok(out)
}

fn lookup_prefix(el: &Node, prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some(XML_URI.to_string());
    }
    let want = (!prefix.is_empty()).then(|| prefix.to_string());
    el.in_scope_namespaces()
        .into_iter()
        .find(|(p, _)| *p == want)
        .map(|(_, uri)| uri)
        .filter(|uri| !uri.is_empty())
}

pub(super) fn namespace_uri_for_prefix_fn(
    _ctx: &CallCtx,
    args: &[Sequence],
) -> Result<Sequence, Error> {
    let prefix = string_arg(&args[0], "fn:namespace-uri-for-prefix")?;
    let el = element_arg(args, 1, "fn:namespace-uri-for-prefix")?;
    Ok(lookup_prefix(&el, &prefix)
        .map(|u| single(XdmAtomicValue::AnyUri(u)))
        .unwrap_or_default())
}

fn split_lexical(lexical: &str, what: &str) -> Result<(Option<String>, String), Error> {
    let invalid = || {
        Error::from_code(
            ErrorCode::FOCA0002,
            format!("{what}: '{lexical}' is not a valid lexical QName"),
        )
    };
    match lexical.split_once(':') {
        Some((p, l)) if is_ncname(p) && is_ncname(l) => Ok((Some(p.to_string()), l.to_string())),
        None if is_ncname(lexical) => Ok((None, lexical.to_string())),
        _ => Err(invalid()),
    }
}

pub(super) fn resolve_qname_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(lexical) = opt_atomic(&args[0], "fn:resolve-QName")? else {
        return Ok(Vec::new());
    };
    let el = element_arg(args, 1, "fn:resolve-QName")?;
    let (prefix, local) = split_lexical(lexical.string_value().trim(), "fn:resolve-QName")?;
    let ns_uri = match &prefix {
        Some(p) => Some(lookup_prefix(&el, p).ok_or_else(|| {
            Error::from_code(
                ErrorCode::FONS0004,
                format!("no namespace is bound to prefix '{p}'"),
            )
        })?),
        None => lookup_prefix(&el, ""),
    };
    Ok(single(XdmAtomicValue::QName { ns_uri, prefix, local }))
}

pub(super) fn qname_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let uri = string_arg(&args[0], "fn:QName")?;
    let lexical = string_arg(&args[1], "fn:QName")?;
    let (prefix, local) = split_lexical(&lexical, "fn:QName")?;
    if uri.is_empty() && prefix.is_some() {
        return Err(Error::from_code(
            ErrorCode::FOCA0002,
            format!("fn:QName: prefixed name '{lexical}' needs a namespace URI"),
        ));
    }
    Ok(single(XdmAtomicValue::QName {
        ns_uri: (!uri.is_empty()).then_some(uri),
        prefix,
        local,
    }))
}

fn qname_arg(args: &[Sequence], what: &str) -> Result<Option<(Option<String>, Option<String>, String)>, Error> {
    match opt_atomic(&args[0], what)? {
        None => Ok(None),
        Some(XdmAtomicValue::QName { ns_uri, prefix, local }) => Ok(Some((ns_uri, prefix, local))),
        Some(v) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects an xs:QName, got {}", v.type_name()),
        )),
    }
}

pub(super) fn local_name_from_qname_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(qname_arg(args, "fn:local-name-from-QName")?
        .map(|(_, _, local)| single(XdmAtomicValue::String(local)))
        .unwrap_or_default())
}

pub(super) fn prefix_from_qname_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(qname_arg(args, "fn:prefix-from-QName")?
        .and_then(|(_, prefix, _)| prefix)
        .filter(|p| !p.is_empty())
        .map(|p| single(XdmAtomicValue::String(p)))
        .unwrap_or_default())
}

pub(super) fn namespace_uri_from_qname_fn(
    _ctx: &CallCtx,
    args: &[Sequence],
) -> Result<Sequence, Error> {
    Ok(qname_arg(args, "fn:namespace-uri-from-QName")?
        .map(|(ns, _, _)| single(XdmAtomicValue::AnyUri(ns.unwrap_or_default())))
        .unwrap_or_default())
}
