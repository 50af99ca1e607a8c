//! The `util:`, `xmldb:` and `text:` extension modules.
//!
//! Storage functions go through the [`DocumentResolver`](crate::runtime::DocumentResolver)
//! of the dynamic context; without one they raise `FOER0000`.

use super::common::{boolean, opt_node, string, string_arg, strings};
use crate::engine::fulltext::{compile_terms, text_matches};
use crate::engine::sequence::string_of;
use crate::model::{NodeKind, XdmNode};
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence, TermPattern};
use crate::serializer::{SerializationOptions, serialize_sequence};
use crate::tree::{Fragment, Node};
use crate::xdm::XdmItem;
use crate::xml::{ParseOptions, parse_fragment};
use tracing::{debug, error, info, trace, warn};

/// Hierarchical id like `1.2.3`: the document is `1`, and each step is the
/// 1-based position among the parent's attributes followed by its children.
fn node_id(node: &Node) -> String {
    let mut parts = Vec::new();
    let mut cur = node.clone();
    while let Some(parent) = cur.parent() {
        let attributes = parent.attributes();
        let pos = if cur.kind() == NodeKind::Attribute {
            attributes.iter().position(|a| *a == cur)
        } else {
            parent
                .children()
                .iter()
                .position(|c| *c == cur)
                .map(|p| p + attributes.len())
        };
        parts.push(pos.map_or(0, |p| p + 1));
        cur = parent;
    }
    parts.push(1);
    parts
        .iter()
        .rev()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

pub(super) fn node_id_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(opt_node(&args[0], "util:node-id")?
        .map(|n| string(node_id(&n)))
        .unwrap_or_default())
}

pub(super) fn document_name_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(opt_node(&args[0], "util:document-name")?
        .and_then(|n| n.document_uri())
        .and_then(|uri| uri.rsplit('/').next().map(str::to_string))
        .map(string)
        .unwrap_or_default())
}

pub(super) fn collection_name_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(opt_node(&args[0], "util:collection-name")?
        .and_then(|n| n.document_uri())
        .and_then(|uri| uri.rsplit_once('/').map(|(c, _)| c.to_string()))
        .map(string)
        .unwrap_or_default())
}

pub(super) fn log_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let level = string_arg(&args[0], "util:log")?.to_lowercase();
    let message = strings(&args[1]).join(" ");
    match level.as_str() {
        "error" => error!(target: "sylva::util", "{message}"),
        "warn" => warn!(target: "sylva::util", "{message}"),
        "info" => info!(target: "sylva::util", "{message}"),
        "trace" => trace!(target: "sylva::util", "{message}"),
        _ => debug!(target: "sylva::util", "{message}"),
    }
    Ok(Vec::new())
}

pub(super) fn serialize_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let mut options = SerializationOptions::default();
    options.apply(&strings(&args[1]).join(" "))?;
    Ok(string(serialize_sequence(&args[0], &options)?))
}

fn storage_error(what: &str) -> Error {
    Error::from_code(
        ErrorCode::FOER0000,
        format!("{what}: no document store is available"),
    )
}

/// Content accepted by `xmldb:store`: a node is copied, anything else parsed as XML.
fn store_content(arg: &[XdmItem<Node>]) -> Result<Fragment, Error> {
    match arg {
        [XdmItem::Node(n)] => {
            let frag = n.to_fragment();
            Ok(if frag.kind == NodeKind::Document {
                frag
            } else {
                Fragment::document(vec![frag])
            })
        }
        _ => parse_fragment(&string_of(arg), ParseOptions::default()),
    }
}

pub(super) fn store_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let collection = string_arg(&args[0], "xmldb:store")?;
    let name = string_arg(&args[1], "xmldb:store")?;
    if name.is_empty() {
        return Err(Error::from_code(
            ErrorCode::FOER0000,
            "xmldb:store requires a resource name",
        ));
    }
    let content = store_content(&args[2])?;
    let docs = ctx.dyn_ctx.documents.as_deref().ok_or_else(|| storage_error("xmldb:store"))?;
    let path = docs.store_document(&collection, &name, &content)?;
    debug!(path = %path, "stored document");
    Ok(string(path))
}

pub(super) fn remove_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let collection = string_arg(&args[0], "xmldb:remove")?;
    let name = match args.get(1) {
        Some(n) => Some(string_arg(n, "xmldb:remove")?),
        None => None,
    };
    let docs = ctx.dyn_ctx.documents.as_deref().ok_or_else(|| storage_error("xmldb:remove"))?;
    docs.remove_resource(&collection, name.as_deref())?;
    Ok(Vec::new())
}

pub(super) fn create_collection_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let parent = string_arg(&args[0], "xmldb:create-collection")?;
    let name = string_arg(&args[1], "xmldb:create-collection")?;
    let docs = ctx
        .dyn_ctx
        .documents
        .as_deref()
        .ok_or_else(|| storage_error("xmldb:create-collection"))?;
    Ok(string(docs.create_collection(&parent, &name)?))
}

pub(super) fn collection_available_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let uri = string_arg(&args[0], "xmldb:collection-available")?;
    Ok(boolean(
        ctx.dyn_ctx
            .documents
            .as_deref()
            .is_some_and(|d| d.collection_available(&uri)),
    ))
}

/// `xmldb:document($path, ...)`: every named document, missing ones raise `FODC0002`.
pub(super) fn document_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let docs = ctx.dyn_ctx.documents.as_deref().ok_or_else(|| storage_error("xmldb:document"))?;
    let mut out = Vec::new();
    for arg in args {
        for path in strings(arg) {
            match docs.document(&path)? {
                Some(n) => out.push(XdmItem::Node(n)),
                None => {
                    return Err(Error::from_code(
                        ErrorCode::FODC0002,
                        format!("document '{path}' not found"),
                    ));
                }
            }
        }
    }
    Ok(out)
}

/// Nodes of the first argument whose text matches the regex terms that follow.
fn match_terms(args: &[Sequence], all: bool) -> Result<Sequence, Error> {
    let terms: Vec<TermPattern> = args[1..]
        .iter()
        .flat_map(|a| strings(a))
        .map(TermPattern::Regex)
        .collect();
    let matchers = compile_terms(&terms)?;
    let mut out = Vec::new();
    for item in &args[0] {
        let XdmItem::Node(n) = item else {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "text:match-all and text:match-any expect nodes",
            ));
        };
        if text_matches(&n.string_value(), &matchers, all) {
            out.push(item.clone());
        }
    }
    Ok(out)
}

pub(super) fn match_all_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    match_terms(args, true)
}

pub(super) fn match_any_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    match_terms(args, false)
}
