use super::common::{boolean, opt_atomic, single, string_arg};
use crate::consts::CODEPOINT_URI;
use crate::engine::sequence::string_of;
use crate::runtime::{CallCtx, DocumentResolver, Error, ErrorCode, Sequence};
use crate::xdm::{XdmAtomicValue, XdmItem};
use tracing::debug;

fn resolver<'a>(ctx: &'a CallCtx, code: ErrorCode, what: &str) -> Result<&'a dyn DocumentResolver, Error> {
    ctx.dyn_ctx.documents.as_deref().ok_or_else(|| {
        Error::from_code(code, format!("{what}: no document store is available"))
    })
}

pub(super) fn doc_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(uri) = opt_atomic(&args[0], "fn:doc")? else {
        return Ok(Vec::new());
    };
    let uri = uri.string_value();
    let docs = resolver(ctx, ErrorCode::FODC0002, "fn:doc")?;
    match docs.document(&uri)? {
        Some(n) => Ok(vec![XdmItem::Node(n)]),
        None => Err(Error::from_code(
            ErrorCode::FODC0002,
            format!("document '{uri}' not found"),
        )),
    }
}

pub(super) fn doc_available_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(uri) = opt_atomic(&args[0], "fn:doc-available")? else {
        return Ok(boolean(false));
    };
    let Some(docs) = ctx.dyn_ctx.documents.as_deref() else {
        return Ok(boolean(false));
    };
    Ok(boolean(matches!(docs.document(&uri.string_value()), Ok(Some(_)))))
}

/// Document nodes of a collection and all its sub-collections.
pub(super) fn collection_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let uri = match args.first() {
        Some(arg) => opt_atomic(arg, "fn:collection")?.map(|v| v.string_value()),
        None => None,
    };
    let docs = resolver(ctx, ErrorCode::FODC0004, "fn:collection")?;
    Ok(docs
        .collection(uri.as_deref())?
        .into_iter()
        .map(XdmItem::Node)
        .collect())
}

/// `fn:error([$code [, $description [, $value]]])`.
pub(super) fn error_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let code = match args.first() {
        None => None,
        Some(arg) => match opt_atomic(arg, "fn:error")? {
            None => None,
            Some(XdmAtomicValue::QName { ns_uri, local, .. }) => {
                Some(crate::xdm::ExpandedName::new(ns_uri, local))
            }
            Some(v) => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("fn:error expects an xs:QName code, got {}", v.type_name()),
                ));
            }
        },
    };
    let description = match args.get(1) {
        Some(d) => string_arg(d, "fn:error")?,
        None => "error raised by fn:error".to_string(),
    };
    let err = match code {
        Some(code) => Error::new_qname(code, description),
        None => Error::from_code(ErrorCode::FOER0000, description),
    };
    Err(match args.get(2) {
        Some(value) => err.with_value(crate::engine::sequence::atomize(value)),
        None => err,
    })
}

pub(super) fn trace_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let label = string_arg(&args[1], "fn:trace")?;
    debug!(label = %label, value = %string_of(&args[0]), "fn:trace");
    Ok(args[0].clone())
}

pub(super) fn default_collation_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    let uri = ctx
        .dyn_ctx
        .default_collation
        .clone()
        .or_else(|| ctx.static_ctx.default_collation.clone())
        .unwrap_or_else(|| CODEPOINT_URI.to_string());
    Ok(single(XdmAtomicValue::String(uri)))
}

pub(super) fn static_base_uri_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(ctx
        .static_ctx
        .base_uri
        .clone()
        .map(|u| single(XdmAtomicValue::AnyUri(u)))
        .unwrap_or_default())
}
