//! Argument helpers shared by the function families.

use crate::engine::casting::{self, AtomicType, CastEnv};
use crate::engine::collation::{Collation, resolve_collation};
use crate::engine::sequence::{atomize_item, zero_or_one};
use crate::runtime::{CallCtx, Error, ErrorCode, Item, Sequence};
use crate::tree::Node;
use crate::xdm::{XdmAtomicValue, XdmItem};
use std::sync::Arc;

pub(super) fn single(v: XdmAtomicValue) -> Sequence {
    vec![XdmItem::Atomic(v)]
}

pub(super) fn boolean(b: bool) -> Sequence {
    single(XdmAtomicValue::Boolean(b))
}

pub(super) fn string(s: impl Into<String>) -> Sequence {
    single(XdmAtomicValue::String(s.into()))
}

pub(super) fn integer(i: usize) -> Sequence {
    single(XdmAtomicValue::Integer(i64::try_from(i).unwrap_or(i64::MAX)))
}

/// Optional single atomized argument.
pub(super) fn opt_atomic(arg: &[Item], what: &str) -> Result<Option<XdmAtomicValue>, Error> {
    Ok(zero_or_one(arg, what)?.map(atomize_item))
}

/// String value of an optional single argument; the empty sequence is `""`.
pub(super) fn string_arg(arg: &[Item], what: &str) -> Result<String, Error> {
    Ok(opt_atomic(arg, what)?
        .map(|v| v.string_value())
        .unwrap_or_default())
}

/// Optional node argument: atomic values are a type error.
pub(super) fn opt_node(arg: &[Item], what: &str) -> Result<Option<Node>, Error> {
    match zero_or_one(arg, what)? {
        None => Ok(None),
        Some(XdmItem::Node(n)) => Ok(Some(n.clone())),
        Some(XdmItem::Atomic(a)) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects a node, got {}", a.type_name()),
        )),
    }
}

/// Numeric argument as `f64`; untyped values are cast to `xs:double`.
pub(super) fn opt_number(arg: &[Item], what: &str) -> Result<Option<f64>, Error> {
    match opt_atomic(arg, what)? {
        None => Ok(None),
        Some(XdmAtomicValue::UntypedAtomic(s)) => casting::parse_double(&s).map(Some),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} expects a number, got {}", v.type_name()),
            )
        }),
    }
}

pub(super) fn integer_arg(arg: &[Item], what: &str) -> Result<Option<i64>, Error> {
    match opt_atomic(arg, what)? {
        None => Ok(None),
        Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
        Some(v @ XdmAtomicValue::UntypedAtomic(_)) => {
            match casting::cast(&v, AtomicType::Integer(casting::IntKind::Integer), CastEnv::default())? {
                XdmAtomicValue::Integer(i) => Ok(Some(i)),
                _ => Ok(None),
            }
        }
        Some(v) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects an xs:integer, got {}", v.type_name()),
        )),
    }
}

/// Collation named by an optional argument, else the context default.
pub(super) fn collation_arg(
    ctx: &CallCtx,
    args: &[Sequence],
    index: usize,
) -> Result<Arc<dyn Collation>, Error> {
    let uri = match args.get(index) {
        Some(arg) => Some(string_arg(arg, "collation")?),
        None => None,
    };
    resolve_collation(ctx.dyn_ctx, ctx.default_collation.as_ref(), uri.as_deref())
}

/// Values of an untyped-to-string conversion used by string functions.
pub(super) fn strings(arg: &[Item]) -> Vec<String> {
    arg.iter().map(|i| atomize_item(i).string_value()).collect()
}
