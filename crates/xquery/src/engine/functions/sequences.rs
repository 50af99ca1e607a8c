use super::common::{boolean, collation_arg, integer_arg, opt_atomic, opt_number};
use crate::engine::compare::{atomic_equal, group_key};
use crate::engine::deep_equal::deep_equal;
use crate::engine::sequence::atomize;
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence};
use crate::xdm::{XdmAtomicValue, XdmItem};
use std::collections::HashSet;

pub(super) fn empty_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(boolean(args[0].is_empty()))
}

pub(super) fn exists_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(boolean(!args[0].is_empty()))
}

/// First occurrence wins; values that are `eq` (after collation) are duplicates.
pub(super) fn distinct_values_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let coll = collation_arg(ctx, args, 1)?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in atomize(&args[0]) {
        let v = match v {
            XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
            v => v,
        };
        if seen.insert(group_key(&v, coll.as_ref())) {
            out.push(XdmItem::Atomic(v));
        }
    }
    Ok(out)
}

pub(super) fn index_of_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(needle) = opt_atomic(&args[1], "fn:index-of")? else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "fn:index-of expects a single search value",
        ));
    };
    let coll = collation_arg(ctx, args, 2)?;
    Ok(atomize(&args[0])
        .iter()
        .enumerate()
        .filter(|(_, v)| atomic_equal(v, &needle, coll.as_ref()))
        .map(|(i, _)| XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(i + 1).unwrap_or(i64::MAX))))
        .collect())
}

/// Positions below 1 insert at the front, past the end append. No deduplication.
pub(super) fn insert_before_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let pos = integer_arg(&args[1], "fn:insert-before")?.ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, "fn:insert-before expects a position")
    })?;
    let target = &args[0];
    let at = usize::try_from(pos.max(1) - 1).unwrap_or(0).min(target.len());
    let mut out = Vec::with_capacity(target.len() + args[2].len());
    out.extend_from_slice(&target[..at]);
    out.extend_from_slice(&args[2]);
    out.extend_from_slice(&target[at..]);
    Ok(out)
}

/// Out-of-range positions return the input unchanged.
pub(super) fn remove_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let pos = integer_arg(&args[1], "fn:remove")?.ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, "fn:remove expects a position")
    })?;
    let mut out = args[0].clone();
    if let Ok(p) = usize::try_from(pos)
        && p >= 1
        && p <= out.len()
    {
        out.remove(p - 1);
    }
    Ok(out)
}

pub(super) fn reverse_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let mut out = args[0].clone();
    out.reverse();
    Ok(out)
}

/// Items at positions `p` with `round(start) <= p < round(start) + round(length)`.
pub(super) fn subsequence_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let start = opt_number(&args[1], "fn:subsequence")?.unwrap_or(f64::NAN).round();
    let end = match args.get(2) {
        Some(len) => start + opt_number(len, "fn:subsequence")?.unwrap_or(f64::NAN).round(),
        None => f64::INFINITY,
    };
    if start.is_nan() || end.is_nan() {
        return Ok(Vec::new());
    }
    Ok(args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, item)| item.clone())
        .collect())
}

pub(super) fn unordered_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(args[0].clone())
}

pub(super) fn zero_or_one_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    if args[0].len() > 1 {
        return Err(Error::from_code(
            ErrorCode::FORG0003,
            format!("fn:zero-or-one called with {} items", args[0].len()),
        ));
    }
    Ok(args[0].clone())
}

pub(super) fn one_or_more_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    if args[0].is_empty() {
        return Err(Error::from_code(
            ErrorCode::FORG0004,
            "fn:one-or-more called with an empty sequence",
        ));
    }
    Ok(args[0].clone())
}

pub(super) fn exactly_one_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    if args[0].len() != 1 {
        return Err(Error::from_code(
            ErrorCode::FORG0005,
            format!("fn:exactly-one called with {} items", args[0].len()),
        ));
    }
    Ok(args[0].clone())
}

pub(super) fn deep_equal_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let coll = collation_arg(ctx, args, 2)?;
    Ok(boolean(deep_equal(&args[0], &args[1], coll.as_ref())))
}

pub(super) fn head_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(args[0].first().cloned().into_iter().collect())
}

pub(super) fn tail_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(args[0].iter().skip(1).cloned().collect())
}
