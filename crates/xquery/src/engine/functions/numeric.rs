use super::common::{collation_arg, integer, integer_arg, opt_atomic, opt_number, single};
use crate::compiler::ir::ArithOp;
use crate::engine::arith::{arithmetic, make_numeric, numeric_kind};
use crate::engine::casting::{self, utc};
use crate::engine::compare::atomic_cmp;
use crate::engine::sequence::atomize;
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence};
use crate::xdm::{XdmAtomicValue, XdmItem};
use core::cmp::Ordering;

pub(super) fn number_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let n = match opt_atomic(&args[0], "fn:number") {
        Ok(Some(v)) => match v {
            XdmAtomicValue::Boolean(b) => f64::from(u8::from(b)),
            v if v.is_numeric() => v.as_f64().unwrap_or(f64::NAN),
            v => casting::parse_double(v.string_value().trim()).unwrap_or(f64::NAN),
        },
        Ok(None) | Err(_) => f64::NAN,
    };
    Ok(single(XdmAtomicValue::Double(n)))
}

/// Apply a rounding-style function, keeping integers exact and the numeric type intact.
fn num_unary(
    args: &[Sequence],
    what: &str,
    int: fn(i64) -> i64,
    f: fn(f64) -> f64,
) -> Result<Sequence, Error> {
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let v = match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::Double(casting::parse_double(&s)?),
        v => v,
    };
    let Some(kind) = numeric_kind(&v) else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects a number, got {}", v.type_name()),
        ));
    };
    Ok(single(match v {
        XdmAtomicValue::Integer(i) => XdmAtomicValue::Integer(int(i)),
        other => make_numeric(kind, f(other.as_f64().unwrap_or(f64::NAN))),
    }))
}

fn identity(i: i64) -> i64 {
    i
}

pub(super) fn abs_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    num_unary(args, "fn:abs", i64::saturating_abs, f64::abs)
}

pub(super) fn ceiling_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    num_unary(args, "fn:ceiling", identity, f64::ceil)
}

pub(super) fn floor_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    num_unary(args, "fn:floor", identity, f64::floor)
}

/// XPath `round`: halves go towards positive infinity.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub(super) fn round_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    num_unary(args, "fn:round", identity, round_half_up)
}

fn round_half_even(x: f64, precision: i32) -> f64 {
    let scale = 10f64.powi(precision);
    let scaled = x * scale;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if floor % 2.0 == 0.0 { floor } else { floor + 1.0 }
    } else {
        scaled.round()
    };
    rounded / scale
}

pub(super) fn round_half_to_even_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let precision = match args.get(1) {
        Some(p) => integer_arg(p, "fn:round-half-to-even")?.unwrap_or(0),
        None => 0,
    };
    let precision = i32::try_from(precision.clamp(-300, 300)).unwrap_or(0);
    let Some(v) = opt_atomic(&args[0], "fn:round-half-to-even")? else {
        return Ok(Vec::new());
    };
    let v = match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::Double(casting::parse_double(&s)?),
        v => v,
    };
    let Some(kind) = numeric_kind(&v) else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("fn:round-half-to-even expects a number, got {}", v.type_name()),
        ));
    };
    let x = v.as_f64().unwrap_or(f64::NAN);
    if !x.is_finite() {
        return Ok(single(v));
    }
    Ok(single(match v {
        XdmAtomicValue::Integer(i) if precision >= 0 => XdmAtomicValue::Integer(i),
        XdmAtomicValue::Integer(_) => {
            #[allow(clippy::cast_possible_truncation)]
            let r = round_half_even(x, precision) as i64;
            XdmAtomicValue::Integer(r)
        }
        _ => make_numeric(kind, round_half_even(x, precision)),
    }))
}

/// Atomized values with untyped ones cast to `xs:double`.
fn aggregate_values(arg: &[crate::runtime::Item]) -> Result<Vec<XdmAtomicValue>, Error> {
    atomize(arg)
        .into_iter()
        .map(|v| match v {
            XdmAtomicValue::UntypedAtomic(s) => casting::parse_double(&s).map(XdmAtomicValue::Double),
            v => Ok(v),
        })
        .collect()
}

fn total(values: &[XdmAtomicValue], what: &str) -> Result<Option<XdmAtomicValue>, Error> {
    let mut iter = values.iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    if !(first.is_numeric()
        || matches!(first, XdmAtomicValue::YearMonthDuration(_) | XdmAtomicValue::DayTimeDuration(_)))
    {
        return Err(Error::from_code(
            ErrorCode::FORG0006,
            format!("{what} is not defined for {}", first.type_name()),
        ));
    }
    let mut acc = first.clone();
    for v in iter {
        acc = arithmetic(ArithOp::Add, &acc, v).map_err(|e| {
            Error::from_code(ErrorCode::FORG0006, format!("{what}: {}", e.message))
        })?;
    }
    Ok(Some(acc))
}

pub(super) fn sum_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let values = aggregate_values(&args[0])?;
    match total(&values, "fn:sum")? {
        Some(v) => Ok(single(v)),
        None => match args.get(1) {
            Some(zero) => Ok(atomize(zero).into_iter().map(XdmItem::Atomic).collect()),
            None => Ok(single(XdmAtomicValue::Integer(0))),
        },
    }
}

pub(super) fn avg_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let values = aggregate_values(&args[0])?;
    let Some(sum) = total(&values, "fn:avg")? else {
        return Ok(Vec::new());
    };
    let count = XdmAtomicValue::Integer(i64::try_from(values.len()).unwrap_or(i64::MAX));
    Ok(single(arithmetic(ArithOp::Div, &sum, &count)?))
}

fn extreme(ctx: &CallCtx, args: &[Sequence], want: Ordering, what: &str) -> Result<Sequence, Error> {
    let values = aggregate_values(&args[0])?;
    let coll = collation_arg(ctx, args, 1)?;
    let mut best: Option<XdmAtomicValue> = None;
    let mut promote_double = false;
    for v in values {
        if matches!(v, XdmAtomicValue::Double(_)) {
            promote_double = true;
        }
        if v.as_f64().is_some_and(f64::is_nan) {
            return Ok(single(XdmAtomicValue::Double(f64::NAN)));
        }
        best = Some(match best {
            None => v,
            Some(b) => match atomic_cmp(&v, &b, coll.as_ref(), utc()) {
                Ok(Some(o)) if o == want => v,
                Ok(_) => b,
                Err(_) => {
                    return Err(Error::from_code(
                        ErrorCode::FORG0006,
                        format!("{what}: cannot compare {} with {}", v.type_name(), b.type_name()),
                    ));
                }
            },
        });
    }
    Ok(match best {
        None => Vec::new(),
        Some(v) if promote_double && v.is_numeric() => {
            single(XdmAtomicValue::Double(v.as_f64().unwrap_or(f64::NAN)))
        }
        Some(XdmAtomicValue::AnyUri(s)) => single(XdmAtomicValue::String(s)),
        Some(v) => single(v),
    })
}

pub(super) fn min_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    extreme(ctx, args, Ordering::Less, "fn:min")
}

pub(super) fn max_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    extreme(ctx, args, Ordering::Greater, "fn:max")
}

pub(super) fn count_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(integer(args[0].len()))
}

/// `math:` functions over `xs:double`; the empty sequence passes through.
pub(super) fn math_unary(args: &[Sequence], what: &str, f: fn(f64) -> f64) -> Result<Sequence, Error> {
    Ok(match opt_number(&args[0], what)? {
        Some(x) => single(XdmAtomicValue::Double(f(x))),
        None => Vec::new(),
    })
}

pub(super) fn math_pow_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let Some(x) = opt_number(&args[0], "math:pow")? else {
        return Ok(Vec::new());
    };
    let y = opt_number(&args[1], "math:pow")?.ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, "math:pow expects an exponent")
    })?;
    Ok(single(XdmAtomicValue::Double(x.powf(y))))
}
