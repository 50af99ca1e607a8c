//! Value and general comparisons, plus the orderings used by `order by`,
//! `min`/`max` and grouping.

use crate::compiler::ir::ComparisonOp;
use crate::engine::casting::{self, AtomicType, CastEnv};
use crate::engine::collation::Collation;
use crate::runtime::{Error, ErrorCode};
use crate::xdm::XdmAtomicValue;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use core::cmp::Ordering;

fn incomparable(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("cannot compare {} with {}", a.type_name(), b.type_name()),
    )
}

fn instant_of_date(date: NaiveDate, tz: Option<FixedOffset>, implicit: FixedOffset) -> Option<DateTime<FixedOffset>> {
    tz.unwrap_or(implicit)
        .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .single()
}

/// Ordering of two atomics of comparable types. `Ok(None)` means unordered (NaN).
pub fn atomic_cmp(
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
    implicit_tz: FixedOffset,
) -> Result<Option<Ordering>, Error> {
    use XdmAtomicValue as V;
    match (a, b) {
        (V::Integer(x), V::Integer(y)) => Ok(Some(x.cmp(y))),
        (x, y) if x.is_numeric() && y.is_numeric() => {
            let (fx, fy) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            Ok(fx.partial_cmp(&fy))
        }
        (x, y) if x.is_string_like() && y.is_string_like() => {
            let (sx, sy) = (x.string_value(), y.string_value());
            Ok(Some(collation.compare(&sx, &sy)))
        }
        (V::Boolean(x), V::Boolean(y)) => Ok(Some(x.cmp(y))),
        (V::DateTime(x), V::DateTime(y)) => Ok(Some(x.cmp(y))),
        (V::Date { date: d1, tz: t1 }, V::Date { date: d2, tz: t2 }) => {
            let x = instant_of_date(*d1, *t1, implicit_tz);
            let y = instant_of_date(*d2, *t2, implicit_tz);
            Ok(x.zip(y).map(|(x, y)| x.cmp(&y)))
        }
        (V::Time { time: t1, tz: z1 }, V::Time { time: t2, tz: z2 }) => {
            let reference = NaiveDate::from_ymd_opt(1972, 12, 31).unwrap_or_default();
            let x = z1
                .unwrap_or(implicit_tz)
                .from_local_datetime(&reference.and_time(*t1))
                .single();
            let y = z2
                .unwrap_or(implicit_tz)
                .from_local_datetime(&reference.and_time(*t2))
                .single();
            Ok(x.zip(y).map(|(x, y)| x.cmp(&y)))
        }
        (V::YearMonthDuration(x), V::YearMonthDuration(y)) => Ok(Some(x.cmp(y))),
        (V::DayTimeDuration(x), V::DayTimeDuration(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(a, b)),
    }
}

/// Equality-only comparison for types without an order.
fn atomic_eq(
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
    implicit_tz: FixedOffset,
) -> Result<bool, Error> {
    use XdmAtomicValue as V;
    match (a, b) {
        (
            V::QName {
                ns_uri: n1, local: l1, ..
            },
            V::QName {
                ns_uri: n2, local: l2, ..
            },
        ) => Ok(l1 == l2 && n1.as_deref().unwrap_or("") == n2.as_deref().unwrap_or("")),
        (V::Base64Binary(x), V::Base64Binary(y)) => Ok(x == y),
        (V::YearMonthDuration(m), V::DayTimeDuration(ms)) | (V::DayTimeDuration(ms), V::YearMonthDuration(m)) => {
            Ok(*m == 0 && *ms == 0)
        }
        _ => Ok(atomic_cmp(a, b, collation, implicit_tz)? == Some(Ordering::Equal)),
    }
}

fn untyped_as_string(v: &XdmAtomicValue) -> XdmAtomicValue {
    match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s.clone()),
        other => other.clone(),
    }
}

fn apply(op: ComparisonOp, ord: Option<Ordering>) -> bool {
    let Some(ord) = ord else {
        return op == ComparisonOp::Ne;
    };
    match op {
        ComparisonOp::Eq => ord == Ordering::Equal,
        ComparisonOp::Ne => ord != Ordering::Equal,
        ComparisonOp::Lt => ord == Ordering::Less,
        ComparisonOp::Le => ord != Ordering::Greater,
        ComparisonOp::Gt => ord == Ordering::Greater,
        ComparisonOp::Ge => ord != Ordering::Less,
    }
}

/// `eq`, `lt` and friends on two atomics. Untyped operands compare as strings.
pub fn value_compare(
    op: ComparisonOp,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
    implicit_tz: FixedOffset,
) -> Result<bool, Error> {
    let (a, b) = (untyped_as_string(a), untyped_as_string(b));
    match op {
        ComparisonOp::Eq => atomic_eq(&a, &b, collation, implicit_tz),
        ComparisonOp::Ne => atomic_eq(&a, &b, collation, implicit_tz).map(|e| !e),
        _ => Ok(apply(op, atomic_cmp(&a, &b, collation, implicit_tz)?)),
    }
}

/// Cast an untyped operand of a general comparison towards the other operand's type.
fn promote_untyped(
    v: &XdmAtomicValue,
    other: &XdmAtomicValue,
    implicit_tz: FixedOffset,
) -> Result<XdmAtomicValue, Error> {
    let XdmAtomicValue::UntypedAtomic(s) = v else {
        return Ok(v.clone());
    };
    let env = CastEnv {
        implicit_timezone: implicit_tz,
        static_ctx: None,
    };
    match other {
        XdmAtomicValue::UntypedAtomic(_) | XdmAtomicValue::String(_) | XdmAtomicValue::AnyUri(_) => {
            Ok(XdmAtomicValue::String(s.clone()))
        }
        o if o.is_numeric() => casting::cast(v, AtomicType::Double, env),
        o => casting::cast(v, casting::type_of(o), env),
    }
}

/// Existentially quantified comparison of two atomized sequences.
pub fn general_compare(
    op: ComparisonOp,
    left: &[XdmAtomicValue],
    right: &[XdmAtomicValue],
    collation: &dyn Collation,
    implicit_tz: FixedOffset,
) -> Result<bool, Error> {
    for a in left {
        for b in right {
            let pa = promote_untyped(a, b, implicit_tz)?;
            let pb = promote_untyped(b, a, implicit_tz)?;
            if value_compare(op, &pa, &pb, collation, implicit_tz)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Equality used by `deep-equal`, `distinct-values`, `index-of` and grouping:
/// incomparable values are simply unequal and NaN equals NaN.
pub fn atomic_equal(a: &XdmAtomicValue, b: &XdmAtomicValue, collation: &dyn Collation) -> bool {
    let nan = |v: &XdmAtomicValue| v.as_f64().is_some_and(f64::is_nan);
    if nan(a) && nan(b) {
        return true;
    }
    atomic_eq(&untyped_as_string(a), &untyped_as_string(b), collation, casting::utc()).unwrap_or(false)
}

/// Total order for `order by`: NaN sorts below every other number.
pub fn order_key_cmp(
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
    implicit_tz: FixedOffset,
) -> Result<Ordering, Error> {
    let (a, b) = (untyped_as_string(a), untyped_as_string(b));
    let nan = |v: &XdmAtomicValue| v.as_f64().is_some_and(f64::is_nan);
    match (nan(&a), nan(&b)) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) if b.is_numeric() => return Ok(Ordering::Less),
        (false, true) if a.is_numeric() => return Ok(Ordering::Greater),
        _ => {}
    }
    Ok(atomic_cmp(&a, &b, collation, implicit_tz)?.unwrap_or(Ordering::Equal))
}

/// Grouping key: values that are `eq` map to equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Number(u64),
    NaN,
    Str(String),
    Bool(bool),
    Other(String, String),
}

pub fn group_key(v: &XdmAtomicValue, collation: &dyn Collation) -> GroupKey {
    match v {
        XdmAtomicValue::Boolean(b) => GroupKey::Bool(*b),
        x if x.is_numeric() => {
            let f = x.as_f64().unwrap_or(f64::NAN);
            if f.is_nan() {
                GroupKey::NaN
            } else {
                // -0.0 and 0.0 are eq
                GroupKey::Number(if f == 0.0 { 0 } else { f.to_bits() })
            }
        }
        x if x.is_string_like() => GroupKey::Str(collation.key(&x.string_value())),
        other => GroupKey::Other(other.type_name().to_string(), other.string_value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::CodepointCollation;

    fn utc() -> FixedOffset {
        casting::utc()
    }

    #[test]
    fn numeric_promotion_in_value_comparison() {
        let c = CodepointCollation;
        assert!(value_compare(
            ComparisonOp::Eq,
            &XdmAtomicValue::Integer(1),
            &XdmAtomicValue::Double(1.0),
            &c,
            utc()
        )
        .unwrap());
        assert!(value_compare(
            ComparisonOp::Lt,
            &XdmAtomicValue::Decimal(0.5),
            &XdmAtomicValue::Integer(1),
            &c,
            utc()
        )
        .unwrap());
    }

    #[test]
    fn untyped_is_cast_to_number_in_general_comparisons() {
        let c = CodepointCollation;
        let left = [XdmAtomicValue::UntypedAtomic("10".into())];
        let right = [XdmAtomicValue::Integer(9)];
        assert!(general_compare(ComparisonOp::Gt, &left, &right, &c, utc()).unwrap());
        // as strings "10" < "9"
        let right = [XdmAtomicValue::UntypedAtomic("9".into())];
        assert!(general_compare(ComparisonOp::Lt, &left, &right, &c, utc()).unwrap());
        let bad = [XdmAtomicValue::UntypedAtomic("abc".into())];
        let err = general_compare(ComparisonOp::Eq, &bad, &[XdmAtomicValue::Integer(1)], &c, utc()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn mixed_types_are_incomparable() {
        let c = CodepointCollation;
        let err = value_compare(
            ComparisonOp::Eq,
            &XdmAtomicValue::String("1".into()),
            &XdmAtomicValue::Integer(1),
            &c,
            utc(),
        )
        .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
        assert!(!atomic_equal(
            &XdmAtomicValue::String("1".into()),
            &XdmAtomicValue::Integer(1),
            &c
        ));
    }

    #[test]
    fn nan_compares_unequal_but_groups_together() {
        let c = CodepointCollation;
        let nan = XdmAtomicValue::Double(f64::NAN);
        assert!(!value_compare(ComparisonOp::Eq, &nan, &nan, &c, utc()).unwrap());
        assert!(value_compare(ComparisonOp::Ne, &nan, &nan, &c, utc()).unwrap());
        assert_eq!(group_key(&nan, &c), group_key(&XdmAtomicValue::Float(f32::NAN), &c));
        assert_eq!(
            group_key(&XdmAtomicValue::Integer(1), &c),
            group_key(&XdmAtomicValue::Double(1.0), &c)
        );
    }
}
