//! Arithmetic on atomic values: numeric promotion, durations and date/time offsets.

use crate::compiler::ir::ArithOp;
use crate::engine::casting;
use crate::runtime::{Error, ErrorCode};
use crate::xdm::XdmAtomicValue as V;
use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, TimeZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericKind {
    Integer,
    Decimal,
    Float,
    Double,
}

pub fn numeric_kind(v: &V) -> Option<NumericKind> {
    match v {
        V::Integer(_) => Some(NumericKind::Integer),
        V::Decimal(_) => Some(NumericKind::Decimal),
        V::Float(_) => Some(NumericKind::Float),
        V::Double(_) => Some(NumericKind::Double),
        _ => None,
    }
}

/// Wrap an `f64` result in the value type for `kind`.
#[allow(clippy::cast_possible_truncation)]
pub fn make_numeric(kind: NumericKind, f: f64) -> V {
    match kind {
        NumericKind::Integer | NumericKind::Decimal => V::Decimal(f),
        NumericKind::Float => V::Float(f as f32),
        NumericKind::Double => V::Double(f),
    }
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "integer overflow")
}

fn div_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

fn type_error(op: ArithOp, a: &V, b: &V) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("operator {op:?} is not defined for {} and {}", a.type_name(), b.type_name()),
    )
}

fn untyped_to_double(v: &V) -> Result<V, Error> {
    match v {
        V::UntypedAtomic(s) => casting::parse_double(s).map(V::Double),
        other => Ok(other.clone()),
    }
}

/// Apply `op` to two atomized operands.
pub fn arithmetic(op: ArithOp, a: &V, b: &V) -> Result<V, Error> {
    let a = untyped_to_double(a)?;
    let b = untyped_to_double(b)?;
    if let (Some(ka), Some(kb)) = (numeric_kind(&a), numeric_kind(&b)) {
        return numeric(op, &a, &b, ka.max(kb));
    }
    temporal(op, &a, &b)
}

fn numeric(op: ArithOp, a: &V, b: &V, kind: NumericKind) -> Result<V, Error> {
    if let (V::Integer(x), V::Integer(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return match op {
            ArithOp::Add => x.checked_add(y).map(V::Integer).ok_or_else(overflow),
            ArithOp::Sub => x.checked_sub(y).map(V::Integer).ok_or_else(overflow),
            ArithOp::Mul => x.checked_mul(y).map(V::Integer).ok_or_else(overflow),
            ArithOp::Div => {
                if y == 0 {
                    return Err(div_zero());
                }
                Ok(V::Decimal(x as f64 / y as f64))
            }
            ArithOp::IDiv => {
                if y == 0 {
                    return Err(div_zero());
                }
                x.checked_div(y).map(V::Integer).ok_or_else(overflow)
            }
            ArithOp::Mod => {
                if y == 0 {
                    return Err(div_zero());
                }
                x.checked_rem(y).map(V::Integer).ok_or_else(overflow)
            }
        };
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    let exact = matches!(kind, NumericKind::Integer | NumericKind::Decimal);
    match op {
        ArithOp::Add => Ok(make_numeric(kind, x + y)),
        ArithOp::Sub => Ok(make_numeric(kind, x - y)),
        ArithOp::Mul => Ok(make_numeric(kind, x * y)),
        ArithOp::Div => {
            if exact && y == 0.0 {
                return Err(div_zero());
            }
            Ok(make_numeric(kind, x / y))
        }
        ArithOp::Mod => {
            if exact && y == 0.0 {
                return Err(div_zero());
            }
            Ok(make_numeric(kind, x % y))
        }
        ArithOp::IDiv => {
            if y == 0.0 {
                return Err(div_zero());
            }
            let q = (x / y).trunc();
            if !q.is_finite() {
                return Err(Error::from_code(
                    ErrorCode::FOAR0002,
                    "integer division of NaN or infinity",
                ));
            }
            #[allow(clippy::cast_possible_truncation)]
            let r = q as i64;
            Ok(V::Integer(r))
        }
    }
}

fn add_months(dt: DateTime<FixedOffset>, months: i32) -> Option<DateTime<FixedOffset>> {
    if months >= 0 {
        dt.checked_add_months(Months::new(months.unsigned_abs()))
    } else {
        dt.checked_sub_months(Months::new(months.unsigned_abs()))
    }
}

fn date_as_instant(date: NaiveDate, tz: Option<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    tz.unwrap_or_else(casting::utc)
        .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .single()
}

#[allow(clippy::cast_possible_truncation)]
fn temporal(op: ArithOp, a: &V, b: &V) -> Result<V, Error> {
    let err = || type_error(op, a, b);
    let range = || Error::from_code(ErrorCode::FODT0002, "date/time value out of range");
    match (op, a, b) {
        (ArithOp::Add, V::YearMonthDuration(x), V::YearMonthDuration(y)) => {
            x.checked_add(*y).map(V::YearMonthDuration).ok_or_else(range)
        }
        (ArithOp::Sub, V::YearMonthDuration(x), V::YearMonthDuration(y)) => {
            x.checked_sub(*y).map(V::YearMonthDuration).ok_or_else(range)
        }
        (ArithOp::Add, V::DayTimeDuration(x), V::DayTimeDuration(y)) => {
            x.checked_add(*y).map(V::DayTimeDuration).ok_or_else(range)
        }
        (ArithOp::Sub, V::DayTimeDuration(x), V::DayTimeDuration(y)) => {
            x.checked_sub(*y).map(V::DayTimeDuration).ok_or_else(range)
        }
        (ArithOp::Mul | ArithOp::Div, V::YearMonthDuration(m), n) if n.is_numeric() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if f.is_nan() {
                return Err(Error::from_code(ErrorCode::FOCA0002, "cannot scale a duration by NaN"));
            }
            let r = if op == ArithOp::Mul { f64::from(*m) * f } else { f64::from(*m) / f };
            if !r.is_finite() {
                return Err(range());
            }
            Ok(V::YearMonthDuration(r.round() as i32))
        }
        (ArithOp::Mul, n, V::YearMonthDuration(_) | V::DayTimeDuration(_)) if n.is_numeric() => {
            temporal(op, b, a)
        }
        (ArithOp::Mul | ArithOp::Div, V::DayTimeDuration(ms), n) if n.is_numeric() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if f.is_nan() {
                return Err(Error::from_code(ErrorCode::FOCA0002, "cannot scale a duration by NaN"));
            }
            let r = if op == ArithOp::Mul { *ms as f64 * f } else { *ms as f64 / f };
            if !r.is_finite() {
                return Err(range());
            }
            Ok(V::DayTimeDuration(r.round() as i64))
        }
        (ArithOp::Div, V::YearMonthDuration(x), V::YearMonthDuration(y)) => {
            if *y == 0 {
                return Err(div_zero());
            }
            Ok(V::Decimal(f64::from(*x) / f64::from(*y)))
        }
        (ArithOp::Div, V::DayTimeDuration(x), V::DayTimeDuration(y)) => {
            if *y == 0 {
                return Err(div_zero());
            }
            Ok(V::Decimal(*x as f64 / *y as f64))
        }
        (ArithOp::Add | ArithOp::Sub, V::DateTime(dt), V::YearMonthDuration(m)) => {
            let m = if op == ArithOp::Sub { -*m } else { *m };
            add_months(*dt, m).map(V::DateTime).ok_or_else(range)
        }
        (ArithOp::Add | ArithOp::Sub, V::DateTime(dt), V::DayTimeDuration(ms)) => {
            let d = Duration::milliseconds(if op == ArithOp::Sub { -*ms } else { *ms });
            dt.checked_add_signed(d).map(V::DateTime).ok_or_else(range)
        }
        (ArithOp::Add, V::YearMonthDuration(_) | V::DayTimeDuration(_), V::DateTime(_) | V::Date { .. }) => {
            temporal(op, b, a)
        }
        (ArithOp::Add | ArithOp::Sub, V::Date { date, tz }, V::YearMonthDuration(m)) => {
            let m = if op == ArithOp::Sub { -*m } else { *m };
            let shifted = if m >= 0 {
                date.checked_add_months(Months::new(m.unsigned_abs()))
            } else {
                date.checked_sub_months(Months::new(m.unsigned_abs()))
            };
            shifted.map(|date| V::Date { date, tz: *tz }).ok_or_else(range)
        }
        (ArithOp::Add | ArithOp::Sub, V::Date { date, tz }, V::DayTimeDuration(ms)) => {
            let d = Duration::milliseconds(if op == ArithOp::Sub { -*ms } else { *ms });
            let start = date.and_time(chrono::NaiveTime::MIN);
            start
                .checked_add_signed(d)
                .map(|dt| V::Date { date: dt.date(), tz: *tz })
                .ok_or_else(range)
        }
        (ArithOp::Sub, V::DateTime(x), V::DateTime(y)) => {
            Ok(V::DayTimeDuration(x.signed_duration_since(*y).num_milliseconds()))
        }
        (ArithOp::Sub, V::Date { date: d1, tz: t1 }, V::Date { date: d2, tz: t2 }) => {
            let (Some(x), Some(y)) = (date_as_instant(*d1, *t1), date_as_instant(*d2, *t2)) else {
                return Err(range());
            };
            Ok(V::DayTimeDuration(x.signed_duration_since(y).num_milliseconds()))
        }
        _ => Err(err()),
    }
}

/// Unary minus.
pub fn negate(v: &V) -> Result<V, Error> {
    match untyped_to_double(v)? {
        V::Integer(i) => i.checked_neg().map(V::Integer).ok_or_else(overflow),
        V::Decimal(d) => Ok(V::Decimal(-d)),
        V::Double(d) => Ok(V::Double(-d)),
        V::Float(f) => Ok(V::Float(-f)),
        V::YearMonthDuration(m) => Ok(V::YearMonthDuration(-m)),
        V::DayTimeDuration(ms) => Ok(V::DayTimeDuration(-ms)),
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("unary minus is not defined for {}", other.type_name()),
        )),
    }
}

/// Unary plus: checks the operand is numeric, converting untyped data.
pub fn unary_plus(v: &V) -> Result<V, Error> {
    match untyped_to_double(v)? {
        n if n.is_numeric() => Ok(n),
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("unary plus is not defined for {}", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_yields_decimal() {
        assert_eq!(
            arithmetic(ArithOp::Div, &V::Integer(7), &V::Integer(2)).unwrap(),
            V::Decimal(3.5)
        );
        assert_eq!(
            arithmetic(ArithOp::IDiv, &V::Integer(7), &V::Integer(2)).unwrap(),
            V::Integer(3)
        );
        let err = arithmetic(ArithOp::Div, &V::Integer(1), &V::Integer(0)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
    }

    #[test]
    fn doubles_divide_to_infinity() {
        let r = arithmetic(ArithOp::Div, &V::Double(1.0), &V::Integer(0)).unwrap();
        assert_eq!(r, V::Double(f64::INFINITY));
    }

    #[test]
    fn untyped_operands_become_doubles() {
        let r = arithmetic(ArithOp::Add, &V::UntypedAtomic("41".into()), &V::Integer(1)).unwrap();
        assert_eq!(r, V::Double(42.0));
        let err = arithmetic(ArithOp::Add, &V::UntypedAtomic("x".into()), &V::Integer(1)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn durations_add_to_dates() {
        let date = V::Date {
            date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            tz: None,
        };
        let r = arithmetic(ArithOp::Add, &date, &V::YearMonthDuration(1)).unwrap();
        assert_eq!(r.string_value(), "2024-02-29");
        let err = arithmetic(ArithOp::Add, &date, &V::Integer(1)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }
}
