use super::common::{opt_atomic, single};
use crate::engine::casting::utc;
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence};
use crate::xdm::XdmAtomicValue;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

fn now(ctx: &CallCtx) -> DateTime<FixedOffset> {
    ctx.dyn_ctx.now.unwrap_or_else(|| Utc::now().fixed_offset())
}

fn implicit_tz(ctx: &CallCtx) -> FixedOffset {
    ctx.dyn_ctx
        .timezone_override
        .or_else(|| ctx.dyn_ctx.now.map(|n| *n.offset()))
        .unwrap_or_else(utc)
}

fn tz_duration(tz: FixedOffset) -> XdmAtomicValue {
    XdmAtomicValue::DayTimeDuration(i64::from(tz.local_minus_utc()) * 1000)
}

pub(super) fn current_date_time_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(single(XdmAtomicValue::DateTime(now(ctx))))
}

pub(super) fn current_date_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    let n = now(ctx);
    Ok(single(XdmAtomicValue::Date {
        date: n.date_naive(),
        tz: Some(*n.offset()),
    }))
}

pub(super) fn current_time_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    let n = now(ctx);
    Ok(single(XdmAtomicValue::Time {
        time: n.time(),
        tz: Some(*n.offset()),
    }))
}

pub(super) fn implicit_timezone_fn(ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(single(tz_duration(implicit_tz(ctx))))
}

/// Date/time components shared by the `*-from-dateTime|date|time` accessors.
#[derive(Clone, Copy)]
pub(super) enum Component {
    Year,
    Month,
    Day,
    Hours,
    Minutes,
    Seconds,
    Timezone,
}

fn date_part(date: NaiveDate, c: Component) -> Option<XdmAtomicValue> {
    match c {
        Component::Year => Some(XdmAtomicValue::Integer(i64::from(date.year()))),
        Component::Month => Some(XdmAtomicValue::Integer(i64::from(date.month()))),
        Component::Day => Some(XdmAtomicValue::Integer(i64::from(date.day()))),
        _ => None,
    }
}

fn time_part(time: NaiveTime, c: Component) -> Option<XdmAtomicValue> {
    match c {
        Component::Hours => Some(XdmAtomicValue::Integer(i64::from(time.hour()))),
        Component::Minutes => Some(XdmAtomicValue::Integer(i64::from(time.minute()))),
        Component::Seconds => Some(XdmAtomicValue::Decimal(
            f64::from(time.second()) + f64::from(time.nanosecond() % 1_000_000_000) / 1e9,
        )),
        _ => None,
    }
}

/// Extract `component` from an `xs:dateTime`, `xs:date` or `xs:time` argument.
pub(super) fn component(args: &[Sequence], c: Component, what: &str) -> Result<Sequence, Error> {
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let part = match (&v, c) {
        (XdmAtomicValue::DateTime(dt), Component::Timezone) => Some(tz_duration(*dt.offset())),
        (XdmAtomicValue::DateTime(dt), _) => {
            date_part(dt.date_naive(), c).or_else(|| time_part(dt.time(), c))
        }
        (XdmAtomicValue::Date { tz, .. } | XdmAtomicValue::Time { tz, .. }, Component::Timezone) => {
            tz.map(tz_duration)
        }
        (XdmAtomicValue::Date { date, .. }, _) => date_part(*date, c),
        (XdmAtomicValue::Time { time, .. }, _) => time_part(*time, c),
        _ => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} does not accept {}", v.type_name()),
            ));
        }
    };
    Ok(part.map(single).unwrap_or_default())
}

#[derive(Clone, Copy)]
pub(super) enum DurationPart {
    Years,
    Months,
    Days,
    Hours,
    Minutes,
    Seconds,
}

pub(super) fn duration_part(args: &[Sequence], p: DurationPart, what: &str) -> Result<Sequence, Error> {
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let out = match v {
        XdmAtomicValue::YearMonthDuration(months) => match p {
            DurationPart::Years => XdmAtomicValue::Integer(i64::from(months / 12)),
            DurationPart::Months => XdmAtomicValue::Integer(i64::from(months % 12)),
            DurationPart::Seconds => XdmAtomicValue::Decimal(0.0),
            _ => XdmAtomicValue::Integer(0),
        },
        XdmAtomicValue::DayTimeDuration(ms) => match p {
            DurationPart::Days => XdmAtomicValue::Integer(ms / 86_400_000),
            DurationPart::Hours => XdmAtomicValue::Integer((ms / 3_600_000) % 24),
            DurationPart::Minutes => XdmAtomicValue::Integer((ms / 60_000) % 60),
            DurationPart::Seconds => XdmAtomicValue::Decimal((ms % 60_000) as f64 / 1000.0),
            _ => XdmAtomicValue::Integer(0),
        },
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} expects a duration, got {}", other.type_name()),
            ));
        }
    };
    Ok(single(out))
}

/// `fn:dateTime($date, $time)`; timezones must agree when both are present.
pub(super) fn date_time_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (Some(d), Some(t)) = (
        opt_atomic(&args[0], "fn:dateTime")?,
        opt_atomic(&args[1], "fn:dateTime")?,
    ) else {
        return Ok(Vec::new());
    };
    let (XdmAtomicValue::Date { date, tz: dtz }, XdmAtomicValue::Time { time, tz: ttz }) = (&d, &t)
    else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "fn:dateTime expects an xs:date and an xs:time",
        ));
    };
    let tz = match (dtz, ttz) {
        (Some(a), Some(b)) if a != b => {
            return Err(Error::from_code(
                ErrorCode::FORG0008,
                "fn:dateTime: date and time have different timezones",
            ));
        }
        (Some(a), _) | (None, Some(a)) => *a,
        (None, None) => utc(),
    };
    let dt = tz
        .from_local_datetime(&date.and_time(*time))
        .single()
        .ok_or_else(|| Error::from_code(ErrorCode::FODT0002, "fn:dateTime: value out of range"))?;
    Ok(single(XdmAtomicValue::DateTime(dt)))
}

/// Target timezone of an `adjust-*` call: the implicit one, an explicit one, or none.
fn target_tz(ctx: &CallCtx, args: &[Sequence], what: &str) -> Result<Option<FixedOffset>, Error> {
    let Some(arg) = args.get(1) else {
        return Ok(Some(implicit_tz(ctx)));
    };
    match opt_atomic(arg, what)? {
        None => Ok(None),
        Some(XdmAtomicValue::DayTimeDuration(ms)) => {
            if ms % 60_000 != 0 || ms.abs() > 14 * 3_600_000 {
                return Err(Error::from_code(
                    ErrorCode::FODT0003,
                    format!("{what}: invalid timezone offset"),
                ));
            }
            let secs = i32::try_from(ms / 1000).unwrap_or(0);
            Ok(FixedOffset::east_opt(secs))
        }
        Some(v) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects an xs:dayTimeDuration, got {}", v.type_name()),
        )),
    }
}

pub(super) fn adjust_date_time_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let what = "fn:adjust-dateTime-to-timezone";
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let XdmAtomicValue::DateTime(dt) = v else {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects an xs:dateTime")));
    };
    // A dateTime without timezone is stored in the implicit one; removing keeps local time.
    Ok(single(XdmAtomicValue::DateTime(match target_tz(ctx, args, what)? {
        Some(tz) => dt.with_timezone(&tz),
        None => utc()
            .from_local_datetime(&dt.naive_local())
            .single()
            .unwrap_or(dt),
    })))
}

pub(super) fn adjust_date_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let what = "fn:adjust-date-to-timezone";
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let XdmAtomicValue::Date { date, tz } = v else {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects an xs:date")));
    };
    let target = target_tz(ctx, args, what)?;
    let date = match (tz, target) {
        (Some(from), Some(to)) => from
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&to).date_naive())
            .unwrap_or(date),
        _ => date,
    };
    Ok(single(XdmAtomicValue::Date { date, tz: target }))
}

pub(super) fn adjust_time_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let what = "fn:adjust-time-to-timezone";
    let Some(v) = opt_atomic(&args[0], what)? else {
        return Ok(Vec::new());
    };
    let XdmAtomicValue::Time { time, tz } = v else {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects an xs:time")));
    };
    let target = target_tz(ctx, args, what)?;
    let time = match (tz, target) {
        (Some(from), Some(to)) => {
            let shift = i64::from(to.local_minus_utc() - from.local_minus_utc());
            time.overflowing_add_signed(chrono::Duration::seconds(shift)).0
        }
        _ => time,
    };
    Ok(single(XdmAtomicValue::Time { time, tz: target }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> Sequence {
        vec![crate::xdm::XdmItem::Atomic(XdmAtomicValue::DateTime(
            DateTime::parse_from_rfc3339(s).unwrap(),
        ))]
    }

    #[test]
    fn components_of_date_time() {
        let arg = [dt("2024-03-05T10:20:30.5+02:00")];
        let year = component(&arg, Component::Year, "year").unwrap();
        assert_eq!(year, single(XdmAtomicValue::Integer(2024)));
        let secs = component(&arg, Component::Seconds, "seconds").unwrap();
        assert_eq!(secs, single(XdmAtomicValue::Decimal(30.5)));
        let tz = component(&arg, Component::Timezone, "tz").unwrap();
        assert_eq!(tz, single(XdmAtomicValue::DayTimeDuration(7_200_000)));
    }

    #[test]
    fn duration_parts_are_normalized() {
        let arg = [vec![crate::xdm::XdmItem::Atomic(XdmAtomicValue::DayTimeDuration(
            90_061_500,
        ))]];
        assert_eq!(
            duration_part(&arg, DurationPart::Days, "d").unwrap(),
            single(XdmAtomicValue::Integer(1))
        );
        assert_eq!(
            duration_part(&arg, DurationPart::Hours, "h").unwrap(),
            single(XdmAtomicValue::Integer(1))
        );
        assert_eq!(
            duration_part(&arg, DurationPart::Seconds, "s").unwrap(),
            single(XdmAtomicValue::Decimal(1.5))
        );
    }
}
