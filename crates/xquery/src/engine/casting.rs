//! Atomic types, `cast as` and lexical parsing of atomic values.
//!
//! Types derived from `xs:integer` and `xs:string` are checked on cast but
//! carried as plain `Integer` / `String` values.

use crate::consts::XS;
use crate::runtime::{Error, ErrorCode, StaticContext};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegative,
    Positive,
    NonPositive,
    Negative,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
}

impl IntKind {
    /// Inclusive value range.
    pub fn bounds(self) -> (i128, i128) {
        match self {
            Self::Integer | Self::Long => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Self::Int => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Self::Short => (i128::from(i16::MIN), i128::from(i16::MAX)),
            Self::Byte => (i128::from(i8::MIN), i128::from(i8::MAX)),
            Self::NonNegative | Self::UnsignedLong => (0, i128::from(i64::MAX)),
            Self::Positive => (1, i128::from(i64::MAX)),
            Self::NonPositive => (i128::from(i64::MIN), 0),
            Self::Negative => (i128::from(i64::MIN), -1),
            Self::UnsignedInt => (0, i128::from(u32::MAX)),
            Self::UnsignedShort => (0, i128::from(u16::MAX)),
            Self::UnsignedByte => (0, i128::from(u8::MAX)),
        }
    }

    fn contains(self, v: i128) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrKind {
    String,
    NormalizedString,
    Token,
    Language,
    NmToken,
    Name,
    NcName,
    Id,
    IdRef,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    UntypedAtomic,
    Str(StrKind),
    Boolean,
    Decimal,
    Integer(IntKind),
    Double,
    Float,
    AnyUri,
    QName,
    Notation,
    DateTime,
    Date,
    Time,
    YearMonthDuration,
    DayTimeDuration,
    Base64Binary,
}

impl AtomicType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Integer(_) | Self::Double | Self::Float
        )
    }
}

/// Resolve an `xs:` type name.
pub fn lookup_type(name: &ExpandedName) -> Option<AtomicType> {
    if name.ns_uri.as_deref() != Some(XS) {
        return None;
    }
    Some(match name.local.as_str() {
        "anyAtomicType" => AtomicType::AnyAtomic,
        "untypedAtomic" => AtomicType::UntypedAtomic,
        "string" => AtomicType::Str(StrKind::String),
        "normalizedString" => AtomicType::Str(StrKind::NormalizedString),
        "token" => AtomicType::Str(StrKind::Token),
        "language" => AtomicType::Str(StrKind::Language),
        "NMTOKEN" => AtomicType::Str(StrKind::NmToken),
        "Name" => AtomicType::Str(StrKind::Name),
        "NCName" => AtomicType::Str(StrKind::NcName),
        "ID" => AtomicType::Str(StrKind::Id),
        "IDREF" => AtomicType::Str(StrKind::IdRef),
        "ENTITY" => AtomicType::Str(StrKind::Entity),
        "boolean" => AtomicType::Boolean,
        "decimal" => AtomicType::Decimal,
        "integer" => AtomicType::Integer(IntKind::Integer),
        "long" => AtomicType::Integer(IntKind::Long),
        "int" => AtomicType::Integer(IntKind::Int),
        "short" => AtomicType::Integer(IntKind::Short),
        "byte" => AtomicType::Integer(IntKind::Byte),
        "nonNegativeInteger" => AtomicType::Integer(IntKind::NonNegative),
        "positiveInteger" => AtomicType::Integer(IntKind::Positive),
        "nonPositiveInteger" => AtomicType::Integer(IntKind::NonPositive),
        "negativeInteger" => AtomicType::Integer(IntKind::Negative),
        "unsignedLong" => AtomicType::Integer(IntKind::UnsignedLong),
        "unsignedInt" => AtomicType::Integer(IntKind::UnsignedInt),
        "unsignedShort" => AtomicType::Integer(IntKind::UnsignedShort),
        "unsignedByte" => AtomicType::Integer(IntKind::UnsignedByte),
        "double" => AtomicType::Double,
        "float" => AtomicType::Float,
        "anyURI" => AtomicType::AnyUri,
        "QName" => AtomicType::QName,
        "NOTATION" => AtomicType::Notation,
        "dateTime" => AtomicType::DateTime,
        "date" => AtomicType::Date,
        "time" => AtomicType::Time,
        "yearMonthDuration" => AtomicType::YearMonthDuration,
        "dayTimeDuration" => AtomicType::DayTimeDuration,
        "base64Binary" => AtomicType::Base64Binary,
        _ => return None,
    })
}

/// Dynamic type of a value.
pub fn type_of(v: &XdmAtomicValue) -> AtomicType {
    match v {
        XdmAtomicValue::Boolean(_) => AtomicType::Boolean,
        XdmAtomicValue::String(_) => AtomicType::Str(StrKind::String),
        XdmAtomicValue::Integer(_) => AtomicType::Integer(IntKind::Integer),
        XdmAtomicValue::Decimal(_) => AtomicType::Decimal,
        XdmAtomicValue::Double(_) => AtomicType::Double,
        XdmAtomicValue::Float(_) => AtomicType::Float,
        XdmAtomicValue::AnyUri(_) => AtomicType::AnyUri,
        XdmAtomicValue::QName { .. } => AtomicType::QName,
        XdmAtomicValue::UntypedAtomic(_) => AtomicType::UntypedAtomic,
        XdmAtomicValue::DateTime(_) => AtomicType::DateTime,
        XdmAtomicValue::Date { .. } => AtomicType::Date,
        XdmAtomicValue::Time { .. } => AtomicType::Time,
        XdmAtomicValue::YearMonthDuration(_) => AtomicType::YearMonthDuration,
        XdmAtomicValue::DayTimeDuration(_) => AtomicType::DayTimeDuration,
        XdmAtomicValue::Base64Binary(_) => AtomicType::Base64Binary,
    }
}

/// `value instance of target` for a single atomic value.
pub fn value_matches(v: &XdmAtomicValue, target: AtomicType) -> bool {
    match (target, v) {
        (AtomicType::AnyAtomic, _) => true,
        (AtomicType::Decimal, XdmAtomicValue::Integer(_)) => true,
        (AtomicType::Integer(kind), XdmAtomicValue::Integer(i)) => kind.contains(i128::from(*i)),
        (AtomicType::Str(StrKind::String), XdmAtomicValue::String(_)) => true,
        (AtomicType::Str(kind), XdmAtomicValue::String(s)) => derived_string_valid(kind, s),
        _ => type_of(v) == target,
    }
}

/// What a cast needs besides the value: the implicit timezone and in-scope prefixes.
#[derive(Clone, Copy)]
pub struct CastEnv<'a> {
    pub implicit_timezone: FixedOffset,
    pub static_ctx: Option<&'a StaticContext>,
}

impl Default for CastEnv<'_> {
    fn default() -> Self {
        Self {
            implicit_timezone: utc(),
            static_ctx: None,
        }
    }
}

pub(crate) fn utc() -> FixedOffset {
    Utc.fix()
}

fn invalid(v: &str, target: &str) -> Error {
    Error::from_code(
        ErrorCode::FORG0001,
        format!("cannot convert '{v}' to {target}"),
    )
}

fn not_castable(v: &XdmAtomicValue, target: AtomicType) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("cannot cast {} to {target:?}", v.type_name()),
    )
}

/// `value cast as target`.
pub fn cast(v: &XdmAtomicValue, target: AtomicType, env: CastEnv<'_>) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    match target {
        AtomicType::AnyAtomic | AtomicType::Notation => Err(Error::from_code(
            ErrorCode::XPST0080,
            "cannot cast to an abstract type",
        )),
        AtomicType::UntypedAtomic => Ok(V::UntypedAtomic(v.string_value())),
        AtomicType::Str(StrKind::String) => Ok(V::String(v.string_value())),
        AtomicType::Str(kind) => {
            let s = normalize_for(kind, &v.string_value());
            if derived_string_valid(kind, &s) {
                Ok(V::String(s))
            } else {
                Err(invalid(&s, &format!("{kind:?}")))
            }
        }
        AtomicType::Boolean => match v {
            V::Boolean(b) => Ok(V::Boolean(*b)),
            V::String(s) | V::UntypedAtomic(s) => parse_boolean(s).map(V::Boolean),
            other if other.is_numeric() => {
                let f = other.as_f64().unwrap_or(0.0);
                Ok(V::Boolean(f != 0.0 && !f.is_nan()))
            }
            other => Err(not_castable(other, target)),
        },
        AtomicType::Double => match v {
            V::String(s) | V::UntypedAtomic(s) => parse_double(s).map(V::Double),
            V::Boolean(b) => Ok(V::Double(if *b { 1.0 } else { 0.0 })),
            other if other.is_numeric() => Ok(V::Double(other.as_f64().unwrap_or(f64::NAN))),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Float => match v {
            #[allow(clippy::cast_possible_truncation)]
            V::String(s) | V::UntypedAtomic(s) => parse_double(s).map(|d| V::Float(d as f32)),
            V::Boolean(b) => Ok(V::Float(if *b { 1.0 } else { 0.0 })),
            V::Float(f) => Ok(V::Float(*f)),
            #[allow(clippy::cast_possible_truncation)]
            other if other.is_numeric() => Ok(V::Float(other.as_f64().unwrap_or(f64::NAN) as f32)),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Decimal => match v {
            V::String(s) | V::UntypedAtomic(s) => parse_decimal(s).map(V::Decimal),
            V::Boolean(b) => Ok(V::Decimal(if *b { 1.0 } else { 0.0 })),
            other if other.is_numeric() => {
                let f = other.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() {
                    Ok(V::Decimal(f))
                } else {
                    Err(Error::from_code(
                        ErrorCode::FOCA0002,
                        format!("cannot cast {} to xs:decimal", other.string_value()),
                    ))
                }
            }
            other => Err(not_castable(other, target)),
        },
        AtomicType::Integer(kind) => {
            let i: i128 = match v {
                V::String(s) | V::UntypedAtomic(s) => parse_integer(s)?,
                V::Boolean(b) => i128::from(*b),
                V::Integer(i) => i128::from(*i),
                other if other.is_numeric() => {
                    let f = other.as_f64().unwrap_or(f64::NAN);
                    if !f.is_finite() {
                        return Err(Error::from_code(
                            ErrorCode::FOCA0002,
                            format!("cannot cast {} to xs:integer", other.string_value()),
                        ));
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let t = f.trunc() as i128;
                    t
                }
                other => return Err(not_castable(other, target)),
            };
            if !kind.contains(i) {
                return Err(invalid(&i.to_string(), &format!("{kind:?}")));
            }
            i64::try_from(i)
                .map(V::Integer)
                .map_err(|_| Error::from_code(ErrorCode::FOAR0002, "integer overflow"))
        }
        AtomicType::AnyUri => match v {
            V::String(s) | V::UntypedAtomic(s) | V::AnyUri(s) => Ok(V::AnyUri(s.trim().to_string())),
            other => Err(not_castable(other, target)),
        },
        AtomicType::QName => match v {
            V::QName { .. } => Ok(v.clone()),
            V::String(s) | V::UntypedAtomic(s) => parse_qname(s.trim(), env),
            other => Err(not_castable(other, target)),
        },
        AtomicType::DateTime => match v {
            V::DateTime(dt) => Ok(V::DateTime(*dt)),
            V::Date { date, tz } => {
                let offset = tz.unwrap_or(env.implicit_timezone);
                offset
                    .from_local_datetime(&date.and_time(NaiveTime::MIN))
                    .single()
                    .map(V::DateTime)
                    .ok_or_else(|| invalid(&v.string_value(), "xs:dateTime"))
            }
            V::String(s) | V::UntypedAtomic(s) => parse_date_time(s, env.implicit_timezone).map(V::DateTime),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Date => match v {
            V::Date { .. } => Ok(v.clone()),
            V::DateTime(dt) => Ok(V::Date {
                date: dt.date_naive(),
                tz: Some(*dt.offset()),
            }),
            V::String(s) | V::UntypedAtomic(s) => parse_date(s).map(|(date, tz)| V::Date { date, tz }),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Time => match v {
            V::Time { .. } => Ok(v.clone()),
            V::DateTime(dt) => Ok(V::Time {
                time: dt.time(),
                tz: Some(*dt.offset()),
            }),
            V::String(s) | V::UntypedAtomic(s) => parse_time(s).map(|(time, tz)| V::Time { time, tz }),
            other => Err(not_castable(other, target)),
        },
        AtomicType::YearMonthDuration => match v {
            V::YearMonthDuration(m) => Ok(V::YearMonthDuration(*m)),
            V::DayTimeDuration(_) => Ok(V::YearMonthDuration(0)),
            V::String(s) | V::UntypedAtomic(s) => {
                let d = parse_duration(s)?;
                if d.has_day_time {
                    return Err(invalid(s, "xs:yearMonthDuration"));
                }
                Ok(V::YearMonthDuration(d.months))
            }
            other => Err(not_castable(other, target)),
        },
        AtomicType::DayTimeDuration => match v {
            V::DayTimeDuration(ms) => Ok(V::DayTimeDuration(*ms)),
            V::YearMonthDuration(_) => Ok(V::DayTimeDuration(0)),
            V::String(s) | V::UntypedAtomic(s) => {
                let d = parse_duration(s)?;
                if d.has_year_month {
                    return Err(invalid(s, "xs:dayTimeDuration"));
                }
                Ok(V::DayTimeDuration(d.millis))
            }
            other => Err(not_castable(other, target)),
        },
        AtomicType::Base64Binary => match v {
            V::Base64Binary(b) => Ok(V::Base64Binary(b.clone())),
            V::String(s) | V::UntypedAtomic(s) => {
                let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|_| invalid(s, "xs:base64Binary"))?;
                Ok(V::Base64Binary(compact))
            }
            other => Err(not_castable(other, target)),
        },
    }
}

pub fn castable(v: &XdmAtomicValue, target: AtomicType, env: CastEnv<'_>) -> bool {
    cast(v, target, env).is_ok()
}

fn normalize_for(kind: StrKind, s: &str) -> String {
    match kind {
        StrKind::String => s.to_string(),
        StrKind::NormalizedString => s.replace(['\t', '\n', '\r'], " "),
        _ => s.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || matches!(c, '-' | '.' | '\u{B7}')
}

pub fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if is_name_start(c) && c != ':') && chars.all(|c| is_name_char(c) && c != ':')
}

fn derived_string_valid(kind: StrKind, s: &str) -> bool {
    match kind {
        StrKind::String => true,
        StrKind::NormalizedString => !s.contains(['\t', '\n', '\r']),
        StrKind::Token => normalize_for(StrKind::Token, s) == s,
        StrKind::Language => {
            let mut parts = s.split('-');
            parts.next().is_some_and(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()))
                && parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
        }
        StrKind::NmToken => !s.is_empty() && s.chars().all(is_name_char),
        StrKind::Name => {
            let mut chars = s.chars();
            matches!(chars.next(), Some(c) if is_name_start(c)) && chars.all(is_name_char)
        }
        StrKind::NcName | StrKind::Id | StrKind::IdRef | StrKind::Entity => is_ncname(s),
    }
}

pub fn parse_boolean(s: &str) -> Result<bool, Error> {
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(invalid(other, "xs:boolean")),
    }
}

pub fn parse_double(s: &str) -> Result<f64, Error> {
    let t = s.trim();
    match t {
        "INF" | "+INF" => return Ok(f64::INFINITY),
        "-INF" => return Ok(f64::NEG_INFINITY),
        "NaN" => return Ok(f64::NAN),
        _ => {}
    }
    let valid = !t.is_empty()
        && t.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && t.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return Err(invalid(t, "xs:double"));
    }
    t.parse::<f64>().map_err(|_| invalid(t, "xs:double"))
}

pub fn parse_decimal(s: &str) -> Result<f64, Error> {
    let t = s.trim();
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    let valid = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|c| *c == '.').count() <= 1
        && body.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return Err(invalid(t, "xs:decimal"));
    }
    t.parse::<f64>().map_err(|_| invalid(t, "xs:decimal"))
}

pub fn parse_integer(s: &str) -> Result<i128, Error> {
    let t = s.trim();
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(t, "xs:integer"));
    }
    t.parse::<i128>().map_err(|_| invalid(t, "xs:integer"))
}

fn parse_qname(s: &str, env: CastEnv<'_>) -> Result<XdmAtomicValue, Error> {
    let (prefix, local) = match s.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, s),
    };
    if !is_ncname(local) || prefix.is_some_and(|p| !is_ncname(p)) {
        return Err(invalid(s, "xs:QName"));
    }
    let ns_uri = match prefix {
        Some(p) => {
            let resolved = env.static_ctx.and_then(|ctx| ctx.resolve_prefix(p));
            match resolved {
                Some(uri) => Some(uri.to_string()),
                None => {
                    return Err(Error::from_code(
                        ErrorCode::FONS0004,
                        format!("no namespace is bound to prefix '{p}'"),
                    ));
                }
            }
        }
        None => env
            .static_ctx
            .and_then(|ctx| ctx.default_element_namespace.clone()),
    };
    Ok(XdmAtomicValue::QName {
        ns_uri,
        prefix: prefix.map(str::to_string),
        local: local.to_string(),
    })
}

/// Split a trailing timezone (`Z`, `+hh:mm`, `-hh:mm`) off a lexical value.
fn split_tz(s: &str) -> Result<(&str, Option<FixedOffset>), Error> {
    if let Some(rest) = s.strip_suffix('Z') {
        return Ok((rest, Some(utc())));
    }
    if s.len() > 6 {
        let (head, tail) = s.split_at(s.len() - 6);
        let bytes = tail.as_bytes();
        if matches!(bytes[0], b'+' | b'-') && bytes[3] == b':' {
            let hours: i32 = tail[1..3].parse().map_err(|_| invalid(s, "timezone"))?;
            let minutes: i32 = tail[4..6].parse().map_err(|_| invalid(s, "timezone"))?;
            if hours > 14 || minutes > 59 {
                return Err(invalid(s, "timezone"));
            }
            let secs = (hours * 3600 + minutes * 60) * if bytes[0] == b'-' { -1 } else { 1 };
            return Ok((head, FixedOffset::east_opt(secs)));
        }
    }
    Ok((s, None))
}

pub fn parse_date(s: &str) -> Result<(NaiveDate, Option<FixedOffset>), Error> {
    let t = s.trim();
    let (body, tz) = split_tz(t)?;
    let date = NaiveDate::parse_from_str(body, "%Y-%m-%d").map_err(|_| invalid(t, "xs:date"))?;
    Ok((date, tz))
}

fn parse_naive_time(body: &str, original: &str) -> Result<(NaiveTime, bool), Error> {
    if body == "24:00:00" || body.starts_with("24:00:00.") && body[9..].chars().all(|c| c == '0') {
        return Ok((NaiveTime::MIN, true));
    }
    NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
        .map(|t| (t, false))
        .map_err(|_| invalid(original, "xs:time"))
}

pub fn parse_time(s: &str) -> Result<(NaiveTime, Option<FixedOffset>), Error> {
    let t = s.trim();
    let (body, tz) = split_tz(t)?;
    let (time, _) = parse_naive_time(body, t)?;
    Ok((time, tz))
}

pub fn parse_date_time(s: &str, implicit: FixedOffset) -> Result<DateTime<FixedOffset>, Error> {
    let t = s.trim();
    let (body, tz) = split_tz(t)?;
    let Some((date_part, time_part)) = body.split_once('T') else {
        return Err(invalid(t, "xs:dateTime"));
    };
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid(t, "xs:dateTime"))?;
    let (time, next_day) = parse_naive_time(time_part, t)?;
    let mut naive = NaiveDateTime::new(date, time);
    if next_day {
        naive += chrono::Duration::days(1);
    }
    tz.unwrap_or(implicit)
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| invalid(t, "xs:dateTime"))
}

pub struct ParsedDuration {
    pub months: i32,
    pub millis: i64,
    pub has_year_month: bool,
    pub has_day_time: bool,
}

/// Parse `-?PnYnMnDTnHnMn.nS`.
pub fn parse_duration(s: &str) -> Result<ParsedDuration, Error> {
    let t = s.trim();
    let err = || invalid(t, "xs:duration");
    let (negative, rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t),
    };
    let rest = rest.strip_prefix('P').ok_or_else(err)?;
    if rest.is_empty() || rest.ends_with('T') {
        return Err(err());
    }
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, tp)) => (d, Some(tp)),
        None => (rest, None),
    };
    let mut out = ParsedDuration {
        months: 0,
        millis: 0,
        has_year_month: false,
        has_day_time: false,
    };
    let mut num = String::new();
    let mut seen = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        if num.is_empty() || seen.contains(c) {
            return Err(err());
        }
        let n: i64 = num.parse().map_err(|_| err())?;
        num.clear();
        seen.push(c);
        match c {
            'Y' => {
                out.months += i32::try_from(n * 12).map_err(|_| err())?;
                out.has_year_month = true;
            }
            'M' => {
                out.months += i32::try_from(n).map_err(|_| err())?;
                out.has_year_month = true;
            }
            'D' => {
                out.millis += n * 86_400_000;
                out.has_day_time = true;
            }
            _ => return Err(err()),
        }
    }
    if !num.is_empty() {
        return Err(err());
    }
    if let Some(tp) = time_part {
        seen.clear();
        for c in tp.chars() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                continue;
            }
            if num.is_empty() || seen.contains(c) {
                return Err(err());
            }
            seen.push(c);
            out.has_day_time = true;
            match c {
                'H' => out.millis += num.parse::<i64>().map_err(|_| err())? * 3_600_000,
                'M' => out.millis += num.parse::<i64>().map_err(|_| err())? * 60_000,
                'S' => {
                    let secs: f64 = num.parse().map_err(|_| err())?;
                    #[allow(clippy::cast_possible_truncation)]
                    let ms = (secs * 1000.0).round() as i64;
                    out.millis += ms;
                }
                _ => return Err(err()),
            }
            num.clear();
        }
        if !num.is_empty() {
            return Err(err());
        }
    }
    if negative {
        out.months = -out.months;
        out.millis = -out.millis;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xs(local: &str) -> AtomicType {
        lookup_type(&ExpandedName::ns(XS, local)).unwrap()
    }

    #[test]
    fn derived_integers_check_their_range() {
        let env = CastEnv::default();
        let v = XdmAtomicValue::String("300".into());
        assert!(cast(&v, xs("int"), env).is_ok());
        assert_eq!(
            cast(&v, xs("byte"), env).unwrap_err().code_enum(),
            ErrorCode::FORG0001
        );
        assert!(value_matches(&XdmAtomicValue::Integer(5), xs("decimal")));
    }

    #[test]
    fn double_to_int_truncates() {
        let env = CastEnv::default();
        let r = cast(&XdmAtomicValue::Double(42.9), xs("int"), env).unwrap();
        assert_eq!(r, XdmAtomicValue::Integer(42));
        let err = cast(&XdmAtomicValue::Double(f64::NAN), xs("integer"), env).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOCA0002);
    }

    #[test]
    fn durations_parse() {
        let d = parse_duration("P1Y2M").unwrap();
        assert_eq!(d.months, 14);
        let d = parse_duration("-P1DT1H30M0.5S").unwrap();
        assert_eq!(d.millis, -(86_400_000 + 5_400_000 + 500));
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("P1DT").is_err());
    }

    #[test]
    fn date_times_keep_their_timezone() {
        let dt = parse_date_time("2024-02-29T10:00:00+02:00", utc()).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7200);
        let (d, tz) = parse_date("2024-01-01Z").unwrap();
        assert_eq!(d.to_string(), "2024-01-01");
        assert_eq!(tz, Some(utc()));
        assert!(parse_date("2024-13-01").is_err());
    }

    #[test]
    fn string_subtypes_validate() {
        let env = CastEnv::default();
        assert!(cast(&XdmAtomicValue::String("a b".into()), xs("NCName"), env).is_err());
        assert_eq!(
            cast(&XdmAtomicValue::String("  a   b ".into()), xs("token"), env).unwrap(),
            XdmAtomicValue::String("a b".into())
        );
    }
}
