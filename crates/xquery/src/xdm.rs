use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self {
            ns_uri,
            local: local.into(),
        }
    }

    pub fn ns(ns_uri: &str, local: impl Into<String>) -> Self {
        Self::new(Some(ns_uri.to_string()), local)
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local)
    }
}

/// Clark notation, `{ns}local`; the form used in duplicate-declaration messages.
impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) if !ns.is_empty() => write!(f, "{{{ns}}}{}", self.local),
            _ => f.write_str(&self.local),
        }
    }
}

/// The atomic value space handled by the engine.
///
/// `Decimal` is carried as `f64`; integer-valued decimals print without a fraction.
/// Durations are stored canonically: months for year-month, milliseconds for day-time.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f32),
    AnyUri(String),
    QName {
        ns_uri: Option<String>,
        prefix: Option<String>,
        local: String,
    },
    UntypedAtomic(String),
    DateTime(DateTime<FixedOffset>),
    Date {
        date: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        time: NaiveTime,
        tz: Option<FixedOffset>,
    },
    YearMonthDuration(i32),
    DayTimeDuration(i64),
    Base64Binary(String),
}

impl XdmAtomicValue {
    /// Name of the dynamic type in `xs:` notation.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "xs:boolean",
            Self::String(_) => "xs:string",
            Self::Integer(_) => "xs:integer",
            Self::Decimal(_) => "xs:decimal",
            Self::Double(_) => "xs:double",
            Self::Float(_) => "xs:float",
            Self::AnyUri(_) => "xs:anyURI",
            Self::QName { .. } => "xs:QName",
            Self::UntypedAtomic(_) => "xs:untypedAtomic",
            Self::DateTime(_) => "xs:dateTime",
            Self::Date { .. } => "xs:date",
            Self::Time { .. } => "xs:time",
            Self::YearMonthDuration(_) => "xs:yearMonthDuration",
            Self::DayTimeDuration(_) => "xs:dayTimeDuration",
            Self::Base64Binary(_) => "xs:base64Binary",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Integer(_) | Self::Decimal(_) | Self::Double(_) | Self::Float(_)
        )
    }

    /// Values that compare as strings: `xs:string`, `xs:anyURI` and untyped data.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::AnyUri(_) | Self::UntypedAtomic(_)
        )
    }

    /// Numeric value as `f64`, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Decimal(d) | Self::Double(d) => Some(*d),
            Self::Float(f) => Some(f64::from(*f)),
            _ => None,
        }
    }

    /// Canonical lexical form.
    pub fn string_value(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::String(s) | Self::AnyUri(s) | Self::UntypedAtomic(s) | Self::Base64Binary(s) => {
                s.clone()
            }
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => format_decimal(*d),
            Self::Double(d) => format_double(*d),
            Self::Float(f) => format_double(f64::from(*f)),
            Self::QName { prefix, local, .. } => match prefix {
                Some(p) if !p.is_empty() => format!("{p}:{local}"),
                _ => local.clone(),
            },
            Self::DateTime(dt) => {
                let base = dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
                format!("{base}{}", format_tz(Some(*dt.offset())))
            }
            Self::Date { date, tz } => format!("{}{}", date.format("%Y-%m-%d"), format_tz(*tz)),
            Self::Time { time, tz } => {
                format!("{}{}", time.format("%H:%M:%S%.f"), format_tz(*tz))
            }
            Self::YearMonthDuration(months) => format_year_month(*months),
            Self::DayTimeDuration(millis) => format_day_time(*millis),
        }
    }
}

fn format_tz(tz: Option<FixedOffset>) -> String {
    match tz {
        None => String::new(),
        Some(off) if off.local_minus_utc() == 0 => "Z".to_string(),
        Some(off) => {
            let secs = off.local_minus_utc();
            let sign = if secs < 0 { '-' } else { '+' };
            let secs = secs.abs();
            format!("{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
        }
    }
}

/// Canonical `xs:decimal` form: no exponent, no trailing zeros.
pub fn format_decimal(d: f64) -> String {
    if d == 0.0 {
        return "0".to_string();
    }
    if d.fract() == 0.0 && d.abs() < 1e18 {
        return format!("{d:.0}");
    }
    let s = format!("{d}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Canonical `xs:double` form: plain notation inside `[1e-6, 1e6)`, scientific outside.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let abs = d.abs();
    if (1e-6..1e6).contains(&abs) {
        return format_decimal(d);
    }
    let s = format!("{d:E}");
    match s.split_once('E') {
        Some((mantissa, exp)) if !mantissa.contains('.') => format!("{mantissa}.0E{exp}"),
        _ => s,
    }
}

fn format_year_month(months: i32) -> String {
    if months == 0 {
        return "P0M".to_string();
    }
    let sign = if months < 0 { "-" } else { "" };
    let m = months.unsigned_abs();
    let (y, rem) = (m / 12, m % 12);
    let mut out = format!("{sign}P");
    if y > 0 {
        out.push_str(&format!("{y}Y"));
    }
    if rem > 0 {
        out.push_str(&format!("{rem}M"));
    }
    out
}

fn format_day_time(millis: i64) -> String {
    if millis == 0 {
        return "PT0S".to_string();
    }
    let sign = if millis < 0 { "-" } else { "" };
    let total = millis.unsigned_abs();
    let days = total / 86_400_000;
    let hours = (total % 86_400_000) / 3_600_000;
    let minutes = (total % 3_600_000) / 60_000;
    let ms = total % 60_000;
    let mut out = format!("{sign}P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours > 0 || minutes > 0 || ms > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if ms > 0 {
            if ms % 1000 == 0 {
                out.push_str(&format!("{}S", ms / 1000));
            } else {
                let secs = format!("{}.{:03}", ms / 1000, ms % 1000);
                out.push_str(secs.trim_end_matches('0'));
                out.push('S');
            }
        }
    }
    out
}

pub type XdmSequence<N> = Vec<XdmItem<N>>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem<N> {
    Node(N),
    Atomic(XdmAtomicValue),
}

impl<N> XdmItem<N> {
    pub fn as_node(&self) -> Option<&N> {
        match self {
            Self::Node(n) => Some(n),
            Self::Atomic(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

impl<N> From<XdmAtomicValue> for XdmItem<N> {
    fn from(v: XdmAtomicValue) -> Self {
        Self::Atomic(v)
    }
}

impl<N> fmt::Display for XdmItem<N>
where
    N: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => write!(f, "{n:?}"),
            XdmItem::Atomic(a) => f.write_str(&a.string_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_use_canonical_lexical_forms() {
        assert_eq!(XdmAtomicValue::Decimal(62.0).string_value(), "62");
        assert_eq!(XdmAtomicValue::Decimal(0.5).string_value(), "0.5");
        assert_eq!(XdmAtomicValue::Double(1e7).string_value(), "1.0E7");
        assert_eq!(XdmAtomicValue::Double(1.5e-7).string_value(), "1.5E-7");
        assert_eq!(XdmAtomicValue::Double(f64::NAN).string_value(), "NaN");
        assert_eq!(XdmAtomicValue::Double(f64::NEG_INFINITY).string_value(), "-INF");
        assert_eq!(XdmAtomicValue::Double(300.0).string_value(), "300");
    }

    #[test]
    fn durations_print_canonically() {
        assert_eq!(XdmAtomicValue::YearMonthDuration(14).string_value(), "P1Y2M");
        assert_eq!(XdmAtomicValue::DayTimeDuration(90_061_500).string_value(), "P1DT1H1M1.5S");
        assert_eq!(XdmAtomicValue::DayTimeDuration(0).string_value(), "PT0S");
    }

    #[test]
    fn expanded_name_uses_clark_notation() {
        let n = ExpandedName::ns("http://example.com/impl", "f1");
        assert_eq!(format!("{n}#1"), "{http://example.com/impl}f1#1");
    }
}
