use super::common::{
    boolean, collation_arg, integer, opt_atomic, opt_number, single, string, string_arg, strings,
};
use crate::engine::collation::is_codepoint;
use crate::engine::sequence::atomize;
use crate::runtime::{CallCtx, Error, ErrorCode, Sequence};
use crate::xdm::{XdmAtomicValue, XdmItem};
use core::cmp::Ordering;
use unicode_normalization::UnicodeNormalization;

pub(super) fn string_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = match args[0].as_slice() {
        [] => String::new(),
        [XdmItem::Node(n)] => crate::model::XdmNode::string_value(n),
        [XdmItem::Atomic(a)] => a.string_value(),
        more => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("fn:string expects at most one item, got {}", more.len()),
            ));
        }
    };
    Ok(string(s))
}

pub(super) fn data_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(atomize(&args[0]).into_iter().map(XdmItem::Atomic).collect())
}

pub(super) fn concat_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let mut out = String::new();
    for a in args {
        out.push_str(&string_arg(a, "fn:concat")?);
    }
    Ok(string(out))
}

pub(super) fn string_join_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let sep = match args.get(1) {
        Some(s) => string_arg(s, "fn:string-join")?,
        None => String::new(),
    };
    Ok(string(strings(&args[0]).join(&sep)))
}

/// XPath `substring` rounding: characters at positions `p` with
/// `round(start) <= p < round(start) + round(length)`.
pub(super) fn substring_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:substring")?;
    let start = opt_number(&args[1], "fn:substring")?.unwrap_or(f64::NAN).round();
    let end = match args.get(2) {
        Some(len) => start + opt_number(len, "fn:substring")?.unwrap_or(f64::NAN).round(),
        None => f64::INFINITY,
    };
    if start.is_nan() || end.is_nan() {
        return Ok(string(""));
    }
    let out: String = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(string(out))
}

pub(super) fn string_length_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(integer(string_arg(&args[0], "fn:string-length")?.chars().count()))
}

pub(super) fn normalize_space_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:normalize-space")?;
    Ok(string(s.split_whitespace().collect::<Vec<_>>().join(" ")))
}

pub(super) fn upper_case_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(string(string_arg(&args[0], "fn:upper-case")?.to_uppercase()))
}

pub(super) fn lower_case_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    Ok(string(string_arg(&args[0], "fn:lower-case")?.to_lowercase()))
}

pub(super) fn translate_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:translate")?;
    let from: Vec<char> = string_arg(&args[1], "fn:translate")?.chars().collect();
    let to: Vec<char> = string_arg(&args[2], "fn:translate")?.chars().collect();
    let out: String = s
        .chars()
        .filter_map(|c| match from.iter().position(|f| *f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect();
    Ok(string(out))
}

/// Keys of both strings under the requested collation.
fn collated(ctx: &CallCtx, args: &[Sequence], what: &str) -> Result<(String, String), Error> {
    let a = string_arg(&args[0], what)?;
    let b = string_arg(&args[1], what)?;
    let coll = collation_arg(ctx, args, 2)?;
    if is_codepoint(coll.as_ref()) {
        Ok((a, b))
    } else {
        Ok((coll.key(&a), coll.key(&b)))
    }
}

pub(super) fn contains_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (a, b) = collated(ctx, args, "fn:contains")?;
    Ok(boolean(a.contains(&b)))
}

pub(super) fn starts_with_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (a, b) = collated(ctx, args, "fn:starts-with")?;
    Ok(boolean(a.starts_with(&b)))
}

pub(super) fn ends_with_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (a, b) = collated(ctx, args, "fn:ends-with")?;
    Ok(boolean(a.ends_with(&b)))
}

pub(super) fn substring_before_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (a, b) = collated(ctx, args, "fn:substring-before")?;
    Ok(string(a.find(&b).map(|i| a[..i].to_string()).unwrap_or_default()))
}

pub(super) fn substring_after_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (a, b) = collated(ctx, args, "fn:substring-after")?;
    Ok(string(
        a.find(&b).map(|i| a[i + b.len()..].to_string()).unwrap_or_default(),
    ))
}

pub(super) fn compare_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (Some(a), Some(b)) = (
        opt_atomic(&args[0], "fn:compare")?,
        opt_atomic(&args[1], "fn:compare")?,
    ) else {
        return Ok(Vec::new());
    };
    let coll = collation_arg(ctx, args, 2)?;
    let ord = match coll.compare(&a.string_value(), &b.string_value()) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    };
    Ok(single(XdmAtomicValue::Integer(ord)))
}

pub(super) fn codepoint_equal_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let (Some(a), Some(b)) = (
        opt_atomic(&args[0], "fn:codepoint-equal")?,
        opt_atomic(&args[1], "fn:codepoint-equal")?,
    ) else {
        return Ok(Vec::new());
    };
    Ok(boolean(a.string_value() == b.string_value()))
}

pub(super) fn string_to_codepoints_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:string-to-codepoints")?;
    Ok(s.chars()
        .map(|c| XdmItem::Atomic(XdmAtomicValue::Integer(i64::from(u32::from(c)))))
        .collect())
}

pub(super) fn codepoints_to_string_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let mut out = String::new();
    for item in &args[0] {
        let XdmItem::Atomic(XdmAtomicValue::Integer(i)) = item else {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "fn:codepoints-to-string expects xs:integer*",
            ));
        };
        let c = u32::try_from(*i)
            .ok()
            .filter(|cp| is_xml_char(*cp))
            .and_then(char::from_u32)
            .ok_or_else(|| {
                Error::from_code(ErrorCode::FOCH0001, format!("{i} is not a valid code point"))
            })?;
        out.push(c);
    }
    Ok(string(out))
}

fn is_xml_char(cp: u32) -> bool {
    matches!(cp, 0x9 | 0xA | 0xD | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x10000..=0x10_FFFF)
}

pub(super) fn normalize_unicode_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:normalize-unicode")?;
    let form = match args.get(1) {
        Some(f) => string_arg(f, "fn:normalize-unicode")?.trim().to_uppercase(),
        None => "NFC".to_string(),
    };
    let out = match form.as_str() {
        "" => s,
        "NFC" => s.nfc().collect(),
        "NFD" => s.nfd().collect(),
        "NFKC" => s.nfkc().collect(),
        "NFKD" => s.nfkd().collect(),
        other => {
            return Err(Error::from_code(
                ErrorCode::FOCH0003,
                format!("unsupported normalization form '{other}'"),
            ));
        }
    };
    Ok(string(out))
}

fn percent_encode(s: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if keep(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        }
    }
    out
}

pub(super) fn encode_for_uri_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:encode-for-uri")?;
    Ok(string(percent_encode(&s, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
    })))
}

pub(super) fn iri_to_uri_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:iri-to-uri")?;
    Ok(string(percent_encode(&s, |c| {
        c.is_ascii() && !c.is_ascii_control() && !matches!(c, ' ' | '<' | '>' | '"' | '{' | '}' | '|' | '\\' | '^' | '`')
    })))
}

pub(super) fn escape_html_uri_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let s = string_arg(&args[0], "fn:escape-html-uri")?;
    Ok(string(percent_encode(&s, |c| (' '..='~').contains(&c))))
}

fn flags_arg(args: &[Sequence], index: usize, what: &str) -> Result<String, Error> {
    match args.get(index) {
        Some(f) => string_arg(f, what),
        None => Ok(String::new()),
    }
}

pub(super) fn matches_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let input = string_arg(&args[0], "fn:matches")?;
    let pattern = string_arg(&args[1], "fn:matches")?;
    let flags = flags_arg(args, 2, "fn:matches")?;
    Ok(boolean(ctx.regex().matches(&pattern, &flags, &input)?))
}

pub(super) fn replace_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let input = string_arg(&args[0], "fn:replace")?;
    let pattern = string_arg(&args[1], "fn:replace")?;
    let replacement = string_arg(&args[2], "fn:replace")?;
    let flags = flags_arg(args, 3, "fn:replace")?;
    Ok(string(ctx.regex().replace(&pattern, &flags, &input, &replacement)?))
}

pub(super) fn tokenize_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence, Error> {
    let input = string_arg(&args[0], "fn:tokenize")?;
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = string_arg(&args[1], "fn:tokenize")?;
    let flags = flags_arg(args, 2, "fn:tokenize")?;
    Ok(ctx
        .regex()
        .tokenize(&pattern, &flags, &input)?
        .into_iter()
        .map(|t| XdmItem::Atomic(XdmAtomicValue::String(t)))
        .collect())
}
