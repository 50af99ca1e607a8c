use anyhow::{Context, anyhow};
use std::fs;
use std::path::Path;
use sylva_xquery::{ExpandedName, Sequence, XdmAtomicValue, XdmItem};

pub type CliResult<T> = anyhow::Result<T>;

/// Split `NAME=VALUE`.
pub fn parse_assignment(value: &str) -> CliResult<(&str, &str)> {
    match value.split_once('=') {
        Some((name, v)) if !name.trim().is_empty() => Ok((name.trim(), v)),
        _ => Err(anyhow!("expected NAME=VALUE, got '{value}'")),
    }
}

/// External variable bindings from `--var name=value`; `{uri}local` names a namespaced variable.
pub fn parse_bindings(values: &[String]) -> CliResult<Vec<(ExpandedName, Sequence)>> {
    values
        .iter()
        .map(|v| {
            let (name, value) = parse_assignment(v)?;
            let name = match name.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
                Some((uri, local)) => ExpandedName::new(Some(uri.to_string()), local),
                None => ExpandedName::new(None, name),
            };
            Ok((name, vec![XdmItem::Atomic(XdmAtomicValue::String(value.to_string()))]))
        })
        .collect()
}

pub fn read_text(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a=1", ("a", "1"))]
    #[case("a=", ("a", ""))]
    #[case(" key =x=y", ("key", "x=y"))]
    fn assignments_split_on_the_first_equals(#[case] input: &str, #[case] expected: (&str, &str)) {
        assert_eq!(parse_assignment(input).expect("assignment"), expected);
    }

    #[rstest]
    #[case("novalue")]
    #[case("=1")]
    fn malformed_assignments_are_rejected(#[case] input: &str) {
        assert!(parse_assignment(input).is_err());
    }

    #[rstest]
    fn namespaced_bindings() {
        let bindings = parse_bindings(&["{urn:x}limit=5".to_string()]).expect("bindings");
        assert_eq!(bindings[0].0, ExpandedName::new(Some("urn:x".into()), "limit"));
    }
}
