//! Database path handling. Every collection lives under `/db`.

use crate::error::{Result, StoreError};
use sylva_xquery::consts::XMLDB_SCHEME;

pub const ROOT: &str = "/db";

/// Collection holding index descriptors, mirroring the collection tree below it.
pub const CONFIG_ROOT: &str = "/db/system/config";

pub const CONFIG_FILE: &str = "collection.xconf";

/// Canonical form of a path: absolute, below `/db`, no `.`/`..` segments and
/// no trailing slash. Relative paths resolve against `base`.
pub fn normalize(path: &str, base: &str) -> Result<String> {
    let raw = path.trim();
    let raw = raw.strip_prefix(XMLDB_SCHEME).unwrap_or(raw);
    let joined = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("{base}/{raw}")
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StoreError::InvalidPath(path.to_string()));
                }
            }
            s => parts.push(s),
        }
    }
    if parts.first() != Some(&"db") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Split a resource path into its collection and name.
pub fn split(path: &str) -> Option<(&str, &str)> {
    let (collection, name) = path.rsplit_once('/')?;
    if collection.is_empty() || name.is_empty() {
        return None;
    }
    Some((collection, name))
}

pub fn join(collection: &str, name: &str) -> String {
    format!("{}/{}", collection.trim_end_matches('/'), name)
}

/// `descendant` is `ancestor` or lies below it.
pub fn is_within(descendant: &str, ancestor: &str) -> bool {
    descendant == ancestor
        || descendant
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Collection a descriptor stored under [`CONFIG_ROOT`] applies to.
pub fn configured_collection(config_collection: &str) -> Option<String> {
    let rest = config_collection.strip_prefix(CONFIG_ROOT)?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.to_string())
}

pub fn config_collection_for(collection: &str) -> String {
    format!("{CONFIG_ROOT}{collection}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/db/a/b", "/db", "/db/a/b")]
    #[case("xmldb:exist:///db/a/", "/db", "/db/a")]
    #[case("b/c.xml", "/db/a", "/db/a/b/c.xml")]
    #[case("../x.xml", "/db/a", "/db/x.xml")]
    #[case("/db//a/./b", "/db", "/db/a/b")]
    fn paths_are_normalized(#[case] input: &str, #[case] base: &str, #[case] expected: &str) {
        assert_eq!(normalize(input, base).unwrap(), expected);
    }

    #[rstest]
    #[case("/other/a")]
    #[case("/db/../..")]
    #[case("")]
    fn paths_outside_the_root_are_rejected(#[case] input: &str) {
        assert!(normalize(input, "/").is_err());
    }

    #[test]
    fn containment_is_segment_aware() {
        assert!(is_within("/db/a/b", "/db/a"));
        assert!(is_within("/db/a", "/db/a"));
        assert!(!is_within("/db/ab", "/db/a"));
    }

    #[test]
    fn config_locations_mirror_collections() {
        assert_eq!(config_collection_for("/db/shop"), "/db/system/config/db/shop");
        assert_eq!(
            configured_collection("/db/system/config/db/shop").as_deref(),
            Some("/db/shop")
        );
        assert_eq!(split("/db/shop/a.xml"), Some(("/db/shop", "a.xml")));
    }
}
