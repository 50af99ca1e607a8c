use crate::consts::{CODEPOINT_URI, SIMPLE_ACCENT_URI, SIMPLE_CASE_ACCENT_URI, SIMPLE_CASE_URI};
use crate::runtime::{DynamicContext, Error, ErrorCode};
use std::collections::HashMap;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::canonical_combining_class;

pub trait Collation: Send + Sync {
    fn uri(&self) -> &str;
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        self.key(a).cmp(&self.key(b))
    }
    fn key(&self, s: &str) -> String {
        s.to_string()
    }
}

/// Resolve an explicit collation URI, falling back to the context default and then codepoint.
pub fn resolve_collation(
    dyn_ctx: &DynamicContext,
    default_collation: Option<&Arc<dyn Collation>>,
    uri: Option<&str>,
) -> Result<Arc<dyn Collation>, Error> {
    if let Some(u) = uri {
        return dyn_ctx.collations.get(u).ok_or_else(|| {
            Error::from_code(ErrorCode::FOCH0002, format!("unknown collation URI: {u}"))
        });
    }
    if let Some(c) = default_collation {
        return Ok(Arc::clone(c));
    }
    Ok(dyn_ctx
        .collations
        .get(CODEPOINT_URI)
        .unwrap_or_else(|| Arc::new(CodepointCollation)))
}

pub fn is_codepoint(c: &dyn Collation) -> bool {
    c.uri() == CODEPOINT_URI
}

pub struct CodepointCollation;

impl Collation for CodepointCollation {
    fn uri(&self) -> &str {
        CODEPOINT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        a.cmp(b)
    }
}

pub struct SimpleCaseCollation;

impl Collation for SimpleCaseCollation {
    fn uri(&self) -> &str {
        SIMPLE_CASE_URI
    }
    fn key(&self, s: &str) -> String {
        s.to_lowercase()
    }
}

fn strip_marks(s: &str) -> String {
    s.nfd().filter(|&ch| canonical_combining_class(ch) == 0).collect()
}

/// NFD with combining marks removed.
pub struct SimpleAccentCollation;

impl Collation for SimpleAccentCollation {
    fn uri(&self) -> &str {
        SIMPLE_ACCENT_URI
    }
    fn key(&self, s: &str) -> String {
        strip_marks(s)
    }
}

pub struct SimpleCaseAccentCollation;

impl Collation for SimpleCaseAccentCollation {
    fn uri(&self) -> &str {
        SIMPLE_CASE_ACCENT_URI
    }
    fn key(&self, s: &str) -> String {
        strip_marks(s).to_lowercase()
    }
}

pub struct CollationRegistry {
    by_uri: HashMap<String, Arc<dyn Collation>>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let mut reg = Self {
            by_uri: HashMap::new(),
        };
        reg.insert(Arc::new(CodepointCollation));
        reg.insert(Arc::new(SimpleCaseCollation));
        reg.insert(Arc::new(SimpleAccentCollation));
        reg.insert(Arc::new(SimpleCaseAccentCollation));
        reg
    }
}

impl CollationRegistry {
    pub fn get(&self, uri: &str) -> Option<Arc<dyn Collation>> {
        self.by_uri.get(uri).cloned()
    }

    pub fn insert(&mut self, collation: Arc<dyn Collation>) {
        self.by_uri.insert(collation.uri().to_string(), collation);
    }
}
