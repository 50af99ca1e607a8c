//! Contexts, function registry, error model and the host-facing provider traits.

use crate::compiler::ir::ComparisonOp;
use crate::consts::{CODEPOINT_URI, ERR_NS, FNS, PREDECLARED_PREFIXES, XML_URI};
use crate::engine::collation::{Collation, CollationRegistry};
use crate::modules::ModuleResolver;
use crate::tree::{DocumentId, Fragment, Node};
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};
use core::fmt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type Item = XdmItem<Node>;
pub type Sequence = XdmSequence<Node>;

pub type Arity = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub name: ExpandedName,
    pub arity: Arity,
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.arity)
    }
}

/// Error type returned by function resolution.
#[derive(Debug, Clone)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity {
        name: ExpandedName,
        available: Vec<Arity>,
    },
}

pub struct CallCtx<'a> {
    pub dyn_ctx: &'a DynamicContext,
    pub static_ctx: &'a StaticContext,
    pub default_collation: Option<Arc<dyn Collation>>,
    pub regex: Option<Arc<dyn RegexProvider>>,
}

impl CallCtx<'_> {
    pub fn regex(&self) -> Arc<dyn RegexProvider> {
        self.regex
            .clone()
            .unwrap_or_else(|| Arc::new(FancyRegexProvider) as Arc<dyn RegexProvider>)
    }
}

pub type FunctionImpl = Arc<dyn Fn(&CallCtx, &[Sequence]) -> Result<Sequence, Error> + Send + Sync>;

pub type FunctionOverload = (Arity, Option<Arity>, FunctionImpl);
pub type FunctionOverloads = Vec<FunctionOverload>;

#[derive(Default)]
pub struct FunctionRegistry {
    // (min_arity, max_arity, impl); max None means variadic. Kept sorted so the
    // most specific overload (highest min, then smallest max) is found first.
    fns: HashMap<ExpandedName, FunctionOverloads>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[Sequence]) -> Result<Sequence, Error>,
    {
        self.register_range(ExpandedName::ns(ns_uri, local), arity, Some(arity), Arc::new(f));
    }

    pub fn register_ns_range<F>(
        &mut self,
        ns_uri: &str,
        local: &str,
        min_arity: Arity,
        max_arity: Option<Arity>,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&CallCtx, &[Sequence]) -> Result<Sequence, Error>,
    {
        self.register_range(ExpandedName::ns(ns_uri, local), min_arity, max_arity, Arc::new(f));
    }

    pub fn register_ns_variadic<F>(&mut self, ns_uri: &str, local: &str, min_arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[Sequence]) -> Result<Sequence, Error>,
    {
        self.register_range(ExpandedName::ns(ns_uri, local), min_arity, None, Arc::new(f));
    }

    pub fn register_range(
        &mut self,
        name: ExpandedName,
        min_arity: Arity,
        max_arity: Option<Arity>,
        func: FunctionImpl,
    ) {
        let overloads = self.fns.entry(name).or_default();
        overloads.push((min_arity, max_arity, func));
        overloads.sort_by(|a, b| {
            b.0.cmp(&a.0).then_with(|| match (&a.1, &b.1) {
                (Some(amax), Some(bmax)) => amax.cmp(bmax),
                (Some(_), None) => core::cmp::Ordering::Less,
                (None, Some(_)) => core::cmp::Ordering::Greater,
                (None, None) => core::cmp::Ordering::Equal,
            })
        });
    }

    pub fn contains(&self, name: &ExpandedName) -> bool {
        self.fns.contains_key(name)
    }

    /// Resolve a function by expanded name and arity.
    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<&FunctionImpl, ResolveError> {
        let Some(cands) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        if let Some((_, _, f)) = cands
            .iter()
            .find(|(min, max, _)| arity >= *min && max.is_none_or(|m| arity <= m))
        {
            return Ok(f);
        }
        let mut available: Vec<Arity> = cands
            .iter()
            .filter_map(|(min, max, _)| max.map(|m| *min..=m))
            .flatten()
            .collect();
        available.sort_unstable();
        available.dedup();
        Err(ResolveError::WrongArity {
            name: name.clone(),
            available,
        })
    }
}

/// Access to stored documents and collections.
pub trait DocumentResolver: Send + Sync {
    fn document(&self, uri: &str) -> Result<Option<Node>, Error>;

    /// Document nodes of a collection and its descendants; `None` is the default collection.
    fn collection(&self, uri: Option<&str>) -> Result<Vec<Node>, Error>;

    fn collection_available(&self, _uri: &str) -> bool {
        false
    }

    /// Store a document, returning its path.
    fn store_document(&self, _collection: &str, _name: &str, _content: &Fragment) -> Result<String, Error> {
        Err(Error::from_code(ErrorCode::FOER0000, "document storage is not available"))
    }

    fn remove_resource(&self, _collection: &str, _name: Option<&str>) -> Result<(), Error> {
        Err(Error::from_code(ErrorCode::FOER0000, "document storage is not available"))
    }

    fn create_collection(&self, _parent: &str, _name: &str) -> Result<String, Error> {
        Err(Error::from_code(ErrorCode::FOER0000, "document storage is not available"))
    }
}

/// One step of the relative path from a predicate's context node to the indexed node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathComponent {
    Child(ExpandedName),
    Attribute(ExpandedName),
}

/// What an index lookup is asked about: elements named `context` whose `path` leads to the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexTarget {
    pub context: ExpandedName,
    pub path: Vec<PathComponent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringMatch {
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Matches { pattern: String, flags: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermPattern {
    Word(String),
    Wildcard(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexPredicate {
    Compare {
        op: ComparisonOp,
        key: XdmAtomicValue,
    },
    Strings(StringMatch),
    FullText {
        terms: Vec<TermPattern>,
        all: bool,
    },
}

/// Index access used by optimized predicates.
///
/// `lookup` returns a superset of the nodes at the end of `target.path` whose
/// value satisfies the predicate, or `None` when no index covers the target
/// completely. The evaluator re-checks every candidate, so a superset is fine;
/// a missing node is not.
pub trait IndexProvider: Send + Sync {
    fn lookup(
        &self,
        document: DocumentId,
        target: &IndexTarget,
        predicate: &IndexPredicate,
    ) -> Result<Option<Vec<Node>>, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held locks; released on drop.
pub struct LockToken {
    _guards: Vec<Box<dyn std::any::Any>>,
}

impl LockToken {
    pub fn new(guards: Vec<Box<dyn std::any::Any>>) -> Self {
        Self { _guards: guards }
    }
}

pub trait LockProvider: Send + Sync {
    fn acquire(&self, documents: &[DocumentId], mode: LockMode) -> Result<LockToken, Error>;
}

/// Told about every document an update statement mutated.
pub trait UpdateListener: Send + Sync {
    fn document_modified(&self, node: &Node);
}

pub trait RegexProvider: Send + Sync {
    fn matches(&self, pattern: &str, flags: &str, text: &str) -> Result<bool, Error>;
    fn replace(&self, pattern: &str, flags: &str, text: &str, replacement: &str)
    -> Result<String, Error>;
    fn tokenize(&self, pattern: &str, flags: &str, text: &str) -> Result<Vec<String>, Error>;
}

/// Backreference-capable regex provider based on fancy-regex.
pub struct FancyRegexProvider;

impl FancyRegexProvider {
    pub fn build_with_flags(pattern: &str, flags: &str) -> Result<fancy_regex::Regex, Error> {
        let mut builder = fancy_regex::RegexBuilder::new(pattern);
        for ch in flags.chars() {
            match ch {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.verbose_mode(true);
                }
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::FORX0001,
                        format!("unsupported regex flag: {ch}"),
                    ));
                }
            }
        }
        builder.build().map_err(|e| {
            Error::from_code(ErrorCode::FORX0002, format!("invalid regex pattern '{pattern}'"))
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
        })
    }

    fn check_replacement(replacement: &str) -> Result<(), Error> {
        let bytes = replacement.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => {
                    if !matches!(bytes.get(i + 1), Some(b'\\' | b'$')) {
                        return Err(Error::from_code(
                            ErrorCode::FORX0004,
                            "invalid escape in replacement string",
                        ));
                    }
                    i += 2;
                }
                b'$' => {
                    match bytes.get(i + 1) {
                        Some(d) if d.is_ascii_digit() => {}
                        _ => {
                            return Err(Error::from_code(
                                ErrorCode::FORX0004,
                                "'$' must be followed by a group number",
                            ));
                        }
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }
        Ok(())
    }
}

impl RegexProvider for FancyRegexProvider {
    fn matches(&self, pattern: &str, flags: &str, text: &str) -> Result<bool, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        Ok(re.is_match(text)?)
    }

    fn replace(
        &self,
        pattern: &str,
        flags: &str,
        text: &str,
        replacement: &str,
    ) -> Result<String, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        Self::check_replacement(replacement)?;
        let mut out = String::new();
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let caps = caps?;
            let Some(m) = caps.get(0) else { continue };
            if m.start() == m.end() {
                return Err(Error::from_code(
                    ErrorCode::FORX0003,
                    "pattern matches a zero-length string",
                ));
            }
            out.push_str(&text[last..m.start()]);
            let bytes = replacement.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => {
                        out.push(char::from(bytes[i + 1]));
                        i += 2;
                    }
                    b'$' => {
                        let mut j = i + 1;
                        let mut group = 0usize;
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            let next = group * 10 + usize::from(bytes[j] - b'0');
                            if j > i + 1 && next >= caps.len() {
                                break;
                            }
                            group = next;
                            j += 1;
                        }
                        if let Some(g) = caps.get(group) {
                            out.push_str(g.as_str());
                        }
                        i = j;
                    }
                    _ => {
                        let ch_len = replacement[i..].chars().next().map_or(1, char::len_utf8);
                        out.push_str(&replacement[i..i + ch_len]);
                        i += ch_len;
                    }
                }
            }
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn tokenize(&self, pattern: &str, flags: &str, text: &str) -> Result<Vec<String>, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        if re.is_match("")? {
            return Err(Error::from_code(
                ErrorCode::FORX0003,
                "pattern matches a zero-length string",
            ));
        }
        let mut tokens = Vec::new();
        for part in re.split(text) {
            tokens.push(part?.to_string());
        }
        Ok(tokens)
    }
}

macro_rules! error_codes {
    ($($code:ident),* $(,)?) => {
        /// Every error code the engine raises.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        pub enum ErrorCode {
            $($code,)*
            /// Codes outside the set above, including user codes from `fn:error`.
            Unknown,
        }

        impl ErrorCode {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => stringify!($code),)*
                    ErrorCode::Unknown => "UNKNOWN",
                }
            }

            /// Parse `err:CODE` or a bare `CODE`.
            pub fn from_code(s: &str) -> Self {
                match s.strip_prefix("err:").unwrap_or(s) {
                    $(stringify!($code) => ErrorCode::$code,)*
                    _ => ErrorCode::Unknown,
                }
            }
        }
    };
}

error_codes!(
    FOAR0001, FOAR0002, FOCA0001, FOCA0002, FOCH0001, FOCH0002, FOCH0003, FODC0002, FODC0004, FODC0005,
    FODC0006, FODT0002, FODT0003, FOER0000, FONS0004, FORG0001, FORG0003, FORG0004, FORG0005, FORG0006,
    FORG0008, FORX0001, FORX0002, FORX0003, FORX0004, SENR0001, SEPM0016, XPDY0002, XPDY0050,
    XPST0003, XPST0008, XPST0017, XPST0051, XPST0080, XPST0081, XPTY0004, XPTY0018, XPTY0019,
    XPTY0020, XQDY0025, XQDY0026, XQDY0041, XQDY0044, XQDY0054, XQDY0064, XQDY0072, XQDY0074,
    XQST0033, XQST0034, XQST0039, XQST0045, XQST0047, XQST0048, XQST0049, XQST0059, XQST0070,
    XQST0088, XQST0094, XQTY0024, XUDY0014, XUDY0027, XUTY0008, XUTY0012, EXLK0001, EXXQ0001,
);

impl ErrorCode {
    pub fn qname(&self) -> ExpandedName {
        ExpandedName::ns(ERR_NS, self.as_str())
    }

    /// Codes that signal a transient condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::EXLK0001)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub message: String,
    /// 1-based (line, column) for static errors.
    pub position: Option<(usize, usize)>,
    /// Value passed to `fn:error`, exposed to catch clauses as `$err:value`.
    pub value: Option<Vec<XdmAtomicValue>>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            position: None,
            value: None,
            source: None,
        }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), msg)
    }

    pub fn code_enum(&self) -> ErrorCode {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            ErrorCode::from_code(&self.code.local)
        } else {
            ErrorCode::Unknown
        }
    }

    /// `err:LOCAL` for standard codes, `Q{ns}local` otherwise.
    pub fn format_code(&self) -> String {
        match self.code.ns_uri.as_deref() {
            Some(ERR_NS) => format!("err:{}", self.code.local),
            Some(ns) if !ns.is_empty() => format!("Q{{{ns}}}{}", self.code.local),
            _ => self.code.local.clone(),
        }
    }

    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_position(mut self, line: usize, column: usize) -> Self {
        self.position = Some((line, column));
        self
    }

    pub fn with_value(mut self, value: Vec<XdmAtomicValue>) -> Self {
        self.value = Some(value);
        self
    }

    /// Parse `err:CODE`, `Q{ns}local` or a bare name into an expanded name.
    pub fn parse_code(s: &str) -> ExpandedName {
        if let Some(rest) = s.strip_prefix("err:") {
            return ExpandedName::ns(ERR_NS, rest);
        }
        if let Some((ns, local)) = s
            .strip_prefix("Q{")
            .and_then(|t| t.split_once('}'))
        {
            return ExpandedName::ns(ns, local);
        }
        ExpandedName::local(s)
    }

    pub fn not_implemented(feature: &str) -> Self {
        Self::from_code(ErrorCode::EXXQ0001, format!("not implemented: {feature}"))
    }
}

impl From<fancy_regex::Error> for Error {
    fn from(e: fancy_regex::Error) -> Self {
        Error::from_code(ErrorCode::FORX0002, "regex error")
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::from_code(ErrorCode::FODC0005, e.to_string())
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())?;
        if let Some((line, column)) = self.position {
            write!(f, " [at line {line}, column {column}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceBindings {
    pub by_prefix: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct StaticContext {
    pub base_uri: Option<String>,
    pub default_function_namespace: Option<String>,
    pub default_element_namespace: Option<String>,
    pub default_collation: Option<String>,
    pub namespaces: NamespaceBindings,
    pub in_scope_variables: HashSet<ExpandedName>,
    pub boundary_space_preserve: bool,
    /// Collection path that relative module locations of the main module resolve against.
    pub module_base: Option<String>,
    pub modules: Option<Arc<ModuleResolver>>,
}

impl Default for StaticContext {
    fn default() -> Self {
        let mut ns = NamespaceBindings::default();
        for (prefix, uri) in PREDECLARED_PREFIXES {
            ns.by_prefix.insert((*prefix).to_string(), (*uri).to_string());
        }
        Self {
            base_uri: None,
            default_function_namespace: Some(FNS.to_string()),
            default_element_namespace: None,
            default_collation: Some(CODEPOINT_URI.to_string()),
            namespaces: ns,
            in_scope_variables: HashSet::new(),
            boundary_space_preserve: false,
            module_base: None,
            modules: None,
        }
    }
}

/// Builder for `StaticContext`; the `xml` prefix binding cannot be replaced.
#[derive(Default)]
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.ctx.base_uri = Some(uri.into());
        self
    }

    pub fn with_default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_function_namespace = Some(uri.into());
        self
    }

    pub fn with_default_element_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_element_namespace = Some(uri.into());
        self
    }

    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = Some(uri.into());
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        let p = prefix.into();
        if p == "xml" {
            return self;
        }
        self.ctx.namespaces.by_prefix.insert(p, uri.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName) -> Self {
        self.ctx.in_scope_variables.insert(name);
        self
    }

    pub fn with_module_base(mut self, collection: impl Into<String>) -> Self {
        self.ctx.module_base = Some(collection.into());
        self
    }

    pub fn with_modules(mut self, resolver: Arc<ModuleResolver>) -> Self {
        self.ctx.modules = Some(resolver);
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

impl StaticContext {
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_URI);
        }
        self.namespaces.by_prefix.get(prefix).map(String::as_str)
    }
}

/// Evaluation switches threaded through the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationConfig {
    pub optimize: bool,
    pub max_call_depth: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            max_call_depth: 256,
        }
    }
}

#[derive(Clone)]
pub struct DynamicContext {
    pub context_item: Option<Item>,
    pub variables: HashMap<ExpandedName, Sequence>,
    pub default_collation: Option<String>,
    pub functions: Arc<FunctionRegistry>,
    pub collations: Arc<CollationRegistry>,
    pub documents: Option<Arc<dyn DocumentResolver>>,
    pub indexes: Option<Arc<dyn IndexProvider>>,
    pub locks: Option<Arc<dyn LockProvider>>,
    pub update_listener: Option<Arc<dyn UpdateListener>>,
    pub regex: Option<Arc<dyn RegexProvider>>,
    pub now: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub timezone_override: Option<chrono::FixedOffset>,
    pub config: EvaluationConfig,
}

impl Default for DynamicContext {
    fn default() -> Self {
        Self {
            context_item: None,
            variables: HashMap::new(),
            default_collation: None,
            functions: crate::engine::functions::default_function_registry(),
            collations: Arc::new(CollationRegistry::default()),
            documents: None,
            indexes: None,
            locks: None,
            update_listener: None,
            regex: None,
            now: None,
            timezone_override: None,
            config: EvaluationConfig::default(),
        }
    }
}

#[derive(Default)]
pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_item(mut self, item: impl Into<Item>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<Sequence>) -> Self {
        self.ctx.variables.insert(name, value.into());
        self
    }

    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = Some(uri.into());
        self
    }

    pub fn with_functions(mut self, reg: Arc<FunctionRegistry>) -> Self {
        self.ctx.functions = reg;
        self
    }

    pub fn with_collations(mut self, reg: Arc<CollationRegistry>) -> Self {
        self.ctx.collations = reg;
        self
    }

    pub fn with_documents(mut self, resolver: Arc<dyn DocumentResolver>) -> Self {
        self.ctx.documents = Some(resolver);
        self
    }

    pub fn with_indexes(mut self, provider: Arc<dyn IndexProvider>) -> Self {
        self.ctx.indexes = Some(provider);
        self
    }

    pub fn with_locks(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.ctx.locks = Some(provider);
        self
    }

    pub fn with_update_listener(mut self, listener: Arc<dyn UpdateListener>) -> Self {
        self.ctx.update_listener = Some(listener);
        self
    }

    pub fn with_regex(mut self, provider: Arc<dyn RegexProvider>) -> Self {
        self.ctx.regex = Some(provider);
        self
    }

    /// Fix `fn:current-dateTime()` for deterministic tests.
    pub fn with_now(mut self, now: chrono::DateTime<chrono::FixedOffset>) -> Self {
        self.ctx.now = Some(now);
        self
    }

    pub fn with_timezone(mut self, offset_minutes: i32) -> Self {
        self.ctx.timezone_override = chrono::FixedOffset::east_opt(offset_minutes * 60);
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.ctx.config.optimize = optimize;
        self
    }

    pub fn with_config(mut self, config: EvaluationConfig) -> Self {
        self.ctx.config = config;
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}
