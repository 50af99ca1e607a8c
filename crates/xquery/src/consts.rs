//! Well-known namespace URIs and collation identifiers.

pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
pub const MATH_NS: &str = "http://www.w3.org/2005/xpath-functions/math";
pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const LOCAL_NS: &str = "http://www.w3.org/2005/xquery-local-functions";
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
pub const OPTIONS_NS: &str = "http://www.w3.org/2011/xquery-options";
pub const XQUERY_NS: &str = "http://www.w3.org/2012/xquery";

pub const EXIST_NS: &str = "http://exist.sourceforge.net/NS/exist";
pub const UTIL_NS: &str = "http://exist-db.org/xquery/util";
pub const XMLDB_NS: &str = "http://exist-db.org/xquery/xmldb";
pub const TEXT_NS: &str = "http://exist-db.org/xquery/text";
pub const COLLECTION_CONFIG_NS: &str = "http://exist-db.org/collection-config/1.0";

/// Prefixes bound in every static context before the prolog is read.
pub const PREDECLARED_PREFIXES: &[(&str, &str)] = &[
    ("xml", XML_URI),
    ("xs", XS),
    ("xsi", XSI),
    ("fn", FNS),
    ("math", MATH_NS),
    ("local", LOCAL_NS),
    ("err", ERR_NS),
    ("exist", EXIST_NS),
    ("util", UTIL_NS),
    ("xmldb", XMLDB_NS),
    ("text", TEXT_NS),
];

/// Namespaces in which user code may not declare functions, variables or annotations.
pub const RESERVED_NAMESPACES: &[&str] = &[XML_URI, XS, XSI, FNS, MATH_NS, OPTIONS_NS];

/// Built-in modules: importing these namespaces needs no location hint.
pub const BUILTIN_MODULES: &[&str] = &[FNS, MATH_NS, UTIL_NS, XMLDB_NS, TEXT_NS, XS];

pub const CODEPOINT_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";
pub const SIMPLE_CASE_URI: &str = "urn:sylva:collation:simple-case";
pub const SIMPLE_ACCENT_URI: &str = "urn:sylva:collation:simple-accent";
pub const SIMPLE_CASE_ACCENT_URI: &str = "urn:sylva:collation:simple-case-accent";

/// Scheme prefix used by database module locations (`xmldb:exist:///db/...`).
pub const XMLDB_SCHEME: &str = "xmldb:exist://";
