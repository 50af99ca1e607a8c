//! Built-in function library.
//!
//! Registration conventions:
//! - One registration per function name, using an arity range when trailing
//!   parameters are optional; the implementation dispatches on `args.len()`.
//! - `register_ns_variadic` only for truly variadic functions (`fn:concat`, `xmldb:document`).
//! - Zero-argument context forms (`fn:name()`, `fn:string()`, ...) are rewritten by the
//!   compiler into the one-argument form with the context item, so only arity 1 is registered.
//! - `fn:position`, `fn:last`, `util:eval` and the `util:*-lock` functions are compiled
//!   into dedicated expressions and never reach the registry.

mod common;
mod datetime;
mod environment;
mod exist;
mod nodes;
mod numeric;
mod sequences;
mod strings;

use crate::consts::{FNS, MATH_NS, TEXT_NS, UTIL_NS, XMLDB_NS};
use crate::engine::sequence::ebv;
use crate::runtime::FunctionRegistry;
use common::boolean;
use datetime::{Component, DurationPart};
use std::sync::{Arc, OnceLock};

static DEFAULT_REGISTRY: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();

/// The shared registry with every built-in function.
pub fn default_function_registry() -> Arc<FunctionRegistry> {
    DEFAULT_REGISTRY.get_or_init(|| Arc::new(build_registry())).clone()
}

fn build_registry() -> FunctionRegistry {
    let mut reg = FunctionRegistry::new();
    register_core(&mut reg);
    register_strings(&mut reg);
    register_numeric(&mut reg);
    register_sequences(&mut reg);
    register_nodes(&mut reg);
    register_datetime(&mut reg);
    register_environment(&mut reg);
    register_exist(&mut reg);
    reg
}

fn register_core(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "true", 0, |_ctx, _args| Ok(boolean(true)));
    reg.register_ns(FNS, "false", 0, |_ctx, _args| Ok(boolean(false)));
    reg.register_ns(FNS, "not", 1, |_ctx, args| Ok(boolean(!ebv(&args[0])?)));
    reg.register_ns(FNS, "boolean", 1, |_ctx, args| Ok(boolean(ebv(&args[0])?)));
}

fn register_strings(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "string", 1, strings::string_fn);
    reg.register_ns(FNS, "data", 1, strings::data_fn);
    reg.register_ns_variadic(FNS, "concat", 2, strings::concat_fn);
    reg.register_ns_range(FNS, "string-join", 1, Some(2), strings::string_join_fn);
    reg.register_ns_range(FNS, "substring", 2, Some(3), strings::substring_fn);
    reg.register_ns(FNS, "string-length", 1, strings::string_length_fn);
    reg.register_ns(FNS, "normalize-space", 1, strings::normalize_space_fn);
    reg.register_ns(FNS, "upper-case", 1, strings::upper_case_fn);
    reg.register_ns(FNS, "lower-case", 1, strings::lower_case_fn);
    reg.register_ns(FNS, "translate", 3, strings::translate_fn);
    reg.register_ns_range(FNS, "contains", 2, Some(3), strings::contains_fn);
    reg.register_ns_range(FNS, "starts-with", 2, Some(3), strings::starts_with_fn);
    reg.register_ns_range(FNS, "ends-with", 2, Some(3), strings::ends_with_fn);
    reg.register_ns_range(FNS, "substring-before", 2, Some(3), strings::substring_before_fn);
    reg.register_ns_range(FNS, "substring-after", 2, Some(3), strings::substring_after_fn);
    reg.register_ns_range(FNS, "compare", 2, Some(3), strings::compare_fn);
    reg.register_ns(FNS, "codepoint-equal", 2, strings::codepoint_equal_fn);
    reg.register_ns(FNS, "string-to-codepoints", 1, strings::string_to_codepoints_fn);
    reg.register_ns(FNS, "codepoints-to-string", 1, strings::codepoints_to_string_fn);
    reg.register_ns_range(FNS, "normalize-unicode", 1, Some(2), strings::normalize_unicode_fn);
    reg.register_ns(FNS, "encode-for-uri", 1, strings::encode_for_uri_fn);
    reg.register_ns(FNS, "iri-to-uri", 1, strings::iri_to_uri_fn);
    reg.register_ns(FNS, "escape-html-uri", 1, strings::escape_html_uri_fn);
    reg.register_ns_range(FNS, "matches", 2, Some(3), strings::matches_fn);
    reg.register_ns_range(FNS, "replace", 3, Some(4), strings::replace_fn);
    reg.register_ns_range(FNS, "tokenize", 2, Some(3), strings::tokenize_fn);
}

fn register_numeric(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "number", 1, numeric::number_fn);
    reg.register_ns(FNS, "abs", 1, numeric::abs_fn);
    reg.register_ns(FNS, "ceiling", 1, numeric::ceiling_fn);
    reg.register_ns(FNS, "floor", 1, numeric::floor_fn);
    reg.register_ns(FNS, "round", 1, numeric::round_fn);
    reg.register_ns_range(FNS, "round-half-to-even", 1, Some(2), numeric::round_half_to_even_fn);
    reg.register_ns_range(FNS, "sum", 1, Some(2), numeric::sum_fn);
    reg.register_ns(FNS, "avg", 1, numeric::avg_fn);
    reg.register_ns_range(FNS, "min", 1, Some(2), numeric::min_fn);
    reg.register_ns_range(FNS, "max", 1, Some(2), numeric::max_fn);
    reg.register_ns(FNS, "count", 1, numeric::count_fn);

    reg.register_ns(MATH_NS, "pi", 0, |_ctx, _args| {
        Ok(common::single(crate::xdm::XdmAtomicValue::Double(core::f64::consts::PI)))
    });
    const MATH_UNARY: &[(&str, fn(f64) -> f64)] = &[
        ("sqrt", f64::sqrt),
        ("exp", f64::exp),
        ("log", f64::ln),
        ("log10", f64::log10),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
    ];
    for (local, f) in MATH_UNARY {
        let f = *f;
        reg.register_ns(MATH_NS, local, 1, move |_ctx, args| {
            numeric::math_unary(args, "math function", f)
        });
    }
    reg.register_ns(MATH_NS, "pow", 2, numeric::math_pow_fn);
}

fn register_sequences(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "empty", 1, sequences::empty_fn);
    reg.register_ns(FNS, "exists", 1, sequences::exists_fn);
    reg.register_ns_range(FNS, "distinct-values", 1, Some(2), sequences::distinct_values_fn);
    reg.register_ns_range(FNS, "index-of", 2, Some(3), sequences::index_of_fn);
    reg.register_ns(FNS, "insert-before", 3, sequences::insert_before_fn);
    reg.register_ns(FNS, "remove", 2, sequences::remove_fn);
    reg.register_ns(FNS, "reverse", 1, sequences::reverse_fn);
    reg.register_ns_range(FNS, "subsequence", 2, Some(3), sequences::subsequence_fn);
    reg.register_ns(FNS, "unordered", 1, sequences::unordered_fn);
    reg.register_ns(FNS, "zero-or-one", 1, sequences::zero_or_one_fn);
    reg.register_ns(FNS, "one-or-more", 1, sequences::one_or_more_fn);
    reg.register_ns(FNS, "exactly-one", 1, sequences::exactly_one_fn);
    reg.register_ns_range(FNS, "deep-equal", 2, Some(3), sequences::deep_equal_fn);
    reg.register_ns(FNS, "head", 1, sequences::head_fn);
    reg.register_ns(FNS, "tail", 1, sequences::tail_fn);
}

fn register_nodes(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "node-name", 1, nodes::node_name_fn);
    reg.register_ns(FNS, "nilled", 1, nodes::nilled_fn);
    reg.register_ns(FNS, "name", 1, nodes::name_fn);
    reg.register_ns(FNS, "local-name", 1, nodes::local_name_fn);
    reg.register_ns(FNS, "namespace-uri", 1, nodes::namespace_uri_fn);
    reg.register_ns(FNS, "root", 1, nodes::root_fn);
    reg.register_ns(FNS, "base-uri", 1, nodes::base_uri_fn);
    reg.register_ns(FNS, "document-uri", 1, nodes::document_uri_fn);
    reg.register_ns_range(FNS, "lang", 1, Some(2), nodes::lang_fn);
    reg.register_ns(FNS, "in-scope-prefixes", 1, nodes::in_scope_prefixes_fn);
    reg.register_ns(FNS, "namespace-uri-for-prefix", 2, nodes::namespace_uri_for_prefix_fn);
    reg.register_ns(FNS, "resolve-QName", 2, nodes::resolve_qname_fn);
    reg.register_ns(FNS, "QName", 2, nodes::qname_fn);
    reg.register_ns(FNS, "local-name-from-QName", 1, nodes::local_name_from_qname_fn);
    reg.register_ns(FNS, "prefix-from-QName", 1, nodes::prefix_from_qname_fn);
    reg.register_ns(FNS, "namespace-uri-from-QName", 1, nodes::namespace_uri_from_qname_fn);
}

fn register_datetime(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "current-dateTime", 0, datetime::current_date_time_fn);
    reg.register_ns(FNS, "current-date", 0, datetime::current_date_fn);
    reg.register_ns(FNS, "current-time", 0, datetime::current_time_fn);
    reg.register_ns(FNS, "implicit-timezone", 0, datetime::implicit_timezone_fn);
    reg.register_ns(FNS, "dateTime", 2, datetime::date_time_fn);
    reg.register_ns_range(FNS, "adjust-dateTime-to-timezone", 1, Some(2), datetime::adjust_date_time_fn);
    reg.register_ns_range(FNS, "adjust-date-to-timezone", 1, Some(2), datetime::adjust_date_fn);
    reg.register_ns_range(FNS, "adjust-time-to-timezone", 1, Some(2), datetime::adjust_time_fn);

    const COMPONENTS: &[(&str, Component)] = &[
        ("year-from-dateTime", Component::Year),
        ("month-from-dateTime", Component::Month),
        ("day-from-dateTime", Component::Day),
        ("hours-from-dateTime", Component::Hours),
        ("minutes-from-dateTime", Component::Minutes),
        ("seconds-from-dateTime", Component::Seconds),
        ("timezone-from-dateTime", Component::Timezone),
        ("year-from-date", Component::Year),
        ("month-from-date", Component::Month),
        ("day-from-date", Component::Day),
        ("timezone-from-date", Component::Timezone),
        ("hours-from-time", Component::Hours),
        ("minutes-from-time", Component::Minutes),
        ("seconds-from-time", Component::Seconds),
        ("timezone-from-time", Component::Timezone),
    ];
    for (local, c) in COMPONENTS {
        let (local, c) = (*local, *c);
        reg.register_ns(FNS, local, 1, move |_ctx, args| datetime::component(args, c, local));
    }

    const DURATION_PARTS: &[(&str, DurationPart)] = &[
        ("years-from-duration", DurationPart::Years),
        ("months-from-duration", DurationPart::Months),
        ("days-from-duration", DurationPart::Days),
        ("hours-from-duration", DurationPart::Hours),
        ("minutes-from-duration", DurationPart::Minutes),
        ("seconds-from-duration", DurationPart::Seconds),
    ];
    for (local, p) in DURATION_PARTS {
        let (local, p) = (*local, *p);
        reg.register_ns(FNS, local, 1, move |_ctx, args| datetime::duration_part(args, p, local));
    }
}

fn register_environment(reg: &mut FunctionRegistry) {
    reg.register_ns(FNS, "doc", 1, environment::doc_fn);
    reg.register_ns(FNS, "doc-available", 1, environment::doc_available_fn);
    reg.register_ns_range(FNS, "collection", 0, Some(1), environment::collection_fn);
    reg.register_ns_range(FNS, "error", 0, Some(3), environment::error_fn);
    reg.register_ns(FNS, "trace", 2, environment::trace_fn);
    reg.register_ns(FNS, "default-collation", 0, environment::default_collation_fn);
    reg.register_ns(FNS, "static-base-uri", 0, environment::static_base_uri_fn);
}

fn register_exist(reg: &mut FunctionRegistry) {
    reg.register_ns(UTIL_NS, "node-id", 1, exist::node_id_fn);
    reg.register_ns(UTIL_NS, "document-name", 1, exist::document_name_fn);
    reg.register_ns(UTIL_NS, "collection-name", 1, exist::collection_name_fn);
    reg.register_ns(UTIL_NS, "log", 2, exist::log_fn);
    reg.register_ns(UTIL_NS, "serialize", 2, exist::serialize_fn);

    reg.register_ns(XMLDB_NS, "store", 3, exist::store_fn);
    reg.register_ns_range(XMLDB_NS, "remove", 1, Some(2), exist::remove_fn);
    reg.register_ns(XMLDB_NS, "create-collection", 2, exist::create_collection_fn);
    reg.register_ns(XMLDB_NS, "collection-available", 1, exist::collection_available_fn);
    reg.register_ns_variadic(XMLDB_NS, "document", 1, exist::document_fn);

    reg.register_ns_variadic(TEXT_NS, "match-all", 2, exist::match_all_fn);
    reg.register_ns_variadic(TEXT_NS, "match-any", 2, exist::match_any_fn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::ExpandedName;

    #[test]
    fn context_forms_are_registered_at_arity_one() {
        let reg = default_function_registry();
        for local in ["string", "name", "local-name", "root", "node-name", "number"] {
            assert!(
                reg.resolve(&ExpandedName::ns(FNS, local), 1).is_ok(),
                "fn:{local}#1 missing"
            );
        }
    }

    #[test]
    fn concat_is_variadic() {
        let reg = default_function_registry();
        let name = ExpandedName::ns(FNS, "concat");
        assert!(reg.resolve(&name, 2).is_ok());
        assert!(reg.resolve(&name, 9).is_ok());
        assert!(reg.resolve(&name, 1).is_err());
    }
}
