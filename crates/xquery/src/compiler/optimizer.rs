//! IR rewrites applied after compilation.
//!
//! Two rewrites, both result-preserving:
//! - `X//t[p]` (a `descendant-or-self::node()` step followed by a child step
//!   whose predicates are all non-positional) becomes `X/descendant::t[p]`;
//! - a name step whose first predicate compares a relative path with a
//!   literal, or runs a string or full-text match on one, gets an
//!   [`IndexPlan`] the evaluator can answer from an index.
//!
//! Index plans only narrow the candidate set: the evaluator still runs every
//! predicate on each candidate.

use super::ir::{
    AxisIR, ClauseIR, CtorName, Expr, GroupIR, IndexCondition, IndexPlan, NodeTestIR, PredicateIR,
    Program, StepIR, UpdateIR,
};
use crate::consts::{FNS, TEXT_NS};
use crate::engine::fulltext;
use crate::runtime::{IndexPredicate, PathComponent, StringMatch, TermPattern};
use crate::xdm::XdmAtomicValue;
use std::sync::Arc;
use tracing::trace;

pub fn optimize(program: &mut Program) {
    for f in &mut program.functions {
        if let Some(body) = &mut f.body {
            optimize_expr(body);
        }
    }
    for g in &mut program.globals {
        if let Some(init) = &mut g.init {
            optimize_expr(init);
        }
    }
    if let Some(body) = &mut program.body {
        optimize_expr(body);
    }
}

fn optimize_expr(e: &mut Expr) {
    children_mut(e, &mut optimize_expr);
    rewrite_descendant(e);
    if let Expr::Step(step) = e {
        plan_index(step);
    }
}

fn is_dos_node(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Step(StepIR {
            axis: AxisIR::DescendantOrSelf,
            test: NodeTestIR::AnyKind,
            predicates,
            ..
        }) if predicates.is_empty()
    )
}

fn rewrite_descendant(e: &mut Expr) {
    let Expr::PathMap { input, step } = e else {
        return;
    };
    let Expr::PathMap {
        input: inner_input,
        step: inner_step,
    } = &mut **input
    else {
        return;
    };
    if !is_dos_node(inner_step) {
        return;
    }
    let Expr::Step(child) = &mut **step else {
        return;
    };
    if child.axis != AxisIR::Child || child.predicates.iter().any(PredicateIR::is_positional) {
        return;
    }
    child.axis = AxisIR::Descendant;
    let context = std::mem::replace(&mut **inner_input, Expr::empty());
    **input = context;
}

fn plan_index(step: &mut StepIR) {
    if step.index.is_some()
        || !matches!(
            step.axis,
            AxisIR::Child | AxisIR::Descendant | AxisIR::DescendantOrSelf
        )
    {
        return;
    }
    let NodeTestIR::Name(context) = &step.test else {
        return;
    };
    let Some(PredicateIR::Boolean(pred)) = step.predicates.first() else {
        return;
    };
    if let Some(condition) = condition(pred) {
        trace!(context = %context, "predicate answered by index");
        step.index = Some(Arc::new(IndexPlan {
            context: context.clone(),
            condition,
        }));
    }
}

/// Index condition for a predicate, or `None` when no index can narrow it.
fn condition(e: &Expr) -> Option<IndexCondition> {
    match e {
        Expr::And(l, r) => {
            let parts: Vec<_> = [condition(l), condition(r)].into_iter().flatten().collect();
            match parts.len() {
                0 => None,
                1 => parts.into_iter().next(),
                _ => Some(IndexCondition::And(parts)),
            }
        }
        Expr::Or(l, r) => Some(IndexCondition::Or(vec![condition(l)?, condition(r)?])),
        Expr::GeneralCompare { op, left, right } | Expr::ValueCompare { op, left, right } => {
            if let (Some(path), Expr::Literal(key)) = (rel_path(left), &**right) {
                return lookup(path, IndexPredicate::Compare { op: *op, key: key.clone() });
            }
            if let (Expr::Literal(key), Some(path)) = (&**left, rel_path(right)) {
                return lookup(
                    path,
                    IndexPredicate::Compare {
                        op: op.flipped(),
                        key: key.clone(),
                    },
                );
            }
            None
        }
        Expr::FullText { all, left, right } => {
            let path = rel_path(left)?;
            let terms = fulltext::query_terms(string_literal(right)?);
            if terms.is_empty() {
                return None;
            }
            lookup(path, IndexPredicate::FullText { terms, all: *all })
        }
        Expr::CallBuiltin { name, args } => {
            let ns = name.ns_uri.as_deref();
            match (ns, name.local.as_str(), args.as_slice()) {
                (Some(FNS), "starts-with", [subject, needle]) => strings(subject, needle, StringMatch::StartsWith),
                (Some(FNS), "ends-with", [subject, needle]) => strings(subject, needle, StringMatch::EndsWith),
                (Some(FNS), "contains", [subject, needle]) => strings(subject, needle, StringMatch::Contains),
                (Some(FNS), "matches", [subject, pattern, rest @ ..]) if rest.len() <= 1 => {
                    let flags = match rest.first() {
                        Some(f) => string_literal(f)?.to_string(),
                        None => String::new(),
                    };
                    lookup(
                        rel_path(subject)?,
                        IndexPredicate::Strings(StringMatch::Matches {
                            pattern: string_literal(pattern)?.to_string(),
                            flags,
                        }),
                    )
                }
                (Some(TEXT_NS), local @ ("match-all" | "match-any"), [subject, patterns @ ..]) => {
                    let path = rel_path(subject)?;
                    let mut terms = Vec::new();
                    for p in patterns {
                        match p {
                            Expr::Sequence(items) => {
                                for it in items {
                                    terms.push(TermPattern::Regex(string_literal(it)?.to_string()));
                                }
                            }
                            other => terms.push(TermPattern::Regex(string_literal(other)?.to_string())),
                        }
                    }
                    if terms.is_empty() {
                        return None;
                    }
                    lookup(
                        path,
                        IndexPredicate::FullText {
                            terms,
                            all: local == "match-all",
                        },
                    )
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn lookup(path: Vec<PathComponent>, predicate: IndexPredicate) -> Option<IndexCondition> {
    Some(IndexCondition::Lookup { path, predicate })
}

fn strings(subject: &Expr, needle: &Expr, make: fn(String) -> StringMatch) -> Option<IndexCondition> {
    let path = rel_path(subject)?;
    let needle = string_literal(needle)?;
    lookup(path, IndexPredicate::Strings(make(needle.to_string())))
}

fn string_literal(e: &Expr) -> Option<&str> {
    match e {
        Expr::Literal(XdmAtomicValue::String(s)) => Some(s),
        _ => None,
    }
}

/// Path from the predicate's context node made of plain child steps and an
/// optional trailing attribute step.
fn rel_path(e: &Expr) -> Option<Vec<PathComponent>> {
    match e {
        Expr::ContextItem => Some(Vec::new()),
        Expr::Step(StepIR {
            axis,
            test: NodeTestIR::Name(name),
            predicates,
            ..
        }) if predicates.is_empty() => match axis {
            AxisIR::Child => Some(vec![PathComponent::Child(name.clone())]),
            AxisIR::Attribute => Some(vec![PathComponent::Attribute(name.clone())]),
            _ => None,
        },
        Expr::PathMap { input, step } => {
            let mut path = rel_path(input)?;
            if matches!(path.last(), Some(PathComponent::Attribute(_))) {
                return None;
            }
            path.extend(rel_path(step)?);
            Some(path)
        }
        _ => None,
    }
}

fn predicates_mut(predicates: &mut [PredicateIR], f: &mut dyn FnMut(&mut Expr)) {
    for p in predicates {
        if let PredicateIR::Boolean(e) | PredicateIR::General(e) = p {
            f(e);
        }
    }
}

fn ctor_name_mut(name: &mut CtorName, f: &mut dyn FnMut(&mut Expr)) {
    if let CtorName::Computed { expr, .. } = name {
        f(expr);
    }
}

/// Mutable counterpart of [`Expr::for_each_child`].
fn children_mut(e: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    match e {
        Expr::Sequence(items) => items.iter_mut().for_each(f),
        Expr::Step(step) => predicates_mut(&mut step.predicates, f),
        Expr::PathMap { input, step } => {
            f(input);
            f(step);
        }
        Expr::Filter { input, predicates } => {
            f(input);
            predicates_mut(predicates, f);
        }
        Expr::Arith { left, right, .. }
        | Expr::GeneralCompare { left, right, .. }
        | Expr::ValueCompare { left, right, .. }
        | Expr::NodeCompare { left, right, .. }
        | Expr::FullText { left, right, .. }
        | Expr::SetOp { left, right, .. }
        | Expr::And(left, right)
        | Expr::Or(left, right)
        | Expr::Range(left, right) => {
            f(left);
            f(right);
        }
        Expr::Negate(e)
        | Expr::UnaryPlus(e)
        | Expr::InstanceOf(e, _)
        | Expr::TreatAs(e, _)
        | Expr::CastableAs(e, _)
        | Expr::CastAs(e, _)
        | Expr::Text(e)
        | Expr::Comment(e)
        | Expr::Document(e)
        | Expr::Optimize { expr: e, .. }
        | Expr::DynamicEval { query: e, .. } => f(e),
        Expr::If {
            cond,
            then_expr,
            else_expr,
        } => {
            f(cond);
            f(then_expr);
            f(else_expr);
        }
        Expr::Quantified {
            bindings,
            satisfies,
            ..
        } => {
            bindings.iter_mut().for_each(|(_, e)| f(e));
            f(satisfies);
        }
        Expr::Flwor(flwor) => {
            for c in &mut flwor.clauses {
                match c {
                    ClauseIR::For { input: e, .. } | ClauseIR::Let { value: e, .. } | ClauseIR::Where(e) => f(e),
                }
            }
            if let Some(GroupIR::Partition { keys, .. }) = &mut flwor.group {
                keys.iter_mut().for_each(&mut *f);
            }
            if let Some(order) = &mut flwor.order {
                order.iter_mut().for_each(|s| f(&mut s.expr));
            }
            f(&mut flwor.return_expr);
        }
        Expr::Typeswitch {
            operand,
            cases,
            default,
            ..
        } => {
            f(operand);
            cases.iter_mut().for_each(|c| f(&mut c.body));
            f(default);
        }
        Expr::TryCatch { body, catches } => {
            f(body);
            catches.iter_mut().for_each(|c| f(&mut c.body));
        }
        Expr::CallBuiltin { args, .. } | Expr::CallUser { args, .. } => args.iter_mut().for_each(f),
        Expr::Element(ctor) => {
            ctor_name_mut(&mut ctor.name, f);
            ctor.content.iter_mut().for_each(f);
        }
        Expr::Attribute { name, content } => {
            ctor_name_mut(name, f);
            content.iter_mut().for_each(f);
        }
        Expr::Pi { target, content } => {
            ctor_name_mut(target, f);
            f(content);
        }
        Expr::Lock { nodes, body, .. } => {
            f(nodes);
            f(body);
        }
        Expr::Update(u) => match u {
            UpdateIR::Insert { source, target, .. } => {
                f(source);
                f(target);
            }
            UpdateIR::Replace { target, with } | UpdateIR::Value { target, with } => {
                f(target);
                f(with);
            }
            UpdateIR::Delete(t) => f(t),
            UpdateIR::Rename { target, name, .. } => {
                f(target);
                f(name);
            }
        },
        Expr::Literal(_)
        | Expr::Local(_)
        | Expr::Global(_)
        | Expr::External(_)
        | Expr::ContextItem
        | Expr::Position
        | Expr::Last
        | Expr::Root => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::compiler::ir::{AxisIR, Expr, IndexCondition, StepIR};
    use crate::runtime::{IndexPredicate, PathComponent, StringMatch};

    fn last_step(src: &str) -> StepIR {
        let q = compile(src).unwrap();
        match q.program.body.clone().unwrap() {
            Expr::PathMap { step, .. } => match *step {
                Expr::Step(s) => s,
                other => panic!("unexpected step {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn descendant_shortcut_is_rewritten() {
        let step = last_step("//SPEECH[SPEAKER = 'HAMLET']");
        assert_eq!(step.axis, AxisIR::Descendant);
        let plan = step.index.expect("index plan");
        assert_eq!(plan.context.local, "SPEECH");
        match &plan.condition {
            IndexCondition::Lookup { path, predicate } => {
                assert!(matches!(path.as_slice(), [PathComponent::Child(n)] if n.local == "SPEAKER"));
                assert!(matches!(predicate, IndexPredicate::Compare { .. }));
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn positional_predicates_keep_the_child_step() {
        let step = last_step("//LINE[1]");
        assert_eq!(step.axis, AxisIR::Child);
        assert!(step.index.is_none());
    }

    #[test]
    fn literal_on_the_left_flips_the_operator() {
        let step = last_step("//item[10 < @price]");
        let plan = step.index.unwrap();
        match &plan.condition {
            IndexCondition::Lookup {
                path,
                predicate: IndexPredicate::Compare { op, .. },
            } => {
                assert_eq!(*op, crate::compiler::ir::ComparisonOp::Gt);
                assert!(matches!(path.as_slice(), [PathComponent::Attribute(_)]));
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn disjunction_needs_every_branch() {
        let step = last_step("//a[@x = 1 or position() > 2]");
        assert!(step.index.is_none());
        let step = last_step("//a[starts-with(b, 'x') or @y = 2]");
        assert!(matches!(
            step.index.unwrap().condition,
            IndexCondition::Or(ref parts) if parts.len() == 2
        ));
    }

    #[test]
    fn string_functions_and_fulltext_are_planned() {
        let step = last_step("//a[contains(b/c, 'needle')]");
        match &step.index.unwrap().condition {
            IndexCondition::Lookup {
                path,
                predicate: IndexPredicate::Strings(StringMatch::Contains(s)),
            } => {
                assert_eq!(path.len(), 2);
                assert_eq!(s, "needle");
            }
            other => panic!("unexpected condition {other:?}"),
        }
        let step = last_step("//LINE[. &= 'love']");
        assert!(matches!(
            step.index.unwrap().condition,
            IndexCondition::Lookup { predicate: IndexPredicate::FullText { all: true, .. }, .. }
        ));
    }

    #[test]
    fn non_child_paths_are_not_planned() {
        assert!(last_step("//a[.//b = 'x']").index.is_none());
        assert!(last_step("//a[../b = 'x']").index.is_none());
    }
}
