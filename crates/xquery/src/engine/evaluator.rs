//! Tree-walking evaluator over the compiled IR.
//!
//! Local variables live in one frame vector indexed by the slots the compiler
//! assigned: binding pushes, leaving a scope truncates. Function calls start a
//! fresh frame. The focus (context item, position, size) is passed down
//! explicitly and replaced by path steps and predicates.

use crate::compiler::ir::{
    AxisIR, CatchIR, CatchTest, ClauseIR, CtorName, Expr, FlworIR, GroupIR,
    IndexCondition, IndexPlan, ItemTypeIR, NodeCompOp, NodeTestIR, OccurrenceIR, OrderSpecIR,
    PredicateIR, Program, QuantifierKind, SeqTypeIR, SetOpIR, SingleTypeIR, StepIR, UpdateIR,
};
use crate::compiler::{CompiledQuery, compile, compile_with_context};
use crate::consts::ERR_NS;
use crate::engine::arith::{arithmetic, negate, unary_plus};
use crate::engine::axes::{matches_test, step_nodes};
use crate::engine::casting::{
    AtomicType, CastEnv, IntKind, StrKind, cast, castable, lookup_type, utc, value_matches,
};
use crate::engine::collation::{Collation, resolve_collation};
use crate::engine::compare::{GroupKey, general_compare, group_key, order_key_cmp, value_compare};
use crate::engine::construct::{self, ContentBuilder};
use crate::engine::fulltext::{compile_terms, query_terms, text_matches};
use crate::engine::sequence::{atomize, atomize_item, ebv, require_nodes, sort_dedup, zero_or_one};
use crate::engine::update;
use crate::model::{NodeKind, XdmNode, ns_eq};
use crate::runtime::{
    CallCtx, DynamicContext, Error, ErrorCode, IndexTarget, Item, ResolveError, Sequence,
    StaticContext,
};
use crate::tree::{Document, DocumentId, Fragment, Node};
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem};
use chrono::{FixedOffset, Utc};
use core::cmp::Ordering;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Evaluate a compiled query against a dynamic context.
pub fn evaluate(query: &CompiledQuery, dyn_ctx: &DynamicContext) -> Result<Sequence, Error> {
    let stamped;
    let dyn_ctx = if dyn_ctx.now.is_none() {
        let now = Utc::now().fixed_offset();
        stamped = DynamicContext {
            now: Some(match dyn_ctx.timezone_override {
                Some(tz) => now.with_timezone(&tz),
                None => now,
            }),
            ..dyn_ctx.clone()
        };
        &stamped
    } else {
        dyn_ctx
    };
    let Some(body) = &query.program.body else {
        return Ok(Vec::new());
    };
    debug!(updating = query.program.updating, "evaluating query");
    let ev = Evaluator::new(&query.program, &query.static_ctx, dyn_ctx)?;
    let focus = ev.initial_focus();
    let mut env = Vec::new();
    ev.eval(body, &mut env, focus.as_ref())
}

/// Convenience: compile with the default static context and evaluate.
pub fn evaluate_expr(source: &str, dyn_ctx: &DynamicContext) -> Result<Sequence, Error> {
    let compiled = compile(source)?;
    evaluate(&compiled, dyn_ctx)
}

#[derive(Clone)]
struct Focus {
    item: Item,
    position: usize,
    size: usize,
}

enum GlobalState {
    Pending,
    InProgress,
    Done(Sequence),
}

type IndexCacheKey = (usize, DocumentId, u64);

struct Evaluator<'a> {
    program: &'a Program,
    static_ctx: &'a StaticContext,
    dyn_ctx: &'a DynamicContext,
    globals: RefCell<Vec<GlobalState>>,
    optimize: Cell<bool>,
    depth: Cell<usize>,
    // Candidates per (plan, document, revision); `None` records "no index covers this".
    index_cache: RefCell<HashMap<IndexCacheKey, Option<Arc<Vec<Node>>>>>,
    default_collation: Arc<dyn Collation>,
    implicit_tz: FixedOffset,
}

impl<'a> Evaluator<'a> {
    fn new(
        program: &'a Program,
        static_ctx: &'a StaticContext,
        dyn_ctx: &'a DynamicContext,
    ) -> Result<Self, Error> {
        let uri = dyn_ctx
            .default_collation
            .as_deref()
            .or(static_ctx.default_collation.as_deref());
        let default_collation = resolve_collation(dyn_ctx, None, uri)?;
        let implicit_tz = dyn_ctx
            .timezone_override
            .or_else(|| dyn_ctx.now.map(|n| *n.offset()))
            .unwrap_or_else(utc);
        Ok(Self {
            program,
            static_ctx,
            dyn_ctx,
            globals: RefCell::new(
                program.globals.iter().map(|_| GlobalState::Pending).collect(),
            ),
            optimize: Cell::new(program.optimize.unwrap_or(dyn_ctx.config.optimize)),
            depth: Cell::new(0),
            index_cache: RefCell::new(HashMap::new()),
            default_collation,
            implicit_tz,
        })
    }

    fn initial_focus(&self) -> Option<Focus> {
        self.dyn_ctx.context_item.clone().map(|item| Focus {
            item,
            position: 1,
            size: 1,
        })
    }

    fn cast_env(&self) -> CastEnv<'_> {
        CastEnv {
            implicit_timezone: self.implicit_tz,
            static_ctx: Some(self.static_ctx),
        }
    }

    fn eval(&self, expr: &Expr, env: &mut Vec<Sequence>, focus: Option<&Focus>) -> Result<Sequence, Error> {
        match expr {
            Expr::Literal(v) => Ok(vec![XdmItem::Atomic(v.clone())]),
            Expr::Sequence(items) => {
                let mut out = Vec::new();
                for e in items {
                    out.extend(self.eval(e, env, focus)?);
                }
                Ok(out)
            }
            Expr::Local(slot) => env.get(*slot).cloned().ok_or_else(|| {
                Error::from_code(ErrorCode::XPDY0002, format!("variable slot {slot} is unbound"))
            }),
            Expr::Global(id) => self.global(*id),
            Expr::External(name) => self.dyn_ctx.variables.get(name).cloned().ok_or_else(|| {
                Error::from_code(
                    ErrorCode::XPDY0002,
                    format!("no value is bound to external variable ${name}"),
                )
            }),
            Expr::ContextItem => Ok(vec![require_focus(focus)?.item.clone()]),
            Expr::Position => Ok(vec![integer(require_focus(focus)?.position)]),
            Expr::Last => Ok(vec![integer(require_focus(focus)?.size)]),
            Expr::Root => self.root(focus),
            Expr::Step(step) => {
                let node = context_node(focus)?;
                let mut nodes = self.step(&node, step, env)?;
                if step.axis.is_reverse() {
                    nodes.reverse();
                }
                Ok(nodes.into_iter().map(XdmItem::Node).collect())
            }
            Expr::PathMap { input, step } => self.path_map(input, step, env, focus),
            Expr::Filter { input, predicates } => {
                let items = self.eval(input, env, focus)?;
                self.apply_predicates(items, predicates, env)
            }
            Expr::Arith { op, left, right } => {
                let Some(a) = self.eval_atomic(left, env, focus, "arithmetic operand")? else {
                    return Ok(Vec::new());
                };
                let Some(b) = self.eval_atomic(right, env, focus, "arithmetic operand")? else {
                    return Ok(Vec::new());
                };
                Ok(vec![XdmItem::Atomic(arithmetic(*op, &a, &b)?)])
            }
            Expr::Negate(e) => match self.eval_atomic(e, env, focus, "unary minus")? {
                Some(v) => Ok(vec![XdmItem::Atomic(negate(&v)?)]),
                None => Ok(Vec::new()),
            },
            Expr::UnaryPlus(e) => match self.eval_atomic(e, env, focus, "unary plus")? {
                Some(v) => Ok(vec![XdmItem::Atomic(unary_plus(&v)?)]),
                None => Ok(Vec::new()),
            },
            Expr::And(l, r) => {
                let result = ebv(&self.eval(l, env, focus)?)? && ebv(&self.eval(r, env, focus)?)?;
                Ok(boolean(result))
            }
            Expr::Or(l, r) => {
                let result = ebv(&self.eval(l, env, focus)?)? || ebv(&self.eval(r, env, focus)?)?;
                Ok(boolean(result))
            }
            Expr::GeneralCompare { op, left, right } => {
                let a = atomize(&self.eval(left, env, focus)?);
                let b = atomize(&self.eval(right, env, focus)?);
                let result = general_compare(*op, &a, &b, self.default_collation.as_ref(), self.implicit_tz)?;
                Ok(boolean(result))
            }
            Expr::ValueCompare { op, left, right } => {
                let Some(a) = self.eval_atomic(left, env, focus, "value comparison")? else {
                    return Ok(Vec::new());
                };
                let Some(b) = self.eval_atomic(right, env, focus, "value comparison")? else {
                    return Ok(Vec::new());
                };
                let result = value_compare(*op, &a, &b, self.default_collation.as_ref(), self.implicit_tz)?;
                Ok(boolean(result))
            }
            Expr::NodeCompare { op, left, right } => self.node_compare(*op, left, right, env, focus),
            Expr::FullText { all, left, right } => {
                let left = self.eval(left, env, focus)?;
                let query = atomize(&self.eval(right, env, focus)?)
                    .iter()
                    .map(XdmAtomicValue::string_value)
                    .collect::<Vec<_>>()
                    .join(" ");
                let terms = compile_terms(&query_terms(&query))?;
                let hit = left.iter().any(|item| text_matches(&item_string(item), &terms, *all));
                Ok(boolean(hit))
            }
            Expr::Range(from, to) => self.range(from, to, env, focus),
            Expr::SetOp { op, left, right } => {
                let a = require_nodes(self.eval(left, env, focus)?, "a set operator")?;
                let b = require_nodes(self.eval(right, env, focus)?, "a set operator")?;
                let nodes = match op {
                    SetOpIR::Union => a.into_iter().chain(b).collect(),
                    SetOpIR::Intersect => {
                        let keep: HashSet<Node> = b.into_iter().collect();
                        a.into_iter().filter(|n| keep.contains(n)).collect()
                    }
                    SetOpIR::Except => {
                        let drop: HashSet<Node> = b.into_iter().collect();
                        a.into_iter().filter(|n| !drop.contains(n)).collect()
                    }
                };
                Ok(sort_dedup(nodes).into_iter().map(XdmItem::Node).collect())
            }
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                if ebv(&self.eval(cond, env, focus)?)? {
                    self.eval(then_expr, env, focus)
                } else {
                    self.eval(else_expr, env, focus)
                }
            }
            Expr::Quantified {
                kind,
                bindings,
                satisfies,
            } => {
                let result = self.quantify(*kind, bindings, 0, satisfies, env, focus)?;
                Ok(boolean(result))
            }
            Expr::Flwor(flwor) => self.flwor(flwor, env, focus),
            Expr::Typeswitch {
                operand,
                slot,
                cases,
                default_bind,
                default,
            } => {
                let value = self.eval(operand, env, focus)?;
                let (bind, body) = cases
                    .iter()
                    .find(|c| matches_seq_type(&value, &c.ty))
                    .map_or((*default_bind, default.as_ref()), |c| (c.bind, &c.body));
                if !bind {
                    return self.eval(body, env, focus);
                }
                env.push(value);
                let result = self.eval(body, env, focus);
                env.truncate(*slot);
                result
            }
            Expr::TryCatch { body, catches } => {
                let depth = env.len();
                match self.eval(body, env, focus) {
                    Ok(v) => Ok(v),
                    Err(err) => {
                        env.truncate(depth);
                        let Some(catch) = catches.iter().find(|c| catch_matches(&c.tests, &err.code)) else {
                            return Err(err);
                        };
                        trace!(code = %err.code, "caught dynamic error");
                        self.run_catch(catch, err, env, focus)
                    }
                }
            }
            Expr::InstanceOf(e, ty) => {
                let value = self.eval(e, env, focus)?;
                Ok(boolean(matches_seq_type(&value, ty)))
            }
            Expr::TreatAs(e, ty) => {
                let value = self.eval(e, env, focus)?;
                if matches_seq_type(&value, ty) {
                    Ok(value)
                } else {
                    Err(Error::from_code(
                        ErrorCode::XPDY0050,
                        format!("value does not match treat as {}", type_label(ty)),
                    ))
                }
            }
            Expr::CastableAs(e, ty) => {
                let value = atomize(&self.eval(e, env, focus)?);
                let target = single_type(ty)?;
                let result = match value.as_slice() {
                    [] => ty.optional,
                    [v] => castable(v, target, self.cast_env()),
                    _ => false,
                };
                Ok(boolean(result))
            }
            Expr::CastAs(e, ty) => {
                let value = atomize(&self.eval(e, env, focus)?);
                let target = single_type(ty)?;
                match value.as_slice() {
                    [] if ty.optional => Ok(Vec::new()),
                    [] => Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        format!("cannot cast an empty sequence to xs:{}", ty.atomic.local),
                    )),
                    [v] => Ok(vec![XdmItem::Atomic(cast(v, target, self.cast_env())?)]),
                    _ => Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        format!("cast as xs:{} expects at most one item", ty.atomic.local),
                    )),
                }
            }
            Expr::CallUser { id, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, env, focus)?);
                }
                self.call_user(*id, values)
            }
            Expr::CallBuiltin { name, args } => self.call_builtin(name, args, env, focus),
            Expr::Element(ctor) => {
                let name = match &ctor.name {
                    CtorName::Static(q) => q.clone(),
                    CtorName::Computed {
                        expr,
                        namespaces,
                        default_ns,
                    } => construct::computed_name(
                        &self.eval(expr, env, focus)?,
                        namespaces,
                        default_ns.as_deref(),
                    )?,
                };
                let mut builder = ContentBuilder::element();
                self.fill_content(&mut builder, &ctor.content, env, focus)?;
                Ok(materialize(&builder.into_element(name, ctor.namespaces.clone())))
            }
            Expr::Attribute { name, content } => {
                let frag = self.attribute_fragment(name, content, env, focus)?;
                Ok(materialize(&frag))
            }
            Expr::Text(e) => {
                let value = atomize(&self.eval(e, env, focus)?);
                let items: Vec<Item> = value.into_iter().map(XdmItem::Atomic).collect();
                Ok(construct::text(&items).map(|f| materialize(&f)).unwrap_or_default())
            }
            Expr::Comment(e) => {
                let value = self.eval(e, env, focus)?;
                Ok(materialize(&construct::comment(&value)?))
            }
            Expr::Pi { target, content } => {
                let target = match target {
                    CtorName::Static(q) => q.local.clone(),
                    CtorName::Computed { expr, .. } => {
                        let v = atomize(&self.eval(expr, env, focus)?);
                        match v.as_slice() {
                            [one] => one.string_value().trim().to_string(),
                            _ => {
                                return Err(Error::from_code(
                                    ErrorCode::XPTY0004,
                                    "a processing-instruction target must be a single value",
                                ));
                            }
                        }
                    }
                };
                let value = self.eval(content, env, focus)?;
                Ok(materialize(&construct::processing_instruction(&target, &value)?))
            }
            Expr::Document(e) => {
                let mut builder = ContentBuilder::document();
                builder.push_part(&self.eval(e, env, focus)?)?;
                Ok(materialize(&builder.into_document()))
            }
            Expr::Update(u) => {
                self.update(u, env, focus)?;
                Ok(Vec::new())
            }
            Expr::Lock { mode, nodes, body } => {
                let nodes = require_nodes(self.eval(nodes, env, focus)?, "util:*-lock")?;
                let mut ids: Vec<DocumentId> = nodes.iter().map(Node::document_id).collect();
                ids.sort();
                ids.dedup();
                let _token = match &self.dyn_ctx.locks {
                    Some(locks) => Some(locks.acquire(&ids, *mode)?),
                    None => None,
                };
                trace!(?mode, documents = ids.len(), "locked");
                self.eval(body, env, focus)
            }
            Expr::DynamicEval { query, namespaces } => {
                let source = atomize(&self.eval(query, env, focus)?)
                    .iter()
                    .map(XdmAtomicValue::string_value)
                    .collect::<String>();
                self.dynamic_eval(&source, namespaces, focus)
            }
            Expr::Optimize { enable, expr } => {
                let saved = self.optimize.replace(*enable);
                let result = self.eval(expr, env, focus);
                self.optimize.set(saved);
                result
            }
        }
    }

    /// Single atomized value, or `None` for the empty sequence.
    fn eval_atomic(
        &self,
        expr: &Expr,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
        what: &str,
    ) -> Result<Option<XdmAtomicValue>, Error> {
        let value = self.eval(expr, env, focus)?;
        Ok(zero_or_one(&value, what)?.map(atomize_item))
    }

    fn global(&self, id: usize) -> Result<Sequence, Error> {
        match self.globals.borrow().get(id) {
            Some(GlobalState::Done(v)) => return Ok(v.clone()),
            Some(GlobalState::InProgress) => {
                let name = &self.program.globals[id].name;
                return Err(Error::from_code(
                    ErrorCode::XQDY0054,
                    format!("variable ${name} depends on itself"),
                ));
            }
            Some(GlobalState::Pending) => {}
            None => return Err(Error::from_code(ErrorCode::XPST0008, format!("unknown global {id}"))),
        }
        self.globals.borrow_mut()[id] = GlobalState::InProgress;
        let result = self.init_global(id);
        self.globals.borrow_mut()[id] = match &result {
            Ok(v) => GlobalState::Done(v.clone()),
            Err(_) => GlobalState::Pending,
        };
        result
    }

    fn init_global(&self, id: usize) -> Result<Sequence, Error> {
        let g = &self.program.globals[id];
        let bound = if g.external {
            self.dyn_ctx.variables.get(&g.name).cloned()
        } else {
            None
        };
        let value = match (bound, &g.init) {
            (Some(v), _) => v,
            (None, Some(init)) => {
                let focus = self.initial_focus();
                self.eval(init, &mut Vec::new(), focus.as_ref())?
            }
            (None, None) => {
                return Err(Error::from_code(
                    ErrorCode::XPDY0002,
                    format!("no value is bound to external variable ${}", g.name),
                ));
            }
        };
        match &g.ty {
            Some(ty) => self.coerce(value, ty, &format!("variable ${}", g.name)),
            None => Ok(value),
        }
    }

    fn root(&self, focus: Option<&Focus>) -> Result<Sequence, Error> {
        let Some(focus) = focus else {
            let Some(docs) = &self.dyn_ctx.documents else {
                return Err(Error::from_code(
                    ErrorCode::XPDY0002,
                    "'/' needs a context item or a database",
                ));
            };
            let nodes = sort_dedup(docs.collection(None)?);
            return Ok(nodes.into_iter().map(XdmItem::Node).collect());
        };
        let XdmItem::Node(node) = &focus.item else {
            return Err(Error::from_code(
                ErrorCode::XPTY0020,
                "'/' needs a node as context item",
            ));
        };
        let root = node.root();
        if root.kind() != NodeKind::Document {
            return Err(Error::from_code(
                ErrorCode::XPDY0050,
                "the root of the context node is not a document node",
            ));
        }
        Ok(vec![XdmItem::Node(root)])
    }

    fn path_map(
        &self,
        input: &Expr,
        step: &Expr,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let items = self.eval(input, env, focus)?;
        if let Expr::Step(s) = step {
            let nodes = require_nodes(items, "a path step").map_err(|e| {
                Error::from_code(ErrorCode::XPTY0019, e.message)
            })?;
            let mut out = Vec::new();
            for n in &nodes {
                out.extend(self.step(n, s, env)?);
            }
            if nodes.len() > 1 || s.axis.is_reverse() || s.axis == AxisIR::Namespace {
                out = sort_dedup(out);
            }
            return Ok(out.into_iter().map(XdmItem::Node).collect());
        }
        let size = items.len();
        let mut out: Vec<Item> = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            if !item.is_node() {
                return Err(Error::from_code(
                    ErrorCode::XPTY0019,
                    "the left side of '/' must produce nodes",
                ));
            }
            let f = Focus {
                item,
                position: i + 1,
                size,
            };
            out.extend(self.eval(step, env, Some(&f))?);
        }
        let nodes = out.iter().filter(|i| i.is_node()).count();
        if nodes == out.len() {
            let nodes = out.into_iter().filter_map(|i| match i {
                XdmItem::Node(n) => Some(n),
                XdmItem::Atomic(_) => None,
            });
            Ok(sort_dedup(nodes.collect()).into_iter().map(XdmItem::Node).collect())
        } else if nodes == 0 {
            Ok(out)
        } else {
            Err(Error::from_code(
                ErrorCode::XPTY0018,
                "a path step mixes nodes and atomic values",
            ))
        }
    }

    /// One axis step from one node: nodes in axis order, predicates applied.
    fn step(&self, node: &Node, step: &StepIR, env: &mut Vec<Sequence>) -> Result<Vec<Node>, Error> {
        let candidates = match self.index_candidates(node, step)? {
            Some(nodes) => nodes,
            None => step_nodes(node, step.axis, &step.test),
        };
        if step.predicates.is_empty() {
            return Ok(candidates);
        }
        // Index candidates are a superset, so every predicate still runs.
        let items = candidates.into_iter().map(XdmItem::Node).collect();
        let filtered = self.apply_predicates(items, &step.predicates, env)?;
        Ok(filtered
            .into_iter()
            .filter_map(|i| match i {
                XdmItem::Node(n) => Some(n),
                XdmItem::Atomic(_) => None,
            })
            .collect())
    }

    /// Candidate nodes from the index for a step carrying an index plan.
    ///
    /// Returns `None` when optimization is off or no index answers the plan.
    /// Candidates are restricted to the step's axis and node test; every
    /// predicate is still applied by the caller.
    fn index_candidates(&self, node: &Node, step: &StepIR) -> Result<Option<Vec<Node>>, Error> {
        let Some(plan) = &step.index else {
            return Ok(None);
        };
        if !self.optimize.get() || !node.is_persistent() {
            return Ok(None);
        }
        let Some(indexes) = &self.dyn_ctx.indexes else {
            return Ok(None);
        };
        let doc = node.document();
        let key = (Arc::as_ptr(plan) as usize, doc.id(), doc.revision());
        let cached = self.index_cache.borrow().get(&key).cloned();
        let hits = match cached {
            Some(hits) => hits,
            None => {
                let hits = self
                    .lookup_condition(indexes.as_ref(), doc.id(), plan, &plan.condition)?
                    .map(|nodes| Arc::new(sort_dedup(nodes)));
                self.index_cache.borrow_mut().insert(key, hits.clone());
                hits
            }
        };
        let Some(hits) = hits else {
            trace!(context = %plan.context, "no index covers predicate, scanning");
            return Ok(None);
        };
        let nodes: Vec<Node> = hits
            .iter()
            .filter(|n| matches_test(n, &step.test, step.axis) && within(n, node, step.axis))
            .cloned()
            .collect();
        debug!(context = %plan.context, candidates = nodes.len(), "index lookup");
        Ok(Some(nodes))
    }

    fn lookup_condition(
        &self,
        indexes: &dyn crate::runtime::IndexProvider,
        doc: DocumentId,
        plan: &IndexPlan,
        cond: &IndexCondition,
    ) -> Result<Option<Vec<Node>>, Error> {
        match cond {
            IndexCondition::Lookup { path, predicate } => {
                let target = IndexTarget {
                    context: plan.context.clone(),
                    path: path.clone(),
                };
                let Some(hits) = indexes.lookup(doc, &target, predicate)? else {
                    return Ok(None);
                };
                let mapped = hits
                    .into_iter()
                    .filter_map(|n| {
                        let mut cur = n;
                        for _ in 0..path.len() {
                            cur = cur.parent()?;
                        }
                        Some(cur)
                    })
                    .collect();
                Ok(Some(mapped))
            }
            IndexCondition::And(parts) => {
                let mut acc: Option<HashSet<Node>> = None;
                for part in parts {
                    if let Some(nodes) = self.lookup_condition(indexes, doc, plan, part)? {
                        let set: HashSet<Node> = nodes.into_iter().collect();
                        acc = Some(match acc {
                            Some(prev) => prev.intersection(&set).cloned().collect(),
                            None => set,
                        });
                    }
                }
                Ok(acc.map(|s| s.into_iter().collect()))
            }
            IndexCondition::Or(parts) => {
                let mut all = Vec::new();
                for part in parts {
                    match self.lookup_condition(indexes, doc, plan, part)? {
                        Some(nodes) => all.extend(nodes),
                        None => return Ok(None),
                    }
                }
                Ok(Some(all))
            }
        }
    }

    fn apply_predicates(
        &self,
        mut items: Vec<Item>,
        predicates: &[PredicateIR],
        env: &mut Vec<Sequence>,
    ) -> Result<Vec<Item>, Error> {
        for p in predicates {
            if items.is_empty() {
                break;
            }
            items = self.apply_predicate(items, p, env)?;
        }
        Ok(items)
    }

    fn apply_predicate(
        &self,
        items: Vec<Item>,
        predicate: &PredicateIR,
        env: &mut Vec<Sequence>,
    ) -> Result<Vec<Item>, Error> {
        let len = items.len();
        let pick = |items: Vec<Item>, pos: i64| -> Vec<Item> {
            match usize::try_from(pos) {
                Ok(p) if p >= 1 && p <= len => items.into_iter().nth(p - 1).into_iter().collect(),
                _ => Vec::new(),
            }
        };
        match predicate {
            PredicateIR::Index(n) => Ok(pick(items, *n)),
            PredicateIR::Last => Ok(pick(items, len as i64)),
            PredicateIR::LastMinus(k) => Ok(pick(items, len as i64 - k)),
            PredicateIR::Boolean(e) | PredicateIR::General(e) => {
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let focus = Focus {
                        item,
                        position: i + 1,
                        size: len,
                    };
                    let value = self.eval(e, env, Some(&focus))?;
                    let keep = match predicate {
                        PredicateIR::Boolean(_) => ebv(&value)?,
                        _ => predicate_truth(&value, i + 1)?,
                    };
                    if keep {
                        out.push(focus.item);
                    }
                }
                Ok(out)
            }
        }
    }

    fn node_compare(
        &self,
        op: NodeCompOp,
        left: &Expr,
        right: &Expr,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let operand = |v: Sequence| -> Result<Option<Node>, Error> {
            match zero_or_one(&v, "node comparison")? {
                None => Ok(None),
                Some(XdmItem::Node(n)) => Ok(Some(n.clone())),
                Some(XdmItem::Atomic(a)) => Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("node comparison expects nodes, got {}", a.type_name()),
                )),
            }
        };
        let Some(a) = operand(self.eval(left, env, focus)?)? else {
            return Ok(Vec::new());
        };
        let Some(b) = operand(self.eval(right, env, focus)?)? else {
            return Ok(Vec::new());
        };
        let result = match op {
            NodeCompOp::Is => a == b,
            NodeCompOp::Precedes => a.compare_document_order(&b) == Ordering::Less,
            NodeCompOp::Follows => a.compare_document_order(&b) == Ordering::Greater,
        };
        Ok(boolean(result))
    }

    fn range(
        &self,
        from: &Expr,
        to: &Expr,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let bound = |v: Option<XdmAtomicValue>| -> Result<Option<i64>, Error> {
            match v {
                None => Ok(None),
                Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
                Some(v @ XdmAtomicValue::UntypedAtomic(_)) => {
                    match cast(&v, AtomicType::Integer(IntKind::Integer), self.cast_env())? {
                        XdmAtomicValue::Integer(i) => Ok(Some(i)),
                        _ => Ok(None),
                    }
                }
                Some(other) => Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("range bounds must be integers, got {}", other.type_name()),
                )),
            }
        };
        let Some(a) = bound(self.eval_atomic(from, env, focus, "range")?)? else {
            return Ok(Vec::new());
        };
        let Some(b) = bound(self.eval_atomic(to, env, focus, "range")?)? else {
            return Ok(Vec::new());
        };
        Ok((a..=b).map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(i))).collect())
    }

    fn quantify(
        &self,
        kind: QuantifierKind,
        bindings: &[(usize, Expr)],
        index: usize,
        satisfies: &Expr,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<bool, Error> {
        let Some((slot, input)) = bindings.get(index) else {
            return ebv(&self.eval(satisfies, env, focus)?);
        };
        let values = self.eval(input, env, focus)?;
        for item in values {
            env.push(vec![item]);
            let result = self.quantify(kind, bindings, index + 1, satisfies, env, focus);
            env.truncate(*slot);
            match (kind, result?) {
                (QuantifierKind::Some, true) => return Ok(true),
                (QuantifierKind::Every, false) => return Ok(false),
                _ => {}
            }
        }
        Ok(kind == QuantifierKind::Every)
    }

    fn run_catch(
        &self,
        catch: &CatchIR,
        err: Error,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let prefix = (err.code.ns_uri.as_deref() == Some(ERR_NS)).then(|| "err".to_string());
        let code: Sequence = vec![XdmItem::Atomic(XdmAtomicValue::QName {
            ns_uri: err.code.ns_uri.clone(),
            prefix,
            local: err.code.local.clone(),
        })];
        let description: Sequence = vec![XdmItem::Atomic(XdmAtomicValue::String(err.message.clone()))];
        let value: Sequence = err
            .value
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(XdmItem::Atomic)
            .collect();
        let vars = [code, description, value];
        env.extend(vars.iter().cloned());
        for v in vars.iter().take(catch.explicit_vars) {
            env.push(v.clone());
        }
        let result = self.eval(&catch.body, env, focus);
        env.truncate(catch.slot);
        result
    }

    fn call_user(&self, id: usize, args: Vec<Sequence>) -> Result<Sequence, Error> {
        let f = &self.program.functions[id];
        let depth = self.depth.get() + 1;
        if depth > self.dyn_ctx.config.max_call_depth {
            return Err(Error::from_code(
                ErrorCode::FOER0000,
                format!("maximum call depth exceeded calling {}", f.name),
            ));
        }
        let Some(body) = &f.body else {
            return Err(Error::not_implemented(&format!("external function {}", f.name)));
        };
        let mut frame = Vec::with_capacity(args.len());
        for (value, ty) in args.into_iter().zip(&f.params) {
            frame.push(match ty {
                Some(ty) => self.coerce(value, ty, &format!("argument of {}", f.name))?,
                None => value,
            });
        }
        self.depth.set(depth);
        let result = self.eval(body, &mut frame, None);
        self.depth.set(depth - 1);
        let result = result?;
        match &f.return_type {
            Some(ty) => self.coerce(result, ty, &format!("result of {}", f.name)),
            None => Ok(result),
        }
    }

    fn call_builtin(
        &self,
        name: &ExpandedName,
        args: &[Expr],
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let mut values: SmallVec<[Sequence; 4]> = SmallVec::with_capacity(args.len() + 1);
        for a in args {
            values.push(self.eval(a, env, focus)?);
        }
        if name.ns_uri.as_deref() == Some(crate::consts::FNS) && name.local == "lang" && values.len() == 1 {
            values.push(vec![require_focus(focus)?.item.clone()]);
        }
        let f = self.dyn_ctx.functions.resolve(name, values.len()).map_err(|e| match e {
            ResolveError::Unknown(n) => {
                Error::from_code(ErrorCode::XPST0017, format!("unknown function {n}#{}", values.len()))
            }
            ResolveError::WrongArity { name, available } => Error::from_code(
                ErrorCode::XPST0017,
                format!("function {name} does not take {} arguments (arities: {available:?})", values.len()),
            ),
        })?;
        let ctx = CallCtx {
            dyn_ctx: self.dyn_ctx,
            static_ctx: self.static_ctx,
            default_collation: Some(Arc::clone(&self.default_collation)),
            regex: self.dyn_ctx.regex.clone(),
        };
        f(&ctx, values.as_slice())
    }

    fn fill_content(
        &self,
        builder: &mut ContentBuilder,
        content: &[Expr],
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<(), Error> {
        for part in content {
            match part {
                Expr::Attribute { name, content } => {
                    let attr = self.attribute_fragment(name, content, env, focus)?;
                    builder.push_attribute(attr)?;
                }
                Expr::Text(inner) if matches!(inner.as_ref(), Expr::Literal(_)) => {
                    let value = atomize(&self.eval(inner, env, focus)?);
                    let part: Vec<Item> = value.into_iter().map(XdmItem::Atomic).collect();
                    builder.push_part(&part)?;
                }
                other => {
                    let value = self.eval(other, env, focus)?;
                    builder.push_part(&value)?;
                }
            }
        }
        Ok(())
    }

    fn attribute_fragment(
        &self,
        name: &CtorName,
        content: &[Expr],
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Fragment, Error> {
        let name = match name {
            CtorName::Static(q) => q.clone(),
            CtorName::Computed { expr, namespaces, .. } => {
                construct::computed_name(&self.eval(expr, env, focus)?, namespaces, None)?
            }
        };
        let mut parts = Vec::with_capacity(content.len());
        for e in content {
            parts.push(self.eval(e, env, focus)?);
        }
        construct::attribute(name, &parts)
    }

    fn update(&self, u: &UpdateIR, env: &mut Vec<Sequence>, focus: Option<&Focus>) -> Result<(), Error> {
        let listener = self.dyn_ctx.update_listener.as_deref();
        match u {
            UpdateIR::Insert {
                source,
                position,
                target,
            } => {
                let source = self.eval(source, env, focus)?;
                let target = self.eval(target, env, focus)?;
                update::insert(&source, *position, &target, listener)
            }
            UpdateIR::Replace { target, with } => {
                let target = self.eval(target, env, focus)?;
                let with = self.eval(with, env, focus)?;
                update::replace(&target, &with, listener)
            }
            UpdateIR::Value { target, with } => {
                let target = self.eval(target, env, focus)?;
                let with = self.eval(with, env, focus)?;
                update::replace_value(&target, &with, listener)
            }
            UpdateIR::Delete(target) => {
                let target = self.eval(target, env, focus)?;
                update::delete(&target, listener)
            }
            UpdateIR::Rename {
                target,
                name,
                namespaces,
            } => {
                let target = self.eval(target, env, focus)?;
                let name = construct::computed_name(&self.eval(name, env, focus)?, namespaces, None)?;
                update::rename(&target, &name, listener)
            }
        }
    }

    fn dynamic_eval(
        &self,
        source: &str,
        namespaces: &HashMap<String, String>,
        focus: Option<&Focus>,
    ) -> Result<Sequence, Error> {
        let mut static_ctx = self.static_ctx.clone();
        for (prefix, uri) in namespaces {
            static_ctx
                .namespaces
                .by_prefix
                .entry(prefix.clone())
                .or_insert_with(|| uri.clone());
        }
        let compiled = compile_with_context(source, &static_ctx)?;
        let mut dyn_ctx = self.dyn_ctx.clone();
        dyn_ctx.context_item = focus.map(|f| f.item.clone());
        dyn_ctx.config.optimize = self.optimize.get();
        trace!(query = source, "util:eval");
        evaluate(&compiled, &dyn_ctx)
    }

    // ===== FLWOR =====

    fn flwor(&self, f: &FlworIR, env: &mut Vec<Sequence>, focus: Option<&Focus>) -> Result<Sequence, Error> {
        if f.is_pipelined() {
            let mut out = Vec::new();
            self.run_clauses(&f.clauses, 0, env, focus, &mut |env: &mut Vec<Sequence>| {
                out.extend(self.eval(&f.return_expr, env, focus)?);
                Ok(())
            })?;
            return Ok(out);
        }

        let base = f.base;
        let mut tuples: Vec<Vec<Sequence>> = Vec::new();
        self.run_clauses(&f.clauses, 0, env, focus, &mut |env: &mut Vec<Sequence>| {
            tuples.push(env[base..].to_vec());
            Ok(())
        })?;

        if let Some(group) = &f.group {
            tuples = self.group(group, tuples, base, env, focus)?;
        }
        if let Some(specs) = &f.order {
            tuples = self.order(specs, tuples, base, env, focus)?;
        }

        let mut out = Vec::new();
        for tuple in tuples {
            env.truncate(base);
            env.extend(tuple);
            let result = self.eval(&f.return_expr, env, focus);
            env.truncate(base);
            out.extend(result?);
        }
        Ok(out)
    }

    /// Run the clauses from `index` on, calling `sink` once per tuple with the tuple bound.
    fn run_clauses(
        &self,
        clauses: &[ClauseIR],
        index: usize,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
        sink: &mut dyn FnMut(&mut Vec<Sequence>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let Some(clause) = clauses.get(index) else {
            return sink(env);
        };
        match clause {
            ClauseIR::For {
                slot,
                position,
                ty,
                input,
            } => {
                let values = self.eval(input, env, focus)?;
                for (i, item) in values.into_iter().enumerate() {
                    let mut bound = vec![item];
                    if let Some(ty) = ty {
                        bound = self.coerce(bound, ty, "for binding")?;
                    }
                    env.push(bound);
                    if position.is_some() {
                        env.push(vec![integer(i + 1)]);
                    }
                    let result = self.run_clauses(clauses, index + 1, env, focus, sink);
                    env.truncate(*slot);
                    result?;
                }
                Ok(())
            }
            ClauseIR::Let { slot, ty, value } => {
                let mut bound = self.eval(value, env, focus)?;
                if let Some(ty) = ty {
                    bound = self.coerce(bound, ty, "let binding")?;
                }
                env.push(bound);
                let result = self.run_clauses(clauses, index + 1, env, focus, sink);
                env.truncate(*slot);
                result
            }
            ClauseIR::Where(cond) => {
                if ebv(&self.eval(cond, env, focus)?)? {
                    self.run_clauses(clauses, index + 1, env, focus, sink)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn group_key_of(&self, value: &Sequence) -> Result<Option<(GroupKey, XdmAtomicValue)>, Error> {
        let atoms = atomize(value);
        match atoms.as_slice() {
            [] => Ok(None),
            [v] => Ok(Some((group_key(v, self.default_collation.as_ref()), v.clone()))),
            _ => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("a grouping key must be a single value, got {}", atoms.len()),
            )),
        }
    }

    fn group(
        &self,
        group: &GroupIR,
        tuples: Vec<Vec<Sequence>>,
        base: usize,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Vec<Vec<Sequence>>, Error> {
        let mut index: HashMap<Vec<Option<GroupKey>>, usize> = HashMap::new();
        let mut groups: Vec<Vec<Sequence>> = Vec::new();
        match group {
            GroupIR::Partition { source, keys } => {
                for tuple in tuples {
                    env.truncate(base);
                    env.extend(tuple);
                    let mut key = Vec::with_capacity(keys.len());
                    let mut key_values = Vec::with_capacity(keys.len());
                    for k in keys {
                        let value = self.eval(k, env, focus);
                        let value = match value {
                            Ok(v) => v,
                            Err(e) => {
                                env.truncate(base);
                                return Err(e);
                            }
                        };
                        let entry = self.group_key_of(&value)?;
                        key.push(entry.as_ref().map(|(k, _)| k.clone()));
                        key_values.push(entry.map(|(_, v)| vec![XdmItem::Atomic(v)]).unwrap_or_default());
                    }
                    let items = env[*source].clone();
                    env.truncate(base);
                    match index.get(&key) {
                        Some(&g) => groups[g][0].extend(items),
                        None => {
                            index.insert(key, groups.len());
                            let mut row = Vec::with_capacity(1 + key_values.len());
                            row.push(items);
                            row.extend(key_values);
                            groups.push(row);
                        }
                    }
                }
            }
            GroupIR::Standard { keys } => {
                for tuple in tuples {
                    let mut key = Vec::with_capacity(keys.len());
                    for slot in keys {
                        key.push(self.group_key_of(&tuple[slot - base])?.map(|(k, _)| k));
                    }
                    match index.get(&key) {
                        Some(&g) => {
                            let row = &mut groups[g];
                            for (i, value) in tuple.into_iter().enumerate() {
                                if !keys.contains(&(base + i)) {
                                    row[i].extend(value);
                                }
                            }
                        }
                        None => {
                            index.insert(key, groups.len());
                            let row = tuple
                                .into_iter()
                                .enumerate()
                                .map(|(i, value)| {
                                    if keys.contains(&(base + i)) {
                                        atomize(&value).into_iter().map(XdmItem::Atomic).collect()
                                    } else {
                                        value
                                    }
                                })
                                .collect();
                            groups.push(row);
                        }
                    }
                }
            }
        }
        trace!(groups = groups.len(), "grouped tuples");
        Ok(groups)
    }

    fn order(
        &self,
        specs: &[OrderSpecIR],
        tuples: Vec<Vec<Sequence>>,
        base: usize,
        env: &mut Vec<Sequence>,
        focus: Option<&Focus>,
    ) -> Result<Vec<Vec<Sequence>>, Error> {
        let mut collations = Vec::with_capacity(specs.len());
        for s in specs {
            collations.push(match &s.collation {
                Some(uri) => resolve_collation(self.dyn_ctx, None, Some(uri))?,
                None => Arc::clone(&self.default_collation),
            });
        }
        let mut keyed: Vec<(Vec<Option<XdmAtomicValue>>, Vec<Sequence>)> = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            env.truncate(base);
            env.extend(tuple.iter().cloned());
            let mut keys = Vec::with_capacity(specs.len());
            for s in specs {
                let value = match self.eval(&s.expr, env, focus) {
                    Ok(v) => v,
                    Err(e) => {
                        env.truncate(base);
                        return Err(e);
                    }
                };
                keys.push(zero_or_one(&value, "an order by key")?.map(atomize_item));
            }
            env.truncate(base);
            keyed.push((keys, tuple));
        }

        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, spec) in specs.iter().enumerate() {
                let ord = match (&a[i], &b[i]) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) if spec.empty_greatest => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) if spec.empty_greatest => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => {
                        match order_key_cmp(x, y, collations[i].as_ref(), self.implicit_tz) {
                            Ok(o) => o,
                            Err(e) => {
                                failure.get_or_insert(e);
                                Ordering::Equal
                            }
                        }
                    }
                };
                let ord = if spec.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(keyed.into_iter().map(|(_, t)| t).collect())
    }

    // ===== Types =====

    /// Function conversion: atomize for atomic types, cast untyped values,
    /// promote numerics and URIs, then check the type.
    fn coerce(&self, value: Sequence, ty: &SeqTypeIR, what: &str) -> Result<Sequence, Error> {
        let value = match ty {
            SeqTypeIR::Typed {
                item: ItemTypeIR::Atomic(name),
                ..
            } => {
                let target = lookup_type(name).ok_or_else(|| {
                    Error::from_code(ErrorCode::XPST0051, format!("unknown atomic type {name}"))
                })?;
                let mut out = Vec::with_capacity(value.len());
                for item in &value {
                    out.push(XdmItem::Atomic(self.convert_atomic(atomize_item(item), target)?));
                }
                out
            }
            _ => value,
        };
        if matches_seq_type(&value, ty) {
            Ok(value)
        } else {
            Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} does not match {}", type_label(ty)),
            ))
        }
    }

    fn convert_atomic(&self, v: XdmAtomicValue, target: AtomicType) -> Result<XdmAtomicValue, Error> {
        if value_matches(&v, target) {
            return Ok(v);
        }
        match (&v, target) {
            (XdmAtomicValue::UntypedAtomic(_), _) => cast(&v, target, self.cast_env()),
            (_, AtomicType::Double | AtomicType::Float) if v.is_numeric() => cast(&v, target, self.cast_env()),
            (XdmAtomicValue::Float(_), AtomicType::Decimal) => Ok(v),
            (XdmAtomicValue::AnyUri(s), AtomicType::Str(StrKind::String)) => {
                Ok(XdmAtomicValue::String(s.clone()))
            }
            _ => Ok(v),
        }
    }
}

fn require_focus(focus: Option<&Focus>) -> Result<&Focus, Error> {
    focus.ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "the context item is absent"))
}

fn context_node(focus: Option<&Focus>) -> Result<Node, Error> {
    match &require_focus(focus)?.item {
        XdmItem::Node(n) => Ok(n.clone()),
        XdmItem::Atomic(_) => Err(Error::from_code(
            ErrorCode::XPTY0020,
            "an axis step needs a node as context item",
        )),
    }
}

fn integer(n: usize) -> Item {
    XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn boolean(b: bool) -> Sequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

fn item_string(item: &Item) -> String {
    match item {
        XdmItem::Node(n) => n.string_value(),
        XdmItem::Atomic(a) => a.string_value(),
    }
}

fn materialize(frag: &Fragment) -> Sequence {
    vec![XdmItem::Node(Document::from_fragment(frag, None, false).root())]
}

fn single_type(ty: &SingleTypeIR) -> Result<AtomicType, Error> {
    lookup_type(&ty.atomic).ok_or_else(|| {
        Error::from_code(ErrorCode::XPST0051, format!("unknown atomic type {}", ty.atomic))
    })
}

/// A numeric predicate value selects by position; anything else by EBV.
fn predicate_truth(value: &[Item], position: usize) -> Result<bool, Error> {
    if let [XdmItem::Atomic(v)] = value
        && v.is_numeric()
    {
        return Ok(v.as_f64().is_some_and(|f| f == position as f64));
    }
    ebv(value)
}

/// Is `candidate` reachable from `context` along a downward axis?
fn within(candidate: &Node, context: &Node, axis: AxisIR) -> bool {
    if candidate.document_id() != context.document_id() {
        return false;
    }
    match axis {
        AxisIR::Child => candidate.parent().as_ref() == Some(context),
        AxisIR::DescendantOrSelf if candidate == context => true,
        AxisIR::Descendant | AxisIR::DescendantOrSelf => {
            let mut cur = candidate.parent();
            while let Some(p) = cur {
                if &p == context {
                    return true;
                }
                cur = p.parent();
            }
            false
        }
        _ => false,
    }
}

fn catch_matches(tests: &[CatchTest], code: &ExpandedName) -> bool {
    tests.iter().any(|t| match t {
        CatchTest::Any => true,
        CatchTest::Name(n) => n.local == code.local && ns_eq(n.ns_uri.as_deref(), code.ns_uri.as_deref()),
        CatchTest::Namespace(uri) => ns_eq(Some(uri), code.ns_uri.as_deref()),
        CatchTest::Local(local) => *local == code.local,
    })
}

fn matches_seq_type(value: &[Item], ty: &SeqTypeIR) -> bool {
    match ty {
        SeqTypeIR::EmptySequence => value.is_empty(),
        SeqTypeIR::Typed { item, occ } => {
            let count_ok = match occ {
                OccurrenceIR::One => value.len() == 1,
                OccurrenceIR::ZeroOrOne => value.len() <= 1,
                OccurrenceIR::ZeroOrMore => true,
                OccurrenceIR::OneOrMore => !value.is_empty(),
            };
            count_ok && value.iter().all(|i| matches_item_type(i, item))
        }
    }
}

fn matches_item_type(item: &Item, ty: &ItemTypeIR) -> bool {
    match (ty, item) {
        (ItemTypeIR::AnyItem, _) => true,
        (ItemTypeIR::AnyNode, i) => i.is_node(),
        (ItemTypeIR::Kind(test), XdmItem::Node(n)) => matches_kind(n, test),
        (ItemTypeIR::Atomic(name), XdmItem::Atomic(v)) => {
            lookup_type(name).is_some_and(|t| value_matches(v, t))
        }
        _ => false,
    }
}

fn matches_kind(node: &Node, test: &NodeTestIR) -> bool {
    let axis = if node.kind() == NodeKind::Attribute {
        AxisIR::Attribute
    } else {
        AxisIR::Child
    };
    matches_test(node, test, axis)
}

fn type_label(ty: &SeqTypeIR) -> String {
    let SeqTypeIR::Typed { item, occ } = ty else {
        return "empty-sequence()".to_string();
    };
    let base = match item {
        ItemTypeIR::AnyItem => "item()".to_string(),
        ItemTypeIR::AnyNode => "node()".to_string(),
        ItemTypeIR::Atomic(n) => format!("xs:{}", n.local),
        ItemTypeIR::Kind(test) => match test {
            NodeTestIR::KindElement { .. } => "element()".to_string(),
            NodeTestIR::KindAttribute { .. } => "attribute()".to_string(),
            NodeTestIR::KindText => "text()".to_string(),
            NodeTestIR::KindComment => "comment()".to_string(),
            NodeTestIR::KindDocument(_) => "document-node()".to_string(),
            NodeTestIR::KindProcessingInstruction(_) => "processing-instruction()".to_string(),
            NodeTestIR::KindNamespace => "namespace-node()".to_string(),
            _ => "node()".to_string(),
        },
    };
    let suffix = match occ {
        OccurrenceIR::One => "",
        OccurrenceIR::ZeroOrOne => "?",
        OccurrenceIR::ZeroOrMore => "*",
        OccurrenceIR::OneOrMore => "+",
    };
    format!("{base}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DynamicContextBuilder;
    use crate::xml::{ParseOptions, parse_document};

    fn run(query: &str) -> Result<Sequence, Error> {
        evaluate_expr(query, &DynamicContext::default())
    }

    fn strings(seq: &Sequence) -> Vec<String> {
        seq.iter().map(item_string).collect()
    }

    fn with_doc(xml: &str, query: &str) -> Vec<String> {
        let doc = parse_document(xml, None, false, ParseOptions::default()).unwrap();
        let ctx = DynamicContextBuilder::new().with_context_item(doc.root()).build();
        strings(&evaluate_expr(query, &ctx).unwrap())
    }

    #[test]
    fn flwor_binds_and_orders() {
        let out = run("for $x in (3, 1, 2) order by $x descending return $x * 10").unwrap();
        assert_eq!(strings(&out), vec!["30", "20", "10"]);
    }

    #[test]
    fn positional_predicates_count_in_axis_order() {
        let out = with_doc("<a><b><c/></b></a>", "//c/ancestor::*[1]/name()");
        assert_eq!(out, vec!["b"]);
        let out = with_doc("<r><i>1</i><i>2</i><i>3</i></r>", "/r/i[last() - 1]/string()");
        assert_eq!(out, vec!["2"]);
    }

    #[test]
    fn numeric_predicate_selects_by_position() {
        let out = with_doc("<r><i>1</i><i>2</i></r>", "let $n := 2 return /r/i[$n]/string()");
        assert_eq!(out, vec!["2"]);
    }

    #[test]
    fn try_catch_binds_error_code() {
        let out = run("try { 1 div 0 } catch * { $err:code }").unwrap();
        assert_eq!(strings(&out), vec!["err:FOAR0001"]);
    }

    #[test]
    fn self_dependent_global_is_an_error() {
        let err = run("declare variable $a := local:f(); declare function local:f() { $a }; $a").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQDY0054);
    }

    #[test]
    fn missing_context_is_reported() {
        assert_eq!(run(".").unwrap_err().code_enum(), ErrorCode::XPDY0002);
        assert_eq!(run("1/a").unwrap_err().code_enum(), ErrorCode::XPTY0019);
    }

    #[test]
    fn mixed_path_results_are_rejected() {
        let xml = "<r><a/></r>";
        let doc = parse_document(xml, None, false, ParseOptions::default()).unwrap();
        let ctx = DynamicContextBuilder::new().with_context_item(doc.root()).build();
        let err = evaluate_expr("/r/(a, 1)", &ctx).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0018);
    }

    #[test]
    fn function_arguments_are_converted() {
        let out = with_doc(
            "<n>41</n>",
            "declare function local:inc($x as xs:integer) as xs:integer { $x + 1 }; local:inc(/n)",
        );
        assert_eq!(out, vec!["42"]);
    }
}
