//! Tree IR produced by the compiler and walked by the evaluator.
//!
//! Names are resolved to expanded names, variables to frame slots or global
//! ids, and predicates are classified as positional or boolean, so the
//! evaluator never looks at lexical prefixes.

use crate::runtime::{IndexPredicate, LockMode, PathComponent};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// Operator with its operands swapped (`a < b` is `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCompOp {
    Is,
    Precedes,
    Follows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpIR {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Some,
    Every,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisIR {
    Child,
    Attribute,
    SelfAxis,
    Parent,
    Descendant,
    DescendantOrSelf,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Namespace,
}

impl AxisIR {
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Parent
                | Self::Ancestor
                | Self::AncestorOrSelf
                | Self::PrecedingSibling
                | Self::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOrWildcard {
    Name(ExpandedName),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTestIR {
    AnyKind,
    Name(ExpandedName),
    WildcardAny,
    NsWildcard(String),
    LocalWildcard(String),
    KindText,
    KindComment,
    KindNamespace,
    KindProcessingInstruction(Option<String>),
    KindDocument(Option<Box<NodeTestIR>>),
    KindElement {
        name: Option<NameOrWildcard>,
        ty: Option<ExpandedName>,
        nillable: bool,
    },
    KindAttribute {
        name: Option<NameOrWildcard>,
        ty: Option<ExpandedName>,
    },
    KindSchemaElement(ExpandedName),
    KindSchemaAttribute(ExpandedName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleTypeIR {
    pub atomic: ExpandedName,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemTypeIR {
    AnyItem,
    Atomic(ExpandedName),
    Kind(NodeTestIR),
    AnyNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceIR {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqTypeIR {
    EmptySequence,
    Typed { item: ItemTypeIR, occ: OccurrenceIR },
}

/// Predicate after static classification.
#[derive(Debug, Clone)]
pub enum PredicateIR {
    /// `[N]`, `[position() = N]`, `[position() eq N]`
    Index(i64),
    /// `[last()]`, `[position() = last()]`
    Last,
    /// `[last() - K]`
    LastMinus(i64),
    /// Statically boolean and independent of the focus position.
    Boolean(Expr),
    /// Anything else: numeric results test the position, others use EBV.
    General(Expr),
}

impl PredicateIR {
    pub fn is_positional(&self) -> bool {
        !matches!(self, Self::Boolean(_))
    }
}

/// Index-answerable shape of a step's first predicate.
#[derive(Debug, Clone)]
pub enum IndexCondition {
    Lookup {
        path: Vec<PathComponent>,
        predicate: IndexPredicate,
    },
    /// Any answerable conjunct narrows the candidates.
    And(Vec<IndexCondition>),
    /// Every disjunct must be answerable.
    Or(Vec<IndexCondition>),
}

#[derive(Debug, Clone)]
pub struct IndexPlan {
    pub context: ExpandedName,
    pub condition: IndexCondition,
}

#[derive(Debug, Clone)]
pub struct StepIR {
    pub axis: AxisIR,
    pub test: NodeTestIR,
    pub predicates: Vec<PredicateIR>,
    /// Filled in by the optimizer for the first predicate.
    pub index: Option<Arc<IndexPlan>>,
}

#[derive(Debug, Clone)]
pub enum CtorName {
    Static(crate::model::QName),
    /// Evaluated at run time; prefixes resolve against the bindings in scope at compile time.
    Computed {
        expr: Box<Expr>,
        namespaces: Arc<HashMap<String, String>>,
        default_ns: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ElementCtor {
    pub name: CtorName,
    /// Namespace declarations written on a direct constructor.
    pub namespaces: Vec<(Option<String>, String)>,
    /// Each part's atomic values join with single spaces; parts do not.
    pub content: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum ClauseIR {
    For {
        slot: usize,
        position: Option<usize>,
        ty: Option<SeqTypeIR>,
        input: Expr,
    },
    Let {
        slot: usize,
        ty: Option<SeqTypeIR>,
        value: Expr,
    },
    Where(Expr),
}

#[derive(Debug, Clone)]
pub enum GroupIR {
    /// eXist form: after grouping only the partition (at `base`) and the keys are bound.
    Partition { source: usize, keys: Vec<Expr> },
    /// Grouping variables keep their key; every other tuple variable becomes the concatenation.
    Standard { keys: Vec<usize> },
}

#[derive(Debug, Clone)]
pub struct OrderSpecIR {
    pub expr: Expr,
    pub descending: bool,
    pub empty_greatest: bool,
    pub collation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlworIR {
    /// Frame depth when the expression starts; the first binding lives here.
    pub base: usize,
    /// Number of slots bound by the clauses.
    pub width: usize,
    pub clauses: Vec<ClauseIR>,
    pub group: Option<GroupIR>,
    pub order: Option<Vec<OrderSpecIR>>,
    pub return_expr: Box<Expr>,
}

impl FlworIR {
    /// Tuples must be materialized when a clause reorders or regroups them.
    pub fn is_pipelined(&self) -> bool {
        self.group.is_none() && self.order.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CaseIR {
    pub ty: SeqTypeIR,
    pub bind: bool,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub enum CatchTest {
    Any,
    Name(ExpandedName),
    Namespace(String),
    Local(String),
}

#[derive(Debug, Clone)]
pub struct CatchIR {
    pub tests: Vec<CatchTest>,
    /// `$err:code`, `$err:description`, `$err:value` go to `slot..slot+3`,
    /// explicit catch variables follow.
    pub slot: usize,
    pub explicit_vars: usize,
    pub body: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPositionIR {
    Into,
    First,
    Last,
    Following,
    Preceding,
}

#[derive(Debug, Clone)]
pub enum UpdateIR {
    Insert {
        source: Box<Expr>,
        position: InsertPositionIR,
        target: Box<Expr>,
    },
    Replace {
        target: Box<Expr>,
        with: Box<Expr>,
    },
    Value {
        target: Box<Expr>,
        with: Box<Expr>,
    },
    Delete(Box<Expr>),
    Rename {
        target: Box<Expr>,
        name: Box<Expr>,
        namespaces: Arc<HashMap<String, String>>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(XdmAtomicValue),
    Sequence(Vec<Expr>),
    /// Frame slot of a local binding.
    Local(usize),
    /// Prolog variable, evaluated lazily once per evaluation.
    Global(usize),
    /// Host-bound variable that no prolog declares.
    External(ExpandedName),
    ContextItem,
    Position,
    Last,
    /// Root of the context node, or the default collection without a focus.
    Root,
    Step(StepIR),
    /// `input / step`: step evaluated once per input node.
    PathMap {
        input: Box<Expr>,
        step: Box<Expr>,
    },
    Filter {
        input: Box<Expr>,
        predicates: Vec<PredicateIR>,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    UnaryPlus(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    GeneralCompare {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    ValueCompare {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    NodeCompare {
        op: NodeCompOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FullText {
        all: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Range(Box<Expr>, Box<Expr>),
    SetOp {
        op: SetOpIR,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Quantified {
        kind: QuantifierKind,
        /// Slot and input of each binding, bound in order from consecutive slots.
        bindings: Vec<(usize, Expr)>,
        satisfies: Box<Expr>,
    },
    Flwor(Box<FlworIR>),
    Typeswitch {
        operand: Box<Expr>,
        slot: usize,
        cases: Vec<CaseIR>,
        default_bind: bool,
        default: Box<Expr>,
    },
    TryCatch {
        body: Box<Expr>,
        catches: Vec<CatchIR>,
    },
    InstanceOf(Box<Expr>, SeqTypeIR),
    TreatAs(Box<Expr>, SeqTypeIR),
    CastableAs(Box<Expr>, SingleTypeIR),
    CastAs(Box<Expr>, SingleTypeIR),
    CallUser {
        id: usize,
        args: Vec<Expr>,
    },
    CallBuiltin {
        name: ExpandedName,
        args: Vec<Expr>,
    },
    Element(Box<ElementCtor>),
    Attribute {
        name: CtorName,
        content: Vec<Expr>,
    },
    Text(Box<Expr>),
    Comment(Box<Expr>),
    Pi {
        target: CtorName,
        content: Box<Expr>,
    },
    Document(Box<Expr>),
    Update(UpdateIR),
    /// `util:exclusive-lock` / `util:shared-lock`
    Lock {
        mode: LockMode,
        nodes: Box<Expr>,
        body: Box<Expr>,
    },
    /// `util:eval`: compile and run a query string against the current focus.
    DynamicEval {
        query: Box<Expr>,
        namespaces: Arc<HashMap<String, String>>,
    },
    /// `(# exist:optimize #)` and `(# exist:no-optimize #)`
    Optimize {
        enable: bool,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn empty() -> Self {
        Expr::Sequence(Vec::new())
    }

    /// Statically known to produce a single boolean.
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Literal(XdmAtomicValue::Boolean(_))
            | Expr::And(..)
            | Expr::Or(..)
            | Expr::GeneralCompare { .. }
            | Expr::ValueCompare { .. }
            | Expr::NodeCompare { .. }
            | Expr::FullText { .. }
            | Expr::Quantified { .. }
            | Expr::InstanceOf(..)
            | Expr::CastableAs(..) => true,
            Expr::CallBuiltin { name, .. } => {
                name.ns_uri.as_deref() == Some(crate::consts::FNS)
                    && matches!(
                        name.local.as_str(),
                        "not"
                            | "boolean"
                            | "true"
                            | "false"
                            | "exists"
                            | "empty"
                            | "contains"
                            | "starts-with"
                            | "ends-with"
                            | "matches"
                            | "deep-equal"
                            | "lang"
                            | "doc-available"
                    )
            }
            _ => false,
        }
    }

    /// Statically known to produce only nodes.
    pub fn is_node_producing(&self) -> bool {
        match self {
            Expr::Root | Expr::Step(_) | Expr::SetOp { .. } => true,
            Expr::PathMap { step, .. } => step.is_node_producing(),
            Expr::Filter { input, .. } => input.is_node_producing(),
            Expr::CallBuiltin { name, .. } => {
                name.ns_uri.as_deref() == Some(crate::consts::TEXT_NS)
                    && matches!(name.local.as_str(), "match-all" | "match-any")
            }
            _ => false,
        }
    }

    /// True when evaluation reads `position()` or `last()` of the enclosing focus.
    pub fn uses_focus_position(&self) -> bool {
        let mut found = false;
        self.walk_focus(&mut |e| {
            if matches!(e, Expr::Position | Expr::Last) {
                found = true;
            }
        });
        found
    }

    /// Visit `self` and every subexpression evaluated with the same focus.
    ///
    /// Step predicates, path steps and filter predicates get a new focus and are skipped.
    pub fn walk_focus(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        self.for_each_child(&mut |child, same_focus| {
            if same_focus {
                child.walk_focus(f);
            }
        });
    }

    /// Contains an update statement or a call that changes the database
    /// (`xmldb:store`, `xmldb:remove`, `xmldb:create-collection`) anywhere below.
    pub fn contains_update(&self) -> bool {
        match self {
            Expr::Update(_) => return true,
            Expr::CallBuiltin { name, .. }
                if name.ns_uri.as_deref() == Some(crate::consts::XMLDB_NS)
                    && matches!(name.local.as_str(), "store" | "remove" | "create-collection") =>
            {
                return true;
            }
            _ => {}
        }
        let mut found = false;
        self.for_each_child(&mut |child, _| found = found || child.contains_update());
        found
    }

    /// Direct subexpressions, flagged with whether they share `self`'s focus.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&Expr, bool)) {
        let preds = |predicates: &[PredicateIR], f: &mut dyn FnMut(&Expr, bool)| {
            for p in predicates {
                if let PredicateIR::Boolean(e) | PredicateIR::General(e) = p {
                    f(e, false);
                }
            }
        };
        match self {
            Expr::Sequence(items) => items.iter().for_each(|e| f(e, true)),
            Expr::Step(step) => preds(&step.predicates, f),
            Expr::PathMap { input, step } => {
                f(input, true);
                f(step, false);
            }
            Expr::Filter { input, predicates } => {
                f(input, true);
                preds(predicates, f);
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
                f(left, true);
                f(right, true);
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
            | Expr::DynamicEval { query: e, .. } => f(e, true),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                f(cond, true);
                f(then_expr, true);
                f(else_expr, true);
            }
            Expr::Quantified {
                bindings,
                satisfies,
                ..
            } => {
                bindings.iter().for_each(|(_, e)| f(e, true));
                f(satisfies, true);
            }
            Expr::Flwor(flwor) => {
                for c in &flwor.clauses {
                    match c {
                        ClauseIR::For { input: e, .. }
                        | ClauseIR::Let { value: e, .. }
                        | ClauseIR::Where(e) => f(e, true),
                    }
                }
                if let Some(GroupIR::Partition { keys, .. }) = &flwor.group {
                    keys.iter().for_each(|e| f(e, true));
                }
                if let Some(order) = &flwor.order {
                    order.iter().for_each(|s| f(&s.expr, true));
                }
                f(&flwor.return_expr, true);
            }
            Expr::Typeswitch {
                operand,
                cases,
                default,
                ..
            } => {
                f(operand, true);
                cases.iter().for_each(|c| f(&c.body, true));
                f(default, true);
            }
            Expr::TryCatch { body, catches } => {
                f(body, true);
                catches.iter().for_each(|c| f(&c.body, true));
            }
            Expr::CallBuiltin { args, .. } | Expr::CallUser { args, .. } => {
                args.iter().for_each(|e| f(e, true));
            }
            Expr::Element(ctor) => {
                if let CtorName::Computed { expr, .. } = &ctor.name {
                    f(expr, true);
                }
                ctor.content.iter().for_each(|e| f(e, true));
            }
            Expr::Attribute { name, content } => {
                if let CtorName::Computed { expr, .. } = name {
                    f(expr, true);
                }
                content.iter().for_each(|e| f(e, true));
            }
            Expr::Pi { target, content } => {
                if let CtorName::Computed { expr, .. } = target {
                    f(expr, true);
                }
                f(content, true);
            }
            Expr::Lock { nodes, body, .. } => {
                f(nodes, true);
                f(body, true);
            }
            Expr::Update(u) => match u {
                UpdateIR::Insert { source, target, .. } => {
                    f(source, true);
                    f(target, true);
                }
                UpdateIR::Replace { target, with } | UpdateIR::Value { target, with } => {
                    f(target, true);
                    f(with, true);
                }
                UpdateIR::Delete(t) => f(t, true),
                UpdateIR::Rename { target, name, .. } => {
                    f(target, true);
                    f(name, true);
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
}

#[derive(Debug, Clone)]
pub struct UserFunction {
    pub name: ExpandedName,
    pub params: Vec<Option<SeqTypeIR>>,
    pub return_type: Option<SeqTypeIR>,
    /// `None` for `external` declarations.
    pub body: Option<Expr>,
    pub module: usize,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: ExpandedName,
    pub ty: Option<SeqTypeIR>,
    pub init: Option<Expr>,
    pub external: bool,
    pub module: usize,
    pub private: bool,
}

/// Everything compiled from a main module and the library modules it reaches.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<UserFunction>,
    pub globals: Vec<GlobalVar>,
    pub body: Option<Expr>,
    /// `declare option exist:optimize "enable=..."`
    pub optimize: Option<bool>,
    /// `declare option exist:serialize "..."`
    pub serialization: Option<String>,
    pub updating: bool,
}
