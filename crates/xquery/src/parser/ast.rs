//! AST for XQuery main and library modules.
//!
//! Mirrors the grammar closely; all static checks (variable scoping, function
//! resolution, positional predicate detection) happen in the compiler.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Decimal(f64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnarySign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeComp {
    Is,
    Precedes,
    Follows,
}

/// `&=` matches when every query term occurs, `|=` when any does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullTextMode {
    All,
    Any,
}

/// Lexical QName; `ns_uri` is filled in by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn parse(lexical: &str) -> Self {
        match lexical.split_once(':') {
            Some((p, l)) => Self { prefix: Some(p.to_string()), local: l.to_string(), ns_uri: None },
            None => Self { prefix: None, local: lexical.to_string(), ns_uri: None },
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{p}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

// ===== Modules =====

#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    Main(MainModule),
    Library(LibraryModule),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MainModule {
    pub prolog: Prolog,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryModule {
    pub prefix: String,
    pub namespace: String,
    pub prolog: Prolog,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prolog {
    pub decls: Vec<PrologDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrologDecl {
    DefaultElementNamespace(String),
    DefaultFunctionNamespace(String),
    BoundarySpace { preserve: bool },
    Namespace { prefix: String, uri: String },
    Import(ModuleImport),
    Option { name: QName, value: String },
    Variable(VarDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImport {
    pub prefix: Option<String>,
    pub namespace: String,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: QName,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub annotations: Vec<Annotation>,
    pub name: QName,
    pub ty: Option<SequenceType>,
    pub external: bool,
    /// Initializer; for external variables this is the default value.
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: QName,
    pub ty: Option<SequenceType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub annotations: Vec<Annotation>,
    pub name: QName,
    pub params: Vec<Param>,
    pub return_type: Option<SequenceType>,
    /// `None` for `external` functions.
    pub body: Option<Expr>,
}

// ===== Expressions =====

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Core
    Literal(Literal),
    VarRef(QName),
    FunctionCall {
        name: QName,
        args: Vec<Expr>,
    },
    Sequence(Vec<Expr>),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    GeneralComparison {
        left: Box<Expr>,
        op: GeneralComp,
        right: Box<Expr>,
    },
    ValueComparison {
        left: Box<Expr>,
        op: ValueComp,
        right: Box<Expr>,
    },
    NodeComparison {
        left: Box<Expr>,
        op: NodeComp,
        right: Box<Expr>,
    },
    FullText {
        left: Box<Expr>,
        mode: FullTextMode,
        right: Box<Expr>,
    },
    Unary {
        sign: UnarySign,
        expr: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    TreatAs {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    CastableAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    CastAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    ContextItem,

    Path(PathExpr),
    /// Primary expression followed by predicates, e.g. `$x[1]`.
    Filter {
        input: Box<Expr>,
        predicates: Vec<Expr>,
    },

    Quantified {
        kind: Quantifier,
        bindings: Vec<QuantifiedBinding>,
        satisfies: Box<Expr>,
    },
    Flwor(Flwor),
    Typeswitch {
        operand: Box<Expr>,
        cases: Vec<CaseClause>,
        default_var: Option<QName>,
        default: Box<Expr>,
    },
    TryCatch {
        body: Box<Expr>,
        catches: Vec<CatchClause>,
    },

    SetOp {
        left: Box<Expr>,
        op: SetOp,
        right: Box<Expr>,
    },

    // Constructors
    DirElement(DirElement),
    DirComment(String),
    DirPi {
        target: String,
        content: String,
    },
    CompDocument(Box<Expr>),
    CompElement {
        name: ConstructorName,
        content: Option<Box<Expr>>,
    },
    CompAttribute {
        name: ConstructorName,
        content: Option<Box<Expr>>,
    },
    CompText(Option<Box<Expr>>),
    CompComment(Option<Box<Expr>>),
    CompPi {
        target: ConstructorName,
        content: Option<Box<Expr>>,
    },

    /// `(# name contents #) { expr }`
    Extension {
        pragmas: Vec<Pragma>,
        expr: Option<Box<Expr>>,
    },
    Update(UpdateExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Some,
    Every,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantifiedBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub in_expr: Expr,
}

// ===== FLWOR =====

#[derive(Debug, Clone, PartialEq)]
pub struct Flwor {
    pub clauses: Vec<FlworClause>,
    pub where_clause: Option<Box<Expr>>,
    pub group: Option<GroupClause>,
    pub order: Option<OrderBy>,
    pub return_expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlworClause {
    For(ForBinding),
    Let(LetBinding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub position: Option<QName>,
    pub in_expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupClause {
    /// `group $x as $partition by expr as $key, ...`
    Partition {
        source: QName,
        partition: QName,
        keys: Vec<(Expr, QName)>,
    },
    /// `group by $k` / `group by $k := expr`
    Standard(Vec<GroupingSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingSpec {
    pub var: QName,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub stable: bool,
    pub specs: Vec<OrderSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub expr: Expr,
    pub descending: bool,
    pub empty_greatest: Option<bool>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    pub var: Option<QName>,
    pub ty: SequenceType,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub tests: Vec<NameTest>,
    /// Optional `($code, $description, $value)` bindings.
    pub vars: Vec<QName>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pragma {
    pub name: QName,
    pub contents: String,
}

// ===== Updates =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Into,
    First,
    Last,
    Following,
    Preceding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateExpr {
    Insert {
        source: Box<Expr>,
        position: InsertPosition,
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
    },
}

// ===== Constructors =====

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorName {
    Literal(QName),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirElement {
    pub name: QName,
    pub attributes: Vec<DirAttribute>,
    pub content: Vec<ElementContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirAttribute {
    pub name: QName,
    pub value: Vec<AttributeValuePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValuePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    Text(String),
    /// Literal character data from CDATA or character references; never
    /// treated as boundary whitespace.
    CharData(String),
    Expr(Expr),
    Element(DirElement),
    Comment(String),
    Pi { target: String, content: String },
}

// ===== Paths and steps =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStart {
    Root,
    RootDescendant,
    Relative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<PathStep>,
}

/// A step after a `/`; `//` is expanded into a `descendant-or-self::node()` step.
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    Axis(Step),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    Attribute,
    SelfAxis,
    DescendantOrSelf,
    FollowingSibling,
    Following,
    Namespace,
    Parent,
    Ancestor,
    PrecedingSibling,
    Preceding,
    AncestorOrSelf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    pub fn descendant_or_self_node() -> Self {
        Self { axis: Axis::DescendantOrSelf, test: NodeTest::Kind(KindTest::AnyKind), predicates: vec![] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Name(NameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    QName(QName),
    Wildcard(WildcardName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WildcardName {
    Any,
    /// `prefix:*`
    NsWildcard(String),
    /// `*:local`
    LocalWildcard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    Text,
    Comment,
    NamespaceNode,
    ProcessingInstruction(Option<String>),
    Element { name: Option<ElementNameOrWildcard>, ty: Option<TypeName>, nillable: bool },
    Attribute { name: Option<AttributeNameOrWildcard>, ty: Option<TypeName> },
    SchemaElement(QName),
    SchemaAttribute(QName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementNameOrWildcard {
    Name(QName),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeNameOrWildcard {
    Name(QName),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeName(pub QName);

// ===== Types / SequenceType =====

#[derive(Debug, Clone, PartialEq)]
pub struct SingleType {
    pub atomic: QName,
    pub optional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemType {
    Kind(KindTest),
    Item,
    Atomic(QName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceType {
    EmptySequence,
    Typed { item: ItemType, occ: Occurrence },
}
