//! Lowering from the AST to the tree IR.
//!
//! Compilation runs in three passes over every module a query reaches: the
//! prologs are read (namespaces, options, imports, recursively), then every
//! function and variable signature is registered, then bodies are lowered.
//! Registering signatures first lets modules import each other in cycles.

use crate::consts::{
    BUILTIN_MODULES, ERR_NS, EXIST_NS, FNS, RESERVED_NAMESPACES, UTIL_NS, XML_URI,
    XMLNS_URI, XQUERY_NS, XS,
};
use crate::engine::casting::{self, AtomicType};
use crate::engine::functions::default_function_registry;
use crate::modules::ModuleLocation;
use crate::parser::{self, ast};
use crate::runtime::{Error, ErrorCode, LockMode, ResolveError, StaticContext};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use ir::{
    ArithOp, CaseIR, CatchIR, CatchTest, ClauseIR, ComparisonOp, CtorName, ElementCtor, Expr,
    FlworIR, GlobalVar, GroupIR, InsertPositionIR, ItemTypeIR, NameOrWildcard, NodeCompOp,
    NodeTestIR, OccurrenceIR, OrderSpecIR, PredicateIR, Program, QuantifierKind, SeqTypeIR,
    SetOpIR, SingleTypeIR, StepIR, UpdateIR, UserFunction,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub mod ir;
pub mod optimizer;

static DEFAULT_STATIC_CONTEXT: OnceLock<StaticContext> = OnceLock::new();

fn default_static_ctx() -> &'static StaticContext {
    DEFAULT_STATIC_CONTEXT.get_or_init(StaticContext::default)
}

/// A query ready for evaluation; cheap to clone and share between threads.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub program: Arc<Program>,
    pub static_ctx: Arc<StaticContext>,
    pub source: Arc<str>,
}

impl CompiledQuery {
    /// True when the query contains update statements.
    pub fn is_updating(&self) -> bool {
        self.program.updating
    }

    /// Parameters of `declare option exist:serialize`, if present.
    pub fn serialization(&self) -> Option<&str> {
        self.program.serialization.as_deref()
    }
}

/// Compile using a lazily initialized default StaticContext.
pub fn compile(source: &str) -> Result<CompiledQuery, Error> {
    compile_with_context(source, default_static_ctx())
}

/// Compile a main module against an explicit StaticContext.
pub fn compile_with_context(source: &str, static_ctx: &StaticContext) -> Result<CompiledQuery, Error> {
    let module = parser::parse_module(source)?;
    let ast::Module::Main(main) = module else {
        return Err(Error::from_code(
            ErrorCode::XPST0003,
            "a library module cannot be evaluated on its own",
        ));
    };
    let mut c = Compiler::new(static_ctx);
    c.add_unit(None, None, None, main.prolog, Some(main.body))?;
    c.register_declarations()?;
    let mut program = c.finish()?;
    optimizer::optimize(&mut program);
    debug!(
        functions = program.functions.len(),
        globals = program.globals.len(),
        updating = program.updating,
        "compiled query"
    );
    Ok(CompiledQuery {
        program: Arc::new(program),
        static_ctx: Arc::new(static_ctx.clone()),
        source: Arc::from(source),
    })
}

type CResult<T> = Result<T, Error>;

fn static_err(code: ErrorCode, msg: impl Into<String>) -> Error {
    Error::from_code(code, msg)
}

/// One main or library module taking part in a compilation.
struct Unit {
    namespace: Option<String>,
    location: Option<ModuleLocation>,
    prolog: ast::Prolog,
    body: Option<ast::Expr>,
    namespaces: HashMap<String, String>,
    declared_prefixes: HashSet<String>,
    default_element_ns: Option<String>,
    default_function_ns: Option<String>,
    boundary_space_preserve: bool,
    imported: HashSet<String>,
}

/// Lexical scope while lowering one body.
struct Scope {
    unit: usize,
    locals: Vec<ExpandedName>,
    /// Bindings declared on enclosing direct constructors; "" is the default element namespace.
    ns_overrides: Vec<(String, String)>,
}

impl Scope {
    fn new(unit: usize) -> Self {
        Self {
            unit,
            locals: Vec::new(),
            ns_overrides: Vec::new(),
        }
    }

    fn push(&mut self, name: ExpandedName) -> usize {
        self.locals.push(name);
        self.locals.len() - 1
    }

    fn depth(&self) -> usize {
        self.locals.len()
    }

    fn truncate(&mut self, depth: usize) {
        self.locals.truncate(depth);
    }

    fn lookup(&self, name: &ExpandedName) -> Option<usize> {
        self.locals.iter().rposition(|n| n == name)
    }
}

struct Compiler<'a> {
    static_ctx: &'a StaticContext,
    units: Vec<Unit>,
    unit_keys: HashMap<(String, ModuleLocation), usize>,
    functions: Vec<UserFunction>,
    function_index: HashMap<(ExpandedName, usize), usize>,
    globals: Vec<GlobalVar>,
    global_index: HashMap<ExpandedName, usize>,
    optimize: Option<bool>,
    serialization: Option<String>,
}

impl<'a> Compiler<'a> {
    fn new(static_ctx: &'a StaticContext) -> Self {
        Self {
            static_ctx,
            units: Vec::new(),
            unit_keys: HashMap::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            optimize: None,
            serialization: None,
        }
    }

    // ===== Pass 1: prologs and imports =====

    fn add_unit(
        &mut self,
        namespace: Option<(String, String)>,
        location: Option<ModuleLocation>,
        key: Option<(String, ModuleLocation)>,
        prolog: ast::Prolog,
        body: Option<ast::Expr>,
    ) -> CResult<usize> {
        let idx = self.units.len();
        let mut namespaces = self.static_ctx.namespaces.by_prefix.clone();
        let mut declared_prefixes = HashSet::new();
        let module_ns = match namespace {
            Some((prefix, ns)) => {
                if ns.is_empty() {
                    return Err(static_err(
                        ErrorCode::XQST0088,
                        "the target namespace of a module must not be empty",
                    ));
                }
                if prefix == "xml" || prefix == "xmlns" {
                    return Err(static_err(
                        ErrorCode::XQST0070,
                        format!("prefix '{prefix}' cannot be used for a module"),
                    ));
                }
                namespaces.insert(prefix.clone(), ns.clone());
                declared_prefixes.insert(prefix);
                Some(ns)
            }
            None => None,
        };
        if let Some(k) = key {
            self.unit_keys.insert(k, idx);
        }
        self.units.push(Unit {
            namespace: module_ns,
            location,
            prolog: ast::Prolog::default(),
            body,
            namespaces,
            declared_prefixes,
            default_element_ns: self.static_ctx.default_element_namespace.clone(),
            default_function_ns: self.static_ctx.default_function_namespace.clone(),
            boundary_space_preserve: self.static_ctx.boundary_space_preserve,
            imported: HashSet::new(),
        });

        let mut imported_here = HashSet::new();
        for decl in &prolog.decls {
            match decl {
                ast::PrologDecl::DefaultElementNamespace(uri) => {
                    self.units[idx].default_element_ns = Some(uri.clone()).filter(|u| !u.is_empty());
                }
                ast::PrologDecl::DefaultFunctionNamespace(uri) => {
                    self.units[idx].default_function_ns = Some(uri.clone()).filter(|u| !u.is_empty());
                }
                ast::PrologDecl::BoundarySpace { preserve } => {
                    self.units[idx].boundary_space_preserve = *preserve;
                }
                ast::PrologDecl::Namespace { prefix, uri } => {
                    self.declare_namespace(idx, prefix, uri)?;
                }
                ast::PrologDecl::Import(import) => {
                    self.import_module(idx, import, &mut imported_here)?;
                }
                ast::PrologDecl::Option { name, value } => {
                    self.declare_option(idx, name, value)?;
                }
                ast::PrologDecl::Variable(_) | ast::PrologDecl::Function(_) => {}
            }
        }
        self.units[idx].prolog = prolog;
        Ok(idx)
    }

    fn declare_namespace(&mut self, unit: usize, prefix: &str, uri: &str) -> CResult<()> {
        if prefix == "xml" || prefix == "xmlns" {
            return Err(static_err(
                ErrorCode::XQST0070,
                format!("the prefix '{prefix}' cannot be redeclared"),
            ));
        }
        if uri == XML_URI || uri == XMLNS_URI {
            return Err(static_err(
                ErrorCode::XQST0070,
                format!("the namespace '{uri}' cannot be bound to another prefix"),
            ));
        }
        let u = &mut self.units[unit];
        if !u.declared_prefixes.insert(prefix.to_string()) {
            return Err(static_err(
                ErrorCode::XQST0033,
                format!("namespace prefix '{prefix}' is already bound"),
            ));
        }
        if uri.is_empty() {
            u.namespaces.remove(prefix);
        } else {
            u.namespaces.insert(prefix.to_string(), uri.to_string());
        }
        Ok(())
    }

    fn declare_option(&mut self, unit: usize, name: &ast::QName, value: &str) -> CResult<()> {
        let ns = match &name.prefix {
            Some(p) => self.unit_prefix(unit, p)?,
            None => return Ok(()),
        };
        if ns != EXIST_NS || unit != 0 {
            debug!(option = %name, "ignoring option");
            return Ok(());
        }
        match name.local.as_str() {
            "optimize" => {
                for part in value.split_whitespace() {
                    if let Some(v) = part.strip_prefix("enable=") {
                        self.optimize = Some(matches!(v, "yes" | "true"));
                    }
                }
            }
            "serialize" => self.serialization = Some(value.to_string()),
            other => debug!(option = other, "ignoring exist option"),
        }
        Ok(())
    }

    fn import_module(
        &mut self,
        unit: usize,
        import: &ast::ModuleImport,
        imported_here: &mut HashSet<String>,
    ) -> CResult<()> {
        let ns = import.namespace.as_str();
        if ns.is_empty() {
            return Err(static_err(
                ErrorCode::XQST0088,
                "the namespace of an imported module must not be empty",
            ));
        }
        if !imported_here.insert(ns.to_string()) {
            return Err(static_err(
                ErrorCode::XQST0047,
                format!("module '{ns}' is imported twice"),
            ));
        }
        if let Some(prefix) = &import.prefix {
            if prefix == "xml" || prefix == "xmlns" {
                return Err(static_err(
                    ErrorCode::XQST0070,
                    format!("prefix '{prefix}' cannot be bound by a module import"),
                ));
            }
            let u = &mut self.units[unit];
            if !u.declared_prefixes.insert(prefix.clone()) {
                return Err(static_err(
                    ErrorCode::XQST0033,
                    format!("namespace prefix '{prefix}' is already bound"),
                ));
            }
            u.namespaces.insert(prefix.clone(), ns.to_string());
        }
        self.units[unit].imported.insert(ns.to_string());
        if BUILTIN_MODULES.contains(&ns) {
            return Ok(());
        }
        let Some(resolver) = self.static_ctx.modules.clone() else {
            return Err(static_err(
                ErrorCode::XQST0059,
                format!("cannot load module '{ns}': no module resolver is configured"),
            ));
        };
        let mut hints = import.locations.clone();
        if hints.is_empty() {
            hints = resolver.registered_locations(ns);
        }
        if hints.is_empty() {
            return Err(static_err(
                ErrorCode::XQST0059,
                format!("no location is known for module '{ns}'"),
            ));
        }
        for hint in &hints {
            let importer = self.units[unit].location.clone();
            let (location, module) = resolver.load(
                ns,
                hint,
                importer.as_ref(),
                self.static_ctx.module_base.as_deref(),
            )?;
            let key = (ns.to_string(), location.clone());
            if self.unit_keys.contains_key(&key) {
                continue;
            }
            debug!(namespace = ns, %location, "importing module");
            self.add_unit(
                Some((module.prefix.clone(), module.namespace.clone())),
                Some(location),
                Some(key),
                module.prolog.clone(),
                None,
            )?;
        }
        Ok(())
    }

    // ===== Pass 2: signatures =====

    fn register_declarations(&mut self) -> CResult<()> {
        for u in 0..self.units.len() {
            let decls = self.units[u].prolog.decls.clone();
            for decl in &decls {
                match decl {
                    ast::PrologDecl::Variable(v) => self.register_variable(u, v)?,
                    ast::PrologDecl::Function(f) => self.register_function(u, f)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn declaration_name(&self, unit: usize, name: &ast::QName, function: bool) -> CResult<ExpandedName> {
        let ns = match &name.prefix {
            Some(p) => Some(self.unit_prefix(unit, p)?),
            None if function => self.units[unit].default_function_ns.clone(),
            None => None,
        };
        let expanded = ExpandedName::new(ns, name.local.clone());
        let ns_str = expanded.ns_uri.as_deref().unwrap_or("");
        if RESERVED_NAMESPACES.contains(&ns_str) {
            return Err(static_err(
                ErrorCode::XQST0045,
                format!("'{name}' is declared in a reserved namespace"),
            ));
        }
        if let Some(module_ns) = &self.units[unit].namespace
            && ns_str != module_ns
        {
            return Err(static_err(
                ErrorCode::XQST0048,
                format!("'{name}' is not in the module namespace {module_ns}"),
            ));
        }
        Ok(expanded)
    }

    /// Validate annotations and report whether `%private` is among them.
    fn annotations(&self, unit: usize, annotations: &[ast::Annotation]) -> CResult<bool> {
        let mut private = false;
        for a in annotations {
            let ns = match &a.name.prefix {
                Some(p) => self.unit_prefix(unit, p)?,
                None => XQUERY_NS.to_string(),
            };
            if RESERVED_NAMESPACES.contains(&ns.as_str()) {
                return Err(static_err(
                    ErrorCode::XQST0045,
                    format!("annotation %{} is in the reserved namespace {ns}", a.name),
                ));
            }
            if ns == XQUERY_NS {
                match a.name.local.as_str() {
                    "private" => private = true,
                    "public" => {}
                    other => {
                        return Err(static_err(
                            ErrorCode::XQST0045,
                            format!("unknown annotation %{other}"),
                        ));
                    }
                }
            }
        }
        Ok(private)
    }

    fn register_variable(&mut self, unit: usize, v: &ast::VarDecl) -> CResult<()> {
        let name = self.declaration_name(unit, &v.name, false)?;
        let private = self.annotations(unit, &v.annotations)?;
        if self.global_index.contains_key(&name) {
            return Err(static_err(
                ErrorCode::XQST0049,
                format!("variable ${} is declared more than once", v.name),
            ));
        }
        self.global_index.insert(name.clone(), self.globals.len());
        self.globals.push(GlobalVar {
            name,
            ty: None,
            init: None,
            external: v.external,
            module: unit,
            private,
        });
        Ok(())
    }

    fn register_function(&mut self, unit: usize, f: &ast::FunctionDecl) -> CResult<()> {
        let name = self.declaration_name(unit, &f.name, true)?;
        let private = self.annotations(unit, &f.annotations)?;
        let arity = f.params.len();
        let key = (name.clone(), arity);
        if self.function_index.contains_key(&key) {
            return Err(static_err(
                ErrorCode::XQST0034,
                format!("function {name}#{arity} is already declared"),
            ));
        }
        let mut seen = HashSet::new();
        for p in &f.params {
            let pname = self.declaration_param(unit, &p.name)?;
            if !seen.insert(pname) {
                return Err(static_err(
                    ErrorCode::XQST0039,
                    format!("duplicate parameter ${} in {}", p.name, f.name),
                ));
            }
        }
        self.function_index.insert(key, self.functions.len());
        self.functions.push(UserFunction {
            name,
            params: vec![None; arity],
            return_type: None,
            body: None,
            module: unit,
            private,
        });
        Ok(())
    }

    fn declaration_param(&self, unit: usize, name: &ast::QName) -> CResult<ExpandedName> {
        self.var_name(&Scope::new(unit), name)
    }

    // ===== Pass 3: bodies =====

    fn finish(mut self) -> CResult<Program> {
        for u in 0..self.units.len() {
            let decls = self.units[u].prolog.decls.clone();
            for decl in &decls {
                match decl {
                    ast::PrologDecl::Variable(v) => {
                        let name = self.declaration_name(u, &v.name, false)?;
                        let id = self.global_index[&name];
                        let mut scope = Scope::new(u);
                        let ty = v.ty.as_ref().map(|t| self.lower_seq_type(&scope, t)).transpose()?;
                        let init = match &v.value {
                            Some(e) => Some(self.lower_expr(&mut scope, e)?),
                            None => None,
                        };
                        self.globals[id].ty = ty;
                        self.globals[id].init = init;
                    }
                    ast::PrologDecl::Function(f) => {
                        let name = self.declaration_name(u, &f.name, true)?;
                        let id = self.function_index[&(name, f.params.len())];
                        let mut scope = Scope::new(u);
                        let mut params = Vec::with_capacity(f.params.len());
                        for p in &f.params {
                            params.push(p.ty.as_ref().map(|t| self.lower_seq_type(&scope, t)).transpose()?);
                            let pname = self.var_name(&scope, &p.name)?;
                            scope.push(pname);
                        }
                        let return_type = f
                            .return_type
                            .as_ref()
                            .map(|t| self.lower_seq_type(&scope, t))
                            .transpose()?;
                        let body = match &f.body {
                            Some(b) => Some(self.lower_expr(&mut scope, b)?),
                            None => None,
                        };
                        let func = &mut self.functions[id];
                        func.params = params;
                        func.return_type = return_type;
                        func.body = body;
                    }
                    _ => {}
                }
            }
        }
        let body = match self.units[0].body.take() {
            Some(b) => Some(self.lower_expr(&mut Scope::new(0), &b)?),
            None => None,
        };
        let updating = body.as_ref().is_some_and(Expr::contains_update)
            || self
                .functions
                .iter()
                .filter_map(|f| f.body.as_ref())
                .any(Expr::contains_update)
            || self
                .globals
                .iter()
                .filter_map(|g| g.init.as_ref())
                .any(Expr::contains_update);
        Ok(Program {
            functions: self.functions,
            globals: self.globals,
            body,
            optimize: self.optimize,
            serialization: self.serialization,
            updating,
        })
    }

    // ===== Names =====

    fn unit_prefix(&self, unit: usize, prefix: &str) -> CResult<String> {
        if prefix == "xml" {
            return Ok(XML_URI.to_string());
        }
        self.units[unit].namespaces.get(prefix).cloned().ok_or_else(|| {
            static_err(
                ErrorCode::XPST0081,
                format!("namespace prefix '{prefix}' is not declared"),
            )
        })
    }

    fn resolve_prefix(&self, scope: &Scope, prefix: &str) -> CResult<String> {
        if let Some((_, uri)) = scope.ns_overrides.iter().rev().find(|(p, _)| p == prefix) {
            if uri.is_empty() {
                return Err(static_err(
                    ErrorCode::XPST0081,
                    format!("namespace prefix '{prefix}' is undeclared here"),
                ));
            }
            return Ok(uri.clone());
        }
        self.unit_prefix(scope.unit, prefix)
    }

    fn default_element_ns(&self, scope: &Scope) -> Option<String> {
        if let Some((_, uri)) = scope.ns_overrides.iter().rev().find(|(p, _)| p.is_empty()) {
            return Some(uri.clone()).filter(|u| !u.is_empty());
        }
        self.units[scope.unit].default_element_ns.clone()
    }

    fn element_name(&self, scope: &Scope, q: &ast::QName) -> CResult<ExpandedName> {
        let ns = match &q.prefix {
            Some(p) => Some(self.resolve_prefix(scope, p)?),
            None => self.default_element_ns(scope),
        };
        Ok(ExpandedName::new(ns, q.local.clone()))
    }

    fn plain_name(&self, scope: &Scope, q: &ast::QName) -> CResult<ExpandedName> {
        let ns = match &q.prefix {
            Some(p) => Some(self.resolve_prefix(scope, p)?),
            None => q.ns_uri.clone(),
        };
        Ok(ExpandedName::new(ns, q.local.clone()))
    }

    fn var_name(&self, scope: &Scope, q: &ast::QName) -> CResult<ExpandedName> {
        self.plain_name(scope, q)
    }

    fn type_name(&self, scope: &Scope, q: &ast::QName) -> CResult<ExpandedName> {
        match &q.prefix {
            Some(p) => Ok(ExpandedName::new(Some(self.resolve_prefix(scope, p)?), q.local.clone())),
            None => Ok(ExpandedName::new(
                self.default_element_ns(scope).or_else(|| Some(XS.to_string())),
                q.local.clone(),
            )),
        }
    }

    fn model_qname(&self, scope: &Scope, q: &ast::QName, element: bool) -> CResult<crate::model::QName> {
        let expanded = if element {
            self.element_name(scope, q)?
        } else {
            self.plain_name(scope, q)?
        };
        Ok(crate::model::QName::new(q.prefix.clone(), q.local.clone(), expanded.ns_uri))
    }

    fn namespace_snapshot(&self, scope: &Scope) -> Arc<HashMap<String, String>> {
        let mut map = self.units[scope.unit].namespaces.clone();
        for (p, uri) in &scope.ns_overrides {
            if p.is_empty() {
                continue;
            }
            if uri.is_empty() {
                map.remove(p);
            } else {
                map.insert(p.clone(), uri.clone());
            }
        }
        Arc::new(map)
    }

    fn ctor_name(&mut self, scope: &mut Scope, name: &ast::ConstructorName, element: bool) -> CResult<CtorName> {
        match name {
            ast::ConstructorName::Literal(q) => Ok(CtorName::Static(self.model_qname(scope, q, element)?)),
            ast::ConstructorName::Computed(e) => {
                let expr = Box::new(self.lower_expr(scope, e)?);
                Ok(CtorName::Computed {
                    expr,
                    namespaces: self.namespace_snapshot(scope),
                    default_ns: if element { self.default_element_ns(scope) } else { None },
                })
            }
        }
    }

    // ===== Visibility =====

    fn visible(&self, scope: &Scope, module: usize, private: bool) -> bool {
        if module == scope.unit {
            return true;
        }
        let (Some(target_ns), caller) = (&self.units[module].namespace, &self.units[scope.unit]) else {
            return false;
        };
        if caller.namespace.as_ref() == Some(target_ns) {
            return true;
        }
        !private && caller.imported.contains(target_ns)
    }

    // ===== Expressions =====

    fn lower_boxed(&mut self, scope: &mut Scope, e: &ast::Expr) -> CResult<Box<Expr>> {
        Ok(Box::new(self.lower_expr(scope, e)?))
    }

    fn lower_expr(&mut self, scope: &mut Scope, e: &ast::Expr) -> CResult<Expr> {
        use ast::Expr as E;
        match e {
            E::Literal(l) => Ok(Expr::Literal(lower_literal(l))),
            E::VarRef(q) => self.lower_var_ref(scope, q),
            E::FunctionCall { name, args } => self.lower_call(scope, name, args),
            E::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    out.push(self.lower_expr(scope, it)?);
                }
                if out.len() == 1 {
                    return Ok(out.remove(0));
                }
                Ok(Expr::Sequence(out))
            }
            E::Binary { left, op, right } => {
                let l = self.lower_boxed(scope, left)?;
                let r = self.lower_boxed(scope, right)?;
                Ok(match op {
                    ast::BinaryOp::And => Expr::And(l, r),
                    ast::BinaryOp::Or => Expr::Or(l, r),
                    ast::BinaryOp::Add => Expr::Arith { op: ArithOp::Add, left: l, right: r },
                    ast::BinaryOp::Sub => Expr::Arith { op: ArithOp::Sub, left: l, right: r },
                    ast::BinaryOp::Mul => Expr::Arith { op: ArithOp::Mul, left: l, right: r },
                    ast::BinaryOp::Div => Expr::Arith { op: ArithOp::Div, left: l, right: r },
                    ast::BinaryOp::IDiv => Expr::Arith { op: ArithOp::IDiv, left: l, right: r },
                    ast::BinaryOp::Mod => Expr::Arith { op: ArithOp::Mod, left: l, right: r },
                })
            }
            E::GeneralComparison { left, op, right } => Ok(Expr::GeneralCompare {
                op: map_general(*op),
                left: self.lower_boxed(scope, left)?,
                right: self.lower_boxed(scope, right)?,
            }),
            E::ValueComparison { left, op, right } => Ok(Expr::ValueCompare {
                op: map_value(*op),
                left: self.lower_boxed(scope, left)?,
                right: self.lower_boxed(scope, right)?,
            }),
            E::NodeComparison { left, op, right } => Ok(Expr::NodeCompare {
                op: match op {
                    ast::NodeComp::Is => NodeCompOp::Is,
                    ast::NodeComp::Precedes => NodeCompOp::Precedes,
                    ast::NodeComp::Follows => NodeCompOp::Follows,
                },
                left: self.lower_boxed(scope, left)?,
                right: self.lower_boxed(scope, right)?,
            }),
            E::FullText { left, mode, right } => Ok(Expr::FullText {
                all: *mode == ast::FullTextMode::All,
                left: self.lower_boxed(scope, left)?,
                right: self.lower_boxed(scope, right)?,
            }),
            E::Unary { sign, expr } => {
                let inner = self.lower_boxed(scope, expr)?;
                Ok(match sign {
                    ast::UnarySign::Minus => match *inner {
                        Expr::Literal(XdmAtomicValue::Integer(i)) if i != i64::MIN => {
                            Expr::Literal(XdmAtomicValue::Integer(-i))
                        }
                        Expr::Literal(XdmAtomicValue::Decimal(d)) => Expr::Literal(XdmAtomicValue::Decimal(-d)),
                        Expr::Literal(XdmAtomicValue::Double(d)) => Expr::Literal(XdmAtomicValue::Double(-d)),
                        other => Expr::Negate(Box::new(other)),
                    },
                    ast::UnarySign::Plus => Expr::UnaryPlus(inner),
                })
            }
            E::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => Ok(Expr::If {
                cond: self.lower_boxed(scope, cond)?,
                then_expr: self.lower_boxed(scope, then_expr)?,
                else_expr: self.lower_boxed(scope, else_expr)?,
            }),
            E::Range { start, end } => Ok(Expr::Range(
                self.lower_boxed(scope, start)?,
                self.lower_boxed(scope, end)?,
            )),
            E::InstanceOf { expr, ty } => Ok(Expr::InstanceOf(
                self.lower_boxed(scope, expr)?,
                self.lower_seq_type(scope, ty)?,
            )),
            E::TreatAs { expr, ty } => Ok(Expr::TreatAs(
                self.lower_boxed(scope, expr)?,
                self.lower_seq_type(scope, ty)?,
            )),
            E::CastableAs { expr, ty } => Ok(Expr::CastableAs(
                self.lower_boxed(scope, expr)?,
                self.lower_single_type(scope, ty)?,
            )),
            E::CastAs { expr, ty } => Ok(Expr::CastAs(
                self.lower_boxed(scope, expr)?,
                self.lower_single_type(scope, ty)?,
            )),
            E::ContextItem => Ok(Expr::ContextItem),
            E::Path(p) => self.lower_path(scope, p),
            E::Filter { input, predicates } => Ok(Expr::Filter {
                input: self.lower_boxed(scope, input)?,
                predicates: self.lower_predicates(scope, predicates)?,
            }),
            E::Quantified {
                kind,
                bindings,
                satisfies,
            } => {
                let depth = scope.depth();
                let mut out = Vec::with_capacity(bindings.len());
                for b in bindings {
                    let input = self.lower_expr(scope, &b.in_expr)?;
                    let name = self.var_name(scope, &b.var)?;
                    out.push((scope.push(name), input));
                }
                let satisfies = self.lower_boxed(scope, satisfies)?;
                scope.truncate(depth);
                Ok(Expr::Quantified {
                    kind: match kind {
                        ast::Quantifier::Some => QuantifierKind::Some,
                        ast::Quantifier::Every => QuantifierKind::Every,
                    },
                    bindings: out,
                    satisfies,
                })
            }
            E::Flwor(f) => self.lower_flwor(scope, f),
            E::Typeswitch {
                operand,
                cases,
                default_var,
                default,
            } => {
                let operand = self.lower_boxed(scope, operand)?;
                let slot = scope.depth();
                let mut out = Vec::with_capacity(cases.len());
                for c in cases {
                    let ty = self.lower_seq_type(scope, &c.ty)?;
                    let bind = if let Some(v) = &c.var {
                        let name = self.var_name(scope, v)?;
                        scope.push(name);
                        true
                    } else {
                        false
                    };
                    let body = self.lower_expr(scope, &c.body)?;
                    scope.truncate(slot);
                    out.push(CaseIR { ty, bind, body });
                }
                let default_bind = if let Some(v) = default_var {
                    let name = self.var_name(scope, v)?;
                    scope.push(name);
                    true
                } else {
                    false
                };
                let default = self.lower_boxed(scope, default)?;
                scope.truncate(slot);
                Ok(Expr::Typeswitch {
                    operand,
                    slot,
                    cases: out,
                    default_bind,
                    default,
                })
            }
            E::TryCatch { body, catches } => {
                let body = self.lower_boxed(scope, body)?;
                let mut out = Vec::with_capacity(catches.len());
                for c in catches {
                    let tests = c
                        .tests
                        .iter()
                        .map(|t| self.catch_test(scope, t))
                        .collect::<CResult<Vec<_>>>()?;
                    let slot = scope.depth();
                    for local in ["code", "description", "value"] {
                        scope.push(ExpandedName::ns(ERR_NS, local));
                    }
                    for v in &c.vars {
                        let name = self.var_name(scope, v)?;
                        scope.push(name);
                    }
                    let catch_body = self.lower_expr(scope, &c.body)?;
                    scope.truncate(slot);
                    out.push(CatchIR {
                        tests,
                        slot,
                        explicit_vars: c.vars.len(),
                        body: catch_body,
                    });
                }
                Ok(Expr::TryCatch { body, catches: out })
            }
            E::SetOp { left, op, right } => Ok(Expr::SetOp {
                op: match op {
                    ast::SetOp::Union => SetOpIR::Union,
                    ast::SetOp::Intersect => SetOpIR::Intersect,
                    ast::SetOp::Except => SetOpIR::Except,
                },
                left: self.lower_boxed(scope, left)?,
                right: self.lower_boxed(scope, right)?,
            }),
            E::DirElement(d) => self.lower_dir_element(scope, d),
            E::DirComment(text) => Ok(Expr::Comment(Box::new(string_literal(text)))),
            E::DirPi { target, content } => Ok(Expr::Pi {
                target: CtorName::Static(crate::model::QName::local(target.clone())),
                content: Box::new(string_literal(content)),
            }),
            E::CompDocument(inner) => Ok(Expr::Document(self.lower_boxed(scope, inner)?)),
            E::CompElement { name, content } => {
                let name = self.ctor_name(scope, name, true)?;
                let content = match content {
                    Some(c) => vec![self.lower_expr(scope, c)?],
                    None => Vec::new(),
                };
                Ok(Expr::Element(Box::new(ElementCtor {
                    name,
                    namespaces: Vec::new(),
                    content,
                })))
            }
            E::CompAttribute { name, content } => {
                let name = self.ctor_name(scope, name, false)?;
                let content = match content {
                    Some(c) => vec![self.lower_expr(scope, c)?],
                    None => Vec::new(),
                };
                Ok(Expr::Attribute { name, content })
            }
            E::CompText(content) => Ok(Expr::Text(Box::new(self.lower_optional(scope, content.as_deref())?))),
            E::CompComment(content) => {
                Ok(Expr::Comment(Box::new(self.lower_optional(scope, content.as_deref())?)))
            }
            E::CompPi { target, content } => Ok(Expr::Pi {
                target: self.ctor_name(scope, target, false)?,
                content: Box::new(self.lower_optional(scope, content.as_deref())?),
            }),
            E::Extension { pragmas, expr } => self.lower_extension(scope, pragmas, expr.as_deref()),
            E::Update(u) => self.lower_update(scope, u),
        }
    }

    fn lower_optional(&mut self, scope: &mut Scope, e: Option<&ast::Expr>) -> CResult<Expr> {
        match e {
            Some(e) => self.lower_expr(scope, e),
            None => Ok(Expr::empty()),
        }
    }

    fn lower_var_ref(&mut self, scope: &Scope, q: &ast::QName) -> CResult<Expr> {
        let name = self.var_name(scope, q)?;
        if let Some(slot) = scope.lookup(&name) {
            return Ok(Expr::Local(slot));
        }
        if let Some(&id) = self.global_index.get(&name) {
            let g = &self.globals[id];
            if self.visible(scope, g.module, g.private) {
                return Ok(Expr::Global(id));
            }
        }
        if self.static_ctx.in_scope_variables.contains(&name) {
            return Ok(Expr::External(name));
        }
        Err(static_err(
            ErrorCode::XPST0008,
            format!("variable ${q} is not declared"),
        ))
    }

    fn function_name(&self, scope: &Scope, q: &ast::QName) -> CResult<ExpandedName> {
        if q.prefix.is_none()
            && let Some(ns) = &q.ns_uri
        {
            return Ok(ExpandedName::ns(ns, q.local.clone()));
        }
        let ns = match &q.prefix {
            Some(p) => Some(self.resolve_prefix(scope, p)?),
            None => self.units[scope.unit].default_function_ns.clone(),
        };
        Ok(ExpandedName::new(ns, q.local.clone()))
    }

    fn lower_call(&mut self, scope: &mut Scope, q: &ast::QName, args: &[ast::Expr]) -> CResult<Expr> {
        let name = self.function_name(scope, q)?;
        let arity = args.len();
        let ns = name.ns_uri.as_deref().unwrap_or("");

        if ns == FNS && arity == 0 {
            match name.local.as_str() {
                "position" => return Ok(Expr::Position),
                "last" => return Ok(Expr::Last),
                local if CONTEXT_FUNCTIONS.contains(&local) => {
                    return Ok(Expr::CallBuiltin {
                        name,
                        args: vec![Expr::ContextItem],
                    });
                }
                _ => {}
            }
        }
        if ns == XS {
            let Some(ty) = casting::lookup_type(&name) else {
                return Err(static_err(
                    ErrorCode::XPST0017,
                    format!("unknown constructor function {q}"),
                ));
            };
            if arity != 1 || matches!(ty, AtomicType::AnyAtomic | AtomicType::Notation) {
                return Err(static_err(
                    ErrorCode::XPST0017,
                    format!("constructor function {q} takes exactly one argument"),
                ));
            }
            let arg = self.lower_boxed(scope, &args[0])?;
            return Ok(Expr::CastAs(arg, SingleTypeIR { atomic: name, optional: true }));
        }
        if ns == UTIL_NS {
            match (name.local.as_str(), arity) {
                ("exclusive-lock" | "shared-lock", 2) => {
                    let mode = if name.local == "exclusive-lock" {
                        LockMode::Exclusive
                    } else {
                        LockMode::Shared
                    };
                    return Ok(Expr::Lock {
                        mode,
                        nodes: self.lower_boxed(scope, &args[0])?,
                        body: self.lower_boxed(scope, &args[1])?,
                    });
                }
                ("eval", 1..=3) => {
                    return Ok(Expr::DynamicEval {
                        query: self.lower_boxed(scope, &args[0])?,
                        namespaces: self.namespace_snapshot(scope),
                    });
                }
                _ => {}
            }
        }

        if let Some(&id) = self.function_index.get(&(name.clone(), arity)) {
            let f = &self.functions[id];
            if !self.visible(scope, f.module, f.private) {
                return Err(static_err(
                    ErrorCode::XPST0017,
                    format!("function {q}#{arity} is not visible here"),
                ));
            }
            let args = self.lower_args(scope, args)?;
            return Ok(Expr::CallUser { id, args });
        }

        match default_function_registry().resolve(&name, arity) {
            Ok(_) => {
                let args = self.lower_args(scope, args)?;
                Ok(Expr::CallBuiltin { name, args })
            }
            Err(ResolveError::WrongArity { available, .. }) => Err(static_err(
                ErrorCode::XPST0017,
                format!("function {q} does not take {arity} arguments (arities: {available:?})"),
            )),
            Err(ResolveError::Unknown(_)) => {
                let user_arities: Vec<usize> = self
                    .function_index
                    .keys()
                    .filter(|(n, _)| *n == name)
                    .map(|(_, a)| *a)
                    .collect();
                if user_arities.is_empty() {
                    Err(static_err(
                        ErrorCode::XPST0017,
                        format!("unknown function {q}#{arity}"),
                    ))
                } else {
                    Err(static_err(
                        ErrorCode::XPST0017,
                        format!("function {q} does not take {arity} arguments (arities: {user_arities:?})"),
                    ))
                }
            }
        }
    }

    fn lower_args(&mut self, scope: &mut Scope, args: &[ast::Expr]) -> CResult<Vec<Expr>> {
        args.iter().map(|a| self.lower_expr(scope, a)).collect()
    }

    fn catch_test(&self, scope: &Scope, t: &ast::NameTest) -> CResult<CatchTest> {
        Ok(match t {
            ast::NameTest::QName(q) => CatchTest::Name(self.plain_name(scope, q)?),
            ast::NameTest::Wildcard(ast::WildcardName::Any) => CatchTest::Any,
            ast::NameTest::Wildcard(ast::WildcardName::NsWildcard(p)) => {
                CatchTest::Namespace(self.resolve_prefix(scope, p)?)
            }
            ast::NameTest::Wildcard(ast::WildcardName::LocalWildcard(l)) => CatchTest::Local(l.clone()),
        })
    }

    fn lower_extension(
        &mut self,
        scope: &mut Scope,
        pragmas: &[ast::Pragma],
        expr: Option<&ast::Expr>,
    ) -> CResult<Expr> {
        let mut enable = None;
        for p in pragmas {
            let name = self.plain_name(scope, &p.name)?;
            if name.ns_uri.as_deref() == Some(EXIST_NS) {
                match name.local.as_str() {
                    "optimize" => enable = Some(true),
                    "no-optimize" => enable = Some(false),
                    other => debug!(pragma = other, "pragma has no effect"),
                }
            } else {
                warn!(pragma = %p.name, "unknown pragma, evaluating fallback expression");
            }
        }
        let Some(expr) = expr else {
            return Err(static_err(
                ErrorCode::XPST0003,
                "an extension expression needs a fallback expression",
            ));
        };
        let inner = self.lower_expr(scope, expr)?;
        Ok(match enable {
            Some(enable) => Expr::Optimize {
                enable,
                expr: Box::new(inner),
            },
            None => inner,
        })
    }

    fn lower_update(&mut self, scope: &mut Scope, u: &ast::UpdateExpr) -> CResult<Expr> {
        let ir = match u {
            ast::UpdateExpr::Insert {
                source,
                position,
                target,
            } => UpdateIR::Insert {
                source: self.lower_boxed(scope, source)?,
                position: match position {
                    ast::InsertPosition::Into => InsertPositionIR::Into,
                    ast::InsertPosition::First => InsertPositionIR::First,
                    ast::InsertPosition::Last => InsertPositionIR::Last,
                    ast::InsertPosition::Following => InsertPositionIR::Following,
                    ast::InsertPosition::Preceding => InsertPositionIR::Preceding,
                },
                target: self.lower_boxed(scope, target)?,
            },
            ast::UpdateExpr::Replace { target, with } => UpdateIR::Replace {
                target: self.lower_boxed(scope, target)?,
                with: self.lower_boxed(scope, with)?,
            },
            ast::UpdateExpr::Value { target, with } => UpdateIR::Value {
                target: self.lower_boxed(scope, target)?,
                with: self.lower_boxed(scope, with)?,
            },
            ast::UpdateExpr::Delete(target) => UpdateIR::Delete(self.lower_boxed(scope, target)?),
            ast::UpdateExpr::Rename { target, name } => UpdateIR::Rename {
                target: self.lower_boxed(scope, target)?,
                name: self.lower_boxed(scope, name)?,
                namespaces: self.namespace_snapshot(scope),
            },
        };
        Ok(Expr::Update(ir))
    }

    // ===== FLWOR =====

    fn lower_flwor(&mut self, scope: &mut Scope, f: &ast::Flwor) -> CResult<Expr> {
        let base = scope.depth();
        let mut clauses = Vec::with_capacity(f.clauses.len() + 1);
        for clause in &f.clauses {
            match clause {
                ast::FlworClause::For(b) => {
                    let input = self.lower_expr(scope, &b.in_expr)?;
                    let ty = b.ty.as_ref().map(|t| self.lower_seq_type(scope, t)).transpose()?;
                    let name = self.var_name(scope, &b.var)?;
                    let slot = scope.push(name);
                    let position = match &b.position {
                        Some(p) => {
                            let pname = self.var_name(scope, p)?;
                            Some(scope.push(pname))
                        }
                        None => None,
                    };
                    clauses.push(ClauseIR::For {
                        slot,
                        position,
                        ty,
                        input,
                    });
                }
                ast::FlworClause::Let(b) => {
                    let value = self.lower_expr(scope, &b.value)?;
                    let ty = b.ty.as_ref().map(|t| self.lower_seq_type(scope, t)).transpose()?;
                    let name = self.var_name(scope, &b.var)?;
                    let slot = scope.push(name);
                    clauses.push(ClauseIR::Let { slot, ty, value });
                }
            }
        }
        if let Some(w) = &f.where_clause {
            clauses.push(ClauseIR::Where(self.lower_expr(scope, w)?));
        }
        let bound = scope.depth() - base;

        let group = match &f.group {
            None => None,
            Some(ast::GroupClause::Partition {
                source,
                partition,
                keys,
            }) => {
                let source_name = self.var_name(scope, source)?;
                let Some(source) = scope.lookup(&source_name).filter(|s| *s >= base) else {
                    return Err(static_err(
                        ErrorCode::XPST0008,
                        format!("grouped variable ${source_name} is not bound by this FLWOR expression"),
                    ));
                };
                let mut key_exprs = Vec::with_capacity(keys.len());
                for (e, _) in keys {
                    key_exprs.push(self.lower_expr(scope, e)?);
                }
                scope.truncate(base);
                let pname = self.var_name(scope, partition)?;
                scope.push(pname);
                for (_, var) in keys {
                    let kname = self.var_name(scope, var)?;
                    scope.push(kname);
                }
                Some(GroupIR::Partition {
                    source,
                    keys: key_exprs,
                })
            }
            Some(ast::GroupClause::Standard(specs)) => {
                let mut keys = Vec::with_capacity(specs.len());
                for spec in specs {
                    let name = self.var_name(scope, &spec.var)?;
                    let slot = if let Some(value) = &spec.value {
                        let value = self.lower_expr(scope, value)?;
                        let slot = scope.push(name);
                        clauses.push(ClauseIR::Let { slot, ty: None, value });
                        slot
                    } else {
                        scope.lookup(&name).filter(|s| *s >= base).ok_or_else(|| {
                            static_err(
                                ErrorCode::XQST0094,
                                format!("grouping variable ${name} is not bound by this FLWOR expression"),
                            )
                        })?
                    };
                    keys.push(slot);
                }
                Some(GroupIR::Standard { keys })
            }
        };
        let width = match &group {
            Some(GroupIR::Partition { .. }) => bound,
            _ => scope.depth() - base,
        };

        let order = match &f.order {
            Some(o) => {
                let mut specs = Vec::with_capacity(o.specs.len());
                for s in &o.specs {
                    specs.push(OrderSpecIR {
                        expr: self.lower_expr(scope, &s.expr)?,
                        descending: s.descending,
                        empty_greatest: s.empty_greatest.unwrap_or(false),
                        collation: s.collation.clone(),
                    });
                }
                Some(specs)
            }
            None => None,
        };
        let return_expr = self.lower_boxed(scope, &f.return_expr)?;
        scope.truncate(base);
        Ok(Expr::Flwor(Box::new(FlworIR {
            base,
            width,
            clauses,
            group,
            order,
            return_expr,
        })))
    }

    // ===== Paths =====

    fn lower_path(&mut self, scope: &mut Scope, p: &ast::PathExpr) -> CResult<Expr> {
        let mut current = match p.start {
            ast::PathStart::Root => Some(Expr::Root),
            ast::PathStart::RootDescendant => Some(Expr::PathMap {
                input: Box::new(Expr::Root),
                step: Box::new(self.lower_step(scope, &ast::Step::descendant_or_self_node())?),
            }),
            ast::PathStart::Relative => None,
        };
        for step in &p.steps {
            let lowered = match step {
                ast::PathStep::Axis(s) => self.lower_step(scope, s)?,
                ast::PathStep::Expr(e) => self.lower_expr(scope, e)?,
            };
            current = Some(match current {
                None => lowered,
                Some(input) => Expr::PathMap {
                    input: Box::new(input),
                    step: Box::new(lowered),
                },
            });
        }
        Ok(current.unwrap_or(Expr::Root))
    }

    fn lower_step(&mut self, scope: &mut Scope, s: &ast::Step) -> CResult<Expr> {
        let axis = map_axis(s.axis);
        let test = match &s.test {
            ast::NodeTest::Name(n) => self.lower_name_test(scope, n, axis)?,
            ast::NodeTest::Kind(k) => self.lower_kind_test(scope, k)?,
        };
        let predicates = self.lower_predicates(scope, &s.predicates)?;
        Ok(Expr::Step(StepIR {
            axis,
            test,
            predicates,
            index: None,
        }))
    }

    fn lower_name_test(&self, scope: &Scope, n: &ast::NameTest, axis: ir::AxisIR) -> CResult<NodeTestIR> {
        Ok(match n {
            ast::NameTest::QName(q) => match axis {
                ir::AxisIR::Attribute => NodeTestIR::Name(self.plain_name(scope, q)?),
                ir::AxisIR::Namespace => NodeTestIR::Name(ExpandedName::local(q.local.clone())),
                _ => NodeTestIR::Name(self.element_name(scope, q)?),
            },
            ast::NameTest::Wildcard(ast::WildcardName::Any) => NodeTestIR::WildcardAny,
            ast::NameTest::Wildcard(ast::WildcardName::NsWildcard(p)) => {
                NodeTestIR::NsWildcard(self.resolve_prefix(scope, p)?)
            }
            ast::NameTest::Wildcard(ast::WildcardName::LocalWildcard(l)) => {
                NodeTestIR::LocalWildcard(l.clone())
            }
        })
    }

    fn lower_kind_test(&self, scope: &Scope, k: &ast::KindTest) -> CResult<NodeTestIR> {
        Ok(match k {
            ast::KindTest::AnyKind => NodeTestIR::AnyKind,
            ast::KindTest::Document(inner) => NodeTestIR::KindDocument(match inner {
                Some(i) => Some(Box::new(self.lower_kind_test(scope, i)?)),
                None => None,
            }),
            ast::KindTest::Text => NodeTestIR::KindText,
            ast::KindTest::Comment => NodeTestIR::KindComment,
            ast::KindTest::NamespaceNode => NodeTestIR::KindNamespace,
            ast::KindTest::ProcessingInstruction(target) => {
                NodeTestIR::KindProcessingInstruction(target.clone())
            }
            ast::KindTest::Element { name, ty, nillable } => NodeTestIR::KindElement {
                name: match name {
                    None => None,
                    Some(ast::ElementNameOrWildcard::Any) => Some(NameOrWildcard::Any),
                    Some(ast::ElementNameOrWildcard::Name(q)) => {
                        Some(NameOrWildcard::Name(self.element_name(scope, q)?))
                    }
                },
                ty: ty.as_ref().map(|t| self.type_name(scope, &t.0)).transpose()?,
                nillable: *nillable,
            },
            ast::KindTest::Attribute { name, ty } => NodeTestIR::KindAttribute {
                name: match name {
                    None => None,
                    Some(ast::AttributeNameOrWildcard::Any) => Some(NameOrWildcard::Any),
                    Some(ast::AttributeNameOrWildcard::Name(q)) => {
                        Some(NameOrWildcard::Name(self.plain_name(scope, q)?))
                    }
                },
                ty: ty.as_ref().map(|t| self.type_name(scope, &t.0)).transpose()?,
            },
            ast::KindTest::SchemaElement(q) => NodeTestIR::KindSchemaElement(self.element_name(scope, q)?),
            ast::KindTest::SchemaAttribute(q) => NodeTestIR::KindSchemaAttribute(self.plain_name(scope, q)?),
        })
    }

    fn lower_predicates(&mut self, scope: &mut Scope, preds: &[ast::Expr]) -> CResult<Vec<PredicateIR>> {
        let mut out = Vec::with_capacity(preds.len());
        for p in preds {
            let e = self.lower_expr(scope, p)?;
            out.push(classify_predicate(e));
        }
        Ok(out)
    }

    // ===== Constructors =====

    fn lower_dir_element(&mut self, scope: &mut Scope, d: &ast::DirElement) -> CResult<Expr> {
        let mark = scope.ns_overrides.len();
        let mut declared = Vec::new();
        for a in &d.attributes {
            let binding = match (&a.name.prefix, a.name.local.as_str()) {
                (None, "xmlns") => Some(String::new()),
                (Some(p), local) if p == "xmlns" => Some(local.to_string()),
                _ => None,
            };
            let Some(prefix) = binding else { continue };
            let mut uri = String::new();
            for part in &a.value {
                match part {
                    ast::AttributeValuePart::Text(t) => uri.push_str(t),
                    ast::AttributeValuePart::Expr(_) => {
                        return Err(static_err(
                            ErrorCode::XPST0003,
                            "a namespace declaration attribute must be a literal",
                        ));
                    }
                }
            }
            if prefix == "xml" || prefix == "xmlns" || uri == XMLNS_URI || uri == XML_URI {
                return Err(static_err(
                    ErrorCode::XQST0070,
                    format!("invalid namespace declaration for prefix '{prefix}'"),
                ));
            }
            scope.ns_overrides.push((prefix.clone(), uri.clone()));
            if !uri.is_empty() || prefix.is_empty() {
                declared.push((Some(prefix).filter(|p| !p.is_empty()), uri));
            }
        }

        let result = self.lower_dir_element_body(scope, d, declared);
        scope.ns_overrides.truncate(mark);
        result
    }

    fn lower_dir_element_body(
        &mut self,
        scope: &mut Scope,
        d: &ast::DirElement,
        namespaces: Vec<(Option<String>, String)>,
    ) -> CResult<Expr> {
        let name = self.model_qname(scope, &d.name, true)?;
        let mut content = Vec::with_capacity(d.attributes.len() + d.content.len());
        for a in &d.attributes {
            if a.name.prefix.as_deref() == Some("xmlns") || (a.name.prefix.is_none() && a.name.local == "xmlns") {
                continue;
            }
            let attr_name = self.model_qname(scope, &a.name, false)?;
            let mut parts = Vec::with_capacity(a.value.len());
            for part in &a.value {
                parts.push(match part {
                    ast::AttributeValuePart::Text(t) => string_literal(t),
                    ast::AttributeValuePart::Expr(e) => self.lower_expr(scope, e)?,
                });
            }
            content.push(Expr::Attribute {
                name: CtorName::Static(attr_name),
                content: parts,
            });
        }

        let preserve = self.units[scope.unit].boundary_space_preserve;
        let mut text = String::new();
        let mut has_text = false;
        for item in &d.content {
            match item {
                ast::ElementContent::Text(t) => {
                    if !preserve && t.chars().all(char::is_whitespace) {
                        continue;
                    }
                    text.push_str(t);
                    has_text = true;
                }
                ast::ElementContent::CharData(t) => {
                    text.push_str(t);
                    has_text = true;
                }
                other => {
                    if has_text {
                        content.push(Expr::Text(Box::new(string_literal(&std::mem::take(&mut text)))));
                        has_text = false;
                    }
                    content.push(match other {
                        ast::ElementContent::Expr(e) => self.lower_expr(scope, e)?,
                        ast::ElementContent::Element(child) => self.lower_dir_element(scope, child)?,
                        ast::ElementContent::Comment(c) => Expr::Comment(Box::new(string_literal(c))),
                        ast::ElementContent::Pi { target, content } => Expr::Pi {
                            target: CtorName::Static(crate::model::QName::local(target.clone())),
                            content: Box::new(string_literal(content)),
                        },
                        ast::ElementContent::Text(_) | ast::ElementContent::CharData(_) => Expr::empty(),
                    });
                }
            }
        }
        if has_text {
            content.push(Expr::Text(Box::new(string_literal(&text))));
        }
        Ok(Expr::Element(Box::new(ElementCtor {
            name: CtorName::Static(name),
            namespaces,
            content,
        })))
    }

    // ===== Types =====

    fn lower_single_type(&self, scope: &Scope, t: &ast::SingleType) -> CResult<SingleTypeIR> {
        let name = self.type_name(scope, &t.atomic)?;
        match casting::lookup_type(&name) {
            None => Err(static_err(
                ErrorCode::XPST0051,
                format!("unknown atomic type {}", t.atomic),
            )),
            Some(AtomicType::AnyAtomic | AtomicType::Notation) => Err(static_err(
                ErrorCode::XPST0080,
                format!("cannot cast to {}", t.atomic),
            )),
            Some(_) => Ok(SingleTypeIR {
                atomic: name,
                optional: t.optional,
            }),
        }
    }

    fn lower_seq_type(&self, scope: &Scope, t: &ast::SequenceType) -> CResult<SeqTypeIR> {
        match t {
            ast::SequenceType::EmptySequence => Ok(SeqTypeIR::EmptySequence),
            ast::SequenceType::Typed { item, occ } => Ok(SeqTypeIR::Typed {
                item: self.lower_item_type(scope, item)?,
                occ: match occ {
                    ast::Occurrence::One => OccurrenceIR::One,
                    ast::Occurrence::ZeroOrOne => OccurrenceIR::ZeroOrOne,
                    ast::Occurrence::ZeroOrMore => OccurrenceIR::ZeroOrMore,
                    ast::Occurrence::OneOrMore => OccurrenceIR::OneOrMore,
                },
            }),
        }
    }

    fn lower_item_type(&self, scope: &Scope, t: &ast::ItemType) -> CResult<ItemTypeIR> {
        match t {
            ast::ItemType::Item => Ok(ItemTypeIR::AnyItem),
            ast::ItemType::Atomic(q) => {
                let name = self.type_name(scope, q)?;
                if casting::lookup_type(&name).is_none() {
                    return Err(static_err(
                        ErrorCode::XPST0051,
                        format!("unknown atomic type {q}"),
                    ));
                }
                Ok(ItemTypeIR::Atomic(name))
            }
            ast::ItemType::Kind(ast::KindTest::AnyKind) => Ok(ItemTypeIR::AnyNode),
            ast::ItemType::Kind(k) => Ok(ItemTypeIR::Kind(self.lower_kind_test(scope, k)?)),
        }
    }
}

/// Zero-argument functions that operate on the context item.
const CONTEXT_FUNCTIONS: &[&str] = &[
    "string",
    "data",
    "name",
    "local-name",
    "namespace-uri",
    "number",
    "normalize-space",
    "string-length",
    "root",
    "base-uri",
    "document-uri",
    "node-name",
    "nilled",
];

fn lower_literal(l: &ast::Literal) -> XdmAtomicValue {
    match l {
        ast::Literal::Integer(i) => XdmAtomicValue::Integer(*i),
        ast::Literal::Decimal(d) => XdmAtomicValue::Decimal(*d),
        ast::Literal::Double(d) => XdmAtomicValue::Double(*d),
        ast::Literal::String(s) => XdmAtomicValue::String(s.clone()),
    }
}

fn string_literal(s: &str) -> Expr {
    Expr::Literal(XdmAtomicValue::String(s.to_string()))
}

fn map_general(op: ast::GeneralComp) -> ComparisonOp {
    match op {
        ast::GeneralComp::Eq => ComparisonOp::Eq,
        ast::GeneralComp::Ne => ComparisonOp::Ne,
        ast::GeneralComp::Lt => ComparisonOp::Lt,
        ast::GeneralComp::Le => ComparisonOp::Le,
        ast::GeneralComp::Gt => ComparisonOp::Gt,
        ast::GeneralComp::Ge => ComparisonOp::Ge,
    }
}

fn map_value(op: ast::ValueComp) -> ComparisonOp {
    match op {
        ast::ValueComp::Eq => ComparisonOp::Eq,
        ast::ValueComp::Ne => ComparisonOp::Ne,
        ast::ValueComp::Lt => ComparisonOp::Lt,
        ast::ValueComp::Le => ComparisonOp::Le,
        ast::ValueComp::Gt => ComparisonOp::Gt,
        ast::ValueComp::Ge => ComparisonOp::Ge,
    }
}

fn map_axis(a: ast::Axis) -> ir::AxisIR {
    use ir::AxisIR;
    match a {
        ast::Axis::Child => AxisIR::Child,
        ast::Axis::Descendant => AxisIR::Descendant,
        ast::Axis::Attribute => AxisIR::Attribute,
        ast::Axis::SelfAxis => AxisIR::SelfAxis,
        ast::Axis::DescendantOrSelf => AxisIR::DescendantOrSelf,
        ast::Axis::FollowingSibling => AxisIR::FollowingSibling,
        ast::Axis::Following => AxisIR::Following,
        ast::Axis::Namespace => AxisIR::Namespace,
        ast::Axis::Parent => AxisIR::Parent,
        ast::Axis::Ancestor => AxisIR::Ancestor,
        ast::Axis::PrecedingSibling => AxisIR::PrecedingSibling,
        ast::Axis::Preceding => AxisIR::Preceding,
        ast::Axis::AncestorOrSelf => AxisIR::AncestorOrSelf,
    }
}

/// Recognize the positional forms so they evaluate like literal indexing.
fn classify_predicate(e: Expr) -> PredicateIR {
    match &e {
        Expr::Literal(XdmAtomicValue::Integer(n)) => return PredicateIR::Index(*n),
        Expr::Last => return PredicateIR::Last,
        Expr::Arith {
            op: ArithOp::Sub,
            left,
            right,
        } => {
            if let (Expr::Last, Expr::Literal(XdmAtomicValue::Integer(k))) = (&**left, &**right) {
                return PredicateIR::LastMinus(*k);
            }
        }
        Expr::GeneralCompare {
            op: ComparisonOp::Eq,
            left,
            right,
        }
        | Expr::ValueCompare {
            op: ComparisonOp::Eq,
            left,
            right,
        } => match (&**left, &**right) {
            (Expr::Position, Expr::Literal(XdmAtomicValue::Integer(n)))
            | (Expr::Literal(XdmAtomicValue::Integer(n)), Expr::Position) => {
                return PredicateIR::Index(*n);
            }
            (Expr::Position, Expr::Last) | (Expr::Last, Expr::Position) => return PredicateIR::Last,
            _ => {}
        },
        _ => {}
    }
    if (e.is_boolean() || e.is_node_producing()) && !e.uses_focus_position() {
        PredicateIR::Boolean(e)
    } else {
        PredicateIR::General(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(src: &str) -> Expr {
        compile(src).unwrap().program.body.clone().unwrap()
    }

    fn first_predicate(src: &str) -> PredicateIR {
        fn find(e: &Expr) -> Option<PredicateIR> {
            match e {
                Expr::Filter { predicates, .. } => predicates.first().cloned(),
                Expr::Step(s) => s.predicates.first().cloned(),
                Expr::PathMap { step, input } => find(step).or_else(|| find(input)),
                _ => None,
            }
        }
        find(&body(src)).unwrap()
    }

    #[test]
    fn positional_forms_are_recognized() {
        assert!(matches!(first_predicate("(1,2,3)[2]"), PredicateIR::Index(2)));
        assert!(matches!(first_predicate("(1,2,3)[position() = 2]"), PredicateIR::Index(2)));
        assert!(matches!(first_predicate("(1,2,3)[position() eq 2]"), PredicateIR::Index(2)));
        assert!(matches!(first_predicate("(1,2,3)[last()]"), PredicateIR::Last));
        assert!(matches!(first_predicate("(1,2,3)[position() = last()]"), PredicateIR::Last));
        assert!(matches!(first_predicate("(1,2,3)[last() - 1]"), PredicateIR::LastMinus(1)));
        assert!(matches!(first_predicate("(1,2,3)[position() < 3]"), PredicateIR::General(_)));
        assert!(matches!(first_predicate("//a[@id = 'x']"), PredicateIR::Boolean(_)));
    }

    #[test]
    fn undeclared_variable_is_a_static_error() {
        let err = compile("for $x in (1, 2) return $y").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[test]
    fn variables_before_exist_group_go_out_of_scope() {
        let src = "for $i in (1, 2, 3) let $k := $i mod 2 \
                   group $i as $part by $k as $key return $i";
        assert_eq!(compile(src).unwrap_err().code_enum(), ErrorCode::XPST0008);
    }

    #[test]
    fn duplicate_prolog_declarations_are_rejected() {
        let err = compile("declare variable $a := 1; declare variable $a := 2; $a").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0049);
        let err = compile("declare namespace p = 'urn:a'; declare namespace p = 'urn:b'; 1").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0033);
        let err = compile(
            "declare function local:f($a) { $a }; declare function local:f($b) { $b }; 1",
        )
        .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0034);
        assert!(err.message.contains("{http://www.w3.org/2005/xquery-local-functions}f#1"));
    }

    #[test]
    fn annotations_in_reserved_namespaces_are_rejected() {
        let err = compile("declare %fn:cached function local:f() { 1 }; local:f()").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0045);
        let err = compile("declare %inline function local:f() { 1 }; local:f()").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0045);
        let ok = compile(
            "declare namespace a = 'urn:annotations'; \
             declare %a:cached('yes', 'no') function local:f() { 1 }; local:f()",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn unknown_function_arity_is_reported() {
        let err = compile("fn:substring()").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0017);
    }

    #[test]
    fn update_statements_mark_the_program_updating() {
        assert!(compile("update delete //a").unwrap().is_updating());
        assert!(!compile("//a").unwrap().is_updating());
    }
}
