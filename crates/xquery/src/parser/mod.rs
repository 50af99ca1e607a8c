use crate::consts::FNS;
use crate::runtime::{Error, ErrorCode};
use pest::Parser;
use pest::iterators::Pair;

pub mod ast;

#[derive(pest_derive::Parser)]
#[grammar = "parser/xquery.pest"]
pub struct XQueryParser;

type Result<T> = core::result::Result<T, Error>;

fn syntax_error(e: &pest::error::Error<Rule>) -> Error {
    let (line, column) = match e.line_col {
        pest::error::LineColLocation::Pos(p) | pest::error::LineColLocation::Span(p, _) => p,
    };
    Error::from_code(
        ErrorCode::XPST0003,
        format!("syntax error: {}", e.variant.message()),
    )
    .with_position(line, column)
}

fn error_at(pair: &Pair<Rule>, msg: impl Into<String>) -> Error {
    let (line, column) = pair.line_col();
    Error::from_code(ErrorCode::XPST0003, msg).with_position(line, column)
}

/// Parse a main or library module.
pub fn parse_module(input: &str) -> Result<ast::Module> {
    XQueryParser::parse_module(input)
}

/// Parse a prolog-free main module into its body expression.
pub fn parse_expr(input: &str) -> Result<ast::Expr> {
    XQueryParser::parse_expr(input)
}

fn is_expr_rule(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::expr
            | Rule::flwor_expr
            | Rule::quantified_expr
            | Rule::typeswitch_expr
            | Rule::if_expr
            | Rule::try_catch_expr
            | Rule::update_expr
            | Rule::or_expr
    )
}

impl XQueryParser {
    /// Parse a main or library module.
    pub fn parse_module(input: &str) -> Result<ast::Module> {
        let mut pairs = Self::parse(Rule::xquery, input).map_err(|e| syntax_error(&e))?;
        let Some(root) = pairs.next() else {
            return Err(Error::from_code(ErrorCode::XPST0003, "empty query"));
        };
        for pair in root.into_inner() {
            match pair.as_rule() {
                Rule::main_module => return Self::build_main_module(pair).map(ast::Module::Main),
                Rule::library_module => {
                    return Self::build_library_module(pair).map(ast::Module::Library);
                }
                _ => {}
            }
        }
        Err(Error::from_code(ErrorCode::XPST0003, "expected a main or library module"))
    }

    /// Parse a query that must be a main module; returns only its body when the prolog is empty.
    pub fn parse_expr(input: &str) -> Result<ast::Expr> {
        match Self::parse_module(input)? {
            ast::Module::Main(m) if m.prolog.decls.is_empty() => Ok(m.body),
            _ => Err(Error::from_code(
                ErrorCode::XPST0003,
                "expected a plain expression without prolog",
            )),
        }
    }

    /// Walk down a pair to the first terminal token rule (e.g., OP_PLUS, K_AND)
    fn first_token_rule(pair: &Pair<Rule>) -> Rule {
        let mut current = pair.clone();
        loop {
            let mut inner = current.clone().into_inner();
            if let Some(next) = inner.next() {
                current = next;
            } else {
                return current.as_rule();
            }
        }
    }

    fn only_child<'a>(pair: &Pair<'a, Rule>) -> Result<Pair<'a, Rule>> {
        pair.clone()
            .into_inner()
            .next()
            .ok_or_else(|| error_at(pair, format!("incomplete {:?}", pair.as_rule())))
    }

    // ===== Modules and prolog =====

    fn build_main_module(pair: Pair<Rule>) -> Result<ast::MainModule> {
        let mut prolog = ast::Prolog::default();
        let mut body = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::prolog => prolog = Self::build_prolog(p)?,
                Rule::query_body => body = Some(Self::build_expr(&Self::only_child(&p)?)?),
                _ => {}
            }
        }
        let body = body.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "missing query body"))?;
        Ok(ast::MainModule { prolog, body })
    }

    fn build_library_module(pair: Pair<Rule>) -> Result<ast::LibraryModule> {
        let mut prefix = String::new();
        let mut namespace = String::new();
        let mut prolog = ast::Prolog::default();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::module_decl => {
                    for d in p.into_inner() {
                        match d.as_rule() {
                            Rule::ncname => prefix = d.as_str().to_string(),
                            Rule::uri_literal => namespace = Self::uri_literal(&d)?,
                            _ => {}
                        }
                    }
                }
                Rule::prolog => prolog = Self::build_prolog(p)?,
                _ => {}
            }
        }
        Ok(ast::LibraryModule { prefix, namespace, prolog })
    }

    fn build_prolog(pair: Pair<Rule>) -> Result<ast::Prolog> {
        let mut decls = Vec::new();
        for d in pair.into_inner() {
            decls.push(Self::build_prolog_decl(d)?);
        }
        Ok(ast::Prolog { decls })
    }

    fn build_prolog_decl(pair: Pair<Rule>) -> Result<ast::PrologDecl> {
        let rule = pair.as_rule();
        match rule {
            Rule::default_namespace_decl => {
                let mut element = false;
                let mut uri = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::K_ELEMENT => element = true,
                        Rule::uri_literal => uri = Self::uri_literal(&p)?,
                        _ => {}
                    }
                }
                Ok(if element {
                    ast::PrologDecl::DefaultElementNamespace(uri)
                } else {
                    ast::PrologDecl::DefaultFunctionNamespace(uri)
                })
            }
            Rule::boundary_space_decl => {
                let preserve = pair.into_inner().any(|p| p.as_rule() == Rule::K_PRESERVE);
                Ok(ast::PrologDecl::BoundarySpace { preserve })
            }
            Rule::namespace_decl => {
                let mut prefix = String::new();
                let mut uri = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::ncname => prefix = p.as_str().to_string(),
                        Rule::uri_literal => uri = Self::uri_literal(&p)?,
                        _ => {}
                    }
                }
                Ok(ast::PrologDecl::Namespace { prefix, uri })
            }
            Rule::module_import => {
                let mut prefix = None;
                let mut uris = Vec::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::import_prefix => {
                            prefix = p
                                .into_inner()
                                .find(|x| x.as_rule() == Rule::ncname)
                                .map(|x| x.as_str().to_string());
                        }
                        Rule::uri_literal => uris.push(Self::uri_literal(&p)?),
                        _ => {}
                    }
                }
                let mut uris = uris.into_iter();
                let namespace = uris.next().unwrap_or_default();
                Ok(ast::PrologDecl::Import(ast::ModuleImport {
                    prefix,
                    namespace,
                    locations: uris.collect(),
                }))
            }
            Rule::option_decl => {
                let mut name = None;
                let mut value = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::qname => name = Some(ast::QName::parse(p.as_str())),
                        Rule::string_literal => value = Self::string_literal(&p)?,
                        _ => {}
                    }
                }
                let name = name.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "option without name"))?;
                Ok(ast::PrologDecl::Option { name, value })
            }
            Rule::var_decl => Self::build_var_decl(pair).map(ast::PrologDecl::Variable),
            Rule::function_decl => Self::build_function_decl(pair).map(ast::PrologDecl::Function),
            _ => Err(error_at(&pair, format!("unexpected prolog declaration {rule:?}"))),
        }
    }

    fn build_annotation(pair: Pair<Rule>) -> Result<ast::Annotation> {
        let mut name = None;
        let mut values = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::qname => name = Some(ast::QName::parse(p.as_str())),
                _ => {
                    if let ast::Expr::Literal(l) = Self::build_expr(&p)? {
                        values.push(l);
                    }
                }
            }
        }
        let name = name.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "annotation without name"))?;
        Ok(ast::Annotation { name, values })
    }

    fn build_var_decl(pair: Pair<Rule>) -> Result<ast::VarDecl> {
        let mut decl = ast::VarDecl {
            annotations: Vec::new(),
            name: ast::QName::parse(""),
            ty: None,
            external: false,
            value: None,
        };
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::annotation => decl.annotations.push(Self::build_annotation(p)?),
                Rule::var_name => decl.name = ast::QName::parse(p.as_str()),
                Rule::type_declaration => decl.ty = Some(Self::build_sequence_type(&Self::only_child(&p)?)?),
                Rule::var_value => decl.value = Some(Self::build_expr(&Self::only_child(&p)?)?),
                Rule::var_external => {
                    decl.external = true;
                    for v in p.into_inner() {
                        if v.as_rule() == Rule::var_value {
                            decl.value = Some(Self::build_expr(&Self::only_child(&v)?)?);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(decl)
    }

    fn build_function_decl(pair: Pair<Rule>) -> Result<ast::FunctionDecl> {
        let mut decl = ast::FunctionDecl {
            annotations: Vec::new(),
            name: ast::QName::parse(""),
            params: Vec::new(),
            return_type: None,
            body: None,
        };
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::annotation => decl.annotations.push(Self::build_annotation(p)?),
                Rule::qname => decl.name = ast::QName::parse(p.as_str()),
                Rule::param_list => {
                    for param in p.into_inner() {
                        let mut name = None;
                        let mut ty = None;
                        for x in param.into_inner() {
                            match x.as_rule() {
                                Rule::var_name => name = Some(ast::QName::parse(x.as_str())),
                                Rule::type_declaration => {
                                    ty = Some(Self::build_sequence_type(&Self::only_child(&x)?)?);
                                }
                                _ => {}
                            }
                        }
                        if let Some(name) = name {
                            decl.params.push(ast::Param { name, ty });
                        }
                    }
                }
                Rule::return_type => {
                    decl.return_type = Some(Self::build_sequence_type(&Self::only_child(&p)?)?);
                }
                Rule::function_body => {
                    decl.body = Some(match p.into_inner().next() {
                        Some(e) => Self::build_expr(&e)?,
                        None => ast::Expr::Sequence(Vec::new()),
                    });
                }
                _ => {}
            }
        }
        Ok(decl)
    }

    // ===== Literals =====

    fn string_literal(pair: &Pair<Rule>) -> Result<String> {
        let Some(content) = pair.clone().into_inner().next() else {
            return Ok(String::new());
        };
        let raw = content.as_str();
        let unquoted = match content.as_rule() {
            Rule::dbl_string_inner => raw.replace("\"\"", "\""),
            Rule::sgl_string_inner => raw.replace("''", "'"),
            _ => raw.to_string(),
        };
        expand_references(&unquoted).ok_or_else(|| error_at(pair, "invalid character reference"))
    }

    fn uri_literal(pair: &Pair<Rule>) -> Result<String> {
        let lit = Self::only_child(pair)?;
        Self::string_literal(&lit)
    }

    // ===== Expressions =====

    fn build_expr(pair: &Pair<Rule>) -> Result<ast::Expr> {
        match pair.as_rule() {
            Rule::expr => {
                let mut items = Vec::new();
                for p in pair.clone().into_inner() {
                    items.push(Self::build_expr(&p)?);
                }
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(ast::Expr::Sequence(items))
                }
            }
            Rule::enclosed_expr | Rule::parenthesized_expr | Rule::name_expr | Rule::ordered_expr | Rule::unordered_expr => {
                match pair.clone().into_inner().find(|p| p.as_rule() == Rule::expr) {
                    Some(e) => Self::build_expr(&e),
                    None => Ok(ast::Expr::Sequence(Vec::new())),
                }
            }
            Rule::flwor_expr => Self::build_flwor(pair),
            Rule::quantified_expr => Self::build_quantified(pair),
            Rule::typeswitch_expr => Self::build_typeswitch(pair),
            Rule::if_expr => {
                let mut parts = Vec::new();
                for p in pair.clone().into_inner() {
                    if is_expr_rule(p.as_rule()) {
                        parts.push(Self::build_expr(&p)?);
                    }
                }
                let [cond, then_expr, else_expr]: [ast::Expr; 3] = parts
                    .try_into()
                    .map_err(|_| error_at(pair, "malformed if expression"))?;
                Ok(ast::Expr::IfThenElse {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                })
            }
            Rule::try_catch_expr => Self::build_try_catch(pair),
            Rule::update_expr => Self::build_update(&Self::only_child(pair)?),
            Rule::or_expr => Self::fold_chain(pair, |op| match op {
                Rule::K_OR => Some(ast::BinaryOp::Or),
                _ => None,
            }),
            Rule::and_expr => Self::fold_chain(pair, |op| match op {
                Rule::K_AND => Some(ast::BinaryOp::And),
                _ => None,
            }),
            Rule::comparison_expr => Self::build_comparison(pair),
            Rule::string_concat_expr => {
                let mut args = Vec::new();
                for p in pair.clone().into_inner() {
                    if p.as_rule() != Rule::OP_CONCAT {
                        args.push(Self::build_expr(&p)?);
                    }
                }
                if args.len() == 1 {
                    return Ok(args.remove(0));
                }
                Ok(ast::Expr::FunctionCall {
                    name: ast::QName { prefix: None, local: "concat".into(), ns_uri: Some(FNS.into()) },
                    args,
                })
            }
            Rule::range_expr => {
                let mut inners = pair.clone().into_inner();
                let left = Self::build_expr(&Self::next(pair, &mut inners)?)?;
                if inners.next().is_some() {
                    let right = Self::build_expr(&Self::next(pair, &mut inners)?)?;
                    Ok(ast::Expr::Range { start: Box::new(left), end: Box::new(right) })
                } else {
                    Ok(left)
                }
            }
            Rule::additive_expr => Self::fold_chain(pair, |op| match op {
                Rule::OP_PLUS => Some(ast::BinaryOp::Add),
                Rule::OP_MINUS => Some(ast::BinaryOp::Sub),
                _ => None,
            }),
            Rule::multiplicative_expr => Self::fold_chain(pair, |op| match op {
                Rule::OP_STAR => Some(ast::BinaryOp::Mul),
                Rule::K_DIV => Some(ast::BinaryOp::Div),
                Rule::K_IDIV => Some(ast::BinaryOp::IDiv),
                Rule::K_MOD => Some(ast::BinaryOp::Mod),
                _ => None,
            }),
            Rule::union_expr | Rule::intersect_except_expr => Self::build_set_chain(pair),
            Rule::instanceof_expr | Rule::treat_expr => {
                let mut inners = pair.clone().into_inner();
                let expr = Self::build_expr(&Self::next(pair, &mut inners)?)?;
                let Some(ty) = inners.find(|p| p.as_rule() == Rule::sequence_type) else {
                    return Ok(expr);
                };
                let ty = Self::build_sequence_type(&ty)?;
                Ok(if pair.as_rule() == Rule::instanceof_expr {
                    ast::Expr::InstanceOf { expr: Box::new(expr), ty }
                } else {
                    ast::Expr::TreatAs { expr: Box::new(expr), ty }
                })
            }
            Rule::castable_expr | Rule::cast_expr => {
                let mut inners = pair.clone().into_inner();
                let expr = Self::build_expr(&Self::next(pair, &mut inners)?)?;
                let Some(ty) = inners.find(|p| p.as_rule() == Rule::single_type) else {
                    return Ok(expr);
                };
                let ty = Self::build_single_type(&ty);
                Ok(if pair.as_rule() == Rule::castable_expr {
                    ast::Expr::CastableAs { expr: Box::new(expr), ty }
                } else {
                    ast::Expr::CastAs { expr: Box::new(expr), ty }
                })
            }
            Rule::unary_expr => {
                let mut minus = 0usize;
                let mut plus = false;
                let mut operand = None;
                for p in pair.clone().into_inner() {
                    match p.as_rule() {
                        Rule::OP_MINUS => minus += 1,
                        Rule::OP_PLUS => plus = true,
                        _ => operand = Some(Self::build_expr(&p)?),
                    }
                }
                let operand = operand.ok_or_else(|| error_at(pair, "missing operand"))?;
                Ok(if minus % 2 == 1 {
                    ast::Expr::Unary { sign: ast::UnarySign::Minus, expr: Box::new(operand) }
                } else if plus || minus > 0 {
                    ast::Expr::Unary { sign: ast::UnarySign::Plus, expr: Box::new(operand) }
                } else {
                    operand
                })
            }
            Rule::extension_expr => {
                let mut pragmas = Vec::new();
                let mut expr = None;
                for p in pair.clone().into_inner() {
                    match p.as_rule() {
                        Rule::pragma => {
                            let mut name = None;
                            let mut contents = String::new();
                            for x in p.into_inner() {
                                match x.as_rule() {
                                    Rule::qname => name = Some(ast::QName::parse(x.as_str())),
                                    Rule::pragma_contents => contents = x.as_str().trim().to_string(),
                                    _ => {}
                                }
                            }
                            if let Some(name) = name {
                                pragmas.push(ast::Pragma { name, contents });
                            }
                        }
                        Rule::expr => expr = Some(Box::new(Self::build_expr(&p)?)),
                        _ => {}
                    }
                }
                Ok(ast::Expr::Extension { pragmas, expr })
            }
            Rule::path_expr => Self::build_path_expr(pair),
            Rule::primary_expr => Self::build_primary(&Self::only_child(pair)?),
            _ => Self::build_primary(pair),
        }
    }

    fn next<'a>(
        parent: &Pair<'a, Rule>,
        it: &mut pest::iterators::Pairs<'a, Rule>,
    ) -> Result<Pair<'a, Rule>> {
        it.next()
            .ok_or_else(|| error_at(parent, format!("incomplete {:?}", parent.as_rule())))
    }

    fn fold_chain<F>(pair: &Pair<Rule>, map_op: F) -> Result<ast::Expr>
    where
        F: Fn(Rule) -> Option<ast::BinaryOp>,
    {
        let mut inners = pair.clone().into_inner();
        let mut expr = Self::build_expr(&Self::next(pair, &mut inners)?)?;
        while let Some(op_pair) = inners.next() {
            let op = map_op(Self::first_token_rule(&op_pair))
                .ok_or_else(|| error_at(&op_pair, "unexpected operator"))?;
            let right = Self::build_expr(&Self::next(pair, &mut inners)?)?;
            expr = ast::Expr::Binary { left: Box::new(expr), op, right: Box::new(right) };
        }
        Ok(expr)
    }

    fn build_set_chain(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut inners = pair.clone().into_inner();
        let mut expr = Self::build_expr(&Self::next(pair, &mut inners)?)?;
        while let Some(op_pair) = inners.next() {
            let op = match op_pair.as_rule() {
                Rule::K_UNION | Rule::OP_PIPE => ast::SetOp::Union,
                Rule::K_INTERSECT => ast::SetOp::Intersect,
                Rule::K_EXCEPT => ast::SetOp::Except,
                _ => return Err(error_at(&op_pair, "unexpected set operator")),
            };
            let right = Self::build_expr(&Self::next(pair, &mut inners)?)?;
            expr = ast::Expr::SetOp { left: Box::new(expr), op, right: Box::new(right) };
        }
        Ok(expr)
    }

    fn build_comparison(pair: &Pair<Rule>) -> Result<ast::Expr> {
        use ast::{Expr, GeneralComp as GC, NodeComp as NC, ValueComp as VC};
        let mut inners = pair.clone().into_inner();
        let left = Self::build_expr(&Self::next(pair, &mut inners)?)?;
        let Some(op_pair) = inners.next() else {
            return Ok(left);
        };
        let right = Self::build_expr(&Self::next(pair, &mut inners)?)?;
        let (l, r) = (Box::new(left), Box::new(right));
        let e = match Self::first_token_rule(&op_pair) {
            Rule::OP_EQ => Expr::GeneralComparison { left: l, op: GC::Eq, right: r },
            Rule::OP_NE => Expr::GeneralComparison { left: l, op: GC::Ne, right: r },
            Rule::OP_LT => Expr::GeneralComparison { left: l, op: GC::Lt, right: r },
            Rule::OP_LTE => Expr::GeneralComparison { left: l, op: GC::Le, right: r },
            Rule::OP_GT => Expr::GeneralComparison { left: l, op: GC::Gt, right: r },
            Rule::OP_GTE => Expr::GeneralComparison { left: l, op: GC::Ge, right: r },
            Rule::K_EQ => Expr::ValueComparison { left: l, op: VC::Eq, right: r },
            Rule::K_NE => Expr::ValueComparison { left: l, op: VC::Ne, right: r },
            Rule::K_LT => Expr::ValueComparison { left: l, op: VC::Lt, right: r },
            Rule::K_LE => Expr::ValueComparison { left: l, op: VC::Le, right: r },
            Rule::K_GT => Expr::ValueComparison { left: l, op: VC::Gt, right: r },
            Rule::K_GE => Expr::ValueComparison { left: l, op: VC::Ge, right: r },
            Rule::K_IS => Expr::NodeComparison { left: l, op: NC::Is, right: r },
            Rule::OP_PRECEDES => Expr::NodeComparison { left: l, op: NC::Precedes, right: r },
            Rule::OP_FOLLOWS => Expr::NodeComparison { left: l, op: NC::Follows, right: r },
            Rule::OP_FT_ALL => Expr::FullText { left: l, mode: ast::FullTextMode::All, right: r },
            Rule::OP_FT_ANY => Expr::FullText { left: l, mode: ast::FullTextMode::Any, right: r },
            _ => return Err(error_at(&op_pair, "unknown comparison operator")),
        };
        Ok(e)
    }

    // ===== FLWOR and friends =====

    fn build_flwor(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut clauses = Vec::new();
        let mut where_clause = None;
        let mut group = None;
        let mut order = None;
        let mut return_expr = None;
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::for_clause => {
                    for b in p.into_inner().filter(|b| b.as_rule() == Rule::for_binding) {
                        clauses.push(ast::FlworClause::For(Self::build_for_binding(&b)?));
                    }
                }
                Rule::let_clause => {
                    for b in p.into_inner().filter(|b| b.as_rule() == Rule::let_binding) {
                        let mut var = None;
                        let mut ty = None;
                        let mut value = None;
                        for x in b.clone().into_inner() {
                            match x.as_rule() {
                                Rule::var_name => var = Some(ast::QName::parse(x.as_str())),
                                Rule::type_declaration => {
                                    ty = Some(Self::build_sequence_type(&Self::only_child(&x)?)?);
                                }
                                r if is_expr_rule(r) => value = Some(Self::build_expr(&x)?),
                                _ => {}
                            }
                        }
                        match (var, value) {
                            (Some(var), Some(value)) => {
                                clauses.push(ast::FlworClause::Let(ast::LetBinding { var, ty, value }));
                            }
                            _ => return Err(error_at(&b, "malformed let binding")),
                        }
                    }
                }
                Rule::where_clause => {
                    where_clause = Some(Box::new(Self::build_expr(&Self::last_expr(&p)?)?));
                }
                Rule::group_clause => group = Some(Self::build_group_clause(&p)?),
                Rule::group_by_clause => {
                    let mut specs = Vec::new();
                    for s in p.into_inner().filter(|s| s.as_rule() == Rule::grouping_spec) {
                        let mut var = None;
                        let mut value = None;
                        for x in s.into_inner() {
                            match x.as_rule() {
                                Rule::var_name => var = Some(ast::QName::parse(x.as_str())),
                                r if is_expr_rule(r) => value = Some(Self::build_expr(&x)?),
                                _ => {}
                            }
                        }
                        if let Some(var) = var {
                            specs.push(ast::GroupingSpec { var, value });
                        }
                    }
                    group = Some(ast::GroupClause::Standard(specs));
                }
                Rule::order_by_clause => order = Some(Self::build_order_by(&p)?),
                r if is_expr_rule(r) => return_expr = Some(Box::new(Self::build_expr(&p)?)),
                _ => {}
            }
        }
        let return_expr = return_expr.ok_or_else(|| error_at(pair, "FLWOR without return"))?;
        Ok(ast::Expr::Flwor(ast::Flwor { clauses, where_clause, group, order, return_expr }))
    }

    fn last_expr<'a>(pair: &Pair<'a, Rule>) -> Result<Pair<'a, Rule>> {
        pair.clone()
            .into_inner()
            .filter(|p| is_expr_rule(p.as_rule()))
            .last()
            .ok_or_else(|| error_at(pair, "missing expression"))
    }

    fn build_for_binding(pair: &Pair<Rule>) -> Result<ast::ForBinding> {
        let mut var = None;
        let mut ty = None;
        let mut position = None;
        let mut in_expr = None;
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::var_name => var = Some(ast::QName::parse(x.as_str())),
                Rule::type_declaration => ty = Some(Self::build_sequence_type(&Self::only_child(&x)?)?),
                Rule::positional_var => {
                    position = x
                        .into_inner()
                        .find(|v| v.as_rule() == Rule::var_name)
                        .map(|v| ast::QName::parse(v.as_str()));
                }
                r if is_expr_rule(r) => in_expr = Some(Self::build_expr(&x)?),
                _ => {}
            }
        }
        match (var, in_expr) {
            (Some(var), Some(in_expr)) => Ok(ast::ForBinding { var, ty, position, in_expr }),
            _ => Err(error_at(pair, "malformed for binding")),
        }
    }

    fn build_group_clause(pair: &Pair<Rule>) -> Result<ast::GroupClause> {
        let mut names = Vec::new();
        let mut keys = Vec::new();
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::var_name => names.push(ast::QName::parse(x.as_str())),
                Rule::group_spec => {
                    let mut expr = None;
                    let mut var = None;
                    for s in x.clone().into_inner() {
                        match s.as_rule() {
                            Rule::var_name => var = Some(ast::QName::parse(s.as_str())),
                            r if is_expr_rule(r) => expr = Some(Self::build_expr(&s)?),
                            _ => {}
                        }
                    }
                    match (expr, var) {
                        (Some(e), Some(v)) => keys.push((e, v)),
                        _ => return Err(error_at(&x, "malformed group key")),
                    }
                }
                _ => {}
            }
        }
        let [source, partition]: [ast::QName; 2] = names
            .try_into()
            .map_err(|_| error_at(pair, "malformed group clause"))?;
        Ok(ast::GroupClause::Partition { source, partition, keys })
    }

    fn build_order_by(pair: &Pair<Rule>) -> Result<ast::OrderBy> {
        let mut stable = false;
        let mut specs = Vec::new();
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::stable => stable = true,
                Rule::order_spec => {
                    let mut spec = ast::OrderSpec {
                        expr: ast::Expr::Sequence(Vec::new()),
                        descending: false,
                        empty_greatest: None,
                        collation: None,
                    };
                    for s in x.into_inner() {
                        match s.as_rule() {
                            Rule::order_modifier => {
                                for m in s.into_inner() {
                                    match m.as_rule() {
                                        Rule::K_DESCENDING => spec.descending = true,
                                        Rule::K_GREATEST => spec.empty_greatest = Some(true),
                                        Rule::K_LEAST => spec.empty_greatest = Some(false),
                                        Rule::uri_literal => spec.collation = Some(Self::uri_literal(&m)?),
                                        _ => {}
                                    }
                                }
                            }
                            r if is_expr_rule(r) => spec.expr = Self::build_expr(&s)?,
                            _ => {}
                        }
                    }
                    specs.push(spec);
                }
                _ => {}
            }
        }
        Ok(ast::OrderBy { stable, specs })
    }

    fn build_quantified(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut kind = ast::Quantifier::Some;
        let mut bindings = Vec::new();
        let mut satisfies = None;
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::quantifier => {
                    if Self::first_token_rule(&x) == Rule::K_EVERY {
                        kind = ast::Quantifier::Every;
                    }
                }
                Rule::quant_binding => {
                    let mut var = None;
                    let mut ty = None;
                    let mut in_expr = None;
                    for b in x.clone().into_inner() {
                        match b.as_rule() {
                            Rule::var_name => var = Some(ast::QName::parse(b.as_str())),
                            Rule::type_declaration => {
                                ty = Some(Self::build_sequence_type(&Self::only_child(&b)?)?);
                            }
                            r if is_expr_rule(r) => in_expr = Some(Self::build_expr(&b)?),
                            _ => {}
                        }
                    }
                    match (var, in_expr) {
                        (Some(var), Some(in_expr)) => {
                            bindings.push(ast::QuantifiedBinding { var, ty, in_expr });
                        }
                        _ => return Err(error_at(&x, "malformed quantifier binding")),
                    }
                }
                r if is_expr_rule(r) => satisfies = Some(Box::new(Self::build_expr(&x)?)),
                _ => {}
            }
        }
        let satisfies = satisfies.ok_or_else(|| error_at(pair, "missing satisfies clause"))?;
        Ok(ast::Expr::Quantified { kind, bindings, satisfies })
    }

    fn build_typeswitch(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut operand = None;
        let mut cases = Vec::new();
        let mut default_var = None;
        let mut default = None;
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::expr => operand = Some(Box::new(Self::build_expr(&x)?)),
                Rule::case_clause => {
                    let mut var = None;
                    let mut ty = None;
                    let mut body = None;
                    for c in x.clone().into_inner() {
                        match c.as_rule() {
                            Rule::case_var => {
                                var = c
                                    .into_inner()
                                    .find(|v| v.as_rule() == Rule::var_name)
                                    .map(|v| ast::QName::parse(v.as_str()));
                            }
                            Rule::sequence_type => ty = Some(Self::build_sequence_type(&c)?),
                            r if is_expr_rule(r) => body = Some(Self::build_expr(&c)?),
                            _ => {}
                        }
                    }
                    match (ty, body) {
                        (Some(ty), Some(body)) => cases.push(ast::CaseClause { var, ty, body }),
                        _ => return Err(error_at(&x, "malformed case clause")),
                    }
                }
                Rule::default_clause => {
                    for c in x.into_inner() {
                        match c.as_rule() {
                            Rule::var_name => default_var = Some(ast::QName::parse(c.as_str())),
                            r if is_expr_rule(r) => default = Some(Box::new(Self::build_expr(&c)?)),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        match (operand, default) {
            (Some(operand), Some(default)) => Ok(ast::Expr::Typeswitch { operand, cases, default_var, default }),
            _ => Err(error_at(pair, "malformed typeswitch")),
        }
    }

    fn build_try_catch(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut body = None;
        let mut catches = Vec::new();
        for x in pair.clone().into_inner() {
            match x.as_rule() {
                Rule::enclosed_expr => body = Some(Box::new(Self::build_expr(&x)?)),
                Rule::catch_clause => {
                    let mut tests = Vec::new();
                    let mut vars = Vec::new();
                    let mut catch_body = None;
                    for c in x.into_inner() {
                        match c.as_rule() {
                            Rule::catch_error_list => {
                                for t in c.into_inner() {
                                    tests.push(Self::build_name_test(&t)?);
                                }
                            }
                            Rule::catch_vars => {
                                vars.extend(c.into_inner().map(|v| ast::QName::parse(v.as_str())));
                            }
                            Rule::enclosed_expr => catch_body = Some(Self::build_expr(&c)?),
                            _ => {}
                        }
                    }
                    catches.push(ast::CatchClause {
                        tests,
                        vars,
                        body: catch_body.unwrap_or(ast::Expr::Sequence(Vec::new())),
                    });
                }
                _ => {}
            }
        }
        let body = body.ok_or_else(|| error_at(pair, "try without body"))?;
        Ok(ast::Expr::TryCatch { body, catches })
    }

    fn exprs_of(pair: &Pair<Rule>) -> Result<Vec<ast::Expr>> {
        pair.clone()
            .into_inner()
            .filter(|p| is_expr_rule(p.as_rule()))
            .map(|p| Self::build_expr(&p))
            .collect()
    }

    fn build_update(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let exprs = Self::exprs_of(pair)?;
        let malformed = || error_at(pair, "malformed update statement");
        let update = match pair.as_rule() {
            Rule::update_insert => {
                let position = pair
                    .clone()
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::insert_position)
                    .and_then(|p| p.into_inner().next())
                    .map(|p| match p.as_rule() {
                        Rule::insert_first => ast::InsertPosition::First,
                        Rule::insert_last => ast::InsertPosition::Last,
                        Rule::insert_following => ast::InsertPosition::Following,
                        Rule::insert_preceding => ast::InsertPosition::Preceding,
                        _ => ast::InsertPosition::Into,
                    })
                    .ok_or_else(malformed)?;
                let [source, target]: [ast::Expr; 2] = exprs.try_into().map_err(|_| malformed())?;
                ast::UpdateExpr::Insert { source: Box::new(source), position, target: Box::new(target) }
            }
            Rule::update_replace | Rule::update_value => {
                let [target, with]: [ast::Expr; 2] = exprs.try_into().map_err(|_| malformed())?;
                let (target, with) = (Box::new(target), Box::new(with));
                if pair.as_rule() == Rule::update_replace {
                    ast::UpdateExpr::Replace { target, with }
                } else {
                    ast::UpdateExpr::Value { target, with }
                }
            }
            Rule::update_delete => {
                let [target]: [ast::Expr; 1] = exprs.try_into().map_err(|_| malformed())?;
                ast::UpdateExpr::Delete(Box::new(target))
            }
            Rule::update_rename => {
                let [target, name]: [ast::Expr; 2] = exprs.try_into().map_err(|_| malformed())?;
                ast::UpdateExpr::Rename { target: Box::new(target), name: Box::new(name) }
            }
            _ => return Err(malformed()),
        };
        Ok(ast::Expr::Update(update))
    }

    // ===== Primary expressions and constructors =====

    fn build_primary(pair: &Pair<Rule>) -> Result<ast::Expr> {
        match pair.as_rule() {
            Rule::string_literal => Ok(ast::Expr::Literal(ast::Literal::String(Self::string_literal(pair)?))),
            Rule::integer_literal => {
                let s = pair.as_str();
                Ok(match s.parse::<i64>() {
                    Ok(v) => ast::Expr::Literal(ast::Literal::Integer(v)),
                    Err(_) => ast::Expr::Literal(ast::Literal::Decimal(
                        s.parse::<f64>().map_err(|_| error_at(pair, "invalid integer literal"))?,
                    )),
                })
            }
            Rule::decimal_literal | Rule::double_literal => {
                let v = pair
                    .as_str()
                    .parse::<f64>()
                    .map_err(|_| error_at(pair, "invalid numeric literal"))?;
                Ok(ast::Expr::Literal(if pair.as_rule() == Rule::decimal_literal {
                    ast::Literal::Decimal(v)
                } else {
                    ast::Literal::Double(v)
                }))
            }
            Rule::var_ref => {
                let name = Self::only_child(pair)?;
                Ok(ast::Expr::VarRef(ast::QName::parse(name.as_str())))
            }
            Rule::context_item_expr => Ok(ast::Expr::ContextItem),
            Rule::parenthesized_expr | Rule::ordered_expr | Rule::unordered_expr => Self::build_expr(pair),
            Rule::function_call => {
                let mut inners = pair.clone().into_inner();
                let name = ast::QName::parse(Self::next(pair, &mut inners)?.as_str());
                let args = inners.map(|a| Self::build_expr(&a)).collect::<Result<Vec<_>>>()?;
                Ok(ast::Expr::FunctionCall { name, args })
            }
            Rule::computed_constructor => Self::build_computed(&Self::only_child(pair)?),
            Rule::direct_constructor => {
                let inner = Self::only_child(pair)?;
                match inner.as_rule() {
                    Rule::dir_elem_constructor => Ok(ast::Expr::DirElement(Self::build_dir_element(&inner)?)),
                    Rule::dir_comment_constructor => Ok(ast::Expr::DirComment(Self::child_text(&inner))),
                    Rule::dir_pi_constructor => {
                        let (target, content) = Self::pi_parts(&inner);
                        Ok(ast::Expr::DirPi { target, content })
                    }
                    Rule::cdata_section => Ok(ast::Expr::CompText(Some(Box::new(ast::Expr::Literal(
                        ast::Literal::String(Self::child_text(&inner)),
                    ))))),
                    _ => Err(error_at(&inner, "unexpected direct constructor")),
                }
            }
            other => Err(error_at(pair, format!("unsupported expression {other:?}"))),
        }
    }

    fn child_text(pair: &Pair<Rule>) -> String {
        pair.clone().into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default()
    }

    fn pi_parts(pair: &Pair<Rule>) -> (String, String) {
        let mut target = String::new();
        let mut content = String::new();
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::pi_target => target = p.as_str().to_string(),
                Rule::dir_pi_contents => content = p.as_str().trim_start().to_string(),
                _ => {}
            }
        }
        (target, content)
    }

    fn build_computed(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let mut name = None;
        let mut content = None;
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::qname | Rule::ncname => {
                    name = Some(ast::ConstructorName::Literal(ast::QName::parse(p.as_str())));
                }
                Rule::name_expr => name = Some(ast::ConstructorName::Computed(Box::new(Self::build_expr(&p)?))),
                Rule::enclosed_expr => {
                    if p.clone().into_inner().next().is_some() {
                        content = Some(Box::new(Self::build_expr(&p)?));
                    }
                }
                _ => {}
            }
        }
        let need_name = || name.clone().ok_or_else(|| error_at(pair, "constructor without name"));
        Ok(match pair.as_rule() {
            Rule::comp_doc_constructor => {
                ast::Expr::CompDocument(content.unwrap_or_else(|| Box::new(ast::Expr::Sequence(Vec::new()))))
            }
            Rule::comp_elem_constructor => ast::Expr::CompElement { name: need_name()?, content },
            Rule::comp_attr_constructor => ast::Expr::CompAttribute { name: need_name()?, content },
            Rule::comp_text_constructor => ast::Expr::CompText(content),
            Rule::comp_comment_constructor => ast::Expr::CompComment(content),
            Rule::comp_pi_constructor => ast::Expr::CompPi { target: need_name()?, content },
            _ => return Err(error_at(pair, "unexpected computed constructor")),
        })
    }

    fn build_dir_element(pair: &Pair<Rule>) -> Result<ast::DirElement> {
        let mut name = None;
        let mut attributes = Vec::new();
        let mut content: Vec<ast::ElementContent> = Vec::new();
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::qname => name = Some(ast::QName::parse(p.as_str())),
                Rule::dir_attribute_list => {
                    for a in p.into_inner() {
                        attributes.push(Self::build_dir_attribute(&a)?);
                    }
                }
                Rule::dir_elem_content => {
                    let c = Self::only_child(&p)?;
                    let item = match c.as_rule() {
                        Rule::dir_elem_constructor => ast::ElementContent::Element(Self::build_dir_element(&c)?),
                        Rule::dir_comment_constructor => ast::ElementContent::Comment(Self::child_text(&c)),
                        Rule::dir_pi_constructor => {
                            let (target, content) = Self::pi_parts(&c);
                            ast::ElementContent::Pi { target, content }
                        }
                        Rule::cdata_section => ast::ElementContent::CharData(Self::child_text(&c)),
                        Rule::elem_text => ast::ElementContent::Text(c.as_str().to_string()),
                        Rule::common_content => Self::build_common_content(&c)?,
                        _ => return Err(error_at(&c, "unexpected element content")),
                    };
                    push_content(&mut content, item);
                }
                _ => {}
            }
        }
        let name = name.ok_or_else(|| error_at(pair, "element without name"))?;
        Ok(ast::DirElement { name, attributes, content })
    }

    fn build_common_content(pair: &Pair<Rule>) -> Result<ast::ElementContent> {
        let c = Self::only_child(pair)?;
        Ok(match c.as_rule() {
            Rule::predefined_entity_ref | Rule::char_ref => ast::ElementContent::CharData(
                expand_references(c.as_str()).ok_or_else(|| error_at(&c, "invalid character reference"))?,
            ),
            Rule::lbrace_escape => ast::ElementContent::Text("{".into()),
            Rule::rbrace_escape => ast::ElementContent::Text("}".into()),
            Rule::enclosed_content => ast::ElementContent::Expr(match c.clone().into_inner().next() {
                Some(e) => Self::build_expr(&e)?,
                None => ast::Expr::Sequence(Vec::new()),
            }),
            _ => return Err(error_at(&c, "unexpected content")),
        })
    }

    fn build_dir_attribute(pair: &Pair<Rule>) -> Result<ast::DirAttribute> {
        let mut name = None;
        let mut value: Vec<ast::AttributeValuePart> = Vec::new();
        let mut push_text = |value: &mut Vec<ast::AttributeValuePart>, s: &str| {
            if let Some(ast::AttributeValuePart::Text(t)) = value.last_mut() {
                t.push_str(s);
            } else {
                value.push(ast::AttributeValuePart::Text(s.to_string()));
            }
        };
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::qname => name = Some(ast::QName::parse(p.as_str())),
                Rule::dir_attr_value => {
                    for part in p.into_inner() {
                        match part.as_rule() {
                            Rule::escaped_quot => push_text(&mut value, "\""),
                            Rule::escaped_apos => push_text(&mut value, "'"),
                            Rule::dq_attr_text | Rule::sq_attr_text => {
                                let normalized: String = part
                                    .as_str()
                                    .chars()
                                    .map(|ch| if matches!(ch, '\t' | '\n' | '\r') { ' ' } else { ch })
                                    .collect();
                                push_text(&mut value, &normalized);
                            }
                            Rule::common_content => match Self::build_common_content(&part)? {
                                ast::ElementContent::Text(t) | ast::ElementContent::CharData(t) => {
                                    push_text(&mut value, &t);
                                }
                                ast::ElementContent::Expr(e) => value.push(ast::AttributeValuePart::Expr(e)),
                                _ => {}
                            },
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        let name = name.ok_or_else(|| error_at(pair, "attribute without name"))?;
        Ok(ast::DirAttribute { name, value })
    }

    // ===== Paths =====

    fn build_path_expr(pair: &Pair<Rule>) -> Result<ast::Expr> {
        let first = Self::only_child(pair)?;
        match first.as_rule() {
            Rule::root_descendant_path => {
                let rel = Self::only_child(&first)?;
                let mut steps = vec![ast::PathStep::Axis(ast::Step::descendant_or_self_node())];
                steps.extend(Self::collect_steps(&rel)?);
                Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::Root, steps }))
            }
            Rule::root_path => {
                let steps = match first.clone().into_inner().next() {
                    Some(rel) => Self::collect_steps(&rel)?,
                    None => Vec::new(),
                };
                Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::Root, steps }))
            }
            Rule::relative_path_expr => {
                let mut steps = Self::collect_steps(&first)?;
                if steps.len() == 1
                    && let ast::PathStep::Expr(_) = steps[0]
                    && let Some(ast::PathStep::Expr(e)) = steps.pop()
                {
                    return Ok(e);
                }
                Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::Relative, steps }))
            }
            _ => Err(error_at(&first, "unexpected path form")),
        }
    }

    fn collect_steps(pair: &Pair<Rule>) -> Result<Vec<ast::PathStep>> {
        let mut out = Vec::new();
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::dslash => out.push(ast::PathStep::Axis(ast::Step::descendant_or_self_node())),
                Rule::slash => {}
                Rule::step_expr => out.push(Self::build_step(&p)?),
                _ => return Err(error_at(&p, "unexpected path component")),
            }
        }
        Ok(out)
    }

    fn build_step(pair: &Pair<Rule>) -> Result<ast::PathStep> {
        let inner = Self::only_child(pair)?;
        match inner.as_rule() {
            Rule::axis_step => {
                let mut parts = inner.clone().into_inner();
                let first = Self::next(&inner, &mut parts)?;
                let (axis, test) = match first.as_rule() {
                    Rule::forward_step => Self::build_forward_step(&first)?,
                    Rule::reverse_step => Self::build_reverse_step(&first)?,
                    _ => return Err(error_at(&first, "unexpected step")),
                };
                let predicates = Self::predicates(parts)?;
                Ok(ast::PathStep::Axis(ast::Step { axis, test, predicates }))
            }
            Rule::postfix_expr => {
                let mut parts = inner.clone().into_inner();
                let primary = Self::build_expr(&Self::next(&inner, &mut parts)?)?;
                let predicates = Self::predicates(parts)?;
                if predicates.is_empty() {
                    Ok(ast::PathStep::Expr(primary))
                } else {
                    Ok(ast::PathStep::Expr(ast::Expr::Filter { input: Box::new(primary), predicates }))
                }
            }
            _ => Err(error_at(&inner, "unexpected step")),
        }
    }

    fn predicates(pairs: pest::iterators::Pairs<Rule>) -> Result<Vec<ast::Expr>> {
        pairs
            .filter(|p| p.as_rule() == Rule::predicate)
            .map(|p| Self::build_expr(&Self::only_child(&p)?))
            .collect()
    }

    fn build_forward_step(pair: &Pair<Rule>) -> Result<(ast::Axis, ast::NodeTest)> {
        let mut inners = pair.clone().into_inner();
        let first = Self::next(pair, &mut inners)?;
        match first.as_rule() {
            Rule::forward_axis => {
                let axis = match Self::first_token_rule(&first) {
                    Rule::K_CHILD => ast::Axis::Child,
                    Rule::K_DESCENDANT => ast::Axis::Descendant,
                    Rule::K_ATTRIBUTE => ast::Axis::Attribute,
                    Rule::K_SELF => ast::Axis::SelfAxis,
                    Rule::K_DESCENDANT_OR_SELF => ast::Axis::DescendantOrSelf,
                    Rule::K_FOLLOWING_SIBLING => ast::Axis::FollowingSibling,
                    Rule::K_FOLLOWING => ast::Axis::Following,
                    Rule::K_NAMESPACE => ast::Axis::Namespace,
                    _ => return Err(error_at(&first, "unknown forward axis")),
                };
                let test = Self::build_node_test(&Self::next(pair, &mut inners)?)?;
                Ok((axis, test))
            }
            Rule::abbrev_forward_step => {
                let mut attribute = false;
                let mut test = None;
                for p in first.clone().into_inner() {
                    match p.as_rule() {
                        Rule::at_sign => attribute = true,
                        Rule::node_test => test = Some(Self::build_node_test(&p)?),
                        _ => {}
                    }
                }
                let test = test.ok_or_else(|| error_at(&first, "missing node test"))?;
                // `attribute(...)` kind tests default to the attribute axis too.
                let on_attribute = attribute
                    || matches!(test, ast::NodeTest::Kind(ast::KindTest::Attribute { .. } | ast::KindTest::SchemaAttribute(_)));
                Ok((if on_attribute { ast::Axis::Attribute } else { ast::Axis::Child }, test))
            }
            _ => Err(error_at(&first, "unexpected forward step")),
        }
    }

    fn build_reverse_step(pair: &Pair<Rule>) -> Result<(ast::Axis, ast::NodeTest)> {
        let mut inners = pair.clone().into_inner();
        let first = Self::next(pair, &mut inners)?;
        if first.as_rule() == Rule::abbrev_reverse_step {
            return Ok((ast::Axis::Parent, ast::NodeTest::Kind(ast::KindTest::AnyKind)));
        }
        let axis = match Self::first_token_rule(&first) {
            Rule::K_PARENT => ast::Axis::Parent,
            Rule::K_ANCESTOR => ast::Axis::Ancestor,
            Rule::K_ANCESTOR_OR_SELF => ast::Axis::AncestorOrSelf,
            Rule::K_PRECEDING_SIBLING => ast::Axis::PrecedingSibling,
            Rule::K_PRECEDING => ast::Axis::Preceding,
            _ => return Err(error_at(&first, "unknown reverse axis")),
        };
        let test = Self::build_node_test(&Self::next(pair, &mut inners)?)?;
        Ok((axis, test))
    }

    fn build_node_test(pair: &Pair<Rule>) -> Result<ast::NodeTest> {
        let inner = Self::only_child(pair)?;
        match inner.as_rule() {
            Rule::name_test => Self::build_name_test(&inner).map(ast::NodeTest::Name),
            Rule::kind_test => Self::build_kind_test(&inner).map(ast::NodeTest::Kind),
            _ => Err(error_at(&inner, "unexpected node test")),
        }
    }

    fn build_name_test(pair: &Pair<Rule>) -> Result<ast::NameTest> {
        let inner = Self::only_child(pair)?;
        match inner.as_rule() {
            Rule::qname => Ok(ast::NameTest::QName(ast::QName::parse(inner.as_str()))),
            Rule::wildcard => {
                let s = inner.as_str();
                if s == "*" {
                    Ok(ast::NameTest::Wildcard(ast::WildcardName::Any))
                } else if let Some(rest) = s.strip_prefix("*:") {
                    Ok(ast::NameTest::Wildcard(ast::WildcardName::LocalWildcard(rest.to_string())))
                } else if let Some(prefix) = s.strip_suffix(":*") {
                    Ok(ast::NameTest::Wildcard(ast::WildcardName::NsWildcard(prefix.to_string())))
                } else {
                    Err(error_at(&inner, "malformed wildcard"))
                }
            }
            _ => Err(error_at(&inner, "unexpected name test")),
        }
    }

    fn build_kind_test(pair: &Pair<Rule>) -> Result<ast::KindTest> {
        Self::build_kind(&Self::only_child(pair)?)
    }

    fn build_kind(kind: &Pair<Rule>) -> Result<ast::KindTest> {
        let kind = kind.clone();
        let type_of = |p: &Pair<Rule>| {
            p.clone()
                .into_inner()
                .find(|x| x.as_rule() == Rule::type_name)
                .map(|x| ast::TypeName(ast::QName::parse(x.as_str())))
        };
        fn name_of<'i>(p: &Pair<'i, Rule>) -> Option<Pair<'i, Rule>> {
            p.clone()
                .into_inner()
                .find(|x| x.as_rule() == Rule::name_or_wildcard)
                .and_then(|x| x.into_inner().next())
        }
        Ok(match kind.as_rule() {
            Rule::any_kind_test => ast::KindTest::AnyKind,
            Rule::text_test => ast::KindTest::Text,
            Rule::comment_test => ast::KindTest::Comment,
            Rule::namespace_node_test => ast::KindTest::NamespaceNode,
            Rule::pi_test => {
                let target = match kind.clone().into_inner().next() {
                    Some(p) if p.as_rule() == Rule::string_literal => Some(Self::string_literal(&p)?.trim().to_string()),
                    Some(p) => Some(p.as_str().to_string()),
                    None => None,
                };
                ast::KindTest::ProcessingInstruction(target)
            }
            Rule::document_test => {
                let inner = match kind.clone().into_inner().next() {
                    Some(p) => Some(Box::new(Self::build_kind(&p)?)),
                    None => None,
                };
                ast::KindTest::Document(inner)
            }
            Rule::element_test => ast::KindTest::Element {
                name: name_of(&kind).map(|n| match n.as_rule() {
                    Rule::any_name => ast::ElementNameOrWildcard::Any,
                    _ => ast::ElementNameOrWildcard::Name(ast::QName::parse(n.as_str())),
                }),
                ty: type_of(&kind),
                nillable: kind.clone().into_inner().any(|x| x.as_rule() == Rule::nillable),
            },
            Rule::attribute_test => ast::KindTest::Attribute {
                name: name_of(&kind).map(|n| match n.as_rule() {
                    Rule::any_name => ast::AttributeNameOrWildcard::Any,
                    _ => ast::AttributeNameOrWildcard::Name(ast::QName::parse(n.as_str())),
                }),
                ty: type_of(&kind),
            },
            Rule::schema_element_test | Rule::schema_attribute_test => {
                let name = kind
                    .clone()
                    .into_inner()
                    .find(|x| x.as_rule() == Rule::qname)
                    .map(|x| ast::QName::parse(x.as_str()))
                    .ok_or_else(|| error_at(&kind, "missing schema name"))?;
                if kind.as_rule() == Rule::schema_element_test {
                    ast::KindTest::SchemaElement(name)
                } else {
                    ast::KindTest::SchemaAttribute(name)
                }
            }
            _ => return Err(error_at(&kind, "unexpected kind test")),
        })
    }

    // ===== Types =====

    fn build_sequence_type(pair: &Pair<Rule>) -> Result<ast::SequenceType> {
        let mut item = None;
        let mut occ = ast::Occurrence::One;
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::empty_sequence_type => return Ok(ast::SequenceType::EmptySequence),
                Rule::item_type => {
                    let inner = Self::only_child(&p)?;
                    item = Some(match inner.as_rule() {
                        Rule::kind_test => ast::ItemType::Kind(Self::build_kind_test(&inner)?),
                        Rule::any_item => ast::ItemType::Item,
                        _ => ast::ItemType::Atomic(ast::QName::parse(inner.as_str())),
                    });
                }
                Rule::occurrence_indicator => {
                    occ = match p.as_str() {
                        "?" => ast::Occurrence::ZeroOrOne,
                        "*" => ast::Occurrence::ZeroOrMore,
                        _ => ast::Occurrence::OneOrMore,
                    };
                }
                _ => {}
            }
        }
        let item = item.ok_or_else(|| error_at(pair, "missing item type"))?;
        Ok(ast::SequenceType::Typed { item, occ })
    }

    fn build_single_type(pair: &Pair<Rule>) -> ast::SingleType {
        let mut atomic = ast::QName::parse("");
        let mut optional = false;
        for p in pair.clone().into_inner() {
            match p.as_rule() {
                Rule::qname => atomic = ast::QName::parse(p.as_str()),
                Rule::optional_marker => optional = true,
                _ => {}
            }
        }
        ast::SingleType { atomic, optional }
    }
}

fn push_content(content: &mut Vec<ast::ElementContent>, item: ast::ElementContent) {
    if let ast::ElementContent::Text(s) = &item
        && let Some(ast::ElementContent::Text(prev)) = content.last_mut()
    {
        prev.push_str(s);
        return;
    }
    content.push(item);
}

/// Expand predefined entity and character references; `None` on a bad reference.
fn expand_references(s: &str) -> Option<String> {
    if !s.contains('&') {
        return Some(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let end = tail.find(';')?;
        let name = &tail[1..end];
        let ch = match name {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = name.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()?
                } else if let Some(dec) = name.strip_prefix('#') {
                    dec.parse::<u32>().ok()?
                } else {
                    return None;
                };
                char::from_u32(code)?
            }
        };
        out.push(ch);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_module_header_is_read() {
        let m = parse_module(r#"module namespace m = "urn:m"; declare function m:f() { 1 };"#).unwrap();
        let ast::Module::Library(lib) = m else {
            panic!("expected a library module");
        };
        assert_eq!(lib.prefix, "m");
        assert_eq!(lib.namespace, "urn:m");
        assert_eq!(lib.prolog.decls.len(), 1);
    }

    #[test]
    fn import_keeps_every_location_hint() {
        let m = parse_module(r#"import module namespace m = "urn:m" at "a.xqm", "b.xqm"; 1"#).unwrap();
        let ast::Module::Main(main) = m else {
            panic!("expected a main module");
        };
        match &main.prolog.decls[0] {
            ast::PrologDecl::Import(imp) => {
                assert_eq!(imp.prefix.as_deref(), Some("m"));
                assert_eq!(imp.locations, vec!["a.xqm".to_string(), "b.xqm".to_string()]);
            }
            other => panic!("unexpected declaration {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        let err = parse_module("for $x in (1, 2)\nretrun $x").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
        let (line, _) = err.position.expect("position");
        assert_eq!(line, 2);
    }

    #[test]
    fn parse_expr_rejects_a_prolog() {
        assert!(parse_expr("1 + 1").is_ok());
        let err = parse_expr("declare variable $a := 1; $a").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    }

    #[test]
    fn entity_references_are_expanded() {
        assert_eq!(expand_references("a &lt; b &#x41;&#66;").as_deref(), Some("a < b AB"));
        assert_eq!(expand_references("&bogus;"), None);
    }
}
