//! Location index builder.
//!
//! One pass over the AST assigns stable sequential ids to three node
//! categories: executable statements, branching constructs, and function
//! bodies. The visitation order is the entire basis of map stability, so the
//! walk is written as explicit recursion rather than visitor dispatch, and
//! the contract is: **pre-order, depth-first, source order** — a node's id is
//! assigned before its children are visited, children are visited in textual
//! order, and entering a nested function neither resets nor pauses the
//! counters.
//!
//! Category rules:
//! - statements: every statement node except block containers, empty
//!   statements, and directive-prologue strings. A statement inside a loop is
//!   one id whose count accumulates, not one id per iteration.
//! - branches: `if`/`else` (implicit else synthesized), conditional
//!   expressions, `&&`/`||` (one id per operator node, operands are the
//!   alternatives), `switch` (one alternative per case including `default`).
//!   Loops and `try` contribute no branch ids.
//! - functions: declarations, function expressions, arrows, methods,
//!   getters, setters, constructors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use swc_core::common::{Span, Spanned};
use swc_core::ecma::ast::*;

/// Half-open byte range into the input text, plus the 1-based line its first
/// byte falls on (for line-aligned display).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
    pub line: u32,
}

/// One branching construct: its own extent and one span per alternative.
/// The alternative count is `alternatives.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSite {
    pub span: SourceSpan,
    pub alternatives: Vec<SourceSpan>,
}

/// Pure data describing every instrumentation site of one unit.
///
/// Ids are dense, 1-based, and contiguous per category. Derivable purely from
/// the AST: re-indexing byte-identical source yields an identical map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationMap {
    pub statements: BTreeMap<u32, SourceSpan>,
    pub branches: BTreeMap<u32, BranchSite>,
    pub functions: BTreeMap<u32, SourceSpan>,
}

impl InstrumentationMap {
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

/// Number of leading directive-prologue statements (`"use strict"` and
/// friends) in a script or function body. Directives must stay the first
/// instructions of their scope, so they are never counted or preceded by
/// probes. Shared with the rewriter so both passes skip the same statements.
pub(crate) fn directive_prefix_len(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .take_while(|stmt| match stmt {
            Stmt::Expr(es) => matches!(&*es.expr, Expr::Lit(Lit::Str(_))),
            _ => false,
        })
        .count()
}

/// Build the instrumentation map for a parsed unit.
///
/// `base` is the unit's offset within its source map; `source` is the text
/// the spans index into (used for line bookkeeping only).
pub(crate) fn index(
    script: &Script,
    source: &str,
    base: u32,
    walk_debug: bool,
) -> InstrumentationMap {
    let mut indexer = Indexer {
        map: InstrumentationMap::default(),
        next_statement: 1,
        next_branch: 1,
        next_function: 1,
        base,
        line_starts: line_starts(source),
        walk_debug,
    };
    indexer.index_body(&script.body);
    indexer.map
}

fn line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i as u32 + 1);
        }
    }
    starts
}

struct Indexer {
    map: InstrumentationMap,
    next_statement: u32,
    next_branch: u32,
    next_function: u32,
    base: u32,
    line_starts: Vec<u32>,
    walk_debug: bool,
}

impl Indexer {
    fn source_span(&self, span: Span) -> SourceSpan {
        let start = span.lo.0.saturating_sub(self.base);
        let end = span.hi.0.saturating_sub(self.base);
        let line = match self.line_starts.binary_search(&start) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        };
        SourceSpan { start, end, line }
    }

    fn add_statement(&mut self, span: Span) {
        let id = self.next_statement;
        self.next_statement += 1;
        let span = self.source_span(span);
        if self.walk_debug {
            tracing::debug!(id, start = span.start, line = span.line, "statement");
        }
        self.map.statements.insert(id, span);
    }

    fn add_branch(&mut self, span: Span, alternatives: Vec<SourceSpan>) {
        let id = self.next_branch;
        self.next_branch += 1;
        let span = self.source_span(span);
        if self.walk_debug {
            tracing::debug!(
                id,
                start = span.start,
                alternatives = alternatives.len(),
                "branch"
            );
        }
        self.map.branches.insert(id, BranchSite { span, alternatives });
    }

    fn add_function(&mut self, span: Span) {
        let id = self.next_function;
        self.next_function += 1;
        let span = self.source_span(span);
        if self.walk_debug {
            tracing::debug!(id, start = span.start, line = span.line, "function");
        }
        self.map.functions.insert(id, span);
    }

    /// A script or function body: directives first (uncounted), then the
    /// statement list.
    fn index_body(&mut self, stmts: &[Stmt]) {
        let skip = directive_prefix_len(stmts);
        self.index_stmts(&stmts[skip..]);
    }

    fn index_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.index_stmt(stmt);
        }
    }

    fn index_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            // Containers and padding carry no ids of their own.
            Stmt::Block(b) => self.index_stmts(&b.stmts),
            Stmt::Empty(_) => {}
            _ => {
                self.add_statement(stmt.span());
                self.index_stmt_parts(stmt);
            }
        }
    }

    /// The interior of a statement, without assigning it an id. Split out so
    /// a labeled statement's body can stay transparent: the label and its
    /// body are one statement (wrapping a label's loop in a block would break
    /// `continue label`).
    fn index_stmt_parts(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(_) | Stmt::Empty(_) => {}
            Stmt::Expr(es) => self.index_expr(&es.expr),
            Stmt::Decl(decl) => self.index_decl(decl),
            Stmt::If(i) => {
                let cons = self.source_span(i.cons.span());
                let alt = match &i.alt {
                    Some(alt) => self.source_span(alt.span()),
                    // Synthetic implicit else: recorded against the `if`
                    // statement's own extent.
                    None => self.source_span(i.span),
                };
                self.add_branch(i.span, vec![cons, alt]);
                self.index_expr(&i.test);
                self.index_stmt(&i.cons);
                if let Some(alt) = &i.alt {
                    self.index_stmt(alt);
                }
            }
            Stmt::Switch(s) => {
                let alternatives = s
                    .cases
                    .iter()
                    .map(|case| self.source_span(case.span))
                    .collect();
                self.add_branch(s.span, alternatives);
                self.index_expr(&s.discriminant);
                for case in &s.cases {
                    if let Some(test) = &case.test {
                        self.index_expr(test);
                    }
                    self.index_stmts(&case.cons);
                }
            }
            Stmt::While(w) => {
                self.index_expr(&w.test);
                self.index_stmt(&w.body);
            }
            Stmt::DoWhile(d) => {
                self.index_stmt(&d.body);
                self.index_expr(&d.test);
            }
            Stmt::For(f) => {
                match &f.init {
                    Some(VarDeclOrExpr::VarDecl(v)) => self.index_var_decl(v),
                    Some(VarDeclOrExpr::Expr(e)) => self.index_expr(e),
                    None => {}
                }
                if let Some(test) = &f.test {
                    self.index_expr(test);
                }
                if let Some(update) = &f.update {
                    self.index_expr(update);
                }
                self.index_stmt(&f.body);
            }
            Stmt::ForIn(f) => {
                self.index_for_head(&f.left);
                self.index_expr(&f.right);
                self.index_stmt(&f.body);
            }
            Stmt::ForOf(f) => {
                self.index_for_head(&f.left);
                self.index_expr(&f.right);
                self.index_stmt(&f.body);
            }
            Stmt::Return(r) => {
                if let Some(arg) = &r.arg {
                    self.index_expr(arg);
                }
            }
            Stmt::Throw(t) => self.index_expr(&t.arg),
            Stmt::Try(t) => {
                self.index_stmts(&t.block.stmts);
                if let Some(handler) = &t.handler {
                    if let Some(param) = &handler.param {
                        self.index_pat(param);
                    }
                    self.index_stmts(&handler.body.stmts);
                }
                if let Some(finalizer) = &t.finalizer {
                    self.index_stmts(&finalizer.stmts);
                }
            }
            Stmt::Labeled(l) => self.index_stmt_parts(&l.body),
            Stmt::With(w) => {
                self.index_expr(&w.obj);
                self.index_stmt(&w.body);
            }
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Debugger(_) => {}
        }
    }

    fn index_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Var(v) => self.index_var_decl(v),
            Decl::Fn(f) => {
                self.add_function(f.function.span);
                self.index_function(&f.function);
            }
            Decl::Class(c) => self.index_class(&c.class),
            _ => {}
        }
    }

    fn index_var_decl(&mut self, decl: &VarDecl) {
        for declarator in &decl.decls {
            self.index_pat(&declarator.name);
            if let Some(init) = &declarator.init {
                self.index_expr(init);
            }
        }
    }

    fn index_for_head(&mut self, head: &ForHead) {
        match head {
            ForHead::VarDecl(v) => self.index_var_decl(v),
            ForHead::Pat(p) => self.index_pat(p),
            _ => {}
        }
    }

    fn index_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Cond(c) => {
                let cons = self.source_span(c.cons.span());
                let alt = self.source_span(c.alt.span());
                self.add_branch(c.span, vec![cons, alt]);
                self.index_expr(&c.test);
                self.index_expr(&c.cons);
                self.index_expr(&c.alt);
            }
            Expr::Bin(b) if is_short_circuit(b.op) => {
                let left = self.source_span(b.left.span());
                let right = self.source_span(b.right.span());
                self.add_branch(b.span, vec![left, right]);
                self.index_expr(&b.left);
                self.index_expr(&b.right);
            }
            Expr::Bin(b) => {
                self.index_expr(&b.left);
                self.index_expr(&b.right);
            }
            Expr::Fn(f) => {
                self.add_function(f.function.span);
                self.index_function(&f.function);
            }
            Expr::Arrow(a) => {
                self.add_function(a.span);
                for param in &a.params {
                    self.index_pat(param);
                }
                match &*a.body {
                    BlockStmtOrExpr::BlockStmt(b) => self.index_body(&b.stmts),
                    BlockStmtOrExpr::Expr(e) => self.index_expr(e),
                }
            }
            Expr::Class(c) => self.index_class(&c.class),
            Expr::Assign(a) => {
                self.index_assign_target(&a.left);
                self.index_expr(&a.right);
            }
            Expr::Call(c) => {
                if let Callee::Expr(callee) = &c.callee {
                    self.index_expr(callee);
                }
                for arg in &c.args {
                    self.index_expr(&arg.expr);
                }
            }
            Expr::New(n) => {
                self.index_expr(&n.callee);
                if let Some(args) = &n.args {
                    for arg in args {
                        self.index_expr(&arg.expr);
                    }
                }
            }
            Expr::Member(m) => self.index_member(m),
            Expr::SuperProp(sp) => {
                if let SuperProp::Computed(c) = &sp.prop {
                    self.index_expr(&c.expr);
                }
            }
            Expr::Array(a) => {
                for elem in a.elems.iter().flatten() {
                    self.index_expr(&elem.expr);
                }
            }
            Expr::Object(o) => {
                for prop in &o.props {
                    self.index_prop(prop);
                }
            }
            Expr::Seq(s) => {
                for e in &s.exprs {
                    self.index_expr(e);
                }
            }
            Expr::Paren(p) => self.index_expr(&p.expr),
            Expr::Unary(u) => self.index_expr(&u.arg),
            Expr::Update(u) => self.index_expr(&u.arg),
            Expr::Await(a) => self.index_expr(&a.arg),
            Expr::Yield(y) => {
                if let Some(arg) = &y.arg {
                    self.index_expr(arg);
                }
            }
            Expr::Tpl(t) => {
                for e in &t.exprs {
                    self.index_expr(e);
                }
            }
            Expr::TaggedTpl(t) => {
                self.index_expr(&t.tag);
                for e in &t.tpl.exprs {
                    self.index_expr(e);
                }
            }
            Expr::OptChain(o) => match &*o.base {
                OptChainBase::Member(m) => self.index_member(m),
                OptChainBase::Call(c) => {
                    self.index_expr(&c.callee);
                    for arg in &c.args {
                        self.index_expr(&arg.expr);
                    }
                }
            },
            _ => {}
        }
    }

    fn index_member(&mut self, member: &MemberExpr) {
        self.index_expr(&member.obj);
        if let MemberProp::Computed(c) = &member.prop {
            self.index_expr(&c.expr);
        }
    }

    fn index_assign_target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Simple(SimpleAssignTarget::Member(m)) => self.index_member(m),
            AssignTarget::Simple(SimpleAssignTarget::Paren(p)) => self.index_expr(&p.expr),
            AssignTarget::Pat(AssignTargetPat::Array(a)) => {
                for elem in a.elems.iter().flatten() {
                    self.index_pat(elem);
                }
            }
            AssignTarget::Pat(AssignTargetPat::Object(o)) => {
                for prop in &o.props {
                    self.index_object_pat_prop(prop);
                }
            }
            _ => {}
        }
    }

    fn index_prop(&mut self, prop: &PropOrSpread) {
        match prop {
            PropOrSpread::Spread(s) => self.index_expr(&s.expr),
            PropOrSpread::Prop(p) => match &**p {
                Prop::Shorthand(_) => {}
                Prop::KeyValue(kv) => {
                    self.index_prop_name(&kv.key);
                    self.index_expr(&kv.value);
                }
                Prop::Assign(a) => self.index_expr(&a.value),
                Prop::Getter(g) => {
                    if g.body.is_some() {
                        self.add_function(g.span);
                    }
                    self.index_prop_name(&g.key);
                    if let Some(body) = &g.body {
                        self.index_body(&body.stmts);
                    }
                }
                Prop::Setter(s) => {
                    if s.body.is_some() {
                        self.add_function(s.span);
                    }
                    self.index_prop_name(&s.key);
                    self.index_pat(&s.param);
                    if let Some(body) = &s.body {
                        self.index_body(&body.stmts);
                    }
                }
                Prop::Method(m) => {
                    self.add_function(m.function.span);
                    self.index_prop_name(&m.key);
                    self.index_function(&m.function);
                }
            },
        }
    }

    fn index_prop_name(&mut self, name: &PropName) {
        if let PropName::Computed(c) = name {
            self.index_expr(&c.expr);
        }
    }

    /// Params then body; the caller has already assigned the function id.
    fn index_function(&mut self, function: &Function) {
        for param in &function.params {
            self.index_pat(&param.pat);
        }
        if let Some(body) = &function.body {
            self.index_body(&body.stmts);
        }
    }

    fn index_class(&mut self, class: &Class) {
        if let Some(super_class) = &class.super_class {
            self.index_expr(super_class);
        }
        for member in &class.body {
            match member {
                ClassMember::Constructor(c) => {
                    if c.body.is_some() {
                        self.add_function(c.span);
                    }
                    for param in &c.params {
                        if let ParamOrTsParamProp::Param(p) = param {
                            self.index_pat(&p.pat);
                        }
                    }
                    if let Some(body) = &c.body {
                        self.index_body(&body.stmts);
                    }
                }
                ClassMember::Method(m) => {
                    self.add_function(m.function.span);
                    self.index_prop_name(&m.key);
                    self.index_function(&m.function);
                }
                ClassMember::PrivateMethod(m) => {
                    self.add_function(m.function.span);
                    self.index_function(&m.function);
                }
                ClassMember::ClassProp(p) => {
                    self.index_prop_name(&p.key);
                    if let Some(value) = &p.value {
                        self.index_expr(value);
                    }
                }
                ClassMember::PrivateProp(p) => {
                    if let Some(value) = &p.value {
                        self.index_expr(value);
                    }
                }
                ClassMember::StaticBlock(s) => self.index_stmts(&s.body.stmts),
                _ => {}
            }
        }
    }

    fn index_pat(&mut self, pat: &Pat) {
        match pat {
            Pat::Ident(_) | Pat::Invalid(_) => {}
            Pat::Array(a) => {
                for elem in a.elems.iter().flatten() {
                    self.index_pat(elem);
                }
            }
            Pat::Rest(r) => self.index_pat(&r.arg),
            Pat::Object(o) => {
                for prop in &o.props {
                    self.index_object_pat_prop(prop);
                }
            }
            Pat::Assign(a) => {
                self.index_pat(&a.left);
                self.index_expr(&a.right);
            }
            Pat::Expr(e) => self.index_expr(e),
        }
    }

    fn index_object_pat_prop(&mut self, prop: &ObjectPatProp) {
        match prop {
            ObjectPatProp::KeyValue(kv) => {
                self.index_prop_name(&kv.key);
                self.index_pat(&kv.value);
            }
            ObjectPatProp::Assign(a) => {
                if let Some(value) = &a.value {
                    self.index_expr(value);
                }
            }
            ObjectPatProp::Rest(r) => self.index_pat(&r.arg),
        }
    }
}

pub(crate) fn is_short_circuit(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_unit;

    fn index_source(source: &str) -> InstrumentationMap {
        let parsed = parse_unit(source, true).unwrap();
        index(&parsed.script, source, parsed.base, false)
    }

    fn assert_dense(map: &InstrumentationMap) {
        let check = |keys: Vec<u32>, what: &str| {
            let expected: Vec<u32> = (1..=keys.len() as u32).collect();
            assert_eq!(keys, expected, "{what} ids must be dense and 1-based");
        };
        check(map.statements.keys().copied().collect(), "statement");
        check(map.branches.keys().copied().collect(), "branch");
        check(map.functions.keys().copied().collect(), "function");
    }

    #[test]
    fn while_loop_yields_four_statements_and_no_branches() {
        let map = index_source("var x = args[0], i = 0; while (i < x) i++; output = i;");
        assert_eq!(map.statement_count(), 4, "Got: {:?}", map.statements);
        assert_eq!(map.branch_count(), 0, "loops contribute no branch ids");
        assert_eq!(map.function_count(), 0);
        assert_dense(&map);
    }

    #[test]
    fn statement_ids_follow_source_order() {
        let map = index_source("var a = 1;\nwhile (a) a--;\nb = 2;\n");
        let starts: Vec<u32> = map.statements.values().map(|s| s.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted, "statement spans must ascend with ids");
    }

    #[test]
    fn ternary_is_one_branch_with_two_alternatives() {
        let map = index_source(r#"var x = args[0] > 5 ? args[0] : "undef"; output = x;"#);
        assert_eq!(map.statement_count(), 2);
        assert_eq!(map.branch_count(), 1);
        let branch = &map.branches[&1];
        assert_eq!(branch.alternatives.len(), 2);
        assert!(branch.alternatives[0].start < branch.alternatives[1].start);
    }

    #[test]
    fn if_without_else_gets_a_synthetic_alternative() {
        let map = index_source("if (x) y();");
        assert_eq!(map.branch_count(), 1);
        assert_eq!(map.branches[&1].alternatives.len(), 2);
        // Statements: the if itself and the sole-arm call.
        assert_eq!(map.statement_count(), 2);
    }

    #[test]
    fn switch_counts_one_alternative_per_case_including_default() {
        let map = index_source(
            "switch (x) { case 1: a(); break; case 2: b(); break; default: c(); }",
        );
        assert_eq!(map.branch_count(), 1);
        assert_eq!(map.branches[&1].alternatives.len(), 3);
    }

    #[test]
    fn logical_operators_branch_per_operator_node() {
        let map = index_source("var ok = a && b || c;");
        // `a && b || c` parses as `(a && b) || c`: two operator nodes.
        assert_eq!(map.branch_count(), 2);
        for branch in map.branches.values() {
            assert_eq!(branch.alternatives.len(), 2);
        }
        assert_dense(&map);
    }

    #[test]
    fn nested_function_does_not_pause_statement_ids() {
        let map = index_source("function f() { var a = 1; }\nvar b = 2;\n");
        // fn decl, inner var, outer var — one global sequence.
        assert_eq!(map.statement_count(), 3);
        assert_eq!(map.function_count(), 1);
        assert_dense(&map);
    }

    #[test]
    fn functions_cover_expressions_arrows_and_methods() {
        let map = index_source(
            "function d() {}\nvar e = function named() {};\nvar a = () => 1;\nvar o = { m: function () {} };\n",
        );
        assert_eq!(map.function_count(), 4, "Got: {:?}", map.functions);
    }

    #[test]
    fn directive_prologue_is_not_a_statement() {
        let map = index_source("\"use strict\";\nvar a = 1;\n");
        assert_eq!(map.statement_count(), 1);
        // Inside a plain block a string expression is just a statement.
        let inner = index_source("{ \"not a directive\"; }");
        assert_eq!(inner.statement_count(), 1);
    }

    #[test]
    fn labeled_loop_counts_once() {
        let map = index_source("outer: while (x) { if (y) continue outer; z(); }");
        // labeled-while (one), if, continue, z() — the while body block and
        // the label itself add nothing.
        assert_eq!(map.statement_count(), 4, "Got: {:?}", map.statements);
    }

    #[test]
    fn shebang_does_not_shift_ids() {
        let plain = "var x = args[0] > 5 ? args[0] : 0; output = x;";
        let with_shebang = format!("#!/usr/bin/env node\n{plain}");
        let neutralized = crate::parse::neutralize_shebang(&with_shebang).into_owned();

        let a = index_source(plain);
        let b = index_source(&neutralized);
        assert_eq!(a.statement_count(), b.statement_count());
        assert_eq!(a.branch_count(), b.branch_count());
        assert_eq!(
            a.statements.keys().collect::<Vec<_>>(),
            b.statements.keys().collect::<Vec<_>>()
        );
        assert_eq!(a.branches[&1].alternatives.len(), b.branches[&1].alternatives.len());
    }

    #[test]
    fn reindexing_identical_source_yields_identical_map() {
        let src = "function f(n) { return n > 0 ? f(n - 1) : 0; }\nf(3);\n";
        assert_eq!(index_source(src), index_source(src));
    }
}
