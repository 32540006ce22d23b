//! Rewriter / code generator.
//!
//! Consumes the instrumentation map and emits new source text in which every
//! counted statement is preceded by a counter bump, every branch alternative
//! records which way execution went, and every function body opens with an
//! invocation counter. Probes are built as AST and spliced structurally; the
//! final text comes out of the swc code generator, never string pasting.
//!
//! The walk mirrors `index` exactly, but ids are resolved by source span
//! rather than by re-counting, so nodes synthesized here (which carry dummy
//! spans) can never capture an id.
//!
//! Probe shapes, given trace variable `TV` and file key `K`:
//! - statement:   `TV[K].s["3"] = (TV[K].s["3"] || 0) + 1;`
//! - branch:      `TV[K].b["1"][0]++` — as a statement at the head of an
//!   `if`/`switch` arm, or wrapped around an expression alternative as
//!   `(TV[K].b["1"][0]++, expr)` so lazy evaluation is preserved.
//! - function:    `TV[K].f["2"] = (TV[K].f["2"] || 0) + 1;` first in the body.
//!
//! `s` and `f` start as empty maps in the record, hence the `|| 0` form;
//! branch arrays are pre-seeded by the preamble, so `++` suffices.

use std::collections::HashMap;

use swc_core::common::sync::Lrc;
use swc_core::common::{Span, Spanned, SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::codegen::{Config, Emitter, Node};

use crate::error::Error;
use crate::index::{directive_prefix_len, is_short_circuit, InstrumentationMap};
use crate::options::Options;
use crate::parse::{parse_snippet, Parsed};

/// Rewrite a parsed unit into instrumented text.
///
/// `original` is the untouched input (shebang intact), used when the options
/// ask for the source to be embedded in the runtime record.
pub(crate) fn generate(
    parsed: Parsed,
    map: &InstrumentationMap,
    key: &str,
    original: &str,
    options: &Options,
) -> Result<String, Error> {
    let Parsed {
        cm,
        mut script,
        base,
    } = parsed;

    let rewriter = Rewriter {
        lookup: SpanLookup::new(map),
        trace_var: options.trace_variable().to_string(),
        key: key.to_string(),
        base,
    };

    let body = std::mem::take(&mut script.body);
    let skip = directive_prefix_len(&body);
    let mut iter = body.into_iter();
    let directives: Vec<Stmt> = iter.by_ref().take(skip).collect();
    let instrumented = rewriter.rewrite_stmts(iter.collect());

    let embed = options.embed_source.then_some(original);
    let preamble = preamble_source(options.trace_variable(), key, map, embed)?;
    let mut out = parse_snippet(&cm, preamble)?;

    if options.no_auto_wrap {
        // Directives must stay the first instructions of the unit; the
        // preamble follows, then the body.
        let mut stmts = directives;
        stmts.append(&mut out);
        stmts.extend(instrumented);
        script.body = stmts;
    } else {
        // Preamble first, then the invocable wrapper so a mainline `return`
        // is legal. The unit's directives keep their prologue position
        // inside the wrapper.
        let mut wrapped = directives;
        wrapped.extend(instrumented);
        out.push(wrap_in_call(wrapped));
        script.body = out;
    }
    script.shebang = None;

    emit(&cm, script)
}

/// The lazy-initialization preamble. Guarded on the record entry so re-running
/// it never resets already-collected counts; branch slots are pre-seeded with
/// zero arrays sized to each site's alternative count.
fn preamble_source(
    trace_var: &str,
    key: &str,
    map: &InstrumentationMap,
    embed: Option<&str>,
) -> Result<String, Error> {
    let key_js = json(&key)?;
    let seeds = map
        .branches
        .iter()
        .map(|(id, site)| {
            let zeros = vec!["0"; site.alternatives.len()].join(", ");
            Ok(format!("{}: [{zeros}]", json(&id.to_string())?))
        })
        .collect::<Result<Vec<_>, Error>>()?
        .join(", ");
    let code = match embed {
        Some(source) => {
            let lines: Vec<&str> = source.split('\n').collect();
            format!(", code: {}", json(&lines)?)
        }
        None => String::new(),
    };
    Ok(format!(
        "if (typeof {trace_var} === 'undefined') {trace_var} = {{}};\n\
         if (!{trace_var}[{key_js}]) {trace_var}[{key_js}] = {{ s: {{}}, b: {{{seeds}}}, f: {{}}{code} }};"
    ))
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|e| Error::Codegen(e.to_string()))
}

/// `(function () { ... }).call(this);`
fn wrap_in_call(stmts: Vec<Stmt>) -> Stmt {
    let function = Function {
        params: vec![],
        decorators: vec![],
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        body: Some(block(stmts)),
        is_generator: false,
        is_async: false,
        type_params: None,
        return_type: None,
    };
    let callee = Expr::Member(MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(Expr::Fn(FnExpr {
                ident: None,
                function: Box::new(function),
            })),
        })),
        prop: MemberProp::Ident(IdentName::new("call".into(), DUMMY_SP)),
    });
    expr_stmt(Expr::Call(CallExpr {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        callee: Callee::Expr(Box::new(callee)),
        args: vec![ExprOrSpread {
            spread: None,
            expr: Box::new(Expr::This(ThisExpr { span: DUMMY_SP })),
        }],
        type_args: None,
    }))
}

fn emit(cm: &Lrc<swc_core::common::SourceMap>, script: Script) -> Result<String, Error> {
    let program = Program::Script(script);
    let mut buf = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: Config::default(),
            cm: cm.clone(),
            comments: None,
            wr: JsWriter::new(cm.clone(), "\n", &mut buf, None),
        };
        program.emit_with(&mut emitter)?;
    }
    String::from_utf8(buf).map_err(|e| Error::Codegen(e.to_string()))
}

/// Reverse lookup from normalized (start, end) offsets to ids, one table per
/// category. Synthesized nodes carry dummy spans and resolve to nothing.
struct SpanLookup {
    statements: HashMap<(u32, u32), u32>,
    branches: HashMap<(u32, u32), u32>,
    functions: HashMap<(u32, u32), u32>,
}

impl SpanLookup {
    fn new(map: &InstrumentationMap) -> Self {
        Self {
            statements: map
                .statements
                .iter()
                .map(|(id, s)| ((s.start, s.end), *id))
                .collect(),
            branches: map
                .branches
                .iter()
                .map(|(id, b)| ((b.span.start, b.span.end), *id))
                .collect(),
            functions: map
                .functions
                .iter()
                .map(|(id, s)| ((s.start, s.end), *id))
                .collect(),
        }
    }

    fn key(span: Span, base: u32) -> Option<(u32, u32)> {
        if span.lo.0 == 0 {
            return None;
        }
        Some((
            span.lo.0.saturating_sub(base),
            span.hi.0.saturating_sub(base),
        ))
    }

    fn statement(&self, span: Span, base: u32) -> Option<u32> {
        Self::key(span, base).and_then(|k| self.statements.get(&k).copied())
    }

    fn branch(&self, span: Span, base: u32) -> Option<u32> {
        Self::key(span, base).and_then(|k| self.branches.get(&k).copied())
    }

    fn function(&self, span: Span, base: u32) -> Option<u32> {
        Self::key(span, base).and_then(|k| self.functions.get(&k).copied())
    }
}

struct Rewriter {
    lookup: SpanLookup,
    trace_var: String,
    key: String,
    base: u32,
}

impl Rewriter {
    // ---- probe templates ------------------------------------------------

    /// `TV[K].<category>["id"]`
    fn counter_slot(&self, category: &str, id: u32) -> MemberExpr {
        let record = computed(
            Expr::Ident(plain_ident(&self.trace_var)),
            str_lit(&self.key),
        );
        let category = named(Expr::Member(record), category);
        computed(Expr::Member(category), str_lit(&id.to_string()))
    }

    /// `TV[K].<cat>["id"] = (TV[K].<cat>["id"] || 0) + 1;`
    fn tally_stmt(&self, category: &str, id: u32) -> Stmt {
        let read = Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(Expr::Bin(BinExpr {
                span: DUMMY_SP,
                op: BinaryOp::LogicalOr,
                left: Box::new(Expr::Member(self.counter_slot(category, id))),
                right: Box::new(num_lit(0)),
            })),
        });
        let bumped = Expr::Bin(BinExpr {
            span: DUMMY_SP,
            op: BinaryOp::Add,
            left: Box::new(read),
            right: Box::new(num_lit(1)),
        });
        expr_stmt(Expr::Assign(AssignExpr {
            span: DUMMY_SP,
            op: AssignOp::Assign,
            left: AssignTarget::Simple(SimpleAssignTarget::Member(
                self.counter_slot(category, id),
            )),
            right: Box::new(bumped),
        }))
    }

    /// `TV[K].b["id"][alt]++`
    fn branch_probe(&self, id: u32, alternative: usize) -> Expr {
        let slot = computed(Expr::Member(self.counter_slot("b", id)), num_lit(alternative));
        Expr::Update(UpdateExpr {
            span: DUMMY_SP,
            op: UpdateOp::PlusPlus,
            prefix: false,
            arg: Box::new(Expr::Member(slot)),
        })
    }

    fn branch_probe_stmt(&self, id: u32, alternative: usize) -> Stmt {
        expr_stmt(self.branch_probe(id, alternative))
    }

    /// Replace an expression alternative with `(probe, expr)`. The sequence
    /// only evaluates when the alternative itself does, so short-circuiting
    /// and side effects are untouched.
    fn wrap_alternative(&self, slot: &mut Expr, id: u32, alternative: usize) {
        let original = std::mem::replace(slot, Expr::Invalid(Invalid { span: DUMMY_SP }));
        *slot = Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(Expr::Seq(SeqExpr {
                span: DUMMY_SP,
                exprs: vec![
                    Box::new(self.branch_probe(id, alternative)),
                    Box::new(original),
                ],
            })),
        });
    }

    // ---- statements -----------------------------------------------------

    fn rewrite_stmts(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len() * 2);
        self.rewrite_stmts_into(stmts, &mut out);
        out
    }

    fn rewrite_stmts_into(&self, stmts: Vec<Stmt>, out: &mut Vec<Stmt>) {
        for stmt in stmts {
            match stmt {
                Stmt::Block(mut b) => {
                    b.stmts = self.rewrite_stmts(std::mem::take(&mut b.stmts));
                    out.push(Stmt::Block(b));
                }
                Stmt::Empty(e) => out.push(Stmt::Empty(e)),
                mut other => {
                    let sid = self.lookup.statement(other.span(), self.base);
                    self.rewrite_stmt_parts(&mut other);
                    if let Some(id) = sid {
                        out.push(self.tally_stmt("s", id));
                    }
                    out.push(other);
                }
            }
        }
    }

    fn rewrite_stmt_parts(&self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Block(_) | Stmt::Empty(_) => {}
            Stmt::Expr(es) => self.rewrite_expr(&mut es.expr),
            Stmt::Decl(decl) => self.rewrite_decl(decl),
            Stmt::If(i) => {
                let bid = self.lookup.branch(i.span, self.base);
                self.rewrite_expr(&mut i.test);
                let cons = std::mem::replace(&mut *i.cons, Stmt::Empty(EmptyStmt { span: DUMMY_SP }));
                *i.cons = self.rewrite_alternative(cons, bid.map(|id| (id, 0)));
                match i.alt.take() {
                    Some(alt) => {
                        i.alt = Some(Box::new(
                            self.rewrite_alternative(*alt, bid.map(|id| (id, 1))),
                        ));
                    }
                    None => {
                        // Synthetic implicit else so the untaken path is
                        // still observable.
                        if let Some(id) = bid {
                            i.alt = Some(Box::new(Stmt::Block(block(vec![
                                self.branch_probe_stmt(id, 1),
                            ]))));
                        }
                    }
                }
            }
            Stmt::Switch(s) => {
                let bid = self.lookup.branch(s.span, self.base);
                self.rewrite_expr(&mut s.discriminant);
                for (alt, case) in s.cases.iter_mut().enumerate() {
                    if let Some(test) = &mut case.test {
                        self.rewrite_expr(test);
                    }
                    case.cons = self.rewrite_stmts(std::mem::take(&mut case.cons));
                    if let Some(id) = bid {
                        case.cons.insert(0, self.branch_probe_stmt(id, alt));
                    }
                }
            }
            Stmt::While(w) => {
                self.rewrite_expr(&mut w.test);
                self.rewrite_sole_body(&mut w.body);
            }
            Stmt::DoWhile(d) => {
                self.rewrite_sole_body(&mut d.body);
                self.rewrite_expr(&mut d.test);
            }
            Stmt::For(f) => {
                match &mut f.init {
                    Some(VarDeclOrExpr::VarDecl(v)) => self.rewrite_var_decl(v),
                    Some(VarDeclOrExpr::Expr(e)) => self.rewrite_expr(e),
                    None => {}
                }
                if let Some(test) = &mut f.test {
                    self.rewrite_expr(test);
                }
                if let Some(update) = &mut f.update {
                    self.rewrite_expr(update);
                }
                self.rewrite_sole_body(&mut f.body);
            }
            Stmt::ForIn(f) => {
                self.rewrite_for_head(&mut f.left);
                self.rewrite_expr(&mut f.right);
                self.rewrite_sole_body(&mut f.body);
            }
            Stmt::ForOf(f) => {
                self.rewrite_for_head(&mut f.left);
                self.rewrite_expr(&mut f.right);
                self.rewrite_sole_body(&mut f.body);
            }
            Stmt::Return(r) => {
                if let Some(arg) = &mut r.arg {
                    self.rewrite_expr(arg);
                }
            }
            Stmt::Throw(t) => self.rewrite_expr(&mut t.arg),
            Stmt::Try(t) => {
                t.block.stmts = self.rewrite_stmts(std::mem::take(&mut t.block.stmts));
                if let Some(handler) = &mut t.handler {
                    if let Some(param) = &mut handler.param {
                        self.rewrite_pat(param);
                    }
                    handler.body.stmts =
                        self.rewrite_stmts(std::mem::take(&mut handler.body.stmts));
                }
                if let Some(finalizer) = &mut t.finalizer {
                    finalizer.stmts = self.rewrite_stmts(std::mem::take(&mut finalizer.stmts));
                }
            }
            // The label and its body are one statement; the probe was placed
            // before the whole labeled statement by the enclosing list.
            Stmt::Labeled(l) => self.rewrite_stmt_parts(&mut l.body),
            Stmt::With(w) => {
                self.rewrite_expr(&mut w.obj);
                self.rewrite_sole_body(&mut w.body);
            }
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Debugger(_) => {}
        }
    }

    /// An arm that carries a branch probe: always becomes a block whose first
    /// instruction is the probe.
    fn rewrite_alternative(&self, stmt: Stmt, probe: Option<(u32, usize)>) -> Stmt {
        let mut stmts = Vec::new();
        if let Some((id, alt)) = probe {
            stmts.push(self.branch_probe_stmt(id, alt));
        }
        match stmt {
            Stmt::Block(mut b) => {
                let inner = self.rewrite_stmts(std::mem::take(&mut b.stmts));
                stmts.extend(inner);
                b.stmts = stmts;
                Stmt::Block(b)
            }
            other => {
                self.rewrite_stmts_into(vec![other], &mut stmts);
                Stmt::Block(block(stmts))
            }
        }
    }

    /// A loop (or `with`) body in sole-statement position: wrapped into a
    /// block so the body statement's own probe can sit inside the loop.
    fn rewrite_sole_body(&self, body: &mut Box<Stmt>) {
        let current = std::mem::replace(&mut **body, Stmt::Empty(EmptyStmt { span: DUMMY_SP }));
        **body = match current {
            Stmt::Block(mut b) => {
                b.stmts = self.rewrite_stmts(std::mem::take(&mut b.stmts));
                Stmt::Block(b)
            }
            Stmt::Empty(e) => Stmt::Empty(e),
            other => {
                let mut stmts = Vec::new();
                self.rewrite_stmts_into(vec![other], &mut stmts);
                Stmt::Block(block(stmts))
            }
        };
    }

    fn rewrite_decl(&self, decl: &mut Decl) {
        match decl {
            Decl::Var(v) => self.rewrite_var_decl(v),
            Decl::Fn(f) => self.rewrite_function(&mut f.function),
            Decl::Class(c) => self.rewrite_class(&mut c.class),
            _ => {}
        }
    }

    fn rewrite_var_decl(&self, decl: &mut VarDecl) {
        for declarator in &mut decl.decls {
            self.rewrite_pat(&mut declarator.name);
            if let Some(init) = &mut declarator.init {
                self.rewrite_expr(init);
            }
        }
    }

    fn rewrite_for_head(&self, head: &mut ForHead) {
        match head {
            ForHead::VarDecl(v) => self.rewrite_var_decl(v),
            ForHead::Pat(p) => self.rewrite_pat(p),
            _ => {}
        }
    }

    // ---- expressions ----------------------------------------------------

    fn rewrite_expr(&self, expr: &mut Expr) {
        match expr {
            Expr::Cond(c) => {
                let bid = self.lookup.branch(c.span, self.base);
                self.rewrite_expr(&mut c.test);
                self.rewrite_expr(&mut c.cons);
                self.rewrite_expr(&mut c.alt);
                if let Some(id) = bid {
                    self.wrap_alternative(&mut c.cons, id, 0);
                    self.wrap_alternative(&mut c.alt, id, 1);
                }
            }
            Expr::Bin(b) if is_short_circuit(b.op) => {
                let bid = self.lookup.branch(b.span, self.base);
                self.rewrite_expr(&mut b.left);
                self.rewrite_expr(&mut b.right);
                if let Some(id) = bid {
                    self.wrap_alternative(&mut b.left, id, 0);
                    self.wrap_alternative(&mut b.right, id, 1);
                }
            }
            Expr::Bin(b) => {
                self.rewrite_expr(&mut b.left);
                self.rewrite_expr(&mut b.right);
            }
            Expr::Fn(f) => self.rewrite_function(&mut f.function),
            Expr::Arrow(a) => self.rewrite_arrow(a),
            Expr::Class(c) => self.rewrite_class(&mut c.class),
            Expr::Assign(a) => {
                self.rewrite_assign_target(&mut a.left);
                self.rewrite_expr(&mut a.right);
            }
            Expr::Call(c) => {
                if let Callee::Expr(callee) = &mut c.callee {
                    self.rewrite_expr(callee);
                }
                for arg in &mut c.args {
                    self.rewrite_expr(&mut arg.expr);
                }
            }
            Expr::New(n) => {
                self.rewrite_expr(&mut n.callee);
                if let Some(args) = &mut n.args {
                    for arg in args {
                        self.rewrite_expr(&mut arg.expr);
                    }
                }
            }
            Expr::Member(m) => self.rewrite_member(m),
            Expr::SuperProp(sp) => {
                if let SuperProp::Computed(c) = &mut sp.prop {
                    self.rewrite_expr(&mut c.expr);
                }
            }
            Expr::Array(a) => {
                for elem in a.elems.iter_mut().flatten() {
                    self.rewrite_expr(&mut elem.expr);
                }
            }
            Expr::Object(o) => {
                for prop in &mut o.props {
                    self.rewrite_prop(prop);
                }
            }
            Expr::Seq(s) => {
                for e in &mut s.exprs {
                    self.rewrite_expr(e);
                }
            }
            Expr::Paren(p) => self.rewrite_expr(&mut p.expr),
            Expr::Unary(u) => self.rewrite_expr(&mut u.arg),
            Expr::Update(u) => self.rewrite_expr(&mut u.arg),
            Expr::Await(a) => self.rewrite_expr(&mut a.arg),
            Expr::Yield(y) => {
                if let Some(arg) = &mut y.arg {
                    self.rewrite_expr(arg);
                }
            }
            Expr::Tpl(t) => {
                for e in &mut t.exprs {
                    self.rewrite_expr(e);
                }
            }
            Expr::TaggedTpl(t) => {
                self.rewrite_expr(&mut t.tag);
                for e in &mut t.tpl.exprs {
                    self.rewrite_expr(e);
                }
            }
            Expr::OptChain(o) => match &mut *o.base {
                OptChainBase::Member(m) => self.rewrite_member(m),
                OptChainBase::Call(c) => {
                    self.rewrite_expr(&mut c.callee);
                    for arg in &mut c.args {
                        self.rewrite_expr(&mut arg.expr);
                    }
                }
            },
            _ => {}
        }
    }

    fn rewrite_member(&self, member: &mut MemberExpr) {
        self.rewrite_expr(&mut member.obj);
        if let MemberProp::Computed(c) = &mut member.prop {
            self.rewrite_expr(&mut c.expr);
        }
    }

    fn rewrite_assign_target(&self, target: &mut AssignTarget) {
        match target {
            AssignTarget::Simple(SimpleAssignTarget::Member(m)) => self.rewrite_member(m),
            AssignTarget::Simple(SimpleAssignTarget::Paren(p)) => self.rewrite_expr(&mut p.expr),
            AssignTarget::Pat(AssignTargetPat::Array(a)) => {
                for elem in a.elems.iter_mut().flatten() {
                    self.rewrite_pat(elem);
                }
            }
            AssignTarget::Pat(AssignTargetPat::Object(o)) => {
                for prop in &mut o.props {
                    self.rewrite_object_pat_prop(prop);
                }
            }
            _ => {}
        }
    }

    fn rewrite_prop(&self, prop: &mut PropOrSpread) {
        match prop {
            PropOrSpread::Spread(s) => self.rewrite_expr(&mut s.expr),
            PropOrSpread::Prop(p) => match &mut **p {
                Prop::Shorthand(_) => {}
                Prop::KeyValue(kv) => {
                    self.rewrite_prop_name(&mut kv.key);
                    self.rewrite_expr(&mut kv.value);
                }
                Prop::Assign(a) => self.rewrite_expr(&mut a.value),
                Prop::Getter(g) => {
                    let fid = self.lookup.function(g.span, self.base);
                    self.rewrite_prop_name(&mut g.key);
                    if let Some(body) = &mut g.body {
                        body.stmts =
                            self.rewrite_function_body(std::mem::take(&mut body.stmts), fid);
                    }
                }
                Prop::Setter(s) => {
                    let fid = self.lookup.function(s.span, self.base);
                    self.rewrite_prop_name(&mut s.key);
                    self.rewrite_pat(&mut s.param);
                    if let Some(body) = &mut s.body {
                        body.stmts =
                            self.rewrite_function_body(std::mem::take(&mut body.stmts), fid);
                    }
                }
                Prop::Method(m) => {
                    self.rewrite_prop_name(&mut m.key);
                    self.rewrite_function(&mut m.function);
                }
            },
        }
    }

    fn rewrite_prop_name(&self, name: &mut PropName) {
        if let PropName::Computed(c) = name {
            self.rewrite_expr(&mut c.expr);
        }
    }

    // ---- functions ------------------------------------------------------

    /// Directives stay first, then the invocation probe, then the counted
    /// statements — so the probe runs exactly once per call on every exit
    /// path (return, throw, fall-through).
    fn rewrite_function_body(&self, stmts: Vec<Stmt>, fid: Option<u32>) -> Vec<Stmt> {
        let skip = directive_prefix_len(&stmts);
        let mut iter = stmts.into_iter();
        let mut out: Vec<Stmt> = iter.by_ref().take(skip).collect();
        if let Some(id) = fid {
            out.push(self.tally_stmt("f", id));
        }
        self.rewrite_stmts_into(iter.collect(), &mut out);
        out
    }

    fn rewrite_function(&self, function: &mut Function) {
        for param in &mut function.params {
            self.rewrite_pat(&mut param.pat);
        }
        let fid = self.lookup.function(function.span, self.base);
        if let Some(body) = &mut function.body {
            body.stmts = self.rewrite_function_body(std::mem::take(&mut body.stmts), fid);
        }
    }

    fn rewrite_arrow(&self, arrow: &mut ArrowExpr) {
        for param in &mut arrow.params {
            self.rewrite_pat(param);
        }
        let fid = self.lookup.function(arrow.span, self.base);
        match &mut *arrow.body {
            BlockStmtOrExpr::BlockStmt(b) => {
                b.stmts = self.rewrite_function_body(std::mem::take(&mut b.stmts), fid);
            }
            BlockStmtOrExpr::Expr(e) => {
                self.rewrite_expr(e);
                if let Some(id) = fid {
                    // An expression body has nowhere to put the probe; turn
                    // it into a block with an explicit return.
                    let original = std::mem::replace(
                        &mut **e,
                        Expr::Invalid(Invalid { span: DUMMY_SP }),
                    );
                    *arrow.body = BlockStmtOrExpr::BlockStmt(block(vec![
                        self.tally_stmt("f", id),
                        Stmt::Return(ReturnStmt {
                            span: DUMMY_SP,
                            arg: Some(Box::new(original)),
                        }),
                    ]));
                }
            }
        }
    }

    fn rewrite_class(&self, class: &mut Class) {
        if let Some(super_class) = &mut class.super_class {
            self.rewrite_expr(super_class);
        }
        for member in &mut class.body {
            match member {
                ClassMember::Constructor(c) => {
                    let fid = self.lookup.function(c.span, self.base);
                    for param in &mut c.params {
                        if let ParamOrTsParamProp::Param(p) = param {
                            self.rewrite_pat(&mut p.pat);
                        }
                    }
                    if let Some(body) = &mut c.body {
                        body.stmts =
                            self.rewrite_function_body(std::mem::take(&mut body.stmts), fid);
                    }
                }
                ClassMember::Method(m) => {
                    self.rewrite_prop_name(&mut m.key);
                    self.rewrite_function(&mut m.function);
                }
                ClassMember::PrivateMethod(m) => self.rewrite_function(&mut m.function),
                ClassMember::ClassProp(p) => {
                    self.rewrite_prop_name(&mut p.key);
                    if let Some(value) = &mut p.value {
                        self.rewrite_expr(value);
                    }
                }
                ClassMember::PrivateProp(p) => {
                    if let Some(value) = &mut p.value {
                        self.rewrite_expr(value);
                    }
                }
                ClassMember::StaticBlock(s) => {
                    s.body.stmts = self.rewrite_stmts(std::mem::take(&mut s.body.stmts));
                }
                _ => {}
            }
        }
    }

    // ---- patterns -------------------------------------------------------

    fn rewrite_pat(&self, pat: &mut Pat) {
        match pat {
            Pat::Ident(_) | Pat::Invalid(_) => {}
            Pat::Array(a) => {
                for elem in a.elems.iter_mut().flatten() {
                    self.rewrite_pat(elem);
                }
            }
            Pat::Rest(r) => self.rewrite_pat(&mut r.arg),
            Pat::Object(o) => {
                for prop in &mut o.props {
                    self.rewrite_object_pat_prop(prop);
                }
            }
            Pat::Assign(a) => {
                self.rewrite_pat(&mut a.left);
                self.rewrite_expr(&mut a.right);
            }
            Pat::Expr(e) => self.rewrite_expr(e),
        }
    }

    fn rewrite_object_pat_prop(&self, prop: &mut ObjectPatProp) {
        match prop {
            ObjectPatProp::KeyValue(kv) => {
                self.rewrite_prop_name(&mut kv.key);
                self.rewrite_pat(&mut kv.value);
            }
            ObjectPatProp::Assign(a) => {
                if let Some(value) = &mut a.value {
                    self.rewrite_expr(value);
                }
            }
            ObjectPatProp::Rest(r) => self.rewrite_pat(&mut r.arg),
        }
    }
}

// ---- AST construction helpers -------------------------------------------

fn plain_ident(name: &str) -> Ident {
    Ident {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        sym: name.into(),
        optional: false,
    }
}

fn str_lit(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

fn num_lit(value: usize) -> Expr {
    Expr::Lit(Lit::Num(Number {
        span: DUMMY_SP,
        value: value as f64,
        raw: None,
    }))
}

fn computed(obj: Expr, index: Expr) -> MemberExpr {
    MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(obj),
        prop: MemberProp::Computed(ComputedPropName {
            span: DUMMY_SP,
            expr: Box::new(index),
        }),
    }
}

fn named(obj: Expr, name: &str) -> MemberExpr {
    MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(obj),
        prop: MemberProp::Ident(IdentName::new(name.into(), DUMMY_SP)),
    }
}

fn block(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        stmts,
    }
}

fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::index;
    use crate::parse::parse_unit;

    fn run(source: &str, options: &Options) -> String {
        let parsed = parse_unit(source, !options.no_auto_wrap).unwrap();
        let map = index(&parsed.script, source, parsed.base, false);
        generate(parsed, &map, "test.js", source, options).unwrap()
    }

    #[test]
    fn statement_probe_precedes_the_statement() {
        let out = run("fill();", &Options::default());
        let probe = out.find(r#".s["1"]"#).expect("statement probe missing");
        let call = out.find("fill()").expect("original call missing");
        assert!(probe < call, "probe must precede the statement. Got:\n{out}");
    }

    #[test]
    fn loop_body_probe_lands_inside_the_loop() {
        let out = run(
            "var x = args[0], i = 0; while (i < x) i++; output = i;",
            &Options::default(),
        );
        // The sole-statement body is blockified so the body's probe can run
        // once per iteration.
        let while_pos = out.find("while").unwrap();
        let probe3 = out.find(r#".s["3"]"#).expect("loop body probe missing");
        let probe4 = out.find(r#".s["4"]"#).expect("trailing probe missing");
        assert!(while_pos < probe3 && probe3 < probe4, "Got:\n{out}");
        // One probe site per id (each site mentions the slot twice: once as
        // the assignment target, once in the `|| 0` read).
        assert_eq!(out.matches(r#".s["3"] = "#).count(), 1, "Got:\n{out}");
    }

    #[test]
    fn ternary_alternatives_are_sequence_wrapped() {
        let out = run(
            r#"var x = args[0] > 5 ? args[0] : "undef"; output = x;"#,
            &Options::default(),
        );
        assert!(out.contains(r#".b["1"][0]++"#), "Got:\n{out}");
        assert!(out.contains(r#".b["1"][1]++"#), "Got:\n{out}");
        // Preamble seeds the branch with a two-slot zero array.
        assert!(out.contains("\"1\": ["), "Got:\n{out}");
    }

    #[test]
    fn if_without_else_gains_a_counting_arm() {
        let out = run("if (x) y();", &Options::default());
        assert!(out.contains("else"), "Got:\n{out}");
        assert!(out.contains(r#".b["1"][1]++"#), "Got:\n{out}");
    }

    #[test]
    fn switch_cases_count_by_position() {
        let out = run(
            "switch (x) { case 1: a(); break; default: b(); }",
            &Options::default(),
        );
        assert!(out.contains(r#".b["1"][0]++"#), "Got:\n{out}");
        assert!(out.contains(r#".b["1"][1]++"#), "Got:\n{out}");
    }

    #[test]
    fn function_probe_is_first_in_the_body() {
        let out = run("function f() { work(); }", &Options::default());
        let fprobe = out.find(r#".f["1"]"#).expect("function probe missing");
        let work = out.find("work()").unwrap();
        assert!(fprobe < work, "Got:\n{out}");
    }

    #[test]
    fn expression_arrow_becomes_a_counting_block() {
        let out = run("var f = (x) => x + 1;", &Options::default());
        assert!(out.contains(r#".f["1"]"#), "Got:\n{out}");
        assert!(out.contains("return"), "Got:\n{out}");
    }

    #[test]
    fn preamble_comes_first_and_is_guarded() {
        let out = run("var a = 1;", &Options::default());
        assert!(
            out.trim_start().starts_with("if (typeof __burrow__ === 'undefined')"),
            "Got:\n{out}"
        );
        assert!(out.contains("if (!__burrow__["), "Got:\n{out}");
    }

    #[test]
    fn custom_trace_variable_is_spliced() {
        let opts = Options {
            trace_variable: Some("__cov_alt".into()),
            ..Options::default()
        };
        let out = run("var a = 1;", &opts);
        assert!(out.contains("__cov_alt"), "Got:\n{out}");
        assert!(!out.contains("__burrow__"), "Got:\n{out}");
    }

    #[test]
    fn wrapper_is_present_by_default_and_absent_when_disabled() {
        let out = run("var a = 1;", &Options::default());
        assert!(out.contains("function"), "Got:\n{out}");
        assert!(out.contains(".call(this)"), "Got:\n{out}");

        let opts = Options {
            no_auto_wrap: true,
            ..Options::default()
        };
        let out = run("var a = 1;", &opts);
        assert!(!out.contains(".call(this)"), "Got:\n{out}");
    }

    #[test]
    fn directives_stay_ahead_of_probes() {
        let opts = Options {
            no_auto_wrap: true,
            ..Options::default()
        };
        let out = run("\"use strict\";\nvar a = 1;\n", &opts);
        let directive = out.find("use strict").unwrap();
        let probe = out.find(r#".s["1"]"#).unwrap();
        assert!(directive < probe, "Got:\n{out}");
    }

    #[test]
    fn embedded_source_lines_are_verbatim() {
        let opts = Options {
            embed_source: true,
            ..Options::default()
        };
        let source = "var a = 1;\nvar b = a * 2;\n";
        let out = run(source, &opts);
        assert!(out.contains("code:"), "Got:\n{out}");
        assert!(out.contains(r#""var b = a * 2;""#), "Got:\n{out}");
    }

    #[test]
    fn short_circuit_operands_wrap_without_reordering() {
        let out = run("var ok = ready && fire();", &Options::default());
        let left = out.find(r#".b["1"][0]++"#).expect("left probe missing");
        let right = out.find(r#".b["1"][1]++"#).expect("right probe missing");
        let and = out.find("&&").unwrap();
        assert!(left < and && and < right, "Got:\n{out}");
    }
}
