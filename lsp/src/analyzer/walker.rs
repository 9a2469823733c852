use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DocumentSymbol, Position as LspPosition, Range, SymbolKind,
};

use loupe_core::ast::{BinOp, Block, Chunk, Expr, ExprKind, FuncBody, Name, Stmt, StmtKind, TableField, UnOp};
use loupe_core::token::Span;
use loupe_core::util::fast_map::FastHashMap;

use super::doc::{self, Doc};
use super::lut::{IdentInfo, Luts};
use super::scope::{Declared, ScopeId, ScopeTree, VarId};
use super::ty::{self, FnId, FnTy, TableId, Ty, TyPool, MAX_TYPE_DEPTH};

/// Everything the walk produces besides the scope tree and LUTs it
/// mutates in place.
#[derive(Debug, Default)]
pub struct WalkOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub symbols: Vec<DocumentSymbol>,
}

pub fn span_range(span: Span) -> Range {
    Range::new(
        LspPosition::new(span.start.line - 1, span.start.column - 1),
        LspPosition::new(span.end.line - 1, span.end.column - 1),
    )
}

/// Walk a parsed chunk, declaring variables, inferring types, emitting
/// diagnostics and building the symbol tree. A well-formed AST never makes
/// the walk fail; unexpected shapes degrade to `nil` plus a diagnostic.
pub fn walk(
    pool: &mut TyPool,
    scopes: &mut ScopeTree,
    luts: &mut Luts,
    chunk: &Chunk,
    src: &str,
    ignore_p8scii: bool,
) -> WalkOutput {
    let docs = doc::collect_docs(pool, &chunk.comments, src);
    let current = scopes.global();
    let mut walker = Walker {
        pool,
        scopes,
        luts,
        docs,
        diags: Vec::new(),
        symbols: vec![Vec::new()],
        frames: Vec::new(),
        current,
        ignore_p8scii,
    };
    walker.block(&chunk.block);
    WalkOutput {
        diagnostics: walker.diags,
        symbols: walker.symbols.pop().unwrap_or_default(),
    }
}

/// Traversal context: nearest enclosing function (for `return`/`...`) and
/// loop (for `break`). Not part of the persisted scope tree.
enum Frame {
    Function { returns: Vec<Ty>, vararg: Option<Ty> },
    Loop,
}

struct Walker<'a> {
    pool: &'a mut TyPool,
    scopes: &'a mut ScopeTree,
    luts: &'a mut Luts,
    docs: FastHashMap<u32, Doc>,
    diags: Vec<Diagnostic>,
    /// Stack of symbol lists; functions push a level for their children.
    symbols: Vec<Vec<DocumentSymbol>>,
    frames: Vec<Frame>,
    current: ScopeId,
    ignore_p8scii: bool,
}

impl Walker<'_> {
    fn diag(&mut self, span: Span, severity: DiagnosticSeverity, message: impl Into<String>) {
        self.diags.push(Diagnostic::new(
            span_range(span),
            Some(severity),
            None,
            Some("loupe".to_string()),
            message.into(),
            None,
            None,
        ));
    }

    fn short(&self, ty: Ty) -> String {
        ty::render(self.pool, ty, 2)
    }

    fn take_doc(&mut self, line: u32) -> Option<Doc> {
        self.docs.remove(&line)
    }

    fn enter(&mut self, tag: String, span: Span) -> ScopeId {
        let prev = self.current;
        let child = self.scopes.fork(prev, tag);
        self.luts.record_scope(span, child);
        self.current = child;
        prev
    }

    fn leave(&mut self, prev: ScopeId) {
        self.current = prev;
    }

    fn record_ident(&mut self, name: &Name, ty: Ty, var: Option<VarId>) {
        let doc = var.and_then(|v| self.scopes.var(v).doc.clone());
        self.luts.record_ident(IdentInfo {
            name: name.text.clone(),
            span: name.span,
            ty,
            var,
            scope: self.current,
            doc,
        });
    }

    fn push_symbol(&mut self, symbol: DocumentSymbol) {
        if let Some(top) = self.symbols.last_mut() {
            top.push(symbol);
        }
    }

    // -- statements ---------------------------------------------------------

    fn block(&mut self, block: &Block) {
        // Labels are visible to every goto in the block, including ones
        // textually before the label.
        for stmt in &block.stmts {
            if let StmtKind::Label(name) = &stmt.kind {
                if !self.scopes.declare_label(self.current, &name.text, name.span) {
                    self.diag(
                        name.span,
                        DiagnosticSeverity::WARNING,
                        format!("label '{}' already defined", name.text),
                    );
                }
            }
        }
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Local { names, exprs } => self.local_stmt(stmt, names, exprs),
            StmtKind::Assign { targets, values } => {
                let doc = self.take_doc(stmt.span.start.line);
                let tys = self.distribute(values, targets.len());
                for (i, target) in targets.iter().enumerate() {
                    let doc = if i == 0 { doc.clone() } else { None };
                    self.assign_target(target, tys[i], doc);
                }
            }
            StmtKind::CompoundAssign { op, targets, values } => {
                for value in values {
                    self.expr(value);
                }
                if targets.len() > 1 || values.len() > 1 {
                    self.diag(
                        stmt.span,
                        DiagnosticSeverity::WARNING,
                        "compound assignment with multiple targets or values is ambiguous",
                    );
                }
                let forced = if *op == BinOp::Concat { Ty::String } else { Ty::Number };
                if let Some(first) = targets.first() {
                    self.assign_target(first, forced, None);
                }
                for extra in targets.iter().skip(1) {
                    self.expr(extra);
                }
            }
            StmtKind::Call(expr) => {
                self.expr(expr);
            }
            StmtKind::Do(block) => {
                let prev = self.enter(
                    format!("do line {}", stmt.span.start.line),
                    stmt.span,
                );
                self.block(block);
                self.leave(prev);
            }
            StmtKind::While { cond, body } => {
                self.condition(cond);
                let prev = self.enter(
                    format!("while line {}", stmt.span.start.line),
                    stmt.span,
                );
                self.frames.push(Frame::Loop);
                self.block(body);
                self.frames.pop();
                self.leave(prev);
            }
            StmtKind::Repeat { body, cond } => {
                // The until condition sees the body's scope.
                let prev = self.enter(
                    format!("repeat line {}", stmt.span.start.line),
                    stmt.span,
                );
                self.frames.push(Frame::Loop);
                self.block(body);
                self.frames.pop();
                self.condition(cond);
                self.leave(prev);
            }
            StmtKind::If { clauses, else_block } => {
                for clause in clauses {
                    self.condition(&clause.cond);
                    let prev = self.enter(
                        format!("if line {}", clause.cond.span.start.line),
                        block_span(&clause.body, stmt.span),
                    );
                    self.block(&clause.body);
                    self.leave(prev);
                }
                if let Some(block) = else_block {
                    let prev = self.enter(
                        format!("else line {}", stmt.span.start.line),
                        block_span(block, stmt.span),
                    );
                    self.block(block);
                    self.leave(prev);
                }
            }
            StmtKind::NumericFor { var, start, end, step, body } => {
                self.expect_number(start);
                self.expect_number(end);
                if let Some(step) = step {
                    self.expect_number(step);
                }
                let prev = self.enter(
                    format!("for line {}", stmt.span.start.line),
                    stmt.span,
                );
                self.declare_var(var, Ty::Number, None);
                self.frames.push(Frame::Loop);
                self.block(body);
                self.frames.pop();
                self.leave(prev);
            }
            StmtKind::GenericFor { names, exprs, body } => {
                for expr in exprs {
                    self.expr(expr);
                }
                let prev = self.enter(
                    format!("for line {}", stmt.span.start.line),
                    stmt.span,
                );
                // The iterator protocol is not modeled; loop vars are unknown.
                for name in names {
                    self.declare_var(name, Ty::Any, None);
                }
                self.frames.push(Frame::Loop);
                self.block(body);
                self.frames.pop();
                self.leave(prev);
            }
            StmtKind::FunctionDecl { name, body } => self.function_decl(stmt, name, body),
            StmtKind::LocalFunction { name, body } => self.local_function(stmt, name, body),
            StmtKind::Return { exprs } => self.return_stmt(stmt, exprs),
            StmtKind::Break => {
                let mut in_loop = false;
                for frame in self.frames.iter().rev() {
                    match frame {
                        Frame::Loop => {
                            in_loop = true;
                            break;
                        }
                        Frame::Function { .. } => break,
                    }
                }
                if !in_loop {
                    self.diag(stmt.span, DiagnosticSeverity::WARNING, "break outside of a loop");
                }
            }
            // Declared in the block pre-pass.
            StmtKind::Label(_) => {}
            StmtKind::Goto(name) => {
                if self.scopes.resolve_label(self.current, &name.text).is_none() {
                    self.diag(
                        name.span,
                        DiagnosticSeverity::WARNING,
                        format!("label '{}' not defined or not visible", name.text),
                    );
                }
            }
        }
    }

    fn local_stmt(&mut self, stmt: &Stmt, names: &[Name], exprs: &[Expr]) {
        let doc = self.take_doc(stmt.span.start.line);
        let mut tys = self.distribute(exprs, names.len());
        if let Some(Doc { ty: Some(t), .. }) = &doc {
            if let Some(first) = tys.first_mut() {
                *first = *t;
            }
        }
        for (i, name) in names.iter().enumerate() {
            let ty = tys[i];
            let doc = if i == 0 { doc.clone() } else { None };
            self.declare_var(name, ty, doc);
            let detail = ty::render(self.pool, ty, MAX_TYPE_DEPTH);
            self.push_symbol(DocumentSymbol {
                name: name.text.clone(),
                detail: Some(detail),
                kind: SymbolKind::VARIABLE,
                tags: None,
                #[allow(deprecated)]
                deprecated: None,
                range: span_range(stmt.span),
                selection_range: span_range(name.span),
                children: None,
            });
        }
    }

    fn declare_var(&mut self, name: &Name, ty: Ty, doc: Option<Doc>) -> VarId {
        let var = match self.scopes.declare(self.current, &name.text, name.span, ty, doc) {
            Declared::Fresh(id) => id,
            Declared::Collision(existing) => {
                self.diag(
                    name.span,
                    DiagnosticSeverity::WARNING,
                    format!("'{}' is already declared in this scope", name.text),
                );
                self.scopes.update(existing, name.span, ty, self.current);
                existing
            }
        };
        self.record_ident(name, ty, Some(var));
        var
    }

    /// Right-hand sides of a multi-target binding: each source except the
    /// last yields one value; a trailing multi-valued source spreads.
    fn distribute(&mut self, exprs: &[Expr], n_targets: usize) -> Vec<Ty> {
        let last_multi = exprs.last().map(|e| e.is_multi_valued()).unwrap_or(false);
        let mut flat: Vec<Ty> = Vec::new();
        for (i, expr) in exprs.iter().enumerate() {
            let ty = self.expr(expr);
            if i + 1 == exprs.len() && expr.is_multi_valued() {
                flat.extend(self.pool.flatten_values(ty));
            } else {
                flat.push(self.pool.first_value(ty));
            }
        }
        let mut out = Vec::with_capacity(n_targets);
        for i in 0..n_targets {
            if i + 1 == n_targets && last_multi && flat.len() > n_targets {
                let rest: Vec<Ty> = flat[i..].to_vec();
                out.push(self.pool.tuple(rest));
            } else {
                out.push(flat.get(i).copied().unwrap_or(Ty::Nil));
            }
        }
        out
    }

    fn assign_target(&mut self, target: &Expr, ty: Ty, doc: Option<Doc>) {
        match &target.kind {
            ExprKind::Name(text) => {
                let ty = match &doc {
                    Some(Doc { ty: Some(t), .. }) => *t,
                    _ => ty,
                };
                let name = Name {
                    text: text.clone(),
                    span: target.span,
                };
                match self.scopes.resolve(self.current, text) {
                    Some(var) => {
                        self.scopes.update(var, target.span, ty, self.current);
                        if doc.is_some() {
                            self.scopes.var_mut(var).doc = doc;
                        }
                        self.record_ident(&name, ty, Some(var));
                    }
                    None => {
                        // Assigning an unknown name creates a global.
                        let global = self.scopes.global();
                        let var = match self.scopes.declare(global, text, target.span, ty, doc) {
                            Declared::Fresh(id) => id,
                            Declared::Collision(id) => {
                                self.scopes.update(id, target.span, ty, global);
                                id
                            }
                        };
                        self.record_ident(&name, ty, Some(var));
                    }
                }
            }
            ExprKind::Member { base, name } => {
                let base_ty = self.expr(base);
                self.write_member(base_ty, base.span, name, ty);
            }
            ExprKind::Index { base, key } => {
                let base_ty = self.expr(base);
                self.write_index(base_ty, base.span, key, ty);
            }
            _ => self.diag(
                target.span,
                DiagnosticSeverity::WARNING,
                "cannot assign to this expression",
            ),
        }
    }

    fn write_member(&mut self, base_ty: Ty, base_span: Span, name: &Name, ty: Ty) {
        match self.pool.first_value(base_ty) {
            Ty::Table(id) => {
                self.pool.table_mut(id).entries.insert(name.text.clone(), ty);
                self.record_ident(name, ty, None);
            }
            Ty::Any => {}
            other => {
                let msg = format!("cannot index a {} value", self.short(other));
                self.diag(base_span, DiagnosticSeverity::WARNING, msg);
            }
        }
    }

    fn write_index(&mut self, base_ty: Ty, base_span: Span, key: &Expr, ty: Ty) {
        let id = match self.pool.first_value(base_ty) {
            Ty::Table(id) => id,
            Ty::Any => {
                self.expr(key);
                return;
            }
            other => {
                self.expr(key);
                let msg = format!("cannot index a {} value", self.short(other));
                self.diag(base_span, DiagnosticSeverity::WARNING, msg);
                return;
            }
        };
        match &key.kind {
            ExprKind::Str(raw) => {
                let text = self.decode_string(raw, key.span);
                self.pool.table_mut(id).entries.insert(text, ty);
            }
            ExprKind::Number(n) if n.fract() == 0.0 => {
                self.pool.table_mut(id).sequence.insert(*n as i64, ty);
            }
            ExprKind::True => self.pool.table_mut(id).true_branch = Some(ty),
            ExprKind::False => self.pool.table_mut(id).false_branch = Some(ty),
            ExprKind::Nil => {
                self.diag(key.span, DiagnosticSeverity::WARNING, "table key cannot be nil");
            }
            _ => {
                let key_ty = self.expr(key);
                self.typed_key_write(id, key_ty, key.span, ty);
            }
        }
    }

    /// Non-literal keys collapse into the per-primitive typed-key slot,
    /// unioning with whatever was there.
    fn typed_key_write(&mut self, id: TableId, key_ty: Ty, key_span: Span, value: Ty) {
        let key_ty = self.pool.first_value(key_ty);
        let existing = match key_ty {
            Ty::String => self.pool.table(id).string_key,
            Ty::Number => self.pool.table(id).number_key,
            Ty::Boolean => self.pool.table(id).boolean_key,
            Ty::Nil => {
                self.diag(key_span, DiagnosticSeverity::WARNING, "table key cannot be nil");
                return;
            }
            _ => return,
        };
        let merged = match existing {
            None => value,
            Some(prev) => self.pool.union(prev, value),
        };
        let table = self.pool.table_mut(id);
        match key_ty {
            Ty::String => table.string_key = Some(merged),
            Ty::Number => table.number_key = Some(merged),
            Ty::Boolean => table.boolean_key = Some(merged),
            _ => {}
        }
    }

    fn condition(&mut self, cond: &Expr) {
        let ty = self.expr(cond);
        if matches!(self.pool.first_value(ty), Ty::Nil) {
            self.diag(cond.span, DiagnosticSeverity::HINT, "condition is always falsy");
        }
    }

    fn expect_number(&mut self, expr: &Expr) {
        let ty = self.expr(expr);
        let ty = self.pool.first_value(ty);
        if !matches!(ty, Ty::Number | Ty::Any) {
            let msg = format!("expected a number, got {}", self.short(ty));
            self.diag(expr.span, DiagnosticSeverity::WARNING, msg);
        }
    }

    fn return_stmt(&mut self, stmt: &Stmt, exprs: &[Expr]) {
        let mut flat = Vec::new();
        for (i, expr) in exprs.iter().enumerate() {
            let ty = self.expr(expr);
            if i + 1 == exprs.len() && expr.is_multi_valued() {
                flat.extend(self.pool.flatten_values(ty));
            } else {
                flat.push(self.pool.first_value(ty));
            }
        }
        let ret = match flat.len() {
            0 => Ty::Nil,
            1 => flat[0],
            _ => self.pool.tuple(flat),
        };
        let mut recorded = false;
        for frame in self.frames.iter_mut().rev() {
            if let Frame::Function { returns, .. } = frame {
                returns.push(ret);
                recorded = true;
                break;
            }
        }
        if !recorded {
            self.diag(stmt.span, DiagnosticSeverity::WARNING, "return outside of a function");
        }
    }

    // -- functions ----------------------------------------------------------

    /// Allocate the function's signature before its body is walked so the
    /// name can be bound first and recursion resolves. Returns the id and
    /// whether a doc override is in effect.
    fn open_function(&mut self, body: &FuncBody, override_ty: Option<Ty>) -> (FnId, bool) {
        let doc_fn = match override_ty {
            Some(Ty::Function(id)) => Some(self.pool.function(id).clone()),
            _ => None,
        };
        let params: Vec<(String, Ty)> = body
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let ty = doc_fn
                    .as_ref()
                    .and_then(|f| f.params.get(i))
                    .map(|(_, t)| *t)
                    .unwrap_or(Ty::Any);
                (p.text.clone(), ty)
            })
            .collect();
        let vararg = if body.is_vararg {
            Some(doc_fn.as_ref().and_then(|f| f.vararg).unwrap_or(Ty::Any))
        } else {
            None
        };
        // Recursive calls inside the body see this provisional return until
        // walk_function commits the inferred union.
        let ret = doc_fn.as_ref().map(|f| f.ret).unwrap_or(Ty::Any);
        let overridden = doc_fn.is_some();
        let id = self.pool.alloc_fn(FnTy { params, vararg, ret });
        (id, overridden)
    }

    /// Walk the body of an already-allocated function: declares params in a
    /// fresh scope, collects returns, reconciles with the doc signature.
    /// Returns the child symbols gathered inside.
    fn walk_function(
        &mut self,
        fn_id: FnId,
        overridden: bool,
        body: &FuncBody,
        conflict_span: Option<Span>,
    ) -> Vec<DocumentSymbol> {
        let prev = self.enter(
            format!("function line {}", body.span.start.line),
            body.span,
        );
        self.symbols.push(Vec::new());
        let params = self.pool.function(fn_id).params.clone();
        for (param, (_, pty)) in body.params.iter().zip(&params) {
            self.declare_var(param, *pty, None);
        }
        let vararg = self.pool.function(fn_id).vararg;
        self.frames.push(Frame::Function {
            returns: Vec::new(),
            vararg,
        });
        self.block(&body.block);
        let returns = match self.frames.pop() {
            Some(Frame::Function { returns, .. }) => returns,
            _ => Vec::new(),
        };
        let inferred = self.pool.union_of(&returns);
        let inferred = ty::simplify(self.pool, inferred);
        if overridden {
            let declared = self.pool.function(fn_id).ret;
            if !ty::equivalent(self.pool, inferred, declared, MAX_TYPE_DEPTH) {
                if let Some(span) = conflict_span {
                    let msg = format!(
                        "conflicting signatures: documentation declares {}, body returns {}",
                        ty::render(self.pool, declared, MAX_TYPE_DEPTH),
                        ty::render(self.pool, inferred, MAX_TYPE_DEPTH),
                    );
                    self.diag(span, DiagnosticSeverity::WARNING, msg);
                }
            }
            // The documented type wins.
        } else {
            self.pool.function_mut(fn_id).ret = inferred;
        }
        let children = self.symbols.pop().unwrap_or_default();
        self.leave(prev);
        self.luts.record_fn_end(body.span, Ty::Function(fn_id));
        children
    }

    fn doc_override(&self, doc: &Option<Doc>) -> Option<Ty> {
        doc.as_ref()
            .and_then(|d| d.ty)
            .filter(|t| matches!(t, Ty::Function(_)))
    }

    fn local_function(&mut self, stmt: &Stmt, name: &Name, body: &FuncBody) {
        let doc = self.take_doc(stmt.span.start.line);
        let (fn_id, overridden) = self.open_function(body, self.doc_override(&doc));
        let fn_ty = Ty::Function(fn_id);
        // Bound before the body so the function can call itself.
        self.declare_var(name, fn_ty, doc);
        let children = self.walk_function(fn_id, overridden, body, Some(name.span));
        let detail = ty::render(self.pool, fn_ty, MAX_TYPE_DEPTH);
        self.push_symbol(DocumentSymbol {
            name: name.text.clone(),
            detail: Some(detail),
            kind: SymbolKind::FUNCTION,
            tags: None,
            #[allow(deprecated)]
            deprecated: None,
            range: span_range(stmt.span),
            selection_range: span_range(name.span),
            children: Some(children),
        });
    }

    fn function_decl(&mut self, stmt: &Stmt, name: &loupe_core::ast::FuncName, body: &FuncBody) {
        let doc = self.take_doc(stmt.span.start.line);
        let (fn_id, overridden) = self.open_function(body, self.doc_override(&doc));
        let fn_ty = Ty::Function(fn_id);

        let mut display = name.base.text.clone();
        for field in &name.fields {
            display.push('.');
            display.push_str(&field.text);
        }
        if let Some(method) = &name.method {
            display.push(':');
            display.push_str(&method.text);
        }
        let last_span = name
            .method
            .as_ref()
            .map(|m| m.span)
            .or_else(|| name.fields.last().map(|f| f.span))
            .unwrap_or(name.base.span);

        if name.fields.is_empty() && name.method.is_none() {
            // Plain global function: bound before the body for recursion.
            match self.scopes.resolve(self.current, &name.base.text) {
                Some(var) => {
                    self.scopes.update(var, name.base.span, fn_ty, self.current);
                    if doc.is_some() {
                        self.scopes.var_mut(var).doc = doc.clone();
                    }
                    self.record_ident(&name.base, fn_ty, Some(var));
                }
                None => {
                    let global = self.scopes.global();
                    let var = match self.scopes.declare(global, &name.base.text, name.base.span, fn_ty, doc.clone()) {
                        Declared::Fresh(id) => id,
                        Declared::Collision(id) => {
                            self.scopes.update(id, name.base.span, fn_ty, global);
                            id
                        }
                    };
                    self.record_ident(&name.base, fn_ty, Some(var));
                }
            }
        } else {
            self.declare_dotted(name, fn_ty);
        }

        let children = self.walk_function(fn_id, overridden, body, Some(last_span));
        let detail = ty::render(self.pool, fn_ty, MAX_TYPE_DEPTH);
        self.push_symbol(DocumentSymbol {
            name: display,
            detail: Some(detail),
            kind: SymbolKind::FUNCTION,
            tags: None,
            #[allow(deprecated)]
            deprecated: None,
            range: span_range(stmt.span),
            selection_range: span_range(name.base.span.to(last_span)),
            children: Some(children),
        });
    }

    /// `function a.b.c()` / `function a:m()`: write the function into the
    /// base table's shape, creating intermediate tables as needed.
    fn declare_dotted(&mut self, name: &loupe_core::ast::FuncName, fn_ty: Ty) {
        let base_ty = self.name_ref(&name.base.text, name.base.span);
        let mut id = match self.pool.first_value(base_ty) {
            Ty::Table(id) => id,
            Ty::Any => return,
            Ty::Nil => {
                // Promote the implicit global to a table.
                let id = self.pool.new_table();
                if let Some(var) = self.scopes.resolve(self.current, &name.base.text) {
                    self.scopes.update(var, name.base.span, Ty::Table(id), self.current);
                }
                id
            }
            other => {
                let msg = format!("cannot index a {} value", self.short(other));
                self.diag(name.base.span, DiagnosticSeverity::WARNING, msg);
                return;
            }
        };
        let (intermediate, last): (&[Name], &Name) = match &name.method {
            Some(method) => (&name.fields[..], method),
            None => {
                let (last, rest) = name.fields.split_last().expect("dotted name has fields");
                (rest, last)
            }
        };
        for field in intermediate {
            let next = match self.pool.table(id).lookup_str(&field.text) {
                Some(Ty::Table(t)) => t,
                _ => {
                    let t = self.pool.new_table();
                    self.pool
                        .table_mut(id)
                        .entries
                        .insert(field.text.clone(), Ty::Table(t));
                    t
                }
            };
            self.record_ident(field, Ty::Table(next), None);
            id = next;
        }
        self.pool.table_mut(id).entries.insert(last.text.clone(), fn_ty);
        self.record_ident(last, fn_ty, None);
    }

    // -- expressions --------------------------------------------------------

    fn expr(&mut self, e: &Expr) -> Ty {
        let ty = match &e.kind {
            ExprKind::Nil => Ty::Nil,
            ExprKind::True | ExprKind::False => Ty::Boolean,
            ExprKind::Number(_) => Ty::Number,
            ExprKind::Str(raw) => {
                self.decode_string(raw, e.span);
                Ty::String
            }
            ExprKind::Vararg => self.vararg_ty(e.span),
            ExprKind::Function(body) => {
                let (fn_id, overridden) = self.open_function(body, None);
                self.walk_function(fn_id, overridden, body, None);
                Ty::Function(fn_id)
            }
            ExprKind::Name(text) => self.name_ref(text, e.span),
            ExprKind::Member { base, name } => {
                let base_ty = self.expr(base);
                self.read_member(base_ty, base.span, name)
            }
            ExprKind::Index { base, key } => {
                let base_ty = self.expr(base);
                self.read_index(base_ty, base.span, key)
            }
            ExprKind::Call { callee, args } => {
                let callee_ty = self.expr(callee);
                let callee_ty = self.pool.first_value(callee_ty);
                self.check_call(callee_ty, callee.span, args)
            }
            ExprKind::MethodCall { base, method, args } => {
                let base_ty = self.expr(base);
                let method_ty = self.read_member(base_ty, base.span, method);
                let method_ty = self.pool.first_value(method_ty);
                self.check_call(method_ty, method.span, args)
            }
            ExprKind::Table { fields } => self.table_ctor(fields),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, e.span),
            ExprKind::Unary { op, expr } => self.unary(*op, expr),
            ExprKind::Paren(inner) => {
                let ty = self.expr(inner);
                // Parentheses truncate multi-value results to one.
                self.pool.first_value(ty)
            }
        };
        match self.pool.first_value(ty) {
            t @ Ty::Table(_) => self.luts.record_table_end(e.span, t),
            t @ Ty::Function(_) => self.luts.record_fn_end(e.span, t),
            _ => {}
        }
        ty
    }

    fn name_ref(&mut self, text: &str, span: Span) -> Ty {
        let name = Name {
            text: text.to_string(),
            span,
        };
        match self.scopes.resolve(self.current, text) {
            Some(var) => {
                self.scopes.reference(var, span);
                let ty = self.scopes.var(var).ty();
                self.record_ident(&name, ty, Some(var));
                ty
            }
            None => {
                // Reading an unknown name materializes a nil global so a
                // later assignment and the LUT agree on the binding.
                let global = self.scopes.global();
                let var = match self.scopes.declare(global, text, span, Ty::Nil, None) {
                    Declared::Fresh(id) => id,
                    Declared::Collision(id) => id,
                };
                self.record_ident(&name, Ty::Nil, Some(var));
                Ty::Nil
            }
        }
    }

    fn read_member(&mut self, base_ty: Ty, base_span: Span, name: &Name) -> Ty {
        let ty = match self.pool.first_value(base_ty) {
            Ty::Table(id) => self.pool.table(id).lookup_str(&name.text).unwrap_or(Ty::Nil),
            Ty::Any => Ty::Any,
            other => {
                let msg = format!("cannot index a {} value", self.short(other));
                self.diag(base_span, DiagnosticSeverity::WARNING, msg);
                Ty::Nil
            }
        };
        self.record_ident(name, ty, None);
        ty
    }

    fn read_index(&mut self, base_ty: Ty, base_span: Span, key: &Expr) -> Ty {
        let id = match self.pool.first_value(base_ty) {
            Ty::Table(id) => id,
            Ty::Any => {
                self.expr(key);
                return Ty::Any;
            }
            other => {
                self.expr(key);
                let msg = format!("cannot index a {} value", self.short(other));
                self.diag(base_span, DiagnosticSeverity::WARNING, msg);
                return Ty::Nil;
            }
        };
        match &key.kind {
            ExprKind::Str(raw) => {
                let text = self.decode_string(raw, key.span);
                self.pool.table(id).lookup_str(&text).unwrap_or(Ty::Nil)
            }
            ExprKind::Number(n) if n.fract() == 0.0 => {
                self.pool.table(id).lookup_int(*n as i64).unwrap_or(Ty::Nil)
            }
            ExprKind::True => {
                let t = self.pool.table(id);
                t.true_branch.or(t.boolean_key).unwrap_or(Ty::Nil)
            }
            ExprKind::False => {
                let t = self.pool.table(id);
                t.false_branch.or(t.boolean_key).unwrap_or(Ty::Nil)
            }
            _ => {
                let key_ty = self.expr(key);
                let table = self.pool.table(id);
                match self.pool.first_value(key_ty) {
                    Ty::String => table.string_key.unwrap_or(Ty::Nil),
                    Ty::Number => table.number_key.unwrap_or(Ty::Nil),
                    Ty::Boolean => table.boolean_key.unwrap_or(Ty::Nil),
                    _ => Ty::Any,
                }
            }
        }
    }

    fn check_call(&mut self, callee_ty: Ty, callee_span: Span, args: &[Expr]) -> Ty {
        match callee_ty {
            Ty::Function(id) => {
                let params: Vec<Ty> = self
                    .pool
                    .function(id)
                    .params
                    .iter()
                    .map(|(_, t)| *t)
                    .collect();
                for (i, arg) in args.iter().enumerate() {
                    let arg_ty = self.expr(arg);
                    let arg_ty = self.pool.first_value(arg_ty);
                    if let Some(param) = params.get(i).copied() {
                        if !matches!(arg_ty, Ty::Any)
                            && !matches!(param, Ty::Any)
                            && !ty::equivalent(self.pool, arg_ty, param, MAX_TYPE_DEPTH)
                        {
                            let msg = format!(
                                "type mismatch: expected {}, got {}",
                                self.short(param),
                                self.short(arg_ty),
                            );
                            self.diag(arg.span, DiagnosticSeverity::WARNING, msg);
                        }
                    }
                }
                self.pool.function(id).ret
            }
            Ty::Any => {
                for arg in args {
                    self.expr(arg);
                }
                Ty::Any
            }
            other => {
                for arg in args {
                    self.expr(arg);
                }
                let msg = format!("attempt to call a {} value", self.short(other));
                self.diag(callee_span, DiagnosticSeverity::WARNING, msg);
                Ty::Nil
            }
        }
    }

    fn table_ctor(&mut self, fields: &[TableField]) -> Ty {
        let id = self.pool.new_table();
        let mut next = 1i64;
        let count = fields.len();
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    let ty = self.expr(value);
                    if i + 1 == count && value.is_multi_valued() {
                        // A trailing call spreads into consecutive slots.
                        for v in self.pool.flatten_values(ty) {
                            self.pool.table_mut(id).sequence.insert(next, v);
                            next += 1;
                        }
                    } else {
                        let v = self.pool.first_value(ty);
                        self.pool.table_mut(id).sequence.insert(next, v);
                        next += 1;
                    }
                }
                TableField::Named { name, value } => {
                    let ty = self.expr(value);
                    let v = self.pool.first_value(ty);
                    self.pool.table_mut(id).entries.insert(name.text.clone(), v);
                    self.record_ident(name, v, None);
                }
                TableField::Keyed { key, value } => {
                    let ty = self.expr(value);
                    let v = self.pool.first_value(ty);
                    match &key.kind {
                        ExprKind::Str(raw) => {
                            let text = self.decode_string(raw, key.span);
                            self.pool.table_mut(id).entries.insert(text, v);
                        }
                        ExprKind::Number(n) if n.fract() == 0.0 => {
                            self.pool.table_mut(id).sequence.insert(*n as i64, v);
                        }
                        ExprKind::True => self.pool.table_mut(id).true_branch = Some(v),
                        ExprKind::False => self.pool.table_mut(id).false_branch = Some(v),
                        ExprKind::Nil => {
                            self.diag(
                                key.span,
                                DiagnosticSeverity::WARNING,
                                "table key cannot be nil",
                            );
                        }
                        _ => {
                            let key_ty = self.expr(key);
                            self.typed_key_write(id, key_ty, key.span, v);
                        }
                    }
                }
            }
        }
        Ty::Table(id)
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Ty {
        let lt = self.expr(lhs);
        let lt = self.pool.first_value(lt);
        match op {
            BinOp::And => match lt {
                Ty::Nil => {
                    self.expr(rhs);
                    Ty::Nil
                }
                Ty::Boolean => {
                    let rt = self.expr(rhs);
                    let rt = self.pool.first_value(rt);
                    self.pool.union(Ty::Boolean, rt)
                }
                _ => {
                    let rt = self.expr(rhs);
                    self.pool.first_value(rt)
                }
            },
            BinOp::Or => {
                let rt = self.expr(rhs);
                let rt = self.pool.first_value(rt);
                match lt {
                    Ty::Nil => rt,
                    Ty::Boolean => self.pool.union(Ty::Boolean, rt),
                    _ => self.pool.union(lt, rt),
                }
            }
            _ => {
                let rt = self.expr(rhs);
                let rt = self.pool.first_value(rt);
                if op.is_arithmetic() {
                    for (ty, expr) in [(lt, lhs), (rt, rhs)] {
                        if !matches!(ty, Ty::Number | Ty::Any) {
                            let msg = format!("expected a number, got {}", self.short(ty));
                            self.diag(expr.span, DiagnosticSeverity::WARNING, msg);
                        }
                    }
                    Ty::Number
                } else if op == BinOp::Concat {
                    for (ty, expr) in [(lt, lhs), (rt, rhs)] {
                        if !matches!(ty, Ty::String | Ty::Number | Ty::Any) {
                            let msg = format!("cannot concatenate a {} value", self.short(ty));
                            self.diag(expr.span, DiagnosticSeverity::WARNING, msg);
                        }
                    }
                    Ty::String
                } else if op.is_equality() {
                    if !matches!(lt, Ty::Any)
                        && !matches!(rt, Ty::Any)
                        && !ty::equivalent(self.pool, lt, rt, MAX_TYPE_DEPTH)
                    {
                        let msg = format!(
                            "comparing values of different types ({} and {})",
                            self.short(lt),
                            self.short(rt),
                        );
                        self.diag(span, DiagnosticSeverity::WARNING, msg);
                    }
                    Ty::Boolean
                } else {
                    Ty::Boolean
                }
            }
        }
    }

    fn unary(&mut self, op: UnOp, operand: &Expr) -> Ty {
        let ty = self.expr(operand);
        let ty = self.pool.first_value(ty);
        match op {
            UnOp::Neg => {
                if !matches!(ty, Ty::Number | Ty::Any) {
                    let msg = format!("expected a number, got {}", self.short(ty));
                    self.diag(operand.span, DiagnosticSeverity::WARNING, msg);
                }
                Ty::Number
            }
            UnOp::Not => Ty::Boolean,
            UnOp::Len => Ty::Number,
        }
    }

    fn vararg_ty(&mut self, span: Span) -> Ty {
        let slot = self.frames.iter().rev().find_map(|f| match f {
            Frame::Function { vararg, .. } => Some(*vararg),
            _ => None,
        });
        match slot {
            Some(Some(ty)) => ty,
            Some(None) => {
                self.diag(
                    span,
                    DiagnosticSeverity::WARNING,
                    "cannot use '...' outside a vararg function",
                );
                Ty::Nil
            }
            None => {
                self.diag(span, DiagnosticSeverity::WARNING, "cannot use '...' outside a function");
                Ty::Nil
            }
        }
    }

    /// Decode backslash escapes in a quoted string literal. Escapes outside
    /// the standard set are kept verbatim and hinted, unless suppressed by
    /// configuration.
    fn decode_string(&mut self, raw: &str, span: Span) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                None => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('a') => out.push('\u{7}'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('v') => out.push('\u{b}'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some('\n') => out.push('\n'),
                Some(d) if d.is_ascii_digit() => {
                    let mut code = d.to_digit(10).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.peek() {
                            Some(n) if n.is_ascii_digit() => {
                                code = code * 10 + n.to_digit(10).unwrap_or(0);
                                chars.next();
                            }
                            _ => break,
                        }
                    }
                    out.push(char::from_u32(code.min(255)).unwrap_or('\u{fffd}'));
                }
                Some(other) => {
                    if !self.ignore_p8scii {
                        self.diag(
                            span,
                            DiagnosticSeverity::HINT,
                            format!("unknown escape sequence '\\{}'", other),
                        );
                    }
                    out.push(other);
                }
            }
        }
        out
    }
}

fn block_span(block: &Block, fallback: Span) -> Span {
    match (block.stmts.first(), block.stmts.last()) {
        (Some(first), Some(last)) => first.span.to(last.span),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(src: &str) -> (TyPool, ScopeTree, Luts, WalkOutput) {
        let chunk = loupe_core::ast::parse(src).expect("parse failure");
        let mut pool = TyPool::new();
        let mut scopes = ScopeTree::new();
        let mut luts = Luts::default();
        let out = walk(&mut pool, &mut scopes, &mut luts, &chunk, src, false);
        (pool, scopes, luts, out)
    }

    fn messages(out: &WalkOutput) -> Vec<&str> {
        out.diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn assignment_creates_implicit_global() {
        let (_, scopes, _, out) = analyze("score = 10");
        let var = scopes.resolve(scopes.global(), "score").expect("global bound");
        assert_eq!(scopes.var(var).ty(), Ty::Number);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn multi_value_call_spreads_over_targets() {
        let src = "function pair() return 1, \"a\" end\nlocal a, b = pair()";
        let (_, _, luts, out) = analyze(src);
        assert!(out.diagnostics.is_empty(), "{:?}", messages(&out));
        assert_eq!(luts.ident_at(2, 7).expect("a").ty, Ty::Number);
        assert_eq!(luts.ident_at(2, 10).expect("b").ty, Ty::String);
    }

    #[test]
    fn numeric_for_bound_must_be_a_number() {
        let (_, _, _, out) = analyze("for i = 1, \"x\" do end");
        let msgs = messages(&out);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0], "expected a number, got string");
    }

    #[test]
    fn call_arguments_are_checked_against_doc_signature() {
        let src = "--[[\n(a: number) -> nil\n]]\nfunction f(a) end\nf(true)\nf(1)";
        let (_, _, _, out) = analyze(src);
        let msgs = messages(&out);
        assert_eq!(msgs.len(), 1, "{:?}", msgs);
        assert!(msgs[0].starts_with("type mismatch"));
    }

    #[test]
    fn doc_signature_conflict_is_one_warning_and_doc_wins() {
        let src = "--[[\n(a: number) -> string\n]]\nfunction f(a) return 1 end\nlocal r = f(2)";
        let (_pool, _, luts, out) = analyze(src);
        let msgs = messages(&out);
        assert_eq!(msgs.len(), 1, "{:?}", msgs);
        assert!(msgs[0].starts_with("conflicting signatures"));
        // Downstream calls see the documented return type.
        assert_eq!(luts.ident_at(5, 7).expect("r").ty, Ty::String);
    }

    #[test]
    fn table_constructor_classifies_fields() {
        let (pool, scopes, _, out) = analyze("t = { a = 1, 2, 3, [true] = \"x\" }");
        assert!(out.diagnostics.is_empty());
        let var = scopes.resolve(scopes.global(), "t").unwrap();
        let Ty::Table(id) = scopes.var(var).ty() else {
            panic!("t should be a table");
        };
        let table = pool.table(id);
        assert_eq!(table.entries.get("a"), Some(&Ty::Number));
        assert_eq!(table.sequence.len(), 2);
        assert_eq!(table.true_branch, Some(Ty::String));
    }

    #[test]
    fn nil_table_key_is_dropped_with_a_diagnostic() {
        let (pool, scopes, _, out) = analyze("t = { [nil] = 1 }");
        let msgs = messages(&out);
        assert_eq!(msgs, vec!["table key cannot be nil"]);
        let var = scopes.resolve(scopes.global(), "t").unwrap();
        let Ty::Table(id) = scopes.var(var).ty() else {
            panic!("t should be a table");
        };
        assert!(pool.table(id).is_empty());
    }

    #[test]
    fn logical_operators_union_branch_types() {
        let (pool, _, luts, _) = analyze("local t = true and 1\nlocal u = nil or \"x\"");
        let t = luts.ident_at(1, 7).expect("t").ty;
        assert_eq!(ty::render(&pool, t, MAX_TYPE_DEPTH), "boolean | number");
        assert_eq!(luts.ident_at(2, 7).expect("u").ty, Ty::String);
    }

    #[test]
    fn statically_nil_condition_hints() {
        let (_, _, _, out) = analyze("if nil then end");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Some(DiagnosticSeverity::HINT));
        assert_eq!(out.diagnostics[0].message, "condition is always falsy");
    }

    #[test]
    fn break_outside_a_loop_warns() {
        let (_, _, _, out) = analyze("do break end");
        assert_eq!(messages(&out), vec!["break outside of a loop"]);
        let (_, _, _, ok) = analyze("while true do break end");
        assert!(ok.diagnostics.is_empty());
    }

    #[test]
    fn goto_resolves_forward_labels_in_the_same_block() {
        let (_, _, _, out) = analyze("goto done\n::done::");
        assert!(out.diagnostics.is_empty(), "{:?}", messages(&out));
        let (_, _, _, bad) = analyze("goto nowhere");
        assert_eq!(messages(&bad), vec!["label 'nowhere' not defined or not visible"]);
    }

    #[test]
    fn local_function_resolves_its_own_name() {
        let src = "local function fact(n)\n  if n < 2 then return 1 end\n  return n * fact(n - 1)\nend";
        let (pool, scopes, _, out) = analyze(src);
        assert!(out.diagnostics.is_empty(), "{:?}", messages(&out));
        // The committed return type reflects the body, not the provisional
        // value recursion saw.
        let var = scopes.resolve(scopes.global(), "fact").unwrap();
        let rendered = ty::render(&pool, scopes.var(var).ty(), MAX_TYPE_DEPTH);
        assert!(rendered.ends_with("-> number"), "got {}", rendered);
    }

    #[test]
    fn recursive_call_result_is_usable_in_arithmetic() {
        let src = "function fib(n)\n  if n < 2 then return n end\n  return fib(n - 1) + fib(n - 2)\nend";
        let (_, _, _, out) = analyze(src);
        assert!(out.diagnostics.is_empty(), "{:?}", messages(&out));
    }

    #[test]
    fn dotted_function_declaration_extends_the_table() {
        let src = "lib = {}\nfunction lib.util.clamp(x) return x end";
        let (pool, scopes, _, _) = analyze(src);
        let var = scopes.resolve(scopes.global(), "lib").unwrap();
        let Ty::Table(id) = scopes.var(var).ty() else {
            panic!("lib should be a table");
        };
        let Some(Ty::Table(util)) = pool.table(id).lookup_str("util") else {
            panic!("lib.util should be a table");
        };
        assert!(matches!(pool.table(util).lookup_str("clamp"), Some(Ty::Function(_))));
    }

    #[test]
    fn document_symbols_nest_function_locals() {
        let src = "function update()\n  local dt = 1\nend\nlocal speed = 2";
        let (_, _, _, out) = analyze(src);
        assert_eq!(out.symbols.len(), 2);
        let func = &out.symbols[0];
        assert_eq!(func.name, "update");
        assert_eq!(func.kind, SymbolKind::FUNCTION);
        let children = func.children.as_ref().expect("children");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "dt");
        assert_eq!(out.symbols[1].kind, SymbolKind::VARIABLE);
    }

    #[test]
    fn unknown_escape_hints_unless_suppressed() {
        let (_, _, _, out) = analyze("s = \"a\\^b\"");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Some(DiagnosticSeverity::HINT));

        let chunk = loupe_core::ast::parse("s = \"a\\^b\"").unwrap();
        let mut pool = TyPool::new();
        let mut scopes = ScopeTree::new();
        let mut luts = Luts::default();
        let quiet = walk(&mut pool, &mut scopes, &mut luts, &chunk, "s = \"a\\^b\"", true);
        assert!(quiet.diagnostics.is_empty());
    }

    #[test]
    fn compound_assignment_forces_operator_type() {
        let (_, scopes, _, out) = analyze("x = \"s\"\nx += 1");
        assert!(out.diagnostics.is_empty(), "{:?}", messages(&out));
        let var = scopes.resolve(scopes.global(), "x").unwrap();
        assert_eq!(scopes.var(var).ty(), Ty::Number);
    }

    #[test]
    fn multi_element_compound_assignment_warns() {
        let (_, _, _, out) = analyze("a, b += 1, 2");
        assert_eq!(
            messages(&out),
            vec!["compound assignment with multiple targets or values is ambiguous"]
        );
    }

    #[test]
    fn scope_lut_maps_positions_to_innermost_scope() {
        let src = "local x = 1\nfunction f()\n  local y = 2\nend";
        let (_, scopes, luts, _) = analyze(src);
        // offset of "local y" is inside the function body
        let inner = luts.scope_at(src.find('y').unwrap(), scopes.global());
        assert_ne!(inner, scopes.global());
        let outer = luts.scope_at(2, scopes.global());
        assert_eq!(outer, scopes.global());
    }
}
