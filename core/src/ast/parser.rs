use crate::ast::{
    BinOp, Block, Chunk, Expr, ExprKind, FuncBody, FuncName, IfClause, Name, Stmt, StmtKind, TableField, UnOp,
};
use crate::token::{Position, Span, SyntaxError, Token, Tokenizer};

/// Lex and parse a full source file.
pub fn parse(src: &str) -> Result<Chunk, SyntaxError> {
    let lexed = Tokenizer::tokenize(src)?;
    let mut parser = Parser::new(&lexed.tokens, &lexed.spans);
    let block = parser.parse_chunk()?;
    Ok(Chunk {
        block,
        comments: lexed.comments,
        directives: lexed.directives,
    })
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    spans: &'a [Span],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], spans: &'a [Span]) -> Self {
        Self { tokens, spans, pos: 0 }
    }

    pub fn parse_chunk(&mut self) -> Result<Block, SyntaxError> {
        let block = self.parse_block()?;
        if !self.eof() {
            return Err(self.error_here("unexpected token after block"));
        }
        Ok(block)
    }

    #[inline]
    fn eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    #[inline]
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    #[inline]
    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<Span, SyntaxError> {
        if self.check(token) {
            let span = self.spans[self.pos];
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error_here(format!("expected {:?} {}", token, context)))
        }
    }

    fn here(&self) -> Position {
        if self.pos < self.spans.len() {
            self.spans[self.pos].start
        } else {
            self.spans.last().map(|s| s.end).unwrap_or_else(Position::start)
        }
    }

    fn prev_end(&self) -> Position {
        if self.pos > 0 {
            self.spans[self.pos - 1].end
        } else {
            Position::start()
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let mut message = message.into();
        if let Some(tok) = self.peek() {
            message = format!("{} near {}", message, tok.describe());
        } else {
            message = format!("{} near end of file", message);
        }
        SyntaxError::at(message, self.here())
    }

    fn expect_name(&mut self, context: &str) -> Result<Name, SyntaxError> {
        match self.peek() {
            Some(Token::Name(text)) => {
                let name = Name {
                    text: text.clone(),
                    span: self.spans[self.pos],
                };
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error_here(format!("expected a name {}", context))),
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::End) | Some(Token::Else) | Some(Token::Elseif) | Some(Token::Until)
        )
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Token::Semicolon) {}
            if self.block_ends() {
                break;
            }
            let stmt = self.parse_stmt()?;
            let is_return = matches!(stmt.kind, StmtKind::Return { .. });
            stmts.push(stmt);
            if is_return {
                while self.eat(&Token::Semicolon) {}
                break;
            }
        }
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.here();
        let kind = match self.peek() {
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => self.parse_while()?,
            Some(Token::Do) => {
                self.pos += 1;
                let body = self.parse_block()?;
                self.expect(&Token::End, "to close 'do' block")?;
                StmtKind::Do(body)
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Repeat) => self.parse_repeat()?,
            Some(Token::Function) => self.parse_function_decl()?,
            Some(Token::Local) => self.parse_local()?,
            Some(Token::Return) => self.parse_return()?,
            Some(Token::Break) => {
                self.pos += 1;
                StmtKind::Break
            }
            Some(Token::Goto) => {
                self.pos += 1;
                let name = self.expect_name("after 'goto'")?;
                StmtKind::Goto(name)
            }
            Some(Token::DoubleColon) => {
                self.pos += 1;
                let name = self.expect_name("in label")?;
                self.expect(&Token::DoubleColon, "to close label")?;
                StmtKind::Label(name)
            }
            _ => self.parse_expr_stmt()?,
        };
        let span = Span::new(start, self.prev_end());
        Ok(Stmt { kind, span })
    }

    fn parse_if(&mut self) -> Result<StmtKind, SyntaxError> {
        self.pos += 1; // if
        let mut clauses = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "after 'if' condition")?;
        let body = self.parse_block()?;
        clauses.push(IfClause { cond, body });
        let mut else_block = None;
        loop {
            match self.peek() {
                Some(Token::Elseif) => {
                    self.pos += 1;
                    let cond = self.parse_expr()?;
                    self.expect(&Token::Then, "after 'elseif' condition")?;
                    let body = self.parse_block()?;
                    clauses.push(IfClause { cond, body });
                }
                Some(Token::Else) => {
                    self.pos += 1;
                    else_block = Some(self.parse_block()?);
                    self.expect(&Token::End, "to close 'if'")?;
                    break;
                }
                Some(Token::End) => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error_here("expected 'end' to close 'if'")),
            }
        }
        Ok(StmtKind::If { clauses, else_block })
    }

    fn parse_while(&mut self) -> Result<StmtKind, SyntaxError> {
        self.pos += 1; // while
        let cond = self.parse_expr()?;
        self.expect(&Token::Do, "after 'while' condition")?;
        let body = self.parse_block()?;
        self.expect(&Token::End, "to close 'while'")?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_repeat(&mut self) -> Result<StmtKind, SyntaxError> {
        self.pos += 1; // repeat
        let body = self.parse_block()?;
        self.expect(&Token::Until, "to close 'repeat'")?;
        let cond = self.parse_expr()?;
        Ok(StmtKind::Repeat { body, cond })
    }

    fn parse_for(&mut self) -> Result<StmtKind, SyntaxError> {
        self.pos += 1; // for
        let first = self.expect_name("after 'for'")?;
        if self.eat(&Token::Assign) {
            let start = self.parse_expr()?;
            self.expect(&Token::Comma, "in numeric 'for'")?;
            let end = self.parse_expr()?;
            let step = if self.eat(&Token::Comma) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&Token::Do, "after 'for' range")?;
            let body = self.parse_block()?;
            self.expect(&Token::End, "to close 'for'")?;
            return Ok(StmtKind::NumericFor {
                var: first,
                start,
                end,
                step,
                body,
            });
        }
        let mut names = vec![first];
        while self.eat(&Token::Comma) {
            names.push(self.expect_name("in 'for' name list")?);
        }
        self.expect(&Token::In, "in generic 'for'")?;
        let exprs = self.parse_expr_list()?;
        self.expect(&Token::Do, "after 'for' iterators")?;
        let body = self.parse_block()?;
        self.expect(&Token::End, "to close 'for'")?;
        Ok(StmtKind::GenericFor { names, exprs, body })
    }

    fn parse_function_decl(&mut self) -> Result<StmtKind, SyntaxError> {
        let start = self.here();
        self.pos += 1; // function
        let base = self.expect_name("after 'function'")?;
        let mut fields = Vec::new();
        let mut method = None;
        while self.eat(&Token::Dot) {
            fields.push(self.expect_name("after '.' in function name")?);
        }
        if self.eat(&Token::Colon) {
            method = Some(self.expect_name("after ':' in function name")?);
        }
        let body = self.parse_func_body(start)?;
        Ok(StmtKind::FunctionDecl {
            name: FuncName { base, fields, method },
            body,
        })
    }

    fn parse_local(&mut self) -> Result<StmtKind, SyntaxError> {
        let start = self.here();
        self.pos += 1; // local
        if self.eat(&Token::Function) {
            let name = self.expect_name("after 'local function'")?;
            let body = self.parse_func_body(start)?;
            return Ok(StmtKind::LocalFunction { name, body });
        }
        let mut names = vec![self.expect_name("after 'local'")?];
        while self.eat(&Token::Comma) {
            names.push(self.expect_name("in 'local' name list")?);
        }
        let exprs = if self.eat(&Token::Assign) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::Local { names, exprs })
    }

    fn parse_return(&mut self) -> Result<StmtKind, SyntaxError> {
        self.pos += 1; // return
        let exprs = if self.block_ends() || self.check(&Token::Semicolon) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        Ok(StmtKind::Return { exprs })
    }

    /// Statement starting with an expression: a call, an assignment, or a
    /// compound assignment.
    fn parse_expr_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.parse_suffixed_expr()?;
        let compound_op = match self.peek() {
            Some(Token::AddAssign) => Some(BinOp::Add),
            Some(Token::SubAssign) => Some(BinOp::Sub),
            Some(Token::MulAssign) => Some(BinOp::Mul),
            Some(Token::DivAssign) => Some(BinOp::Div),
            Some(Token::ModAssign) => Some(BinOp::Mod),
            Some(Token::ConcatAssign) => Some(BinOp::Concat),
            _ => None,
        };
        if compound_op.is_none() && !self.check(&Token::Assign) && !self.check(&Token::Comma) {
            if first.is_multi_valued() {
                return Ok(StmtKind::Call(first));
            }
            return Err(self.error_here("unexpected expression statement"));
        }

        let mut targets = vec![first];
        while self.eat(&Token::Comma) {
            targets.push(self.parse_suffixed_expr()?);
        }
        for target in &targets {
            if !matches!(
                target.kind,
                ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
            ) {
                return Err(SyntaxError::at(
                    "cannot assign to this expression".to_string(),
                    target.span.start,
                ));
            }
        }

        let op = match self.peek() {
            Some(Token::Assign) => {
                self.pos += 1;
                None
            }
            Some(Token::AddAssign) => {
                self.pos += 1;
                Some(BinOp::Add)
            }
            Some(Token::SubAssign) => {
                self.pos += 1;
                Some(BinOp::Sub)
            }
            Some(Token::MulAssign) => {
                self.pos += 1;
                Some(BinOp::Mul)
            }
            Some(Token::DivAssign) => {
                self.pos += 1;
                Some(BinOp::Div)
            }
            Some(Token::ModAssign) => {
                self.pos += 1;
                Some(BinOp::Mod)
            }
            Some(Token::ConcatAssign) => {
                self.pos += 1;
                Some(BinOp::Concat)
            }
            _ => return Err(self.error_here("expected '=' in assignment")),
        };
        let values = self.parse_expr_list()?;
        Ok(match op {
            None => StmtKind::Assign { targets, values },
            Some(op) => StmtKind::CompoundAssign { op, targets, values },
        })
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_or()
    }

    fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let span = lhs.span.to(rhs.span);
        Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            expr = self.binary(BinOp::Or, expr, rhs);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_cmp()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_cmp()?;
            expr = self.binary(BinOp::And, expr, rhs);
        }
        Ok(expr)
    }

    fn parse_cmp(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_concat()?;
            expr = self.binary(op, expr, rhs);
        }
        Ok(expr)
    }

    /// `..` is right-associative and sits between comparison and addition.
    fn parse_concat(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_additive()?;
        if self.eat(&Token::Concat) {
            let rhs = self.parse_concat()?;
            return Ok(self.binary(BinOp::Concat, lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            expr = self.binary(op, expr, rhs);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            expr = self.binary(op, expr, rhs);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Not) => Some(UnOp::Not),
            Some(Token::Hash) => Some(UnOp::Len),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let expr = self.parse_unary()?;
            let span = Span::new(start, expr.span.end);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                span,
            });
        }
        self.parse_pow()
    }

    /// `^` is right-associative and binds tighter than unary operators on
    /// its left, looser on its right (`-a^b` is `-(a^b)`, `a^-b` is legal).
    fn parse_pow(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_simple_expr()?;
        if self.eat(&Token::Caret) {
            let rhs = self.parse_unary()?;
            return Ok(self.binary(BinOp::Pow, lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        let kind = match self.peek() {
            Some(Token::Nil) => {
                self.pos += 1;
                ExprKind::Nil
            }
            Some(Token::True) => {
                self.pos += 1;
                ExprKind::True
            }
            Some(Token::False) => {
                self.pos += 1;
                ExprKind::False
            }
            Some(Token::Ellipsis) => {
                self.pos += 1;
                ExprKind::Vararg
            }
            Some(Token::Number(n)) => {
                let n = *n;
                self.pos += 1;
                ExprKind::Number(n)
            }
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                ExprKind::Str(s)
            }
            Some(Token::Function) => {
                self.pos += 1;
                let body = self.parse_func_body(start)?;
                ExprKind::Function(body)
            }
            Some(Token::LBrace) => return self.parse_table(),
            _ => return self.parse_suffixed_expr(),
        };
        Ok(Expr {
            kind,
            span: Span::new(start, self.prev_end()),
        })
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        match self.peek() {
            Some(Token::Name(text)) => {
                let kind = ExprKind::Name(text.clone());
                let span = self.spans[self.pos];
                self.pos += 1;
                Ok(Expr { kind, span })
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "to close parenthesized expression")?;
                Ok(Expr {
                    kind: ExprKind::Paren(Box::new(inner)),
                    span: Span::new(start, self.prev_end()),
                })
            }
            _ => Err(self.error_here("unexpected symbol")),
        }
    }

    fn parse_suffixed_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        let mut expr = self.parse_primary_expr()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.expect_name("after '.'")?;
                    expr = Expr {
                        span: Span::new(start, self.prev_end()),
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            name,
                        },
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let key = self.parse_expr()?;
                    self.expect(&Token::RBracket, "to close index")?;
                    expr = Expr {
                        span: Span::new(start, self.prev_end()),
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            key: Box::new(key),
                        },
                    };
                }
                Some(Token::Colon) => {
                    self.pos += 1;
                    let method = self.expect_name("after ':'")?;
                    let args = self.parse_call_args()?;
                    expr = Expr {
                        span: Span::new(start, self.prev_end()),
                        kind: ExprKind::MethodCall {
                            base: Box::new(expr),
                            method,
                            args,
                        },
                    };
                }
                Some(Token::LParen) | Some(Token::Str(_)) | Some(Token::LBrace) => {
                    let args = self.parse_call_args()?;
                    expr = Expr {
                        span: Span::new(start, self.prev_end()),
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// `(a, b)`, a lone string literal, or a lone table constructor.
    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(&Token::RParen, "to close call arguments")?;
                Ok(args)
            }
            Some(Token::Str(s)) => {
                let arg = Expr {
                    kind: ExprKind::Str(s.clone()),
                    span: self.spans[self.pos],
                };
                self.pos += 1;
                Ok(vec![arg])
            }
            Some(Token::LBrace) => Ok(vec![self.parse_table()?]),
            _ => Err(self.error_here("expected call arguments")),
        }
    }

    fn parse_table(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        self.expect(&Token::LBrace, "to open table constructor")?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let key = self.parse_expr()?;
                    self.expect(&Token::RBracket, "to close table key")?;
                    self.expect(&Token::Assign, "after table key")?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Keyed { key, value });
                }
                Some(Token::Name(text)) if self.tokens.get(self.pos + 1) == Some(&Token::Assign) => {
                    let name = Name {
                        text: text.clone(),
                        span: self.spans[self.pos],
                    };
                    self.pos += 2;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named { name, value });
                }
                _ => {
                    let value = self.parse_expr()?;
                    fields.push(TableField::Positional(value));
                }
            }
            if !self.eat(&Token::Comma) && !self.eat(&Token::Semicolon) {
                break;
            }
        }
        self.expect(&Token::RBrace, "to close table constructor")?;
        Ok(Expr {
            kind: ExprKind::Table { fields },
            span: Span::new(start, self.prev_end()),
        })
    }

    /// Parameter list and body; `start` is the `function` keyword position.
    fn parse_func_body(&mut self, start: Position) -> Result<FuncBody, SyntaxError> {
        self.expect(&Token::LParen, "to open parameter list")?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                if self.eat(&Token::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name("in parameter list")?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "to close parameter list")?;
        let block = self.parse_block()?;
        self.expect(&Token::End, "to close function body")?;
        Ok(FuncBody {
            params,
            is_vararg,
            block,
            span: Span::new(start, self.prev_end()),
        })
    }
}
