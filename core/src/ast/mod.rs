mod parser;

#[cfg(test)]
mod ast_test;

pub use parser::{parse, Parser};

use crate::token::{Comment, Directive, Span};

/// Binary operators, in source form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    pub cond: Expr,
    pub body: Block,
}

/// `function a.b.c:m() ... end` declaration target.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncName {
    pub base: Name,
    pub fields: Vec<Name>,
    pub method: Option<Name>,
}

/// Parameter list + body of any function literal or declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncBody {
    pub params: Vec<Name>,
    pub is_vararg: bool,
    pub block: Block,
    /// Whole extent, `function` keyword through `end`.
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Local {
        names: Vec<Name>,
        exprs: Vec<Expr>,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    CompoundAssign {
        op: BinOp,
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    /// A call (or method call) in statement position.
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        clauses: Vec<IfClause>,
        else_block: Option<Block>,
    },
    NumericFor {
        var: Name,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<Name>,
        exprs: Vec<Expr>,
        body: Block,
    },
    FunctionDecl {
        name: FuncName,
        body: FuncBody,
    },
    LocalFunction {
        name: Name,
        body: FuncBody,
    },
    Return {
        exprs: Vec<Expr>,
    },
    Break,
    Label(Name),
    Goto(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Vararg,
    Number(f64),
    /// Raw literal content; escape sequences are left undecoded.
    Str(String),
    Function(FuncBody),
    Name(String),
    Member {
        base: Box<Expr>,
        name: Name,
    },
    Index {
        base: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        base: Box<Expr>,
        method: Name,
        args: Vec<Expr>,
    },
    Table {
        fields: Vec<TableField>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    /// Parenthesized expression; truncates multi-value results to one.
    Paren(Box<Expr>),
}

impl Expr {
    /// Whether this expression can produce more than one value.
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Vararg
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    Positional(Expr),
    Named { name: Name, value: Expr },
    Keyed { key: Expr, value: Expr },
}

/// A parsed file: the top-level block plus comment/directive side channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub block: Block,
    pub comments: Vec<Comment>,
    pub directives: Vec<Directive>,
}
