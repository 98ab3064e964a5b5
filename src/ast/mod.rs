use serde::Serialize;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Span {
        Span { start: r.start, end: r.end }
    }
}

// ---- Operators and literals ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Literal as written in source. Conversion to a runtime word happens in the
/// compiler, which owns the constant pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(u8),
    Str(String),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Char(c) => write!(f, "'{}'", *c as char),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Declared types in `let` and `struct` members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    I32,
    F64,
    Bool,
    Char,
    String,
    Named(String),
}

// ---- Expressions ----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Literal {
        value: Literal,
        #[serde(skip)]
        span: Span,
        #[serde(skip)]
        line: usize,
    },
    Ident {
        name: String,
        #[serde(skip)]
        span: Span,
        #[serde(skip)]
        line: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(skip)]
        span: Span,
        #[serde(skip)]
        line: usize,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(skip)]
        span: Span,
        #[serde(skip)]
        line: usize,
    },
    /// `condition ? then_branch : else_branch`
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        #[serde(skip)]
        span: Span,
        #[serde(skip)]
        line: usize,
        /// Line of the `:` token.
        #[serde(skip)]
        colon_line: usize,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Ternary { span, .. } => *span,
        }
    }

    /// Line of the token that identifies the node (the operator for
    /// unary/binary/ternary nodes).
    pub fn line(&self) -> usize {
        match self {
            Expr::Literal { line, .. }
            | Expr::Ident { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Ternary { line, .. } => *line,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal { .. } => "literal",
            Expr::Ident { .. } => "identifier",
            Expr::Unary { .. } => "unary operation",
            Expr::Binary { .. } => "binary operation",
            Expr::Ternary { .. } => "ternary operation",
        }
    }
}

// ---- Statements ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
        }
    }
}

/// `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CondBranch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

/// `name: type` inside a struct.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    /// `let name[: ty] [= value];`
    Let {
        name: String,
        ty: Option<Type>,
        value: Option<Expr>,
        #[serde(skip)]
        line: usize,
    },
    /// `name op value;`
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
        #[serde(skip)]
        line: usize,
    },
    /// `if c { } elif c { } else { }`
    If {
        branches: Vec<CondBranch>,
        else_body: Option<Vec<Stmt>>,
        #[serde(skip)]
        line: usize,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        #[serde(skip)]
        line: usize,
    },
    /// `for var in start:end[:step] { }`
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
        #[serde(skip)]
        line: usize,
    },
    Struct {
        name: String,
        members: Vec<Member>,
        #[serde(skip)]
        line: usize,
    },
    Expr(Expr),
}

impl Stmt {
    pub fn line(&self) -> usize {
        match self {
            Stmt::Let { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::For { line, .. }
            | Stmt::Struct { line, .. } => *line,
            Stmt::Expr(e) => e.line(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::Let { .. } => "let declaration",
            Stmt::Assign { .. } => "assignment",
            Stmt::If { .. } => "if statement",
            Stmt::While { .. } => "while loop",
            Stmt::For { .. } => "for loop",
            Stmt::Struct { .. } => "struct definition",
            Stmt::Expr(_) => "expression statement",
        }
    }
}

// ---- Root ----

/// A parsed program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ast {
    /// Source with no tokens.
    Empty,
    /// A program consisting of a single expression.
    Expression(Expr),
    Stmts(Vec<Stmt>),
}

impl Ast {
    pub fn kind(&self) -> &'static str {
        match self {
            Ast::Empty => "empty program",
            Ast::Expression(_) => "expression",
            Ast::Stmts(_) => "statement list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(n: i64) -> Expr {
        Expr::Literal { value: Literal::Int(n), span: Span::UNKNOWN, line: 1 }
    }

    #[test]
    fn serializes_without_positions() {
        let ast = Ast::Expression(Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(lit(2)),
            span: Span { start: 0, end: 2 },
            line: 4,
        });
        let json = serde_json::to_value(&ast).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Expression": {"Unary": {"op": "Neg", "operand": {"Literal": {"value": {"Int": 2}}}}}})
        );
    }

    #[test]
    fn span_merge() {
        let a = Span { start: 4, end: 6 };
        let b = Span { start: 1, end: 3 };
        assert_eq!(a.merge(b), Span { start: 1, end: 6 });
        assert_eq!(Span::from(2..9), Span { start: 2, end: 9 });
    }

    #[test]
    fn literal_display() {
        assert_eq!(Literal::Float(3.0).to_string(), "3.0");
        assert_eq!(Literal::Char(b'z').to_string(), "'z'");
        assert_eq!(Literal::Str("a b".into()).to_string(), "\"a b\"");
    }

    #[test]
    fn kinds_and_lines() {
        let stmt = Stmt::Expr(lit(1));
        assert_eq!(stmt.kind(), "expression statement");
        assert_eq!(stmt.line(), 1);
        assert_eq!(Ast::Empty.kind(), "empty program");
        assert_eq!(BinaryOp::Lte.symbol(), "<=");
        assert_eq!(AssignOp::Mod.symbol(), "%=");
    }
}
