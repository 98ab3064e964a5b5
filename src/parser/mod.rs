use crate::ast::*;
use crate::lexer::{Spanned, Token};

/// Binding power of infix operators, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Assignment,
    Question,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Prec {
    fn next(self) -> Prec {
        match self {
            Prec::Assignment => Prec::Question,
            Prec::Question => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Equality,
            Prec::Equality => Prec::Comparison,
            Prec::Comparison => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary => Prec::Call,
            Prec::Call | Prec::Primary => Prec::Primary,
        }
    }
}

fn infix(tok: &Token) -> Option<(Prec, Option<BinaryOp>)> {
    let entry = match tok {
        Token::Question => (Prec::Question, None),
        Token::Or => (Prec::Or, Some(BinaryOp::Or)),
        Token::And => (Prec::And, Some(BinaryOp::And)),
        Token::EqEq => (Prec::Equality, Some(BinaryOp::Eq)),
        Token::NotEq => (Prec::Equality, Some(BinaryOp::Neq)),
        Token::Less => (Prec::Comparison, Some(BinaryOp::Lt)),
        Token::LessEq => (Prec::Comparison, Some(BinaryOp::Lte)),
        Token::Greater => (Prec::Comparison, Some(BinaryOp::Gt)),
        Token::GreaterEq => (Prec::Comparison, Some(BinaryOp::Gte)),
        Token::Plus => (Prec::Term, Some(BinaryOp::Add)),
        Token::Minus => (Prec::Term, Some(BinaryOp::Sub)),
        Token::Star => (Prec::Factor, Some(BinaryOp::Mul)),
        Token::Slash => (Prec::Factor, Some(BinaryOp::Div)),
        Token::Percent => (Prec::Factor, Some(BinaryOp::Mod)),
        _ => return None,
    };
    Some(entry)
}

fn assign_op(tok: &Token) -> Option<AssignOp> {
    match tok {
        Token::Assign => Some(AssignOp::Set),
        Token::PlusAssign => Some(AssignOp::Add),
        Token::MinusAssign => Some(AssignOp::Sub),
        Token::StarAssign => Some(AssignOp::Mul),
        Token::SlashAssign => Some(AssignOp::Div),
        Token::PercentAssign => Some(AssignOp::Mod),
        _ => None,
    }
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub span: Span,
    pub line: usize,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    /// Span of the current token, or an empty span just past the last one.
    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(t) => t.span,
            None => self
                .tokens
                .last()
                .map(|t| Span { start: t.span.end, end: t.span.end })
                .unwrap_or(Span::UNKNOWN),
        }
    }

    fn peek_line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.pos += 1;
                Ok(span)
            }
            Some(tok) => {
                let msg = format!("expected {}, got {}", expected.describe(), tok.describe());
                Err(self.error("P003", msg))
            }
            None => Err(self.error("P002", format!("expected {}, got end of input", expected.describe()))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            Some(tok) => Err(self.error("P004", format!("expected identifier, got {}", tok.describe()))),
            None => Err(self.error("P002", "expected identifier, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            span: self.peek_span(),
            line: self.peek_line(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Program ----

    /// A lone expression (optionally followed by `;`) becomes
    /// [`Ast::Expression`]; anything else is a statement list.
    pub fn parse_program(&mut self) -> Result<Ast> {
        if self.at_end() {
            return Ok(Ast::Empty);
        }
        if self.at_statement_start() {
            return Ok(Ast::Stmts(self.parse_stmts_until_end()?));
        }

        let expr = self.expression()?;
        let terminated = self.eat(&Token::Semicolon);
        if self.at_end() {
            return Ok(Ast::Expression(expr));
        }
        if !terminated {
            let got = self.peek().map(Token::describe).unwrap_or_default();
            return Err(self.error("P006", format!("expected ';' after expression, got {got}")));
        }
        let mut stmts = vec![Stmt::Expr(expr)];
        stmts.extend(self.parse_stmts_until_end()?);
        Ok(Ast::Stmts(stmts))
    }

    fn at_statement_start(&self) -> bool {
        match self.peek() {
            Some(Token::Let | Token::If | Token::While | Token::For | Token::Struct) => true,
            Some(Token::Ident(_)) => self.peek_at(1).and_then(assign_op).is_some(),
            _ => false,
        }
    }

    fn parse_stmts_until_end(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    // ---- Statements ----

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Struct) => self.parse_struct(),
            Some(Token::Ident(_)) if self.peek_at(1).and_then(assign_op).is_some() => self.parse_assign(),
            _ => {
                let expr = self.expression()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `let name: ty;`, `let name: ty = value;`, `let name = value;`
    fn parse_let(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        self.expect(&Token::Let)?;
        let name = self.expect_ident()?;
        let ty = if self.eat(&Token::Colon) { Some(self.parse_type()?) } else { None };
        let value = if self.eat(&Token::Assign) { Some(self.expression()?) } else { None };
        if ty.is_none() && value.is_none() {
            return Err(self.error("P007", format!("'{name}' needs a type or an initial value")));
        }
        self.expect(&Token::Semicolon)?;
        Ok(Stmt::Let { name, ty, value, line })
    }

    fn parse_assign(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        let name = self.expect_ident()?;
        let op = match self.advance().and_then(|t| assign_op(&t.token)) {
            Some(op) => op,
            None => return Err(self.error("P003", "expected assignment operator".into())),
        };
        let value = self.expression()?;
        self.expect(&Token::Semicolon)?;
        Ok(Stmt::Assign { name, op, value, line })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        self.expect(&Token::If)?;
        let mut branches = vec![self.parse_cond_branch()?];
        while self.eat(&Token::Elif) {
            branches.push(self.parse_cond_branch()?);
        }
        let else_body = if self.eat(&Token::Else) { Some(self.parse_block()?) } else { None };
        Ok(Stmt::If { branches, else_body, line })
    }

    fn parse_cond_branch(&mut self) -> Result<CondBranch> {
        let condition = self.expression()?;
        let body = self.parse_block()?;
        Ok(CondBranch { condition, body })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        self.expect(&Token::While)?;
        let condition = self.expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { condition, body, line })
    }

    /// `for var in start:end[:step] { ... }`
    fn parse_for(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        self.expect(&Token::For)?;
        let var = self.expect_ident()?;
        self.expect(&Token::In)?;
        let start = self.parse_precedence(Prec::Or)?;
        self.expect(&Token::Colon)?;
        let end = self.parse_precedence(Prec::Or)?;
        let step = if self.eat(&Token::Colon) { Some(self.parse_precedence(Prec::Or)?) } else { None };
        let body = self.parse_block()?;
        Ok(Stmt::For { var, start, end, step, body, line })
    }

    /// `struct Name { member: type, ... }`
    fn parse_struct(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        self.expect(&Token::Struct)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut members = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            let member = self.expect_ident()?;
            self.expect(&Token::Colon)?;
            let ty = self.parse_type()?;
            members.push(Member { name: member, ty });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Stmt::Struct { name, members, line })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                None => return Err(self.error("P002", "unclosed block, expected '}'".into())),
                _ => body.push(self.parse_stmt()?),
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(body)
    }

    fn parse_type(&mut self) -> Result<Type> {
        let ty = match self.peek() {
            Some(Token::I32Type) => Type::I32,
            Some(Token::F64Type) => Type::F64,
            Some(Token::BoolType) => Type::Bool,
            Some(Token::CharType) => Type::Char,
            Some(Token::StringType) => Type::String,
            Some(Token::Ident(name)) => Type::Named(name.clone()),
            Some(tok) => {
                let msg = format!("expected type, got {}", tok.describe());
                return Err(self.error("P005", msg));
            }
            None => return Err(self.error("P002", "expected type, got end of input".into())),
        };
        self.pos += 1;
        Ok(ty)
    }

    // ---- Expressions ----

    pub fn expression(&mut self) -> Result<Expr> {
        self.parse_precedence(Prec::Assignment)
    }

    fn parse_precedence(&mut self, min: Prec) -> Result<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((prec, op)) = self.peek().and_then(infix) {
            if prec < min {
                break;
            }
            left = match op {
                Some(op) => self.parse_binary(left, op, prec)?,
                None => self.parse_ternary(left)?,
            };
        }
        Ok(left)
    }

    fn parse_binary(&mut self, left: Expr, op: BinaryOp, prec: Prec) -> Result<Expr> {
        let line = self.peek_line();
        self.pos += 1;
        let right = self.parse_precedence(prec.next())?;
        let span = left.span().merge(right.span());
        Ok(Expr::Binary { op, left: Box::new(left), right: Box::new(right), span, line })
    }

    /// `condition ? then : else`; both branches are full expressions.
    fn parse_ternary(&mut self, condition: Expr) -> Result<Expr> {
        let line = self.peek_line();
        self.expect(&Token::Question)?;
        let then_branch = self.expression()?;
        let colon_line = self.peek_line();
        self.expect(&Token::Colon)?;
        let else_branch = self.expression()?;
        let span = condition.span().merge(else_branch.span());
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
            span,
            line,
            colon_line,
        })
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        let Some(Spanned { token, span, line }) = self.advance() else {
            return Err(self.error("P002", "expected expression, got end of input".into()));
        };
        let literal = move |value: Literal| -> Result<Expr> { Ok(Expr::Literal { value, span, line }) };
        match token {
            Token::Nil => literal(Literal::Nil),
            Token::True => literal(Literal::Bool(true)),
            Token::False => literal(Literal::Bool(false)),
            Token::Int(n) => literal(Literal::Int(n)),
            Token::Float(x) => literal(Literal::Float(x)),
            Token::Char(c) => literal(Literal::Char(c)),
            Token::Str(s) => literal(Literal::Str(s)),
            Token::Ident(name) => Ok(Expr::Ident { name, span, line }),
            Token::Minus | Token::Not => {
                let op = if token == Token::Minus { UnaryOp::Neg } else { UnaryOp::Not };
                let operand = self.parse_precedence(Prec::Unary)?;
                let span = span.merge(operand.span());
                Ok(Expr::Unary { op, operand: Box::new(operand), span, line })
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => {
                self.pos -= 1;
                Err(self.error("P001", format!("expected expression, got {}", other.describe())))
            }
        }
    }
}

/// Parses a token stream into an [`Ast`], stopping at the first error.
pub fn parse(tokens: Vec<Spanned>) -> Result<Ast> {
    Parser::new(tokens).parse_program()
}
