use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("while")]
    While,
    #[token("proc")]
    Proc,
    #[token("return")]
    Return,
    #[token("struct")]
    Struct,
    #[token("enum")]
    Enum,
    #[token("let")]
    Let,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    // Built-in types
    #[token("i32")]
    I32Type,
    #[token("f64")]
    F64Type,
    #[token("bool")]
    BoolType,
    #[token("char")]
    CharType,
    #[token("string")]
    StringType,

    // Punctuation
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token("->")]
    Arrow,

    // Operators
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // Literals
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"'[^'\n]'", |lex| {
        let b = lex.slice().as_bytes();
        (b.len() == 3).then(|| b[1])
    })]
    Char(u8),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Short human description for parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(n) => format!("integer {n}"),
            Token::Float(f) => format!("float {f:?}"),
            Token::Char(c) => format!("char '{}'", *c as char),
            Token::Str(s) => format!("string {s:?}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("'{}'", other.lexeme()),
        }
    }

    /// Source text of fixed tokens.
    pub fn lexeme(&self) -> &'static str {
        match self {
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::For => "for",
            Token::In => "in",
            Token::While => "while",
            Token::Proc => "proc",
            Token::Return => "return",
            Token::Struct => "struct",
            Token::Enum => "enum",
            Token::Let => "let",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::True => "true",
            Token::False => "false",
            Token::Nil => "nil",
            Token::I32Type => "i32",
            Token::F64Type => "f64",
            Token::BoolType => "bool",
            Token::CharType => "char",
            Token::StringType => "string",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::Arrow => "->",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Float(_) | Token::Int(_) | Token::Char(_) | Token::Str(_) | Token::Ident(_) => "",
        }
    }
}

/// A token with its byte span and 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
    pub line: usize,
}

/// Lex source code into a stream of tokens with positions.
/// Stops at the first unrecognised input.
pub fn lex(source: &str) -> Result<Vec<Spanned>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut scanned = 0;

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        line += source[scanned..range.start].matches('\n').count();
        scanned = range.start;
        match result {
            Ok(token) => tokens.push(Spanned { token, span: Span::from(range), line }),
            Err(()) => {
                let snippet = source[range.clone()].to_string();
                return Err(LexError {
                    position: range.start,
                    line,
                    suggestion: suggest_fix(&source[range.start..]),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(rest: &str) -> String {
    match rest.chars().next() {
        Some('"') => "unterminated string literal; close it with '\"'".to_string(),
        Some('\'') => "char literals hold exactly one ASCII character, e.g. 'a'".to_string(),
        Some('!') => "use 'not' for logical negation".to_string(),
        Some('&') => "use 'and' instead of '&&'".to_string(),
        Some('|') => "use 'or' instead of '||'".to_string(),
        Some(c) if c.is_ascii_digit() => "integer literal too large".to_string(),
        _ => "unexpected character".to_string(),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("lex error at line {line}: '{snippet}': {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub line: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lex_arithmetic() {
        assert_eq!(
            kinds("-(1 + 2 * 3)"),
            vec![
                Token::Minus,
                Token::LParen,
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Star,
                Token::Int(3),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn lex_literals() {
        assert_eq!(
            kinds(r#"1.5 'x' "ab cd" nil true false"#),
            vec![
                Token::Float(1.5),
                Token::Char(b'x'),
                Token::Str("ab cd".to_string()),
                Token::Nil,
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn lex_keywords_and_identifiers() {
        assert_eq!(
            kinds("let total_1: i32 = x;"),
            vec![
                Token::Let,
                Token::Ident("total_1".to_string()),
                Token::Colon,
                Token::I32Type,
                Token::Assign,
                Token::Ident("x".to_string()),
                Token::Semicolon,
            ]
        );
        assert_eq!(kinds("iffy"), vec![Token::Ident("iffy".to_string())]);
    }

    #[test]
    fn lex_compound_operators() {
        assert_eq!(
            kinds("== != <= >= -> += %="),
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::LessEq,
                Token::GreaterEq,
                Token::Arrow,
                Token::PlusAssign,
                Token::PercentAssign,
            ]
        );
    }

    #[test]
    fn lex_tracks_lines() {
        let tokens = lex("1\n// note\n  2\n\n3").unwrap();
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 3, 5]);
        assert_eq!(tokens[1].span, Span { start: 12, end: 13 });
    }

    #[test]
    fn lex_comment_ignored() {
        assert_eq!(kinds("// all comment"), vec![]);
    }

    #[test]
    fn lex_error_unterminated_string() {
        let err = lex("1 +\n\"abc").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.position, 4);
        assert!(err.suggestion.contains("unterminated"));
    }

    #[test]
    fn lex_error_bang() {
        let err = lex("!x").unwrap_err();
        assert_eq!(err.snippet, "!");
        assert!(err.suggestion.contains("not"));
    }
}
