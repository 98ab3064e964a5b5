pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::bytecode::persist::LoadError;
use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::VmError;

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A user-facing error report, rendered by [`ansi`] or [`json`]. The first
/// label is the one the excerpt points at.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::EmptyNode => "C001",
            CompileError::NotAnExpression { .. } => "C002",
            CompileError::UnsupportedNode { .. } => "C003",
            CompileError::UnmappedOperator { .. } => "C004",
            CompileError::InvalidLiteral { .. } => "C005",
            CompileError::OutOfMemory(_) => "C006",
            CompileError::JumpOutOfRange { .. } => "C007",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            CompileError::NotAnExpression { .. } | CompileError::UnsupportedNode { .. } => {
                d.with_suggestion("the compiler accepts one expression built from literals and operators")
            }
            CompileError::UnmappedOperator { operator: "%", .. } => {
                d.with_note("there is no remainder instruction")
            }
            _ => d,
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::StackUnderflow { .. } => "R001",
            VmError::TypeMismatch { .. } => "R002",
            VmError::Bug { .. } => "R003",
            VmError::DivisionByZero { .. } => "R004",
            VmError::UnknownOpcode { .. } => "R005",
            VmError::OutOfBytecode { .. } => "R006",
            VmError::InvalidConstant { .. } => "R007",
            VmError::DanglingObject { .. } => "R008",
            VmError::StepBudgetExhausted { .. } => "R009",
            VmError::OutOfMemory(_) => "R010",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            VmError::StepBudgetExhausted { .. } => d.with_suggestion("raise --max-steps"),
            VmError::Bug { .. } | VmError::StackUnderflow { .. } => {
                d.with_note("the bytecode is inconsistent; this is a compiler or loader bug")
            }
            _ => d,
        }
    }
}

impl From<&LoadError> for Diagnostic {
    fn from(e: &LoadError) -> Self {
        Diagnostic::error(e.to_string()).with_code("B001")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error("bad token").with_span(Span { start: 5, end: 8 }, "here");
        assert_eq!(d.labels.len(), 1);
        assert_eq!(d.labels[0].span, Span { start: 5, end: 8 });
        assert_eq!(d.labels[0].message, "here");
    }

    #[test]
    fn from_lex_error() {
        let e = LexError {
            position: 3,
            line: 1,
            snippet: "!".to_string(),
            suggestion: "use 'not' for logical negation".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("L001"));
        assert!(d.message.contains('!'));
        assert_eq!(d.labels[0].span, Span { start: 3, end: 4 });
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn from_parse_error() {
        let e = ParseError {
            code: "P003",
            span: Span { start: 10, end: 15 },
            line: 2,
            message: "expected ':', got ';'".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("P003"));
        assert!(d.message.contains("expected ':'"));
        assert_eq!(d.labels[0].span, Span { start: 10, end: 15 });
    }

    #[test]
    fn from_compile_error() {
        let e = CompileError::UnmappedOperator { operator: "%", line: 1 };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("C004"));
        assert!(d.message.contains('%'));
        assert_eq!(d.notes.len(), 1);
    }

    #[test]
    fn from_vm_error() {
        let e = VmError::StackUnderflow { ip: 4, op: Opcode::Add };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("R001"));
        assert!(d.message.contains("ip 4"));
        assert!(d.labels.is_empty());
    }

    #[test]
    fn from_load_error() {
        let d = Diagnostic::from(&LoadError::BadMagic);
        assert_eq!(d.code, Some("B001"));
    }
}
