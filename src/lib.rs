//! ruja: a small expression language compiled to bytecode over NaN-boxed
//! values and run on a stack machine.
//!
//! The pipeline is [`lexer::lex`] → [`parser::parse`] → [`compiler::compile`]
//! → [`vm::Vm::run`]. [`compile_source`] chains the first three.

pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod value;
pub mod vm;

use bytecode::Bytecode;
use diagnostic::Diagnostic;

/// Any failure on the way from source text to a finished run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] vm::VmError),
}

impl From<&Error> for Diagnostic {
    fn from(e: &Error) -> Self {
        match e {
            Error::Lex(e) => e.into(),
            Error::Parse(e) => e.into(),
            Error::Compile(e) => e.into(),
            Error::Runtime(e) => e.into(),
        }
    }
}

/// Lexes, parses and compiles `source`.
pub fn compile_source(source: &str) -> Result<Bytecode, Error> {
    let tokens = lexer::lex(source)?;
    let ast = parser::parse(tokens)?;
    Ok(compiler::compile(&ast)?)
}

/// Compiles and runs `source`, returning the program-output rendering of the
/// result.
pub fn run_source(source: &str, options: vm::VmOptions) -> Result<String, Error> {
    let program = compile_source(source)?;
    let mut machine = vm::Vm::with_options(&program, options);
    let result = machine.run()?;
    Ok(machine.display(result))
}
