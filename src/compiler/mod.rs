use tracing::debug;

use crate::ast::{Ast, BinaryOp, Expr, Literal, UnaryOp};
use crate::bytecode::{Bytecode, OPERAND_WIDTH, Opcode, OutOfMemory};
use crate::value::Word;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("nothing to compile: the program is empty")]
    EmptyNode,
    #[error("only a single expression can be compiled, found a {kind}")]
    NotAnExpression { kind: &'static str },
    #[error("line {line}: {kind} is not supported by the compiler")]
    UnsupportedNode { kind: &'static str, line: usize },
    #[error("line {line}: operator '{operator}' has no opcode")]
    UnmappedOperator { operator: &'static str, line: usize },
    #[error("line {line}: literal {text} does not fit in a 32-bit integer")]
    InvalidLiteral { text: String, line: usize },
    #[error("jump operand at {at} cannot be patched")]
    JumpOutOfRange { at: usize },
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

type Result<T> = std::result::Result<T, CompileError>;

/// Lowers a single-expression program to bytecode terminated by `HALT`.
/// On error nothing is returned; partial output is dropped.
pub fn compile(ast: &Ast) -> Result<Bytecode> {
    let expr = match ast {
        Ast::Empty => return Err(CompileError::EmptyNode),
        Ast::Expression(e) => e,
        Ast::Stmts(_) => return Err(CompileError::NotAnExpression { kind: ast.kind() }),
    };
    let mut c = Compiler { code: Bytecode::new() };
    c.expr(expr)?;
    c.code.add_opcode(Opcode::Halt, 0)?;
    debug!(
        bytes = c.code.len(),
        constants = c.code.constants().len(),
        literals = c.code.objects().len(),
        "compiled"
    );
    Ok(c.code)
}

struct Compiler {
    code: Bytecode,
}

impl Compiler {
    fn expr(&mut self, e: &Expr) -> Result<()> {
        match e {
            Expr::Literal { value, line, .. } => self.literal(value, *line),
            Expr::Ident { line, .. } => Err(CompileError::UnsupportedNode { kind: e.kind(), line: *line }),
            Expr::Unary { op, operand, line, .. } => {
                self.expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                };
                Ok(self.code.add_opcode(opcode, *line)?)
            }
            Expr::Binary { op, left, right, line, .. } => {
                self.expr(left)?;
                self.expr(right)?;
                let opcode = binary_opcode(*op).ok_or(CompileError::UnmappedOperator {
                    operator: op.symbol(),
                    line: *line,
                })?;
                Ok(self.code.add_opcode(opcode, *line)?)
            }
            Expr::Ternary { condition, then_branch, else_branch, line, colon_line, .. } => {
                self.ternary(condition, then_branch, else_branch, *line, *colon_line)
            }
        }
    }

    fn literal(&mut self, value: &Literal, line: usize) -> Result<()> {
        let word = match value {
            Literal::Nil => return Ok(self.code.add_opcode(Opcode::Nil, line)?),
            Literal::Bool(true) => return Ok(self.code.add_opcode(Opcode::True, line)?),
            Literal::Bool(false) => return Ok(self.code.add_opcode(Opcode::False, line)?),
            Literal::Int(n) => {
                let n = i32::try_from(*n)
                    .map_err(|_| CompileError::InvalidLiteral { text: n.to_string(), line })?;
                Word::int(n)
            }
            Literal::Float(x) => Word::double(*x),
            Literal::Char(c) => Word::char(*c),
            Literal::Str(s) => self.code.intern_str(s)?,
        };
        let index = self.code.add_constant(word)?;
        self.code.add_opcode(Opcode::Const, line)?;
        self.code.add_operand(index, line)?;
        Ok(())
    }

    /// ```text
    ///     <condition>
    ///     JZ   else          ; jmp_false = operand position
    ///     <then>
    ///     JUMP end           ; jmp = operand position
    /// else:
    ///     <else>
    /// end:
    /// ```
    /// `JZ` takes the line of `?` and `JUMP` the line of `:`.
    fn ternary(
        &mut self,
        condition: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        line: usize,
        colon_line: usize,
    ) -> Result<()> {
        self.expr(condition)?;
        self.code.add_opcode(Opcode::Jz, line)?;
        let jmp_false = self.code.add_operand(0, line)?;

        self.expr(then_branch)?;
        self.code.add_opcode(Opcode::Jump, colon_line)?;
        let jmp = self.code.add_operand(0, colon_line)?;

        // Stored offset is jmp - jmp_false + 5.
        self.patch(jmp_false, jmp + OPERAND_WIDTH)?;

        self.expr(else_branch)?;
        // Stored offset is len - jmp + 1.
        let end = self.code.len();
        self.patch(jmp, end)
    }

    fn patch(&mut self, at: usize, target: usize) -> Result<()> {
        self.code.patch_jump(at, target).ok_or(CompileError::JumpOutOfRange { at })
    }
}

fn binary_opcode(op: BinaryOp) -> Option<Opcode> {
    let opcode = match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Neq => Opcode::Neq,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Lte => Opcode::Lte,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Gte => Opcode::Gte,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        BinaryOp::Mod => return None,
    };
    Some(opcode)
}
