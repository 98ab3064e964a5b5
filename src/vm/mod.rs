use std::cmp::Ordering;

use tracing::{Level, debug, trace, warn};

use crate::bytecode::{Bytecode, Opcode, OutOfMemory, jump_target};
use crate::object::{Heap, ObjRef, Object};
use crate::value::{self, ObjectLookup, Style, Value, Word};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack underflow at ip {ip}: {op} needs more operands")]
    StackUnderflow { ip: usize, op: Opcode },
    #[error("type mismatch at ip {ip}: {op} {message}")]
    TypeMismatch { ip: usize, op: Opcode, message: String },
    #[error("BUG at ip {ip}: {op} {message}")]
    Bug { ip: usize, op: Opcode, message: String },
    #[error("division by zero at ip {ip}")]
    DivisionByZero { ip: usize },
    #[error("unknown opcode 0x{byte:02x} at ip {ip}")]
    UnknownOpcode { ip: usize, byte: u8 },
    #[error("ran past the end of the bytecode at ip {ip}")]
    OutOfBytecode { ip: usize },
    #[error("constant index {index} out of range at ip {ip}")]
    InvalidConstant { ip: usize, index: u32 },
    #[error("reference to a missing object at ip {ip}")]
    DanglingObject { ip: usize },
    #[error("step budget exhausted after {steps} instructions")]
    StepBudgetExhausted { steps: u64 },
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

impl VmError {
    /// Instruction pointer of the failing instruction, when there is one.
    pub fn ip(&self) -> Option<usize> {
        match self {
            VmError::StackUnderflow { ip, .. }
            | VmError::TypeMismatch { ip, .. }
            | VmError::Bug { ip, .. }
            | VmError::DivisionByZero { ip }
            | VmError::UnknownOpcode { ip, .. }
            | VmError::OutOfBytecode { ip }
            | VmError::InvalidConstant { ip, .. }
            | VmError::DanglingObject { ip } => Some(*ip),
            VmError::StepBudgetExhausted { .. } | VmError::OutOfMemory(_) => None,
        }
    }
}

type VmResult<T> = Result<T, VmError>;

/// Run-time limits.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Maximum number of instructions to dispatch. `None` runs until `HALT`.
    pub step_budget: Option<u64>,
}

/// Stack machine over a borrowed, read-only [`Bytecode`]. Strings created
/// while running live in the VM's own heap and are freed with it.
pub struct Vm<'a> {
    program: &'a Bytecode,
    stack: Vec<Word>,
    heap: Heap,
    options: VmOptions,
    steps: u64,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Bytecode) -> Self {
        Self::with_options(program, VmOptions::default())
    }

    pub fn with_options(program: &'a Bytecode, options: VmOptions) -> Self {
        Vm {
            program,
            stack: Vec::with_capacity(256),
            heap: Heap::with_base(program.objects().end()),
            options,
            steps: 0,
        }
    }

    /// Executes from ip 0 until `HALT` and returns the top of the stack (nil
    /// if empty). Any error ends the run.
    pub fn run(&mut self) -> VmResult<Word> {
        debug!(bytes = self.program.len(), budget = ?self.options.step_budget, "vm start");
        let result = self.execute();
        match &result {
            Ok(w) => debug!(steps = self.steps, result = ?w, "vm halt"),
            Err(e) => warn!(steps = self.steps, error = %e, "vm run failed"),
        }
        result
    }

    /// Like [`Vm::run`], unpacked to the public value type.
    pub fn eval(&mut self) -> VmResult<Value> {
        self.run().map(Word::unpack)
    }

    pub fn stack(&self) -> &[Word] {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The string an object word refers to, if any.
    pub fn str(&self, w: Word) -> Option<&str> {
        if !w.is_object() {
            return None;
        }
        self.object(w.as_object()).and_then(Object::as_str)
    }

    /// Program-output rendering of `w`.
    pub fn display(&self, w: Word) -> String {
        value::render(w, self, Style::Plain)
    }

    fn execute(&mut self) -> VmResult<Word> {
        let program = self.program;
        let code = program.code();
        let tracing = tracing::enabled!(Level::TRACE);
        let mut ip = 0usize;

        loop {
            if let Some(budget) = self.options.step_budget {
                if self.steps >= budget {
                    return Err(VmError::StepBudgetExhausted { steps: self.steps });
                }
            }
            self.steps += 1;

            let Some(&byte) = code.get(ip) else {
                return Err(VmError::OutOfBytecode { ip });
            };
            let Some(op) = Opcode::from_byte(byte) else {
                return Err(VmError::UnknownOpcode { ip, byte });
            };
            if tracing {
                trace!(ip, op = %op, stack = ?self.stack, "step");
            }

            match op {
                Opcode::Halt => return Ok(self.stack.last().copied().unwrap_or_else(Word::nil)),
                Opcode::Nil => self.stack.push(Word::nil()),
                Opcode::True => self.stack.push(Word::boolean(true)),
                Opcode::False => self.stack.push(Word::boolean(false)),
                Opcode::Const => {
                    let index = self.operand(ip)?;
                    let w = program
                        .constant(index as usize)
                        .ok_or(VmError::InvalidConstant { ip, index })?;
                    self.stack.push(w);
                }
                Opcode::Not => {
                    let a = self.pop1(ip, op)?;
                    if a.is_object() {
                        return Err(mismatch(ip, op, format!("cannot negate {}", self.describe(a))));
                    }
                    self.stack.push(Word::boolean(!a.as_bool()));
                }
                Opcode::Neg => {
                    let a = self.pop1(ip, op)?;
                    let r = match a.unpack() {
                        Value::Int(i) => Word::int(i.wrapping_neg()),
                        Value::Double(d) => Word::double(-d),
                        _ => {
                            return Err(VmError::Bug {
                                ip,
                                op,
                                message: format!("operand is {}, expected a number", self.describe(a)),
                            });
                        }
                    };
                    self.stack.push(r);
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let (a, b) = self.pop2(ip, op)?;
                    let r = self.arithmetic(ip, op, a, b)?;
                    self.stack.push(r);
                }
                Opcode::Eq | Opcode::Neq => {
                    let (a, b) = self.pop2(ip, op)?;
                    let eq = self.equal(ip, a, b)?;
                    self.stack.push(Word::boolean(if op == Opcode::Eq { eq } else { !eq }));
                }
                Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                    let (a, b) = self.pop2(ip, op)?;
                    let ord = self.order(ip, op, a, b)?;
                    let r = match op {
                        Opcode::Lt => ord == Some(Ordering::Less),
                        Opcode::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                        Opcode::Gt => ord == Some(Ordering::Greater),
                        _ => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    };
                    self.stack.push(Word::boolean(r));
                }
                Opcode::And | Opcode::Or => {
                    let (a, b) = self.pop2(ip, op)?;
                    let (Value::Bool(x), Value::Bool(y)) = (a.unpack(), b.unpack()) else {
                        let message = format!(
                            "needs two bools, got {} and {}",
                            self.describe(a),
                            self.describe(b)
                        );
                        return Err(mismatch(ip, op, message));
                    };
                    self.stack.push(Word::boolean(if op == Opcode::And { x && y } else { x || y }));
                }
                Opcode::Jump => {
                    let offset = self.operand(ip)?;
                    ip = jump_target(ip + 1, offset).ok_or(VmError::OutOfBytecode { ip })?;
                    continue;
                }
                Opcode::Jz => {
                    let offset = self.operand(ip)?;
                    let cond = self.pop1(ip, op)?;
                    if cond.is_object() {
                        let message = format!("cannot branch on {}", self.describe(cond));
                        return Err(mismatch(ip, op, message));
                    }
                    if cond.as_bool() {
                        ip += op.width();
                    } else {
                        ip = jump_target(ip + 1, offset).ok_or(VmError::OutOfBytecode { ip })?;
                    }
                    continue;
                }
            }
            ip += op.width();
        }
    }

    fn operand(&self, ip: usize) -> VmResult<u32> {
        self.program.read_operand(ip + 1).ok_or(VmError::OutOfBytecode { ip })
    }

    fn pop1(&mut self, ip: usize, op: Opcode) -> VmResult<Word> {
        self.stack.pop().ok_or(VmError::StackUnderflow { ip, op })
    }

    /// Pops `(left, right)`; right is the top of the stack.
    fn pop2(&mut self, ip: usize, op: Opcode) -> VmResult<(Word, Word)> {
        if self.stack.len() < 2 {
            return Err(VmError::StackUnderflow { ip, op });
        }
        let b = self.stack.pop().unwrap_or_else(Word::nil);
        let a = self.stack.pop().unwrap_or_else(Word::nil);
        Ok((a, b))
    }

    fn arithmetic(&mut self, ip: usize, op: Opcode, a: Word, b: Word) -> VmResult<Word> {
        match (a.unpack(), b.unpack()) {
            (Value::Int(x), Value::Int(y)) => {
                let r = match op {
                    Opcode::Add => x.wrapping_add(y),
                    Opcode::Sub => x.wrapping_sub(y),
                    Opcode::Mul => x.wrapping_mul(y),
                    _ if y == 0 => return Err(VmError::DivisionByZero { ip }),
                    _ => x.wrapping_div(y),
                };
                Ok(Word::int(r))
            }
            (Value::Double(x), Value::Double(y)) => {
                let r = match op {
                    Opcode::Add => x + y,
                    Opcode::Sub => x - y,
                    Opcode::Mul => x * y,
                    _ if y == 0.0 => return Err(VmError::DivisionByZero { ip }),
                    _ => x / y,
                };
                Ok(Word::double(r))
            }
            (Value::Object(x), Value::Object(y)) if op == Opcode::Add => {
                let joined = match (self.object(x), self.object(y)) {
                    (Some(Object::Str(l)), Some(Object::Str(r))) => format!("{l}{r}"),
                    _ => return Err(VmError::DanglingObject { ip }),
                };
                Ok(Word::object(self.heap.alloc_str(joined)?))
            }
            _ => {
                let message = format!("cannot combine {} and {}", self.describe(a), self.describe(b));
                Err(mismatch(ip, op, message))
            }
        }
    }

    /// Equality across any tags; mismatched tags are simply unequal.
    fn equal(&self, ip: usize, a: Word, b: Word) -> VmResult<bool> {
        match (a.unpack(), b.unpack()) {
            (Value::Double(x), Value::Double(y)) => Ok(x == y),
            (Value::Object(x), Value::Object(y)) => {
                let (Some(l), Some(r)) = (self.object(x), self.object(y)) else {
                    return Err(VmError::DanglingObject { ip });
                };
                Ok(l == r)
            }
            _ => Ok(a == b),
        }
    }

    fn order(&self, ip: usize, op: Opcode, a: Word, b: Word) -> VmResult<Option<Ordering>> {
        match (a.unpack(), b.unpack()) {
            (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(&y))),
            (Value::Double(x), Value::Double(y)) => Ok(x.partial_cmp(&y)),
            (Value::Char(x), Value::Char(y)) => Ok(Some(x.cmp(&y))),
            (Value::Object(x), Value::Object(y)) => match (self.object(x), self.object(y)) {
                (Some(Object::Str(l)), Some(Object::Str(r))) => Ok(Some(l.cmp(r))),
                _ => Err(VmError::DanglingObject { ip }),
            },
            _ => {
                let message = format!("cannot order {} and {}", self.describe(a), self.describe(b));
                Err(mismatch(ip, op, message))
            }
        }
    }

    /// `int 3`, `string "ab"`, ... for error messages.
    fn describe(&self, w: Word) -> String {
        let kind = match w.unpack() {
            Value::Object(r) => self.object(r).map(Object::kind).unwrap_or("object"),
            _ => return format!("{} {}", w.tag(), value::render(w, self, Style::Quoted)),
        };
        format!("{kind} {}", value::render(w, self, Style::Quoted))
    }
}

fn mismatch(ip: usize, op: Opcode, message: String) -> VmError {
    VmError::TypeMismatch { ip, op, message }
}

impl ObjectLookup for Vm<'_> {
    fn object(&self, r: ObjRef) -> Option<&Object> {
        self.program.object(r).or_else(|| self.heap.get(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler, lexer, parser};

    fn compile(source: &str) -> Bytecode {
        let ast = parser::parse(lexer::lex(source).unwrap()).unwrap();
        compiler::compile(&ast).unwrap()
    }

    fn eval(source: &str) -> Result<Value, VmError> {
        let bc = compile(source);
        Vm::new(&bc).eval()
    }

    fn eval_display(source: &str) -> String {
        let bc = compile(source);
        let mut vm = Vm::new(&bc);
        let w = vm.run().unwrap_or_else(|e| panic!("{source}: {e}"));
        vm.display(w)
    }

    fn assemble(ops: &[Opcode]) -> Bytecode {
        let mut bc = Bytecode::new();
        for op in ops {
            bc.add_opcode(*op, 1).unwrap();
            if op.operand_width() > 0 {
                bc.add_operand(0, 1).unwrap();
            }
        }
        bc
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(eval("10 - 4 - 3").unwrap(), Value::Int(3));
        assert_eq!(eval("7 / 2").unwrap(), Value::Int(3));
        assert_eq!(eval("1.5 * 2.0").unwrap(), Value::Double(3.0));
    }

    #[test]
    fn negated_expression_is_minus_seven() {
        let v = eval("-(1 + 2 * 3)").unwrap();
        assert_eq!(v, Value::Int(-7));
        assert_eq!(v.as_f64(), Some(-7.0));
        assert_eq!(eval("-(1.0 + 2.0 * 3.0)").unwrap(), Value::Double(-7.0));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(eval_display("\"ab\" + \"cd\""), "abcd");
        assert_eq!(eval_display("\"a\" + \"b\" + \"c\""), "abc");
    }

    #[test]
    fn concatenation_allocates_in_vm_heap() {
        let bc = compile("\"ab\" + \"cd\"");
        let mut vm = Vm::new(&bc);
        let w = vm.run().unwrap();
        assert_eq!(vm.heap().len(), 1);
        assert_eq!(w.as_object().index(), bc.objects().end());
        assert_eq!(vm.str(w), Some("abcd"));
    }

    #[test]
    fn division_by_zero() {
        assert!(matches!(eval("5 / 0"), Err(VmError::DivisionByZero { .. })));
        assert!(matches!(eval("5.0 / 0.0"), Err(VmError::DivisionByZero { .. })));
        assert!(matches!(eval("5.0 / -0.0"), Err(VmError::DivisionByZero { .. })));
    }

    #[test]
    fn error_reports_failing_ip() {
        // CONST 5 (0..5), CONST 0 (5..10), DIV at 10
        let err = eval("5 / 0").unwrap_err();
        assert_eq!(err.ip(), Some(10));
        assert_eq!(VmError::StepBudgetExhausted { steps: 3 }.ip(), None);
    }

    #[test]
    fn int_arithmetic_wraps() {
        assert_eq!(eval("2147483647 + 1").unwrap(), Value::Int(i32::MIN));
        assert_eq!(eval("-(0 - 2147483647 - 1)").unwrap(), Value::Int(i32::MIN));
    }

    #[test]
    fn mixed_numeric_tags_are_a_type_error() {
        assert!(matches!(eval("1 + 1.0"), Err(VmError::TypeMismatch { op: Opcode::Add, .. })));
        assert!(matches!(eval("1 < 2.0"), Err(VmError::TypeMismatch { op: Opcode::Lt, .. })));
        assert!(matches!(eval("\"a\" - \"b\""), Err(VmError::TypeMismatch { op: Opcode::Sub, .. })));
    }

    #[test]
    fn equality_across_tags() {
        assert_eq!(eval("1 == 1").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 == 1.0").unwrap(), Value::Bool(false));
        assert_eq!(eval("1 != 'a'").unwrap(), Value::Bool(true));
        assert_eq!(eval("nil == nil").unwrap(), Value::Bool(true));
        assert_eq!(eval("nil == false").unwrap(), Value::Bool(false));
        assert_eq!(eval("\"ab\" == \"ab\"").unwrap(), Value::Bool(true));
        assert_eq!(eval("\"a\" + \"b\" == \"ab\"").unwrap(), Value::Bool(true));
        assert_eq!(eval("\"ab\" != \"ba\"").unwrap(), Value::Bool(true));
    }

    #[test]
    fn ordering() {
        assert_eq!(eval("1 < 2").unwrap(), Value::Bool(true));
        assert_eq!(eval("2 <= 2").unwrap(), Value::Bool(true));
        assert_eq!(eval("1.5 > 2.5").unwrap(), Value::Bool(false));
        assert_eq!(eval("'b' >= 'a'").unwrap(), Value::Bool(true));
        assert_eq!(eval("\"abc\" < \"abd\"").unwrap(), Value::Bool(true));
        assert!(matches!(eval("true < false"), Err(VmError::TypeMismatch { .. })));
        assert!(matches!(eval("nil > nil"), Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn boolean_operators_are_eager_and_typed() {
        assert_eq!(eval("true and false").unwrap(), Value::Bool(false));
        assert_eq!(eval("false or true").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 < 2 and 2 < 3").unwrap(), Value::Bool(true));
        // both sides evaluated: the right operand's error surfaces
        assert!(matches!(eval("false and 1 / 0 == 0"), Err(VmError::DivisionByZero { .. })));
        assert!(matches!(eval("1 and true"), Err(VmError::TypeMismatch { op: Opcode::And, .. })));
    }

    #[test]
    fn not_and_neg() {
        assert_eq!(eval("not true").unwrap(), Value::Bool(false));
        assert_eq!(eval("not 0").unwrap(), Value::Bool(true));
        assert_eq!(eval("not nil").unwrap(), Value::Bool(true));
        assert!(matches!(eval("not \"s\""), Err(VmError::TypeMismatch { op: Opcode::Not, .. })));
        assert!(matches!(eval("-true"), Err(VmError::Bug { op: Opcode::Neg, .. })));
        assert!(matches!(eval("-'c'"), Err(VmError::Bug { .. })));
    }

    #[test]
    fn ternary_double_truthiness() {
        assert_eq!(eval_display("0.0 ? \"x\" : \"y\""), "y");
        assert_eq!(eval_display("1.0 ? \"x\" : \"y\""), "x");
        assert_eq!(eval_display("-0.0 ? \"x\" : \"y\""), "y");
    }

    #[test]
    fn nested_ternaries() {
        let src = "false ? 1 : true ? (false ? 2 : 3) : 4";
        assert_eq!(eval(src).unwrap(), Value::Int(3));
        assert_eq!(eval("(1 < 2 ? 'a' : 'b') == 'a' ? 10 : 20").unwrap(), Value::Int(10));
    }

    #[test]
    fn jz_on_string_is_type_error() {
        assert!(matches!(eval("\"s\" ? 1 : 2"), Err(VmError::TypeMismatch { op: Opcode::Jz, .. })));
    }

    #[test]
    fn every_consuming_opcode_checks_underflow() {
        for op in Opcode::ALL {
            let arity = match op {
                Opcode::Not | Opcode::Neg | Opcode::Jz => 1,
                Opcode::Halt
                | Opcode::Nil
                | Opcode::True
                | Opcode::False
                | Opcode::Const
                | Opcode::Jump => 0,
                _ => 2,
            };
            if arity == 0 {
                continue;
            }
            // Empty stack.
            let bc = assemble(&[op, Opcode::Halt]);
            let err = Vm::new(&bc).run().unwrap_err();
            assert_eq!(err, VmError::StackUnderflow { ip: 0, op }, "{op} on empty stack");
            // One short.
            if arity == 2 {
                let bc = assemble(&[Opcode::True, op, Opcode::Halt]);
                let err = Vm::new(&bc).run().unwrap_err();
                assert_eq!(err, VmError::StackUnderflow { ip: 1, op }, "{op} with one operand");
            }
        }
    }

    #[test]
    fn unknown_opcode() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Nil, 1).unwrap();
        bc.add_byte(0xC8, 1).unwrap();
        let err = Vm::new(&bc).run().unwrap_err();
        assert_eq!(err, VmError::UnknownOpcode { ip: 1, byte: 0xC8 });
    }

    #[test]
    fn running_off_the_end() {
        let bc = assemble(&[Opcode::Nil]);
        assert_eq!(Vm::new(&bc).run().unwrap_err(), VmError::OutOfBytecode { ip: 1 });
        let bc = Bytecode::new();
        assert_eq!(Vm::new(&bc).run().unwrap_err(), VmError::OutOfBytecode { ip: 0 });
    }

    #[test]
    fn truncated_operand() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Const, 1).unwrap();
        bc.add_byte(0, 1).unwrap();
        assert_eq!(Vm::new(&bc).run().unwrap_err(), VmError::OutOfBytecode { ip: 0 });
    }

    #[test]
    fn constant_index_out_of_range() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Const, 1).unwrap();
        bc.add_operand(3, 1).unwrap();
        bc.add_opcode(Opcode::Halt, 0).unwrap();
        assert_eq!(Vm::new(&bc).run().unwrap_err(), VmError::InvalidConstant { ip: 0, index: 3 });
    }

    #[test]
    fn step_budget_stops_backward_loop() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Nil, 1).unwrap();
        bc.add_opcode(Opcode::Jump, 1).unwrap();
        let at = bc.add_operand(0, 1).unwrap();
        bc.patch_jump(at, 0).unwrap();
        let mut vm = Vm::with_options(&bc, VmOptions { step_budget: Some(100) });
        assert_eq!(vm.run().unwrap_err(), VmError::StepBudgetExhausted { steps: 100 });
        assert_eq!(vm.steps(), 100);
    }

    #[test]
    fn step_budget_large_enough() {
        let bc = compile("1 + 2");
        let mut vm = Vm::with_options(&bc, VmOptions { step_budget: Some(4) });
        assert_eq!(vm.eval().unwrap(), Value::Int(3));
    }

    #[test]
    fn halt_on_empty_stack_yields_nil() {
        let bc = assemble(&[Opcode::Halt]);
        assert_eq!(Vm::new(&bc).eval().unwrap(), Value::Nil);
    }

    #[test]
    fn one_program_many_vms() {
        let bc = compile("\"x\" + \"y\"");
        let results: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut vm = Vm::new(&bc);
                        let w = vm.run().unwrap();
                        vm.display(w)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|r| r == "xy"));
    }

    #[test]
    fn error_messages_name_ip() {
        let err = eval("1 + 'a'").unwrap_err();
        assert_eq!(err.to_string(), "type mismatch at ip 10: ADD cannot combine int 1 and char 'a'");
    }
}
