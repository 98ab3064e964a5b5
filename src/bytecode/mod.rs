use std::fmt::{self, Write as _};

use crate::object::{Heap, ObjRef, Object};
use crate::value::{self, ObjectLookup, Style, Word};

pub mod persist;

/// Growth failure of a container array or heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of memory growing {what}")]
pub struct OutOfMemory {
    pub what: &'static str,
}

/// Width in bytes of the operand that follows `CONST`, `JUMP` and `JZ`.
pub const OPERAND_WIDTH: usize = 4;

// ── Opcodes ──────────────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Halt = 0,
    Nil,
    True,
    False,
    Not,
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Jump,
    Jz,
    Const,
}

impl Opcode {
    /// Every opcode, indexed by its byte value.
    pub const ALL: [Opcode; 21] = [
        Opcode::Halt,
        Opcode::Nil,
        Opcode::True,
        Opcode::False,
        Opcode::Not,
        Opcode::Neg,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Eq,
        Opcode::Neq,
        Opcode::Lt,
        Opcode::Lte,
        Opcode::Gt,
        Opcode::Gte,
        Opcode::And,
        Opcode::Or,
        Opcode::Jump,
        Opcode::Jz,
        Opcode::Const,
    ];

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::Nil => "NIL",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Not => "NOT",
            Opcode::Neg => "NEG",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::Lt => "LT",
            Opcode::Lte => "LTE",
            Opcode::Gt => "GT",
            Opcode::Gte => "GTE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Jump => "JUMP",
            Opcode::Jz => "JZ",
            Opcode::Const => "CONST",
        }
    }

    pub fn operand_width(self) -> usize {
        match self {
            Opcode::Const | Opcode::Jump | Opcode::Jz => OPERAND_WIDTH,
            _ => 0,
        }
    }

    /// Total instruction width: opcode byte plus operand.
    pub fn width(self) -> usize {
        1 + self.operand_width()
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Jz)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Absolute target of a jump whose operand starts at `operand_at`.
///
/// Offsets are measured from the jump's opcode byte, which sits directly
/// before the operand. `None` when the target would be negative.
pub fn jump_target(operand_at: usize, offset: u32) -> Option<usize> {
    let target = operand_at as i64 - 1 + offset as i32 as i64;
    usize::try_from(target).ok()
}

// ── Container ────────────────────────────────────────────────────────

/// Compiled program: instruction bytes, a line per byte, the constant pool
/// and the string literals the pool points at.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    code: Vec<u8>,
    lines: Vec<usize>,
    constants: Vec<Word>,
    objects: Heap,
}

/// Doubles the capacity of `v` (starting at 8) when it is full.
fn grow<T>(v: &mut Vec<T>, what: &'static str) -> Result<(), OutOfMemory> {
    if v.len() == v.capacity() {
        let extra = v.capacity().max(8);
        v.try_reserve_exact(extra).map_err(|_| OutOfMemory { what })?;
    }
    Ok(())
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        code: Vec<u8>,
        lines: Vec<usize>,
        constants: Vec<Word>,
        objects: Heap,
    ) -> Self {
        Bytecode { code, lines, constants, objects }
    }

    /// Appends `word` to the constant pool and returns its index. Equal
    /// constants are not merged.
    pub fn add_constant(&mut self, word: Word) -> Result<usize, OutOfMemory> {
        grow(&mut self.constants, "constant pool")?;
        self.constants.push(word);
        Ok(self.constants.len() - 1)
    }

    /// Appends one raw instruction byte tagged with `line`.
    pub fn add_byte(&mut self, byte: u8, line: usize) -> Result<(), OutOfMemory> {
        grow(&mut self.code, "instruction array")?;
        grow(&mut self.lines, "line table")?;
        self.code.push(byte);
        self.lines.push(line);
        Ok(())
    }

    pub fn add_opcode(&mut self, op: Opcode, line: usize) -> Result<(), OutOfMemory> {
        self.add_byte(op as u8, line)
    }

    /// Appends the low 32 bits of `value`, big-endian. Returns the position of
    /// the first operand byte.
    pub fn add_operand(&mut self, value: usize, line: usize) -> Result<usize, OutOfMemory> {
        let at = self.code.len();
        for byte in (value as u32).to_be_bytes() {
            self.add_byte(byte, line)?;
        }
        Ok(at)
    }

    /// Rewrites the operand at `at` so the jump owning it lands on `target`.
    /// Returns `None`, leaving the code untouched, when `at` is not an operand
    /// slot after an opcode or the offset does not fit in an `i32`.
    pub fn patch_jump(&mut self, at: usize, target: usize) -> Option<()> {
        let opcode_at = at.checked_sub(1)?;
        let slot = self.code.get_mut(at..at.checked_add(OPERAND_WIDTH)?)?;
        let offset = i32::try_from(target as i64 - opcode_at as i64).ok()?;
        slot.copy_from_slice(&offset.to_be_bytes());
        Some(())
    }

    /// Decodes the 4-byte operand starting at `at`.
    pub fn read_operand(&self, at: usize) -> Option<u32> {
        let bytes = self.code.get(at..at.checked_add(OPERAND_WIDTH)?)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Interns a string literal into the container's own heap.
    pub fn intern_str(&mut self, s: &str) -> Result<Word, OutOfMemory> {
        let r = self.objects.alloc_str(s)?;
        Ok(Word::object(r))
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    pub fn constants(&self) -> &[Word] {
        &self.constants
    }

    pub fn constant(&self, index: usize) -> Option<Word> {
        self.constants.get(index).copied()
    }

    pub fn objects(&self) -> &Heap {
        &self.objects
    }

    pub fn line_at(&self, ip: usize) -> Option<usize> {
        self.lines.get(ip).copied()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Human-readable listing. Jump operands are shown as absolute targets,
    /// `CONST` operands as the constant they select.
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "---- {name} ----");
        let _ = writeln!(
            out,
            "{:>5} |{:>5} |{:>14} |{:>14} |",
            "IP", "Line", "Instruction", "Operand"
        );

        let mut ip = 0;
        let mut prev_line = None;
        while ip < self.code.len() {
            let line = self.lines.get(ip).copied();
            let line_col = match line {
                Some(l) if prev_line != Some(l) => format!("{l:>5} |"),
                _ => "    - |".to_string(),
            };
            prev_line = line;

            let byte = self.code[ip];
            let Some(op) = Opcode::from_byte(byte) else {
                let _ = writeln!(
                    out,
                    "{ip:>5} |{line_col}{:>14} |{:>14} |",
                    "Unknown",
                    format!("0x{byte:02x}")
                );
                ip += 1;
                continue;
            };

            let operand = if op.operand_width() == 0 {
                "-----".to_string()
            } else {
                match self.read_operand(ip + 1) {
                    None => "<truncated>".to_string(),
                    Some(raw) if op == Opcode::Const => match self.constant(raw as usize) {
                        Some(w) => value::render(w, self, Style::Quoted),
                        None => format!("<bad #{raw}>"),
                    },
                    Some(raw) => match jump_target(ip + 1, raw) {
                        Some(target) => target.to_string(),
                        None => format!("<bad {}>", raw as i32),
                    },
                }
            };
            let _ = writeln!(out, "{ip:>5} |{line_col}{:>14} |{operand:>14} |", op.mnemonic());
            ip += op.width();
        }
        out
    }
}

impl ObjectLookup for Bytecode {
    fn object(&self, r: ObjRef) -> Option<&Object> {
        self.objects.get(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i);
            assert_eq!(Opcode::from_byte(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_byte(21), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn operand_is_big_endian_with_line_per_byte() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Const, 3).unwrap();
        let at = bc.add_operand(0x0102_0304, 3).unwrap();
        assert_eq!(at, 1);
        assert_eq!(bc.code(), &[Opcode::Const as u8, 1, 2, 3, 4]);
        assert_eq!(bc.lines(), &[3, 3, 3, 3, 3]);
        assert_eq!(bc.read_operand(1), Some(0x0102_0304));
        assert_eq!(bc.read_operand(2), None);
    }

    #[test]
    fn operand_keeps_low_32_bits() {
        let mut bc = Bytecode::new();
        bc.add_operand(0x1_0000_0007usize, 1).unwrap();
        assert_eq!(bc.read_operand(0), Some(7));
    }

    #[test]
    fn constants_are_not_deduplicated() {
        let mut bc = Bytecode::new();
        assert_eq!(bc.add_constant(Word::int(1)).unwrap(), 0);
        assert_eq!(bc.add_constant(Word::int(1)).unwrap(), 1);
        assert_eq!(bc.constants().len(), 2);
    }

    #[test]
    fn pool_grows_past_initial_capacity() {
        let mut bc = Bytecode::new();
        for i in 0..100 {
            assert_eq!(bc.add_constant(Word::int(i)).unwrap(), i as usize);
        }
        assert_eq!(bc.constant(99), Some(Word::int(99)));
    }

    #[test]
    fn patch_jump_forward() {
        // 0: JZ  <op@1>   5: NIL   6: HALT
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Jz, 1).unwrap();
        let at = bc.add_operand(0, 1).unwrap();
        bc.add_opcode(Opcode::Nil, 1).unwrap();
        bc.add_opcode(Opcode::Halt, 0).unwrap();
        bc.patch_jump(at, 6).unwrap();
        let raw = bc.read_operand(at).unwrap();
        assert_eq!(raw, 6);
        assert_eq!(jump_target(at, raw), Some(6));
    }

    #[test]
    fn patch_jump_backward() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Nil, 1).unwrap();
        bc.add_opcode(Opcode::Jump, 1).unwrap();
        let at = bc.add_operand(0, 1).unwrap();
        bc.patch_jump(at, 0).unwrap();
        let raw = bc.read_operand(at).unwrap();
        assert_eq!(raw as i32, -1);
        assert_eq!(jump_target(at, raw), Some(0));
    }

    #[test]
    fn patch_jump_rejects_bad_slot() {
        let mut bc = Bytecode::new();
        bc.add_opcode(Opcode::Jump, 1).unwrap();
        let at = bc.add_operand(0, 1).unwrap();
        assert_eq!(bc.patch_jump(0, 5), None);
        assert_eq!(bc.patch_jump(at + 1, 5), None);
        assert_eq!(bc.patch_jump(usize::MAX, 5), None);
        assert_eq!(bc.read_operand(at), Some(0));
    }

    #[test]
    fn jump_target_rejects_negative() {
        assert_eq!(jump_target(1, (-5i32) as u32), None);
    }

    #[test]
    fn disassemble_listing() {
        let mut bc = Bytecode::new();
        let s = bc.intern_str("hi").unwrap();
        let k = bc.add_constant(s).unwrap();
        bc.add_opcode(Opcode::Const, 1).unwrap();
        bc.add_operand(k, 1).unwrap();
        bc.add_opcode(Opcode::Not, 1).unwrap();
        bc.add_opcode(Opcode::Halt, 0).unwrap();
        let text = bc.disassemble("test");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "---- test ----");
        assert_eq!(lines[1], "   IP | Line |   Instruction |       Operand |");
        assert_eq!(lines[2], "    0 |    1 |         CONST |          \"hi\" |");
        assert_eq!(lines[3], "    5 |    - |           NOT |         ----- |");
        assert_eq!(lines[4], "    6 |    0 |          HALT |         ----- |");
    }

    #[test]
    fn disassemble_unknown_and_truncated() {
        let mut bc = Bytecode::new();
        bc.add_byte(0xEE, 1).unwrap();
        bc.add_opcode(Opcode::Jump, 1).unwrap();
        bc.add_byte(0, 1).unwrap();
        let text = bc.disassemble("bad");
        assert!(text.contains("Unknown"));
        assert!(text.contains("0xee"));
        assert!(text.contains("<truncated>"));
    }
}
