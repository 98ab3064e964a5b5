//! On-disk form of a compiled [`Bytecode`] container.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! "RUJA" version:u8
//! code:      len:u32 byte*
//! lines:     len:u32 u32*          (len == code len)
//! constants: len:u32 u64*          (raw word bits)
//! objects:   len:u32 (kind:u8 len:u32 byte*)*
//! ```

use std::path::Path;

use tracing::debug;

use super::Bytecode;
use crate::object::{Heap, Object};
use crate::value::Word;

pub const MAGIC: &[u8; 4] = b"RUJA";
pub const VERSION: u8 = 1;

const KIND_STR: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read bytecode: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a ruja bytecode file")]
    BadMagic,
    #[error("unsupported bytecode version {0} (expected {VERSION})")]
    UnsupportedVersion(u8),
    #[error("bytecode truncated in {section}")]
    Truncated { section: &'static str },
    #[error("{extra} unexpected trailing bytes")]
    TrailingBytes { extra: usize },
    #[error("line table has {lines} entries for {code} instruction bytes")]
    LineTableMismatch { code: usize, lines: usize },
    #[error("constant {index} has invalid bits {bits:#018x}")]
    InvalidConstant { index: usize, bits: u64 },
    #[error("constant {index} refers to missing object #{object}")]
    DanglingObject { index: usize, object: u32 },
    #[error("object {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },
    #[error("object {index} has unknown kind {kind}")]
    UnknownObjectKind { index: usize, kind: u8 },
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, section: &'static str) -> Result<&'a [u8], LoadError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        let end = end.ok_or(LoadError::Truncated { section })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, section: &'static str) -> Result<u8, LoadError> {
        Ok(self.take(1, section)?[0])
    }

    fn u32(&mut self, section: &'static str) -> Result<u32, LoadError> {
        let b = self.take(4, section)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, section: &'static str) -> Result<u64, LoadError> {
        let b = self.take(8, section)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn len(&mut self, section: &'static str) -> Result<usize, LoadError> {
        Ok(self.u32(section)? as usize)
    }
}

impl Bytecode {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.code.len() * 5 + self.constants.len() * 8);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);

        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);

        out.extend_from_slice(&(self.lines.len() as u32).to_be_bytes());
        for &line in &self.lines {
            let line = u32::try_from(line).unwrap_or(u32::MAX);
            out.extend_from_slice(&line.to_be_bytes());
        }

        out.extend_from_slice(&(self.constants.len() as u32).to_be_bytes());
        for w in &self.constants {
            out.extend_from_slice(&w.to_bits().to_be_bytes());
        }

        out.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());
        for (_, obj) in self.objects.iter() {
            match obj {
                Object::Str(s) => {
                    out.push(KIND_STR);
                    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Bytecode, LoadError> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(MAGIC.len(), "header").map_err(|_| LoadError::BadMagic)? != MAGIC {
            return Err(LoadError::BadMagic);
        }
        let version = r.u8("header")?;
        if version != VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let n = r.len("code")?;
        let code = r.take(n, "code")?.to_vec();

        let n = r.len("lines")?;
        if n != code.len() {
            return Err(LoadError::LineTableMismatch { code: code.len(), lines: n });
        }
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            lines.push(r.u32("lines")? as usize);
        }

        let n = r.len("constants")?;
        let mut constants = Vec::with_capacity(n.min(bytes.len() / 8));
        for index in 0..n {
            let bits = r.u64("constants")?;
            let w = Word::from_bits(bits).ok_or(LoadError::InvalidConstant { index, bits })?;
            constants.push(w);
        }

        let n = r.len("objects")?;
        let mut objects = Heap::new();
        for index in 0..n {
            let kind = r.u8("objects")?;
            if kind != KIND_STR {
                return Err(LoadError::UnknownObjectKind { index, kind });
            }
            let len = r.len("objects")?;
            let raw = r.take(len, "objects")?;
            let s = std::str::from_utf8(raw).map_err(|_| LoadError::InvalidUtf8 { index })?;
            objects
                .alloc_str(s)
                .map_err(|_| LoadError::Truncated { section: "objects" })?;
        }

        if r.pos != bytes.len() {
            return Err(LoadError::TrailingBytes { extra: bytes.len() - r.pos });
        }

        for (index, w) in constants.iter().enumerate() {
            if w.is_object() && !objects.contains(w.as_object()) {
                return Err(LoadError::DanglingObject { index, object: w.as_object().index() });
            }
        }

        debug!(
            code = code.len(),
            constants = constants.len(),
            objects = objects.len(),
            "bytecode loaded"
        );
        Ok(Bytecode::from_parts(code, lines, constants, objects))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Bytecode, LoadError> {
        let bytes = std::fs::read(path)?;
        Bytecode::from_bytes(&bytes)
    }
}
