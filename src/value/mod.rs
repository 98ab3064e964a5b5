use std::fmt;

use crate::object::{ObjRef, Object};

// ── NaN-boxed word ───────────────────────────────────────────────────
//
// Every runtime value lives in one u64. Bit patterns whose top 14 bits
// are all set (the QNAN mask) are reserved for tags; everything else is a
// plain IEEE 754 double. The tag is the top 16 bits, the payload the low 48.
// Objects additionally set the sign bit so they can never collide with the
// positive quiet-NaN tags.

const QNAN: u64 = 0x7FFC_0000_0000_0000;
const TAG_NIL: u64 = 0x7FFC_0000_0000_0000;
const TAG_BOOL: u64 = 0x7FFD_0000_0000_0000;
const TAG_CHAR: u64 = 0x7FFE_0000_0000_0000;
const TAG_INT: u64 = 0x7FFF_0000_0000_0000;
const TAG_OBJECT: u64 = 0xFFFC_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// NaN produced by arithmetic is folded onto this pattern, which sits outside
/// the tag space.
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// The dynamic type of a [`Word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Nil,
    Bool,
    Char,
    Int,
    Double,
    Object,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tag::Nil => "nil",
            Tag::Bool => "bool",
            Tag::Char => "char",
            Tag::Int => "int",
            Tag::Double => "double",
            Tag::Object => "object",
        })
    }
}

/// A tagged 64-bit runtime value. Copy, no ownership: an object word is only
/// a handle, the referent belongs to whichever heap allocated it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word(u64);

impl Word {
    #[inline]
    pub fn nil() -> Self {
        Word(TAG_NIL)
    }

    #[inline]
    pub fn boolean(b: bool) -> Self {
        Word(TAG_BOOL | b as u64)
    }

    #[inline]
    pub fn char(c: u8) -> Self {
        Word(TAG_CHAR | c as u64)
    }

    #[inline]
    pub fn int(i: i32) -> Self {
        Word(TAG_INT | (i as u32) as u64)
    }

    #[inline]
    pub fn double(d: f64) -> Self {
        if d.is_nan() {
            Word(CANONICAL_NAN)
        } else {
            Word(d.to_bits())
        }
    }

    #[inline]
    pub fn object(r: ObjRef) -> Self {
        Word(TAG_OBJECT | r.index() as u64)
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == TAG_NIL
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        self.0 & TAG_MASK == TAG_BOOL
    }

    #[inline]
    pub fn is_char(self) -> bool {
        self.0 & TAG_MASK == TAG_CHAR
    }

    #[inline]
    pub fn is_int(self) -> bool {
        self.0 & TAG_MASK == TAG_INT
    }

    #[inline]
    pub fn is_double(self) -> bool {
        self.0 & QNAN != QNAN
    }

    #[inline]
    pub fn is_object(self) -> bool {
        self.0 & TAG_MASK == TAG_OBJECT
    }

    /// Truthiness. Doubles are truthy when nonzero; every other tag is truthy
    /// when its payload is nonzero. Only meaningful for non-object words.
    #[inline]
    pub fn as_bool(self) -> bool {
        if self.is_double() {
            self.as_double() != 0.0
        } else {
            self.0 & PAYLOAD_MASK != 0
        }
    }

    #[inline]
    pub fn as_char(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub fn as_int(self) -> i32 {
        self.0 as u32 as i32
    }

    #[inline]
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub fn as_object(self) -> ObjRef {
        ObjRef::new((self.0 & PAYLOAD_MASK) as u32)
    }

    pub fn tag(self) -> Tag {
        if self.is_double() {
            return Tag::Double;
        }
        match self.0 & TAG_MASK {
            TAG_NIL => Tag::Nil,
            TAG_BOOL => Tag::Bool,
            TAG_CHAR => Tag::Char,
            TAG_INT => Tag::Int,
            _ => Tag::Object,
        }
    }

    /// Raw bit pattern, for serialization.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds a word from raw bits, rejecting patterns no constructor
    /// produces (unknown tags, out-of-range payloads).
    pub fn from_bits(bits: u64) -> Option<Self> {
        if bits & QNAN != QNAN {
            return Some(Word(bits));
        }
        let payload = bits & PAYLOAD_MASK;
        let ok = match bits & TAG_MASK {
            TAG_NIL => payload == 0,
            TAG_BOOL => payload <= 1,
            TAG_CHAR => payload <= u8::MAX as u64,
            TAG_INT | TAG_OBJECT => payload <= u32::MAX as u64,
            _ => false,
        };
        ok.then_some(Word(bits))
    }

    pub fn unpack(self) -> Value {
        match self.tag() {
            Tag::Nil => Value::Nil,
            Tag::Bool => Value::Bool(self.as_bool()),
            Tag::Char => Value::Char(self.as_char()),
            Tag::Int => Value::Int(self.as_int()),
            Tag::Double => Value::Double(self.as_double()),
            Tag::Object => Value::Object(self.as_object()),
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:?})", self.unpack())
    }
}

// ── Public value type ────────────────────────────────────────────────

/// The unpacked view of a [`Word`]. This is what callers outside the VM see;
/// the bit layout stays private to this module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Char(u8),
    Int(i32),
    Double(f64),
    Object(ObjRef),
}

impl Value {
    /// Numeric view of ints and doubles.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(i as f64),
            Value::Double(d) => Some(d),
            _ => None,
        }
    }
}

impl From<Value> for Word {
    fn from(value: Value) -> Word {
        match value {
            Value::Nil => Word::nil(),
            Value::Bool(b) => Word::boolean(b),
            Value::Char(c) => Word::char(c),
            Value::Int(i) => Word::int(i),
            Value::Double(d) => Word::double(d),
            Value::Object(r) => Word::object(r),
        }
    }
}

impl From<Word> for Value {
    fn from(word: Word) -> Value {
        word.unpack()
    }
}

// ── Rendering ────────────────────────────────────────────────────────

/// Anything that can resolve an object handle: a heap, a bytecode container's
/// literal table, a running VM.
pub trait ObjectLookup {
    fn object(&self, r: ObjRef) -> Option<&Object>;
}

/// How strings and chars are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Program output: `abcd`, `x`.
    Plain,
    /// Listings: `"abcd"`, `'x'`.
    Quoted,
}

pub fn render(word: Word, objects: &dyn ObjectLookup, style: Style) -> String {
    match word.unpack() {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Char(c) => match style {
            Style::Plain => (c as char).to_string(),
            Style::Quoted => format!("'{}'", c as char),
        },
        Value::Int(i) => i.to_string(),
        Value::Double(d) => format!("{d:?}"),
        Value::Object(r) => match objects.object(r) {
            Some(Object::Str(s)) => match style {
                Style::Plain => s.clone(),
                Style::Quoted => format!("{s:?}"),
            },
            None => format!("<dangling #{}>", r.index()),
        },
    }
}
