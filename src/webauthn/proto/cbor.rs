//! Minimal CBOR decoder covering what `none`-attestation authenticators emit.
//!
//! Supported: unsigned and negative integers (inline, 1, 2 and 4 byte arguments), byte
//! strings, text strings, maps, `true`/`false`/`null`. Everything else, including
//! indefinite lengths, 8 byte arguments, arrays, tags and floats, is rejected with
//! [`CborError::UnsupportedLength`] or [`CborError::UnsupportedType`].

use byteorder::{BigEndian, ByteOrder};
use std::fmt::{Display, Formatter};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_MAP: u8 = 5;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;

const MAX_NESTING: usize = 16;
const MAX_PREALLOCATED_ENTRIES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CborError {
    UnexpectedEof,
    UnsupportedLength(u8),
    UnsupportedType(u8),
    InvalidUtf8,
    TrailingBytes(usize),
    NestingTooDeep,
    UnexpectedType(&'static str),
}

impl CborError {
    /// Whether the input is well-formed CBOR that falls outside the supported subset.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CborError::UnsupportedLength(_) | CborError::UnsupportedType(_))
    }
}

impl std::error::Error for CborError {}

impl Display for CborError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        use CborError::*;
        match self {
            UnexpectedEof => write!(f, "Truncated CBOR input"),
            UnsupportedLength(ai) => write!(f, "Unsupported CBOR length encoding (additional info {})", ai),
            UnsupportedType(major) => write!(f, "Unsupported CBOR type (major type {})", major),
            InvalidUtf8 => write!(f, "CBOR text string is not valid UTF-8"),
            TrailingBytes(n) => write!(f, "{} unexpected trailing bytes after CBOR item", n),
            NestingTooDeep => write!(f, "CBOR nesting exceeds {} levels", MAX_NESTING),
            UnexpectedType(expected) => write!(f, "Expected CBOR {}", expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    Text(String),
    Map(Vec<(Value, Value)>),
    Bool(bool),
    Null,
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries.as_slice()),
            _ => None,
        }
    }

    /// Looks up an integer-keyed entry, as COSE key maps are.
    pub fn get_int(&self, key: i64) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_integer() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn get_text(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v)
    }
}

/// Decodes exactly one item spanning the whole input.
pub fn from_slice(input: &[u8]) -> Result<Value, CborError> {
    let mut decoder = Decoder::new(input);
    let value = decoder.read_value()?;
    match decoder.remaining() {
        0 => Ok(value),
        n => Err(CborError::TrailingBytes(n)),
    }
}

pub struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Decoder {
            input,
            position: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CborError> {
        if self.remaining() < len {
            return Err(CborError::UnexpectedEof);
        }
        let slice = &self.input[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_header(&mut self) -> Result<(u8, u8), CborError> {
        let initial = self.take(1)?[0];
        Ok((initial >> 5, initial & 0x1f))
    }

    fn read_argument(&mut self, additional_info: u8) -> Result<u64, CborError> {
        match additional_info {
            0..=23 => Ok(additional_info as u64),
            24 => Ok(self.take(1)?[0] as u64),
            25 => Ok(BigEndian::read_u16(self.take(2)?) as u64),
            26 => Ok(BigEndian::read_u32(self.take(4)?) as u64),
            _ => Err(CborError::UnsupportedLength(additional_info)),
        }
    }

    fn read_len(&mut self, additional_info: u8) -> Result<usize, CborError> {
        let len = self.read_argument(additional_info)? as usize;
        if len > self.remaining() {
            return Err(CborError::UnexpectedEof);
        }
        Ok(len)
    }

    pub fn read_value(&mut self) -> Result<Value, CborError> {
        let (major, additional_info) = self.read_header()?;
        match major {
            MAJOR_UNSIGNED => Ok(Value::Integer(self.read_argument(additional_info)? as i64)),
            MAJOR_NEGATIVE => Ok(Value::Integer(-1 - self.read_argument(additional_info)? as i64)),
            MAJOR_BYTES => {
                let len = self.read_len(additional_info)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => {
                let len = self.read_len(additional_info)?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| CborError::InvalidUtf8)?;
                Ok(Value::Text(text.to_string()))
            }
            MAJOR_MAP => {
                let count = self.read_len(additional_info)?;
                self.enter()?;
                let mut entries = Vec::with_capacity(count.min(MAX_PREALLOCATED_ENTRIES));
                for _ in 0..count {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    entries.push((key, value));
                }
                self.depth -= 1;
                Ok(Value::Map(entries))
            }
            MAJOR_SIMPLE => match additional_info {
                SIMPLE_FALSE => Ok(Value::Bool(false)),
                SIMPLE_TRUE => Ok(Value::Bool(true)),
                SIMPLE_NULL => Ok(Value::Null),
                _ => Err(CborError::UnsupportedType(major)),
            },
            _ => Err(CborError::UnsupportedType(major)),
        }
    }

    /// Walks over one item without materializing it.
    pub fn skip_value(&mut self) -> Result<(), CborError> {
        let (major, additional_info) = self.read_header()?;
        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => self.read_argument(additional_info).map(|_| ()),
            MAJOR_BYTES | MAJOR_TEXT => {
                let len = self.read_len(additional_info)?;
                self.take(len).map(|_| ())
            }
            MAJOR_MAP => {
                let count = self.read_len(additional_info)?;
                self.enter()?;
                for _ in 0..count * 2 {
                    self.skip_value()?;
                }
                self.depth -= 1;
                Ok(())
            }
            MAJOR_SIMPLE => match additional_info {
                SIMPLE_FALSE | SIMPLE_TRUE | SIMPLE_NULL => Ok(()),
                _ => Err(CborError::UnsupportedType(major)),
            },
            _ => Err(CborError::UnsupportedType(major)),
        }
    }

    pub fn read_map_len(&mut self) -> Result<usize, CborError> {
        match self.read_header()? {
            (MAJOR_MAP, additional_info) => self.read_len(additional_info),
            (major, _) if !matches!(major, MAJOR_UNSIGNED | MAJOR_NEGATIVE | MAJOR_BYTES | MAJOR_TEXT | MAJOR_SIMPLE) => {
                Err(CborError::UnsupportedType(major))
            }
            _ => Err(CborError::UnexpectedType("map")),
        }
    }

    pub fn read_text(&mut self) -> Result<String, CborError> {
        match self.read_value()? {
            Value::Text(s) => Ok(s),
            _ => Err(CborError::UnexpectedType("text string")),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CborError> {
        match self.read_value()? {
            Value::Bytes(b) => Ok(b),
            _ => Err(CborError::UnexpectedType("byte string")),
        }
    }

    fn enter(&mut self) -> Result<(), CborError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CborError::NestingTooDeep);
        }
        Ok(())
    }
}
