//! # Type Signature Grammar
//!
//! ## Purpose
//!
//! Every value that crosses the bus is described by a signature string built
//! from a fixed alphabet:
//!
//! ```text
//! basic:      y b n q i u x t d s o g h
//! variant:    v
//! array:      a<complete type>
//! dictionary: a{<basic key><complete type>}
//! struct:     (<complete type>+)
//! ```
//!
//! This module validates signatures, parses them into a [`SignatureType`]
//! tree, and skips over one complete type at a time ([`parse_one`]) so the
//! message cursor can walk a body without materialising the whole tree.
//!
//! ## Limits
//!
//! - 255 bytes per signature
//! - 32 levels of array nesting, 32 levels of struct/dict-entry nesting
//! - dictionary entries only directly inside an array, keys must be basic

use crate::common::errors::{SignatureError, SignatureResult};
use std::fmt;

/// Maximum signature length in bytes
pub const MAX_SIGNATURE_LENGTH: usize = 255;
/// Maximum array nesting depth
pub const MAX_ARRAY_DEPTH: usize = 32;
/// Maximum struct (and dict-entry) nesting depth
pub const MAX_STRUCT_DEPTH: usize = 32;

/// Single-character, non-container type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BasicType {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
}

impl BasicType {
    /// Type code as it appears in a signature
    pub const fn code(self) -> char {
        match self {
            BasicType::Byte => 'y',
            BasicType::Boolean => 'b',
            BasicType::Int16 => 'n',
            BasicType::Uint16 => 'q',
            BasicType::Int32 => 'i',
            BasicType::Uint32 => 'u',
            BasicType::Int64 => 'x',
            BasicType::Uint64 => 't',
            BasicType::Double => 'd',
            BasicType::String => 's',
            BasicType::ObjectPath => 'o',
            BasicType::Signature => 'g',
            BasicType::UnixFd => 'h',
        }
    }

    /// Decode a type code
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'y' => BasicType::Byte,
            b'b' => BasicType::Boolean,
            b'n' => BasicType::Int16,
            b'q' => BasicType::Uint16,
            b'i' => BasicType::Int32,
            b'u' => BasicType::Uint32,
            b'x' => BasicType::Int64,
            b't' => BasicType::Uint64,
            b'd' => BasicType::Double,
            b's' => BasicType::String,
            b'o' => BasicType::ObjectPath,
            b'g' => BasicType::Signature,
            b'h' => BasicType::UnixFd,
            _ => return None,
        })
    }

    /// Wire alignment in bytes
    pub const fn alignment(self) -> usize {
        match self {
            BasicType::Byte | BasicType::Signature => 1,
            BasicType::Int16 | BasicType::Uint16 => 2,
            BasicType::Boolean
            | BasicType::Int32
            | BasicType::Uint32
            | BasicType::UnixFd
            | BasicType::String
            | BasicType::ObjectPath => 4,
            BasicType::Int64 | BasicType::Uint64 | BasicType::Double => 8,
        }
    }

    /// Encoded size for fixed-width types, `None` for string-like types
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            BasicType::Byte => Some(1),
            BasicType::Int16 | BasicType::Uint16 => Some(2),
            BasicType::Boolean | BasicType::Int32 | BasicType::Uint32 | BasicType::UnixFd => Some(4),
            BasicType::Int64 | BasicType::Uint64 | BasicType::Double => Some(8),
            BasicType::String | BasicType::ObjectPath | BasicType::Signature => None,
        }
    }
}

/// Parsed form of one complete type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Basic(BasicType),
    Variant,
    Array(Box<SignatureType>),
    Dict {
        key: BasicType,
        value: Box<SignatureType>,
    },
    Struct(Vec<SignatureType>),
}

impl SignatureType {
    /// Parse a string holding exactly one complete type
    pub fn parse(signature: &str) -> SignatureResult<SignatureType> {
        if signature.len() > MAX_SIGNATURE_LENGTH {
            return Err(SignatureError::TooLong {
                length: signature.len(),
                max: MAX_SIGNATURE_LENGTH,
            });
        }
        let mut parser = Parser::new(signature);
        let parsed = parser.complete_type()?;
        if parser.pos != signature.len() {
            return Err(SignatureError::NotSingleType {
                signature: signature.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Wire alignment of the first byte of a value of this type
    pub fn alignment(&self) -> usize {
        match self {
            SignatureType::Basic(basic) => basic.alignment(),
            SignatureType::Variant => 1,
            SignatureType::Array(_) | SignatureType::Dict { .. } => 4,
            SignatureType::Struct(_) => 8,
        }
    }

    /// Whether this is one of the single-character basic codes
    pub fn is_basic(&self) -> bool {
        matches!(self, SignatureType::Basic(_))
    }

    /// Render back into signature text
    pub fn write_to(&self, out: &mut String) {
        match self {
            SignatureType::Basic(basic) => out.push(basic.code()),
            SignatureType::Variant => out.push('v'),
            SignatureType::Array(element) => {
                out.push('a');
                element.write_to(out);
            }
            SignatureType::Dict { key, value } => {
                out.push_str("a{");
                out.push(key.code());
                value.write_to(out);
                out.push('}');
            }
            SignatureType::Struct(members) => {
                out.push('(');
                for member in members {
                    member.write_to(out);
                }
                out.push(')');
            }
        }
    }

    /// Render as a [`Signature`]
    pub fn to_signature(&self) -> Signature {
        let mut out = String::new();
        self.write_to(&mut out);
        Signature(out)
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}

impl From<BasicType> for SignatureType {
    fn from(basic: BasicType) -> Self {
        SignatureType::Basic(basic)
    }
}

/// A validated sequence of zero or more complete types
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Signature(String);

impl Signature {
    /// Validate a signature string
    pub fn new(signature: impl Into<String>) -> SignatureResult<Self> {
        let signature = signature.into();
        validate(&signature)?;
        Ok(Self(signature))
    }

    /// The empty signature (no values)
    pub fn empty() -> Self {
        Self(String::new())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse every top-level complete type
    pub fn types(&self) -> SignatureResult<Vec<SignatureType>> {
        let mut parser = Parser::new(&self.0);
        let mut out = Vec::new();
        while parser.pos < self.0.len() {
            out.push(parser.complete_type()?);
        }
        Ok(out)
    }

    /// Whether the signature is exactly one complete type
    pub fn is_single_complete_type(&self) -> bool {
        !self.0.is_empty() && parse_one(&self.0, 0).map(|n| n == self.0.len()).unwrap_or(false)
    }

    /// Append another signature, re-validating the length limit
    pub fn concat(&self, other: &Signature) -> SignatureResult<Signature> {
        Signature::new(format!("{}{}", self.0, other.0))
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Signature {
    type Err = SignatureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Signature::new(value)
    }
}

impl TryFrom<&str> for Signature {
    type Error = SignatureError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Signature::new(value)
    }
}

impl PartialEq<str> for Signature {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Signature {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<SignatureType> for Signature {
    fn from(value: SignatureType) -> Self {
        value.to_signature()
    }
}

/// Length of the complete type that starts at `offset`
///
/// Handles types that open with `a`, `(` or `{` by tracking nesting, and fails
/// on truncated or malformed input instead of reading past the end.
pub fn parse_one(signature: &str, offset: usize) -> SignatureResult<usize> {
    if offset >= signature.len() {
        return Err(SignatureError::OffsetOutOfRange {
            signature: signature.to_string(),
            offset,
        });
    }
    let mut parser = Parser::new(signature);
    parser.pos = offset;
    parser.complete_type()?;
    Ok(parser.pos - offset)
}

/// Split a signature into the text of each top-level complete type
pub fn split_complete_types(signature: &str) -> SignatureResult<Vec<&str>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < signature.len() {
        let len = parse_one(signature, offset)?;
        out.push(&signature[offset..offset + len]);
        offset += len;
    }
    Ok(out)
}

fn validate(signature: &str) -> SignatureResult<()> {
    if signature.len() > MAX_SIGNATURE_LENGTH {
        return Err(SignatureError::TooLong {
            length: signature.len(),
            max: MAX_SIGNATURE_LENGTH,
        });
    }
    let mut parser = Parser::new(signature);
    while parser.pos < signature.len() {
        parser.complete_type()?;
    }
    Ok(())
}

/// Recursive-descent parser over signature bytes
struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    array_depth: usize,
    struct_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            array_depth: 0,
            struct_depth: 0,
        }
    }

    fn complete_type(&mut self) -> SignatureResult<SignatureType> {
        let start = self.pos;
        let Some(&code) = self.bytes.get(self.pos) else {
            return Err(SignatureError::truncated(self.text, start));
        };
        self.pos += 1;

        if let Some(basic) = BasicType::from_code(code) {
            return Ok(SignatureType::Basic(basic));
        }

        match code {
            b'v' => Ok(SignatureType::Variant),
            b'a' => {
                self.array_depth += 1;
                if self.array_depth > MAX_ARRAY_DEPTH {
                    return Err(SignatureError::nesting(self.text, "arrays", MAX_ARRAY_DEPTH));
                }
                let parsed = if self.bytes.get(self.pos) == Some(&b'{') {
                    self.dict_entry()?
                } else {
                    SignatureType::Array(Box::new(self.complete_type()?))
                };
                self.array_depth -= 1;
                Ok(parsed)
            }
            b'(' => {
                self.enter_struct()?;
                let mut members = Vec::new();
                loop {
                    match self.bytes.get(self.pos) {
                        None => return Err(SignatureError::truncated(self.text, start)),
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => members.push(self.complete_type()?),
                    }
                }
                self.struct_depth -= 1;
                if members.is_empty() {
                    return Err(SignatureError::EmptyStruct {
                        signature: self.text.to_string(),
                        offset: start,
                    });
                }
                Ok(SignatureType::Struct(members))
            }
            b'{' => Err(SignatureError::DictOutsideArray {
                signature: self.text.to_string(),
                offset: start,
            }),
            b')' | b'}' => Err(SignatureError::UnexpectedClose {
                signature: self.text.to_string(),
                code: code as char,
                offset: start,
            }),
            other => Err(SignatureError::unknown_code(self.text, other, start)),
        }
    }

    /// Parses `{kv}`; the cursor sits on the opening brace
    fn dict_entry(&mut self) -> SignatureResult<SignatureType> {
        let start = self.pos;
        self.pos += 1;
        self.enter_struct()?;

        let Some(&key_code) = self.bytes.get(self.pos) else {
            return Err(SignatureError::truncated(self.text, start));
        };
        let Some(key) = BasicType::from_code(key_code) else {
            if matches!(key_code, b'a' | b'(' | b'v' | b'{') {
                return Err(SignatureError::DictKeyNotBasic {
                    signature: self.text.to_string(),
                    offset: self.pos,
                });
            }
            if key_code == b'}' {
                return Err(SignatureError::DictArity {
                    signature: self.text.to_string(),
                    offset: start,
                });
            }
            return Err(SignatureError::unknown_code(self.text, key_code, self.pos));
        };
        self.pos += 1;

        match self.bytes.get(self.pos) {
            None => return Err(SignatureError::truncated(self.text, start)),
            Some(b'}') => {
                return Err(SignatureError::DictArity {
                    signature: self.text.to_string(),
                    offset: start,
                })
            }
            Some(_) => {}
        }
        let value = self.complete_type()?;

        match self.bytes.get(self.pos) {
            None => Err(SignatureError::truncated(self.text, start)),
            Some(b'}') => {
                self.pos += 1;
                self.struct_depth -= 1;
                Ok(SignatureType::Dict {
                    key,
                    value: Box::new(value),
                })
            }
            Some(_) => Err(SignatureError::DictArity {
                signature: self.text.to_string(),
                offset: start,
            }),
        }
    }

    fn enter_struct(&mut self) -> SignatureResult<()> {
        self.struct_depth += 1;
        if self.struct_depth > MAX_STRUCT_DEPTH {
            return Err(SignatureError::nesting(self.text, "structs", MAX_STRUCT_DEPTH));
        }
        Ok(())
    }
}
