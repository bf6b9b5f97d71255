//! Error types for signature parsing, value conversion and name validation
//!
//! Signature and name errors are structural: they indicate a malformed string
//! handed to the runtime and are never retried. Type errors are raised when a
//! value is read back as a Rust type whose signature differs from the stored one.

use thiserror::Error;

/// Malformed or truncated type signatures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature ended in the middle of a complete type
    #[error("Truncated signature '{signature}': complete type starting at offset {offset} is unterminated")]
    Truncated { signature: String, offset: usize },

    /// Character that is not part of the type grammar
    #[error("Unknown type code '{code}' at offset {offset} in signature '{signature}'")]
    UnknownCode {
        signature: String,
        code: char,
        offset: usize,
    },

    /// Closing `)` or `}` without a matching opener
    #[error("Unexpected '{code}' at offset {offset} in signature '{signature}'")]
    UnexpectedClose {
        signature: String,
        code: char,
        offset: usize,
    },

    /// `()` has no members
    #[error("Empty struct at offset {offset} in signature '{signature}'")]
    EmptyStruct { signature: String, offset: usize },

    /// Dictionary key is a container or variant
    #[error("Dictionary key at offset {offset} in signature '{signature}' must be a basic type")]
    DictKeyNotBasic { signature: String, offset: usize },

    /// `{..}` appearing anywhere but directly after `a`
    #[error("Dictionary entry outside of an array at offset {offset} in signature '{signature}'")]
    DictOutsideArray { signature: String, offset: usize },

    /// Dictionary entry with a member count other than two
    #[error("Dictionary entry at offset {offset} in signature '{signature}' must have exactly a key and a value")]
    DictArity { signature: String, offset: usize },

    /// Signature exceeds the 255 byte protocol limit
    #[error("Signature too long: {length} bytes exceeds maximum {max}")]
    TooLong { length: usize, max: usize },

    /// Array or struct nesting exceeds the protocol limit
    #[error("Signature '{signature}' nests {kind} deeper than {max} levels")]
    NestingTooDeep {
        signature: String,
        kind: &'static str,
        max: usize,
    },

    /// Expected exactly one complete type
    #[error("Signature '{signature}' is not a single complete type")]
    NotSingleType { signature: String },

    /// Offset outside the signature string
    #[error("Offset {offset} is outside signature '{signature}'")]
    OffsetOutOfRange { signature: String, offset: usize },
}

impl SignatureError {
    pub(crate) fn truncated(signature: &str, offset: usize) -> Self {
        Self::Truncated {
            signature: signature.to_string(),
            offset,
        }
    }

    pub(crate) fn unknown_code(signature: &str, code: u8, offset: usize) -> Self {
        Self::UnknownCode {
            signature: signature.to_string(),
            code: code as char,
            offset,
        }
    }

    pub(crate) fn nesting(signature: &str, kind: &'static str, max: usize) -> Self {
        Self::NestingTooDeep {
            signature: signature.to_string(),
            kind,
            max,
        }
    }
}

/// Failures converting between dynamic values and typed Rust values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Stored signature differs from the requested type's signature
    #[error("Type mismatch: expected '{expected}', found '{found}'")]
    Mismatch { expected: String, found: String },

    /// Variant holds no value
    #[error("Variant holds no value")]
    EmptyVariant,

    /// Container construction with a member of the wrong type
    #[error("Invalid {container}: member {index} has signature '{found}', expected '{expected}'")]
    InvalidMember {
        container: &'static str,
        index: usize,
        expected: String,
        found: String,
    },

    /// Structurally impossible value (empty struct, non-basic key)
    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl TypeError {
    /// Build a mismatch error from the two signatures
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Mismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Invalid object paths, interface/member/error names and bus names
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid {kind} '{value}': {reason}")]
pub struct NameError {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Result type for signature operations
pub type SignatureResult<T> = std::result::Result<T, SignatureError>;

/// Result type for value conversions
pub type TypeResult<T> = std::result::Result<T, TypeError>;
