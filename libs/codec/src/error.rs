//! Codec errors for message construction, body marshalling and wire framing
//!
//! Every failure carries enough context to locate the problem: the operation
//! that was attempted, the byte offset for decode failures, and both
//! signatures for type mismatches. Nothing here is retried automatically;
//! codec errors indicate a malformed message or a programming error.

use bus_types::{NameError, SignatureError, TypeError};
use thiserror::Error;

/// Message codec errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Malformed signature handed to the codec or found on the wire
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Requested type differs from the value at the cursor
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Invalid header name (path, interface, member, bus name)
    #[error(transparent)]
    Name(#[from] NameError),

    /// Container nesting misuse or cursor moved past the end of a scope
    #[error("Structural error during {operation}: {detail}")]
    Structural {
        operation: &'static str,
        detail: String,
    },

    /// Append attempted on a sealed message
    #[error("Message is sealed; call rewind(false) before appending")]
    Sealed,

    /// Read attempted on a message that has not been sealed
    #[error("Message is not sealed; seal it before reading")]
    NotSealed,

    /// Shallow copy read after its source was mutated or dropped
    #[error("Message copy is invalid: the message it shares a body with was {reason}")]
    Invalidated { reason: &'static str },

    /// Variant holding no value cannot be serialized
    #[error("Cannot serialize an empty variant: no value")]
    EmptyVariant,

    /// Buffer ends before the declared data
    #[error("Message truncated: need {need} bytes at offset {offset}, have {have} ({context})")]
    Truncated {
        need: usize,
        offset: usize,
        have: usize,
        context: &'static str,
    },

    /// Bytes that cannot be a valid encoding of the declared type
    #[error("Invalid encoding at offset {offset}: {detail}")]
    InvalidEncoding { offset: usize, detail: String },

    /// Fixed header or header-field problem
    #[error("Invalid message header: {0}")]
    InvalidHeader(String),

    /// Whole message exceeds the protocol maximum
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Array payload exceeds the protocol maximum
    #[error("Array too large: {size} bytes exceeds maximum {max}")]
    ArrayTooLarge { size: usize, max: usize },
}

impl CodecError {
    pub fn structural(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Structural {
            operation,
            detail: detail.into(),
        }
    }

    pub fn truncated(need: usize, offset: usize, have: usize, context: &'static str) -> Self {
        Self::Truncated {
            need,
            offset,
            have,
            context,
        }
    }

    pub fn invalid_encoding(offset: usize, detail: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            offset,
            detail: detail.into(),
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Type(TypeError::mismatch(expected, found))
    }

    /// Whether the caller asked for the wrong type (as opposed to a broken message)
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, CodecError::Type(_))
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
