//! Transport Error Types
//!
//! Failures raised by transport backends: closed connections, frames the
//! codec rejects, malformed match rules and unknown bus endpoints.

use bus_codec::CodecError;
use bus_types::NameError;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The local endpoint was closed; no further I/O is possible
    #[error("Transport closed: {context}")]
    Closed { context: String },

    /// The bus this endpoint was attached to has gone away
    #[error("Disconnected from bus '{bus}'")]
    Disconnected { bus: String },

    /// Outgoing message could not be framed or incoming frame could not be parsed
    #[error("Frame error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid bus name passed to a name operation
    #[error(transparent)]
    Name(#[from] NameError),

    /// Match rule text that does not parse
    #[error("Invalid match rule '{rule}': {reason}")]
    InvalidMatchRule { rule: String, reason: String },

    /// Endpoint string that names no known bus
    #[error("Unknown bus endpoint '{endpoint}': {reason}")]
    UnknownEndpoint { endpoint: String, reason: String },

    /// Operation the bus refuses for this endpoint
    #[error("Operation '{operation}' rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a closed error
    pub fn closed(context: impl Into<String>) -> Self {
        Self::Closed {
            context: context.into(),
        }
    }

    /// Create an invalid match rule error
    pub fn invalid_match_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMatchRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown endpoint error
    pub fn unknown_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnknownEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a rejected operation error
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether the connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Disconnected { .. })
    }
}
