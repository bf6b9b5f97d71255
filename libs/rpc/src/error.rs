//! RPC errors
//!
//! [`RpcError`] is what callers see; [`MethodError`] is what handlers return
//! and what travels back to the caller as an error reply.
//!
//! ```text
//! codec / structural ──▶ ErrorKind::Structural     (never retried)
//! wrong requested type ─▶ ErrorKind::TypeMismatch
//! peer error reply ────▶ ErrorKind::Remote          (name + message as sent)
//! deadline / NoReply ──▶ ErrorKind::Timeout
//! connection lost ─────▶ ErrorKind::Transport       (fails every pending call)
//! ```

use bus_codec::{CodecError, Message};
use bus_transport::TransportError;
use bus_types::{error_names, NameError, SignatureError, TypeError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error categories callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Structural,
    TypeMismatch,
    Remote,
    Timeout,
    Transport,
    Cancelled,
}

/// Errors surfaced by connections, proxies and objects
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer answered with an error reply
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// No reply before the deadline, or the bus reported one of its timeout errors
    #[error("Method call timed out: {detail}")]
    Timeout { detail: String },

    #[error("Call was cancelled")]
    Cancelled,

    /// Operation not allowed in the current connection or object state
    #[error("Invalid state for {operation}: {detail}")]
    State {
        operation: &'static str,
        detail: String,
    },

    /// Rejected vtable, property or match registration
    #[error("Invalid registration: {0}")]
    Registration(String),
}

impl RpcError {
    pub fn state(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::State {
            operation,
            detail: detail.into(),
        }
    }

    pub fn registration(detail: impl Into<String>) -> Self {
        Self::Registration(detail.into())
    }

    pub fn timeout_after(timeout: Duration) -> Self {
        Self::Timeout {
            detail: format!("no reply within {timeout:?}"),
        }
    }

    /// Convert an error reply; timeout-flavoured names become [`RpcError::Timeout`]
    pub fn from_error_reply(reply: &Message) -> Self {
        let name = reply
            .error_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| error_names::FAILED.to_string());
        let message = reply.error_message().unwrap_or_default();
        match name.as_str() {
            error_names::TIMEOUT | error_names::TIMED_OUT | error_names::NO_REPLY => {
                Self::Timeout {
                    detail: format!("{name}: {message}"),
                }
            }
            _ => Self::Remote { name, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Codec(e) if e.is_type_mismatch() => ErrorKind::TypeMismatch,
            Self::Codec(_) | Self::Name(_) | Self::State { .. } | Self::Registration(_) => {
                ErrorKind::Structural
            }
            Self::Type(_) => ErrorKind::TypeMismatch,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Error name of a remote error reply
    pub fn remote_name(&self) -> Option<&str> {
        match self {
            Self::Remote { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<SignatureError> for RpcError {
    fn from(err: SignatureError) -> Self {
        Self::Codec(err.into())
    }
}

/// Result type for RPC operations
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Error returned by a handler, sent to the caller as an error reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodError {
    pub name: String,
    pub message: String,
}

impl MethodError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_names::FAILED, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(error_names::INVALID_ARGS, message)
    }

    pub fn unknown_property(message: impl Into<String>) -> Self {
        Self::new(error_names::UNKNOWN_PROPERTY, message)
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for MethodError {}

impl From<RpcError> for MethodError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { name, message } => Self::new(name, message),
            RpcError::Codec(_) | RpcError::Type(_) | RpcError::Name(_) => {
                Self::invalid_args(err.to_string())
            }
            RpcError::Timeout { detail } => Self::new(error_names::TIMEOUT, detail),
            other => Self::failed(other.to_string()),
        }
    }
}

impl From<CodecError> for MethodError {
    fn from(err: CodecError) -> Self {
        RpcError::from(err).into()
    }
}
