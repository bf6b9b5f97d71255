//! # Bus Message Codec
//!
//! ## Purpose
//!
//! The "rules" layer between typed values and bytes on the wire:
//! - Message construction with signature validation on every append
//! - Cursor-based reading with container enter/exit and strict type checks
//! - Body marshalling following the bus alignment rules
//! - Frame encoding/decoding with header-field validation
//! - Shallow/deep message copies with invalidation of stale shallow copies
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network → libs/rpc
//!     ↑           ↓            ↓
//! Signatures   Message      Transport
//! Values       Frames       Routing
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Transport logic or socket handling (belongs in libs/network)
//! - Call correlation, dispatch or vtables (belongs in libs/rpc)
//!
//! ## Example
//!
//! ```rust
//! use bus_codec::{Message, MessageKind};
//!
//! let mut call = Message::method_call(
//!     Some("org.example.Calc"),
//!     "/org/example/calc",
//!     Some("org.example.Calc"),
//!     "Multiply",
//! )?;
//! call.append(&-1024i64)?;
//! call.append(&3.24f64)?;
//! call.seal()?;
//! call.set_serial(1);
//!
//! let mut decoded = Message::decode(&call.encode()?)?;
//! assert_eq!(decoded.kind(), MessageKind::MethodCall);
//! assert_eq!(decoded.read::<i64>()?, -1024);
//! # Ok::<(), bus_codec::CodecError>(())
//! ```
//!
//! ## Performance Profile
//!
//! Appends and reads are linear in the encoded size: array lengths are
//! patched in place rather than re-encoded, and bodies are validated in a
//! single pass on decode. Dictionaries with tens of thousands of entries
//! encode and decode without quadratic behaviour (see `benches/`).

pub mod arguments;
pub mod error;
pub mod frame;
pub mod marshal;
pub mod message;
pub mod variant;

pub use arguments::{Arguments, FromArguments};
pub use error::{CodecError, CodecResult};
pub use frame::{frame_length, FIXED_HEADER_LENGTH, MAX_MESSAGE_LENGTH, PROTOCOL_VERSION};
pub use marshal::MAX_ARRAY_LENGTH;
pub use message::{flags, ContainerKind, Credentials, Message, MessageKind};
pub use variant::Marshal;
