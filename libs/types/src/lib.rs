//! # Bus Types Library
//!
//! Type system shared by every layer of the bus RPC runtime: the signature
//! grammar, the dynamic [`Value`] union, [`Variant`], and validated bus names.
//!
//! ## Design Philosophy
//!
//! - **One signature per value**: every encodable value computes exactly one
//!   signature from its shape, and every signature parses into one tree
//! - **Closed union**: dynamic values are a tagged enum over the grammar, never
//!   untyped reflection
//! - **No coercion**: reading a value back as a Rust type with a different
//!   signature fails with [`TypeError::Mismatch`]
//! - **Validate once**: names and signatures are checked at construction and
//!   carried as newtypes afterwards
//!
//! ## Quick Start
//!
//! ```rust
//! use bus_types::{BusType, Signature, Variant};
//! use std::collections::HashMap;
//!
//! assert_eq!(<HashMap<String, Variant>>::signature(), "a{sv}");
//!
//! let v = Variant::new(5i32);
//! assert_eq!(v.get::<i32>().unwrap(), 5);
//! assert!(v.get::<f64>().is_err());
//!
//! let sig = Signature::new("a{s(ia(sv))}").unwrap();
//! assert!(sig.is_single_complete_type());
//! ```
//!
//! ## Integration Points
//!
//! - **bus-codec**: drives body marshalling from [`SignatureType`] trees
//! - **bus-transport**: uses the bus names and broker constants
//! - **bus-rpc**: method/property/signal signatures derive from [`BusType`]

pub mod common;
pub mod protocol;

pub use common::errors::{
    NameError, SignatureError, SignatureResult, TypeError, TypeResult,
};
pub use common::identifiers::{
    BusName, ErrorName, InterfaceName, MemberName, ObjectPath, UnixFd, MAX_NAME_LENGTH,
};
pub use protocol::constants::{self, error_names};
pub use protocol::*;
