//! # Bus Transport
//!
//! ## Purpose
//!
//! The boundary between the RPC runtime and whatever actually carries bytes
//! between processes. The runtime depends only on the [`Transport`] trait;
//! backends implement framing, broker-side match filtering and name
//! negotiation behind it.
//!
//! ## Architecture Role
//!
//! ```text
//! bus-rpc (Connection) ──▶ [bus-transport] ──▶ MemoryBus broker ──▶ peer Transport
//!                               │
//!                               └── MatchRule (canonical filter text)
//! ```
//!
//! [`TransportFactory::open`] maps a [`BusKind`] and endpoint string to a
//! connected backend. Shipped backend: the in-process [`MemoryBus`], which
//! marshals every message to its wire form and parses it again on delivery.

pub mod error;
pub mod match_rule;
pub mod transports;

pub use error::{Result, TransportError};
pub use match_rule::MatchRule;
pub use transports::{
    name_flags, process_credentials, BusKind, MemoryBus, MemoryTransport, ReleaseNameReply,
    RequestNameReply, Transport, TransportFactory,
};
