//! # Bus RPC
//!
//! ## Purpose
//!
//! Typed request/response and publish/subscribe over a message bus. A
//! [`Connection`] is one endpoint; a [`Proxy`] calls methods, reads and writes
//! properties and subscribes to signals of a remote object; an [`Object`]
//! serves interfaces described by [`VTable`]s.
//!
//! ## Architecture Role
//!
//! ```text
//!   application values
//!         │  BusType / Arguments (bus-types, bus-codec)
//!         ▼
//!   Proxy ──call──▶ Connection ──▶ Transport ══ bus ══ Transport ──▶ Connection ──▶ Object / VTable
//!     ▲                 │ pending table                                   │ handler
//!     └──── reply ──────┘◀══════════════════════ reply / error ═══════════┘
//! ```
//!
//! ## Threading
//!
//! - One dispatch thread per connection while the event loop runs; handlers,
//!   signal callbacks and async-call callbacks run there
//! - Blocking calls are safe from any thread, including from handlers
//! - Without an event loop, async calls run on a small worker pool
//!
//! ## Quick Start
//!
//! ```rust
//! use bus_rpc::{Connection, Method, Object, Proxy, RpcConfig, VTable};
//! use bus_transport::MemoryBus;
//! use std::sync::Arc;
//!
//! let bus = MemoryBus::new();
//! let server = Connection::with_transport(Arc::new(bus.connect().unwrap()), RpcConfig::default());
//! let client = Connection::with_transport(Arc::new(bus.connect().unwrap()), RpcConfig::default());
//!
//! let object = Object::new(&server, "/org/example/calc").unwrap();
//! let _slot = object
//!     .add_vtable(
//!         "org.example.Calculator",
//!         VTable::new().method(Method::new("Multiply", |(a, b): (i64, f64)| Ok((a as f64 * b,)))),
//!     )
//!     .unwrap();
//! server.enter_event_loop_async().unwrap();
//!
//! let proxy = Proxy::new(&client, server.unique_name(), "/org/example/calc").unwrap();
//! let (product,): (f64,) = proxy
//!     .call_method("org.example.Calculator", "Multiply", (-1024i64, 3.24f64))
//!     .unwrap();
//! assert!((product - -3317.76).abs() < 1e-9);
//! ```

pub mod connection;
pub mod error;
pub mod matching;
pub mod object;
pub mod pending;
pub mod proxy;
mod worker;

pub use connection::{Connection, ConnectionState};
pub use error::{ErrorKind, MethodError, RpcError, RpcResult};
pub use matching::{MatchSlot, SignalHandler};
pub use object::{AsyncReply, Method, Object, Property, PropertyUpdate, Signal, VTable, VTableSlot};
pub use pending::{PendingAsyncCall, ReplyFuture};
pub use proxy::{ManagedObjects, Proxy};

pub use bus_codec::{Arguments, FromArguments, Message, MessageKind};
pub use bus_config::RpcConfig;
pub use bus_transport::{BusKind, MatchRule};
pub use bus_types::{error_names, BusType, ObjectPath, Signature, Variant};
