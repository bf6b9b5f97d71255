//! Transport Contract
//!
//! The runtime reaches the bus only through [`Transport`]. A backend moves
//! framed messages, keeps the broker informed of match rules and exported
//! paths, and negotiates well-known names.
//!
//! ```text
//! Connection ──send(Message)──▶ Transport ──frame──▶ broker ──frame──▶ Transport ──receive()──▶ Connection
//! ```
//!
//! [`TransportFactory::open`] resolves a [`BusKind`] and optional endpoint
//! string to a connected backend. The only backend shipped here is the
//! in-process [`MemoryBus`].

use crate::error::{Result, TransportError};
use crate::match_rule::MatchRule;
use bus_codec::Message;
use bus_types::ObjectPath;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod credentials;
pub mod memory;


pub use credentials::process_credentials;
pub use memory::{MemoryBus, MemoryTransport};

/// Flags for [`Transport::request_name`]
pub mod name_flags {
    /// Let a later requester with `REPLACE_EXISTING` take the name over
    pub const ALLOW_REPLACEMENT: u32 = 0x1;
    /// Take the name from its current owner if that owner allows it
    pub const REPLACE_EXISTING: u32 = 0x2;
    /// Fail instead of waiting in the owner queue
    pub const DO_NOT_QUEUE: u32 = 0x4;
}

/// Outcome of a name request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner = 1,
    InQueue = 2,
    Exists = 3,
    AlreadyOwner = 4,
}

/// Outcome of a name release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseNameReply {
    Released = 1,
    NonExistent = 2,
    NotOwner = 3,
}

/// Minimal interface a bus backend must satisfy
pub trait Transport: Send + Sync {
    /// Unique name assigned by the bus (`:1.N`)
    fn unique_name(&self) -> String;

    /// Frame and send; assigns a serial when the message has none
    fn send(&self, msg: Message) -> Result<u32>;

    /// Next incoming message, `None` when `timeout` elapses first
    fn receive(&self, timeout: Duration) -> Result<Option<Message>>;

    /// Ask the broker to route signals matching `rule` to this endpoint
    fn add_match(&self, rule: &MatchRule) -> Result<()>;

    /// Drop one registration of `rule`
    fn remove_match(&self, rule: &MatchRule) -> Result<()>;

    fn request_name(&self, name: &str, flags: u32) -> Result<RequestNameReply>;

    fn release_name(&self, name: &str) -> Result<ReleaseNameReply>;

    /// Unique name currently owning `name`
    fn name_owner(&self, name: &str) -> Option<String>;

    /// Announce that objects are served at `path`
    fn export_path(&self, path: &ObjectPath) -> Result<()>;

    fn unexport_path(&self, path: &ObjectPath) -> Result<()>;

    /// Disconnect; idempotent
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Which bus to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// Session bus of the current user
    Default,
    System,
    Session,
    /// Private bus named by the endpoint string
    Direct,
}

/// Endpoint scheme understood by the factory
pub const MEMORY_SCHEME: &str = "memory:";

/// Transport factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    /// Connect to the bus selected by `kind`, or by `endpoint` when given
    ///
    /// Endpoints have the form `memory:name=<bus>`. `Direct` requires one.
    pub fn open(kind: BusKind, endpoint: Option<&str>) -> Result<Arc<dyn Transport>> {
        let bus_name = match (kind, endpoint) {
            (_, Some(endpoint)) => Self::parse_endpoint(endpoint)?,
            (BusKind::System, None) => "system".to_string(),
            (BusKind::Default | BusKind::Session, None) => "session".to_string(),
            (BusKind::Direct, None) => {
                return Err(TransportError::unknown_endpoint(
                    "",
                    "a direct connection needs an endpoint",
                ))
            }
        };
        debug!(?kind, bus = %bus_name, "Opening transport");
        let transport = MemoryBus::named(&bus_name).connect()?;
        Ok(Arc::new(transport))
    }

    /// Bus name from `memory:name=<bus>`
    pub fn parse_endpoint(endpoint: &str) -> Result<String> {
        let Some(params) = endpoint.strip_prefix(MEMORY_SCHEME) else {
            return Err(TransportError::unknown_endpoint(
                endpoint,
                "only in-process memory endpoints are supported",
            ));
        };
        params
            .split(',')
            .find_map(|kv| kv.strip_prefix("name="))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransportError::unknown_endpoint(endpoint, "missing name=<bus>"))
    }
}
