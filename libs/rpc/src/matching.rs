//! Signal subscriptions
//!
//! Each subscription pairs a [`MatchRule`] with a handler. The rule is
//! registered twice: with the broker, so matching signals are routed to this
//! connection at all, and locally, so each delivered signal reaches only the
//! handlers whose rules it satisfies.
//!
//! Dispatch snapshots the matching handlers and releases the registry lock
//! before calling any of them, so handlers may add or drop subscriptions.

use crate::error::RpcResult;
use bus_codec::Message;
use bus_transport::{MatchRule, Transport};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callback run for every signal matching its rule
pub type SignalHandler = Arc<dyn Fn(&mut Message) + Send + Sync>;

struct MatchEntry {
    rule: MatchRule,
    handler: SignalHandler,
}

#[derive(Default)]
pub(crate) struct MatchRegistry {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, MatchEntry>>,
}

impl MatchRegistry {
    pub(crate) fn insert(&self, rule: MatchRule, handler: SignalHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, MatchEntry { rule, handler });
        id
    }

    pub(crate) fn remove(&self, id: u64) -> Option<MatchRule> {
        self.entries.lock().remove(&id).map(|entry| entry.rule)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Run every handler whose rule matches; returns how many ran
    pub(crate) fn dispatch<F>(&self, msg: &mut Message, resolve: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        let handlers: Vec<SignalHandler> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.rule.matches_with(msg, &resolve))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();

        for handler in &handlers {
            if let Err(e) = msg.rewind(true) {
                warn!(error = %e, "Cannot rewind signal for handler");
                break;
            }
            handler(msg);
        }
        handlers.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Registration handle for one subscription
///
/// Dropping the slot (or calling [`release`](Self::release)) removes the
/// local handler and the broker-side rule. [`detach`](Self::detach) hands
/// ownership to the connection: the subscription then lives as long as the
/// connection does.
pub struct MatchSlot {
    id: u64,
    registry: Weak<MatchRegistry>,
    transport: Weak<dyn Transport>,
    released: AtomicBool,
}

impl MatchSlot {
    pub(crate) fn new(id: u64, registry: &Arc<MatchRegistry>, transport: &Arc<dyn Transport>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
            transport: Arc::downgrade(transport),
            released: AtomicBool::new(false),
        }
    }

    /// Unregister now; later calls and the eventual drop do nothing
    pub fn release(&self) -> RpcResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let Some(rule) = registry.remove(self.id) else {
            return Ok(());
        };
        debug!(rule = %rule, "Removing signal subscription");
        match self.transport.upgrade() {
            Some(transport) if transport.is_open() => Ok(transport.remove_match(&rule)?),
            _ => Ok(()),
        }
    }

    /// Keep the subscription for the rest of the connection's life
    pub fn detach(self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

impl Drop for MatchSlot {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!(error = %e, "Failed to remove match rule on drop");
        }
    }
}

impl std::fmt::Debug for MatchSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSlot")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
