//! In-process Message Bus
//!
//! [`MemoryBus`] is a broker living inside the process. Each
//! [`MemoryTransport`] is one connection to it: frames travel as encoded
//! bytes through per-connection queues, so every message crossing the bus is
//! marshalled and parsed exactly as it would be on a socket.
//!
//! ## Broker Duties
//!
//! ```text
//!  :1.1 ──send──▶ route ──destination?──▶ resolve owner ──▶ :1.2 inbox
//!                   │                         └─ none ──▶ ServiceUnknown to :1.1
//!                   ├─ no destination, signal ──▶ every peer with a matching rule
//!                   └─ org.freedesktop.DBus ──▶ bus driver (GetNameOwner, ListNames, ...)
//! ```
//!
//! - Unique names `:1.N` are assigned at connect time
//! - Well-known names follow owner-queue semantics with replacement flags
//! - `NameOwnerChanged`, `NameAcquired` and `NameLost` come from the driver
//! - Callers waiting on a peer that disconnects receive `NoReply`
//! - Sender credentials are captured at connect and attached on delivery

use crate::error::{Result, TransportError};
use crate::match_rule::MatchRule;
use crate::transports::{
    name_flags, process_credentials, ReleaseNameReply, RequestNameReply, Transport,
};
use bus_codec::{CodecResult, Credentials, Message, MessageKind};
use bus_types::{constants, error_names, BusName, ObjectPath};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Named buses shared by every [`TransportFactory`](crate::TransportFactory) caller
static BUSES: Lazy<DashMap<String, Arc<MemoryBus>>> = Lazy::new(DashMap::new);

static PRIVATE_BUS_ID: AtomicU64 = AtomicU64::new(1);

struct Delivery {
    frame: Bytes,
    credentials: Option<Arc<Credentials>>,
}

struct Peer {
    inbox: Sender<Delivery>,
    rules: Vec<MatchRule>,
    credentials: Arc<Credentials>,
    exported: HashSet<ObjectPath>,
}

struct NameEntry {
    owner: String,
    owner_flags: u32,
    queue: VecDeque<(String, u32)>,
}

#[derive(Default)]
struct BusState {
    peers: HashMap<String, Peer>,
    names: HashMap<String, NameEntry>,
    /// (caller, call serial) -> callee, for calls still owed a reply
    awaiting_reply: HashMap<(String, u32), String>,
}

impl BusState {
    fn resolve(&self, name: &str) -> Option<String> {
        if name == constants::BUS_NAME {
            return Some(name.to_string());
        }
        if name.starts_with(':') {
            return self.peers.contains_key(name).then(|| name.to_string());
        }
        self.names.get(name).map(|entry| entry.owner.clone())
    }

    fn deliver(&self, to: &str, frame: Bytes, credentials: Option<Arc<Credentials>>) {
        match self.peers.get(to) {
            Some(peer) => {
                if peer.inbox.send(Delivery { frame, credentials }).is_err() {
                    debug!(peer = to, "Inbox closed, dropping frame");
                }
            }
            None => debug!(peer = to, "No such peer, dropping frame"),
        }
    }

    fn broadcast(&self, msg: &Message, frame: Bytes, credentials: Option<Arc<Credentials>>) {
        let resolve = |name: &str| self.resolve(name);
        let mut delivered = 0usize;
        for (unique, peer) in &self.peers {
            if peer.rules.iter().any(|rule| rule.matches_with(msg, &resolve)) {
                let delivery = Delivery {
                    frame: frame.clone(),
                    credentials: credentials.clone(),
                };
                if peer.inbox.send(delivery).is_err() {
                    debug!(peer = %unique, "Inbox closed, dropping broadcast");
                }
                delivered += 1;
            }
        }
        debug!(
            member = ?msg.member().map(|m| m.as_str()),
            recipients = delivered,
            "Broadcast signal"
        );
    }
}

/// In-process broker
pub struct MemoryBus {
    name: String,
    next_peer: AtomicU64,
    next_serial: AtomicU32,
    state: Mutex<BusState>,
}

impl MemoryBus {
    fn create(name: String) -> Self {
        Self {
            name,
            next_peer: AtomicU64::new(1),
            next_serial: AtomicU32::new(1),
            state: Mutex::new(BusState::default()),
        }
    }

    /// Private bus reachable only through the returned handle
    pub fn new() -> Arc<Self> {
        let id = PRIVATE_BUS_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self::create(format!("private-{id}")))
    }

    /// Process-wide bus registered under `name`, created on first use
    pub fn named(name: &str) -> Arc<Self> {
        BUSES
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Self::create(name.to_string())))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect with the credentials of this process
    pub fn connect(self: &Arc<Self>) -> Result<MemoryTransport> {
        self.connect_with_credentials(process_credentials())
    }

    /// Connect presenting the given credentials to peers
    pub fn connect_with_credentials(
        self: &Arc<Self>,
        credentials: Credentials,
    ) -> Result<MemoryTransport> {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let unique_name = format!(":1.{id}");
        let (tx, rx) = unbounded();

        let mut state = self.state.lock();
        state.peers.insert(
            unique_name.clone(),
            Peer {
                inbox: tx,
                rules: Vec::new(),
                credentials: Arc::new(credentials),
                exported: HashSet::new(),
            },
        );
        self.owner_changed(&state, &unique_name, "", &unique_name);
        drop(state);

        info!(bus = %self.name, unique_name = %unique_name, "Peer connected");
        Ok(MemoryTransport {
            bus: Arc::clone(self),
            unique_name,
            inbox: rx,
            open: AtomicBool::new(true),
            next_serial: AtomicU32::new(1),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Unique name owning `name`; unique names own themselves
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.state.lock().resolve(name)
    }

    /// Every name with an owner, the driver included, sorted
    pub fn list_names(&self) -> Vec<String> {
        let state = self.state.lock();
        Self::names_in(&state)
    }

    fn names_in(state: &BusState) -> Vec<String> {
        let mut names: Vec<String> = state
            .peers
            .keys()
            .chain(state.names.keys())
            .cloned()
            .chain(std::iter::once(constants::BUS_NAME.to_string()))
            .collect();
        names.sort();
        names
    }

    /// Paths `unique_name` has exported, sorted
    pub fn exported_paths(&self, unique_name: &str) -> Vec<ObjectPath> {
        let state = self.state.lock();
        let mut paths: Vec<ObjectPath> = state
            .peers
            .get(unique_name)
            .map(|peer| peer.exported.iter().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn allocate_serial(&self) -> u32 {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    fn route(&self, from: &str, msg: &Message, frame: Bytes) {
        let mut state = self.state.lock();
        let credentials = state.peers.get(from).map(|peer| Arc::clone(&peer.credentials));

        if matches!(msg.kind(), MessageKind::MethodReturn | MessageKind::Error) {
            if let (Some(dest), Some(reply_serial)) = (msg.destination(), msg.reply_serial()) {
                state
                    .awaiting_reply
                    .remove(&(dest.to_string(), reply_serial));
            }
        }

        let wants_reply = msg.kind() == MessageKind::MethodCall && msg.expects_reply();
        match msg.destination() {
            Some(dest) if dest.as_str() == constants::BUS_NAME => {
                self.driver_call(&state, from, msg)
            }
            Some(dest) => match state.resolve(dest) {
                Some(owner) => {
                    if wants_reply {
                        state
                            .awaiting_reply
                            .insert((from.to_string(), msg.serial()), owner.clone());
                    }
                    state.deliver(&owner, frame, credentials);
                }
                None if wants_reply => {
                    debug!(destination = %dest, serial = msg.serial(), "Unknown destination");
                    let text = format!("The name {dest} was not provided by any service");
                    self.send_from_driver(&state, || {
                        Message::error(msg.serial(), Some(from), error_names::SERVICE_UNKNOWN, &text)
                    });
                }
                None => debug!(destination = %dest, "Dropping message for unknown destination"),
            },
            None => match msg.kind() {
                MessageKind::Signal => state.broadcast(msg, frame, credentials),
                MessageKind::MethodCall => self.driver_call(&state, from, msg),
                kind => warn!(?kind, serial = msg.serial(), "Dropping reply without destination"),
            },
        }
    }

    /// Frame a driver-originated message and route it
    fn send_from_driver<F>(&self, state: &BusState, build: F)
    where
        F: FnOnce() -> CodecResult<Message>,
    {
        let framed = build().and_then(|mut msg| {
            msg.set_sender(constants::BUS_NAME)?;
            msg.set_serial(self.allocate_serial());
            msg.seal()?;
            let frame = Bytes::from(msg.encode()?);
            Ok((msg, frame))
        });
        match framed {
            Ok((msg, frame)) => match msg.destination() {
                Some(dest) => {
                    if let Some(owner) = state.resolve(dest) {
                        state.deliver(&owner, frame, None);
                    }
                }
                None => state.broadcast(&msg, frame, None),
            },
            Err(e) => warn!(error = %e, "Failed to build bus driver message"),
        }
    }

    fn driver_signal(member: &str, destination: Option<&str>, args: &[&str]) -> CodecResult<Message> {
        let mut msg = Message::signal(constants::BUS_PATH, constants::BUS_INTERFACE, member)?;
        msg.set_destination(destination)?;
        for arg in args {
            msg.append(&arg.to_string())?;
        }
        Ok(msg)
    }

    fn owner_changed(&self, state: &BusState, name: &str, old: &str, new: &str) {
        if !old.is_empty() && old != name {
            self.send_from_driver(state, || {
                Self::driver_signal(constants::NAME_LOST, Some(old), &[name])
            });
        }
        self.send_from_driver(state, || {
            Self::driver_signal(constants::NAME_OWNER_CHANGED, None, &[name, old, new])
        });
        if !new.is_empty() && new != name {
            self.send_from_driver(state, || {
                Self::driver_signal(constants::NAME_ACQUIRED, Some(new), &[name])
            });
        }
        debug!(bus = %self.name, name, old, new, "Name owner changed");
    }

    /// Methods of `org.freedesktop.DBus` and `org.freedesktop.DBus.Peer`
    fn driver_call(&self, state: &BusState, from: &str, call: &Message) {
        if call.kind() != MessageKind::MethodCall {
            return;
        }
        let member = call.member().map(|m| m.as_str()).unwrap_or_default();
        let interface = call.interface().map(|i| i.as_str());
        let arg0 = call
            .values()
            .ok()
            .and_then(|values| values.into_iter().next())
            .and_then(|v| v.as_str().map(str::to_string));

        let reply = |build: &dyn Fn(&mut Message) -> CodecResult<()>| -> CodecResult<Message> {
            let mut reply = call.create_reply()?;
            build(&mut reply)?;
            Ok(reply)
        };
        let error = |name: &str, text: String| call.create_error_reply(name, &text);

        let response = match (interface, member, arg0) {
            (Some(constants::PEER_INTERFACE), constants::PEER_PING, _) => reply(&|_| Ok(())),
            (None | Some(constants::BUS_INTERFACE), "GetNameOwner", Some(name)) => {
                match state.resolve(&name) {
                    Some(owner) => reply(&|r| r.append(&owner)),
                    None => error(
                        error_names::NAME_HAS_NO_OWNER,
                        format!("Could not get owner of name '{name}': no such name"),
                    ),
                }
            }
            (None | Some(constants::BUS_INTERFACE), "NameHasOwner", Some(name)) => {
                let owned = state.resolve(&name).is_some();
                reply(&|r| r.append(&owned))
            }
            (None | Some(constants::BUS_INTERFACE), "ListNames", _) => {
                let names = Self::names_in(state);
                reply(&|r| r.append(&names))
            }
            (_, member, _) => error(
                error_names::UNKNOWN_METHOD,
                format!("Method '{member}' is not provided by the bus"),
            ),
        };
        if call.expects_reply() {
            self.send_from_driver(state, || response);
        }
        debug!(from, member, "Bus driver call handled");
    }

    fn check_peer(state: &BusState, unique_name: &str, operation: &'static str) -> Result<()> {
        if state.peers.contains_key(unique_name) {
            Ok(())
        } else {
            Err(TransportError::closed(operation))
        }
    }

    fn request_name(&self, from: &str, name: &str, flags: u32) -> Result<RequestNameReply> {
        let name = BusName::new(name)?;
        if name.is_unique() || name.as_str() == constants::BUS_NAME {
            return Err(TransportError::rejected(
                "request_name",
                format!("'{name}' cannot be owned"),
            ));
        }

        let mut state = self.state.lock();
        Self::check_peer(&state, from, "request_name")?;
        let Some(entry) = state.names.get_mut(name.as_str()) else {
            state.names.insert(
                name.to_string(),
                NameEntry {
                    owner: from.to_string(),
                    owner_flags: flags,
                    queue: VecDeque::new(),
                },
            );
            self.owner_changed(&state, &name, "", from);
            return Ok(RequestNameReply::PrimaryOwner);
        };

        if entry.owner == from {
            entry.owner_flags = flags;
            return Ok(RequestNameReply::AlreadyOwner);
        }

        let replace = flags & name_flags::REPLACE_EXISTING != 0
            && entry.owner_flags & name_flags::ALLOW_REPLACEMENT != 0;
        if replace {
            let old = std::mem::replace(&mut entry.owner, from.to_string());
            let old_flags = std::mem::replace(&mut entry.owner_flags, flags);
            entry.queue.retain(|(queued, _)| queued != from);
            if old_flags & name_flags::DO_NOT_QUEUE == 0 {
                entry.queue.push_front((old.clone(), old_flags));
            }
            self.owner_changed(&state, &name, &old, from);
            return Ok(RequestNameReply::PrimaryOwner);
        }

        if flags & name_flags::DO_NOT_QUEUE != 0 {
            return Ok(RequestNameReply::Exists);
        }
        match entry.queue.iter_mut().find(|(queued, _)| queued == from) {
            Some(queued) => queued.1 = flags,
            None => entry.queue.push_back((from.to_string(), flags)),
        }
        Ok(RequestNameReply::InQueue)
    }

    fn release_name(&self, from: &str, name: &str) -> Result<ReleaseNameReply> {
        let name = BusName::new(name)?;
        let mut state = self.state.lock();
        Self::check_peer(&state, from, "release_name")?;
        let Some(entry) = state.names.get_mut(name.as_str()) else {
            return Ok(ReleaseNameReply::NonExistent);
        };
        if entry.owner != from {
            let before = entry.queue.len();
            entry.queue.retain(|(queued, _)| queued != from);
            return Ok(if entry.queue.len() < before {
                ReleaseNameReply::Released
            } else {
                ReleaseNameReply::NotOwner
            });
        }
        self.hand_over(&mut state, &name, from);
        Ok(ReleaseNameReply::Released)
    }

    /// Pass `name` from `from` to the next queued requester, or drop it
    fn hand_over(&self, state: &mut BusState, name: &str, from: &str) {
        let next = state
            .names
            .get_mut(name)
            .and_then(|entry| entry.queue.pop_front());
        match next {
            Some((next_owner, next_flags)) => {
                if let Some(entry) = state.names.get_mut(name) {
                    entry.owner = next_owner.clone();
                    entry.owner_flags = next_flags;
                }
                self.owner_changed(state, name, from, &next_owner);
            }
            None => {
                state.names.remove(name);
                self.owner_changed(state, name, from, "");
            }
        }
    }

    fn update_peer<F>(&self, unique_name: &str, operation: &'static str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Peer),
    {
        let mut state = self.state.lock();
        let peer = state
            .peers
            .get_mut(unique_name)
            .ok_or_else(|| TransportError::closed(operation))?;
        update(peer);
        Ok(())
    }

    fn disconnect(&self, unique_name: &str) {
        let mut state = self.state.lock();
        if state.peers.remove(unique_name).is_none() {
            return;
        }

        let owned: Vec<String> = state
            .names
            .iter()
            .filter(|(_, entry)| entry.owner == unique_name)
            .map(|(name, _)| name.clone())
            .collect();
        for entry in state.names.values_mut() {
            entry.queue.retain(|(queued, _)| queued != unique_name);
        }
        for name in owned {
            self.hand_over(&mut state, &name, unique_name);
        }

        let orphaned: Vec<(String, u32)> = state
            .awaiting_reply
            .iter()
            .filter(|(_, callee)| callee.as_str() == unique_name)
            .map(|(key, _)| key.clone())
            .collect();
        state.awaiting_reply.retain(|(caller, _), callee| {
            caller != unique_name && callee.as_str() != unique_name
        });
        for (caller, serial) in orphaned {
            debug!(caller = %caller, serial, "Callee disconnected before replying");
            self.send_from_driver(&state, || {
                Message::error(
                    serial,
                    Some(caller.as_str()),
                    error_names::NO_REPLY,
                    "Message recipient disconnected from message bus without replying",
                )
            });
        }

        self.owner_changed(&state, unique_name, unique_name, "");
        info!(bus = %self.name, unique_name, "Peer disconnected");
    }
}

/// One connection to a [`MemoryBus`]
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
    unique_name: String,
    inbox: Receiver<Delivery>,
    open: AtomicBool,
    next_serial: AtomicU32,
}

impl MemoryTransport {
    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::closed(operation))
        }
    }

    fn allocate_serial(&self) -> u32 {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn unique_name(&self) -> String {
        self.unique_name.clone()
    }

    fn send(&self, mut msg: Message) -> Result<u32> {
        self.ensure_open("send")?;
        if msg.serial() == 0 {
            msg.set_serial(self.allocate_serial());
        }
        msg.set_sender(&self.unique_name)?;
        msg.seal()?;
        let frame = Bytes::from(msg.encode()?);
        debug!(
            serial = msg.serial(),
            kind = ?msg.kind(),
            destination = ?msg.destination().map(|d| d.as_str()),
            member = ?msg.member().map(|m| m.as_str()),
            bytes = frame.len(),
            "Sending frame"
        );
        self.bus.route(&self.unique_name, &msg, frame);
        Ok(msg.serial())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Message>> {
        self.ensure_open("receive")?;
        match self.inbox.recv_timeout(timeout) {
            Ok(delivery) => {
                let mut msg = Message::decode(&delivery.frame)?;
                if let Some(credentials) = delivery.credentials {
                    msg.set_credentials(credentials.as_ref().clone());
                }
                Ok(Some(msg))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.open.store(false, Ordering::Release);
                Err(TransportError::Disconnected {
                    bus: self.bus.name.clone(),
                })
            }
        }
    }

    fn add_match(&self, rule: &MatchRule) -> Result<()> {
        self.ensure_open("add_match")?;
        debug!(rule = %rule, "Adding match rule");
        self.bus
            .update_peer(&self.unique_name, "add_match", |peer| peer.rules.push(rule.clone()))
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<()> {
        self.ensure_open("remove_match")?;
        let mut found = false;
        self.bus.update_peer(&self.unique_name, "remove_match", |peer| {
            if let Some(idx) = peer.rules.iter().position(|r| r == rule) {
                peer.rules.remove(idx);
                found = true;
            }
        })?;
        if found {
            Ok(())
        } else {
            Err(TransportError::rejected(
                "remove_match",
                format!("rule {rule} is not registered"),
            ))
        }
    }

    fn request_name(&self, name: &str, flags: u32) -> Result<RequestNameReply> {
        self.ensure_open("request_name")?;
        self.bus.request_name(&self.unique_name, name, flags)
    }

    fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        self.ensure_open("release_name")?;
        self.bus.release_name(&self.unique_name, name)
    }

    fn name_owner(&self, name: &str) -> Option<String> {
        self.bus.owner_of(name)
    }

    fn export_path(&self, path: &ObjectPath) -> Result<()> {
        self.ensure_open("export_path")?;
        self.bus.update_peer(&self.unique_name, "export_path", |peer| {
            peer.exported.insert(path.clone());
        })
    }

    fn unexport_path(&self, path: &ObjectPath) -> Result<()> {
        self.ensure_open("unexport_path")?;
        self.bus.update_peer(&self.unique_name, "unexport_path", |peer| {
            peer.exported.remove(path);
        })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.bus.disconnect(&self.unique_name);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
