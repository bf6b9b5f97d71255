//! # Connection
//!
//! ## Purpose
//!
//! One endpoint on a bus. Owns the dispatch loop, the pending-call table, the
//! signal subscription registry and the object registry, and bridges the
//! [`Transport`] to typed callbacks.
//!
//! ## Lifecycle
//!
//! ```text
//! open() ──▶ Open ──enter_event_loop_async()──▶ EventLoopRunning
//!             ▲                                        │
//!             └────────── leave_event_loop() ◀─────────┘
//! close() / last handle dropped ──▶ Closed (every pending call fails)
//! ```
//!
//! ## Routing
//!
//! ```text
//! Transport::receive ──▶ dispatch ─┬─ MethodReturn/Error ──▶ pending table (by reply serial)
//!                                  ├─ MethodCall ──────────▶ Peer | Object at path | UnknownObject
//!                                  └─ Signal ──────────────▶ every matching subscription
//! ```
//!
//! Without a running event loop, blocking calls drive the transport
//! themselves, and a worker from the pool drives it for asynchronous calls.
//! Leaving the loop hands calls still in flight to a worker the same way.
//!
//! ## Lock Ordering
//!
//! Each table (pending calls, subscriptions, objects, loop control) has its
//! own lock, taken only for the table operation itself. No lock is held while
//! a handler, callback or transport send runs. The pump lock is held only
//! around `Transport::receive`, never during dispatch.

use crate::error::{RpcError, RpcResult};
use crate::matching::{MatchRegistry, MatchSlot, SignalHandler};
use crate::object::vtable::DeferredReply;
use crate::object::{self, ObjectInner};
use crate::pending::{CallState, PendingAsyncCall};
use crate::worker::WorkerPool;
use bus_codec::{Message, MessageKind};
use bus_config::RpcConfig;
use bus_transport::{
    name_flags, BusKind, MatchRule, ReleaseNameReply, RequestNameReply, Transport, TransportFactory,
};
use bus_types::{constants, error_names, ObjectPath};
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    EventLoopRunning,
}

type ReplyCallback = Box<dyn FnOnce(RpcResult<Message>) + Send + 'static>;
type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_MESSAGE: RefCell<Vec<Message>> = const { RefCell::new(Vec::new()) };
}

/// Keeps the message being dispatched visible to `current_message()`
struct CurrentMessageGuard {
    pushed: bool,
}

impl CurrentMessageGuard {
    fn enter(msg: &Message) -> Self {
        let pushed = match msg.shallow_copy() {
            Ok(copy) => {
                CURRENT_MESSAGE.with(|stack| stack.borrow_mut().push(copy));
                true
            }
            Err(e) => {
                debug!(error = %e, "Cannot expose message being dispatched");
                false
            }
        };
        Self { pushed }
    }
}

impl Drop for CurrentMessageGuard {
    fn drop(&mut self) {
        if self.pushed {
            CURRENT_MESSAGE.with(|stack| stack.borrow_mut().pop());
        }
    }
}

/// Rendezvous between the dispatching thread and one blocked caller
#[derive(Default)]
struct ReplySlot {
    result: Mutex<Option<RpcResult<Message>>>,
    ready: Condvar,
}

impl ReplySlot {
    fn fill(&self, result: RpcResult<Message>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn take(&self) -> Option<RpcResult<Message>> {
        self.result.lock().take()
    }

    fn wait_until(&self, deadline: Instant) -> Option<RpcResult<Message>> {
        let mut result = self.result.lock();
        if result.is_none() {
            self.ready.wait_until(&mut result, deadline);
        }
        result.take()
    }
}

enum PendingReply {
    Blocking(Arc<ReplySlot>),
    Async {
        state: Arc<CallState>,
        callback: ReplyCallback,
        deadline: Instant,
    },
}

impl PendingReply {
    fn complete(self, result: RpcResult<Message>) {
        match self {
            PendingReply::Blocking(slot) => slot.fill(result),
            PendingReply::Async {
                state, callback, ..
            } => {
                if state.try_complete() {
                    callback(result);
                }
            }
        }
    }
}

struct LoopControl {
    stop: Arc<AtomicBool>,
    thread: ThreadId,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct ConnectionInner {
    transport: Arc<dyn Transport>,
    config: RpcConfig,
    unique_name: String,
    next_serial: AtomicU32,
    call_timeout_us: AtomicU64,
    pending: Mutex<HashMap<u32, PendingReply>>,
    deferred: Mutex<Vec<Arc<DeferredReply>>>,
    pub(crate) matches: Arc<MatchRegistry>,
    pub(crate) objects: DashMap<ObjectPath, Weak<ObjectInner>>,
    event_loop: Mutex<Option<LoopControl>>,
    pump: Mutex<()>,
    tasks: Sender<Task>,
    task_queue: Receiver<Task>,
    workers: OnceCell<WorkerPool>,
    closed: AtomicBool,
}

impl ConnectionInner {
    fn allocate_serial(&self) -> u32 {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    pub(crate) fn config(&self) -> &RpcConfig {
        &self.config
    }

    fn method_call_timeout(&self) -> Duration {
        Duration::from_micros(self.call_timeout_us.load(Ordering::Relaxed))
    }

    fn effective_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| self.method_call_timeout())
    }

    fn is_loop_running(&self) -> bool {
        self.event_loop.lock().is_some()
    }

    /// True when this thread must drive the transport to make progress
    fn must_pump(&self) -> bool {
        match self.event_loop.lock().as_ref() {
            None => true,
            Some(control) => control.thread == thread::current().id(),
        }
    }

    pub(crate) fn send(&self, mut msg: Message) -> RpcResult<u32> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::state("send", "connection is closed"));
        }
        if msg.serial() == 0 {
            msg.set_serial(self.allocate_serial());
        }
        Ok(self.transport.send(msg)?)
    }

    pub(crate) fn track_deferred(&self, reply: Arc<DeferredReply>) {
        self.deferred.lock().push(reply);
    }

    fn workers(&self) -> RpcResult<&WorkerPool> {
        self.workers.get_or_try_init(|| {
            WorkerPool::new(self.config.worker_threads, self.config.worker_queue_capacity)
        })
    }

    fn run_tasks(&self) {
        while let Ok(task) = self.task_queue.try_recv() {
            task();
        }
    }

    /// Fail async calls past their deadline and deferred replies past their grace period
    fn reap_expired(&self) {
        let now = Instant::now();
        let expired: Vec<(u32, PendingReply)> = {
            let mut pending = self.pending.lock();
            let serials: Vec<u32> = pending
                .iter()
                .filter(|(_, entry)| matches!(entry, PendingReply::Async { deadline, .. } if *deadline <= now))
                .map(|(serial, _)| *serial)
                .collect();
            serials
                .into_iter()
                .filter_map(|serial| pending.remove(&serial).map(|entry| (serial, entry)))
                .collect()
        };
        for (serial, entry) in expired {
            debug!(serial, "Async call timed out");
            entry.complete(Err(RpcError::Timeout {
                detail: format!("no reply to call {serial} before its deadline"),
            }));
        }

        let due: Vec<Arc<DeferredReply>> = {
            let mut deferred = self.deferred.lock();
            deferred.retain(|reply| !reply.is_settled());
            deferred
                .iter()
                .filter(|reply| reply.deadline() <= now)
                .cloned()
                .collect()
        };
        for reply in due {
            reply.expire();
        }
    }

    /// Async calls or deferred replies still waiting to settle
    fn has_unsettled_async(&self) -> bool {
        self.pending
            .lock()
            .values()
            .any(|entry| matches!(entry, PendingReply::Async { .. }))
            || self.deferred.lock().iter().any(|reply| !reply.is_settled())
    }

    /// Pump from a worker thread until `done` holds
    ///
    /// The worker also stops when an event loop takes over or the connection
    /// closes. Every pump reaps expired deadlines, so calls queued behind this
    /// one still time out on schedule.
    fn drive_on_worker<D>(self: &Arc<Self>, done: D) -> RpcResult<()>
    where
        D: Fn(&ConnectionInner) -> bool + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.workers()?.submit(move || loop {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::Acquire) || inner.is_loop_running() || done(&inner) {
                break;
            }
            let wait = inner.config.dispatch_poll_interval();
            if let Err(e) = inner.pump_once(wait) {
                if inner.handle_pump_error(e) {
                    break;
                }
            }
        })
    }

    /// Keep async calls progressing after the dispatch loop stopped
    fn hand_off_async(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) || self.is_loop_running() || !self.has_unsettled_async() {
            return;
        }
        debug!(bus = %self.unique_name, "Handing unsettled async calls to the worker pool");
        if let Err(e) = self.drive_on_worker(|inner| !inner.has_unsettled_async()) {
            warn!(error = %e, "Async calls stall until the next pump");
        }
    }

    /// Receive at most one message and dispatch it; `Ok(false)` when none arrived
    fn pump_once(self: &Arc<Self>, wait: Duration) -> RpcResult<bool> {
        self.run_tasks();
        self.reap_expired();
        let received = {
            let Some(_guard) = self.pump.try_lock_for(wait) else {
                return Ok(false);
            };
            self.transport.receive(wait)?
        };
        match received {
            Some(msg) => {
                self.dispatch(msg);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn handle_pump_error(&self, err: RpcError) -> bool {
        match &err {
            RpcError::Transport(e) if e.is_fatal() => {
                error!(bus = %self.unique_name, error = %e, "Transport failed");
                self.fail_all(err);
                true
            }
            _ => {
                warn!(error = %err, "Dropping undecodable message");
                false
            }
        }
    }

    fn dispatch(self: &Arc<Self>, mut msg: Message) {
        let _current = CurrentMessageGuard::enter(&msg);
        match msg.kind() {
            MessageKind::MethodReturn | MessageKind::Error => self.complete_call(msg),
            MessageKind::MethodCall => self.dispatch_call(&mut msg),
            MessageKind::Signal => {
                let delivered = self
                    .matches
                    .dispatch(&mut msg, |name| self.transport.name_owner(name));
                debug!(
                    path = ?msg.path().map(|p| p.as_str()),
                    interface = ?msg.interface().map(|i| i.as_str()),
                    member = ?msg.member().map(|m| m.as_str()),
                    handlers = delivered,
                    "Signal dispatched"
                );
            }
        }
    }

    fn complete_call(&self, reply: Message) {
        let Some(serial) = reply.reply_serial() else {
            warn!("Reply without reply serial");
            return;
        };
        let Some(entry) = self.pending.lock().remove(&serial) else {
            debug!(serial, "Reply to a call nobody is waiting for");
            return;
        };
        let result = match reply.kind() {
            MessageKind::Error => Err(RpcError::from_error_reply(&reply)),
            _ => Ok(reply),
        };
        entry.complete(result);
    }

    fn dispatch_call(self: &Arc<Self>, call: &mut Message) {
        let path = call.path().cloned();
        let interface = call.interface().map(|i| i.to_string());
        debug!(
            serial = call.serial(),
            path = ?path.as_deref(),
            interface = ?interface.as_deref(),
            member = ?call.member().map(|m| m.as_str()),
            "Method call"
        );

        let result = if interface.as_deref() == Some(constants::PEER_INTERFACE) {
            Some(object::standard::handle_peer(&self.config, call))
        } else {
            let target = path
                .as_ref()
                .and_then(|p| self.objects.get(p).and_then(|entry| entry.upgrade()));
            match target {
                Some(obj) => object::dispatch_call(self, &obj, call),
                None => Some(Err(crate::error::MethodError::new(
                    error_names::UNKNOWN_OBJECT,
                    format!("No object at path {}", path.as_deref().unwrap_or("<none>")),
                ))),
            }
        };

        if let Some(result) = result {
            self.reply_to(call, result);
        }
    }

    pub(crate) fn reply_to(
        &self,
        call: &Message,
        result: Result<Message, crate::error::MethodError>,
    ) {
        if !call.expects_reply() {
            return;
        }
        let reply = match result {
            Ok(reply) => Ok(reply),
            Err(e) => {
                debug!(serial = call.serial(), error = %e, "Replying with error");
                call.create_error_reply(&e.name, &e.message)
            }
        };
        match reply {
            Ok(reply) => {
                if let Err(e) = self.send(reply) {
                    warn!(serial = call.serial(), error = %e, "Failed to send reply");
                }
            }
            Err(e) => warn!(serial = call.serial(), error = %e, "Failed to build reply"),
        }
    }

    /// Take back a call that could not be issued
    ///
    /// `Err(err)` when the entry was still pending, so its callback never
    /// runs; `Ok(())` when it already settled and the callback has its result.
    fn withdraw(&self, serial: u32, err: RpcError) -> RpcResult<()> {
        match self.pending.lock().remove(&serial) {
            Some(PendingReply::Async { state, .. }) => {
                state.try_complete();
                Err(err)
            }
            Some(PendingReply::Blocking(_)) => Err(err),
            None => Ok(()),
        }
    }

    /// Fail every pending call with `err`
    fn fail_all(&self, err: RpcError) {
        let drained: Vec<PendingReply> = self.pending.lock().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            warn!(calls = drained.len(), error = %err, "Failing pending calls");
        }
        for entry in drained {
            entry.complete(Err(err.clone()));
        }
    }

    fn wait_for_reply(
        self: &Arc<Self>,
        serial: u32,
        slot: &ReplySlot,
        deadline: Instant,
        timeout: Duration,
    ) -> RpcResult<Message> {
        let poll = self.config.dispatch_poll_interval();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                self.pending.lock().remove(&serial);
                // The reply may have landed between the check and the removal
                return slot
                    .take()
                    .unwrap_or_else(|| Err(RpcError::timeout_after(timeout)));
            }
            let wait = (deadline - now).min(poll);
            if self.must_pump() {
                if let Err(e) = self.pump_once(wait) {
                    self.handle_pump_error(e);
                }
            } else if let Some(result) = slot.wait_until(now + wait) {
                return result;
            }
        }
    }

    fn stop_event_loop(&self) {
        let Some(control) = self.event_loop.lock().take() else {
            return;
        };
        control.stop.store(true, Ordering::Release);
        if let Some(handle) = control.handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        }
        info!(bus = %self.unique_name, "Event loop stopped");
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_event_loop();
        self.fail_all(RpcError::Transport(bus_transport::TransportError::closed(
            "connection closed",
        )));
        self.matches.clear();
        self.transport.close();
        info!(bus = %self.unique_name, "Connection closed");
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(inner: Weak<ConnectionInner>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let Some(conn) = inner.upgrade() else {
            break;
        };
        let wait = conn.config.dispatch_poll_interval();
        if let Err(e) = conn.pump_once(wait) {
            if conn.handle_pump_error(e) {
                let mut control = conn.event_loop.lock();
                if control.as_ref().map(|c| c.thread) == Some(thread::current().id()) {
                    control.take();
                }
                break;
            }
        }
    }
    debug!("Dispatch loop exiting");
}

/// Handle to one bus connection; clones share the connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to the bus selected by `kind` with the default configuration
    pub fn open(kind: BusKind, endpoint: Option<&str>) -> RpcResult<Self> {
        Self::open_with_config(kind, endpoint, RpcConfig::default())
    }

    pub fn open_with_config(
        kind: BusKind,
        endpoint: Option<&str>,
        config: RpcConfig,
    ) -> RpcResult<Self> {
        let transport = TransportFactory::open(kind, endpoint)?;
        Ok(Self::with_transport(transport, config))
    }

    /// Wrap an already connected transport
    pub fn with_transport(transport: Arc<dyn Transport>, config: RpcConfig) -> Self {
        let (tasks, task_queue) = unbounded();
        let unique_name = transport.unique_name();
        let timeout_us = config.method_call_timeout().as_micros() as u64;
        info!(bus = %unique_name, "Connection opened");
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                config,
                unique_name,
                next_serial: AtomicU32::new(1),
                call_timeout_us: AtomicU64::new(timeout_us),
                pending: Mutex::new(HashMap::new()),
                deferred: Mutex::new(Vec::new()),
                matches: Arc::new(MatchRegistry::default()),
                objects: DashMap::new(),
                event_loop: Mutex::new(None),
                pump: Mutex::new(()),
                tasks,
                task_queue,
                workers: OnceCell::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// Unique bus name of this connection (`:1.N`)
    pub fn unique_name(&self) -> &str {
        &self.inner.unique_name
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.closed.load(Ordering::Acquire) || !self.inner.transport.is_open() {
            ConnectionState::Closed
        } else if self.inner.is_loop_running() {
            ConnectionState::EventLoopRunning
        } else {
            ConnectionState::Open
        }
    }

    /// Default timeout for calls that do not pass one; zero restores the configured default
    pub fn set_method_call_timeout(&self, timeout: Duration) {
        let timeout = if timeout.is_zero() {
            self.inner.config.method_call_timeout()
        } else {
            timeout
        };
        self.inner
            .call_timeout_us
            .store(timeout.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn method_call_timeout(&self) -> Duration {
        self.inner.method_call_timeout()
    }

    // ----- names -----

    /// Take ownership of a well-known name without queueing
    pub fn request_name(&self, name: &str) -> RpcResult<()> {
        match self.request_name_with_flags(name, name_flags::DO_NOT_QUEUE)? {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => Ok(()),
            reply => Err(RpcError::state(
                "request_name",
                format!("{name} is owned by another connection ({reply:?})"),
            )),
        }
    }

    pub fn request_name_with_flags(&self, name: &str, flags: u32) -> RpcResult<RequestNameReply> {
        let reply = self.inner.transport.request_name(name, flags)?;
        info!(name, ?reply, "Requested bus name");
        Ok(reply)
    }

    /// Give up a well-known name; releasing a name this connection never owned is a no-op
    pub fn release_name(&self, name: &str) -> RpcResult<()> {
        match self.inner.transport.release_name(name)? {
            ReleaseNameReply::Released => info!(name, "Released bus name"),
            reply => debug!(name, ?reply, "Name was not owned"),
        }
        Ok(())
    }

    // ----- sending -----

    /// Send without waiting; returns the serial
    pub fn send(&self, msg: Message) -> RpcResult<u32> {
        self.inner.send(msg)
    }

    /// Send a method call and block until its reply, error or timeout
    ///
    /// `None` or a zero timeout uses [`method_call_timeout`](Self::method_call_timeout).
    /// Safe from any thread, including from handlers running on the dispatch thread.
    pub fn send_with_reply_and_block(
        &self,
        mut msg: Message,
        timeout: Option<Duration>,
    ) -> RpcResult<Message> {
        if msg.kind() != MessageKind::MethodCall {
            return Err(RpcError::state(
                "send_with_reply_and_block",
                format!("expected a method call, got {:?}", msg.kind()),
            ));
        }
        let inner = &self.inner;
        let timeout = inner.effective_timeout(timeout);
        let deadline = Instant::now() + timeout;
        if msg.serial() == 0 {
            msg.set_serial(inner.allocate_serial());
        }
        let serial = msg.serial();

        let slot = Arc::new(ReplySlot::default());
        inner
            .pending
            .lock()
            .insert(serial, PendingReply::Blocking(Arc::clone(&slot)));
        if let Err(e) = inner.send(msg) {
            inner.pending.lock().remove(&serial);
            return Err(e);
        }
        inner.wait_for_reply(serial, &slot, deadline, timeout)
    }

    /// Send a method call; `callback` receives the reply or error exactly once
    ///
    /// The deadline is fixed here, when the call is issued. With the event
    /// loop running the callback runs on the dispatch thread. Otherwise a
    /// worker drives the transport and the callback runs there. An error
    /// returned here means the callback will not run.
    pub fn call_async<F>(
        &self,
        mut msg: Message,
        timeout: Option<Duration>,
        callback: F,
    ) -> RpcResult<PendingAsyncCall>
    where
        F: FnOnce(RpcResult<Message>) + Send + 'static,
    {
        if msg.kind() != MessageKind::MethodCall {
            return Err(RpcError::state(
                "call_async",
                format!("expected a method call, got {:?}", msg.kind()),
            ));
        }
        let inner = &self.inner;
        let timeout = inner.effective_timeout(timeout);
        if msg.serial() == 0 {
            msg.set_serial(inner.allocate_serial());
        }
        let serial = msg.serial();
        let deadline = Instant::now() + timeout;
        let state = CallState::new(serial);

        let weak = Arc::downgrade(inner);
        state.set_cancel_action(move || {
            if let Some(inner) = weak.upgrade() {
                inner.pending.lock().remove(&serial);
                debug!(serial, "Async call cancelled");
            }
        });
        inner.pending.lock().insert(
            serial,
            PendingReply::Async {
                state: Arc::clone(&state),
                callback: Box::new(callback),
                deadline,
            },
        );
        let handle = PendingAsyncCall::new(state);
        if let Err(e) = inner.send(msg) {
            return inner.withdraw(serial, e).map(|()| handle);
        }

        if !inner.is_loop_running() {
            if let Err(e) = inner.drive_on_worker(move |inner| !inner.pending.lock().contains_key(&serial)) {
                return inner.withdraw(serial, e).map(|()| handle);
            }
            debug!(serial, "Async call driven by worker pool");
        }
        Ok(handle)
    }

    // ----- subscriptions -----

    /// Deliver signals matching `rule` to `handler` until the slot is released
    pub fn add_match<F>(&self, rule: MatchRule, handler: F) -> RpcResult<MatchSlot>
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
    {
        self.install_match(rule, Arc::new(handler))
    }

    /// Like [`add_match`](Self::add_match); `on_installed` runs on the dispatch
    /// thread before any message received after the rule became active
    pub fn add_match_async<F, C>(&self, rule: MatchRule, handler: F, on_installed: C) -> RpcResult<MatchSlot>
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let slot = self.install_match(rule, Arc::new(handler))?;
        if self.inner.tasks.send(Box::new(on_installed)).is_err() {
            warn!("Task queue closed, install confirmation dropped");
        }
        Ok(slot)
    }

    fn install_match(&self, rule: MatchRule, handler: SignalHandler) -> RpcResult<MatchSlot> {
        let inner = &self.inner;
        let id = inner.matches.insert(rule.clone(), handler);
        if let Err(e) = inner.transport.add_match(&rule) {
            inner.matches.remove(id);
            return Err(e.into());
        }
        debug!(rule = %rule, "Signal subscription added");
        Ok(MatchSlot::new(id, &inner.matches, &inner.transport))
    }

    // ----- event loop -----

    /// Start a dispatch thread for this connection
    pub fn enter_event_loop_async(&self) -> RpcResult<()> {
        let mut control = self.inner.event_loop.lock();
        if control.is_some() {
            return Err(RpcError::state("enter_event_loop_async", "event loop already running"));
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RpcError::state("enter_event_loop_async", "connection is closed"));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(&self.inner);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("bus-rpc-dispatch{}", self.inner.unique_name))
            .spawn(move || run_loop(weak, thread_stop))
            .map_err(|e| RpcError::state("enter_event_loop_async", e.to_string()))?;
        *control = Some(LoopControl {
            stop,
            thread: handle.thread().id(),
            handle: Some(handle),
        });
        info!(bus = %self.inner.unique_name, "Event loop started");
        Ok(())
    }

    /// Dispatch on the calling thread until [`leave_event_loop`](Self::leave_event_loop)
    pub fn enter_event_loop(&self) -> RpcResult<()> {
        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut control = self.inner.event_loop.lock();
            if control.is_some() {
                return Err(RpcError::state("enter_event_loop", "event loop already running"));
            }
            *control = Some(LoopControl {
                stop: Arc::clone(&stop),
                thread: thread::current().id(),
                handle: None,
            });
        }
        info!(bus = %self.inner.unique_name, "Event loop entered");
        run_loop(Arc::downgrade(&self.inner), stop);
        let mut control = self.inner.event_loop.lock();
        if control.as_ref().map(|c| c.thread) == Some(thread::current().id()) {
            control.take();
        }
        Ok(())
    }

    /// Stop the dispatch loop; joins the dispatch thread unless called from it
    ///
    /// Async calls still waiting for a reply are handed to the worker pool,
    /// which keeps receiving until each one completes or reaches its deadline.
    pub fn leave_event_loop(&self) {
        self.inner.stop_event_loop();
        self.inner.hand_off_async();
    }

    /// Dispatch at most one already queued message; `Ok(false)` when none was waiting
    pub fn process_pending_event(&self) -> RpcResult<bool> {
        self.inner.pump_once(Duration::ZERO)
    }

    /// Copy of the message being dispatched on this thread
    ///
    /// The copy shares the body of the dispatched message and stops being
    /// readable once dispatch of that message finishes.
    pub fn current_message() -> Option<Message> {
        CURRENT_MESSAGE.with(|stack| stack.borrow().last().and_then(|m| m.shallow_copy().ok()))
    }

    /// Stop dispatch, fail pending calls and disconnect
    pub fn close(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.inner.matches.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("unique_name", &self.inner.unique_name)
            .field("state", &self.state())
            .finish()
    }
}
