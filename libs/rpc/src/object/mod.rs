//! # Objects
//!
//! ## Purpose
//!
//! Server side of the runtime: an [`Object`] binds a [`Connection`] to one
//! path and serves interfaces registered through [`Object::add_vtable`].
//!
//! ## Architecture Role
//!
//! ```text
//! Connection.objects: path ──weak──▶ ObjectInner ──▶ interface ──▶ [VTable, VTable, ..]
//!                                          │
//!                    Properties / ObjectManager (standard.rs, served from the same tables)
//! ```
//!
//! The connection only holds weak references, so dropping the [`Object`]
//! unregisters the path no matter what the connection still tracks.
//! Registrations under one interface accumulate: each `add_vtable` returns a
//! [`VTableSlot`] that removes exactly that registration.

pub mod standard;
pub mod vtable;

use crate::connection::{Connection, ConnectionInner};
use crate::error::{MethodError, RpcError, RpcResult};
use bus_codec::{Arguments, CodecError, Message};
use bus_types::{constants, error_names, ObjectPath};
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use vtable::{DeferredReply, Invoke};

pub use vtable::{AsyncReply, Method, Property, PropertyUpdate, Signal, VTable};

pub(crate) struct ObjectInner {
    path: ObjectPath,
    interfaces: Mutex<BTreeMap<String, Vec<(u64, Arc<VTable>)>>>,
    next_slot: AtomicU64,
    object_manager: AtomicBool,
}

impl ObjectInner {
    pub(crate) fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub(crate) fn is_object_manager(&self) -> bool {
        self.object_manager.load(Ordering::Acquire)
    }

    pub(crate) fn interface_names(&self) -> Vec<String> {
        self.interfaces.lock().keys().cloned().collect()
    }

    /// Every registration of `interface`, `None` when it is not served here
    pub(crate) fn vtables(&self, interface: &str) -> Option<Vec<Arc<VTable>>> {
        self.interfaces
            .lock()
            .get(interface)
            .map(|tables| tables.iter().map(|(_, t)| Arc::clone(t)).collect())
    }

    fn find_method(&self, interface: Option<&str>, member: &str) -> Result<Arc<Method>, MethodError> {
        let interfaces = self.interfaces.lock();
        match interface {
            Some(name) => {
                let tables = interfaces.get(name).ok_or_else(|| {
                    MethodError::new(
                        error_names::UNKNOWN_INTERFACE,
                        format!("Object {} has no interface {name}", self.path),
                    )
                })?;
                tables.iter().find_map(|(_, t)| t.find_method(member))
            }
            None => interfaces
                .values()
                .flatten()
                .find_map(|(_, t)| t.find_method(member)),
        }
        .ok_or_else(|| {
            MethodError::new(
                error_names::UNKNOWN_METHOD,
                format!(
                    "No method {member} on {} at {}",
                    interface.unwrap_or("any interface"),
                    self.path
                ),
            )
        })
    }

    pub(crate) fn find_property(&self, interface: &str, name: &str) -> Result<Arc<Property>, MethodError> {
        let tables = self.vtables(interface).ok_or_else(|| {
            MethodError::new(
                error_names::UNKNOWN_INTERFACE,
                format!("Object {} has no interface {interface}", self.path),
            )
        })?;
        tables
            .iter()
            .find_map(|t| t.find_property(name))
            .ok_or_else(|| {
                MethodError::unknown_property(format!("No property {interface}.{name} at {}", self.path))
            })
    }

    /// Signature of a declared signal
    fn signal_signature(&self, interface: &str, member: &str) -> Option<String> {
        let interfaces = self.interfaces.lock();
        interfaces
            .get(interface)?
            .iter()
            .find_map(|(_, t)| t.find_signal(member).map(|s| s.signature().to_string()))
    }

    fn remove_registration(&self, interface: &str, id: u64) -> bool {
        let mut interfaces = self.interfaces.lock();
        let Some(tables) = interfaces.get_mut(interface) else {
            return false;
        };
        let before = tables.len();
        tables.retain(|(slot, _)| *slot != id);
        let removed = tables.len() != before;
        if tables.is_empty() {
            interfaces.remove(interface);
        }
        removed
    }
}

/// Route one method call to the object's tables
///
/// Returns the reply to send, or `None` when the reply is not owed now
/// (async method, or a call that asked for no reply).
pub(crate) fn dispatch_call(
    conn: &Arc<ConnectionInner>,
    obj: &Arc<ObjectInner>,
    call: &mut Message,
) -> Option<Result<Message, MethodError>> {
    let member = call.member().map(|m| m.to_string()).unwrap_or_default();
    let interface = call.interface().map(|i| i.to_string());

    match interface.as_deref() {
        Some(constants::PROPERTIES_INTERFACE) => {
            return Some(standard::handle_properties(conn, obj, call, &member))
        }
        Some(constants::OBJECT_MANAGER_INTERFACE) if obj.is_object_manager() => {
            return Some(standard::handle_object_manager(conn, obj, call, &member))
        }
        _ => {}
    }

    let method = match obj.find_method(interface.as_deref(), &member) {
        Ok(method) => method,
        Err(e) => return Some(Err(e)),
    };
    if call.signature() != method.in_signature() {
        return Some(Err(MethodError::invalid_args(format!(
            "{member} expects '{}', got '{}'",
            method.in_signature(),
            call.signature()
        ))));
    }

    let wants_reply = call.expects_reply() && !method.is_no_reply();
    match &method.invoke {
        Invoke::Sync(handler) => {
            let result = handler(call);
            if wants_reply {
                return Some(result);
            }
            if let Err(e) = result {
                debug!(member = %member, error = %e, "Handler failed on call without reply");
            }
            None
        }
        Invoke::Async(handler) => {
            let deferred = DeferredReply::new(conn, call, wants_reply);
            conn.track_deferred(Arc::clone(&deferred));
            if let Err(e) = handler(call, Arc::clone(&deferred)) {
                deferred.fail(e);
            }
            None
        }
    }
}

/// Server object bound to one path
pub struct Object {
    conn: Connection,
    inner: Arc<ObjectInner>,
}

impl Object {
    /// Register `path` on the connection; fails if another live object serves it
    pub fn new(conn: &Connection, path: &str) -> RpcResult<Self> {
        let path = ObjectPath::new(path)?;
        let inner = Arc::new(ObjectInner {
            path: path.clone(),
            interfaces: Mutex::new(BTreeMap::new()),
            next_slot: AtomicU64::new(1),
            object_manager: AtomicBool::new(false),
        });

        match conn.inner().objects.entry(path.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().upgrade().is_some() {
                    return Err(RpcError::registration(format!(
                        "an object is already registered at {path}"
                    )));
                }
                entry.insert(Arc::downgrade(&inner));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&inner));
            }
        }
        if let Err(e) = conn.transport().export_path(&path) {
            conn.inner().objects.remove(&path);
            return Err(e.into());
        }
        info!(path = %path, "Object registered");
        Ok(Self {
            conn: conn.clone(),
            inner,
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.inner.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Interfaces currently served, in name order
    pub fn interfaces(&self) -> Vec<String> {
        self.inner.interface_names()
    }

    /// Serve `vtable` under `interface` until the returned slot is released
    pub fn add_vtable(&self, interface: &str, vtable: VTable) -> RpcResult<VTableSlot> {
        bus_types::InterfaceName::new(interface)?;
        if [
            constants::PROPERTIES_INTERFACE,
            constants::OBJECT_MANAGER_INTERFACE,
            constants::PEER_INTERFACE,
        ]
        .contains(&interface)
        {
            return Err(RpcError::registration(format!(
                "{interface} is provided by the runtime"
            )));
        }
        vtable.validate(interface)?;

        let mut interfaces = self.inner.interfaces.lock();
        if let Some(tables) = interfaces.get(interface) {
            let taken = vtable
                .member_names()
                .find(|name| tables.iter().any(|(_, t)| t.member_names().any(|n| n == *name)));
            if let Some(name) = taken {
                return Err(RpcError::registration(format!(
                    "{interface}.{name} is already registered at {}",
                    self.inner.path
                )));
            }
        }
        let id = self.inner.next_slot.fetch_add(1, Ordering::Relaxed);
        debug!(
            path = %self.inner.path,
            interface,
            methods = vtable.methods().len(),
            properties = vtable.properties().len(),
            signals = vtable.signals().len(),
            "VTable added"
        );
        interfaces
            .entry(interface.to_string())
            .or_default()
            .push((id, Arc::new(vtable)));
        Ok(VTableSlot {
            object: Arc::downgrade(&self.inner),
            interface: interface.to_string(),
            id,
            released: AtomicBool::new(false),
        })
    }

    /// Answer `GetManagedObjects` for every object below this path
    pub fn add_object_manager(&self) {
        self.inner.object_manager.store(true, Ordering::Release);
        debug!(path = %self.inner.path, "Object manager added");
    }

    pub fn remove_object_manager(&self) {
        self.inner.object_manager.store(false, Ordering::Release);
    }

    /// Signal message from this path, not yet sent
    pub fn create_signal(&self, interface: &str, member: &str) -> RpcResult<Message> {
        Ok(Message::signal(self.inner.path.as_str(), interface, member)?)
    }

    /// Emit a signal declared in one of this object's tables
    pub fn emit_signal<A: Arguments>(&self, interface: &str, member: &str, args: A) -> RpcResult<()> {
        let declared = self.inner.signal_signature(interface, member).ok_or_else(|| {
            RpcError::registration(format!(
                "signal {interface}.{member} is not declared at {}",
                self.inner.path
            ))
        })?;
        let actual = A::signature();
        if declared != actual {
            return Err(CodecError::mismatch(declared, actual).into());
        }
        let mut signal = self.create_signal(interface, member)?;
        args.append_to(&mut signal)?;
        self.conn.send(signal)?;
        Ok(())
    }

    /// Send a prepared signal message as is
    pub fn emit(&self, signal: Message) -> RpcResult<()> {
        self.conn.send(signal)?;
        Ok(())
    }

    /// Announce current values of `names` (all properties when `None`)
    ///
    /// Each property contributes according to its [`PropertyUpdate`]: its
    /// value, its name in the invalidated list, or nothing. No signal is sent
    /// when nothing contributes.
    pub fn emit_properties_changed_signal(&self, interface: &str, names: Option<&[&str]>) -> RpcResult<()> {
        let tables = self.inner.vtables(interface).ok_or_else(|| {
            RpcError::registration(format!(
                "interface {interface} is not registered at {}",
                self.inner.path
            ))
        })?;
        let properties: Vec<Arc<Property>> = match names {
            None => tables.iter().flat_map(|t| t.properties().iter().cloned()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    tables
                        .iter()
                        .find_map(|t| t.find_property(name))
                        .ok_or_else(|| {
                            RpcError::registration(format!("no property {interface}.{name}"))
                        })
                })
                .collect::<RpcResult<_>>()?,
        };
        match standard::properties_changed(&self.inner.path, interface, &properties)? {
            Some(signal) => self.emit(signal),
            None => Ok(()),
        }
    }

    /// `InterfacesAdded` from the nearest object manager above this path
    ///
    /// `None` announces every interface currently served here.
    pub fn emit_interfaces_added_signal(&self, interfaces: Option<&[&str]>) -> RpcResult<()> {
        let manager = self.manager_path("emit_interfaces_added_signal")?;
        let names = self.selected_interfaces(interfaces);
        let snapshot = standard::interfaces_snapshot(&self.inner, &names);
        let mut signal = Message::signal(
            manager.as_str(),
            constants::OBJECT_MANAGER_INTERFACE,
            constants::INTERFACES_ADDED,
        )?;
        signal.append(&self.inner.path)?;
        signal.append(&snapshot)?;
        self.emit(signal)
    }

    /// `InterfacesRemoved` from the nearest object manager above this path
    pub fn emit_interfaces_removed_signal(&self, interfaces: Option<&[&str]>) -> RpcResult<()> {
        let manager = self.manager_path("emit_interfaces_removed_signal")?;
        let names = self.selected_interfaces(interfaces);
        let mut signal = Message::signal(
            manager.as_str(),
            constants::OBJECT_MANAGER_INTERFACE,
            constants::INTERFACES_REMOVED,
        )?;
        signal.append(&self.inner.path)?;
        signal.append(&names)?;
        self.emit(signal)
    }

    fn selected_interfaces(&self, interfaces: Option<&[&str]>) -> Vec<String> {
        match interfaces {
            Some(list) => list.iter().map(|s| s.to_string()).collect(),
            None => self.inner.interface_names(),
        }
    }

    fn manager_path(&self, operation: &'static str) -> RpcResult<ObjectPath> {
        let objects = &self.conn.inner().objects;
        let mut current = self.inner.path.parent();
        while let Some(path) = current {
            let is_manager = objects
                .get(&path)
                .and_then(|entry| entry.upgrade())
                .map(|obj| obj.is_object_manager())
                .unwrap_or(false);
            if is_manager {
                return Ok(path);
            }
            current = path.parent();
        }
        Err(RpcError::state(
            operation,
            format!("no object manager above {}", self.inner.path),
        ))
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let path = self.inner.path.clone();
        let weak = Arc::downgrade(&self.inner);
        let removed = self
            .conn
            .inner()
            .objects
            .remove_if(&path, |_, registered| Weak::ptr_eq(registered, &weak))
            .is_some();
        if removed {
            if let Err(e) = self.conn.transport().unexport_path(&path) {
                debug!(path = %path, error = %e, "Failed to unexport path");
            }
            info!(path = %path, "Object unregistered");
        }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("path", &self.inner.path)
            .field("interfaces", &self.inner.interface_names())
            .finish()
    }
}

/// One `add_vtable` registration; releasing it removes exactly that registration
pub struct VTableSlot {
    object: Weak<ObjectInner>,
    interface: String,
    id: u64,
    released: AtomicBool,
}

impl VTableSlot {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(object) = self.object.upgrade() {
            if object.remove_registration(&self.interface, self.id) {
                debug!(path = %object.path, interface = %self.interface, "VTable removed");
            }
        }
    }

    /// Keep the registration for the object's whole life
    pub fn detach(self) {
        self.released.store(true, Ordering::Release);
    }
}

impl Drop for VTableSlot {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for VTableSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VTableSlot")
            .field("interface", &self.interface)
            .field("id", &self.id)
            .finish()
    }
}
