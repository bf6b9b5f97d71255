//! Standard interfaces served by the runtime
//!
//! - `org.freedesktop.DBus.Properties`: `Get`, `Set`, `GetAll`, and the
//!   `PropertiesChanged` signal emitted after writes
//! - `org.freedesktop.DBus.ObjectManager`: `GetManagedObjects`, computed
//!   from live getters on every call
//! - `org.freedesktop.DBus.Peer`: `Ping`, `GetMachineId` on every path

use super::vtable::Property;
use super::ObjectInner;
use crate::connection::ConnectionInner;
use crate::error::{MethodError, RpcResult};
use bus_codec::{Arguments, FromArguments, Message};
use bus_config::defaults::MACHINE_ID_PATH;
use bus_config::RpcConfig;
use bus_types::{constants, error_names, ObjectPath, Variant};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

type PropertyMap = BTreeMap<String, Variant>;
type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Stand-in for hosts without a machine id file, stable for the process lifetime
static FALLBACK_MACHINE_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().simple().to_string());

fn unknown_method(interface: &str, member: &str) -> MethodError {
    MethodError::new(
        error_names::UNKNOWN_METHOD,
        format!("No method {member} on {interface}"),
    )
}

/// Decode arguments after checking the call carries exactly their signature
fn read_args<A: FromArguments>(call: &mut Message) -> Result<A, MethodError> {
    let expected = A::signature();
    if call.signature() != expected {
        return Err(MethodError::invalid_args(format!(
            "expected '{expected}', got '{}'",
            call.signature()
        )));
    }
    Ok(A::read_from(call)?)
}

fn reply_with<R: Arguments>(call: &Message, values: R) -> Result<Message, MethodError> {
    let mut reply = call
        .create_reply()
        .map_err(|e| MethodError::failed(e.to_string()))?;
    values
        .append_to(&mut reply)
        .map_err(|e| MethodError::failed(e.to_string()))?;
    Ok(reply)
}

// ----- Peer -----

/// Machine id: configured override, then the host file, then a per-process id
pub(crate) fn machine_id(config: &RpcConfig) -> String {
    if let Some(id) = &config.machine_id {
        return id.clone();
    }
    match std::fs::read_to_string(MACHINE_ID_PATH) {
        Ok(contents) => {
            let id = contents.trim();
            if id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
                return id.to_string();
            }
            warn!(path = MACHINE_ID_PATH, "Malformed machine id, using fallback");
        }
        Err(e) => debug!(path = MACHINE_ID_PATH, error = %e, "No machine id file"),
    }
    FALLBACK_MACHINE_ID.clone()
}

pub(crate) fn handle_peer(config: &RpcConfig, call: &mut Message) -> Result<Message, MethodError> {
    let member = call.member().map(|m| m.to_string()).unwrap_or_default();
    match member.as_str() {
        constants::PEER_PING => {
            read_args::<()>(call)?;
            reply_with(call, ())
        }
        constants::PEER_GET_MACHINE_ID => {
            read_args::<()>(call)?;
            reply_with(call, (machine_id(config),))
        }
        other => Err(unknown_method(constants::PEER_INTERFACE, other)),
    }
}

// ----- Properties -----

/// Current values of every property of `interface`
fn property_values(obj: &ObjectInner, interface: &str) -> Option<PropertyMap> {
    let tables = obj.vtables(interface)?;
    Some(
        tables
            .iter()
            .flat_map(|t| t.properties().iter())
            .map(|p| (p.name().to_string(), Variant::from_value(p.get())))
            .collect(),
    )
}

/// `PropertiesChanged` for `properties`, each contributing per its update behaviour
pub(crate) fn properties_changed(
    path: &ObjectPath,
    interface: &str,
    properties: &[Arc<Property>],
) -> RpcResult<Option<Message>> {
    use super::vtable::PropertyUpdate;

    let mut changed = PropertyMap::new();
    let mut invalidated = Vec::new();
    for property in properties {
        match property.update() {
            PropertyUpdate::EmitsChange => {
                changed.insert(property.name().to_string(), Variant::from_value(property.get()));
            }
            PropertyUpdate::EmitsInvalidation => invalidated.push(property.name().to_string()),
            PropertyUpdate::EmitsNoSignal | PropertyUpdate::Const => {}
        }
    }
    if changed.is_empty() && invalidated.is_empty() {
        return Ok(None);
    }

    let mut signal = Message::signal(
        path.as_str(),
        constants::PROPERTIES_INTERFACE,
        constants::PROPERTIES_CHANGED,
    )?;
    signal.append(&interface.to_string())?;
    signal.append(&changed)?;
    signal.append(&invalidated)?;
    Ok(Some(signal))
}

pub(crate) fn handle_properties(
    conn: &Arc<ConnectionInner>,
    obj: &Arc<ObjectInner>,
    call: &mut Message,
    member: &str,
) -> Result<Message, MethodError> {
    match member {
        constants::PROPERTIES_GET => {
            let (interface, name): (String, String) = read_args(call)?;
            let property = obj.find_property(&interface, &name)?;
            reply_with(call, (Variant::from_value(property.get()),))
        }
        constants::PROPERTIES_GET_ALL => {
            let (interface,): (String,) = read_args(call)?;
            let values = match property_values(obj, &interface) {
                Some(values) => values,
                None if is_runtime_interface(&interface) => PropertyMap::new(),
                None => {
                    return Err(MethodError::new(
                        error_names::UNKNOWN_INTERFACE,
                        format!("Object {} has no interface {interface}", obj.path()),
                    ))
                }
            };
            reply_with(call, (values,))
        }
        constants::PROPERTIES_SET => {
            let (interface, name, value): (String, String, Variant) = read_args(call)?;
            let property = obj.find_property(&interface, &name)?;
            if !property.is_writable() {
                return Err(MethodError::new(
                    error_names::PROPERTY_READ_ONLY,
                    format!("Property {interface}.{name} is read-only"),
                ));
            }
            let found = value.peek_value_type().map(|s| s.into_inner()).unwrap_or_default();
            if found != property.signature() {
                return Err(MethodError::invalid_args(format!(
                    "property {interface}.{name} has type '{}', got '{found}'",
                    property.signature()
                )));
            }
            let value = value
                .into_value()
                .ok_or_else(|| MethodError::invalid_args("empty variant"))?;
            property.set(value)?;
            debug!(path = %obj.path(), interface = %interface, property = %name, "Property set");

            match properties_changed(obj.path(), &interface, &[property]) {
                Ok(Some(signal)) => {
                    if let Err(e) = conn.send(signal) {
                        warn!(property = %name, error = %e, "Failed to emit PropertiesChanged");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(property = %name, error = %e, "Failed to build PropertiesChanged"),
            }
            reply_with(call, ())
        }
        other => Err(unknown_method(constants::PROPERTIES_INTERFACE, other)),
    }
}

fn is_runtime_interface(interface: &str) -> bool {
    [
        constants::PROPERTIES_INTERFACE,
        constants::PEER_INTERFACE,
        constants::OBJECT_MANAGER_INTERFACE,
    ]
    .contains(&interface)
}

// ----- ObjectManager -----

/// Property snapshot of the named interfaces; unknown names map to no properties
pub(crate) fn interfaces_snapshot(obj: &ObjectInner, interfaces: &[String]) -> InterfaceMap {
    interfaces
        .iter()
        .map(|name| (name.clone(), property_values(obj, name).unwrap_or_default()))
        .collect()
}

/// Every live object strictly below `root` with all its interfaces
pub(crate) fn managed_objects(conn: &ConnectionInner, root: &ObjectPath) -> BTreeMap<ObjectPath, InterfaceMap> {
    let candidates: Vec<(ObjectPath, Weak<ObjectInner>)> = conn
        .objects
        .iter()
        .filter(|entry| entry.key().is_descendant_of(root))
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    candidates
        .into_iter()
        .filter_map(|(path, weak)| weak.upgrade().map(|obj| (path, obj)))
        .map(|(path, obj)| {
            let names = obj.interface_names();
            (path, interfaces_snapshot(&obj, &names))
        })
        .collect()
}

pub(crate) fn handle_object_manager(
    conn: &Arc<ConnectionInner>,
    obj: &Arc<ObjectInner>,
    call: &mut Message,
    member: &str,
) -> Result<Message, MethodError> {
    match member {
        constants::GET_MANAGED_OBJECTS => {
            read_args::<()>(call)?;
            let objects = managed_objects(conn, obj.path());
            debug!(path = %obj.path(), objects = objects.len(), "GetManagedObjects");
            reply_with(call, (objects,))
        }
        other => Err(unknown_method(constants::OBJECT_MANAGER_INTERFACE, other)),
    }
}
