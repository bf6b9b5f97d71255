//! Well-known names of the message bus and its standard interfaces

/// Bus name of the broker itself
pub const BUS_NAME: &str = "org.freedesktop.DBus";
/// Object path of the broker
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
/// Interface carrying name ownership calls and signals
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// Broker signals
pub const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";
pub const NAME_ACQUIRED: &str = "NameAcquired";
pub const NAME_LOST: &str = "NameLost";

/// Standard interface members
pub const PROPERTIES_GET: &str = "Get";
pub const PROPERTIES_SET: &str = "Set";
pub const PROPERTIES_GET_ALL: &str = "GetAll";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
pub const GET_MANAGED_OBJECTS: &str = "GetManagedObjects";
pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
pub const PEER_PING: &str = "Ping";
pub const PEER_GET_MACHINE_ID: &str = "GetMachineId";

/// Standard error names
pub mod error_names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    pub const TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
    pub const TIMED_OUT: &str = "org.freedesktop.DBus.Error.TimedOut";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
}
