//! # Bus Identifiers - Validated Name Wrappers
//!
//! Every string that addresses something on the bus has its own grammar:
//! object paths, interface names, member names, error names and bus names.
//! Each gets a typed wrapper so a member name can never be passed where an
//! interface is expected, and so validation happens once at construction.
//!
//! ```rust
//! use bus_types::{InterfaceName, ObjectPath};
//!
//! let path = ObjectPath::new("/org/example/calc").unwrap();
//! let iface = InterfaceName::new("org.example.Calculator").unwrap();
//! assert!(path.is_descendant_of(&ObjectPath::root()));
//! assert!(ObjectPath::new("/trailing/").is_err());
//! # let _ = iface;
//! ```

use crate::common::errors::NameError;

/// Maximum length of any name on the bus
pub const MAX_NAME_LENGTH: usize = 255;

/// Generate a validated string wrapper
///
/// The wrapper derefs to `str`, hashes identically to `str` (so maps keyed by
/// the wrapper can be queried with `&str`), and can only be built through the
/// given validator.
macro_rules! define_bus_name {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, $validator:path
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serialization", serde(try_from = "String", into = "String"))]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a name
            pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
                let value = value.into();
                match $validator(&value) {
                    Ok(()) => Ok(Self(value)),
                    Err(reason) => Err(NameError {
                        kind: $kind,
                        value,
                        reason,
                    }),
                }
            }

            /// Check a candidate without allocating a wrapper
            pub fn is_valid(value: &str) -> bool {
                $validator(value).is_ok()
            }

            /// Borrow the underlying string
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the owned string
            #[inline]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = NameError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = NameError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> String {
                name.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

define_bus_name!(
    /// Hierarchical object path such as `/org/example/calc`
    ObjectPath, "object path", validate_object_path
);

define_bus_name!(
    /// Dotted interface name such as `org.freedesktop.DBus.Properties`
    InterfaceName, "interface name", validate_interface_name
);

define_bus_name!(
    /// Method, signal or property name
    MemberName, "member name", validate_member_name
);

define_bus_name!(
    /// Namespaced error identifier, same grammar as interface names
    ErrorName, "error name", validate_interface_name
);

define_bus_name!(
    /// Unique (`:1.42`) or well-known (`org.example.Service`) connection name
    BusName, "bus name", validate_bus_name
);

impl ObjectPath {
    /// The root path `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Strict descendant check: `/a/b` descends from `/a` and `/`, not from `/a/b`
    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        if self.0 == ancestor.0 {
            return false;
        }
        if ancestor.is_root() {
            return true;
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(ancestor.as_str())
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Append one path element
    pub fn join(&self, element: &str) -> Result<ObjectPath, NameError> {
        if self.is_root() {
            Self::new(format!("/{element}"))
        } else {
            Self::new(format!("{}/{element}", self.0))
        }
    }
}

impl BusName {
    /// Unique names are assigned by the bus and start with `:`
    pub fn is_unique(&self) -> bool {
        self.0.starts_with(':')
    }
}

/// Index of a Unix file descriptor in a message's out-of-band fd array
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnixFd(pub u32);

impl UnixFd {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.0
    }
}

fn validate_object_path(value: &str) -> Result<(), &'static str> {
    if !value.starts_with('/') {
        return Err("must start with '/'");
    }
    if value == "/" {
        return Ok(());
    }
    if value.ends_with('/') {
        return Err("must not end with '/'");
    }
    for element in value[1..].split('/') {
        if element.is_empty() {
            return Err("empty path element");
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err("elements may only contain [A-Za-z0-9_]");
        }
    }
    Ok(())
}

fn validate_element(element: &str, allow_dash: bool, allow_leading_digit: bool) -> Result<(), &'static str> {
    let mut bytes = element.bytes();
    let Some(first) = bytes.next() else {
        return Err("empty element");
    };
    let first_ok = first.is_ascii_alphabetic()
        || first == b'_'
        || (allow_dash && first == b'-')
        || (allow_leading_digit && first.is_ascii_digit());
    if !first_ok {
        return Err("element starts with an invalid character");
    }
    if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || (allow_dash && b == b'-')) {
        return Err("element contains an invalid character");
    }
    Ok(())
}

fn validate_interface_name(value: &str) -> Result<(), &'static str> {
    if value.len() > MAX_NAME_LENGTH {
        return Err("longer than 255 bytes");
    }
    let mut count = 0;
    for element in value.split('.') {
        validate_element(element, false, false)?;
        count += 1;
    }
    if count < 2 {
        return Err("needs at least two dot-separated elements");
    }
    Ok(())
}

fn validate_member_name(value: &str) -> Result<(), &'static str> {
    if value.len() > MAX_NAME_LENGTH {
        return Err("longer than 255 bytes");
    }
    if value.contains('.') {
        return Err("must not contain '.'");
    }
    validate_element(value, false, false)
}

fn validate_bus_name(value: &str) -> Result<(), &'static str> {
    if value.len() > MAX_NAME_LENGTH {
        return Err("longer than 255 bytes");
    }
    let (unique, rest) = match value.strip_prefix(':') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let mut count = 0;
    for element in rest.split('.') {
        validate_element(element, true, unique)?;
        count += 1;
    }
    if count < 2 {
        return Err("needs at least two dot-separated elements");
    }
    Ok(())
}
