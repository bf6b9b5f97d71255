//! # Dynamic Value Model
//!
//! [`Value`] is the closed tagged union over the signature grammar: one case
//! per basic code, plus variants, arrays, dictionaries and structs. Every
//! value knows its own [`SignatureType`], so a signature can always be
//! computed from the value shape alone.
//!
//! Containers carry their element type explicitly. An empty `Vec<i32>` and an
//! empty `Vec<String>` are different values (`ai` vs `as`), and construction
//! rejects members that disagree with the declared element type.

use super::signature::{BasicType, Signature, SignatureType};
use super::variant::Variant;
use crate::common::errors::{TypeError, TypeResult};
use crate::common::identifiers::{ObjectPath, UnixFd};

/// One value of any type expressible in the signature grammar
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    UnixFd(UnixFd),
    Variant(Variant),
    Array(Array),
    Dict(Dict),
    Struct(Vec<Value>),
}

impl Value {
    /// Parsed signature of this value
    pub fn value_type(&self) -> SignatureType {
        match self {
            Value::Byte(_) => BasicType::Byte.into(),
            Value::Bool(_) => BasicType::Boolean.into(),
            Value::Int16(_) => BasicType::Int16.into(),
            Value::Uint16(_) => BasicType::Uint16.into(),
            Value::Int32(_) => BasicType::Int32.into(),
            Value::Uint32(_) => BasicType::Uint32.into(),
            Value::Int64(_) => BasicType::Int64.into(),
            Value::Uint64(_) => BasicType::Uint64.into(),
            Value::Double(_) => BasicType::Double.into(),
            Value::String(_) => BasicType::String.into(),
            Value::ObjectPath(_) => BasicType::ObjectPath.into(),
            Value::Signature(_) => BasicType::Signature.into(),
            Value::UnixFd(_) => BasicType::UnixFd.into(),
            Value::Variant(_) => SignatureType::Variant,
            Value::Array(array) => SignatureType::Array(Box::new(array.element.clone())),
            Value::Dict(dict) => SignatureType::Dict {
                key: dict.key,
                value: Box::new(dict.value.clone()),
            },
            Value::Struct(members) => {
                SignatureType::Struct(members.iter().map(Value::value_type).collect())
            }
        }
    }

    /// Signature string of this value
    pub fn signature(&self) -> Signature {
        self.value_type().to_signature()
    }

    /// Basic type code for scalar and string-like values
    pub fn basic_type(&self) -> Option<BasicType> {
        match self.value_type() {
            SignatureType::Basic(basic) => Some(basic),
            _ => None,
        }
    }

    /// Build a struct value, rejecting the empty struct
    pub fn structure(members: Vec<Value>) -> TypeResult<Value> {
        if members.is_empty() {
            return Err(TypeError::Invalid("struct must have at least one member".into()));
        }
        Ok(Value::Struct(members))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::ObjectPath(p) => Some(p.as_str()),
            Value::Signature(g) => Some(g.as_str()),
            _ => None,
        }
    }

    /// Widen any integer value to `i64` (u64 values above `i64::MAX` give `None`)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Int16(v) => Some(v as i64),
            Value::Uint16(v) => Some(v as i64),
            Value::Int32(v) => Some(v as i64),
            Value::Uint32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::Uint64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Byte(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::ObjectPath(v) => write!(f, "{v}"),
            Value::Signature(v) => write!(f, "<{v}>"),
            Value::UnixFd(v) => write!(f, "fd#{}", v.index()),
            Value::Variant(v) => write!(f, "{v}"),
            Value::Array(a) => {
                f.write_str("[")?;
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(d) => {
                f.write_str("{")?;
                for (i, (k, v)) in d.entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Struct(members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Homogeneous array with an explicit element type
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element: SignatureType,
    items: Vec<Value>,
}

impl Array {
    /// Empty array of the given element type
    pub fn empty(element: SignatureType) -> Self {
        Self {
            element,
            items: Vec::new(),
        }
    }

    /// Array from items, each of which must have signature `element`
    pub fn new(element: SignatureType, items: Vec<Value>) -> TypeResult<Self> {
        for (index, item) in items.iter().enumerate() {
            let found = item.value_type();
            if found != element {
                return Err(TypeError::InvalidMember {
                    container: "array",
                    index,
                    expected: element.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(Self { element, items })
    }

    /// Skips member validation; callers guarantee every item has type `element`
    pub fn new_unchecked(element: SignatureType, items: Vec<Value>) -> Self {
        Self { element, items }
    }

    pub fn element_type(&self) -> &SignatureType {
        &self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append one item, checking its type
    pub fn push(&mut self, item: Value) -> TypeResult<()> {
        let found = item.value_type();
        if found != self.element {
            return Err(TypeError::InvalidMember {
                container: "array",
                index: self.items.len(),
                expected: self.element.to_string(),
                found: found.to_string(),
            });
        }
        self.items.push(item);
        Ok(())
    }
}

/// Dictionary (`a{kv}`), entries kept in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct Dict {
    key: BasicType,
    value: SignatureType,
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn empty(key: BasicType, value: SignatureType) -> Self {
        Self {
            key,
            value,
            entries: Vec::new(),
        }
    }

    pub fn new(key: BasicType, value: SignatureType, entries: Vec<(Value, Value)>) -> TypeResult<Self> {
        let mut dict = Self::empty(key, value);
        dict.entries.reserve(entries.len());
        for (k, v) in entries {
            dict.insert(k, v)?;
        }
        Ok(dict)
    }

    /// Skips entry validation; callers guarantee every entry matches `key`/`value`
    pub fn new_unchecked(key: BasicType, value: SignatureType, entries: Vec<(Value, Value)>) -> Self {
        Self { key, value, entries }
    }

    pub fn key_type(&self) -> BasicType {
        self.key
    }

    pub fn value_type(&self) -> &SignatureType {
        &self.value
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Value, Value)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, checking key and value types
    pub fn insert(&mut self, key: Value, value: Value) -> TypeResult<()> {
        let index = self.entries.len();
        let key_type = key.value_type();
        if key_type != SignatureType::Basic(self.key) {
            return Err(TypeError::InvalidMember {
                container: "dictionary key",
                index,
                expected: self.key.code().to_string(),
                found: key_type.to_string(),
            });
        }
        let value_type = value.value_type();
        if value_type != self.value {
            return Err(TypeError::InvalidMember {
                container: "dictionary value",
                index,
                expected: self.value.to_string(),
                found: value_type.to_string(),
            });
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Linear lookup by key
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Lookup by string-like key
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}
