//! Variant: a box holding zero or one value plus its signature
//!
//! Reading a variant back never coerces. `Variant::new(5i32).get::<f64>()`
//! fails with [`TypeError::Mismatch`], and reading an empty variant fails with
//! [`TypeError::EmptyVariant`].

use super::bus_type::BusType;
use super::signature::Signature;
use super::value::Value;
use crate::common::errors::{TypeError, TypeResult};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variant {
    inner: Option<Box<Value>>,
}

impl Variant {
    /// Box a typed value
    pub fn new<T: BusType>(value: T) -> Self {
        Self::from_value(value.to_value())
    }

    /// Box an already dynamic value
    pub fn from_value(value: Value) -> Self {
        Self {
            inner: Some(Box::new(value)),
        }
    }

    /// A variant holding nothing; it cannot be serialized
    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Signature of the held value without consuming it
    pub fn peek_value_type(&self) -> Option<Signature> {
        self.inner.as_ref().map(|v| v.signature())
    }

    /// Whether the held value has exactly `T`'s signature
    pub fn contains<T: BusType>(&self) -> bool {
        self.inner
            .as_ref()
            .map(|v| v.value_type() == T::signature_type())
            .unwrap_or(false)
    }

    /// Read the held value as `T`
    pub fn get<T: BusType>(&self) -> TypeResult<T> {
        let value = self.inner.as_deref().ok_or(TypeError::EmptyVariant)?;
        let expected = T::signature_type();
        let found = value.value_type();
        if expected != found {
            return Err(TypeError::mismatch(expected.to_string(), found.to_string()));
        }
        T::from_value(value.clone())
    }

    pub fn value(&self) -> Option<&Value> {
        self.inner.as_deref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.inner.map(|boxed| *boxed)
    }
}

impl From<Value> for Variant {
    fn from(value: Value) -> Self {
        Variant::from_value(value)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.as_deref() {
            Some(value) => write!(f, "<{}> {}", value.signature(), value),
            None => f.write_str("<empty>"),
        }
    }
}
