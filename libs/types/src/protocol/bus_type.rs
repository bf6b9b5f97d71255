//! Static mapping between Rust types and the signature grammar
//!
//! [`BusType`] gives every supported Rust type one fixed signature and a
//! lossless conversion to and from [`Value`]. Conversions never coerce: an
//! `Int32` value does not convert into `i64`.
//!
//! | Rust                        | Signature |
//! |-----------------------------|-----------|
//! | `u8` `bool` `i16` `u16`     | `y b n q` |
//! | `i32` `u32` `i64` `u64`     | `i u x t` |
//! | `f64` `String`              | `d s`     |
//! | `ObjectPath` `Signature`    | `o g`     |
//! | `UnixFd` `Variant`          | `h v`     |
//! | `Vec<T>`                    | `aT`      |
//! | `HashMap<K,V>` `BTreeMap`   | `a{KV}`   |
//! | `(A, B, ..)` up to 10       | `(AB..)`  |

use super::signature::{BasicType, Signature, SignatureType};
use super::value::{Array, Dict, Value};
use super::variant::Variant;
use crate::common::errors::{TypeError, TypeResult};
use crate::common::identifiers::{ObjectPath, UnixFd};
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

/// A Rust type with a fixed bus signature
pub trait BusType: Sized {
    /// Parsed signature shared by every value of this type
    fn signature_type() -> SignatureType;

    fn signature() -> Signature {
        Self::signature_type().to_signature()
    }

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> TypeResult<Self>;
}

/// Types usable as dictionary keys
pub trait BasicBusType: BusType {
    const BASIC: BasicType;
}

fn mismatch<T: BusType>(found: &Value) -> TypeError {
    TypeError::mismatch(T::signature_type().to_string(), found.value_type().to_string())
}

macro_rules! impl_basic_bus_type {
    ($ty:ty, $basic:ident, $case:ident, copy) => {
        impl BusType for $ty {
            fn signature_type() -> SignatureType {
                SignatureType::Basic(BasicType::$basic)
            }

            fn to_value(&self) -> Value {
                Value::$case(*self)
            }

            fn from_value(value: Value) -> TypeResult<Self> {
                match value {
                    Value::$case(v) => Ok(v),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
    ($ty:ty, $basic:ident, $case:ident, clone) => {
        impl BusType for $ty {
            fn signature_type() -> SignatureType {
                SignatureType::Basic(BasicType::$basic)
            }

            fn to_value(&self) -> Value {
                Value::$case(self.clone())
            }

            fn from_value(value: Value) -> TypeResult<Self> {
                match value {
                    Value::$case(v) => Ok(v),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

impl_basic_bus_type!(u8, Byte, Byte, copy);
impl_basic_bus_type!(bool, Boolean, Bool, copy);
impl_basic_bus_type!(i16, Int16, Int16, copy);
impl_basic_bus_type!(u16, Uint16, Uint16, copy);
impl_basic_bus_type!(i32, Int32, Int32, copy);
impl_basic_bus_type!(u32, Uint32, Uint32, copy);
impl_basic_bus_type!(i64, Int64, Int64, copy);
impl_basic_bus_type!(u64, Uint64, Uint64, copy);
impl_basic_bus_type!(f64, Double, Double, copy);
impl_basic_bus_type!(UnixFd, UnixFd, UnixFd, copy);
impl_basic_bus_type!(String, String, String, clone);
impl_basic_bus_type!(ObjectPath, ObjectPath, ObjectPath, clone);
impl_basic_bus_type!(Signature, Signature, Signature, clone);

macro_rules! impl_basic_key {
    ($($ty:ty => $basic:ident),+ $(,)?) => {
        $(impl BasicBusType for $ty {
            const BASIC: BasicType = BasicType::$basic;
        })+
    };
}

impl_basic_key!(
    u8 => Byte,
    bool => Boolean,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    UnixFd => UnixFd,
    String => String,
    ObjectPath => ObjectPath,
    Signature => Signature,
);

impl BusType for Variant {
    fn signature_type() -> SignatureType {
        SignatureType::Variant
    }

    fn to_value(&self) -> Value {
        Value::Variant(self.clone())
    }

    fn from_value(value: Value) -> TypeResult<Self> {
        match value {
            Value::Variant(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: BusType> BusType for Vec<T> {
    fn signature_type() -> SignatureType {
        SignatureType::Array(Box::new(T::signature_type()))
    }

    fn to_value(&self) -> Value {
        Value::Array(Array::new_unchecked(
            T::signature_type(),
            self.iter().map(BusType::to_value).collect(),
        ))
    }

    fn from_value(value: Value) -> TypeResult<Self> {
        match value {
            Value::Array(array) if *array.element_type() == T::signature_type() => {
                array.into_items().into_iter().map(T::from_value).collect()
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

fn dict_from_value<K, V, C>(value: Value) -> TypeResult<C>
where
    K: BasicBusType,
    V: BusType,
    C: BusType + FromIterator<(K, V)>,
{
    match value {
        Value::Dict(dict) if dict.key_type() == K::BASIC && *dict.value_type() == V::signature_type() => dict
            .into_entries()
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect(),
        other => Err(mismatch::<C>(&other)),
    }
}

impl<K, V, S> BusType for HashMap<K, V, S>
where
    K: BasicBusType + Eq + Hash,
    V: BusType,
    S: BuildHasher + Default,
{
    fn signature_type() -> SignatureType {
        SignatureType::Dict {
            key: K::BASIC,
            value: Box::new(V::signature_type()),
        }
    }

    fn to_value(&self) -> Value {
        Value::Dict(Dict::new_unchecked(
            K::BASIC,
            V::signature_type(),
            self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect(),
        ))
    }

    fn from_value(value: Value) -> TypeResult<Self> {
        dict_from_value::<K, V, Self>(value)
    }
}

impl<K, V> BusType for BTreeMap<K, V>
where
    K: BasicBusType + Ord,
    V: BusType,
{
    fn signature_type() -> SignatureType {
        SignatureType::Dict {
            key: K::BASIC,
            value: Box::new(V::signature_type()),
        }
    }

    fn to_value(&self) -> Value {
        Value::Dict(Dict::new_unchecked(
            K::BASIC,
            V::signature_type(),
            self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect(),
        ))
    }

    fn from_value(value: Value) -> TypeResult<Self> {
        dict_from_value::<K, V, Self>(value)
    }
}

macro_rules! impl_tuple_bus_type {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: BusType),+> BusType for ($($name,)+) {
            fn signature_type() -> SignatureType {
                SignatureType::Struct(vec![$($name::signature_type()),+])
            }

            fn to_value(&self) -> Value {
                Value::Struct(vec![$(self.$idx.to_value()),+])
            }

            fn from_value(value: Value) -> TypeResult<Self> {
                const ARITY: usize = [$(stringify!($name)),+].len();
                match value {
                    Value::Struct(members) if members.len() == ARITY => {
                        let mut members = members.into_iter();
                        Ok(($(
                            $name::from_value(members.next().ok_or_else(|| {
                                TypeError::Invalid(format!("struct member {} missing", $idx))
                            })?)?,
                        )+))
                    }
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

impl_tuple_bus_type!(A: 0);
impl_tuple_bus_type!(A: 0, B: 1);
impl_tuple_bus_type!(A: 0, B: 1, C: 2);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
impl_tuple_bus_type!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
