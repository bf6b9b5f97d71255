//! Protocol layer: signature grammar, value model and well-known names

pub mod bus_type;
pub mod constants;
pub mod signature;
pub mod value;
pub mod variant;

pub use bus_type::{BasicBusType, BusType};
pub use signature::{
    parse_one, split_complete_types, BasicType, Signature, SignatureType, MAX_ARRAY_DEPTH,
    MAX_SIGNATURE_LENGTH, MAX_STRUCT_DEPTH,
};
pub use value::{Array, Dict, Value};
pub use variant::Variant;
