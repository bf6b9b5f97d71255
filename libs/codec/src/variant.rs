//! Marshalling of dynamic values into and out of a message body

use crate::error::CodecResult;
use crate::message::Message;
use bus_types::{Value, Variant};

/// Writes a value at the message's write position, reads one at its cursor
pub trait Marshal: Sized {
    fn serialize_to(&self, message: &mut Message) -> CodecResult<()>;

    fn deserialize_from(message: &mut Message) -> CodecResult<Self>;
}

impl Marshal for Variant {
    /// Signature-prefixed payload; empty variants fail with `EmptyVariant`
    fn serialize_to(&self, message: &mut Message) -> CodecResult<()> {
        message.append(self)
    }

    fn deserialize_from(message: &mut Message) -> CodecResult<Self> {
        message.read::<Variant>()
    }
}

impl Marshal for Value {
    fn serialize_to(&self, message: &mut Message) -> CodecResult<()> {
        message.append_value(self)
    }

    fn deserialize_from(message: &mut Message) -> CodecResult<Self> {
        message.read_value()
    }
}
