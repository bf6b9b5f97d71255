//! # Wire Framing
//!
//! Encodes a sealed [`Message`] into the standard little-endian frame and
//! decodes frames back into sealed messages.
//!
//! ```text
//! ┌──────┬──────┬───────┬─────────┬──────────┬────────┬──────────────────┬─────┬──────┐
//! │ 'l'  │ type │ flags │ version │ body len │ serial │ fields a(yv)     │ pad │ body │
//! │ u8   │ u8   │ u8    │ u8 = 1  │ u32      │ u32    │ u32 len + structs│ → 8 │      │
//! └──────┴──────┴───────┴─────────┴──────────┴────────┴──────────────────┴─────┴──────┘
//! ```
//!
//! Decoding validates everything before handing the message out: header
//! field types, required fields per message kind, the body signature, and the
//! body bytes themselves (walked once against the signature), so later reads
//! can only fail on type mismatches chosen by the caller.

use crate::error::{CodecError, CodecResult};
use crate::marshal::{padding, Reader, Writer};
use crate::message::{Message, MessageKind};
use bus_types::{BusName, ErrorName, InterfaceName, MemberName, Signature, Value, Variant};
use tracing::debug;

/// Maximum size of one encoded message
pub const MAX_MESSAGE_LENGTH: usize = 128 * 1024 * 1024;

/// Protocol version byte
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header plus the header-field array length
pub const FIXED_HEADER_LENGTH: usize = 16;

const LITTLE_ENDIAN: u8 = b'l';
const BIG_ENDIAN: u8 = b'B';

/// Header field codes
mod field {
    pub const PATH: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const MEMBER: u8 = 3;
    pub const ERROR_NAME: u8 = 4;
    pub const REPLY_SERIAL: u8 = 5;
    pub const DESTINATION: u8 = 6;
    pub const SENDER: u8 = 7;
    pub const SIGNATURE: u8 = 8;
    pub const UNIX_FDS: u8 = 9;
}

/// Total frame length announced by a frame prefix
///
/// Returns `Ok(None)` until at least [`FIXED_HEADER_LENGTH`] bytes are
/// available. Stream transports use this to cut frames out of a byte stream.
pub fn frame_length(prefix: &[u8]) -> CodecResult<Option<usize>> {
    if prefix.len() < FIXED_HEADER_LENGTH {
        return Ok(None);
    }
    check_endianness(prefix[0])?;
    let mut reader = Reader::new(prefix, 4);
    let body_len = reader.get_u32()? as usize;
    reader.get_u32()?;
    let fields_len = reader.get_u32()? as usize;
    let header = FIXED_HEADER_LENGTH + fields_len;
    let total = header + padding(header, 8) + body_len;
    if total > MAX_MESSAGE_LENGTH {
        return Err(CodecError::MessageTooLarge {
            size: total,
            max: MAX_MESSAGE_LENGTH,
        });
    }
    Ok(Some(total))
}

fn check_endianness(marker: u8) -> CodecResult<()> {
    match marker {
        LITTLE_ENDIAN => Ok(()),
        BIG_ENDIAN => Err(CodecError::InvalidHeader(
            "big-endian frames are not supported".into(),
        )),
        other => Err(CodecError::InvalidHeader(format!(
            "bad endianness marker {other:#04x}"
        ))),
    }
}

impl Message {
    /// Header fields in wire order
    fn header_fields(&self) -> CodecResult<Vec<(u8, Value)>> {
        let mut fields = Vec::with_capacity(8);
        if let Some(path) = &self.path {
            fields.push((field::PATH, Value::ObjectPath(path.clone())));
        }
        if let Some(interface) = &self.interface {
            fields.push((field::INTERFACE, Value::String(interface.to_string())));
        }
        if let Some(member) = &self.member {
            fields.push((field::MEMBER, Value::String(member.to_string())));
        }
        if let Some(name) = &self.error_name {
            fields.push((field::ERROR_NAME, Value::String(name.to_string())));
        }
        if let Some(serial) = self.reply_serial {
            fields.push((field::REPLY_SERIAL, Value::Uint32(serial)));
        }
        if let Some(destination) = &self.destination {
            fields.push((field::DESTINATION, Value::String(destination.to_string())));
        }
        if let Some(sender) = &self.sender {
            fields.push((field::SENDER, Value::String(sender.to_string())));
        }
        if !self.signature.is_empty() {
            fields.push((
                field::SIGNATURE,
                Value::Signature(Signature::new(self.signature.as_str())?),
            ));
        }
        Ok(fields)
    }

    /// Fields every message of this kind must carry
    pub fn check_required_fields(&self) -> CodecResult<()> {
        let missing = match self.kind {
            MessageKind::MethodCall if self.path.is_none() => Some("path"),
            MessageKind::MethodCall if self.member.is_none() => Some("member"),
            MessageKind::Signal if self.path.is_none() => Some("path"),
            MessageKind::Signal if self.interface.is_none() => Some("interface"),
            MessageKind::Signal if self.member.is_none() => Some("member"),
            MessageKind::Error if self.error_name.is_none() => Some("error name"),
            MessageKind::Error | MessageKind::MethodReturn if self.reply_serial.is_none() => {
                Some("reply serial")
            }
            _ => None,
        };
        match missing {
            Some(name) => Err(CodecError::InvalidHeader(format!(
                "{:?} message is missing its {name} field",
                self.kind
            ))),
            None => Ok(()),
        }
    }

    /// Encode into one wire frame; the message must be sealed and have a serial
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        if !self.sealed {
            return Err(CodecError::NotSealed);
        }
        if !self.is_valid() {
            return Err(CodecError::Invalidated {
                reason: "modified or released",
            });
        }
        if self.serial == 0 {
            return Err(CodecError::InvalidHeader("serial has not been assigned".into()));
        }
        self.check_required_fields()?;

        let mut buf = Vec::with_capacity(FIXED_HEADER_LENGTH + 128 + self.body.len());
        let mut writer = Writer::new(&mut buf);
        writer.put_u8(LITTLE_ENDIAN);
        writer.put_u8(self.kind as u8);
        writer.put_u8(self.flags);
        writer.put_u8(PROTOCOL_VERSION);
        writer.put_u32(self.body.len() as u32);
        writer.put_u32(self.serial);

        let len_at = writer.put_length_placeholder();
        writer.pad(8);
        let start = writer.position();
        for (code, value) in self.header_fields()? {
            writer.pad(8);
            writer.put_u8(code);
            writer.write_variant(&Variant::from_value(value))?;
        }
        writer.finish_array(len_at, start)?;
        writer.pad(8);
        buf.extend_from_slice(&self.body);

        if buf.len() > MAX_MESSAGE_LENGTH {
            return Err(CodecError::MessageTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_LENGTH,
            });
        }
        Ok(buf)
    }

    /// Decode exactly one frame into a sealed message
    pub fn decode(bytes: &[u8]) -> CodecResult<Message> {
        if bytes.len() < FIXED_HEADER_LENGTH {
            return Err(CodecError::truncated(
                FIXED_HEADER_LENGTH,
                0,
                bytes.len(),
                "fixed header",
            ));
        }
        if bytes.len() > MAX_MESSAGE_LENGTH {
            return Err(CodecError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_LENGTH,
            });
        }
        check_endianness(bytes[0])?;
        let kind = MessageKind::try_from(bytes[1])?;
        if bytes[3] != PROTOCOL_VERSION {
            return Err(CodecError::InvalidHeader(format!(
                "unsupported protocol version {}",
                bytes[3]
            )));
        }

        let mut msg = Message::blank(kind);
        msg.flags = bytes[2];
        let mut reader = Reader::new(bytes, 4);
        let body_len = reader.get_u32()? as usize;
        msg.serial = reader.get_u32()?;
        if msg.serial == 0 {
            return Err(CodecError::InvalidHeader("serial must not be zero".into()));
        }

        let fields_end = reader.array_bounds(8)?;
        while reader.position() < fields_end {
            reader.align(8)?;
            let code = reader.get_u8()?;
            let value = reader.read_variant()?.into_value();
            msg.apply_header_field(code, value)?;
        }
        if reader.position() != fields_end {
            return Err(CodecError::invalid_encoding(
                reader.position(),
                "header fields overran their array",
            ));
        }
        reader.align(8)?;

        let body_start = reader.position();
        let total = body_start + body_len;
        if bytes.len() < total {
            return Err(CodecError::truncated(body_len, body_start, bytes.len(), "body"));
        }
        if bytes.len() > total {
            return Err(CodecError::InvalidHeader(format!(
                "{} trailing bytes after the body",
                bytes.len() - total
            )));
        }
        msg.check_required_fields()?;

        let body = &bytes[body_start..total];
        let signature = Signature::new(msg.signature.as_str())?;
        let mut body_reader = Reader::new(body, 0);
        for ty in signature.types()? {
            body_reader.read_value(&ty)?;
        }
        if body_reader.position() != body.len() {
            return Err(CodecError::invalid_encoding(
                body_reader.position(),
                format!("body has bytes beyond signature '{signature}'"),
            ));
        }
        msg.body = std::sync::Arc::new(body.to_vec());
        msg.sealed = true;
        Ok(msg)
    }

    fn apply_header_field(&mut self, code: u8, value: Option<Value>) -> CodecResult<()> {
        let wrong_type = |value: &Option<Value>| {
            CodecError::InvalidHeader(format!(
                "header field {code} has type '{}'",
                value
                    .as_ref()
                    .map(|v| v.signature().into_inner())
                    .unwrap_or_default()
            ))
        };
        match (code, value) {
            (field::PATH, Some(Value::ObjectPath(path))) => self.path = Some(path),
            (field::INTERFACE, Some(Value::String(s))) => {
                self.interface = Some(InterfaceName::new(s)?)
            }
            (field::MEMBER, Some(Value::String(s))) => self.member = Some(MemberName::new(s)?),
            (field::ERROR_NAME, Some(Value::String(s))) => {
                self.error_name = Some(ErrorName::new(s)?)
            }
            (field::REPLY_SERIAL, Some(Value::Uint32(serial))) => self.reply_serial = Some(serial),
            (field::DESTINATION, Some(Value::String(s))) => {
                self.destination = Some(BusName::new(s)?)
            }
            (field::SENDER, Some(Value::String(s))) => self.sender = Some(BusName::new(s)?),
            (field::SIGNATURE, Some(Value::Signature(sig))) => self.signature = sig.into_inner(),
            (field::UNIX_FDS, Some(Value::Uint32(count))) => {
                debug!(count, "ignoring unix fd count; descriptors are not carried in-process");
            }
            (field::PATH..=field::UNIX_FDS, other) => return Err(wrong_type(&other)),
            (unknown, _) => debug!(code = unknown, "ignoring unknown header field"),
        }
        Ok(())
    }
}
