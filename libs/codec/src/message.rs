//! # Message
//!
//! One bus message: header fields plus a body of values described by a
//! signature string.
//!
//! ## Lifecycle
//!
//! ```text
//! new (unsealed) ──append/open/close──▶ seal() ──read/enter/exit──▶ rewind(true) ─┐
//!        ▲                                 │                                       │
//!        └───────────── rewind(false) ◀────┴───────────────────────────────────────┘
//! ```
//!
//! Writes validate each value against the container currently open: a struct
//! accepts exactly its declared members in order, an array only its element
//! type, a variant exactly one value of its declared type. At the top level
//! the body signature grows with each appended value.
//!
//! Reads walk the same order through a cursor and fail with a type mismatch
//! when the requested type differs from the signature at the cursor. A failed
//! read leaves the cursor where it was.
//!
//! ## Shallow Copies
//!
//! A shallow copy shares the body bytes of its source and is read-only. The
//! source owns a token carrying a generation counter and a released flag;
//! appending to the source bumps the generation and dropping it sets the flag.
//! Reading a copy whose token moved on fails with [`CodecError::Invalidated`]
//! instead of returning stale data. Deep copies own an independent body.

use crate::error::{CodecError, CodecResult};
use crate::marshal::{alignment_of_code, Reader, Writer};
use bus_types::{
    parse_one, BusName, BusType, ErrorName, InterfaceName, MemberName, ObjectPath, Signature,
    SignatureType, Value, MAX_SIGNATURE_LENGTH,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Message type byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(MessageKind::MethodCall),
            2 => Ok(MessageKind::MethodReturn),
            3 => Ok(MessageKind::Error),
            4 => Ok(MessageKind::Signal),
            other => Err(CodecError::InvalidHeader(format!("unknown message type {other}"))),
        }
    }
}

/// Header flag bits
pub mod flags {
    /// The caller does not want a reply
    pub const NO_REPLY_EXPECTED: u8 = 0x1;
    /// Do not start a service to handle this call
    pub const NO_AUTO_START: u8 = 0x2;
}

/// Sender credentials attached by the transport on receipt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub pid: Option<u32>,
    pub uid: Option<u32>,
    pub euid: Option<u32>,
    pub gid: Option<u32>,
    pub egid: Option<u32>,
    pub supplementary_gids: Vec<u32>,
    pub security_label: Option<String>,
}

/// Container kinds for [`Message::open_container`] and [`Message::enter_container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Struct,
    Array,
    DictEntry,
    Variant,
}

impl ContainerKind {
    /// Signature text of a container holding `contents`
    fn type_text(self, contents: &str) -> String {
        match self {
            ContainerKind::Struct => format!("({contents})"),
            ContainerKind::Array => format!("a{contents}"),
            ContainerKind::DictEntry => format!("{{{contents}}}"),
            ContainerKind::Variant => "v".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct BodyToken {
    generation: AtomicU64,
    released: AtomicBool,
}

#[derive(Debug, Clone)]
enum WriteFrame {
    /// Struct or dict entry: members are consumed in signature order
    Sequence {
        kind: ContainerKind,
        contents: String,
        pos: usize,
    },
    Array {
        element: String,
        len_at: usize,
        start: usize,
    },
    Variant {
        contents: String,
        written: bool,
    },
}

#[derive(Debug, Clone)]
enum ReadFrame {
    Sequence { contents: String, pos: usize },
    Array { element: String, end: usize },
    Variant { contents: String, consumed: bool },
}

#[derive(Debug, Clone, Default)]
struct Cursor {
    offset: usize,
    sig_pos: usize,
    frames: Vec<ReadFrame>,
}

pub struct Message {
    pub(crate) kind: MessageKind,
    pub(crate) flags: u8,
    pub(crate) serial: u32,
    pub(crate) reply_serial: Option<u32>,
    pub(crate) path: Option<ObjectPath>,
    pub(crate) interface: Option<InterfaceName>,
    pub(crate) member: Option<MemberName>,
    pub(crate) error_name: Option<ErrorName>,
    pub(crate) destination: Option<BusName>,
    pub(crate) sender: Option<BusName>,
    credentials: Option<Credentials>,
    pub(crate) signature: String,
    pub(crate) body: Arc<Vec<u8>>,
    token: Arc<BodyToken>,
    /// Generation observed when this shallow copy was taken
    borrowed: Option<u64>,
    pub(crate) sealed: bool,
    writer: Vec<WriteFrame>,
    cursor: Cursor,
}

impl Message {
    pub(crate) fn blank(kind: MessageKind) -> Self {
        Self {
            kind,
            flags: 0,
            serial: 0,
            reply_serial: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            destination: None,
            sender: None,
            credentials: None,
            signature: String::new(),
            body: Arc::new(Vec::new()),
            token: Arc::new(BodyToken::default()),
            borrowed: None,
            sealed: false,
            writer: Vec::new(),
            cursor: Cursor::default(),
        }
    }

    /// Outgoing method call
    pub fn method_call(
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> CodecResult<Self> {
        let mut msg = Self::blank(MessageKind::MethodCall);
        msg.destination = destination.map(BusName::new).transpose()?;
        msg.path = Some(ObjectPath::new(path)?);
        msg.interface = interface.map(InterfaceName::new).transpose()?;
        msg.member = Some(MemberName::new(member)?);
        Ok(msg)
    }

    /// Outgoing broadcast signal
    pub fn signal(path: &str, interface: &str, member: &str) -> CodecResult<Self> {
        let mut msg = Self::blank(MessageKind::Signal);
        msg.path = Some(ObjectPath::new(path)?);
        msg.interface = Some(InterfaceName::new(interface)?);
        msg.member = Some(MemberName::new(member)?);
        Ok(msg)
    }

    /// Empty, unsealed method return addressed to the caller
    pub fn create_reply(&self) -> CodecResult<Message> {
        self.expect_call("create_reply")?;
        let mut reply = Self::blank(MessageKind::MethodReturn);
        reply.reply_serial = Some(self.serial);
        reply.destination = self.sender.clone();
        Ok(reply)
    }

    /// Empty, unsealed method return to the call `reply_serial`
    pub fn method_return(reply_serial: u32, destination: Option<&str>) -> CodecResult<Message> {
        let mut reply = Self::blank(MessageKind::MethodReturn);
        reply.reply_serial = Some(reply_serial);
        reply.destination = destination.map(BusName::new).transpose()?;
        Ok(reply)
    }

    /// Sealed error reply carrying `message` as its single string argument
    pub fn create_error_reply(&self, name: &str, message: &str) -> CodecResult<Message> {
        self.expect_call("create_error_reply")?;
        let destination = self.sender.as_ref().map(|s| s.as_str());
        Self::error(self.serial, destination, name, message)
    }

    /// Sealed error reply to the call `reply_serial`, built without the call itself
    pub fn error(
        reply_serial: u32,
        destination: Option<&str>,
        name: &str,
        message: &str,
    ) -> CodecResult<Message> {
        let mut reply = Self::blank(MessageKind::Error);
        reply.error_name = Some(ErrorName::new(name)?);
        reply.reply_serial = Some(reply_serial);
        reply.destination = destination.map(BusName::new).transpose()?;
        reply.append(&message.to_string())?;
        reply.seal()?;
        Ok(reply)
    }

    fn expect_call(&self, operation: &'static str) -> CodecResult<()> {
        if self.kind != MessageKind::MethodCall {
            return Err(CodecError::structural(
                operation,
                format!("replies can only be created for method calls, not {:?}", self.kind),
            ));
        }
        Ok(())
    }

    // ----- header -----

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Assigned by the transport when the message is sent
    pub fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_no_reply_expected(&mut self, value: bool) {
        if value {
            self.flags |= flags::NO_REPLY_EXPECTED;
        } else {
            self.flags &= !flags::NO_REPLY_EXPECTED;
        }
    }

    /// Method calls expect a reply unless flagged otherwise
    pub fn expects_reply(&self) -> bool {
        self.kind == MessageKind::MethodCall && self.flags & flags::NO_REPLY_EXPECTED == 0
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_ref()
    }

    pub fn interface(&self) -> Option<&InterfaceName> {
        self.interface.as_ref()
    }

    pub fn member(&self) -> Option<&MemberName> {
        self.member.as_ref()
    }

    pub fn error_name(&self) -> Option<&ErrorName> {
        self.error_name.as_ref()
    }

    pub fn destination(&self) -> Option<&BusName> {
        self.destination.as_ref()
    }

    pub fn set_destination(&mut self, destination: Option<&str>) -> CodecResult<()> {
        self.destination = destination.map(BusName::new).transpose()?;
        Ok(())
    }

    pub fn sender(&self) -> Option<&BusName> {
        self.sender.as_ref()
    }

    /// Stamped by the transport with the sending connection's unique name
    pub fn set_sender(&mut self, sender: &str) -> CodecResult<()> {
        self.sender = Some(BusName::new(sender)?);
        Ok(())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Body signature (empty when the message carries no values)
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Text of an error reply (its first string argument)
    pub fn error_message(&self) -> Option<String> {
        if self.kind != MessageKind::Error || !self.signature.starts_with('s') {
            return None;
        }
        self.check_readable().ok()?;
        Reader::new(&self.body, 0).get_str().ok().map(str::to_string)
    }

    // ----- writing -----

    fn touch(&mut self) -> CodecResult<()> {
        if self.borrowed.is_some() {
            return Err(CodecError::structural("append", "shallow copies are read-only"));
        }
        if self.sealed {
            return Err(CodecError::Sealed);
        }
        self.token.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Check `ty` against the innermost open container and consume it
    ///
    /// Mutates nothing on failure.
    fn expect_next(signature: &mut String, frames: &mut [WriteFrame], ty: &str) -> CodecResult<()> {
        match frames.last_mut() {
            None => {
                if ty.starts_with('{') {
                    return Err(CodecError::structural(
                        "append",
                        "dictionary entries may only appear inside an array",
                    ));
                }
                if signature.len() + ty.len() > MAX_SIGNATURE_LENGTH {
                    return Err(bus_types::SignatureError::TooLong {
                        length: signature.len() + ty.len(),
                        max: MAX_SIGNATURE_LENGTH,
                    }
                    .into());
                }
                signature.push_str(ty);
            }
            Some(WriteFrame::Sequence { kind, contents, pos }) => {
                if *pos >= contents.len() {
                    return Err(CodecError::structural(
                        "append",
                        format!("{kind:?} '{contents}' already has all of its members"),
                    ));
                }
                let len = parse_one(contents, *pos)?;
                let expected = &contents[*pos..*pos + len];
                if expected != ty {
                    return Err(CodecError::mismatch(expected, ty));
                }
                *pos += len;
            }
            Some(WriteFrame::Array { element, .. }) => {
                if element != ty {
                    return Err(CodecError::mismatch(element.as_str(), ty));
                }
            }
            Some(WriteFrame::Variant { contents, written }) => {
                if *written {
                    return Err(CodecError::structural(
                        "append",
                        "variant already holds its value",
                    ));
                }
                if contents != ty {
                    return Err(CodecError::mismatch(contents.as_str(), ty));
                }
                *written = true;
            }
        }
        Ok(())
    }

    /// Append one typed value
    pub fn append<T: BusType>(&mut self, value: &T) -> CodecResult<()> {
        self.append_value(&value.to_value())
    }

    /// Append one dynamic value; on failure the message is left unchanged
    pub fn append_value(&mut self, value: &Value) -> CodecResult<()> {
        self.touch()?;
        let ty = value.signature();
        let saved_sig = self.signature.len();
        let saved_frame = self.writer.last().cloned();
        let body = Arc::make_mut(&mut self.body);
        let saved_len = body.len();

        let result = Self::expect_next(&mut self.signature, &mut self.writer, ty.as_str())
            .and_then(|()| Writer::new(body).write_value(value));
        if let Err(err) = result {
            body.truncate(saved_len);
            self.signature.truncate(saved_sig);
            if let (Some(frame), Some(last)) = (saved_frame, self.writer.last_mut()) {
                *last = frame;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Append each value in order
    pub fn append_values<'v>(&mut self, values: impl IntoIterator<Item = &'v Value>) -> CodecResult<()> {
        for value in values {
            self.append_value(value)?;
        }
        Ok(())
    }

    /// Open a struct, array, dict entry or variant for writing
    ///
    /// `contents` is the member signature for structs and dict entries, the
    /// element signature for arrays (`{sv}` for a dictionary), and the payload
    /// type for variants.
    pub fn open_container(&mut self, kind: ContainerKind, contents: &str) -> CodecResult<()> {
        self.touch()?;
        match kind {
            ContainerKind::Struct | ContainerKind::Array => {
                SignatureType::parse(&kind.type_text(contents))?;
            }
            ContainerKind::DictEntry => {
                SignatureType::parse(&format!("a{{{contents}}}"))?;
            }
            ContainerKind::Variant => {
                SignatureType::parse(contents)?;
            }
        }
        let ty = kind.type_text(contents);
        Self::expect_next(&mut self.signature, &mut self.writer, &ty)?;

        let mut writer = Writer::new(Arc::make_mut(&mut self.body));
        let frame = match kind {
            ContainerKind::Struct | ContainerKind::DictEntry => {
                writer.pad(8);
                WriteFrame::Sequence {
                    kind,
                    contents: contents.to_string(),
                    pos: 0,
                }
            }
            ContainerKind::Array => {
                let len_at = writer.put_length_placeholder();
                writer.pad(contents.bytes().next().map(alignment_of_code).unwrap_or(1));
                WriteFrame::Array {
                    element: contents.to_string(),
                    len_at,
                    start: writer.position(),
                }
            }
            ContainerKind::Variant => {
                writer.put_signature(contents)?;
                WriteFrame::Variant {
                    contents: contents.to_string(),
                    written: false,
                }
            }
        };
        self.writer.push(frame);
        Ok(())
    }

    /// Close the innermost open container
    pub fn close_container(&mut self) -> CodecResult<()> {
        self.touch()?;
        match self.writer.last() {
            None => {
                return Err(CodecError::structural(
                    "close_container",
                    "no container is open",
                ))
            }
            Some(WriteFrame::Sequence { kind, contents, pos }) if *pos < contents.len() => {
                return Err(CodecError::structural(
                    "close_container",
                    format!("{kind:?} '{contents}' is missing members after offset {pos}"),
                ))
            }
            Some(WriteFrame::Variant {
                contents,
                written: false,
            }) => {
                return Err(CodecError::structural(
                    "close_container",
                    format!("variant of '{contents}' was closed without a value"),
                ))
            }
            Some(WriteFrame::Array { len_at, start, .. }) => {
                let (len_at, start) = (*len_at, *start);
                Writer::new(Arc::make_mut(&mut self.body)).finish_array(len_at, start)?;
            }
            Some(_) => {}
        }
        self.writer.pop();
        Ok(())
    }

    /// Freeze the body for sending or reading
    pub fn seal(&mut self) -> CodecResult<()> {
        if self.sealed {
            return Ok(());
        }
        if let Some(frame) = self.writer.last() {
            return Err(CodecError::structural(
                "seal",
                format!("container still open: {frame:?}"),
            ));
        }
        self.sealed = true;
        self.cursor = Cursor::default();
        Ok(())
    }

    // ----- reading -----

    fn check_readable(&self) -> CodecResult<()> {
        if !self.sealed {
            return Err(CodecError::NotSealed);
        }
        if let Some(generation) = self.borrowed {
            if self.token.released.load(Ordering::Acquire) {
                return Err(CodecError::Invalidated { reason: "released" });
            }
            if self.token.generation.load(Ordering::Acquire) != generation {
                return Err(CodecError::Invalidated { reason: "modified" });
            }
        }
        Ok(())
    }

    /// Signature text of the next value in the current scope
    fn next_type(&self) -> CodecResult<Option<String>> {
        let (text, pos) = match self.cursor.frames.last() {
            None => (self.signature.as_str(), self.cursor.sig_pos),
            Some(ReadFrame::Sequence { contents, pos }) => (contents.as_str(), *pos),
            Some(ReadFrame::Array { element, end }) => {
                return Ok((self.cursor.offset < *end).then(|| element.clone()))
            }
            Some(ReadFrame::Variant { contents, consumed }) => {
                return Ok((!*consumed).then(|| contents.clone()))
            }
        };
        if pos >= text.len() {
            return Ok(None);
        }
        let len = parse_one(text, pos)?;
        Ok(Some(text[pos..pos + len].to_string()))
    }

    fn advance(&mut self, ty: &str) {
        match self.cursor.frames.last_mut() {
            None => self.cursor.sig_pos += ty.len(),
            Some(ReadFrame::Sequence { pos, .. }) => *pos += ty.len(),
            Some(ReadFrame::Array { .. }) => {}
            Some(ReadFrame::Variant { consumed, .. }) => *consumed = true,
        }
    }

    fn check_scope_end(&self, offset: usize) -> CodecResult<()> {
        if let Some(ReadFrame::Array { end, .. }) = self.cursor.frames.last() {
            if offset > *end {
                return Err(CodecError::structural(
                    "read",
                    format!("value ends at {offset}, past the enclosing array end {end}"),
                ));
            }
        }
        Ok(())
    }

    fn next_or_end(&self, operation: &'static str) -> CodecResult<String> {
        self.next_type()?.ok_or_else(|| {
            CodecError::structural(operation, "no more values in the current scope")
        })
    }

    /// Signature of the value at the cursor, `None` at the end of the scope
    pub fn peek_type(&self) -> CodecResult<Option<String>> {
        self.check_readable()?;
        self.next_type()
    }

    /// Whether the cursor is at the end of the current scope
    pub fn at_end(&self) -> CodecResult<bool> {
        Ok(self.peek_type()?.is_none())
    }

    /// Read the next value as `T`, which must have exactly the signature at the cursor
    pub fn read<T: BusType>(&mut self) -> CodecResult<T> {
        self.check_readable()?;
        let expected = T::signature();
        let found = self.next_or_end("read")?;
        if found != expected.as_str() {
            return Err(CodecError::mismatch(expected.as_str(), found));
        }
        Ok(T::from_value(self.read_value()?)?)
    }

    /// Read the next value whatever its type
    pub fn read_value(&mut self) -> CodecResult<Value> {
        self.check_readable()?;
        let ty = self.next_or_end("read")?;
        if ty.starts_with('{') {
            return Err(CodecError::structural(
                "read",
                "enter the dictionary entry before reading its key and value",
            ));
        }
        let parsed = SignatureType::parse(&ty)?;
        let mut reader = Reader::new(&self.body, self.cursor.offset);
        let value = reader.read_value(&parsed)?;
        let end = reader.position();
        self.check_scope_end(end)?;
        self.cursor.offset = end;
        self.advance(&ty);
        Ok(value)
    }

    /// Read every remaining value of the current scope
    pub fn read_all(&mut self) -> CodecResult<Vec<Value>> {
        let mut out = Vec::new();
        while self.peek_type()?.is_some() {
            out.push(self.read_value()?);
        }
        Ok(out)
    }

    /// Enter a container at the cursor
    ///
    /// For variants an empty `contents` accepts any payload type; otherwise the
    /// payload signature must equal `contents`.
    pub fn enter_container(&mut self, kind: ContainerKind, contents: &str) -> CodecResult<()> {
        self.check_readable()?;
        let found = self.next_or_end("enter_container")?;
        let expected = kind.type_text(contents);
        if found != expected {
            return Err(CodecError::mismatch(expected, found));
        }

        let mut reader = Reader::new(&self.body, self.cursor.offset);
        let frame = match kind {
            ContainerKind::Struct | ContainerKind::DictEntry => {
                reader.align(8)?;
                ReadFrame::Sequence {
                    contents: contents.to_string(),
                    pos: 0,
                }
            }
            ContainerKind::Array => {
                let align = contents.bytes().next().map(alignment_of_code).unwrap_or(1);
                let end = reader.array_bounds(align)?;
                self.check_scope_end(end)?;
                ReadFrame::Array {
                    element: contents.to_string(),
                    end,
                }
            }
            ContainerKind::Variant => {
                let signature = reader.get_signature()?;
                if !signature.is_single_complete_type() {
                    return Err(CodecError::invalid_encoding(
                        self.cursor.offset,
                        format!("variant signature '{signature}' is not a single complete type"),
                    ));
                }
                if !contents.is_empty() && signature.as_str() != contents {
                    return Err(CodecError::mismatch(contents, signature.as_str()));
                }
                ReadFrame::Variant {
                    contents: signature.into_inner(),
                    consumed: false,
                }
            }
        };
        self.check_scope_end(reader.position())?;
        self.cursor.offset = reader.position();
        self.advance(&found);
        self.cursor.frames.push(frame);
        Ok(())
    }

    /// Leave the innermost entered container, skipping anything unread
    pub fn exit_container(&mut self) -> CodecResult<()> {
        self.check_readable()?;
        match self.cursor.frames.last() {
            None => {
                return Err(CodecError::structural(
                    "exit_container",
                    "no container has been entered",
                ))
            }
            Some(ReadFrame::Array { end, .. }) => self.cursor.offset = *end,
            Some(_) => {
                while self.next_type()?.is_some() {
                    self.read_value()?;
                }
            }
        }
        self.cursor.frames.pop();
        Ok(())
    }

    /// Reset the read cursor to the start of the body
    ///
    /// With `keep_seal == false` the message is unsealed so more values can be
    /// appended; shallow copies cannot be unsealed.
    pub fn rewind(&mut self, keep_seal: bool) -> CodecResult<()> {
        if !keep_seal && self.sealed {
            if self.borrowed.is_some() {
                return Err(CodecError::structural("rewind", "shallow copies are read-only"));
            }
            self.sealed = false;
        }
        self.cursor = Cursor::default();
        Ok(())
    }

    /// Every top-level value, without moving this message's cursor
    pub fn values(&self) -> CodecResult<Vec<Value>> {
        self.check_readable()?;
        let mut reader = Reader::new(&self.body, 0);
        let signature = Signature::new(self.signature.as_str())?;
        signature
            .types()?
            .iter()
            .map(|ty| reader.read_value(ty))
            .collect()
    }

    // ----- copies -----

    /// Replace `other`'s body with this message's body
    ///
    /// A deep copy owns independent bytes. A shallow copy shares them, is
    /// sealed and read-only, and becomes unreadable once this message is
    /// modified or dropped. Header fields of `other` are left as they are.
    pub fn copy_to(&self, other: &mut Message, deep: bool) -> CodecResult<()> {
        if !self.writer.is_empty() {
            return Err(CodecError::structural(
                "copy_to",
                "cannot copy while containers are open",
            ));
        }
        if self.borrowed.is_some() {
            self.check_readable()?;
        }
        if other.borrowed.is_none() {
            // other's own shallow copies lose their source
            other.token.released.store(true, Ordering::Release);
        }
        if deep {
            other.body = Arc::new(self.body.as_ref().clone());
            other.token = Arc::new(BodyToken::default());
            other.borrowed = None;
            other.sealed = self.sealed;
        } else {
            other.body = Arc::clone(&self.body);
            other.token = Arc::clone(&self.token);
            other.borrowed = Some(
                self.borrowed
                    .unwrap_or_else(|| self.token.generation.load(Ordering::Acquire)),
            );
            other.sealed = true;
        }
        other.signature = self.signature.clone();
        other.writer.clear();
        other.cursor = Cursor::default();
        Ok(())
    }

    fn header_clone(&self) -> Message {
        let mut msg = Self::blank(self.kind);
        msg.flags = self.flags;
        msg.serial = self.serial;
        msg.reply_serial = self.reply_serial;
        msg.path = self.path.clone();
        msg.interface = self.interface.clone();
        msg.member = self.member.clone();
        msg.error_name = self.error_name.clone();
        msg.destination = self.destination.clone();
        msg.sender = self.sender.clone();
        msg.credentials = self.credentials.clone();
        msg
    }

    /// Header plus shared body, rewound
    pub fn shallow_copy(&self) -> CodecResult<Message> {
        let mut copy = self.header_clone();
        self.copy_to(&mut copy, false)?;
        Ok(copy)
    }

    /// Header plus independent body, rewound
    pub fn deep_copy(&self) -> CodecResult<Message> {
        let mut copy = self.header_clone();
        self.copy_to(&mut copy, true)?;
        Ok(copy)
    }

    /// Whether this is a shallow copy that can still be read
    pub fn is_valid(&self) -> bool {
        self.borrowed.is_none() || self.check_readable().is_ok()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.borrowed.is_none() {
            self.token.released.store(true, Ordering::Release);
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("serial", &self.serial)
            .field("reply_serial", &self.reply_serial)
            .field("path", &self.path.as_deref())
            .field("interface", &self.interface.as_deref())
            .field("member", &self.member.as_deref())
            .field("error_name", &self.error_name.as_deref())
            .field("destination", &self.destination.as_deref())
            .field("sender", &self.sender.as_deref())
            .field("signature", &self.signature)
            .field("body_len", &self.body.len())
            .field("sealed", &self.sealed)
            .finish()
    }
}
