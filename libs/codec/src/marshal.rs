//! # Body Marshalling
//!
//! Little-endian encoding of [`Value`] trees following the bus alignment
//! rules. Offsets are relative to the start of the buffer, which is always
//! 8-aligned within a frame, so body-relative and frame-relative padding agree.
//!
//! ```text
//! y g v        align 1    g = u8 length + bytes + NUL
//! n q          align 2
//! b i u h      align 4    b = u32 0 or 1
//! s o          align 4    u32 length + UTF-8 + NUL
//! a            align 4    u32 byte length, pad to element alignment, elements
//! x t d        align 8
//! ( ) { }      align 8
//! ```
//!
//! [`Writer`] trusts the value tree: containers built through the public
//! constructors already agree with their element types. Variant payload
//! types are the exception and are validated on write. [`Reader`] trusts
//! nothing and bounds-checks every access.

use crate::error::{CodecError, CodecResult};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bus_types::{
    Array, BasicType, Dict, ObjectPath, Signature, SignatureError, SignatureType, UnixFd, Value,
    Variant, MAX_SIGNATURE_LENGTH,
};

/// Maximum encoded size of one array payload
pub const MAX_ARRAY_LENGTH: usize = 64 * 1024 * 1024;

/// Maximum container/variant nesting accepted while decoding
pub const MAX_DECODE_DEPTH: usize = 64;

/// Padding needed to bring `offset` up to `align`
#[inline]
pub fn padding(offset: usize, align: usize) -> usize {
    (align - offset % align) % align
}

/// Alignment of the type starting with the given signature byte
pub fn alignment_of_code(code: u8) -> usize {
    match code {
        b'(' | b'{' => 8,
        b'v' => 1,
        b'a' => 4,
        other => BasicType::from_code(other).map(BasicType::alignment).unwrap_or(1),
    }
}

/// Appends encoded values to a byte buffer
pub struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn pad(&mut self, align: usize) {
        let pad = padding(self.buf.len(), align);
        self.buf.resize(self.buf.len() + pad, 0);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.pad(4);
        // Vec<u8> writes cannot fail
        let _ = self.buf.write_u32::<LittleEndian>(v);
    }

    /// Writes a u32 placeholder and returns its offset
    pub fn put_length_placeholder(&mut self) -> usize {
        self.pad(4);
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        at
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        LittleEndian::write_u32(&mut self.buf[at..at + 4], v);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Writes a signature, refusing lengths the u8 prefix cannot carry
    pub fn put_signature(&mut self, s: &str) -> CodecResult<()> {
        let length = u8::try_from(s.len()).map_err(|_| SignatureError::TooLong {
            length: s.len(),
            max: MAX_SIGNATURE_LENGTH,
        })?;
        self.buf.push(length);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Patch an array length, enforcing the array size limit
    pub fn finish_array(&mut self, len_at: usize, start: usize) -> CodecResult<()> {
        let size = self.buf.len() - start;
        if size > MAX_ARRAY_LENGTH {
            return Err(CodecError::ArrayTooLarge {
                size,
                max: MAX_ARRAY_LENGTH,
            });
        }
        self.patch_u32(len_at, size as u32);
        Ok(())
    }

    pub fn write_value(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Byte(v) => self.buf.push(*v),
            Value::Bool(v) => self.put_u32(u32::from(*v)),
            Value::Int16(v) => {
                self.pad(2);
                let _ = self.buf.write_i16::<LittleEndian>(*v);
            }
            Value::Uint16(v) => {
                self.pad(2);
                let _ = self.buf.write_u16::<LittleEndian>(*v);
            }
            Value::Int32(v) => {
                self.pad(4);
                let _ = self.buf.write_i32::<LittleEndian>(*v);
            }
            Value::Uint32(v) => self.put_u32(*v),
            Value::UnixFd(fd) => self.put_u32(fd.index()),
            Value::Int64(v) => {
                self.pad(8);
                let _ = self.buf.write_i64::<LittleEndian>(*v);
            }
            Value::Uint64(v) => {
                self.pad(8);
                let _ = self.buf.write_u64::<LittleEndian>(*v);
            }
            Value::Double(v) => {
                self.pad(8);
                let _ = self.buf.write_f64::<LittleEndian>(*v);
            }
            Value::String(s) => self.put_str(s),
            Value::ObjectPath(p) => self.put_str(p.as_str()),
            Value::Signature(g) => self.put_signature(g.as_str())?,
            Value::Variant(v) => self.write_variant(v)?,
            Value::Array(array) => {
                let len_at = self.put_length_placeholder();
                self.pad(array.element_type().alignment());
                let start = self.position();
                for item in array.items() {
                    self.write_value(item)?;
                }
                self.finish_array(len_at, start)?;
            }
            Value::Dict(dict) => {
                let len_at = self.put_length_placeholder();
                self.pad(8);
                let start = self.position();
                for (key, value) in dict.entries() {
                    self.pad(8);
                    self.write_value(key)?;
                    self.write_value(value)?;
                }
                self.finish_array(len_at, start)?;
            }
            Value::Struct(members) => {
                self.pad(8);
                for member in members {
                    self.write_value(member)?;
                }
            }
        }
        Ok(())
    }

    pub fn write_variant(&mut self, variant: &Variant) -> CodecResult<()> {
        let inner = variant.value().ok_or(CodecError::EmptyVariant)?;
        let signature = inner.signature();
        // payload type must itself be a valid single type: length and nesting
        SignatureType::parse(signature.as_str())?;
        self.put_signature(signature.as_str())?;
        self.write_value(inner)
    }
}

/// Bounds-checked decoder over a byte slice
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos, depth: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn align(&mut self, align: usize) -> CodecResult<()> {
        let pad = padding(self.pos, align);
        let bytes = self.take(pad, "alignment padding")?;
        if bytes.iter().any(|b| *b != 0) {
            return Err(CodecError::invalid_encoding(self.pos - pad, "non-zero padding"));
        }
        Ok(())
    }

    fn take(&mut self, n: usize, context: &'static str) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CodecError::truncated(n, self.pos, self.buf.len(), context))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1, "byte")?[0])
    }

    pub fn get_u16(&mut self) -> CodecResult<u16> {
        self.align(2)?;
        Ok(LittleEndian::read_u16(self.take(2, "uint16")?))
    }

    pub fn get_u32(&mut self) -> CodecResult<u32> {
        self.align(4)?;
        Ok(LittleEndian::read_u32(self.take(4, "uint32")?))
    }

    pub fn get_u64(&mut self) -> CodecResult<u64> {
        self.align(8)?;
        Ok(LittleEndian::read_u64(self.take(8, "uint64")?))
    }

    pub fn get_str(&mut self) -> CodecResult<&'a str> {
        let len = self.get_u32()? as usize;
        let start = self.pos;
        let bytes = self.take(len, "string")?;
        self.expect_nul()?;
        std::str::from_utf8(bytes)
            .map_err(|_| CodecError::invalid_encoding(start, "string is not valid UTF-8"))
    }

    pub fn get_signature(&mut self) -> CodecResult<Signature> {
        let len = self.get_u8()? as usize;
        let start = self.pos;
        let bytes = self.take(len, "signature")?;
        self.expect_nul()?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CodecError::invalid_encoding(start, "signature is not ASCII"))?;
        Ok(Signature::new(text)?)
    }

    fn expect_nul(&mut self) -> CodecResult<()> {
        let at = self.pos;
        if self.take(1, "terminator")?[0] != 0 {
            return Err(CodecError::invalid_encoding(at, "missing NUL terminator"));
        }
        Ok(())
    }

    /// Reads an array length and returns the end offset of its payload
    pub fn array_bounds(&mut self, element_align: usize) -> CodecResult<usize> {
        let len = self.get_u32()? as usize;
        if len > MAX_ARRAY_LENGTH {
            return Err(CodecError::ArrayTooLarge {
                size: len,
                max: MAX_ARRAY_LENGTH,
            });
        }
        self.align(element_align)?;
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(CodecError::truncated(len, self.pos, self.buf.len(), "array payload"));
        }
        Ok(end)
    }

    pub fn read_value(&mut self, ty: &SignatureType) -> CodecResult<Value> {
        Ok(match ty {
            SignatureType::Basic(basic) => self.read_basic(*basic)?,
            SignatureType::Variant => Value::Variant(self.read_variant()?),
            SignatureType::Array(element) => {
                let end = self.array_bounds(element.alignment())?;
                let mut items = Vec::new();
                while self.pos < end {
                    items.push(self.nested(|r| r.read_value(element))?);
                }
                self.check_array_end(end)?;
                Value::Array(Array::new_unchecked((**element).clone(), items))
            }
            SignatureType::Dict { key, value } => {
                let end = self.array_bounds(8)?;
                let mut entries = Vec::new();
                while self.pos < end {
                    self.align(8)?;
                    let k = self.read_basic(*key)?;
                    let v = self.nested(|r| r.read_value(value))?;
                    entries.push((k, v));
                }
                self.check_array_end(end)?;
                Value::Dict(Dict::new_unchecked(*key, (**value).clone(), entries))
            }
            SignatureType::Struct(members) => {
                self.align(8)?;
                let mut out = Vec::with_capacity(members.len());
                for member in members {
                    out.push(self.nested(|r| r.read_value(member))?);
                }
                Value::Struct(out)
            }
        })
    }

    pub fn read_variant(&mut self) -> CodecResult<Variant> {
        let signature = self.get_signature()?;
        let ty = SignatureType::parse(signature.as_str())?;
        let inner = self.nested(|r| r.read_value(&ty))?;
        Ok(Variant::from_value(inner))
    }

    pub fn read_basic(&mut self, basic: BasicType) -> CodecResult<Value> {
        Ok(match basic {
            BasicType::Byte => Value::Byte(self.get_u8()?),
            BasicType::Boolean => {
                let at = self.pos;
                match self.get_u32()? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(CodecError::invalid_encoding(
                            at,
                            format!("boolean must be 0 or 1, got {other}"),
                        ))
                    }
                }
            }
            BasicType::Int16 => Value::Int16(self.get_u16()? as i16),
            BasicType::Uint16 => Value::Uint16(self.get_u16()?),
            BasicType::Int32 => Value::Int32(self.get_u32()? as i32),
            BasicType::Uint32 => Value::Uint32(self.get_u32()?),
            BasicType::UnixFd => Value::UnixFd(UnixFd::new(self.get_u32()?)),
            BasicType::Int64 => Value::Int64(self.get_u64()? as i64),
            BasicType::Uint64 => Value::Uint64(self.get_u64()?),
            BasicType::Double => Value::Double(f64::from_bits(self.get_u64()?)),
            BasicType::String => Value::String(self.get_str()?.to_string()),
            BasicType::ObjectPath => Value::ObjectPath(ObjectPath::new(self.get_str()?)?),
            BasicType::Signature => Value::Signature(self.get_signature()?),
        })
    }

    fn check_array_end(&self, end: usize) -> CodecResult<()> {
        if self.pos != end {
            return Err(CodecError::invalid_encoding(
                self.pos,
                format!("array elements overran declared end {end}"),
            ));
        }
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        self.depth += 1;
        if self.depth > MAX_DECODE_DEPTH {
            return Err(CodecError::structural(
                "decode",
                format!("nesting deeper than {MAX_DECODE_DEPTH} levels"),
            ));
        }
        let out = f(self);
        self.depth -= 1;
        out
    }
}
