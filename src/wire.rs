//! Field-numbered binary payload encoding.
//!
//! Messages are encoded as a sequence of tagged fields:
//!
//! ```text
//! [tag varint][value]   tag = field_number << 3 | wire_type
//! ```
//!
//! Wire types:
//! - `0`: varint (bools, enums, unsigned and sign-extended signed integers)
//! - `2`: length-delimited (strings, bytes, nested messages, map entries)
//! - `5`: fixed 32-bit little-endian (f32)
//!
//! The scheme is compatible with length-delimited varint-tagged encodings:
//! fields may appear in any order, repeated fields accumulate, and tags this
//! implementation does not know are preserved byte-exact in
//! [`UnknownFields`] and re-emitted on encode, so a newer peer's fields
//! survive a round-trip through this process.

use anyhow::{bail, Result};

/// Varint wire type.
pub const WT_VARINT: u32 = 0;
/// Length-delimited wire type.
pub const WT_LEN: u32 = 2;
/// Fixed 32-bit wire type.
pub const WT_FIXED32: u32 = 5;

/// Append a varint to `buf`.
fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Serializer for one message payload.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    fn tag(&mut self, field: u32, wire_type: u32) {
        put_varint(&mut self.buf, u64::from(field << 3 | wire_type));
    }

    /// Write a bool field. `false` is the default and is omitted.
    pub fn bool_field(&mut self, field: u32, v: bool) {
        if v {
            self.tag(field, WT_VARINT);
            put_varint(&mut self.buf, 1);
        }
    }

    /// Write an unsigned integer field. Zero is omitted.
    pub fn u32_field(&mut self, field: u32, v: u32) {
        if v != 0 {
            self.tag(field, WT_VARINT);
            put_varint(&mut self.buf, u64::from(v));
        }
    }

    /// Write a signed integer field, sign-extended to 64 bits. Zero is
    /// omitted.
    pub fn i32_field(&mut self, field: u32, v: i32) {
        if v != 0 {
            self.tag(field, WT_VARINT);
            put_varint(&mut self.buf, i64::from(v) as u64);
        }
    }

    /// Write an f32 field as fixed32. Exact zero is omitted.
    pub fn f32_field(&mut self, field: u32, v: f32) {
        if v != 0.0 {
            self.tag(field, WT_FIXED32);
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Write a string field. Empty strings are omitted.
    pub fn str_field(&mut self, field: u32, v: &str) {
        if !v.is_empty() {
            self.bytes_field(field, v.as_bytes());
        }
    }

    /// Write a bytes field. Empty slices are omitted.
    pub fn bytes_field(&mut self, field: u32, v: &[u8]) {
        if !v.is_empty() {
            self.tag(field, WT_LEN);
            put_varint(&mut self.buf, v.len() as u64);
            self.buf.extend_from_slice(v);
        }
    }

    /// Write a nested message field. Always emitted, even when the nested
    /// message is empty: presence of the field is what makes an optional
    /// sub-message `Some` on decode.
    pub fn msg_field<M: Wire>(&mut self, field: u32, m: &M) {
        let inner = m.encode_to_vec();
        self.tag(field, WT_LEN);
        put_varint(&mut self.buf, inner.len() as u64);
        self.buf.extend_from_slice(&inner);
    }

    /// Replay raw pre-tagged bytes (unknown-field passthrough).
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Consume the writer, returning the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// One decoded field value, borrowing from the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// Wire type 0.
    Varint(u64),
    /// Wire type 5.
    Fixed32(u32),
    /// Wire type 2.
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    /// Interpret as u32.
    pub fn as_u32(&self) -> Result<u32> {
        match self {
            FieldValue::Varint(v) => Ok(*v as u32),
            _ => bail!("expected varint field"),
        }
    }

    /// Interpret as sign-extended i32.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            FieldValue::Varint(v) => Ok(*v as i64 as i32),
            _ => bail!("expected varint field"),
        }
    }

    /// Interpret as bool.
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_u32()? != 0)
    }

    /// Interpret as f32 (fixed32 bit pattern).
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            FieldValue::Fixed32(bits) => Ok(f32::from_bits(*bits)),
            _ => bail!("expected fixed32 field"),
        }
    }

    /// Interpret as raw bytes.
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            _ => bail!("expected length-delimited field"),
        }
    }

    /// Interpret as UTF-8 string.
    pub fn as_str(&self) -> Result<&'a str> {
        Ok(std::str::from_utf8(self.as_bytes()?)?)
    }

    /// Decode a nested message.
    pub fn as_msg<M: Wire>(&self) -> Result<M> {
        M::decode(self.as_bytes()?)
    }
}

/// Incremental field reader over one message payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap a payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64> {
        let mut v: u64 = 0;
        let mut shift = 0u32;
        loop {
            if shift >= 64 {
                bail!("varint overflows 64 bits");
            }
            let Some(&byte) = self.buf.get(self.pos) else {
                bail!("truncated varint");
            };
            self.pos += 1;
            v |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }

    /// Read the next `(field_number, value)` pair, or `None` at end of
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or malformed input, or on a wire type
    /// this codec never produces.
    pub fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let tag = self.varint()?;
        let field = (tag >> 3) as u32;
        if field == 0 {
            bail!("field number 0 is reserved");
        }
        let value = match (tag & 0x7) as u32 {
            WT_VARINT => FieldValue::Varint(self.varint()?),
            WT_FIXED32 => {
                if self.pos + 4 > self.buf.len() {
                    bail!("truncated fixed32 field");
                }
                let bits = u32::from_le_bytes([
                    self.buf[self.pos],
                    self.buf[self.pos + 1],
                    self.buf[self.pos + 2],
                    self.buf[self.pos + 3],
                ]);
                self.pos += 4;
                FieldValue::Fixed32(bits)
            }
            WT_LEN => {
                let len = self.varint()? as usize;
                if self.pos + len > self.buf.len() {
                    bail!("truncated length-delimited field ({len} bytes declared)");
                }
                let bytes = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                FieldValue::Bytes(bytes)
            }
            other => bail!("unsupported wire type {other}"),
        };
        Ok(Some((field, value)))
    }
}

/// Raw bytes of fields a decoder did not recognize, kept re-encodable.
///
/// Serde skips this: unknown binary fields have no JSON representation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnknownFields {
    raw: Vec<u8>,
}

impl UnknownFields {
    /// True when no unknown fields were seen.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Record one unknown field for later replay.
    pub fn push(&mut self, field: u32, value: &FieldValue<'_>) {
        match value {
            FieldValue::Varint(v) => {
                put_varint(&mut self.raw, u64::from(field << 3 | WT_VARINT));
                put_varint(&mut self.raw, *v);
            }
            FieldValue::Fixed32(bits) => {
                put_varint(&mut self.raw, u64::from(field << 3 | WT_FIXED32));
                self.raw.extend_from_slice(&bits.to_le_bytes());
            }
            FieldValue::Bytes(b) => {
                put_varint(&mut self.raw, u64::from(field << 3 | WT_LEN));
                put_varint(&mut self.raw, b.len() as u64);
                self.raw.extend_from_slice(b);
            }
        }
    }

    /// Re-emit the recorded fields.
    pub fn replay(&self, w: &mut WireWriter) {
        w.raw(&self.raw);
    }
}

/// A message encodable to and decodable from the tagged wire form.
pub trait Wire: Default {
    /// Append all fields of `self` to the writer.
    fn encode(&self, w: &mut WireWriter);

    /// Merge one decoded field into `self`. Unrecognized fields must be
    /// preserved, not rejected.
    ///
    /// # Errors
    ///
    /// Returns an error when a known field carries a malformed value.
    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()>;

    /// Encode to a standalone payload.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode a payload. An empty payload decodes to the default message.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input.
    fn decode(buf: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        let mut r = WireReader::new(buf);
        while let Some((field, value)) = r.next_field()? {
            msg.merge_field(field, value)?;
        }
        Ok(msg)
    }
}

/// Encode one `map<u32,u32>` entry as a nested `{1: key, 2: value}`
/// message.
pub fn map_entry_u32(w: &mut WireWriter, field: u32, key: u32, value: u32) {
    let mut entry = WireWriter::new();
    entry.u32_field(1, key);
    entry.u32_field(2, value);
    w.bytes_field_allow_empty(field, &entry.into_bytes());
}

impl WireWriter {
    /// Length-delimited field that is emitted even when empty (map entries
    /// with default key and value).
    fn bytes_field_allow_empty(&mut self, field: u32, v: &[u8]) {
        self.tag(field, WT_LEN);
        put_varint(&mut self.buf, v.len() as u64);
        self.buf.extend_from_slice(v);
    }
}

/// Decode one `map<u32,u32>` entry.
///
/// # Errors
///
/// Returns an error on malformed entry payloads.
pub fn decode_map_entry_u32(value: &FieldValue<'_>) -> Result<(u32, u32)> {
    let mut r = WireReader::new(value.as_bytes()?);
    let (mut k, mut v) = (0u32, 0u32);
    while let Some((field, val)) = r.next_field()? {
        match field {
            1 => k = val.as_u32()?,
            2 => v = val.as_u32()?,
            _ => {}
        }
    }
    Ok((k, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        flag: bool,
        count: u32,
        delta: i32,
        ratio: f32,
        name: String,
        unknown: UnknownFields,
    }

    impl Wire for Sample {
        fn encode(&self, w: &mut WireWriter) {
            w.bool_field(1, self.flag);
            w.u32_field(2, self.count);
            w.i32_field(3, self.delta);
            w.f32_field(4, self.ratio);
            w.str_field(5, &self.name);
            self.unknown.replay(w);
        }

        fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
            match field {
                1 => self.flag = value.as_bool()?,
                2 => self.count = value.as_u32()?,
                3 => self.delta = value.as_i32()?,
                4 => self.ratio = value.as_f32()?,
                5 => self.name = value.as_str()?.to_string(),
                _ => self.unknown.push(field, &value),
            }
            Ok(())
        }
    }

    #[test]
    fn test_round_trip() {
        let msg = Sample {
            flag: true,
            count: 300,
            delta: -7,
            ratio: 1.5,
            name: "fader".into(),
            unknown: UnknownFields::default(),
        };
        let decoded = Sample::decode(&msg.encode_to_vec()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_defaults_are_omitted() {
        assert!(Sample::default().encode_to_vec().is_empty());
    }

    #[test]
    fn test_empty_payload_decodes_to_default() {
        assert_eq!(Sample::decode(&[]).unwrap(), Sample::default());
    }

    #[test]
    fn test_negative_varint_round_trip() {
        let msg = Sample { delta: i32::MIN, ..Default::default() };
        assert_eq!(Sample::decode(&msg.encode_to_vec()).unwrap().delta, i32::MIN);
    }

    #[test]
    fn test_unknown_fields_survive_reencoding() {
        // Field 99 is unknown to Sample
        let mut w = WireWriter::new();
        w.u32_field(2, 5);
        w.str_field(99, "future");
        let bytes = w.into_bytes();

        let decoded = Sample::decode(&bytes).unwrap();
        assert_eq!(decoded.count, 5);
        assert!(!decoded.unknown.is_empty());

        // Re-encode and decode again: the unknown field is still there
        let again = Sample::decode(&decoded.encode_to_vec()).unwrap();
        assert_eq!(again.unknown, decoded.unknown);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut w = WireWriter::new();
        w.str_field(5, "abcdef");
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(Sample::decode(&bytes).is_err());
    }

    #[test]
    fn test_map_entry_round_trip() {
        let mut w = WireWriter::new();
        map_entry_u32(&mut w, 4, 17, 2);
        map_entry_u32(&mut w, 4, 0, 0);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let (f1, v1) = r.next_field().unwrap().unwrap();
        assert_eq!(f1, 4);
        assert_eq!(decode_map_entry_u32(&v1).unwrap(), (17, 2));
        let (_, v2) = r.next_field().unwrap().unwrap();
        assert_eq!(decode_map_entry_u32(&v2).unwrap(), (0, 0));
    }
}
