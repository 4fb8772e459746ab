//! AMF0 encoder and decoder
//!
//! Reference: AMF0 File Format Specification.
//!
//! Type markers:
//! ```text
//! 0x00 - Number (IEEE 754 double, big-endian)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x00 0x00 0x09)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (32-bit count hint + object framing)
//! 0x09 - Object End
//! 0x0A - Strict Array (32-bit count + values)
//! 0x0B - Date (double + 16-bit timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! ```
//!
//! Decoding is strict: truncated input, unknown markers, and non-UTF-8
//! string bytes all fail with [`AmfError`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::Amf0Value;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

/// Maximum nesting depth for objects/arrays.
const MAX_NESTING_DEPTH: usize = 64;

/// Decode a single value from the front of `data`.
///
/// Returns the value together with the number of bytes consumed, so callers
/// can keep decoding command arguments from the same payload.
pub fn decode(data: &[u8]) -> Result<(Amf0Value, usize), AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    let before = buf.remaining();
    let value = decode_value(&mut buf, 0)?;
    Ok((value, before - buf.remaining()))
}

/// Decode values until the buffer is exhausted.
pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode_value(&mut buf, 0)?);
    }
    Ok(values)
}

/// Decode a single value from a [`Bytes`] buffer, advancing it.
pub fn decode_next(buf: &mut Bytes) -> Result<Amf0Value, AmfError> {
    decode_value(buf, 0)
}

fn decode_value(buf: &mut Bytes, depth: usize) -> Result<Amf0Value, AmfError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(AmfError::NestingTooDeep);
    }
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }

    let marker = buf.get_u8();
    match marker {
        MARKER_NUMBER => {
            if buf.remaining() < 8 {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(Amf0Value::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(Amf0Value::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(Amf0Value::String(read_utf8(buf)?)),
        MARKER_LONG_STRING => Ok(Amf0Value::String(read_utf8_long(buf)?)),
        MARKER_OBJECT => Ok(Amf0Value::Object(read_properties(buf, depth)?)),
        MARKER_NULL => Ok(Amf0Value::Null),
        MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
        MARKER_ECMA_ARRAY => {
            if buf.remaining() < 4 {
                return Err(AmfError::UnexpectedEof);
            }
            // The count is a hint only; the array still ends with the
            // object-end sentinel.
            let _count = buf.get_u32();
            Ok(Amf0Value::EcmaArray(read_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            if buf.remaining() < 4 {
                return Err(AmfError::UnexpectedEof);
            }
            let count = buf.get_u32() as usize;
            let mut elements = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                elements.push(decode_value(buf, depth + 1)?);
            }
            Ok(Amf0Value::StrictArray(elements))
        }
        MARKER_DATE => {
            if buf.remaining() < 10 {
                return Err(AmfError::UnexpectedEof);
            }
            let millis = buf.get_f64();
            let _timezone = buf.get_i16();
            Ok(Amf0Value::Date(millis))
        }
        other => Err(AmfError::UnknownMarker(other)),
    }
}

/// Read object/ECMA-array properties up to the `00 00 09` sentinel.
fn read_properties(
    buf: &mut Bytes,
    depth: usize,
) -> Result<HashMap<String, Amf0Value>, AmfError> {
    let mut properties = HashMap::new();

    loop {
        let key = read_utf8(buf)?;
        if key.is_empty() {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            if buf.get_u8() != MARKER_OBJECT_END {
                return Err(AmfError::InvalidObjectEnd);
            }
            break;
        }
        let value = decode_value(buf, depth + 1)?;
        properties.insert(key, value);
    }

    Ok(properties)
}

/// Read a UTF-8 string with a 16-bit length prefix (no type marker).
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// Read a UTF-8 string with a 32-bit length prefix (no type marker).
fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder accumulating into an internal buffer.
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, resetting the encoder.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Encode a single value.
    pub fn encode(&mut self, value: &Amf0Value) {
        match value {
            Amf0Value::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            Amf0Value::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            Amf0Value::String(s) => {
                if s.len() > u16::MAX as usize {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            Amf0Value::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            Amf0Value::Null => self.buf.put_u8(MARKER_NULL),
            Amf0Value::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            Amf0Value::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            Amf0Value::StrictArray(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            Amf0Value::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
        }
    }

    /// Encode multiple values back to back.
    pub fn encode_all(&mut self, values: &[Amf0Value]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &HashMap<String, Amf0Value>) {
        for (key, val) in props {
            self.write_utf8(key);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Write a UTF-8 string with a 16-bit length prefix (no type marker).
    fn write_utf8(&mut self, s: &str) {
        let len = s.len().min(u16::MAX as usize);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single value.
pub fn encode(value: &Amf0Value) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Encode multiple values back to back.
pub fn encode_all(values: &[Amf0Value]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}
