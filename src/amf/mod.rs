//! AMF0 (Action Message Format) codec
//!
//! RTMP command and data messages carry AMF0-encoded value trees. This
//! module provides the value representation, a strict encoder/decoder, and
//! a case-insensitive lookup wrapper for command objects and metadata.

pub mod amf0;
pub mod metadata;
pub mod value;

pub use amf0::{decode, decode_all, decode_next, encode, encode_all, Amf0Encoder};
pub use metadata::Metadata;
pub use value::Amf0Value;
