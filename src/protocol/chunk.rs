//! RTMP chunk stream codec
//!
//! Messages are carried over the TCP connection as one or more chunks, each
//! with a compressed header. Chunk streams interleave: a chunk of one
//! message may arrive between chunks of another, as long as they use
//! different chunk stream ids.
//!
//! ```text
//! Chunk format:
//! +--------------+----------------+--------------------+
//! | Basic Header | Message Header | Chunk Data         |
//! | (1-3 bytes)  | (0/3/7/11 B)   | (<= chunk size)    |
//! +--------------+----------------+--------------------+
//!
//! Basic header: fmt(2 bits) + csid encoding(6 bits)
//! - csid 2-63:     1 byte, literal
//! - csid 64-319:   2 bytes (low bits 0, next byte + 64)
//! - csid 64-65599: 3 bytes (low bits 1, 16-bit BE + 64)
//!
//! Message header by fmt:
//! - Type 0 (11 bytes): timestamp(3) length(3) type(1) stream_id(4, LE)
//! - Type 1 (7 bytes):  delta(3) length(3) type(1); inherits stream id
//! - Type 2 (3 bytes):  delta(3); inherits length, type, stream id
//! - Type 3 (0 bytes):  inherits everything
//!
//! A timestamp field of 0xFFFFFF means a 4-byte extended timestamp follows
//! the message header.
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message, reassembled from chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Chunk stream the message arrived on (or goes out on).
    pub csid: u32,
    /// Message stream id.
    pub stream_id: u32,
    /// Absolute timestamp in milliseconds.
    pub timestamp: u32,
    /// Message type id.
    pub type_id: u8,
    /// Message payload.
    pub payload: Bytes,
}

impl Message {
    pub fn new(csid: u32, stream_id: u32, timestamp: u32, type_id: u8, payload: Bytes) -> Self {
        Self {
            csid,
            stream_id,
            timestamp,
            type_id,
            payload,
        }
    }
}

/// Last fully-resolved header on a chunk stream, used to expand the
/// compressed chunk types 1/2/3.
#[derive(Debug, Clone, Copy, Default)]
struct PrevHeader {
    /// Absolute timestamp after this chunk (the per-csid clock).
    elapsed_time: u32,
    /// Timestamp delta a following type-3 chunk inherits. After a type-0
    /// chunk this holds the absolute timestamp, per the spec.
    delta: u32,
    message_length: u32,
    type_id: u8,
    stream_id: u32,
    /// Whether the header carried an extended timestamp; continuations
    /// repeat the 4-byte field.
    extended: bool,
}

/// Incremental chunk stream decoder.
///
/// Feed it a buffer of received bytes; it consumes whole chunks and returns
/// a message once one is fully reassembled. `Ok(None)` means more bytes are
/// needed; nothing is consumed for a chunk until the chunk is wholly
/// present, so the decoder resumes cleanly mid-header.
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    prev_headers: HashMap<u32, PrevHeader>,
    /// Reassembly accumulator per chunk stream id; messages interleave
    /// across chunk streams.
    assembly: HashMap<u32, BytesMut>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: INITIAL_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            prev_headers: HashMap::new(),
            assembly: HashMap::new(),
        }
    }

    /// Update the incoming chunk size (Set Chunk Size received).
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The per-csid clock: latest absolute timestamp observed.
    pub fn elapsed_time(&self, csid: u32) -> u32 {
        self.prev_headers
            .get(&csid)
            .map(|h| h.elapsed_time)
            .unwrap_or(0)
    }

    /// Discard a partially-received message (Abort received).
    pub fn abort(&mut self, csid: u32) {
        self.assembly.remove(&csid);
    }

    /// Decode one chunk from `buf`, returning a message when complete.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        let Some((fmt, csid, bh_len)) = parse_basic_header(buf)? else {
            return Ok(None);
        };

        let in_flight = self.assembly.get(&csid).map_or(0, |a| a.len());
        if in_flight > 0 {
            // Mid-message on this chunk stream: only type-3 continuations
            // are legal until the accumulator drains.
            if fmt != 3 {
                return Err(ProtocolError::UnexpectedChunkFormat(fmt).into());
            }
            return self.decode_continuation(buf, csid, bh_len);
        }

        self.decode_message_start(buf, fmt, csid, bh_len)
    }

    /// First chunk of a message: resolve the (possibly compressed) header,
    /// advance the clock and start the accumulator.
    fn decode_message_start(
        &mut self,
        buf: &mut BytesMut,
        fmt: u8,
        csid: u32,
        bh_len: usize,
    ) -> Result<Option<Message>> {
        let prev = self.prev_headers.get(&csid).copied().unwrap_or_default();

        let mh_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            3 => 0,
            _ => unreachable!(),
        };
        if buf.len() < bh_len + mh_len {
            return Ok(None);
        }

        // Peek the header fields; nothing is consumed until the whole chunk
        // (headers and payload slice) is present.
        let ts_field = match fmt {
            0 | 1 | 2 => read_u24(&buf[bh_len..]),
            _ => prev.delta,
        };
        let extended = match fmt {
            0 | 1 | 2 => ts_field >= EXTENDED_TIMESTAMP,
            _ => prev.extended,
        };

        let (message_length, type_id, stream_id) = match fmt {
            0 => (
                read_u24(&buf[bh_len + 3..]),
                buf[bh_len + 6],
                u32::from_le_bytes([
                    buf[bh_len + 7],
                    buf[bh_len + 8],
                    buf[bh_len + 9],
                    buf[bh_len + 10],
                ]),
            ),
            1 => (read_u24(&buf[bh_len + 3..]), buf[bh_len + 6], prev.stream_id),
            _ => (prev.message_length, prev.type_id, prev.stream_id),
        };

        if message_length > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: message_length,
                max: self.max_message_size,
            });
        }

        let ext_len = if extended { 4 } else { 0 };
        let header_len = bh_len + mh_len + ext_len;
        let take = message_length.min(self.chunk_size) as usize;
        if buf.len() < header_len + take {
            return Ok(None);
        }

        buf.advance(bh_len + mh_len);
        let ts_value = if extended { buf.get_u32() } else { ts_field };

        // Type 0 resets the clock to an absolute timestamp; the other types
        // add a delta. Wrap modulo 2^32.
        let (elapsed, delta) = match fmt {
            0 => (ts_value, ts_value),
            _ => (prev.elapsed_time.wrapping_add(ts_value), ts_value),
        };

        self.prev_headers.insert(
            csid,
            PrevHeader {
                elapsed_time: elapsed,
                delta,
                message_length,
                type_id,
                stream_id,
                extended,
            },
        );

        let mut acc = BytesMut::with_capacity(message_length as usize);
        acc.put_slice(&buf[..take]);
        buf.advance(take);

        if acc.len() as u32 >= message_length {
            return Ok(Some(Message {
                csid,
                stream_id,
                timestamp: elapsed,
                type_id,
                payload: acc.freeze(),
            }));
        }

        self.assembly.insert(csid, acc);
        Ok(None)
    }

    /// Type-3 continuation of an in-flight message: inherits every header
    /// field and does not advance the clock.
    fn decode_continuation(
        &mut self,
        buf: &mut BytesMut,
        csid: u32,
        bh_len: usize,
    ) -> Result<Option<Message>> {
        let prev = self.prev_headers.get(&csid).copied().unwrap_or_default();
        let ext_len = if prev.extended { 4 } else { 0 };

        let acc_len = self.assembly.get(&csid).map_or(0, |a| a.len()) as u32;
        let remaining = prev.message_length - acc_len;
        let take = remaining.min(self.chunk_size) as usize;

        if buf.len() < bh_len + ext_len + take {
            return Ok(None);
        }

        // The extended timestamp is repeated on continuations; its value
        // was already applied by the first chunk.
        buf.advance(bh_len + ext_len);

        let mut acc = self.assembly.remove(&csid).unwrap_or_default();
        acc.put_slice(&buf[..take]);
        buf.advance(take);

        if acc.len() as u32 >= prev.message_length {
            return Ok(Some(Message {
                csid,
                stream_id: prev.stream_id,
                timestamp: prev.elapsed_time,
                type_id: prev.type_id,
                payload: acc.freeze(),
            }));
        }

        self.assembly.insert(csid, acc);
        Ok(None)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the basic header without consuming: `(fmt, csid, header_len)`.
fn parse_basic_header(buf: &[u8]) -> Result<Option<(u8, u32, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first = buf[0];
    let fmt = first >> 6;
    match first & 0x3F {
        0 => {
            if buf.len() < 2 {
                return Ok(None);
            }
            Ok(Some((fmt, 64 + buf[1] as u32, 2)))
        }
        1 => {
            if buf.len() < 3 {
                return Ok(None);
            }
            let id = u16::from_be_bytes([buf[1], buf[2]]) as u32;
            Ok(Some((fmt, 64 + id, 3)))
        }
        csid => Ok(Some((fmt, csid as u32, 1))),
    }
}

fn read_u24(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32)
}

/// Chunk stream encoder.
///
/// Always emits a full type-0 header followed by type-3 continuations; the
/// bandwidth saved by header compression is negligible next to media
/// payloads.
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: INITIAL_CHUNK_SIZE,
        }
    }

    /// Update the outgoing chunk size (after sending Set Chunk Size).
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into `buf` as one or more chunks.
    pub fn encode(&self, message: &Message, buf: &mut BytesMut) {
        let extended = message.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            message.timestamp
        };

        write_basic_header(0, message.csid, buf);
        write_u24(ts_field, buf);
        write_u24(message.payload.len() as u32, buf);
        buf.put_u8(message.type_id);
        buf.put_u32_le(message.stream_id);
        if extended {
            buf.put_u32(message.timestamp);
        }

        let payload = &message.payload;
        let chunk_size = self.chunk_size as usize;
        let mut offset = payload.len().min(chunk_size);
        buf.put_slice(&payload[..offset]);

        while offset < payload.len() {
            write_basic_header(3, message.csid, buf);
            if extended {
                buf.put_u32(message.timestamp);
            }
            let take = (payload.len() - offset).min(chunk_size);
            buf.put_slice(&payload[offset..offset + take]);
            offset += take;
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(fmt: u8, csid: u32, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        buf.put_u8((fmt << 6) | 1);
        buf.put_u16((csid - 64) as u16);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}
