//! Error types for the relay.
//!
//! Each protocol layer has its own error enum; everything folds into the
//! crate-level [`Error`]. Errors never cross session boundaries: a failure
//! inside one connection tears down that session only.

use std::io;

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure on the socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// RTMP protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed AMF0 data.
    #[error("amf error: {0}")]
    Amf(#[from] AmfError),

    /// Handshake failure.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Publisher/subscriber registry failure.
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// The session guard rejected a publish request.
    #[error("publish rejected by session guard")]
    GuardDenied,

    /// A message exceeded the configured size ceiling.
    #[error("message of {size} bytes exceeds the {max} byte ceiling")]
    MessageTooLarge { size: u32, max: u32 },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An RTMP URL could not be parsed.
    #[error("invalid rtmp url: {0}")]
    InvalidUrl(String),
}

/// Chunk stream and message layer violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid chunk header")]
    InvalidChunkHeader,

    #[error("chunk format {0} continues no in-flight message")]
    UnexpectedChunkFormat(u8),

    #[error("truncated {0} message payload")]
    TruncatedMessage(&'static str),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// AMF0 decode failures. Any of these means the input was malformed.
#[derive(Debug, Error)]
pub enum AmfError {
    #[error("unexpected end of amf data")]
    UnexpectedEof,

    #[error("unknown amf marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("invalid utf-8 in amf string")]
    InvalidUtf8,

    #[error("missing object end marker")]
    InvalidObjectEnd,

    #[error("amf nesting too deep")]
    NestingTooDeep,
}

/// Handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid rtmp version: {0}")]
    InvalidVersion(u8),

    #[error("handshake state machine misuse")]
    InvalidState,
}

/// Registry failures surfaced by the broadcaster.
#[derive(Debug, Clone, Error)]
pub enum BroadcastError {
    /// No publisher holds the stream key.
    #[error("no publisher for stream key {0:?}")]
    StreamNotFound(String),

    /// A live publisher already holds the stream key.
    #[error("stream key {0:?} already has a publisher")]
    AlreadyPublishing(String),
}

impl Error {
    /// True when the error is a normal end-of-stream on the socket.
    pub fn is_eof(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
