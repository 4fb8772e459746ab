//! RTMP wire protocol
//!
//! - [`handshake`]: the C0/C1/C2 - S0/S1/S2 exchange
//! - [`chunk`]: chunk stream framing and message reassembly
//! - [`message`]: typed RTMP messages over chunk payloads
//! - [`constants`]: protocol numbers and defaults

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, Message};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, DataMessage, LimitType, RtmpMessage, UserControlEvent};
