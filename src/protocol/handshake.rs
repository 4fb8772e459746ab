//! RTMP handshake
//!
//! The simple (non-digest) handshake only:
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version 3) ------->|
//!   |------- C1 (1536 bytes) -------------->|
//!   |<------ S0 (1 byte: version 3) --------|
//!   |<------ S1 (1536 bytes) ---------------|
//!   |<------ S2 (echo of C1) ---------------|
//!   |------- C2 (echo of S1) -------------->|
//!   |          [handshake complete]         |
//! ```
//!
//! C1/S1 are 4 bytes of time (we send 0), 4 zero bytes, then 1528 random
//! bytes. The first byte after the handshake is a chunk basic header, and
//! the chunk size is 128 until a Set Chunk Size message changes it.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the handshake we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for the peer's version byte + first packet (C0C1 / S0S1S2).
    WaitingForPeerPacket,
    /// Server only: response sent, waiting for C2.
    WaitingForEcho,
    Done,
}

/// Sans-io handshake state machine.
///
/// Feed received bytes to [`process`](Handshake::process); write whatever it
/// returns to the socket. The machine never consumes more than it needs, so
/// bytes following the handshake stay in the caller's buffer.
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    /// Our own C1/S1, echoed back by the peer.
    own_packet: [u8; HANDSHAKE_SIZE],
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::WaitingForPeerPacket,
            own_packet: generate_packet(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes the client must send before anything arrives: C0 + C1.
    /// The server sends nothing until the client's packet is in.
    pub fn initial_bytes(&self) -> Option<Bytes> {
        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&self.own_packet);
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Consume handshake bytes from `data`, returning bytes to send back.
    ///
    /// `Ok(None)` means more input is needed (nothing was consumed) or the
    /// handshake produced nothing to send at this step.
    pub fn process(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => {
                // C0 + C1
                if data.len() < 1 + HANDSHAKE_SIZE {
                    return Ok(None);
                }
                let version = data.get_u8();
                if version != RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }
                let mut c1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut c1);

                // S0 + S1 + S2, where S2 echoes C1 verbatim.
                let mut response = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                response.put_u8(RTMP_VERSION);
                response.put_slice(&self.own_packet);
                response.put_slice(&c1);

                self.state = HandshakeState::WaitingForEcho;
                Ok(Some(response.freeze()))
            }
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => {
                // S0 + S1 + S2
                if data.len() < 1 + 2 * HANDSHAKE_SIZE {
                    return Ok(None);
                }
                let version = data.get_u8();
                if version != RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }
                let mut s1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut s1);
                // S2 is discarded.
                data.advance(HANDSHAKE_SIZE);

                self.state = HandshakeState::Done;
                // C2 echoes S1.
                Ok(Some(Bytes::copy_from_slice(&s1)))
            }
            (HandshakeState::WaitingForEcho, HandshakeRole::Server) => {
                // C2 is read and discarded.
                if data.len() < HANDSHAKE_SIZE {
                    return Ok(None);
                }
                data.advance(HANDSHAKE_SIZE);
                self.state = HandshakeState::Done;
                Ok(None)
            }
            _ => Err(HandshakeError::InvalidState.into()),
        }
    }
}

/// Build a C1/S1 packet: time 0, four zero bytes, 1528 random bytes.
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut packet[8..]);
    packet
}
