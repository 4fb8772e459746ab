//! Server configuration

use std::time::Duration;

use crate::protocol::constants::*;
use crate::session::SessionConfig;

/// Options for [`Server`](super::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub addr: String,

    /// Chunk size announced to clients after connect.
    pub chunk_size: u32,

    /// Window acknowledgement size offered to clients.
    pub window_ack_size: u32,

    /// Per-direction socket buffer size.
    pub buffer_size: usize,

    /// The handshake must complete within this long.
    pub handshake_timeout: Duration,

    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{RTMP_PORT}"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Set the listen address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Set the negotiated chunk size.
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.min(MAX_CHUNK_SIZE);
        self
    }

    /// Set the window acknowledgement size.
    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    /// Set the socket buffer size.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.chunk_size,
            window_ack_size: self.window_ack_size,
            buffer_size: self.buffer_size,
            handshake_timeout: self.handshake_timeout,
        }
    }
}
