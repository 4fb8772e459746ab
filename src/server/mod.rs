//! RTMP server
//!
//! Accept loop: one task per connection, all of them sharing the
//! [`Broadcaster`]. Accept errors are logged and the loop continues;
//! session errors never cross connection boundaries.

pub mod config;

pub use config::ServerConfig;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::broadcast::Broadcaster;
use crate::error::Result;
use crate::session::Session;

/// The relay's ingest/playback server.
pub struct Server {
    config: ServerConfig,
    broadcaster: Arc<Broadcaster>,
}

impl Server {
    /// Create a server over a shared broadcaster.
    ///
    /// The broadcaster's application name is the only one accepted on
    /// `connect`.
    pub fn new(config: ServerConfig, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            config,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Listen for connections forever. Returns only on a bind error.
    pub async fn listen(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        tracing::info!(addr = %self.config.addr, app = %self.broadcaster.app_name(), "listening");

        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.config.tcp_nodelay {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
            }

            let broadcaster = Arc::clone(&self.broadcaster);
            let session_config = self.config.session_config();

            tokio::spawn(async move {
                let (reader, writer) = tokio::io::split(socket);
                let session = Session::server(reader, writer, broadcaster, session_config);
                let session_id = session.id().to_string();
                tracing::info!(session_id = %session_id, peer = %peer_addr, "connection accepted");

                if let Err(e) = session.run().await {
                    tracing::warn!(session_id = %session_id, error = %e, "session ended with error");
                }
            });
        }
    }
}
