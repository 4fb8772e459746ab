//! rtmp-relay: live media ingest and playback over RTMP
//!
//! A relay accepts publishers (OBS, ffmpeg, broadcasting software), pairs
//! them with players by stream key, and fans audio/video/metadata out to
//! every subscriber. Late joiners get the cached AAC/AVC sequence headers
//! first so their decoders can start mid-stream. The client side of the
//! protocol is included for pulling a stream from another relay.
//!
//! # Example: server
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_relay::{Broadcaster, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> rtmp_relay::Result<()> {
//!     let broadcaster = Arc::new(Broadcaster::new("app"));
//!     let server = Server::new(ServerConfig::default(), broadcaster);
//!     // Publish with e.g.: ffmpeg -re -i input.flv -c copy -f flv rtmp://localhost/app/key
//!     server.listen().await
//! }
//! ```
//!
//! Publish admission can be hooked by installing a
//! [`SessionGuard`](broadcast::SessionGuard) on the broadcaster.

pub mod amf;
pub mod broadcast;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{Broadcaster, SessionGuard, StreamEvent, SubscriberHandle};
pub use client::{Client, RtmpUrl};
pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
pub use session::{ClientCallbacks, Session, SessionConfig, SessionInfo};
