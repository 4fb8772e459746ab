//! RTMP playback client
//!
//! Connects to a remote relay, plays one stream and hands media to
//! embedder callbacks:
//!
//! ```no_run
//! use rtmp_relay::{Client, ClientCallbacks};
//!
//! #[tokio::main]
//! async fn main() -> rtmp_relay::Result<()> {
//!     let callbacks = ClientCallbacks {
//!         on_video: Some(Box::new(|tag, payload, timestamp| {
//!             println!("video {:?} {} bytes at {timestamp}", tag.frame_type, payload.len());
//!         })),
//!         ..Default::default()
//!     };
//!     Client::new(callbacks).connect("rtmp://localhost/app/stream_key").await
//! }
//! ```

use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::constants::RTMP_PORT;
use crate::session::{ClientCallbacks, Session, SessionConfig};

/// Components of an `rtmp://` URL.
///
/// The first path segment is the application; everything after it joins
/// into the stream key (`rtmp://host/app/instance/key` plays the stream
/// `instance/key` of `app`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream_key: String,
}

impl RtmpUrl {
    /// Parse `rtmp://host[:port]/app[/instance]/streamKey`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("rtmp://")
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| Error::InvalidUrl(url.to_string()))?,
            ),
            None => (authority, RTMP_PORT),
        };

        let (app, stream_key) = path
            .split_once('/')
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        if host.is_empty() || app.is_empty() || stream_key.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream_key: stream_key.to_string(),
        })
    }

    /// The `tcUrl` reported in the connect command.
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

/// RTMP playback client; see the module docs.
pub struct Client {
    callbacks: ClientCallbacks,
    config: SessionConfig,
}

impl Client {
    pub fn new(callbacks: ClientCallbacks) -> Self {
        Self {
            callbacks,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(callbacks: ClientCallbacks, config: SessionConfig) -> Self {
        Self { callbacks, config }
    }

    /// Connect, play the stream named by the URL, and run until the
    /// stream ends or the server disconnects.
    pub async fn connect(self, url: &str) -> Result<()> {
        let parsed = RtmpUrl::parse(url)?;
        let addr = format!("{}:{}", parsed.host, parsed.port);

        tracing::info!(addr = %addr, app = %parsed.app, stream_key = %parsed.stream_key, "connecting");
        let socket = TcpStream::connect(&addr).await?;
        socket.set_nodelay(true).ok();

        let (reader, writer) = tokio::io::split(socket);
        let session = Session::client(
            reader,
            writer,
            parsed.app.clone(),
            parsed.tc_url(),
            parsed.stream_key.clone(),
            self.callbacks,
            self.config,
        );
        session.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let url = RtmpUrl::parse("rtmp://localhost/live/test").unwrap();
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 1935);
        assert_eq!(url.app, "live");
        assert_eq!(url.stream_key, "test");
        assert_eq!(url.tc_url(), "rtmp://localhost:1935/live");

        let url = RtmpUrl::parse("rtmp://example.com:1936/app/obs").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 1936);
        assert_eq!(url.app, "app");
        assert_eq!(url.stream_key, "obs");
    }

    #[test]
    fn test_instance_segments_join_the_stream_key() {
        let url = RtmpUrl::parse("rtmp://host/app/instance/key").unwrap();
        assert_eq!(url.app, "app");
        assert_eq!(url.stream_key, "instance/key");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(RtmpUrl::parse("http://host/app/key").is_err());
        assert!(RtmpUrl::parse("rtmp://host").is_err());
        assert!(RtmpUrl::parse("rtmp://host/apponly").is_err());
        assert!(RtmpUrl::parse("rtmp://host:notaport/app/key").is_err());
        assert!(RtmpUrl::parse("rtmp:///app/key").is_err());
    }
}
