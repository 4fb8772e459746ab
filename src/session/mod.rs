//! Per-connection sessions
//!
//! A session spans one TCP connection from accept (or client connect) to
//! teardown:
//!
//! ```text
//!         Init ── handshake ──► Handshaken ── connect ──► Connected
//!                                                 publish │ play
//!                                      ┌──────────────────┴───────┐
//!                                  Publishing                  Playing
//!                                      └───── FCUnpublish / ───────┘
//!                                             deleteStream /
//!                                             EOF / error
//!                                                 │
//!                                              Closing ──► Terminated
//! ```
//!
//! Server-side sessions answer the connect/publish/play command sequence,
//! cache sequence headers and feed the broadcaster; playing sessions also
//! drain their subscriber queue and re-emit frames to their socket.
//! Client-side sessions drive the same protocol from the other end and
//! deliver media to embedder callbacks.
//!
//! Terminal cleanup always runs: a publisher broadcasts end-of-stream and
//! deregisters (clearing the cached sequence headers), a player leaves the
//! subscriber set, and the guard's `end` hook fires for publishers.

pub mod manager;

pub use manager::MessageManager;

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::amf::Metadata;
use crate::broadcast::{Broadcaster, StreamEvent, SubscriberHandle};
use crate::error::{BroadcastError, Error, ProtocolError, Result};
use crate::media::{self, AudioTag, VideoTag};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage, RtmpMessage, UserControlEvent};

/// Which end of the protocol this session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Accepted by our listener; peers are publishers or players.
    Server,
    /// Outbound connection; we play a remote stream.
    Client,
}

/// The session's role in a stream once publish/play has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    None,
    Publisher,
    Player,
}

/// Publishing mode requested by the `publish` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishingType {
    Live,
    Record,
    Append,
}

impl PublishingType {
    pub fn parse(value: &str) -> Self {
        match value {
            "record" => PublishingType::Record,
            "append" => PublishingType::Append,
            _ => PublishingType::Live,
        }
    }
}

/// Speaker-layout flags from `onMetaData`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurroundSound {
    pub stereo: bool,
    pub two_point_one: bool,
    pub three_point_one: bool,
    pub four_point_zero: bool,
    pub four_point_one: bool,
    pub five_point_one: bool,
    pub seven_point_one: bool,
}

/// Stream properties announced by the publisher in `@setDataFrame`.
///
/// Codec ids arrive as strings from OBS and as numbers from ffmpeg, so
/// both representations are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientMetadata {
    pub duration: Option<f64>,
    pub file_size: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub video_codec_id: Option<String>,
    pub video_codec_id_number: Option<f64>,
    pub video_data_rate: Option<f64>,
    pub frame_rate: Option<f64>,
    pub audio_codec_id: Option<String>,
    pub audio_codec_id_number: Option<f64>,
    pub audio_data_rate: Option<f64>,
    pub audio_sample_rate: Option<f64>,
    pub audio_sample_size: Option<f64>,
    pub audio_channels: Option<f64>,
    pub sound: SurroundSound,
    pub encoder: Option<String>,
}

impl ClientMetadata {
    /// Merge recognized keys from a metadata object; keys are matched
    /// case-insensitively.
    pub fn apply(&mut self, meta: &Metadata) {
        use crate::amf::Amf0Value;

        if let Some(v) = meta.get_number("duration") {
            self.duration = Some(v);
        }
        if let Some(v) = meta.get_number("filesize") {
            self.file_size = Some(v);
        }
        if let Some(v) = meta.get_number("width") {
            self.width = Some(v);
        }
        if let Some(v) = meta.get_number("height") {
            self.height = Some(v);
        }
        match meta.get("videocodecid") {
            Some(Amf0Value::String(s)) => self.video_codec_id = Some(s.clone()),
            Some(Amf0Value::Number(n)) => self.video_codec_id_number = Some(*n),
            _ => {}
        }
        if let Some(v) = meta.get_number("videodatarate") {
            self.video_data_rate = Some(v);
        }
        if let Some(v) = meta.get_number("framerate") {
            self.frame_rate = Some(v);
        }
        match meta.get("audiocodecid") {
            Some(Amf0Value::String(s)) => self.audio_codec_id = Some(s.clone()),
            Some(Amf0Value::Number(n)) => self.audio_codec_id_number = Some(*n),
            _ => {}
        }
        if let Some(v) = meta.get_number("audiodatarate") {
            self.audio_data_rate = Some(v);
        }
        if let Some(v) = meta.get_number("audiosamplerate") {
            self.audio_sample_rate = Some(v);
        }
        if let Some(v) = meta.get_number("audiosamplesize") {
            self.audio_sample_size = Some(v);
        }
        if let Some(v) = meta.get_number("audiochannels") {
            self.audio_channels = Some(v);
        }
        if let Some(v) = meta.get_bool("stereo") {
            self.sound.stereo = v;
        }
        if let Some(v) = meta.get_bool("2.1") {
            self.sound.two_point_one = v;
        }
        if let Some(v) = meta.get_bool("3.1") {
            self.sound.three_point_one = v;
        }
        if let Some(v) = meta.get_bool("4.0") {
            self.sound.four_point_zero = v;
        }
        if let Some(v) = meta.get_bool("4.1") {
            self.sound.four_point_one = v;
        }
        if let Some(v) = meta.get_bool("5.1") {
            self.sound.five_point_one = v;
        }
        if let Some(v) = meta.get_bool("7.1") {
            self.sound.seven_point_one = v;
        }
        if let Some(v) = meta.get_str("encoder") {
            self.encoder = Some(v.to_string());
        }
    }
}

/// Snapshot of a session handed to the [`SessionGuard`](crate::broadcast::SessionGuard).
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub app: String,
    pub tc_url: Option<String>,
    pub stream_key: Option<String>,
    pub publishing_type: Option<PublishingType>,
}

/// Media/metadata callbacks for client-side sessions.
pub type AudioCallback = Box<dyn Fn(AudioTag, Bytes, u32) + Send + Sync>;
pub type VideoCallback = Box<dyn Fn(VideoTag, Bytes, u32) + Send + Sync>;
pub type MetadataCallback = Box<dyn Fn(&Metadata) + Send + Sync>;

#[derive(Default)]
pub struct ClientCallbacks {
    pub on_audio: Option<AudioCallback>,
    pub on_video: Option<VideoCallback>,
    pub on_metadata: Option<MetadataCallback>,
}

/// Tunables a session inherits from the server/client configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outgoing chunk size announced after connect.
    pub chunk_size: u32,
    /// Window acknowledgement size offered to the peer.
    pub window_ack_size: u32,
    /// Per-direction socket buffer size.
    pub buffer_size: usize,
    /// Bound on the handshake phase.
    pub handshake_timeout: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// One RTMP connection's state machine; see the module docs.
pub struct Session<R, W> {
    id: String,
    role: SessionRole,
    manager: MessageManager<R, W>,
    /// Registry shared with every other session; server role only.
    broadcaster: Option<Arc<Broadcaster>>,
    callbacks: ClientCallbacks,
    config: SessionConfig,

    // Connect metadata
    app: String,
    flash_ver: Option<String>,
    swf_url: Option<String>,
    tc_url: Option<String>,
    connection_type: Option<String>,

    stream_key: Option<String>,
    publishing_type: Option<PublishingType>,
    client_metadata: ClientMetadata,

    stream_role: StreamRole,
    active: bool,
    /// Client role: play has been requested (StreamBegin seen).
    play_sent: bool,
    /// Message stream id for post-publish/play traffic.
    stream_id: u32,
    /// Player sessions drain this queue of broadcast frames.
    frame_rx: Option<mpsc::Receiver<StreamEvent>>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Session for an accepted connection.
    pub fn server(reader: R, writer: W, broadcaster: Arc<Broadcaster>, config: SessionConfig) -> Self {
        let manager = MessageManager::new(reader, writer, config.buffer_size);
        Self {
            id: Uuid::new_v4().to_string(),
            role: SessionRole::Server,
            manager,
            broadcaster: Some(broadcaster),
            callbacks: ClientCallbacks::default(),
            config,
            app: String::new(),
            flash_ver: None,
            swf_url: None,
            tc_url: None,
            connection_type: None,
            stream_key: None,
            publishing_type: None,
            client_metadata: ClientMetadata::default(),
            stream_role: StreamRole::None,
            active: true,
            play_sent: false,
            stream_id: DEFAULT_STREAM_ID,
            frame_rx: None,
        }
    }

    /// Session for an outbound playback connection.
    pub fn client(
        reader: R,
        writer: W,
        app: String,
        tc_url: String,
        stream_key: String,
        callbacks: ClientCallbacks,
        config: SessionConfig,
    ) -> Self {
        let manager = MessageManager::new(reader, writer, config.buffer_size);
        Self {
            id: Uuid::new_v4().to_string(),
            role: SessionRole::Client,
            manager,
            broadcaster: None,
            callbacks,
            config,
            app,
            flash_ver: None,
            swf_url: None,
            tc_url: Some(tc_url),
            connection_type: None,
            stream_key: Some(stream_key),
            publishing_type: None,
            client_metadata: ClientMetadata::default(),
            stream_role: StreamRole::None,
            active: true,
            play_sent: false,
            stream_id: DEFAULT_STREAM_ID,
            frame_rx: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream properties collected from `@setDataFrame`.
    pub fn client_metadata(&self) -> &ClientMetadata {
        &self.client_metadata
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            app: self.app.clone(),
            tc_url: self.tc_url.clone(),
            stream_key: self.stream_key.clone(),
            publishing_type: self.publishing_type,
        }
    }

    /// Run the session to completion. EOF from the peer is a normal end.
    pub async fn run(mut self) -> Result<()> {
        tracing::debug!(session_id = %self.id, role = ?self.role, "session started");

        let result = self.run_inner().await;
        self.teardown_stream_role().await;

        match result {
            Ok(()) => {
                tracing::info!(session_id = %self.id, "session ended");
                Ok(())
            }
            Err(e) if e.is_eof() => {
                tracing::info!(session_id = %self.id, "peer disconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "session failed");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<()> {
        let handshake_timeout = self.config.handshake_timeout;
        match self.role {
            SessionRole::Server => {
                tokio::time::timeout(handshake_timeout, self.manager.handshake_server())
                    .await
                    .map_err(|_| Error::Timeout)??;
            }
            SessionRole::Client => {
                tokio::time::timeout(handshake_timeout, self.manager.handshake_client())
                    .await
                    .map_err(|_| Error::Timeout)??;
                self.manager.send_set_chunk_size(self.config.chunk_size).await?;
                let app = self.app.clone();
                let tc_url = self.tc_url.clone().unwrap_or_default();
                self.manager.request_connect(&app, &tc_url).await?;
            }
        }
        tracing::debug!(session_id = %self.id, "handshake complete");

        while self.active {
            match self.frame_rx.take() {
                Some(mut rx) => {
                    tokio::select! {
                        event = rx.recv() => {
                            self.frame_rx = Some(rx);
                            self.on_stream_event(event).await?;
                        }
                        message = self.manager.next_message() => {
                            self.frame_rx = Some(rx);
                            self.handle_message(message?).await?;
                        }
                    }
                }
                None => {
                    let message = self.manager.next_message().await?;
                    self.handle_message(message).await?;
                }
            }
        }

        Ok(())
    }

    /// Terminal cleanup; also used by FCUnpublish/closeStream.
    ///
    /// Publishers broadcast end-of-stream before deregistering, so every
    /// subscriber hears Play.Stop before its queue closes.
    async fn teardown_stream_role(&mut self) {
        match self.stream_role {
            StreamRole::Publisher => {
                if let (Some(b), Some(key)) = (&self.broadcaster, &self.stream_key) {
                    tracing::info!(session_id = %self.id, stream_key = %key, "publisher leaving");
                    b.broadcast_end_of_stream(key).await;
                    b.destroy_publisher(key).await;
                    if let Some(guard) = b.session_guard() {
                        guard.end(&self.info()).await;
                    }
                }
            }
            StreamRole::Player => {
                if let (Some(b), Some(key)) = (&self.broadcaster, &self.stream_key) {
                    tracing::debug!(session_id = %self.id, stream_key = %key, "player leaving");
                    b.destroy_subscriber(key, &self.id).await;
                }
            }
            StreamRole::None => {}
        }
        self.stream_role = StreamRole::None;
        self.stream_key = None;
        self.publishing_type = None;
        self.frame_rx = None;
    }

    /// Forward a broadcast event to our playing peer.
    async fn on_stream_event(&mut self, event: Option<StreamEvent>) -> Result<()> {
        match event {
            Some(StreamEvent::Audio { payload, timestamp }) => {
                self.manager.send_audio(payload, timestamp, self.stream_id).await
            }
            Some(StreamEvent::Video { payload, timestamp }) => {
                self.manager.send_video(payload, timestamp, self.stream_id).await
            }
            Some(StreamEvent::Metadata(metadata)) => {
                self.manager.send_metadata(metadata, self.stream_id).await
            }
            Some(StreamEvent::EndOfStream) => {
                tracing::info!(session_id = %self.id, "stream ended by publisher");
                self.manager
                    .send_status(
                        0.0,
                        self.stream_id,
                        LEVEL_STATUS,
                        NS_PLAY_STOP,
                        "Stopped playing stream.",
                    )
                    .await?;
                // Stay connected; the peer may play something else.
                self.stream_role = StreamRole::None;
                self.stream_key = None;
                self.frame_rx = None;
                Ok(())
            }
            None => {
                // Queue closed without an end-of-stream event: we were
                // dropped as a slow subscriber.
                tracing::warn!(session_id = %self.id, "subscriber queue closed, disconnecting");
                self.manager
                    .send_status(
                        0.0,
                        self.stream_id,
                        LEVEL_STATUS,
                        NS_PLAY_STOP,
                        "Stopped playing stream.",
                    )
                    .await?;
                self.stream_role = StreamRole::None;
                self.stream_key = None;
                self.frame_rx = None;
                self.active = false;
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: RtmpMessage) -> Result<()> {
        match message {
            RtmpMessage::UserControl(event) => self.on_user_control(event).await,
            RtmpMessage::Command(cmd) => self.on_command(cmd).await,
            RtmpMessage::Data(data) => self.on_data(data).await,
            RtmpMessage::Audio { timestamp, payload } => self.on_audio(timestamp, payload).await,
            RtmpMessage::Video { timestamp, payload } => self.on_video(timestamp, payload).await,
            other => {
                tracing::trace!(session_id = %self.id, message = ?other, "unhandled message");
                Ok(())
            }
        }
    }

    async fn on_user_control(&mut self, event: UserControlEvent) -> Result<()> {
        match event {
            UserControlEvent::PingRequest(timestamp) => {
                self.manager.send_ping_response(timestamp).await
            }
            UserControlEvent::StreamBegin(stream_id) => {
                tracing::debug!(session_id = %self.id, stream_id, "stream begin");
                if self.role == SessionRole::Client && !self.play_sent {
                    let key = self.stream_key.clone().unwrap_or_default();
                    self.manager.request_play(&key, self.stream_id).await?;
                    self.play_sent = true;
                }
                Ok(())
            }
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms,
            } => {
                tracing::debug!(session_id = %self.id, stream_id, buffer_ms, "peer buffer length");
                Ok(())
            }
            other => {
                tracing::trace!(session_id = %self.id, event = ?other, "unhandled user control");
                Ok(())
            }
        }
    }

    async fn on_command(&mut self, cmd: Command) -> Result<()> {
        match self.role {
            SessionRole::Server => match cmd.name.as_str() {
                CMD_CONNECT => self.on_connect(cmd).await,
                CMD_RELEASE_STREAM => {
                    // Semantics undefined; acknowledged implicitly.
                    Ok(())
                }
                CMD_FC_PUBLISH => {
                    let key = cmd.stream_key_argument().unwrap_or_default().to_string();
                    self.manager.send_on_fc_publish(&key).await
                }
                CMD_CREATE_STREAM => {
                    self.manager
                        .send_create_stream_response(cmd.transaction_id, DEFAULT_STREAM_ID)
                        .await?;
                    self.manager.send_stream_begin(DEFAULT_STREAM_ID).await
                }
                CMD_PUBLISH => self.on_publish(cmd).await,
                CMD_PLAY => self.on_play(cmd).await,
                CMD_FC_UNPUBLISH | CMD_CLOSE_STREAM => {
                    self.teardown_stream_role().await;
                    Ok(())
                }
                CMD_DELETE_STREAM => {
                    self.teardown_stream_role().await;
                    self.active = false;
                    Ok(())
                }
                other => {
                    tracing::trace!(session_id = %self.id, command = other, "unknown command");
                    Ok(())
                }
            },
            SessionRole::Client => match cmd.name.as_str() {
                CMD_RESULT => self.on_result(cmd).await,
                CMD_ERROR => {
                    tracing::warn!(session_id = %self.id, command = ?cmd, "server error");
                    self.active = false;
                    Ok(())
                }
                CMD_ON_STATUS => self.on_status(cmd).await,
                other => {
                    tracing::trace!(session_id = %self.id, command = other, "unknown command");
                    Ok(())
                }
            },
        }
    }

    /// Server: `connect`. Matching app name triggers the control sequence
    /// and the success `_result`; anything else closes the session.
    async fn on_connect(&mut self, cmd: Command) -> Result<()> {
        if let Some(meta) = Metadata::from_value(&cmd.command_object) {
            self.store_connect_metadata(&meta);
        }

        let broadcaster = self.require_broadcaster()?;
        if self.app != broadcaster.app_name() {
            tracing::warn!(
                session_id = %self.id,
                app = %self.app,
                "connect to unknown application, closing"
            );
            self.active = false;
            return Ok(());
        }

        let window_ack_size = self.config.window_ack_size;
        let chunk_size = self.config.chunk_size;
        self.manager.send_window_ack_size(window_ack_size).await?;
        self.manager
            .send_set_peer_bandwidth(window_ack_size, crate::protocol::LimitType::Dynamic)
            .await?;
        self.manager.send_stream_begin(DEFAULT_PUBLISH_STREAM).await?;
        self.manager.send_set_chunk_size(chunk_size).await?;
        self.manager.send_connect_success(cmd.transaction_id).await?;

        tracing::info!(session_id = %self.id, app = %self.app, "connected");
        Ok(())
    }

    fn store_connect_metadata(&mut self, meta: &Metadata) {
        if let Some(app) = meta.get_str("app") {
            self.app = app.to_string();
        }
        if let Some(v) = meta.get_str("flashVer") {
            self.flash_ver = Some(v.to_string());
        }
        if let Some(v) = meta.get_str("swfUrl") {
            self.swf_url = Some(v.to_string());
        }
        if let Some(v) = meta.get_str("tcUrl") {
            self.tc_url = Some(v.to_string());
        }
        if let Some(v) = meta.get_str("type") {
            self.connection_type = Some(v.to_string());
        }
    }

    /// Server: `publish`. Guard check, registration, then Publish.Start.
    async fn on_publish(&mut self, cmd: Command) -> Result<()> {
        let stream_key = cmd
            .stream_key_argument()
            .ok_or_else(|| ProtocolError::InvalidCommand("publish without stream key".into()))?
            .to_string();
        let publishing_type = cmd
            .arguments
            .iter()
            .filter_map(|v| v.as_str())
            .nth(1)
            .map(PublishingType::parse)
            .unwrap_or(PublishingType::Live);

        if cmd.stream_id != 0 {
            self.stream_id = cmd.stream_id;
        }
        self.stream_key = Some(stream_key.clone());
        self.publishing_type = Some(publishing_type);

        let broadcaster = self.require_broadcaster()?;

        if let Some(guard) = broadcaster.session_guard() {
            if !guard.check(&self.info()).await {
                tracing::warn!(
                    session_id = %self.id,
                    stream_key = %stream_key,
                    "publish rejected by session guard"
                );
                self.manager
                    .send_status(
                        cmd.transaction_id,
                        self.stream_id,
                        LEVEL_STATUS,
                        NS_PLAY_STOP,
                        "Stopped playing stream.",
                    )
                    .await?;
                self.stream_key = None;
                self.publishing_type = None;
                self.active = false;
                return Ok(());
            }
        }

        if let Err(BroadcastError::AlreadyPublishing(_)) =
            broadcaster.register_publisher(&stream_key).await
        {
            tracing::warn!(
                session_id = %self.id,
                stream_key = %stream_key,
                "stream key already in use"
            );
            self.manager
                .send_status(
                    cmd.transaction_id,
                    self.stream_id,
                    LEVEL_ERROR,
                    NS_PUBLISH_BAD_NAME,
                    &format!("{stream_key} is already being published"),
                )
                .await?;
            self.stream_key = None;
            self.publishing_type = None;
            self.active = false;
            return Ok(());
        }

        self.stream_role = StreamRole::Publisher;
        self.manager
            .send_status(
                cmd.transaction_id,
                self.stream_id,
                LEVEL_STATUS,
                NS_PUBLISH_START,
                &format!("Publishing {stream_key}"),
            )
            .await?;

        tracing::info!(
            session_id = %self.id,
            stream_key = %stream_key,
            publishing_type = ?publishing_type,
            "publishing started"
        );
        Ok(())
    }

    /// Server: `play`. Status, cached sequence headers at timestamp 0,
    /// then subscription; frames published before this moment are never
    /// replayed.
    async fn on_play(&mut self, cmd: Command) -> Result<()> {
        let stream_key = cmd
            .stream_key_argument()
            .ok_or_else(|| ProtocolError::InvalidCommand("play without stream key".into()))?
            .to_string();

        if cmd.stream_id != 0 {
            self.stream_id = cmd.stream_id;
        }

        let broadcaster = self.require_broadcaster()?;

        if !broadcaster.stream_exists(&stream_key).await {
            tracing::debug!(session_id = %self.id, stream_key = %stream_key, "play for unknown stream");
            self.manager
                .send_status(
                    cmd.transaction_id,
                    self.stream_id,
                    LEVEL_ERROR,
                    NS_PLAY_STREAM_NOT_FOUND,
                    &format!("no stream named {stream_key}"),
                )
                .await?;
            // The session stays active for another attempt.
            return Ok(());
        }

        self.manager
            .send_status(
                cmd.transaction_id,
                self.stream_id,
                LEVEL_STATUS,
                NS_PLAY_START,
                &format!("Playing {stream_key}"),
            )
            .await?;

        if let Some(header) = broadcaster.avc_sequence_header(&stream_key).await {
            tracing::debug!(
                session_id = %self.id,
                bytes = header.len(),
                "sending cached avc sequence header"
            );
            self.manager.send_video(header, 0, self.stream_id).await?;
        }
        if let Some(header) = broadcaster.aac_sequence_header(&stream_key).await {
            tracing::debug!(
                session_id = %self.id,
                bytes = header.len(),
                "sending cached aac sequence header"
            );
            self.manager.send_audio(header, 0, self.stream_id).await?;
        }

        let (handle, rx) = SubscriberHandle::new(self.id.clone());
        if broadcaster
            .register_subscriber(&stream_key, handle)
            .await
            .is_err()
        {
            // The publisher vanished between the check and registration.
            self.manager
                .send_status(
                    cmd.transaction_id,
                    self.stream_id,
                    LEVEL_ERROR,
                    NS_PLAY_STREAM_NOT_FOUND,
                    &format!("no stream named {stream_key}"),
                )
                .await?;
            return Ok(());
        }

        self.stream_key = Some(stream_key.clone());
        self.stream_role = StreamRole::Player;
        self.frame_rx = Some(rx);

        tracing::info!(session_id = %self.id, stream_key = %stream_key, "playing started");
        Ok(())
    }

    /// Client: `_result` responses drive the connect → createStream flow.
    async fn on_result(&mut self, cmd: Command) -> Result<()> {
        if let Some(info) = cmd.info() {
            if info.get_str("level") == Some(LEVEL_ERROR) {
                tracing::warn!(session_id = %self.id, info = ?info.as_map(), "request failed");
                self.active = false;
                return Ok(());
            }
            if info.get_str("code") == Some(NC_CONNECT_SUCCESS) {
                tracing::debug!(session_id = %self.id, "connected, creating stream");
                return self.manager.request_create_stream(2.0).await;
            }
            return Ok(());
        }

        // createStream result: the argument is the allotted stream id.
        if let Some(id) = cmd.arguments.iter().find_map(|v| v.as_number()) {
            self.stream_id = id as u32;
            tracing::debug!(session_id = %self.id, stream_id = self.stream_id, "stream created");
        }
        Ok(())
    }

    /// Client: `onStatus` notifications drive playback state.
    async fn on_status(&mut self, cmd: Command) -> Result<()> {
        let Some(info) = cmd.info() else {
            return Ok(());
        };

        if info.get_str("level") == Some(LEVEL_ERROR) {
            tracing::warn!(session_id = %self.id, info = ?info.as_map(), "status error");
            self.active = false;
            return Ok(());
        }

        match info.get_str("code") {
            Some(NS_PLAY_START) => {
                tracing::info!(session_id = %self.id, "playback started");
            }
            Some(NS_PLAY_STOP) => {
                tracing::info!(session_id = %self.id, "playback stopped");
                self.active = false;
            }
            code => {
                tracing::debug!(session_id = %self.id, code = ?code, "status");
            }
        }
        Ok(())
    }

    /// `@setDataFrame` / `onMetaData`: record recognized keys, forward the
    /// whole object.
    async fn on_data(&mut self, data: DataMessage) -> Result<()> {
        match data.name.as_str() {
            CMD_SET_DATA_FRAME | CMD_ON_METADATA => {
                let Some(meta) = data.metadata() else {
                    return Ok(());
                };
                self.client_metadata.apply(&meta);

                match self.role {
                    SessionRole::Client => {
                        if let Some(on_metadata) = &self.callbacks.on_metadata {
                            on_metadata(&meta);
                        }
                    }
                    SessionRole::Server => {
                        if self.stream_role == StreamRole::Publisher {
                            if let (Some(b), Some(key)) = (&self.broadcaster, &self.stream_key) {
                                b.broadcast_metadata(key, meta).await;
                            }
                        }
                    }
                }
                Ok(())
            }
            other => {
                tracing::trace!(session_id = %self.id, name = other, "unhandled data message");
                Ok(())
            }
        }
    }

    /// Audio from a publisher: cache AAC sequence headers, forward
    /// verbatim. Client role hands the payload to the callback.
    async fn on_audio(&mut self, timestamp: u32, payload: Bytes) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        if self.role == SessionRole::Client {
            if let (Some(on_audio), Some(tag)) = (&self.callbacks.on_audio, AudioTag::parse(&payload))
            {
                on_audio(tag, payload, timestamp);
            }
            return Ok(());
        }

        if self.stream_role != StreamRole::Publisher {
            tracing::trace!(session_id = %self.id, "audio from non-publisher ignored");
            return Ok(());
        }

        let broadcaster = self.require_broadcaster()?;
        let key = self.stream_key.clone().unwrap_or_default();

        if media::is_aac_sequence_header(&payload) {
            tracing::debug!(session_id = %self.id, stream_key = %key, "caching aac sequence header");
            broadcaster
                .set_aac_sequence_header(&key, payload.clone())
                .await;
        }
        broadcaster.broadcast_audio(&key, payload, timestamp).await;
        Ok(())
    }

    /// Video from a publisher: cache AVC sequence headers, forward
    /// verbatim. Client role hands the payload to the callback.
    async fn on_video(&mut self, timestamp: u32, payload: Bytes) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        if self.role == SessionRole::Client {
            if let (Some(on_video), Some(tag)) = (&self.callbacks.on_video, VideoTag::parse(&payload))
            {
                on_video(tag, payload, timestamp);
            }
            return Ok(());
        }

        if self.stream_role != StreamRole::Publisher {
            tracing::trace!(session_id = %self.id, "video from non-publisher ignored");
            return Ok(());
        }

        let broadcaster = self.require_broadcaster()?;
        let key = self.stream_key.clone().unwrap_or_default();

        if media::is_avc_sequence_header(&payload) {
            tracing::debug!(session_id = %self.id, stream_key = %key, "caching avc sequence header");
            broadcaster
                .set_avc_sequence_header(&key, payload.clone())
                .await;
        }
        broadcaster.broadcast_video(&key, payload, timestamp).await;
        Ok(())
    }

    fn require_broadcaster(&self) -> Result<Arc<Broadcaster>> {
        self.broadcaster
            .clone()
            .ok_or_else(|| ProtocolError::InvalidCommand("server command on client session".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf_object;
    use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, Message};
    use crate::protocol::handshake::{Handshake, HandshakeRole};
    use bytes::{BufMut, BytesMut};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    /// Scripted peer driving the raw chunk layer, so tests observe every
    /// message the session emits, protocol control included.
    struct RawPeer {
        read: ReadHalf<DuplexStream>,
        write: WriteHalf<DuplexStream>,
        buf: BytesMut,
        decoder: ChunkDecoder,
        encoder: ChunkEncoder,
    }

    impl RawPeer {
        /// Handshake as a client over the given stream.
        async fn connect(stream: DuplexStream) -> Self {
            let (mut read, mut write) = split(stream);
            let mut handshake = Handshake::new(HandshakeRole::Client);
            let c0c1 = handshake.initial_bytes().unwrap();
            write.write_all(&c0c1).await.unwrap();

            let mut buf = BytesMut::new();
            while !handshake.is_done() {
                let before = buf.len();
                if let Some(response) = handshake.process(&mut buf).unwrap() {
                    write.write_all(&response).await.unwrap();
                }
                if handshake.is_done() {
                    break;
                }
                if buf.len() == before {
                    let mut tmp = [0u8; 8192];
                    let n = read.read(&mut tmp).await.unwrap();
                    assert!(n > 0, "stream closed during handshake");
                    buf.put_slice(&tmp[..n]);
                }
            }

            Self {
                read,
                write,
                buf,
                decoder: ChunkDecoder::new(),
                encoder: ChunkEncoder::new(),
            }
        }

        /// Next chunk-layer message; applies Set Chunk Size to keep
        /// parsing, but still returns it.
        async fn next_raw(&mut self) -> Message {
            loop {
                if let Some(raw) = self.decoder.decode(&mut self.buf).unwrap() {
                    if raw.type_id == MSG_SET_CHUNK_SIZE && raw.payload.len() >= 4 {
                        let size = u32::from_be_bytes([
                            raw.payload[0],
                            raw.payload[1],
                            raw.payload[2],
                            raw.payload[3],
                        ]) & 0x7FFF_FFFF;
                        self.decoder.set_chunk_size(size);
                    }
                    return raw;
                }
                let mut tmp = [0u8; 8192];
                let n = self.read.read(&mut tmp).await.unwrap();
                assert!(n > 0, "stream closed while waiting for a message");
                self.buf.put_slice(&tmp[..n]);
            }
        }

        /// Next command message, skipping everything else.
        async fn next_command(&mut self) -> Command {
            loop {
                let raw = self.next_raw().await;
                if raw.type_id == MSG_COMMAND_AMF0 {
                    let RtmpMessage::Command(cmd) = RtmpMessage::from_message(&raw).unwrap()
                    else {
                        panic!("command payload expected");
                    };
                    return cmd;
                }
            }
        }

        async fn send_raw(&mut self, csid: u32, stream_id: u32, timestamp: u32, type_id: u8, payload: Bytes) {
            let message = Message::new(csid, stream_id, timestamp, type_id, payload);
            let mut wire = BytesMut::new();
            self.encoder.encode(&message, &mut wire);
            self.write.write_all(&wire).await.unwrap();
        }

        async fn send_command(
            &mut self,
            stream_id: u32,
            name: &str,
            transaction_id: f64,
            command_object: crate::amf::Amf0Value,
            arguments: Vec<crate::amf::Amf0Value>,
        ) {
            let cmd = Command {
                name: name.to_string(),
                transaction_id,
                command_object,
                arguments,
                stream_id,
            };
            self.send_raw(CSID_COMMAND, stream_id, 0, MSG_COMMAND_AMF0, cmd.to_amf0())
                .await;
        }

        /// Issue connect and drain the response sequence.
        async fn do_connect(&mut self, app: &str) {
            self.send_command(
                0,
                CMD_CONNECT,
                1.0,
                amf_object! {
                    "app" => app,
                    "tcUrl" => format!("rtmp://host/{app}"),
                    "flashVer" => "LNX 9,0,124,2",
                    "capabilities" => 15.0,
                    "audioCodecs" => 4071.0,
                    "videoCodecs" => 252.0,
                },
                vec![],
            )
            .await;
            let result = self.next_command().await;
            assert_eq!(result.name, CMD_RESULT);
        }

        /// Issue publish and wait for Publish.Start.
        async fn do_publish(&mut self, stream_key: &str) {
            self.send_command(
                0,
                CMD_CREATE_STREAM,
                2.0,
                crate::amf::Amf0Value::Null,
                vec![],
            )
            .await;
            let result = self.next_command().await;
            assert_eq!(result.name, CMD_RESULT);

            self.send_command(
                DEFAULT_STREAM_ID,
                CMD_PUBLISH,
                3.0,
                crate::amf::Amf0Value::Null,
                vec![
                    crate::amf::Amf0Value::String(stream_key.to_string()),
                    crate::amf::Amf0Value::String("live".to_string()),
                ],
            )
            .await;
            let status = self.next_command().await;
            let info = status.info().unwrap();
            assert_eq!(info.get_str("code"), Some(NS_PUBLISH_START));
        }
    }

    fn spawn_server_session(
        broadcaster: Arc<Broadcaster>,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (peer_io, server_io) = duplex(1 << 20);
        let (reader, writer) = split(server_io);
        let session = Session::server(reader, writer, broadcaster, SessionConfig::default());
        let task = tokio::spawn(session.run());
        (peer_io, task)
    }

    #[tokio::test]
    async fn test_connect_control_sequence() {
        let broadcaster = Arc::new(Broadcaster::new("app"));
        let (peer_io, task) = spawn_server_session(broadcaster);
        let mut peer = RawPeer::connect(peer_io).await;

        peer.send_command(
            0,
            CMD_CONNECT,
            1.0,
            amf_object! {
                "app" => "app",
                "tcUrl" => "rtmp://host/app",
                "flashVer" => "LNX 9,0,124,2",
                "capabilities" => 15.0,
                "audioCodecs" => 4071.0,
                "videoCodecs" => 252.0,
            },
            vec![],
        )
        .await;

        // Window Ack Size
        let raw = peer.next_raw().await;
        assert_eq!(raw.type_id, MSG_WINDOW_ACK_SIZE);
        assert_eq!(raw.csid, CSID_PROTOCOL_CONTROL);
        assert_eq!(raw.payload.as_ref(), &2_500_000u32.to_be_bytes());

        // Set Peer Bandwidth, dynamic
        let raw = peer.next_raw().await;
        assert_eq!(raw.type_id, MSG_SET_PEER_BANDWIDTH);
        assert_eq!(&raw.payload[..4], &2_500_000u32.to_be_bytes());
        assert_eq!(raw.payload[4], 2);

        // StreamBegin(0)
        let raw = peer.next_raw().await;
        assert_eq!(raw.type_id, MSG_USER_CONTROL);
        assert_eq!(raw.payload.as_ref(), &[0, 0, 0, 0, 0, 0]);

        // Set Chunk Size
        let raw = peer.next_raw().await;
        assert_eq!(raw.type_id, MSG_SET_CHUNK_SIZE);
        assert_eq!(raw.payload.as_ref(), &4096u32.to_be_bytes());

        // _result with the server identity and success info.
        let result = peer.next_command().await;
        assert_eq!(result.name, CMD_RESULT);
        assert_eq!(result.transaction_id, 1.0);
        let props = Metadata::from_value(&result.command_object).unwrap();
        assert_eq!(props.get_str("fmsVer"), Some(FMS_VERSION));
        assert_eq!(props.get_number("capabilities"), Some(31.0));
        let info = result.info().unwrap();
        assert_eq!(info.get_str("level"), Some(LEVEL_STATUS));
        assert_eq!(info.get_str("code"), Some(NC_CONNECT_SUCCESS));
        assert_eq!(info.get_str("description"), Some("Connection succeeded."));
        assert_eq!(info.get_number("objectEncoding"), Some(0.0));

        drop(peer);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_unknown_app_closes() {
        let broadcaster = Arc::new(Broadcaster::new("app"));
        let (peer_io, task) = spawn_server_session(broadcaster);
        let mut peer = RawPeer::connect(peer_io).await;

        peer.send_command(
            0,
            CMD_CONNECT,
            1.0,
            amf_object! { "app" => "wrong" },
            vec![],
        )
        .await;

        // Session deactivates without a reply.
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_publish_play_fanout_with_cached_headers() {
        let broadcaster = Arc::new(Broadcaster::new("app"));

        let (pub_io, _pub_task) = spawn_server_session(broadcaster.clone());
        let mut publisher = RawPeer::connect(pub_io).await;
        publisher.do_connect("app").await;
        publisher.do_publish("abc").await;

        // AVC sequence header, a keyframe the late joiner must not see,
        // then the AAC sequence header as a processing barrier.
        let avc_header = Bytes::from_static(&[0x17, 0x00, 0x01, 0x64, 0x00]);
        let early_keyframe = Bytes::from_static(&[0x17, 0x01, 0xAA, 0xBB]);
        let aac_header = Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]);
        publisher
            .send_raw(CSID_VIDEO, 1, 0, MSG_VIDEO, avc_header.clone())
            .await;
        publisher
            .send_raw(CSID_VIDEO, 1, 40, MSG_VIDEO, early_keyframe)
            .await;
        publisher
            .send_raw(CSID_AUDIO, 1, 40, MSG_AUDIO, aac_header.clone())
            .await;

        // The AAC header was sent last; once cached, the keyframe has
        // been processed too.
        for _ in 0..400 {
            if broadcaster.aac_sequence_header("abc").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(broadcaster.aac_sequence_header("abc").await.is_some());

        // A player joins now.
        let (play_io, _play_task) = spawn_server_session(broadcaster.clone());
        let mut player = RawPeer::connect(play_io).await;
        player.do_connect("app").await;
        player
            .send_command(
                DEFAULT_STREAM_ID,
                CMD_PLAY,
                4.0,
                crate::amf::Amf0Value::Null,
                vec![crate::amf::Amf0Value::String("abc".to_string())],
            )
            .await;

        let status = player.next_command().await;
        assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PLAY_START));

        // Cached headers arrive at timestamp 0; the early keyframe is
        // not replayed.
        let raw = player.next_raw().await;
        assert_eq!(raw.type_id, MSG_VIDEO);
        assert_eq!(raw.timestamp, 0);
        assert_eq!(raw.payload, avc_header);

        let raw = player.next_raw().await;
        assert_eq!(raw.type_id, MSG_AUDIO);
        assert_eq!(raw.timestamp, 0);
        assert_eq!(raw.payload, aac_header);

        // Wait for the subscription, then push a live frame.
        for _ in 0..400 {
            if broadcaster.subscriber_count("abc").await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let live_keyframe = Bytes::from_static(&[0x17, 0x01, 0xCC, 0xDD]);
        publisher
            .send_raw(CSID_VIDEO, 1, 80, MSG_VIDEO, live_keyframe.clone())
            .await;

        let raw = player.next_raw().await;
        assert_eq!(raw.type_id, MSG_VIDEO);
        assert_eq!(raw.timestamp, 80);
        assert_eq!(raw.payload, live_keyframe);
    }

    #[tokio::test]
    async fn test_play_unknown_stream_keeps_session() {
        let broadcaster = Arc::new(Broadcaster::new("app"));
        let (peer_io, _task) = spawn_server_session(broadcaster.clone());
        let mut peer = RawPeer::connect(peer_io).await;
        peer.do_connect("app").await;

        peer.send_command(
            DEFAULT_STREAM_ID,
            CMD_PLAY,
            4.0,
            crate::amf::Amf0Value::Null,
            vec![crate::amf::Amf0Value::String("missing".to_string())],
        )
        .await;
        let status = peer.next_command().await;
        let info = status.info().unwrap();
        assert_eq!(info.get_str("level"), Some(LEVEL_ERROR));
        assert_eq!(info.get_str("code"), Some(NS_PLAY_STREAM_NOT_FOUND));

        // The session survives for a further attempt.
        broadcaster.register_publisher("exists").await.unwrap();
        peer.send_command(
            DEFAULT_STREAM_ID,
            CMD_PLAY,
            5.0,
            crate::amf::Amf0Value::Null,
            vec![crate::amf::Amf0Value::String("exists".to_string())],
        )
        .await;
        let status = peer.next_command().await;
        assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PLAY_START));
    }

    #[tokio::test]
    async fn test_duplicate_publish_rejected() {
        let broadcaster = Arc::new(Broadcaster::new("app"));

        let (first_io, _first_task) = spawn_server_session(broadcaster.clone());
        let mut first = RawPeer::connect(first_io).await;
        first.do_connect("app").await;
        first.do_publish("live").await;

        let (second_io, second_task) = spawn_server_session(broadcaster.clone());
        let mut second = RawPeer::connect(second_io).await;
        second.do_connect("app").await;
        second
            .send_command(
                DEFAULT_STREAM_ID,
                CMD_PUBLISH,
                3.0,
                crate::amf::Amf0Value::Null,
                vec![
                    crate::amf::Amf0Value::String("live".to_string()),
                    crate::amf::Amf0Value::String("live".to_string()),
                ],
            )
            .await;

        let status = second.next_command().await;
        let info = status.info().unwrap();
        assert_eq!(info.get_str("level"), Some(LEVEL_ERROR));
        assert_eq!(info.get_str("code"), Some(NS_PUBLISH_BAD_NAME));

        // The second session terminates; the first publisher is intact.
        second_task.await.unwrap().unwrap();
        assert!(broadcaster.stream_exists("live").await);

        // The first publisher can still feed frames.
        first
            .send_raw(
                CSID_VIDEO,
                1,
                0,
                MSG_VIDEO,
                Bytes::from_static(&[0x17, 0x00, 0x01]),
            )
            .await;
        for _ in 0..400 {
            if broadcaster.avc_sequence_header("live").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(broadcaster.avc_sequence_header("live").await.is_some());
    }

    #[tokio::test]
    async fn test_chunked_metadata_forwarded_to_subscribers() {
        let broadcaster = Arc::new(Broadcaster::new("app"));

        let (pub_io, _pub_task) = spawn_server_session(broadcaster.clone());
        let mut publisher = RawPeer::connect(pub_io).await;
        publisher.do_connect("app").await;
        publisher.do_publish("abc").await;

        // Two players.
        let mut players = Vec::new();
        for _ in 0..2 {
            let (play_io, _task) = spawn_server_session(broadcaster.clone());
            let mut player = RawPeer::connect(play_io).await;
            player.do_connect("app").await;
            player
                .send_command(
                    DEFAULT_STREAM_ID,
                    CMD_PLAY,
                    4.0,
                    crate::amf::Amf0Value::Null,
                    vec![crate::amf::Amf0Value::String("abc".to_string())],
                )
                .await;
            let status = player.next_command().await;
            assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PLAY_START));
            players.push(player);
        }
        for _ in 0..400 {
            if broadcaster.subscriber_count("abc").await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // A @setDataFrame payload well over the 128-byte incoming chunk
        // size, so the server must reassemble 3 chunks.
        let data = DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![
                crate::amf::Amf0Value::String(CMD_ON_METADATA.to_string()),
                amf_object! {
                    "width" => 1920.0,
                    "height" => 1080.0,
                    "framerate" => 60.0,
                    "videocodecid" => 7.0,
                    "audiocodecid" => 10.0,
                    "encoder" => "obs-studio 30.0.2 with a deliberately long version string",
                    "customVendorField" => "preserved even though the relay does not know it",
                },
            ],
            stream_id: DEFAULT_STREAM_ID,
        };
        let payload = data.to_amf0();
        assert!(payload.len() > 256, "payload must span three chunks");
        publisher
            .send_raw(CSID_VIDEO, DEFAULT_STREAM_ID, 0, MSG_DATA_AMF0, payload)
            .await;

        for player in &mut players {
            let raw = player.next_raw().await;
            assert_eq!(raw.type_id, MSG_DATA_AMF0);
            let RtmpMessage::Data(received) = RtmpMessage::from_message(&raw).unwrap() else {
                panic!("expected data message");
            };
            assert_eq!(received.name, CMD_ON_METADATA);
            let meta = received.metadata().unwrap();
            assert_eq!(meta.get_number("width"), Some(1920.0));
            // Unknown keys are forwarded untouched.
            assert!(meta.get_str("customVendorField").is_some());
        }
    }

    #[tokio::test]
    async fn test_publisher_disconnect_notifies_subscribers() {
        let broadcaster = Arc::new(Broadcaster::new("app"));

        let (pub_io, pub_task) = spawn_server_session(broadcaster.clone());
        let mut publisher = RawPeer::connect(pub_io).await;
        publisher.do_connect("app").await;
        publisher.do_publish("live").await;

        let (play_io, _play_task) = spawn_server_session(broadcaster.clone());
        let mut player = RawPeer::connect(play_io).await;
        player.do_connect("app").await;
        player
            .send_command(
                DEFAULT_STREAM_ID,
                CMD_PLAY,
                4.0,
                crate::amf::Amf0Value::Null,
                vec![crate::amf::Amf0Value::String("live".to_string())],
            )
            .await;
        let status = player.next_command().await;
        assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PLAY_START));
        for _ in 0..400 {
            if broadcaster.subscriber_count("live").await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Publisher drops mid-stream.
        drop(publisher);
        pub_task.await.unwrap().unwrap();

        // The subscriber hears Play.Stop and the key is free again.
        let status = player.next_command().await;
        assert_eq!(status.name, CMD_ON_STATUS);
        assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PLAY_STOP));

        assert!(!broadcaster.stream_exists("live").await);
        broadcaster.register_publisher("live").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_guard_rejects_publish() {
        struct DenyAll;

        #[async_trait::async_trait]
        impl crate::broadcast::SessionGuard for DenyAll {
            async fn check(&self, _session: &SessionInfo) -> bool {
                false
            }
            async fn end(&self, _session: &SessionInfo) {}
        }

        let broadcaster = Arc::new(Broadcaster::new("app"));
        broadcaster.set_session_guard(Arc::new(DenyAll));

        let (peer_io, task) = spawn_server_session(broadcaster.clone());
        let mut peer = RawPeer::connect(peer_io).await;
        peer.do_connect("app").await;
        peer.send_command(
            DEFAULT_STREAM_ID,
            CMD_PUBLISH,
            3.0,
            crate::amf::Amf0Value::Null,
            vec![
                crate::amf::Amf0Value::String("secret".to_string()),
                crate::amf::Amf0Value::String("live".to_string()),
            ],
        )
        .await;

        let status = peer.next_command().await;
        let info = status.info().unwrap();
        assert_eq!(info.get_str("code"), Some(NS_PLAY_STOP));

        // Clean termination, and the key was never claimed.
        task.await.unwrap().unwrap();
        assert!(!broadcaster.stream_exists("secret").await);
    }

    #[tokio::test]
    async fn test_client_session_plays_stream() {
        let broadcaster = Arc::new(Broadcaster::new("app"));

        // Publisher with cached headers.
        let (pub_io, pub_task) = spawn_server_session(broadcaster.clone());
        let mut publisher = RawPeer::connect(pub_io).await;
        publisher.do_connect("app").await;
        publisher.do_publish("key").await;
        let avc_header = Bytes::from_static(&[0x17, 0x00, 0x01]);
        let aac_header = Bytes::from_static(&[0xAF, 0x00, 0x12]);
        publisher
            .send_raw(CSID_VIDEO, 1, 0, MSG_VIDEO, avc_header.clone())
            .await;
        publisher
            .send_raw(CSID_AUDIO, 1, 0, MSG_AUDIO, aac_header.clone())
            .await;
        for _ in 0..400 {
            if broadcaster.aac_sequence_header("key").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Client session wired to a fresh server session.
        let (client_io, _server_task) = spawn_server_session(broadcaster.clone());
        let (client_reader, client_writer) = split(client_io);

        let videos: Arc<Mutex<Vec<(u32, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
        let audios: Arc<Mutex<Vec<(u32, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
        let videos_cb = videos.clone();
        let audios_cb = audios.clone();
        let callbacks = ClientCallbacks {
            on_audio: Some(Box::new(move |_tag, payload, ts| {
                audios_cb.lock().unwrap().push((ts, payload));
            })),
            on_video: Some(Box::new(move |_tag, payload, ts| {
                videos_cb.lock().unwrap().push((ts, payload));
            })),
            on_metadata: None,
        };

        let client = Session::client(
            client_reader,
            client_writer,
            "app".to_string(),
            "rtmp://localhost/app".to_string(),
            "key".to_string(),
            callbacks,
            SessionConfig::default(),
        );
        let client_task = tokio::spawn(client.run());

        // The client works through connect/createStream/play and then
        // receives the cached headers.
        for _ in 0..400 {
            if !videos.lock().unwrap().is_empty() && !audios.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(videos.lock().unwrap()[0], (0, avc_header));
        assert_eq!(audios.lock().unwrap()[0], (0, aac_header));

        // A live frame reaches the callback.
        for _ in 0..400 {
            if broadcaster.subscriber_count("key").await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let live = Bytes::from_static(&[0x17, 0x01, 0xEE]);
        publisher
            .send_raw(CSID_VIDEO, 1, 120, MSG_VIDEO, live.clone())
            .await;
        for _ in 0..400 {
            if videos.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(videos.lock().unwrap()[1], (120, live));

        // Publisher disconnect ends the client session cleanly via
        // Play.Stop.
        drop(publisher);
        pub_task.await.unwrap().unwrap();
        client_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fcunpublish_frees_key_keeps_connection() {
        let broadcaster = Arc::new(Broadcaster::new("app"));
        let (peer_io, _task) = spawn_server_session(broadcaster.clone());
        let mut peer = RawPeer::connect(peer_io).await;
        peer.do_connect("app").await;
        peer.do_publish("live").await;

        peer.send_command(
            DEFAULT_STREAM_ID,
            CMD_FC_UNPUBLISH,
            5.0,
            crate::amf::Amf0Value::Null,
            vec![crate::amf::Amf0Value::String("live".to_string())],
        )
        .await;

        for _ in 0..400 {
            if !broadcaster.stream_exists("live").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!broadcaster.stream_exists("live").await);

        // The connection is still serving commands: publish again.
        peer.send_command(
            DEFAULT_STREAM_ID,
            CMD_PUBLISH,
            6.0,
            crate::amf::Amf0Value::Null,
            vec![
                crate::amf::Amf0Value::String("live".to_string()),
                crate::amf::Amf0Value::String("live".to_string()),
            ],
        )
        .await;
        let status = peer.next_command().await;
        assert_eq!(status.info().unwrap().get_str("code"), Some(NS_PUBLISH_START));
    }

    #[test]
    fn test_publishing_type_parse() {
        assert_eq!(PublishingType::parse("live"), PublishingType::Live);
        assert_eq!(PublishingType::parse("record"), PublishingType::Record);
        assert_eq!(PublishingType::parse("append"), PublishingType::Append);
        assert_eq!(PublishingType::parse("anything"), PublishingType::Live);
    }

    #[test]
    fn test_client_metadata_merge() {
        let mut meta = ClientMetadata::default();
        meta.apply(
            &Metadata::from_value(&amf_object! {
                "Duration" => 0.0,
                "fileSize" => 0.0,
                "width" => 1920.0,
                "HEIGHT" => 1080.0,
                "videocodecid" => 7.0,
                "audiocodecid" => "mp4a",
                "framerate" => 30.0,
                "stereo" => true,
                "5.1" => true,
                "encoder" => "obs",
            })
            .unwrap(),
        );

        assert_eq!(meta.width, Some(1920.0));
        assert_eq!(meta.height, Some(1080.0));
        assert_eq!(meta.video_codec_id_number, Some(7.0));
        assert_eq!(meta.audio_codec_id.as_deref(), Some("mp4a"));
        assert_eq!(meta.frame_rate, Some(30.0));
        assert!(meta.sound.stereo);
        assert!(meta.sound.five_point_one);
        assert!(!meta.sound.seven_point_one);
        assert_eq!(meta.encoder.as_deref(), Some("obs"));
    }
}
