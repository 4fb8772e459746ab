//! Message manager
//!
//! Owns the buffered socket halves and the chunk codec for one connection,
//! and sits between the session and the wire:
//!
//! - drives the handshake for either role;
//! - reads chunks, reassembles messages, and applies protocol-control
//!   messages (Set Chunk Size, Abort, Acknowledgement, Window Ack Size,
//!   Set Peer Bandwidth) to chunk-layer state without surfacing them;
//! - tracks the acknowledgement window over received bytes;
//! - formats and sends every outbound message, applying the framing rules
//!   (protocol/user control on csid 2 msid 0, commands on csid 3, audio on
//!   csid 4, video and data on csid 5).

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::amf::Metadata;
use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, Message};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::{Command, DataMessage, LimitType, RtmpMessage, UserControlEvent};

/// Per-connection protocol driver; see the module docs.
pub struct MessageManager<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,

    /// Peer's declared ack window; 0 until a Window Ack Size arrives.
    window_ack_size: u32,
    /// Bytes read since the last Acknowledgement we sent.
    bytes_received: u32,
    /// Whether any Acknowledgement has been sent this session.
    ack_sent: bool,

    /// Peer bandwidth advertised by Set Peer Bandwidth; informational.
    out_bandwidth: u32,
    limit_type: LimitType,
}

impl<R, W> MessageManager<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, reader),
            writer: BufWriter::with_capacity(buffer_size, writer),
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            window_ack_size: 0,
            bytes_received: 0,
            ack_sent: false,
            out_bandwidth: 0,
            limit_type: LimitType::NotSet,
        }
    }

    /// Run the server side of the handshake.
    pub async fn handshake_server(&mut self) -> Result<()> {
        self.run_handshake(HandshakeRole::Server).await
    }

    /// Run the client side of the handshake.
    pub async fn handshake_client(&mut self) -> Result<()> {
        self.run_handshake(HandshakeRole::Client).await
    }

    async fn run_handshake(&mut self, role: HandshakeRole) -> Result<()> {
        let mut handshake = Handshake::new(role);

        if let Some(bytes) = handshake.initial_bytes() {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await?;
        }

        while !handshake.is_done() {
            let before = self.read_buf.len();
            if let Some(response) = handshake.process(&mut self.read_buf)? {
                self.writer.write_all(&response).await?;
                self.writer.flush().await?;
            }
            if handshake.is_done() {
                break;
            }
            if self.read_buf.len() == before {
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
            }
        }

        // Bytes that arrived after the handshake (a pipelined connect,
        // usually) stay in read_buf for the chunk decoder.
        Ok(())
    }

    /// Read until a message the session cares about is available.
    ///
    /// Protocol-control messages are applied here and not surfaced.
    pub async fn next_message(&mut self) -> Result<RtmpMessage> {
        loop {
            while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                if let Some(message) = self.interpret(raw).await? {
                    return Ok(message);
                }
            }

            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.account_received(n as u32).await?;
        }
    }

    /// Apply protocol control; return messages meant for the session.
    async fn interpret(&mut self, raw: Message) -> Result<Option<RtmpMessage>> {
        let message = RtmpMessage::from_message(&raw)?;
        match message {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size, "peer set chunk size");
                self.decoder.set_chunk_size(size);
                Ok(None)
            }
            RtmpMessage::Abort { csid } => {
                self.decoder.abort(csid);
                Ok(None)
            }
            RtmpMessage::Acknowledgement { sequence_number } => {
                tracing::trace!(sequence_number, "peer acknowledged");
                Ok(None)
            }
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size, "peer set window ack size");
                // If no ack has ever been sent, issue one now.
                if !self.ack_sent {
                    self.send_acknowledgement().await?;
                }
                self.window_ack_size = size;
                Ok(None)
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                self.out_bandwidth = size;
                self.limit_type = limit_type;
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    /// Count received bytes against the ack window.
    async fn account_received(&mut self, n: u32) -> Result<()> {
        self.bytes_received = self.bytes_received.wrapping_add(n);
        if self.window_ack_size > 0 && self.bytes_received >= self.window_ack_size {
            self.send_acknowledgement().await?;
        }
        Ok(())
    }

    /// Send a message as chunks and flush.
    pub async fn send(
        &mut self,
        csid: u32,
        stream_id: u32,
        timestamp: u32,
        message: &RtmpMessage,
    ) -> Result<()> {
        let (type_id, payload) = message.encode();
        let chunk_message = Message::new(csid, stream_id, timestamp, type_id, payload);

        self.write_buf.clear();
        self.encoder.encode(&chunk_message, &mut self.write_buf);
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    // === Protocol control (csid 2, msid 0) ===

    pub async fn send_window_ack_size(&mut self, size: u32) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::WindowAckSize(size),
        )
        .await
    }

    pub async fn send_set_peer_bandwidth(&mut self, size: u32, limit_type: LimitType) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::SetPeerBandwidth { size, limit_type },
        )
        .await
    }

    /// Announce a new outgoing chunk size and switch the encoder to it.
    pub async fn send_set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::SetChunkSize(size),
        )
        .await?;
        self.encoder.set_chunk_size(size);
        Ok(())
    }

    async fn send_acknowledgement(&mut self) -> Result<()> {
        let sequence_number = self.bytes_received;
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::Acknowledgement { sequence_number },
        )
        .await?;
        self.bytes_received = 0;
        self.ack_sent = true;
        Ok(())
    }

    pub async fn send_stream_begin(&mut self, stream_id: u32) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::UserControl(UserControlEvent::StreamBegin(stream_id)),
        )
        .await
    }

    pub async fn send_ping_response(&mut self, timestamp: u32) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::UserControl(UserControlEvent::PingResponse(timestamp)),
        )
        .await
    }

    // === Commands (csid 3) ===

    pub async fn send_command(&mut self, stream_id: u32, command: Command) -> Result<()> {
        self.send(CSID_COMMAND, stream_id, 0, &RtmpMessage::Command(command))
            .await
    }

    /// The `_result` for a successful connect.
    pub async fn send_connect_success(&mut self, transaction_id: f64) -> Result<()> {
        let properties = crate::amf_object! {
            "fmsVer" => FMS_VERSION,
            "capabilities" => SERVER_CAPABILITIES,
            "mode" => SERVER_MODE,
        };
        let info = crate::amf_object! {
            "level" => LEVEL_STATUS,
            "code" => NC_CONNECT_SUCCESS,
            "description" => "Connection succeeded.",
            "objectEncoding" => 0.0,
        };
        self.send_command(
            DEFAULT_PUBLISH_STREAM,
            Command::result(transaction_id, properties, info),
        )
        .await
    }

    /// The `_result` for createStream, carrying the new stream id.
    pub async fn send_create_stream_response(
        &mut self,
        transaction_id: f64,
        stream_id: u32,
    ) -> Result<()> {
        self.send_command(
            DEFAULT_PUBLISH_STREAM,
            Command::result(
                transaction_id,
                crate::amf::Amf0Value::Null,
                crate::amf::Amf0Value::Number(stream_id as f64),
            ),
        )
        .await
    }

    pub async fn send_on_fc_publish(&mut self, stream_key: &str) -> Result<()> {
        let info = crate::amf_object! {
            "level" => LEVEL_STATUS,
            "code" => NS_PUBLISH_START,
            "description" => stream_key,
        };
        self.send_command(
            DEFAULT_PUBLISH_STREAM,
            Command {
                name: CMD_ON_FC_PUBLISH.to_string(),
                transaction_id: 0.0,
                command_object: crate::amf::Amf0Value::Null,
                arguments: vec![info],
                stream_id: 0,
            },
        )
        .await
    }

    /// An `onStatus` notification with the standard info object.
    pub async fn send_status(
        &mut self,
        transaction_id: f64,
        stream_id: u32,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<()> {
        self.send_command(
            stream_id,
            Command::on_status(transaction_id, level, code, description),
        )
        .await
    }

    // === Client requests ===

    pub async fn request_connect(&mut self, app: &str, tc_url: &str) -> Result<()> {
        let info = crate::amf_object! {
            "app" => app,
            "flashVer" => CLIENT_FLASH_VER,
            "tcUrl" => tc_url,
            "fpad" => false,
            "capabilities" => CLIENT_CAPABILITIES,
            "audioCodecs" => CLIENT_AUDIO_CODECS,
            "videoCodecs" => CLIENT_VIDEO_CODECS,
            "videoFunction" => CLIENT_VIDEO_FUNCTION,
        };
        self.send_command(
            DEFAULT_PUBLISH_STREAM,
            Command {
                name: CMD_CONNECT.to_string(),
                transaction_id: 1.0,
                command_object: info,
                arguments: vec![],
                stream_id: 0,
            },
        )
        .await
    }

    pub async fn request_create_stream(&mut self, transaction_id: f64) -> Result<()> {
        self.send_command(
            DEFAULT_PUBLISH_STREAM,
            Command {
                name: CMD_CREATE_STREAM.to_string(),
                transaction_id,
                command_object: crate::amf::Amf0Value::Null,
                arguments: vec![],
                stream_id: 0,
            },
        )
        .await
    }

    pub async fn request_play(&mut self, stream_key: &str, stream_id: u32) -> Result<()> {
        self.send(
            CSID_PROTOCOL_CONTROL,
            DEFAULT_PUBLISH_STREAM,
            0,
            &RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms: 1000,
            }),
        )
        .await?;

        self.send_command(
            stream_id,
            Command {
                name: CMD_PLAY.to_string(),
                transaction_id: 0.0,
                command_object: crate::amf::Amf0Value::Null,
                arguments: vec![
                    crate::amf::Amf0Value::String(stream_key.to_string()),
                    // Live or recorded, play until the end, reset.
                    crate::amf::Amf0Value::Number(-2.0),
                    crate::amf::Amf0Value::Number(-1.0),
                    crate::amf::Amf0Value::Boolean(true),
                ],
                stream_id,
            },
        )
        .await
    }

    // === Media (csid 4/5) ===

    pub async fn send_audio(
        &mut self,
        payload: Bytes,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<()> {
        self.send(
            CSID_AUDIO,
            stream_id,
            timestamp,
            &RtmpMessage::Audio { timestamp, payload },
        )
        .await
    }

    pub async fn send_video(
        &mut self,
        payload: Bytes,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<()> {
        self.send(
            CSID_VIDEO,
            stream_id,
            timestamp,
            &RtmpMessage::Video { timestamp, payload },
        )
        .await
    }

    /// Forward stream metadata as an `onMetaData` data message.
    pub async fn send_metadata(&mut self, metadata: Metadata, stream_id: u32) -> Result<()> {
        let data = DataMessage {
            name: CMD_ON_METADATA.to_string(),
            values: vec![metadata.into_value()],
            stream_id,
        };
        self.send(CSID_VIDEO, stream_id, 0, &RtmpMessage::Data(data))
            .await
    }

    // === State accessors ===

    pub fn window_ack_size(&self) -> u32 {
        self.window_ack_size
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    pub fn ack_sent(&self) -> bool {
        self.ack_sent
    }

    pub fn out_bandwidth(&self) -> (u32, LimitType) {
        (self.out_bandwidth, self.limit_type)
    }
}
