//! RTMP message types
//!
//! Decoded chunk payloads are interpreted by message type id:
//! - Protocol control (types 1-6): chunk and flow control
//! - Audio/video (types 8, 9): media data, forwarded verbatim
//! - Data (types 18, 15): `@setDataFrame` / `onMetaData`
//! - Command (types 20, 17): AMF0-encoded commands
//!
//! The AMF3 variants (15, 17) carry a leading zero byte before ordinary
//! AMF0 data; decoding strips it, and this implementation always emits the
//! AMF0 forms.
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{self, Amf0Value, Metadata};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::Message;
use crate::protocol::constants::*;

/// A parsed RTMP message.
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1); 31-bit value, top bit reserved.
    SetChunkSize(u32),

    /// Abort (type 2); discards a partial message on a chunk stream.
    Abort { csid: u32 },

    /// Acknowledgement (type 3); bytes received since the last ack.
    Acknowledgement { sequence_number: u32 },

    /// User Control (type 4).
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5).
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6).
    SetPeerBandwidth { size: u32, limit_type: LimitType },

    /// Audio data (type 8); payload includes the tag byte.
    Audio { timestamp: u32, payload: Bytes },

    /// Video data (type 9); payload includes the tag byte.
    Video { timestamp: u32, payload: Bytes },

    /// AMF0 command (types 20/17).
    Command(Command),

    /// AMF0 data message (types 18/15).
    Data(DataMessage),

    /// Anything else; carried opaquely.
    Unknown { type_id: u8, payload: Bytes },
}

/// Peer bandwidth limit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitType {
    Hard,
    Soft,
    Dynamic,
    /// No Set Peer Bandwidth message seen yet.
    #[default]
    NotSet,
}

impl LimitType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LimitType::Hard,
            1 => LimitType::Soft,
            2 => LimitType::Dynamic,
            _ => LimitType::NotSet,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            LimitType::Hard => 0,
            LimitType::Soft => 1,
            LimitType::Dynamic => 2,
            LimitType::NotSet => 3,
        }
    }
}

/// User control event (message type 4).
#[derive(Debug, Clone)]
pub enum UserControlEvent {
    StreamBegin(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, payload: Bytes },
}

/// An AMF0 command: `[name, transaction_id, command_object, ...args]`.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object; null for most responses.
    pub command_object: Amf0Value,
    pub arguments: Vec<Amf0Value>,
    /// Message stream id the command arrived on.
    pub stream_id: u32,
}

/// An AMF0 data message: `[handler_name, ...values]`.
#[derive(Debug, Clone)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<Amf0Value>,
    pub stream_id: u32,
}

impl RtmpMessage {
    /// Interpret a reassembled chunk-layer message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let mut payload = message.payload.clone();

        match message.type_id {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("set chunk size").into());
                }
                // Top bit reserved.
                Ok(RtmpMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF))
            }

            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("abort").into());
                }
                Ok(RtmpMessage::Abort {
                    csid: payload.get_u32(),
                })
            }

            MSG_ACKNOWLEDGEMENT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("acknowledgement").into());
                }
                Ok(RtmpMessage::Acknowledgement {
                    sequence_number: payload.get_u32(),
                })
            }

            MSG_USER_CONTROL => parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("window ack size").into());
                }
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::TruncatedMessage("set peer bandwidth").into());
                }
                let size = payload.get_u32();
                let limit_type = LimitType::from_u8(payload.get_u8());
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: message.timestamp,
                payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: message.timestamp,
                payload,
            }),

            MSG_COMMAND_AMF0 => Ok(RtmpMessage::Command(parse_command(
                payload,
                message.stream_id,
            )?)),

            MSG_COMMAND_AMF3 => {
                if !payload.is_empty() && payload[0] == 0x00 {
                    payload.advance(1);
                }
                Ok(RtmpMessage::Command(parse_command(
                    payload,
                    message.stream_id,
                )?))
            }

            MSG_DATA_AMF0 => Ok(RtmpMessage::Data(parse_data(payload, message.stream_id)?)),

            MSG_DATA_AMF3 => {
                if !payload.is_empty() && payload[0] == 0x00 {
                    payload.advance(1);
                }
                Ok(RtmpMessage::Data(parse_data(payload, message.stream_id)?))
            }

            type_id => Ok(RtmpMessage::Unknown { type_id, payload }),
        }
    }

    /// Encode to `(message_type_id, payload)` for the chunk layer.
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, encode_u32(*size)),
            RtmpMessage::Abort { csid } => (MSG_ABORT, encode_u32(*csid)),
            RtmpMessage::Acknowledgement { sequence_number } => {
                (MSG_ACKNOWLEDGEMENT, encode_u32(*sequence_number))
            }
            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, encode_u32(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(limit_type.as_u8());
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::UserControl(event) => {
                let mut buf = BytesMut::with_capacity(10);
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::SetBufferLength {
                        stream_id,
                        buffer_ms,
                    } => {
                        buf.put_u16(UC_SET_BUFFER_LENGTH);
                        buf.put_u32(*stream_id);
                        buf.put_u32(*buffer_ms);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown {
                        event_type,
                        payload,
                    } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(payload);
                    }
                }
                (MSG_USER_CONTROL, buf.freeze())
            }
            RtmpMessage::Audio { payload, .. } => (MSG_AUDIO, payload.clone()),
            RtmpMessage::Video { payload, .. } => (MSG_VIDEO, payload.clone()),
            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, cmd.to_amf0()),
            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.to_amf0()),
            RtmpMessage::Unknown { type_id, payload } => (*type_id, payload.clone()),
        }
    }
}

fn encode_u32(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(value);
    buf.freeze()
}

fn parse_user_control(payload: &mut Bytes) -> Result<RtmpMessage> {
    if payload.len() < 2 {
        return Err(ProtocolError::TruncatedMessage("user control").into());
    }

    let event_type = payload.get_u16();
    let event = match event_type {
        UC_STREAM_BEGIN => {
            if payload.len() < 4 {
                return Err(ProtocolError::TruncatedMessage("stream begin").into());
            }
            UserControlEvent::StreamBegin(payload.get_u32())
        }
        UC_SET_BUFFER_LENGTH => {
            if payload.len() < 8 {
                return Err(ProtocolError::TruncatedMessage("set buffer length").into());
            }
            UserControlEvent::SetBufferLength {
                stream_id: payload.get_u32(),
                buffer_ms: payload.get_u32(),
            }
        }
        UC_PING_REQUEST => {
            if payload.len() < 4 {
                return Err(ProtocolError::TruncatedMessage("ping request").into());
            }
            UserControlEvent::PingRequest(payload.get_u32())
        }
        UC_PING_RESPONSE => {
            if payload.len() < 4 {
                return Err(ProtocolError::TruncatedMessage("ping response").into());
            }
            UserControlEvent::PingResponse(payload.get_u32())
        }
        _ => UserControlEvent::Unknown {
            event_type,
            payload: payload.clone(),
        },
    };

    Ok(RtmpMessage::UserControl(event))
}

fn parse_command(mut payload: Bytes, stream_id: u32) -> Result<Command> {
    let name = match amf::decode_next(&mut payload)? {
        Amf0Value::String(s) => s,
        other => {
            return Err(
                ProtocolError::InvalidCommand(format!("expected command name, got {other:?}"))
                    .into(),
            )
        }
    };

    let transaction_id = match amf::decode_next(&mut payload)? {
        Amf0Value::Number(n) => n,
        other => {
            return Err(
                ProtocolError::InvalidCommand(format!("expected transaction id, got {other:?}"))
                    .into(),
            )
        }
    };

    let command_object = if payload.has_remaining() {
        amf::decode_next(&mut payload)?
    } else {
        Amf0Value::Null
    };

    let mut arguments = Vec::new();
    while payload.has_remaining() {
        match amf::decode_next(&mut payload) {
            Ok(v) => arguments.push(v),
            Err(AmfError::UnexpectedEof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Command {
        name,
        transaction_id,
        command_object,
        arguments,
        stream_id,
    })
}

fn parse_data(mut payload: Bytes, stream_id: u32) -> Result<DataMessage> {
    let name = match amf::decode_next(&mut payload)? {
        Amf0Value::String(s) => s,
        other => {
            return Err(
                ProtocolError::InvalidCommand(format!("expected data handler name, got {other:?}"))
                    .into(),
            )
        }
    };

    let mut values = Vec::new();
    while payload.has_remaining() {
        match amf::decode_next(&mut payload) {
            Ok(v) => values.push(v),
            Err(AmfError::UnexpectedEof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(DataMessage {
        name,
        values,
        stream_id,
    })
}

impl Command {
    /// Encode as AMF0: name, transaction id, command object, arguments.
    pub fn to_amf0(&self) -> Bytes {
        let mut encoder = amf::Amf0Encoder::new();
        encoder.encode(&Amf0Value::String(self.name.clone()));
        encoder.encode(&Amf0Value::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }

    /// Build a `_result` response.
    pub fn result(transaction_id: f64, properties: Amf0Value, info: Amf0Value) -> Self {
        Command {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// Build an `onStatus` notification.
    ///
    /// The transaction id of the triggering request is echoed; the spec
    /// nominally wants 0 here but real publishers expect the echo.
    pub fn on_status(transaction_id: f64, level: &str, code: &str, description: &str) -> Self {
        let info = crate::amf_object! {
            "level" => level,
            "code" => code,
            "description" => description,
        };
        Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// The info object of a `_result`/`_error`/`onStatus`, if present.
    pub fn info(&self) -> Option<Metadata> {
        self.arguments.iter().find_map(Metadata::from_value)
    }

    /// First string argument (stream key for publish/play/FCPublish).
    pub fn stream_key_argument(&self) -> Option<&str> {
        self.arguments.iter().find_map(|v| v.as_str())
    }
}

impl DataMessage {
    /// Encode as AMF0: handler name then values.
    pub fn to_amf0(&self) -> Bytes {
        let mut encoder = amf::Amf0Encoder::new();
        encoder.encode(&Amf0Value::String(self.name.clone()));
        encoder.encode_all(&self.values);
        encoder.finish()
    }

    /// The metadata object carried by `@setDataFrame`/`onMetaData`.
    ///
    /// `@setDataFrame` wraps the real handler name, so the object is the
    /// value after any leading strings.
    pub fn metadata(&self) -> Option<Metadata> {
        self.values.iter().find_map(Metadata::from_value)
    }
}
