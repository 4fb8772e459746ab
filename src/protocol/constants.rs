//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012).

/// RTMP version number (always 3 for plain RTMP).
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port.
pub const RTMP_PORT: u16 = 1935;

/// C1/S1/C2/S2 handshake packet size.
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both peers start with, until a Set Chunk Size arrives.
pub const INITIAL_CHUNK_SIZE: u32 = 128;

/// Chunk size this implementation negotiates after connect.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Maximum chunk size a peer may set (31-bit field).
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Ceiling on a single reassembled message.
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamps at or above this value use the extended timestamp field.
pub const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Default window acknowledgement size offered to clients.
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Per-direction socket buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Bound on a subscriber's frame queue before it is dropped as too slow.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 128;

// ============================================================================
// Chunk stream IDs. Only csid 2 is reserved by the spec (protocol control);
// the rest keep each kind of traffic on its own chunk stream.
// ============================================================================

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_VIDEO: u32 = 5;

/// Lowest valid chunk stream id (0 and 1 are basic-header escapes).
pub const MIN_CHUNK_STREAM_ID: u32 = 2;

/// Highest encodable chunk stream id (3-byte basic header).
pub const MAX_CHUNK_STREAM_ID: u32 = 65599;

// ============================================================================
// Message stream IDs
// ============================================================================

/// Stream id used for control traffic before publish/play.
pub const DEFAULT_PUBLISH_STREAM: u32 = 0;

/// Stream id handed out by createStream.
pub const DEFAULT_STREAM_ID: u32 = 1;

// ============================================================================
// Message type IDs
// ============================================================================

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// ============================================================================
// User control event types
// ============================================================================

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// ============================================================================
// Command names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_ON_FC_PUBLISH: &str = "onFCPublish";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";

// Data message handlers
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";

// ============================================================================
// Status codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PLAY_STREAM_NOT_FOUND: &str = "NetStream.Play.StreamNotFound";

pub const LEVEL_STATUS: &str = "status";
pub const LEVEL_ERROR: &str = "error";
pub const LEVEL_WARNING: &str = "warning";

// ============================================================================
// Server identity reported in the connect _result
// ============================================================================

pub const FMS_VERSION: &str = "FMS/3,5,7,7009";
pub const SERVER_CAPABILITIES: f64 = 31.0;
pub const SERVER_MODE: f64 = 1.0;

// ============================================================================
// Client identity sent in the connect request
// ============================================================================

pub const CLIENT_FLASH_VER: &str = "LNX 9,0,124,2";
pub const CLIENT_CAPABILITIES: f64 = 15.0;
pub const CLIENT_AUDIO_CODECS: f64 = 4071.0;
pub const CLIENT_VIDEO_CODECS: f64 = 252.0;
pub const CLIENT_VIDEO_FUNCTION: f64 = 1.0;
