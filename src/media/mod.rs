//! Media tag parsing
//!
//! RTMP audio/video payloads start with an FLV-style tag byte describing
//! the frame; the relay parses it to classify frames (and to spot AAC/AVC
//! sequence headers worth caching) but always forwards the payload
//! verbatim, tag byte included.

use bytes::Bytes;

/// Audio codec, from the high nibble of the audio tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcm,
    Adpcm,
    Mp3,
    PcmLe,
    Nellymoser16k,
    Nellymoser8k,
    Nellymoser,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    Mp3_8k,
    DeviceSpecific,
    Unknown(u8),
}

impl AudioFormat {
    pub fn from_tag(byte: u8) -> Self {
        match byte >> 4 {
            0 => AudioFormat::LinearPcm,
            1 => AudioFormat::Adpcm,
            2 => AudioFormat::Mp3,
            3 => AudioFormat::PcmLe,
            4 => AudioFormat::Nellymoser16k,
            5 => AudioFormat::Nellymoser8k,
            6 => AudioFormat::Nellymoser,
            7 => AudioFormat::G711ALaw,
            8 => AudioFormat::G711MuLaw,
            10 => AudioFormat::Aac,
            11 => AudioFormat::Speex,
            14 => AudioFormat::Mp3_8k,
            15 => AudioFormat::DeviceSpecific,
            other => AudioFormat::Unknown(other),
        }
    }
}

/// Audio sample rate, bits 2-3 of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Rate5_5kHz,
    Rate11kHz,
    Rate22kHz,
    Rate44kHz,
}

/// Audio sample size, bit 1 of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSize {
    Bits8,
    Bits16,
}

/// Channel layout, bit 0 of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    Mono,
    Stereo,
}

/// AAC packet type, payload byte 1 when the format is AAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// AudioSpecificConfig; cached for late-joining players.
    SequenceHeader,
    Raw,
    Unknown(u8),
}

impl AacPacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AacPacketType::SequenceHeader,
            1 => AacPacketType::Raw,
            other => AacPacketType::Unknown(other),
        }
    }
}

/// Parsed audio tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTag {
    pub format: AudioFormat,
    pub sample_rate: SampleRate,
    pub sample_size: SampleSize,
    pub channels: Channels,
}

impl AudioTag {
    /// Parse the first payload byte. Empty payloads have no tag.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let byte = *payload.first()?;
        Some(Self {
            format: AudioFormat::from_tag(byte),
            sample_rate: match (byte >> 2) & 0x03 {
                0 => SampleRate::Rate5_5kHz,
                1 => SampleRate::Rate11kHz,
                2 => SampleRate::Rate22kHz,
                _ => SampleRate::Rate44kHz,
            },
            sample_size: if byte & 0x02 != 0 {
                SampleSize::Bits16
            } else {
                SampleSize::Bits8
            },
            channels: if byte & 0x01 != 0 {
                Channels::Stereo
            } else {
                Channels::Mono
            },
        })
    }
}

/// Video frame type, high nibble of the video tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    KeyFrame,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyFrame,
    CommandFrame,
    Unknown(u8),
}

impl FrameType {
    pub fn from_tag(byte: u8) -> Self {
        match byte >> 4 {
            1 => FrameType::KeyFrame,
            2 => FrameType::InterFrame,
            3 => FrameType::DisposableInterFrame,
            4 => FrameType::GeneratedKeyFrame,
            5 => FrameType::CommandFrame,
            other => FrameType::Unknown(other),
        }
    }
}

/// Video codec, low nibble of the video tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H263,
    ScreenVideo,
    Vp6,
    Vp6Alpha,
    ScreenVideo2,
    H264,
    Unknown(u8),
}

impl VideoCodec {
    pub fn from_tag(byte: u8) -> Self {
        match byte & 0x0F {
            2 => VideoCodec::H263,
            3 => VideoCodec::ScreenVideo,
            4 => VideoCodec::Vp6,
            5 => VideoCodec::Vp6Alpha,
            6 => VideoCodec::ScreenVideo2,
            7 => VideoCodec::H264,
            other => VideoCodec::Unknown(other),
        }
    }
}

/// AVC packet type, payload byte 1 when the codec is H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// AVCDecoderConfigurationRecord; cached for late-joining players.
    SequenceHeader,
    Nalu,
    EndOfSequence,
    Unknown(u8),
}

impl AvcPacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AvcPacketType::SequenceHeader,
            1 => AvcPacketType::Nalu,
            2 => AvcPacketType::EndOfSequence,
            other => AvcPacketType::Unknown(other),
        }
    }
}

/// Parsed video tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTag {
    pub frame_type: FrameType,
    pub codec: VideoCodec,
}

impl VideoTag {
    /// Parse the first payload byte. Empty payloads have no tag.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let byte = *payload.first()?;
        Some(Self {
            frame_type: FrameType::from_tag(byte),
            codec: VideoCodec::from_tag(byte),
        })
    }
}

/// True for an AAC decoder-configuration frame.
pub fn is_aac_sequence_header(payload: &Bytes) -> bool {
    payload.len() >= 2
        && AudioFormat::from_tag(payload[0]) == AudioFormat::Aac
        && AacPacketType::from_u8(payload[1]) == AacPacketType::SequenceHeader
}

/// True for an AVC decoder-configuration frame.
pub fn is_avc_sequence_header(payload: &Bytes) -> bool {
    payload.len() >= 2
        && VideoCodec::from_tag(payload[0]) == VideoCodec::H264
        && AvcPacketType::from_u8(payload[1]) == AvcPacketType::SequenceHeader
}
