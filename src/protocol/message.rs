//! # Message Types
//!
//! Numeric message identifiers and typed payload structs for every message
//! the multiplexing layer exchanges, with the fixed values the surrounding
//! protocol family assigns them.
//!
//! Payload layouts are big-endian throughout; variable-length fields use the
//! length-prefixed strings from [`crate::core::wire`].
//!
//! ## Message Groups
//! - **80–82**: connection-wide requests and their replies
//! - **90–92**: channel open negotiation
//! - **93–97**: per-channel flow control, data, and shutdown
//! - **98–100**: per-channel requests and their replies

use crate::core::wire::{WireReader, WireWriter};
use crate::error::Result;
use bytes::Bytes;

/// Extended-data type code for the error side-channel.
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Connection-wide request not tied to a channel
    GlobalRequest = 80,
    /// Positive reply to the oldest pending global request
    RequestSuccess = 81,
    /// Negative reply to the oldest pending global request
    RequestFailure = 82,
    /// Request to open a new channel
    ChannelOpen = 90,
    /// Channel open accepted
    ChannelOpenConfirmation = 91,
    /// Channel open rejected
    ChannelOpenFailure = 92,
    /// Grant of additional window bytes
    ChannelWindowAdjust = 93,
    /// Primary stream data
    ChannelData = 94,
    /// Typed secondary stream data
    ChannelExtendedData = 95,
    /// No more data will be sent on this channel
    ChannelEof = 96,
    /// Channel shutdown
    ChannelClose = 97,
    /// Per-channel request
    ChannelRequest = 98,
    /// Positive reply to the oldest pending channel request
    ChannelSuccess = 99,
    /// Negative reply to the oldest pending channel request
    ChannelFailure = 100,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            80 => Some(Self::GlobalRequest),
            81 => Some(Self::RequestSuccess),
            82 => Some(Self::RequestFailure),
            90 => Some(Self::ChannelOpen),
            91 => Some(Self::ChannelOpenConfirmation),
            92 => Some(Self::ChannelOpenFailure),
            93 => Some(Self::ChannelWindowAdjust),
            94 => Some(Self::ChannelData),
            95 => Some(Self::ChannelExtendedData),
            96 => Some(Self::ChannelEof),
            97 => Some(Self::ChannelClose),
            98 => Some(Self::ChannelRequest),
            99 => Some(Self::ChannelSuccess),
            100 => Some(Self::ChannelFailure),
            _ => None,
        }
    }
}

/// Reason a peer declined to open a requested channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpenFailureReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl OpenFailureReason {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpenFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AdministrativelyProhibited => "administratively prohibited",
            Self::ConnectFailed => "connect failed",
            Self::UnknownChannelType => "unknown channel type",
            Self::ResourceShortage => "resource shortage",
        };
        f.write_str(name)
    }
}

/// `CHANNEL_OPEN` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// Channel type string selecting the factory on the receiving side
    pub channel_type: String,
    /// The opener's local channel id
    pub sender_id: u32,
    /// Initial window the opener grants for data flowing toward it
    pub window_size: u32,
    /// Largest packet the opener will accept
    pub max_packet: u32,
    /// Type-specific extra bytes
    pub extra: Bytes,
}

impl ChannelOpen {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(16 + self.channel_type.len() + self.extra.len());
        w.put_string(self.channel_type.as_bytes())
            .put_u32(self.sender_id)
            .put_u32(self.window_size)
            .put_u32(self.max_packet)
            .put_raw(&self.extra);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            channel_type: r.take_utf8("channel type")?.to_string(),
            sender_id: r.take_u32("sender id")?,
            window_size: r.take_u32("window size")?,
            max_packet: r.take_u32("max packet")?,
            extra: Bytes::copy_from_slice(r.take_rest()),
        })
    }
}

/// `CHANNEL_OPEN_CONFIRMATION` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConfirmation {
    /// The opener's channel id (recipient of this message)
    pub recipient_id: u32,
    /// The confirmer's local channel id
    pub sender_id: u32,
    /// Initial window granted toward the confirmer
    pub window_size: u32,
    /// Largest packet the confirmer will accept
    pub max_packet: u32,
    /// Type-specific extra bytes
    pub extra: Bytes,
}

impl OpenConfirmation {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(16 + self.extra.len());
        w.put_u32(self.recipient_id)
            .put_u32(self.sender_id)
            .put_u32(self.window_size)
            .put_u32(self.max_packet)
            .put_raw(&self.extra);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            sender_id: r.take_u32("sender id")?,
            window_size: r.take_u32("window size")?,
            max_packet: r.take_u32("max packet")?,
            extra: Bytes::copy_from_slice(r.take_rest()),
        })
    }
}

/// `CHANNEL_OPEN_FAILURE` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFailure {
    /// The opener's channel id
    pub recipient_id: u32,
    /// Numeric reason code (see [`OpenFailureReason`])
    pub reason: u32,
    /// Human-readable description
    pub description: String,
    /// Language tag, customarily empty
    pub language: String,
}

impl OpenFailure {
    pub fn new(recipient_id: u32, reason: OpenFailureReason, description: &str) -> Self {
        Self {
            recipient_id,
            reason: reason.as_u32(),
            description: description.to_string(),
            language: String::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(16 + self.description.len());
        w.put_u32(self.recipient_id)
            .put_u32(self.reason)
            .put_string(self.description.as_bytes())
            .put_string(self.language.as_bytes());
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            reason: r.take_u32("reason code")?,
            description: r.take_utf8("description")?.to_string(),
            language: if r.is_empty() {
                String::new()
            } else {
                r.take_utf8("language")?.to_string()
            },
        })
    }
}

/// `CHANNEL_WINDOW_ADJUST` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdjust {
    pub recipient_id: u32,
    pub bytes_to_add: u32,
}

impl WindowAdjust {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(8);
        w.put_u32(self.recipient_id).put_u32(self.bytes_to_add);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            bytes_to_add: r.take_u32("window bytes")?,
        })
    }
}

/// `CHANNEL_DATA` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub recipient_id: u32,
    pub data: Bytes,
}

impl ChannelData {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(8 + self.data.len());
        w.put_u32(self.recipient_id).put_string(&self.data);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            data: Bytes::copy_from_slice(r.take_string("data")?),
        })
    }
}

/// `CHANNEL_EXTENDED_DATA` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    pub recipient_id: u32,
    /// Stream type code, e.g. [`EXTENDED_DATA_STDERR`]
    pub type_code: u32,
    pub data: Bytes,
}

impl ChannelExtendedData {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(12 + self.data.len());
        w.put_u32(self.recipient_id)
            .put_u32(self.type_code)
            .put_string(&self.data);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            type_code: r.take_u32("type code")?,
            data: Bytes::copy_from_slice(r.take_string("data")?),
        })
    }
}

/// `CHANNEL_REQUEST` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub recipient_id: u32,
    pub request_type: String,
    pub want_reply: bool,
    pub data: Bytes,
}

impl ChannelRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(9 + self.request_type.len() + self.data.len());
        w.put_u32(self.recipient_id)
            .put_string(self.request_type.as_bytes())
            .put_bool(self.want_reply)
            .put_raw(&self.data);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            recipient_id: r.take_u32("recipient id")?,
            request_type: r.take_utf8("request type")?.to_string(),
            want_reply: r.take_bool("want reply")?,
            data: Bytes::copy_from_slice(r.take_rest()),
        })
    }
}

/// `GLOBAL_REQUEST` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    pub request_type: String,
    pub want_reply: bool,
    pub data: Bytes,
}

impl GlobalRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(5 + self.request_type.len() + self.data.len());
        w.put_string(self.request_type.as_bytes())
            .put_bool(self.want_reply)
            .put_raw(&self.data);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            request_type: r.take_utf8("request type")?.to_string(),
            want_reply: r.take_bool("want reply")?,
            data: Bytes::copy_from_slice(r.take_rest()),
        })
    }
}

/// Encode the single-field payload shared by `CHANNEL_EOF`, `CHANNEL_CLOSE`,
/// `CHANNEL_SUCCESS` and `CHANNEL_FAILURE`.
pub fn encode_channel_id(recipient_id: u32) -> Bytes {
    let mut w = WireWriter::with_capacity(4);
    w.put_u32(recipient_id);
    w.into_bytes()
}

/// Decode the leading channel id of a channel-addressed payload, returning
/// the id and whatever follows it.
pub fn decode_channel_id<'a>(payload: &'a [u8], context: &'static str) -> Result<(u32, &'a [u8])> {
    let mut r = WireReader::new(payload);
    let id = r.take_u32(context)?;
    Ok((id, r.take_rest()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for value in 0u8..=255 {
            if let Some(ty) = MessageType::from_u8(value) {
                assert_eq!(ty.as_u8(), value);
            }
        }
        assert_eq!(MessageType::GlobalRequest.as_u8(), 80);
        assert_eq!(MessageType::ChannelFailure.as_u8(), 100);
        assert!(MessageType::from_u8(83).is_none());
        assert!(MessageType::from_u8(89).is_none());
    }

    #[test]
    fn test_reason_code_values() {
        assert_eq!(OpenFailureReason::AdministrativelyProhibited.as_u32(), 1);
        assert_eq!(OpenFailureReason::ConnectFailed.as_u32(), 2);
        assert_eq!(OpenFailureReason::UnknownChannelType.as_u32(), 3);
        assert_eq!(OpenFailureReason::ResourceShortage.as_u32(), 4);
        assert!(OpenFailureReason::from_u32(0).is_none());
        assert!(OpenFailureReason::from_u32(5).is_none());
    }

    #[test]
    fn test_channel_open_roundtrip() {
        let open = ChannelOpen {
            channel_type: "session".to_string(),
            sender_id: 3,
            window_size: 131072,
            max_packet: 32768,
            extra: Bytes::from_static(b"\x01\x02"),
        };
        let decoded = ChannelOpen::decode(&open.encode()).unwrap();
        assert_eq!(decoded, open);
    }

    #[test]
    fn test_open_confirmation_roundtrip() {
        let confirm = OpenConfirmation {
            recipient_id: 0,
            sender_id: 7,
            window_size: 65536,
            max_packet: 16384,
            extra: Bytes::new(),
        };
        let decoded = OpenConfirmation::decode(&confirm.encode()).unwrap();
        assert_eq!(decoded, confirm);
    }

    #[test]
    fn test_open_failure_roundtrip() {
        let failure = OpenFailure::new(2, OpenFailureReason::ConnectFailed, "no route");
        let decoded = OpenFailure::decode(&failure.encode()).unwrap();
        assert_eq!(decoded, failure);
        assert_eq!(
            OpenFailureReason::from_u32(decoded.reason),
            Some(OpenFailureReason::ConnectFailed)
        );
    }

    #[test]
    fn test_channel_data_roundtrip() {
        let data = ChannelData {
            recipient_id: 9,
            data: Bytes::from_static(b"stream bytes"),
        };
        let decoded = ChannelData::decode(&data.encode()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_extended_data_roundtrip() {
        let ext = ChannelExtendedData {
            recipient_id: 4,
            type_code: EXTENDED_DATA_STDERR,
            data: Bytes::from_static(b"oops"),
        };
        let decoded = ChannelExtendedData::decode(&ext.encode()).unwrap();
        assert_eq!(decoded, ext);
    }

    #[test]
    fn test_channel_request_roundtrip() {
        let req = ChannelRequest {
            recipient_id: 1,
            request_type: "pty-req".to_string(),
            want_reply: true,
            data: Bytes::from_static(b"xterm"),
        };
        let decoded = ChannelRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_global_request_roundtrip() {
        let req = GlobalRequest {
            request_type: "tcpip-forward".to_string(),
            want_reply: true,
            data: Bytes::from_static(b"\x00\x00\x00\x00"),
        };
        let decoded = GlobalRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_truncated_open_rejected() {
        let open = ChannelOpen {
            channel_type: "session".to_string(),
            sender_id: 0,
            window_size: 1,
            max_packet: 1,
            extra: Bytes::new(),
        };
        let encoded = open.encode();
        assert!(ChannelOpen::decode(&encoded[..encoded.len() - 2]).is_err());
    }
}
