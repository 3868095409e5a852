//! # Packet Framing
//!
//! The decoded unit crossing the transport boundary: a message type byte and
//! its payload. The surrounding transport is expected to have already removed
//! encryption and record framing; this codec only provides the length-prefixed
//! glue used when a multiplexer is wired directly to a byte stream (tests,
//! loopback pumps).
//!
//! ## Wire Format
//! ```text
//! [Length(4, BE)] [Type(1)] [Payload(N-1)]
//! ```
//!
//! ## Security
//! - Maximum payload size: 1MB (prevents memory exhaustion before allocation)
//! - Length validation happens before the payload is reserved

use crate::error::{MuxError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Max allowed packet payload crossing the boundary codec (1 MB)
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// A decoded `(message type, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message type identifier (see [`crate::protocol::message::MessageType`])
    pub msg_type: u8,
    /// Raw message payload, excluding the type byte
    pub payload: Bytes,
}

impl Packet {
    pub fn new(msg_type: u8, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }
}

/// Length-prefixed codec for framing packets over a byte stream.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len == 0 {
            return Err(MuxError::MalformedPayload(
                "zero-length packet frame".to_string(),
            ));
        }
        if len - 1 > MAX_PACKET_SIZE {
            return Err(MuxError::OversizedPacket(len - 1));
        }
        if src.len() < 4 + len {
            // Wait for the rest of the frame
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let msg_type = src[0];
        src.advance(1);
        let payload = src.split_to(len - 1).freeze();
        Ok(Some(Packet { msg_type, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = MuxError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        if packet.payload.len() > MAX_PACKET_SIZE {
            return Err(MuxError::OversizedPacket(packet.payload.len()));
        }
        dst.reserve(4 + 1 + packet.payload.len());
        dst.put_u32((packet.payload.len() + 1) as u32);
        dst.put_u8(packet.msg_type);
        dst.put_slice(&packet.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = PacketCodec;
        let packet = Packet::new(94, Bytes::from_static(b"\x00\x00\x00\x01hello"));

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_empty_payload() {
        let mut codec = PacketCodec;
        let packet = Packet::new(96, Bytes::new());

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 1, 96]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = PacketCodec;
        let packet = Packet::new(80, Bytes::from_static(b"payload"));

        let mut full = BytesMut::new();
        codec.encode(packet.clone(), &mut full).unwrap();

        let mut partial = full.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_codec_two_frames_in_one_buffer() {
        let mut codec = PacketCodec;
        let a = Packet::new(93, Bytes::from_static(b"aa"));
        let b = Packet::new(97, Bytes::from_static(b"bbbb"));

        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_oversized_rejected() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_PACKET_SIZE + 2) as u32);
        buf.put_u8(94);
        buf.put_slice(&[0u8; 16]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(MuxError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_codec_zero_length_rejected() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(0);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(MuxError::MalformedPayload(_))
        ));
    }
}
