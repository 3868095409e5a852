//! # Transport Boundary
//!
//! The seam between the multiplexer and the secure transport beneath it.
//!
//! The transport collaborator owns record framing, encryption, and the
//! authentication handshake; by the time bytes reach this crate they are
//! decoded `(message type, payload)` packets. This module defines the narrow
//! contract the multiplexer needs back from the transport, [`PacketSink`],
//! plus queue and byte-stream glue for wiring a [`Connection`] to real IO.
//!
//! [`Connection`]: crate::protocol::mux::Connection

use crate::core::packet::{Packet, PacketCodec};
use crate::error::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

/// Outbound half of the transport contract.
///
/// Implementations must be shareable: deferred request replies and forwarding
/// accept loops send from outside the dispatch context.
pub trait PacketSink: Send + Sync {
    /// Queue one packet for transmission to the peer.
    ///
    /// An error means the transport is gone; callers inside the flow-control
    /// path treat that as a tolerated no-op.
    fn send_packet(&self, msg_type: u8, payload: Bytes) -> Result<()>;
}

/// [`PacketSink`] backed by an unbounded queue.
///
/// The paired receiver is either drained by a test or fed to [`write_pump`].
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::UnboundedSender<Packet>,
}

impl PacketSink for QueueSink {
    fn send_packet(&self, msg_type: u8, payload: Bytes) -> Result<()> {
        self.tx
            .send(Packet::new(msg_type, payload))
            .map_err(|_| crate::error::MuxError::ConnectionClosed)
    }
}

/// Create a queue-backed sink and the receiver draining it.
pub fn queue_sink() -> (QueueSink, mpsc::UnboundedReceiver<Packet>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSink { tx }, rx)
}

/// Drain queued packets into a length-prefixed byte stream until the queue
/// closes or the stream rejects a write.
pub async fn write_pump<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Packet>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, PacketCodec);
    while let Some(packet) = rx.recv().await {
        framed.send(packet).await?;
    }
    framed.flush().await?;
    Ok(())
}

/// Read length-prefixed packets from a byte stream, handing each to the
/// caller until EOF or a framing error.
pub async fn read_loop<R, F>(reader: R, mut on_packet: F) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Packet) -> Result<()>,
{
    let mut framed = FramedRead::new(reader, PacketCodec);
    while let Some(packet) = framed.next().await {
        on_packet(packet?)?;
    }
    debug!("transport stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_sink_delivers_in_order() {
        let (sink, mut rx) = queue_sink();
        sink.send_packet(94, Bytes::from_static(b"a")).unwrap();
        sink.send_packet(96, Bytes::new()).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!((first.msg_type, &first.payload[..]), (94, &b"a"[..]));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.msg_type, 96);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_queue_sink_closed_receiver() {
        let (sink, rx) = queue_sink();
        drop(rx);
        assert!(sink.send_packet(94, Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn test_pump_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (sink, rx) = queue_sink();

        sink.send_packet(80, Bytes::from_static(b"request")).unwrap();
        sink.send_packet(97, Bytes::from_static(b"\x00\x00\x00\x05"))
            .unwrap();
        drop(sink);

        let writer = tokio::spawn(write_pump(client, rx));

        let mut seen = Vec::new();
        read_loop(server, |packet| {
            seen.push(packet);
            Ok(())
        })
        .await
        .unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].msg_type, 80);
        assert_eq!(&seen[0].payload[..], b"request");
        assert_eq!(seen[1].msg_type, 97);
    }
}
