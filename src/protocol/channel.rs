//! # Channel
//!
//! One logical bidirectional stream multiplexed over the connection, owning
//! the flow-control state for both directions.
//!
//! Writes that exceed the window the peer has granted are buffered and
//! flushed when the next `CHANNEL_WINDOW_ADJUST` arrives; the owning handler
//! is told to pause and resume through edge-triggered hints. A close
//! requested while data is still buffered is deferred until the buffers
//! drain, so no queued bytes are lost to a local shutdown.
//!
//! Stream-specific behavior (sessions, forwarded connections) plugs in
//! through [`ChannelHandler`], whose hooks all default to no-ops.

use crate::config::ChannelConfig;
use crate::protocol::message::{ChannelData, ChannelExtendedData, MessageType, WindowAdjust};
use crate::protocol::mux::ChannelCtx;
use crate::transport::PacketSink;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Edge-triggered backpressure hint delivered to the channel's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// The remote window is exhausted; further writes will buffer.
    Paused,
    /// The remote window has room again.
    Resumed,
}

/// Result of handling an inbound channel request.
pub enum RequestOutcome {
    /// Request handled successfully.
    Success,
    /// Request failed or is unsupported.
    Failure,
    /// The reply is deferred; resolving the sender side with `true` reports
    /// success, `false` (or dropping it) reports failure.
    Pending(oneshot::Receiver<bool>),
}

impl From<bool> for RequestOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Stream-specific hooks invoked by the multiplexer.
///
/// Every hook defaults to doing nothing, except [`close_received`], which
/// answers a remote close by closing this side, and [`request_received`],
/// which fails unhandled request types.
///
/// [`close_received`]: ChannelHandler::close_received
/// [`request_received`]: ChannelHandler::request_received
pub trait ChannelHandler: Send {
    /// The channel is open; `specific_data` is whatever the peer attached.
    fn channel_open(&mut self, _ctx: &mut ChannelCtx<'_>, _specific_data: &[u8]) {}

    /// The peer refused to open the channel. The channel is already removed.
    fn open_failed(&mut self, reason: u32, description: &str) {
        debug!(reason, description, "peer refused channel open");
    }

    /// Primary stream data arrived.
    fn data_received(&mut self, _ctx: &mut ChannelCtx<'_>, _data: &[u8]) {}

    /// Typed secondary stream data arrived (usually the error side-channel).
    fn ext_data_received(&mut self, _ctx: &mut ChannelCtx<'_>, _type_code: u32, _data: &[u8]) {}

    /// The peer will send no more data.
    fn eof_received(&mut self, _ctx: &mut ChannelCtx<'_>) {}

    /// The peer closed the channel.
    fn close_received(&mut self, ctx: &mut ChannelCtx<'_>) {
        ctx.lose_connection();
    }

    /// Both sides have closed; the channel is being removed.
    fn closed(&mut self) {}

    /// A request arrived for this channel.
    fn request_received(
        &mut self,
        _ctx: &mut ChannelCtx<'_>,
        request_type: &str,
        _data: &[u8],
    ) -> RequestOutcome {
        debug!(request_type, "unhandled channel request");
        RequestOutcome::Failure
    }

    /// The remote window filled; writes are buffering.
    fn stop_writing(&mut self) {}

    /// The remote window has room again.
    fn start_writing(&mut self) {}
}

/// Flow-control state for one multiplexed stream.
pub struct Channel {
    local_id: Option<u32>,
    remote_id: Option<u32>,
    local_window_size: u32,
    local_window_left: u32,
    local_max_packet: u32,
    remote_window_left: u32,
    remote_max_packet: u32,
    are_writing: bool,
    closing: bool,
    local_closed: bool,
    remote_closed: bool,
    write_buf: BytesMut,
    ext_buf: VecDeque<(u32, BytesMut)>,
    sink: Option<Arc<dyn PacketSink>>,
}

impl Channel {
    /// Create a channel advertising the configured receive window.
    ///
    /// The remote window and max packet stay 0 until the open completes.
    pub fn new(config: &ChannelConfig) -> Self {
        Self::with_windows(config.window_size, config.max_packet)
    }

    /// Create a channel with an explicit receive window and max packet.
    pub fn with_windows(window_size: u32, max_packet: u32) -> Self {
        Self {
            local_id: None,
            remote_id: None,
            local_window_size: window_size,
            local_window_left: window_size,
            local_max_packet: max_packet,
            remote_window_left: 0,
            remote_max_packet: 0,
            are_writing: true,
            closing: false,
            local_closed: false,
            remote_closed: false,
            write_buf: BytesMut::new(),
            ext_buf: VecDeque::new(),
            sink: None,
        }
    }

    // ---- accessors ----

    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    pub fn remote_id(&self) -> Option<u32> {
        self.remote_id
    }

    pub fn local_window_size(&self) -> u32 {
        self.local_window_size
    }

    pub fn local_window_left(&self) -> u32 {
        self.local_window_left
    }

    pub fn local_max_packet(&self) -> u32 {
        self.local_max_packet
    }

    pub fn remote_window_left(&self) -> u32 {
        self.remote_window_left
    }

    pub fn remote_max_packet(&self) -> u32 {
        self.remote_max_packet
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_local_closed(&self) -> bool {
        self.local_closed
    }

    pub fn is_remote_closed(&self) -> bool {
        self.remote_closed
    }

    /// Bytes waiting for the peer to grant more window.
    pub fn buffered_bytes(&self) -> usize {
        self.write_buf.len() + self.ext_buf.iter().map(|(_, b)| b.len()).sum::<usize>()
    }

    // ---- wiring (multiplexer side) ----

    pub(crate) fn attach(&mut self, local_id: u32, sink: Arc<dyn PacketSink>) {
        self.local_id = Some(local_id);
        self.sink = Some(sink);
    }

    pub(crate) fn set_remote(&mut self, remote_id: u32, window_size: u32, max_packet: u32) {
        self.remote_id = Some(remote_id);
        self.remote_window_left = window_size;
        self.remote_max_packet = max_packet;
    }

    pub(crate) fn mark_remote_closed(&mut self) {
        self.remote_closed = true;
    }

    // ---- inbound window accounting (multiplexer side) ----

    /// Clip inbound data to the window this side actually granted.
    pub(crate) fn clip_inbound<'d>(&self, data: &'d [u8]) -> &'d [u8] {
        let left = self.local_window_left as usize;
        if data.len() > left {
            &data[..left]
        } else {
            data
        }
    }

    pub(crate) fn consume_local_window(&mut self, len: u32) {
        self.local_window_left = self.local_window_left.saturating_sub(len);
    }

    /// Grant needed to restore the nominal window once consumption crosses
    /// the halfway hysteresis threshold.
    pub(crate) fn local_refill(&self) -> Option<u32> {
        if self.local_window_left < self.local_window_size / 2 {
            Some(self.local_window_size - self.local_window_left)
        } else {
            None
        }
    }

    pub(crate) fn grant_local_window(&mut self, bytes: u32) {
        self.local_window_left = self.local_window_left.saturating_add(bytes);
    }

    /// Tell the peer this side will accept `bytes` more, and account for the
    /// grant locally. A no-op when the remote mapping is already gone.
    pub(crate) fn send_window_adjust(&mut self, bytes: u32) {
        if let Some(remote_id) = self.remote_id {
            self.send(
                MessageType::ChannelWindowAdjust,
                WindowAdjust {
                    recipient_id: remote_id,
                    bytes_to_add: bytes,
                }
                .encode(),
            );
            self.grant_local_window(bytes);
        }
    }

    // ---- outbound flow control ----

    /// Write data to the channel, buffering whatever the remote window does
    /// not cover. Returns a pause hint when the window ran out.
    pub fn write(&mut self, data: &[u8]) -> Option<FlowEvent> {
        if !self.write_buf.is_empty() {
            // Earlier bytes are still waiting for window; preserve order.
            self.write_buf.extend_from_slice(data);
            return None;
        }
        let mut event = None;
        let window = self.remote_window_left as usize;
        let data = if data.len() > window {
            self.write_buf.extend_from_slice(&data[window..]);
            event = self.mark_paused();
            &data[..window]
        } else {
            data
        };
        if let Some(remote_id) = self.remote_id {
            for chunk in data.chunks(self.max_fragment()) {
                self.send(
                    MessageType::ChannelData,
                    ChannelData {
                        recipient_id: remote_id,
                        data: Bytes::copy_from_slice(chunk),
                    }
                    .encode(),
                );
            }
        }
        self.remote_window_left -= data.len() as u32;
        self.finish_close_if_drained();
        event
    }

    /// Write typed secondary-stream data under the same window discipline.
    ///
    /// Buffered records of the same type coalesce; a different type starts a
    /// new ordered record.
    pub fn write_extended(&mut self, type_code: u32, data: &[u8]) -> Option<FlowEvent> {
        if !self.ext_buf.is_empty() {
            if let Some((code, buf)) = self.ext_buf.back_mut() {
                if *code == type_code {
                    buf.extend_from_slice(data);
                    return None;
                }
            }
            self.ext_buf.push_back((type_code, BytesMut::from(data)));
            return None;
        }
        let mut event = None;
        let window = self.remote_window_left as usize;
        let data = if data.len() > window {
            self.ext_buf
                .push_back((type_code, BytesMut::from(&data[window..])));
            event = self.mark_paused();
            &data[..window]
        } else {
            data
        };
        if let Some(remote_id) = self.remote_id {
            for chunk in data.chunks(self.max_fragment()) {
                self.send(
                    MessageType::ChannelExtendedData,
                    ChannelExtendedData {
                        recipient_id: remote_id,
                        type_code,
                        data: Bytes::copy_from_slice(chunk),
                    }
                    .encode(),
                );
            }
        }
        self.remote_window_left -= data.len() as u32;
        self.finish_close_if_drained();
        event
    }

    /// Apply a window grant from the peer and flush what it now covers.
    pub fn add_window_bytes(&mut self, bytes: u32) -> Vec<FlowEvent> {
        self.remote_window_left = self.remote_window_left.saturating_add(bytes);
        let mut events = Vec::new();
        if !self.are_writing && !self.closing {
            self.are_writing = true;
            events.push(FlowEvent::Resumed);
        }
        if !self.write_buf.is_empty() {
            let pending = self.write_buf.split().freeze();
            if let Some(event) = self.write(&pending) {
                events.push(event);
            }
        }
        if !self.ext_buf.is_empty() {
            let pending: Vec<(u32, BytesMut)> = self.ext_buf.drain(..).collect();
            for (type_code, data) in pending {
                if let Some(event) = self.write_extended(type_code, &data) {
                    events.push(event);
                }
            }
        }
        events
    }

    /// Request shutdown of this side. The close message is deferred until
    /// every buffered byte has been flushed to the peer.
    pub fn lose_connection(&mut self) {
        self.closing = true;
        if self.write_buf.is_empty() && self.ext_buf.is_empty() {
            self.send_close();
        }
    }

    /// Signal that no more data will be written.
    pub fn send_eof(&mut self) {
        if let Some(remote_id) = self.remote_id {
            self.send(
                MessageType::ChannelEof,
                super::message::encode_channel_id(remote_id),
            );
        }
    }

    /// Emit the close message once. Repeated attempts and attempts on a
    /// channel whose remote mapping never existed are no-ops.
    pub(crate) fn send_close(&mut self) {
        if self.local_closed {
            return;
        }
        let Some(remote_id) = self.remote_id else {
            return;
        };
        trace!(channel = ?self.local_id, "sending channel close");
        self.send(
            MessageType::ChannelClose,
            super::message::encode_channel_id(remote_id),
        );
        self.local_closed = true;
    }

    fn mark_paused(&mut self) -> Option<FlowEvent> {
        if self.are_writing {
            self.are_writing = false;
            Some(FlowEvent::Paused)
        } else {
            None
        }
    }

    fn finish_close_if_drained(&mut self) {
        if self.closing && self.write_buf.is_empty() && self.ext_buf.is_empty() {
            self.send_close();
        }
    }

    fn max_fragment(&self) -> usize {
        (self.remote_max_packet.max(1)) as usize
    }

    pub(crate) fn send(&self, msg_type: MessageType, payload: Bytes) {
        if let Some(sink) = &self.sink {
            if sink.send_packet(msg_type.as_u8(), payload).is_err() {
                trace!(channel = ?self.local_id, "transport gone, dropping packet");
            }
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(&ChannelConfig::default())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("local_window_left", &self.local_window_left)
            .field("remote_window_left", &self.remote_window_left)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::Packet;
    use crate::transport::queue_sink;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn open_channel(window: u32, max_packet: u32) -> (Channel, UnboundedReceiver<Packet>) {
        let (sink, rx) = queue_sink();
        let mut chan = Channel::with_windows(131072, 32768);
        chan.attach(0, Arc::new(sink));
        chan.set_remote(5, window, max_packet);
        (chan, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            out.push(packet);
        }
        out
    }

    fn data_frames(rx: &mut UnboundedReceiver<Packet>) -> Vec<Vec<u8>> {
        drain(rx)
            .into_iter()
            .filter(|p| p.msg_type == MessageType::ChannelData.as_u8())
            .map(|p| ChannelData::decode(&p.payload).unwrap().data.to_vec())
            .collect()
    }

    #[test]
    fn test_write_within_window_fragments_by_max_packet() {
        let (mut chan, mut rx) = open_channel(1000, 10);
        assert!(chan.write(&[7u8; 25]).is_none());

        let frames = data_frames(&mut rx);
        assert_eq!(
            frames.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(chan.remote_window_left(), 975);
        assert_eq!(chan.buffered_bytes(), 0);
    }

    #[test]
    fn test_window_split_scenario() {
        // window=100, maxPacket=50, write 120: two 50-byte fragments out,
        // 20 buffered, paused; grant 20: one 20-byte fragment, resumed.
        let (mut chan, mut rx) = open_channel(100, 50);
        let payload: Vec<u8> = (0..120u8).collect();

        assert_eq!(chan.write(&payload), Some(FlowEvent::Paused));
        let frames = data_frames(&mut rx);
        assert_eq!(
            frames.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![50, 50]
        );
        assert_eq!(chan.remote_window_left(), 0);
        assert_eq!(chan.buffered_bytes(), 20);

        let events = chan.add_window_bytes(20);
        assert_eq!(events, vec![FlowEvent::Resumed]);
        let frames = data_frames(&mut rx);
        assert_eq!(frames, vec![payload[100..].to_vec()]);
        assert_eq!(chan.buffered_bytes(), 0);
        assert_eq!(chan.remote_window_left(), 0);
    }

    #[test]
    fn test_no_loss_duplication_or_reorder_across_split() {
        let (mut chan, mut rx) = open_channel(64, 16);
        let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();

        chan.write(&payload);
        chan.add_window_bytes(100);
        chan.add_window_bytes(100);

        let received: Vec<u8> = data_frames(&mut rx).concat();
        assert_eq!(received, payload);
    }

    #[test]
    fn test_pause_signaled_exactly_once() {
        let (mut chan, mut rx) = open_channel(10, 10);
        assert_eq!(chan.write(&[1u8; 20]), Some(FlowEvent::Paused));
        // Already paused and buffering: appends silently.
        assert!(chan.write(&[2u8; 5]).is_none());
        assert!(chan.write(&[3u8; 5]).is_none());
        assert_eq!(chan.buffered_bytes(), 20);

        let events = chan.add_window_bytes(40);
        assert_eq!(events, vec![FlowEvent::Resumed]);
        let received: Vec<u8> = data_frames(&mut rx).concat();
        let mut expected = vec![1u8; 20];
        expected.extend_from_slice(&[2u8; 5]);
        expected.extend_from_slice(&[3u8; 5]);
        assert_eq!(received, expected);
    }

    #[test]
    fn test_partial_grant_repauses() {
        let (mut chan, _rx) = open_channel(0, 8);
        assert_eq!(chan.write(&[9u8; 30]), Some(FlowEvent::Paused));

        let events = chan.add_window_bytes(10);
        assert_eq!(events, vec![FlowEvent::Resumed, FlowEvent::Paused]);
        assert_eq!(chan.buffered_bytes(), 20);
    }

    #[test]
    fn test_exact_fit_does_not_pause() {
        let (mut chan, mut rx) = open_channel(50, 50);
        assert!(chan.write(&[4u8; 50]).is_none());
        assert_eq!(chan.remote_window_left(), 0);
        assert_eq!(data_frames(&mut rx).concat().len(), 50);
    }

    #[test]
    fn test_extended_same_type_coalesces() {
        let (mut chan, _rx) = open_channel(0, 32);
        chan.write_extended(1, b"first ");
        chan.write_extended(1, b"second");
        chan.write_extended(2, b"other");
        assert_eq!(chan.ext_buf.len(), 2);
        assert_eq!(&chan.ext_buf[0].1[..], b"first second");
        assert_eq!(&chan.ext_buf[1].1[..], b"other");
    }

    #[test]
    fn test_extended_flush_preserves_record_order() {
        let (mut chan, mut rx) = open_channel(0, 64);
        chan.write_extended(1, b"err");
        chan.write_extended(2, b"aux");

        chan.add_window_bytes(64);
        let frames: Vec<(u32, Vec<u8>)> = drain(&mut rx)
            .into_iter()
            .map(|p| {
                let ext = ChannelExtendedData::decode(&p.payload).unwrap();
                (ext.type_code, ext.data.to_vec())
            })
            .collect();
        assert_eq!(frames, vec![(1, b"err".to_vec()), (2, b"aux".to_vec())]);
    }

    #[test]
    fn test_close_deferred_until_drained() {
        let (mut chan, mut rx) = open_channel(10, 10);
        chan.write(&[0u8; 30]);
        drain(&mut rx);

        chan.lose_connection();
        assert!(chan.is_closing());
        assert!(!chan.is_local_closed());
        assert!(drain(&mut rx).is_empty());

        chan.add_window_bytes(20);
        let packets = drain(&mut rx);
        assert_eq!(
            packets.last().map(|p| p.msg_type),
            Some(MessageType::ChannelClose.as_u8())
        );
        assert!(chan.is_local_closed());

        // A second close attempt must not emit another message.
        chan.lose_connection();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_immediate_close_when_nothing_buffered() {
        let (mut chan, mut rx) = open_channel(100, 50);
        chan.lose_connection();
        let packets = drain(&mut rx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].msg_type, MessageType::ChannelClose.as_u8());
    }

    #[test]
    fn test_unconfirmed_channel_buffers_everything() {
        let (sink, mut rx) = queue_sink();
        let mut chan = Channel::default();
        chan.attach(3, Arc::new(sink));

        assert_eq!(chan.write(b"early"), Some(FlowEvent::Paused));
        assert_eq!(chan.buffered_bytes(), 5);
        assert!(drain(&mut rx).is_empty());

        // Close before the open ever confirmed: nothing to send close to.
        chan.lose_connection();
        chan.add_window_bytes(100);
        assert!(drain(&mut rx)
            .iter()
            .all(|p| p.msg_type != MessageType::ChannelClose.as_u8()));
    }

    #[test]
    fn test_window_never_negative() {
        let (mut chan, _rx) = open_channel(7, 4);
        assert_eq!(chan.write(&[1u8; 100]), Some(FlowEvent::Paused));
        assert_eq!(chan.remote_window_left(), 0);
        assert_eq!(chan.buffered_bytes(), 93);

        chan.add_window_bytes(3);
        assert_eq!(chan.remote_window_left(), 0);
        assert_eq!(chan.buffered_bytes(), 90);

        chan.add_window_bytes(1000);
        assert_eq!(chan.remote_window_left(), 910);
        assert_eq!(chan.buffered_bytes(), 0);
    }

    #[test]
    fn test_inbound_clip_and_refill() {
        let mut chan = Channel::with_windows(100, 50);
        let big = [0u8; 200];
        assert_eq!(chan.clip_inbound(&big).len(), 100);

        chan.consume_local_window(40);
        assert!(chan.local_refill().is_none());
        chan.consume_local_window(20);
        assert_eq!(chan.local_refill(), Some(60));
        chan.grant_local_window(60);
        assert_eq!(chan.local_window_left(), 100);
    }

    #[test]
    fn test_eof_sent_once_mapping_exists() {
        let (mut chan, mut rx) = open_channel(10, 10);
        chan.send_eof();
        let packets = drain(&mut rx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].msg_type, MessageType::ChannelEof.as_u8());

        let mut unopened = Channel::default();
        unopened.send_eof();
        // No mapping, nothing sent, no panic.
    }
}
