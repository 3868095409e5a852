//! # Connection Multiplexer
//!
//! Demultiplexes inbound messages onto channels and global handlers, owns
//! channel-id allocation and the request/reply correlation queues, and holds
//! the forwarding listeners.
//!
//! All connection state lives behind one [`Connection`] value; callers
//! serialize every operation through `&mut Connection` (a single lock or a
//! single driving task), so window and table updates are atomic relative to
//! dispatch. Replies carry no identifier beyond "next in line": completions
//! resolve strictly in issuance order per channel, and per the global queue
//! for global requests.
//!
//! One channel failing (an open rejection, a denied request) never
//! disturbs its siblings or the connection. A message referencing a channel
//! id this side never allocated does: that is a protocol violation, surfaced
//! as an error the caller should treat as fatal to the connection.

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::protocol::channel::{Channel, ChannelHandler, FlowEvent, RequestOutcome};
use crate::protocol::dispatcher::{GlobalContext, GlobalOutcome, OpenContext, Registry};
use crate::protocol::message::{
    self, ChannelData, ChannelExtendedData, ChannelOpen, ChannelRequest, GlobalRequest,
    MessageType, OpenConfirmation, OpenFailure, WindowAdjust,
};
use crate::service::forward::{
    pack_forward_request, CancelTcpipForwardHandler, ForwardTarget, ForwardedAccept,
    ListenerManager, TcpipForwardHandler, CANCEL_TCPIP_FORWARD, TCPIP_FORWARD,
};
use crate::transport::PacketSink;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

type ReplySender = oneshot::Sender<Result<Bytes>>;

/// Handle for a request sent with `want_reply`; resolves when the peer's
/// success or failure reply reaches the front of the queue.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Bytes>>,
    timeout: Option<Duration>,
}

impl PendingReply {
    /// Wait for the reply.
    ///
    /// Resolves `Ok` with the reply's extra payload, `Err(RequestDenied)` on
    /// a failure reply, and `Err(ConnectionClosed)` if the channel or
    /// connection goes away first. Without a configured request timeout a
    /// reply that never comes waits forever, exactly as the protocol
    /// inherited it.
    pub async fn wait(self) -> Result<Bytes> {
        match self.timeout {
            None => self
                .rx
                .await
                .unwrap_or_else(|_| Err(MuxError::ConnectionClosed)),
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(reply) => reply.unwrap_or_else(|_| Err(MuxError::ConnectionClosed)),
                Err(_) => Err(MuxError::RequestTimeout),
            },
        }
    }
}

struct ChannelEntry {
    channel: Channel,
    handler: Box<dyn ChannelHandler>,
    pending_replies: VecDeque<ReplySender>,
}

/// The channel a hook is running for, with the operations a handler may
/// perform from inside a callback.
pub struct ChannelCtx<'a> {
    chan: &'a mut Channel,
    pending: &'a mut VecDeque<ReplySender>,
    request_timeout: Option<Duration>,
    events: Vec<FlowEvent>,
}

impl ChannelCtx<'_> {
    /// Read access to the channel's flow-control state.
    pub fn channel(&self) -> &Channel {
        self.chan
    }

    /// Write data on this channel under its flow control.
    pub fn write(&mut self, data: &[u8]) {
        if let Some(event) = self.chan.write(data) {
            self.events.push(event);
        }
    }

    /// Write typed secondary-stream data on this channel.
    pub fn write_extended(&mut self, type_code: u32, data: &[u8]) {
        if let Some(event) = self.chan.write_extended(type_code, data) {
            self.events.push(event);
        }
    }

    /// Signal that this side will send no more data.
    pub fn send_eof(&mut self) {
        self.chan.send_eof();
    }

    /// Begin closing this channel; deferred until buffered data drains.
    pub fn lose_connection(&mut self) {
        self.chan.lose_connection();
    }

    /// Send a request on this channel. Returns a completion handle when a
    /// reply was asked for and the channel still has a remote mapping.
    pub fn send_request(
        &mut self,
        request_type: &str,
        data: &[u8],
        want_reply: bool,
    ) -> Option<PendingReply> {
        push_request(
            self.chan,
            self.pending,
            self.request_timeout,
            request_type,
            data,
            want_reply,
        )
    }
}

/// Send a channel request and, when a reply is wanted, enqueue its
/// completion in issuance order.
fn push_request(
    chan: &mut Channel,
    pending: &mut VecDeque<ReplySender>,
    timeout: Option<Duration>,
    request_type: &str,
    data: &[u8],
    want_reply: bool,
) -> Option<PendingReply> {
    let remote_id = chan.remote_id()?;
    trace!(channel = ?chan.local_id(), request_type, "sending channel request");
    chan.send(
        MessageType::ChannelRequest,
        ChannelRequest {
            recipient_id: remote_id,
            request_type: request_type.to_string(),
            want_reply,
            data: Bytes::copy_from_slice(data),
        }
        .encode(),
    );
    if !want_reply {
        return None;
    }
    let (tx, rx) = oneshot::channel();
    pending.push_back(tx);
    Some(PendingReply { rx, timeout })
}

/// Run a handler hook with a context over its channel, then deliver any
/// pause/resume hints the hook's writes produced.
fn run_hook<R>(
    entry: &mut ChannelEntry,
    request_timeout: Option<Duration>,
    hook: impl FnOnce(&mut dyn ChannelHandler, &mut ChannelCtx<'_>) -> R,
) -> R {
    let ChannelEntry {
        channel,
        handler,
        pending_replies,
    } = entry;
    let mut ctx = ChannelCtx {
        chan: channel,
        pending: pending_replies,
        request_timeout,
        events: Vec::new(),
    };
    let result = hook(handler.as_mut(), &mut ctx);
    let events = ctx.events;
    deliver_flow_events(handler.as_mut(), events);
    result
}

fn deliver_flow_events(handler: &mut dyn ChannelHandler, events: Vec<FlowEvent>) {
    for event in events {
        match event {
            FlowEvent::Paused => handler.stop_writing(),
            FlowEvent::Resumed => handler.start_writing(),
        }
    }
}

/// One multiplexed connection: the channel table, the request queues, the
/// handler registries, and the forwarding listeners.
pub struct Connection {
    sink: Arc<dyn PacketSink>,
    config: MuxConfig,
    next_local_id: u32,
    channels: HashMap<u32, ChannelEntry>,
    global_replies: VecDeque<ReplySender>,
    registry: Registry,
    listeners: ListenerManager,
}

impl Connection {
    /// Create a multiplexer over an authenticated transport's packet sink.
    ///
    /// The remote-forward global handlers are pre-registered; channel-type
    /// factories and further global handlers are added through
    /// [`registry_mut`](Self::registry_mut) before traffic starts.
    pub fn new(sink: Arc<dyn PacketSink>, config: MuxConfig) -> Self {
        let mut registry = Registry::new();
        registry.register_global_request(TCPIP_FORWARD, TcpipForwardHandler);
        registry.register_global_request(CANCEL_TCPIP_FORWARD, CancelTcpipForwardHandler);
        Self {
            sink,
            config,
            next_local_id: 0,
            channels: HashMap::new(),
            global_replies: VecDeque::new(),
            registry,
            listeners: ListenerManager::new(),
        }
    }

    /// The handler registries, for populating at construction time.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// The forwarding listener manager.
    pub fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerManager {
        &mut self.listeners
    }

    /// Take the queue of connections accepted on forwarding listeners.
    pub fn incoming_forwards(&mut self) -> Option<mpsc::UnboundedReceiver<ForwardedAccept>> {
        self.listeners.incoming()
    }

    /// Read access to a channel's flow-control state.
    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id).map(|entry| &entry.channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ---- operations for users of the connection ----

    /// Open a new channel. The open completes later, through the handler's
    /// `channel_open` or `open_failed` hook.
    pub fn open_channel<H>(
        &mut self,
        channel_type: &str,
        mut channel: Channel,
        handler: H,
        extra: &[u8],
    ) -> Result<u32>
    where
        H: ChannelHandler + 'static,
    {
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        channel.attach(local_id, self.sink.clone());
        debug!(
            channel = local_id,
            channel_type,
            window = channel.local_window_size(),
            max_packet = channel.local_max_packet(),
            "opening channel"
        );
        self.sink.send_packet(
            MessageType::ChannelOpen.as_u8(),
            ChannelOpen {
                channel_type: channel_type.to_string(),
                sender_id: local_id,
                window_size: channel.local_window_size(),
                max_packet: channel.local_max_packet(),
                extra: Bytes::copy_from_slice(extra),
            }
            .encode(),
        )?;
        self.channels.insert(
            local_id,
            ChannelEntry {
                channel,
                handler: Box::new(handler),
                pending_replies: VecDeque::new(),
            },
        );
        Ok(local_id)
    }

    /// Send a request on a channel.
    ///
    /// Returns a completion handle when `want_reply` is set and the channel
    /// still has a remote mapping; a request on a removed or unconfirmed
    /// channel is silently dropped. Callers must issue requests in the order
    /// they expect replies: matching is strictly first-in-first-out.
    pub fn send_request(
        &mut self,
        id: u32,
        request_type: &str,
        data: &[u8],
        want_reply: bool,
    ) -> Option<PendingReply> {
        let timeout = self.config.request_timeout;
        let entry = self.channels.get_mut(&id)?;
        push_request(
            &mut entry.channel,
            &mut entry.pending_replies,
            timeout,
            request_type,
            data,
            want_reply,
        )
    }

    /// Send a connection-wide request, correlated through the global FIFO.
    pub fn send_global_request(
        &mut self,
        request_type: &str,
        data: &[u8],
        want_reply: bool,
    ) -> Result<Option<PendingReply>> {
        trace!(request_type, "sending global request");
        self.sink.send_packet(
            MessageType::GlobalRequest.as_u8(),
            GlobalRequest {
                request_type: request_type.to_string(),
                want_reply,
                data: Bytes::copy_from_slice(data),
            }
            .encode(),
        )?;
        if !want_reply {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        self.global_replies.push_back(tx);
        Ok(Some(PendingReply {
            rx,
            timeout: self.config.request_timeout,
        }))
    }

    /// Ask the peer to bind `(host, port)` and forward connections here.
    ///
    /// Records where forwarded connections should be directed, so the
    /// `forwarded-tcpip` factory can route the peer's opens; the reply's
    /// payload carries the bound port when port 0 was requested.
    pub fn request_remote_forward(
        &mut self,
        host: &str,
        port: u16,
        target: ForwardTarget,
    ) -> Result<Option<PendingReply>> {
        self.listeners.record_forward(host, port, target);
        self.send_global_request(TCPIP_FORWARD, &pack_forward_request(host, port), true)
    }

    /// Ask the peer to stop forwarding `(host, port)` and drop the local
    /// routing entry.
    pub fn cancel_remote_forward(&mut self, host: &str, port: u16) -> Result<Option<PendingReply>> {
        self.listeners.remove_forward(host, port);
        self.send_global_request(CANCEL_TCPIP_FORWARD, &pack_forward_request(host, port), true)
    }

    /// Write data on a channel under its flow control. Writes to a removed
    /// channel are tolerated and dropped.
    pub fn write(&mut self, id: u32, data: &[u8]) {
        match self.channels.get_mut(&id) {
            Some(entry) => {
                let event = entry.channel.write(data);
                deliver_flow_events(entry.handler.as_mut(), event.into_iter().collect());
            }
            None => trace!(channel = id, "write on removed channel dropped"),
        }
    }

    /// Write typed secondary-stream data on a channel.
    pub fn write_extended(&mut self, id: u32, type_code: u32, data: &[u8]) {
        match self.channels.get_mut(&id) {
            Some(entry) => {
                let event = entry.channel.write_extended(type_code, data);
                deliver_flow_events(entry.handler.as_mut(), event.into_iter().collect());
            }
            None => trace!(channel = id, "extended write on removed channel dropped"),
        }
    }

    /// Grow the window this side grants and tell the peer. Normally managed
    /// automatically by the inbound-data hysteresis.
    pub fn adjust_window(&mut self, id: u32, bytes: u32) {
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.channel.send_window_adjust(bytes);
        }
    }

    /// Signal that this side will send no more data on the channel.
    pub fn send_eof(&mut self, id: u32) {
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.channel.send_eof();
        }
    }

    /// Begin closing a channel; the close message is deferred until its
    /// buffers drain, and the entry is removed once the peer's close comes
    /// back.
    pub fn lose_connection(&mut self, id: u32) {
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.channel.lose_connection();
        }
    }

    /// Send the close message for a channel immediately, once.
    pub fn send_close(&mut self, id: u32) {
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.channel.send_close();
        }
    }

    /// Tear the multiplexer down: stop every forwarding listener, fail all
    /// pending completions, and run each channel's closed hook.
    pub fn shutdown(&mut self) {
        info!(
            channels = self.channels.len(),
            listeners = self.listeners.active_listeners(),
            "shutting down multiplexer"
        );
        self.listeners.shutdown();
        self.global_replies.clear();
        for (_, mut entry) in self.channels.drain() {
            entry.handler.closed();
        }
    }

    // ---- inbound dispatch ----

    /// Dispatch one decoded inbound packet.
    pub async fn dispatch_packet(&mut self, packet: &crate::core::packet::Packet) -> Result<()> {
        self.dispatch(packet.msg_type, &packet.payload).await
    }

    /// Dispatch one decoded inbound message to the channel or global handler
    /// it addresses.
    ///
    /// An error return means the peer violated the protocol (unknown message
    /// type, unknown channel id, malformed payload, unmatched global reply);
    /// the caller should tear the connection down rather than continue.
    pub async fn dispatch(&mut self, msg_type: u8, payload: &[u8]) -> Result<()> {
        let Some(ty) = MessageType::from_u8(msg_type) else {
            return Err(MuxError::UnsupportedMessage(msg_type));
        };
        trace!(msg_type = ?ty, len = payload.len(), "dispatching");
        match ty {
            MessageType::GlobalRequest => self.on_global_request(payload).await,
            MessageType::RequestSuccess => self.on_global_reply(payload, true),
            MessageType::RequestFailure => self.on_global_reply(payload, false),
            MessageType::ChannelOpen => self.on_channel_open(payload),
            MessageType::ChannelOpenConfirmation => self.on_open_confirmation(payload),
            MessageType::ChannelOpenFailure => self.on_open_failure(payload),
            MessageType::ChannelWindowAdjust => self.on_window_adjust(payload),
            MessageType::ChannelData => self.on_channel_data(payload),
            MessageType::ChannelExtendedData => self.on_extended_data(payload),
            MessageType::ChannelEof => self.on_eof(payload),
            MessageType::ChannelClose => self.on_close(payload),
            MessageType::ChannelRequest => self.on_channel_request(payload),
            MessageType::ChannelSuccess => self.on_channel_reply(payload, true),
            MessageType::ChannelFailure => self.on_channel_reply(payload, false),
        }
    }

    fn entry_mut(&mut self, id: u32) -> Result<&mut ChannelEntry> {
        self.channels
            .get_mut(&id)
            .ok_or(MuxError::UnknownChannel(id))
    }

    async fn on_global_request(&mut self, payload: &[u8]) -> Result<()> {
        let request = GlobalRequest::decode(payload)?;
        let Self {
            registry,
            listeners,
            sink,
            ..
        } = self;
        let outcome = match registry.global_handler_mut(&request.request_type) {
            Some(handler) => {
                handler
                    .handle(GlobalContext { listeners }, &request.data)
                    .await
            }
            None => {
                debug!(request_type = %request.request_type, "no handler for global request");
                GlobalOutcome::Denied
            }
        };
        if request.want_reply {
            match outcome {
                GlobalOutcome::Denied => {
                    sink.send_packet(MessageType::RequestFailure.as_u8(), Bytes::new())?
                }
                GlobalOutcome::Accepted => {
                    sink.send_packet(MessageType::RequestSuccess.as_u8(), Bytes::new())?
                }
                GlobalOutcome::AcceptedWith(data) => {
                    sink.send_packet(MessageType::RequestSuccess.as_u8(), data)?
                }
            }
        }
        Ok(())
    }

    fn on_global_reply(&mut self, payload: &[u8], success: bool) -> Result<()> {
        match self.global_replies.pop_front() {
            Some(sender) => {
                let result = if success {
                    Ok(Bytes::copy_from_slice(payload))
                } else {
                    Err(MuxError::RequestDenied)
                };
                let _ = sender.send(result);
                Ok(())
            }
            None => Err(MuxError::ProtocolViolation(
                "global reply with no pending request".to_string(),
            )),
        }
    }

    fn on_channel_open(&mut self, payload: &[u8]) -> Result<()> {
        let open = ChannelOpen::decode(payload)?;
        let timeout = self.config.request_timeout;
        let Self {
            registry,
            listeners,
            sink,
            channels,
            next_local_id,
            ..
        } = self;
        let Some(factory) = registry.channel_factory_mut(&open.channel_type) else {
            debug!(channel_type = %open.channel_type, "rejecting open for unknown channel type");
            sink.send_packet(
                MessageType::ChannelOpenFailure.as_u8(),
                OpenFailure::new(
                    open.sender_id,
                    message::OpenFailureReason::UnknownChannelType,
                    "unknown channel type",
                )
                .encode(),
            )?;
            return Ok(());
        };
        match factory.new_channel(OpenContext { listeners: &*listeners }, &open) {
            Ok((mut channel, handler)) => {
                let local_id = *next_local_id;
                *next_local_id += 1;
                channel.attach(local_id, sink.clone());
                channel.set_remote(open.sender_id, open.window_size, open.max_packet);
                sink.send_packet(
                    MessageType::ChannelOpenConfirmation.as_u8(),
                    OpenConfirmation {
                        recipient_id: open.sender_id,
                        sender_id: local_id,
                        window_size: channel.local_window_size(),
                        max_packet: channel.local_max_packet(),
                        extra: Bytes::new(),
                    }
                    .encode(),
                )?;
                info!(
                    channel = local_id,
                    channel_type = %open.channel_type,
                    "accepted channel open"
                );
                let mut entry = ChannelEntry {
                    channel,
                    handler,
                    pending_replies: VecDeque::new(),
                };
                run_hook(&mut entry, timeout, |h, ctx| h.channel_open(ctx, &[]));
                channels.insert(local_id, entry);
            }
            Err(rejection) => {
                debug!(
                    channel_type = %open.channel_type,
                    reason = %rejection.reason,
                    "factory rejected channel open"
                );
                sink.send_packet(
                    MessageType::ChannelOpenFailure.as_u8(),
                    OpenFailure::new(open.sender_id, rejection.reason, &rejection.message)
                        .encode(),
                )?;
            }
        }
        Ok(())
    }

    fn on_open_confirmation(&mut self, payload: &[u8]) -> Result<()> {
        let confirm = OpenConfirmation::decode(payload)?;
        let timeout = self.config.request_timeout;
        let entry = self.entry_mut(confirm.recipient_id)?;
        entry
            .channel
            .set_remote(confirm.sender_id, confirm.window_size, confirm.max_packet);
        debug!(
            channel = confirm.recipient_id,
            remote = confirm.sender_id,
            window = confirm.window_size,
            "channel open confirmed"
        );
        run_hook(entry, timeout, |h, ctx| h.channel_open(ctx, &confirm.extra));
        Ok(())
    }

    fn on_open_failure(&mut self, payload: &[u8]) -> Result<()> {
        let failure = OpenFailure::decode(payload)?;
        let mut entry = self
            .channels
            .remove(&failure.recipient_id)
            .ok_or(MuxError::UnknownChannel(failure.recipient_id))?;
        debug!(
            channel = failure.recipient_id,
            reason = failure.reason,
            description = %failure.description,
            "channel open refused by peer"
        );
        entry
            .handler
            .open_failed(failure.reason, &failure.description);
        Ok(())
    }

    fn on_window_adjust(&mut self, payload: &[u8]) -> Result<()> {
        let adjust = WindowAdjust::decode(payload)?;
        let entry = self.entry_mut(adjust.recipient_id)?;
        let events = entry.channel.add_window_bytes(adjust.bytes_to_add);
        deliver_flow_events(entry.handler.as_mut(), events);
        Ok(())
    }

    fn on_channel_data(&mut self, payload: &[u8]) -> Result<()> {
        let msg = ChannelData::decode(payload)?;
        let timeout = self.config.request_timeout;
        let entry = self.entry_mut(msg.recipient_id)?;
        // A peer that overruns the window it was granted gets clipped, not
        // obeyed.
        let data = entry.channel.clip_inbound(&msg.data);
        entry.channel.consume_local_window(data.len() as u32);
        if let Some(grant) = entry.channel.local_refill() {
            trace!(channel = msg.recipient_id, grant, "refilling local window");
            entry.channel.send_window_adjust(grant);
        }
        run_hook(entry, timeout, |h, ctx| h.data_received(ctx, data));
        Ok(())
    }

    fn on_extended_data(&mut self, payload: &[u8]) -> Result<()> {
        let msg = ChannelExtendedData::decode(payload)?;
        let timeout = self.config.request_timeout;
        let entry = self.entry_mut(msg.recipient_id)?;
        run_hook(entry, timeout, |h, ctx| {
            h.ext_data_received(ctx, msg.type_code, &msg.data)
        });
        Ok(())
    }

    fn on_eof(&mut self, payload: &[u8]) -> Result<()> {
        let (id, _) = message::decode_channel_id(payload, "eof recipient")?;
        let timeout = self.config.request_timeout;
        let entry = self.entry_mut(id)?;
        debug!(channel = id, "remote eof");
        run_hook(entry, timeout, |h, ctx| h.eof_received(ctx));
        Ok(())
    }

    fn on_close(&mut self, payload: &[u8]) -> Result<()> {
        let (id, _) = message::decode_channel_id(payload, "close recipient")?;
        let timeout = self.config.request_timeout;
        let mut entry = self
            .channels
            .remove(&id)
            .ok_or(MuxError::UnknownChannel(id))?;
        entry.channel.mark_remote_closed();
        run_hook(&mut entry, timeout, |h, ctx| h.close_received(ctx));
        entry.handler.closed();
        debug!(channel = id, "channel closed and removed");
        // Dropping the entry drops its pending reply senders, failing any
        // requests still waiting on this channel.
        Ok(())
    }

    fn on_channel_request(&mut self, payload: &[u8]) -> Result<()> {
        let request = ChannelRequest::decode(payload)?;
        let timeout = self.config.request_timeout;
        let entry = self.entry_mut(request.recipient_id)?;
        let outcome = run_hook(entry, timeout, |h, ctx| {
            h.request_received(ctx, &request.request_type, &request.data)
        });
        if !request.want_reply {
            return Ok(());
        }
        let Some(remote_id) = entry.channel.remote_id() else {
            return Ok(());
        };
        match outcome {
            RequestOutcome::Success => self.sink.send_packet(
                MessageType::ChannelSuccess.as_u8(),
                message::encode_channel_id(remote_id),
            )?,
            RequestOutcome::Failure => self.sink.send_packet(
                MessageType::ChannelFailure.as_u8(),
                message::encode_channel_id(remote_id),
            )?,
            RequestOutcome::Pending(rx) => {
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    let ok = rx.await.unwrap_or(false);
                    let reply = if ok {
                        MessageType::ChannelSuccess
                    } else {
                        MessageType::ChannelFailure
                    };
                    if sink
                        .send_packet(reply.as_u8(), message::encode_channel_id(remote_id))
                        .is_err()
                    {
                        debug!("transport gone before deferred request reply");
                    }
                });
            }
        }
        Ok(())
    }

    fn on_channel_reply(&mut self, payload: &[u8], success: bool) -> Result<()> {
        let (id, rest) = message::decode_channel_id(payload, "reply recipient")?;
        let entry = self.entry_mut(id)?;
        match entry.pending_replies.pop_front() {
            Some(sender) => {
                let result = if success {
                    Ok(Bytes::copy_from_slice(rest))
                } else {
                    Err(MuxError::RequestDenied)
                };
                let _ = sender.send(result);
            }
            None => warn!(channel = id, "reply with no pending request, ignoring"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("next_local_id", &self.next_local_id)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("pending_global", &self.global_replies.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
