//! # Remote Port Forwarding
//!
//! Listener lifecycle and routing state for remote-requested port forwards.
//!
//! When the peer asks this side to forward a port (`tcpip-forward`), the
//! [`ListenerManager`] binds a real TCP listener and surfaces every accepted
//! connection over a queue the application drains; what to do with an
//! accepted socket (typically: open a `forwarded-tcpip` channel back to the
//! peer) is the forwarding specialization's decision. The manager is also the
//! sole owner of the `(host, port) -> target` bindings a client records when
//! it requests a remote forward, consulted when the peer later opens a
//! `forwarded-tcpip` channel toward it.
//!
//! Listeners are connection-scoped resources: each is closed exactly once,
//! on explicit cancellation or when the connection tears down.

use crate::config::ChannelConfig;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::Result;
use crate::protocol::channel::{Channel, ChannelHandler};
use crate::protocol::dispatcher::{
    ChannelFactory, FactoryResult, GlobalContext, GlobalOutcome, GlobalRequestHandler,
    OpenContext, OpenRejection,
};
use crate::protocol::message::ChannelOpen;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{debug, info, warn};

/// Channel type opened by the peer for a connection it accepted on a
/// remotely-forwarded port.
pub const FORWARDED_TCPIP: &str = "forwarded-tcpip";

/// Global request asking this side to bind a forwarding listener.
pub const TCPIP_FORWARD: &str = "tcpip-forward";

/// Global request tearing a forwarding listener down.
pub const CANCEL_TCPIP_FORWARD: &str = "cancel-tcpip-forward";

/// Lowest port a peer may ask this side to bind.
const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

/// Where traffic arriving on a forwarded binding should be connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

impl ForwardTarget {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

/// A connection accepted on a forwarding listener, waiting for the
/// application to open a channel for it.
#[derive(Debug)]
pub struct ForwardedAccept {
    /// Host string the forward was requested for
    pub bind_host: String,
    /// Port the listener is actually bound on
    pub bind_port: u16,
    /// The accepted socket
    pub stream: TcpStream,
    /// Originator address of the accepted connection
    pub peer: SocketAddr,
}

struct ForwardListener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Sole owner of forwarding listener lifecycle and forward-target bindings.
pub struct ListenerManager {
    forwards: HashMap<(String, u16), ForwardTarget>,
    listeners: HashMap<(String, u16), ForwardListener>,
    accept_tx: mpsc::UnboundedSender<ForwardedAccept>,
    accept_rx: Option<mpsc::UnboundedReceiver<ForwardedAccept>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            forwards: HashMap::new(),
            listeners: HashMap::new(),
            accept_tx,
            accept_rx: Some(accept_rx),
        }
    }

    /// Take the queue of accepted forwarded connections. Yields `None` after
    /// the first call.
    pub fn incoming(&mut self) -> Option<mpsc::UnboundedReceiver<ForwardedAccept>> {
        self.accept_rx.take()
    }

    /// Bind a forwarding listener and start accepting on it.
    ///
    /// An empty host binds all interfaces. Returns the actually-bound port;
    /// the listener is recorded under that port, so an ephemeral request
    /// (port 0) can still be cancelled later.
    pub async fn bind(&mut self, host: &str, port: u16) -> Result<u16> {
        let bind_host = if host.is_empty() { "0.0.0.0" } else { host };
        let listener = TcpListener::bind((bind_host, port)).await?;
        let local_addr = listener.local_addr()?;
        let bound_port = local_addr.port();

        let key = (host.to_string(), bound_port);
        if self.listeners.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("forward already bound for {host}:{bound_port}"),
            )
            .into());
        }

        let accept_tx = self.accept_tx.clone();
        let accept_host = host.to_string();
        let task = tokio::spawn(async move {
            let mut incoming = TcpListenerStream::new(listener);
            while let Some(accepted) = incoming.next().await {
                match accepted {
                    Ok(stream) => {
                        let peer = match stream.peer_addr() {
                            Ok(peer) => peer,
                            Err(_) => continue,
                        };
                        debug!(%peer, port = bound_port, "accepted forwarded connection");
                        let delivered = accept_tx.send(ForwardedAccept {
                            bind_host: accept_host.clone(),
                            bind_port: bound_port,
                            stream,
                            peer,
                        });
                        if delivered.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, port = bound_port, "accept failed on forwarding listener");
                    }
                }
            }
        });

        info!(host, port = bound_port, "forwarding listener bound");
        self.listeners.insert(key, ForwardListener { local_addr, task });
        Ok(bound_port)
    }

    /// Stop the listener bound for `(host, port)`. Returns false when no
    /// such listener exists.
    pub fn cancel(&mut self, host: &str, port: u16) -> bool {
        match self.listeners.remove(&(host.to_string(), port)) {
            Some(listener) => {
                listener.task.abort();
                info!(host, port, "forwarding listener cancelled");
                true
            }
            None => false,
        }
    }

    /// Record where traffic for a remote-forward binding should go.
    pub fn record_forward(&mut self, host: &str, port: u16, target: ForwardTarget) {
        self.forwards.insert((host.to_string(), port), target);
    }

    /// Forget a recorded forward binding. Returns the target it pointed at.
    pub fn remove_forward(&mut self, host: &str, port: u16) -> Option<ForwardTarget> {
        self.forwards.remove(&(host.to_string(), port))
    }

    /// Target recorded for a binding, if any.
    pub fn forward_target(&self, host: &str, port: u16) -> Option<&ForwardTarget> {
        self.forwards.get(&(host.to_string(), port))
    }

    /// Local address of the listener recorded for `(host, port)`.
    pub fn listener_addr(&self, host: &str, port: u16) -> Option<SocketAddr> {
        self.listeners
            .get(&(host.to_string(), port))
            .map(|l| l.local_addr)
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.len()
    }

    /// Stop every listener. Safe to call more than once; each listener is
    /// closed at most once because removal and abort happen together.
    pub fn shutdown(&mut self) {
        for ((host, port), listener) in self.listeners.drain() {
            listener.task.abort();
            debug!(%host, port, "forwarding listener stopped at teardown");
        }
        self.forwards.clear();
    }
}

impl Default for ListenerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        for listener in self.listeners.values() {
            listener.task.abort();
        }
    }
}

// ---- payload layouts ----

/// Build the `tcpip-forward` / `cancel-tcpip-forward` request payload.
pub fn pack_forward_request(host: &str, port: u16) -> Bytes {
    let mut w = WireWriter::with_capacity(8 + host.len());
    w.put_string(host.as_bytes()).put_u32(u32::from(port));
    w.into_bytes()
}

/// Parse a `tcpip-forward` / `cancel-tcpip-forward` request payload.
pub fn unpack_forward_request(data: &[u8]) -> Result<(String, u16)> {
    let mut r = WireReader::new(data);
    let host = r.take_utf8("forward host")?.to_string();
    let port = r.take_u32("forward port")?;
    let port = u16::try_from(port).map_err(|_| {
        crate::error::MuxError::MalformedPayload(format!("forward port out of range: {port}"))
    })?;
    Ok((host, port))
}

/// Address fields of a `forwarded-tcpip` channel open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedOpen {
    /// Address the connection was accepted on (the forwarded binding)
    pub host: String,
    pub port: u16,
    /// Originator of the accepted connection
    pub originator_host: String,
    pub originator_port: u16,
}

/// Build the type-specific extra bytes of a `forwarded-tcpip` channel open.
pub fn pack_forwarded_open(open: &ForwardedOpen) -> Bytes {
    let mut w = WireWriter::with_capacity(16 + open.host.len() + open.originator_host.len());
    w.put_string(open.host.as_bytes())
        .put_u32(u32::from(open.port))
        .put_string(open.originator_host.as_bytes())
        .put_u32(u32::from(open.originator_port));
    w.into_bytes()
}

/// Parse the type-specific extra bytes of a `forwarded-tcpip` channel open.
pub fn unpack_forwarded_open(data: &[u8]) -> Result<ForwardedOpen> {
    let mut r = WireReader::new(data);
    let host = r.take_utf8("forwarded host")?.to_string();
    let port = r.take_u32("forwarded port")?;
    let originator_host = r.take_utf8("originator host")?.to_string();
    let originator_port = r.take_u32("originator port")?;
    let (port, originator_port) = match (u16::try_from(port), u16::try_from(originator_port)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => {
            return Err(crate::error::MuxError::MalformedPayload(
                "forwarded-tcpip port out of range".to_string(),
            ))
        }
    };
    Ok(ForwardedOpen {
        host,
        port,
        originator_host,
        originator_port,
    })
}

// ---- built-in handlers ----

/// Handles `tcpip-forward`: binds a listener for the peer.
///
/// Privileged ports are refused outright; a request for port 0 binds an
/// ephemeral port and reports it in the reply payload.
pub struct TcpipForwardHandler;

impl GlobalRequestHandler for TcpipForwardHandler {
    fn handle<'a>(
        &'a mut self,
        mut ctx: GlobalContext<'a>,
        data: &'a [u8],
    ) -> BoxFuture<'a, GlobalOutcome> {
        async move {
            let (host, port) = match unpack_forward_request(data) {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(%error, "malformed tcpip-forward request");
                    return GlobalOutcome::Denied;
                }
            };
            if port != 0 && port < FIRST_UNPRIVILEGED_PORT {
                debug!(host, port, "refusing privileged forward port");
                return GlobalOutcome::Denied;
            }
            match ctx.listeners().bind(&host, port).await {
                Ok(bound_port) if port == 0 => {
                    let mut w = WireWriter::with_capacity(4);
                    w.put_u32(u32::from(bound_port));
                    GlobalOutcome::AcceptedWith(w.into_bytes())
                }
                Ok(_) => GlobalOutcome::Accepted,
                Err(error) => {
                    warn!(%error, host, port, "forward bind failed");
                    GlobalOutcome::Denied
                }
            }
        }
        .boxed()
    }
}

/// Handles `cancel-tcpip-forward`: tears a listener down, denying the
/// request when no matching listener exists.
pub struct CancelTcpipForwardHandler;

impl GlobalRequestHandler for CancelTcpipForwardHandler {
    fn handle<'a>(
        &'a mut self,
        mut ctx: GlobalContext<'a>,
        data: &'a [u8],
    ) -> BoxFuture<'a, GlobalOutcome> {
        async move {
            let (host, port) = match unpack_forward_request(data) {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(%error, "malformed cancel-tcpip-forward request");
                    return GlobalOutcome::Denied;
                }
            };
            if ctx.listeners().cancel(&host, port) {
                GlobalOutcome::Accepted
            } else {
                GlobalOutcome::Denied
            }
        }
        .boxed()
    }
}

/// Factory for `forwarded-tcpip` channels the peer opens toward a client
/// that requested remote forwarding.
///
/// Consults the recorded bindings; an open for an address nobody asked to
/// forward is rejected with `ConnectFailed`. The handler for an accepted
/// channel comes from the supplied constructor, which receives the recorded
/// target and the originator details.
pub struct ForwardedTcpipFactory<F> {
    config: ChannelConfig,
    make_handler: F,
}

impl<F> ForwardedTcpipFactory<F>
where
    F: FnMut(&ForwardTarget, &ForwardedOpen) -> Box<dyn ChannelHandler> + Send,
{
    pub fn new(config: ChannelConfig, make_handler: F) -> Self {
        Self {
            config,
            make_handler,
        }
    }
}

impl<F> ChannelFactory for ForwardedTcpipFactory<F>
where
    F: FnMut(&ForwardTarget, &ForwardedOpen) -> Box<dyn ChannelHandler> + Send,
{
    fn new_channel(&mut self, ctx: OpenContext<'_>, open: &ChannelOpen) -> FactoryResult {
        let forwarded = unpack_forwarded_open(&open.extra)
            .map_err(|_| OpenRejection::connect_failed("malformed forwarded-tcpip open"))?;
        let Some(target) = ctx.forward_target(&forwarded.host, forwarded.port) else {
            debug!(
                host = %forwarded.host,
                port = forwarded.port,
                "forwarded-tcpip open for unknown binding"
            );
            return Err(OpenRejection::connect_failed("no forwarding recorded for that address"));
        };
        let handler = (self.make_handler)(target, &forwarded);
        Ok((Channel::new(&self.config), handler))
    }
}
