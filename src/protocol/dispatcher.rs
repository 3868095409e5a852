//! # Handler Registries
//!
//! Explicit routing tables for the two string-keyed extension points of the
//! multiplexer: channel-type factories (consulted when the peer asks to open
//! a channel) and global-request handlers (consulted for connection-wide
//! requests). Both are populated once, at connection construction, and
//! looked up per message; no reflective name mangling.

use crate::protocol::channel::{Channel, ChannelHandler};
use crate::protocol::message::{ChannelOpen, OpenFailureReason};
use crate::service::forward::{ForwardTarget, ListenerManager};
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;

/// Structured rejection of an inbound channel open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRejection {
    pub reason: OpenFailureReason,
    pub message: String,
}

impl OpenRejection {
    pub fn new(reason: OpenFailureReason, message: &str) -> Self {
        Self {
            reason,
            message: message.to_string(),
        }
    }

    pub fn prohibited(message: &str) -> Self {
        Self::new(OpenFailureReason::AdministrativelyProhibited, message)
    }

    pub fn connect_failed(message: &str) -> Self {
        Self::new(OpenFailureReason::ConnectFailed, message)
    }
}

/// What a channel-type factory returns: a channel plus its handler, or a
/// structured rejection sent back as an open failure.
pub type FactoryResult = std::result::Result<(Channel, Box<dyn ChannelHandler>), OpenRejection>;

/// Read-only connection state a factory may consult while deciding.
pub struct OpenContext<'a> {
    pub(crate) listeners: &'a ListenerManager,
}

impl OpenContext<'_> {
    /// Look up the forwarding target recorded for a remote-forward binding.
    pub fn forward_target(&self, host: &str, port: u16) -> Option<&ForwardTarget> {
        self.listeners.forward_target(host, port)
    }
}

/// Factory for one channel type, selected by the type string in
/// `CHANNEL_OPEN`.
pub trait ChannelFactory: Send {
    fn new_channel(&mut self, ctx: OpenContext<'_>, open: &ChannelOpen) -> FactoryResult;
}

impl<F> ChannelFactory for F
where
    F: FnMut(OpenContext<'_>, &ChannelOpen) -> FactoryResult + Send,
{
    fn new_channel(&mut self, ctx: OpenContext<'_>, open: &ChannelOpen) -> FactoryResult {
        self(ctx, open)
    }
}

/// Outcome of a global request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalOutcome {
    /// Request denied; a `REQUEST_FAILURE` is sent when a reply was wanted.
    Denied,
    /// Request accepted.
    Accepted,
    /// Request accepted with request-specific reply payload.
    AcceptedWith(Bytes),
}

/// Mutable connection state a global-request handler works against.
pub struct GlobalContext<'a> {
    pub(crate) listeners: &'a mut ListenerManager,
}

impl GlobalContext<'_> {
    /// The connection's forwarding listener manager.
    pub fn listeners(&mut self) -> &mut ListenerManager {
        self.listeners
    }
}

/// Handler for one global-request type.
///
/// Handlers may suspend (the built-in remote-forward handler binds a socket),
/// so they return a boxed future in the style async trait seams take
/// elsewhere in this stack.
pub trait GlobalRequestHandler: Send {
    fn handle<'a>(&'a mut self, ctx: GlobalContext<'a>, data: &'a [u8])
        -> BoxFuture<'a, GlobalOutcome>;
}

/// Synchronous closures are accepted directly as global-request handlers.
impl<F> GlobalRequestHandler for F
where
    F: FnMut(GlobalContext<'_>, &[u8]) -> GlobalOutcome + Send,
{
    fn handle<'a>(
        &'a mut self,
        ctx: GlobalContext<'a>,
        data: &'a [u8],
    ) -> BoxFuture<'a, GlobalOutcome> {
        future::ready(self(ctx, data)).boxed()
    }
}

/// The connection's routing tables, populated at construction.
#[derive(Default)]
pub struct Registry {
    channel_factories: HashMap<String, Box<dyn ChannelFactory>>,
    global_handlers: HashMap<String, Box<dyn GlobalRequestHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory consulted for `CHANNEL_OPEN` messages naming
    /// `channel_type`. Replaces any previous factory for that type.
    pub fn register_channel_type<F>(&mut self, channel_type: &str, factory: F)
    where
        F: ChannelFactory + 'static,
    {
        self.channel_factories
            .insert(channel_type.to_string(), Box::new(factory));
    }

    /// Register the handler consulted for `GLOBAL_REQUEST` messages naming
    /// `request_type`. Replaces any previous handler for that type.
    pub fn register_global_request<H>(&mut self, request_type: &str, handler: H)
    where
        H: GlobalRequestHandler + 'static,
    {
        self.global_handlers
            .insert(request_type.to_string(), Box::new(handler));
    }

    pub(crate) fn channel_factory_mut(
        &mut self,
        channel_type: &str,
    ) -> Option<&mut Box<dyn ChannelFactory>> {
        self.channel_factories.get_mut(channel_type)
    }

    pub(crate) fn global_handler_mut(
        &mut self,
        request_type: &str,
    ) -> Option<&mut Box<dyn GlobalRequestHandler>> {
        self.global_handlers.get_mut(request_type)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "channel_types",
                &self.channel_factories.keys().collect::<Vec<_>>(),
            )
            .field(
                "global_requests",
                &self.global_handlers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
