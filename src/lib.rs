//! # session-mux
//!
//! Connection-multiplexing core for secure remote-session protocols.
//!
//! This crate implements the layer that lets many independent logical
//! streams (shells, subsystems, TCP forwards) share one authenticated,
//! encrypted byte connection. Each channel carries its own flow-control
//! window in both directions; connection-wide concerns (notably remote port
//! forwarding) travel as global requests correlated strictly first-in
//! first-out.
//!
//! ## Architecture
//! ```text
//! transport (collaborator)        this crate
//! ┌──────────────────┐   packets   ┌─────────────────────────────┐
//! │ framing, crypto, ├────────────►│ Connection ── dispatch ──┐  │
//! │ authentication   │◄────────────┤   channel table          │  │
//! └──────────────────┘  PacketSink │   request FIFOs          ▼  │
//!                                  │   listener manager   Channel │
//!                                  └─────────────────────────────┘
//! ```
//!
//! ## Quick Start
//! ```ignore
//! use session_mux::config::MuxConfig;
//! use session_mux::protocol::channel::Channel;
//! use session_mux::protocol::mux::Connection;
//! use session_mux::transport::queue_sink;
//! use std::sync::Arc;
//!
//! let (sink, outbound) = queue_sink();
//! let mut conn = Connection::new(Arc::new(sink), MuxConfig::default());
//! let id = conn.open_channel("session", Channel::default(), MyHandler, &[])?;
//! // feed decoded inbound packets: conn.dispatch(msg_type, payload).await?
//! ```
//!
//! ## Modules
//! - [`core`]: wire primitives and packet framing
//! - [`protocol`]: messages, channels, the multiplexer, handler registries
//! - [`service`]: remote port forwarding
//! - [`transport`]: the packet-sink boundary and byte-stream glue
//! - [`config`], [`error`]: configuration and the error taxonomy

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;

pub use config::{ChannelConfig, MuxConfig};
pub use error::{MuxError, Result};
pub use protocol::channel::{Channel, ChannelHandler, FlowEvent, RequestOutcome};
pub use protocol::dispatcher::{GlobalOutcome, OpenRejection, Registry};
pub use protocol::message::{MessageType, OpenFailureReason};
pub use protocol::mux::{ChannelCtx, Connection, PendingReply};
pub use service::forward::{ForwardTarget, ForwardedAccept, ListenerManager};
pub use transport::{queue_sink, PacketSink};
