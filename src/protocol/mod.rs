//! # Protocol Layer
//!
//! The multiplexing protocol proper: message definitions, per-channel flow
//! control, the connection multiplexer, and the handler registries it routes
//! through.
//!
//! ## Components
//! - **Message**: numeric message types and typed payload codecs
//! - **Channel**: one flow-controlled stream and its handler hooks
//! - **Mux**: the connection multiplexer owning all per-connection state
//! - **Dispatcher**: channel-type factory and global-request registries

pub mod channel;
pub mod dispatcher;
pub mod message;
pub mod mux;
