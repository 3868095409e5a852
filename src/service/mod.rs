//! # Connection Services
//!
//! Higher-level facilities built into the multiplexer.
//!
//! ## Components
//! - **Forward**: remote port-forwarding listeners, bindings, and the
//!   built-in `tcpip-forward` / `cancel-tcpip-forward` handlers

pub mod forward;
