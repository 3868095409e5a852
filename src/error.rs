//! # Error Types
//!
//! Comprehensive error handling for the multiplexing layer.
//!
//! This module defines all error variants that can occur while multiplexing
//! channels over a connection, from malformed payloads to protocol violations.
//!
//! ## Error Categories
//! - **Wire Errors**: Truncated or malformed message payloads
//! - **Protocol Errors**: Unknown channel ids, unmatched replies, bad types
//! - **Request Errors**: Denied or timed-out request completions
//! - **Open Failures**: Structured channel-open rejections from the peer
//! - **I/O Errors**: Socket failures surfaced by the forwarding listeners
//!
//! Open failures and request denials are non-fatal to the connection; an
//! `UnknownChannel` or `ProtocolViolation` means the peer broke framing
//! invariants and the connection should be torn down.

use crate::protocol::message::OpenFailureReason;
use std::io;
use thiserror::Error;

/// Primary error type for all multiplexing operations
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated payload: needed {needed} more bytes for {context}")]
    Truncated {
        context: &'static str,
        needed: usize,
    },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessage(u8),

    #[error("Unknown local channel id: {0}")]
    UnknownChannel(u32),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Channel open failed: {reason} ({description})")]
    OpenFailed {
        reason: OpenFailureReason,
        description: String,
    },

    #[error("Request denied by peer")]
    RequestDenied,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Oversized packet: {0} bytes")]
    OversizedPacket(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using MuxError
pub type Result<T> = std::result::Result<T, MuxError>;
