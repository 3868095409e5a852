//! # Core Protocol Components
//!
//! Low-level wire primitives and packet framing.
//!
//! This module provides the foundation the multiplexer is built on: the
//! binary encoding of payload fields and the `(type, payload)` packet unit
//! exchanged with the transport.
//!
//! ## Components
//! - **Wire**: Length-prefixed strings and big integers used inside payloads
//! - **Packet**: The decoded message unit plus a codec for byte-stream glue

pub mod packet;
pub mod wire;
