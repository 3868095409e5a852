//! # Wire Primitives
//!
//! Binary encoding primitives shared by every message payload: length-prefixed
//! byte strings and arbitrary-precision positive integers.
//!
//! ## Wire Format
//! ```text
//! string:  [Length(4, BE)] [Bytes(N)]
//! mpint:   [Length(4, BE)] [Magnitude(N)]   leading 0x00 inserted when the
//!                                           first magnitude byte has its high
//!                                           bit set; zero is Length = 0
//! ```
//!
//! Readers never panic on short input; a truncated buffer surfaces as
//! [`MuxError::Truncated`] so a malformed peer cannot crash dispatch.

use crate::error::{MuxError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Cursor for building message payloads.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a length-prefixed byte string.
    pub fn put_string(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    /// Append a positive big integer given as a big-endian magnitude.
    ///
    /// Leading zero bytes of the magnitude are stripped; a single zero byte is
    /// re-inserted when the top bit of the first significant byte is set so
    /// the value cannot be misread as negative. An empty or all-zero
    /// magnitude encodes as a zero-length integer.
    pub fn put_mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let first = magnitude.iter().position(|&b| b != 0);
        match first {
            None => {
                self.buf.put_u32(0);
            }
            Some(idx) => {
                let body = &magnitude[idx..];
                let pad = usize::from(body[0] & 0x80 != 0);
                self.buf.put_u32((body.len() + pad) as u32);
                if pad == 1 {
                    self.buf.put_u8(0);
                }
                self.buf.put_slice(body);
            }
        }
        self
    }

    /// Append raw bytes with no length prefix (trailing type-specific data).
    pub fn put_raw(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Cursor for decoding message payloads.
#[derive(Debug)]
pub struct WireReader<'a> {
    rest: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }

    fn need(&self, context: &'static str, len: usize) -> Result<()> {
        if self.rest.len() < len {
            return Err(MuxError::Truncated {
                context,
                needed: len - self.rest.len(),
            });
        }
        Ok(())
    }

    pub fn take_u8(&mut self, context: &'static str) -> Result<u8> {
        self.need(context, 1)?;
        let value = self.rest[0];
        self.rest = &self.rest[1..];
        Ok(value)
    }

    pub fn take_bool(&mut self, context: &'static str) -> Result<bool> {
        Ok(self.take_u8(context)? != 0)
    }

    pub fn take_u32(&mut self, context: &'static str) -> Result<u32> {
        self.need(context, 4)?;
        let (head, rest) = self.rest.split_at(4);
        self.rest = rest;
        Ok(u32::from_be_bytes([head[0], head[1], head[2], head[3]]))
    }

    /// Read a length-prefixed byte string.
    pub fn take_string(&mut self, context: &'static str) -> Result<&'a [u8]> {
        let len = self.take_u32(context)? as usize;
        self.need(context, len)?;
        let (body, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(body)
    }

    /// Read a length-prefixed UTF-8 string, rejecting invalid encodings.
    pub fn take_utf8(&mut self, context: &'static str) -> Result<&'a str> {
        let body = self.take_string(context)?;
        std::str::from_utf8(body)
            .map_err(|_| MuxError::MalformedPayload(format!("{context}: invalid utf-8")))
    }

    /// Read a positive big integer, returning its big-endian magnitude with
    /// any sign-padding zero byte stripped.
    pub fn take_mpint(&mut self, context: &'static str) -> Result<&'a [u8]> {
        let body = self.take_string(context)?;
        let first = body.iter().position(|&b| b != 0).unwrap_or(body.len());
        Ok(&body[first..])
    }

    /// Consume and return everything left in the payload.
    pub fn take_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.rest)
    }

    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }
}
