//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and decode server replies for the async
//! transports, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Incremental Decoding**: `decode` works on whatever bytes have arrived
//!    and returns `Ok(None)` until a whole frame is buffered.
//! 2. **Buffer Reuse**: Callers own the read buffer; only complete frames are
//!    consumed from it.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for the null array an aborted `EXEC` returns.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Builds a simple-string reply.
    pub fn simple(text: &str) -> Self {
        RespValue::Simple(text.as_bytes().to_vec())
    }

    /// Builds an error reply.
    pub fn error(text: &str) -> Self {
        RespValue::Error(text.as_bytes().to_vec())
    }

    /// Builds a non-null bulk string reply.
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::Bulk(Some(data.into()))
    }

    /// Returns the textual payload of simple or bulk strings.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(data) | RespValue::Bulk(Some(data)) => {
                Some(String::from_utf8_lossy(data).into_owned())
            }
            _ => None,
        }
    }

    /// Returns the error message when this is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Appends the wire form of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::Simple(text) => push_line(out, b'+', text),
            RespValue::Error(text) => push_line(out, b'-', text),
            RespValue::Integer(value) => push_line(out, b':', value.to_string().as_bytes()),
            RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                out.push(b'$');
                push_usize(out, data.len());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.push(b'*');
                push_usize(out, items.len());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Decodes one complete value from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when the frame is incomplete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
    RespDecoder::new().decode(buf)
}

/// Incremental decoder that remembers how many bytes an incomplete frame
/// still needs.
///
/// A large bulk reply arriving over many reads is parsed once its declared
/// length is buffered, instead of once per read.
#[derive(Debug, Default, Clone)]
pub struct RespDecoder {
    /// Lower bound on the buffer length before parsing can make progress.
    need: usize,
}

impl RespDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one complete value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is incomplete.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
        if buf.len() < self.need {
            return Ok(None);
        }
        match parse_value(&buf[..], 0)? {
            Parsed::Complete(value, consumed) => {
                buf.advance(consumed);
                self.need = 0;
                Ok(Some(value))
            }
            Parsed::Incomplete(need) => {
                self.need = need;
                Ok(None)
            }
        }
    }
}

enum Parsed {
    /// A value and the offset just past it.
    Complete(RespValue, usize),
    /// The buffer must grow to at least this many bytes first.
    Incomplete(usize),
}

fn parse_value(data: &[u8], pos: usize) -> Result<Parsed, ProtocolError> {
    let (line, next) = match read_line(data, pos)? {
        Some(found) => found,
        None => return Ok(Parsed::Incomplete(data.len() + 1)),
    };
    let (&kind, body) = match line.split_first() {
        Some(split) => split,
        None => return Err(ProtocolError::InvalidType(b'\r')),
    };

    match kind {
        b'+' => Ok(Parsed::Complete(RespValue::Simple(body.to_vec()), next)),
        b'-' => Ok(Parsed::Complete(RespValue::Error(body.to_vec()), next)),
        b':' => Ok(Parsed::Complete(RespValue::Integer(parse_i64(body)?), next)),
        b'$' => {
            let len = parse_i64(body)?;
            if len < 0 {
                return Ok(Parsed::Complete(RespValue::Bulk(None), next));
            }
            let end = next
                .checked_add(len as usize)
                .ok_or(ProtocolError::InvalidInteger)?;
            if data.len() < end + 2 {
                return Ok(Parsed::Incomplete(end + 2));
            }
            if &data[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            Ok(Parsed::Complete(
                RespValue::Bulk(Some(data[next..end].to_vec())),
                end + 2,
            ))
        }
        b'*' => {
            let len = parse_i64(body)?;
            if len < 0 {
                return Ok(Parsed::Complete(RespValue::Array(None), next));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse_value(data, cursor)? {
                    Parsed::Complete(item, after) => {
                        items.push(item);
                        cursor = after;
                    }
                    incomplete => return Ok(incomplete),
                }
            }
            Ok(Parsed::Complete(RespValue::Array(Some(items)), cursor))
        }
        other => Err(ProtocolError::InvalidType(other)),
    }
}

/// Finds the CRLF-terminated line starting at `pos`.
fn read_line(data: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let rest = match data.get(pos..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    let newline = match rest.iter().position(|&b| b == b'\n') {
        Some(offset) => pos + offset,
        None => return Ok(None),
    };
    if newline == pos || data[newline - 1] != b'\r' {
        return Err(ProtocolError::MissingCrlf);
    }
    Ok(Some((&data[pos..newline - 1], newline + 1)))
}

fn parse_i64(data: &[u8]) -> Result<i64, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

fn push_line(out: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    out.push(prefix);
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go into a stack buffer to avoid a heap allocation per frame.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
