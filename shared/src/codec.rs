//! Request framing and form-body codec
//!
//! Inbound commands arrive as a single HTTP-like request per connection:
//! ```text
//! [ request line ][ headers incl. Content-Length ][ blank line ][ key=value&key=value ]
//! ```
//!
//! Only two things about the header block matter: where it ends, and the
//! declared `Content-Length` that locates the parameter block after it.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::protocol::MAX_REQUEST_BYTES;

/// Errors that can occur while framing or parsing a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Request has no Content-Length header before the parameters")]
    MissingContentLength,

    #[error("Invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Request too large: {0} bytes (max: {MAX_REQUEST_BYTES})")]
    RequestTooLarge(usize),

    #[error("Connection closed mid-request with {available} bytes buffered")]
    Incomplete { available: usize },

    #[error("Body contains no key=value parameters")]
    NoParameters,

    #[error("Request is not valid UTF-8")]
    NotUtf8,
}

/// A framed request: request line parts plus the declared body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: String,
    pub target: String,
    pub body: Bytes,
}

impl RawRequest {
    /// Parse the body as a form
    pub fn form(&self) -> Result<FormParams, CodecError> {
        let body = std::str::from_utf8(&self.body).map_err(|_| CodecError::NotUtf8)?;
        parse_form(body)
    }
}

/// Try to decode one request from the front of a buffer
///
/// Returns:
/// - `Ok(Some(request))` once the header block and the declared body are present
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data can never become a valid request
pub fn decode(buf: &mut BytesMut) -> Result<Option<RawRequest>, CodecError> {
    let Some((head_len, separator_len)) = find_header_end(buf) else {
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(CodecError::RequestTooLarge(buf.len()));
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..head_len]).map_err(|_| CodecError::NotUtf8)?;
    let content_length = content_length(head)?;

    let body_start = head_len + separator_len;
    let total_len = body_start.saturating_add(content_length);
    if total_len > MAX_REQUEST_BYTES {
        return Err(CodecError::RequestTooLarge(total_len));
    }

    // Wait for the rest of the declared body
    if buf.len() < total_len {
        return Ok(None);
    }

    let (method, target) = request_line(head);

    buf.advance(body_start);
    let body = buf.split_to(content_length).freeze();

    // One request per connection: anything past the declared body is noise
    buf.clear();

    Ok(Some(RawRequest {
        method,
        target,
        body,
    }))
}

/// Locate the blank line ending the header block, returning its offset and length
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));

    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_length(head: &str) -> Result<usize, CodecError> {
    let value = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim())
        .ok_or(CodecError::MissingContentLength)?;

    value
        .parse::<usize>()
        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))
}

fn request_line(head: &str) -> (String, String) {
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    (method, target)
}

/// Decoder state machine for reading a request off a stream
#[derive(Debug, Default)]
pub struct RequestDecoder {
    /// Bytes received so far
    buffer: BytesMut,
}

impl RequestDecoder {
    /// Create a new request decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_REQUEST_BYTES),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the request from the buffer
    pub fn decode_next(&mut self) -> Result<Option<RawRequest>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Call when the peer closed the stream; a half-received request is an error
    pub fn finish(&mut self) -> Result<RawRequest, CodecError> {
        match self.decode_next()? {
            Some(request) => Ok(request),
            None => Err(CodecError::Incomplete {
                available: self.buffer.len(),
            }),
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Decoded `key=value&...` parameters.
///
/// A key that appears more than once keeps its **last** value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FormParams {
    entries: BTreeMap<String, String>,
}

impl FormParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Field names, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Re-parse the value under `key` as a form of its own
    pub fn nested(&self, key: &str) -> Option<FormParams> {
        self.get(key).and_then(|value| parse_form(value).ok())
    }
}

// Values may carry secrets, so only keys are printed
impl fmt::Debug for FormParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// Parse an `application/x-www-form-urlencoded` body.
///
/// Segments are split on `&`, then on the first `=`. Empty segments are
/// skipped and a segment without `=` is a key with an empty value.
pub fn parse_form(input: &str) -> Result<FormParams, CodecError> {
    let mut entries = BTreeMap::new();
    let mut saw_pair = false;

    for segment in input.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = match segment.split_once('=') {
            Some((key, value)) => {
                saw_pair = true;
                (key, value)
            }
            None => (segment, ""),
        };
        entries.insert(percent_decode(key), percent_decode(value));
    }

    if !saw_pair {
        return Err(CodecError::NoParameters);
    }

    Ok(FormParams { entries })
}

/// Encode pairs as an `application/x-www-form-urlencoded` body
pub fn encode_form(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        percent_encode_into(key, &mut out);
        out.push('=');
        percent_encode_into(value, &mut out);
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn percent_encode_into(input: &str, out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    for &byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(HEX[usize::from(byte >> 4)] as char);
                out.push(HEX[usize::from(byte & 0x0f)] as char);
            }
        }
    }
}
