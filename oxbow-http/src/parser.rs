//! Typed header parsing on top of `httparse`.
//!
//! The engine hands over a complete header block (it already located the
//! `CRLF CRLF` terminator) and receives either a filled-in [`Request`] or a
//! [`ParseError`] that maps one-to-one onto a response status. Header name,
//! value and target positions are recorded as byte ranges into the input
//! buffer, recovered from `httparse`'s borrowed slices by pointer offset.

use std::ops::Range;
use std::str;

use thiserror::Error;

use crate::method::Method;
use crate::request::{HeaderIndex, Request, Version};
use crate::status::Status;

#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    /// Longest accepted request target, in bytes.
    pub uri_max: usize,
    /// Most headers accepted per request.
    pub header_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request exceeds the configured size limit")]
    ContentTooLarge,
    #[error("request carries more headers than the configured limit")]
    TooManyHeaders,
    #[error("malformed request")]
    MalformedRequest,
    #[error("request target exceeds the configured length limit")]
    UriTooLong,
    #[error("unrecognized request method")]
    InvalidMethod,
    #[error("http version not supported")]
    HttpVersionNotSupported,
    #[error("content-length required but absent")]
    LengthRequired,
}

impl ParseError {
    /// The response status reported to the client for this error.
    pub fn status(&self) -> Status {
        match self {
            ParseError::ContentTooLarge => Status::ContentTooLarge,
            ParseError::TooManyHeaders => Status::RequestHeaderFieldsTooLarge,
            ParseError::MalformedRequest => Status::BadRequest,
            ParseError::UriTooLong => Status::UriTooLong,
            ParseError::InvalidMethod => Status::NotImplemented,
            ParseError::HttpVersionNotSupported => Status::HttpVersionNotSupported,
            ParseError::LengthRequired => Status::LengthRequired,
        }
    }
}

fn span_of(base: usize, s: &[u8]) -> Range<usize> {
    let start = s.as_ptr() as usize - base;
    start..start + s.len()
}

/// Parse a complete header block into `req`, reusing its allocations.
///
/// `buf` must end at the first byte past the `CRLF CRLF` terminator; a block
/// `httparse` still considers partial is malformed by definition here.
pub fn parse_headers(buf: &[u8], limits: &ParseLimits, req: &mut Request) -> Result<(), ParseError> {
    let mut table = vec![httparse::EMPTY_HEADER; limits.header_max];
    let mut parsed = httparse::Request::new(&mut table);

    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(ParseError::MalformedRequest),
        Err(httparse::Error::TooManyHeaders) => return Err(ParseError::TooManyHeaders),
        Err(httparse::Error::Version) => return Err(ParseError::HttpVersionNotSupported),
        Err(_) => return Err(ParseError::MalformedRequest),
    }

    let base = buf.as_ptr() as usize;

    let token = parsed.method.ok_or(ParseError::MalformedRequest)?;
    let method = Method::parse(token).ok_or(ParseError::InvalidMethod)?;

    let version = match parsed.version {
        Some(0) => Version::Http10,
        Some(1) => Version::Http11,
        _ => return Err(ParseError::HttpVersionNotSupported),
    };

    let target = parsed.path.ok_or(ParseError::MalformedRequest)?;
    if target.len() > limits.uri_max {
        return Err(ParseError::UriTooLong);
    }

    let uri = span_of(base, target.as_bytes());
    let (path, query) = match target.find('?') {
        Some(i) => (
            uri.start..uri.start + i,
            Some(uri.start + i + 1..uri.end),
        ),
        None => (uri.clone(), None),
    };

    req.clear();
    req.method = method;
    req.version = version;
    req.uri = uri;
    req.path = path;
    req.query = query;
    for h in parsed.headers.iter() {
        req.headers.push(HeaderIndex {
            name: span_of(base, h.name.as_bytes()),
            value: span_of(base, h.value),
        });
    }
    req.body = buf.len()..buf.len();

    Ok(())
}

/// Derive the declared body length. Absent header is `Ok(None)`; the caller
/// decides between "no body" and 411 based on the method's body expectation.
pub fn content_length(req: &Request, buf: &[u8]) -> Result<Option<u64>, ParseError> {
    let raw = match req.header(buf, "content-length") {
        None => return Ok(None),
        Some(v) => v,
    };
    let text = str::from_utf8(raw).map_err(|_| ParseError::MalformedRequest)?;
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ParseError::MalformedRequest)
}
