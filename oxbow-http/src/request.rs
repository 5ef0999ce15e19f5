use std::ops::Range;
use std::str;

use crate::method::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Byte ranges of one header's name and value within the receive buffer.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    pub name: Range<usize>,
    pub value: Range<usize>,
}

/// A parsed request. All positions are offsets into the receive buffer the
/// request was parsed from; the buffer itself is owned by the connection.
/// The record is reused across requests on the same connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub version: Version,
    /// Full request target, query included.
    pub uri: Range<usize>,
    /// Path portion of the target.
    pub path: Range<usize>,
    /// Query portion, without the `?`. Empty range at `path.end` when absent.
    pub query: Option<Range<usize>>,
    pub headers: Vec<HeaderIndex>,
    /// Body bytes; empty until body framing completes.
    pub body: Range<usize>,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            method: Method::Get,
            version: Version::Http11,
            uri: 0..0,
            path: 0..0,
            query: None,
            headers: Vec::new(),
            body: 0..0,
        }
    }
}

impl Request {
    /// Reset for reuse, keeping the header index capacity.
    pub fn clear(&mut self) {
        self.method = Method::Get;
        self.version = Version::Http11;
        self.uri = 0..0;
        self.path = 0..0;
        self.query = None;
        self.headers.clear();
        self.body = 0..0;
    }

    pub fn uri_str<'b>(&self, buf: &'b [u8]) -> &'b str {
        str::from_utf8(&buf[self.uri.clone()]).unwrap_or("")
    }

    pub fn path_str<'b>(&self, buf: &'b [u8]) -> &'b str {
        str::from_utf8(&buf[self.path.clone()]).unwrap_or("")
    }

    pub fn query_str<'b>(&self, buf: &'b [u8]) -> Option<&'b str> {
        let span = self.query.as_ref()?;
        str::from_utf8(&buf[span.clone()]).ok()
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header<'b>(&self, buf: &'b [u8], name: &str) -> Option<&'b [u8]> {
        self.headers.iter().find_map(|h| {
            let field = &buf[h.name.clone()];
            if field.eq_ignore_ascii_case(name.as_bytes()) {
                Some(&buf[h.value.clone()])
            } else {
                None
            }
        })
    }

    pub fn header_str<'b>(&self, buf: &'b [u8], name: &str) -> Option<&'b str> {
        str::from_utf8(self.header(buf, name)?).ok()
    }

    pub fn body_bytes<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.body.clone()]
    }
}
