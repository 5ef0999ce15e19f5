use std::borrow::Cow;
use std::ops::Range;

use crate::status::Status;

/// Response body storage. `Arena` refers to a span the handler allocated in
/// the connection's arena; it stays valid until the arena resets after the
/// response is fully sent.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Static(&'static [u8]),
    Arena(Range<usize>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Static(bytes) => bytes.len(),
            Body::Arena(span) => span.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A header value: either a static string or an arena span.
#[derive(Debug, Clone)]
pub enum Text {
    Static(&'static str),
    Arena(Range<usize>),
}

/// Response under construction on a connection. Reused between requests.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(Cow<'static, str>, Text)>,
    pub body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: Status::Ok,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }
}

impl Response {
    /// Set a status with its stock body, e.g. `404 Not Found`.
    pub fn set(&mut self, status: Status) {
        self.status = status;
        self.body = Body::Static(status.default_body().as_bytes());
    }

    pub fn set_with_body(&mut self, status: Status, body: Body) {
        self.status = status;
        self.body = body;
    }

    pub fn header(&mut self, name: impl Into<Cow<'static, str>>, value: Text) {
        self.headers.push((name.into(), value));
    }

    /// Reset for reuse, keeping the header list capacity.
    pub fn clear(&mut self) {
        self.status = Status::Ok;
        self.headers.clear();
        self.body = Body::Empty;
    }
}

/// Render the status line and headers into `buf`. Arena-backed header values
/// are resolved through `resolve`. The body is not written here; the send
/// path streams it straight out of the pseudoslice.
pub fn render_headers_into<'a, F>(buf: &mut Vec<u8>, response: &Response, body_len: usize, resolve: F)
where
    F: Fn(Range<usize>) -> &'a [u8],
{
    use std::io::Write;

    debug_assert!(!response.status.is_kill(), "kill is not a wire status");

    // Writes into a Vec cannot fail.
    let _ = write!(
        buf,
        "HTTP/1.1 {} {}\r\nServer: oxbow\r\nContent-Length: {}\r\n",
        response.status.code(),
        response.status.reason(),
        body_len,
    );

    for (name, value) in &response.headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        match value {
            Text::Static(s) => buf.extend_from_slice(s.as_bytes()),
            Text::Arena(span) => buf.extend_from_slice(resolve(span.clone())),
        }
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_status_line_and_length() {
        let mut response = Response::default();
        response.set(Status::NotFound);
        let mut buf = Vec::new();
        render_headers_into(&mut buf, &response, response.body.len(), |_| &[]);
        assert_eq!(
            buf,
            b"HTTP/1.1 404 Not Found\r\nServer: oxbow\r\nContent-Length: 13\r\n\r\n"
        );
    }

    #[test]
    fn render_static_and_resolved_headers() {
        let arena: &[u8] = b"GET, POST";
        let mut response = Response::default();
        response.set_with_body(Status::MethodNotAllowed, Body::Empty);
        response.header("Allow", Text::Arena(0..9));
        response.header("X-Frame", Text::Static("deny"));

        let mut buf = Vec::new();
        render_headers_into(&mut buf, &response, 0, |span| &arena[span]);
        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(text.contains("\r\nAllow: GET, POST\r\n"));
        assert!(text.contains("\r\nX-Frame: deny\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn clear_keeps_header_capacity() {
        let mut response = Response::default();
        response.header("A", Text::Static("1"));
        response.header("B", Text::Static("2"));
        let cap = response.headers.capacity();
        response.clear();
        assert!(response.headers.is_empty());
        assert_eq!(response.headers.capacity(), cap);
        assert!(response.body.is_empty());
    }
}
