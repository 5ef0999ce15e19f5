//! The contract between the engine and route handlers.
//!
//! A handler gets a [`Context`] borrowing the connection's provision and
//! returns a boxed local future. While that future is pending the
//! connection is parked: no I/O is outstanding against its provision, and
//! the future's completion is what re-enters the state machine. The
//! returned [`Flow`] picks the next job: send the response, or go back to
//! receiving without one. Handlers needing background work spawn it on the
//! ambient worker runtime with `monoio::spawn`.

use std::ops::Range;
use std::str;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;
use oxbow_http::request::Request;
use oxbow_http::response::Response;

use crate::arena::Arena;

/// What the state machine does once the handler future resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Render `response` and enter the send job.
    Respond,
    /// Skip the response and re-arm recv.
    Receive,
}

/// A handler's view of the connection while it runs.
pub struct Context<'a> {
    pub request: &'a Request,
    /// The raw request bytes every `Request` range points into.
    pub bytes: &'a [u8],
    pub response: &'a mut Response,
    pub arena: &'a mut Arena,
    pub captures: &'a [(Arc<str>, Range<usize>)],
    pub queries: &'a [(Range<usize>, Range<usize>)],
}

impl<'a> Context<'a> {
    pub fn path(&self) -> &'a str {
        self.request.path_str(self.bytes)
    }

    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.request.header(self.bytes, name)
    }

    pub fn body(&self) -> &'a [u8] {
        self.request.body_bytes(self.bytes)
    }

    /// Value of the route capture `name`, e.g. `id` for a `/users/:id`
    /// route.
    pub fn capture(&self, name: &str) -> Option<&'a str> {
        self.captures.iter().find_map(|(n, span)| {
            if &**n == name {
                str::from_utf8(&self.bytes[span.clone()]).ok()
            } else {
                None
            }
        })
    }

    /// Value of the first query pair named `name`.
    pub fn query(&self, name: &str) -> Option<&'a str> {
        self.queries.iter().find_map(|(k, v)| {
            if &self.bytes[k.clone()] == name.as_bytes() {
                str::from_utf8(&self.bytes[v.clone()]).ok()
            } else {
                None
            }
        })
    }
}

pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, cx: Context<'a>) -> LocalBoxFuture<'a, Flow>;
}

/// Plain function handlers, enough for routes without captured state.
pub type HandlerFn = for<'a> fn(Context<'a>) -> LocalBoxFuture<'a, Flow>;

impl Handler for HandlerFn {
    fn handle<'a>(&'a self, cx: Context<'a>) -> LocalBoxFuture<'a, Flow> {
        (self)(cx)
    }
}

impl Handler for Box<dyn Handler> {
    fn handle<'a>(&'a self, cx: Context<'a>) -> LocalBoxFuture<'a, Flow> {
        (**self).handle(cx)
    }
}
