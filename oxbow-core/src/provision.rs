//! The per-connection state record and its job state machine vocabulary.

use std::ops::Range;
use std::sync::Arc;

use oxbow_http::request::Request;
use oxbow_http::response::Response;

use crate::arena::Arena;
use crate::config::Config;
use crate::pseudoslice::Pseudoslice;

/// Request parse phase tracked across receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    /// Headers are parsed; `header_end` is the offset of the first body byte
    /// in the receive accumulator.
    Body { header_end: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Recv,
    Send,
}

/// How send windows leave the machine: raw, or encrypted through the
/// session's record layer with its own staging buffer and drain cursor.
pub enum SendMode {
    Plain,
    Tls {
        encrypted: Vec<u8>,
        encrypted_count: usize,
    },
}

/// The connection's current job. Exactly one I/O operation is in flight per
/// provision whose job is not `Empty`; every completion path asserts the
/// variant it expects.
pub enum Job {
    /// In the free pool.
    Empty,
    /// Driving the TLS handshake; `count` is the continuation cycle.
    Handshake { phase: HandshakePhase, count: usize },
    /// Awaiting request bytes; `count` is raw bytes received this request.
    Recv { count: usize },
    /// Draining a response; `count` is plaintext bytes consumed from `slice`.
    Send {
        slice: Pseudoslice,
        count: usize,
        mode: SendMode,
    },
    /// A close is in flight.
    Close,
}

impl Job {
    pub fn is_empty(&self) -> bool {
        matches!(self, Job::Empty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::Empty => "empty",
            Job::Handshake { .. } => "handshake",
            Job::Recv { .. } => "recv",
            Job::Send { .. } => "send",
            Job::Close => "close",
        }
    }
}

/// Everything one connection owns: buffers, arena, the parsed request and
/// the response under construction, route match storage, and the current
/// job. Created once per pool slot at startup and reused forever; the
/// socket itself lives with the connection task.
pub struct Provision {
    /// Stable slot id; pairs this provision with its TLS slot.
    pub index: usize,
    /// Socket scratch: receives land here before decryption/append, and
    /// plaintext send windows are staged here on the way out.
    pub buffer: Vec<u8>,
    /// Decrypted request bytes accumulated across receives.
    pub recv_buffer: Vec<u8>,
    pub arena: Arena,
    pub request: Request,
    pub response: Response,
    pub captures: Vec<(Arc<str>, Range<usize>)>,
    pub queries: Vec<(Range<usize>, Range<usize>)>,
    pub stage: Stage,
    pub job: Job,
    /// Rendered response headers; moves into the pseudoslice during a send.
    pub(crate) header_buf: Vec<u8>,
    /// Straddle staging for the pseudoslice; moves with `header_buf`.
    pub(crate) scratch: Vec<u8>,
    /// Encrypted record staging under TLS; moves into `SendMode::Tls`.
    pub(crate) encrypted_buf: Vec<u8>,
}

impl Provision {
    pub fn new(index: usize, config: &Config) -> Self {
        Provision {
            index,
            buffer: Vec::with_capacity(config.size_socket_buffer),
            recv_buffer: Vec::with_capacity(config.size_recv_buffer_retain),
            arena: Arena::with_capacity(config.size_connection_arena_retain),
            request: Request::default(),
            response: Response::default(),
            captures: Vec::with_capacity(config.num_captures_max),
            queries: Vec::with_capacity(config.num_queries_max),
            stage: Stage::Header,
            job: Job::Empty,
            header_buf: Vec::new(),
            scratch: Vec::new(),
            encrypted_buf: if config.security.is_tls() {
                Vec::with_capacity(config.size_tls_buffer())
            } else {
                Vec::new()
            },
        }
    }

    /// Take back the buffers a finished send borrowed.
    pub fn reclaim(&mut self, slice: Pseudoslice) {
        let (mut header, mut scratch) = slice.into_buffers();
        header.clear();
        scratch.clear();
        self.header_buf = header;
        self.scratch = scratch;
    }

    /// Between requests on a live connection: drop request state, reset the
    /// arena to its retain limit and shrink the accumulator.
    pub fn reset_for_next_request(&mut self, config: &Config) {
        self.arena.reset(config.size_connection_arena_retain);
        shrink_retain(&mut self.recv_buffer, config.size_recv_buffer_retain);
        self.request.clear();
        self.response.clear();
        self.captures.clear();
        self.queries.clear();
        self.stage = Stage::Header;
    }

    /// After close: same as between requests, plus the job goes empty so the
    /// provision can be released.
    pub fn reset_on_close(&mut self, config: &Config) {
        self.reset_for_next_request(config);
        self.job = Job::Empty;
    }
}

/// Clear `buf`, releasing capacity above `retain`.
pub(crate) fn shrink_retain(buf: &mut Vec<u8>, retain: usize) {
    if buf.capacity() > retain {
        *buf = Vec::with_capacity(retain);
    } else {
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_provision_is_empty_and_sized() {
        let config = Config::default();
        let p = Provision::new(3, &config);
        assert_eq!(p.index, 3);
        assert!(p.job.is_empty());
        assert_eq!(p.stage, Stage::Header);
        assert!(p.buffer.capacity() >= config.size_socket_buffer);
        assert_eq!(p.encrypted_buf.capacity(), 0);
    }

    #[test]
    fn reset_between_requests_retains_bounded_memory() {
        let config = Config {
            size_connection_arena_retain: 64,
            size_recv_buffer_retain: 32,
            ..Config::default()
        };
        let mut p = Provision::new(0, &config);
        p.recv_buffer.extend_from_slice(&vec![0u8; 8192]);
        p.arena.alloc(&vec![0u8; 8192]);
        p.stage = Stage::Body { header_end: 10 };

        p.reset_for_next_request(&config);
        assert_eq!(p.stage, Stage::Header);
        assert!(p.recv_buffer.is_empty());
        assert_eq!(p.recv_buffer.capacity(), 32);
        assert_eq!(p.arena.capacity(), 64);
        assert_eq!(p.arena.len(), 0);
    }

    #[test]
    fn reclaim_returns_send_buffers() {
        let config = Config::default();
        let mut p = Provision::new(0, &config);
        let slice = Pseudoslice::new(b"HTTP/1.1 200 OK\r\n\r\n".to_vec(), Default::default(), Vec::new());
        p.reclaim(slice);
        assert!(p.header_buf.is_empty());
        assert!(p.header_buf.capacity() >= 19);
    }

    #[test]
    fn job_names() {
        assert_eq!(Job::Empty.name(), "empty");
        assert_eq!(Job::Close.name(), "close");
        assert_eq!(Job::Recv { count: 0 }.name(), "recv");
    }
}
