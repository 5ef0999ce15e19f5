//! The oxbow server engine.
//!
//! A single-threaded-per-worker HTTP/1.1 engine on monoio's completion-based
//! runtime. Each worker owns a fixed pool of [`provision::Provision`]s; a
//! connection borrows one, runs the recv/handshake/send/close job state
//! machine in [`server`], and releases it on close. TLS record framing,
//! incremental request assembly and chunked back-pressured sends all happen
//! on that one state machine.

pub mod arena;
pub mod config;
pub mod pool;
pub mod provision;
pub mod pseudoslice;
pub mod runtime;
pub mod server;
pub mod tls;

mod error;
pub use error::{AnyError, AnyResult};
