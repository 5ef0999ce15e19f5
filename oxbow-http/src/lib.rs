//! HTTP/1.1 protocol pieces consumed by the oxbow server engine: the method
//! and status vocabulary, a range-indexed request representation, the typed
//! header parser, response construction and rendering, and the router.
//!
//! Everything here works over borrowed byte buffers. Parsed requests and
//! route captures are stored as offset ranges into the engine's receive
//! buffer, so nothing in this crate owns request data.

pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod status;

pub use method::Method;
pub use parser::{content_length, parse_headers, ParseError, ParseLimits};
pub use request::{Request, Version};
pub use response::{render_headers_into, Body, Response, Text};
pub use router::{parse_query, Found, MethodSet, Router};
pub use status::Status;
