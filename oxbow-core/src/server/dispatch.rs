//! Response dispatch: turn a finalized response into a send job.

use oxbow_http::response::render_headers_into;

use crate::provision::{Job, Provision, SendMode};
use crate::pseudoslice::Pseudoslice;

pub(crate) enum Dispatch {
    /// A plain send job is installed on the provision. Under TLS the caller
    /// pre-encrypts the first window before arming the write.
    Send,
    /// The handler asked the worker to stop.
    Kill,
}

/// Render the response headers, build the pseudoslice and install the send
/// job with `count = 0`. Observing [`Status::Kill`] here, at the boundary
/// into send, is what stops the worker.
pub(crate) fn dispatch(provision: &mut Provision) -> Dispatch {
    let Provision {
        arena,
        response,
        header_buf,
        scratch,
        job,
        ..
    } = provision;

    if response.status.is_kill() {
        tracing::info!("kill status reached the send boundary, stopping worker");
        return Dispatch::Kill;
    }

    tracing::debug!(
        status = response.status.code(),
        reason = response.status.reason(),
        "response"
    );

    let body = std::mem::take(&mut response.body);
    let mut header = std::mem::take(header_buf);
    header.clear();
    let arena: &crate::arena::Arena = arena;
    render_headers_into(&mut header, response, body.len(), |span| arena.get(span));
    response.headers.clear();

    let slice = Pseudoslice::new(header, body, std::mem::take(scratch));
    *job = Job::Send {
        slice,
        count: 0,
        mode: SendMode::Plain,
    };
    Dispatch::Send
}
