//! Incremental request assembly.
//!
//! Runs after every receive completion once new plaintext has been appended
//! to the accumulator. Tracks the parse stage on the provision so a request
//! split across any number of receives converges on the same outcome as a
//! single-receive request: find the header terminator, parse the header
//! block, frame the body by `Content-Length`, then route.

use oxbow_http::parser::{content_length, parse_headers, ParseError, ParseLimits};
use oxbow_http::request::Version;
use oxbow_http::response::{Body, Text};
use oxbow_http::router::{parse_query, Found, Router};
use oxbow_http::status::Status;

use crate::config::Config;
use crate::provision::{Provision, Stage};
use crate::server::handler::{Context, Flow, Handler};

/// Outcome of one assembly pass: wait for more bytes, or hand the response
/// to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Recv,
    Send,
}

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Advance assembly over the accumulator. `appended_start` is where the
/// newly received plaintext begins, so the terminator search can span chunk
/// boundaries without rescanning the whole buffer.
pub(crate) async fn advance<H: Handler>(
    provision: &mut Provision,
    router: &Router<H>,
    config: &Config,
    appended_start: usize,
) -> Step {
    match provision.stage {
        Stage::Header => header_stage(provision, router, config, appended_start).await,
        Stage::Body { header_end } => body_stage(provision, router, config, header_end).await,
    }
}

async fn header_stage<H: Handler>(
    provision: &mut Provision,
    router: &Router<H>,
    config: &Config,
    appended_start: usize,
) -> Step {
    let search_from = appended_start.saturating_sub(TERMINATOR.len());
    let header_end = match find_terminator(&provision.recv_buffer[search_from..]) {
        Some(pos) => search_from + pos + TERMINATOR.len(),
        None => return Step::Recv,
    };

    let limits = ParseLimits {
        uri_max: config.size_request_uri_max,
        header_max: config.num_header_max,
    };
    if let Err(err) = parse_headers(&provision.recv_buffer[..header_end], &limits, &mut provision.request)
    {
        tracing::debug!(error = %err, "request rejected");
        provision.response.set(err.status());
        return Step::Send;
    }

    if provision.request.version == Version::Http11
        && provision.request.header(&provision.recv_buffer, "host").is_none()
    {
        provision.response.set_with_body(
            Status::BadRequest,
            Body::Static(br#"Missing "Host" Header"#),
        );
        return Step::Send;
    }

    if !provision.request.method.expects_body() {
        provision.request.body = header_end..header_end;
        return route(provision, router, config).await;
    }

    let declared = match declared_length(provision, config) {
        Ok(n) => n,
        Err(step) => return step,
    };

    let have_after_header = provision.recv_buffer.len() - header_end;
    if have_after_header == declared {
        provision.request.body = header_end..header_end + declared;
        route(provision, router, config).await
    } else if have_after_header < declared {
        provision.stage = Stage::Body { header_end };
        Step::Recv
    } else {
        // More bytes than the declared body. Well-formed clients cannot
        // produce this with one request in flight.
        provision.response.set(Status::BadRequest);
        Step::Send
    }
}

async fn body_stage<H: Handler>(
    provision: &mut Provision,
    router: &Router<H>,
    config: &Config,
    header_end: usize,
) -> Step {
    let declared = match declared_length(provision, config) {
        Ok(n) => n,
        Err(step) => return step,
    };

    let request_length = header_end + declared;
    if request_length > config.size_request_max {
        provision.response.set(Status::ContentTooLarge);
        return Step::Send;
    }

    if provision.recv_buffer.len() >= request_length {
        provision.request.body = header_end..request_length;
        route(provision, router, config).await
    } else {
        Step::Recv
    }
}

/// The body length a body-expecting method declared. Absence is 411,
/// a malformed value 400 (both reported via `Err(Step::Send)` with the
/// response already set).
fn declared_length(provision: &mut Provision, config: &Config) -> Result<usize, Step> {
    match content_length(&provision.request, &provision.recv_buffer) {
        Ok(Some(n)) => {
            // Anything past the admission limit cannot complete anyway.
            if n > config.size_request_max as u64 {
                provision.response.set(Status::ContentTooLarge);
                return Err(Step::Send);
            }
            Ok(n as usize)
        }
        Ok(None) => {
            provision.response.set(Status::LengthRequired);
            Err(Step::Send)
        }
        Err(err) => {
            debug_assert_eq!(err, ParseError::MalformedRequest);
            provision.response.set(err.status());
            Err(Step::Send)
        }
    }
}

async fn route<H: Handler>(provision: &mut Provision, router: &Router<H>, config: &Config) -> Step {
    let Provision {
        request,
        response,
        recv_buffer,
        arena,
        captures,
        queries,
        ..
    } = provision;

    captures.clear();
    queries.clear();

    let path = request.path_str(recv_buffer);
    let found = router.find(
        path,
        request.path.start,
        request.method,
        captures,
        config.num_captures_max,
    );

    match found {
        Found::NotFound => {
            response.set(Status::NotFound);
            Step::Send
        }
        Found::MethodNotAllowed { allow } => {
            response.set(Status::MethodNotAllowed);
            let span = arena.alloc_with(|out| {
                for (i, method) in allow.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    out.extend_from_slice(method.as_str().as_bytes());
                }
            });
            response.header("Allow", Text::Arena(span));
            Step::Send
        }
        Found::Route { handler } => {
            if let Some(query) = request.query.clone() {
                if let Some(text) = request.query_str(recv_buffer) {
                    parse_query(text, query.start, queries, config.num_queries_max);
                }
            }
            let cx = Context {
                request,
                bytes: recv_buffer,
                response,
                arena,
                captures,
                queries,
            };
            match handler.handle(cx).await {
                Flow::Respond => Step::Send,
                Flow::Receive => Step::Recv,
            }
        }
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::LocalBoxFuture;
    use oxbow_http::method::Method;
    use oxbow_http::router::Router;
    use oxbow_http::status::Status;

    use crate::provision::Provision;
    use crate::server::handler::HandlerFn;

    fn index(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
        Box::pin(async move {
            cx.response
                .set_with_body(Status::Ok, Body::Static(b"index page"));
            Flow::Respond
        })
    }

    fn echo(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
        Box::pin(async move {
            let span = cx.arena.alloc(cx.body());
            cx.response.set_with_body(Status::Ok, Body::Arena(span));
            Flow::Respond
        })
    }

    fn greet(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
        Box::pin(async move {
            let name = cx.capture("name").unwrap_or("nobody").to_owned();
            let span = cx.arena.alloc(name.as_bytes());
            cx.response.set_with_body(Status::Ok, Body::Arena(span));
            Flow::Respond
        })
    }

    fn router() -> Router<HandlerFn> {
        let mut r: Router<HandlerFn> = Router::new();
        r.route("/", Method::Get, index as HandlerFn)
            .route("/echo", Method::Post, echo as HandlerFn)
            .route("/greet/:name", Method::Get, greet as HandlerFn);
        r
    }

    fn provision(config: &Config) -> Provision {
        Provision::new(0, config)
    }

    /// Feed `chunks` one at a time, asserting assembly keeps asking for more
    /// until the final chunk, and return the final step.
    async fn feed(
        p: &mut Provision,
        r: &Router<HandlerFn>,
        config: &Config,
        chunks: &[&[u8]],
    ) -> Step {
        let mut last = Step::Recv;
        for (i, chunk) in chunks.iter().enumerate() {
            let appended_start = p.recv_buffer.len();
            p.recv_buffer.extend_from_slice(chunk);
            last = advance(p, r, config, appended_start).await;
            if i + 1 < chunks.len() {
                assert_eq!(last, Step::Recv, "asked to respond before chunk {}", i + 1);
            }
        }
        last
    }

    fn body_text(p: &Provision) -> &[u8] {
        match &p.response.body {
            Body::Static(b) => b,
            Body::Arena(span) => p.arena.get(span.clone()),
            Body::Empty => &[],
        }
    }

    #[monoio::test]
    async fn single_chunk_get_routes() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::Ok);
        assert_eq!(body_text(&p), b"index page");
    }

    // The same request split at every byte position produces the same
    // response as the single-chunk case.
    #[monoio::test]
    async fn header_chunking_is_idempotent() {
        let config = Config::default();
        let r = router();
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        for split in 1..raw.len() {
            let mut p = provision(&config);
            let step = feed(&mut p, &r, &config, &[&raw[..split], &raw[split..]]).await;
            assert_eq!(step, Step::Send, "split at {split}");
            assert_eq!(p.response.status, Status::Ok, "split at {split}");
        }
    }

    #[monoio::test]
    async fn body_framing_across_chunks() {
        let config = Config::default();
        let r = router();
        let raw: &[u8] = b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world";
        for split in 1..raw.len() {
            let mut p = provision(&config);
            let step = feed(&mut p, &r, &config, &[&raw[..split], &raw[split..]]).await;
            assert_eq!(step, Step::Send, "split at {split}");
            assert_eq!(p.response.status, Status::Ok, "split at {split}");
            assert_eq!(body_text(&p), b"hello world", "split at {split}");
        }
    }

    #[monoio::test]
    async fn body_arrives_in_three_pieces() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(
            &mut p,
            &r,
            &config,
            &[
                b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 9\r\n\r\n",
                b"abc",
                b"def",
                b"ghi",
            ],
        )
        .await;
        assert_eq!(step, Step::Send);
        assert_eq!(body_text(&p), b"abcdefghi");
    }

    #[monoio::test]
    async fn missing_host_on_http11() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET / HTTP/1.1\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::BadRequest);
        assert_eq!(body_text(&p), br#"Missing "Host" Header"#);
    }

    #[monoio::test]
    async fn http10_does_not_require_host() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET / HTTP/1.0\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::Ok);
    }

    #[monoio::test]
    async fn post_without_content_length_is_411() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"POST /echo HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::LengthRequired);
    }

    #[monoio::test]
    async fn malformed_content_length_is_400() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(
            &mut p,
            &r,
            &config,
            &[b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: nope\r\n\r\n"],
        )
        .await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::BadRequest);
    }

    #[monoio::test]
    async fn excess_body_bytes_are_400() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(
            &mut p,
            &r,
            &config,
            &[b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\nabcdef"],
        )
        .await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::BadRequest);
    }

    #[monoio::test]
    async fn declared_body_past_the_limit_is_413() {
        let config = Config {
            size_request_max: 128,
            ..Config::default()
        };
        let r = router();
        let mut p = provision(&config);
        let step = feed(
            &mut p,
            &r,
            &config,
            &[b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 4096\r\n\r\n"],
        )
        .await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::ContentTooLarge);
    }

    #[monoio::test]
    async fn unknown_path_is_404() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::NotFound);
        assert_eq!(body_text(&p), b"404 Not Found");
    }

    #[monoio::test]
    async fn wrong_method_is_405_with_allow() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"POST / HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::MethodNotAllowed);
        let (name, value) = &p.response.headers[0];
        assert_eq!(name, "Allow");
        match value {
            Text::Arena(span) => assert_eq!(p.arena.get(span.clone()), b"GET"),
            Text::Static(_) => panic!("allow header should live in the arena"),
        }
    }

    #[monoio::test]
    async fn captures_reach_the_handler() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET /greet/ada HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(body_text(&p), b"ada");
    }

    #[monoio::test]
    async fn bad_version_is_505() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"GET / HTTP/2.0\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::HttpVersionNotSupported);
    }

    #[monoio::test]
    async fn unknown_method_is_501() {
        let config = Config::default();
        let r = router();
        let mut p = provision(&config);
        let step = feed(&mut p, &r, &config, &[b"BREW / HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert_eq!(step, Step::Send);
        assert_eq!(p.response.status, Status::NotImplemented);
    }
}
