use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use futures_util::future::LocalBoxFuture;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use oxbow_core::config::Config;
use oxbow_core::server::{Context, Flow, HandlerFn, Server};
use oxbow_http::method::Method;
use oxbow_http::response::Body;
use oxbow_http::router::Router;
use oxbow_http::status::Status;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Path of the config file (toml or json); defaults apply without one
    #[clap(short, long)]
    config: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut router: Router<HandlerFn> = Router::new();
    router
        .route("/", Method::Get, index as HandlerFn)
        .route("/greet/:name", Method::Get, greet as HandlerFn)
        .route("/echo", Method::Post, echo as HandlerFn)
        .route("/stop", Method::Get, stop as HandlerFn);

    let workers = config.threading.workers();
    let server = Server::new(args.addr, config, router);
    let handle = server.start()?;
    tracing::info!(
        addr = %handle.addr(),
        workers,
        "oxbow listening"
    );

    handle.join();
    Ok(())
}

fn index(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
    Box::pin(async move {
        cx.response
            .set_with_body(Status::Ok, Body::Static(b"oxbow is up\n"));
        Flow::Respond
    })
}

fn greet(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
    Box::pin(async move {
        let name = cx.capture("name").unwrap_or("world");
        let punctuation = match cx.query("upbeat") {
            Some(_) => "!",
            None => ".",
        };
        let span = cx.arena.alloc_with(|out| {
            out.extend_from_slice(b"hello, ");
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(punctuation.as_bytes());
            out.push(b'\n');
        });
        cx.response.set_with_body(Status::Ok, Body::Arena(span));
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

fn stop(cx: Context<'_>) -> LocalBoxFuture<'_, Flow> {
    Box::pin(async move {
        cx.response.status = Status::Kill;
        Flow::Respond
    })
}
