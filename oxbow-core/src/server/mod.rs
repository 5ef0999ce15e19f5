//! Server facade and per-worker wiring.
//!
//! [`Server::start`] spawns one thread per configured worker. Every worker
//! binds its own listener on the shared address (`reuse_port`), builds its
//! own provision pool and TLS slot table, and runs an independent runtime
//! with an accept loop; no mutable state is shared between workers. The
//! returned [`ServerHandle`] exposes the bound addresses (useful with port
//! 0) and joins or stops the workers.

mod accept;
pub(crate) mod assembly;
mod connection;
mod dispatch;
pub mod handler;

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use async_channel::{Receiver, Sender};
use monoio::net::{ListenerOpts, TcpListener};
use oxbow_http::router::Router;

use crate::config::Config;
use crate::pool::ProvisionPool;
use crate::runtime::RuntimeWrapper;
use crate::tls::{TlsContext, TlsSlots};
use crate::AnyResult;

pub use handler::{Context, Flow, Handler, HandlerFn};

/// Per-runtime storage. One instance per worker, created when the worker
/// starts and dropped when it stops; there is no static mutable state.
pub(crate) struct Worker<H> {
    /// The listening socket.
    pub server_socket: TcpListener,
    pub provision_pool: RefCell<ProvisionPool>,
    pub config: Config,
    pub router: Arc<Router<H>>,
    /// TLS context and per-slot sessions; `None` under plain transport.
    pub tls: Option<WorkerTls>,
    /// True exactly while an accept is outstanding.
    pub accept_queued: Cell<bool>,
    /// Closed to stop this worker (handler kill or facade stop).
    pub shutdown: (Sender<()>, Receiver<()>),
    /// Signaled by a closing connection when no accept is outstanding.
    pub released: (Sender<()>, Receiver<()>),
}

pub(crate) struct WorkerTls {
    pub ctx: TlsContext,
    pub slots: TlsSlots,
}

impl<H> Worker<H> {
    pub fn begin_shutdown(&self) {
        self.shutdown.0.close();
    }
}

pub struct Server<H> {
    addr: SocketAddr,
    config: Config,
    router: Arc<Router<H>>,
}

impl<H: Handler + 'static> Server<H> {
    pub fn new(addr: SocketAddr, config: Config, router: Router<H>) -> Self {
        Server {
            addr,
            config,
            router: Arc::new(router),
        }
    }

    /// Bind and spawn the workers. Returns once every worker reported its
    /// bound address; any bind failure stops the others and surfaces here.
    pub fn start(self) -> AnyResult<ServerHandle> {
        let tls_ctx = TlsContext::from_security(&self.config.security)?;
        let worker_count = self.config.threading.workers();
        let cores = if self.config.cpu_affinity {
            std::thread::available_parallelism().ok()
        } else {
            None
        };

        let (addr_tx, addr_rx) = std::sync::mpsc::channel::<AnyResult<SocketAddr>>();
        let mut handles = Vec::with_capacity(worker_count);
        let mut shutdowns = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let config = self.config.clone();
            let router = self.router.clone();
            let tls_ctx = tls_ctx.clone();
            let addr_tx = addr_tx.clone();
            let addr = self.addr;
            let shutdown = async_channel::bounded::<()>(1);
            shutdowns.push(shutdown.0.clone());

            let handle = std::thread::Builder::new()
                .name(format!("oxbow-worker-{worker_id}"))
                .spawn(move || {
                    if let Some(cores) = cores {
                        let core = worker_id % cores;
                        if let Err(e) = monoio::utils::bind_to_cpu_set([core]) {
                            tracing::warn!("bind worker {worker_id} to core {core} failed: {e}");
                        }
                    }
                    let mut runtime = RuntimeWrapper::new(config.size_completions_reap_max);
                    runtime.block_on(run_worker(
                        worker_id, addr, config, router, tls_ctx, shutdown, addr_tx,
                    ));
                })
                .expect("start worker thread failed");
            handles.push(handle);
        }
        drop(addr_tx);

        let mut addrs = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let result = addr_rx
                .recv()
                .unwrap_or_else(|_| Err(anyhow!("worker exited before binding")));
            match result {
                Ok(addr) => addrs.push(addr),
                Err(err) => {
                    for s in &shutdowns {
                        s.close();
                    }
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(err);
                }
            }
        }

        Ok(ServerHandle {
            addrs,
            shutdowns,
            handles,
        })
    }
}

async fn run_worker<H: Handler + 'static>(
    worker_id: usize,
    addr: SocketAddr,
    config: Config,
    router: Arc<Router<H>>,
    tls_ctx: Option<TlsContext>,
    shutdown: (Sender<()>, Receiver<()>),
    addr_tx: std::sync::mpsc::Sender<AnyResult<SocketAddr>>,
) {
    let opts = ListenerOpts::default()
        .reuse_port(true)
        .reuse_addr(true)
        .backlog(config.size_backlog as _);
    let server_socket = match TcpListener::bind_with_config(addr, &opts) {
        Ok(listener) => listener,
        Err(err) => {
            let _ = addr_tx.send(Err(err.into()));
            return;
        }
    };
    let local = match server_socket.local_addr() {
        Ok(local) => local,
        Err(err) => {
            let _ = addr_tx.send(Err(err.into()));
            return;
        }
    };
    let _ = addr_tx.send(Ok(local));
    drop(addr_tx);

    let tls = tls_ctx.map(|ctx| WorkerTls {
        slots: TlsSlots::new(config.size_connections_max),
        ctx,
    });
    let worker = Rc::new(Worker {
        server_socket,
        provision_pool: RefCell::new(ProvisionPool::new(&config)),
        config,
        router,
        tls,
        accept_queued: Cell::new(false),
        shutdown,
        released: async_channel::bounded(1),
    });

    tracing::info!(worker = worker_id, addr = %local, "worker listening");
    accept::accept_loop(worker).await;
    tracing::info!(worker = worker_id, "worker stopped");
}

/// Running server: bound addresses plus the worker threads.
pub struct ServerHandle {
    addrs: Vec<SocketAddr>,
    shutdowns: Vec<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// First worker's bound address. With an explicit port all workers share
    /// it; with port 0 each worker gets its own, see [`Self::addrs`].
    pub fn addr(&self) -> SocketAddr {
        self.addrs[0]
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Ask every worker to stop.
    pub fn stop(&self) {
        for s in &self.shutdowns {
            s.close();
        }
    }

    /// Wait for every worker to stop (on `Kill` or [`Self::stop`]).
    pub fn join(self) {
        for h in self.handles {
            let _ = h.join();
        }
    }
}
