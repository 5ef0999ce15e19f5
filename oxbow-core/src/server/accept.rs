//! The accept loop.
//!
//! Exactly one accept is ever outstanding, tracked by the worker's
//! `accept_queued` flag. Admission control keys on the provision pool: with
//! at least two clean slots the next accept is armed immediately, otherwise
//! the loop parks until a closing connection signals the `released` channel.
//! That deferral is what bounds in-flight connections to pool capacity and
//! guarantees the pool is never full when an accept completes.

use std::rc::Rc;

use crate::provision::{HandshakePhase, Job};
use crate::server::connection;
use crate::server::handler::Handler;
use crate::server::Worker;
use crate::tls::TlsSession;

pub(crate) async fn accept_loop<H: Handler + 'static>(worker: Rc<Worker<H>>) {
    let mut hint: usize = 0;
    loop {
        worker.accept_queued.set(true);
        let accepted = monoio::select! {
            res = worker.server_socket.accept() => res,
            _ = worker.shutdown.1.recv() => break,
        };
        worker.accept_queued.set(false);

        match accepted {
            Err(err) => {
                // Soft failure: log and keep serving.
                tracing::warn!(error = %err, "accept failed");
            }
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::debug!(error = %err, "set_nodelay failed");
                }

                let borrowed = worker.provision_pool.borrow_mut().borrow(hint);
                hint = hint.wrapping_add(1);
                let (index, mut provision) = borrowed
                    .expect("provision pool full at accept despite admission control");

                let job = match &worker.tls {
                    Some(tls) => match TlsSession::new(&tls.ctx) {
                        Ok(session) => {
                            tls.slots.occupy(index, session);
                            Some(Job::Handshake {
                                phase: HandshakePhase::Recv,
                                count: 0,
                            })
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "tls session setup failed");
                            None
                        }
                    },
                    None => Some(Job::Recv { count: 0 }),
                };

                match job {
                    Some(job) => {
                        provision.job = job;
                        tracing::debug!(peer = %peer, slot = index, "connection accepted");
                        monoio::spawn(connection::drive(worker.clone(), stream, provision));
                    }
                    None => {
                        worker.provision_pool.borrow_mut().release(index, provision);
                        continue;
                    }
                }
            }
        }

        // Admission control: re-arm only with headroom for the connection
        // just admitted plus the next one; otherwise the next close wakes us.
        if worker.provision_pool.borrow().clean() < 2 {
            let stopped = monoio::select! {
                res = worker.released.1.recv() => res.is_err(),
                _ = worker.shutdown.1.recv() => true,
            };
            if stopped {
                return;
            }
        }
    }
}
