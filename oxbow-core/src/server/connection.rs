//! The per-connection job state machine.
//!
//! One task drives one borrowed provision. Every loop iteration performs at
//! most one I/O operation, so exactly one operation is ever in flight per
//! provision; all mutation between completions is synchronous. The job is
//! taken out of the provision at the top of the iteration and the successor
//! job written back, which keeps ownership of send-state buffers explicit.

use std::rc::Rc;

use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use oxbow_http::status::Status;

use crate::provision::{HandshakePhase, Job, Provision, SendMode};
use crate::pseudoslice::Pseudoslice;
use crate::server::assembly::{self, Step};
use crate::server::dispatch::{self, Dispatch};
use crate::server::handler::Handler;
use crate::server::Worker;
use crate::tls::HandshakeStep;

/// Handshake continuation cycles allowed before the connection is dropped.
const HANDSHAKE_CYCLES_MAX: usize = 50;

pub(crate) async fn drive<H: Handler>(
    worker: Rc<Worker<H>>,
    mut stream: TcpStream,
    mut provision: Provision,
) {
    loop {
        match std::mem::replace(&mut provision.job, Job::Empty) {
            Job::Empty => unreachable!("connection driven with an empty job"),
            Job::Handshake { phase, count } => {
                provision.job =
                    handshake_turn(&worker, &mut stream, &mut provision, phase, count).await;
            }
            Job::Recv { count } => {
                provision.job = recv_turn(&worker, &mut stream, &mut provision, count).await;
            }
            Job::Send { slice, count, mode } => {
                provision.job =
                    send_turn(&worker, &mut stream, &mut provision, slice, count, mode).await;
            }
            Job::Close => {
                let _ = stream.shutdown().await;
                break;
            }
        }
    }

    // Close completion: free the TLS slot, drop the socket, reset and
    // release the provision, and re-arm the accept loop if nothing is
    // accepting right now.
    if let Some(tls) = &worker.tls {
        let _ = tls.slots.take(provision.index);
    }
    drop(stream);

    let index = provision.index;
    provision.reset_on_close(&worker.config);
    worker.provision_pool.borrow_mut().release(index, provision);
    if !worker.accept_queued.get() {
        let _ = worker.released.0.try_send(());
    }
    tracing::debug!(slot = index, "connection closed");
}

async fn handshake_turn<H: Handler>(
    worker: &Worker<H>,
    stream: &mut TcpStream,
    provision: &mut Provision,
    phase: HandshakePhase,
    count: usize,
) -> Job {
    if count >= HANDSHAKE_CYCLES_MAX {
        tracing::warn!(slot = provision.index, "handshake cycle limit reached");
        return Job::Close;
    }
    let tls = worker.tls.as_ref().expect("handshake job on a plain worker");

    let step = match phase {
        HandshakePhase::Recv => {
            provision.buffer.clear();
            let buf = std::mem::take(&mut provision.buffer);
            let (res, buf) = stream.read(buf).await;
            provision.buffer = buf;
            match res {
                Ok(n) if n > 0 => {
                    let Provision { index, buffer, .. } = provision;
                    tls.slots.with(*index, |s| s.handshake_step(buffer))
                }
                Ok(_) => return Job::Close,
                Err(err) => {
                    tracing::debug!(error = %err, "handshake read failed");
                    return Job::Close;
                }
            }
        }
        // Our flight went out; ask the session what comes next.
        HandshakePhase::Send => tls.slots.with(provision.index, |s| s.handshake_step(&[])),
    };

    match step {
        Err(err) => {
            tracing::warn!(error = %err, "tls handshake failed");
            Job::Close
        }
        Ok(HandshakeStep::Send(records)) => {
            let (res, _buf) = stream.write_all(records).await;
            match res {
                Ok(_) => Job::Handshake {
                    phase: HandshakePhase::Send,
                    count: count + 1,
                },
                Err(err) => {
                    tracing::debug!(error = %err, "handshake write failed");
                    Job::Close
                }
            }
        }
        Ok(HandshakeStep::Recv) => Job::Handshake {
            phase: HandshakePhase::Recv,
            count: count + 1,
        },
        Ok(HandshakeStep::Complete) => {
            tracing::debug!(slot = provision.index, "tls handshake complete");
            Job::Recv { count: 0 }
        }
    }
}

async fn recv_turn<H: Handler>(
    worker: &Worker<H>,
    stream: &mut TcpStream,
    provision: &mut Provision,
    count: usize,
) -> Job {
    let appended_start = provision.recv_buffer.len();
    let mut received = 0;

    // Plaintext rustls already buffered (it can ride in with the final
    // handshake flight) is consumed before touching the socket.
    let mut drained = 0;
    if let Some(tls) = &worker.tls {
        let Provision {
            index, recv_buffer, ..
        } = provision;
        match tls.slots.with(*index, |s| s.take_plaintext(recv_buffer)) {
            Ok(n) => drained = n,
            Err(err) => {
                tracing::warn!(error = %err, "tls read failed");
                return Job::Close;
            }
        }
    }

    if drained == 0 {
        provision.buffer.clear();
        let buf = std::mem::take(&mut provision.buffer);
        let (res, buf) = stream.read(buf).await;
        provision.buffer = buf;
        received = match res {
            Ok(n) if n > 0 => n,
            Ok(_) => return Job::Close,
            Err(err) => {
                tracing::debug!(error = %err, "recv failed");
                return Job::Close;
            }
        };

        if let Some(tls) = &worker.tls {
            let Provision {
                index,
                recv_buffer,
                buffer,
                ..
            } = provision;
            if let Err(err) = tls.slots.with(*index, |s| s.decrypt_into(buffer, recv_buffer)) {
                tracing::warn!(error = %err, "tls decrypt failed");
                return Job::Close;
            }
        } else {
            let Provision {
                recv_buffer, buffer, ..
            } = provision;
            recv_buffer.extend_from_slice(buffer);
        }
    }

    let count = count + received;
    if count >= worker.config.size_request_max
        || provision.recv_buffer.len() > worker.config.size_recv_buffer_max
    {
        provision.response.set(Status::ContentTooLarge);
        return install_send(worker, provision);
    }

    match assembly::advance(provision, &worker.router, &worker.config, appended_start).await {
        Step::Recv => Job::Recv { count },
        Step::Send => install_send(worker, provision),
    }
}

/// Run the dispatcher and, under TLS, pre-encrypt the first plaintext
/// window so the armed write already carries records.
fn install_send<H: Handler>(worker: &Worker<H>, provision: &mut Provision) -> Job {
    if matches!(dispatch::dispatch(provision), Dispatch::Kill) {
        worker.begin_shutdown();
        return Job::Close;
    }

    let mut job = std::mem::replace(&mut provision.job, Job::Empty);
    if let Some(tls) = &worker.tls {
        let Job::Send { slice, count, mode } = &mut job else {
            unreachable!("dispatch installs a send job");
        };
        let mut encrypted = std::mem::take(&mut provision.encrypted_buf);
        let window = slice.get(0, worker.config.size_socket_buffer, &provision.arena);
        let window_len = window.len();
        match tls.slots.with(provision.index, |s| s.encrypt_into(window, &mut encrypted)) {
            Ok(()) => {
                *count = window_len;
                *mode = SendMode::Tls {
                    encrypted,
                    encrypted_count: 0,
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "tls encrypt failed");
                encrypted.clear();
                provision.encrypted_buf = encrypted;
                if let Job::Send { slice, .. } = job {
                    provision.reclaim(slice);
                }
                return Job::Close;
            }
        }
    }
    job
}

async fn send_turn<H: Handler>(
    worker: &Worker<H>,
    stream: &mut TcpStream,
    provision: &mut Provision,
    mut slice: Pseudoslice,
    mut count: usize,
    mode: SendMode,
) -> Job {
    let window = worker.config.size_socket_buffer;
    match mode {
        SendMode::Plain => {
            let mut chunk = std::mem::take(&mut provision.buffer);
            chunk.clear();
            chunk.extend_from_slice(slice.get(count, count + window, &provision.arena));
            let (res, chunk) = stream.write(chunk).await;
            provision.buffer = chunk;
            match res {
                Ok(n) if n > 0 => count += n,
                Ok(_) => return close_mid_send(provision, slice),
                Err(err) => {
                    tracing::debug!(error = %err, "send failed");
                    return close_mid_send(provision, slice);
                }
            }
            if count >= slice.len() {
                finish_send(worker, provision, slice)
            } else {
                Job::Send {
                    slice,
                    count,
                    mode: SendMode::Plain,
                }
            }
        }
        SendMode::Tls {
            mut encrypted,
            mut encrypted_count,
        } => {
            if encrypted_count < encrypted.len() {
                // Drain the staged records in socket-buffer-sized pieces.
                let end = (encrypted_count + window).min(encrypted.len());
                let mut chunk = std::mem::take(&mut provision.buffer);
                chunk.clear();
                chunk.extend_from_slice(&encrypted[encrypted_count..end]);
                let (res, chunk) = stream.write(chunk).await;
                provision.buffer = chunk;
                match res {
                    Ok(n) if n > 0 => encrypted_count += n,
                    Ok(_) | Err(_) => {
                        encrypted.clear();
                        provision.encrypted_buf = encrypted;
                        return close_mid_send(provision, slice);
                    }
                }
                Job::Send {
                    slice,
                    count,
                    mode: SendMode::Tls {
                        encrypted,
                        encrypted_count,
                    },
                }
            } else if count >= slice.len() {
                encrypted.clear();
                provision.encrypted_buf = encrypted;
                finish_send(worker, provision, slice)
            } else {
                // Encrypt the next plaintext window; no I/O this turn.
                let tls = worker.tls.as_ref().expect("tls send on a plain worker");
                let plain = slice.get(count, count + window, &provision.arena);
                let advanced = plain.len();
                match tls.slots.with(provision.index, |s| s.encrypt_into(plain, &mut encrypted)) {
                    Ok(()) => {
                        count += advanced;
                        Job::Send {
                            slice,
                            count,
                            mode: SendMode::Tls {
                                encrypted,
                                encrypted_count: 0,
                            },
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "tls encrypt failed");
                        encrypted.clear();
                        provision.encrypted_buf = encrypted;
                        close_mid_send(provision, slice)
                    }
                }
            }
        }
    }
}

fn close_mid_send(provision: &mut Provision, slice: Pseudoslice) -> Job {
    provision.reclaim(slice);
    Job::Close
}

/// Send completed: reclaim the slice's buffers, reset the arena and the
/// accumulator within their retain limits, and go back to receiving.
fn finish_send<H: Handler>(worker: &Worker<H>, provision: &mut Provision, slice: Pseudoslice) -> Job {
    provision.reclaim(slice);
    provision.reset_for_next_request(&worker.config);
    Job::Recv { count: 0 }
}
