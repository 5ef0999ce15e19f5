//! TLS support: certificate loading, the per-connection session wrapper,
//! and the slot table pairing sessions with provisions.
//!
//! Sessions are driven sans-io. The connection state machine owns the socket
//! and hands raw records in and out; this module only ever touches byte
//! buffers (`read_tls`/`process_new_packets` inbound, `write_tls` outbound),
//! which is what lets handshake, decrypt and encrypt interleave with the
//! engine's one-operation-per-provision discipline.

use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use rustls::{Certificate, PrivateKey, ServerConfig, ServerConnection};

use crate::config::Security;
use crate::AnyResult;

/// Shared TLS server configuration, built once and handed to every worker.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    /// `None` under plain transport.
    pub fn from_security(security: &Security) -> AnyResult<Option<TlsContext>> {
        let (cert, key, cert_name, key_name) = match security {
            Security::Plain => return Ok(None),
            Security::Tls {
                cert,
                key,
                cert_name,
                key_name,
            } => (cert, key, cert_name, key_name),
        };

        let cert_data = std::fs::read(cert)
            .with_context(|| format!("read certificate file {}", cert.display()))?;
        let key_data =
            std::fs::read(key).with_context(|| format!("read key file {}", key.display()))?;

        let chain = load_certs(&cert_data, cert_name)?;
        if chain.is_empty() {
            bail!("no {:?} sections in {}", cert_name, cert.display());
        }
        let key = load_key(&key_data, key_name)?
            .ok_or_else(|| anyhow!("no {:?} section in {}", key_name, key.display()))?;

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        Ok(Some(TlsContext {
            config: Arc::new(config),
        }))
    }
}

fn load_certs(data: &[u8], label: &str) -> AnyResult<Vec<Certificate>> {
    match label {
        "CERTIFICATE" => Ok(rustls_pemfile::read_all(&mut Cursor::new(data))?
            .into_iter()
            .filter_map(|item| match item {
                rustls_pemfile::Item::X509Certificate(der) => Some(Certificate(der)),
                _ => None,
            })
            .collect()),
        other => bail!("unsupported certificate section label {:?}", other),
    }
}

fn load_key(data: &[u8], label: &str) -> AnyResult<Option<PrivateKey>> {
    let items = rustls_pemfile::read_all(&mut Cursor::new(data))?;
    let key = items.into_iter().find_map(|item| match (label, item) {
        ("PRIVATE KEY", rustls_pemfile::Item::PKCS8Key(der)) => Some(PrivateKey(der)),
        ("RSA PRIVATE KEY", rustls_pemfile::Item::RSAKey(der)) => Some(PrivateKey(der)),
        ("EC PRIVATE KEY", rustls_pemfile::Item::ECKey(der)) => Some(PrivateKey(der)),
        _ => None,
    });
    if key.is_none()
        && !matches!(label, "PRIVATE KEY" | "RSA PRIVATE KEY" | "EC PRIVATE KEY")
    {
        bail!("unsupported key section label {:?}", label);
    }
    Ok(key)
}

/// What the handshake drive loop should do next.
pub enum HandshakeStep {
    /// Wait for more bytes from the peer.
    Recv,
    /// Transmit these records, then ask again.
    Send(Vec<u8>),
    /// Steady state reached.
    Complete,
}

/// One connection's TLS state.
pub struct TlsSession {
    conn: ServerConnection,
}

impl TlsSession {
    pub fn new(ctx: &TlsContext) -> AnyResult<TlsSession> {
        Ok(TlsSession {
            conn: ServerConnection::new(ctx.config.clone())?,
        })
    }

    /// Push raw records from the peer into the session.
    fn feed(&mut self, input: &[u8]) -> AnyResult<()> {
        let mut cursor = Cursor::new(input);
        while (cursor.position() as usize) < input.len() {
            if self.conn.read_tls(&mut cursor)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;
        }
        Ok(())
    }

    /// Advance the handshake with `input` bytes from the peer (empty after
    /// one of our own sends completed).
    pub fn handshake_step(&mut self, input: &[u8]) -> AnyResult<HandshakeStep> {
        if !input.is_empty() {
            self.feed(input)?;
        }
        if self.conn.wants_write() {
            let mut out = Vec::new();
            while self.conn.wants_write() {
                self.conn.write_tls(&mut out)?;
            }
            return Ok(HandshakeStep::Send(out));
        }
        if self.conn.is_handshaking() {
            Ok(HandshakeStep::Recv)
        } else {
            Ok(HandshakeStep::Complete)
        }
    }

    /// Feed raw records and append any plaintext they yield to `out`.
    /// Returns the number of plaintext bytes produced.
    pub fn decrypt_into(&mut self, input: &[u8], out: &mut Vec<u8>) -> AnyResult<usize> {
        let mut produced = 0;
        let mut cursor = Cursor::new(input);
        while (cursor.position() as usize) < input.len() {
            if self.conn.read_tls(&mut cursor)? == 0 {
                break;
            }
            produced += self.take_plaintext(out)?;
        }
        Ok(produced)
    }

    /// Drain plaintext the session has already buffered (e.g. application
    /// data that rode in with the final handshake flight).
    pub fn take_plaintext(&mut self, out: &mut Vec<u8>) -> AnyResult<usize> {
        let state = self.conn.process_new_packets()?;
        let available = state.plaintext_bytes_to_read();
        if available > 0 {
            let start = out.len();
            out.resize(start + available, 0);
            self.conn.reader().read_exact(&mut out[start..])?;
        }
        Ok(available)
    }

    /// Encrypt one plaintext window, replacing `out` with the records to
    /// transmit.
    pub fn encrypt_into(&mut self, plain: &[u8], out: &mut Vec<u8>) -> AnyResult<()> {
        out.clear();
        self.conn.writer().write_all(plain)?;
        while self.conn.wants_write() {
            self.conn.write_tls(out)?;
        }
        Ok(())
    }
}

/// TLS sessions paired by index with the provision pool. Slot `i` is
/// occupied exactly while provision `i`'s job is handshake, recv or send;
/// sessions never move between slots.
pub struct TlsSlots {
    slots: RefCell<Vec<Option<TlsSession>>>,
}

impl TlsSlots {
    pub fn new(capacity: usize) -> Self {
        TlsSlots {
            slots: RefCell::new((0..capacity).map(|_| None).collect()),
        }
    }

    pub fn occupy(&self, index: usize, session: TlsSession) {
        let mut slots = self.slots.borrow_mut();
        debug_assert!(slots[index].is_none(), "tls slot {index} already occupied");
        slots[index] = Some(session);
    }

    pub fn take(&self, index: usize) -> Option<TlsSession> {
        self.slots.borrow_mut()[index].take()
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots.borrow()[index].is_some()
    }

    /// Run `f` on slot `index`'s session. The slot must be occupied; an
    /// empty slot here is a state machine bug.
    pub fn with<R>(&self, index: usize, f: impl FnOnce(&mut TlsSession) -> R) -> R {
        let mut slots = self.slots.borrow_mut();
        let session = slots[index]
            .as_mut()
            .expect("tls slot empty while connection is live");
        f(session)
    }
}
