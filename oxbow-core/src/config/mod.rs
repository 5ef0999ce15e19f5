//! Engine configuration.
//!
//! Every knob has a serde default so partial config files work; the whole
//! struct can also be built with `Config::default()` and adjusted in code
//! (the integration tests do exactly that). Files are parsed by extension,
//! see [`parsers`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::AnyResult;

mod parsers;

const DEFAULT_BACKLOG: u32 = 512;
const DEFAULT_CONNECTIONS_MAX: usize = 1024;
const DEFAULT_COMPLETIONS_REAP_MAX: u32 = 256;
const DEFAULT_ARENA_RETAIN: usize = 1024;
const DEFAULT_RECV_BUFFER_RETAIN: usize = 1024;
const DEFAULT_SOCKET_BUFFER: usize = 4096;
const DEFAULT_RECV_BUFFER_MAX: usize = 2 * 1024 * 1024;
const DEFAULT_REQUEST_MAX: usize = 2 * 1024 * 1024;
const DEFAULT_REQUEST_URI_MAX: usize = 2 * 1024;
const DEFAULT_HEADER_MAX: usize = 32;
const DEFAULT_CAPTURES_MAX: usize = 8;
const DEFAULT_QUERIES_MAX: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub size_backlog: u32,

    /// Provision pool capacity per worker; bounds in-flight connections.
    #[serde(default = "default_connections_max")]
    pub size_connections_max: usize,

    /// Completion ring depth handed to the runtime builder.
    #[serde(default = "default_completions_reap_max")]
    pub size_completions_reap_max: u32,

    /// Arena capacity retained across requests on one connection.
    #[serde(default = "default_arena_retain")]
    pub size_connection_arena_retain: usize,

    /// Receive accumulator capacity retained between requests.
    #[serde(default = "default_recv_buffer_retain")]
    pub size_recv_buffer_retain: usize,

    /// Socket scratch buffer; also the plaintext window for chunked sends.
    /// TLS uses an encrypted buffer of twice this size.
    #[serde(default = "default_socket_buffer")]
    pub size_socket_buffer: usize,

    /// Hard cap on the receive accumulator allocation.
    #[serde(default = "default_recv_buffer_max")]
    pub size_recv_buffer_max: usize,

    /// Requests whose cumulative received bytes reach this are answered 413.
    #[serde(default = "default_request_max")]
    pub size_request_max: usize,

    /// Longest accepted request target.
    #[serde(default = "default_request_uri_max")]
    pub size_request_uri_max: usize,

    #[serde(default = "default_header_max")]
    pub num_header_max: usize,

    #[serde(default = "default_captures_max")]
    pub num_captures_max: usize,

    #[serde(default = "default_queries_max")]
    pub num_queries_max: usize,

    #[serde(default)]
    pub security: Security,

    #[serde(default)]
    pub threading: Threading,

    /// Pin worker threads to cores.
    #[serde(default)]
    pub cpu_affinity: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            size_backlog: default_backlog(),
            size_connections_max: default_connections_max(),
            size_completions_reap_max: default_completions_reap_max(),
            size_connection_arena_retain: default_arena_retain(),
            size_recv_buffer_retain: default_recv_buffer_retain(),
            size_socket_buffer: default_socket_buffer(),
            size_recv_buffer_max: default_recv_buffer_max(),
            size_request_max: default_request_max(),
            size_request_uri_max: default_request_uri_max(),
            num_header_max: default_header_max(),
            num_captures_max: default_captures_max(),
            num_queries_max: default_queries_max(),
            security: Security::default(),
            threading: Threading::default(),
            cpu_affinity: false,
        }
    }
}

impl Config {
    /// Load from a TOML or JSON file, decided by extension.
    pub fn load(path: impl AsRef<Path>) -> AnyResult<Config> {
        let raw = std::fs::read(path.as_ref())?;
        parsers::parse(parse_extension(&path), &raw)
    }

    /// Size of the encrypted staging buffer used under TLS.
    pub fn size_tls_buffer(&self) -> usize {
        2 * self.size_socket_buffer
    }
}

/// Transport security for all connections of a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Security {
    #[default]
    Plain,
    Tls {
        cert: PathBuf,
        key: PathBuf,
        /// PEM section label the certificate chain is read from.
        #[serde(default = "default_cert_name")]
        cert_name: String,
        /// PEM section label the private key is read from.
        #[serde(default = "default_key_name")]
        key_name: String,
    },
}

impl Security {
    pub fn is_tls(&self) -> bool {
        matches!(self, Security::Tls { .. })
    }
}

/// Worker thread count: `"auto"`, `"single"`, or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threading {
    Auto,
    Single,
    #[serde(untagged)]
    Count(usize),
}

impl Default for Threading {
    fn default() -> Self {
        Threading::Auto
    }
}

impl Threading {
    pub fn workers(&self) -> usize {
        match self {
            Threading::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Threading::Single => 1,
            Threading::Count(n) => (*n).max(1),
        }
    }
}

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

define_const!(default_backlog, DEFAULT_BACKLOG, u32);
define_const!(default_connections_max, DEFAULT_CONNECTIONS_MAX, usize);
define_const!(default_completions_reap_max, DEFAULT_COMPLETIONS_REAP_MAX, u32);
define_const!(default_arena_retain, DEFAULT_ARENA_RETAIN, usize);
define_const!(default_recv_buffer_retain, DEFAULT_RECV_BUFFER_RETAIN, usize);
define_const!(default_socket_buffer, DEFAULT_SOCKET_BUFFER, usize);
define_const!(default_recv_buffer_max, DEFAULT_RECV_BUFFER_MAX, usize);
define_const!(default_request_max, DEFAULT_REQUEST_MAX, usize);
define_const!(default_request_uri_max, DEFAULT_REQUEST_URI_MAX, usize);
define_const!(default_header_max, DEFAULT_HEADER_MAX, usize);
define_const!(default_captures_max, DEFAULT_CAPTURES_MAX, usize);
define_const!(default_queries_max, DEFAULT_QUERIES_MAX, usize);

fn default_cert_name() -> String {
    "CERTIFICATE".to_string()
}

fn default_key_name() -> String {
    "PRIVATE KEY".to_string()
}

fn parse_extension(path: &impl AsRef<Path>) -> String {
    path.as_ref()
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.size_backlog, 512);
        assert_eq!(config.size_connections_max, 1024);
        assert_eq!(config.size_socket_buffer, 4096);
        assert_eq!(config.size_tls_buffer(), 8192);
        assert_eq!(config.size_request_max, 2 * 1024 * 1024);
        assert_eq!(config.num_header_max, 32);
        assert!(!config.security.is_tls());
        assert_eq!(config.threading, Threading::Auto);
    }

    #[test]
    fn toml_deserialize() {
        const TEST_CONFIG: &str = "
            size_backlog = 128
            size_connections_max = 64
            threading = 'single'

            [security]
            mode = 'tls'
            cert = '/etc/oxbow/cert.pem'
            key = '/etc/oxbow/key.pem'
        ";

        let config: Config = parsers::parse("toml".to_string(), TEST_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.size_backlog, 128);
        assert_eq!(config.size_connections_max, 64);
        assert_eq!(config.threading, Threading::Single);
        assert!(config.security.is_tls());
        match &config.security {
            Security::Tls { cert_name, key_name, .. } => {
                assert_eq!(cert_name, "CERTIFICATE");
                assert_eq!(key_name, "PRIVATE KEY");
            }
            Security::Plain => unreachable!(),
        }
        // Unspecified knobs keep their defaults.
        assert_eq!(config.size_socket_buffer, 4096);
    }

    #[test]
    fn json_deserialize() {
        const TEST_CONFIG: &str = "
            {
                \"size_request_max\": 4096,
                \"threading\": 2
            }
        ";

        let config: Config = parsers::parse("json".to_string(), TEST_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.size_request_max, 4096);
        assert_eq!(config.threading, Threading::Count(2));
        assert_eq!(config.threading.workers(), 2);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        assert!(parsers::parse::<Config>("yaml".to_string(), b"size_backlog: 1").is_err());
    }

    #[test]
    fn threading_worker_counts() {
        assert_eq!(Threading::Single.workers(), 1);
        assert_eq!(Threading::Count(7).workers(), 7);
        assert_eq!(Threading::Count(0).workers(), 1);
        assert!(Threading::Auto.workers() >= 1);
    }
}
