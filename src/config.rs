//! Server configuration, per spec §3.
//!
//! Follows the teacher's builder style (`h2::server::Builder`,
//! `hyper::server::Builder`): a plain struct with `with_*` setters returning
//! `Self`, constructed once and then shared read-only (wrapped in `Arc` by
//! [`crate::server::Server::new`]).

use std::sync::Arc;
use std::time::Duration;

/// A predicate run over a fully-buffered request body; returning `false`
/// rejects the request with 400 "Prohibited input" (spec §3, §4.4).
pub type PayloadScanner = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Server-wide configuration, shared read-only across all connections once
/// the server has started.
#[derive(Clone)]
pub struct Configuration {
    pub(crate) origins: Vec<String>,
    pub(crate) cors_methods: Vec<String>,
    pub(crate) max_payload_size: u64,
    pub(crate) tls_handshake_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) io_threads: u32,
    pub(crate) backlog: i32,
    pub(crate) payload_scanner: Option<PayloadScanner>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            origins: Vec::new(),
            cors_methods: vec![
                "DELETE".into(),
                "GET".into(),
                "OPTIONS".into(),
                "POST".into(),
                "PUT".into(),
            ],
            max_payload_size: u64::MAX,
            tls_handshake_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(30),
            io_threads: 1,
            backlog: -1,
            payload_scanner: None,
        }
    }
}

impl Configuration {
    /// Starts a configuration with spec-mandated defaults.
    pub fn new() -> Self {
        Configuration::default()
    }

    /// Sets the CORS allow-listed origins (spec §3 `origins`).
    pub fn with_origins(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the default CORS method list.
    pub fn with_cors_methods(
        mut self,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.cors_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Caps accumulated request body size; requests exceeding it get 413.
    pub fn with_max_payload_size(mut self, max: u64) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Deadline for the TLS handshake to complete after `accept`.
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    /// Idle-read timeout; fires when no bytes are read before it elapses.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Number of event-loop threads the executor pool should own.
    pub fn with_io_threads(mut self, threads: u32) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Listen backlog; `-1` requests the OS maximum.
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Installs a predicate run over every fully-buffered request body.
    pub fn with_payload_scanner<F>(mut self, scanner: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.payload_scanner = Some(Arc::new(scanner));
        self
    }

    pub(crate) fn origin_allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == origin)
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("origins", &self.origins)
            .field("cors_methods", &self.cors_methods)
            .field("max_payload_size", &self.max_payload_size)
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("io_threads", &self.io_threads)
            .field("backlog", &self.backlog)
            .field("payload_scanner", &self.payload_scanner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Configuration::new();
        assert_eq!(cfg.max_payload_size, u64::MAX);
        assert_eq!(cfg.backlog, -1);
        assert_eq!(cfg.cors_methods, vec!["DELETE", "GET", "OPTIONS", "POST", "PUT"]);
        assert_eq!(cfg.tls_handshake_timeout, Duration::from_secs(3));
        assert_eq!(cfg.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn origin_allowed_checks_allow_list() {
        let cfg = Configuration::new().with_origins(["https://a.example"]);
        assert!(cfg.origin_allowed("https://a.example"));
        assert!(!cfg.origin_allowed("https://b.example"));
    }
}
