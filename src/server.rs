//! The public server façade (spec §6 "Public API").
//!
//! `Server` owns the executor pool, the acceptor, and the shared
//! router/adapter, and ties them together the way the teacher's own
//! `server::Builder` + `server::Server` pair does -- a builder-ish
//! constructor plus `start`/`stop`/`join` lifecycle methods, rather than a
//! bare free function.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::Method;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::acceptor::{Acceptor, Accepted, TransportMode};
use crate::adapter::{Adapter, ExtraProcessHook};
use crate::config::{Configuration, PayloadScanner};
use crate::conn::Connection;
use crate::error::Result;
use crate::executor::Executor;
use crate::router::{Handler, Router};

/// An embeddable HTTP/2 server (spec §6 `Server::new` / `addHandler` /
/// `start` / `stop` / `join`).
pub struct Server {
    config: Arc<Configuration>,
    router: Router,
    executor: Executor,
    extra_process: Option<ExtraProcessHook>,
    stopped: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl Server {
    /// Builds a server over `configuration`, optionally installing a
    /// payload scanner (spec §6 `Server::new`). The payload scanner may
    /// also be installed via [`Configuration::with_payload_scanner`]; if
    /// both are given, this constructor's argument wins.
    pub fn new(mut configuration: Configuration, payload_scanner: Option<PayloadScanner>) -> Result<Server> {
        if let Some(scanner) = payload_scanner {
            configuration.payload_scanner = Some(scanner);
        }
        let io_threads = configuration.io_threads;
        Ok(Server {
            config: Arc::new(configuration),
            router: Router::new(),
            executor: Executor::new(io_threads)?,
            extra_process: None,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
        })
    }

    /// Registers a handler for `(method, pattern)` (spec §6 `addHandler`).
    pub fn add_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        self.router.add(method, pattern, handler, None)
    }

    /// Registers a named handler, surfaced for diagnostics/tests.
    pub fn add_named_handler(
        &mut self,
        method: Method,
        pattern: &str,
        name: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        self.router.add(method, pattern, handler, Some(name))
    }

    /// Installs the `extraProcess` customization point (spec §4.6 step 4).
    pub fn set_extra_process(&mut self, hook: ExtraProcessHook) {
        self.extra_process = Some(hook);
    }

    /// Starts serving `addrs` in plain TCP mode, blocking until
    /// [`Server::stop`] is called from another task (spec §6 `start`).
    pub async fn start_plain(self, addrs: &[SocketAddr]) -> Result<()> {
        self.start(addrs, TransportMode::Plain).await
    }

    /// Starts serving `addrs` with TLS termination and ALPN gating to
    /// `h2` (spec §4.2).
    pub async fn start_tls(
        self,
        addrs: &[SocketAddr],
        tls_config: Arc<tokio_rustls::rustls::ServerConfig>,
    ) -> Result<()> {
        self.start(addrs, TransportMode::Tls(tls_config)).await
    }

    async fn start(self, addrs: &[SocketAddr], mode: TransportMode) -> Result<()> {
        let adapter = Arc::new(Adapter::new(
            Arc::new(self.router),
            Arc::clone(&self.config),
            self.extra_process,
        ));
        let mut acceptor = Acceptor::bind(addrs, self.config.backlog, mode, self.config.tls_handshake_timeout)?;
        info!(endpoints = acceptor.endpoint_count(), "server listening");

        let executor = self.executor.executor();
        let stopped = Arc::clone(&self.stopped);
        let stop_signal = Arc::clone(&self.stop_signal);

        loop {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                biased;
                _ = stop_signal.notified() => {
                    // `Server::stop()` was called; don't even look at
                    // whatever `accept()` would have returned (spec §4.1
                    // "once stop returns, no handler will start").
                    break;
                }
                accept_result = acceptor.accept() => {
                    match accept_result {
                        Ok((accepted, remote)) => {
                            let adapter = Arc::clone(&adapter);
                            let config = Arc::clone(&self.config);
                            executor.spawn(async move {
                                let result = match accepted {
                                    Accepted::Plain(stream) => {
                                        Connection::new(stream, remote, adapter, config).serve().await
                                    }
                                    Accepted::Tls(stream) => {
                                        Connection::new(*stream, remote, adapter, config).serve().await
                                    }
                                };
                                if let Err(err) = result {
                                    error!(error = %err, "connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            // Per-connection failures (handshake timeout, ALPN
                            // mismatch, a transient accept error) never take down
                            // the acceptor loop (spec §7 "errors never propagate
                            // across connections").
                            error!(error = %err, "accepting connection failed, continuing");
                        }
                    }
                }
            }
        }
        self.executor.stop();
        Ok(())
    }

    /// Signals the accept loop to stop taking new connections; idempotent
    /// (spec §4.1 invariant, testable property 6). Wakes `start()` out of a
    /// parked `accept().await` even when no new connection is incoming.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    /// Waits for the executor pool's worker threads to exit.
    pub fn join(&mut self) {
        self.executor.join();
    }

    /// A cheaply cloneable stop trigger, obtained before `start_plain`/
    /// `start_tls` consume the server (both take `self` by value so the
    /// serving task can own its whole connection/routing state, the same
    /// shape the teacher's own `Server::serve` uses). Callers that spawn
    /// the serving future keep this handle to call [`ServerHandle::stop`]
    /// from outside that task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stopped: Arc::clone(&self.stopped),
            stop_signal: Arc::clone(&self.stop_signal),
        }
    }
}

/// A cloneable handle that can signal [`Server::stop`]'s effect from
/// outside the task the server is serving on (spec §6 `stop`).
#[derive(Clone)]
pub struct ServerHandle {
    stopped: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl ServerHandle {
    /// Signals the accept loop to stop taking new connections; idempotent,
    /// same effect as [`Server::stop`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }
}
