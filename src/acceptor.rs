//! The acceptor (spec §3 "Acceptor", §4.2 C2).
//!
//! Binds one or more endpoints, accepts TCP, optionally performs the TLS
//! handshake with ALPN gating to `h2`, and hands sockets off to
//! [`crate::conn::Connection`]. Grounded in the teacher's `server/tcp.rs`
//! (`socket2` for `SO_REUSEADDR`/backlog/`TCP_NODELAY`, kept in this tree
//! as reference and generalized here from hyper's single-protocol
//! `AddrIncoming` to this crate's TLS-or-plain dual mode).

use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::Path;
use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Builds a TLS `ServerConfig` with ALPN advertised as `h2` from a PEM
/// certificate chain and private key on disk (spec §6 "File descriptors
/// are opened only for TLS material if the embedder requests it").
pub fn server_config_from_pem(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path).map_err(Error::new_tls)?))
        .collect::<io::Result<Vec<CertificateDer<'static>>>>()
        .map_err(Error::new_tls)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path).map_err(Error::new_tls)?))
        .map_err(Error::new_tls)?
        .ok_or_else(|| Error::new_tls(io::Error::new(io::ErrorKind::InvalidData, "no private key found")))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(Error::new_tls)?;
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(Arc::new(config))
}

/// TLS material and ALPN policy for an acceptor, or plain TCP.
pub enum TransportMode {
    Plain,
    Tls(Arc<ServerConfig>),
}

/// Binds and accepts connections for one or more endpoints. Each bound
/// listener runs its own background accept loop; accepted sockets funnel
/// into one channel so callers see a single `accept()` regardless of how
/// many endpoints were configured.
pub struct Acceptor {
    accepted: mpsc::Receiver<io::Result<(TcpStream, SocketAddr)>>,
    mode: TransportMode,
    handshake_timeout: std::time::Duration,
    endpoint_count: usize,
}

impl Acceptor {
    /// Resolves and binds every address in `addrs`. At least one must
    /// succeed (spec §4.2); individual failures are logged and tolerated.
    pub fn bind(
        addrs: &[SocketAddr],
        backlog: i32,
        mode: TransportMode,
        handshake_timeout: std::time::Duration,
    ) -> Result<Acceptor> {
        let mut listeners = Vec::new();
        let mut last_err = None;

        for addr in addrs {
            match bind_one(*addr, backlog) {
                Ok(listener) => listeners.push(listener),
                Err(err) => {
                    warn!(%addr, error = %err, "failed to bind endpoint");
                    last_err = Some(err);
                }
            }
        }

        if listeners.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                Error::new_listen(io::Error::new(io::ErrorKind::AddrNotAvailable, "no endpoints"))
            }));
        }

        let endpoint_count = listeners.len();
        let (tx, rx) = mpsc::channel(64);
        for listener in listeners {
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    let result = listener.accept().await;
                    let is_err = result.is_err();
                    if tx.send(result).await.is_err() || is_err {
                        break;
                    }
                }
            });
        }

        Ok(Acceptor {
            accepted: rx,
            mode,
            handshake_timeout,
            endpoint_count,
        })
    }

    /// Number of endpoints this acceptor successfully bound.
    pub fn endpoint_count(&self) -> usize {
        self.endpoint_count
    }

    /// Accepts the next connection from any bound endpoint, applies
    /// `TCP_NODELAY`, and -- if TLS is enabled -- drives the handshake
    /// under a deadline, confirming ALPN selected `h2` (spec §4.2).
    pub async fn accept(&mut self) -> Result<(Accepted, SocketAddr)> {
        let (stream, remote) = self
            .accepted
            .recv()
            .await
            .ok_or_else(|| Error::new_accept(io::Error::new(io::ErrorKind::BrokenPipe, "acceptor closed")))?
            .map_err(Error::new_accept)?;
        stream.set_nodelay(true).map_err(Error::new_accept)?;

        match &self.mode {
            TransportMode::Plain => Ok((Accepted::Plain(stream), remote)),
            TransportMode::Tls(config) => {
                let acceptor = TlsAcceptor::from(Arc::clone(config));
                let handshake = tokio::time::timeout(self.handshake_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| Error::new_tls("tls handshake timed out"))?
                    .map_err(Error::new_tls)?;

                let negotiated = handshake.get_ref().1.alpn_protocol().map(|p| p.to_vec());
                if negotiated.as_deref() != Some(b"h2") {
                    return Err(Error::no_app_proto_negotiated());
                }
                Ok((Accepted::Tls(Box::new(handshake)), remote))
            }
        }
    }
}

/// An accepted, optionally TLS-terminated, socket ready for the HTTP/2
/// handshake.
pub enum Accepted {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

fn bind_one(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(Error::new_listen)?;
    socket.set_reuse_address(true).map_err(Error::new_listen)?;
    socket.set_nonblocking(true).map_err(Error::new_listen)?;
    socket.bind(&addr.into()).map_err(Error::new_listen)?;
    let backlog = if backlog < 0 { i32::MAX } else { backlog };
    socket.listen(backlog).map_err(Error::new_listen)?;

    let std_listener: StdTcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener).map_err(Error::new_listen)?;
    debug!(%addr, "endpoint bound");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_loopback_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let acceptor = Acceptor::bind(
            &[addr],
            -1,
            TransportMode::Plain,
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(acceptor.endpoint_count(), 1);
    }

    #[test]
    fn empty_endpoint_list_fails() {
        let result = Acceptor::bind(&[], -1, TransportMode::Plain, std::time::Duration::from_secs(1));
        assert!(result.is_err());
    }
}
