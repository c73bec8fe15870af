//! The thin client half (spec §1 "a thin symmetric client", §6 "Client
//! session").
//!
//! Grounded in the same `h2` crate used server-side (`h2::client`), kept
//! intentionally small per spec §6 -- a session type plus a handful of
//! methods, no connection pooling, no retry policy, mirroring how the
//! teacher's own `client` module (trimmed from this tree; its
//! connection-pool machinery has no counterpart in this spec) separates
//! "one client connection" from "a pool of them".

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2::client::SendRequest;
use http::{Method, Request, Uri};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::adapter::{Generator, GeneratorPoll, ResumeHandle};
use crate::error::{Error, Result};

/// One HTTP/2 client connection (spec §6 "session(host, port)").
pub struct Session {
    send_request: SendRequest<Bytes>,
    peer: SocketAddr,
    read_timeout: std::sync::Mutex<Duration>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

/// A response received over a [`Session`] (spec §6 `request.on_response`).
pub struct ClientResponse {
    pub status: u16,
    pub headers: http::HeaderMap<http::HeaderValue>,
    body: h2::RecvStream,
}

impl ClientResponse {
    /// Pulls the next chunk of response body data (spec §6 `response.on_data`).
    /// Returns `None` once the body is exhausted.
    pub async fn on_data(&mut self) -> Option<Result<Bytes>> {
        match self.body.data().await {
            None => None,
            Some(Ok(chunk)) => {
                let len = chunk.len();
                let _ = self.body.flow_control().release_capacity(len);
                Some(Ok(chunk))
            }
            Some(Err(err)) => Some(Err(Error::new_codec(1, err))),
        }
    }

    /// Drains any remaining body data and reports how the stream ended
    /// (spec close notification): `0` (`NO_ERROR`) if it closed normally,
    /// or the HTTP/2 error code the peer reset it with.
    pub async fn on_close(&mut self) -> u32 {
        loop {
            match self.body.data().await {
                None => return 0,
                Some(Ok(chunk)) => {
                    let len = chunk.len();
                    let _ = self.body.flow_control().release_capacity(len);
                }
                Some(Err(err)) => return err.reason().map(u32::from).unwrap_or(2),
            }
        }
    }
}

impl Session {
    /// Connects to `host:port` over plain TCP and performs the HTTP/2
    /// client handshake (spec §6 `session(host, port)`).
    pub async fn connect_plain(host: &str, port: u16) -> Result<Session> {
        let (stream, peer) = dial(host, port).await?;
        Self::handshake(stream, peer).await
    }

    /// Connects over TLS, requiring ALPN `h2` (spec §4.2's client-side
    /// counterpart).
    pub async fn connect_tls(host: &str, port: u16, tls_config: Arc<ClientConfig>) -> Result<Session> {
        let (stream, peer) = dial(host, port).await?;
        let connector = TlsConnector::from(tls_config);
        let server_name = ServerName::try_from(host.to_string()).map_err(Error::new_tls)?;
        let tls_stream = connector.connect(server_name, stream).await.map_err(Error::new_tls)?;
        let negotiated = tls_stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());
        if negotiated.as_deref() != Some(b"h2") {
            return Err(Error::no_app_proto_negotiated());
        }
        Self::handshake(tls_stream, peer).await
    }

    async fn handshake<T>(io: T, peer: SocketAddr) -> Result<Session>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (send_request, connection) = h2::client::handshake(io).await.map_err(|e| Error::new_codec(1, e))?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            tokio::select! {
                result = connection => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "client connection driver exited");
                    }
                }
                _ = shutdown_rx => {
                    tracing::debug!("client session shut down");
                }
            }
        });
        Ok(Session {
            send_request,
            peer,
            read_timeout: std::sync::Mutex::new(Duration::from_secs(30)),
            shutdown: Some(shutdown_tx),
        })
    }

    /// Reports the peer this session connected to (spec §6 `on_connect`).
    /// The handshake already completed by the time a `Session` exists, so
    /// this fires `f` immediately instead of registering a callback for a
    /// later event the way the original's asynchronous connect does.
    pub fn on_connect<F: FnOnce(SocketAddr)>(&self, f: F) {
        f(self.peer);
    }

    /// Sets the idle-read timeout applied to subsequent requests (spec §6
    /// `session.read_timeout(duration)`).
    pub fn read_timeout(&self, timeout: Duration) {
        *self.read_timeout.lock().unwrap() = timeout;
    }

    /// Submits a request (spec §6 `submit(method, uri, [body], [headers])`).
    /// `body` is sent as a single fixed buffer; streaming request bodies
    /// are out of scope for this thin client (spec §1).
    pub async fn submit(
        &mut self,
        method: Method,
        uri: Uri,
        headers: http::HeaderMap<http::HeaderValue>,
        body: Option<Bytes>,
    ) -> Result<ClientResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        let request = builder.body(()).map_err(|e| Error::new_codec(1, e))?;

        let timeout = *self.read_timeout.lock().unwrap();
        let (response_future, mut send_stream) = self
            .send_request
            .send_request(request, body.is_none())
            .map_err(|e| Error::new_codec(1, e))?;

        if let Some(body) = body {
            send_stream.send_data(body, true).map_err(|e| Error::new_codec(1, e))?;
        }

        let response = tokio::time::timeout(timeout, response_future)
            .await
            .map_err(|_| Error::new_io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout")))?
            .map_err(|e| Error::new_codec(1, e))?;

        let (parts, body) = response.into_parts();
        Ok(ClientResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }

    /// Submits a request whose body is produced on demand (spec §6
    /// `submit(method, uri, [body_generator], [headers])`), the same
    /// `More`/`Eof`/`Deferred`/`Error` contract the server's response
    /// bodies use. `resume` is what a `Deferred` generator waits on; build
    /// one with [`ResumeHandle::standalone`] and hand the same clone to
    /// whatever produces more data.
    pub async fn submit_generator(
        &mut self,
        method: Method,
        uri: Uri,
        headers: http::HeaderMap<http::HeaderValue>,
        mut generator: Generator,
        resume: ResumeHandle,
    ) -> Result<ClientResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        let request = builder.body(()).map_err(|e| Error::new_codec(1, e))?;

        let timeout = *self.read_timeout.lock().unwrap();
        let (response_future, mut send_stream) = self
            .send_request
            .send_request(request, false)
            .map_err(|e| Error::new_codec(1, e))?;

        let mut buf = vec![0u8; 8192];
        loop {
            match generator(&mut buf) {
                GeneratorPoll::More(n) => {
                    send_stream.reserve_capacity(n);
                    send_stream
                        .send_data(Bytes::copy_from_slice(&buf[..n]), false)
                        .map_err(|e| Error::new_codec(1, e))?;
                }
                GeneratorPoll::Eof(n) => {
                    send_stream
                        .send_data(Bytes::copy_from_slice(&buf[..n]), true)
                        .map_err(|e| Error::new_codec(1, e))?;
                    break;
                }
                GeneratorPoll::Deferred => resume.wait().await,
                GeneratorPoll::Error => {
                    send_stream.send_reset(h2::Reason::from(2));
                    return Err(Error::new_codec(2, "request body generator reported an error"));
                }
            }
        }

        let response = tokio::time::timeout(timeout, response_future)
            .await
            .map_err(|_| Error::new_io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout")))?
            .map_err(|e| Error::new_codec(1, e))?;

        let (parts, body) = response.into_parts();
        Ok(ClientResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }

    /// Stops the connection driver, closing the session (spec §6
    /// `session.shutdown()`).
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn dial(host: &str, port: u16) -> Result<(TcpStream, SocketAddr)> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(Error::new_resolve)?
        .next()
        .ok_or_else(|| Error::new_resolve(std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses")))?;
    let stream = TcpStream::connect(addr).await.map_err(Error::new_accept)?;
    stream.set_nodelay(true).map_err(Error::new_accept)?;
    Ok((stream, addr))
}
