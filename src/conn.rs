//! The per-connection engine (spec §3 "Connection", §4.3 C3).
//!
//! Drives one [`crate::codec::Codec`] session: accepts inbound streams,
//! hands each to the [`crate::adapter::Adapter`], and writes back whatever
//! response the adapter produces. Grounded in the teacher's
//! `server/tcp.rs`/`rt/mod.rs` pairing of "one task owns the accept loop,
//! each unit of work gets spawned" -- here the connection task owns the
//! `h2` session (the strand's serialization point: only one task ever
//! calls into the codec) while each stream's handler runs on its own
//! spawned task, which is how `h2`'s own examples multiplex concurrent
//! requests over a single connection (spec §8 S5).
//!
//! The timer re-arm discipline in spec §4.3 ("single timer, sentinel
//! far-future expiry set inside the fired handler before any re-arm") is a
//! manual-timer-wheel concern from `original_source/lib/asio_server_connection.h`;
//! under tokio, `Sleep::reset` called before the next `select!` iteration
//! already rules out the race it guards against, so that's the mapping
//! used here instead of a literal sentinel value.
//!
//! A handler panic is caught at the dispatch boundary, logged through
//! `tracing`, and resets the stream rather than taking down the connection
//! or the executor's loop it ran on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn, Instrument};

use crate::adapter::{Adapter, Request as CapturedRequest, ResumeHandle};
use crate::codec::{self, Codec, InboundStream, ResumeRegistry};
use crate::config::Configuration;
use crate::error::Result;
use crate::stream::{ResponseBody, Stream as StreamModel};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a connection (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Starting,
    Reading,
    Stopping,
    Stopped,
}

/// Drives one accepted (and, if applicable, TLS-terminated) socket through
/// its full HTTP/2 lifecycle.
pub struct Connection<T> {
    io: T,
    remote: SocketAddr,
    adapter: Arc<Adapter>,
    config: Arc<Configuration>,
    id: u64,
    state: ConnState,
    resume_registry: Arc<ResumeRegistry>,
    next_stream_id: u64,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Builds a connection engine for an already-accepted (and, if TLS is
    /// enabled, already-handshaken) socket.
    pub fn new(io: T, remote: SocketAddr, adapter: Arc<Adapter>, config: Arc<Configuration>) -> Self {
        Connection {
            io,
            remote,
            adapter,
            config,
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            state: ConnState::Starting,
            resume_registry: Arc::new(ResumeRegistry::new()),
            next_stream_id: 0,
        }
    }

    /// Runs the connection to completion: codec handshake, accept loop
    /// with idle-timeout enforcement, graceful close on EOF or GOAWAY.
    pub async fn serve(mut self) -> Result<()> {
        let span = tracing::info_span!("connection", id = self.id, remote = %self.remote);
        async move {
            self.state = ConnState::Starting;
            let adapter = Arc::clone(&self.adapter);
            let config = Arc::clone(&self.config);
            let remote = self.remote;
            let conn_id = self.id;
            let registry = Arc::clone(&self.resume_registry);
            let mut next_stream_id = self.next_stream_id;
            let mut codec = Codec::create_session(self.io, 16 * 1024, 65535).await?;
            self.state = ConnState::Reading;

            let deadline = sleep(config.read_timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;
                    next = codec.accept() => {
                        match next {
                            Some(Ok(inbound)) => {
                                deadline.as_mut().reset(Instant::now() + config.read_timeout);
                                dispatch(
                                    inbound,
                                    Arc::clone(&adapter),
                                    Arc::clone(&config),
                                    remote,
                                    conn_id,
                                    next_stream_id,
                                    Arc::clone(&registry),
                                );
                                next_stream_id += 1;
                            }
                            Some(Err(err)) => {
                                warn!(error = %err, "codec error, closing connection");
                                break;
                            }
                            None => {
                                trace!("codec reports no further work");
                                break;
                            }
                        }
                    }
                    _ = &mut deadline => {
                        debug!("idle read timeout elapsed, closing connection");
                        break;
                    }
                }
            }

            self.state = ConnState::Stopping;
            drop(codec);
            self.state = ConnState::Stopped;
            Ok(())
        }
        .instrument(span)
        .await
    }
}

fn dispatch(
    inbound: InboundStream,
    adapter: Arc<Adapter>,
    config: Arc<Configuration>,
    remote: SocketAddr,
    conn_id: u64,
    stream_id: u64,
    registry: Arc<ResumeRegistry>,
) {
    tokio::spawn(
        async move {
            if let Err(err) = handle_stream(inbound, adapter, config, remote, stream_id, registry).await {
                warn!(error = %err, "stream handling failed");
            }
        }
        .instrument(tracing::debug_span!("stream", conn_id, stream_id)),
    );
}

async fn handle_stream(
    inbound: InboundStream,
    adapter: Arc<Adapter>,
    config: Arc<Configuration>,
    remote: SocketAddr,
    stream_id: u64,
    registry: Arc<ResumeRegistry>,
) -> Result<()> {
    let result = handle_stream_inner(inbound, adapter, config, remote, stream_id, &registry).await;
    registry.release(stream_id);
    result
}

async fn handle_stream_inner(
    inbound: InboundStream,
    adapter: Arc<Adapter>,
    config: Arc<Configuration>,
    remote: SocketAddr,
    stream_id: u64,
    registry: &ResumeRegistry,
) -> Result<()> {
    let InboundStream { request, mut responder } = inbound;
    let (parts, mut body) = request.into_parts();

    let mut model = StreamModel::new(stream_id as u32, config.max_payload_size);
    model.set_method(parts.method.clone())?;
    model.set_path(
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string()),
    )?;
    for (name, value) in parts.headers.iter() {
        model.push_header(name.clone(), value.clone(), value.is_sensitive());
    }
    model.end_headers()?;

    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| crate::error::Error::new_codec(1, e))?;
        let len = chunk.len();
        model.push_data(&chunk);
        let _ = body.flow_control().release_capacity(len);
    }
    model.end_stream()?;

    let captured = CapturedRequest::new(
        parts.method.clone(),
        model.raw_path().unwrap_or("/"),
        headers_without_pseudo(&parts.headers),
        remote,
    );

    let resume = ResumeHandle::new(registry.register(stream_id));
    let response = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        adapter.handle(&captured, model.body(), model.is_over_cap(), resume.clone())
    })) {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(&payload);
            warn!(error = %message, "handler panicked, resetting stream");
            drop(responder);
            return Ok(());
        }
    };
    let (status, headers, body_handle, _compressed) = response.into_parts();
    let body: ResponseBody = body_handle.into();

    match body {
        ResponseBody::Fixed(bytes) => {
            let mut send = codec::submit_response(&mut responder, status, headers, bytes.is_empty())?;
            if !bytes.is_empty() {
                send.send_data(bytes, true).map_err(|e| crate::error::Error::new_codec(1, e))?;
            }
        }
        ResponseBody::Generator(mut generator) => {
            let mut send = codec::submit_response(&mut responder, status, headers, false)?;
            let mut buf = vec![0u8; 8192];
            loop {
                match generator(&mut buf) {
                    crate::adapter::GeneratorPoll::More(n) => {
                        send.reserve_capacity(n);
                        send.send_data(bytes::Bytes::copy_from_slice(&buf[..n]), false)
                            .map_err(|e| crate::error::Error::new_codec(1, e))?;
                    }
                    crate::adapter::GeneratorPoll::Eof(n) => {
                        send.send_data(bytes::Bytes::copy_from_slice(&buf[..n]), true)
                            .map_err(|e| crate::error::Error::new_codec(1, e))?;
                        break;
                    }
                    crate::adapter::GeneratorPoll::Deferred => {
                        // spec §4.3 backpressure: suspend until whoever
                        // holds this stream's `ResumeHandle` calls
                        // `resume()`, instead of polling the generator.
                        resume.wait().await;
                    }
                    crate::adapter::GeneratorPoll::Error => {
                        codec::reset_stream(&mut send, 2 /* INTERNAL_ERROR */);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

fn headers_without_pseudo(headers: &http::HeaderMap<http::HeaderValue>) -> http::HeaderMap<http::HeaderValue> {
    let mut out = http::HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        out.append(name.clone(), value.clone());
    }
    out
}
