//! # h2box
//!
//! `h2box` is an embeddable HTTP/2 server, and a thin symmetric client,
//! built directly on [`h2`] and `tokio`. Applications register per-route
//! handlers with a [`Server`]; the server accepts connections, terminates
//! TLS with ALPN negotiation to `h2`, routes requests through a
//! pattern-trie [`Router`], and serializes typed [`adapter::Response`]s
//! back over the wire.
//!
//! ## What this crate is not
//!
//! There is no HTTP/1.1 support, no h2c prior-knowledge cleartext
//! negotiation, and no HTTP/2 server push. These are explicit non-goals;
//! see each module's documentation for the invariants it does enforce.
//!
//! ## Layout
//!
//! - [`executor`] -- the pool of single-threaded event loops connections
//!   are pinned to.
//! - [`acceptor`] -- binds endpoints, accepts TCP, performs the TLS/ALPN
//!   handshake.
//! - [`conn`] -- drives one connection's [`codec`] session end to end.
//! - [`stream`] -- per-stream request assembly and response body model.
//! - [`router`] -- pattern-trie `(method, path) -> handler` dispatch.
//! - [`adapter`] -- bridges routed requests to typed handlers; CORS,
//!   payload caps, gzip, `extraProcess`.
//! - [`config`] -- the `Configuration` builder.
//! - [`client`] -- the thin client half.
//!
//! This crate does not install a `tracing` subscriber; embedding
//! applications choose their own.

pub use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};

pub use crate::adapter::{
    Adapter, ExtraProcessHook, Generator, GeneratorPoll, Request, Response, ResponseBuilder,
    ResumeHandle, RoutingRequest,
};
pub use crate::config::{Configuration, PayloadScanner};
pub use crate::error::{Category, Error, Result};
pub use crate::router::{Handler, Params, Router};
pub use crate::server::{Server, ServerHandle};

pub mod acceptor;
pub mod adapter;
pub mod client;
pub mod codec;
pub mod config;
pub mod conn;
mod error;
pub mod executor;
mod gzip;
pub mod router;
mod server;
pub mod stream;
mod util;
