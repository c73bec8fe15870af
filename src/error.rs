//! Error and result types.
//!
//! Mirrors the taxonomy from spec §6/§7: errors are either *transport*
//! failures (socket, TLS, DNS) or *protocol* failures (the HTTP/2 codec's
//! error codes, plus a small adapter-local set such as
//! [`Category::NoAppProtoNegotiated`]). The public surface is deliberately
//! narrow -- a single opaque [`Error`] struct with constructor functions,
//! following the shape of the teacher's own `hyper::Error`.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// The coarse category an [`Error`] falls into, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Socket, TLS handshake, or DNS resolution failure.
    Transport,
    /// HTTP/2 protocol violation reported by the codec, or an
    /// adapter-local protocol error such as failed ALPN negotiation.
    Protocol,
}

/// An error produced by this crate.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    category: Category,
    code: u32,
    cause: Option<Cause>,
}

#[derive(Debug)]
enum Kind {
    Io,
    Listen,
    Accept,
    TlsHandshake,
    Resolve,
    Codec,
    NoAppProtoNegotiated,
    Handler,
    Router,
}

impl Error {
    fn new(kind: Kind, category: Category, code: u32) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                category,
                code,
                cause: None,
            }),
        }
    }

    fn with_cause(mut self, cause: impl Into<Cause>) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// A failure establishing or reading/writing the TCP connection.
    pub fn new_io(cause: io::Error) -> Error {
        Error::new(Kind::Io, Category::Transport, 0).with_cause(cause)
    }

    /// A failure binding or listening on a configured endpoint.
    pub fn new_listen(cause: io::Error) -> Error {
        Error::new(Kind::Listen, Category::Transport, 0).with_cause(cause)
    }

    /// A failure accepting an incoming TCP connection.
    pub fn new_accept(cause: io::Error) -> Error {
        Error::new(Kind::Accept, Category::Transport, 0).with_cause(cause)
    }

    /// A failure during the TLS handshake (including handshake timeout).
    pub fn new_tls(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::TlsHandshake, Category::Transport, 0).with_cause(cause)
    }

    /// DNS resolution failure while resolving a bind or connect address.
    pub fn new_resolve(cause: io::Error) -> Error {
        Error::new(Kind::Resolve, Category::Transport, 0).with_cause(cause)
    }

    /// An error surfaced by the HTTP/2 codec (framing, HPACK, flow control).
    pub fn new_codec(code: u32, cause: impl Into<Cause>) -> Error {
        Error::new(Kind::Codec, Category::Protocol, code).with_cause(cause)
    }

    /// TLS completed but the peer did not negotiate ALPN `h2`.
    pub fn no_app_proto_negotiated() -> Error {
        Error::new(Kind::NoAppProtoNegotiated, Category::Protocol, 1)
    }

    /// A registered handler panicked or returned an error.
    pub fn new_handler(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::Handler, Category::Protocol, 0).with_cause(cause)
    }

    /// The router was misconfigured (e.g. an invalid pattern).
    pub fn new_router(message: impl Into<String>) -> Error {
        Error::new(Kind::Router, Category::Protocol, 0).with_cause(RouterMessage(message.into()))
    }

    /// The coarse category this error belongs to.
    pub fn category(&self) -> Category {
        self.inner.category
    }

    /// The protocol error code, when [`Error::category`] is [`Category::Protocol`].
    ///
    /// `0` for protocol errors that don't map to a numbered HTTP/2 error
    /// code (e.g. handler failures); `1` for [`Error::no_app_proto_negotiated`].
    pub fn code(&self) -> u32 {
        self.inner.code
    }

    pub(crate) fn is_transport(&self) -> bool {
        self.inner.category == Category::Transport
    }
}

#[derive(Debug)]
struct RouterMessage(String);

impl fmt::Display for RouterMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for RouterMessage {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Io => f.write_str("i/o error"),
            Kind::Listen => f.write_str("error binding listener"),
            Kind::Accept => f.write_str("error accepting connection"),
            Kind::TlsHandshake => f.write_str("tls handshake failed"),
            Kind::Resolve => f.write_str("dns resolution failed"),
            Kind::Codec => write!(f, "http/2 protocol error (code {})", self.inner.code),
            Kind::NoAppProtoNegotiated => f.write_str("no application protocol negotiated"),
            Kind::Handler => f.write_str("handler error"),
            Kind::Router => f.write_str("router error"),
        }?;
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new_io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_app_proto_negotiated_is_protocol_category() {
        let err = Error::no_app_proto_negotiated();
        assert_eq!(err.category(), Category::Protocol);
        assert_eq!(err.code(), 1);
    }

    #[test]
    fn io_error_is_transport_category() {
        let err = Error::new_io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.is_transport());
        assert!(err.source().is_some());
    }
}
