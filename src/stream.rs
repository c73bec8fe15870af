//! The per-stream state machine (spec §3 "Stream", §4.4 C4).
//!
//! `h2` (the external codec, C7) already tracks HTTP/2-level stream state
//! (flow-control windows, frame ordering); this module layers the
//! request-assembly state machine spec §4.4 asks for on top of it --
//! pseudo-header validation, body accumulation against the payload cap,
//! and the response body source contract -- the same division of labor
//! the teacher draws between `h2`'s wire-level `RecvStream`/`SendStream`
//! and its own higher-level `body::Incoming` type.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Method};

use crate::adapter::{BodySourceHandle, Generator};
use crate::error::{Error, Result};

/// Where a stream sits in the request/response lifecycle (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeadersRecv,
    BodyRecv,
    HandlerInvoked,
    ResponseHeaders,
    ResponseBody,
    Closed,
}

/// Accumulates one stream's request headers and body, enforcing the
/// pseudo-header and content-length invariants from spec §4.4, independent
/// of the underlying codec.
pub struct Stream {
    id: u32,
    state: StreamState,
    method: Option<Method>,
    path: Option<String>,
    headers: HeaderMap<HeaderValue>,
    body: BytesMut,
    content_length_hint: Option<u64>,
    over_cap: bool,
    max_payload_size: u64,
}

impl Stream {
    /// Starts a new stream in the `Idle` state.
    pub fn new(id: u32, max_payload_size: u64) -> Stream {
        Stream {
            id,
            state: StreamState::Idle,
            method: None,
            path: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            content_length_hint: None,
            over_cap: false,
            max_payload_size,
        }
    }

    /// This stream's HTTP/2 stream id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Records the `:method` pseudo-header. Spec §4.4: a duplicate
    /// singleton pseudo-header is a protocol error.
    pub fn set_method(&mut self, method: Method) -> Result<()> {
        if self.method.is_some() {
            return Err(Error::new_codec(1, "duplicate :method pseudo-header"));
        }
        self.method = Some(method);
        Ok(())
    }

    /// Records the `:path` pseudo-header.
    pub fn set_path(&mut self, path: String) -> Result<()> {
        if self.path.is_some() {
            return Err(Error::new_codec(1, "duplicate :path pseudo-header"));
        }
        self.path = Some(path);
        Ok(())
    }

    /// Records a regular (non-pseudo) header. `sensitive` is propagated
    /// onto the stored `HeaderValue` (spec §3 "Header value").
    pub fn push_header(&mut self, name: http::HeaderName, mut value: HeaderValue, sensitive: bool) {
        if name == http::header::CONTENT_LENGTH {
            if let Ok(text) = value.to_str() {
                self.content_length_hint = text.parse::<u64>().ok();
            }
        }
        value.set_sensitive(sensitive);
        self.headers.append(name, value);
    }

    /// Finishes header processing (`on_request_end_headers`, spec §4.3).
    /// Validates that both required pseudo-headers arrived.
    pub fn end_headers(&mut self) -> Result<()> {
        if self.method.is_none() || self.path.is_none() {
            return Err(Error::new_codec(1, "missing required pseudo-header"));
        }
        self.state = StreamState::HeadersRecv;
        Ok(())
    }

    /// Appends a `DATA` frame's payload to the accumulated body, enforcing
    /// the payload cap (spec §4.4 request assembly).
    pub fn push_data(&mut self, chunk: &[u8]) {
        self.state = StreamState::BodyRecv;
        if self.over_cap {
            return;
        }
        if (self.body.len() as u64) + (chunk.len() as u64) > self.max_payload_size {
            self.over_cap = true;
            self.body.clear();
            return;
        }
        self.body.extend_from_slice(chunk);
    }

    /// Finishes body accumulation (`on_request_end_stream`). Validates the
    /// `content-length` hint against the actual accumulated length when a
    /// hint was present and the payload wasn't already short-circuited for
    /// being over cap (spec §4.4 "Content-Length mismatch").
    pub fn end_stream(&mut self) -> Result<()> {
        if !self.over_cap {
            if let Some(expected) = self.content_length_hint {
                if expected != self.body.len() as u64 {
                    return Err(Error::new_codec(1, "content-length mismatch"));
                }
            }
        }
        self.state = StreamState::HandlerInvoked;
        Ok(())
    }

    /// The accumulated method, once headers have ended.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// The raw `:path` pseudo-header value (path plus optional query).
    pub fn raw_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The regular (non-pseudo) request headers.
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// The accumulated request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the body exceeded `maxPayloadSize` and was short-circuited.
    pub fn is_over_cap(&self) -> bool {
        self.over_cap
    }

    /// Marks this stream as having sent response headers.
    pub fn begin_response(&mut self) {
        self.state = StreamState::ResponseHeaders;
    }

    /// Marks this stream as streaming a response body.
    pub fn begin_response_body(&mut self) {
        self.state = StreamState::ResponseBody;
    }

    /// Marks this stream closed; called on `on_stream_close` or after the
    /// response body completes.
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }
}

/// The response-side body source handed to the codec (spec §4.4
/// "Response emission"). Mirrors [`crate::adapter::Response`]'s body
/// without pulling in the adapter's HTTP-framing concerns.
pub enum ResponseBody {
    /// A fixed, already-available buffer.
    Fixed(Bytes),
    /// A pull-based generator invoked as the codec has window capacity.
    Generator(Generator),
}

impl From<BodySourceHandle> for ResponseBody {
    fn from(handle: BodySourceHandle) -> ResponseBody {
        match handle.take_buffer() {
            Ok(bytes) => ResponseBody::Fixed(bytes),
            Err(generator) => ResponseBody::Generator(generator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderName;

    #[test]
    fn happy_path_transitions() {
        let mut stream = Stream::new(1, 1024);
        stream.set_method(Method::GET).unwrap();
        stream.set_path("/".into()).unwrap();
        stream.end_headers().unwrap();
        assert_eq!(stream.state(), StreamState::HeadersRecv);
        stream.push_data(b"hello");
        assert_eq!(stream.body(), b"hello");
        stream.end_stream().unwrap();
        assert_eq!(stream.state(), StreamState::HandlerInvoked);
    }

    #[test]
    fn duplicate_method_is_protocol_error() {
        let mut stream = Stream::new(1, 1024);
        stream.set_method(Method::GET).unwrap();
        assert!(stream.set_method(Method::POST).is_err());
    }

    #[test]
    fn missing_path_fails_end_headers() {
        let mut stream = Stream::new(1, 1024);
        stream.set_method(Method::GET).unwrap();
        assert!(stream.end_headers().is_err());
    }

    #[test]
    fn over_cap_body_is_flagged_and_cleared() {
        let mut stream = Stream::new(1, 4);
        stream.push_data(b"hello world");
        assert!(stream.is_over_cap());
        assert!(stream.body().is_empty());
    }

    #[test]
    fn content_length_mismatch_is_protocol_error() {
        let mut stream = Stream::new(1, 1024);
        stream.set_method(Method::POST).unwrap();
        stream.set_path("/".into()).unwrap();
        stream.push_header(
            HeaderName::from_static("content-length"),
            HeaderValue::from_static("10"),
            false,
        );
        stream.end_headers().unwrap();
        stream.push_data(b"short");
        assert!(stream.end_stream().is_err());
    }

    #[test]
    fn sensitive_header_flag_is_preserved() {
        let mut stream = Stream::new(1, 1024);
        stream.push_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("secret"),
            true,
        );
        let value = stream.headers().get("authorization").unwrap();
        assert!(value.is_sensitive());
    }
}
