//! The framework adapter (spec §4.6, C6): bridges a captured request plus
//! a buffered body into the typed handler world, dispatches through the
//! [`Router`](crate::router::Router), and turns the result -- or a missing
//! route, an oversized payload, a rejected payload, or a panicking handler
//! -- into a concrete [`Response`].
//!
//! Grounded in the teacher's `http` crate re-export (`HeaderMap<HeaderValue>`,
//! whose `HeaderValue::set_sensitive` is exactly the "sensitive" flag spec §3
//! asks for on header values, so this crate stores headers the same way h2
//! itself does rather than inventing a parallel multimap).

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::config::Configuration;
use crate::gzip;
use crate::router::{RouteOutcome, Router};
use crate::util::{self, has_traversal_segment, percent_decode_path, split_query};

/// A captured snapshot of an inbound request (spec §4.6 step 1). Copied out
/// of the codec's buffers because the codec may recycle them once the
/// stream closes.
#[derive(Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: String,
    headers: HeaderMap<HeaderValue>,
    remote: SocketAddr,
    timestamp: SystemTime,
}

impl Request {
    /// Builds a captured request snapshot from wire data. `raw_target` is
    /// the `:path` pseudo-header value (possibly carrying a query string).
    pub fn new(
        method: Method,
        raw_target: &str,
        headers: HeaderMap<HeaderValue>,
        remote: SocketAddr,
    ) -> Request {
        let (raw_path, raw_query) = split_query(raw_target);
        Request {
            method,
            path: percent_decode_path(raw_path),
            query: raw_query.to_string(),
            headers,
            remote,
            timestamp: SystemTime::now(),
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The percent-decoded path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw (still percent-encoded) query string, without the `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The request's header map.
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// The peer's socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// When this adapter captured the request.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Convenience accessor mirroring spec §8 S5 ("received timestamp").
    pub fn timestamp_millis(&self) -> u128 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    pub(crate) fn has_traversal(&self) -> bool {
        has_traversal_segment(&self.path)
    }
}

/// A handle a deferred response-body generator can hold onto, and whoever
/// eventually has more data can use to wake it back up (spec §4.7
/// `resume`), in place of the engine busy-polling the generator.
#[derive(Clone)]
pub struct ResumeHandle(Arc<Notify>);

impl ResumeHandle {
    pub(crate) fn new(notify: Arc<Notify>) -> Self {
        ResumeHandle(notify)
    }

    /// Builds a standalone handle with no engine-side registry backing it,
    /// for callers driving their own generator outside a routed request
    /// (e.g. the client's `submit_generator`, spec §6).
    pub fn standalone() -> Self {
        ResumeHandle(Arc::new(Notify::new()))
    }

    /// Wakes this stream's deferred `GeneratorPoll::Deferred` wait.
    pub fn resume(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.0.notified().await;
    }
}

/// A read-only view handed to handlers (spec §3 "RoutingRequest"): the
/// captured request, the server configuration, the fully-buffered request
/// body, and a handle to wake a deferred response-body generator.
pub struct RoutingRequest<'a> {
    request: &'a Request,
    config: &'a Configuration,
    body: &'a [u8],
    resume: ResumeHandle,
}

impl<'a> RoutingRequest<'a> {
    /// Builds a view over a captured request and its buffered body.
    pub fn new(request: &'a Request, config: &'a Configuration, body: &'a [u8], resume: ResumeHandle) -> Self {
        RoutingRequest {
            request,
            config,
            body,
            resume,
        }
    }

    /// The captured request.
    pub fn request(&self) -> &Request {
        self.request
    }

    /// The server's configuration.
    pub fn config(&self) -> &Configuration {
        self.config
    }

    /// The fully-buffered request body.
    pub fn body(&self) -> &[u8] {
        self.body
    }

    /// A handle this request's deferred body generator (if any) can use to
    /// wake itself back up once more data is ready (spec §4.7 `resume`).
    pub fn resume_handle(&self) -> ResumeHandle {
        self.resume.clone()
    }
}

/// What each invocation of a response body generator produces (spec §4.4).
pub enum GeneratorPoll {
    /// Wrote `n` bytes into the supplied buffer; more will follow.
    More(usize),
    /// Wrote `n` bytes (possibly zero) and this is the end of the body.
    Eof(usize),
    /// No bytes are available right now; the stream suspends until the
    /// handler calls `resume` on it (spec §4.3 backpressure).
    Deferred,
    /// The generator failed; the stream is reset with an internal error.
    Error,
}

/// A pull-based response body source. Boxed so `Response` stays a plain
/// value type regardless of which handler produced it.
pub type Generator = Box<dyn FnMut(&mut [u8]) -> GeneratorPoll + Send>;

enum BodySource {
    Buffer(Bytes),
    Generator(Generator),
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Buffer(b) => f.debug_tuple("Buffer").field(&b.len()).finish(),
            BodySource::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// A handler's response (spec §6 "Response capability set").
pub struct Response {
    status: u16,
    headers: HeaderMap<HeaderValue>,
    body: BodySource,
    compressed: bool,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("compressed", &self.compressed)
            .finish()
    }
}

impl Response {
    /// Starts a builder; see [`ResponseBuilder`].
    pub fn builder(status: u16) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// The response status.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response headers, prior to the standard headers the adapter
    /// fills in before emission (spec §4.6 step 5).
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// Whether the handler opted this response into gzip when the client
    /// supports it (spec §4.6 step 5, "opt-in per handler").
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The buffered body, or an empty slice if this response uses a
    /// generator. Mostly useful in tests.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            BodySource::Buffer(b) => b,
            BodySource::Generator(_) => &[],
        }
    }

    pub(crate) fn into_parts(self) -> (u16, HeaderMap<HeaderValue>, BodySourceHandle, bool) {
        (self.status, self.headers, BodySourceHandle(self.body), self.compressed)
    }
}

/// Opaque handle over a response's body, used by the stream/conn layer to
/// drive either a fixed buffer or a generator without re-exposing
/// [`BodySource`] itself.
pub struct BodySourceHandle(BodySource);

impl BodySourceHandle {
    /// Takes the buffered bytes, if this body is a fixed buffer.
    pub fn take_buffer(self) -> Result<Bytes, Generator> {
        match self.0 {
            BodySource::Buffer(b) => Ok(b),
            BodySource::Generator(g) => Err(g),
        }
    }
}

/// Builds a [`Response`] (spec §6 capability set).
pub struct ResponseBuilder {
    status: u16,
    headers: HeaderMap<HeaderValue>,
    body: BodySource,
    compressed: bool,
}

impl ResponseBuilder {
    /// Starts a builder for `status`, with an empty body.
    pub fn new(status: u16) -> Self {
        ResponseBuilder {
            status,
            headers: HeaderMap::new(),
            body: BodySource::Buffer(Bytes::new()),
            compressed: false,
        }
    }

    /// Overrides the status code.
    pub fn set_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Sets (appends to, for repeatable headers) a header. `sensitive`
    /// marks the value to be excluded from the HPACK dynamic table while
    /// still being Huffman-encoded (spec §3 "Header value").
    pub fn set_header(mut self, name: &str, value: &str, sensitive: bool) -> Self {
        if let (Ok(name), Ok(mut value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            value.set_sensitive(sensitive);
            self.headers.append(name, value);
        }
        self
    }

    /// Sets a fixed-buffer body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodySource::Buffer(body.into());
        self
    }

    /// Sets a pull-based body generator (spec §4.4).
    pub fn body_generator(mut self, generator: Generator) -> Self {
        self.body = BodySource::Generator(generator);
        self
    }

    /// Opts this response into gzip compression when the client advertises
    /// `accept-encoding: gzip` (spec §4.6 step 5).
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
            compressed: self.compressed,
        }
    }
}

// `Router::route` expects handlers to hand back a `Response`, not a
// builder; let call sites write `ResponseBuilder::new(200).body("ok")`
// instead of needing an explicit `.build()`, matching the teacher's own
// preference for terse call sites (e.g. `Response::new(Body::from(..))`).
impl From<ResponseBuilder> for Response {
    fn from(builder: ResponseBuilder) -> Response {
        builder.build()
    }
}

fn json_error_body(code: u16, cause: &str) -> Bytes {
    Bytes::from(json!({ "code": code, "cause": cause }).to_string())
}

fn synthetic_json(status: u16, cause: &str) -> Response {
    ResponseBuilder::new(status)
        .set_header("content-type", "application/json; charset=utf-8", false)
        .body(json_error_body(status, cause))
        .build()
}

/// The `extraProcess` customization point (spec §4.6 step 4): runs
/// out-of-band work after a response has been computed, given a handle to
/// the ambient tokio runtime to use as the "worker pool" named in
/// `test/extraprocess.cpp` (see SPEC_FULL.md).
pub type ExtraProcessHook =
    Arc<dyn Fn(&Request, &Response, &Handle) + Send + Sync>;

/// Bridges raw per-stream data to the router and back (spec §4.6).
pub struct Adapter {
    router: Arc<Router>,
    config: Arc<Configuration>,
    extra_process: Option<ExtraProcessHook>,
}

impl Adapter {
    /// Builds an adapter over a shared router and configuration.
    pub fn new(
        router: Arc<Router>,
        config: Arc<Configuration>,
        extra_process: Option<ExtraProcessHook>,
    ) -> Self {
        Adapter {
            router,
            config,
            extra_process,
        }
    }

    /// Runs the full request pipeline: payload cap check, payload scanner,
    /// routing (with 404/405/204 synthesis), `extraProcess`, CORS, and
    /// standard-header filling (spec §4.6 steps 2-6). `body` must already
    /// have been accumulated and cap-checked by the stream (spec §4.4); a
    /// `body_over_cap` of `true` short-circuits straight to 413. `resume` is
    /// handed to the matched handler's `RoutingRequest` so a deferred
    /// response-body generator can wake itself back up later.
    pub fn handle(&self, request: &Request, body: &[u8], body_over_cap: bool, resume: ResumeHandle) -> Response {
        let mut response = if body_over_cap {
            synthetic_json(413, "Payload Too Large")
        } else if let Some(ref scanner) = self.config.payload_scanner {
            if scanner(body) {
                self.route(request, body, resume)
            } else {
                synthetic_json(400, "Prohibited input")
            }
        } else {
            self.route(request, body, resume)
        };

        if let Some(ref hook) = self.extra_process {
            if let Ok(handle) = Handle::try_current() {
                hook(request, &response, &handle);
            }
        }

        self.apply_cors(request, &mut response);
        self.fill_standard_headers(&mut response);
        self.apply_gzip(request, &mut response);
        response
    }

    fn route(&self, request: &Request, body: &[u8], resume: ResumeHandle) -> Response {
        if request.has_traversal() {
            return synthetic_json(404, "Not Found");
        }

        if *request.method() == Method::OPTIONS && !self.router.has_explicit_options(request.path())
        {
            if self.router.can_route(request.path()) {
                return ResponseBuilder::new(204).build();
            }
            return synthetic_json(404, "Not Found");
        }

        let view = RoutingRequest::new(request, &self.config, body, resume);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.router.route(request.method(), request.path(), &view)
        }));

        match outcome {
            Ok(RouteOutcome::Matched(response)) => response,
            Ok(RouteOutcome::MethodNotAllowed(mut methods)) => {
                methods.sort_by_key(|m| m.to_string());
                let allow = methods
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut resp = synthetic_json(405, "Method Not Allowed");
                resp.headers
                    .insert("allow", HeaderValue::from_str(&allow).unwrap());
                resp
            }
            Ok(RouteOutcome::NotFound) => synthetic_json(404, "Not Found"),
            Err(_) => synthetic_json(500, "Internal Server Error"),
        }
    }

    fn apply_cors(&self, request: &Request, response: &mut Response) {
        let Some(origin) = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if !self.config.origin_allowed(origin) {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(origin) {
            response
                .headers
                .insert("access-control-allow-origin", value);
        }
        response
            .headers
            .append("vary", HeaderValue::from_static("origin"));

        if *request.method() == Method::OPTIONS {
            let methods = self.config.cors_methods.join(", ");
            if let Ok(value) = HeaderValue::from_str(&methods) {
                response
                    .headers
                    .insert("access-control-allow-methods", value);
            }
            response.headers.insert(
                "access-control-allow-headers",
                HeaderValue::from_static("*, authorization"),
            );
        }
    }

    fn fill_standard_headers(&self, response: &mut Response) {
        // Open question in spec §9: handler-set `content-type` wins; the
        // adapter only fills a default in when absent.
        if !response.headers.contains_key("content-type") {
            response.headers.insert(
                "content-type",
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
        }
        if !response.headers.contains_key("server") {
            response
                .headers
                .insert("server", HeaderValue::from_static("h2box"));
        }
        if !response.headers.contains_key("date") {
            if let Ok(value) = HeaderValue::from_str(&util::http_date_now()) {
                response.headers.insert("date", value);
            }
        }
        if !response.headers.contains_key("content-length") {
            if let BodySource::Buffer(ref b) = response.body {
                response
                    .headers
                    .insert("content-length", HeaderValue::from_str(&b.len().to_string()).unwrap());
            }
        }
    }

    fn apply_gzip(&self, request: &Request, response: &mut Response) {
        if !response.compressed {
            return;
        }
        let accepts_gzip = request
            .headers()
            .get("accept-encoding")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("gzip"))
            .unwrap_or(false);
        if !accepts_gzip {
            return;
        }
        let BodySource::Buffer(ref body) = response.body else {
            // Generators stream incrementally; compressing them would
            // require buffering the whole body anyway, which defeats the
            // point, so gzip only applies to fixed buffers.
            return;
        };
        if body.is_empty() {
            return;
        }
        match gzip::try_compress(body) {
            Some(compressed) => {
                let len = compressed.len();
                response.body = BodySource::Buffer(Bytes::from(compressed));
                response
                    .headers
                    .insert("content-encoding", HeaderValue::from_static("gzip"));
                response
                    .headers
                    .insert("content-length", HeaderValue::from_str(&len.to_string()).unwrap());
            }
            None => {
                // spec §7: compression failure falls back to the
                // uncompressed body; omit content-encoding.
            }
        }
    }
}

/// A tiny owned-request builder used only by unit tests in this crate
/// (e.g. [`crate::router`]'s tests) that need a `RoutingRequest` but don't
/// want to stand up a whole connection.
#[cfg(test)]
pub struct OwnedRequestForTest {
    request: Request,
    config: Configuration,
    body: Vec<u8>,
    resume: ResumeHandle,
}

#[cfg(test)]
impl OwnedRequestForTest {
    /// Builds a minimal request/config pair for tests.
    pub fn new(method: Method, path: &str, body: &str) -> Self {
        let headers = HeaderMap::new();
        let remote: SocketAddr = "127.0.0.1:0".parse().unwrap();
        OwnedRequestForTest {
            request: Request::new(method, path, headers, remote),
            config: Configuration::new(),
            body: body.as_bytes().to_vec(),
            resume: ResumeHandle::new(Arc::new(Notify::new())),
        }
    }

    /// Produces a `RoutingRequest` view borrowing this owned data.
    pub fn as_view(&self) -> RoutingRequest<'_> {
        RoutingRequest::new(&self.request, &self.config, &self.body, self.resume.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with_echo() -> Arc<Router> {
        let mut router = Router::new();
        router
            .add(
                Method::GET,
                "/",
                |_: &RoutingRequest<'_>, _: &crate::router::Params| {
                    ResponseBuilder::new(200)
                        .set_header("content-type", "text/plain", false)
                        .body("Ok")
                },
                None,
            )
            .unwrap();
        Arc::new(router)
    }

    fn adapter() -> Adapter {
        Adapter::new(router_with_echo(), Arc::new(Configuration::new()), None)
    }

    fn make_request(method: Method, path: &str) -> Request {
        Request::new(
            method,
            path,
            HeaderMap::new(),
            "127.0.0.1:1".parse().unwrap(),
        )
    }

    fn fresh_resume() -> ResumeHandle {
        ResumeHandle::new(Arc::new(Notify::new()))
    }

    #[test]
    fn s1_root_returns_ok() {
        let adapter = adapter();
        let req = make_request(Method::GET, "/");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body_bytes(), b"Ok");
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn missing_route_is_404_json() {
        let adapter = adapter();
        let req = make_request(Method::GET, "/missing");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = serde_json::from_slice(resp.body_bytes()).unwrap();
        assert_eq!(body["code"], 404);
        assert_eq!(body["cause"], "Not Found");
    }

    #[test]
    fn traversal_path_is_404() {
        let adapter = adapter();
        let req = make_request(Method::GET, "/a/../b");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn over_cap_body_is_413() {
        let adapter = adapter();
        let req = make_request(Method::POST, "/");
        let resp = adapter.handle(&req, b"too big", true, fresh_resume());
        assert_eq!(resp.status(), 413);
    }

    #[test]
    fn payload_scanner_rejects_body() {
        let config = Configuration::new().with_payload_scanner(|body| {
            !String::from_utf8_lossy(body).contains("reject me")
        });
        let adapter = Adapter::new(router_with_echo(), Arc::new(config), None);
        let req = make_request(Method::POST, "/");
        let resp = adapter.handle(&req, b"please reject me too", false, fresh_resume());
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = serde_json::from_slice(resp.body_bytes()).unwrap();
        assert_eq!(body["cause"], "Prohibited input");
    }

    #[test]
    fn method_miss_sets_allow_header() {
        let adapter = adapter();
        let req = make_request(Method::POST, "/");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.headers().get("allow").unwrap(), "GET");
    }

    #[test]
    fn options_without_explicit_handler_is_preflight() {
        let adapter = adapter();
        let req = make_request(Method::OPTIONS, "/");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.status(), 204);
    }

    #[test]
    fn cors_origin_echoed_when_allow_listed() {
        let config = Configuration::new().with_origins(["https://allowed.example"]);
        let adapter = Adapter::new(router_with_echo(), Arc::new(config), None);
        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://allowed.example"));
        let req = Request::new(Method::GET, "/", headers, "127.0.0.1:1".parse().unwrap());
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "https://allowed.example"
        );
    }

    #[test]
    fn content_type_handler_wins_over_default() {
        let adapter = adapter();
        let req = make_request(Method::GET, "/");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        // handler set text/plain; adapter must not overwrite with its
        // application/json default (spec §9 open question resolution).
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn content_length_is_filled_for_fixed_bodies() {
        let adapter = adapter();
        let req = make_request(Method::GET, "/");
        let resp = adapter.handle(&req, b"", false, fresh_resume());
        assert_eq!(resp.headers().get("content-length").unwrap(), "2");
    }

    /// Mirrors `original_source/test/extraprocess.cpp`: a fire-and-forget
    /// hook that dispatches a counter increment on the worker pool.
    #[test]
    fn extra_process_hook_is_invoked() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let counter = Arc::new(AtomicU64::new(0));
            let hook_counter = Arc::clone(&counter);
            let hook: ExtraProcessHook = Arc::new(move |_req, _resp, handle| {
                let hook_counter = Arc::clone(&hook_counter);
                handle.spawn(async move {
                    hook_counter.fetch_add(1, Ordering::SeqCst);
                });
            });

            let adapter = Adapter::new(router_with_echo(), Arc::new(Configuration::new()), Some(hook));
            let req = make_request(Method::GET, "/");
            let resp = adapter.handle(&req, b"", false, fresh_resume());
            assert_eq!(resp.status(), 200);

            // let the spawned fire-and-forget task run.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        });
    }
}
