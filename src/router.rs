//! The request router (spec §3 "Router", §4.5 C5).
//!
//! A pattern trie matches `(method, path)` against registered routes. Each
//! edge is a literal segment, a named parameter `{name}` that captures one
//! segment, or a trailing wildcard `*`. Specificity is literal > named >
//! wildcard, broken segment-by-segment from the root (spec §3 invariant).
//!
//! The trie itself only answers "what matches"; synthesizing 404/405/204
//! responses from a match (or lack of one) is the framework adapter's job
//! (spec §4.5 "Policy" / §4.6), kept out of this module so the router stays
//! a pure, side-effect-free lookup structure -- the shape the teacher's own
//! routing-adjacent code (`server/accept.rs`'s `Accept` trait) favors:
//! small, single-purpose, easy to unit test in isolation.

use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{Response, RoutingRequest};
use crate::error::{Error, Result};

/// Path parameters captured while matching a pattern, e.g. `{slug}` in
/// `/data/{slug}`. Preserves registration order.
#[derive(Debug, Default, Clone)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Looks up a captured parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over all captured `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }
}

/// A registered handler: synchronous per spec §5 ("Handler invocation is
/// synchronous on the strand") -- long-running work is offloaded by the
/// handler itself via the generator + `resume` mechanism (spec §4.3, §4.4),
/// not by making this trait asynchronous.
pub trait Handler: Send + Sync {
    /// Processes one request and produces its response.
    fn call(&self, req: &RoutingRequest<'_>, params: &Params) -> Response;
}

impl<F, R> Handler for F
where
    F: Fn(&RoutingRequest<'_>, &Params) -> R + Send + Sync,
    R: Into<Response>,
{
    fn call(&self, req: &RoutingRequest<'_>, params: &Params) -> Response {
        (self)(req, params).into()
    }
}

struct Route {
    handler: Arc<dyn Handler>,
    #[allow(dead_code)] // surfaced via Router::route_name for diagnostics/tests
    name: Option<String>,
}

#[derive(Default)]
struct Node {
    literal: HashMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<Box<Node>>,
    methods: HashMap<Method, Route>,
}

impl Node {
    fn child_mut(&mut self, segment: &Segment) -> &mut Node {
        match segment {
            Segment::Literal(s) => self.literal.entry(s.clone()).or_default(),
            Segment::Param(name) => {
                if self.param.is_none() {
                    self.param = Some((name.clone(), Box::new(Node::default())));
                }
                &mut self.param.as_mut().unwrap().1
            }
            Segment::Wildcard => {
                if self.wildcard.is_none() {
                    self.wildcard = Some(Box::new(Node::default()));
                }
                self.wildcard.as_mut().unwrap()
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let trimmed = pattern.trim_matches('/');
    let mut segments = Vec::new();
    let parts: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };
    for (i, part) in parts.iter().enumerate() {
        if *part == "*" {
            if i != parts.len() - 1 {
                return Err(Error::new_router(format!(
                    "wildcard must be the last segment in pattern {pattern:?}"
                )));
            }
            segments.push(Segment::Wildcard);
        } else if let Some(name) = part.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() {
                return Err(Error::new_router(format!(
                    "empty parameter name in pattern {pattern:?}"
                )));
            }
            segments.push(Segment::Param(name.to_string()));
        } else {
            segments.push(Segment::Literal((*part).to_string()));
        }
    }
    Ok(segments)
}

/// Outcome of matching `(method, path)` against the trie, before any
/// framework-level synthesis of 404/405/204 responses.
pub enum RouteOutcome {
    /// Exactly one route matched; invoking it produced this response.
    Matched(Response),
    /// The path matched at least one pattern, but not for this method.
    /// Carries every method registered on the matched pattern, for the
    /// synthesized `Allow` header (spec §4.5 policy).
    MethodNotAllowed(Vec<Method>),
    /// No pattern matches the path at all.
    NotFound,
}

/// The pattern trie. Read-only after server start; shared across
/// connections without locking (spec §5 "Shared resources").
#[derive(Default)]
pub struct Router {
    root: Node,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Router::default()
    }

    /// Registers `handler` for `(method, pattern)`. A duplicate
    /// `(method, pattern)` pair replaces the previous registration.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
        name: Option<&str>,
    ) -> Result<()> {
        let segments = parse_pattern(pattern)?;
        let mut node = &mut self.root;
        for segment in &segments {
            node = node.child_mut(segment);
        }
        node.methods.insert(
            method,
            Route {
                handler: Arc::new(handler),
                name: name.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Looks up a leaf node for a decoded path without regard to method.
    fn find_leaf<'a>(&'a self, decoded_path: &str) -> Option<(&'a Node, Params)> {
        let trimmed = decoded_path.trim_matches('/');
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        Self::walk(&self.root, &parts, Params::default())
    }

    // Depth-first walk preferring literal > named > wildcard at each level,
    // backtracking when a more specific branch leads nowhere (spec §3
    // specificity invariant).
    fn walk<'a>(node: &'a Node, parts: &[&str], params: Params) -> Option<(&'a Node, Params)> {
        if parts.is_empty() {
            return if node.methods.is_empty() && node.literal.is_empty() && node.param.is_none() {
                None
            } else {
                Some((node, params))
            };
        }
        let (head, rest) = (parts[0], &parts[1..]);

        if let Some(child) = node.literal.get(head) {
            if let Some(found) = Self::walk(child, rest, params.clone()) {
                return Some(found);
            }
        }
        if let Some((name, child)) = &node.param {
            let mut next_params = params.clone();
            next_params.push(name.clone(), head.to_string());
            if let Some(found) = Self::walk(child, rest, next_params) {
                return Some(found);
            }
        }
        if let Some(child) = &node.wildcard {
            return Some((child, params));
        }
        None
    }

    /// Pure match: does any pattern match `path` regardless of method?
    pub fn can_route(&self, path: &str) -> bool {
        self.find_leaf(path)
            .map(|(node, _)| !node.methods.is_empty())
            .unwrap_or(false)
    }

    /// Matches `(method, path)` and, if exactly one route matches,
    /// invokes its handler. `decoded_path` must already be percent-decoded
    /// and checked for path-traversal by the caller (spec §4.5 policy).
    pub fn route(
        &self,
        method: &Method,
        decoded_path: &str,
        req: &RoutingRequest<'_>,
    ) -> RouteOutcome {
        let Some((node, params)) = self.find_leaf(decoded_path) else {
            return RouteOutcome::NotFound;
        };
        if node.methods.is_empty() {
            return RouteOutcome::NotFound;
        }
        match node.methods.get(method) {
            Some(route) => RouteOutcome::Matched(route.handler.call(req, &params)),
            None => RouteOutcome::MethodNotAllowed(node.methods.keys().cloned().collect()),
        }
    }

    /// Whether `path`'s matched pattern (if any) has an explicit `OPTIONS`
    /// handler registered, used to decide whether the adapter should
    /// synthesize a CORS preflight (spec §4.5 policy).
    pub fn has_explicit_options(&self, decoded_path: &str) -> bool {
        self.find_leaf(decoded_path)
            .map(|(node, _)| node.methods.contains_key(&Method::OPTIONS))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ResponseBuilder;
    use http::Method;

    fn req() -> crate::adapter::OwnedRequestForTest {
        crate::adapter::OwnedRequestForTest::new(Method::GET, "/", "")
    }

    #[test]
    fn literal_beats_named_param() {
        let mut router = Router::new();
        router
            .add(
                Method::GET,
                "/data/fixed",
                |_: &RoutingRequest<'_>, _: &Params| ResponseBuilder::new(200).body("fixed"),
                None,
            )
            .unwrap();
        router
            .add(
                Method::GET,
                "/data/{slug}",
                |_: &RoutingRequest<'_>, p: &Params| {
                    ResponseBuilder::new(200).body(p.get("slug").unwrap_or("").to_string())
                },
                None,
            )
            .unwrap();

        let owned = req();
        let view = owned.as_view();
        match router.route(&Method::GET, "/data/fixed", &view) {
            RouteOutcome::Matched(resp) => assert_eq!(resp.body_bytes(), b"fixed"),
            _ => panic!("expected match"),
        }
        match router.route(&Method::GET, "/data/blah", &view) {
            RouteOutcome::Matched(resp) => assert_eq!(resp.body_bytes(), b"blah"),
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn empty_trailing_segment_does_not_match_param() {
        let mut router = Router::new();
        router
            .add(
                Method::GET,
                "/data/{slug}",
                |_: &RoutingRequest<'_>, p: &Params| {
                    ResponseBuilder::new(200).body(p.get("slug").unwrap_or("").to_string())
                },
                None,
            )
            .unwrap();
        let owned = req();
        let view = owned.as_view();
        assert!(matches!(
            router.route(&Method::GET, "/data/", &view),
            RouteOutcome::NotFound
        ));
    }

    #[test]
    fn method_miss_reports_allowed_methods() {
        let mut router = Router::new();
        router
            .add(Method::GET, "/x", |_: &RoutingRequest<'_>, _: &Params| {
                ResponseBuilder::new(200).body("")
            }, None)
            .unwrap();
        router
            .add(Method::POST, "/x", |_: &RoutingRequest<'_>, _: &Params| {
                ResponseBuilder::new(200).body("")
            }, None)
            .unwrap();
        let owned = req();
        let view = owned.as_view();
        match router.route(&Method::DELETE, "/x", &view) {
            RouteOutcome::MethodNotAllowed(mut methods) => {
                methods.sort_by_key(|m| m.to_string());
                assert_eq!(methods, vec![Method::GET, Method::POST]);
            }
            _ => panic!("expected method-not-allowed"),
        }
    }

    #[test]
    fn wildcard_is_least_specific() {
        let mut router = Router::new();
        router
            .add(Method::GET, "/files/*", |_: &RoutingRequest<'_>, _: &Params| {
                ResponseBuilder::new(200).body("wild")
            }, None)
            .unwrap();
        router
            .add(Method::GET, "/files/{name}", |_: &RoutingRequest<'_>, p: &Params| {
                ResponseBuilder::new(200).body(p.get("name").unwrap_or("").to_string())
            }, None)
            .unwrap();
        let owned = req();
        let view = owned.as_view();
        match router.route(&Method::GET, "/files/a", &view) {
            RouteOutcome::Matched(resp) => assert_eq!(resp.body_bytes(), b"a"),
            _ => panic!("expected named param to win over wildcard"),
        }
        match router.route(&Method::GET, "/files/a/b", &view) {
            RouteOutcome::Matched(resp) => assert_eq!(resp.body_bytes(), b"wild"),
            _ => panic!("expected wildcard to catch multi-segment tail"),
        }
    }
}
