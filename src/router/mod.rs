//! Adaptive method+path router.
//!
//! Below a configurable threshold of registered routes, lookup scans a
//! linear `Vec` in insertion order. Once the threshold is crossed by an
//! insertion, the router rebuilds itself as a trie over `/`-separated
//! segments. Both representations share the same segment model and tie-
//! break rule (literal > parameter > wildcard; method-specific > ANY).

mod trie;

use crate::error::{Error, ErrorKind, Result};
use crate::http::{Request, Response};
pub use crate::http::Method;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use trie::TrieNode;

/// A request handler. Handlers run inline on whichever task is driving the
/// connection; they may complete synchronously or `.await` further async
/// work (a file read, a backend call) before returning.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &mut Request, res: &mut Response);
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) + Send + Sync,
{
    async fn handle(&self, req: &mut Request, res: &mut Response) {
        (self)(req, res)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

struct Route {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    handler: Arc<dyn Handler>,
}

enum Repr {
    Linear(Vec<Route>),
    Trie(TrieNode),
}

/// Method+path dispatch table. Read-only after server start; built once
/// and shared via `Arc` across every connection task, so lookups never
/// need a lock.
pub struct Router {
    repr: Repr,
    threshold: usize,
    route_count: usize,
}

impl Router {
    /// `threshold` is the population at which the router switches from a
    /// linear scan to a trie (spec default 100).
    pub fn new(threshold: usize) -> Self {
        Router {
            repr: Repr::Linear(Vec::new()),
            threshold,
            route_count: 0,
        }
    }

    /// Registers a handler for `(method, pattern)`. A later registration
    /// of the same pair replaces the earlier one in place.
    pub fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        self.add_route_arc(method, pattern, Arc::new(handler))
    }

    pub fn add_route_arc(&mut self, method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let segments = parse_pattern(pattern)?;

        match &mut self.repr {
            Repr::Linear(routes) => {
                if let Some(existing) = routes
                    .iter_mut()
                    .find(|r| r.method == method && r.pattern == pattern)
                {
                    existing.handler = handler;
                    return Ok(());
                }
                routes.push(Route {
                    method,
                    pattern: pattern.to_string(),
                    segments,
                    handler,
                });
                self.route_count += 1;
                if routes.len() > self.threshold {
                    self.rebuild_as_trie();
                }
                Ok(())
            }
            Repr::Trie(trie) => {
                trie.insert(&segments, method, handler);
                self.route_count += 1;
                Ok(())
            }
        }
    }

    fn rebuild_as_trie(&mut self) {
        let Repr::Linear(routes) = std::mem::replace(&mut self.repr, Repr::Trie(TrieNode::new())) else {
            unreachable!()
        };
        let mut trie = TrieNode::new();
        for route in routes {
            trie.insert(&route.segments, route.method, route.handler);
        }
        self.repr = Repr::Trie(trie);
    }

    /// Looks up a handler for `method`/`path`, returning it with any
    /// captured path parameters. `path` must not contain the query
    /// string.
    pub fn lookup(&self, method: Method, path: &str) -> Option<(Arc<dyn Handler>, BTreeMap<String, String>)> {
        let path_segments: Vec<&str> = split_path(path);

        match &self.repr {
            Repr::Linear(routes) => {
                // Below the trie threshold, lookup must still resolve
                // literal > parameter > wildcard (and method-specific >
                // ANY) the same way the trie would, so a route's population
                // crossing the rebuild threshold never changes which
                // handler a given path resolves to (spec.md §4.3, §8
                // scenario 2). Scan every candidate and keep the most
                // specific match rather than the first one in insertion
                // order.
                let mut best: Option<(&Route, BTreeMap<String, String>)> = None;
                for route in routes {
                    if route.method != method && route.method != Method::Any {
                        continue;
                    }
                    let Some(params) = match_route(&route.segments, &path_segments) else {
                        continue;
                    };
                    let replace = match &best {
                        None => true,
                        Some((current, _)) => is_more_specific(route, current, method),
                    };
                    if replace {
                        best = Some((route, params));
                    }
                }
                best.map(|(route, params)| (route.handler.clone(), params))
            }
            Repr::Trie(trie) => {
                let mut params = Vec::new();
                let handler = trie.lookup(&path_segments, method, &mut params)?;
                Some((handler, params.into_iter().collect()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.route_count
    }

    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }

    pub fn is_trie(&self) -> bool {
        matches!(self.repr, Repr::Trie(_))
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// `true` if `candidate` should win over `current` for the same path match,
/// using the trie's own tie-break rule: literal > parameter > wildcard
/// segment-by-segment, then method-specific over an ANY handler.
fn is_more_specific(candidate: &Route, current: &Route, method: Method) -> bool {
    match specificity_rank(&candidate.segments).cmp(&specificity_rank(&current.segments)) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.method == method && current.method != method,
    }
}

/// Lower is more specific: literal segments rank ahead of parameter
/// segments, which rank ahead of a trailing wildcard.
fn specificity_rank(segments: &[Segment]) -> Vec<u8> {
    segments
        .iter()
        .map(|s| match s {
            Segment::Literal(_) => 0,
            Segment::Param(_) => 1,
            Segment::Wildcard => 2,
        })
        .collect()
}

fn match_route(segments: &[Segment], path_segments: &[&str]) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    let mut i = 0;
    for seg in segments {
        match seg {
            Segment::Wildcard => return Some(params),
            Segment::Literal(text) => {
                if path_segments.get(i)? != text {
                    return None;
                }
                i += 1;
            }
            Segment::Param(name) => {
                let value = path_segments.get(i)?;
                params.insert(name.clone(), trie::percent_decode(value));
                i += 1;
            }
        }
    }
    if i == path_segments.len() {
        Some(params)
    } else {
        None
    }
}

/// Parses and validates a route pattern, per spec.md §4.3's registration
/// failure rules.
fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    if pattern.is_empty() {
        return Err(Error::new(ErrorKind::InvalidRoutePattern, "empty path"));
    }
    if pattern.contains("//") {
        return Err(Error::new(ErrorKind::InvalidRoutePattern, "pattern contains //"));
    }

    let raw_segments: Vec<&str> = pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw_segments.len());
    let mut seen_params = std::collections::HashSet::new();

    for (idx, raw) in raw_segments.iter().enumerate() {
        if *raw == "*" {
            if idx != raw_segments.len() - 1 {
                return Err(Error::new(
                    ErrorKind::InvalidRoutePattern,
                    "wildcard not in terminal position",
                ));
            }
            segments.push(Segment::Wildcard);
        } else if let Some(name) = raw.strip_prefix(':') {
            if name.is_empty() || name.contains('/') || name.contains(':') {
                return Err(Error::new(ErrorKind::InvalidRoutePattern, "invalid parameter name"));
            }
            if !seen_params.insert(name.to_string()) {
                return Err(Error::new(
                    ErrorKind::InvalidRoutePattern,
                    "duplicate parameter name in pattern",
                ));
            }
            segments.push(Segment::Param(name.to_string()));
        } else {
            segments.push(Segment::Literal((*raw).to_string()));
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response, Version};

    struct Ok200;
    #[async_trait]
    impl Handler for Ok200 {
        async fn handle(&self, _req: &mut Request, res: &mut Response) {
            res.status = 200;
        }
    }

    fn req(path: &str) -> Request {
        Request::new(Method::Get, path.to_string(), Version::Http11)
    }

    #[test]
    fn literal_beats_parameter_route() {
        let mut router = Router::new(100);
        router.add_route(Method::Get, "/users/:id", Ok200).unwrap();
        router.add_route(Method::Get, "/users/me", Ok200).unwrap();

        let (_, params) = router.lookup(Method::Get, "/users/me").unwrap();
        assert!(params.is_empty(), "literal match should not capture a param");
    }

    #[test]
    fn parameter_capture_round_trips_value() {
        let mut router = Router::new(100);
        router.add_route(Method::Get, "/users/:id", Ok200).unwrap();
        let (_, params) = router.lookup(Method::Get, "/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn trailing_slash_is_a_distinct_route() {
        let mut router = Router::new(100);
        router.add_route(Method::Get, "/x", Ok200).unwrap();
        assert!(router.lookup(Method::Get, "/x").is_some());
        assert!(router.lookup(Method::Get, "/x/").is_none());
    }

    #[test]
    fn duplicate_registration_replaces_earlier_handler() {
        let mut router = Router::new(100);
        router.add_route(Method::Get, "/x", Ok200).unwrap();
        router.add_route(Method::Get, "/x", Ok200).unwrap();
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn rejects_empty_pattern() {
        let mut router = Router::new(100);
        let err = router.add_route(Method::Get, "", Ok200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRoutePattern);
    }

    #[test]
    fn rejects_double_slash() {
        let mut router = Router::new(100);
        let err = router.add_route(Method::Get, "/a//b", Ok200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRoutePattern);
    }

    #[test]
    fn rejects_non_terminal_wildcard() {
        let mut router = Router::new(100);
        let err = router.add_route(Method::Get, "/a/*/b", Ok200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRoutePattern);
    }

    #[test]
    fn rejects_duplicate_param_name() {
        let mut router = Router::new(100);
        let err = router.add_route(Method::Get, "/:id/:id", Ok200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRoutePattern);
    }

    #[test]
    fn rebuilds_as_trie_above_threshold_and_keeps_matching() {
        let mut router = Router::new(4);
        for i in 0..10 {
            router
                .add_route(Method::Get, &format!("/route{i}"), Ok200)
                .unwrap();
        }
        assert!(router.is_trie());
        assert!(router.lookup(Method::Get, "/route7").is_some());
        assert!(router.lookup(Method::Get, "/route99").is_none());
    }

    #[test]
    fn literal_beats_parameter_route_below_trie_threshold() {
        // Same precedence check as `literal_beats_parameter_route`, but
        // with the less-specific pattern registered first, to pin down
        // that the linear representation's tie-break is specificity-based
        // rather than first-match-by-insertion-order.
        let mut router = Router::new(100);
        router.add_route(Method::Get, "/users/:id", Ok200).unwrap();
        router.add_route(Method::Get, "/users/me", Ok200).unwrap();
        assert!(!router.is_trie());

        let (_, params) = router.lookup(Method::Get, "/users/me").unwrap();
        assert!(params.is_empty(), "literal match should not capture a param");
    }

    #[test]
    fn any_method_loses_to_method_specific_handler_below_trie_threshold() {
        struct Tagged(u16);
        #[async_trait]
        impl Handler for Tagged {
            async fn handle(&self, _req: &mut Request, res: &mut Response) {
                res.status = self.0;
            }
        }

        let mut router = Router::new(100);
        router.add_route(Method::Any, "/x", Tagged(1)).unwrap();
        router.add_route(Method::Post, "/x", Tagged(2)).unwrap();
        assert!(!router.is_trie());

        let (handler, _) = router.lookup(Method::Post, "/x").unwrap();
        let mut request = req("/x");
        let mut response = Response::new();
        tokio_test_block_on(handler.handle(&mut request, &mut response));
        assert_eq!(response.status, 2, "method-specific handler must win over ANY");
    }

    #[test]
    fn any_method_loses_to_method_specific_handler_in_trie() {
        struct Tagged(u16);
        #[async_trait]
        impl Handler for Tagged {
            async fn handle(&self, _req: &mut Request, res: &mut Response) {
                res.status = self.0;
            }
        }

        let mut router = Router::new(0); // force trie representation
        router.add_route(Method::Any, "/x", Tagged(1)).unwrap();
        router.add_route(Method::Post, "/x", Tagged(2)).unwrap();

        let (handler, _) = router.lookup(Method::Post, "/x").unwrap();
        let mut request = req("/x");
        let mut response = Response::new();
        tokio_test_block_on(handler.handle(&mut request, &mut response));
        assert_eq!(response.status, 2, "method-specific handler must win over ANY");
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[tokio::test]
    async fn handler_blanket_impl_allows_plain_closures() {
        let mut router = Router::new(100);
        router
            .add_route(Method::Get, "/ping", |_req: &mut Request, res: &mut Response| {
                res.status = 204;
            })
            .unwrap();
        let (handler, _) = router.lookup(Method::Get, "/ping").unwrap();
        let mut request = req("/ping");
        let mut response = Response::new();
        handler.handle(&mut request, &mut response).await;
        assert_eq!(response.status, 204);
    }
}
