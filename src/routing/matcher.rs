//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive)
//! - Match path prefix (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110) and ignores the port
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use crate::http::request::InboundRequest;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &InboundRequest) -> bool;
}

/// Matches the requested host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        req.host()
            .map(|h| h.eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        req.uri().path().starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn inbound(req: Request<Body>) -> InboundRequest {
        InboundRequest::new(req, "127.0.0.1:1000".parse().unwrap())
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        let req1 = inbound(
            Request::builder()
                .header("Host", "example.com")
                .body(Body::default())
                .unwrap(),
        );
        assert!(matcher.matches(&req1));

        let req2 = inbound(
            Request::builder()
                .header("Host", "EXAMPLE.COM:8080")
                .body(Body::default())
                .unwrap(),
        );
        assert!(matcher.matches(&req2)); // Case insensitive, port ignored

        let req3 = inbound(
            Request::builder()
                .header("Host", "other.com")
                .body(Body::default())
                .unwrap(),
        );
        assert!(!matcher.matches(&req3));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        let req1 = inbound(
            Request::builder()
                .uri("http://example.com/api/v1")
                .body(Body::default())
                .unwrap(),
        );
        assert!(matcher.matches(&req1));

        let req2 = inbound(
            Request::builder()
                .uri("http://example.com/images")
                .body(Body::default())
                .unwrap(),
        );
        assert!(!matcher.matches(&req2));
    }

    #[test]
    fn empty_and_matcher_is_wildcard() {
        let matcher = AndMatcher::default();
        let req = inbound(Request::builder().uri("/x").body(Body::default()).unwrap());
        assert!(matcher.matches(&req));
    }
}
