//! Request handling and transformation.
//!
//! # Responsibilities
//! - Capture the inbound request with its peer, arrival time and request ID
//! - Extract routing-relevant information (host, path)
//! - Translate it into the outbound request for the resolved upstream
//!
//! # Design Decisions
//! - Translation touches the head only; the body stream is moved, never read
//! - Content-Length passes through verbatim; chunked framing is re-applied by
//!   the upstream connection when the length is unknown
//! - Outbound requests always speak HTTP/1.1

use axum::body::Body;
use axum::http::{header, request, HeaderMap, HeaderValue, Method, Request, Uri, Version};
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::http::headers::{append_forwarded, strip_hop_by_hop, ForwardedHop};
use crate::routing::{ResolutionError, ResolvedTarget};
use crate::upstream::PoolKey;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A client request as received by the proxy.
#[derive(Debug)]
pub struct InboundRequest {
    pub id: String,
    pub parts: request::Parts,
    pub body: Body,
    pub peer: SocketAddr,
    pub received_at: Instant,
    pub timestamp: SystemTime,
}

impl InboundRequest {
    pub fn new(request: Request<Body>, peer: SocketAddr) -> Self {
        let (parts, body) = request.into_parts();
        let id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            id,
            parts,
            body,
            peer,
            received_at: Instant::now(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Requested host without port: the absolute-form authority if present,
    /// otherwise the `Host` header.
    pub fn host(&self) -> Option<&str> {
        if let Some(host) = self.parts.uri.host() {
            return Some(host);
        }
        let value = self.parts.headers.get(header::HOST)?.to_str().ok()?;
        Some(strip_port(value))
    }

    /// Requested `host[:port]` exactly as the client named it.
    pub fn requested_authority(&self) -> Option<&str> {
        if let Some(authority) = self.parts.uri.authority() {
            return Some(authority.as_str());
        }
        self.parts.headers.get(header::HOST)?.to_str().ok()
    }
}

fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host)
}

/// The request to send upstream, plus where to send it.
#[derive(Debug)]
pub struct OutboundRequest {
    pub key: PoolKey,
    /// Absolute-form URI; the dispatcher writes it in origin form.
    pub request: Request<Body>,
}

/// Build the outbound request for `target`.
///
/// Deterministic for a given request and target. Fails only when the
/// rewritten target cannot form a valid URI.
pub fn translate(
    inbound: InboundRequest,
    target: &ResolvedTarget,
) -> Result<OutboundRequest, ResolutionError> {
    let original_host = inbound.requested_authority().map(str::to_string);
    let InboundRequest {
        mut parts,
        body,
        peer,
        ..
    } = inbound;

    let path = match &target.rewrite {
        Some(rewrite) => rewrite.apply(parts.uri.path()),
        None => parts.uri.path().to_string(),
    };
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let uri = Uri::builder()
        .scheme(target.scheme.clone())
        .authority(target.authority()?)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ResolutionError::MalformedRequestTarget(e.to_string()))?;

    strip_hop_by_hop(&mut parts.headers);
    let host = HeaderValue::from_str(&target.host_header())
        .map_err(|e| ResolutionError::MalformedRequestTarget(e.to_string()))?;
    parts.headers.insert(header::HOST, host);
    append_forwarded(
        &mut parts.headers,
        ForwardedHop {
            client: peer,
            proto: "http",
            host: original_host.as_deref(),
        },
    );

    parts.uri = uri;
    parts.version = Version::HTTP_11;

    Ok(OutboundRequest {
        key: target.pool_key(),
        request: Request::from_parts(parts, body),
    })
}
