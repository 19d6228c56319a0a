//! Resolution contract: what a resolver produces and how it fails.

use axum::http::uri::{Authority, Scheme};
use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::http::request::InboundRequest;
use crate::upstream::PoolKey;

/// Maps an inbound request to the upstream that should serve it.
///
/// Implementations must not touch engine state; they may consult their own
/// configuration or discovery data.
pub trait Resolver: Send + Sync + fmt::Debug {
    fn resolve(&self, request: &InboundRequest) -> Result<ResolvedTarget, ResolutionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no route matched {0}")]
    NoRouteMatched(String),
    #[error("malformed request target: {0}")]
    MalformedRequestTarget(String),
    #[error("forwarding loop: request already passed through {0}")]
    ForwardingLoop(String),
}

impl ResolutionError {
    /// Status code returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ResolutionError::NoRouteMatched(_) => StatusCode::BAD_GATEWAY,
            ResolutionError::MalformedRequestTarget(_) => StatusCode::BAD_REQUEST,
            ResolutionError::ForwardingLoop(_) => StatusCode::LOOP_DETECTED,
        }
    }
}

/// Replaces a leading path prefix before forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    pub prefix: String,
    pub replacement: String,
}

impl PathRewrite {
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }

    /// Rewrite `path`; paths outside the prefix are returned unchanged.
    pub fn apply(&self, path: &str) -> String {
        let Some(rest) = path.strip_prefix(self.prefix.as_str()) else {
            return path.to_string();
        };

        let mut rewritten = self.replacement.clone();
        match (rewritten.ends_with('/'), rest.starts_with('/')) {
            (true, true) => rewritten.push_str(&rest[1..]),
            (false, false) if !rest.is_empty() && !rewritten.is_empty() => {
                rewritten.push('/');
                rewritten.push_str(rest);
            }
            _ => rewritten.push_str(rest),
        }

        if !rewritten.starts_with('/') {
            rewritten.insert(0, '/');
        }
        rewritten
    }
}

/// A concrete upstream endpoint for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    pub rewrite: Option<PathRewrite>,
}

impl ResolvedTarget {
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            rewrite: None,
        }
    }

    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    /// Build a target from an upstream base URL such as `http://10.0.0.7:3000`.
    pub fn from_url(url: &Url) -> Result<Self, String> {
        let scheme: Scheme = url
            .scheme()
            .parse()
            .map_err(|e| format!("invalid scheme `{}`: {e}", url.scheme()))?;
        let host = url.host_str().ok_or("upstream URL has no host")?;
        let port = url
            .port_or_known_default()
            .ok_or("upstream URL has no port")?;
        Ok(Self::new(scheme, host, port))
    }

    /// Default port for the target's scheme.
    fn default_port(&self) -> u16 {
        if self.scheme == Scheme::HTTPS {
            443
        } else {
            80
        }
    }

    /// `host[:port]` as it appears in the `Host` header; the port is omitted
    /// when it is the scheme default.
    pub fn host_header(&self) -> String {
        let host = bracket_ipv6(&self.host);
        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port`, always with the port.
    pub fn authority(&self) -> Result<Authority, ResolutionError> {
        format!("{}:{}", bracket_ipv6(&self.host), self.port)
            .parse()
            .map_err(|e| ResolutionError::MalformedRequestTarget(format!("{e}")))
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.scheme.clone(), &self.host, self.port)
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, bracket_ipv6(&self.host), self.port)
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
