//! Forward-proxy resolution: the request itself names the upstream.
//!
//! Absolute-form targets (`GET http://host:port/path`) are used as-is;
//! origin-form targets fall back to the `Host` header.

use axum::http::uri::{Authority, Scheme};
use axum::http::{header, Method};

use crate::http::request::InboundRequest;
use crate::routing::target::{ResolutionError, ResolvedTarget, Resolver};

#[derive(Debug, Default, Clone)]
pub struct ForwardResolver;

impl ForwardResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolver for ForwardResolver {
    fn resolve(&self, req: &InboundRequest) -> Result<ResolvedTarget, ResolutionError> {
        if req.method() == Method::CONNECT {
            return Err(ResolutionError::MalformedRequestTarget(
                "CONNECT tunnelling is not supported".to_string(),
            ));
        }

        let uri = req.uri();
        let (scheme, authority) = match uri.authority() {
            Some(authority) => (
                uri.scheme().cloned().unwrap_or(Scheme::HTTP),
                authority.clone(),
            ),
            None => {
                let host = req
                    .headers()
                    .get(header::HOST)
                    .ok_or_else(|| malformed("missing Host header"))?
                    .to_str()
                    .map_err(|_| malformed("Host header is not visible ASCII"))?;
                let authority: Authority = host
                    .parse()
                    .map_err(|_| malformed(&format!("invalid Host header `{host}`")))?;
                (Scheme::HTTP, authority)
            }
        };

        if scheme != Scheme::HTTP {
            return Err(malformed(&format!("unsupported scheme `{scheme}`")));
        }
        if authority.host().is_empty() {
            return Err(malformed("empty host"));
        }

        let port = authority.port_u16().unwrap_or(80);
        Ok(ResolvedTarget::new(scheme, authority.host(), port))
    }
}

fn malformed(reason: &str) -> ResolutionError {
    ResolutionError::MalformedRequestTarget(reason.to_string())
}
