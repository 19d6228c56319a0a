//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that routes point at usable upstreams
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyConfig, RouteConfig, RoutingMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("routing mode `routes` requires at least one route")]
    NoRoutes,
    #[error("route #{0} has an empty name")]
    EmptyRouteName(usize),
    #[error("route `{route}`: {reason}")]
    InvalidUpstream { route: String, reason: String },
    #[error("route `{route}`: path prefix `{prefix}` must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroValue("listener.max_connections"));
    }

    for (field, value) in [
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.idle_ms", config.timeouts.idle_ms),
        ("timeouts.exchange_ms", config.timeouts.exchange_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if config.routing.mode == RoutingMode::Routes && config.routing.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }
    for (index, route) in config.routing.routes.iter().enumerate() {
        validate_route(&mut errors, index, route);
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn validate_route(errors: &mut Vec<ValidationError>, index: usize, route: &RouteConfig) {
    if route.name.trim().is_empty() {
        errors.push(ValidationError::EmptyRouteName(index));
    }

    if let Some(prefix) = &route.path_prefix {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix {
                route: route.name.clone(),
                prefix: prefix.clone(),
            });
        }
    }

    let invalid = |reason: String| ValidationError::InvalidUpstream {
        route: route.name.clone(),
        reason,
    };
    match Url::parse(&route.upstream) {
        Ok(url) if url.scheme() != "http" => {
            errors.push(invalid(format!("unsupported upstream scheme `{}`", url.scheme())));
        }
        Ok(url) if url.host_str().is_none() => {
            errors.push(invalid("upstream URL has no host".to_string()));
        }
        Ok(url) if url.path() != "/" || url.query().is_some() => {
            errors.push(invalid(
                "upstream URL must not carry a path or query; use rewrite_prefix".to_string(),
            ));
        }
        Ok(_) => {}
        Err(e) => errors.push(invalid(format!("invalid upstream URL: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(upstream: &str) -> RouteConfig {
        RouteConfig {
            name: "r1".into(),
            host: None,
            path_prefix: Some("/".into()),
            upstream: upstream.into(),
            rewrite_prefix: None,
            priority: 0,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn routes_mode_needs_routes() {
        let mut config = ProxyConfig::default();
        config.routing.mode = RoutingMode::Routes;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoRoutes]);
    }

    #[test]
    fn rejects_tls_and_pathful_upstreams() {
        let mut config = ProxyConfig::default();
        config.routing.routes.push(route("https://example.com"));
        config.routing.routes.push(route("http://example.com/base"));
        config.routing.routes.push(route("http://127.0.0.1:3000"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::InvalidUpstream { .. })));
    }

    #[test]
    fn rejects_relative_path_prefix() {
        let mut config = ProxyConfig::default();
        let mut r = route("http://127.0.0.1:3000");
        r.path_prefix = Some("api".into());
        config.routing.routes.push(r);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidPathPrefix { .. }));
    }
}
