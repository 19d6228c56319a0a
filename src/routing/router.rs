//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Return the route's upstream or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use url::Url;

use crate::config::RouteConfig;
use crate::http::request::InboundRequest;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::routing::target::{PathRewrite, ResolutionError, ResolvedTarget, Resolver};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub priority: u32,
    matcher: AndMatcher,
    target: ResolvedTarget,
}

impl Route {
    /// Compile a route from configuration.
    pub fn from_config(config: &RouteConfig) -> Result<Self, String> {
        let url = Url::parse(&config.upstream).map_err(|e| e.to_string())?;
        let mut target = ResolvedTarget::from_url(&url)?;
        if let Some(replacement) = &config.rewrite_prefix {
            let prefix = config.path_prefix.clone().unwrap_or_else(|| "/".to_string());
            target = target.with_rewrite(PathRewrite::new(prefix, replacement.clone()));
        }

        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }

        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            matcher: AndMatcher::new(matchers),
            target,
        })
    }
}

/// Resolves requests against a static route table.
#[derive(Debug, Default)]
pub struct RouteResolver {
    routes: Vec<Route>,
}

impl RouteResolver {
    /// Compile routes, highest priority first. Invalid routes are skipped.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut routes = Vec::with_capacity(configs.len());
        for config in configs {
            match Route::from_config(config) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    tracing::warn!(route = %config.name, error = %e, "Skipping invalid route");
                }
            }
        }
        // Stable sort keeps config order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn find(&self, req: &InboundRequest) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(req))
    }
}

impl Resolver for RouteResolver {
    fn resolve(&self, req: &InboundRequest) -> Result<ResolvedTarget, ResolutionError> {
        match self.find(req) {
            Some(route) => {
                tracing::trace!(route = %route.name, target = %route.target, "Route matched");
                Ok(route.target.clone())
            }
            None => Err(ResolutionError::NoRouteMatched(req.uri().path().to_string())),
        }
    }
}
