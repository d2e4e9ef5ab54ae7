//! Path-based strategy selection
//!
//! Maps an intercepted request path to the strategy that resolves it, or to
//! a decline when the worker should stay out of the way.

use std::collections::HashSet;

use super::policy::{Strategy, UnmatchedPolicy};
use crate::config::WorkerConfig;

/// Verdict for a single request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Answer the request with this strategy
    Respond(Strategy),
    /// Leave the request to default network handling
    Decline,
}

/// Result of a route match, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The verdict
    pub route: Route,
    /// The rule that produced it
    pub rule: &'static str,
}

#[derive(Debug, Clone)]
enum PathMatcher {
    /// Path equals one of the precached paths
    Precached(HashSet<String>),
    /// Path contains one of the markers
    Contains(Vec<String>),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: &'static str,
    matcher: PathMatcher,
    strategy: Strategy,
}

/// Rule list evaluated in order; the first match wins
#[derive(Debug, Clone)]
pub struct StrategyRouter {
    rules: Vec<CompiledRule>,
    unmatched: UnmatchedPolicy,
}

impl StrategyRouter {
    /// Build the router from worker configuration
    pub fn new(config: &WorkerConfig) -> Self {
        let rules = vec![
            CompiledRule {
                name: "precache",
                matcher: PathMatcher::Precached(config.precache.iter().cloned().collect()),
                strategy: config.precache_strategy,
            },
            CompiledRule {
                name: "image",
                matcher: PathMatcher::Contains(config.image_markers.clone()),
                strategy: Strategy::CacheFirstWithRefresh,
            },
        ];

        Self {
            rules,
            unmatched: config.unmatched,
        }
    }

    /// Classify a request path
    pub fn classify(&self, path: &str) -> Route {
        self.find_match(path).route
    }

    /// Classify a request path, reporting which rule decided
    pub fn find_match(&self, path: &str) -> RouteMatch {
        for rule in &self.rules {
            if rule.matcher.matches(path) {
                return RouteMatch {
                    route: Route::Respond(rule.strategy),
                    rule: rule.name,
                };
            }
        }

        let route = match self.unmatched {
            UnmatchedPolicy::NetworkFirst => Route::Respond(Strategy::NetworkFirst),
            UnmatchedPolicy::Passthrough => Route::Decline,
        };
        RouteMatch {
            route,
            rule: "unmatched",
        }
    }
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Precached(paths) => paths.contains(path),
            PathMatcher::Contains(markers) => markers.iter().any(|m| path.contains(m.as_str())),
        }
    }
}
