//! Fetch strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing a strategy or unmatched-path policy
#[derive(Debug, Clone)]
pub struct ParseStrategyError(String);

impl fmt::Display for ParseStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid fetch strategy: {}", self.0)
    }
}

impl std::error::Error for ParseStrategyError {}

/// Policy governing how a single request is resolved
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from the namespace; hit the network only on a miss
    CacheFirst,
    /// Serve from the namespace if possible while refreshing it in the background
    CacheFirstWithRefresh,
    /// Prefer the network; fall back to the namespace when it fails
    NetworkFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::CacheFirstWithRefresh => "cache-first-with-refresh",
            Strategy::NetworkFirst => "network-first",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cache-first" => Ok(Strategy::CacheFirst),
            "cache-first-with-refresh" => Ok(Strategy::CacheFirstWithRefresh),
            "network-first" => Ok(Strategy::NetworkFirst),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

/// What to do with paths no rule claims
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedPolicy {
    /// Resolve them with network-first
    #[default]
    NetworkFirst,
    /// Decline to intervene; the request goes straight to the network
    Passthrough,
}

impl UnmatchedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchedPolicy::NetworkFirst => "network-first",
            UnmatchedPolicy::Passthrough => "passthrough",
        }
    }
}

impl FromStr for UnmatchedPolicy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "network-first" => Ok(UnmatchedPolicy::NetworkFirst),
            "passthrough" => Ok(UnmatchedPolicy::Passthrough),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}
