//! Worker configuration
//!
//! The namespace identity, precache set and routing rules are fixed when the
//! worker starts. The file-level config is loaded by werehouse-sw and mapped
//! into a `WorkerConfig` before the cache manager is built.

use std::collections::HashSet;
use std::fmt;
use tracing::warn;
use url::Url;

use crate::error::CoreError;
use crate::strategy::{Strategy, UnmatchedPolicy};

/// Default application identifier used in namespace names
pub const DEFAULT_APP_ID: &str = "WerehouseCache";

/// Default cache version
pub const DEFAULT_VERSION: &str = "1";

/// Assets that must be present right after install
pub const DEFAULT_PRECACHE: [&str; 4] = ["/home", "/index.js", "/style.css", "/icon.svg"];

/// URL segments marking queued and stored images
pub const DEFAULT_IMAGE_MARKERS: [&str; 2] = ["/queue-image/", "/image-file/"];

/// Versioned cache namespace, rendered as `<app>.v<version>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    app_id: String,
    version: String,
}

impl Namespace {
    pub fn new(app_id: impl Into<String>, version: impl Into<String>) -> Result<Self, CoreError> {
        let app_id = app_id.into();
        let version = version.into();

        if !is_valid_part(&app_id) {
            return Err(CoreError::Config(format!("Invalid app identifier: '{}'", app_id)));
        }
        if !is_valid_part(&version) || version.contains(".v") {
            return Err(CoreError::Config(format!("Invalid cache version: '{}'", version)));
        }

        Ok(Self { app_id, version })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", self.app_id, self.version)
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '\\']) && !part.contains("..")
}

/// Configuration injected into the cache manager at startup
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Namespace that is read from and written to
    pub namespace: Namespace,
    /// Origin every precache path is resolved against
    pub origin: Url,
    /// Ordered, de-duplicated precache paths
    pub precache: Vec<String>,
    /// Path substrings routed to cache-first-with-refresh
    pub image_markers: Vec<String>,
    /// Strategy used for precached paths
    pub precache_strategy: Strategy,
    /// Handling of paths no rule matches
    pub unmatched: UnmatchedPolicy,
}

impl WorkerConfig {
    /// Build a config with the default Werehouse namespace and rules
    pub fn new(origin: Url) -> Self {
        Self {
            namespace: Namespace {
                app_id: DEFAULT_APP_ID.to_string(),
                version: DEFAULT_VERSION.to_string(),
            },
            origin,
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            image_markers: DEFAULT_IMAGE_MARKERS.iter().map(|m| m.to_string()).collect(),
            precache_strategy: Strategy::CacheFirstWithRefresh,
            unmatched: UnmatchedPolicy::default(),
        }
    }

    /// Validate paths and drop duplicate precache entries
    ///
    /// Duplicates would make the batch install fail, so only the first
    /// occurrence of each path is kept.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        if self.origin.cannot_be_a_base() {
            return Err(CoreError::Config(format!("Invalid origin: {}", self.origin)));
        }

        let mut seen = HashSet::new();
        let mut precache = Vec::with_capacity(self.precache.len());
        for path in self.precache {
            if !path.starts_with('/') {
                return Err(CoreError::Config(format!(
                    "Precache path must start with '/': {}",
                    path
                )));
            }
            if seen.insert(path.clone()) {
                precache.push(path);
            } else {
                warn!("Dropping duplicate precache path {}", path);
            }
        }
        self.precache = precache;

        if self.image_markers.iter().any(|m| m.is_empty()) {
            return Err(CoreError::Config("Image markers must not be empty".to_string()));
        }

        Ok(self)
    }

    /// Resolve a precache path against the origin
    pub fn resolve(&self, path: &str) -> Result<Url, CoreError> {
        self.origin
            .join(path)
            .map_err(|e| CoreError::Config(format!("Cannot resolve {}: {}", path, e)))
    }
}
