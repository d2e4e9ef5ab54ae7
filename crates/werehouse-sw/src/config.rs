//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;
use url::Url;
use werehouse_core::config::{
    DEFAULT_APP_ID, DEFAULT_IMAGE_MARKERS, DEFAULT_PRECACHE, DEFAULT_VERSION,
};
use werehouse_core::{Namespace, Strategy, UnmatchedPolicy, WorkerConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Werehouse origin the proxy sits in front of
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url")]
    pub url: String,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            skip_tls_verify: false,
            user_agent: None,
        }
    }
}

/// Cache namespace and routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Application identifier, the first half of the namespace name
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Bump to discard every previously cached entry
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    #[serde(default = "default_image_markers")]
    pub image_markers: Vec<String>,
    #[serde(default = "default_precache_strategy")]
    pub precache_strategy: Strategy,
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            version: default_version(),
            precache: default_precache(),
            image_markers: default_image_markers(),
            precache_strategy: default_precache_strategy(),
            unmatched: UnmatchedPolicy::default(),
        }
    }
}

/// Which namespace store to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    #[default]
    Local,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,
    #[serde(default)]
    pub local: LocalStorageConfig,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_origin_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_precache() -> Vec<String> {
    DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect()
}

fn default_image_markers() -> Vec<String> {
    DEFAULT_IMAGE_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_precache_strategy() -> Strategy {
    Strategy::CacheFirstWithRefresh
}

fn default_local_path() -> String {
    "./data/sw-cache".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Save configuration to a file atomically
    ///
    /// Writes to a temp file in the same directory and renames it over the
    /// target, so a crash mid-write leaves the previous file intact.
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all().with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }

    /// Parsed origin URL
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin.url)
            .with_context(|| format!("Invalid origin URL: {}", self.origin.url))
    }

    /// Build the validated worker configuration
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let mut worker = WorkerConfig::new(self.origin_url()?);
        worker.namespace = Namespace::new(&self.cache.app_id, &self.cache.version)?;
        worker.precache = self.cache.precache.clone();
        worker.image_markers = self.cache.image_markers.clone();
        worker.precache_strategy = self.cache.precache_strategy;
        worker.unmatched = self.cache.unmatched;
        Ok(worker.validated()?)
    }
}
