//! In-memory namespace store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::backend::{CacheStorage, ensure_cacheable_method, validate_namespace};
use crate::entry::{FetchRequest, FetchResponse};
use crate::error::StorageError;

struct StoredEntry {
    response: FetchResponse,
    stored_at: DateTime<Utc>,
}

type Namespace = HashMap<String, StoredEntry>;

/// Namespace store that lives for the lifetime of the process
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: RwLock<BTreeMap<String, Namespace>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.namespaces.read().keys().cloned().collect())
    }

    async fn has(&self, namespace: &str) -> Result<bool, StorageError> {
        Ok(self.namespaces.read().contains_key(namespace))
    }

    async fn open(&self, namespace: &str) -> Result<(), StorageError> {
        validate_namespace(namespace)?;
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> Result<bool, StorageError> {
        debug!("Deleting namespace {}", namespace);
        Ok(self.namespaces.write().remove(namespace).is_some())
    }

    async fn match_request(
        &self,
        namespace: &str,
        request: &FetchRequest,
    ) -> Result<Option<FetchResponse>, StorageError> {
        let namespaces = self.namespaces.read();
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(None);
        };

        Ok(entries.get(&request.cache_key()).map(|entry| {
            debug!(
                "Matched {} in {} (stored at {})",
                request.url, namespace, entry.stored_at
            );
            entry.response.clone()
        }))
    }

    async fn put(
        &self,
        namespace: &str,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), StorageError> {
        validate_namespace(namespace)?;
        ensure_cacheable_method(request)?;

        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(
                request.cache_key(),
                StoredEntry {
                    response: response.clone(),
                    stored_at: Utc::now(),
                },
            );
        Ok(())
    }

    async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|entries| entries.len())
            .ok_or_else(|| StorageError::NotFound(namespace.to_string()))
    }
}
