//! Namespace store trait

use async_trait::async_trait;

use crate::entry::{FetchRequest, FetchResponse};
use crate::error::StorageError;

/// Namespace store trait
///
/// A store holds any number of named namespaces, each mapping request keys
/// to response snapshots. Puts and matches are atomic per key.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// List all existing namespace names
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Check if a namespace exists
    async fn has(&self, namespace: &str) -> Result<bool, StorageError>;

    /// Open a namespace, creating it if absent
    async fn open(&self, namespace: &str) -> Result<(), StorageError>;

    /// Delete a namespace and every entry in it
    async fn delete(&self, namespace: &str) -> Result<bool, StorageError>;

    /// Look up the entry stored for a request
    async fn match_request(
        &self,
        namespace: &str,
        request: &FetchRequest,
    ) -> Result<Option<FetchResponse>, StorageError>;

    /// Store a response for a request, overwriting any previous entry
    async fn put(
        &self,
        namespace: &str,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), StorageError>;

    /// Number of entries in a namespace
    async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError>;
}

/// Validate a namespace name before it reaches a backend
///
/// Names double as directory names for the local backend, so separators
/// and parent references are rejected.
pub fn validate_namespace(namespace: &str) -> Result<(), StorageError> {
    if namespace.is_empty()
        || namespace.contains('/')
        || namespace.contains('\\')
        || namespace.contains("..")
    {
        return Err(StorageError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Reject requests the store will never hold
pub fn ensure_cacheable_method(request: &FetchRequest) -> Result<(), StorageError> {
    if request.has_cacheable_method() {
        Ok(())
    } else {
        Err(StorageError::UnsupportedMethod(request.method.to_string()))
    }
}

/// Compute the hex SHA256 of an entry key
pub fn hash_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
