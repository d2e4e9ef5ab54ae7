//! Local disk namespace store

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{CacheStorage, ensure_cacheable_method, hash_key, validate_namespace};
use crate::entry::{FetchRequest, FetchResponse, ResponseKind};
use crate::error::StorageError;

/// Metadata stored in front of each body
#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    key: String,
    kind: ResponseKind,
    status: u16,
    headers: Vec<(String, String)>,
    url: Option<Url>,
    redirected: bool,
    stored_at: DateTime<Utc>,
}

impl EntryMetadata {
    fn new(key: String, response: &FetchResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    debug!("Dropping non-text header {} from stored entry", name);
                    None
                }
            })
            .collect();

        Self {
            key,
            kind: response.kind,
            status: response.status.as_u16(),
            headers,
            url: response.url.clone(),
            redirected: response.redirected,
            stored_at: Utc::now(),
        }
    }

    fn into_response(self, body: Bytes) -> Result<FetchResponse, StorageError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| StorageError::Backend(format!("Invalid stored status: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::Backend(format!("Invalid stored header: {}", e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| StorageError::Backend(format!("Invalid stored header: {}", e)))?;
            headers.append(name, value);
        }

        Ok(FetchResponse {
            kind: self.kind,
            status,
            headers,
            body,
            url: self.url,
            redirected: self.redirected,
        })
    }
}

const ENTRY_EXTENSION: &str = "entry";

/// Length prefix in front of the metadata inside an entry file
const HEADER_LEN: usize = 8;

/// Local disk namespace store
///
/// Each namespace is a directory; each entry is one file named by the SHA256
/// of its key, `<base_path>/namespaces/<namespace>/<hash>.entry`, holding the
/// metadata length, the metadata JSON and then the body. Entries are replaced
/// by renaming a fully written temp file over them, so a reader sees either
/// the old entry or the new one.
pub struct LocalStorage {
    namespaces_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let namespaces_path = base_path.join("namespaces");

        fs::create_dir_all(&namespaces_path).await?;

        info!("Initialized local cache storage at {:?}", base_path);

        Ok(Self { namespaces_path })
    }

    fn namespace_path(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        validate_namespace(namespace)?;
        Ok(self.namespaces_path.join(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> Result<PathBuf, StorageError> {
        let dir = self.namespace_path(namespace)?;
        Ok(dir.join(format!("{}.{}", hash_key(key), ENTRY_EXTENSION)))
    }
}

fn encode_entry(metadata: &[u8], body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LEN + metadata.len() + body.len());
    data.extend_from_slice(&(metadata.len() as u64).to_be_bytes());
    data.extend_from_slice(metadata);
    data.extend_from_slice(body);
    data
}

fn decode_entry(raw: &[u8]) -> Result<(&[u8], &[u8]), StorageError> {
    let corrupt = || StorageError::Backend("Truncated cache entry".to_string());

    let (len, rest) = raw.split_at_checked(HEADER_LEN).ok_or_else(corrupt)?;
    let mut len_bytes = [0u8; HEADER_LEN];
    len_bytes.copy_from_slice(len);
    let len = usize::try_from(u64::from_be_bytes(len_bytes)).map_err(|_| corrupt())?;

    rest.split_at_checked(len).ok_or_else(corrupt)
}

/// Write a file atomically using a uniquely named temp file in `dir`
///
/// Concurrent writers to the same path each get their own temp file; the
/// last rename wins.
async fn write_atomic(dir: &Path, path: &Path, data: Vec<u8>) -> Result<(), StorageError> {
    let dir = dir.to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
        let mut temp_file = tempfile::NamedTempFile::new_in(&dir)?;
        temp_file.write_all(&data)?;
        temp_file
            .persist(&path)
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Backend(format!("Write task failed: {}", e)))?
}

#[async_trait]
impl CacheStorage for LocalStorage {
    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.namespaces_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn has(&self, namespace: &str) -> Result<bool, StorageError> {
        let path = self.namespace_path(namespace)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn open(&self, namespace: &str) -> Result<(), StorageError> {
        let path = self.namespace_path(namespace)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> Result<bool, StorageError> {
        let path = self.namespace_path(namespace)?;
        debug!("Deleting namespace at {:?}", path);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn match_request(
        &self,
        namespace: &str,
        request: &FetchRequest,
    ) -> Result<Option<FetchResponse>, StorageError> {
        let key = request.cache_key();
        let path = self.entry_path(namespace, &key)?;

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let (metadata, body) = decode_entry(&raw)?;
        let metadata: EntryMetadata = serde_json::from_slice(metadata)?;

        if metadata.key != key {
            warn!("Stored key mismatch at {:?}: {}", path, metadata.key);
            return Ok(None);
        }

        debug!(
            "Matched {} in {} (stored at {})",
            request.url, namespace, metadata.stored_at
        );
        let body = Bytes::copy_from_slice(body);
        metadata.into_response(body).map(Some)
    }

    async fn put(
        &self,
        namespace: &str,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), StorageError> {
        ensure_cacheable_method(request)?;

        let key = request.cache_key();
        let path = self.entry_path(namespace, &key)?;
        let dir = self.namespace_path(namespace)?;
        fs::create_dir_all(&dir).await?;

        debug!("Writing entry for {} to {:?}", request.url, path);

        let metadata = serde_json::to_vec(&EntryMetadata::new(key, response))?;
        write_atomic(&dir, &path, encode_entry(&metadata, &response.body)).await?;

        Ok(())
    }

    async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError> {
        let path = self.namespace_path(namespace)?;
        let mut dir = match fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(namespace.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut count = 0;
        while let Some(entry) = dir.next_entry().await? {
            if entry
                .path()
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXTENSION)
            {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn request(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("http://localhost:8080").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_put_and_match_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let response = FetchResponse::new(StatusCode::OK, vec![0u8, 159, 146, 150])
            .with_header(CONTENT_TYPE, HeaderValue::from_static("image/png"))
            .with_url(Url::parse("http://localhost:8080/queue-image/42").unwrap());
        storage
            .put("App.v1", &request("/queue-image/42"), &response)
            .await
            .unwrap();

        let matched = storage
            .match_request("App.v1", &request("/queue-image/42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.status, StatusCode::OK);
        assert_eq!(matched.body, response.body);
        assert_eq!(matched.headers.get(CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(matched.url, response.url);
        assert!(!matched.redirected);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = LocalStorage::new(dir.path()).await.unwrap();
            storage
                .put("App.v1", &request("/home"), &FetchResponse::new(StatusCode::OK, "home"))
                .await
                .unwrap();
        }

        let storage = LocalStorage::new(dir.path()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["App.v1"]);
        assert_eq!(storage.entry_count("App.v1").await.unwrap(), 1);
        let matched = storage
            .match_request("App.v1", &request("/home"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&matched.body[..], b"home");
    }

    #[tokio::test]
    async fn test_delete_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("App.v1").await.unwrap();
        storage.open("App.v2").await.unwrap();
        assert!(storage.has("App.v1").await.unwrap());

        assert!(storage.delete("App.v1").await.unwrap());
        assert!(!storage.delete("App.v1").await.unwrap());
        assert!(!storage.has("App.v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["App.v2"]);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        assert!(matches!(
            storage.open("../outside").await,
            Err(StorageError::InvalidNamespace(_))
        ));
        assert!(matches!(
            storage
                .put("../outside", &request("/home"), &FetchResponse::new(StatusCode::OK, ""))
                .await,
            Err(StorageError::InvalidNamespace(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_to_one_key_never_tear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let rev = HeaderName::from_static("x-rev");

        for round in 0..50 {
            let mut writers = Vec::new();
            for writer in 0..4 {
                let storage = storage.clone();
                let rev = rev.clone();
                let tag = format!("{}-{}", round, writer);
                writers.push(tokio::spawn(async move {
                    let response = FetchResponse::new(StatusCode::OK, format!("body {}", tag))
                        .with_header(rev, HeaderValue::from_str(&tag).unwrap());
                    storage
                        .put("App.v1", &request("/queue-image/42"), &response)
                        .await
                }));
            }

            let reader = {
                let storage = storage.clone();
                let rev = rev.clone();
                tokio::spawn(async move {
                    for _ in 0..4 {
                        let matched = storage
                            .match_request("App.v1", &request("/queue-image/42"))
                            .await
                            .unwrap();
                        if let Some(matched) = matched {
                            let tag = matched.headers.get(&rev).unwrap().to_str().unwrap();
                            assert_eq!(matched.body, format!("body {}", tag).into_bytes());
                        }
                    }
                })
            };

            for writer in writers {
                writer.await.unwrap().unwrap();
            }
            reader.await.unwrap();

            let matched = storage
                .match_request("App.v1", &request("/queue-image/42"))
                .await
                .unwrap()
                .unwrap();
            let tag = matched.headers.get(&rev).unwrap().to_str().unwrap();
            assert_eq!(matched.body, format!("body {}", tag).into_bytes());
        }

        assert_eq!(storage.entry_count("App.v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_truncated_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage
            .put("App.v1", &request("/home"), &FetchResponse::new(StatusCode::OK, "home"))
            .await
            .unwrap();

        let path = storage
            .entry_path("App.v1", &request("/home").cache_key())
            .unwrap();
        fs::write(&path, [0u8, 0, 0, 0, 0, 0, 1, 0]).await.unwrap();

        assert!(matches!(
            storage.match_request("App.v1", &request("/home")).await,
            Err(StorageError::Backend(_))
        ));
    }
}
