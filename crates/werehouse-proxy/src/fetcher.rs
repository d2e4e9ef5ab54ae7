//! Network fetch trait

use async_trait::async_trait;
use werehouse_storage::{FetchRequest, FetchResponse};

use crate::error::ProxyError;

/// Anything that can resolve a request over the network
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, aborted body). HTTP error statuses are returned as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError>;
}
