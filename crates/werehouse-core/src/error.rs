//! Core error types

use thiserror::Error;

use crate::worker::WorkerState;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] werehouse_storage::StorageError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] werehouse_proxy::ProxyError),

    #[error("Precache of {path} failed: {reason}")]
    Precache { path: String, reason: String },

    #[error("Worker is {actual}, expected {expected}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
