//! Werehouse Cache Storage Layer
//!
//! This crate provides the namespace store behind the Werehouse offline cache:
//! request/response snapshot types and in-memory and local disk backends.

pub mod backend;
pub mod entry;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheStorage, validate_namespace};
pub use entry::{FetchRequest, FetchResponse, ResponseKind};
pub use error::StorageError;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
