//! Werehouse Cache Origin Proxy
//!
//! This crate provides the network side of the offline cache: the
//! `Fetcher` abstraction and a client that talks to the Werehouse origin.

pub mod client;
pub mod error;
pub mod fetcher;

pub use client::{OriginClient, OriginClientConfig};
pub use error::ProxyError;
pub use fetcher::Fetcher;
