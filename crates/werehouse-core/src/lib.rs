//! Werehouse Cache Core Logic
//!
//! This crate provides the cache store manager behind the Werehouse offline
//! cache: namespace management, precaching, fetch strategy selection, and the
//! worker lifecycle host that drives it.

pub mod cache;
pub mod config;
pub mod error;
pub mod strategy;
pub mod worker;

pub use cache::{CacheStats, CacheStoreManager};
pub use config::{Namespace, WorkerConfig};
pub use error::CoreError;
pub use strategy::{Route, Strategy, StrategyRouter, UnmatchedPolicy};
pub use worker::{CacheWorker, FetchOutcome, WorkerHooks, WorkerHost, WorkerState};
