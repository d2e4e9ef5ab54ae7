//! Cache management module

mod manager;
mod stats;

pub use manager::CacheStoreManager;
pub use stats::CacheStats;
