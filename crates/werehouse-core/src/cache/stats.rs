//! Cache statistics

use serde::Serialize;

/// Counters collected by the cache store manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the namespace
    pub hit_count: u64,
    /// Lookups that found nothing (or failed)
    pub miss_count: u64,
    /// Network-first requests answered from the namespace after a network failure
    pub fallback_count: u64,
    /// Cached answers served while a refresh ran in the background
    pub refresh_count: u64,
    /// Responses written to the namespace
    pub stored_count: u64,
    /// Synthetic error responses handed out
    pub error_count: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hit_count + self.miss_count;
        if lookups == 0 {
            0.0
        } else {
            self.hit_count as f64 / lookups as f64
        }
    }
}
