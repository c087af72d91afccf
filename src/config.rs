//! Configuration for the lock-free TTL cache.
//!
//! This module provides a builder for the handful of knobs the cache has:
//! capacity, TTL, bucket count, eviction tolerance and the cadence of the
//! background evictor. Configuration is plain data; `build()` validates it.

use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// TTLs at or below this many seconds are rejected.
pub const MIN_TTL_SECS: u64 = 3;

/// Configuration for creating a new cache instance.
///
/// ```
/// use lockfree_ttl_cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new("sessions", 10_000, 300)
///     .eviction_tolerance_secs(2)
///     .eviction_interval(Duration::from_millis(500))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.get_bucket_count(), 10_000);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Name used in logs and for the evictor thread.
    pub(crate) name: String,

    /// Target number of entries. The table may briefly hold more until the
    /// next eviction pass.
    pub(crate) capacity: usize,

    /// Time-to-live of every value, in seconds.
    pub(crate) ttl_secs: u64,

    /// Number of hash buckets. `None` means one bucket per entry of capacity.
    pub(crate) bucket_count: Option<usize>,

    /// Slack, in seconds, beyond TTL and jitter before an untouched entry
    /// is reclaimed even when the cache is under capacity.
    pub(crate) eviction_tolerance_secs: u32,

    /// Consecutive lost races a writer spins through before it starts
    /// yielding the thread.
    pub(crate) max_pending_updates: u32,

    /// Interval between passes of the background evictor.
    pub(crate) eviction_interval: Duration,
}

impl CacheConfig {
    /// Create a new configuration builder.
    ///
    /// # Arguments
    /// * `name` - Name of the cache, used in logs.
    /// * `capacity` - Target number of entries.
    /// * `ttl_secs` - Time-to-live of every value. Must be greater than 3.
    pub fn new(name: impl Into<String>, capacity: usize, ttl_secs: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            ttl_secs,
            bucket_count: None,
            eviction_tolerance_secs: 1,
            max_pending_updates: 16,
            eviction_interval: Duration::from_secs(1),
        }
    }

    /// Set the number of hash buckets (defaults to the capacity).
    pub fn bucket_count(mut self, buckets: usize) -> Self {
        self.bucket_count = Some(buckets);
        self
    }

    /// Set the staleness tolerance used when the cache is under capacity.
    pub fn eviction_tolerance_secs(mut self, secs: u32) -> Self {
        self.eviction_tolerance_secs = secs;
        self
    }

    /// Set how many contended attempts a writer makes before yielding.
    pub fn max_pending_updates(mut self, attempts: u32) -> Self {
        self.max_pending_updates = attempts;
        self
    }

    /// Set the interval of the background evictor.
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Validate and return the final configuration.
    pub fn build(self) -> CacheResult<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Check every field, returning the first violation.
    pub fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(invalid("capacity", "must be greater than 0".to_string()));
        }
        if self.ttl_secs <= MIN_TTL_SECS {
            return Err(invalid(
                "ttl_secs",
                format!("must be greater than {}, got {}", MIN_TTL_SECS, self.ttl_secs),
            ));
        }
        if self.bucket_count == Some(0) {
            return Err(invalid("bucket_count", "must be greater than 0".to_string()));
        }
        if self.eviction_interval.is_zero() {
            return Err(invalid(
                "eviction_interval",
                "must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the cache name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Get the target capacity.
    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Get the TTL in seconds.
    pub fn get_ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Get the effective bucket count.
    pub fn get_bucket_count(&self) -> usize {
        self.bucket_count.unwrap_or(self.capacity)
    }

    /// Get the eviction tolerance in seconds.
    pub fn get_eviction_tolerance_secs(&self) -> u32 {
        self.eviction_tolerance_secs
    }

    /// Get the writer contention threshold.
    pub fn get_max_pending_updates(&self) -> u32 {
        self.max_pending_updates
    }

    /// Get the background eviction interval.
    pub fn get_eviction_interval(&self) -> Duration {
        self.eviction_interval
    }
}

fn invalid(field: &'static str, reason: String) -> CacheError {
    CacheError::InvalidConfig { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CacheConfig::new("test", 100, 10).build().unwrap();
        assert_eq!(config.get_name(), "test");
        assert_eq!(config.get_capacity(), 100);
        assert_eq!(config.get_bucket_count(), 100);
        assert_eq!(config.get_eviction_tolerance_secs(), 1);
        assert_eq!(config.get_max_pending_updates(), 16);
        assert_eq!(config.get_eviction_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::new("test", 1000, 60)
            .bucket_count(512)
            .eviction_tolerance_secs(5)
            .max_pending_updates(4)
            .eviction_interval(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.get_bucket_count(), 512);
        assert_eq!(config.get_eviction_tolerance_secs(), 5);
        assert_eq!(config.get_max_pending_updates(), 4);
        assert_eq!(config.get_eviction_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_short_ttl_rejected() {
        let err = CacheConfig::new("test", 10, 3).build().unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidConfig {
                field: "ttl_secs",
                ..
            }
        ));
        assert!(CacheConfig::new("test", 10, 4).build().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheConfig::new("test", 0, 10).build().unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidConfig {
                field: "capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_buckets_rejected() {
        assert!(CacheConfig::new("test", 10, 10)
            .bucket_count(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(CacheConfig::new("test", 10, 10)
            .eviction_interval(Duration::ZERO)
            .build()
            .is_err());
    }
}
