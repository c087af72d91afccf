//! # Lock-free TTL Cache
//!
//! A fixed-capacity, concurrent key-value cache where every value expires
//! after a configurable TTL and the least recently used entries are evicted
//! when the cache grows past capacity.
//!
//! ## Features
//!
//! - **Lock-free operations**: `get`, `put` and `erase` are built from atomic
//!   compare-and-swap steps and never block each other
//! - **TTL with jitter**: expiry is spread over `ln(ttl)` seconds so keys
//!   written together do not expire together
//! - **Approximate LRU**: one maintenance actor trims the cache back to
//!   capacity, oldest entries first
//! - **Deferred reclamation**: memory is freed by the maintenance actor only
//!   once no operation can still reach it; nodes are pooled for reuse
//! - **Statistics**: Track hits, misses, evictions, and reclamation
//!
//! ## Quick Start
//!
//! ```rust
//! use lockfree_ttl_cache::{Cache, CacheConfig};
//! use std::time::Duration;
//!
//! let config = CacheConfig::new("sessions", 10_000, 300)
//!     .eviction_interval(Duration::from_millis(250));
//!
//! let cache: Cache<String, String> = Cache::new(config);
//! let evictor = cache.spawn_evictor().unwrap();
//!
//! cache.put("user:123".to_string(), "Alice".to_string());
//!
//! if let Some(value) = cache.get("user:123") {
//!     println!("Found: {}", value);
//! }
//!
//! cache.erase("user:123");
//!
//! let stats = cache.stats();
//! println!("Hit rate: {:.1}%", stats.hit_rate);
//!
//! evictor.stop();
//! ```
//!
//! ## Thread Safety
//!
//! Cloning a `Cache` creates a new handle to the same underlying table:
//!
//! ```rust
//! use lockfree_ttl_cache::{Cache, CacheConfig};
//! use std::thread;
//!
//! let cache: Cache<String, usize> = Cache::new(CacheConfig::new("shared", 64, 60));
//!
//! let handles: Vec<_> = (0..4).map(|i| {
//!     let cache = cache.clone();
//!     thread::spawn(move || {
//!         cache.put(format!("key_{}", i), i);
//!     })
//! }).collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(cache.size(), 4);
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod stats;

pub use cache::Cache;
pub use cli::Cli;
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use eviction::EvictionReport;
pub use maintenance::Evictor;
pub use stats::{CacheStats, StatsSnapshot};
pub use storage::Lookup;

// Internal modules - not part of public API
pub(crate) mod entry;
pub(crate) mod eviction;
pub(crate) mod pool;
pub(crate) mod reclaim;
pub(crate) mod storage;
