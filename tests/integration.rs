//! Integration tests for the cache library.

use lockfree_ttl_cache::{Cache, CacheConfig, CacheError, Clock, Lookup, ManualClock};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn manual(capacity: usize, ttl_secs: u64) -> (Cache<String, String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig::new("integration", capacity, ttl_secs);
    let cache = Cache::with_clock(config, clock.clone()).unwrap();
    (cache, clock)
}

/// Run passes until every retired node and value is back in its pool.
fn settle<K, V>(cache: &Cache<K, V>) -> bool
where
    K: std::hash::Hash + Eq + Send + 'static,
    V: Send + 'static,
{
    for _ in 0..10_000 {
        let stats = cache.stats();
        if stats.live_nodes == stats.size && stats.live_values == stats.size {
            return true;
        }
        cache.evict();
        thread::yield_now();
    }
    false
}

#[test]
fn test_basic_workflow() {
    let (cache, _) = manual(16, 60);

    // Initially empty
    assert!(cache.is_empty());
    assert_eq!(cache.size(), 0);

    // Put a value
    cache.put("key1".to_string(), "value1".to_string());
    assert_eq!(cache.size(), 1);
    assert!(!cache.is_empty());

    // Get the value back
    assert_eq!(cache.get("key1"), Some("value1".to_string()));
    assert_eq!(cache.get("nonexistent"), None);

    // Erase
    assert!(cache.erase("key1"));
    assert_eq!(cache.get("key1"), None);
    assert!(!cache.erase("key1")); // Already erased

    // Clear
    cache.put("a".to_string(), "1".to_string());
    cache.put("b".to_string(), "2".to_string());
    cache.put("c".to_string(), "3".to_string());
    assert_eq!(cache.size(), 4);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_read_your_write() {
    let (cache, _) = manual(16, 60);
    for i in 0..10 {
        cache.put("key".to_string(), format!("value_{}", i));
        assert_eq!(cache.get("key"), Some(format!("value_{}", i)));
    }
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_ttl_expiration() {
    let (cache, clock) = manual(16, 10);
    cache.put("expiring".to_string(), "value".to_string());
    let written = clock.now();

    // Retrievable at half the TTL
    clock.advance(Duration::from_secs(5));
    assert!(cache.get("expiring").is_some());

    // Expired by twice the TTL
    clock.set(written + 20_000_000);
    assert_eq!(cache.get_with_now("expiring", clock.now()), Lookup::Expired);
    assert_eq!(cache.get("expiring"), None);
}

#[test]
fn test_put_refreshes_ttl() {
    let (cache, clock) = manual(16, 10);
    cache.put("key".to_string(), "old".to_string());

    clock.advance(Duration::from_secs(8));
    cache.put("key".to_string(), "new".to_string());

    clock.advance(Duration::from_secs(8));
    assert_eq!(cache.get("key"), Some("new".to_string()));
}

#[test]
fn test_lru_eviction() {
    let (cache, clock) = manual(3, 60);

    // Fill to capacity
    for key in ["a", "b", "c"] {
        cache.put(key.to_string(), key.to_string());
        clock.advance(Duration::from_millis(1));
    }

    // Access 'a' to make it recently used
    let _ = cache.get("a");
    clock.advance(Duration::from_millis(1));

    // Add new key; the next pass evicts 'b' (LRU)
    cache.put("d".to_string(), "d".to_string());
    assert_eq!(cache.size(), 4);
    cache.evict();
    assert_eq!(cache.size(), 3);

    assert!(cache.get("a").is_some()); // Was accessed, not evicted
    assert!(cache.get("b").is_none()); // Was LRU, evicted
    assert!(cache.get("c").is_some());
    assert!(cache.get("d").is_some());
}

#[test]
fn test_capacity_two_scenario() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig::new("scenario", 2, 10).eviction_tolerance_secs(1);
    let cache = Cache::with_clock(config, clock.clone()).unwrap();

    let mut stamps = Vec::new();
    for (value, key) in ["A", "B", "C"].into_iter().enumerate() {
        stamps.push(clock.now());
        cache.put(key, value);
        clock.advance(Duration::from_millis(1));
    }
    assert_eq!(cache.size(), 3);

    let report = cache.evict();
    assert_eq!(report.censused, 3);
    assert_eq!(report.unlinked, 1);
    assert_eq!(report.threshold, Some(stamps[1]));
    assert_eq!(cache.size(), 2);

    assert_eq!(cache.get("A"), None);
    assert_eq!(cache.get("B"), Some(1));
    assert_eq!(cache.get("C"), Some(2));
}

#[test]
fn test_capacity_convergence() {
    let (cache, clock) = manual(50, 60);
    for i in 0..75 {
        cache.put(format!("key_{}", i), "value".to_string());
        if i % 3 == 0 {
            clock.advance(Duration::from_micros(10));
        }
    }
    assert_eq!(cache.size(), 75);

    cache.evict();
    assert!(cache.size() <= 50);
}

#[test]
fn test_eviction_picks_oldest_first() {
    let (cache, clock) = manual(5, 60);
    for i in 0..10 {
        cache.put(format!("key_{}", i), i.to_string());
        clock.advance(Duration::from_millis(1));
    }

    let report = cache.evict();
    assert_eq!(report.unlinked, 5);
    for i in 0..5 {
        assert_eq!(cache.get(&format!("key_{}", i)), None);
    }
    for i in 5..10 {
        assert_eq!(cache.get(&format!("key_{}", i)), Some(i.to_string()));
    }
}

#[test]
fn test_erase_idempotence() {
    let (cache, _) = manual(16, 60);
    cache.put("key".to_string(), "value".to_string());

    assert!(cache.erase("key"));
    assert!(!cache.erase("key"));
    assert!(!cache.erase("absent"));

    cache.evict();
    assert_eq!(cache.get("key"), None);
    assert_eq!(cache.get("absent"), None);
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_untouched_entries_reclaimed_under_capacity() {
    let (cache, clock) = manual(100, 10);
    for i in 0..10 {
        cache.put(format!("key_{}", i), "value".to_string());
    }

    // Fresh entries survive a pass under capacity.
    assert_eq!(cache.evict().unlinked, 0);

    // TTL + half the jitter + tolerance later, they are gone.
    clock.advance(Duration::from_secs(13));
    assert_eq!(cache.evict().unlinked, 10);
    assert!(cache.is_empty());
}

#[test]
fn test_memory_returns_to_pools() {
    let (cache, clock) = manual(4, 60);
    for round in 0..5 {
        for i in 0..8 {
            cache.put(format!("key_{}", i), format!("value_{}", round));
            clock.advance(Duration::from_micros(5));
        }
        cache.evict();
    }
    assert!(settle(&cache), "retired memory never came back");

    let stats = cache.stats();
    assert_eq!(stats.size, 4);
    assert_eq!(stats.live_nodes, 4);
    assert_eq!(stats.live_values, 4);
    assert!(stats.reclaimed_nodes > 0);
    assert!(stats.reclaimed_values > 0);
}

#[test]
fn test_concurrent_reads() {
    let cache: Cache<String, String> = Cache::new(CacheConfig::new("reads", 1000, 60));

    // Pre-populate
    for i in 0..100 {
        cache.put(format!("key_{}", i), format!("value_{}", i));
    }

    // Spawn multiple reader threads
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    for i in 0..100 {
                        assert_eq!(
                            cache.get(&format!("key_{}", i)),
                            Some(format!("value_{}", i))
                        );
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    assert_eq!(cache.stats().hits, 8 * 100 * 100);
}

#[test]
fn test_concurrent_writes() {
    let cache: Cache<String, String> = Cache::new(CacheConfig::new("writes", 10_000, 60));

    // Spawn multiple writer threads
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    let key = format!("thread_{}_key_{}", t, i);
                    cache.put(key.clone(), format!("value_{}", i));
                    assert!(cache.get(&key).is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    // Should have 8000 keys (8 threads × 1000 keys each)
    assert_eq!(cache.size(), 8000);
}

#[test]
fn test_stats_accuracy() {
    let (cache, _) = manual(16, 60);

    cache.put("key1".to_string(), "value1".to_string());
    cache.put("key2".to_string(), "value2".to_string());
    let _ = cache.get("key1"); // Hit
    let _ = cache.get("key2"); // Hit
    let _ = cache.get("missing"); // Miss
    cache.erase("key1");
    let _ = cache.get("key1"); // Expired

    let stats = cache.stats();
    assert_eq!(stats.inserts, 2);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.erases, 1);
    assert_eq!(stats.size, 2); // key1 stays linked until the next pass
}

#[test]
fn test_config_builder() {
    let config = CacheConfig::new("builder", 5000, 60)
        .bucket_count(1024)
        .eviction_interval(Duration::from_millis(250))
        .build()
        .unwrap();

    assert_eq!(config.get_capacity(), 5000);
    assert_eq!(config.get_bucket_count(), 1024);
    assert_eq!(config.get_eviction_interval(), Duration::from_millis(250));
}

#[test]
fn test_invalid_config() {
    let err = Cache::<String, String>::try_new(CacheConfig::new("bad", 10, 2)).unwrap_err();
    assert!(matches!(err, CacheError::InvalidConfig { field: "ttl_secs", .. }));
    assert!(err.to_string().contains("ttl_secs"));
}

#[test]
fn test_cache_clone_shares_data() {
    let (cache1, _) = manual(16, 60);
    cache1.put("key".to_string(), "value1".to_string());

    let cache2 = cache1.clone();

    // Both see the same data
    assert_eq!(cache2.get("key"), cache1.get("key"));

    // Modification through one is visible to the other
    cache2.put("key".to_string(), "value2".to_string());
    assert_eq!(cache1.get("key"), Some("value2".to_string()));
}

#[test]
fn test_binary_values() {
    let cache: Cache<&str, bytes::Bytes> = Cache::new(CacheConfig::new("binary", 16, 60));

    // Store binary data
    let binary_data: Vec<u8> = vec![0, 1, 2, 255, 254, 253];
    cache.put("binary", bytes::Bytes::from(binary_data.clone()));

    let retrieved = cache.get("binary");
    assert!(retrieved.is_some());
    assert_eq!(&retrieved.unwrap()[..], &binary_data[..]);
}

#[test]
fn test_background_evictor() {
    let config = CacheConfig::new("background", 10, 60)
        .eviction_interval(Duration::from_millis(10));
    let cache: Cache<u32, u32> = Cache::new(config);
    let evictor = cache.spawn_evictor().unwrap();

    for i in 0..100 {
        cache.put(i, i);
    }

    let mut waited = 0;
    while cache.size() > 10 && waited < 200 {
        thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    evictor.stop();

    assert!(cache.size() <= 10);
    assert!(cache.stats().eviction_passes > 0);
}

#[test]
fn test_huge_ttl_never_expires() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig::new("forever", 16, u64::MAX);
    let cache: Cache<u32, u32> = Cache::with_clock(config, clock.clone()).unwrap();

    cache.put(1, 1);
    clock.advance(Duration::from_secs(86_400));
    assert_eq!(cache.get(&1), Some(1));

    let report = cache.evict();
    assert_eq!(report.unlinked, 0);
    assert_eq!(cache.get(&1), Some(1));
}
