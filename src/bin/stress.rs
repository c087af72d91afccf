//! Stress tool for the lock-free TTL cache.
//!
//! `run` drives a cache from several threads while a background evictor
//! keeps it near capacity, then prints the final statistics. `scenario`
//! replays a three-key eviction step by step with a manual clock.

use bytes::Bytes;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use lockfree_ttl_cache::cli::StressCommand;
use lockfree_ttl_cache::{Cache, CacheConfig, CacheResult, Cli, Clock, Lookup, ManualClock};

/// Workload parameters for `run`.
struct Workload {
    threads: usize,
    keys: u64,
    read_percent: u8,
    erase_percent: u8,
    value_size: usize,
    duration: Duration,
}

/// Operation counts shared by all workers.
#[derive(Default)]
struct Counts {
    gets: AtomicU64,
    puts: AtomicU64,
    erases: AtomicU64,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        StressCommand::Run {
            threads,
            keys,
            capacity,
            ttl,
            seconds,
            read_percent,
            erase_percent,
            evict_interval_ms,
            value_size,
        } => {
            let config = CacheConfig::new("stress", capacity, ttl)
                .eviction_interval(Duration::from_millis(evict_interval_ms));
            let workload = Workload {
                threads,
                keys: keys.max(1),
                read_percent: read_percent.min(100),
                erase_percent: erase_percent.min(100 - read_percent.min(100)),
                value_size,
                duration: Duration::from_secs(seconds),
            };
            run(config, workload)
        }
        StressCommand::Scenario => scenario(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// RUST_LOG takes precedence over `--log-level`.
fn init_logging(level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_names(true))
        .init();
}

fn run(config: CacheConfig, workload: Workload) -> CacheResult<()> {
    let config = config.build()?;
    let cache: Cache<u64, Bytes> = Cache::try_new(config)?;
    let evictor = cache.spawn_evictor()?;

    tracing::info!(
        threads = workload.threads,
        keys = workload.keys,
        capacity = cache.capacity(),
        seconds = workload.duration.as_secs(),
        "starting workload"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new(Counts::default());
    let workload = Arc::new(workload);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(workload.threads);
    for id in 0..workload.threads {
        let cache = cache.clone();
        let stop = Arc::clone(&stop);
        let counts = Arc::clone(&counts);
        let workload = Arc::clone(&workload);
        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || run_worker(id, &cache, &workload, &stop, &counts))?;
        handles.push(handle);
    }

    // Report progress once a second.
    while started.elapsed() < workload.duration {
        thread::sleep(Duration::from_secs(1).min(workload.duration));
        let stats = cache.stats();
        tracing::info!(
            size = stats.size,
            hit_rate = stats.hit_rate,
            evictions = stats.evictions,
            live_nodes = stats.live_nodes,
            live_values = stats.live_values,
            "progress"
        );
    }
    stop.store(true, Ordering::Relaxed);

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
    evictor.stop();

    let elapsed = started.elapsed().as_secs_f64();
    let ops = counts.gets.load(Ordering::Relaxed)
        + counts.puts.load(Ordering::Relaxed)
        + counts.erases.load(Ordering::Relaxed);
    let stats = cache.stats();

    println!("operations:  {} ({:.0}/s)", ops, ops as f64 / elapsed);
    println!(
        "gets/puts/erases: {}/{}/{}",
        counts.gets.load(Ordering::Relaxed),
        counts.puts.load(Ordering::Relaxed),
        counts.erases.load(Ordering::Relaxed)
    );
    println!(
        "hits={} misses={} expired={} hit_rate={:.1}%",
        stats.hits, stats.misses, stats.expired, stats.hit_rate
    );
    println!(
        "size={} capacity={} evictions={} passes={}",
        stats.size,
        cache.capacity(),
        stats.evictions,
        stats.eviction_passes
    );
    println!(
        "reclaimed nodes={} values={} live nodes={} values={}",
        stats.reclaimed_nodes, stats.reclaimed_values, stats.live_nodes, stats.live_values
    );

    Ok(())
}

fn run_worker(
    id: usize,
    cache: &Cache<u64, Bytes>,
    workload: &Workload,
    stop: &AtomicBool,
    counts: &Counts,
) {
    let mut rng = StdRng::seed_from_u64(42 + id as u64);
    let mut value = vec![0u8; workload.value_size];
    rng.fill_bytes(&mut value);
    let value = Bytes::from(value);

    let erase_threshold = workload.read_percent + workload.erase_percent;

    while !stop.load(Ordering::Relaxed) {
        let key = rng.random_range(0..workload.keys);
        let roll: u8 = rng.random_range(0..100);

        if roll < workload.read_percent {
            let _ = cache.get(&key);
            counts.gets.fetch_add(1, Ordering::Relaxed);
        } else if roll < erase_threshold {
            cache.erase(&key);
            counts.erases.fetch_add(1, Ordering::Relaxed);
        } else {
            cache.put(key, value.clone());
            counts.puts.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn scenario() -> CacheResult<()> {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig::new("scenario", 2, 60).bucket_count(2).build()?;
    let cache: Cache<&str, u32> = Cache::with_clock(config, clock.clone())?;

    for (value, key) in ["A", "B", "C"].into_iter().enumerate() {
        cache.put(key, value as u32);
        println!("t={:>9}us put {}", clock.now(), key);
        clock.advance(Duration::from_millis(1));
    }
    println!("size before eviction: {}", cache.size());

    let report = cache.evict();
    println!(
        "eviction: censused={} unlinked={} threshold={:?}",
        report.censused, report.unlinked, report.threshold
    );
    println!("size after eviction: {}", cache.size());

    let now = clock.now();
    for key in ["A", "B", "C"] {
        let state = match cache.get_with_now(key, now) {
            Lookup::Hit(value) => format!("hit ({})", value),
            Lookup::Expired => "expired".to_string(),
            Lookup::Miss => "miss".to_string(),
        };
        println!("get {}: {}", key, state);
    }

    Ok(())
}
