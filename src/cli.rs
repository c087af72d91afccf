//! Command-line interface definitions.
//!
//! This module defines the CLI structure for the stress tool using clap.

use clap::{Parser, Subcommand};

/// Lock-free TTL cache stress tool.
///
/// Drives a cache from many threads with a background evictor, or replays
/// a small eviction scenario step by step.
#[derive(Parser, Debug)]
#[command(name = "lockfree-ttl-stress")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// The command to execute.
    #[clap(subcommand)]
    pub command: StressCommand,
}

/// Available stress commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum StressCommand {
    /// Run a mixed workload.
    ///
    /// Worker threads issue gets, puts and erases over a fixed key space
    /// while a background evictor keeps the cache near capacity.
    Run {
        /// Number of worker threads.
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Size of the key space.
        #[arg(long, default_value_t = 100_000)]
        keys: u64,

        /// Target number of entries.
        #[arg(long, default_value_t = 10_000)]
        capacity: usize,

        /// Time-to-live of every value, in seconds.
        #[arg(long, default_value_t = 30)]
        ttl: u64,

        /// How long to run, in seconds.
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Percentage of operations that are reads.
        #[arg(long, default_value_t = 80)]
        read_percent: u8,

        /// Percentage of operations that are erases.
        #[arg(long, default_value_t = 5)]
        erase_percent: u8,

        /// Interval between eviction passes, in milliseconds.
        #[arg(long, default_value_t = 100)]
        evict_interval_ms: u64,

        /// Size of each value, in bytes.
        #[arg(long, default_value_t = 64)]
        value_size: usize,
    },

    /// Replay the capacity-two eviction scenario with a manual clock.
    ///
    /// Inserts A, B and C at increasing times, runs one eviction pass and
    /// shows which keys survive.
    Scenario,
}
