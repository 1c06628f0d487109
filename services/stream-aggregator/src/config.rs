//! Service configuration
//!
//! Flags fall back to environment variables, then to the defaults the
//! feed source and dashboard expect (`localhost:9999`, 5 second trigger,
//! artifacts in the working directory).

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

pub const DEFAULT_FEED_HOST: &str = "localhost";
pub const DEFAULT_FEED_PORT: u16 = 9999;
pub const DEFAULT_TRIGGER_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "stream-aggregator",
    about = "Aggregates a live transaction feed into dashboard snapshots"
)]
pub struct AggregatorConfig {
    /// Feed source host
    #[arg(long, default_value = DEFAULT_FEED_HOST, env = "FEED_HOST")]
    pub feed_host: String,

    /// Feed source port
    #[arg(long, default_value_t = DEFAULT_FEED_PORT, env = "FEED_PORT")]
    pub feed_port: u16,

    /// Milliseconds between aggregation triggers
    #[arg(long, default_value_t = DEFAULT_TRIGGER_INTERVAL_MS, env = "TRIGGER_INTERVAL_MS")]
    pub trigger_interval_ms: u64,

    /// Directory the snapshot artifacts are published into
    #[arg(long, default_value = ".", env = "SNAPSHOT_DIR")]
    pub output_dir: PathBuf,

    /// Parallel workers used to parse and fold each batch
    #[arg(long, default_value_t = default_workers(), env = "AGGREGATOR_WORKERS")]
    pub workers: usize,

    /// Raw lines buffered between the feed reader and the trigger loop
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY, env = "CHANNEL_CAPACITY")]
    pub channel_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            feed_host: DEFAULT_FEED_HOST.to_string(),
            feed_port: DEFAULT_FEED_PORT,
            trigger_interval_ms: DEFAULT_TRIGGER_INTERVAL_MS,
            output_dir: PathBuf::from("."),
            workers: default_workers(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl AggregatorConfig {
    /// `host:port` of the feed source.
    pub fn feed_addr(&self) -> String {
        format!("{}:{}", self.feed_host, self.feed_port)
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_millis(self.trigger_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "trigger_interval_ms",
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "channel_capacity",
            });
        }
        Ok(())
    }
}
