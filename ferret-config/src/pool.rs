//! Shard pool sizing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn max_databases() -> usize {
    400
}

fn max_database_readers() -> usize {
    100
}

fn cleanup_interval() -> u64 {
    60_000
}

fn checkout_timeout() -> u64 {
    60_000
}

fn lock_timeout() -> u64 {
    60_000
}

/// Durations are stored in milliseconds so the TOML stays plain
/// integers; use the accessor methods in code.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pool {
    /// Bound on cached shard endpoints.
    #[serde(default = "max_databases")]
    pub max_databases: usize,
    /// Fleet-wide bound on checked-out readers.
    #[serde(default = "max_database_readers")]
    pub max_database_readers: usize,
    #[serde(default = "cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "checkout_timeout")]
    pub checkout_timeout: u64,
    #[serde(default = "lock_timeout")]
    pub lock_timeout: u64,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            max_databases: max_databases(),
            max_database_readers: max_database_readers(),
            cleanup_interval: cleanup_interval(),
            checkout_timeout: checkout_timeout(),
            lock_timeout: lock_timeout(),
        }
    }
}

impl Pool {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval)
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout)
    }
}
