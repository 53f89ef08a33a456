//! Periodic pool maintenance.
//!
//! Walks the endpoint LRU on an interval, renewing slots that are in
//! use and evicting idle, unlocked ones that aged out. Stops when the
//! pool shuts down.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use super::Pool;

pub struct Cleanup;

impl Cleanup {
    /// Spawn the maintenance loop for a pool.
    pub fn run(pool: &Pool, interval: Duration) {
        let pool = pool.clone();
        tokio::spawn(async move {
            debug!("pool cleanup running every {:?}", interval);
            loop {
                tokio::select! {
                    _ = sleep(interval) => {
                        pool.cleanup(false);
                    }
                    _ = pool.sync().shutdown.notified() => {
                        break;
                    }
                }
            }
            debug!("pool cleanup stopped");
        });
    }
}
