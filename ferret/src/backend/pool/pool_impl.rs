//! The shard pool.
//!
//! An aging LRU of [`ShardEndpoint`] slots with fleet-wide limits on
//! open endpoints and checked-out readers. Readable capacity is a
//! permit counter with its own FIFO of waiters; everything else is
//! coordinated per endpoint.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::backend::endpoint::{Endpoint, Endpoints};
use crate::backend::shard::Shard;
use crate::cache::{DropAction, GetAction, Lru};

use super::error::Error;
use super::guard::Guard;
use super::request::Request;
use super::shard_endpoint::ShardEndpoint;
use super::stats::{Counts, Stats};
use super::waiting::{wake_all, wake_one, Callback, Waiter};

/// Pool sizing knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for relative endpoint paths.
    pub root: PathBuf,
    /// Bound on cached endpoint slots.
    pub max_databases: usize,
    /// Fleet-wide bound on simultaneously checked-out readers.
    pub max_database_readers: usize,
    /// Idle endpoints older than this are eviction candidates.
    pub max_endpoint_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: ".".into(),
            max_databases: 400,
            max_database_readers: 100,
            max_endpoint_age: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct Readers {
    count: usize,
    waiters: VecDeque<Waiter>,
}

pub(crate) struct PoolSync {
    config: Config,
    endpoints: Mutex<Lru<Endpoint, Arc<ShardEndpoint>>>,
    readers: Mutex<Readers>,
    locks: AtomicUsize,
    finished: AtomicBool,
    /// Signaled on every checkin; `join` listens.
    idle: Notify,
    /// Signaled on shutdown; the cleanup task listens.
    pub(super) shutdown: Notify,
    stats: Stats,
}

/// The shard pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolSync>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (endpoints, shards) = self.counts();
        f.debug_struct("Pool")
            .field("endpoints", &endpoints)
            .field("shards", &shards)
            .field("readers", &self.inner.readers.lock().count)
            .finish()
    }
}

impl Pool {
    pub fn new(config: Config) -> Self {
        let endpoints = Lru::new(Some(config.max_databases), Some(config.max_endpoint_age));
        Self {
            inner: Arc::new(PoolSync {
                config,
                endpoints: Mutex::new(endpoints),
                readers: Mutex::new(Readers::default()),
                locks: AtomicUsize::new(0),
                finished: AtomicBool::new(false),
                idle: Notify::new(),
                shutdown: Notify::new(),
                stats: Stats::default(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn stats(&self) -> Counts {
        self.inner.stats.snapshot()
    }

    /// Check one shard out, waiting up to the request deadline.
    pub async fn checkout(&self, endpoint: &Endpoint, request: &Request) -> Result<Guard, Error> {
        Stats::incr(&self.inner.stats.checkouts);
        let result = self.checkout_internal(endpoint, request).await;
        if matches!(result, Err(Error::Timeout)) {
            Stats::incr(&self.inner.stats.timeouts);
        }
        result
    }

    async fn checkout_internal(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<Guard, Error> {
        if self.is_finished() {
            return Err(Error::PoolClosed);
        }

        let slot = self.slot(endpoint)?;

        if request.flags.writable {
            let shard = slot.checkout_writable(request).await?;
            Ok(Guard::new(self.clone(), shard))
        } else {
            self.acquire_reader(request.deadline).await?;
            match slot.checkout_readable(request).await {
                Ok(shard) => Ok(Guard::new(self.clone(), shard)),
                Err(err) => {
                    // No leak on failure: the permit goes back.
                    self.release_reader();
                    Err(err)
                }
            }
        }
    }

    /// Non-blocking checkout. When no handle is available the
    /// continuation is queued and invoked (exactly once) on a future
    /// checkin; the caller retries from it.
    pub fn checkout_or_queue(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        on_available: Callback,
    ) -> Result<Option<Guard>, Error> {
        if self.is_finished() {
            return Err(Error::PoolClosed);
        }

        let slot = self.slot(endpoint)?;

        if request.flags.writable {
            match slot.try_checkout_writable(request)? {
                Some(shard) => Ok(Some(Guard::new(self.clone(), shard))),
                None => {
                    slot.queue_callback(on_available);
                    Ok(None)
                }
            }
        } else {
            if !self.try_acquire_reader() {
                self.queue_reader_callback(on_available);
                return Ok(None);
            }
            match slot.try_checkout_readable(request) {
                Ok(Some(shard)) => Ok(Some(Guard::new(self.clone(), shard))),
                Ok(None) => {
                    self.release_reader();
                    slot.queue_callback(on_available);
                    Ok(None)
                }
                Err(err) => {
                    self.release_reader();
                    Err(err)
                }
            }
        }
    }

    /// Batch checkout: all or nothing. Endpoints come ordered (the
    /// `Endpoints` set sorts), which keeps overlapping batches from
    /// deadlocking each other.
    pub async fn checkout_many(
        &self,
        endpoints: &Endpoints,
        request: &Request,
    ) -> Result<Vec<Guard>, Error> {
        let mut guards = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            match self.checkout(endpoint, request).await {
                Ok(guard) => guards.push(guard),
                Err(err) => {
                    // Dropping the guards releases what we acquired.
                    drop(guards);
                    return Err(err);
                }
            }
        }
        Ok(guards)
    }

    /// Return a shard. Called by [`Guard::drop`].
    pub(super) fn checkin(&self, shard: Arc<Shard>) {
        let slot = self.inner.endpoints.lock().peek(shard.endpoint()).cloned();
        match slot {
            Some(slot) => slot.checkin(&shard),
            // Slot raced away; just free the handle.
            None => shard.release(),
        }

        if !shard.is_writable() {
            self.release_reader();
        }

        Stats::incr(&self.inner.stats.checkins);
        self.inner.idle.notify_waiters();
    }

    /// Take the replication lock on an endpoint: new checkouts block,
    /// existing references drain first.
    pub async fn lock(&self, endpoint: &Endpoint, deadline: Instant) -> Result<(), Error> {
        let slot = self.slot(endpoint)?;
        slot.lock(deadline).await?;
        self.inner.locks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release the replication lock and wake all waiters.
    pub fn unlock(&self, endpoint: &Endpoint) {
        if let Some(slot) = self.inner.endpoints.lock().peek(endpoint).cloned() {
            slot.unlock();
            self.inner.locks.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn is_locked(&self, endpoint: &Endpoint) -> bool {
        self.inner
            .endpoints
            .lock()
            .peek(endpoint)
            .map(|slot| slot.is_locked())
            .unwrap_or(false)
    }

    /// Active replication locks, fleet-wide.
    pub fn locks(&self) -> usize {
        self.inner.locks.load(Ordering::Acquire)
    }

    /// Drop an endpoint's cached handles so the next checkout reopens
    /// from disk. Used after a replication swap, under the lock.
    pub fn invalidate(&self, endpoint: &Endpoint) {
        if let Some(slot) = self.inner.endpoints.lock().peek(endpoint).cloned() {
            slot.invalidate();
        }
    }

    /// Last known revision for an endpoint's shard.
    pub fn revision(&self, endpoint: &Endpoint) -> Option<u64> {
        self.inner
            .endpoints
            .lock()
            .peek(endpoint)
            .and_then(|slot| slot.revision(&endpoint.path))
    }

    pub fn set_revision(&self, endpoint: &Endpoint, revision: u64) {
        if let Ok(slot) = self.slot(endpoint) {
            slot.set_revision(&endpoint.path, revision);
        }
    }

    /// Evict idle endpoints. `immediate` tears every unused slot down
    /// right away instead of waiting out the age bound.
    pub fn cleanup(&self, immediate: bool) {
        let mut evicted = 0;

        {
            let mut endpoints = self.inner.endpoints.lock();
            if immediate {
                let idle: Vec<_> = endpoints
                    .iter()
                    .filter(|(_, slot)| !slot.is_used() && !slot.is_locked())
                    .map(|(endpoint, _)| endpoint.clone())
                    .collect();
                for endpoint in idle {
                    endpoints.erase(&endpoint);
                    evicted += 1;
                }
            } else {
                endpoints.trim_with(|_, slot| {
                    if slot.is_used() || slot.is_locked() {
                        DropAction::Renew
                    } else {
                        evicted += 1;
                        DropAction::Evict
                    }
                });
            }
        }

        if evicted > 0 {
            debug!("cleanup evicted {} idle endpoints", evicted);
            for _ in 0..evicted {
                Stats::incr(&self.inner.stats.endpoints_evicted);
            }
        }
    }

    /// Refuse new work. Blocked waiters fail with `PoolClosed`;
    /// queued continuations run and observe it on retry.
    pub fn finish(&self) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shard pool shutting down");

        let slots: Vec<_> = self
            .inner
            .endpoints
            .lock()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in slots {
            slot.finish();
        }

        let callbacks = wake_all(&mut self.inner.readers.lock().waiters);
        for callback in callbacks {
            callback();
        }

        self.inner.shutdown.notify_one();
        self.inner.idle.notify_waiters();
    }

    /// Wait for inflight checkouts to drain. Returns false when the
    /// deadline passes first.
    pub async fn join(&self, deadline: Instant) -> bool {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.is_idle();
            }
        }
    }

    /// Drop every idle cached handle and unused endpoint. Returns true
    /// when the pool ended up empty.
    pub fn clear(&self) -> bool {
        let mut endpoints = self.inner.endpoints.lock();
        let removable: Vec<_> = endpoints
            .iter()
            .filter(|(_, slot)| slot.clear() && !slot.is_locked())
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        for endpoint in &removable {
            endpoints.erase(endpoint);
        }
        endpoints.is_empty()
    }

    /// (cached endpoints, cached shard handles).
    pub fn counts(&self) -> (usize, usize) {
        let endpoints = self.inner.endpoints.lock();
        let shards = endpoints.iter().map(|(_, slot)| slot.counts().0).sum();
        (endpoints.len(), shards)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    pub(super) fn sync(&self) -> &PoolSync {
        &self.inner
    }

    fn is_idle(&self) -> bool {
        let used = self
            .inner
            .endpoints
            .lock()
            .iter()
            .any(|(_, slot)| slot.is_used());
        !used && self.inner.readers.lock().count == 0
    }

    /// Resolve the endpoint's slot, spawning one on miss. Spawning
    /// never evicts a used or locked slot; when the map can't make
    /// room the checkout surfaces `ResourceExhausted`.
    fn slot(&self, endpoint: &Endpoint) -> Result<Arc<ShardEndpoint>, Error> {
        let mut endpoints = self.inner.endpoints.lock();

        if let Some(slot) = endpoints.find_and(|_| GetAction::Renew, endpoint) {
            return Ok(slot.clone());
        }

        let slot = Arc::new(ShardEndpoint::new(
            endpoint.clone(),
            self.inner.config.root.clone(),
            self.inner.config.max_database_readers,
        ));
        endpoints.insert_with(endpoint.clone(), slot.clone(), |_, other| {
            if other.is_used() || other.is_locked() {
                DropAction::Leave
            } else {
                DropAction::Evict
            }
        });

        if endpoints.len() > self.inner.config.max_databases {
            // Could not make room without evicting a referenced slot.
            endpoints.erase(endpoint);
            return Err(Error::ResourceExhausted);
        }

        Stats::incr(&self.inner.stats.endpoints_spawned);
        Ok(slot)
    }

    async fn acquire_reader(&self, deadline: Instant) -> Result<(), Error> {
        loop {
            let rx = {
                let mut readers = self.inner.readers.lock();
                if self.is_finished() {
                    return Err(Error::PoolClosed);
                }
                if readers.count < self.inner.config.max_database_readers {
                    readers.count += 1;
                    return Ok(());
                }
                let (tx, rx) = oneshot::channel();
                readers.waiters.push_back(Waiter::Blocked(tx));
                rx
            };

            if timeout_at(deadline, rx).await.is_err() {
                return Err(Error::Timeout);
            }
        }
    }

    fn try_acquire_reader(&self) -> bool {
        let mut readers = self.inner.readers.lock();
        if readers.count < self.inner.config.max_database_readers {
            readers.count += 1;
            true
        } else {
            false
        }
    }

    fn queue_reader_callback(&self, callback: Callback) {
        {
            let mut readers = self.inner.readers.lock();
            if !self.is_finished() {
                readers.waiters.push_back(Waiter::Callback(callback));
                return;
            }
        }
        callback();
    }

    fn release_reader(&self) {
        let callback = {
            let mut readers = self.inner.readers.lock();
            readers.count = readers.count.saturating_sub(1);
            wake_one(&mut readers.waiters)
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}
