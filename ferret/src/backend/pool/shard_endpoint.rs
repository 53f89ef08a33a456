//! Per-endpoint slot coordinating shard handles.
//!
//! One `ShardEndpoint` exists per live endpoint. It owns at most one
//! writable shard, a set of reusable readable shards, the FIFO of
//! pending acquirers and the replication lock. Readable admission is
//! bounded fleet-wide by the pool's reader permits, so the readable
//! path here never waits for capacity, only for the lock.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, trace};

use crate::backend::endpoint::Endpoint;
use crate::backend::shard::{Flags, Shard};

use super::error::Error;
use super::request::Request;
use super::waiting::{wake_all, wake_one, Callback, Waiter};

/// Backoff before the single retry of a failed shard open.
const OPEN_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Inner {
    writable: Option<Arc<Shard>>,
    readables: Vec<Arc<Shard>>,
    /// Checked-out handles.
    refs: usize,
    locked: bool,
    finished: bool,
    /// Pending acquirers: blocked tasks and registered continuations,
    /// FIFO.
    callbacks: VecDeque<Waiter>,
    /// Replication lockers waiting for refs to drain.
    drained: Vec<oneshot::Sender<()>>,
    /// Last known revision per shard name, tracked across reopens and
    /// replication swaps.
    revisions: HashMap<String, u64>,
}

impl Inner {
    fn readables_available(&self) -> usize {
        self.readables
            .iter()
            .filter(|shard| !shard.is_busy())
            .count()
    }
}

/// The pool's slot for one endpoint.
pub struct ShardEndpoint {
    endpoint: Endpoint,
    root: PathBuf,
    max_readables: usize,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ShardEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ShardEndpoint")
            .field("endpoint", &self.endpoint.to_string())
            .field("writable", &inner.writable.is_some())
            .field("readables", &inner.readables.len())
            .field("refs", &inner.refs)
            .field("locked", &inner.locked)
            .finish()
    }
}

impl ShardEndpoint {
    pub(super) fn new(endpoint: Endpoint, root: PathBuf, max_readables: usize) -> Self {
        Self {
            endpoint,
            root,
            max_readables,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check the writable handle out, waiting for the current holder
    /// or the replication lock up to the request deadline.
    pub(super) async fn checkout_writable(&self, request: &Request) -> Result<Arc<Shard>, Error> {
        enum Step {
            Open,
            Wait(oneshot::Receiver<()>),
        }

        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.finished {
                    return Err(Error::PoolClosed);
                }

                if !inner.locked {
                    let writable = inner.writable.clone();
                    match writable {
                        Some(shard) => {
                            if shard.try_acquire() {
                                inner.refs += 1;
                                return Ok(shard);
                            }
                            // Busy: fall through and wait.
                            let (tx, rx) = oneshot::channel();
                            inner.callbacks.push_back(Waiter::Blocked(tx));
                            Step::Wait(rx)
                        }
                        None => Step::Open,
                    }
                } else {
                    let (tx, rx) = oneshot::channel();
                    inner.callbacks.push_back(Waiter::Blocked(tx));
                    Step::Wait(rx)
                }
            };

            match step {
                Step::Open => {
                    let shard = self.open_shard(request.flags, true).await?;
                    let mut inner = self.inner.lock();
                    if inner.finished {
                        return Err(Error::PoolClosed);
                    }
                    if inner.locked || inner.writable.is_some() {
                        // Lost the race while opening; contend again.
                        continue;
                    }
                    shard.try_acquire();
                    inner.writable = Some(shard.clone());
                    inner.refs += 1;
                    return Ok(shard);
                }
                Step::Wait(rx) => {
                    if timeout_at(request.deadline, rx).await.is_err() {
                        trace!("writable checkout timed out [{}]", self.endpoint);
                        return Err(Error::Timeout);
                    }
                    // Woken, or the slot was torn down; both re-check above.
                }
            }
        }
    }

    /// Non-blocking writable checkout. `Ok(None)` means the handle is
    /// held or the endpoint is locked; register a continuation with
    /// [`Self::queue_callback`] to hear about the next checkin.
    pub(super) fn try_checkout_writable(
        &self,
        request: &Request,
    ) -> Result<Option<Arc<Shard>>, Error> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(Error::PoolClosed);
        }
        if inner.locked {
            return Ok(None);
        }

        let writable = inner.writable.clone();
        match writable {
            Some(shard) => {
                if shard.try_acquire() {
                    inner.refs += 1;
                    Ok(Some(shard))
                } else {
                    Ok(None)
                }
            }
            None => {
                let flags = Flags {
                    writable: true,
                    create_or_open: request.flags.create_or_open,
                };
                let shard = Arc::new(Shard::open(&self.endpoint, flags, &self.root)?);
                shard.try_acquire();
                inner.writable = Some(shard.clone());
                inner.refs += 1;
                Ok(Some(shard))
            }
        }
    }

    /// Check a readable handle out. The caller already holds a
    /// fleet-wide reader permit, so this only waits while the endpoint
    /// is locked for replication.
    pub(super) async fn checkout_readable(&self, request: &Request) -> Result<Arc<Shard>, Error> {
        enum Step {
            Open,
            Wait(oneshot::Receiver<()>),
        }

        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.finished {
                    return Err(Error::PoolClosed);
                }

                if !inner.locked {
                    let available = inner.readables.iter().position(|shard| shard.try_acquire());
                    if let Some(found) = available {
                        inner.refs += 1;
                        return Ok(inner.readables[found].clone());
                    }

                    Step::Open
                } else {
                    let (tx, rx) = oneshot::channel();
                    inner.callbacks.push_back(Waiter::Blocked(tx));
                    Step::Wait(rx)
                }
            };

            match step {
                Step::Open => {
                    let shard = self.open_shard(request.flags, false).await?;
                    let mut inner = self.inner.lock();
                    if inner.finished {
                        return Err(Error::PoolClosed);
                    }
                    if inner.locked {
                        continue;
                    }
                    shard.try_acquire();
                    inner.readables.push(shard.clone());
                    inner.refs += 1;
                    return Ok(shard);
                }
                Step::Wait(rx) => {
                    if timeout_at(request.deadline, rx).await.is_err() {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Non-blocking readable checkout; the caller holds a reader
    /// permit. `Ok(None)` only while the endpoint is locked.
    pub(super) fn try_checkout_readable(
        &self,
        request: &Request,
    ) -> Result<Option<Arc<Shard>>, Error> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(Error::PoolClosed);
        }
        if inner.locked {
            return Ok(None);
        }

        let available = inner.readables.iter().position(|shard| shard.try_acquire());
        if let Some(found) = available {
            inner.refs += 1;
            return Ok(Some(inner.readables[found].clone()));
        }

        let flags = Flags {
            writable: false,
            create_or_open: request.flags.create_or_open,
        };
        let shard = Arc::new(Shard::open(&self.endpoint, flags, &self.root)?);
        shard.try_acquire();
        inner.readables.push(shard.clone());
        inner.refs += 1;
        Ok(Some(shard))
    }

    /// Register a continuation for the next checkin. Invoked inline
    /// when the slot is already finished, so it can observe
    /// `PoolClosed` on its retry.
    pub(super) fn queue_callback(&self, callback: Callback) {
        {
            let mut inner = self.inner.lock();
            if !inner.finished {
                inner.callbacks.push_back(Waiter::Callback(callback));
                return;
            }
        }
        // Finished: run it now so the retry observes `PoolClosed`.
        callback();
    }

    /// Return a handle. Wakes exactly one pending acquirer, and the
    /// replication lockers once the last reference drains.
    pub(super) fn checkin(&self, shard: &Arc<Shard>) {
        let callback = {
            let mut inner = self.inner.lock();
            shard.release();
            inner.refs = inner.refs.saturating_sub(1);

            // Returned readables over the cache bound are dropped
            // rather than kept.
            if !shard.is_writable() && inner.readables.len() > self.max_readables {
                inner.readables.retain(|cached| !Arc::ptr_eq(cached, shard));
            }

            if inner.locked && inner.refs == 0 {
                for tx in inner.drained.drain(..) {
                    let _ = tx.send(());
                }
            }

            wake_one(&mut inner.callbacks)
        };

        if let Some(callback) = callback {
            callback();
        }
    }

    /// Take the replication lock: block new checkouts, then wait for
    /// outstanding references to drain.
    pub(super) async fn lock(&self, deadline: Instant) -> Result<(), Error> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return Err(Error::PoolClosed);
            }
            if inner.locked {
                return Err(Error::Locked);
            }

            inner.locked = true;
            if inner.refs == 0 {
                debug!("locked endpoint {}", self.endpoint);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            inner.drained.push(tx);
            rx
        };

        match timeout_at(deadline, rx).await {
            Ok(Ok(())) => {
                debug!("locked endpoint {}", self.endpoint);
                Ok(())
            }
            _ => {
                // Timed out or torn down; give the lock back.
                let callbacks = {
                    let mut inner = self.inner.lock();
                    inner.locked = false;
                    if inner.finished {
                        return Err(Error::PoolClosed);
                    }
                    wake_all(&mut inner.callbacks)
                };
                for callback in callbacks {
                    callback();
                }
                Err(Error::Timeout)
            }
        }
    }

    /// Release the replication lock and wake every waiter.
    pub(super) fn unlock(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            inner.locked = false;
            wake_all(&mut inner.callbacks)
        };
        debug!("unlocked endpoint {}", self.endpoint);
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub fn is_used(&self) -> bool {
        self.inner.lock().refs > 0
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// (cached shards, checked-out references, available readables).
    pub fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        let cached = inner.readables.len() + inner.writable.is_some() as usize;
        (cached, inner.refs, inner.readables_available())
    }

    /// Last known revision for a shard name.
    pub fn revision(&self, name: &str) -> Option<u64> {
        self.inner.lock().revisions.get(name).copied()
    }

    pub fn set_revision(&self, name: &str, revision: u64) {
        let mut inner = self.inner.lock();
        let entry = inner.revisions.entry(name.to_owned()).or_insert(revision);
        // Revisions only move forward.
        *entry = (*entry).max(revision);
    }

    /// Drop cached handles after a replication swap so the next
    /// checkout reopens the switched-in shard. Callers hold the lock.
    pub(super) fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.writable = None;
        inner.readables.retain(|shard| shard.is_busy());
    }

    /// Refuse new checkouts, fail blocked waiters and run queued
    /// continuations (their retry observes `PoolClosed`).
    pub(super) fn finish(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            inner.finished = true;
            inner.drained.clear();
            wake_all(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Drop idle cached handles. Returns true when nothing is left.
    pub(super) fn clear(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(writable) = &inner.writable {
            if !writable.is_busy() {
                inner.writable = None;
            }
        }
        inner.readables.retain(|shard| shard.is_busy());
        inner.writable.is_none() && inner.readables.is_empty() && inner.refs == 0
    }

    async fn open_shard(&self, flags: Flags, writable: bool) -> Result<Arc<Shard>, Error> {
        let flags = Flags {
            writable,
            create_or_open: flags.create_or_open,
        };

        match Shard::open(&self.endpoint, flags, &self.root) {
            Ok(shard) => Ok(Arc::new(shard)),
            Err(err) if err.not_found() => Err(err.into()),
            Err(err) => {
                // One retry after a short, jittered backoff for
                // transient errors.
                debug!("shard open failed, retrying [{}]: {}", self.endpoint, err);
                let jitter = rand::rng().random_range(0..50);
                sleep(OPEN_RETRY_BACKOFF + Duration::from_millis(jitter)).await;
                Ok(Arc::new(Shard::open(&self.endpoint, flags, &self.root)?))
            }
        }
    }
}
