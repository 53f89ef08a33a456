//! Waiter queues.
//!
//! A waiter is either a blocked task (woken through a oneshot) or a
//! registered continuation invoked when a handle frees up — never
//! both. Queues are FIFO; dead blocked waiters (timed out, cancelled)
//! are skipped at wake time.

use std::collections::VecDeque;

use tokio::sync::oneshot;

/// A queued continuation.
pub(super) type Callback = Box<dyn FnOnce() + Send>;

pub(super) enum Waiter {
    /// A task parked on a oneshot, retrying once signaled.
    Blocked(oneshot::Sender<()>),
    /// A continuation to run when a handle becomes available.
    Callback(Callback),
}

/// Wake exactly one live waiter for one freed handle. A returned
/// callback must be invoked by the caller outside any lock.
pub(super) fn wake_one(queue: &mut VecDeque<Waiter>) -> Option<Callback> {
    while let Some(waiter) = queue.pop_front() {
        match waiter {
            Waiter::Blocked(tx) => {
                if tx.send(()).is_ok() {
                    return None;
                }
                // Receiver gave up; try the next one.
            }
            Waiter::Callback(callback) => return Some(callback),
        }
    }
    None
}

/// Wake every waiter. Returned callbacks must be invoked by the
/// caller outside any lock.
pub(super) fn wake_all(queue: &mut VecDeque<Waiter>) -> Vec<Callback> {
    let mut callbacks = vec![];
    for waiter in queue.drain(..) {
        match waiter {
            Waiter::Blocked(tx) => {
                let _ = tx.send(());
            }
            Waiter::Callback(callback) => callbacks.push(callback),
        }
    }
    callbacks
}
