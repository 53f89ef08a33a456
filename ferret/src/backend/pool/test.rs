//! Pool behavior tests.

use std::sync::mpsc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::backend::endpoint::{Endpoint, Endpoints};
use crate::backend::shard::Flags;

use super::{Config, Error, Pool, Request};

fn pool() -> Pool {
    pool_with(10, 100)
}

fn pool_with(max_databases: usize, max_database_readers: usize) -> Pool {
    Pool::new(Config {
        root: ".".into(),
        max_databases,
        max_database_readers,
        max_endpoint_age: Duration::from_secs(60),
    })
}

fn endpoint(uri: &str) -> Endpoint {
    Endpoint::parse(uri).unwrap()
}

fn writable(timeout: Duration) -> Request {
    Request::new(Flags::WRITABLE_CREATE_OR_OPEN, timeout)
}

fn readable(timeout: Duration) -> Request {
    Request::new(Flags::CREATE_OR_OPEN, timeout)
}

#[tokio::test]
async fn test_single_writable_per_endpoint() {
    let pool = pool();
    let e = endpoint("memory:///x");

    let first = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    // Overlapping writable request observes a timeout.
    let second = pool
        .checkout(&e, &writable(Duration::from_millis(100)))
        .await;
    assert!(matches!(second, Err(Error::Timeout)));

    drop(first);

    // After checkin the handle is available again.
    let third = pool
        .checkout(&e, &writable(Duration::from_millis(100)))
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_writable_handoff_to_waiter() {
    let pool = pool();
    let e = endpoint("memory:///handoff");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    let waiter = {
        let pool = pool.clone();
        let e = e.clone();
        tokio::spawn(async move {
            pool.checkout(&e, &writable(Duration::from_secs(2)))
                .await
                .map(|_| ())
        })
    };

    sleep(Duration::from_millis(50)).await;
    drop(held);

    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reader_cap_across_endpoints() {
    let pool = pool_with(10, 2);

    let first = pool
        .checkout(&endpoint("memory:///r1"), &readable(Duration::from_secs(1)))
        .await
        .unwrap();
    let _second = pool
        .checkout(&endpoint("memory:///r2"), &readable(Duration::from_secs(1)))
        .await
        .unwrap();

    // Fleet cap reached: a third endpoint blocks.
    let third = pool
        .checkout(
            &endpoint("memory:///r3"),
            &readable(Duration::from_millis(100)),
        )
        .await;
    assert!(matches!(third, Err(Error::Timeout)));

    let blocked = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.checkout(&endpoint("memory:///r3"), &readable(Duration::from_secs(2)))
                .await
                .map(|_| ())
        })
    };

    sleep(Duration::from_millis(50)).await;
    drop(first);

    blocked.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_timeout_leaves_no_references() {
    let pool = pool_with(10, 1);
    let e = endpoint("memory:///leak");

    let held = pool.checkout(&e, &readable(Duration::from_secs(1))).await.unwrap();
    assert!(matches!(
        pool.checkout(&e, &readable(Duration::from_millis(50))).await,
        Err(Error::Timeout)
    ));
    drop(held);

    // The timed-out attempt must not have leaked a permit or a ref.
    pool.checkout(&e, &readable(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(pool.join(Instant::now() + Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_lock_waits_for_refs_and_blocks_checkouts() {
    let pool = pool();
    let e = endpoint("memory:///locked");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    let locker = {
        let pool = pool.clone();
        let e = e.clone();
        tokio::spawn(async move { pool.lock(&e, Instant::now() + Duration::from_secs(2)).await })
    };

    sleep(Duration::from_millis(50)).await;
    assert!(pool.is_locked(&e));
    assert!(!locker.is_finished()); // still draining

    drop(held);
    locker.await.unwrap().unwrap();
    assert_eq!(pool.locks(), 1);

    // While locked, no checkout returns a shard.
    assert!(matches!(
        pool.checkout(&e, &writable(Duration::from_millis(100))).await,
        Err(Error::Timeout)
    ));
    assert!(matches!(
        pool.checkout(&e, &readable(Duration::from_millis(100))).await,
        Err(Error::Timeout)
    ));

    pool.unlock(&e);
    assert!(!pool.is_locked(&e));
    assert_eq!(pool.locks(), 0);
    pool.checkout(&e, &writable(Duration::from_millis(100)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_queued_continuations_resume_in_fifo_order() {
    let pool = pool();
    let e = endpoint("memory:///fifo");

    pool.lock(&e, Instant::now() + Duration::from_secs(1))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel();
    for n in 0..3 {
        let tx = tx.clone();
        let queued = pool
            .checkout_or_queue(
                &e,
                &writable(Duration::from_secs(1)),
                Box::new(move || tx.send(n).unwrap()),
            )
            .unwrap();
        assert!(queued.is_none());
    }

    pool.unlock(&e);

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 0);
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
}

#[tokio::test]
async fn test_continuation_fires_on_checkin() {
    let pool = pool();
    let e = endpoint("memory:///cb");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let queued = pool
        .checkout_or_queue(
            &e,
            &writable(Duration::from_secs(1)),
            Box::new(move || tx.send(()).unwrap()),
        )
        .unwrap();
    assert!(queued.is_none());
    assert!(rx.try_recv().is_err());

    drop(held);
    rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // And an immediate checkout just returns the guard.
    let direct = pool
        .checkout_or_queue(&e, &writable(Duration::from_secs(1)), Box::new(|| {}))
        .unwrap();
    assert!(direct.is_some());
}

#[tokio::test]
async fn test_batch_checkout_all_or_nothing() {
    let pool = pool_with(10, 2);

    let holder = pool
        .checkout(&endpoint("memory:///b0"), &readable(Duration::from_secs(1)))
        .await
        .unwrap();

    let mut endpoints = Endpoints::new();
    endpoints.add(endpoint("memory:///b1"));
    endpoints.add(endpoint("memory:///b2"));

    // Needs two permits, only one left: acquires one, times out on the
    // other, releases the first.
    let failed = pool
        .checkout_many(&endpoints, &readable(Duration::from_millis(100)))
        .await;
    assert!(matches!(failed, Err(Error::Timeout)));

    drop(holder);

    let guards = pool
        .checkout_many(&endpoints, &readable(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(guards.len(), 2);
}

#[tokio::test]
async fn test_finish_fails_waiters_and_new_checkouts() {
    let pool = pool();
    let e = endpoint("memory:///closing");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    let waiter = {
        let pool = pool.clone();
        let e = e.clone();
        tokio::spawn(async move { pool.checkout(&e, &writable(Duration::from_secs(5))).await })
    };
    sleep(Duration::from_millis(50)).await;

    pool.finish();

    assert!(matches!(waiter.await.unwrap(), Err(Error::PoolClosed)));
    assert!(matches!(
        pool.checkout(&e, &writable(Duration::from_millis(100))).await,
        Err(Error::PoolClosed)
    ));

    drop(held);
    assert!(pool.join(Instant::now() + Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_resource_exhausted_when_all_slots_referenced() {
    let pool = pool_with(1, 100);

    let _held = pool
        .checkout(&endpoint("memory:///only"), &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    let overflow = pool
        .checkout(
            &endpoint("memory:///overflow"),
            &writable(Duration::from_millis(100)),
        )
        .await;
    assert!(matches!(overflow, Err(Error::ResourceExhausted)));
}

#[tokio::test]
async fn test_eviction_reuses_idle_slots() {
    let pool = pool_with(1, 100);

    drop(
        pool.checkout(&endpoint("memory:///first"), &writable(Duration::from_secs(1)))
            .await
            .unwrap(),
    );

    // The idle slot makes way for a new endpoint.
    pool.checkout(
        &endpoint("memory:///second"),
        &writable(Duration::from_secs(1)),
    )
    .await
    .unwrap();

    let (endpoints, _) = pool.counts();
    assert_eq!(endpoints, 1);
}

#[tokio::test]
async fn test_cleanup_immediate() {
    let pool = pool();
    let e = endpoint("memory:///cleanup");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();

    pool.cleanup(true);
    let (endpoints, _) = pool.counts();
    assert_eq!(endpoints, 1); // in use, kept

    drop(held);
    pool.cleanup(true);
    let (endpoints, _) = pool.counts();
    assert_eq!(endpoints, 0);
}

#[tokio::test]
async fn test_join_waits_for_inflight() {
    let pool = pool();
    let e = endpoint("memory:///join");

    let held = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(!pool.join(Instant::now() + Duration::from_millis(100)).await);

    drop(held);
    assert!(pool.join(Instant::now() + Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_readable_and_writable_coexist() {
    let pool = pool();
    let e = endpoint("memory:///mixed");

    let writer = pool
        .checkout(&e, &writable(Duration::from_secs(1)))
        .await
        .unwrap();
    let reader = pool
        .checkout(&e, &readable(Duration::from_secs(1)))
        .await
        .unwrap();

    assert!(writer.is_writable());
    assert!(!reader.is_writable());

    let (_, shards) = pool.counts();
    assert_eq!(shards, 2);
}

#[tokio::test]
async fn test_stats_track_activity() {
    let pool = pool();
    let e = endpoint("memory:///stats");

    drop(
        pool.checkout(&e, &writable(Duration::from_secs(1)))
            .await
            .unwrap(),
    );
    let _reader = pool
        .checkout(&e, &readable(Duration::from_millis(10)))
        .await
        .unwrap();

    let counts = pool.stats();
    assert_eq!(counts.checkouts, 2);
    assert_eq!(counts.checkins, 1);
}
