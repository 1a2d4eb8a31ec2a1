//! Retry resumption: a transaction that retries parks its fiber and resumes
//! once another commit changes a TRef it read. Takers blocked on one queue
//! are served in the order they started waiting.

use crate::test_utils::{eventually, init_tracing, ok, run, within};
use std::sync::{Arc, Mutex};
use strand::{commit, fiber, TQueue, TRef};

/// Test: a retrying transaction resumes after the write it waits for
#[tokio::test]
async fn test_resumes_after_write() {
    init_tracing();
    let ready = TRef::new(false);
    let value = TRef::new(0);

    let waiter = fiber::spawn({
        let (ready, value) = (ready.clone(), value.clone());
        async move {
            let wait = ready.get().retry_until(|r| *r).zip_right(value.get());
            commit(wait).await
        }
    });
    eventually(|| ready.waiting() == 1).await;

    // Writing an unrelated TRef does not finish the waiter
    commit(value.set(42)).await.unwrap();
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    commit(ready.set(true)).await.unwrap();
    assert_eq!(ok(within(waiter).await.unwrap()), 42);
    assert_eq!(ready.waiting(), 0);
}

/// Test: blocked takers are served first-come, first-served
#[tokio::test]
async fn test_blocked_takes_served_in_order() {
    init_tracing();
    let queue = run(TQueue::<u32>::unbounded());
    let served = Arc::new(Mutex::new(Vec::new()));

    let mut takers = Vec::new();
    for taker in 0..3u32 {
        let queue = queue.clone();
        let served = Arc::clone(&served);
        takers.push(fiber::spawn(async move {
            let value = ok(commit(queue.take()).await);
            served.lock().unwrap().push((taker, value));
        }));
        // let this taker park before the next one starts
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    commit(queue.offer_all(vec![10, 20, 30])).await.unwrap();
    for taker in takers {
        within(taker).await.unwrap();
    }

    let served = served.lock().unwrap().clone();
    assert_eq!(served, vec![(0, 10), (1, 20), (2, 30)]);
}

/// Test: a fiber parked on one value resumes for each of several changes
#[tokio::test]
async fn test_resumes_repeatedly() {
    init_tracing();
    let counter = TRef::new(0u32);

    let waiter = fiber::spawn({
        let counter = counter.clone();
        async move { commit(counter.get().retry_until(|n| *n >= 5)).await }
    });

    for _ in 0..5 {
        eventually(|| counter.waiting() == 1).await;
        commit(counter.update(|n| n + 1)).await.unwrap();
    }
    assert_eq!(ok(within(waiter).await.unwrap()), 5);
}

/// Test: one offered value resumes exactly one of two blocked takers
#[tokio::test]
async fn test_single_offer_resumes_one_taker() {
    init_tracing();
    let queue = run(TQueue::<u32>::bounded(4));

    let takers: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            fiber::spawn(async move { commit(queue.take()).await })
        })
        .collect();
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    commit(queue.offer(5)).await.unwrap();
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    let finished: Vec<bool> = takers.iter().map(|t| t.is_finished()).collect();
    assert_eq!(finished, vec![true, false]);

    // the second taker is still parked and gets the next value
    commit(queue.offer(6)).await.unwrap();
    let mut takers = takers.into_iter();
    for expected in [5, 6] {
        let taker = takers.next().unwrap();
        assert_eq!(ok(within(taker).await.unwrap()), expected);
    }
}
