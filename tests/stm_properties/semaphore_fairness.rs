//! Semaphore fairness: acquire_n never completes while fewer than n permits
//! are available, and among waiters that can proceed the earliest goes first

use crate::test_utils::{eventually, init_tracing, ok, run, within};
use std::sync::{Arc, Mutex};
use strand::{commit, fiber, TSemaphore};

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Test: acquire_n(3) waits until three permits have been released
#[tokio::test]
async fn test_acquire_n_waits_for_enough_permits() {
    init_tracing();
    let semaphore = TSemaphore::new(0);
    let waiter = fiber::spawn({
        let semaphore = semaphore.clone();
        async move { commit(semaphore.acquire_n(3)).await }
    });

    for released in 1..=2 {
        commit(semaphore.release()).await.unwrap();
        settle().await;
        assert!(!waiter.is_finished(), "finished with {} permits", released);
        assert_eq!(run(semaphore.available()), released);
    }

    commit(semaphore.release()).await.unwrap();
    ok(within(waiter).await.unwrap());
    assert_eq!(run(semaphore.available()), 0);
}

/// Test: the earliest waiter is served first
#[tokio::test]
async fn test_earliest_waiter_first() {
    init_tracing();
    let semaphore = TSemaphore::new(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for id in 0..3 {
        let semaphore = semaphore.clone();
        let order = Arc::clone(&order);
        waiters.push(fiber::spawn(async move {
            ok(commit(semaphore.acquire_n(2)).await);
            order.lock().unwrap().push(id);
        }));
        settle().await;
    }

    // Enough for exactly one waiter at a time
    for served in 1..=3 {
        commit(semaphore.release_n(2)).await.unwrap();
        eventually(|| order.lock().unwrap().len() == served).await;
        settle().await;
        assert_eq!(order.lock().unwrap().len(), served);
    }
    for waiter in waiters {
        within(waiter).await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

/// Test: with_permits bounds concurrent holders and returns every permit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_with_permits_under_contention() {
    init_tracing();
    let semaphore = TSemaphore::new(4);
    let holders = Arc::new(Mutex::new((0usize, 0usize)));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let semaphore = semaphore.clone();
            let holders = Arc::clone(&holders);
            fiber::spawn(async move {
                let n = 1 + i % 2;
                semaphore
                    .with_permits(n, async {
                        {
                            let mut h = holders.lock().unwrap();
                            h.0 += n;
                            h.1 = h.1.max(h.0);
                        }
                        tokio::task::yield_now().await;
                        holders.lock().unwrap().0 -= n;
                    })
                    .await
            })
        })
        .collect();
    for task in tasks {
        ok(task.await.unwrap());
    }

    assert!(holders.lock().unwrap().1 <= 4);
    assert_eq!(ok(commit(semaphore.available()).await), 4);
}
