//! Bulk increment: concurrent read-modify-write transactions never lose an
//! update

use crate::test_utils::{init_tracing, ok};
use strand::{commit, fiber, Committer, StmConfig, TMap, TRef};

/// Test: 10 fibers x 1000 increments converge to 10000
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_converges() {
    init_tracing();
    let counter = TRef::new(0u64);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let counter = counter.clone();
            fiber::spawn(async move {
                let increment = counter.update(|n| n + 1);
                for _ in 0..1_000 {
                    commit(increment.clone()).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(ok(commit(counter.get()).await), 10_000);
}

/// Test: the same holds with an eager-yielding driver
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_converges_with_custom_driver() {
    init_tracing();
    let config = StmConfig::builder()
        .yield_after_conflicts(1)
        .build()
        .unwrap();
    let committer = Committer::new(config);
    let counter = TRef::new(0u64);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let (counter, committer) = (counter.clone(), committer.clone());
            fiber::spawn(async move {
                for _ in 0..1_000 {
                    committer.commit(counter.update(|n| n + 1)).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(ok(commit(counter.get()).await), 10_000);
}

/// Test: per-key counters in a shared map converge, including across resizes
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_map_counters_converge() {
    init_tracing();
    let map: TMap<u32, u32> = TMap::with_capacity(2);

    let handles: Vec<_> = (0..10u32)
        .map(|worker| {
            let map = map.clone();
            fiber::spawn(async move {
                for i in 0..200u32 {
                    let key = (worker + i) % 20;
                    let bump = map.get_or_else(key, 0).flat_map({
                        let map = map.clone();
                        move |n| map.set(key, n + 1).unit()
                    });
                    commit(bump).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let total = ok(commit(map.fold(0u32, |acc, _, v| acc + v)).await);
    assert_eq!(total, 2_000);
    assert_eq!(ok(commit(map.size()).await), 20);
}
