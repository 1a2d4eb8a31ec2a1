//! No dirty reads: a reader sees either all of a commit's writes or none

use crate::test_utils::{init_tracing, ok};
use strand::{commit, fiber, Stm, TRef};

/// Test: readers only ever observe (0, 0) or (1, 1)
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pair_is_never_torn() {
    init_tracing();
    let x = TRef::new(0u8);
    let y = TRef::new(0u8);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let pair = x.get().zip(y.get());
            fiber::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..500 {
                    seen.push(ok(commit(pair.clone()).await));
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();

    let both = x.set(1).zip_right(y.set(1));
    commit(both).await.unwrap();

    for reader in readers {
        for pair in reader.await.unwrap() {
            assert!(pair == (0, 0) || pair == (1, 1), "torn read: {:?}", pair);
        }
    }
}

/// Test: a reader racing many paired writes never sees them disagree
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_paired_writes() {
    init_tracing();
    let x = TRef::new(0u32);
    let y = TRef::new(0u32);

    let writer = fiber::spawn({
        let (x, y) = (x.clone(), y.clone());
        async move {
            for i in 1..=1_000u32 {
                commit(x.set(i).zip_right(y.set(i))).await.unwrap();
            }
        }
    });

    let check: Stm<bool> = x.get().zip_with(y.get(), |a, b| a == b);
    while !writer.is_finished() {
        assert!(ok(commit(check.clone()).await));
    }
    writer.await.unwrap();
    assert_eq!(ok(commit(x.get().zip(y.get())).await), (1_000, 1_000));
}
