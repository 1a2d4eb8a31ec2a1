//! orElse isolation: writes made by an abandoned branch are invisible to the
//! alternative and are never committed

use crate::test_utils::{init_tracing, ok, run, within};
use strand::{commit, fiber, Stm, TQueue, TRef};

/// Test: the alternative sees the state from before the first branch
#[tokio::test]
async fn test_alternative_sees_original_state() {
    init_tracing();
    let log = TRef::new(Vec::<&'static str>::new());

    let first: Stm<usize> = log
        .update(|mut entries| {
            entries.push("first");
            entries
        })
        .zip_right(Stm::retry());
    let second: Stm<usize> = log.modify(|mut entries| {
        let seen = entries.len();
        entries.push("second");
        (seen, entries)
    });

    assert_eq!(ok(commit(first.or_else(second)).await), 0);
    assert_eq!(run(log.get()), vec!["second"]);
}

/// Test: a typed failure in the first branch is discarded with its writes
#[tokio::test]
async fn test_failed_branch_is_discarded() {
    init_tracing();
    let balance = TRef::new(100);

    let risky: Stm<&'static str, String> = balance
        .set(0)
        .lift_err()
        .zip_right(Stm::fail("declined".to_string()));
    let safe: Stm<&'static str> = Stm::succeed("fallback");

    assert_eq!(ok(commit(risky.or_else(safe)).await), "fallback");
    assert_eq!(run(balance.get()), 100);
}

/// Test: nested alternatives unwind only their own writes
#[tokio::test]
async fn test_nested_alternatives() {
    init_tracing();
    let a = TRef::new(0);
    let b = TRef::new(0);

    let inner = b.set(1).zip_right(Stm::<()>::retry()).or_else(b.set(2));
    let outer = a
        .set(1)
        .zip_right(inner)
        .zip_right(Stm::<()>::retry())
        .or_else(a.get().flat_map({
            let a = a.clone();
            move |n| a.set(n + 10)
        }));

    commit(outer).await.unwrap();
    assert_eq!(run(a.get()), 10);
    assert_eq!(run(b.get()), 0);
}

/// Test: when both branches retry, a change on either side wakes the fiber
#[tokio::test]
async fn test_both_sides_wake_the_transaction() {
    init_tracing();
    let left = run(TQueue::<u32>::unbounded());
    let right = run(TQueue::<u32>::unbounded());

    let waiter = fiber::spawn({
        let (left, right) = (left.clone(), right.clone());
        async move { commit(left.take().or_else(right.take())).await }
    });
    // give the waiter time to park on both queues
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(!waiter.is_finished());

    // the left queue is only read by the abandoned branch
    commit(left.offer(7)).await.unwrap();
    assert_eq!(ok(within(waiter).await.unwrap()), 7);
}
