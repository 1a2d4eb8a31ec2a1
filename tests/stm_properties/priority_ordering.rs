//! Priority ordering: TPriorityQueue always serves its smallest value

use crate::test_utils::{init_tracing, ok, run, within};
use proptest::prelude::*;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use strand::{commit, fiber, TPriorityQueue};

#[derive(Debug, Clone)]
enum Op {
    Offer(i32),
    Take,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-100i32..100).prop_map(Op::Offer),
        Just(Op::Take),
    ]
}

proptest! {
    /// Interleaved offers and takes agree with a binary heap
    #[test]
    fn prop_matches_heap_model(ops in prop::collection::vec(op(), 0..80)) {
        let queue = TPriorityQueue::new();
        let mut model = BinaryHeap::new();
        for op in ops {
            match op {
                Op::Offer(n) => {
                    run(queue.offer(n));
                    model.push(Reverse(n));
                }
                Op::Take => {
                    let expected = model.pop().map(|Reverse(n)| n);
                    prop_assert_eq!(run(queue.take_option()), expected);
                }
            }
        }
        let rest: Vec<i32> = std::iter::from_fn(|| model.pop().map(|Reverse(n)| n)).collect();
        prop_assert_eq!(run(queue.take_all()), rest);
    }

    /// Taking everything yields a non-decreasing sequence
    #[test]
    fn prop_take_all_non_decreasing(values in prop::collection::vec(any::<u16>(), 0..100)) {
        let queue = run(TPriorityQueue::from_iter(values.clone()));
        let taken = run(queue.take_all());
        prop_assert_eq!(taken.len(), values.len());
        prop_assert!(taken.windows(2).all(|w| w[0] <= w[1]));
    }
}

/// Test: a blocked take receives the smallest value of a batch
#[tokio::test]
async fn test_blocked_take_gets_smallest() {
    init_tracing();
    let queue = TPriorityQueue::<u32>::new();
    let taker = fiber::spawn({
        let queue = queue.clone();
        async move { commit(queue.take()).await }
    });
    tokio::task::yield_now().await;

    commit(queue.offer_all(vec![9, 3, 7])).await.unwrap();
    assert_eq!(ok(within(taker).await.unwrap()), 3);
    assert_eq!(ok(commit(queue.to_vec()).await), vec![7, 9]);
}
