//! Atomicity: all of a transaction's writes become visible together, and a
//! transaction that fails publishes none of them

use crate::test_utils::{init_tracing, ok, run};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strand::{commit, fiber, Cause, Stm, TRef};

fn transfer(from: &TRef<i64>, to: &TRef<i64>, amount: i64) -> Stm<(), String> {
    let (from, to) = (from.clone(), to.clone());
    Stm::transact(move |tx| {
        let balance = tx.get(&from)?;
        if balance < amount {
            return tx.fail(format!("insufficient funds: {} < {}", balance, amount));
        }
        tx.set(&from, balance - amount);
        tx.update(&to, |n| n + amount)?;
        Ok(())
    })
}

/// Test: failed transfer leaves both accounts untouched
#[tokio::test]
async fn test_failed_transaction_publishes_nothing() {
    init_tracing();
    let a = TRef::new(10i64);
    let b = TRef::new(0i64);

    // Credit b, then fail: the credit must not survive
    let partial: Stm<(), String> = b
        .update(|n| n + 5)
        .lift_err()
        .zip_right(transfer(&a, &b, 100));
    let exit = commit(partial).await;
    assert_eq!(exit, Err(Cause::Fail("insufficient funds: 10 < 100".to_string())));

    assert_eq!(run(a.get()), 10);
    assert_eq!(run(b.get()), 0);
}

/// Test: concurrent transfers preserve the total balance
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_conserve_total() {
    init_tracing();
    let accounts: Vec<TRef<i64>> = (0..4).map(|_| TRef::new(1_000)).collect();

    let mut handles = Vec::new();
    for worker in 0..8u64 {
        let accounts = accounts.clone();
        handles.push(fiber::spawn(async move {
            let mut rng = StdRng::seed_from_u64(worker);
            for _ in 0..250 {
                let from = rng.gen_range(0..4);
                let to = (from + rng.gen_range(1..4)) % 4;
                let amount = rng.gen_range(1..=400);
                // insufficient funds is an expected outcome here
                let _ = commit(transfer(&accounts[from], &accounts[to], amount)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let sum = Stm::for_each(accounts.clone(), |account: TRef<i64>| account.get())
        .map(|balances| balances.iter().sum::<i64>());
    assert_eq!(ok(commit(sum).await), 4_000);
}

/// Test: a snapshot of every account always sums to the total
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_see_whole_transfers() {
    init_tracing();
    let a = TRef::new(500i64);
    let b = TRef::new(500i64);

    let mover = fiber::spawn({
        let (a, b) = (a.clone(), b.clone());
        async move {
            for i in 0..500i64 {
                let (from, to) = if i % 2 == 0 { (&a, &b) } else { (&b, &a) };
                let _ = commit(transfer(from, to, i % 50)).await;
            }
        }
    });

    let total = a.get().zip_with(b.get(), |x, y| x + y);
    while !mover.is_finished() {
        assert_eq!(ok(commit(total.clone()).await), 1_000);
        tokio::task::yield_now().await;
    }
    mover.await.unwrap();
    assert_eq!(ok(commit(total).await), 1_000);
}
