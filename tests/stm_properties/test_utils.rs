//! Shared helpers for the property suite

use std::future::Future;
use std::sync::Once;
use std::time::Duration;
use strand::{commit_now, Exit, Stm};

static TRACING: Once = Once::new();

/// Route warnings through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();
    });
}

/// Commit a transaction that must not wait
pub fn run<A: Send + 'static>(stm: Stm<A>) -> A {
    match commit_now(&stm) {
        Some(Ok(value)) => value,
        Some(Err(cause)) => panic!("transaction failed: {}", cause),
        None => panic!("transaction retried"),
    }
}

/// Await `future`, failing the test if it takes longer than five seconds
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(5), future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out"),
    }
}

/// Yield until `condition` holds, failing the test after five seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    within(async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
}

/// Unwrap a committed exit
pub fn ok<A, E: std::fmt::Debug>(exit: Exit<A, E>) -> A {
    match exit {
        Ok(value) => value,
        Err(cause) => panic!("transaction failed: {:?}", cause),
    }
}
