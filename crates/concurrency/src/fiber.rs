//! Fiber identity
//!
//! A fiber is a tokio task. [`spawn`] and [`scope`] install an explicit id in
//! a task-local. Any other task (a plain `tokio::spawn`, a `#[tokio::test]`
//! body) is identified by its runtime task id, so two tasks sharing a worker
//! thread are still distinct fibers. Only callers outside any task, such as
//! synchronous code or a `block_on` body, fall back to an id bound to the
//! current OS thread.
//!
//! Identity matters to transactions that record ownership, such as the
//! reentrant lock: acquire and release must run under the same fiber id.

use std::cell::Cell;
use std::future::Future;
use strand_core::FiberId;
use tokio::task::{self, JoinHandle};

tokio::task_local! {
    static CURRENT_FIBER: FiberId;
}

thread_local! {
    static THREAD_FIBER: FiberId = FiberId::next();
    /// Last task resolved on this thread
    static LAST_TASK: Cell<Option<(task::Id, FiberId)>> = const { Cell::new(None) };
}

/// The id of the fiber executing the caller
pub fn current() -> FiberId {
    if let Ok(id) = CURRENT_FIBER.try_with(|id| *id) {
        return id;
    }
    match task::try_id() {
        Some(task) => task_fiber(task),
        None => THREAD_FIBER.with(|id| *id),
    }
}

fn task_fiber(task: task::Id) -> FiberId {
    LAST_TASK.with(|last| match last.get() {
        Some((seen, fiber)) if seen == task => fiber,
        _ => {
            // task ids expose their number only through Display
            let fiber = match task.to_string().parse::<u64>() {
                Ok(n) => FiberId::for_task(n),
                Err(_) => FiberId::next(),
            };
            last.set(Some((task, fiber)));
            fiber
        }
    })
}

/// Run `future` as the fiber `id`
pub async fn scope<F: Future>(id: FiberId, future: F) -> F::Output {
    CURRENT_FIBER.scope(id, future).await
}

/// Spawn `future` as a new fiber with a fresh id
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id = FiberId::next();
    tokio::spawn(CURRENT_FIBER.scope(id, future))
}
