//! Everything needed to write and commit transactions
//!
//! ```ignore
//! use strand::prelude::*;
//! ```

pub use crate::types::{
    Cause, Exit, FiberId, Stm, StmResult, TArray, THub, TMap, TPriorityQueue, TQueue,
    TReentrantLock, TRef, TSemaphore, Tx,
};
pub use strand_concurrency::{commit, commit_now};
