//! Transactional data structures for strand
//!
//! Every structure here is a handle over one or more TRefs. Operations
//! return [`Stm`](strand_concurrency::Stm) descriptions, so they compose
//! with each other and with hand-written transactions:
//! - TArray: fixed-length array, one TRef per element
//! - TMap: hash map with chained buckets
//! - TPriorityQueue: values served in comparator order
//! - TQueue: bounded or unbounded FIFO queue
//! - TSemaphore: counting semaphore
//! - TReentrantLock: fiber-owned reentrant read/write lock
//! - THub: broadcast hub with per-subscriber cursors
//!
//! Blocking operations (taking from an empty queue, acquiring a held lock)
//! retry, which parks the committing fiber until a TRef they read changes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod strategy;
pub mod tarray;
pub mod thub;
pub mod tmap;
pub mod tpriority_queue;
pub mod tqueue;
pub mod treentrant_lock;
pub mod tsemaphore;

pub use strategy::Strategy;
pub use tarray::TArray;
pub use thub::{ScopedSubscription, Subscription, THub};
pub use tmap::TMap;
pub use tpriority_queue::TPriorityQueue;
pub use tqueue::TQueue;
pub use treentrant_lock::{LockGuard, TReentrantLock};
pub use tsemaphore::TSemaphore;
