//! strand: software transactional memory for cooperative fibers
//!
//! A transaction is an immutable [`Stm`] description. Committing it runs the
//! description against a private journal, validates every read against the
//! committed versions, and installs all writes at once. A transaction that
//! calls [`Stm::retry`] parks its fiber until another commit changes a
//! [`TRef`] it read.
//!
//! # Example
//!
//! ```ignore
//! use strand::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = commit(TQueue::<u32>::bounded(16)).await.unwrap();
//!     let total = TRef::new(0u32);
//!
//!     let consumer = strand::fiber::spawn({
//!         let (queue, total) = (queue.clone(), total.clone());
//!         async move {
//!             let drain = queue.take().flat_map(move |n| total.update(move |t| t + n));
//!             for _ in 0..3 {
//!                 commit(drain.clone()).await.unwrap();
//!             }
//!         }
//!     });
//!
//!     commit(queue.offer_all(vec![1, 2, 3])).await.unwrap();
//!     consumer.await.unwrap();
//!     assert_eq!(commit(total.get()).await, Ok(6));
//! }
//! ```
//!
//! # Crates
//!
//! - `strand-core`: identifiers, outcomes, errors, configuration
//! - `strand-concurrency`: TRef, journal, interpreter, commit protocol, drivers
//! - `strand-primitives`: transactional data structures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod prelude;
pub mod types;

pub use types::*;

pub use strand_concurrency::{attempt, commit, commit_now, commit_now_as, fiber, validate_journal};
