//! STM Property Test Suite
//!
//! End-to-end checks of the guarantees strand makes to concurrent fibers.
//! One module per property:
//!
//! - **atomicity**: a transaction's writes are published together or not at all
//! - **no_dirty_reads**: no transaction observes a half-applied commit
//! - **retry_resumption**: parked transactions resume, oldest first
//! - **or_else_isolation**: an abandoned branch leaves no trace
//! - **priority_ordering**: TPriorityQueue serves values in order
//! - **bulk_increment**: contended increments are never lost
//! - **semaphore_fairness**: acquire_n waits for n permits; oldest waiter first
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test stm_properties
//! ```

mod test_utils;

mod atomicity;
mod bulk_increment;
mod no_dirty_reads;
mod or_else_isolation;
mod priority_ordering;
mod retry_resumption;
mod semaphore_fairness;
