//! Retry wake-up registration
//!
//! A suspended transaction registers one todo on every TRef in its journal.
//! The first commit that changes any of them runs the todo, which wakes the
//! waiting fiber. Dropping the registration removes whatever todos are still
//! registered, so a fiber that is interrupted while parked leaves nothing
//! behind.

use crate::journal::Journal;
use crate::tref::TRefCell;
use std::sync::Arc;
use strand_core::TxnId;

/// Todos registered by one suspended transaction
#[derive(Debug)]
pub struct WaitRegistration {
    txn: TxnId,
    cells: Vec<Arc<TRefCell>>,
}

impl WaitRegistration {
    /// Register `wake` on every TRef in `journal`
    pub fn register<W>(txn: TxnId, journal: &Journal, wake: W) -> Self
    where
        W: Fn() + Clone + Send + 'static,
    {
        let cells: Vec<Arc<TRefCell>> = journal.entries().map(|e| Arc::clone(e.cell())).collect();
        for cell in &cells {
            let wake = wake.clone();
            cell.add_todo(txn, Box::new(move || wake()));
        }
        Self { txn, cells }
    }

    /// Transaction the todos belong to
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Number of TRefs watched
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// No TRef is watched; the transaction can never be woken
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        for cell in &self.cells {
            cell.remove_todo(self.txn);
        }
    }
}
