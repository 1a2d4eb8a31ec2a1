//! Imperative transaction handle
//!
//! [`Stm::transact`](crate::Stm::transact) runs a closure against a [`Tx`].
//! The closure reads and writes TRefs through the journal of the running
//! attempt and signals retry or failure by returning [`Signal`].

use crate::interpreter::{self, Outcome};
use crate::journal::Journal;
use crate::stm::{recover, recover_cause, Context, Stm};
use crate::tref::TRef;
use std::convert::Infallible;
use std::marker::PhantomData;
use strand_core::{Cause, Defect, FiberId};

/// Early exit from a transaction body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<E> {
    /// The transaction ended with a cause
    Fail(Cause<E>),
    /// The transaction cannot proceed until a TRef it read changes
    Retry,
}

impl<E> From<Cause<E>> for Signal<E> {
    fn from(cause: Cause<E>) -> Self {
        Signal::Fail(cause)
    }
}

impl<E> Signal<E> {
    /// Signal carrying a defect
    pub fn die(message: impl Into<String>) -> Self {
        Signal::Fail(Cause::die(message))
    }

    /// Check whether this is a retry
    pub fn is_retry(&self) -> bool {
        matches!(self, Signal::Retry)
    }
}

/// Result of a transaction body
pub type StmResult<A, E = Infallible> = Result<A, Signal<E>>;

/// Access to the running attempt
pub struct Tx<'a, E = Infallible> {
    journal: &'a mut Journal,
    context: &'a Context,
    _marker: PhantomData<fn() -> E>,
}

impl<'a, E> Tx<'a, E>
where
    E: Send + 'static,
{
    pub(crate) fn new(journal: &'a mut Journal, context: &'a Context) -> Self {
        Self {
            journal,
            context,
            _marker: PhantomData,
        }
    }

    /// Read a TRef
    pub fn get<A>(&mut self, tref: &TRef<A>) -> StmResult<A, E>
    where
        A: Clone + Send + Sync + 'static,
    {
        self.journal
            .read(tref)
            .ok_or_else(|| Signal::Fail(Cause::Die(Defect::type_mismatch::<A>())))
    }

    /// Write a TRef
    pub fn set<A>(&mut self, tref: &TRef<A>, value: A)
    where
        A: Clone + Send + Sync + 'static,
    {
        self.journal.write(tref, value);
    }

    /// Replace the value of a TRef with `f` applied to it
    pub fn update<A, F>(&mut self, tref: &TRef<A>, f: F) -> StmResult<(), E>
    where
        A: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> A,
    {
        let value = self.get(tref)?;
        self.set(tref, f(value));
        Ok(())
    }

    /// Compute a result and a replacement value from a TRef
    pub fn modify<A, B, F>(&mut self, tref: &TRef<A>, f: F) -> StmResult<B, E>
    where
        A: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> (B, A),
    {
        let (out, next) = f(self.get(tref)?);
        self.set(tref, next);
        Ok(out)
    }

    /// Retry unless `condition` holds
    pub fn check(&self, condition: bool) -> StmResult<(), E> {
        if condition {
            Ok(())
        } else {
            Err(Signal::Retry)
        }
    }

    /// Abort this attempt and wait for a change
    pub fn retry<T>(&self) -> StmResult<T, E> {
        Err(Signal::Retry)
    }

    /// Fail with a typed error
    pub fn fail<T>(&self, error: E) -> StmResult<T, E> {
        Err(Signal::Fail(Cause::Fail(error)))
    }

    /// Fail with a defect
    pub fn die<T>(&self, message: impl Into<String>) -> StmResult<T, E> {
        Err(Signal::die(message))
    }

    /// Interrupt the running fiber
    pub fn interrupt<T>(&self) -> StmResult<T, E> {
        Err(Signal::Fail(Cause::Interrupt(self.context.fiber)))
    }

    /// Fiber executing the transaction
    pub fn fiber_id(&self) -> FiberId {
        self.context.fiber
    }

    /// Environment value of type `R` installed with [`Stm::provide`]
    pub fn environment<R>(&self) -> Option<R>
    where
        R: Clone + 'static,
    {
        self.context
            .environment
            .as_ref()
            .and_then(|env| env.downcast_ref::<R>())
            .cloned()
    }

    /// Run a nested description within this attempt
    pub fn run<B>(&mut self, stm: &Stm<B, E>) -> StmResult<B, E>
    where
        B: Send + 'static,
    {
        match interpreter::run(stm.node(), self.journal, self.context) {
            Outcome::Succeed(value) => {
                recover::<B>(value).map_err(|defect| Signal::Fail(Cause::Die(defect)))
            }
            Outcome::Fail(cause) => Err(Signal::Fail(recover_cause::<E>(cause))),
            Outcome::Retry => Err(Signal::Retry),
        }
    }
}
