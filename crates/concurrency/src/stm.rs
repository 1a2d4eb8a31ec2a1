//! Transaction descriptions
//!
//! An [`Stm`] is an immutable, reusable description of a transaction. It is
//! a tree of [`Primitive`] nodes, evaluated by the interpreter once per
//! attempt. Values flowing between nodes are type-erased; the typed
//! combinators on `Stm` erase on the way in and recover on the way out, and
//! a recovery that fails becomes a defect rather than a panic.

use crate::journal::{Checkpoint, Journal};
use crate::tx::{Signal, StmResult, Tx};
use parking_lot::Mutex;
use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use strand_core::{Cause, Defect, Exit, FiberId};

pub(crate) type AnyValue = Box<dyn Any + Send>;
pub(crate) type AnyCause = Cause<AnyValue>;
pub(crate) type Environment = Arc<dyn Any + Send + Sync>;
pub(crate) type Node = Arc<Primitive>;

pub(crate) type EffectFn =
    dyn Fn(&mut Journal, &Context) -> Result<AnyValue, Signal<AnyValue>> + Send + Sync;
pub(crate) type SuccessFn = dyn Fn(AnyValue) -> Step + Send + Sync;
pub(crate) type FailureFn = dyn Fn(AnyCause) -> Step + Send + Sync;
pub(crate) type RetryFn = dyn Fn() -> Step + Send + Sync;

/// The closed set of transaction nodes
pub(crate) enum Primitive {
    /// Produce a value
    Succeed(Arc<dyn Fn() -> AnyValue + Send + Sync>),
    /// Produce a cause
    Fail(Arc<dyn Fn() -> AnyCause + Send + Sync>),
    /// Abort the attempt and wait for a change
    Retry,
    /// Run a step against the journal
    Effect(Arc<EffectFn>),
    /// Continue with a success
    OnSuccess(Node, Arc<SuccessFn>),
    /// Handle a failure
    OnFailure(Node, Arc<FailureFn>),
    /// Handle a retry
    OnRetry(Node, Arc<RetryFn>),
    /// Run a node with an environment value
    Provide(Node, Environment),
}

impl Primitive {
    fn inner_mut(&mut self) -> Option<&mut Node> {
        match self {
            Primitive::OnSuccess(inner, _)
            | Primitive::OnFailure(inner, _)
            | Primitive::OnRetry(inner, _)
            | Primitive::Provide(inner, _) => Some(inner),
            Primitive::Succeed(_) | Primitive::Fail(_) | Primitive::Retry | Primitive::Effect(_) => {
                None
            }
        }
    }

    /// Move out the wrapped node if this is its only owner and it wraps
    /// another node in turn
    fn detach_inner(&mut self) -> Option<Primitive> {
        let inner = Arc::get_mut(self.inner_mut()?)?;
        inner.inner_mut()?;
        Some(std::mem::replace(inner, Primitive::Retry))
    }
}

// Long descriptions nest through the wrapped node. Unlink them one level at
// a time so dropping a deep chain does not recurse.
impl Drop for Primitive {
    fn drop(&mut self) {
        let mut next = self.detach_inner();
        while let Some(mut primitive) = next {
            next = primitive.detach_inner();
        }
    }
}

/// What a continuation asks the interpreter to do next
pub(crate) enum Step {
    Succeed(AnyValue),
    Fail(AnyCause),
    Run(Node),
}

/// Per-attempt data visible to effects
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) fiber: FiberId,
    pub(crate) environment: Option<Environment>,
}

impl Context {
    pub(crate) fn new(fiber: FiberId) -> Self {
        Self {
            fiber,
            environment: None,
        }
    }
}

pub(crate) fn erase<A: Send + 'static>(value: A) -> AnyValue {
    Box::new(value)
}

pub(crate) fn recover<A: 'static>(value: AnyValue) -> Result<A, Defect> {
    value
        .downcast::<A>()
        .map(|boxed| *boxed)
        .map_err(|_| Defect::type_mismatch::<A>())
}

pub(crate) fn erase_cause<E: Send + 'static>(cause: Cause<E>) -> AnyCause {
    cause.map(erase)
}

pub(crate) fn recover_cause<E: 'static>(cause: AnyCause) -> Cause<E> {
    cause.try_map(recover::<E>)
}

/// Recover a type-erased exit into its typed form
pub(crate) fn recover_exit<A: 'static, E: 'static>(exit: Exit<AnyValue, AnyValue>) -> Exit<A, E> {
    match exit {
        Ok(value) => recover::<A>(value).map_err(Cause::Die),
        Err(cause) => Err(recover_cause::<E>(cause)),
    }
}

/// Pass a defect or an interruption through unchanged
fn propagate(cause: AnyCause) -> Step {
    Step::Fail(cause)
}

fn die_step(defect: Defect) -> Step {
    Step::Fail(Cause::Die(defect))
}

fn retry_node() -> Node {
    Arc::new(Primitive::Retry)
}

/// A transaction producing `A` or failing with `E`
///
/// Descriptions are cheap to clone and can be committed any number of
/// times. Nothing happens until the description is committed.
pub struct Stm<A, E = Infallible> {
    node: Node,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Stm<A, E> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Stm<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.node {
            Primitive::Succeed(_) => "Succeed",
            Primitive::Fail(_) => "Fail",
            Primitive::Retry => "Retry",
            Primitive::Effect(_) => "Effect",
            Primitive::OnSuccess(..) => "OnSuccess",
            Primitive::OnFailure(..) => "OnFailure",
            Primitive::OnRetry(..) => "OnRetry",
            Primitive::Provide(..) => "Provide",
        };
        f.debug_tuple("Stm").field(&kind).finish()
    }
}

impl<A> Stm<A, Infallible>
where
    A: Send + 'static,
{
    /// Give an infallible description any error type
    pub fn lift_err<E: Send + 'static>(self) -> Stm<A, E> {
        Stm::from_node(self.node)
    }
}

impl<A, E> Stm<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    fn effect<F>(f: F) -> Self
    where
        F: Fn(&mut Journal, &Context) -> Result<AnyValue, Signal<AnyValue>> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Primitive::Effect(Arc::new(f))))
    }

    fn and_then_step<B, E2, K>(self, k: K) -> Stm<B, E2>
    where
        B: Send + 'static,
        E2: Send + 'static,
        K: Fn(A) -> Step + Send + Sync + 'static,
    {
        Stm::from_node(Arc::new(Primitive::OnSuccess(
            self.node,
            Arc::new(move |value: AnyValue| match recover::<A>(value) {
                Ok(a) => k(a),
                Err(defect) => die_step(defect),
            }),
        )))
    }

    // ---- constructors ----

    /// Succeed with `value`
    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_node(Arc::new(Primitive::Succeed(Arc::new(move || {
            erase(value.clone())
        }))))
    }

    /// Succeed with the result of `f`, evaluated on every attempt
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Primitive::Succeed(Arc::new(move || erase(f())))))
    }

    /// Fail with a typed error
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::fail_cause(Cause::Fail(error))
    }

    /// Fail with `cause`
    pub fn fail_cause(cause: Cause<E>) -> Self
    where
        E: Clone + Sync,
    {
        Self::from_node(Arc::new(Primitive::Fail(Arc::new(move || {
            erase_cause(cause.clone())
        }))))
    }

    /// Fail with a defect
    pub fn die(message: impl Into<String>) -> Self {
        let defect = Defect::new(message);
        Self::from_node(Arc::new(Primitive::Fail(Arc::new(move || {
            Cause::Die(defect.clone())
        }))))
    }

    /// Interrupt the fiber committing the transaction
    pub fn interrupt() -> Self {
        Self::effect(|_, context| Err(Signal::Fail(Cause::Interrupt(context.fiber))))
    }

    /// Abort the attempt and wait until a TRef it read changes
    pub fn retry() -> Self {
        Self::from_node(retry_node())
    }

    /// Build the description lazily, on every attempt
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Stm<A, E> + Send + Sync + 'static,
    {
        Stm::<(), E>::sync(|| ()).and_then_step(move |_| Step::Run(f().node))
    }

    /// Run `f` against the journal of the attempt
    ///
    /// This is the main way to write transactions by hand:
    ///
    /// ```ignore
    /// let withdraw = Stm::transact(move |tx| {
    ///     let balance = tx.get(&account)?;
    ///     tx.check(balance >= amount)?;
    ///     tx.set(&account, balance - amount);
    ///     Ok(balance - amount)
    /// });
    /// ```
    pub fn transact<F>(f: F) -> Self
    where
        F: Fn(&mut Tx<'_, E>) -> StmResult<A, E> + Send + Sync + 'static,
    {
        Self::effect(move |journal, context| {
            let mut tx = Tx::new(journal, context);
            match f(&mut tx) {
                Ok(a) => Ok(erase(a)),
                Err(Signal::Retry) => Err(Signal::Retry),
                Err(Signal::Fail(cause)) => Err(Signal::Fail(erase_cause(cause))),
            }
        })
    }

    /// Collect the results of `stms`, in order
    pub fn collect_all<I>(stms: I) -> Stm<Vec<A>, E>
    where
        I: IntoIterator<Item = Stm<A, E>>,
    {
        let stms: Vec<Stm<A, E>> = stms.into_iter().collect();
        Stm::transact(move |tx| stms.iter().map(|stm| tx.run(stm)).collect())
    }

    /// Apply `f` to each element and collect the results, in order
    pub fn for_each<T, I, F>(items: I, f: F) -> Stm<Vec<A>, E>
    where
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Stm<A, E>,
    {
        Self::collect_all(items.into_iter().map(f))
    }

    /// Run the alternatives in order until one neither fails nor retries
    ///
    /// With no alternatives the result retries.
    pub fn first_success_of<I>(stms: I) -> Self
    where
        I: IntoIterator<Item = Stm<A, E>>,
    {
        let mut stms: Vec<Stm<A, E>> = stms.into_iter().collect();
        let last = match stms.pop() {
            Some(last) => last,
            None => return Self::retry(),
        };
        stms.into_iter()
            .rev()
            .fold(last, |acc, stm| stm.or_else(acc))
    }

    // ---- sequencing ----

    /// Transform the result
    pub fn map<B, F>(self, f: F) -> Stm<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.and_then_step(move |a| Step::Succeed(erase(f(a))))
    }

    /// Replace the result with `value`
    pub fn as_value<B>(self, value: B) -> Stm<B, E>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.map(move |_| value.clone())
    }

    /// Discard the result
    pub fn unit(self) -> Stm<(), E> {
        self.map(|_| ())
    }

    /// Continue with the transaction built from the result
    pub fn flat_map<B, F>(self, f: F) -> Stm<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> Stm<B, E> + Send + Sync + 'static,
    {
        self.and_then_step(move |a| Step::Run(f(a).node))
    }

    /// Run `self` then `that`, combining the results
    pub fn zip_with<B, C, F>(self, that: Stm<B, E>, f: F) -> Stm<C, E>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let that = that.node;
        let f = Arc::new(f);
        self.and_then_step(move |a| {
            let f = Arc::clone(&f);
            // each continuation node is built for one attempt and resumed once
            let first = Mutex::new(Some(a));
            let combine = Stm::<B, E>::from_node(Arc::clone(&that)).and_then_step::<C, E, _>(
                move |b| match first.lock().take() {
                    Some(a) => Step::Succeed(erase(f(a, b))),
                    None => die_step(Defect::new("zip continuation resumed twice")),
                },
            );
            Step::Run(combine.node)
        })
    }

    /// Run `self` then `that`, yielding both results
    pub fn zip<B>(self, that: Stm<B, E>) -> Stm<(A, B), E>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Run `self` then `that`, yielding the result of `that`
    pub fn zip_right<B>(self, that: Stm<B, E>) -> Stm<B, E>
    where
        B: Send + 'static,
    {
        let that = that.node;
        self.and_then_step(move |_| Step::Run(Arc::clone(&that)))
    }

    /// Run `self` then `that`, yielding the result of `self`
    pub fn zip_left<B>(self, that: Stm<B, E>) -> Stm<A, E>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, _| a)
    }

    /// Retry until `predicate` holds for the result
    pub fn retry_until<P>(self, predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.and_then_step(move |a| {
            if predicate(&a) {
                Step::Succeed(erase(a))
            } else {
                Step::Run(retry_node())
            }
        })
    }

    /// Retry while `predicate` holds for the result
    pub fn retry_while<P>(self, predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.retry_until(move |a| !predicate(a))
    }

    // ---- error handling ----

    /// Transform the typed failure
    pub fn map_err<E2, F>(self, f: F) -> Stm<A, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Stm::from_node(Arc::new(Primitive::OnFailure(
            self.node,
            Arc::new(move |cause: AnyCause| match cause {
                Cause::Fail(value) => match recover::<E>(value) {
                    Ok(e) => Step::Fail(Cause::Fail(erase(f(e)))),
                    Err(defect) => die_step(defect),
                },
                other => propagate(other),
            }),
        )))
    }

    /// Recover from a typed failure
    ///
    /// Defects and interruptions are not caught.
    pub fn catch_all<E2, F>(self, f: F) -> Stm<A, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> Stm<A, E2> + Send + Sync + 'static,
    {
        Stm::from_node(Arc::new(Primitive::OnFailure(
            self.node,
            Arc::new(move |cause: AnyCause| match cause {
                Cause::Fail(value) => match recover::<E>(value) {
                    Ok(e) => Step::Run(f(e).node),
                    Err(defect) => die_step(defect),
                },
                other => propagate(other),
            }),
        )))
    }

    /// Recover from any cause, including defects
    pub fn catch_all_cause<E2, F>(self, f: F) -> Stm<A, E2>
    where
        E2: Send + 'static,
        F: Fn(Cause<E>) -> Stm<A, E2> + Send + Sync + 'static,
    {
        Stm::from_node(Arc::new(Primitive::OnFailure(
            self.node,
            Arc::new(move |cause: AnyCause| Step::Run(f(recover_cause::<E>(cause)).node)),
        )))
    }

    fn attempt_result<E2: Send + 'static>(self) -> Stm<Result<A, E>, E2> {
        let attempted = Arc::new(Primitive::OnSuccess(
            self.node,
            Arc::new(|value: AnyValue| match recover::<A>(value) {
                Ok(a) => Step::Succeed(erase(Ok::<A, E>(a))),
                Err(defect) => die_step(defect),
            }),
        ));
        Stm::from_node(Arc::new(Primitive::OnFailure(
            attempted,
            Arc::new(|cause: AnyCause| match cause {
                Cause::Fail(value) => match recover::<E>(value) {
                    Ok(e) => Step::Succeed(erase(Err::<A, E>(e))),
                    Err(defect) => die_step(defect),
                },
                other => propagate(other),
            }),
        )))
    }

    /// Surface the typed failure as a value
    pub fn either(self) -> Stm<Result<A, E>> {
        self.attempt_result()
    }

    /// Surface the typed failure as `None`
    pub fn option(self) -> Stm<Option<A>> {
        self.attempt_result().map(Result::ok)
    }

    /// Handle both outcomes with pure functions
    pub fn fold<B, F, G>(self, on_failure: F, on_success: G) -> Stm<B>
    where
        B: Send + 'static,
        F: Fn(E) -> B + Send + Sync + 'static,
        G: Fn(A) -> B + Send + Sync + 'static,
    {
        self.attempt_result().map(move |result| match result {
            Ok(a) => on_success(a),
            Err(e) => on_failure(e),
        })
    }

    /// Handle both outcomes with transactions
    pub fn fold_stm<B, E2, F, G>(self, on_failure: F, on_success: G) -> Stm<B, E2>
    where
        B: Send + 'static,
        E2: Send + 'static,
        F: Fn(E) -> Stm<B, E2> + Send + Sync + 'static,
        G: Fn(A) -> Stm<B, E2> + Send + Sync + 'static,
    {
        self.attempt_result::<E2>()
            .flat_map(move |result| match result {
                Ok(a) => on_success(a),
                Err(e) => on_failure(e),
            })
    }

    // ---- alternatives ----

    fn checkpoint() -> Stm<Checkpoint, E> {
        Stm::effect(|journal, _| Ok(erase(journal.checkpoint())))
    }

    fn reset_to(checkpoint: Checkpoint) -> Stm<(), E> {
        Stm::effect(move |journal, _| {
            journal.reset(&checkpoint);
            Ok(erase(()))
        })
    }

    /// Wrap `self` so that a retry, and a typed failure when `on_failure`
    /// is set, yield `None` instead
    fn tagged(self, on_failure: bool) -> Stm<Option<A>, E> {
        let some = Arc::new(Primitive::OnSuccess(
            self.node,
            Arc::new(|value: AnyValue| match recover::<A>(value) {
                Ok(a) => Step::Succeed(erase(Some(a))),
                Err(defect) => die_step(defect),
            }),
        ));
        let caught = if on_failure {
            Arc::new(Primitive::OnFailure(
                some,
                Arc::new(|cause: AnyCause| match cause {
                    Cause::Fail(_) => Step::Succeed(erase(None::<A>)),
                    other => propagate(other),
                }),
            ))
        } else {
            some
        };
        Stm::from_node(Arc::new(Primitive::OnRetry(
            caught,
            Arc::new(|| Step::Succeed(erase(None::<A>))),
        )))
    }

    fn alternative<E2>(self, that: Stm<A, E2>, on_failure: bool) -> Stm<A, E2>
    where
        E2: Send + 'static,
    {
        let tagged: Stm<Option<A>, E2> = Stm::from_node(self.tagged(on_failure).node);
        Stm::<Checkpoint, E2>::checkpoint().flat_map(move |checkpoint| {
            let fallback = Stm::<(), E2>::reset_to(checkpoint).zip_right(that.clone());
            tagged.clone().and_then_step(move |outcome| match outcome {
                Some(a) => Step::Succeed(erase(a)),
                None => Step::Run(Arc::clone(&fallback.node)),
            })
        })
    }

    /// Run `that` if `self` retries or fails with a typed error
    ///
    /// Writes made by `self` are undone before `that` runs. The TRefs `self`
    /// read remain in the journal, so a transaction where both sides retry
    /// wakes on a change to anything either side read.
    pub fn or_else<E2>(self, that: Stm<A, E2>) -> Stm<A, E2>
    where
        E2: Send + 'static,
    {
        if matches!(*self.node, Primitive::Retry) {
            return that;
        }
        self.alternative(that, true)
    }

    /// Like [`Stm::or_else`], but report which side produced the value:
    /// `Ok` for `self`, `Err` for `that`
    pub fn or_else_either<B, E2>(self, that: Stm<B, E2>) -> Stm<Result<A, B>, E2>
    where
        B: Send + 'static,
        E2: Send + 'static,
    {
        self.map(Ok::<A, B>).or_else(that.map(Err::<A, B>))
    }

    /// Run `that` if `self` retries. Failures of `self` propagate.
    pub fn or_try(self, that: Stm<A, E>) -> Self {
        if matches!(*self.node, Primitive::Retry) {
            return that;
        }
        self.alternative(that, false)
    }

    /// `None` if `self` retries
    pub fn optional(self) -> Stm<Option<A>, E> {
        self.tagged(false)
    }

    // ---- environment ----

    /// Run with `environment` available through [`Stm::environment`]
    pub fn provide<R>(self, environment: R) -> Self
    where
        R: Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Primitive::Provide(self.node, Arc::new(environment))))
    }

    /// Id of the fiber committing the transaction
    pub fn fiber_id() -> Stm<FiberId, E> {
        Stm::effect(|_, context| Ok(erase(context.fiber)))
    }

    // ---- commit ----

    /// Commit the transaction on the current fiber
    pub async fn commit(self) -> Exit<A, E> {
        crate::driver::commit(self).await
    }
}

impl<R, E> Stm<R, E>
where
    R: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Read the environment value of type `R`
    ///
    /// Dies if no value of that type was provided.
    pub fn environment() -> Self {
        Stm::effect(|_, context| {
            context
                .environment
                .as_ref()
                .and_then(|env| env.downcast_ref::<R>())
                .map(|r| erase(r.clone()))
                .ok_or_else(|| {
                    Signal::Fail(Cause::die(format!(
                        "environment not provided: {}",
                        std::any::type_name::<R>()
                    )))
                })
        })
    }
}

impl<E> Stm<(), E>
where
    E: Send + 'static,
{
    /// Retry unless `condition` holds
    pub fn check(condition: bool) -> Self {
        if condition {
            Self::sync(|| ())
        } else {
            Self::retry()
        }
    }
}

/// Interpret `stm` once against a fresh journal
///
/// Exposed for tests that inspect the raw outcome of a single attempt.
#[cfg(test)]
pub(crate) fn run_once<A, E>(stm: &Stm<A, E>) -> (crate::interpreter::Outcome, Journal)
where
    A: Send + 'static,
    E: Send + 'static,
{
    let mut journal = Journal::new();
    let context = Context::new(crate::fiber::current());
    let outcome = crate::interpreter::run(stm.node(), &mut journal, &context);
    (outcome, journal)
}
