//! Transaction interpreter
//!
//! Evaluates a description against a journal. The interpreter is a single
//! loop over the node tree: combinator nodes push a frame and descend,
//! leaf nodes produce an outcome, and outcomes unwind the frame stack
//! until a frame that handles them is found. Nesting depth is bounded by
//! heap memory, not by the native stack.

use crate::journal::Journal;
use crate::stm::{
    AnyCause, AnyValue, Context, Environment, FailureFn, Node, Primitive, RetryFn, Step, SuccessFn,
};
use crate::tx::Signal;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Result of interpreting one attempt
pub(crate) enum Outcome {
    Succeed(AnyValue),
    Fail(AnyCause),
    Retry,
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeed(_) => f.write_str("Succeed"),
            Outcome::Fail(cause) => write!(f, "Fail({:?})", cause),
            Outcome::Retry => f.write_str("Retry"),
        }
    }
}

enum Frame {
    OnSuccess(Arc<SuccessFn>),
    OnFailure(Arc<FailureFn>),
    OnRetry(Arc<RetryFn>),
    RestoreEnvironment(Option<Environment>),
}

/// Interpret `root` once
pub(crate) fn run(root: &Node, journal: &mut Journal, base: &Context) -> Outcome {
    let mut context = base.clone();
    let mut stack: SmallVec<[Frame; 16]> = SmallVec::new();
    let mut step = Step::Run(Arc::clone(root));

    loop {
        let mut outcome = match step {
            Step::Succeed(value) => Outcome::Succeed(value),
            Step::Fail(cause) => Outcome::Fail(cause),
            Step::Run(node) => match &*node {
                Primitive::Succeed(f) => Outcome::Succeed(f()),
                Primitive::Fail(f) => Outcome::Fail(f()),
                Primitive::Retry => Outcome::Retry,
                Primitive::Effect(f) => match f(journal, &context) {
                    Ok(value) => Outcome::Succeed(value),
                    Err(Signal::Fail(cause)) => Outcome::Fail(cause),
                    Err(Signal::Retry) => Outcome::Retry,
                },
                Primitive::OnSuccess(inner, k) => {
                    stack.push(Frame::OnSuccess(Arc::clone(k)));
                    step = Step::Run(Arc::clone(inner));
                    continue;
                }
                Primitive::OnFailure(inner, k) => {
                    stack.push(Frame::OnFailure(Arc::clone(k)));
                    step = Step::Run(Arc::clone(inner));
                    continue;
                }
                Primitive::OnRetry(inner, k) => {
                    stack.push(Frame::OnRetry(Arc::clone(k)));
                    step = Step::Run(Arc::clone(inner));
                    continue;
                }
                Primitive::Provide(inner, environment) => {
                    let previous = context.environment.replace(Arc::clone(environment));
                    stack.push(Frame::RestoreEnvironment(previous));
                    step = Step::Run(Arc::clone(inner));
                    continue;
                }
            },
        };

        // Unwind to the nearest frame that handles the outcome
        step = loop {
            let frame = match stack.pop() {
                Some(frame) => frame,
                None => return outcome,
            };
            match (frame, outcome) {
                (Frame::RestoreEnvironment(previous), unchanged) => {
                    context.environment = previous;
                    outcome = unchanged;
                }
                (Frame::OnSuccess(k), Outcome::Succeed(value)) => break k(value),
                (Frame::OnFailure(k), Outcome::Fail(cause)) => break k(cause),
                (Frame::OnRetry(k), Outcome::Retry) => break k(),
                (_, unhandled) => outcome = unhandled,
            }
        };
    }
}
