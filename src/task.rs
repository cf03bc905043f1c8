//! Sequential task execution engine.
//!
//! A [`Task`] is an ordered list of named steps run against a mutable
//! context. Steps execute strictly in declaration order and may suspend by
//! awaiting; a step boundary is the only suspension point. Instead of relying
//! on unwinding, every step reports a tagged [`StepOutcome`], and the runner
//! reduces over it:
//!
//! - `Continue` proceeds to the next step.
//! - `EarlyReturn(v)` resolves the whole task with `v`, skipping the
//!   remaining steps.
//! - An `Err` is interpreted by the task's [`FailurePolicy`]: a soft-failure
//!   task resolves to the `NotValid` sentinel (the error never crosses the
//!   task boundary), a fatal task propagates it to whoever constructed it.

use futures_util::future::BoxFuture;

use crate::error::AppResult;

/// What a single step decided.
pub enum StepOutcome<R> {
    /// Proceed to the next step.
    Continue,
    /// Resolve the whole task with this value; remaining steps do not run.
    EarlyReturn(R),
}

/// How a finished task resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskEnd<R> {
    /// Every step ran and returned `Continue`.
    Completed,
    /// A step early-returned with a value.
    Returned(R),
    /// A step failed under `FailurePolicy::Soft`.
    NotValid,
}

/// Failure discipline of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Step errors propagate to the caller.
    Fatal,
    /// Step errors resolve the task to `TaskEnd::NotValid`. Used where
    /// failure is an expected outcome the parent branches on.
    Soft,
}

type StepFn<C, R> =
    Box<dyn for<'c> FnMut(&'c mut C) -> BoxFuture<'c, AppResult<StepOutcome<R>>> + Send>;

struct Step<C, R> {
    name: &'static str,
    run: StepFn<C, R>,
}

/// An ordered sequence of named steps over a shared context. Owned by the
/// connection that spawned it; dropped when the sequence completes or the
/// connection goes away.
pub struct Task<C, R> {
    name: &'static str,
    policy: FailurePolicy,
    steps: Vec<Step<C, R>>,
}

impl<C, R> Task<C, R> {
    pub fn new(name: &'static str, policy: FailurePolicy) -> Self {
        Task {
            name,
            policy,
            steps: Vec::new(),
        }
    }

    /// Appends a named step. Steps run in the order they were appended.
    pub fn step<F>(mut self, name: &'static str, run: F) -> Self
    where
        F: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, AppResult<StepOutcome<R>>> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            run: Box::new(run),
        });
        self
    }

    /// Runs the steps to completion against `ctx`.
    pub async fn run(mut self, ctx: &mut C) -> AppResult<TaskEnd<R>> {
        for step in self.steps.iter_mut() {
            tracing::trace!(task = self.name, step = step.name, "running step");

            match (step.run)(ctx).await {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::EarlyReturn(value)) => {
                    tracing::debug!(task = self.name, step = step.name, "task early-returned");
                    return Ok(TaskEnd::Returned(value));
                }
                Err(err) => match self.policy {
                    FailurePolicy::Soft => {
                        tracing::debug!(
                            task = self.name,
                            step = step.name,
                            error = %err,
                            "soft task resolved not-valid"
                        );
                        err.log();
                        return Ok(TaskEnd::NotValid);
                    }
                    FailurePolicy::Fatal => {
                        tracing::debug!(
                            task = self.name,
                            step = step.name,
                            error = %err,
                            "task step failed"
                        );
                        return Err(err);
                    }
                },
            }
        }

        Ok(TaskEnd::Completed)
    }
}

// Step-body shorthands, so pipeline code reads as a sequence of decisions.
pub fn early<R>(value: R) -> AppResult<StepOutcome<R>> {
    Ok(StepOutcome::EarlyReturn(value))
}

pub fn proceed<R>() -> AppResult<StepOutcome<R>> {
    Ok(StepOutcome::Continue)
}
