// src/engine/mod.rs

//! Scheduler loop for jobdag.
//!
//! A run moves through `Seeding -> Draining -> {Succeeded | Failed | Aborted}`:
//! - the pure state machine lives in [`core`] (no Tokio, no IO),
//! - the async shell that owns the executor, the event channel and the
//!   abort signal lives in [`runtime`].

use std::fmt;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// How a dispatched task ended, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed { detail: String },
}

/// Events flowing into the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A worker finished and the task is terminal in the state machine.
    TaskFinished { task: TaskName, outcome: TaskOutcome },
    /// External cancellation (e.g. Ctrl-C).
    AbortRequested,
}

/// Phase of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Seeding,
    Draining,
    Succeeded,
    /// A task failed; in-flight work is draining, nothing new is dispatched.
    Failed,
    /// Abort requested; in-flight jobs were asked to cancel.
    Aborted,
    /// Nothing in flight but tasks are still pending.
    Stalled,
}

impl RunPhase {
    /// No further dispatches will happen in this phase.
    pub fn is_halting(self) -> bool {
        !matches!(self, RunPhase::Seeding | RunPhase::Draining)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Seeding => "seeding",
            RunPhase::Draining => "draining",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::Aborted => "aborted",
            RunPhase::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// Options for a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound on tasks in `Running` at the same time. Must be >= 1.
    pub max_concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

pub mod abort;
pub mod core;
pub mod result;
pub mod runtime;

pub use abort::AbortHandle;
pub use self::core::{CoreCommand, CoreStep, SchedulerCore};
pub use result::{JobRecord, RunResult, TaskFailure};
pub use runtime::Scheduler;
