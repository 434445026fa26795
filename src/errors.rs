// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`] is returned by graph construction, before anything runs.
//! - [`TransitionError`] signals a misuse of the task state machine.
//! - [`JobdagError`] is what a workflow run (or the loader) returns.

use thiserror::Error;

use crate::dag::TaskState;
use crate::engine::TaskName;

/// Structural problems found while building a [`crate::dag::WorkflowGraph`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskName, dependency: TaskName },

    #[error("task '{0}' is defined more than once")]
    DuplicateIdentity(TaskName),

    #[error("cycle detected in task graph involving task '{task}' ({})", cycle.join(" -> "))]
    CyclicDependency {
        /// The task that was found on the active DFS stack a second time.
        task: TaskName,
        /// The dependency path that closes the cycle, starting and ending at `task`.
        cycle: Vec<TaskName>,
    },
}

/// A rejected lifecycle transition.
///
/// `from == None` means the task is not known to the state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal transition for task '{task}': {from:?} -> {to:?}")]
pub struct TransitionError {
    pub task: TaskName,
    pub from: Option<TaskState>,
    pub to: TaskState,
}

#[derive(Error, Debug)]
pub enum JobdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid workflow graph: {0}")]
    Validation(#[from] GraphError),

    #[error("Internal scheduler error: {0}")]
    IllegalTransition(#[from] TransitionError),

    #[error("Task '{task}' failed: {detail}")]
    TaskExecution {
        /// The first task whose failure was observed by the scheduler.
        task: TaskName,
        detail: String,
        /// Every task that reached `Failed` before the run settled.
        failed_tasks: Vec<TaskName>,
    },

    #[error("Workflow run aborted by external request")]
    Aborted,

    #[error("Workflow run stalled; tasks can never become ready: {0:?}")]
    Stalled(Vec<TaskName>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;
