// src/dag/state.rs

//! Per-run task lifecycle: `Pending -> Running -> {Completed | Failed}`.
//!
//! [`TaskStateMachine`] is the single source of truth for task state during a
//! run. All reads and writes go through one mutex, and the result map lives
//! under the same lock so that a task's state and its result are always
//! observed together.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::engine::result::{JobRecord, RunResult, TaskFailure};
use crate::engine::TaskName;
use crate::errors::TransitionError;
use crate::exec::JobHandle;

/// Lifecycle state of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not dispatched yet (possibly waiting on dependencies).
    Pending,
    /// A worker owns the task and is talking to the job backend.
    Running,
    /// The backend reported success.
    Completed,
    /// The backend reported failure (or the job could not be submitted).
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// The only legal edges of the lifecycle.
    fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

/// Consistent point-in-time copy of every task's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    states: HashMap<TaskName, TaskState>,
}

impl StateSnapshot {
    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.states.get(task).copied()
    }

    pub fn is(&self, task: &str, state: TaskState) -> bool {
        self.state_of(task) == Some(state)
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn all_completed(&self) -> bool {
        self.states.values().all(|s| *s == TaskState::Completed)
    }

    /// Names of tasks in `state`, sorted.
    pub fn tasks_in(&self, state: TaskState) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TaskState)> {
        self.states.iter().map(|(name, state)| (name.as_str(), *state))
    }
}

impl FromIterator<(TaskName, TaskState)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (TaskName, TaskState)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    states: HashMap<TaskName, TaskState>,
    results: BTreeMap<TaskName, JobRecord>,
    failures: Vec<TaskFailure>,
    /// Backend handles of submitted jobs that have not reached a terminal state.
    handles: HashMap<TaskName, JobHandle>,
    abort_requested: bool,
}

impl Ledger {
    fn transition(&mut self, task: &str, next: TaskState) -> Result<TaskState, TransitionError> {
        let current = self.states.get_mut(task).ok_or_else(|| TransitionError {
            task: task.to_string(),
            from: None,
            to: next,
        })?;

        if !current.can_transition_to(next) {
            return Err(TransitionError {
                task: task.to_string(),
                from: Some(*current),
                to: next,
            });
        }

        let previous = *current;
        *current = next;
        debug!(task = %task, from = ?previous, to = ?next, "task state transition");
        Ok(previous)
    }
}

/// Thread-safe task lifecycle tracker for one run.
#[derive(Debug)]
pub struct TaskStateMachine {
    inner: Mutex<Ledger>,
}

impl TaskStateMachine {
    /// Create a state machine with every task `Pending`.
    pub fn new<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let states = tasks
            .into_iter()
            .map(|name| (name.into(), TaskState::Pending))
            .collect();

        Self {
            inner: Mutex::new(Ledger {
                states,
                ..Ledger::default()
            }),
        }
    }

    // Ledger updates never span an await or a user callback, so a poisoned
    // lock still guards a consistent ledger.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `task` to `next`, returning the previous state.
    pub fn transition(&self, task: &str, next: TaskState) -> Result<TaskState, TransitionError> {
        self.lock().transition(task, next)
    }

    /// `Running -> Completed` and record the result, atomically.
    pub fn complete(&self, task: &str, record: JobRecord) -> Result<(), TransitionError> {
        let mut ledger = self.lock();
        ledger.transition(task, TaskState::Completed)?;
        ledger.handles.remove(task);
        ledger.results.insert(task.to_string(), record);
        Ok(())
    }

    /// `Running -> Failed` and record the failure detail, atomically.
    pub fn fail(&self, task: &str, detail: impl Into<String>) -> Result<(), TransitionError> {
        let mut ledger = self.lock();
        ledger.transition(task, TaskState::Failed)?;
        ledger.handles.remove(task);
        ledger.failures.push(TaskFailure {
            task: task.to_string(),
            detail: detail.into(),
        });
        Ok(())
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.lock().states.get(task).copied()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            states: self.lock().states.clone(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .states
            .values()
            .filter(|s| **s == TaskState::Running)
            .count()
    }

    /// Whether new work must not be started: a task failed or an abort was
    /// requested.
    pub fn is_halted(&self) -> bool {
        let ledger = self.lock();
        ledger.abort_requested || !ledger.failures.is_empty()
    }

    /// Remember the backend handle of a running task so it can be cancelled.
    ///
    /// Returns `true` if an abort was already requested, in which case the
    /// caller is responsible for cancelling the job it just submitted.
    pub fn record_handle(&self, task: &str, handle: JobHandle) -> bool {
        let mut ledger = self.lock();
        match ledger.states.get(task) {
            Some(TaskState::Running) => {
                ledger.handles.insert(task.to_string(), handle);
            }
            other => {
                error!(task = %task, state = ?other, "job handle recorded for a task that is not running");
            }
        }
        ledger.abort_requested
    }

    /// Flag the run as aborting and return the handles of every job that is
    /// currently in flight. Jobs submitted after this call see the flag via
    /// [`TaskStateMachine::record_handle`].
    pub fn request_abort(&self) -> Vec<JobHandle> {
        let mut ledger = self.lock();
        ledger.abort_requested = true;
        ledger.handles.values().cloned().collect()
    }

    pub fn abort_requested(&self) -> bool {
        self.lock().abort_requested
    }

    /// Failures in the order they were recorded.
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.lock().failures.clone()
    }

    /// Results of every completed task so far.
    pub fn results(&self) -> RunResult {
        RunResult::from(self.lock().results.clone())
    }
}
