// src/engine/core.rs

//! Pure scheduler state machine.
//!
//! [`SchedulerCore`] consumes [`RunEvent`]s together with a snapshot of the
//! task states and returns the [`CoreCommand`]s the async shell should carry
//! out. It has no channels, no Tokio types and performs no IO, so every
//! phase transition can be unit tested in isolation.
//!
//! Bookkeeping owned here:
//! - `dispatched`: every task handed to the executor. Two completions handled
//!   back to back can both make the same dependent ready; the set keeps it
//!   from being dispatched twice.
//! - `in_flight`: dispatched tasks whose `TaskFinished` has not arrived yet.
//!   The run settles once this reaches zero.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::readiness::{newly_ready_after, ready_tasks};
use crate::dag::{StateSnapshot, TaskState, WorkflowGraph};
use crate::engine::result::TaskFailure;
use crate::engine::{RunEvent, RunPhase, TaskName, TaskOutcome};

/// Command produced by the core, executed by the async shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand these tasks to the bounded executor.
    Dispatch(Vec<TaskName>),
    /// Ask the job backend to cancel every in-flight job.
    CancelInFlight,
}

/// Decision returned by the core after one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the shell should keep waiting for events.
    pub keep_running: bool,
}

#[derive(Debug)]
pub struct SchedulerCore {
    graph: Arc<WorkflowGraph>,
    phase: RunPhase,
    dispatched: HashSet<TaskName>,
    in_flight: usize,
    failures: Vec<TaskFailure>,
    abort_requested: bool,
    settled: bool,
}

impl SchedulerCore {
    pub fn new(graph: Arc<WorkflowGraph>) -> Self {
        Self {
            graph,
            phase: RunPhase::Seeding,
            dispatched: HashSet::new(),
            in_flight: 0,
            failures: Vec::new(),
            abort_requested: false,
            settled: false,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// The run reached its final phase and nothing is in flight.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn was_dispatched(&self, task: &str) -> bool {
        self.dispatched.contains(task)
    }

    /// Failures in the order their `TaskFinished` events arrived.
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Initial readiness scan. Only meaningful in `Seeding`.
    pub fn seed(&mut self, snapshot: &StateSnapshot) -> CoreStep {
        if self.phase != RunPhase::Seeding {
            debug!(phase = %self.phase, "seed called outside of seeding; ignoring");
            return self.finish_step(Vec::new(), snapshot);
        }

        self.phase = RunPhase::Draining;

        let ready = ready_tasks(&self.graph, snapshot);
        info!(
            workflow = %self.graph.name(),
            tasks = self.graph.len(),
            initial = ready.len(),
            "seeding workflow run"
        );

        let mut commands = Vec::new();
        if let Some(dispatch) = self.claim(ready) {
            commands.push(dispatch);
        }
        self.finish_step(commands, snapshot)
    }

    /// Handle a single event and return the resulting commands.
    pub fn step(&mut self, event: RunEvent, snapshot: &StateSnapshot) -> CoreStep {
        if self.settled {
            debug!(?event, "run already settled; ignoring event");
            return self.finish_step(Vec::new(), snapshot);
        }

        let mut commands = Vec::new();

        match event {
            RunEvent::TaskFinished { task, outcome } => {
                self.release(&task);

                match outcome {
                    TaskOutcome::Success => {
                        debug!(task = %task, "task completed");
                        if !self.phase.is_halting() {
                            let ready = newly_ready_after(&self.graph, snapshot, &task);
                            if let Some(dispatch) = self.claim(ready) {
                                commands.push(dispatch);
                            }
                        }
                    }
                    TaskOutcome::Failed { detail } => {
                        warn!(task = %task, detail = %detail, "task failed");
                        self.failures.push(TaskFailure { task, detail });
                        if !self.phase.is_halting() {
                            info!(in_flight = self.in_flight, "run failed; draining in-flight tasks");
                            self.phase = RunPhase::Failed;
                        }
                    }
                }
            }
            RunEvent::AbortRequested => {
                if !self.abort_requested {
                    self.abort_requested = true;
                    info!(in_flight = self.in_flight, "abort requested; cancelling in-flight jobs");
                    commands.push(CoreCommand::CancelInFlight);
                    if !self.phase.is_halting() {
                        self.phase = RunPhase::Aborted;
                    }
                }
            }
        }

        self.finish_step(commands, snapshot)
    }

    /// The executor refused a dispatched task (the run was halted before a
    /// slot came free). The task stays `Pending` and is no longer in flight.
    pub fn dispatch_refused(&mut self, task: &str, snapshot: &StateSnapshot) -> CoreStep {
        debug!(task = %task, "dispatch refused by executor");
        self.release(task);
        self.finish_step(Vec::new(), snapshot)
    }

    /// Mark every not-yet-dispatched task in `ready` as dispatched.
    fn claim(&mut self, ready: impl IntoIterator<Item = TaskName>) -> Option<CoreCommand> {
        let fresh: Vec<TaskName> = ready
            .into_iter()
            .filter(|task| self.dispatched.insert(task.clone()))
            .collect();

        if fresh.is_empty() {
            return None;
        }

        self.in_flight += fresh.len();
        debug!(tasks = ?fresh, in_flight = self.in_flight, "dispatching ready tasks");
        Some(CoreCommand::Dispatch(fresh))
    }

    fn release(&mut self, task: &str) {
        if self.in_flight == 0 {
            warn!(task = %task, "completion for a task that was not in flight");
            return;
        }
        self.in_flight -= 1;
    }

    fn finish_step(&mut self, commands: Vec<CoreCommand>, snapshot: &StateSnapshot) -> CoreStep {
        if !self.settled && self.in_flight == 0 && self.phase != RunPhase::Seeding {
            self.settle(snapshot);
        }

        CoreStep {
            commands,
            keep_running: !self.settled,
        }
    }

    fn settle(&mut self, snapshot: &StateSnapshot) {
        if self.phase == RunPhase::Draining {
            self.phase = if snapshot.all_completed() {
                RunPhase::Succeeded
            } else {
                let pending = snapshot.tasks_in(TaskState::Pending);
                warn!(?pending, "nothing in flight but tasks are still pending");
                RunPhase::Stalled
            };
        }

        self.settled = true;
        info!(phase = %self.phase, failures = self.failures.len(), "workflow run settled");
    }
}
