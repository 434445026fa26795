// src/exec/pool.rs

//! Bounded concurrent executor.
//!
//! Each dispatched task runs on its own Tokio task ("worker"), but never more
//! than `max_concurrency` at once: a worker holds a semaphore permit from the
//! moment it marks its task `Running` until the task is terminal.
//!
//! A worker:
//! 1. marks the task `Running`,
//! 2. submits the payload to the job backend and waits for a terminal state,
//! 3. records `Completed` + result or `Failed` + detail in the state machine,
//! 4. releases its slot and reports a [`RunEvent::TaskFinished`].
//!
//! Workers never look at dependencies; deciding what may run is the
//! scheduler's job.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::dag::{TaskState, TaskStateMachine, WorkPayload};
use crate::engine::result::JobRecord;
use crate::engine::{AbortHandle, RunEvent, TaskName, TaskOutcome};
use crate::errors::{JobdagError, Result};
use crate::exec::backend::{BackendError, JobBackend};
use crate::exec::callbacks::JobCallback;
use crate::types::JobStatus;

/// Handle to a dispatched worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub task: TaskName,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker's Tokio task to exit.
    pub async fn join(self) -> std::result::Result<(), JoinError> {
        self.join.await
    }
}

/// Everything a worker needs, cloned into its Tokio task.
struct WorkerContext<B: JobBackend + ?Sized> {
    backend: Arc<B>,
    states: Arc<TaskStateMachine>,
    events: mpsc::Sender<RunEvent>,
    callbacks: Arc<[Arc<dyn JobCallback>]>,
}

impl<B: JobBackend + ?Sized> Clone for WorkerContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            states: Arc::clone(&self.states),
            events: self.events.clone(),
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

pub struct BoundedExecutor<B: JobBackend + ?Sized> {
    ctx: WorkerContext<B>,
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    abort: AbortHandle,
}

impl<B: JobBackend + ?Sized> BoundedExecutor<B> {
    pub fn new(
        backend: Arc<B>,
        states: Arc<TaskStateMachine>,
        max_concurrency: usize,
        events: mpsc::Sender<RunEvent>,
        abort: AbortHandle,
    ) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(JobdagError::ConfigError(
                "max_concurrency must be >= 1 (got 0)".to_string(),
            ));
        }

        Ok(Self {
            ctx: WorkerContext {
                backend,
                states,
                events,
                callbacks: Arc::from(Vec::new()),
            },
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            abort,
        })
    }

    pub fn with_callbacks(mut self, callbacks: Vec<Arc<dyn JobCallback>>) -> Self {
        self.ctx.callbacks = Arc::from(callbacks);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Dispatch `task`, waiting for a free slot if all are taken.
    ///
    /// Returns `None` without starting anything if the run is halted (a task
    /// failed or an abort was requested) by the time a slot is available.
    /// The task then stays `Pending`.
    pub async fn submit(&self, task: TaskName, payload: WorkPayload) -> Option<WorkerHandle> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => permit.ok()?,
            _ = self.abort.requested() => {
                debug!(task = %task, "abort requested while waiting for a slot; not dispatching");
                return None;
            }
        };

        if self.abort.is_requested() || self.ctx.states.is_halted() {
            debug!(task = %task, "run is halted; not dispatching");
            return None;
        }

        debug!(
            task = %task,
            free_slots = self.slots.available_permits(),
            "dispatching task to worker"
        );

        let ctx = self.ctx.clone();
        let worker_task = task.clone();
        let join = tokio::spawn(async move {
            run_worker(ctx, worker_task, payload, permit).await;
        });

        Some(WorkerHandle { task, join })
    }

    /// Ask the backend to cancel every job that is currently in flight.
    ///
    /// Marks the run as aborting first, so workers that submit after this
    /// call cancel their own job. Returns how many cancellations were sent.
    pub async fn cancel_running(&self) -> usize {
        let handles = self.ctx.states.request_abort();

        for handle in &handles {
            info!(task = %handle.task, job_id = handle.job_id, "cancelling in-flight job");
            if let Err(e) = self.ctx.backend.cancel(handle).await {
                warn!(
                    task = %handle.task,
                    job_id = handle.job_id,
                    error = %e,
                    "failed to cancel job"
                );
            }
        }

        handles.len()
    }
}

async fn run_worker<B: JobBackend + ?Sized>(
    ctx: WorkerContext<B>,
    task: TaskName,
    payload: WorkPayload,
    permit: OwnedSemaphorePermit,
) {
    // The body runs on its own Tokio task so that a panic anywhere in it,
    // user callbacks included, still ends in exactly one `TaskFinished`.
    let body = tokio::spawn(execute_task(ctx.clone(), task.clone(), payload));
    let outcome = match body.await {
        Ok(outcome) => outcome,
        Err(e) => outcome_after_panic(&ctx.states, &task, e),
    };

    // The task is terminal in the state machine now; free the slot before
    // telling the scheduler so it can dispatch straight away.
    drop(permit);

    if ctx
        .events
        .send(RunEvent::TaskFinished {
            task: task.clone(),
            outcome,
        })
        .await
        .is_err()
    {
        warn!(task = %task, "scheduler loop is gone; dropping task completion");
    }
}

/// Settle `task` after its worker body panicked.
///
/// A task the body already finished keeps its recorded outcome; anything
/// else is marked `Failed`.
fn outcome_after_panic(states: &TaskStateMachine, task: &str, err: JoinError) -> TaskOutcome {
    error!(task = %task, error = %err, "worker panicked");
    let detail = format!("worker for task '{task}' panicked: {err}");

    match states.state_of(task) {
        Some(TaskState::Completed) => TaskOutcome::Success,
        Some(TaskState::Failed) => {
            let recorded = states
                .failures()
                .into_iter()
                .find(|f| f.task == task)
                .map(|f| f.detail);
            TaskOutcome::Failed {
                detail: recorded.unwrap_or(detail),
            }
        }
        state => {
            if state == Some(TaskState::Pending) {
                if let Err(e) = states.transition(task, TaskState::Running) {
                    error!(task = %task, error = %e, "could not mark panicked task running");
                }
            }
            if let Err(e) = states.fail(task, detail.clone()) {
                error!(task = %task, error = %e, "could not record task failure");
            }
            TaskOutcome::Failed { detail }
        }
    }
}

async fn execute_task<B: JobBackend + ?Sized>(
    ctx: WorkerContext<B>,
    task: TaskName,
    payload: WorkPayload,
) -> TaskOutcome {
    let task = task.as_str();
    if let Err(e) = ctx.states.transition(task, TaskState::Running) {
        error!(task = %task, error = %e, "refusing to run task");
        return TaskOutcome::Failed {
            detail: e.to_string(),
        };
    }

    for cb in ctx.callbacks.iter() {
        cb.on_job_running(task);
    }

    let started = Instant::now();

    // Run the backend interaction on its own Tokio task so that a panicking
    // backend turns into a task failure instead of a lost completion.
    let job = {
        let ctx = ctx.clone();
        let task = task.to_string();
        tokio::spawn(async move {
            let handle = ctx.backend.submit(&task, &payload).await?;

            for cb in ctx.callbacks.iter() {
                cb.on_job_submitted(&task, &handle);
            }

            if ctx.states.record_handle(&task, handle.clone()) {
                info!(
                    task = %task,
                    job_id = handle.job_id,
                    "abort already requested; cancelling freshly submitted job"
                );
                if let Err(e) = ctx.backend.cancel(&handle).await {
                    warn!(task = %task, job_id = handle.job_id, error = %e, "failed to cancel job");
                }
            }

            ctx.backend.await_terminal(&handle).await
        })
    };

    let result = match job.await {
        Ok(result) => result,
        Err(e) => Err(BackendError::Other(anyhow::anyhow!(
            "backend call for task '{task}' did not finish: {e}"
        ))),
    };

    match result {
        Ok(output) => {
            let record = JobRecord {
                job_id: output.job_id,
                status: output.status,
                output: output.output,
                elapsed: started.elapsed(),
            };

            if let Err(e) = ctx.states.complete(task, record.clone()) {
                error!(task = %task, error = %e, "could not record task completion");
                return TaskOutcome::Failed {
                    detail: e.to_string(),
                };
            }

            for cb in ctx.callbacks.iter() {
                cb.on_job_completed(task, &record);
            }

            TaskOutcome::Success
        }
        Err(err) => {
            let detail = err.to_string();

            if let Err(e) = ctx.states.fail(task, detail.clone()) {
                error!(task = %task, error = %e, "could not record task failure");
            }

            let cancelled = err.status() == Some(JobStatus::Cancelled);
            for cb in ctx.callbacks.iter() {
                if cancelled {
                    cb.on_job_cancelled(task, &detail);
                } else {
                    cb.on_job_failed(task, &detail);
                }
            }

            TaskOutcome::Failed { detail }
        }
    }
}
