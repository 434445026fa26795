// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::{TaskDescriptor, TaskState, TaskStateMachine, WorkflowGraph};
use crate::engine::core::{CoreCommand, CoreStep, SchedulerCore};
use crate::engine::{AbortHandle, RunEvent, RunOptions, RunPhase, RunResult};
use crate::errors::{JobdagError, Result};
use crate::exec::callbacks::JobCallback;
use crate::exec::pool::{BoundedExecutor, WorkerHandle};
use crate::exec::JobBackend;

/// Runs workflow graphs against a job backend.
///
/// This is the async shell around [`SchedulerCore`]: it owns the event
/// channel, the bounded executor and the abort signal, and carries out the
/// commands the core returns. All scheduling decisions live in the core.
pub struct Scheduler<B: JobBackend + ?Sized> {
    backend: Arc<B>,
    options: RunOptions,
    callbacks: Vec<Arc<dyn JobCallback>>,
    abort: AbortHandle,
}

impl<B: JobBackend + ?Sized> fmt::Debug for Scheduler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("options", &self.options)
            .field("callbacks", &self.callbacks.len())
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

impl<B: JobBackend + ?Sized> Scheduler<B> {
    pub fn new(backend: Arc<B>, options: RunOptions) -> Self {
        Self {
            backend,
            options,
            callbacks: Vec::new(),
            abort: AbortHandle::new(),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn JobCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Handle for cancelling runs of this scheduler from elsewhere.
    ///
    /// The handle belongs to the scheduler, not to a single run: an abort
    /// cannot be withdrawn, so once requested every current and later `run`
    /// on this scheduler ends with [`JobdagError::Aborted`]. Build a new
    /// `Scheduler` to run again.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Build the graph from `descriptors` and run it.
    ///
    /// Graph errors are returned as [`JobdagError::Validation`] before any
    /// task is dispatched.
    pub async fn run_descriptors(&self, descriptors: Vec<TaskDescriptor>) -> Result<RunResult> {
        let graph = WorkflowGraph::build(descriptors)?;
        self.run(Arc::new(graph)).await
    }

    /// Run every task of `graph` in dependency order.
    ///
    /// Returns one record per task on success. A task failure lets in-flight
    /// tasks finish, dispatches nothing new and then returns
    /// [`JobdagError::TaskExecution`] for the first failure observed. An
    /// abort cancels in-flight jobs and returns [`JobdagError::Aborted`].
    pub async fn run(&self, graph: Arc<WorkflowGraph>) -> Result<RunResult> {
        let states = Arc::new(TaskStateMachine::new(graph.tasks()));

        // Each task sends at most one event, so workers never block on send.
        let (event_tx, mut event_rx) = mpsc::channel::<RunEvent>(graph.len().max(1));

        let executor = BoundedExecutor::new(
            Arc::clone(&self.backend),
            Arc::clone(&states),
            self.options.max_concurrency,
            event_tx,
            self.abort.clone(),
        )?
        .with_callbacks(self.callbacks.clone());

        let mut core = SchedulerCore::new(Arc::clone(&graph));
        let mut workers: Vec<WorkerHandle> = Vec::new();
        let mut abort_seen = false;

        info!(
            workflow = %graph.name(),
            tasks = graph.len(),
            max_concurrency = executor.max_concurrency(),
            "workflow run started"
        );

        let mut pending: VecDeque<CoreCommand> = VecDeque::new();

        if self.abort.is_requested() {
            abort_seen = true;
            let step = core.step(RunEvent::AbortRequested, &states.snapshot());
            pending.extend(step.commands);
        }

        let step = core.seed(&states.snapshot());
        pending.extend(step.commands);

        loop {
            while let Some(command) = pending.pop_front() {
                match command {
                    CoreCommand::Dispatch(tasks) => {
                        for task in tasks {
                            let Some(descriptor) = graph.descriptor(&task) else {
                                error!(task = %task, "dispatched task is not in the graph");
                                let step = core.dispatch_refused(&task, &states.snapshot());
                                pending.extend(step.commands);
                                continue;
                            };

                            match executor.submit(task.clone(), descriptor.payload.clone()).await {
                                Some(worker) => workers.push(worker),
                                None => {
                                    // An abort that stopped the dispatch must reach the core
                                    // before the refusal, or an empty run looks stalled.
                                    if self.abort.is_requested() && !abort_seen {
                                        abort_seen = true;
                                        let step =
                                            core.step(RunEvent::AbortRequested, &states.snapshot());
                                        pending.extend(step.commands);
                                    }
                                    let step = core.dispatch_refused(&task, &states.snapshot());
                                    pending.extend(step.commands);
                                }
                            }
                        }
                    }
                    CoreCommand::CancelInFlight => {
                        let cancelled = executor.cancel_running().await;
                        debug!(cancelled, "cancellation requests sent");
                    }
                }
            }

            workers.retain(|worker| !worker.is_finished());

            if core.is_settled() {
                break;
            }

            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        error!("run event channel closed while tasks were in flight");
                        break;
                    }
                },
                _ = self.abort.requested(), if !abort_seen => {
                    abort_seen = true;
                    RunEvent::AbortRequested
                }
            };

            debug!(?event, "scheduler received event");
            let CoreStep { commands, .. } = core.step(event, &states.snapshot());
            pending.extend(commands);
        }

        for worker in workers {
            let task = worker.task.clone();
            if let Err(e) = worker.join().await {
                warn!(task = %task, error = %e, "worker task did not exit cleanly");
            }
        }

        self.finish(&core, &states)
    }

    fn finish(&self, core: &SchedulerCore, states: &TaskStateMachine) -> Result<RunResult> {
        match core.phase() {
            RunPhase::Succeeded => {
                let results = states.results();
                info!(completed = results.len(), "workflow run succeeded");
                Ok(results)
            }
            RunPhase::Failed => {
                let failures = core.failures();
                let failed_tasks = failures.iter().map(|f| f.task.clone()).collect();
                match failures.first() {
                    Some(first) => {
                        error!(task = %first.task, detail = %first.detail, "workflow run failed");
                        Err(JobdagError::TaskExecution {
                            task: first.task.clone(),
                            detail: first.detail.clone(),
                            failed_tasks,
                        })
                    }
                    None => Err(JobdagError::Other(anyhow::anyhow!(
                        "run failed without a recorded task failure"
                    ))),
                }
            }
            RunPhase::Aborted => {
                info!("workflow run aborted");
                Err(JobdagError::Aborted)
            }
            RunPhase::Stalled => Err(JobdagError::Stalled(
                states.snapshot().tasks_in(TaskState::Pending),
            )),
            phase @ (RunPhase::Seeding | RunPhase::Draining) => Err(JobdagError::Other(
                anyhow::anyhow!("scheduler loop stopped in phase {phase}"),
            )),
        }
    }
}
