use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

use jobdag::dag::WorkPayload;
use jobdag::exec::{BackendError, BackendFuture, JobBackend, JobHandle, JobOutput};
use jobdag::types::JobStatus;

/// What the fake backend observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Started(String),
    Finished(String),
    Cancelled(String),
}

#[derive(Debug, Default)]
struct Script {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failures: HashMap<String, String>,
    held: HashSet<String>,
    panics: HashSet<String>,
}

#[derive(Debug)]
struct FakeJob {
    task: String,
    cancel: Arc<Notify>,
}

/// A scriptable in-memory job backend.
///
/// - every task succeeds after `default_delay` unless scripted otherwise
/// - `failing(task, detail)` makes the job end in `Failed`
/// - `holding(task)` keeps the job running until it is cancelled
/// - `panicking(task)` panics inside `await_terminal`
///
/// It records start/finish/cancel events in order and the highest number of
/// jobs it saw running at once.
#[derive(Debug, Default)]
pub struct FakeBackend {
    script: Script,
    next_id: AtomicU64,
    running: AtomicUsize,
    max_running: AtomicUsize,
    events: Mutex<Vec<FakeEvent>>,
    jobs: Mutex<HashMap<u64, FakeJob>>,
    submitted: AtomicUsize,
    submitted_notify: Notify,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.script.default_delay = delay;
        self
    }

    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.script.delays.insert(task.to_string(), delay);
        self
    }

    pub fn failing(mut self, task: &str, detail: &str) -> Self {
        self.script.failures.insert(task.to_string(), detail.to_string());
        self
    }

    pub fn holding(mut self, task: &str) -> Self {
        self.script.held.insert(task.to_string());
        self
    }

    pub fn panicking(mut self, task: &str) -> Self {
        self.script.panics.insert(task.to_string());
        self
    }

    fn events_guard(&self) -> MutexGuard<'_, Vec<FakeEvent>> {
        self.events.lock().unwrap()
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.events_guard().clone()
    }

    /// Tasks in the order their jobs were submitted.
    pub fn started(&self) -> Vec<String> {
        self.events_guard()
            .iter()
            .filter_map(|e| match e {
                FakeEvent::Started(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.events_guard()
            .iter()
            .filter_map(|e| match e {
                FakeEvent::Cancelled(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn position_of(&self, event: &FakeEvent) -> Option<usize> {
        self.events_guard().iter().position(|e| e == event)
    }

    /// Wait until at least `n` jobs have been submitted.
    pub async fn wait_for_submissions(&self, n: usize) {
        loop {
            let notified = self.submitted_notify.notified();
            if self.submitted.load(Ordering::SeqCst) >= n {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self, job_id: u64, event: FakeEvent) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().remove(&job_id);
        self.events_guard().push(event);
    }
}

impl JobBackend for FakeBackend {
    fn submit<'a>(&'a self, task: &'a str, _payload: &'a WorkPayload) -> BackendFuture<'a, JobHandle> {
        Box::pin(async move {
            let job_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            self.jobs.lock().unwrap().insert(
                job_id,
                FakeJob {
                    task: task.to_string(),
                    cancel: Arc::new(Notify::new()),
                },
            );
            self.events_guard().push(FakeEvent::Started(task.to_string()));

            self.submitted.fetch_add(1, Ordering::SeqCst);
            self.submitted_notify.notify_waiters();

            Ok(JobHandle {
                job_id,
                task: task.to_string(),
            })
        })
    }

    fn await_terminal<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, JobOutput> {
        Box::pin(async move {
            let task = handle.task.as_str();
            let cancel = self
                .jobs
                .lock()
                .unwrap()
                .get(&handle.job_id)
                .map(|job| Arc::clone(&job.cancel))
                .ok_or_else(|| BackendError::Query {
                    job_id: handle.job_id,
                    reason: "unknown fake job".to_string(),
                })?;

            let cancelled = if self.script.held.contains(task) {
                cancel.notified().await;
                true
            } else {
                let delay = self
                    .script
                    .delays
                    .get(task)
                    .copied()
                    .unwrap_or(self.script.default_delay);
                tokio::select! {
                    _ = sleep(delay) => false,
                    _ = cancel.notified() => true,
                }
            };

            if cancelled {
                self.finish(handle.job_id, FakeEvent::Cancelled(task.to_string()));
                return Err(BackendError::Terminal {
                    job_id: handle.job_id,
                    status: JobStatus::Cancelled,
                    detail: "cancelled by request".to_string(),
                });
            }

            if self.script.panics.contains(task) {
                self.finish(handle.job_id, FakeEvent::Finished(task.to_string()));
                panic!("fake backend panicked while running '{task}'");
            }

            self.finish(handle.job_id, FakeEvent::Finished(task.to_string()));

            match self.script.failures.get(task) {
                Some(detail) => Err(BackendError::Terminal {
                    job_id: handle.job_id,
                    status: JobStatus::Failed,
                    detail: detail.clone(),
                }),
                None => Ok(JobOutput {
                    job_id: handle.job_id,
                    status: JobStatus::Completed,
                    output: Some(format!("{task} done")),
                }),
            }
        })
    }

    fn cancel<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.get(&handle.job_id) {
                // `notify_one` stores a permit if the job is not waiting yet.
                job.cancel.notify_one();
                tracing::debug!(task = %job.task, job_id = handle.job_id, "fake job cancel requested");
            }
            Ok(())
        })
    }
}
