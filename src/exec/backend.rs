// src/exec/backend.rs

//! Pluggable job backend abstraction.
//!
//! The executor talks to a `JobBackend` instead of a concrete batch system.
//! Production code picks [`super::SlurmBackend`] or [`super::LocalBackend`];
//! tests provide their own implementation that never leaves the process.
//!
//! A backend submits a payload, waits until the job reaches a terminal
//! state, and can cancel a job it handed out a [`JobHandle`] for. Anything
//! other than a `Completed` terminal state is reported as a [`BackendError`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::dag::WorkPayload;
use crate::engine::TaskName;
use crate::types::JobStatus;

/// Boxed future returned by [`JobBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Identifies one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub job_id: u64,
    pub task: TaskName,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (job {})", self.task, self.job_id)
    }
}

/// Successful terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub job_id: u64,
    pub status: JobStatus,
    pub output: Option<String>,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("job submission failed: {0}")]
    Submit(String),

    #[error("status query for job {job_id} failed: {reason}")]
    Query { job_id: u64, reason: String },

    #[error("job {job_id} finished with status {status}: {detail}")]
    Terminal {
        job_id: u64,
        status: JobStatus,
        detail: String,
    },

    #[error("unsupported payload for this backend: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    /// Terminal status, if the job got far enough to have one.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            BackendError::Terminal { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Trait abstracting the batch system that actually runs task payloads.
pub trait JobBackend: Send + Sync + 'static {
    /// Submit `payload` for `task` and return a handle as soon as the backend
    /// has accepted it.
    fn submit<'a>(&'a self, task: &'a str, payload: &'a WorkPayload) -> BackendFuture<'a, JobHandle>;

    /// Block until the job reaches a terminal state.
    fn await_terminal<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, JobOutput>;

    /// Best-effort cancellation. The job's terminal state is still reported
    /// through [`JobBackend::await_terminal`].
    fn cancel<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, ()>;

    /// Submit and wait in one call.
    fn submit_and_await<'a>(
        &'a self,
        task: &'a str,
        payload: &'a WorkPayload,
    ) -> BackendFuture<'a, JobOutput> {
        Box::pin(async move {
            let handle = self.submit(task, payload).await?;
            self.await_terminal(&handle).await
        })
    }
}
