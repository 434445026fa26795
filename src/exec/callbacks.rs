// src/exec/callbacks.rs

//! Job lifecycle notifications.
//!
//! Executor workers call these hooks as a job moves through its lifecycle.
//! Every method has a no-op default so sinks only implement what they need.
//! Hooks run on the worker's task and must not block.

use tracing::{info, warn};

use crate::engine::result::JobRecord;
use crate::exec::backend::JobHandle;

pub trait JobCallback: Send + Sync {
    /// The worker took a slot and marked the task `Running`.
    fn on_job_running(&self, _task: &str) {}

    /// The backend accepted the job.
    fn on_job_submitted(&self, _task: &str, _handle: &JobHandle) {}

    fn on_job_completed(&self, _task: &str, _record: &JobRecord) {}

    fn on_job_failed(&self, _task: &str, _detail: &str) {}

    /// The backend reported the job as cancelled (for example after an abort).
    fn on_job_cancelled(&self, _task: &str, _detail: &str) {}
}

/// Callback that reports job lifecycle events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl JobCallback for LoggingCallback {
    fn on_job_submitted(&self, task: &str, handle: &JobHandle) {
        info!(task = %task, job_id = handle.job_id, "job submitted");
    }

    fn on_job_completed(&self, task: &str, record: &JobRecord) {
        info!(
            task = %task,
            job_id = record.job_id,
            elapsed_ms = record.elapsed.as_millis() as u64,
            "job completed"
        );
    }

    fn on_job_failed(&self, task: &str, detail: &str) {
        warn!(task = %task, detail = %detail, "job failed");
    }

    fn on_job_cancelled(&self, task: &str, detail: &str) {
        warn!(task = %task, detail = %detail, "job cancelled");
    }
}
