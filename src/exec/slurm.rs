// src/exec/slurm.rs

//! Job backend for the Slurm workload manager.
//!
//! - submission: `sbatch` (command payloads are rendered and piped on stdin,
//!   script payloads are passed by path)
//! - status: `sacct`, polled every `poll_interval` until a terminal state
//! - cancellation: `scancel`
//!
//! Program names are configurable so tests (or site wrappers) can stand in
//! for the real Slurm tools.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dag::WorkPayload;
use crate::exec::backend::{BackendError, BackendFuture, JobBackend, JobHandle, JobOutput};
use crate::exec::logs::{default_log_dirs, read_job_output, tail};
use crate::exec::script::{job_name, render_sbatch_script};
use crate::types::JobStatus;

static SUBMITTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Submitted batch job (\d+)").expect("static regex is valid")
});

/// Consecutive `sacct` failures tolerated before giving up on a job.
const MAX_QUERY_FAILURES: u32 = 5;

/// Lines of the job log included in failure details.
const LOG_TAIL_LINES: usize = 40;

/// Per-job details needed after submission.
#[derive(Debug, Clone)]
struct SubmittedJob {
    log_dir: Option<String>,
}

pub struct SlurmBackend {
    poll_interval: Duration,
    sbatch: String,
    sacct: String,
    scancel: String,
    jobs: Mutex<HashMap<u64, SubmittedJob>>,
}

impl SlurmBackend {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            sbatch: "sbatch".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Override the `sbatch`, `sacct` and `scancel` programs.
    pub fn with_programs(
        mut self,
        sbatch: impl Into<String>,
        sacct: impl Into<String>,
        scancel: impl Into<String>,
    ) -> Self {
        self.sbatch = sbatch.into();
        self.sacct = sacct.into();
        self.scancel = scancel.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<u64, SubmittedJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn submit_inner(&self, task: &str, payload: &WorkPayload) -> Result<JobHandle, BackendError> {
        let (output, log_dir) = match payload {
            WorkPayload::Command(work) => {
                let script = render_sbatch_script(task, work)?;
                debug!(task = %task, script = %script, "rendered batch script");

                let mut child = Command::new(&self.sbatch)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| BackendError::Submit(format!("spawning {}: {e}", self.sbatch)))?;

                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(script.as_bytes()).await?;
                    // Closing stdin tells sbatch the script is complete.
                    drop(stdin);
                }

                (child.wait_with_output().await?, Some(work.log_dir.clone()))
            }
            WorkPayload::Script(work) => {
                let output = Command::new(&self.sbatch)
                    .arg(&work.path)
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| BackendError::Submit(format!("spawning {}: {e}", self.sbatch)))?;
                (output, None)
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(BackendError::Submit(format!(
                "{} exited with {} for task '{task}': {}",
                self.sbatch,
                output.status,
                stderr.trim()
            )));
        }

        let job_id = parse_job_id(&stdout).ok_or_else(|| {
            BackendError::Submit(format!(
                "could not find a job id in {} output: {}",
                self.sbatch,
                stdout.trim()
            ))
        })?;

        self.jobs().insert(job_id, SubmittedJob { log_dir });
        info!(task = %task, job_id, "submitted slurm job");

        Ok(JobHandle {
            job_id,
            task: task.to_string(),
        })
    }

    /// Current state of `job_id` according to `sacct`.
    ///
    /// A job that `sacct` does not list yet (accounting lags behind
    /// submission) is reported as `Pending`.
    async fn query_status(&self, job_id: u64) -> Result<JobStatus, BackendError> {
        let output = Command::new(&self.sacct)
            .args(["-j", &job_id.to_string(), "-X", "-n", "-P", "-o", "State"])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {} for job {job_id}", self.sacct))?;

        if !output.status.success() {
            return Err(BackendError::Query {
                job_id,
                reason: format!(
                    "{} exited with {}: {}",
                    self.sacct,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let status = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| line.parse::<JobStatus>().unwrap_or(JobStatus::Unknown))
            .unwrap_or(JobStatus::Pending);

        Ok(status)
    }

    async fn await_inner(&self, handle: &JobHandle) -> Result<JobOutput, BackendError> {
        let job_id = handle.job_id;
        let mut previous: Option<JobStatus> = None;
        let mut failures = 0;

        let status = loop {
            match self.query_status(job_id).await {
                Ok(status) => {
                    failures = 0;
                    if previous != Some(status) {
                        debug!(task = %handle.task, job_id, status = %status, "slurm job status");
                        previous = Some(status);
                    }
                    if status.is_terminal() {
                        break status;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        task = %handle.task,
                        job_id,
                        attempt = failures,
                        error = %e,
                        "slurm status query failed"
                    );
                    if failures >= MAX_QUERY_FAILURES {
                        return Err(e);
                    }
                }
            }

            sleep(self.poll_interval).await;
        };

        let log_dir = self
            .jobs()
            .remove(&job_id)
            .and_then(|job| job.log_dir);
        let dirs: Vec<PathBuf> = default_log_dirs(log_dir.as_deref());
        let output = read_job_output(&dirs, job_id, Some(&job_name(&handle.task)));

        info!(task = %handle.task, job_id, status = %status, "slurm job finished");

        if status == JobStatus::Completed {
            return Ok(JobOutput {
                job_id,
                status,
                output,
            });
        }

        let detail = match output {
            Some(log) => tail(&log, LOG_TAIL_LINES),
            None => format!("no log file found for job {job_id}"),
        };

        Err(BackendError::Terminal {
            job_id,
            status,
            detail,
        })
    }

    async fn cancel_inner(&self, handle: &JobHandle) -> Result<(), BackendError> {
        info!(task = %handle.task, job_id = handle.job_id, "cancelling slurm job");

        let output = Command::new(&self.scancel)
            .arg(handle.job_id.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {} for job {}", self.scancel, handle.job_id))?;

        if !output.status.success() {
            return Err(BackendError::Other(anyhow!(
                "{} exited with {} for job {}: {}",
                self.scancel,
                output.status,
                handle.job_id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

/// Extract the job id from `sbatch` output.
///
/// Accepts both the default message (`Submitted batch job 123`) and
/// `--parsable` output (`123` or `123;cluster`).
pub fn parse_job_id(stdout: &str) -> Option<u64> {
    if let Some(caps) = SUBMITTED_RE.captures(stdout) {
        return caps[1].parse().ok();
    }

    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    first.split(';').next()?.trim().parse().ok()
}

impl JobBackend for SlurmBackend {
    fn submit<'a>(&'a self, task: &'a str, payload: &'a WorkPayload) -> BackendFuture<'a, JobHandle> {
        Box::pin(self.submit_inner(task, payload))
    }

    fn await_terminal<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, JobOutput> {
        Box::pin(self.await_inner(handle))
    }

    fn cancel<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, ()> {
        Box::pin(self.cancel_inner(handle))
    }
}
