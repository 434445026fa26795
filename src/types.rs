use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which job backend executes task payloads.
///
/// - `Slurm`: submit through `sbatch`, poll with `sacct`, cancel with `scancel`
///   (default behaviour).
/// - `Local`: run each payload as a local shell process. Handy on a laptop
///   and for smoke-testing a workflow before sending it to a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Slurm,
    Local,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Slurm
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slurm" => Ok(BackendKind::Slurm),
            "local" => Ok(BackendKind::Local),
            other => Err(format!(
                "invalid backend: {other} (expected \"slurm\" or \"local\")"
            )),
        }
    }
}

/// Lifecycle state of a unit of work as reported by a job backend.
///
/// This is the backend's view of a job, not the scheduler's
/// [`crate::dag::TaskState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Unknown,
}

impl JobStatus {
    /// Whether the backend will never report another state for this job.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    /// Parse a Slurm state string (`squeue` / `sacct` output).
    ///
    /// `sacct` decorates some states (`CANCELLED by 1234`, `RUNNING+`), so only
    /// the leading word is considered. Unrecognised states map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('+')
            .to_uppercase();

        Ok(match word.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "RESV_DEL_HOLD" => {
                JobStatus::Pending
            }
            "RUNNING" | "COMPLETING" | "SUSPENDED" | "STAGE_OUT" | "SIGNALING" => {
                JobStatus::Running
            }
            "COMPLETED" => JobStatus::Completed,
            "FAILED" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" | "DEADLINE" | "PREEMPTED" => {
                JobStatus::Failed
            }
            "CANCELLED" => JobStatus::Cancelled,
            "TIMEOUT" => JobStatus::Timeout,
            _ => JobStatus::Unknown,
        })
    }
}
