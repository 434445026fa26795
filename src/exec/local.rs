// src/exec/local.rs

//! Job backend that runs payloads as local shell processes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dag::WorkPayload;
use crate::exec::backend::{BackendError, BackendFuture, JobBackend, JobHandle, JobOutput};
use crate::exec::logs::tail;
use crate::exec::script::render_local_script;
use crate::types::JobStatus;

/// Lines of stderr kept for failure details.
const STDERR_TAIL_LINES: usize = 20;

type JobResult = Result<JobOutput, BackendError>;

/// Bookkeeping for one local job.
///
/// - `cancel` asks the monitor to kill the process.
/// - `done` receives the terminal outcome from the monitor.
struct LocalJob {
    cancel: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<JobResult>>,
}

/// Runs each payload with `sh` on the local machine.
///
/// Command payloads are rendered into a small script (working directory,
/// environment, activation, command) and passed with `-c`; script payloads
/// are run as `sh <path>`. Stdout becomes the job output; stderr is logged at
/// debug level and its tail is included in failure details.
///
/// On unix every job gets its own process group. Cancelling a job kills the
/// whole group, and processes a finished job left behind are killed too.
pub struct LocalBackend {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<u64, LocalJob>>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<u64, LocalJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_command(&self, payload: &WorkPayload) -> Result<Command, BackendError> {
        let mut cmd = Command::new("sh");
        match payload {
            WorkPayload::Command(work) => {
                cmd.arg("-c").arg(render_local_script(work)?);
            }
            WorkPayload::Script(work) => {
                cmd.arg(&work.path);
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }

    async fn submit_inner(&self, task: &str, payload: &WorkPayload) -> Result<JobHandle, BackendError> {
        let mut cmd = self.build_command(payload)?;
        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Submit(format!("spawning process for task '{task}': {e}")))?;

        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        self.jobs().insert(
            job_id,
            LocalJob {
                cancel: Some(cancel_tx),
                done: Some(done_rx),
            },
        );

        // With `process_group(0)` the group id is the child's pid.
        let group = child.id();
        info!(task = %task, job_id, pid = group, "started local process");

        let monitor_task = task.to_string();
        tokio::spawn(async move {
            let result = monitor_child(job_id, &monitor_task, child, group, cancel_rx).await;
            if done_tx.send(result).is_err() {
                debug!(task = %monitor_task, job_id, "nobody is waiting for local job outcome");
            }
        });

        Ok(JobHandle {
            job_id,
            task: task.to_string(),
        })
    }

    async fn await_inner(&self, handle: &JobHandle) -> JobResult {
        let done = self
            .jobs()
            .get_mut(&handle.job_id)
            .and_then(|job| job.done.take())
            .ok_or_else(|| BackendError::Query {
                job_id: handle.job_id,
                reason: "unknown local job or already awaited".to_string(),
            })?;

        let result = done
            .await
            .unwrap_or_else(|_| Err(BackendError::Other(anyhow!("local job monitor exited early"))));

        // Dropping the entry also drops the cancel sender, which the monitor
        // no longer listens to.
        self.jobs().remove(&handle.job_id);
        result
    }
}

impl JobBackend for LocalBackend {
    fn submit<'a>(&'a self, task: &'a str, payload: &'a WorkPayload) -> BackendFuture<'a, JobHandle> {
        Box::pin(self.submit_inner(task, payload))
    }

    fn await_terminal<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, JobOutput> {
        Box::pin(self.await_inner(handle))
    }

    fn cancel<'a>(&'a self, handle: &'a JobHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let cancel = self
                .jobs()
                .get_mut(&handle.job_id)
                .and_then(|job| job.cancel.take());

            match cancel {
                Some(tx) => {
                    if tx.send(()).is_err() {
                        debug!(job_id = handle.job_id, "local job already finished while cancelling");
                    }
                }
                None => {
                    debug!(job_id = handle.job_id, "no cancel sender; job finished or already cancelled");
                }
            }
            Ok(())
        })
    }
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R, task: String, stream: &'static str) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(task = %task, "{stream}: {line}");
        collected.push(line);
    }
    collected
}

/// Send SIGKILL to every process in group `group`.
///
/// Returns `false` if the group no longer exists.
#[cfg(unix)]
async fn kill_group(group: u32) -> bool {
    let status = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{group}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            warn!(group, error = %e, "failed to run kill for process group");
            false
        }
    }
}

#[cfg(not(unix))]
async fn kill_group(_group: u32) -> bool {
    false
}

/// Wait for the process to exit or for a cancellation request.
async fn monitor_child(
    job_id: u64,
    task: &str,
    mut child: Child,
    group: Option<u32>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> JobResult {
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(collect_lines(out, task.to_string(), "stdout")));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(collect_lines(err, task.to_string(), "stderr")));

    // A dropped cancel sender is not a cancellation; the pattern only matches
    // an explicit request.
    let exit = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = &mut cancel_rx => None,
    };

    let status = match exit {
        Some(status) => status?,
        None => {
            info!(task = %task, job_id, "cancellation requested; killing local process");
            if let Some(group) = group {
                kill_group(group).await;
            }
            if let Err(e) = child.kill().await {
                warn!(task = %task, job_id, error = %e, "failed to kill local process");
            }
            return Err(BackendError::Terminal {
                job_id,
                status: JobStatus::Cancelled,
                detail: "cancelled by request".to_string(),
            });
        }
    };

    // Background processes still holding the output pipes would keep the
    // readers below open forever.
    if let Some(group) = group {
        if kill_group(group).await {
            debug!(task = %task, job_id, group, "killed processes left behind by local job");
        }
    }

    let stdout = match stdout {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    let code = status.code().unwrap_or(-1);
    info!(task = %task, job_id, exit_code = code, success = status.success(), "local process exited");

    if status.success() {
        Ok(JobOutput {
            job_id,
            status: JobStatus::Completed,
            output: Some(stdout.join("\n")),
        })
    } else {
        let stderr_tail = tail(&stderr.join("\n"), STDERR_TAIL_LINES);
        let detail = if stderr_tail.is_empty() {
            format!("exit code {code}")
        } else {
            format!("exit code {code}; stderr:\n{stderr_tail}")
        };
        Err(BackendError::Terminal {
            job_id,
            status: JobStatus::Failed,
            detail,
        })
    }
}
