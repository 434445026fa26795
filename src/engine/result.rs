// src/engine/result.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::TaskName;
use crate::types::JobStatus;

/// What the job backend returned for a completed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: u64,
    pub status: JobStatus,
    /// Job output as reported by the backend (captured stdout or log file).
    pub output: Option<String>,
    /// Wall time from submission to the terminal state.
    pub elapsed: Duration,
}

/// A task that reached `Failed`, with the backend's error detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: TaskName,
    pub detail: String,
}

/// Results of a successful run: one entry per completed task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    records: BTreeMap<TaskName, JobRecord>,
}

impl RunResult {
    pub fn get(&self, task: &str) -> Option<&JobRecord> {
        self.records.get(task)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.records.contains_key(task)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by task name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobRecord)> {
        self.records.iter().map(|(name, record)| (name.as_str(), record))
    }
}

impl From<BTreeMap<TaskName, JobRecord>> for RunResult {
    fn from(records: BTreeMap<TaskName, JobRecord>) -> Self {
        Self { records }
    }
}
