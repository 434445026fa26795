// src/dag/task.rs

//! Task descriptors and the opaque work payloads they carry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::engine::TaskName;

/// Immutable description of one task in a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: TaskName,
    pub payload: WorkPayload,
    /// Direct dependencies, in declaration order, without repeats.
    pub depends_on: Vec<TaskName>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<TaskName>, payload: WorkPayload) -> Self {
        Self {
            name: name.into(),
            payload,
            depends_on: Vec::new(),
        }
    }

    /// Add a dependency. Repeated names are ignored so the list stays an
    /// ordered set.
    pub fn after(mut self, dep: impl Into<TaskName>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }
}

/// What a job backend should actually run for a task.
///
/// The scheduler hands this through untouched; only backends look inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkPayload {
    /// A command line to wrap into a job script.
    Command(CommandWork),
    /// A user-provided script submitted as-is.
    Script(ScriptWork),
}

impl WorkPayload {
    /// Short human-readable summary for plans and logs.
    pub fn summary(&self) -> String {
        match self {
            WorkPayload::Command(work) => work.argv.join(" "),
            WorkPayload::Script(work) => work.path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWork {
    pub argv: Vec<String>,
    pub resources: JobResource,
    pub environment: JobEnvironment,
    /// Directory where the job's log file is written.
    pub log_dir: String,
    pub work_dir: Option<String>,
    pub partition: Option<String>,
}

impl CommandWork {
    /// A command with default resources, no environment and `logs` as log dir.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            resources: JobResource::default(),
            environment: JobEnvironment::default(),
            log_dir: "logs".to_string(),
            work_dir: None,
            partition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptWork {
    pub path: PathBuf,
}

/// Resources requested for a command job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResource {
    pub nodes: u32,
    pub gpus_per_node: u32,
    pub ntasks_per_node: u32,
    pub cpus_per_task: u32,
    /// Slurm memory string, e.g. `"32GB"`.
    pub memory_per_node: Option<String>,
    /// Slurm time limit, e.g. `"2:00:00"`.
    pub time_limit: Option<String>,
}

impl Default for JobResource {
    fn default() -> Self {
        Self {
            nodes: 1,
            gpus_per_node: 0,
            ntasks_per_node: 1,
            cpus_per_task: 1,
            memory_per_node: None,
            time_limit: None,
        }
    }
}

/// Software environment for a command job.
///
/// At most one of `conda`, `venv` and `sqsh` is set; the loader enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobEnvironment {
    pub conda: Option<String>,
    pub venv: Option<String>,
    /// Squashfs container image, launched through pyxis.
    pub sqsh: Option<String>,
    pub env_vars: BTreeMap<String, String>,
}
