// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{CommandWork, JobEnvironment, JobResource, ScriptWork, TaskDescriptor, WorkPayload};
use crate::types::BackendKind;

/// Workflow file exactly as read from TOML, before validation.
///
/// ```toml
/// name = "training-pipeline"
///
/// [config]
/// max_concurrency = 2
/// backend = "slurm"
/// poll_interval = "5s"
///
/// [default]
/// log_dir = "logs"
///
/// [[task]]
/// name = "preprocess"
/// command = ["python", "prep.py"]
///
/// [[task]]
/// name = "train"
/// path = "scripts/train.sh"
/// depends_on = ["preprocess"]
/// ```
///
/// Everything except the task list is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// Run behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Defaults for command tasks from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[[task]]`, in file order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

fn default_workflow_name() -> String {
    "unnamed_workflow".to_string()
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Upper bound on tasks running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub backend: BackendKind,

    /// How often the Slurm backend polls job state, e.g. `"5s"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            backend: BackendKind::default(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// `[default]` section: fallbacks for command tasks that leave these unset.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub work_dir: Option<String>,

    #[serde(default)]
    pub partition: Option<String>,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            work_dir: None,
            partition: None,
        }
    }
}

/// One `[[task]]` entry.
///
/// Exactly one of `command` and `path` must be set. Resource and
/// environment fields only apply to command tasks; a script task carries its
/// own `#SBATCH` directives.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// Command line, one element per argument.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Path to a batch script to submit as-is.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Names of tasks that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub work_dir: Option<String>,

    #[serde(default)]
    pub partition: Option<String>,

    #[serde(default = "one")]
    pub nodes: u32,

    #[serde(default)]
    pub gpus_per_node: u32,

    #[serde(default = "one")]
    pub ntasks_per_node: u32,

    #[serde(default = "one")]
    pub cpus_per_task: u32,

    #[serde(default)]
    pub memory_per_node: Option<String>,

    #[serde(default)]
    pub time_limit: Option<String>,

    #[serde(default)]
    pub conda: Option<String>,

    #[serde(default)]
    pub venv: Option<String>,

    /// Squashfs container image (`container` is accepted as an alias).
    #[serde(default, alias = "container")]
    pub sqsh: Option<String>,

    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

fn one() -> u32 {
    1
}

impl TaskConfig {
    /// Build the task's payload, filling unset fields from `[default]`.
    ///
    /// Assumes the task passed validation (exactly one of `command`/`path`).
    pub fn payload(&self, defaults: &DefaultSection) -> WorkPayload {
        match (&self.command, &self.path) {
            (_, Some(path)) => WorkPayload::Script(ScriptWork { path: path.clone() }),
            (command, None) => WorkPayload::Command(CommandWork {
                argv: command.clone().unwrap_or_default(),
                resources: JobResource {
                    nodes: self.nodes,
                    gpus_per_node: self.gpus_per_node,
                    ntasks_per_node: self.ntasks_per_node,
                    cpus_per_task: self.cpus_per_task,
                    memory_per_node: self.memory_per_node.clone(),
                    time_limit: self.time_limit.clone(),
                },
                environment: JobEnvironment {
                    conda: self.conda.clone(),
                    venv: self.venv.clone(),
                    sqsh: self.sqsh.clone(),
                    env_vars: self.env_vars.clone(),
                },
                log_dir: self.log_dir.clone().unwrap_or_else(|| defaults.log_dir.clone()),
                work_dir: self.work_dir.clone().or_else(|| defaults.work_dir.clone()),
                partition: self.partition.clone().or_else(|| defaults.partition.clone()),
            }),
        }
    }

    pub fn descriptor(&self, defaults: &DefaultSection) -> TaskDescriptor {
        let mut descriptor = TaskDescriptor::new(self.name.clone(), self.payload(defaults));
        for dep in &self.depends_on {
            descriptor = descriptor.after(dep.clone());
        }
        descriptor
    }
}

/// A workflow file that passed load-time validation.
///
/// Graph-level checks (duplicate names, unknown dependencies, cycles) are
/// left to [`crate::dag::WorkflowGraph::build`].
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub name: String,
    pub config: ConfigSection,
    pub default: DefaultSection,
    pub task: Vec<TaskConfig>,
    poll_interval: Duration,
}

impl WorkflowFile {
    /// Construct without validation. Prefer `WorkflowFile::try_from(raw)`.
    pub(crate) fn new_unchecked(raw: RawWorkflowFile, poll_interval: Duration) -> Self {
        Self {
            name: raw.name,
            config: raw.config,
            default: raw.default,
            task: raw.task,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Typed task descriptors, in file order.
    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        self.task
            .iter()
            .map(|task| task.descriptor(&self.default))
            .collect()
    }
}
