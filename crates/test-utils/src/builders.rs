#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use jobdag::config::{
    ConfigSection, DefaultSection, RawWorkflowFile, TaskConfig, WorkflowFile,
};
use jobdag::dag::{CommandWork, TaskDescriptor, WorkPayload};

/// Descriptor for `name` running `echo <name>`, depending on `deps`.
pub fn task(name: &str, deps: &[&str]) -> TaskDescriptor {
    deps.iter().fold(
        TaskDescriptor::new(name, WorkPayload::Command(CommandWork::new(["echo", name]))),
        |descriptor, dep| descriptor.after(*dep),
    )
}

/// Descriptor for `name` running `argv` locally, depending on `deps`.
pub fn command_task(name: &str, argv: &[&str], deps: &[&str]) -> TaskDescriptor {
    deps.iter().fold(
        TaskDescriptor::new(name, WorkPayload::Command(CommandWork::new(argv.iter().copied()))),
        |descriptor, dep| descriptor.after(*dep),
    )
}

/// The diamond `A; B[A]; C[A]; D[B, C]`.
pub fn diamond() -> Vec<TaskDescriptor> {
    vec![
        task("A", &[]),
        task("B", &["A"]),
        task("C", &["A"]),
        task("D", &["B", "C"]),
    ]
}

/// Builder for `WorkflowFile` to simplify test setup.
pub struct WorkflowFileBuilder {
    raw: RawWorkflowFile,
}

impl WorkflowFileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            raw: RawWorkflowFile {
                name: name.to_string(),
                config: ConfigSection::default(),
                default: DefaultSection::default(),
                task: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.raw.task.push(task);
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.raw.config.max_concurrency = n;
        self
    }

    pub fn with_default_log_dir(mut self, dir: &str) -> Self {
        self.raw.default.log_dir = dir.to_string();
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.raw
    }

    pub fn build(self) -> WorkflowFile {
        WorkflowFile::try_from(self.raw).expect("Failed to build valid workflow from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    fn empty(name: &str) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            command: None,
            path: None,
            depends_on: Vec::new(),
            log_dir: None,
            work_dir: None,
            partition: None,
            nodes: 1,
            gpus_per_node: 0,
            ntasks_per_node: 1,
            cpus_per_task: 1,
            memory_per_node: None,
            time_limit: None,
            conda: None,
            venv: None,
            sqsh: None,
            env_vars: BTreeMap::new(),
        }
    }

    pub fn command(name: &str, argv: &[&str]) -> Self {
        let mut task = Self::empty(name);
        task.command = Some(argv.iter().map(|s| s.to_string()).collect());
        Self { task }
    }

    pub fn script(name: &str, path: &str) -> Self {
        let mut task = Self::empty(name);
        task.path = Some(PathBuf::from(path));
        Self { task }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn gpus(mut self, n: u32) -> Self {
        self.task.gpus_per_node = n;
        self
    }

    pub fn conda(mut self, env: &str) -> Self {
        self.task.conda = Some(env.to_string());
        self
    }

    pub fn venv(mut self, path: &str) -> Self {
        self.task.venv = Some(path.to_string());
        self
    }

    pub fn env_var(mut self, key: &str, value: &str) -> Self {
        self.task.env_vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
