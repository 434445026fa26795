// src/config/validate.rs

use crate::config::duration::parse_duration;
use crate::config::model::{RawWorkflowFile, TaskConfig, WorkflowFile};
use crate::errors::{JobdagError, Result};
use crate::exec::script::is_valid_env_key;

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = JobdagError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_global_config(&raw)?;
        for task in &raw.task {
            validate_task(task)?;
        }

        let poll_interval = parse_duration(&raw.config.poll_interval).map_err(|e| {
            JobdagError::ConfigError(format!("[config].poll_interval: {e}"))
        })?;

        Ok(WorkflowFile::new_unchecked(raw, poll_interval))
    }
}

fn ensure_has_tasks(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(JobdagError::ConfigError(
            "workflow must contain at least one [[task]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.config.max_concurrency == 0 {
        return Err(JobdagError::ConfigError(
            "[config].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task(task: &TaskConfig) -> Result<()> {
    if task.name.trim().is_empty() {
        return Err(JobdagError::ConfigError(
            "every [[task]] needs a non-empty `name`".to_string(),
        ));
    }

    let name = &task.name;

    match (&task.command, &task.path) {
        (Some(_), Some(_)) => {
            return Err(JobdagError::ConfigError(format!(
                "task '{name}' sets both `command` and `path`; choose one"
            )));
        }
        (None, None) => {
            return Err(JobdagError::ConfigError(format!(
                "task '{name}' needs either `command` or `path`"
            )));
        }
        (Some(command), None) if command.is_empty() => {
            return Err(JobdagError::ConfigError(format!(
                "task '{name}' has an empty `command`"
            )));
        }
        _ => {}
    }

    for (field, value) in [
        ("nodes", task.nodes),
        ("ntasks_per_node", task.ntasks_per_node),
        ("cpus_per_task", task.cpus_per_task),
    ] {
        if value == 0 {
            return Err(JobdagError::ConfigError(format!(
                "task '{name}': `{field}` must be >= 1 (got 0)"
            )));
        }
    }

    let environments = [&task.conda, &task.venv, &task.sqsh]
        .iter()
        .filter(|env| env.is_some())
        .count();
    if environments > 1 {
        return Err(JobdagError::ConfigError(format!(
            "task '{name}': set at most one of `conda`, `venv` and `sqsh`"
        )));
    }

    if let Some(key) = task.env_vars.keys().find(|key| !is_valid_env_key(key)) {
        return Err(JobdagError::ConfigError(format!(
            "task '{name}': environment variable name '{key}' is not a valid identifier"
        )));
    }

    Ok(())
}
