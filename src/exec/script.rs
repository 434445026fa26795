// src/exec/script.rs

//! Job script rendering for command payloads.
//!
//! The same environment/command body is used by both backends; the Slurm
//! flavour adds `#SBATCH` directives and launches through `srun`.

use std::sync::LazyLock;

use regex::Regex;

use crate::dag::{CommandWork, JobEnvironment};
use crate::exec::backend::BackendError;

static ENV_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"));

/// Whether `key` can be used as a shell variable name.
pub fn is_valid_env_key(key: &str) -> bool {
    ENV_KEY_RE.is_match(key)
}

/// `task` as a Slurm job name: anything outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn job_name(task: &str) -> String {
    task.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_.-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Quote `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn render_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `export` lines followed by environment activation.
fn environment_lines(env: &JobEnvironment) -> Result<Vec<String>, BackendError> {
    let mut lines = Vec::with_capacity(env.env_vars.len() + 2);
    for (key, value) in &env.env_vars {
        if !is_valid_env_key(key) {
            return Err(BackendError::Unsupported(format!(
                "environment variable name '{key}' is not a valid identifier"
            )));
        }
        lines.push(format!("export {key}={}", shell_quote(value)));
    }

    if let Some(conda) = &env.conda {
        lines.push(r#"eval "$(conda shell.bash hook)""#.to_string());
        lines.push(format!("conda activate {}", shell_quote(conda)));
    }
    if let Some(venv) = &env.venv {
        lines.push(format!(". {}/bin/activate", shell_quote(venv)));
    }

    Ok(lines)
}

/// Script for running `work` directly on this machine.
pub fn render_local_script(work: &CommandWork) -> Result<String, BackendError> {
    if let Some(sqsh) = &work.environment.sqsh {
        return Err(BackendError::Unsupported(format!(
            "container image '{sqsh}' requires the slurm backend"
        )));
    }
    if work.argv.is_empty() {
        return Err(BackendError::Unsupported("empty command".to_string()));
    }

    let mut lines = vec!["set -e".to_string()];
    if let Some(dir) = &work.work_dir {
        lines.push(format!("cd {}", shell_quote(dir)));
    }
    lines.extend(environment_lines(&work.environment)?);
    lines.push(format!("exec {}", render_command_line(&work.argv)));

    Ok(lines.join("\n") + "\n")
}

/// Batch script for submitting `work` to Slurm, named after `task`.
pub fn render_sbatch_script(task: &str, work: &CommandWork) -> Result<String, BackendError> {
    let res = &work.resources;

    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={}", job_name(task)),
        format!("#SBATCH --nodes={}", res.nodes),
        format!("#SBATCH --ntasks-per-node={}", res.ntasks_per_node),
        format!("#SBATCH --cpus-per-task={}", res.cpus_per_task),
    ];
    if res.gpus_per_node > 0 {
        lines.push(format!("#SBATCH --gpus-per-node={}", res.gpus_per_node));
    }
    if let Some(mem) = &res.memory_per_node {
        lines.push(format!("#SBATCH --mem={mem}"));
    }
    if let Some(time) = &res.time_limit {
        lines.push(format!("#SBATCH --time={time}"));
    }
    if let Some(partition) = &work.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    lines.push(format!("#SBATCH --output={}/%x_%j.log", work.log_dir));
    lines.push(format!("#SBATCH --error={}/%x_%j.log", work.log_dir));
    if let Some(dir) = &work.work_dir {
        lines.push(format!("#SBATCH --chdir={dir}"));
    }

    lines.push(String::new());
    lines.push("set -e".to_string());
    lines.extend(environment_lines(&work.environment)?);

    let command = render_command_line(&work.argv);
    match &work.environment.sqsh {
        Some(image) => lines.push(format!(
            "srun --container-image={} {command}",
            shell_quote(image)
        )),
        None => lines.push(format!("srun {command}")),
    }

    Ok(lines.join("\n") + "\n")
}
