// src/exec/logs.rs

//! Locating and reading Slurm job log files.
//!
//! Slurm writes logs wherever the batch script told it to, so we search a
//! few directories for the usual naming schemes. Earlier directories and
//! earlier patterns win.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

/// Characters with a meaning in glob syntax.
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '\\', '!'];

/// File name patterns for a job, most specific first.
pub fn log_file_patterns(job_id: u64, job_name: Option<&str>) -> Vec<String> {
    let mut patterns = Vec::new();

    // Job names containing glob syntax cannot be matched literally.
    if let Some(name) = job_name.filter(|n| !n.contains(GLOB_META)) {
        patterns.push(format!("{name}_{job_id}.log"));
        patterns.push(format!("{name}_{job_id}.out"));
    }

    patterns.extend([
        format!("*_{job_id}.log"),
        format!("*_{job_id}.out"),
        format!("slurm-{job_id}.out"),
        format!("slurm-{job_id}.err"),
        format!("job_{job_id}.log"),
        format!("{job_id}.log"),
    ]);

    patterns
}

/// Directories to search: `$SLURM_LOG_DIR`, the task's log dir, then `.`.
pub fn default_log_dirs(task_log_dir: Option<&str>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = env::var("SLURM_LOG_DIR") {
        if !dir.is_empty() {
            dirs.push(PathBuf::from(dir));
        }
    }
    if let Some(dir) = task_log_dir {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("."));
    dirs
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid log file pattern; skipping");
            }
        }
    }
    builder.build().ok()
}

/// Every log file for the job found in `dirs`, best match first.
pub fn find_log_files(dirs: &[PathBuf], job_id: u64, job_name: Option<&str>) -> Vec<PathBuf> {
    let patterns = log_file_patterns(job_id, job_name);
    let Some(set) = build_globset(&patterns) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping log directory");
                continue;
            }
        };

        let mut in_dir: Vec<(usize, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?.to_string();
                let best = set.matches(&file_name).into_iter().min()?;
                Some((best, path))
            })
            .collect();
        in_dir.sort();

        for (_, path) in in_dir {
            if !found.iter().any(|p| same_file(p, &path)) {
                found.push(path);
            }
        }
    }

    found
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Contents of the job's primary log file, if one can be found.
pub fn read_job_output(dirs: &[PathBuf], job_id: u64, job_name: Option<&str>) -> Option<String> {
    let files = find_log_files(dirs, job_id, job_name);
    let primary = files.first()?;

    match fs::read_to_string(primary) {
        Ok(contents) => Some(contents),
        Err(e) => {
            warn!(path = %primary.display(), error = %e, "failed to read job log file");
            None
        }
    }
}

/// Last `n` lines of `text`.
pub fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
