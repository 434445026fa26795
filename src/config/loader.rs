// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Workflow file looked up in the current directory when none is given.
pub const DEFAULT_WORKFLOW_FILE: &str = "Jobdag.toml";

/// Read a workflow file and deserialize it into a `RawWorkflowFile`.
///
/// No semantic checks happen here; see [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let workflow: RawWorkflowFile = toml::from_str(&contents)?;

    Ok(workflow)
}

/// Load a workflow file and run load-time validation.
///
/// - Reads TOML.
/// - Applies defaults (`serde` defaults on every section).
/// - Checks task fields and `[config]` values.
///
/// Dependency checks happen when the descriptors are turned into a
/// [`crate::dag::WorkflowGraph`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let raw = load_from_path(&path)?;
    let workflow = WorkflowFile::try_from(raw)?;
    Ok(workflow)
}
