// src/config/mod.rs

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{DEFAULT_WORKFLOW_FILE, load_and_validate, load_from_path};
pub use model::{ConfigSection, DefaultSection, RawWorkflowFile, TaskConfig, WorkflowFile};
