// src/dag/mod.rs

//! Workflow graph model and per-run task state.
//!
//! - [`task`] holds task descriptors and their work payloads.
//! - [`graph`] validates descriptors into an immutable [`WorkflowGraph`].
//! - [`state`] is the thread-safe task lifecycle tracker.
//! - [`readiness`] decides which pending tasks may start.
//! - [`plan`] computes execution levels for dry-run output.

pub mod graph;
pub mod plan;
pub mod readiness;
pub mod state;
pub mod task;

pub use graph::WorkflowGraph;
pub use plan::ExecutionPlan;
pub use state::{StateSnapshot, TaskState, TaskStateMachine};
pub use task::{CommandWork, JobEnvironment, JobResource, ScriptWork, TaskDescriptor, WorkPayload};

use crate::errors::GraphError;

/// Validate descriptors and build the graph without running anything.
pub fn build_graph(descriptors: Vec<TaskDescriptor>) -> Result<WorkflowGraph, GraphError> {
    WorkflowGraph::build(descriptors)
}
