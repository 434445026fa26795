// src/dag/readiness.rs

//! Which tasks can start right now.
//!
//! A task is *ready* when it is still `Pending` and every one of its
//! dependencies is `Completed`. The full scan is used once when a run is
//! seeded; after that, only the dependents of a task that just completed can
//! have changed, so [`newly_ready_after`] looks at those alone.
//!
//! No ordering is promised between tasks that become ready together. The
//! `BTreeSet` only makes logs stable.

use std::collections::BTreeSet;

use crate::dag::graph::WorkflowGraph;
use crate::dag::state::{StateSnapshot, TaskState};
use crate::engine::TaskName;

/// Whether `task` is ready under `snapshot`.
pub fn is_ready(graph: &WorkflowGraph, snapshot: &StateSnapshot, task: &str) -> bool {
    snapshot.is(task, TaskState::Pending)
        && graph
            .dependencies_of(task)
            .iter()
            .all(|dep| snapshot.is(dep, TaskState::Completed))
}

/// Full scan over every task in the graph.
pub fn ready_tasks(graph: &WorkflowGraph, snapshot: &StateSnapshot) -> BTreeSet<TaskName> {
    graph
        .tasks()
        .filter(|task| is_ready(graph, snapshot, task))
        .map(str::to_string)
        .collect()
}

/// Incremental scan after `completed` finished successfully.
///
/// Every dependent is re-checked against *all* of its dependencies, since a
/// task with several dependencies waits for the last of them.
pub fn newly_ready_after(
    graph: &WorkflowGraph,
    snapshot: &StateSnapshot,
    completed: &str,
) -> BTreeSet<TaskName> {
    graph
        .dependents_of(completed)
        .iter()
        .filter(|task| is_ready(graph, snapshot, task))
        .cloned()
        .collect()
}
