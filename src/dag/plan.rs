// src/dag/plan.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::graph::WorkflowGraph;
use crate::engine::TaskName;
use crate::errors::GraphError;

/// Execution levels of a workflow, for dry-run output.
///
/// Level 0 holds the roots; every other task sits one level below its
/// deepest dependency. Tasks on the same level have no dependency path
/// between them. The scheduler itself does not run level by level: it starts
/// a task as soon as its own dependencies are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<TaskName>>,
}

impl ExecutionPlan {
    pub fn from_graph(graph: &WorkflowGraph) -> Result<Self, GraphError> {
        // Edge direction: dep -> task.
        let mut dag: DiGraphMap<&str, ()> = DiGraphMap::new();
        for task in graph.tasks() {
            dag.add_node(task);
        }
        for task in graph.tasks() {
            for dep in graph.dependencies_of(task) {
                dag.add_edge(dep.as_str(), task, ());
            }
        }

        let order = toposort(&dag, None).map_err(|cycle| {
            let task = cycle.node_id().to_string();
            GraphError::CyclicDependency {
                task: task.clone(),
                cycle: vec![task.clone(), task],
            }
        })?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<TaskName>> = Vec::new();

        for task in order {
            let level = graph
                .dependencies_of(task)
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(task, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(task.to_string());
        }

        // Within a level, keep declaration order for readable output.
        let position: HashMap<&str, usize> =
            graph.tasks().enumerate().map(|(i, t)| (t, i)).collect();
        for level in &mut levels {
            level.sort_by_key(|t| position.get(t.as_str()).copied().unwrap_or(usize::MAX));
        }

        Ok(Self { levels })
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Level of `task`, if it is part of the plan.
    pub fn level_of(&self, task: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|t| t == task))
    }
}
