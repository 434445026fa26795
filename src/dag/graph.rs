// src/dag/graph.rs

use std::collections::HashMap;

use tracing::debug;

use crate::dag::task::TaskDescriptor;
use crate::engine::TaskName;
use crate::errors::GraphError;

/// Internal node structure: the descriptor plus its reverse edges.
#[derive(Debug, Clone)]
struct DagNode {
    descriptor: TaskDescriptor,
    /// Direct dependents: tasks that list this one in `depends_on`.
    dependents: Vec<TaskName>,
}

/// Validated, immutable task graph for one workflow run.
///
/// Construction goes through [`WorkflowGraph::build`], which rejects
/// duplicate names, dangling dependencies and cycles. Once built, the graph
/// (including the reverse-dependency index) is never mutated, so it can be
/// shared across tasks behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    /// Task names in declaration order.
    order: Vec<TaskName>,
    nodes: HashMap<TaskName, DagNode>,
}

impl WorkflowGraph {
    /// Validate `descriptors` and build the graph.
    ///
    /// Checks, in order: duplicate names, unknown dependencies, cycles.
    pub fn build(descriptors: Vec<TaskDescriptor>) -> Result<Self, GraphError> {
        let mut order = Vec::with_capacity(descriptors.len());
        let mut nodes: HashMap<TaskName, DagNode> = HashMap::with_capacity(descriptors.len());

        for mut descriptor in descriptors {
            if nodes.contains_key(&descriptor.name) {
                return Err(GraphError::DuplicateIdentity(descriptor.name));
            }

            // Keep `depends_on` an ordered set even if the caller built it by hand.
            let mut seen = Vec::with_capacity(descriptor.depends_on.len());
            descriptor.depends_on.retain(|dep| {
                if seen.contains(dep) {
                    false
                } else {
                    seen.push(dep.clone());
                    true
                }
            });

            order.push(descriptor.name.clone());
            nodes.insert(
                descriptor.name.clone(),
                DagNode {
                    descriptor,
                    dependents: Vec::new(),
                },
            );
        }

        for name in &order {
            for dep in &nodes[name].descriptor.depends_on {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycle(&order, &nodes)?;

        // Populate the reverse index. Walking `order` keeps each dependents
        // list in declaration order.
        for name in &order {
            let deps = nodes[name].descriptor.depends_on.clone();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        debug!(tasks = order.len(), "workflow graph validated");

        Ok(Self {
            name: "unnamed_workflow".to_string(),
            order,
            nodes,
        })
    }

    /// Attach a workflow name (used in logs and plan output).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// All task names, in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// All descriptors, in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.order.iter().map(|name| &self.nodes[name].descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Option<&TaskDescriptor> {
        self.nodes.get(name).map(|n| &n.descriptor)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.descriptor.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (the reverse-dependency index).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.tasks()
            .filter(|name| self.dependencies_of(name).is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Iterative depth-first search over dependency edges.
///
/// One shared mark per node keeps this O(V + E). Reaching a node that is
/// still `OnStack` closes a cycle; the cycle is read off the explicit stack.
fn detect_cycle(order: &[TaskName], nodes: &HashMap<TaskName, DagNode>) -> Result<(), GraphError> {
    let index: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let deps: Vec<Vec<usize>> = order
        .iter()
        .map(|name| {
            nodes[name]
                .descriptor
                .depends_on
                .iter()
                .map(|dep| index[dep.as_str()])
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; order.len()];
    // (node, index of the next dependency to explore)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..order.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }

        marks[start] = Mark::OnStack;
        stack.push((start, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;

            if next < deps[node].len() {
                top.1 += 1;
                let dep = deps[node][next];

                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnStack;
                        stack.push((dep, 0));
                    }
                    Mark::OnStack => {
                        let from = stack
                            .iter()
                            .position(|(n, _)| *n == dep)
                            .unwrap_or(0);
                        let mut cycle: Vec<TaskName> = stack[from..]
                            .iter()
                            .map(|(n, _)| order[*n].clone())
                            .collect();
                        cycle.push(order[dep].clone());

                        return Err(GraphError::CyclicDependency {
                            task: order[dep].clone(),
                            cycle,
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }

    Ok(())
}
