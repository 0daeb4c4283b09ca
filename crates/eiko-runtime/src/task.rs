//! Tasks and the frozen task graph.

use std::sync::Arc;

use eiko_compiler::value::ResourceCell;
use indexmap::IndexMap;

use crate::handler::Handler;

/// Lifecycle of one task during deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Deployed,
    Failed,
    /// A predecessor failed (or the deploy was cancelled) before this
    /// task could start.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Deployed | TaskState::Failed | TaskState::Skipped)
    }
}

/// One unit of deployable work, 1-to-1 with a handled resource.
pub struct Task {
    /// Stable id: the resource index.
    pub id: String,
    pub resource: Arc<ResourceCell>,
    pub handler: Arc<dyn Handler>,
    /// Ids of tasks that must reach `Deployed`/`Skipped` first.
    pub depends_on: Vec<String>,
    /// Ids of tasks waiting on this one.
    pub dependants: Vec<String>,
}

/// The exporter's output: a frozen DAG of tasks.
pub struct TaskGraph {
    tasks: IndexMap<String, Task>,
    pub total_tasks: usize,
}

impl TaskGraph {
    pub(crate) fn new(tasks: IndexMap<String, Task>) -> Self {
        let total_tasks = tasks.len();
        Self { tasks, total_tasks }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.tasks.keys()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks with no predecessors; deployment starts here.
    pub fn base_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.depends_on.is_empty())
            .collect()
    }

    /// All `(predecessor, dependant)` pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                edges.push((dep.clone(), task.id.clone()));
            }
        }
        edges
    }
}
