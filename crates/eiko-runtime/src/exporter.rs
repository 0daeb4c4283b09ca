//! The exporter lowers a compiled object graph into a task DAG.
//!
//! Every handled resource becomes a task. Resources without a handler do
//! not deploy; their dependencies pass through to whoever references
//! them. Promise consumption adds an edge to the slot owner's task.

use std::sync::Arc;

use eiko_compiler::value::{ResourceCell, Value};
use eiko_compiler::Compilation;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::task::{Task, TaskGraph};

/// Build the task graph for a compilation.
#[instrument(skip_all, name = "export")]
pub fn export(compilation: &Compilation, registry: &HandlerRegistry) -> Result<TaskGraph> {
    let mut builder = Builder {
        registry,
        built: IndexMap::new(),
    };
    for resource in &compilation.resources {
        builder.visit(resource)?;
    }

    // Keep only handled resources as tasks; dependencies were already
    // flattened through the unhandled ones.
    let mut tasks: IndexMap<String, Task> = IndexMap::new();
    for (_, node) in builder.built.iter() {
        if !node.handled {
            continue;
        }
        tasks.insert(
            node.id.clone(),
            Task {
                id: node.id.clone(),
                resource: node.resource.clone(),
                handler: registry
                    .make(&node.resource.def.name)
                    .ok_or_else(|| Error::export("handler disappeared during export"))?,
                depends_on: node.depends_on.iter().cloned().collect(),
                dependants: Vec::new(),
            },
        );
    }

    // Invert edges for the scheduler.
    let pairs: Vec<(String, String)> = tasks
        .values()
        .flat_map(|t| {
            t.depends_on
                .iter()
                .map(|dep| (dep.clone(), t.id.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    for (dep, dependant) in pairs {
        if let Some(task) = tasks.get_mut(&dep) {
            task.dependants.push(dependant);
        }
    }

    check_acyclic(&tasks)?;
    let graph = TaskGraph::new(tasks);
    debug!(tasks = graph.total_tasks, "task graph exported");
    Ok(graph)
}

struct Node {
    id: String,
    resource: Arc<ResourceCell>,
    handled: bool,
    /// Ids of handled tasks this one depends on (already flattened).
    depends_on: IndexSet<String>,
}

struct Builder<'a> {
    registry: &'a HandlerRegistry,
    built: IndexMap<String, Node>,
}

impl Builder<'_> {
    /// Visit one resource, creating its node and everything it references.
    /// Returns `(handled, id, flattened dependency ids)`.
    fn visit(&mut self, resource: &Arc<ResourceCell>) -> Result<(bool, String, IndexSet<String>)> {
        let id = resource
            .index()
            .ok_or_else(|| Error::export("encountered a resource without an index"))?
            .to_string();

        if let Some(node) = self.built.get(&id) {
            return Ok((node.handled, node.id.clone(), node.depends_on.clone()));
        }

        let handled = self.registry.contains(&resource.def.name);
        let mut depends_on: IndexSet<String> = IndexSet::new();

        for (_, value) in resource.properties() {
            self.visit_value(&value, &mut depends_on)?;
        }

        // A consumed promise means the owner's task must run first.
        for (name, promise) in resource.external_promises() {
            let owner = promise.owner_cell().ok_or_else(|| {
                Error::export(format!("promise '{name}' has no owning resource"))
            })?;
            let (owner_handled, owner_id, _) = self.visit(&owner)?;
            if !owner_handled {
                return Err(Error::export(format!(
                    "task '{id}' depends on promise '{owner_id}.{name}', \
                     but that resource has no handler"
                )));
            }
            depends_on.insert(owner_id);
        }

        let node = Node {
            id: id.clone(),
            resource: resource.clone(),
            handled,
            depends_on: depends_on.clone(),
        };
        self.built.insert(id.clone(), node);
        Ok((handled, id, depends_on))
    }

    /// Walk a property value, adding task dependencies for every resource
    /// reference found directly or nested inside containers.
    fn visit_value(&mut self, value: &Value, depends_on: &mut IndexSet<String>) -> Result<()> {
        match value {
            Value::Resource(child) => {
                let (handled, id, child_deps) = self.visit(child)?;
                if handled {
                    depends_on.insert(id);
                } else {
                    // Pass-through: inherit the unhandled child's deps.
                    depends_on.extend(child_deps);
                }
            }
            Value::List(cell) => {
                for element in cell.elements() {
                    self.visit_value(&element, depends_on)?;
                }
            }
            Value::Dict(cell) => {
                for (_, element) in cell.entries() {
                    self.visit_value(&element, depends_on)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Kahn's algorithm; anything left over sits on a cycle.
fn check_acyclic(tasks: &IndexMap<String, Task>) -> Result<()> {
    let mut in_degree: IndexMap<&str, usize> = tasks
        .values()
        .map(|t| (t.id.as_str(), t.depends_on.len()))
        .collect();

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut processed = 0;

    while let Some(id) = queue.pop() {
        processed += 1;
        let task = &tasks[id];
        for dependant in &task.dependants {
            let degree = in_degree
                .get_mut(dependant.as_str())
                .expect("dependant edges point at known tasks");
            *degree -= 1;
            if *degree == 0 {
                queue.push(dependant.as_str());
            }
        }
    }

    if processed != tasks.len() {
        let mut cycle: Vec<String> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        cycle.sort();
        return Err(Error::ExportCycle { tasks: cycle });
    }
    Ok(())
}
