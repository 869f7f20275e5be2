use std::collections::BTreeMap;

use serde_json::json;

use crate::event::{EventDispatcher, EventPayload};
use crate::types::TaskView;

/// Read-only snapshot assembled for a task right before it executes.
///
/// Holds the structure's invocation arguments and, inside a workflow or
/// pipeline, the outputs of the task's parents plus views of its neighbours.
/// Changing the graph through a context is not possible.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_id: String,
    pub structure_id: String,
    pub args: Vec<String>,
    /// Parent id → parent output text (empty when the parent produced nothing).
    pub parent_outputs: BTreeMap<String, String>,
    pub parents: BTreeMap<String, TaskView>,
    pub children: BTreeMap<String, TaskView>,
    events: EventDispatcher,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        structure_id: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            structure_id: structure_id.into(),
            args,
            ..Default::default()
        }
    }

    /// Attach neighbour views. Parent outputs are derived from the parents.
    pub fn with_neighbours(mut self, parents: Vec<TaskView>, children: Vec<TaskView>) -> Self {
        self.parent_outputs = parents
            .iter()
            .map(|p| (p.id.clone(), p.output_text()))
            .collect();
        self.parents = parents.into_iter().map(|p| (p.id.clone(), p)).collect();
        self.children = children.into_iter().map(|c| (c.id.clone(), c)).collect();
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn parent_output(&self, parent_id: &str) -> Option<&str> {
        self.parent_outputs.get(parent_id).map(String::as_str)
    }

    /// Publish an event to the owning structure's sinks.
    pub fn publish(&self, payload: EventPayload) {
        self.events.publish(payload);
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// JSON view used as template context.
    pub fn to_value(&self) -> serde_json::Value {
        json!({
            "task_id": self.task_id,
            "structure_id": self.structure_id,
            "args": self.args,
            "parent_outputs": self.parent_outputs,
            "parents": self.parents,
            "children": self.children,
        })
    }
}
