use std::sync::Arc;

use tracing::warn;

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::error::WeftError;
use weft_core::traits::Task;
use weft_core::types::{new_id, TaskState, TaskView};

use crate::execution::{run_task, TaskOutcome};

/// A task attached (or about to be attached) to a structure.
///
/// The node owns identity, relationships, and run state; the wrapped
/// [`Task`] owns the work. Edges are stored once, as this node's parent ids.
/// Child ids are derived by the owning structure. Children declared with
/// [`TaskNode::with_child_ids`] are folded into the children's parent lists
/// when the structure resolves its relationships.
pub struct TaskNode {
    id: String,
    parent_ids: Vec<String>,
    declared_child_ids: Vec<String>,
    state: TaskState,
    input: Option<Artifact>,
    output: Option<Artifact>,
    task: Arc<dyn Task>,
}

impl TaskNode {
    pub fn new(task: impl Task) -> Self {
        Self::from_arc(Arc::new(task))
    }

    pub fn from_arc(task: Arc<dyn Task>) -> Self {
        Self {
            id: new_id(),
            parent_ids: vec![],
            declared_child_ids: vec![],
            state: TaskState::Pending,
            input: None,
            output: None,
            task,
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Declare tasks this one depends on.
    pub fn with_parent_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.add_parent(id);
        }
        self
    }

    /// Declare tasks that depend on this one.
    pub fn with_child_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if !self.declared_child_ids.contains(&id) {
                self.declared_child_ids.push(id);
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        self.task.kind()
    }

    pub fn parent_ids(&self) -> &[String] {
        &self.parent_ids
    }

    /// Child declarations not yet folded into the graph.
    pub fn declared_child_ids(&self) -> &[String] {
        &self.declared_child_ids
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn input(&self) -> Option<&Artifact> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Artifact> {
        self.output.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn is_executing(&self) -> bool {
        self.state == TaskState::Executing
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// True iff this task is pending and every given parent has finished,
    /// successfully or not.
    pub fn can_execute<'a>(&self, parents: impl IntoIterator<Item = &'a TaskNode>) -> bool {
        self.is_pending() && parents.into_iter().all(TaskNode::is_finished)
    }

    /// Shared handle to the wrapped behaviour.
    pub fn behaviour(&self) -> Arc<dyn Task> {
        self.task.clone()
    }

    /// Read-only snapshot. `child_ids` comes from the owning structure.
    pub fn view(&self, child_ids: Vec<String>) -> TaskView {
        TaskView {
            id: self.id.clone(),
            kind: self.kind().to_string(),
            parent_ids: self.parent_ids.clone(),
            child_ids,
            state: self.state,
            output: self.output.clone(),
        }
    }

    /// Run this task in place: `Pending → Executing → Finished | Errored`.
    ///
    /// Returns the stored output. A task that is not pending is left
    /// untouched and an error artifact is returned.
    pub async fn execute(&mut self, ctx: TaskContext) -> Artifact {
        if !self.is_pending() {
            warn!(task_id = %self.id, state = %self.state, "Refusing to execute non-pending task");
            return Artifact::from(WeftError::TaskExecution {
                task_id: self.id.clone(),
                message: format!("task is {}, not pending", self.state),
            });
        }
        self.mark_executing();
        let outcome = run_task(self.behaviour(), ctx).await;
        let output = outcome.output.clone();
        self.complete(outcome);
        output
    }

    pub(crate) fn add_parent(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.parent_ids.contains(&id) {
            return false;
        }
        self.parent_ids.push(id);
        true
    }

    pub(crate) fn remove_parent(&mut self, id: &str) -> bool {
        let before = self.parent_ids.len();
        self.parent_ids.retain(|p| p != id);
        self.parent_ids.len() != before
    }

    pub(crate) fn set_parent(&mut self, id: Option<String>) {
        self.parent_ids = id.into_iter().collect();
        self.declared_child_ids.clear();
    }

    pub(crate) fn remove_declared_child(&mut self, id: &str) {
        self.declared_child_ids.retain(|c| c != id);
    }

    pub(crate) fn take_declared_child_ids(&mut self) -> Vec<String> {
        std::mem::take(&mut self.declared_child_ids)
    }

    pub(crate) fn mark_executing(&mut self) {
        self.state = TaskState::Executing;
    }

    pub(crate) fn complete(&mut self, outcome: TaskOutcome) {
        self.state = if outcome.output.is_error() {
            TaskState::Errored
        } else {
            TaskState::Finished
        };
        self.input = outcome.input;
        self.output = Some(outcome.output);
    }

    pub(crate) fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.input = None;
        self.output = None;
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("parent_ids", &self.parent_ids)
            .field("declared_child_ids", &self.declared_child_ids)
            .field("state", &self.state)
            .field("output", &self.output)
            .finish()
    }
}
