use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use weft_core::artifact::Artifact;
use weft_core::config::StructureConfig;
use weft_core::context::TaskContext;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventDispatcher;
use weft_core::traits::EventSink;

use crate::base::{RunState, RunSummary, StructureBase};
use crate::memory::ConversationMemory;
use crate::node::TaskNode;

/// A structure that runs its tasks one after another.
///
/// Every task's single parent is the task before it. The first error
/// artifact stops the run.
#[derive(Debug)]
pub struct Pipeline {
    base: StructureBase,
    tasks: Vec<TaskNode>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            base: StructureBase::new(),
            tasks: vec![],
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.base.id = id.into();
        self
    }

    pub fn with_config(mut self, config: &StructureConfig) -> Self {
        if config.conversation_memory && self.base.memory.is_none() {
            self.base.memory = Some(ConversationMemory::new());
        }
        self
    }

    pub fn with_conversation_memory(mut self, memory: ConversationMemory) -> Self {
        self.base.memory = Some(memory);
        self
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn run_state(&self) -> RunState {
        self.base.state
    }

    pub fn conversation_memory(&self) -> Option<&ConversationMemory> {
        self.base.memory.as_ref()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.base.events
    }

    pub fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) -> Arc<dyn EventSink> {
        self.base.add_event_sink(sink)
    }

    pub fn remove_event_sink(&mut self, sink: &Arc<dyn EventSink>) -> bool {
        self.base.remove_event_sink(sink)
    }

    /// Append a task under the current last task. Declared relationships
    /// on the node are replaced.
    pub fn add_task(&mut self, mut node: TaskNode) -> Result<String> {
        if self.find_task(node.id()).is_some() {
            return Err(WeftError::DuplicateTask(node.id().to_string()));
        }
        node.set_parent(self.tasks.last().map(|t| t.id().to_string()));
        let id = node.id().to_string();
        self.tasks.push(node);
        Ok(id)
    }

    /// Append several tasks in order. Nothing is attached if any id is
    /// already taken or repeated in the batch.
    pub fn add_tasks(&mut self, nodes: Vec<TaskNode>) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        for node in &nodes {
            if self.index_of(node.id()).is_some() || !seen.insert(node.id()) {
                return Err(WeftError::DuplicateTask(node.id().to_string()));
            }
        }
        nodes.into_iter().map(|node| self.add_task(node)).collect()
    }

    /// Splice a task in right after `parent_id`.
    pub fn insert_task(&mut self, parent_id: &str, mut node: TaskNode) -> Result<String> {
        let idx = self
            .index_of(parent_id)
            .ok_or_else(|| WeftError::TaskNotFound(parent_id.to_string()))?;
        if self.find_task(node.id()).is_some() {
            return Err(WeftError::DuplicateTask(node.id().to_string()));
        }

        let id = node.id().to_string();
        node.set_parent(Some(parent_id.to_string()));
        if let Some(next) = self.tasks.get_mut(idx + 1) {
            next.set_parent(Some(id.clone()));
        }
        self.tasks.insert(idx + 1, node);
        Ok(id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == id)
    }

    pub fn find_task(&self, id: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn tasks(&self) -> &[TaskNode] {
        &self.tasks
    }

    pub fn input_task(&self) -> Option<&TaskNode> {
        self.tasks.first()
    }

    pub fn output_task(&self) -> Option<&TaskNode> {
        self.tasks.last()
    }

    pub fn output(&self) -> Option<&Artifact> {
        self.output_task().and_then(TaskNode::output)
    }

    pub fn finished_tasks(&self) -> Vec<&TaskNode> {
        self.tasks.iter().filter(|t| t.is_finished()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(TaskNode::is_finished)
    }

    pub fn is_executing(&self) -> bool {
        self.tasks.iter().any(TaskNode::is_executing)
    }

    pub fn context(&self, id: &str) -> Result<TaskContext> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| WeftError::TaskNotFound(id.to_string()))?;
        Ok(self.context_at(idx))
    }

    fn context_at(&self, idx: usize) -> TaskContext {
        let neighbour_ids = |i: usize| -> Vec<String> {
            self.tasks
                .get(i + 1)
                .map(|t| vec![t.id().to_string()])
                .unwrap_or_default()
        };
        let parents = idx
            .checked_sub(1)
            .map(|p| vec![self.tasks[p].view(neighbour_ids(p))])
            .unwrap_or_default();
        let children = self
            .tasks
            .get(idx + 1)
            .map(|c| vec![c.view(neighbour_ids(idx + 1))])
            .unwrap_or_default();
        self.base
            .context(self.tasks[idx].id())
            .with_neighbours(parents, children)
    }

    /// Run the tasks in order, stopping at the first error artifact.
    pub async fn run(&mut self, args: Vec<String>) -> Result<RunSummary> {
        if self.tasks.is_empty() {
            return Err(WeftError::EmptyStructure);
        }
        for task in &mut self.tasks {
            task.reset();
        }
        self.base.before_run(args);

        let start = Instant::now();
        let mut executed = Vec::with_capacity(self.tasks.len());
        let mut failure = None;

        for idx in 0..self.tasks.len() {
            let ctx = self.context_at(idx);
            let output = self.tasks[idx].execute(ctx).await;
            let task_id = self.tasks[idx].id().to_string();
            executed.push(task_id.clone());

            if output.is_error() {
                warn!(structure_id = %self.base.id, task_id = %task_id, "Task failed, stopping pipeline");
                failure = Some((task_id, output));
                break;
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (state, failed_task, output) = match failure {
            Some((task_id, error)) => (RunState::Aborted, Some(task_id), Some(error)),
            None => (RunState::Finished, None, self.output().cloned()),
        };
        self.base.state = state;
        info!(
            structure_id = %self.base.id,
            state = %state,
            executed = executed.len(),
            elapsed_ms,
            "Pipeline finished"
        );

        let input = self
            .input_task()
            .and_then(TaskNode::input)
            .map(Artifact::to_text);
        self.base.after_run(input, output.as_ref());

        Ok(RunSummary {
            state,
            executed,
            output,
            failed_task,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::CodeTask;

    fn echo_parent(id: &str) -> TaskNode {
        let owned = id.to_string();
        TaskNode::new(CodeTask::from_fn(move |ctx| {
            let upstream = ctx.parent_outputs.values().next().cloned().unwrap_or_default();
            Ok(Artifact::text(format!("{upstream}{owned}")))
        }))
        .with_id(id)
    }

    #[test]
    fn test_add_task_chains() {
        let mut p = Pipeline::new();
        p.add_tasks(vec![echo_parent("a"), echo_parent("b").with_parent_ids(["x"])])
            .unwrap();
        assert!(p.tasks()[0].parent_ids().is_empty());
        assert_eq!(p.tasks()[1].parent_ids(), ["a"]);
    }

    #[test]
    fn test_add_tasks_attaches_nothing_on_duplicate() {
        let mut p = Pipeline::new();
        let err = p
            .add_tasks(vec![echo_parent("a"), echo_parent("b"), echo_parent("a")])
            .unwrap_err();
        assert!(matches!(err, WeftError::DuplicateTask(id) if id == "a"));
        assert!(p.tasks().is_empty());

        p.add_task(echo_parent("x")).unwrap();
        let err = p
            .add_tasks(vec![echo_parent("y"), echo_parent("x")])
            .unwrap_err();
        assert!(matches!(err, WeftError::DuplicateTask(id) if id == "x"));
        let ids: Vec<&str> = p.tasks().iter().map(TaskNode::id).collect();
        assert_eq!(ids, ["x"]);
    }

    #[test]
    fn test_insert_task_rewires_next() {
        let mut p = Pipeline::new();
        p.add_tasks(vec![echo_parent("a"), echo_parent("c")]).unwrap();
        p.insert_task("a", echo_parent("b")).unwrap();

        let ids: Vec<&str> = p.tasks().iter().map(TaskNode::id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(p.tasks()[1].parent_ids(), ["a"]);
        assert_eq!(p.tasks()[2].parent_ids(), ["b"]);
    }

    #[tokio::test]
    async fn test_run_passes_outputs_down() {
        let mut p = Pipeline::new().with_conversation_memory(ConversationMemory::new());
        p.add_tasks(vec![echo_parent("a"), echo_parent("b"), echo_parent("c")])
            .unwrap();

        let summary = p.run(vec![]).await.unwrap();

        assert_eq!(summary.state, RunState::Finished);
        assert_eq!(summary.executed, ["a", "b", "c"]);
        assert_eq!(summary.output, Some(Artifact::text("abc")));
        assert_eq!(p.conversation_memory().unwrap().last_run().unwrap().output, "abc");
    }

    #[tokio::test]
    async fn test_run_stops_at_first_error() {
        let mut p = Pipeline::new();
        p.add_task(echo_parent("a")).unwrap();
        p.add_task(
            TaskNode::new(CodeTask::from_fn(|_| Ok(Artifact::error("nope")))).with_id("b"),
        )
        .unwrap();
        p.add_task(echo_parent("c")).unwrap();

        let summary = p.run(vec![]).await.unwrap();

        assert!(summary.is_aborted());
        assert_eq!(summary.failed_task.as_deref(), Some("b"));
        assert_eq!(summary.executed, ["a", "b"]);
        assert!(p.find_task("c").unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let mut p = Pipeline::new();
        assert!(matches!(p.run(vec![]).await, Err(WeftError::EmptyStructure)));
    }
}
