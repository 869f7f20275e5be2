use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use weft_core::artifact::Artifact;
use weft_core::config::StructureConfig;
use weft_core::context::TaskContext;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventDispatcher;
use weft_core::traits::EventSink;

use crate::base::{RunState, RunSummary, StructureBase};
use crate::execution::{run_task, TaskOutcome};
use crate::graph::{self, TaskGraph};
use crate::memory::ConversationMemory;
use crate::node::TaskNode;

/// A structure that runs its tasks as a dependency graph.
///
/// Tasks whose parents have all finished run concurrently, up to
/// `max_workers` at a time. The first error artifact aborts the run: nothing
/// new is submitted and in-flight tasks drain.
#[derive(Debug)]
pub struct Workflow {
    base: StructureBase,
    tasks: Vec<TaskNode>,
    max_workers: usize,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self {
            base: StructureBase::new(),
            tasks: vec![],
            max_workers: StructureConfig::default().max_workers(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.base.id = id.into();
        self
    }

    pub fn with_config(mut self, config: &StructureConfig) -> Self {
        self.max_workers = config.max_workers();
        if config.conversation_memory && self.base.memory.is_none() {
            self.base.memory = Some(ConversationMemory::new());
        }
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    pub fn with_conversation_memory(mut self, memory: ConversationMemory) -> Self {
        self.base.memory = Some(memory);
        self
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
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

    // --- Task management ---

    /// Attach a task with exactly the relationships it declares.
    pub fn add_task(&mut self, node: TaskNode) -> Result<String> {
        if self.index_of(node.id()).is_some() {
            return Err(WeftError::DuplicateTask(node.id().to_string()));
        }
        let id = node.id().to_string();
        debug!(structure_id = %self.base.id, task_id = %id, kind = %node.kind(), "Task added");
        self.tasks.push(node);
        Ok(id)
    }

    /// Attach several tasks. Nothing is attached if any id is taken.
    pub fn add_tasks(&mut self, nodes: Vec<TaskNode>) -> Result<Vec<String>> {
        self.check_new_ids(&nodes)?;
        nodes.into_iter().map(|node| self.add_task(node)).collect()
    }

    /// Insert `node` between `parent_id` and `child_id`.
    ///
    /// The node is placed right after the parent in the task list. Unless
    /// `preserve_relationship` is set, the direct parent → child edge is
    /// removed.
    pub fn insert_task(
        &mut self,
        parent_id: &str,
        node: TaskNode,
        child_id: &str,
        preserve_relationship: bool,
    ) -> Result<String> {
        let id = node.id().to_string();
        self.insert_tasks(parent_id, vec![node], child_id, preserve_relationship)?;
        Ok(id)
    }

    /// Insert several tasks side by side between `parent_id` and `child_id`.
    pub fn insert_tasks(
        &mut self,
        parent_id: &str,
        mut nodes: Vec<TaskNode>,
        child_id: &str,
        preserve_relationship: bool,
    ) -> Result<Vec<String>> {
        let parent_idx = self
            .index_of(parent_id)
            .ok_or_else(|| WeftError::TaskNotFound(parent_id.to_string()))?;
        let child_idx = self
            .index_of(child_id)
            .ok_or_else(|| WeftError::TaskNotFound(child_id.to_string()))?;
        self.check_new_ids(&nodes)?;

        for node in &mut nodes {
            node.add_parent(parent_id);
            self.tasks[child_idx].add_parent(node.id());
        }
        if !preserve_relationship {
            self.tasks[child_idx].remove_parent(parent_id);
            self.tasks[parent_idx].remove_declared_child(child_id);
        }

        let mut ids = Vec::with_capacity(nodes.len());
        for (offset, node) in nodes.into_iter().enumerate() {
            debug!(
                structure_id = %self.base.id,
                task_id = %node.id(),
                parent_id,
                child_id,
                preserve_relationship,
                "Task inserted"
            );
            ids.push(node.id().to_string());
            self.tasks.insert(parent_idx + 1 + offset, node);
        }
        Ok(ids)
    }

    fn check_new_ids(&self, nodes: &[TaskNode]) -> Result<()> {
        let mut seen = HashSet::new();
        for node in nodes {
            if self.index_of(node.id()).is_some() || !seen.insert(node.id()) {
                return Err(WeftError::DuplicateTask(node.id().to_string()));
            }
        }
        Ok(())
    }

    // --- Lookup ---

    fn index_of(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == id)
    }

    pub fn find_task(&self, id: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task(&self, id: &str) -> Result<&TaskNode> {
        self.find_task(id)
            .ok_or_else(|| WeftError::TaskNotFound(id.to_string()))
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

    pub fn parents(&self, id: &str) -> Vec<&TaskNode> {
        graph::parents_of(&self.tasks, id)
    }

    pub fn children(&self, id: &str) -> Vec<&TaskNode> {
        graph::children_of(&self.tasks, id)
    }

    pub fn child_ids(&self, id: &str) -> Vec<String> {
        self.children(id)
            .into_iter()
            .map(|c| c.id().to_string())
            .collect()
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

    /// True iff the task is pending and all of its parents have finished.
    pub fn can_execute(&self, id: &str) -> Result<bool> {
        let node = self.task(id)?;
        Ok(node.can_execute(self.parents(id)))
    }

    /// Ids of the tasks that could be submitted right now, in scheduling order.
    pub fn ready_tasks(&self) -> Result<Vec<String>> {
        let order = self.order_tasks()?;
        Ok(order
            .into_iter()
            .filter(|id| self.can_execute(id).unwrap_or(false))
            .collect())
    }

    // --- Graph ---

    pub fn resolve_relationships(&mut self) -> Result<()> {
        graph::resolve_relationships(&mut self.tasks)
    }

    pub fn to_graph(&self) -> TaskGraph {
        graph::to_graph(&self.tasks)
    }

    pub fn order_tasks(&self) -> Result<Vec<String>> {
        graph::order_tasks(&self.to_graph())
    }

    /// Snapshot handed to a task right before it runs.
    pub fn context(&self, id: &str) -> Result<TaskContext> {
        self.task(id)?;
        let parents = self
            .parents(id)
            .into_iter()
            .map(|p| p.view(self.child_ids(p.id())))
            .collect();
        let children = self
            .children(id)
            .into_iter()
            .map(|c| c.view(self.child_ids(c.id())))
            .collect();
        Ok(self.base.context(id).with_neighbours(parents, children))
    }

    // --- Execution ---

    /// Run every task once.
    ///
    /// Structural problems (no tasks, dangling references, cycles) are
    /// returned before anything is published or executed. Task failures
    /// abort the run and are reported in the summary, not as `Err`.
    pub async fn run(&mut self, args: Vec<String>) -> Result<RunSummary> {
        if self.tasks.is_empty() {
            return Err(WeftError::EmptyStructure);
        }
        self.resolve_relationships()?;
        let order: Vec<usize> = self
            .order_tasks()?
            .iter()
            .filter_map(|id| self.index_of(id))
            .collect();

        for task in &mut self.tasks {
            task.reset();
        }
        self.base.before_run(args);
        info!(
            structure_id = %self.base.id,
            tasks = self.tasks.len(),
            max_workers = self.max_workers,
            "Workflow started"
        );

        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut in_flight: JoinSet<(usize, TaskOutcome)> = JoinSet::new();
        let mut executed = Vec::with_capacity(self.tasks.len());
        let mut failure: Option<(Option<String>, Artifact)> = None;

        loop {
            if failure.is_none() {
                self.submit_ready(&order, &semaphore, &mut in_flight)?;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((idx, outcome)) => {
                    let task_id = self.tasks[idx].id().to_string();
                    let output = outcome.output.clone();
                    self.tasks[idx].complete(outcome);
                    executed.push(task_id.clone());

                    if output.is_error() && failure.is_none() {
                        warn!(
                            structure_id = %self.base.id,
                            task_id = %task_id,
                            in_flight = in_flight.len(),
                            "Task failed, aborting workflow"
                        );
                        failure = Some((Some(task_id), output));
                    }
                }
                Err(e) => {
                    error!(structure_id = %self.base.id, error = %e, "Task worker failed");
                    if failure.is_none() {
                        failure = Some((None, Artifact::error(format!("Task worker failed: {e}"))));
                    }
                }
            }
        }

        // A worker that died outside the task leaves its node executing.
        for task in self.tasks.iter_mut().filter(|t| t.is_executing()) {
            let output = Artifact::from(WeftError::TaskExecution {
                task_id: task.id().to_string(),
                message: "worker exited without a result".into(),
            });
            task.complete(TaskOutcome {
                input: None,
                output,
            });
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (state, failed_task, output) = match failure {
            Some((failed_task, error)) => (RunState::Aborted, failed_task, Some(error)),
            None => (RunState::Finished, None, self.output().cloned()),
        };
        self.base.state = state;

        info!(
            structure_id = %self.base.id,
            state = %state,
            executed = executed.len(),
            elapsed_ms,
            "Workflow finished"
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

    /// Scan in order and spawn every executable task.
    fn submit_ready(
        &mut self,
        order: &[usize],
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<(usize, TaskOutcome)>,
    ) -> Result<()> {
        for &idx in order {
            let id = self.tasks[idx].id().to_string();
            if !self.tasks[idx].can_execute(self.parents(&id)) {
                continue;
            }

            let ctx = self.context(&id)?;
            let task = self.tasks[idx].behaviour();
            self.tasks[idx].mark_executing();
            debug!(structure_id = %self.base.id, task_id = %id, "Task submitted");

            let semaphore = semaphore.clone();
            in_flight.spawn(async move {
                // The semaphore is never closed, so a permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, run_task(task, ctx).await)
            });
        }
        Ok(())
    }
}
