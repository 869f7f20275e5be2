use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::event::{EventDispatcher, EventPayload};
use weft_core::traits::EventSink;
use weft_core::types::new_id;

use crate::memory::{ConversationMemory, ConversationRun};

/// Lifecycle of a structure run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Never run.
    #[default]
    Idle,
    Running,
    Finished,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Result of one structure run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: RunState,
    /// Task ids in completion order.
    pub executed: Vec<String>,
    /// Output task's output, or the error that aborted the run.
    pub output: Option<Artifact>,
    pub failed_task: Option<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }
}

/// State shared by workflows and pipelines: identity, sinks, memory and the
/// args of the run in progress.
#[derive(Debug, Clone)]
pub(crate) struct StructureBase {
    pub(crate) id: String,
    pub(crate) events: EventDispatcher,
    pub(crate) memory: Option<ConversationMemory>,
    pub(crate) args: Vec<String>,
    pub(crate) state: RunState,
}

impl StructureBase {
    pub(crate) fn new() -> Self {
        Self {
            id: new_id(),
            events: EventDispatcher::new(),
            memory: None,
            args: vec![],
            state: RunState::Idle,
        }
    }

    pub(crate) fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) -> Arc<dyn EventSink> {
        self.events.add_sink(sink)
    }

    pub(crate) fn remove_event_sink(&mut self, sink: &Arc<dyn EventSink>) -> bool {
        self.events.remove_sink(sink)
    }

    pub(crate) fn before_run(&mut self, args: Vec<String>) {
        info!(structure_id = %self.id, args = args.len(), "Structure run started");
        self.args = args;
        self.state = RunState::Running;
        self.events.publish(EventPayload::StartStructureRun {
            structure_id: self.id.clone(),
            args: self.args.clone(),
        });
    }

    pub(crate) fn after_run(&mut self, input: Option<String>, output: Option<&Artifact>) {
        if let (Some(memory), Some(output)) = (self.memory.as_mut(), output) {
            memory.add_run(ConversationRun::new(input.unwrap_or_default(), output.to_text()));
        }

        self.events.publish(EventPayload::FinishStructureRun {
            structure_id: self.id.clone(),
            output: output.cloned(),
        });
        self.events.flush();
        self.args.clear();
        info!(structure_id = %self.id, state = %self.state, "Structure run finished");
    }

    /// Context without neighbours; structures add those.
    pub(crate) fn context(&self, task_id: &str) -> TaskContext {
        TaskContext::new(task_id, self.id.clone(), self.args.clone()).with_events(self.events.clone())
    }
}
