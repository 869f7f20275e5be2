use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::traits::EventSink;
use crate::types::new_id;

/// Lifecycle notification published by structures and tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    StartStructureRun {
        structure_id: String,
        args: Vec<String>,
    },
    FinishStructureRun {
        structure_id: String,
        output: Option<Artifact>,
    },
    StartTask {
        task_id: String,
        parent_ids: Vec<String>,
        child_ids: Vec<String>,
        input: Option<Artifact>,
    },
    FinishTask {
        task_id: String,
        parent_ids: Vec<String>,
        child_ids: Vec<String>,
        output: Artifact,
    },
    StartPrompt {
        task_id: String,
        prompt: String,
    },
    FinishPrompt {
        task_id: String,
        result: Artifact,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StartStructureRun { .. } => EventKind::StartStructureRun,
            Self::FinishStructureRun { .. } => EventKind::FinishStructureRun,
            Self::StartTask { .. } => EventKind::StartTask,
            Self::FinishTask { .. } => EventKind::FinishTask,
            Self::StartPrompt { .. } => EventKind::StartPrompt,
            Self::FinishPrompt { .. } => EventKind::FinishPrompt,
        }
    }
}

/// Payload-free mirror of [`EventPayload`] used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartStructureRun,
    FinishStructureRun,
    StartTask,
    FinishTask,
    StartPrompt,
    FinishPrompt,
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn publish_event(&self, event: &Event) {
        self.publish(event.clone());
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

/// Callback sink with an optional filter on event kinds.
pub struct EventListener {
    handler: Handler,
    kinds: Option<Vec<EventKind>>,
}

impl EventListener {
    pub fn new(handler: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            kinds: None,
        }
    }

    /// Only forward events of the given kinds.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }
}

impl EventSink for EventListener {
    fn publish_event(&self, event: &Event) {
        if self.accepts(event.kind()) {
            (self.handler)(event);
        }
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("kinds", &self.kinds)
            .finish()
    }
}

/// The set of sinks a structure publishes to.
///
/// Cloned into every task context so tasks can publish without holding a
/// reference to their structure.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink. Registering the same `Arc` twice is a no-op.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) -> Arc<dyn EventSink> {
        if !self.sinks.iter().any(|s| Arc::ptr_eq(s, &sink)) {
            self.sinks.push(sink.clone());
        }
        sink
    }

    /// Remove a sink by identity. Returns false if it was not registered.
    pub fn remove_sink(&mut self, sink: &Arc<dyn EventSink>) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|s| !Arc::ptr_eq(s, sink));
        self.sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn publish(&self, payload: EventPayload) {
        if self.sinks.is_empty() {
            return;
        }
        let event = Event::new(payload);
        for sink in &self.sinks {
            sink.publish_event(&event);
        }
    }

    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
