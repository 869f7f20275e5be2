//! Shared mocks and fixtures for Weft tests.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::error::{Result, WeftError};
use weft_core::event::{Event, EventKind};
use weft_core::traits::{EventSink, PromptDriver, Task};

/// Prompt driver with a canned reply. Records every prompt it receives.
#[derive(Debug)]
pub struct MockPromptDriver {
    reply: std::result::Result<String, String>,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl MockPromptDriver {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Driver whose every call fails with `WeftError::Prompt`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            ..Self::new("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl PromptDriver for MockPromptDriver {
    fn model(&self) -> &str {
        "mock"
    }

    fn run(&self, prompt: String) -> BoxFuture<'_, Result<Artifact>> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(Artifact::text(text.clone())),
                Err(message) => Err(WeftError::Prompt(message.clone())),
            }
        })
    }
}

/// Sink that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    flushes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(Event::kind).collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl EventSink for RecordingSink {
    fn publish_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records when probe tasks start and finish, and how many overlapped.
#[derive(Debug, Default)]
pub struct Probe {
    log: Mutex<Vec<(String, ProbeMark)>>,
    running: AtomicUsize,
    high_water: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMark {
    Start,
    Finish,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A task that sleeps for `delay` and returns its own id as text.
    pub fn task(self: &Arc<Self>, delay: Duration) -> ProbeTask {
        ProbeTask {
            probe: self.clone(),
            delay,
            fail: false,
        }
    }

    /// Like [`Probe::task`], but the output is an error artifact.
    pub fn failing_task(self: &Arc<Self>, delay: Duration) -> ProbeTask {
        ProbeTask {
            fail: true,
            ..self.task(delay)
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.marked(ProbeMark::Start)
    }

    pub fn finished(&self) -> Vec<String> {
        self.marked(ProbeMark::Finish)
    }

    pub fn has_started(&self, id: &str) -> bool {
        self.started().iter().any(|s| s == id)
    }

    /// Position of a mark in the combined log.
    pub fn position(&self, id: &str, mark: ProbeMark) -> Option<usize> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|(i, m)| i == id && *m == mark)
    }

    /// Most probe tasks ever running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    fn marked(&self, mark: ProbeMark) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| *m == mark)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn enter(&self, id: &str) {
        self.log.lock().unwrap().push((id.to_string(), ProbeMark::Start));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, id: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((id.to_string(), ProbeMark::Finish));
    }
}

#[derive(Debug)]
pub struct ProbeTask {
    probe: Arc<Probe>,
    delay: Duration,
    fail: bool,
}

impl Task for ProbeTask {
    fn kind(&self) -> &str {
        "probe"
    }

    fn run(&self, _input: Option<Artifact>, ctx: TaskContext) -> BoxFuture<'_, Result<Artifact>> {
        Box::pin(async move {
            self.probe.enter(&ctx.task_id);
            tokio::time::sleep(self.delay).await;
            self.probe.exit(&ctx.task_id);

            if self.fail {
                Ok(Artifact::error(format!("{} failed", ctx.task_id)))
            } else {
                Ok(Artifact::text(ctx.task_id))
            }
        })
    }
}

/// Write `content` to a temporary `.toml` file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
