use serde::{Deserialize, Serialize};

use weft_core::types::new_id;

/// One recorded structure run: what went in, what came out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRun {
    pub id: String,
    pub input: String,
    pub output: String,
}

impl ConversationRun {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Run history kept by a structure across invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    runs: Vec<ConversationRun>,
    #[serde(default)]
    max_runs: Option<usize>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max` runs; older ones are dropped first.
    pub fn with_max_runs(mut self, max: usize) -> Self {
        self.max_runs = Some(max);
        self.truncate();
        self
    }

    pub fn add_run(&mut self, run: ConversationRun) {
        self.runs.push(run);
        self.truncate();
    }

    pub fn runs(&self) -> &[ConversationRun] {
        &self.runs
    }

    pub fn last_run(&self) -> Option<&ConversationRun> {
        self.runs.last()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn truncate(&mut self) {
        if let Some(max) = self.max_runs {
            if self.runs.len() > max {
                let excess = self.runs.len() - max;
                self.runs.drain(..excess);
            }
        }
    }
}
