use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::Artifact;

/// Generate a fresh task or structure identifier.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lifecycle state of a task within one structure run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Pending,
    Executing,
    Finished,
    /// Terminal. The task's output is an error artifact.
    Errored,
}

impl TaskState {
    /// Finished successfully or with an error.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Finished => write!(f, "finished"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Read-only snapshot of a task, handed to other tasks for introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub kind: String,
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Artifact>,
}

impl TaskView {
    /// Output text, or an empty string when the task produced nothing.
    pub fn output_text(&self) -> String {
        self.output
            .as_ref()
            .map(Artifact::to_text)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_unique_hex() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_finished_states() {
        assert!(!TaskState::Pending.is_finished());
        assert!(!TaskState::Executing.is_finished());
        assert!(TaskState::Finished.is_finished());
        assert!(TaskState::Errored.is_finished());
    }
}
