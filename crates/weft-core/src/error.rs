use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Graph errors
    #[error("Task {task_id} references unknown task {missing_id}")]
    DanglingReference { task_id: String, missing_id: String },

    #[error("Task graph contains a cycle through: {}", task_ids.join(", "))]
    Cycle { task_ids: Vec<String> },

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Structure has no tasks")]
    EmptyStructure,

    // Task errors
    #[error("Task execution failed: {task_id}: {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Prompt driver error: {0}")]
    Prompt(String),

    #[error("Template error: {0}")]
    Template(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Whether this error describes a malformed task graph rather than a
    /// failure inside a task.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DanglingReference { .. }
                | Self::Cycle { .. }
                | Self::DuplicateTask(_)
                | Self::TaskNotFound(_)
                | Self::EmptyStructure
        )
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
