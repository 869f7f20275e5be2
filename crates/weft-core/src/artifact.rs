use serde::{Deserialize, Serialize};

/// A typed piece of data produced by a task and handed to its dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    /// Plain text, the usual output of a prompt.
    Text { value: String },
    /// Informational message that is neither a result nor a failure.
    Info { value: String },
    /// A failed task's output. Downstream tasks see it like any other artifact.
    Error { value: String },
    /// Structured data.
    Json { value: serde_json::Value },
    /// Raw bytes with a name.
    Blob { name: String, value: Vec<u8> },
    /// An ordered collection of artifacts.
    List { items: Vec<Artifact> },
}

impl Artifact {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub fn info(value: impl Into<String>) -> Self {
        Self::Info {
            value: value.into(),
        }
    }

    pub fn error(value: impl Into<String>) -> Self {
        Self::Error {
            value: value.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Json { value }
    }

    pub fn blob(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Blob {
            name: name.into(),
            value,
        }
    }

    pub fn list(items: Vec<Artifact>) -> Self {
        Self::List { items }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Textual form used for templates, parent outputs, and conversation memory.
    ///
    /// Blobs render as lossy UTF-8; lists join their items with newlines.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text { value } | Self::Info { value } | Self::Error { value } => value.clone(),
            Self::Json { value } => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Blob { value, .. } => String::from_utf8_lossy(value).into_owned(),
            Self::List { items } => items
                .iter()
                .map(Artifact::to_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Short name of the variant, used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
            Self::Json { .. } => "json",
            Self::Blob { .. } => "blob",
            Self::List { .. } => "list",
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<crate::error::WeftError> for Artifact {
    fn from(err: crate::error::WeftError) -> Self {
        Self::error(err.to_string())
    }
}
