use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Task declarations for file-defined workflows.
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureConfig {
    /// Upper bound on concurrently executing tasks. Defaults to the number
    /// of available CPUs. Zero falls back to the default and values above
    /// `Semaphore::MAX_PERMITS` are capped there.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Record a conversation run after every structure run.
    #[serde(default)]
    pub conversation_memory: bool,
}

impl StructureConfig {
    pub fn max_workers(&self) -> usize {
        self.max_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(default_max_workers)
            .min(Semaphore::MAX_PERMITS)
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_bus_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// A prompt task declared in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    /// Ids of tasks this one depends on.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Prompt template, rendered against the task context.
    pub prompt: String,
}

impl WeftConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), tasks = config.tasks.len(), "Loaded config");
        Ok(config)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = WeftConfig::parse("").unwrap();
        assert!(config.structure.max_workers.is_none());
        assert!(config.structure.max_workers() >= 1);
        assert!(!config.structure.conversation_memory);
        assert_eq!(config.events.bus_capacity, 256);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_zero_workers_falls_back() {
        let config = WeftConfig::parse("[structure]\nmax_workers = 0\n").unwrap();
        assert!(config.structure.max_workers() >= 1);
    }

    #[test]
    fn test_huge_worker_count_is_capped() {
        let config = WeftConfig::parse("[structure]\nmax_workers = 4611686018427387904\n").unwrap();
        assert_eq!(config.structure.max_workers(), Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_load_tasks_with_env_expansion() {
        std::env::set_var("WEFT_TEST_TOPIC", "rust");
        let toml_content = r#"
[structure]
max_workers = 2
conversation_memory = true

[[tasks]]
id = "research"
prompt = "Research ${WEFT_TEST_TOPIC}"

[[tasks]]
id = "summarize"
parents = ["research"]
prompt = "Summarize {{ parent_outputs.research }}"
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(toml_content.as_bytes()).expect("write toml");

        let config = WeftConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.structure.max_workers(), 2);
        assert!(config.structure.conversation_memory);
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].prompt, "Research rust");
        assert_eq!(config.tasks[1].parents, vec!["research"]);
    }

    #[test]
    fn test_unset_env_var_kept() {
        assert_eq!(
            expand_env_vars("key = \"${WEFT_SURELY_UNSET_VAR}\""),
            "key = \"${WEFT_SURELY_UNSET_VAR}\""
        );
    }

    #[test]
    fn test_missing_file() {
        let err = WeftConfig::load(Path::new("/nonexistent/weft.toml")).unwrap_err();
        assert!(matches!(err, WeftError::ConfigNotFound(_)));
    }
}
