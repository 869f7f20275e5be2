use futures::future::BoxFuture;

use crate::artifact::Artifact;
use crate::context::TaskContext;
use crate::error::Result;
use crate::event::Event;

/// The work a node in a structure performs.
///
/// Identity, relationships, and state live on the structure's task node;
/// implementors only turn a context into an artifact.
pub trait Task: Send + Sync + 'static {
    /// Kind name shown in logs and task views (e.g., "prompt", "code").
    fn kind(&self) -> &str;

    /// Build this task's input from the run context.
    ///
    /// Called on the worker, right before `run` and inside the same panic
    /// guard. The default has no input.
    fn input(&self, ctx: &TaskContext) -> Result<Option<Artifact>> {
        let _ = ctx;
        Ok(None)
    }

    /// Run the task. An `Err` or an error artifact marks the task as errored.
    fn run(&self, input: Option<Artifact>, ctx: TaskContext) -> BoxFuture<'_, Result<Artifact>>;
}

/// Sends a rendered prompt to a model.
pub trait PromptDriver: Send + Sync + 'static {
    /// Model name, for logs.
    fn model(&self) -> &str;

    fn run(&self, prompt: String) -> BoxFuture<'_, Result<Artifact>>;
}

/// Receives lifecycle events. Must not fail.
pub trait EventSink: Send + Sync + 'static {
    fn publish_event(&self, event: &Event);

    /// Push out anything buffered. Called once at the end of a structure run.
    fn flush(&self) {}
}

/// Driver that answers every prompt with the prompt itself.
#[derive(Debug, Clone, Default)]
pub struct EchoPromptDriver;

impl PromptDriver for EchoPromptDriver {
    fn model(&self) -> &str {
        "echo"
    }

    fn run(&self, prompt: String) -> BoxFuture<'_, Result<Artifact>> {
        Box::pin(async move { Ok(Artifact::text(prompt)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_driver() {
        let driver = EchoPromptDriver;
        let out = driver.run("repeat me".into()).await.unwrap();
        assert_eq!(out, Artifact::text("repeat me"));
        assert_eq!(driver.model(), "echo");
    }
}
