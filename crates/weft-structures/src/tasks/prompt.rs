use std::sync::Arc;

use futures::future::BoxFuture;
use minijinja::Environment;
use tracing::debug;

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventPayload;
use weft_core::traits::{PromptDriver, Task};

/// Render a template against a task context.
///
/// The template sees `args`, `parent_outputs`, `parents`, `children`,
/// `task_id`, and `structure_id`. Unknown names render as empty.
pub fn render_template(template: &str, ctx: &TaskContext) -> Result<String> {
    let env = Environment::new();
    env.render_str(template, ctx.to_value())
        .map_err(|e| WeftError::Template(e.to_string()))
}

/// Task that renders a prompt template and sends it to a prompt driver.
pub struct PromptTask {
    template: String,
    driver: Arc<dyn PromptDriver>,
}

impl PromptTask {
    pub fn new(template: impl Into<String>, driver: Arc<dyn PromptDriver>) -> Self {
        Self {
            template: template.into(),
            driver,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl Task for PromptTask {
    fn kind(&self) -> &str {
        "prompt"
    }

    fn input(&self, ctx: &TaskContext) -> Result<Option<Artifact>> {
        render_template(&self.template, ctx).map(|prompt| Some(Artifact::text(prompt)))
    }

    fn run(&self, input: Option<Artifact>, ctx: TaskContext) -> BoxFuture<'_, Result<Artifact>> {
        Box::pin(async move {
            let prompt = input.map(|a| a.to_text()).unwrap_or_default();
            debug!(
                task_id = %ctx.task_id,
                model = %self.driver.model(),
                prompt_len = prompt.len(),
                "Sending prompt"
            );

            ctx.publish(EventPayload::StartPrompt {
                task_id: ctx.task_id.clone(),
                prompt: prompt.clone(),
            });

            // Driver failures are reported through the finish event as well.
            let result = self
                .driver
                .run(prompt)
                .await
                .unwrap_or_else(|e| Artifact::error(e.to_string()));

            ctx.publish(EventPayload::FinishPrompt {
                task_id: ctx.task_id.clone(),
                result: result.clone(),
            });

            Ok(result)
        })
    }
}

impl std::fmt::Debug for PromptTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTask")
            .field("template", &self.template)
            .field("model", &self.driver.model())
            .finish()
    }
}
