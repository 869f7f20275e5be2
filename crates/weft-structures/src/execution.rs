use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::event::EventPayload;
use weft_core::traits::Task;

/// What a task run produced: the rendered input and the output.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub input: Option<Artifact>,
    pub output: Artifact,
}

/// Worker-side half of task execution.
///
/// Owns everything it touches, so it can be spawned without borrowing the
/// structure. Renders the input, publishes `StartTask`, runs the behaviour,
/// publishes `FinishTask`. Errors and panics become error artifacts.
pub async fn run_task(task: Arc<dyn Task>, ctx: TaskContext) -> TaskOutcome {
    let task_id = ctx.task_id.clone();
    let parent_ids: Vec<String> = ctx.parents.keys().cloned().collect();
    let child_ids: Vec<String> = ctx.children.keys().cloned().collect();
    let events = ctx.events().clone();
    let start = Instant::now();

    let work = async {
        let input = match task.input(&ctx) {
            Ok(input) => input,
            Err(e) => {
                events.publish(EventPayload::StartTask {
                    task_id: task_id.clone(),
                    parent_ids: parent_ids.clone(),
                    child_ids: child_ids.clone(),
                    input: None,
                });
                return TaskOutcome {
                    input: None,
                    output: Artifact::error(e.to_string()),
                };
            }
        };

        events.publish(EventPayload::StartTask {
            task_id: task_id.clone(),
            parent_ids: parent_ids.clone(),
            child_ids: child_ids.clone(),
            input: input.clone(),
        });

        let output = match task.run(input.clone(), ctx.clone()).await {
            Ok(artifact) => artifact,
            Err(e) => Artifact::error(e.to_string()),
        };
        TaskOutcome { input, output }
    };

    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => TaskOutcome {
            input: None,
            output: Artifact::error(format!("Task panicked: {}", panic_message(&*panic))),
        },
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    if outcome.output.is_error() {
        warn!(
            task_id = %task_id,
            kind = %task.kind(),
            elapsed_ms,
            error = %outcome.output,
            "Task errored"
        );
    } else {
        debug!(
            task_id = %task_id,
            kind = %task.kind(),
            elapsed_ms,
            output_type = outcome.output.type_name(),
            "Task finished"
        );
    }

    events.publish(EventPayload::FinishTask {
        task_id,
        parent_ids,
        child_ids,
        output: outcome.output.clone(),
    });

    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
