pub mod base;
pub mod execution;
pub mod graph;
pub mod memory;
pub mod node;
pub mod pipeline;
pub mod tasks;
pub mod workflow;

pub use base::{RunState, RunSummary};
pub use execution::{run_task, TaskOutcome};
pub use graph::{order_tasks, resolve_relationships, to_graph, TaskGraph};
pub use memory::{ConversationMemory, ConversationRun};
pub use node::TaskNode;
pub use pipeline::Pipeline;
pub use tasks::{render_template, CodeTask, PromptTask};
pub use workflow::Workflow;
