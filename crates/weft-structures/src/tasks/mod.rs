//! Built-in task kinds.

pub mod code;
pub mod prompt;

pub use code::CodeTask;
pub use prompt::{render_template, PromptTask};
