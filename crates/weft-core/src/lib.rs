pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use artifact::Artifact;
pub use config::WeftConfig;
pub use context::TaskContext;
pub use error::{Result, WeftError};
pub use event::{Event, EventBus, EventDispatcher, EventKind, EventListener, EventPayload};
pub use traits::{EchoPromptDriver, EventSink, PromptDriver, Task};
pub use types::*;
