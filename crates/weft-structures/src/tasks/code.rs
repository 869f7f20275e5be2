use std::future::Future;

use futures::future::BoxFuture;

use weft_core::artifact::Artifact;
use weft_core::context::TaskContext;
use weft_core::error::Result;
use weft_core::traits::Task;

type RunFn = Box<dyn Fn(TaskContext) -> BoxFuture<'static, Result<Artifact>> + Send + Sync>;

/// Task that runs a user-supplied closure over its context.
pub struct CodeTask {
    run_fn: RunFn,
}

impl CodeTask {
    /// Wrap an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Artifact>> + Send + 'static,
    {
        Self {
            run_fn: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    /// Wrap a synchronous closure. It runs on the worker, so keep it short.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<Artifact> + Send + Sync + 'static,
    {
        Self {
            run_fn: Box::new(move |ctx| {
                let result = f(&ctx);
                Box::pin(async move { result })
            }),
        }
    }
}

impl Task for CodeTask {
    fn kind(&self) -> &str {
        "code"
    }

    fn run(&self, _input: Option<Artifact>, ctx: TaskContext) -> BoxFuture<'_, Result<Artifact>> {
        (self.run_fn)(ctx)
    }
}

impl std::fmt::Debug for CodeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeTask").finish_non_exhaustive()
    }
}
