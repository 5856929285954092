//! Background side-effect executor.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

/// Where post-commit side effects (fan-out, directory moves, remap) run.
#[derive(Clone, Debug)]
pub enum BackgroundTasks {
    /// Detached tokio tasks, at most `permits` running at once.
    Spawned { permits: Arc<Semaphore> },
    /// Awaited in place; the caller observes completion.
    Inline,
}

impl BackgroundTasks {
    pub fn spawned(concurrency: NonZeroUsize) -> Self {
        Self::Spawned {
            permits: Arc::new(Semaphore::new(concurrency.get())),
        }
    }

    pub fn inline() -> Self {
        Self::Inline
    }

    /// Run `task` according to the mode. Spawned tasks must be called from
    /// within a tokio runtime.
    pub async fn submit<F>(&self, op: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background_task", op);
        match self {
            Self::Inline => task.instrument(span).await,
            Self::Spawned { permits } => {
                let permits = Arc::clone(permits);
                tokio::spawn(
                    async move {
                        let Ok(_permit) = permits.acquire_owned().await else {
                            warn!(op, result = "dropped", "Background executor closed");
                            return;
                        };
                        task.await;
                        debug!(op, result = "ok", "Background task finished");
                    }
                    .instrument(span),
                );
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::spawned(NonZeroUsize::MIN)
    }
}
