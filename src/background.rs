//! Supervised fire-and-forget tasks
//!
//! Work spawned here never reports back to the request that started it.
//! Errors are logged, panics are caught and logged, and [`BackgroundTasks::wait`]
//! lets shutdown block until everything in flight has finished.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::types::Result;

/// Tracks detached tasks so they can be drained on shutdown
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` detached from the caller
    ///
    /// `name` identifies the task in logs.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let supervised = async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => debug!("Background task '{}' completed", name),
                Ok(Err(e)) => error!("Background task '{}' failed: {}", name, e),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Background task '{}' panicked: {}", name, message);
                }
            }
        };

        match self.tasks.lock() {
            Ok(mut tasks) => {
                // Reap anything already finished so the set stays small
                while tasks.try_join_next().is_some() {}
                tasks.spawn(supervised);
            }
            Err(e) => error!("Background task '{}' not started, lock poisoned: {}", name, e),
        }
    }

    /// Number of tasks spawned and not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every tracked task, including ones spawned while waiting
    pub async fn wait(&self) {
        loop {
            let mut pending = match self.tasks.lock() {
                Ok(mut tasks) => std::mem::take(&mut *tasks),
                Err(e) => {
                    error!("Background task set lock poisoned: {}", e);
                    return;
                }
            };

            if pending.is_empty() {
                return;
            }

            info!("Completing {} background task(s)", pending.len());
            while pending.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarqueeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_drains_all_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..5u64 {
            let done = Arc::clone(&done);
            tasks.spawn("counter", async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        tasks.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        tasks.spawn("fails", async { Err(MarqueeError::internal("smtp unavailable")) });
        tasks.spawn("panics", async {
            let fail = true;
            if fail {
                panic!("boom");
            }
            Ok(())
        });
        let d = Arc::clone(&done);
        tasks.spawn("survivor", async move {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tasks.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);

        // Still usable afterwards
        let d = Arc::clone(&done);
        tasks.spawn("later", async move {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_covers_tasks_spawned_while_waiting() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let d = Arc::clone(&done);
        tasks.spawn("parent", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner_tasks.spawn("child", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        tasks.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
