//! Graceful-shutdown coordination for the gateway's long-running tasks.
//!
//! Both servers subscribe to a watch channel; dropping the sender broadcasts
//! the stop signal, and the coordinator then waits for the tasks up to a
//! deadline. Tasks still running at the deadline are aborted.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("a task panicked during shutdown")]
    Panic(#[from] JoinError),
    #[error("graceful shutdown timed out after {0:?}")]
    Timeout(Duration),
}

pub struct ShutdownManager {
    tasks: JoinSet<()>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(());
        Self { tasks: JoinSet::new(), shutdown_tx }
    }

    /// Spawns a task onto the runtime under this coordinator's control.
    pub fn spawn_task<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Returns a receiver that resolves once shutdown begins.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcasts the stop signal and waits for every task, bounded by
    /// `timeout`. Remaining tasks are aborted at the deadline.
    pub async fn graceful_shutdown(self, timeout: Duration) -> Result<(), ShutdownError> {
        let ShutdownManager { mut tasks, shutdown_tx } = self;

        info!(tasks = tasks.len(), "broadcasting shutdown signal");
        drop(shutdown_tx);

        let join_all = async {
            while let Some(res) = tasks.join_next().await {
                res?;
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(Ok(())) => {
                info!("all tasks completed");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(error = %err, "task panicked during shutdown");
                Err(ShutdownError::Panic(err))
            }
            Err(_) => {
                error!(timeout = ?timeout, "shutdown deadline exceeded, aborting remaining tasks");
                tasks.abort_all();
                Err(ShutdownError::Timeout(timeout))
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn tasks_stop_on_signal() {
        let mut manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.spawn_task(async move {
            let _ = rx.changed().await;
        });
        let res = manager.graceful_shutdown(Duration::from_secs(1)).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn deadline_aborts_stubborn_tasks() {
        let mut manager = ShutdownManager::new();
        manager.spawn_task(async {
            sleep(Duration::from_secs(30)).await;
        });
        let res = manager.graceful_shutdown(Duration::from_millis(50)).await;
        assert!(matches!(res, Err(ShutdownError::Timeout(_))));
    }

    #[tokio::test]
    async fn panics_are_propagated() {
        let mut manager = ShutdownManager::new();
        manager.spawn_task(async {
            panic!("boom");
        });
        let res = manager.graceful_shutdown(Duration::from_secs(1)).await;
        assert!(matches!(res, Err(ShutdownError::Panic(_))));
    }

    #[tokio::test]
    async fn shutdown_with_no_tasks_is_immediate() {
        let manager = ShutdownManager::new();
        assert!(manager.graceful_shutdown(Duration::from_secs(1)).await.is_ok());
    }
}
