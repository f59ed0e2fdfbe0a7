//! Supervised background tasks with an explicit stop.
//!
//! A [`TaskHandle`] owns the `JoinHandle` of a spawned task and the sending
//! half of a `watch` channel the task listens on. [`TaskHandle::stop`]
//! flips the flag and waits for the task to wind down.

use anyhow::{Context, Result};
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `body` with a receiver that turns `true` on shutdown.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(body(rx));
        info!(task = name, "started");
        Self {
            name,
            shutdown,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the task to exit.
    pub async fn stop(self) -> Result<()> {
        // The task may already be gone, in which case nobody is listening.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .with_context(|| format!("task '{}' panicked", self.name))?;
        info!(task = self.name, "stopped");
        Ok(())
    }
}

/// Resolves once the flag is `true` or the sender is dropped.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
