//! Watch loop: re-ingest markdown files as they are created or edited.
//!
//! The watcher polls the docs root every `processor.poll_interval_secs`,
//! compares modification times against the previous pass and hands each
//! created or modified file to [`Ingestor::process_file`]. Deleted files are
//! ignored. The first snapshot is only a baseline; run
//! [`Ingestor::process_all`] before starting the watcher to cover files that
//! already exist.
//!
//! ```ignore
//! let handle = DocsWatcher::new(ingestor, Duration::from_secs(2)).start();
//! // ...
//! handle.stop().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::ingest::{FileOutcome, Ingestor};
use crate::scan::{diff_snapshots, ChangeKind, Snapshot};
use crate::task::TaskHandle;

/// Reported after each change has been handled.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// `None` when processing failed (the error is logged).
    pub outcome: Option<FileOutcome>,
}

pub struct DocsWatcher {
    ingestor: Arc<Ingestor>,
    poll_interval: Duration,
    events: Option<mpsc::Sender<WatchEvent>>,
}

impl DocsWatcher {
    pub fn new(ingestor: Arc<Ingestor>, poll_interval: Duration) -> Self {
        Self {
            ingestor,
            poll_interval,
            events: None,
        }
    }

    /// Publish a [`WatchEvent`] for every handled change.
    pub fn with_event_sender(mut self, tx: mpsc::Sender<WatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn start(self) -> TaskHandle {
        TaskHandle::spawn("docs-watcher", move |rx| self.run(rx))
    }

    async fn snapshot(&self) -> Option<Snapshot> {
        let scanner = self.ingestor.scanner().clone();
        match tokio::task::spawn_blocking(move || scanner.snapshot()).await {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to scan docs root");
                None
            }
            Err(e) => {
                warn!(error = %e, "scan task failed");
                None
            }
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut known = self.snapshot().await.unwrap_or_default();
        info!(
            root = %self.ingestor.scanner().root().display(),
            files = known.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "watching for changes"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let Some(current) = self.snapshot().await else {
                continue;
            };

            for change in diff_snapshots(&known, &current) {
                if *shutdown.borrow() {
                    break;
                }
                info!(path = %change.path.display(), kind = ?change.kind, "change detected");

                let outcome = match self.ingestor.process_file(&change.path).await {
                    Ok(outcome) => {
                        debug!(path = %change.path.display(), ?outcome, "change handled");
                        Some(outcome)
                    }
                    Err(e) => {
                        error!(path = %change.path.display(), error = %e, "failed to process change");
                        None
                    }
                };

                if let Some(tx) = &self.events {
                    let event = WatchEvent {
                        path: change.path,
                        kind: change.kind,
                        outcome,
                    };
                    if tx.send(event).await.is_err() {
                        debug!("watch event receiver dropped");
                    }
                }
            }

            known = current;
        }
    }
}
