//! Buffered progress/log reporter handed to renderers.
//!
//! `progress()` and `log()` only push onto an unbounded channel, so the
//! render path never waits on the job store. A flusher task drains the
//! channel in batches: all log lines of a batch go out in one append and
//! only the last progress report of the batch is written.

use std::sync::Arc;

use reclip_media::ProgressReporter;
use reclip_models::JobId;
use reclip_storage::JobStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Upper bound on events folded into one store write.
const MAX_BATCH: usize = 256;

#[derive(Debug)]
enum Event {
    Progress { current: u32, total: u32 },
    Log(String),
}

/// Reporter for one job. Drop it (or call [`JobReporter::finish`]) before
/// writing the terminal status so buffered lines land first.
pub struct JobReporter {
    tx: mpsc::UnboundedSender<Event>,
}

/// Handle on the flusher task of a [`JobReporter`].
pub struct ReporterHandle {
    task: JoinHandle<()>,
}

impl JobReporter {
    /// Spawn the flusher for `job_id` and return the reporter with its handle.
    pub fn spawn(store: Arc<dyn JobStore>, job_id: JobId) -> (Self, ReporterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(flush_loop(store, job_id, rx));
        (Self { tx }, ReporterHandle { task })
    }

    /// Close the channel and wait until everything buffered is written.
    pub async fn finish(self, handle: ReporterHandle) {
        drop(self);
        handle.flushed().await;
    }
}

impl ReporterHandle {
    /// Wait for the flusher to drain. Only returns once every reporter clone
    /// has been dropped.
    pub async fn flushed(self) {
        if let Err(e) = self.task.await {
            warn!("Reporter flusher panicked: {}", e);
        }
    }
}

impl ProgressReporter for JobReporter {
    fn progress(&self, current: u32, total: u32) {
        let _ = self.tx.send(Event::Progress { current, total });
    }

    fn log(&self, line: &str) {
        let _ = self.tx.send(Event::Log(line.to_string()));
    }
}

async fn flush_loop(store: Arc<dyn JobStore>, job_id: JobId, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(first) = rx.recv().await {
        let mut lines = Vec::new();
        let mut progress = None;

        let mut next = Some(first);
        while let Some(event) = next {
            match event {
                Event::Progress { current, total } => progress = Some((current, total)),
                Event::Log(line) => lines.push(line),
            }
            next = if lines.len() < MAX_BATCH {
                rx.try_recv().ok()
            } else {
                None
            };
        }

        if let Err(e) = store.append_logs(&job_id, &lines).await {
            warn!(job_id = %job_id, "Failed to append {} log lines: {}", lines.len(), e);
        }
        if let Some((current, total)) = progress {
            if let Err(e) = store.record_progress(&job_id, current, total).await {
                warn!(job_id = %job_id, "Failed to record progress: {}", e);
            }
        }
    }
}
