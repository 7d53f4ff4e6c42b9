//! Archive extraction worker
//!
//! Per message:
//!
//! ```text
//! Received -> MarkerChecked -> Skip
//!                           -> Extracting -> MemberWritten* -> MarkerWritten -> Done
//! ```
//!
//! The completion marker is written last. Any failure before it leaves the
//! archive unmarked, and the next delivery redoes the whole archive; member
//! writes that already happened are skipped by their existence check.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::archive::{self, ArchiveContents};
use super::message::{marker_key, UnpackMessage};
use super::queue::WorkQueue;
use crate::error::{IngestError, Result};
use crate::stats::{UnpackStats, WorkerStats};
use crate::storage::{put_if_absent, ObjectStore, PutOutcome};

/// Pause between empty receives when the queue does not long-poll.
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Unparseable or misaddressed message; acked without retry
    Dropped,
    /// Completion marker already present
    Skipped,
    Completed(UnpackStats),
}

/// When a consumer loop stops on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    /// Until cancelled
    Forever,
    /// Until a receive comes back empty
    UntilIdle,
}

pub struct UnpackWorker {
    store: Arc<dyn ObjectStore>,
    extract_prefix: String,
    status_prefix: String,
}

fn content_type_for(path: &str) -> Option<&'static str> {
    path.to_ascii_lowercase()
        .ends_with(".pdf")
        .then_some("application/pdf")
}

impl UnpackWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        extract_prefix: impl Into<String>,
        status_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            extract_prefix: extract_prefix.into(),
            status_prefix: status_prefix.into(),
        }
    }

    pub fn member_key(&self, member_path: &str) -> String {
        format!("{}/{}", self.extract_prefix.trim_end_matches('/'), member_path)
    }

    /// Handle one message body.
    pub async fn handle(&self, body: &str, cancel: &CancellationToken) -> Result<HandleOutcome> {
        let message = match UnpackMessage::parse(body) {
            Ok(message) => message,
            Err(e) => {
                error!(body = %body, error = %e, "Message was not valid, dropping");
                return Ok(HandleOutcome::Dropped);
            },
        };

        if message.bucket != self.store.name() {
            error!(
                bucket = %message.bucket,
                store = %self.store.name(),
                key = %message.key,
                "Message addressed to another bucket, dropping"
            );
            return Ok(HandleOutcome::Dropped);
        }

        self.process(&message.key, cancel).await
    }

    /// Extract one archive unless its completion marker exists.
    #[instrument(skip(self, cancel))]
    pub async fn process(&self, key: &str, cancel: &CancellationToken) -> Result<HandleOutcome> {
        let marker = marker_key(&self.status_prefix, key);
        if self.store.exists(&marker).await? {
            info!("Tar file already processed, skipping");
            return Ok(HandleOutcome::Skipped);
        }

        info!(bucket = %self.store.name(), "Untarring archive");
        let data = self.store.get(key).await?;
        let contents = tokio::task::spawn_blocking(move || archive::read_members(&data))
            .await
            .map_err(|e| IngestError::permanent("read_members", e))??;

        let stats = self.write_members(contents, cancel).await?;

        let stamp = Bytes::from(Utc::now().to_rfc3339());
        put_if_absent(self.store.as_ref(), &marker, stamp, Some("text/plain"))
            .await
            .map_err(|e| IngestError::Persistence(format!("completion marker {}: {}", marker, e)))?;

        info!(
            written = stats.members_written,
            skipped = stats.members_skipped,
            ignored = stats.members_ignored,
            "Archive complete"
        );
        Ok(HandleOutcome::Completed(stats))
    }

    async fn write_members(&self, contents: ArchiveContents, cancel: &CancellationToken) -> Result<UnpackStats> {
        let mut stats = UnpackStats {
            members_ignored: contents.ignored,
            ..UnpackStats::default()
        };

        for member in contents.members {
            if cancel.is_cancelled() {
                warn!(
                    written = stats.members_written,
                    "Interrupted before completion marker; archive will be redone"
                );
                return Err(IngestError::Interrupted(format!(
                    "stopped after {} members",
                    stats.members_written + stats.members_skipped
                )));
            }

            let key = self.member_key(&member.path);
            let size = member.data.len() as u64;
            match put_if_absent(self.store.as_ref(), &key, member.data, content_type_for(&member.path)).await? {
                PutOutcome::Written { .. } => {
                    stats.members_written += 1;
                    stats.bytes_written += size;
                },
                PutOutcome::Skipped => stats.members_skipped += 1,
            }
        }

        Ok(stats)
    }

    /// Consume deliveries until cancelled (or idle, per `mode`).
    ///
    /// Handled messages (completed, skipped or dropped) are acked; failures
    /// are left for redelivery.
    pub async fn run(
        &self,
        queue: &dyn WorkQueue,
        batch_size: usize,
        mode: ConsumeMode,
        cancel: &CancellationToken,
    ) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        while !cancel.is_cancelled() {
            let deliveries = tokio::select! {
                _ = cancel.cancelled() => break,
                received = queue.receive(batch_size) => match received {
                    Ok(deliveries) => deliveries,
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "Receive failed, backing off");
                        tokio::time::sleep(IDLE_BACKOFF).await;
                        continue;
                    },
                    Err(e) => return Err(e),
                },
            };

            if deliveries.is_empty() {
                if mode == ConsumeMode::UntilIdle {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                }
            }

            for delivery in deliveries {
                match self.handle(&delivery.body, cancel).await {
                    Ok(outcome) => {
                        match &outcome {
                            HandleOutcome::Dropped => stats.messages_dropped += 1,
                            HandleOutcome::Skipped => stats.archives_skipped += 1,
                            HandleOutcome::Completed(members) => {
                                stats.archives_completed += 1;
                                stats.members.merge(members);
                            },
                        }
                        if let Err(e) = queue.ack(&delivery.receipt).await {
                            // redelivery lands on the completion marker
                            warn!(error = %e, "Ack failed");
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "Unpack failed, leaving message for redelivery");
                        stats.failures += 1;
                    },
                }
            }
        }

        Ok(stats)
    }

    /// Run `workers` consumers against one queue and sum their stats.
    pub async fn run_pool(
        self: Arc<Self>,
        queue: Arc<dyn WorkQueue>,
        workers: usize,
        batch_size: usize,
        mode: ConsumeMode,
        cancel: CancellationToken,
    ) -> Result<WorkerStats> {
        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            let worker = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            set.spawn(async move {
                info!(worker = id, "Unpack worker started");
                worker.run(queue.as_ref(), batch_size, mode, &cancel).await
            });
        }

        let mut total = WorkerStats::default();
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(stats)) => total.merge(&stats),
                Ok(Err(e)) => {
                    error!(error = %e, "Unpack worker stopped");
                    cancel.cancel();
                    first_error.get_or_insert(e);
                },
                Err(e) => {
                    error!(error = %e, "Unpack worker panicked");
                    cancel.cancel();
                    first_error.get_or_insert(IngestError::permanent("unpack_worker", e));
                },
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}
