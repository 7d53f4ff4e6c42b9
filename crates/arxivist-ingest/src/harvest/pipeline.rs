//! Page-at-a-time harvest loop
//!
//! ```text
//! Paging(Initial{from}) --page--> Paging(Resume{token}) --page--> ... --no token--> Done
//! ```
//!
//! Every record in a page is processed before the page's cursor is saved, and
//! cancellation is only observed between pages. A crash or interrupt after
//! the records of a page but before its checkpoint replays that page on the
//! next run; the artifact existence check keeps the replay from fetching
//! anything twice.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::keys::StorageKeys;
use super::oai::{FeedClient, ListRequest, Page};
use super::record::{check_identity_shape, Record};
use crate::checkpoint::{CheckpointStore, Cursor};
use crate::error::{IngestError, Result};
use crate::fetch::{ArtifactSource, FetchOutcome};
use crate::stats::HarvestStats;
use crate::storage::ObjectStore;

const JSON_CONTENT_TYPE: &str = "application/json";
const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Lower bound for the first request when no cursor exists
    pub epoch: String,
    pub partition_keys: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOutcome {
    /// Last saved cursor, or the starting cursor if no page advanced it
    pub cursor: Option<Cursor>,
    pub stats: HarvestStats,
    /// Stopped by cancellation before the listing ended
    pub interrupted: bool,
}

enum HarvestState {
    Paging(ListRequest),
    Done,
}

pub struct Harvester {
    feed: Arc<dyn FeedClient>,
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn ArtifactSource>,
    checkpoint: Arc<dyn CheckpointStore>,
    options: HarvestOptions,
}

impl Harvester {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn ArtifactSource>,
        checkpoint: Arc<dyn CheckpointStore>,
        options: HarvestOptions,
    ) -> Self {
        Self {
            feed,
            store,
            fetcher,
            checkpoint,
            options,
        }
    }

    /// Resume from the stored checkpoint, or from the epoch if there is none.
    pub async fn run_from_checkpoint(&self, cancel: &CancellationToken) -> Result<HarvestOutcome> {
        let start = self.checkpoint.load().await?;
        self.run(start, cancel).await
    }

    #[instrument(skip(self, cancel))]
    pub async fn run(&self, start: Option<Cursor>, cancel: &CancellationToken) -> Result<HarvestOutcome> {
        let from = start
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| self.options.epoch.clone());
        info!(from = %from, "Starting harvest");

        let mut cursor = start;
        let mut stats = HarvestStats::new();
        let mut interrupted = false;
        let mut state = HarvestState::Paging(ListRequest::Initial { from: Some(from) });

        while let HarvestState::Paging(request) = state {
            if cancel.is_cancelled() {
                info!(cursor = ?cursor, "Harvest interrupted between pages");
                interrupted = true;
                break;
            }

            let page = self.feed.list_records(&request).await?;
            stats.pages += 1;
            stats.deleted_skipped += page.deleted;
            stats.malformed_skipped += page.malformed;

            if let Some(next) = self.process_page(&page, &mut stats).await? {
                self.checkpoint.save(&next).await?;
                info!(
                    page = stats.pages,
                    records = page.records.len(),
                    cursor = %next,
                    response_date = ?page.response_date,
                    "Page complete, checkpoint saved"
                );
                cursor = Some(next);
            } else {
                debug!(page = stats.pages, "Page had no records, cursor unchanged");
            }

            state = match page.resumption_token {
                Some(token) => HarvestState::Paging(ListRequest::Resume { token }),
                None => HarvestState::Done,
            };
        }

        stats.complete();
        info!(
            pages = stats.pages,
            records = stats.records,
            artifacts_written = stats.artifacts_written,
            artifacts_absent = stats.artifacts_absent,
            fetch_failures = stats.fetch_failures,
            "Harvest finished"
        );

        Ok(HarvestOutcome {
            cursor,
            stats,
            interrupted,
        })
    }

    /// Process every record in order; returns the cursor the page advances to.
    async fn process_page(&self, page: &Page, stats: &mut HarvestStats) -> Result<Option<Cursor>> {
        for record in &page.records {
            self.process_record(record, stats).await?;
        }
        Ok(page.records.last().map(|r| Cursor::new(r.datestamp.clone())))
    }

    #[instrument(skip(self, record, stats), fields(identity = %record.identity))]
    async fn process_record(&self, record: &Record, stats: &mut HarvestStats) -> Result<()> {
        if let Some(violation) = check_identity_shape(&record.identity) {
            warn!(violation = %violation, "Identity has unexpected shape");
            stats.shape_warnings += 1;
        }

        let keys = StorageKeys::for_identity(&record.identity, self.options.partition_keys);

        if self.store.exists(&keys.artifact).await? {
            info!(key = %keys.artifact, "Key already exists, skipping");
            stats.artifacts_skipped += 1;
        } else {
            match self.fetcher.fetch(&record.identity).await {
                Ok(FetchOutcome::Artifact(body)) => {
                    self.store
                        .put(&keys.artifact, body, Some(PDF_CONTENT_TYPE))
                        .await?;
                    stats.artifacts_written += 1;
                },
                Ok(FetchOutcome::Absent) => stats.artifacts_absent += 1,
                Err(e @ IngestError::FetchFailed { .. }) => {
                    error!(error = %e, "Artifact fetch failed, continuing with metadata");
                    stats.fetch_failures += 1;
                },
                Err(e) => return Err(e),
            }
        }

        let payload = serde_json::to_vec_pretty(record)?;
        self.store
            .put(&keys.metadata, Bytes::from(payload), Some(JSON_CONTENT_TYPE))
            .await?;
        stats.metadata_written += 1;
        stats.records += 1;

        Ok(())
    }
}
