//! Re-enqueue archives that have no completion marker yet

use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::message::{marker_key, UnpackMessage};
use super::queue::WorkQueue;
use crate::error::Result;
use crate::stats::DispatchStats;
use crate::storage::ObjectStore;

const ARCHIVE_SUFFIXES: [&str; 3] = [".tar", ".tar.gz", ".tgz"];

pub fn is_archive_key(key: &str) -> bool {
    ARCHIVE_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

pub struct UnpackDispatcher {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    status_prefix: String,
}

impl UnpackDispatcher {
    pub fn new(store: Arc<dyn ObjectStore>, queue: Arc<dyn WorkQueue>, status_prefix: impl Into<String>) -> Self {
        Self {
            store,
            queue,
            status_prefix: status_prefix.into(),
        }
    }

    /// Enqueue every unprocessed archive under `prefix`.
    ///
    /// Safe to repeat: processed archives are skipped by marker, and queue
    /// deduplication absorbs archives that are enqueued but not yet done.
    #[instrument(skip(self))]
    pub async fn scan(&self, prefix: &str) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        let mut continuation: Option<String> = None;

        loop {
            let page = self.store.list_page(prefix, continuation.as_deref()).await?;
            for key in page.keys.iter().filter(|k| is_archive_key(k)) {
                self.dispatch(key, &mut stats).await?;
            }
            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        info!(
            seen = stats.archives_seen,
            processed = stats.already_processed,
            enqueued = stats.enqueued,
            "Scan complete"
        );
        Ok(stats)
    }

    async fn dispatch(&self, key: &str, stats: &mut DispatchStats) -> Result<()> {
        stats.archives_seen += 1;

        if self.store.exists(&marker_key(&self.status_prefix, key)).await? {
            debug!(key = %key, "Archive already processed");
            stats.already_processed += 1;
            return Ok(());
        }

        let message = UnpackMessage::new(key, self.store.name());
        self.queue
            .send(&message.to_body()?, &message.group_id(), &message.dedup_id())
            .await?;
        info!(key = %key, bucket = %message.bucket, "Queued archive");
        stats.enqueued += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::unpack::queue::MemoryQueue;

    #[test]
    fn test_archive_shapes() {
        assert!(is_archive_key("pdf/arXiv_pdf_1312_003.tar"));
        assert!(is_archive_key("bulk/001.tar.gz"));
        assert!(is_archive_key("bulk/001.tgz"));
        assert!(!is_archive_key("pdf/2101.00001.pdf"));
        assert!(!is_archive_key("status/bulk/001.tar.processed"));
    }

    #[tokio::test]
    async fn test_scan_skips_marked_and_non_archives() {
        let store = Arc::new(MemoryObjectStore::new("arxivist"));
        store.insert("bulk/001.tar", "t").await;
        store.insert("bulk/002.tar", "t").await;
        store.insert("bulk/readme.txt", "t").await;
        store.insert("status/bulk/002.tar.processed", "2021-01-01T00:00:00Z").await;
        let queue = Arc::new(MemoryQueue::new());

        let dispatcher = UnpackDispatcher::new(store, queue.clone(), "status");
        let stats = dispatcher.scan("bulk/").await.unwrap();

        assert_eq!(
            stats,
            DispatchStats {
                archives_seen: 2,
                already_processed: 1,
                enqueued: 1,
            }
        );

        let delivery = queue.receive(10).await.unwrap();
        assert_eq!(delivery.len(), 1);
        let message = UnpackMessage::parse(&delivery[0].body).unwrap();
        assert_eq!(message, UnpackMessage::new("bulk/001.tar", "arxivist"));
    }

    #[tokio::test]
    async fn test_repeated_scan_is_deduplicated() {
        let store = Arc::new(MemoryObjectStore::new("arxivist"));
        store.insert("bulk/001.tar", "t").await;
        let queue = Arc::new(MemoryQueue::new());

        let dispatcher = UnpackDispatcher::new(store, queue.clone(), "status");
        dispatcher.scan("bulk/").await.unwrap();
        dispatcher.scan("bulk/").await.unwrap();

        assert_eq!(queue.sent(), 1);
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_scan_walks_every_listing_page() {
        let store = Arc::new(MemoryObjectStore::new("arxivist").with_page_size(2));
        for key in ["bulk/001.tar", "bulk/002.txt", "bulk/003.tar", "bulk/004.tgz", "bulk/005.md"] {
            store.insert(key, "t").await;
        }
        store.insert("status/bulk/003.tar.processed", "2021-01-01T00:00:00Z").await;
        let queue = Arc::new(MemoryQueue::new());

        let dispatcher = UnpackDispatcher::new(store, queue.clone(), "status");
        let stats = dispatcher.scan("bulk/").await.unwrap();

        assert_eq!(
            stats,
            DispatchStats {
                archives_seen: 3,
                already_processed: 1,
                enqueued: 2,
            }
        );
        assert_eq!(queue.sent(), 2);
    }
}
