//! Idempotent object store
//!
//! Keys are slash-delimited paths partitioned by content type:
//! `metadata/…`, `pdf/…`, `extracted/pdf/…` and `status/….processed`.
//!
//! Writers follow a check-then-put protocol through [`put_if_absent`]. The
//! check is not atomic with the write: two writers racing on one key may both
//! pass it, so [`ObjectStore::put`] is a plain overwrite and callers only ever
//! write identical content to a given key.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};

pub mod config;
pub mod s3;

pub use s3::S3ObjectStore;

/// Blob storage with an existence check.
///
/// Implementations retry transient transport failures internally and surface
/// anything else immediately.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store identity used in queue messages (the bucket name for S3)
    fn name(&self) -> &str;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Fails with [`IngestError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Unconditional write; repeating it with the same bytes is harmless.
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()>;

    /// One page of keys under `prefix`, in lexicographic order, starting
    /// after `continuation` (`None` for the first page).
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage>;

    /// All keys under `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(prefix, continuation.as_deref()).await?;
            keys.extend(page.keys);
            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

/// Keys from one listing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Token for the following page; `None` on the last one
    pub next: Option<String>,
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PutOutcome {
    Written { size: u64, checksum: String },
    Skipped,
}

impl PutOutcome {
    pub fn was_written(&self) -> bool {
        matches!(self, PutOutcome::Written { .. })
    }
}

/// Write `data` under `key` unless the key already exists.
#[instrument(skip(store, data), fields(store = store.name()))]
pub async fn put_if_absent(
    store: &dyn ObjectStore,
    key: &str,
    data: Bytes,
    content_type: Option<&str>,
) -> Result<PutOutcome> {
    if store.exists(key).await? {
        info!(key = %key, "Key already exists, skipping");
        return Ok(PutOutcome::Skipped);
    }

    let size = data.len() as u64;
    let checksum = arxivist_common::checksum::sha256_hex(&data);
    store.put(key, data, content_type).await?;
    debug!(key = %key, size, checksum = %checksum, "Stored object");

    Ok(PutOutcome::Written { size, checksum })
}

/// Page size S3 uses for `ListObjectsV2`
const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// In-process store for tests and local dry runs
#[derive(Debug)]
pub struct MemoryObjectStore {
    name: String,
    objects: RwLock<BTreeMap<String, Bytes>>,
    puts: AtomicU64,
    page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            puts: AtomicU64::new(0),
            page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }

    /// Cap listing pages at `page_size` keys (at least one).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of `put` calls that reached the store
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Seed an object without counting it as a pipeline write
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(key.into(), data.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        // the continuation token is the last key of the previous page
        let objects = self.objects.read().await;
        let start = match continuation {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(last.clone()),
            _ => None,
        };
        Ok(ListPage { keys, next })
    }
}
