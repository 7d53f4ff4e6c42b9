//! Arxivist Ingest Library
//!
//! Two decoupled pipelines over one S3 bucket:
//!
//! - **Harvest**: walk the arXiv OAI-PMH feed page by page, store each
//!   record's metadata and (rate-limited) PDF, and checkpoint the feed
//!   position after every completed page.
//! - **Unpack**: enqueue bulk tar archives that have no completion marker
//!   and extract their members from a FIFO queue, writing the marker last.
//!
//! Every write is idempotent, so both pipelines can be rerun or redelivered
//! at any point without duplicating work.
//!
//! # Example
//!
//! ```no_run
//! use arxivist_ingest::{checkpoint::MemoryCheckpointStore, storage::MemoryObjectStore};
//! use arxivist_ingest::fetch::ArtifactFetcher;
//! use arxivist_ingest::harvest::{HarvestOptions, Harvester, OaiClient};
//! use arxivist_ingest::Config;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let retry = config.retry.policy();
//!     let harvester = Harvester::new(
//!         Arc::new(OaiClient::new(&config.harvest, &config.fetch.user_agent, retry)?),
//!         Arc::new(MemoryObjectStore::default()),
//!         Arc::new(ArtifactFetcher::new(&config.fetch, retry)?),
//!         Arc::new(MemoryCheckpointStore::new()),
//!         HarvestOptions {
//!             epoch: config.harvest.epoch.clone(),
//!             partition_keys: false,
//!         },
//!     );
//!     let outcome = harvester.run_from_checkpoint(&CancellationToken::new()).await?;
//!     println!("{:?}", outcome.cursor);
//!     Ok(())
//! }
//! ```

pub mod aws;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fetch;
pub mod harvest;
pub mod retry;
pub mod stats;
pub mod storage;
pub mod unpack;

pub use config::Config;
pub use error::{IngestError, Result};
