//! Incremental OAI-PMH harvest
//!
//! Walks the feed page by page, stores each record's metadata and PDF, and
//! advances the durable cursor once per completed page.

pub mod keys;
pub mod oai;
pub mod pipeline;
pub mod record;
pub mod xml;

pub use keys::StorageKeys;
pub use oai::{FeedClient, ListRequest, OaiClient, Page};
pub use pipeline::{HarvestOptions, HarvestOutcome, Harvester};
pub use record::{check_identity_shape, Record, ShapeViolation};
