//! Bulk archive unpacking
//!
//! [`UnpackDispatcher`] finds archives without a completion marker and
//! enqueues them; [`UnpackWorker`] consumes the queue and extracts each
//! archive's members into the store.

pub mod archive;
pub mod dispatcher;
pub mod message;
pub mod queue;
pub mod sqs;
pub mod worker;

pub use dispatcher::{is_archive_key, UnpackDispatcher};
pub use message::{marker_key, UnpackMessage};
pub use queue::{Delivery, MemoryQueue, WorkQueue};
pub use sqs::SqsQueue;
pub use worker::{ConsumeMode, HandleOutcome, UnpackWorker};
