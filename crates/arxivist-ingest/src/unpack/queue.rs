//! FIFO work queue with per-group serialization
//!
//! Contract shared by every implementation:
//!
//! - a message sent with a deduplication id that was already seen is dropped
//! - messages of one group are delivered in send order, and at most one of
//!   them is in flight (received but not acked) at any time
//! - delivery is at-least-once; an un-acked delivery comes back later

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{IngestError, Result};

/// A received message and the handle needed to ack it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, body: &str, group_id: &str, dedup_id: &str) -> Result<()>;

    /// Up to `max` deliveries; may return an empty batch.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, receipt: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    group_id: String,
    body: String,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedMessage>,
    in_flight: HashMap<String, QueuedMessage>,
    /// Deduplication ids seen for the lifetime of the queue
    seen: HashSet<String>,
    next_receipt: u64,
    sent: u64,
}

/// In-process queue for tests and single-host runs
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| IngestError::permanent("memory_queue", "queue state poisoned"))
    }

    /// Messages waiting to be received
    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or_default()
    }

    /// Messages accepted by `send` after deduplication
    pub fn sent(&self) -> u64 {
        self.lock().map(|s| s.sent).unwrap_or_default()
    }

    /// Make an un-acked delivery visible again, as a visibility timeout would.
    pub fn release(&self, receipt: &str) -> Result<()> {
        let mut state = self.lock()?;
        let message = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| IngestError::permanent("release", format!("unknown receipt {}", receipt)))?;
        state.pending.push_front(message);
        Ok(())
    }

    /// Release every in-flight delivery.
    pub fn release_all(&self) -> Result<()> {
        let mut state = self.lock()?;
        let mut released: Vec<(String, QueuedMessage)> = state.in_flight.drain().collect();
        // oldest receipt first, so group order survives the release
        released.sort_by_key(|(receipt, _)| receipt.parse::<u64>().unwrap_or(u64::MAX));
        for (_, message) in released.into_iter().rev() {
            state.pending.push_front(message);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn send(&self, body: &str, group_id: &str, dedup_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        if !state.seen.insert(dedup_id.to_string()) {
            debug!(dedup_id, "Duplicate message dropped");
            return Ok(());
        }
        state.pending.push_back(QueuedMessage {
            group_id: group_id.to_string(),
            body: body.to_string(),
        });
        state.sent += 1;
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut state = self.lock()?;
        let mut blocked: HashSet<String> = state
            .in_flight
            .values()
            .map(|m| m.group_id.clone())
            .collect();

        let mut deliveries = Vec::new();
        let mut index = 0;
        while index < state.pending.len() && deliveries.len() < max {
            let group = state.pending[index].group_id.clone();
            if !blocked.insert(group) {
                index += 1;
                continue;
            }
            let Some(message) = state.pending.remove(index) else {
                break;
            };
            state.next_receipt += 1;
            let receipt = state.next_receipt.to_string();
            deliveries.push(Delivery {
                receipt: receipt.clone(),
                body: message.body.clone(),
            });
            state.in_flight.insert(receipt, message);
        }

        Ok(deliveries)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| IngestError::permanent("ack", format!("unknown receipt {}", receipt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_dedup_id_is_dropped() {
        let queue = MemoryQueue::new();
        queue.send("a", "g", "d1").await.unwrap();
        queue.send("a", "g", "d1").await.unwrap();

        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.sent(), 1);
    }

    #[tokio::test]
    async fn test_one_in_flight_per_group() {
        let queue = MemoryQueue::new();
        queue.send("first", "g1", "1").await.unwrap();
        queue.send("second", "g1", "2").await.unwrap();
        queue.send("other", "g2", "3").await.unwrap();

        let batch = queue.receive(10).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "other"]);

        // g1 stays blocked until "first" is acked
        assert!(queue.receive(10).await.unwrap().is_empty());

        queue.ack(&batch[0].receipt).await.unwrap();
        let next = queue.receive(10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].body, "second");
    }

    #[tokio::test]
    async fn test_released_delivery_comes_back_first() {
        let queue = MemoryQueue::new();
        queue.send("first", "g1", "1").await.unwrap();
        queue.send("second", "g1", "2").await.unwrap();

        let batch = queue.receive(1).await.unwrap();
        queue.release(&batch[0].receipt).unwrap();

        let again = queue.receive(1).await.unwrap();
        assert_eq!(again[0].body, "first");
        assert_ne!(again[0].receipt, batch[0].receipt);
    }

    #[tokio::test]
    async fn test_release_all_keeps_order() {
        let queue = MemoryQueue::new();
        queue.send("a", "g1", "1").await.unwrap();
        queue.send("b", "g2", "2").await.unwrap();

        let batch = queue.receive(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        queue.release_all().unwrap();

        let again = queue.receive(10).await.unwrap();
        let bodies: Vec<_> = again.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_receipt_ack_fails() {
        let queue = MemoryQueue::new();
        assert!(queue.ack("42").await.is_err());
    }
}
