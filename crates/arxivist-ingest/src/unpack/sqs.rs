use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::{debug, info, instrument};

use super::queue::{Delivery, WorkQueue};
use crate::aws::{classify_sdk_error, load_aws_config};
use crate::config::QueueConfig;
use crate::error::{IngestError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use crate::storage::config::StorageConfig;

/// SQS limit for one `ReceiveMessage` call.
const MAX_BATCH: usize = 10;

/// SQS FIFO queue (`*.fifo`) holding untar messages
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    wait_secs: i32,
    visibility_timeout_secs: i32,
    retry: RetryPolicy,
}

impl SqsQueue {
    pub async fn new(storage: &StorageConfig, config: &QueueConfig, retry: RetryPolicy) -> Result<Self> {
        let queue_url = config
            .require_url()
            .map_err(|e| IngestError::Config(e.to_string()))?
            .to_string();

        let shared = load_aws_config(storage).await;
        let client = Client::new(&shared);

        info!(queue_url = %queue_url, "Queue client initialized");
        Ok(Self::from_client(client, queue_url, config, retry))
    }

    pub fn from_client(
        client: Client,
        queue_url: impl Into<String>,
        config: &QueueConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            wait_secs: config.wait_secs,
            visibility_timeout_secs: config.visibility_timeout_secs,
            retry,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    #[instrument(skip(self, body))]
    async fn send(&self, body: &str, group_id: &str, dedup_id: &str) -> Result<()> {
        let (client, url) = (&self.client, self.queue_url.as_str());

        retry_transient(&self.retry, "send_message", || async move {
            client
                .send_message()
                .queue_url(url)
                .message_body(body)
                .message_group_id(group_id)
                .message_deduplication_id(dedup_id)
                .send()
                .await
                .map_err(|e| classify_sdk_error("send_message", dedup_id, e))
        })
        .await?;

        info!("Queued message");
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let (client, url) = (&self.client, self.queue_url.as_str());
        let batch = max.clamp(1, MAX_BATCH) as i32;
        let (wait, visibility) = (self.wait_secs, self.visibility_timeout_secs);

        let output = retry_transient(&self.retry, "receive_message", || async move {
            client
                .receive_message()
                .queue_url(url)
                .max_number_of_messages(batch)
                .wait_time_seconds(wait)
                .visibility_timeout(visibility)
                .send()
                .await
                .map_err(|e| classify_sdk_error("receive_message", url, e))
        })
        .await?;

        let deliveries: Vec<Delivery> = output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(Delivery {
                    receipt: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect();

        debug!(count = deliveries.len(), "Received messages");
        Ok(deliveries)
    }

    #[instrument(skip(self, receipt))]
    async fn ack(&self, receipt: &str) -> Result<()> {
        let (client, url) = (&self.client, self.queue_url.as_str());

        retry_transient(&self.retry, "delete_message", || async move {
            client
                .delete_message()
                .queue_url(url)
                .receipt_handle(receipt)
                .send()
                .await
                .map_err(|e| classify_sdk_error("delete_message", url, e))
        })
        .await?;

        Ok(())
    }
}
