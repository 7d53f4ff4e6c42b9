//! Rate-limited artifact fetcher
//!
//! Downloads one PDF per record identity from the artifact origin, never
//! faster than the configured minimum interval, and sorts each response into
//! one of three outcomes:
//!
//! - body starts with `%PDF`: [`FetchOutcome::Artifact`]
//! - body contains the unavailable marker: [`FetchOutcome::Absent`]
//! - anything else: [`IngestError::FetchFailed`]

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::FetchConfig;
use crate::error::{IngestError, Result};
use crate::retry::{retry_transient, RetryPolicy};

pub mod rate_limiter;

pub use rate_limiter::{RateLimitSlot, RateLimiter};

/// Leading bytes of every PDF document.
pub const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Artifact(Bytes),
    /// The origin says no artifact exists for this identity.
    Absent,
}

/// Anything that can produce the artifact for a record identity
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, identity: &str) -> Result<FetchOutcome>;
}

/// HTTP fetcher for `{base_url}/{identity}`
pub struct ArtifactFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    unavailable_marker: String,
    retry: RetryPolicy,
}

impl ArtifactFetcher {
    pub fn new(config: &FetchConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::new(config.min_interval())),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            unavailable_marker: config.unavailable_marker.clone(),
            retry,
        })
    }

    /// Share a limiter with other fetchers hitting the same origin.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn url_for(&self, identity: &str) -> String {
        format!("{}/{}", self.base_url, identity)
    }

    /// Sort a response body into an outcome.
    pub fn classify(
        &self,
        identity: &str,
        url: &str,
        status: StatusCode,
        body: Bytes,
    ) -> Result<FetchOutcome> {
        if body.starts_with(PDF_MAGIC) {
            return Ok(FetchOutcome::Artifact(body));
        }

        if String::from_utf8_lossy(&body).contains(self.unavailable_marker.as_str()) {
            return Ok(FetchOutcome::Absent);
        }

        Err(IngestError::FetchFailed {
            identity: identity.to_string(),
            url: url.to_string(),
            reason: format!("HTTP {}, no PDF signature in {} byte body", status, body.len()),
        })
    }

    async fn attempt(&self, identity: &str, url: &str) -> Result<FetchOutcome> {
        // held until the body is read so requests to the origin never overlap
        let mut slot = self.limiter.acquire().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::transient("fetch_artifact", format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            if let Some(delay) = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(rate_limiter::parse_retry_after)
            {
                warn!(url = %url, delay_secs = delay.as_secs(), "Origin asked us to back off");
                slot.defer(delay);
            }
            return Err(IngestError::transient(
                "fetch_artifact",
                format!("{} returned {}", url, status),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::transient("fetch_artifact", format!("{}: {}", url, e)))?;
        drop(slot);

        self.classify(identity, url, status, body)
    }
}

#[async_trait]
impl ArtifactSource for ArtifactFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, identity: &str) -> Result<FetchOutcome> {
        let url = self.url_for(identity);
        debug!(url = %url, "Fetching artifact");

        let target = url.as_str();
        let outcome =
            retry_transient(&self.retry, "fetch_artifact", || self.attempt(identity, target)).await?;

        match &outcome {
            FetchOutcome::Artifact(body) => info!(bytes = body.len(), "Fetched artifact"),
            FetchOutcome::Absent => info!("Artifact unavailable at origin"),
        }
        Ok(outcome)
    }
}
