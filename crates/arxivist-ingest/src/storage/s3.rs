//! S3-backed [`ObjectStore`]

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use tracing::{debug, info, instrument};

use super::config::StorageConfig;
use super::{ListPage, ObjectStore};
use crate::aws::{classify_sdk_error, load_aws_config};
use crate::error::{IngestError, Result};
use crate::retry::{retry_transient, RetryPolicy};

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3ObjectStore {
    pub async fn new(config: &StorageConfig, retry: RetryPolicy) -> Result<Self> {
        debug!("Initializing storage with config: {:?}", config);

        let shared = load_aws_config(config).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Ok(Self::from_client(client, config.bucket.clone(), retry))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            retry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let (client, bucket) = (&self.client, self.bucket.as_str());

        let result = retry_transient(&self.retry, "head_object", || async move {
            client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify_sdk_error("head_object", key, e))
        })
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(IngestError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let (client, bucket) = (&self.client, self.bucket.as_str());
        debug!("Downloading from s3://{}/{}", bucket, key);

        let data = retry_transient(&self.retry, "get_object", || async move {
            let response = client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify_sdk_error("get_object", key, e))?;

            response
                .body
                .collect()
                .await
                .map(|body| body.into_bytes())
                .map_err(|e| IngestError::transient("get_object", format!("{}: {}", key, e)))
        })
        .await?;

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        let (client, bucket) = (&self.client, self.bucket.as_str());

        retry_transient(&self.retry, "put_object", || {
            let data = data.clone();
            async move {
                let mut request = client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(data));

                if let Some(ct) = content_type {
                    request = request.content_type(ct);
                }

                request
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error("put_object", key, e))
            }
        })
        .await?;

        info!("Successfully uploaded to s3://{}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        let (client, bucket) = (&self.client, self.bucket.as_str());
        let page = retry_transient(&self.retry, "list_objects_v2", || async move {
            client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.map(str::to_string))
                .send()
                .await
                .map_err(|e| classify_sdk_error("list_objects_v2", prefix, e))
        })
        .await?;

        let keys: Vec<String> = page
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();
        let next = match page.next_continuation_token() {
            Some(next) if page.is_truncated().unwrap_or(false) => Some(next.to_string()),
            _ => None,
        };

        debug!(prefix = %prefix, count = keys.len(), more = next.is_some(), "Listed objects");
        Ok(ListPage { keys, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_name_is_bucket() {
        let store = S3ObjectStore::from_client(
            Client::from_conf(aws_sdk_s3::Config::builder().build()),
            "arxivist",
            RetryPolicy::none(),
        );
        assert_eq!(store.name(), "arxivist");
        assert_eq!(store.bucket(), "arxivist");
    }
}
