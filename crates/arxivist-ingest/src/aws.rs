//! Shared AWS SDK plumbing for the S3 store and the SQS queue

use aws_config::timeout::TimeoutConfig;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};

use crate::error::IngestError;
use crate::storage::config::StorageConfig;

/// Shared AWS configuration for the S3 and SQS clients.
///
/// Static credentials from [`StorageConfig`] win; otherwise the default
/// provider chain (environment, profile, instance role) applies. Every call
/// is bounded per attempt and per operation, so a stalled transfer surfaces
/// as a transient timeout instead of hanging a worker.
pub async fn load_aws_config(config: &StorageConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .timeout_config(timeout_config(config));

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "arxivist-static",
        ));
    }

    loader.load().await
}

fn timeout_config(config: &StorageConfig) -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(config.connect_timeout())
        .operation_attempt_timeout(config.attempt_timeout())
        .operation_timeout(config.operation_timeout())
        .build()
}

/// Map an SDK failure onto the retry taxonomy.
///
/// Timeouts, dispatch failures, throttling and 5xx responses are transient;
/// 404 is `NotFound`; everything else (403, malformed keys, ...) is permanent.
pub(crate) fn classify_sdk_error<E>(
    operation: &str,
    key: &str,
    err: SdkError<E, HttpResponse>,
) -> IngestError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("{}: {}", key, DisplayErrorContext(&err));

    match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => {
            IngestError::transient(operation, message)
        },
        (_, Some(404)) => IngestError::NotFound(key.to_string()),
        (_, Some(code)) if code >= 500 || code == 429 || code == 408 => {
            IngestError::transient(operation, message)
        },
        (SdkError::ResponseError(_), _) => IngestError::transient(operation, message),
        _ => IngestError::permanent(operation, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use aws_sdk_s3::operation::head_object::HeadObjectError;

    #[test]
    fn test_timeout_is_transient() {
        let err: SdkError<HeadObjectError, HttpResponse> = SdkError::timeout_error("slow network");
        assert!(classify_sdk_error("head_object", "pdf/a.pdf", err).is_transient());
    }

    #[test]
    fn test_construction_failure_is_permanent() {
        let err: SdkError<HeadObjectError, HttpResponse> =
            SdkError::construction_failure("invalid key");
        let classified = classify_sdk_error("head_object", "pdf/a.pdf", err);
        assert!(matches!(classified, IngestError::Permanent { .. }));
    }

    #[tokio::test]
    async fn test_static_credentials_are_used() {
        let config = StorageConfig::for_minio("http://localhost:9000", "arxivist");
        let shared = load_aws_config(&config).await;
        assert_eq!(shared.region().map(|r| r.as_ref()), Some("us-east-1"));
        assert!(shared.credentials_provider().is_some());
    }

    #[tokio::test]
    async fn test_sdk_config_carries_timeouts() {
        let config = StorageConfig {
            connect_timeout_secs: 5,
            attempt_timeout_secs: 900,
            operation_timeout_secs: 2700,
            ..StorageConfig::for_minio("http://localhost:9000", "arxivist")
        };
        let shared = load_aws_config(&config).await;
        let timeouts = shared.timeout_config().unwrap();

        assert_eq!(timeouts.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(timeouts.operation_attempt_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(timeouts.operation_timeout(), Some(Duration::from_secs(2700)));
    }
}
