//! Mapping from AWS SDK errors to `StoreError`.

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use blobsync_store::StoreError;

/// Error codes S3 reports for request throttling.
const THROTTLE_CODES: &[&str] = &["SlowDown", "Throttling", "RequestLimitExceeded"];

/// Convert an SDK error into the backend-agnostic taxonomy.
///
/// Dispatch and timeout failures become retryable network errors; service
/// errors are classified by their S3 error code. Precondition failures
/// (`copy_source_if_match` misses) are handled by the call sites that set
/// the condition, before falling back here.
pub(crate) fn from_sdk<E>(bucket: &str, key: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(ctx) => {
            let code: &str = ctx.err().code().unwrap_or_default();
            let message: String = ctx
                .err()
                .message()
                .unwrap_or("no error message")
                .to_string();
            if code == "NoSuchKey" || code == "NotFound" {
                StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else if code == "AccessDenied" {
                StoreError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    message,
                }
            } else if THROTTLE_CODES.contains(&code) {
                StoreError::Throttled { message }
            } else {
                StoreError::Network {
                    message: format!("{}: {}", code, message),
                    retryable: false,
                }
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            StoreError::Network {
                message: format!("{:?}", err),
                retryable: true,
            }
        }
        _ => StoreError::Network {
            message: format!("{:?}", err),
            retryable: false,
        },
    }
}

/// True when the SDK error is an HTTP 412 from a conditioned copy.
pub(crate) fn is_precondition_failed<E>(err: &SdkError<E>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(err, SdkError::ServiceError(ctx) if ctx.err().code() == Some("PreconditionFailed"))
}
