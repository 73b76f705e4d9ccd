//! AWS SDK S3 client implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;

use blobsync_store::{
    BlobStore, ByteRange, ObjectInfo, ObjectPart, PartPage, StoreError,
};

use crate::error::{from_sdk, is_precondition_failed};

/// Settings for constructing an S3-backed store.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// AWS region.
    pub region: String,
    /// Static credentials; the default provider chain is used when absent.
    pub credentials: Option<AwsCredentials>,
    /// Expected bucket owner for request validation.
    pub expected_bucket_owner: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            credentials: None,
            expected_bucket_owner: None,
        }
    }
}

/// AWS credentials.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// [`BlobStore`] implementation using the AWS SDK for Rust.
///
/// All copies are server-side (`CopyObject`/`UploadPartCopy`), so blob
/// bytes never transit this process.
pub struct S3BlobStore {
    s3_client: S3Client,
    expected_bucket_owner: Option<String>,
}

impl S3BlobStore {
    /// Create a new S3 store with the default credential chain.
    pub async fn new(settings: S3Settings) -> Self {
        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()));

        let config_loader = if let Some(ref creds) = settings.credentials {
            let credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                "blobsync",
            );
            config_loader.credentials_provider(credentials)
        } else {
            config_loader
        };

        let sdk_config = config_loader.load().await;
        Self {
            s3_client: S3Client::new(&sdk_config),
            expected_bucket_owner: settings.expected_bucket_owner,
        }
    }

    /// Create a store from an existing S3 client (for testing).
    pub fn from_client(s3_client: S3Client, expected_bucket_owner: Option<String>) -> Self {
        Self {
            s3_client,
            expected_bucket_owner,
        }
    }

    fn copy_source(bucket: &str, key: &str) -> String {
        format!("{}/{}", bucket, key)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectInfo>, StoreError> {
        let mut request = self.s3_client.head_object().bucket(bucket).key(key);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        match request.send().await {
            Ok(output) => Ok(Some(ObjectInfo {
                size: output.content_length().unwrap_or(0) as u64,
                etag: output.e_tag().unwrap_or_default().to_string(),
            })),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(StoreError::Network {
                        message: service_err.to_string(),
                        retryable: false,
                    })
                }
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut request = self.s3_client.get_object().bucket(bucket).key(key);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        let output = request
            .send()
            .await
            .map_err(|err| from_sdk(bucket, key, err))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Network {
                message: err.to_string(),
                retryable: true,
            })?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StoreError> {
        let mut request = self
            .s3_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()));
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }
        if let Some(meta) = metadata {
            for (k, v) in meta {
                request = request.metadata(k, v);
            }
        }

        request
            .send()
            .await
            .map_err(|err| from_sdk(bucket, key, err))?;
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .s3_client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(ref owner) = self.expected_bucket_owner {
                request = request.expected_bucket_owner(owner);
            }
            if let Some(ref token) = continuation_token {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|err| from_sdk(bucket, prefix, err))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let mut request = self
            .s3_client
            .copy_object()
            .copy_source(Self::copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        request
            .send()
            .await
            .map_err(|err| from_sdk(src_bucket, src_key, err))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut request = self.s3_client.delete_object().bucket(bucket).key(key);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        request
            .send()
            .await
            .map_err(|err| from_sdk(bucket, key, err))?;
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let mut request = self
            .s3_client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        let output = request
            .send()
            .await
            .map_err(|err| from_sdk(bucket, key, err))?;
        output
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| StoreError::Other {
                message: format!("CreateMultipartUpload for {} returned no upload id", key),
            })
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u64,
        range: ByteRange,
        src_bucket: &str,
        src_key: &str,
        expected_source_etag: &str,
    ) -> Result<String, StoreError> {
        let mut request = self
            .s3_client
            .upload_part_copy()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .copy_source(Self::copy_source(src_bucket, src_key))
            .copy_source_range(range.to_http())
            .copy_source_if_match(expected_source_etag);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        let output = request.send().await.map_err(|err| {
            if is_precondition_failed(&err) {
                StoreError::SourceModified {
                    key: src_key.to_string(),
                    expected: expected_source_etag.to_string(),
                    actual: "(changed)".to_string(),
                }
            } else {
                from_sdk(src_bucket, src_key, err)
            }
        })?;

        output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(|etag| etag.to_string())
            .ok_or_else(|| StoreError::Other {
                message: format!("UploadPartCopy for {} part {} returned no ETag", key, part_number),
            })
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u64>,
    ) -> Result<PartPage, StoreError> {
        let mut request = self
            .s3_client
            .list_parts()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id);
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }
        if let Some(marker) = part_number_marker {
            request = request.part_number_marker(marker.to_string());
        }

        let output = request.send().await.map_err(|err| {
            if matches!(
                err.as_service_error().and_then(|e| {
                    use aws_sdk_s3::error::ProvideErrorMetadata;
                    e.code()
                }),
                Some("NoSuchUpload")
            ) {
                StoreError::UploadNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                }
            } else {
                from_sdk(bucket, key, err)
            }
        })?;

        let parts: Vec<ObjectPart> = output
            .parts()
            .iter()
            .map(|part| ObjectPart {
                part_number: part.part_number().unwrap_or(0) as u64,
                etag: part.e_tag().unwrap_or_default().to_string(),
                size: part.size().unwrap_or(0) as u64,
            })
            .collect();

        let is_truncated: bool = output.is_truncated().unwrap_or(false);
        let next_part_number_marker: Option<u64> = output
            .next_part_number_marker()
            .and_then(|marker| marker.parse().ok());

        Ok(PartPage {
            parts,
            next_part_number_marker,
            is_truncated,
        })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[ObjectPart],
    ) -> Result<(), StoreError> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();

        let mut request = self
            .s3_client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            );
        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        request
            .send()
            .await
            .map_err(|err| from_sdk(bucket, key, err))?;
        Ok(())
    }

    async fn copy_part_blob(
        &self,
        _bucket: &str,
        _part_key: &str,
        _range: ByteRange,
        _src_bucket: &str,
        _src_key: &str,
        _expected_source_etag: &str,
    ) -> Result<String, StoreError> {
        Err(StoreError::Unsupported {
            operation: "copy_part_blob",
        })
    }

    async fn compose(
        &self,
        _bucket: &str,
        _dst_key: &str,
        _part_keys: &[String],
    ) -> Result<(), StoreError> {
        Err(StoreError::Unsupported { operation: "compose" })
    }
}
