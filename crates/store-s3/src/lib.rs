//! AWS SDK backend for the blobsync store capability.
//!
//! Implements [`blobsync_store::BlobStore`] on top of `aws-sdk-s3`, using
//! server-side `CopyObject`/`UploadPartCopy` so blob bytes never transit the
//! process. Compose-style primitives are not supported by S3 and return
//! `StoreError::Unsupported`.

mod client;
mod error;

pub use client::{AwsCredentials, S3BlobStore, S3Settings};
