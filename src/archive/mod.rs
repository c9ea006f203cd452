//! Archive store abstraction for original uploads, plus the S3 adapter.

mod s3;

pub use s3::{AwsCredentials, S3ArchiveStore};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors raised while writing to the archive store.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Endpoint configuration could not be turned into a request URL.
    #[error("Invalid archive endpoint: {0}")]
    InvalidEndpoint(String),
    /// HTTP layer failed before receiving a response.
    #[error("Archive request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The store responded with an unexpected status code.
    #[error("Unexpected archive response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Object written to the archive.
#[derive(Debug, Clone)]
pub struct ArchiveObject {
    /// Destination key inside the bucket.
    pub key: String,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// MIME type recorded on the object.
    pub content_type: String,
    /// User metadata stored with the object, as `(name, value)` pairs.
    pub metadata: Vec<(String, String)>,
}

/// Durable store for original uploaded files.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Store the object and return a URL referencing it.
    async fn put_object(&self, object: ArchiveObject) -> Result<String, ArchiveError>;
}

/// Build the archive key for an upload: `documents/YYYY/MM/DD/<8 hex>_<filename>`.
pub fn archive_key(filename: &str, uploaded_at: OffsetDateTime) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "documents/{:04}/{:02}/{:02}/{}_{}",
        uploaded_at.year(),
        u8::from(uploaded_at.month()),
        uploaded_at.day(),
        &suffix[..8],
        filename
    )
}
