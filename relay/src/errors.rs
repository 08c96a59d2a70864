use crate::blob_store::BlobStoreError;
use crate::config::ValidationError;
use thiserror::Error;

/// Errors that abort a relay request. The `Display` text is returned to the
/// caller as the `error` field of a 500 response.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body exceeds {0} bytes")]
    RequestBodyTooLarge(usize),

    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("file_content is not valid base64: {0}")]
    InvalidFileContent(#[from] base64::DecodeError),

    #[error("Blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("Dispatch request failed: {0}")]
    DispatchFailed(#[from] reqwest::Error),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
