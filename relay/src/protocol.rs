//! JSON shapes exchanged with the browser and with the repository dispatch API.

use serde::{Deserialize, Serialize};

/// Event type every dispatch is tagged with
pub const EVENT_TYPE: &str = "process-csv";

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields: email and file_content";

/// Upload body as sent by the browser. Fields may be absent, null or empty.
#[derive(Debug, Default, Deserialize)]
pub struct UploadBody {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub file_content: Option<String>,
}

impl UploadBody {
    /// Returns `None` if either required field is missing or empty.
    pub fn validate(self) -> Option<IncomingRequest> {
        match (self.email, self.file_content) {
            (Some(email), Some(file_content)) if !email.is_empty() && !file_content.is_empty() => {
                Some(IncomingRequest {
                    email,
                    file_content,
                })
            }
            _ => None,
        }
    }
}

/// A validated upload: both fields are non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub email: String,
    /// Base64 encoded CSV
    pub file_content: String,
}

/// How the uploaded file travels downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileReference {
    /// The base64 content, unchanged
    FileContent(String),
    /// Public URL of the stored artifact
    FileUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientPayload {
    pub email: String,
    #[serde(flatten)]
    pub file: FileReference,
}

/// Body of `POST /repos/{owner}/{repo}/dispatches`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchEvent {
    pub event_type: &'static str,
    pub client_payload: ClientPayload,
}

impl DispatchEvent {
    pub fn new(email: String, file: FileReference) -> Self {
        DispatchEvent {
            event_type: EVENT_TYPE,
            client_payload: ClientPayload { email, file },
        }
    }
}

/// Outcome of the downstream call, returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResult {
    pub ok: bool,
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorBody {
            ok: false,
            error: error.into(),
        }
    }
}
