// Boundary collaborators of the wizard and list controllers
//
// The record service, the attachment upload endpoint and the notification sink are reached
// only through these traits. Production code uses the HTTP implementations; the smoke runner
// and tests use the in-memory ones.

pub mod http;
pub mod memory;
pub mod notify;

use crate::models::{Attachment, DecisionRequest, Record, RecordId, RecordPage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub use notify::{LogNotifier, Notifier, NotifyLevel, RecordingNotifier};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Server rejected the payload (HTTP 400/422). Field names as reported by the server.
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: BTreeMap<String, String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(String),

    #[error("unexpected response from server: {0}")]
    Decode(String),

    #[error("attachment '{file_name}' could not be read: {message}")]
    LocalFile { file_name: String, message: String },
}

impl ApiError {
    /// Failures worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        // Drop the URL so credentials embedded in the base URL never reach messages/logs.
        let e = e.without_url();
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn create_record(&self, payload: Value) -> Result<RecordId, ApiError>;

    async fn update_record(&self, id: &RecordId, payload: Value) -> Result<Record, ApiError>;

    async fn fetch_record(&self, id: &RecordId) -> Result<Record, ApiError>;

    async fn list_records(&self, skip: u64, limit: u32) -> Result<RecordPage, ApiError>;

    async fn delete_record(&self, id: &RecordId) -> Result<(), ApiError>;
}

#[async_trait]
pub trait DecisionApi: Send + Sync {
    async fn decide(&self, id: &RecordId, request: &DecisionRequest) -> Result<Record, ApiError>;
}

/// Upload failure tagged with the index of the file that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub index: usize,
    pub error: ApiError,
    /// URLs of the files before `index`, which did upload.
    pub uploaded: Vec<String>,
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Upload one file and return its URL. Already-uploaded attachments return their URL.
    async fn upload(&self, file: &Attachment) -> Result<String, ApiError>;

    /// Upload files one after another, stopping at the first failure.
    async fn upload_many(&self, files: &[Attachment]) -> Result<Vec<String>, UploadFailure> {
        let mut urls = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            match self.upload(file).await {
                Ok(url) => urls.push(url),
                Err(error) => {
                    return Err(UploadFailure {
                        index,
                        error,
                        uploaded: urls,
                    })
                }
            }
        }
        Ok(urls)
    }
}
