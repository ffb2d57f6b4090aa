// HTTP implementations of the record service and upload endpoint (JSON over HTTP)
//
// Endpoints, relative to `api.base_url`:
//   POST   /{resource}                 create          -> { id, ... }
//   PUT    /{resource}/{id}            update          -> record
//   GET    /{resource}/{id}            fetch           -> record
//   GET    /{resource}?skip=&limit=    list            -> { items, total }
//   DELETE /{resource}/{id}            delete
//   POST   /{resource}/{id}/{decision} accept/decline/confirm -> record
//   POST   /uploads                    multipart file  -> { url }

use super::{ApiError, AttachmentUploader, DecisionApi, RecordApi};
use crate::config::ApiConfig;
use crate::models::responses::{ServerErrorBody, UploadResponse};
use crate::models::{Attachment, DecisionRequest, ListQuery, Record, RecordId, RecordPage};
use crate::utils::logging::mask_url_credentials;
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Instant;
use url::Url;

fn build_client(cfg: &ApiConfig) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(cfg.timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Append path segments to the base URL, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ApiError::Transport("base URL cannot carry a path".to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Map a non-success response to an ApiError.
pub(crate) fn error_from_response(status: u16, body: &str) -> ApiError {
    let parsed: ServerErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Request failed")
                .to_string()
        });

    match status {
        400 | 422 => ApiError::Validation {
            message,
            field_errors: parsed.field_errors(),
        },
        404 => ApiError::NotFound(message),
        _ => ApiError::Status { status, message },
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.without_url().to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_from_response(status.as_u16(), &body))
}

async fn read_empty(resp: Response) -> Result<(), ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_from_response(status.as_u16(), &body))
}

pub struct HttpRecordApi {
    client: Client,
    base: Url,
    resource: String,
}

impl HttpRecordApi {
    pub fn new(cfg: &ApiConfig) -> anyhow::Result<Self> {
        let base = cfg.parsed_base_url()?;
        info!(
            "[PHASE: api] HTTP record client ready (base={}, resource={}, timeout_s={})",
            mask_url_credentials(base.as_str()),
            cfg.resource,
            cfg.timeout_secs
        );
        Ok(Self {
            client: build_client(cfg)?,
            base,
            resource: cfg.resource.trim().to_string(),
        })
    }

    fn collection_url(&self) -> Result<Url, ApiError> {
        endpoint(&self.base, &[self.resource.as_str()])
    }

    fn item_url(&self, id: &RecordId) -> Result<Url, ApiError> {
        endpoint(&self.base, &[self.resource.as_str(), id.as_str()])
    }
}

#[async_trait]
impl RecordApi for HttpRecordApi {
    async fn create_record(&self, payload: Value) -> Result<RecordId, ApiError> {
        let started = Instant::now();
        let resp = self
            .client
            .post(self.collection_url()?)
            .json(&payload)
            .send()
            .await?;
        let record: Record = read_json(resp).await?;
        info!(
            "[PHASE: api] [STEP: create] {} created (id={}, duration_ms={})",
            self.resource,
            record.id,
            started.elapsed().as_millis()
        );
        Ok(record.id)
    }

    async fn update_record(&self, id: &RecordId, payload: Value) -> Result<Record, ApiError> {
        let started = Instant::now();
        let resp = self
            .client
            .put(self.item_url(id)?)
            .json(&payload)
            .send()
            .await?;
        let record: Record = read_json(resp).await?;
        info!(
            "[PHASE: api] [STEP: update] {} updated (id={}, duration_ms={})",
            self.resource,
            id,
            started.elapsed().as_millis()
        );
        Ok(record)
    }

    async fn fetch_record(&self, id: &RecordId) -> Result<Record, ApiError> {
        debug!("[PHASE: api] [STEP: fetch] {} id={}", self.resource, id);
        let resp = self.client.get(self.item_url(id)?).send().await?;
        read_json(resp).await
    }

    async fn list_records(&self, skip: u64, limit: u32) -> Result<RecordPage, ApiError> {
        debug!(
            "[PHASE: api] [STEP: list] {} skip={} limit={}",
            self.resource, skip, limit
        );
        let resp = self
            .client
            .get(self.collection_url()?)
            .query(&ListQuery { skip, limit })
            .send()
            .await?;
        read_json(resp).await
    }

    async fn delete_record(&self, id: &RecordId) -> Result<(), ApiError> {
        let resp = self.client.delete(self.item_url(id)?).send().await?;
        read_empty(resp).await?;
        info!("[PHASE: api] [STEP: delete] {} deleted (id={})", self.resource, id);
        Ok(())
    }
}

#[async_trait]
impl DecisionApi for HttpRecordApi {
    async fn decide(&self, id: &RecordId, request: &DecisionRequest) -> Result<Record, ApiError> {
        let url = endpoint(
            &self.base,
            &[self.resource.as_str(), id.as_str(), request.decision.as_str()],
        )?;
        let resp = self.client.post(url).json(request).send().await?;
        let record = read_json(resp).await?;
        info!(
            "[PHASE: api] [STEP: decision] {} {} (id={}, reason_given={})",
            self.resource,
            request.decision.as_str(),
            id,
            request.reason.is_some()
        );
        Ok(record)
    }
}

pub struct HttpAttachmentUploader {
    client: Client,
    base: Url,
}

impl HttpAttachmentUploader {
    pub fn new(cfg: &ApiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(cfg)?,
            base: cfg.parsed_base_url()?,
        })
    }
}

#[async_trait]
impl AttachmentUploader for HttpAttachmentUploader {
    async fn upload(&self, file: &Attachment) -> Result<String, ApiError> {
        let (file_name, path, content_type) = match file {
            Attachment::Uploaded { url, .. } => return Ok(url.clone()),
            Attachment::Pending {
                file_name,
                path,
                content_type,
            } => (file_name, path, content_type),
        };

        let started = Instant::now();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::LocalFile {
                file_name: file_name.clone(),
                message: e.to_string(),
            })?;
        let size = bytes.len();

        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.clone());
        if let Some(ct) = content_type {
            part = part.mime_str(ct).map_err(|e| ApiError::LocalFile {
                file_name: file_name.clone(),
                message: format!("invalid content type '{}': {}", ct, e.without_url()),
            })?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(endpoint(&self.base, &["uploads"])?)
            .multipart(form)
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "[PHASE: submission] [STEP: upload] upload of '{}' failed before response",
                    file_name
                );
                return Err(e.into());
            }
        };
        let uploaded: UploadResponse = read_json(resp).await?;
        info!(
            "[PHASE: submission] [STEP: upload] '{}' uploaded (bytes={}, duration_ms={})",
            file_name,
            size,
            started.elapsed().as_millis()
        );
        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_status_maps_field_errors() {
        let err = error_from_response(
            422,
            r#"{"message":"Invalid contract","errors":{"endDate":"must be after startDate"}}"#,
        );
        match err {
            ApiError::Validation {
                message,
                field_errors,
            } => {
                assert_eq!(message, "Invalid contract");
                assert_eq!(field_errors["endDate"], "must be after startDate");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn non_json_error_body_uses_status_reason() {
        let err = error_from_response(503, "<html>upstream down</html>");
        assert_eq!(
            err,
            ApiError::Status {
                status: 503,
                message: "Service Unavailable".to_string()
            }
        );
    }

    #[test]
    fn not_found_is_distinguished() {
        assert!(matches!(
            error_from_response(404, ""),
            ApiError::NotFound(_)
        ));
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let base = Url::parse("https://bizdesk.example.com/api/").expect("url");
        let url = endpoint(&base, &["contracts", "a b"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://bizdesk.example.com/api/contracts/a%20b");

        let bare = Url::parse("https://bizdesk.example.com/api").expect("url");
        let url = endpoint(&bare, &["uploads"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://bizdesk.example.com/api/uploads");
    }
}
