// In-process record service and uploader
//
// Behaves like the HTTP service (ids, paging, 404s) and supports failure injection, so the
// wizard smoke runner and tests exercise the real coordinator paths without a network.

use super::{ApiError, AttachmentUploader, DecisionApi, RecordApi};
use crate::models::{Attachment, DecisionRequest, Record, RecordId, RecordPage};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteCall {
    Create(Value),
    Update(RecordId, Value),
    Delete(RecordId),
    Decide(RecordId, DecisionRequest),
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<Record>,
    next_id: u64,
    writes: Vec<WriteCall>,
    queued_failures: VecDeque<ApiError>,
}

#[derive(Debug, Default)]
pub struct InMemoryRecordApi {
    inner: Mutex<MemoryInner>,
}

impl InMemoryRecordApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate `count` records built by `make(n)` (1-based).
    pub fn seeded(count: usize, make: impl Fn(usize) -> Map<String, Value>) -> Self {
        let api = Self::new();
        {
            let mut inner = api.lock();
            for n in 1..=count {
                let id = inner.allocate_id();
                inner.records.push(Record {
                    id,
                    fields: make(n),
                });
            }
        }
        api
    }

    /// The next write (create/update/delete/decide) fails with `err`.
    pub fn fail_next_write(&self, err: ApiError) {
        self.lock().queued_failures.push_back(err);
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.lock().writes.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| matches!(w, WriteCall::Create(_)))
            .count()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryInner {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId::new(self.next_id.to_string())
    }

    fn record_write(&mut self, call: WriteCall) -> Result<(), ApiError> {
        self.writes.push(call);
        match self.queued_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn position(&self, id: &RecordId) -> Result<usize, ApiError> {
        self.records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("record {}", id)))
    }
}

fn into_fields(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(mut map) => {
            map.remove("id");
            map
        }
        _ => Map::new(),
    }
}

#[async_trait]
impl RecordApi for InMemoryRecordApi {
    async fn create_record(&self, payload: Value) -> Result<RecordId, ApiError> {
        let mut inner = self.lock();
        inner.record_write(WriteCall::Create(payload.clone()))?;
        let id = inner.allocate_id();
        inner.records.push(Record {
            id: id.clone(),
            fields: into_fields(payload),
        });
        Ok(id)
    }

    async fn update_record(&self, id: &RecordId, payload: Value) -> Result<Record, ApiError> {
        let mut inner = self.lock();
        inner.record_write(WriteCall::Update(id.clone(), payload.clone()))?;
        let idx = inner.position(id)?;
        inner.records[idx].fields = into_fields(payload);
        Ok(inner.records[idx].clone())
    }

    async fn fetch_record(&self, id: &RecordId) -> Result<Record, ApiError> {
        let inner = self.lock();
        let idx = inner.position(id)?;
        Ok(inner.records[idx].clone())
    }

    async fn list_records(&self, skip: u64, limit: u32) -> Result<RecordPage, ApiError> {
        let inner = self.lock();
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let items = inner
            .records
            .iter()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(RecordPage {
            items,
            total: inner.records.len() as u64,
        })
    }

    async fn delete_record(&self, id: &RecordId) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.record_write(WriteCall::Delete(id.clone()))?;
        let idx = inner.position(id)?;
        inner.records.remove(idx);
        Ok(())
    }
}

#[async_trait]
impl DecisionApi for InMemoryRecordApi {
    async fn decide(&self, id: &RecordId, request: &DecisionRequest) -> Result<Record, ApiError> {
        let mut inner = self.lock();
        inner.record_write(WriteCall::Decide(id.clone(), request.clone()))?;
        let idx = inner.position(id)?;
        let record = &mut inner.records[idx];
        record.fields.insert(
            "status".to_string(),
            Value::String(format!("{}ed", request.decision.as_str().trim_end_matches('e'))),
        );
        if let Some(reason) = &request.reason {
            record
                .fields
                .insert("decisionReason".to_string(), Value::String(reason.clone()));
        }
        Ok(record.clone())
    }
}

/// Uploader that hands out `memory://` URLs. Optionally fails the n-th upload call (0-based).
#[derive(Debug, Default)]
pub struct InMemoryUploader {
    fail_at: Option<usize>,
    calls: AtomicUsize,
    uploaded: Mutex<Vec<String>>,
}

impl InMemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AttachmentUploader for InMemoryUploader {
    async fn upload(&self, file: &Attachment) -> Result<String, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Attachment::Uploaded { url, .. } = file {
            return Ok(url.clone());
        }
        if self.fail_at == Some(call) {
            return Err(ApiError::Status {
                status: 502,
                message: format!("upload of '{}' rejected", file.file_name()),
            });
        }
        let url = format!("memory://uploads/{}/{}", call, file.file_name());
        self.uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.clone());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DecisionKind;
    use serde_json::json;

    fn titled(n: usize) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("title".to_string(), json!(format!("Contract {}", n)));
        m
    }

    #[tokio::test]
    async fn list_pages_through_seeded_records() {
        let api = InMemoryRecordApi::seeded(25, titled);
        let page = api.list_records(20, 10).await.expect("list");
        assert_eq!(page.total, 25);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].fields["title"], json!("Contract 21"));
    }

    #[tokio::test]
    async fn queued_failure_applies_to_next_write_only() {
        let api = InMemoryRecordApi::new();
        api.fail_next_write(ApiError::Transport("offline".to_string()));
        assert!(api.create_record(json!({"title": "a"})).await.is_err());
        assert!(api.create_record(json!({"title": "b"})).await.is_ok());
        assert_eq!(api.create_calls(), 2);
        assert_eq!(api.records().len(), 1);
    }

    #[tokio::test]
    async fn decisions_set_status() {
        let api = InMemoryRecordApi::seeded(1, titled);
        let id = RecordId::new("1");
        let record = api
            .decide(
                &id,
                &DecisionRequest {
                    decision: DecisionKind::Decline,
                    reason: Some("Budget was not approved".to_string()),
                },
            )
            .await
            .expect("decide");
        assert_eq!(record.fields["status"], json!("declined"));
        assert_eq!(record.fields["decisionReason"], json!("Budget was not approved"));
    }

    #[tokio::test]
    async fn uploader_fails_the_configured_call() {
        let uploader = InMemoryUploader::failing_at(1);
        let files = vec![
            Attachment::pending("/tmp/a.pdf"),
            Attachment::pending("/tmp/b.pdf"),
            Attachment::pending("/tmp/c.pdf"),
        ];
        let failure = uploader.upload_many(&files).await.expect_err("second fails");
        assert_eq!(failure.index, 1);
        assert_eq!(failure.uploaded, vec!["memory://uploads/0/a.pdf".to_string()]);
        assert_eq!(uploader.calls(), 2);
        assert_eq!(uploader.uploaded().len(), 1);
    }
}
