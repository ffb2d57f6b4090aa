// Submission: upload pending attachments, then create or update the record exactly once.

use super::schema::{FieldErrors, FormSchema};
use super::sequencer::Position;
use crate::api::{ApiError, AttachmentUploader, Notifier, NotifyLevel, RecordApi, UploadFailure};
use crate::models::{Attachment, Draft, DraftError, PendingUpload, RecordId};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Key used when a rejection carries no field names.
pub const FORM_ERROR_KEY: &str = "_form";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitTarget {
    Create,
    Update(RecordId),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    /// `index` is the file's position inside its files field. `uploaded` holds the URLs of
    /// the attachments that went through before the failure, in `pending_attachments` order.
    #[error("upload of '{file_name}' failed: {message}")]
    AttachmentUploadFailed {
        index: usize,
        file_name: String,
        field: String,
        step: Position,
        message: String,
        uploaded: Vec<String>,
    },

    #[error("server rejected the record: {message}")]
    Rejected {
        message: String,
        step_errors: BTreeMap<Position, FieldErrors>,
    },

    #[error("submission failed: {0}")]
    Transport(String),

    #[error("could not build the record payload: {0}")]
    Payload(#[from] DraftError),

    #[error("submission task ended unexpectedly: {0}")]
    Interrupted(String),
}

impl SubmissionError {
    /// Where the user should be sent to fix the problem.
    pub fn return_position(&self, schema: &FormSchema) -> Position {
        match self {
            SubmissionError::AttachmentUploadFailed { step, .. } => step.clone(),
            SubmissionError::Rejected { step_errors, .. } => step_errors
                .keys()
                .filter_map(|p| match p {
                    Position::Step(id) => schema.index_of(id).map(|i| (i, p)),
                    Position::Review => None,
                })
                .min_by_key(|(i, _)| *i)
                .map(|(_, p)| p.clone())
                .unwrap_or(Position::Review),
            _ => Position::Review,
        }
    }
}

pub struct SubmissionCoordinator {
    schema: Arc<FormSchema>,
    records: Arc<dyn RecordApi>,
    uploader: Arc<dyn AttachmentUploader>,
    notifier: Arc<dyn Notifier>,
}

impl SubmissionCoordinator {
    pub fn new(
        schema: Arc<FormSchema>,
        records: Arc<dyn RecordApi>,
        uploader: Arc<dyn AttachmentUploader>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            schema,
            records,
            uploader,
            notifier,
        }
    }

    pub fn schema(&self) -> &Arc<FormSchema> {
        &self.schema
    }

    pub fn records(&self) -> &Arc<dyn RecordApi> {
        &self.records
    }

    /// Upload attachments, then call the record endpoint once. Never retries.
    ///
    /// Every failure is also reported to the notifier; the draft is left untouched.
    pub async fn submit(&self, draft: &Draft, target: &SubmitTarget) -> Result<RecordId, SubmissionError> {
        let started = Instant::now();
        let result = self.run(draft, target).await;
        match &result {
            Ok(id) => {
                info!(
                    "[PHASE: submission] [STEP: complete] {} saved (id={}, duration_ms={})",
                    self.schema.name(),
                    id,
                    started.elapsed().as_millis()
                );
                let verb = match target {
                    SubmitTarget::Create => "created",
                    SubmitTarget::Update(_) => "updated",
                };
                self.notifier.notify(
                    &format!("{} {} successfully", capitalize(self.schema.name()), verb),
                    NotifyLevel::Success,
                );
            }
            Err(e) => {
                error!("[PHASE: submission] [STEP: failed] {}", e);
                self.notifier.notify(&e.to_string(), NotifyLevel::Error);
            }
        }
        result
    }

    async fn run(&self, draft: &Draft, target: &SubmitTarget) -> Result<RecordId, SubmissionError> {
        let pending = draft.pending_attachments();
        let urls = self.upload_pending(&pending).await?;
        let payload = draft.to_payload(&urls)?;

        let outcome = match target {
            SubmitTarget::Create => {
                info!("[PHASE: submission] [STEP: record] creating {}", self.schema.name());
                self.records.create_record(payload).await
            }
            SubmitTarget::Update(id) => {
                info!(
                    "[PHASE: submission] [STEP: record] updating {} id={}",
                    self.schema.name(),
                    id
                );
                self.records
                    .update_record(id, payload)
                    .await
                    .map(|_| id.clone())
            }
        };
        outcome.map_err(|e| self.map_api_error(e))
    }

    async fn upload_pending(&self, pending: &[PendingUpload]) -> Result<Vec<String>, SubmissionError> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "[PHASE: submission] [STEP: upload] uploading {} attachment(s)",
            pending.len()
        );
        let files: Vec<Attachment> = pending.iter().map(|p| p.attachment.clone()).collect();
        match self.uploader.upload_many(&files).await {
            Ok(urls) => Ok(urls),
            Err(UploadFailure {
                index,
                error,
                uploaded,
            }) => {
                let (field, position, file_name) = match pending.get(index) {
                    Some(p) => (
                        p.field_path.clone(),
                        p.position,
                        p.attachment.file_name().to_string(),
                    ),
                    None => (String::new(), index, String::new()),
                };
                warn!(
                    "[PHASE: submission] [STEP: upload] '{}' failed at {}[{}]; record endpoint not called",
                    file_name, field, position
                );
                let step = self
                    .schema
                    .step_for_field(&field)
                    .cloned()
                    .map(Position::Step)
                    .unwrap_or(Position::Review);
                Err(SubmissionError::AttachmentUploadFailed {
                    index: position,
                    file_name,
                    field,
                    step,
                    message: error.to_string(),
                    uploaded,
                })
            }
        }
    }

    fn map_api_error(&self, err: ApiError) -> SubmissionError {
        match err {
            ApiError::Validation {
                message,
                field_errors,
            } => {
                let mut step_errors: BTreeMap<Position, FieldErrors> = BTreeMap::new();
                for (field, msg) in field_errors {
                    let position = self
                        .schema
                        .step_for_field(&field)
                        .cloned()
                        .map(Position::Step)
                        .unwrap_or(Position::Review);
                    step_errors.entry(position).or_default().insert(field, msg);
                }
                if step_errors.is_empty() {
                    step_errors
                        .entry(Position::Review)
                        .or_default()
                        .insert(FORM_ERROR_KEY.to_string(), message.clone());
                }
                SubmissionError::Rejected {
                    message,
                    step_errors,
                }
            }
            other => SubmissionError::Transport(other.to_string()),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A submission running on its own task.
pub struct PendingSubmission {
    handle: JoinHandle<Result<RecordId, SubmissionError>>,
}

impl PendingSubmission {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn outcome(self) -> Result<RecordId, SubmissionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(SubmissionError::Interrupted(e.to_string())),
        }
    }

    /// Stop waiting for the result. In-flight requests are not aborted; their outcome is
    /// ignored.
    pub fn cancel(self) {
        info!("[PHASE: submission] [STEP: cancel] submission detached; in-flight requests continue");
        drop(self.handle);
    }
}

pub fn spawn_submission(
    coordinator: Arc<SubmissionCoordinator>,
    draft: Draft,
    target: SubmitTarget,
) -> PendingSubmission {
    let handle = tokio::spawn(async move { coordinator.submit(&draft, &target).await });
    PendingSubmission { handle }
}
