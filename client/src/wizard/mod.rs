// Multi-step record wizard
//
// `Wizard` owns one draft and drives it through the steps of a `FormSchema`:
// field edits refresh step validity, navigation is validated by the sequencer, and
// submission goes through the `SubmissionCoordinator`. A failed submission never clears
// the draft; the user is routed to the step that needs attention.

pub mod checkpoint;
pub mod contract;
pub mod decision;
pub mod schema;
pub mod sequencer;
pub mod submission;
mod validation;

use crate::api::ApiError;
use crate::models::{Draft, DraftError, FieldMap, FieldValue, LocalId, RecordId, StepId};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

pub use checkpoint::{CheckpointError, CheckpointStore, DraftCheckpoint, NEW_RECORD_KEY};
pub use decision::{DecisionError, DecisionFlow, ReasonCapture};
pub use schema::{FieldErrors, FieldKind, FieldSpec, FormSchema, Rule, SchemaError, StepSchema};
pub use sequencer::{NavCommand, NavOutcome, Position, StepSequencer, StepState};
pub use submission::{
    spawn_submission, PendingSubmission, SubmissionCoordinator, SubmissionError, SubmitTarget,
    FORM_ERROR_KEY,
};

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("cannot move to '{target}': {} earlier step(s) are not valid", .blocking.len())]
    InvalidTransition {
        target: Position,
        blocking: Vec<StepId>,
    },

    #[error("unknown step '{0}'")]
    UnknownStep(StepId),

    #[error("submit is only available from the review step (current: {0})")]
    NotAtReview(Position),

    #[error("step '{0}' has validation errors")]
    Incomplete(StepId),

    #[error("wizard is no longer editable")]
    Finished,

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("could not load record: {0}")]
    Load(ApiError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardStatus {
    Editing,
    Submitted(RecordId),
    Cancelled,
}

pub struct Wizard {
    schema: Arc<FormSchema>,
    draft: Draft,
    sequencer: StepSequencer,
    coordinator: Arc<SubmissionCoordinator>,
    target: SubmitTarget,
    checkpoints: Option<CheckpointStore>,
    status: WizardStatus,
}

impl Wizard {
    /// Start a wizard for a new record.
    pub fn create(coordinator: Arc<SubmissionCoordinator>) -> Result<Self, WizardError> {
        let schema = coordinator.schema().clone();
        let draft = schema.empty_draft();
        Self::from_parts(coordinator, draft, SubmitTarget::Create)
    }

    /// Start a wizard prefilled from an existing record; submission updates it.
    pub async fn edit(coordinator: Arc<SubmissionCoordinator>, id: &RecordId) -> Result<Self, WizardError> {
        let record = coordinator
            .records()
            .fetch_record(id)
            .await
            .map_err(WizardError::Load)?;
        let draft = coordinator.schema().draft_from_record(&record.to_value())?;
        info!(
            "[PHASE: wizard] [STEP: edit] loaded {} {} into draft",
            coordinator.schema().name(),
            id
        );
        Self::from_parts(coordinator, draft, SubmitTarget::Update(id.clone()))
    }

    fn from_parts(
        coordinator: Arc<SubmissionCoordinator>,
        draft: Draft,
        target: SubmitTarget,
    ) -> Result<Self, WizardError> {
        let schema = coordinator.schema().clone();
        let sequencer = StepSequencer::new(schema.clone());
        Ok(Self {
            schema,
            draft,
            sequencer,
            coordinator,
            target,
            checkpoints: None,
            status: WizardStatus::Editing,
        })
    }

    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn current(&self) -> &Position {
        self.sequencer.current()
    }

    pub fn sequencer(&self) -> &StepSequencer {
        &self.sequencer
    }

    pub fn status(&self) -> &WizardStatus {
        &self.status
    }

    pub fn target(&self) -> &SubmitTarget {
        &self.target
    }

    fn checkpoint_key(&self) -> &str {
        match &self.target {
            SubmitTarget::Create => NEW_RECORD_KEY,
            SubmitTarget::Update(id) => id.as_str(),
        }
    }

    /// Restore a saved draft for this record, if one exists and matches the schema.
    pub async fn resume(&mut self) -> Result<bool, WizardError> {
        let Some(store) = &self.checkpoints else {
            return Ok(false);
        };
        let saved = match store.load(self.schema.name(), self.checkpoint_key()).await {
            Ok(Some(saved)) => saved,
            Ok(None) => return Ok(false),
            Err(e @ CheckpointError::Format { .. }) => {
                warn!("[PHASE: wizard] [STEP: resume] ignoring unreadable checkpoint: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if !saved.draft.same_layout(&self.schema.empty_draft()) {
            warn!(
                "[PHASE: wizard] [STEP: resume] checkpoint for {} no longer matches the form; starting fresh",
                saved.key
            );
            return Ok(false);
        }

        self.draft = saved.draft;
        self.sequencer.refresh(&self.draft)?;
        if let Err(e) = self.sequencer.jump_to(saved.position.clone(), &self.draft) {
            warn!(
                "[PHASE: wizard] [STEP: resume] cannot reopen at {}: {}",
                saved.position, e
            );
        }
        info!(
            "[PHASE: wizard] [STEP: resume] resumed at {}",
            self.sequencer.current()
        );
        Ok(true)
    }

    fn ensure_editing(&self) -> Result<(), WizardError> {
        match self.status {
            WizardStatus::Editing => Ok(()),
            _ => Err(WizardError::Finished),
        }
    }

    fn replace_draft(&mut self, draft: Draft) -> Result<(), WizardError> {
        self.sequencer.refresh(&draft)?;
        self.draft = draft;
        Ok(())
    }

    pub fn set_field(&mut self, path: &str, value: impl Into<FieldValue>) -> Result<(), WizardError> {
        self.ensure_editing()?;
        let next = self.draft.update(path, value.into())?;
        self.replace_draft(next)
    }

    pub fn clear_field(&mut self, path: &str) -> Result<(), WizardError> {
        self.ensure_editing()?;
        let next = self.draft.clear(path)?;
        self.replace_draft(next)
    }

    pub fn add_repeatable(&mut self, step: &StepId, template: FieldMap) -> Result<LocalId, WizardError> {
        self.ensure_editing()?;
        let (next, id) = self.draft.add_repeatable(step, template)?;
        self.replace_draft(next)?;
        Ok(id)
    }

    pub fn remove_repeatable(&mut self, step: &StepId, local_id: LocalId) -> Result<(), WizardError> {
        self.ensure_editing()?;
        let next = self.draft.remove_repeatable(step, local_id)?;
        self.replace_draft(next)
    }

    pub fn update_repeatable(
        &mut self,
        step: &StepId,
        local_id: LocalId,
        path: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), WizardError> {
        self.ensure_editing()?;
        let next = self
            .draft
            .update_repeatable(step, local_id, path, value.into())?;
        self.replace_draft(next)
    }

    pub async fn next(&mut self) -> Result<NavOutcome, WizardError> {
        self.navigate(NavCommand::Next).await
    }

    pub async fn back(&mut self) -> Result<NavOutcome, WizardError> {
        self.navigate(NavCommand::Back).await
    }

    pub async fn jump_to(&mut self, target: Position) -> Result<NavOutcome, WizardError> {
        self.navigate(NavCommand::JumpTo(target)).await
    }

    async fn navigate(&mut self, command: NavCommand) -> Result<NavOutcome, WizardError> {
        self.ensure_editing()?;
        let outcome = self.sequencer.apply(command, &self.draft)?;
        if matches!(outcome, NavOutcome::Moved { .. }) {
            self.save_checkpoint().await;
        }
        Ok(outcome)
    }

    /// Submit from the review step. On failure the draft is kept, errors are attached to
    /// the step that needs fixing and the wizard moves there.
    pub async fn submit(&mut self) -> Result<RecordId, WizardError> {
        self.ensure_editing()?;
        if self.sequencer.current() != &Position::Review {
            return Err(WizardError::NotAtReview(self.sequencer.current().clone()));
        }
        match self.sequencer.next(&self.draft)? {
            NavOutcome::ReadyToSubmit => {}
            NavOutcome::Blocked {
                step: Position::Step(id),
                ..
            } => return Err(WizardError::Incomplete(id)),
            other => {
                warn!("[PHASE: wizard] [STEP: submit] unexpected review outcome {:?}", other);
                return Err(WizardError::NotAtReview(self.sequencer.current().clone()));
            }
        }

        self.sequencer.clear_attached();
        match self.coordinator.submit(&self.draft, &self.target).await {
            Ok(id) => {
                self.discard_checkpoint().await;
                self.status = WizardStatus::Submitted(id.clone());
                self.draft = self.schema.empty_draft();
                Ok(id)
            }
            Err(e) => {
                self.route_failure(&e)?;
                self.save_checkpoint().await;
                Err(e.into())
            }
        }
    }

    fn route_failure(&mut self, err: &SubmissionError) -> Result<(), WizardError> {
        match err {
            SubmissionError::AttachmentUploadFailed {
                field,
                step,
                message,
                uploaded,
                ..
            } => {
                // Files that already uploaded keep their URL.
                self.draft = self.draft.with_uploaded(uploaded);
                let mut errors = FieldErrors::new();
                errors.insert(field.clone(), message.clone());
                self.sequencer.attach_errors(step, errors)?;
            }
            SubmissionError::Rejected { step_errors, .. } => {
                for (position, errors) in step_errors {
                    self.sequencer.attach_errors(position, errors.clone())?;
                }
            }
            other => {
                let mut errors = FieldErrors::new();
                errors.insert(FORM_ERROR_KEY.to_string(), other.to_string());
                self.sequencer.attach_errors(&Position::Review, errors)?;
            }
        }
        let position = err.return_position(&self.schema);
        info!(
            "[PHASE: wizard] [STEP: submit] returning to {} after failed submission",
            position
        );
        self.sequencer.return_to(position)
    }

    /// Abandon the wizard and its checkpoint.
    pub async fn cancel(&mut self) {
        if self.status == WizardStatus::Editing {
            self.status = WizardStatus::Cancelled;
            self.discard_checkpoint().await;
            info!("[PHASE: wizard] [STEP: cancel] {} wizard cancelled", self.schema.name());
        }
    }

    async fn save_checkpoint(&self) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        let checkpoint = DraftCheckpoint {
            form: self.schema.name().to_string(),
            key: self.checkpoint_key().to_string(),
            position: self.sequencer.current().clone(),
            draft: self.draft.clone(),
            saved_at: Utc::now(),
        };
        if let Err(e) = store.save(&checkpoint).await {
            warn!("[PHASE: wizard] [STEP: checkpoint] draft not saved: {}", e);
        }
    }

    async fn discard_checkpoint(&self) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        if let Err(e) = store.discard(self.schema.name(), self.checkpoint_key()).await {
            warn!("[PHASE: wizard] [STEP: checkpoint] stale checkpoint left behind: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{InMemoryRecordApi, InMemoryUploader};
    use crate::api::{NotifyLevel, RecordingNotifier};
    use crate::models::Attachment;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        api: Arc<InMemoryRecordApi>,
        notifier: Arc<RecordingNotifier>,
        coordinator: Arc<SubmissionCoordinator>,
    }

    fn fixture(api: InMemoryRecordApi, uploader: InMemoryUploader) -> Fixture {
        let schema = Arc::new(contract::schema().expect("schema"));
        let api = Arc::new(api);
        let notifier = Arc::new(RecordingNotifier::new());
        let coordinator = Arc::new(SubmissionCoordinator::new(
            schema,
            api.clone(),
            Arc::new(uploader),
            notifier.clone(),
        ));
        Fixture {
            api,
            notifier,
            coordinator,
        }
    }

    fn step(id: &str) -> Position {
        Position::Step(StepId::from(id))
    }

    fn fill_details(w: &mut Wizard) {
        w.set_field("title", "Facility maintenance").expect("title");
        w.set_field("contractorEmail", "ops@acme.example").expect("email");
        w.set_field("contractType", FieldValue::choice("fixed_price"))
            .expect("type");
        w.set_field("value", 12500.0).expect("value");
        w.set_field("address.street", "Main St").expect("street");
    }

    fn fill_schedule(w: &mut Wizard) {
        w.set_field("startDate", "2024-01-01").expect("start");
        w.set_field("endDate", "2024-12-31").expect("end");
    }

    async fn walk_to_review(w: &mut Wizard) {
        for _ in 0..4 {
            let outcome = w.next().await.expect("next");
            assert!(matches!(outcome, NavOutcome::Moved { .. }), "{:?}", outcome);
        }
        assert_eq!(w.current(), &Position::Review);
    }

    #[tokio::test]
    async fn full_contract_flow_creates_record() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::new());
        let mut w = Wizard::create(f.coordinator.clone()).expect("wizard");

        assert!(matches!(w.next().await.expect("blocked"), NavOutcome::Blocked { .. }));
        fill_details(&mut w);
        fill_schedule(&mut w);

        let risks = StepId::from(contract::RISKS);
        let id = w.add_repeatable(&risks, contract::risk_template()).expect("risk");
        w.update_repeatable(&risks, id, "riskName", "Supplier delay")
            .expect("name");
        w.update_repeatable(&risks, id, "probability", 0.25)
            .expect("probability");
        w.set_field(
            contract::DOCUMENTS,
            FieldValue::Files(vec![Attachment::pending("/tmp/sow.pdf")]),
        )
        .expect("documents");

        walk_to_review(&mut w).await;
        let record_id = w.submit().await.expect("submit");

        assert_eq!(w.status(), &WizardStatus::Submitted(record_id));
        let stored = &f.api.records()[0];
        assert_eq!(stored.fields["address"], json!({ "street": "Main St" }));
        assert_eq!(stored.fields["startDate"], json!("2024-01-01"));
        assert_eq!(
            stored.fields["risks"][0],
            json!({ "riskName": "Supplier delay", "severity": "medium", "probability": 0.25 })
        );
        assert_eq!(stored.fields["documents"], json!(["memory://uploads/0/sow.pdf"]));
        assert!(matches!(
            w.set_field("title", "late edit"),
            Err(WizardError::Finished)
        ));
    }

    #[tokio::test]
    async fn submit_requires_review() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::new());
        let mut w = Wizard::create(f.coordinator).expect("wizard");
        assert!(matches!(
            w.submit().await,
            Err(WizardError::NotAtReview(Position::Step(_)))
        ));
        assert_eq!(f.api.create_calls(), 0);
    }

    #[tokio::test]
    async fn upload_failure_returns_to_attachments_with_draft_intact() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::failing_at(1));
        let mut w = Wizard::create(f.coordinator.clone()).expect("wizard");
        fill_details(&mut w);
        fill_schedule(&mut w);
        w.set_field(
            contract::DOCUMENTS,
            FieldValue::Files(vec![
                Attachment::pending("/tmp/a.pdf"),
                Attachment::pending("/tmp/b.pdf"),
                Attachment::pending("/tmp/c.pdf"),
            ]),
        )
        .expect("documents");
        walk_to_review(&mut w).await;
        let title = w.draft().get("title").cloned();

        let err = w.submit().await.expect_err("upload fails");
        assert!(matches!(
            err,
            WizardError::Submission(SubmissionError::AttachmentUploadFailed { index: 1, .. })
        ));
        assert_eq!(w.current(), &step(contract::ATTACHMENTS));
        assert_eq!(w.draft().get("title").cloned(), title);
        assert_eq!(
            w.draft().get(contract::DOCUMENTS),
            Some(&FieldValue::Files(vec![
                Attachment::Uploaded {
                    file_name: "a.pdf".to_string(),
                    url: "memory://uploads/0/a.pdf".to_string(),
                },
                Attachment::pending("/tmp/b.pdf"),
                Attachment::pending("/tmp/c.pdf"),
            ]))
        );
        assert_eq!(f.api.create_calls(), 0);
        let shown = w
            .sequencer()
            .state(&StepId::from(contract::ATTACHMENTS))
            .map(StepState::displayed_errors)
            .unwrap_or_default();
        assert!(shown.contains_key(contract::DOCUMENTS));
        assert_eq!(f.notifier.count(NotifyLevel::Error), 1);
    }

    #[tokio::test]
    async fn resubmit_after_upload_failure_skips_files_already_uploaded() {
        let uploader = Arc::new(InMemoryUploader::failing_at(1));
        let schema = Arc::new(contract::schema().expect("schema"));
        let api = Arc::new(InMemoryRecordApi::new());
        let coordinator = Arc::new(SubmissionCoordinator::new(
            schema,
            api.clone(),
            uploader.clone(),
            Arc::new(RecordingNotifier::new()),
        ));
        let mut w = Wizard::create(coordinator).expect("wizard");
        fill_details(&mut w);
        fill_schedule(&mut w);
        w.set_field(
            contract::DOCUMENTS,
            FieldValue::Files(vec![
                Attachment::pending("/tmp/a.pdf"),
                Attachment::pending("/tmp/b.pdf"),
            ]),
        )
        .expect("documents");
        walk_to_review(&mut w).await;

        assert!(w.submit().await.is_err());
        w.next().await.expect("back to review");
        w.submit().await.expect("second attempt");

        // a.pdf once, b.pdf failed once then succeeded.
        assert_eq!(uploader.calls(), 3);
        assert_eq!(
            api.records()[0].fields["documents"],
            json!(["memory://uploads/0/a.pdf", "memory://uploads/2/b.pdf"])
        );
    }

    #[tokio::test]
    async fn leaving_attachments_after_upload_failure_hides_its_errors() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::failing_at(0));
        let mut w = Wizard::create(f.coordinator.clone()).expect("wizard");
        fill_details(&mut w);
        fill_schedule(&mut w);
        w.set_field(
            contract::DOCUMENTS,
            FieldValue::Files(vec![Attachment::pending("/tmp/a.pdf")]),
        )
        .expect("documents");
        walk_to_review(&mut w).await;
        assert!(w.submit().await.is_err());
        assert_eq!(w.current(), &step(contract::ATTACHMENTS));

        let outcome = w.back().await.expect("back");
        assert_eq!(
            outcome,
            NavOutcome::Moved {
                from: step(contract::ATTACHMENTS),
                to: step(contract::RISKS)
            }
        );
        let shown = w
            .sequencer()
            .state(&StepId::from(contract::ATTACHMENTS))
            .map(StepState::displayed_errors)
            .unwrap_or_default();
        assert!(shown.is_empty(), "{:?}", shown);
    }

    #[tokio::test]
    async fn server_rejection_goes_to_earliest_erroring_step() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::new());
        let mut errors = BTreeMap::new();
        errors.insert("endDate".to_string(), "overlaps another contract".to_string());
        errors.insert("title".to_string(), "already used".to_string());
        f.api.fail_next_write(ApiError::Validation {
            message: "Invalid".to_string(),
            field_errors: errors,
        });

        let mut w = Wizard::create(f.coordinator.clone()).expect("wizard");
        fill_details(&mut w);
        fill_schedule(&mut w);
        walk_to_review(&mut w).await;

        assert!(w.submit().await.is_err());
        assert_eq!(w.current(), &step(contract::DETAILS));
        assert_eq!(w.status(), &WizardStatus::Editing);

        // Resubmitting is a user action and calls the endpoint again.
        walk_to_review(&mut w).await;
        w.submit().await.expect("second attempt");
        assert_eq!(f.api.create_calls(), 2);
    }

    #[tokio::test]
    async fn edit_prefills_and_updates() {
        let api = InMemoryRecordApi::seeded(1, |_| {
            let mut m = Map::new();
            m.insert("title".to_string(), json!("Existing"));
            m.insert("contractorEmail".to_string(), json!("a@b.example"));
            m.insert("contractType".to_string(), json!("retainer"));
            m.insert("billingCycle".to_string(), json!("monthly"));
            m.insert("value".to_string(), json!(900));
            m.insert("startDate".to_string(), json!("2024-02-01"));
            m.insert("endDate".to_string(), json!("2024-03-01"));
            m.insert("risks".to_string(), json!([{ "riskName": "Churn", "severity": "low", "probability": 0.1 }]));
            m
        });
        let f = fixture(api, InMemoryUploader::new());
        let id = RecordId::new("1");
        let mut w = Wizard::edit(f.coordinator.clone(), &id).await.expect("edit");

        assert_eq!(w.target(), &SubmitTarget::Update(id.clone()));
        assert!(!w.sequencer().all_valid());
        assert_eq!(
            w.draft().repeatable_items(&StepId::from(contract::RISKS)).len(),
            1
        );

        w.set_field("title", "Existing (renewed)").expect("title");
        assert!(w.sequencer().all_valid());
        w.jump_to(Position::Review).await.expect("jump");
        assert_eq!(w.submit().await.expect("update"), id);
        assert_eq!(f.api.records()[0].fields["title"], json!("Existing (renewed)"));
        assert_eq!(f.api.create_calls(), 0);
    }

    #[tokio::test]
    async fn edit_of_missing_record_fails_to_load() {
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::new());
        assert!(matches!(
            Wizard::edit(f.coordinator, &RecordId::new("404")).await,
            Err(WizardError::Load(ApiError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn checkpoint_resumes_draft_and_is_discarded_on_cancel() {
        let dir = TempDir::new().expect("tempdir");
        let f = fixture(InMemoryRecordApi::new(), InMemoryUploader::new());

        let mut w = Wizard::create(f.coordinator.clone())
            .expect("wizard")
            .with_checkpoints(CheckpointStore::new(dir.path()));
        fill_details(&mut w);
        w.next().await.expect("to schedule");
        w.set_field("startDate", "2024-05-01").expect("start");
        w.next().await.expect("blocked, nothing saved");
        drop(w);

        let mut resumed = Wizard::create(f.coordinator.clone())
            .expect("wizard")
            .with_checkpoints(CheckpointStore::new(dir.path()));
        assert!(resumed.resume().await.expect("resume"));
        assert_eq!(resumed.current(), &step(contract::SCHEDULE));
        assert_eq!(
            resumed.draft().get("title"),
            Some(&FieldValue::text("Facility maintenance"))
        );
        assert_eq!(resumed.draft().get("startDate"), None);

        resumed.cancel().await;
        assert_eq!(resumed.status(), &WizardStatus::Cancelled);
        let store = CheckpointStore::new(dir.path());
        assert!(store
            .load(contract::FORM_NAME, NEW_RECORD_KEY)
            .await
            .expect("load")
            .is_none());
    }
}
