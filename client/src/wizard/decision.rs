// Accept / decline / confirm with a validated reason.

use super::schema::FieldErrors;
use crate::api::{ApiError, DecisionApi, Notifier, NotifyLevel};
use crate::models::{DecisionKind, DecisionRequest, Record, RecordId};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

pub const REASON_KEY: &str = "reason";
pub const MIN_DECLINE_REASON: usize = 10;
pub const MAX_REASON: usize = 1000;

/// The reason step shown before a decision is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonCapture {
    pub decision: DecisionKind,
    pub reason: String,
}

impl ReasonCapture {
    pub fn new(decision: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }

    /// Decline needs an explanation; accept and confirm take an optional note.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let len = self.reason.trim().chars().count();
        match self.decision {
            DecisionKind::Decline if len == 0 => {
                errors.insert(REASON_KEY.to_string(), "Reason is required".to_string());
            }
            DecisionKind::Decline if len < MIN_DECLINE_REASON => {
                errors.insert(
                    REASON_KEY.to_string(),
                    format!("Reason must be at least {} characters", MIN_DECLINE_REASON),
                );
            }
            _ if len > MAX_REASON => {
                errors.insert(
                    REASON_KEY.to_string(),
                    format!("Reason must be at most {} characters", MAX_REASON),
                );
            }
            _ => {}
        }
        errors
    }

    pub fn to_request(&self) -> DecisionRequest {
        let reason = self.reason.trim();
        DecisionRequest {
            decision: self.decision,
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("decision is incomplete")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct DecisionFlow {
    api: Arc<dyn DecisionApi>,
    notifier: Arc<dyn Notifier>,
}

impl DecisionFlow {
    pub fn new(api: Arc<dyn DecisionApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { api, notifier }
    }

    /// Validate the captured reason and send the decision once.
    pub async fn submit(&self, id: &RecordId, capture: &ReasonCapture) -> Result<Record, DecisionError> {
        let errors = capture.validate();
        if !errors.is_empty() {
            return Err(DecisionError::Invalid(errors));
        }

        let request = capture.to_request();
        match self.api.decide(id, &request).await {
            Ok(record) => {
                info!(
                    "[PHASE: decision] [STEP: {}] record {} updated",
                    request.decision.as_str(),
                    id
                );
                self.notifier.notify(
                    &format!("Record {} {}", id, past_tense(request.decision)),
                    NotifyLevel::Success,
                );
                Ok(record)
            }
            Err(e) => {
                warn!(
                    "[PHASE: decision] [STEP: {}] record {} failed: {}",
                    request.decision.as_str(),
                    id,
                    e
                );
                self.notifier.notify(&e.to_string(), NotifyLevel::Error);
                Err(e.into())
            }
        }
    }
}

fn past_tense(kind: DecisionKind) -> &'static str {
    match kind {
        DecisionKind::Accept => "accepted",
        DecisionKind::Decline => "declined",
        DecisionKind::Confirm => "confirmed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{InMemoryRecordApi, WriteCall};
    use crate::api::RecordingNotifier;
    use serde_json::{json, Map};

    fn flow() -> (DecisionFlow, Arc<InMemoryRecordApi>, Arc<RecordingNotifier>) {
        let api = Arc::new(InMemoryRecordApi::seeded(1, |_| Map::new()));
        let notifier = Arc::new(RecordingNotifier::new());
        (
            DecisionFlow::new(api.clone(), notifier.clone()),
            api,
            notifier,
        )
    }

    #[test]
    fn decline_requires_a_real_reason() {
        let blank = ReasonCapture::new(DecisionKind::Decline, "   ");
        assert_eq!(blank.validate()[REASON_KEY], "Reason is required");

        let short = ReasonCapture::new(DecisionKind::Decline, "too low");
        assert_eq!(
            short.validate()[REASON_KEY],
            "Reason must be at least 10 characters"
        );

        let ok = ReasonCapture::new(DecisionKind::Decline, "Budget not approved for Q3");
        assert!(ok.validate().is_empty());
    }

    #[test]
    fn accept_reason_is_optional_but_bounded() {
        assert!(ReasonCapture::new(DecisionKind::Accept, "").validate().is_empty());
        assert_eq!(ReasonCapture::new(DecisionKind::Confirm, "").to_request().reason, None);

        let long = ReasonCapture::new(DecisionKind::Accept, "x".repeat(MAX_REASON + 1));
        assert_eq!(
            long.validate()[REASON_KEY],
            "Reason must be at most 1000 characters"
        );
    }

    #[tokio::test]
    async fn invalid_reason_never_reaches_the_api() {
        let (flow, api, _) = flow();
        let err = flow
            .submit(&RecordId::new("1"), &ReasonCapture::new(DecisionKind::Decline, ""))
            .await
            .expect_err("invalid");
        assert!(matches!(err, DecisionError::Invalid(_)));
        assert!(api.writes().is_empty());
    }

    #[tokio::test]
    async fn decline_is_sent_once_with_trimmed_reason() {
        let (flow, api, notifier) = flow();
        let record = flow
            .submit(
                &RecordId::new("1"),
                &ReasonCapture::new(DecisionKind::Decline, "  Vendor failed due diligence  "),
            )
            .await
            .expect("declined");
        assert_eq!(record.fields["status"], json!("declined"));
        assert_eq!(
            api.writes(),
            vec![WriteCall::Decide(
                RecordId::new("1"),
                DecisionRequest {
                    decision: DecisionKind::Decline,
                    reason: Some("Vendor failed due diligence".to_string()),
                }
            )]
        );
        assert_eq!(notifier.count(NotifyLevel::Success), 1);
    }

    #[tokio::test]
    async fn api_failure_is_reported() {
        let (flow, _, notifier) = flow();
        let err = flow
            .submit(&RecordId::new("42"), &ReasonCapture::new(DecisionKind::Accept, ""))
            .await
            .expect_err("missing record");
        assert!(matches!(err, DecisionError::Api(ApiError::NotFound(_))));
        assert_eq!(notifier.count(NotifyLevel::Error), 1);
    }
}
