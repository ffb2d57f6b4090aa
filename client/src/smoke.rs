// Deterministic proof runs used by the `bizdesk` binary.
//
// The wizard smoke drives the contract wizard end to end against the in-memory record
// service, including the failure paths, and writes a transcript next to the logs.

use crate::api::http::HttpRecordApi;
use crate::api::memory::{InMemoryRecordApi, InMemoryUploader};
use crate::api::{NotifyLevel, RecordApi, RecordingNotifier};
use crate::config::ClientConfig;
use crate::list::RecordList;
use crate::models::{Attachment, DecisionKind, FieldValue, Record, StepId};
use crate::wizard::{
    contract, CheckpointStore, DecisionError, DecisionFlow, NavOutcome, Position, ReasonCapture,
    SubmissionCoordinator, SubmissionError, Wizard, WizardError,
};
use anyhow::{ensure, Context, Result};
use log::info;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const WIZARD_TRANSCRIPT: &str = "wizard_smoke_transcript.log";

struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    fn new() -> Self {
        Self { lines: Vec::new() }
    }

    fn step(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("[PHASE: smoke] [STEP: wizard] {}", line);
        self.lines.push(line);
    }
}

fn describe(outcome: &NavOutcome) -> String {
    match outcome {
        NavOutcome::Moved { from, to } => format!("moved {} -> {}", from, to),
        NavOutcome::Blocked { step, errors } => {
            let detail: Vec<String> = errors.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            format!("blocked at {} ({})", step, detail.join("; "))
        }
        NavOutcome::ReadyToSubmit => "ready to submit".to_string(),
        NavOutcome::Stayed(p) => format!("stayed at {}", p),
    }
}

/// Run the contract wizard transcript, checkpointing drafts under `checkpoint_dir`.
/// Returns the transcript path.
pub async fn wizard_smoke(log_dir: &Path, checkpoint_dir: &Path) -> Result<PathBuf> {
    let mut t = Transcript::new();
    let schema = Arc::new(contract::schema().context("contract schema is inconsistent")?);
    let api = Arc::new(InMemoryRecordApi::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = Arc::new(SubmissionCoordinator::new(
        schema.clone(),
        api.clone(),
        Arc::new(InMemoryUploader::failing_at(1)),
        notifier.clone(),
    ));

    let mut wizard = Wizard::create(coordinator.clone())?
        .with_checkpoints(CheckpointStore::new(checkpoint_dir));

    // Details: blocked until required fields are filled.
    let outcome = wizard.next().await?;
    t.step(describe(&outcome));
    ensure!(matches!(outcome, NavOutcome::Blocked { .. }), "empty details must block");

    wizard.set_field("title", "Facility maintenance 2024")?;
    wizard.set_field("contractorEmail", "ops@acme.example")?;
    wizard.set_field("contractType", FieldValue::choice("retainer"))?;
    wizard.set_field("value", FieldValue::text(""))?;
    let outcome = wizard.next().await?;
    t.step(describe(&outcome));
    ensure!(matches!(outcome, NavOutcome::Blocked { .. }), "blank value must block");

    wizard.set_field("value", 48000.0)?;
    wizard.set_field("billingCycle", FieldValue::choice("monthly"))?;
    wizard.set_field("address.street", "1 Main St")?;
    wizard.set_field("address.city", "Springfield")?;
    t.step(describe(&wizard.next().await?));

    // Schedule: reversed dates.
    wizard.set_field("startDate", "2024-01-01")?;
    wizard.set_field("endDate", "2023-12-31")?;
    let outcome = wizard.next().await?;
    t.step(describe(&outcome));
    match &outcome {
        NavOutcome::Blocked { errors, .. } => ensure!(
            errors.get("endDate").map(String::as_str) == Some("End Date must be after Start Date"),
            "unexpected schedule errors: {:?}",
            errors
        ),
        other => anyhow::bail!("reversed dates were accepted: {:?}", other),
    }
    wizard.set_field("endDate", "2024-12-31")?;
    t.step(describe(&wizard.next().await?));

    // Risks: probability out of range, then fixed.
    let risks = StepId::from(contract::RISKS);
    let risk = wizard.add_repeatable(&risks, contract::risk_template())?;
    wizard.update_repeatable(&risks, risk, "riskName", "Supplier insolvency")?;
    wizard.update_repeatable(&risks, risk, "probability", 1.5)?;
    let outcome = wizard.next().await?;
    t.step(describe(&outcome));
    ensure!(matches!(outcome, NavOutcome::Blocked { .. }), "probability 1.5 must block");
    wizard.update_repeatable(&risks, risk, "probability", 0.5)?;
    t.step(describe(&wizard.next().await?));

    // Attachments: the second upload fails on the first attempt.
    wizard.set_field(
        contract::DOCUMENTS,
        FieldValue::Files(vec![
            Attachment::pending("statement-of-work.pdf"),
            Attachment::pending("insurance.pdf"),
            Attachment::pending("rates.xlsx"),
        ]),
    )?;
    t.step(describe(&wizard.next().await?));

    match wizard.submit().await {
        Err(WizardError::Submission(SubmissionError::AttachmentUploadFailed {
            index,
            file_name,
            ..
        })) => {
            t.step(format!(
                "upload of '{}' (index {}) failed; returned to {}",
                file_name,
                index,
                wizard.current()
            ));
            ensure!(index == 1, "expected failing index 1, got {}", index);
            ensure!(api.create_calls() == 0, "record endpoint called after upload failure");
        }
        other => anyhow::bail!("expected upload failure, got {:?}", other),
    }
    ensure!(
        wizard.current() == &Position::Step(StepId::from(contract::ATTACHMENTS)),
        "upload failure must return to attachments"
    );

    t.step(describe(&wizard.next().await?));
    let id = wizard.submit().await?;
    t.step(format!("contract created with id {}", id));

    let stored = api.fetch_record(&id).await?;
    ensure!(
        stored.fields.get("address") == Some(&json!({ "city": "Springfield", "street": "1 Main St" })),
        "address not nested in payload"
    );
    ensure!(
        !stored.to_value().to_string().contains(&risk.to_string()),
        "local ids leaked into the payload"
    );

    // Decision with reason capture.
    let decisions = DecisionFlow::new(api.clone(), notifier.clone());
    match decisions
        .submit(&id, &ReasonCapture::new(DecisionKind::Decline, "no"))
        .await
    {
        Err(DecisionError::Invalid(errors)) => t.step(format!("decline rejected locally: {:?}", errors)),
        other => anyhow::bail!("short decline reason was accepted: {:?}", other.map(|r| r.id)),
    }
    let declined = decisions
        .submit(
            &id,
            &ReasonCapture::new(DecisionKind::Decline, "Rates exceed the approved budget"),
        )
        .await?;
    t.step(format!(
        "record {} status={}",
        declined.id,
        declined.fields.get("status").cloned().unwrap_or(Value::Null)
    ));

    // List: deleting the last page's items moves back one page.
    let listing = Arc::new(InMemoryRecordApi::seeded(25, |n| {
        let mut m = Map::new();
        m.insert("title".to_string(), json!(format!("Contract {}", n)));
        m
    }));
    let mut list = RecordList::new(listing, 10)?;
    list.refresh().await?;
    list.go_to(3).await?;
    let doomed: Vec<_> = list.items().iter().map(|r| r.id.clone()).collect();
    for record_id in &doomed {
        list.delete(record_id).await?;
    }
    let w = list.window();
    t.step(format!(
        "list after deletes: page {}/{} of {} items",
        w.page_number,
        w.total_pages(),
        w.total_items
    ));
    ensure!(w.page_number == 2 && w.total_pages() == 2, "list did not move back a page");

    t.step(format!(
        "notifications: {} error, {} success",
        notifier.count(NotifyLevel::Error),
        notifier.count(NotifyLevel::Success)
    ));

    let path = log_dir.join(WIZARD_TRANSCRIPT);
    tokio::fs::write(&path, t.lines.join("\n") + "\n")
        .await
        .with_context(|| format!("Failed to write transcript {:?}", path))?;
    info!("[PHASE: smoke] [STEP: done] transcript written to {:?}", path);
    Ok(path)
}

/// Fetch one page of records from the configured service and render it for the terminal.
pub async fn list_page(cfg: &ClientConfig, page: u64) -> Result<String> {
    let api = Arc::new(HttpRecordApi::new(&cfg.api)?);
    let mut list = RecordList::new(api, cfg.list.page_size)?;
    list.refresh().await?;
    let window = list.go_to(page).await?;

    let mut out = match window.item_range() {
        Some((first, last)) => format!(
            "Page {}/{} (items {}-{} of {})\n",
            window.page_number,
            window.last_page(),
            first,
            last,
            window.total_items
        ),
        None => format!("Page {}/{} (no records)\n", window.page_number, window.last_page()),
    };
    for record in list.items() {
        out.push_str(&format!("{:>8}  {}\n", record.id, summary(record)));
    }
    Ok(out)
}

fn summary(record: &Record) -> String {
    let text = |key: &str| record.fields.get(key).and_then(Value::as_str).map(str::to_string);
    let title = text("title").unwrap_or_else(|| "(untitled)".to_string());
    match text("status") {
        Some(status) => format!("{} [{}]", title, status),
        None => title,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::NEW_RECORD_KEY;

    #[tokio::test]
    async fn wizard_smoke_checkpoints_into_the_given_folder() {
        let logs = tempfile::tempdir().expect("log dir");
        let drafts = tempfile::tempdir().expect("draft dir");
        let checkpoint_dir = drafts.path().join("drafts");

        let transcript = wizard_smoke(logs.path(), &checkpoint_dir)
            .await
            .expect("smoke passes");

        let text = std::fs::read_to_string(&transcript).expect("transcript");
        assert!(text.contains("contract created with id"), "{}", text);
        assert!(checkpoint_dir.is_dir());
        // Submitted drafts leave no checkpoint behind.
        let store = CheckpointStore::new(&checkpoint_dir);
        assert!(store
            .load(contract::FORM_NAME, NEW_RECORD_KEY)
            .await
            .expect("load")
            .is_none());
        let stray: Vec<_> = std::fs::read_dir(logs.path())
            .expect("logs")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(stray.is_empty(), "unexpected folders in log dir: {:?}", stray);
    }
}
