// Step sequencing: which step is current, which steps are valid, and what errors are shown.
//
// Pure in-memory state transitions; no I/O and no suspension points.

use super::schema::{FieldErrors, FormSchema};
use super::WizardError;
use crate::models::{Draft, StepId};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    Step(StepId),
    Review,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Step(id) => write!(f, "{}", id),
            Position::Review => f.write_str(super::schema::REVIEW_STEP),
        }
    }
}

impl From<StepId> for Position {
    fn from(id: StepId) -> Self {
        Position::Step(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepState {
    pub id: StepId,
    pub order: u32,
    pub is_valid: bool,
    /// Locally computed errors currently displayed for this step.
    pub errors: FieldErrors,
    /// Errors attached after a failed submission (server or upload).
    pub attached: FieldErrors,
}

impl StepState {
    /// Everything the step should display. Local messages win on key collisions.
    pub fn displayed_errors(&self) -> FieldErrors {
        let mut out = self.attached.clone();
        out.extend(self.errors.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavCommand {
    Next,
    Back,
    JumpTo(Position),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    Moved { from: Position, to: Position },
    Blocked { step: Position, errors: FieldErrors },
    ReadyToSubmit,
    Stayed(Position),
}

#[derive(Debug, Clone)]
pub struct StepSequencer {
    schema: Arc<FormSchema>,
    states: Vec<StepState>,
    review_errors: FieldErrors,
    current: Position,
}

impl StepSequencer {
    /// Start at the first step. Every step starts invalid until it is validated by `next`,
    /// `jump_to` or a `refresh` after a field change.
    pub fn new(schema: Arc<FormSchema>) -> Self {
        let states = schema
            .steps()
            .iter()
            .map(|s| StepState {
                id: s.id.clone(),
                order: s.order,
                is_valid: false,
                errors: FieldErrors::new(),
                attached: FieldErrors::new(),
            })
            .collect::<Vec<_>>();
        let current = states
            .first()
            .map(|s| Position::Step(s.id.clone()))
            .unwrap_or(Position::Review);

        Self {
            schema,
            states,
            review_errors: FieldErrors::new(),
            current,
        }
    }

    pub fn current(&self) -> &Position {
        &self.current
    }

    pub fn states(&self) -> &[StepState] {
        &self.states
    }

    pub fn state(&self, id: &StepId) -> Option<&StepState> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn review_errors(&self) -> &FieldErrors {
        &self.review_errors
    }

    pub fn all_valid(&self) -> bool {
        self.states.iter().all(|s| s.is_valid)
    }

    pub fn apply(&mut self, command: NavCommand, draft: &Draft) -> Result<NavOutcome, WizardError> {
        match command {
            NavCommand::Next => self.next(draft),
            NavCommand::Back => Ok(self.back()),
            NavCommand::JumpTo(target) => self.jump_to(target, draft),
        }
    }

    /// Validate the current step and advance only when it has no errors.
    /// At review, every step is re-checked; the first invalid one becomes current.
    pub fn next(&mut self, draft: &Draft) -> Result<NavOutcome, WizardError> {
        let idx = match &self.current {
            Position::Review => return self.confirm_review(draft),
            Position::Step(id) => self.index(id)?,
        };

        let errors = self.schema.validate_step(&self.states[idx].id, draft.fields())?;
        let from = self.current.clone();
        if !errors.is_empty() {
            debug!(
                "[PHASE: wizard] [STEP: {}] next blocked ({} errors)",
                from,
                errors.len()
            );
            let state = &mut self.states[idx];
            state.is_valid = false;
            state.errors = errors.clone();
            return Ok(NavOutcome::Blocked { step: from, errors });
        }

        let state = &mut self.states[idx];
        state.is_valid = true;
        state.errors.clear();
        state.attached.clear();

        let to = match self.states.get(idx + 1) {
            Some(next) => Position::Step(next.id.clone()),
            None => Position::Review,
        };
        self.current = to.clone();
        debug!("[PHASE: wizard] [STEP: {}] moved to {}", from, to);
        Ok(NavOutcome::Moved { from, to })
    }

    /// Move one step back. Errors of the step being left are cleared, attached ones included;
    /// values are kept.
    pub fn back(&mut self) -> NavOutcome {
        let from = self.current.clone();
        let to_idx = match &self.current {
            Position::Review => {
                self.review_errors.clear();
                self.states.len().checked_sub(1)
            }
            Position::Step(id) => match self.states.iter().position(|s| &s.id == id) {
                Some(0) | None => None,
                Some(idx) => {
                    self.states[idx].errors.clear();
                    self.states[idx].attached.clear();
                    Some(idx - 1)
                }
            },
        };

        match to_idx {
            Some(idx) => {
                let to = Position::Step(self.states[idx].id.clone());
                self.current = to.clone();
                NavOutcome::Moved { from, to }
            }
            None => NavOutcome::Stayed(from),
        }
    }

    /// Jump to any position whose preceding steps all validate.
    pub fn jump_to(&mut self, target: Position, draft: &Draft) -> Result<NavOutcome, WizardError> {
        let limit = match &target {
            Position::Review => self.states.len(),
            Position::Step(id) => self.index(id)?,
        };

        let mut blocking = Vec::new();
        for idx in 0..limit {
            let errors = self.schema.validate_step(&self.states[idx].id, draft.fields())?;
            self.states[idx].is_valid = errors.is_empty();
            if !errors.is_empty() {
                blocking.push(self.states[idx].id.clone());
            }
        }
        if !blocking.is_empty() {
            return Err(WizardError::InvalidTransition { target, blocking });
        }

        if target == self.current {
            return Ok(NavOutcome::Stayed(target));
        }
        let from = std::mem::replace(&mut self.current, target.clone());
        Ok(NavOutcome::Moved { from, to: target })
    }

    /// Recompute validity after a field change. Displayed errors that no longer apply are
    /// dropped; the rest pick up the current message. New errors are not displayed until
    /// the user tries to leave the step.
    pub fn refresh(&mut self, draft: &Draft) -> Result<(), WizardError> {
        for state in &mut self.states {
            let errors = self.schema.validate_step(&state.id, draft.fields())?;
            state.is_valid = errors.is_empty();
            state.errors = state
                .errors
                .keys()
                .filter_map(|k| errors.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
        }
        Ok(())
    }

    /// Show errors produced outside local validation (server rejection, upload failure).
    pub fn attach_errors(&mut self, position: &Position, errors: FieldErrors) -> Result<(), WizardError> {
        match position {
            Position::Review => self.review_errors.extend(errors),
            Position::Step(id) => {
                let idx = self.index(id)?;
                self.states[idx].attached.extend(errors);
            }
        }
        Ok(())
    }

    pub fn clear_attached(&mut self) {
        self.review_errors.clear();
        for state in &mut self.states {
            state.attached.clear();
        }
    }

    /// Move without validation. Only for routing the user back after a failed submission.
    pub(crate) fn return_to(&mut self, position: Position) -> Result<(), WizardError> {
        if let Position::Step(id) = &position {
            self.index(id)?;
        }
        self.current = position;
        Ok(())
    }

    fn confirm_review(&mut self, draft: &Draft) -> Result<NavOutcome, WizardError> {
        self.refresh(draft)?;
        let first_invalid = self.states.iter().position(|s| !s.is_valid);
        let Some(idx) = first_invalid else {
            return Ok(NavOutcome::ReadyToSubmit);
        };
        let errors = self.schema.validate_step(&self.states[idx].id, draft.fields())?;
        self.states[idx].errors = errors.clone();
        let step = Position::Step(self.states[idx].id.clone());
        self.current = step.clone();
        Ok(NavOutcome::Blocked { step, errors })
    }

    fn index(&self, id: &StepId) -> Result<usize, WizardError> {
        self.states
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| WizardError::UnknownStep(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::wizard::schema::{FieldSpec, Rule, StepSchema};

    fn schema() -> Arc<FormSchema> {
        Arc::new(
            FormSchema::new(
                "t",
                vec![
                    StepSchema::new("details", 1, "Details")
                        .field(FieldSpec::text("title", "Title").required()),
                    StepSchema::new("schedule", 2, "Schedule")
                        .field(FieldSpec::date("startDate", "Start Date").required())
                        .field(FieldSpec::date("endDate", "End Date").required())
                        .rule(Rule::DateOrder {
                            start: "startDate".to_string(),
                            end: "endDate".to_string(),
                            message: "End Date must be after Start Date".to_string(),
                        }),
                    StepSchema::new("notes", 3, "Notes").field(FieldSpec::text("notes", "Notes")),
                ],
            )
            .expect("schema"),
        )
    }

    fn step(id: &str) -> Position {
        Position::Step(StepId::from(id))
    }

    fn filled(schema: &FormSchema) -> Draft {
        schema
            .empty_draft()
            .update("title", FieldValue::text("Janitorial"))
            .and_then(|d| d.update("startDate", FieldValue::text("2024-01-01")))
            .and_then(|d| d.update("endDate", FieldValue::text("2024-06-30")))
            .expect("draft")
    }

    #[test]
    fn next_never_advances_past_errors() {
        let schema = schema();
        let draft = schema.empty_draft();
        let mut seq = StepSequencer::new(schema.clone());

        for _ in 0..3 {
            let outcome = seq.next(&draft).expect("next");
            assert!(matches!(outcome, NavOutcome::Blocked { .. }));
            assert_eq!(seq.current(), &step("details"));
        }
        assert_eq!(
            seq.state(&StepId::from("details")).map(|s| s.errors["title"].as_str()),
            Some("Title is required")
        );
    }

    #[test]
    fn reversed_dates_block_the_schedule_step() {
        let schema = schema();
        let draft = schema
            .empty_draft()
            .update("title", FieldValue::text("x"))
            .and_then(|d| d.update("startDate", FieldValue::text("2024-01-01")))
            .and_then(|d| d.update("endDate", FieldValue::text("2023-12-31")))
            .expect("draft");
        let mut seq = StepSequencer::new(schema.clone());
        seq.next(&draft).expect("details");

        match seq.next(&draft).expect("schedule") {
            NavOutcome::Blocked { step: s, errors } => {
                assert_eq!(s, step("schedule"));
                assert_eq!(errors.len(), 1);
                assert_eq!(errors["endDate"], "End Date must be after Start Date");
            }
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[test]
    fn walks_to_review_then_ready() {
        let schema = schema();
        let draft = filled(&schema);
        let mut seq = StepSequencer::new(schema.clone());
        assert!(!seq.all_valid());

        seq.next(&draft).expect("1");
        seq.next(&draft).expect("2");
        let outcome = seq.next(&draft).expect("3");
        assert!(seq.all_valid());
        assert_eq!(
            outcome,
            NavOutcome::Moved {
                from: step("notes"),
                to: Position::Review
            }
        );
        assert_eq!(seq.next(&draft).expect("review"), NavOutcome::ReadyToSubmit);
    }

    #[test]
    fn back_clears_errors_and_is_noop_at_first_step() {
        let schema = schema();
        let draft = schema.empty_draft().update("title", FieldValue::text("x")).expect("draft");
        let mut seq = StepSequencer::new(schema.clone());

        assert_eq!(seq.back(), NavOutcome::Stayed(step("details")));

        seq.next(&draft).expect("details");
        seq.next(&draft).expect("schedule blocked");
        assert!(!seq.state(&StepId::from("schedule")).map(|s| s.errors.is_empty()).unwrap_or(true));

        assert_eq!(
            seq.back(),
            NavOutcome::Moved {
                from: step("schedule"),
                to: step("details")
            }
        );
        assert!(seq.state(&StepId::from("schedule")).map(|s| s.errors.is_empty()).unwrap_or(false));
    }

    #[test]
    fn jump_past_invalid_step_fails_loudly() {
        let schema = schema();
        let draft = schema.empty_draft().update("title", FieldValue::text("x")).expect("draft");
        let mut seq = StepSequencer::new(schema.clone());

        let err = seq.jump_to(step("notes"), &draft).expect_err("schedule invalid");
        match err {
            WizardError::InvalidTransition { target, blocking } => {
                assert_eq!(target, step("notes"));
                assert_eq!(blocking, vec![StepId::from("schedule")]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(seq.current(), &step("details"));

        assert!(matches!(
            seq.jump_to(step("missing"), &draft),
            Err(WizardError::UnknownStep(_))
        ));

        assert_eq!(
            seq.jump_to(step("schedule"), &draft).expect("jump"),
            NavOutcome::Moved {
                from: step("details"),
                to: step("schedule")
            }
        );
    }

    #[test]
    fn refresh_drops_resolved_errors() {
        let schema = schema();
        let draft = schema.empty_draft();
        let mut seq = StepSequencer::new(schema.clone());
        seq.next(&draft).expect("blocked");

        let draft = draft.update("title", FieldValue::text("Fixed")).expect("update");
        seq.refresh(&draft).expect("refresh");
        let details = seq.state(&StepId::from("details")).expect("state");
        assert!(details.errors.is_empty());
        assert!(details.is_valid);
    }

    #[test]
    fn review_with_invalid_step_returns_to_it() {
        let schema = schema();
        let draft = filled(&schema);
        let mut seq = StepSequencer::new(schema.clone());
        seq.jump_to(Position::Review, &draft).expect("jump");

        let draft = draft.clear("title").expect("clear");
        match seq.next(&draft).expect("review") {
            NavOutcome::Blocked { step: s, .. } => assert_eq!(s, step("details")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(seq.current(), &step("details"));
    }

    #[test]
    fn attached_errors_are_displayed_until_step_passes() {
        let schema = schema();
        let draft = filled(&schema);
        let mut seq = StepSequencer::new(schema.clone());

        let mut server = FieldErrors::new();
        server.insert("title".to_string(), "Title already exists".to_string());
        seq.attach_errors(&step("details"), server).expect("attach");
        seq.return_to(step("details")).expect("return");

        let shown = seq.state(&StepId::from("details")).map(StepState::displayed_errors);
        assert_eq!(
            shown.as_ref().map(|e| e["title"].as_str()),
            Some("Title already exists")
        );

        seq.next(&draft).expect("next");
        assert!(seq.state(&StepId::from("details")).map(|s| s.attached.is_empty()).unwrap_or(false));
    }

    #[test]
    fn every_step_starts_invalid_without_errors() {
        let contract = Arc::new(crate::wizard::contract::schema().expect("contract schema"));
        let seq = StepSequencer::new(contract.clone());

        assert_eq!(seq.current(), &Position::Step(contract.steps()[0].id.clone()));
        assert_eq!(seq.states().len(), contract.steps().len());
        for state in seq.states() {
            assert!(!state.is_valid, "{} started valid", state.id);
            assert!(state.displayed_errors().is_empty());
        }
    }

    #[test]
    fn back_hides_attached_errors_of_the_step_being_left() {
        let schema = schema();
        let draft = filled(&schema);
        let mut seq = StepSequencer::new(schema.clone());
        seq.jump_to(step("notes"), &draft).expect("jump");

        let mut upload = FieldErrors::new();
        upload.insert("notes".to_string(), "upload of 'scan.pdf' failed".to_string());
        seq.attach_errors(&step("notes"), upload).expect("attach");

        seq.back();
        let notes = seq.state(&StepId::from("notes")).expect("state");
        assert!(notes.displayed_errors().is_empty());
    }
}
