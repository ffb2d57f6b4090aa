// Field validator
//
// Pure functions over a snapshot of draft fields: same input, same errors, no side effects.
// Errors are values (`FieldErrors`), never `Err`; they only block step advancement.

use super::schema::{item_value, FieldErrors, FieldKind, FieldSpec, FormSchema, Rule};
use super::WizardError;
use crate::models::value::lookup;
use crate::models::{FieldMap, FieldValue, StepId};
use crate::utils::validation::{is_valid_email, parse_iso_date, parse_number};
use chrono::NaiveDate;

impl FormSchema {
    /// Validate the fields owned by one step.
    pub fn validate_step(&self, step: &StepId, fields: &FieldMap) -> Result<FieldErrors, WizardError> {
        let schema = self
            .step(step)
            .ok_or_else(|| WizardError::UnknownStep(step.clone()))?;

        let mut errors = FieldErrors::new();
        for spec in &schema.fields {
            check_field(spec, lookup(fields, &spec.path), &spec.path, &mut errors);
        }
        for rule in &schema.rules {
            check_rule(rule, fields, &mut errors);
        }
        Ok(errors)
    }

    /// Validate every step; only steps with errors are returned, in step order.
    pub fn validate_all(&self, fields: &FieldMap) -> Vec<(StepId, FieldErrors)> {
        self.steps()
            .iter()
            .filter_map(|s| {
                let errors = self.validate_step(&s.id, fields).ok()?;
                (!errors.is_empty()).then(|| (s.id.clone(), errors))
            })
            .collect()
    }
}

fn check_field(spec: &FieldSpec, value: Option<&FieldValue>, key: &str, errors: &mut FieldErrors) {
    let label = &spec.label;

    match &spec.kind {
        FieldKind::Repeatable { fields, min_items } => {
            let items = match value {
                None => &[][..],
                Some(FieldValue::List(items)) => items.as_slice(),
                Some(_) => {
                    errors.insert(key.to_string(), format!("{} is invalid", label));
                    return;
                }
            };
            if let Some(msg) = count_message(label, items.len(), *min_items, spec.required, "entry", "entries") {
                errors.insert(key.to_string(), msg);
            }
            for item in items {
                for sub in fields {
                    let sub_key = format!("{}[{}].{}", key, item.local_id, sub.path);
                    check_field(sub, item_value(item, &sub.path), &sub_key, errors);
                }
            }
            return;
        }
        FieldKind::Files { min_files } => {
            let count = match value {
                None => 0,
                Some(FieldValue::Files(files)) => files.len(),
                Some(_) => {
                    errors.insert(key.to_string(), format!("{} is invalid", label));
                    return;
                }
            };
            if let Some(msg) = count_message(label, count, *min_files, spec.required, "file", "files") {
                errors.insert(key.to_string(), msg);
            }
            return;
        }
        _ => {}
    }

    let Some(value) = value.filter(|v| !v.is_blank()) else {
        if spec.required {
            errors.insert(key.to_string(), format!("{} is required", label));
        }
        return;
    };

    if let Some(msg) = check_kind(spec, value) {
        errors.insert(key.to_string(), msg);
    }
}

fn count_message(label: &str, count: usize, min: usize, required: bool, one: &str, many: &str) -> Option<String> {
    let min = if required { min.max(1) } else { min };
    if count >= min {
        return None;
    }
    if count == 0 && min == 1 {
        return Some(format!("{} is required", label));
    }
    let noun = if min == 1 { one } else { many };
    Some(format!("{} requires at least {} {}", label, min, noun))
}

fn check_kind(spec: &FieldSpec, value: &FieldValue) -> Option<String> {
    let label = &spec.label;
    match &spec.kind {
        FieldKind::Text { max_len } => match value.as_str() {
            Some(s) => match max_len {
                Some(n) if s.trim().chars().count() > *n => {
                    Some(format!("{} must be at most {} characters", label, n))
                }
                _ => None,
            },
            None => Some(format!("{} must be text", label)),
        },
        FieldKind::Number { min, max } => {
            let Some(n) = as_number(value) else {
                return Some(format!("{} must be a number", label));
            };
            match (min, max) {
                (Some(lo), Some(hi)) if n < *lo || n > *hi => {
                    Some(format!("{} must be between {} and {}", label, lo, hi))
                }
                (Some(lo), None) if n < *lo => Some(format!("{} must be at least {}", label, lo)),
                (None, Some(hi)) if n > *hi => Some(format!("{} must be at most {}", label, hi)),
                _ => None,
            }
        }
        FieldKind::Date => {
            as_date(value).is_none().then(|| format!("{} must be a valid date (YYYY-MM-DD)", label))
        }
        FieldKind::Email => match value.as_str() {
            Some(s) if is_valid_email(s) => None,
            _ => Some(format!("{} must be a valid email address", label)),
        },
        FieldKind::Enum(options) => match value.as_str() {
            Some(s) if options.iter().any(|o| o == s.trim()) => None,
            _ => Some(format!("{} must be one of: {}", label, options.join(", "))),
        },
        FieldKind::Bool => {
            (!matches!(value, FieldValue::Bool(_))).then(|| format!("{} must be yes or no", label))
        }
        FieldKind::Repeatable { .. } | FieldKind::Files { .. } => None,
    }
}

fn check_rule(rule: &Rule, fields: &FieldMap, errors: &mut FieldErrors) {
    match rule {
        Rule::DateOrder {
            start,
            end,
            message,
        } => {
            // Field-level errors (missing/invalid date) take precedence.
            if errors.contains_key(start) || errors.contains_key(end) {
                return;
            }
            let start_date = lookup(fields, start).and_then(as_date);
            let end_date = lookup(fields, end).and_then(as_date);
            if let (Some(s), Some(e)) = (start_date, end_date) {
                if e < s {
                    errors.insert(end.clone(), message.clone());
                }
            }
        }
        Rule::RequiredWhen {
            field,
            when_field,
            equals,
            message,
        } => {
            let triggered = lookup(fields, when_field)
                .and_then(FieldValue::as_str)
                .map(|v| v.trim() == equals)
                .unwrap_or(false);
            let missing = lookup(fields, field).map(FieldValue::is_blank).unwrap_or(true);
            if triggered && missing && !errors.contains_key(field) {
                errors.insert(field.clone(), message.clone());
            }
        }
    }
}

/// Numeric fields may hold typed text. Blank text is "no value", never zero.
fn as_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) if n.is_finite() => Some(*n),
        FieldValue::Text(s) => parse_number(s),
        _ => None,
    }
}

fn as_date(value: &FieldValue) -> Option<NaiveDate> {
    match value {
        FieldValue::Date(d) => Some(*d),
        FieldValue::Text(s) => parse_iso_date(s),
        _ => None,
    }
}
