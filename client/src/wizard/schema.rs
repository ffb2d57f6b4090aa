// Declarative form schema: steps, the fields each step owns, and cross-field rules

use crate::models::value::lookup;
use crate::models::{Attachment, Draft, DraftError, FieldMap, FieldValue, LocalId, RepeatableItem, StepId};
use crate::utils::validation::parse_iso_date;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Field name -> user-facing message. Empty means valid.
pub type FieldErrors = BTreeMap<String, String>;

/// Reserved id of the terminal review position.
pub const REVIEW_STEP: &str = "review";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { max_len: Option<usize> },
    Number { min: Option<f64>, max: Option<f64> },
    Date,
    Email,
    Enum(Vec<String>),
    Bool,
    Repeatable { fields: Vec<FieldSpec>, min_items: usize },
    Files { min_files: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Dot-separated path; the first segment is the owned top-level field.
    pub path: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    fn new(path: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            path: path.to_string(),
            label: label.to_string(),
            kind,
            required: false,
        }
    }

    pub fn text(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Text { max_len: None })
    }

    pub fn number(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Number { min: None, max: None })
    }

    pub fn date(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Date)
    }

    pub fn email(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Email)
    }

    pub fn choice(path: &str, label: &str, options: &[&str]) -> Self {
        Self::new(
            path,
            label,
            FieldKind::Enum(options.iter().map(|o| o.to_string()).collect()),
        )
    }

    pub fn flag(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Bool)
    }

    pub fn repeatable(path: &str, label: &str, fields: Vec<FieldSpec>) -> Self {
        Self::new(path, label, FieldKind::Repeatable { fields, min_items: 0 })
    }

    pub fn files(path: &str, label: &str) -> Self {
        Self::new(path, label, FieldKind::Files { min_files: 0 })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, lo: f64, hi: f64) -> Self {
        if let FieldKind::Number { min, max } = &mut self.kind {
            *min = Some(lo);
            *max = Some(hi);
        }
        self
    }

    pub fn at_least(mut self, lo: f64) -> Self {
        if let FieldKind::Number { min, .. } = &mut self.kind {
            *min = Some(lo);
        }
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        if let FieldKind::Text { max_len } = &mut self.kind {
            *max_len = Some(n);
        }
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        match &mut self.kind {
            FieldKind::Repeatable { min_items, .. } => *min_items = n,
            FieldKind::Files { min_files } => *min_files = n,
            _ => {}
        }
        self
    }

    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// `end` must not be earlier than `start`. Error is reported on `end`.
    DateOrder {
        start: String,
        end: String,
        message: String,
    },
    /// `field` is required when `when_field` currently equals `equals`.
    RequiredWhen {
        field: String,
        when_field: String,
        equals: String,
        message: String,
    },
}

impl Rule {
    fn fields(&self) -> [&str; 2] {
        match self {
            Rule::DateOrder { start, end, .. } => [start.as_str(), end.as_str()],
            Rule::RequiredWhen {
                field, when_field, ..
            } => [field.as_str(), when_field.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSchema {
    pub id: StepId,
    pub order: u32,
    pub title: String,
    pub fields: Vec<FieldSpec>,
    pub rules: Vec<Rule>,
}

impl StepSchema {
    pub fn new(id: &str, order: u32, title: &str) -> Self {
        Self {
            id: StepId::from(id),
            order,
            title: title.to_string(),
            fields: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn root_fields(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.root().to_string()).collect()
    }

    fn repeatable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Repeatable { .. }))
            .map(|f| f.path.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("form '{0}' declares no steps")]
    Empty(String),

    #[error("step id '{0}' is declared more than once")]
    DuplicateStep(StepId),

    #[error("step id '{0}' is reserved")]
    ReservedStep(StepId),

    #[error("steps '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        order: u32,
        first: StepId,
        second: StepId,
    },

    #[error("step '{0}' declares more than one repeatable field")]
    MultipleRepeatables(StepId),

    #[error("repeatable field '{0}' must be a top-level field")]
    NestedRepeatable(String),

    #[error("rule in step '{step}' references unknown field '{field}'")]
    UnknownRuleField { step: StepId, field: String },

    #[error(transparent)]
    Ownership(#[from] DraftError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    name: String,
    steps: Vec<StepSchema>,
}

impl FormSchema {
    /// Build a schema, sorting steps by their explicit `order`.
    ///
    /// Rejects duplicate ids/orders, fields owned by two steps, and rules that point at
    /// fields outside their step, so reordering or inserting steps cannot silently break
    /// navigation checks.
    pub fn new(name: &str, mut steps: Vec<StepSchema>) -> Result<Self, SchemaError> {
        if steps.is_empty() {
            return Err(SchemaError::Empty(name.to_string()));
        }
        steps.sort_by_key(|s| s.order);

        let mut ids = BTreeSet::new();
        for pair in steps.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(SchemaError::DuplicateOrder {
                    order: pair[0].order,
                    first: pair[0].id.clone(),
                    second: pair[1].id.clone(),
                });
            }
        }
        for step in &steps {
            if step.id.as_str() == REVIEW_STEP {
                return Err(SchemaError::ReservedStep(step.id.clone()));
            }
            if !ids.insert(step.id.clone()) {
                return Err(SchemaError::DuplicateStep(step.id.clone()));
            }
            let repeatables = step.repeatable_fields();
            if repeatables.len() > 1 {
                return Err(SchemaError::MultipleRepeatables(step.id.clone()));
            }
            if let Some(path) = repeatables.first() {
                if path.contains('.') {
                    return Err(SchemaError::NestedRepeatable(path.to_string()));
                }
            }
            let declared: BTreeSet<&str> = step.fields.iter().map(|f| f.path.as_str()).collect();
            for rule in &step.rules {
                for field in rule.fields() {
                    if !declared.contains(field) {
                        return Err(SchemaError::UnknownRuleField {
                            step: step.id.clone(),
                            field: field.to_string(),
                        });
                    }
                }
            }
        }

        let schema = Self {
            name: name.to_string(),
            steps,
        };
        // Ownership conflicts surface here.
        schema.try_empty_draft()?;
        Ok(schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepSchema] {
        &self.steps
    }

    pub fn step(&self, id: &StepId) -> Option<&StepSchema> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn index_of(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Step owning a field as named by the UI or the server
    /// (`address.street`, `risks[3].probability`, `documents[1]`).
    pub fn step_for_field(&self, field: &str) -> Option<&StepId> {
        let root = field
            .split(['.', '['])
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())?;
        self.steps
            .iter()
            .find(|s| s.fields.iter().any(|f| f.root() == root))
            .map(|s| &s.id)
    }

    pub fn empty_draft(&self) -> Draft {
        // `new` already proved the layout is consistent.
        self.try_empty_draft().unwrap_or_default()
    }

    fn try_empty_draft(&self) -> Result<Draft, DraftError> {
        let mut draft = Draft::new();
        for step in &self.steps {
            draft = draft.with_step(step.id.clone(), step.root_fields())?;
            if let Some(field) = step.repeatable_fields().first() {
                draft = draft.with_repeatable(step.id.clone(), *field)?;
            }
        }
        Ok(draft)
    }

    /// Prefill a draft from a record fetched from the server (edit mode).
    /// Keys the schema does not declare are ignored.
    pub fn draft_from_record(&self, record: &Value) -> Result<Draft, DraftError> {
        let mut draft = self.empty_draft();
        for step in &self.steps {
            for spec in &step.fields {
                let Some(raw) = json_lookup(record, &spec.path) else {
                    continue;
                };
                if let Some(value) = value_from_json(spec, raw) {
                    draft = draft.update(&spec.path, value)?;
                }
            }
        }
        Ok(draft)
    }
}

fn json_lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
        .filter(|v| !v.is_null())
}

fn value_from_json(spec: &FieldSpec, raw: &Value) -> Option<FieldValue> {
    match (&spec.kind, raw) {
        (FieldKind::Number { .. }, Value::Number(n)) => n.as_f64().map(FieldValue::Number),
        (FieldKind::Date, Value::String(s)) => Some(
            parse_iso_date(s)
                .or_else(|| s.get(..10).and_then(parse_iso_date))
                .map(FieldValue::Date)
                .unwrap_or_else(|| FieldValue::text(s.clone())),
        ),
        (FieldKind::Enum(_), Value::String(s)) => Some(FieldValue::choice(s.clone())),
        (FieldKind::Bool, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
        (FieldKind::Repeatable { fields, .. }, Value::Array(rows)) => {
            let items = rows
                .iter()
                .map(|row| {
                    let mut item_fields = FieldMap::new();
                    for sub in fields {
                        if let Some(v) = json_lookup(row, &sub.path).and_then(|r| value_from_json(sub, r)) {
                            item_fields.insert(sub.path.clone(), v);
                        }
                    }
                    RepeatableItem {
                        local_id: LocalId::new(),
                        fields: item_fields,
                    }
                })
                .collect();
            Some(FieldValue::List(items))
        }
        (FieldKind::Files { .. }, Value::Array(files)) => Some(FieldValue::Files(
            files.iter().filter_map(attachment_from_json).collect(),
        )),
        (_, Value::String(s)) => Some(FieldValue::text(s.clone())),
        (_, Value::Number(n)) => Some(FieldValue::text(n.to_string())),
        (_, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
        _ => None,
    }
}

fn attachment_from_json(raw: &Value) -> Option<Attachment> {
    let (url, name) = match raw {
        Value::String(url) => (url.clone(), None),
        Value::Object(obj) => (
            obj.get("url")?.as_str()?.to_string(),
            obj.get("fileName").and_then(Value::as_str).map(str::to_string),
        ),
        _ => return None,
    };
    let file_name = name.unwrap_or_else(|| {
        url.rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("attachment")
            .to_string()
    });
    Some(Attachment::Uploaded { file_name, url })
}

/// Read a field of a repeatable item.
pub(crate) fn item_value<'a>(item: &'a RepeatableItem, path: &str) -> Option<&'a FieldValue> {
    lookup(&item.fields, path)
}
