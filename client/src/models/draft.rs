// Draft aggregation
//
// A Draft is the in-progress record built across wizard steps. All mutations return a new
// Draft so every intermediate state can be inspected (and checkpointed) independently.

use super::value::{lookup, Attachment, FieldMap, FieldValue, LocalId, RepeatableItem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("field '{0}' is not owned by any step")]
    UnownedField(String),

    #[error("field '{field}' is owned by both '{first}' and '{second}'")]
    DuplicateOwner {
        field: String,
        first: StepId,
        second: StepId,
    },

    #[error("field path '{0}' is empty or malformed")]
    EmptyPath(String),

    #[error("cannot write '{path}': '{at}' is not an object")]
    PathConflict { path: String, at: String },

    #[error("step '{0}' has no repeatable field")]
    NoRepeatable(StepId),

    #[error("item {local_id} not found in step '{step}'")]
    UnknownItem { step: StepId, local_id: LocalId },

    #[error("no uploaded URL for attachment '{0}'")]
    MissingUpload(String),

    #[error("field '{0}' holds a number that cannot be sent (NaN or infinite)")]
    NonFiniteNumber(String),
}

/// An attachment that still has to be uploaded, with where it lives in the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    /// Path of the files field, e.g. `documents` or `risks[<localId>].evidence`.
    pub field_path: String,
    /// Position inside that field's file list.
    pub position: usize,
    pub attachment: Attachment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    #[serde(default)]
    fields: FieldMap,
    step_ownership: BTreeMap<StepId, BTreeSet<String>>,
    #[serde(default)]
    repeatables: BTreeMap<StepId, String>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the top-level fields a step owns. A field may belong to one step only.
    pub fn with_step<I, S>(mut self, step: StepId, fields: I) -> Result<Self, DraftError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut owned = BTreeSet::new();
        for field in fields {
            let field = field.into();
            if let Some(first) = self.owner_of(&field) {
                if *first != step {
                    return Err(DraftError::DuplicateOwner {
                        field,
                        first: first.clone(),
                        second: step,
                    });
                }
            }
            owned.insert(field);
        }
        self.step_ownership.entry(step).or_default().extend(owned);
        Ok(self)
    }

    /// Mark one of the step's owned fields as its repeatable list.
    pub fn with_repeatable(mut self, step: StepId, field: impl Into<String>) -> Result<Self, DraftError> {
        let field = field.into();
        if self.owner_of(&field) != Some(&step) {
            return Err(DraftError::UnownedField(field));
        }
        self.fields
            .entry(field.clone())
            .or_insert_with(|| FieldValue::List(Vec::new()));
        self.repeatables.insert(step, field);
        Ok(self)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, path: &str) -> Option<&FieldValue> {
        lookup(&self.fields, path)
    }

    pub fn owner_of(&self, field: &str) -> Option<&StepId> {
        self.step_ownership
            .iter()
            .find(|(_, owned)| owned.contains(field))
            .map(|(step, _)| step)
    }

    pub fn owned_fields(&self, step: &StepId) -> Option<&BTreeSet<String>> {
        self.step_ownership.get(step)
    }

    /// True when both drafts declare the same steps, fields and repeatables.
    pub fn same_layout(&self, other: &Draft) -> bool {
        self.step_ownership == other.step_ownership && self.repeatables == other.repeatables
    }

    /// Set a (possibly nested) field. Sibling keys of nested objects are kept.
    pub fn update(&self, path: &str, value: FieldValue) -> Result<Draft, DraftError> {
        let segments = split_path(path)?;
        self.ensure_owned(segments[0])?;
        let mut next = self.clone();
        set_path(&mut next.fields, &segments, value, path)?;
        Ok(next)
    }

    /// Remove a (possibly nested) field. Missing paths are a no-op.
    pub fn clear(&self, path: &str) -> Result<Draft, DraftError> {
        let segments = split_path(path)?;
        self.ensure_owned(segments[0])?;
        let mut next = self.clone();
        remove_path(&mut next.fields, &segments);
        Ok(next)
    }

    pub fn repeatable_items(&self, step: &StepId) -> &[RepeatableItem] {
        match self
            .repeatables
            .get(step)
            .and_then(|field| self.fields.get(field))
        {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Append an item built from `template` with a fresh local id.
    pub fn add_repeatable(&self, step: &StepId, template: FieldMap) -> Result<(Draft, LocalId), DraftError> {
        let mut next = self.clone();
        let local_id = LocalId::new();
        next.items_mut(step)?.push(RepeatableItem {
            local_id,
            fields: template,
        });
        Ok((next, local_id))
    }

    /// Remove one item. Remaining items keep their local ids and relative order.
    pub fn remove_repeatable(&self, step: &StepId, local_id: LocalId) -> Result<Draft, DraftError> {
        let mut next = self.clone();
        let items = next.items_mut(step)?;
        let before = items.len();
        items.retain(|item| item.local_id != local_id);
        if items.len() == before {
            return Err(DraftError::UnknownItem {
                step: step.clone(),
                local_id,
            });
        }
        Ok(next)
    }

    pub fn update_repeatable(
        &self,
        step: &StepId,
        local_id: LocalId,
        path: &str,
        value: FieldValue,
    ) -> Result<Draft, DraftError> {
        let segments = split_path(path)?;
        let mut next = self.clone();
        let item = next
            .items_mut(step)?
            .iter_mut()
            .find(|item| item.local_id == local_id)
            .ok_or_else(|| DraftError::UnknownItem {
                step: step.clone(),
                local_id,
            })?;
        set_path(&mut item.fields, &segments, value, path)?;
        Ok(next)
    }

    /// Attachments still to be uploaded, in the same order `to_payload` consumes URLs.
    pub fn pending_attachments(&self) -> Vec<PendingUpload> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            collect_pending(name, value, &mut out);
        }
        out
    }

    /// Mark the first `urls.len()` pending attachments as uploaded, in
    /// `pending_attachments()` order. Extra URLs are ignored.
    pub fn with_uploaded(&self, urls: &[String]) -> Draft {
        let mut next = self.clone();
        let mut urls = urls.iter();
        for value in next.fields.values_mut() {
            resolve_pending(value, &mut urls);
        }
        next
    }

    /// Flatten into the JSON body sent to the Record API.
    ///
    /// `uploaded_urls` must hold one URL per entry of `pending_attachments()`, in order.
    /// Local ids are stripped; dates are rendered as `YYYY-MM-DD`.
    pub fn to_payload(&self, uploaded_urls: &[String]) -> Result<Value, DraftError> {
        let mut urls = uploaded_urls.iter();
        let body = map_to_json(&self.fields, "", &mut urls)?;
        Ok(Value::Object(body))
    }

    fn ensure_owned(&self, root: &str) -> Result<(), DraftError> {
        if self.owner_of(root).is_none() {
            return Err(DraftError::UnownedField(root.to_string()));
        }
        Ok(())
    }

    fn items_mut(&mut self, step: &StepId) -> Result<&mut Vec<RepeatableItem>, DraftError> {
        let field = self
            .repeatables
            .get(step)
            .cloned()
            .ok_or_else(|| DraftError::NoRepeatable(step.clone()))?;
        match self
            .fields
            .entry(field.clone())
            .or_insert_with(|| FieldValue::List(Vec::new()))
        {
            FieldValue::List(items) => Ok(items),
            _ => Err(DraftError::PathConflict {
                path: field.clone(),
                at: field,
            }),
        }
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, DraftError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DraftError::EmptyPath(path.to_string()));
    }
    Ok(segments)
}

fn set_path(
    map: &mut FieldMap,
    segments: &[&str],
    value: FieldValue,
    full_path: &str,
) -> Result<(), DraftError> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(DraftError::EmptyPath(full_path.to_string()));
    };
    if rest.is_empty() {
        map.insert(head.to_string(), value);
        return Ok(());
    }
    match map
        .entry(head.to_string())
        .or_insert_with(|| FieldValue::Object(FieldMap::new()))
    {
        FieldValue::Object(inner) => set_path(inner, rest, value, full_path),
        _ => Err(DraftError::PathConflict {
            path: full_path.to_string(),
            at: head.to_string(),
        }),
    }
}

fn remove_path(map: &mut FieldMap, segments: &[&str]) {
    match segments {
        [] => {}
        [leaf] => {
            map.remove(*leaf);
        }
        [head, rest @ ..] => {
            if let Some(FieldValue::Object(inner)) = map.get_mut(*head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn collect_pending(path: &str, value: &FieldValue, out: &mut Vec<PendingUpload>) {
    match value {
        FieldValue::Files(files) => {
            for (position, file) in files.iter().enumerate() {
                if file.is_pending() {
                    out.push(PendingUpload {
                        field_path: path.to_string(),
                        position,
                        attachment: file.clone(),
                    });
                }
            }
        }
        FieldValue::Object(inner) => {
            for (name, v) in inner {
                collect_pending(&format!("{}.{}", path, name), v, out);
            }
        }
        FieldValue::List(items) => {
            for item in items {
                for (name, v) in &item.fields {
                    collect_pending(&format!("{}[{}].{}", path, item.local_id, name), v, out);
                }
            }
        }
        _ => {}
    }
}

fn resolve_pending<'a>(value: &mut FieldValue, urls: &mut impl Iterator<Item = &'a String>) {
    match value {
        FieldValue::Files(files) => {
            for file in files.iter_mut().filter(|f| f.is_pending()) {
                let Some(url) = urls.next() else {
                    return;
                };
                *file = Attachment::Uploaded {
                    file_name: file.file_name().to_string(),
                    url: url.clone(),
                };
            }
        }
        FieldValue::Object(inner) => {
            for v in inner.values_mut() {
                resolve_pending(v, urls);
            }
        }
        FieldValue::List(items) => {
            for item in items {
                for v in item.fields.values_mut() {
                    resolve_pending(v, urls);
                }
            }
        }
        _ => {}
    }
}

fn map_to_json<'a>(
    fields: &FieldMap,
    prefix: &str,
    urls: &mut impl Iterator<Item = &'a String>,
) -> Result<Map<String, Value>, DraftError> {
    let mut out = Map::new();
    for (name, value) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        out.insert(name.clone(), value_to_json(value, &path, urls)?);
    }
    Ok(out)
}

fn value_to_json<'a>(
    value: &FieldValue,
    path: &str,
    urls: &mut impl Iterator<Item = &'a String>,
) -> Result<Value, DraftError> {
    Ok(match value {
        FieldValue::Text(s) | FieldValue::Enum(s) => Value::String(s.clone()),
        FieldValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .ok_or_else(|| DraftError::NonFiniteNumber(path.to_string()))?,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        FieldValue::Object(inner) => Value::Object(map_to_json(inner, path, urls)?),
        FieldValue::List(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                let item_path = format!("{}[{}]", path, item.local_id);
                rows.push(Value::Object(map_to_json(&item.fields, &item_path, urls)?));
            }
            Value::Array(rows)
        }
        FieldValue::Files(files) => {
            let mut out = Vec::with_capacity(files.len());
            for file in files {
                let url = match file {
                    Attachment::Uploaded { url, .. } => url.clone(),
                    Attachment::Pending { file_name, .. } => urls
                        .next()
                        .cloned()
                        .ok_or_else(|| DraftError::MissingUpload(file_name.clone()))?,
                };
                out.push(Value::String(url));
            }
            Value::Array(out)
        }
    })
}
