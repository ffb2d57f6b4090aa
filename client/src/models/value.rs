// Field values held by a draft
//
// Every form input is stored as a tagged value so validation and payload assembly can
// dispatch on the variant instead of guessing at runtime.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Client-only identity of a repeatable item. Keys UI lists; never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatableItem {
    pub local_id: LocalId,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Attachment {
    /// Local file picked by the user, not uploaded yet.
    Pending {
        file_name: String,
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    Uploaded {
        file_name: String,
        url: String,
    },
}

impl Attachment {
    pub fn pending(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        Attachment::Pending {
            file_name,
            path,
            content_type: None,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Attachment::Pending { file_name, .. } | Attachment::Uploaded { file_name, .. } => {
                file_name
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Attachment::Pending { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    Enum(String),
    Object(FieldMap),
    List(Vec<RepeatableItem>),
    Files(Vec<Attachment>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn choice(value: impl Into<String>) -> Self {
        FieldValue::Enum(value.into())
    }

    /// True when the value carries no user input (empty or whitespace-only text).
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => s.trim().is_empty(),
            FieldValue::Object(map) => map.values().all(FieldValue::is_blank),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// Read a dot-separated path (`address.street`) out of a field map.
pub fn lookup<'a>(fields: &'a FieldMap, path: &str) -> Option<&'a FieldValue> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?.trim())?;
    for segment in segments {
        match current {
            FieldValue::Object(inner) => current = inner.get(segment.trim())?,
            _ => return None,
        }
    }
    Some(current)
}
