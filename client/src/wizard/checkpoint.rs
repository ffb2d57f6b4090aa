// Draft checkpoints on disk (JSON), so an interrupted wizard can resume.

use super::sequencer::Position;
use crate::models::Draft;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key used for drafts of records that do not exist yet.
pub const NEW_RECORD_KEY: &str = "new";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCheckpoint {
    pub form: String,
    pub key: String,
    pub position: Position,
    pub draft: Draft,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {path:?} is not readable: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, form: &str, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", sanitize(form), sanitize(key)))
    }

    /// Write atomically: temp file first, then rename over the previous checkpoint.
    pub async fn save(&self, checkpoint: &DraftCheckpoint) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(&checkpoint.form, &checkpoint.key);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let bytes = serde_json::to_vec_pretty(checkpoint).map_err(|source| CheckpointError::Format {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| CheckpointError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(
            "[PHASE: checkpoint] [STEP: save] {} at {} (path={:?}, bytes={})",
            checkpoint.key,
            checkpoint.position,
            path,
            bytes.len()
        );
        Ok(path)
    }

    /// Missing checkpoints are `Ok(None)`.
    pub async fn load(&self, form: &str, key: &str) -> Result<Option<DraftCheckpoint>, CheckpointError> {
        let path = self.path_for(form, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        let checkpoint: DraftCheckpoint =
            serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Format {
                path: path.clone(),
                source,
            })?;
        info!(
            "[PHASE: checkpoint] [STEP: load] restored {} draft '{}' saved at {}",
            form, key, checkpoint.saved_at
        );
        Ok(Some(checkpoint))
    }

    /// Returns whether a checkpoint existed.
    pub async fn discard(&self, form: &str, key: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(form, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("[PHASE: checkpoint] [STEP: discard] {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
