use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "bizdesk";

/// Per-user data folder (`~/.local/share/bizdesk` on Linux).
/// Falls back to the working directory when the platform has no data dir.
pub fn resolve_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Resolve log folder (absolute path), creating it if needed.
pub fn resolve_log_folder(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = match configured {
        Some(p) => p.to_path_buf(),
        None => resolve_data_folder().join("logs"),
    };
    ensure_dir(&dir)
}

/// Resolve the draft checkpoint folder, creating it if needed.
pub fn resolve_checkpoint_folder(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = match configured {
        Some(p) => p.to_path_buf(),
        None => resolve_data_folder().join("drafts"),
    };
    ensure_dir(&dir)
}

/// Config files probed when no explicit `--config` is given, lowest priority first.
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        out.push(dir.join(APP_DIR).join("bizdesk.toml"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        out.push(cwd.join("bizdesk.toml"));
    }
    out
}

fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create folder {:?}", dir))?;
    Ok(dir.to_path_buf())
}
