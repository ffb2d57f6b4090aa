// Client configuration
//
// Layered: built-in defaults -> TOML file(s) -> `BIZDESK__SECTION__KEY` environment overrides.

use crate::utils::path_resolver;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub list: ListConfig,
    pub logging: LoggingConfig,
    pub drafts: DraftsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the record service, e.g. `https://bizdesk.example.com/api`.
    pub base_url: String,
    /// Collection path segment, e.g. `contracts`.
    pub resource: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            resource: "contracts".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(self.base_url.trim())
            .with_context(|| format!("api.base_url is not a valid URL: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("api.base_url must use http or https.");
        }
        if url.cannot_be_a_base() {
            anyhow::bail!("api.base_url cannot be used as a base URL.");
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub page_size: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
    pub stdout: bool,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            stdout: true,
            dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level
            .trim()
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Debug)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftsConfig {
    pub checkpoint_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Load configuration. An explicit path must exist; default locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&ClientConfig::default())
            .context("Failed to build default configuration")?;
        let mut builder = config::Config::builder().add_source(defaults);

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                for candidate in path_resolver::default_config_candidates() {
                    builder = builder.add_source(config::File::from(candidate).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BIZDESK")
                .prefix_separator("__")
                .separator("__"),
        );

        let cfg: ClientConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Configuration has invalid values")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: ClientConfig = toml::from_str(raw).context("Invalid TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.api.parsed_base_url()?;
        if self.api.resource.trim().is_empty() {
            anyhow::bail!("api.resource is required.");
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be a positive number.");
        }
        if self.list.page_size == 0 {
            anyhow::bail!("list.page_size must be a positive number.");
        }
        Ok(())
    }

    pub fn checkpoint_dir(&self) -> Result<PathBuf> {
        path_resolver::resolve_checkpoint_folder(self.drafts.checkpoint_dir.as_deref())
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        path_resolver::resolve_log_folder(self.logging.dir.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = ClientConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.list.page_size, 10);
        assert_eq!(cfg.api.resource, "contracts");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ClientConfig::from_toml_str(
            r#"
            [api]
            base_url = "https://bizdesk.example.com/api"

            [list]
            page_size = 25
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.api.base_url, "https://bizdesk.example.com/api");
        assert_eq!(cfg.api.timeout_secs, 30);
        assert_eq!(cfg.list.page_size, 25);
        assert!(cfg.logging.stdout);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = ClientConfig::from_toml_str("[list]\npage_size = 0\n").expect_err("invalid");
        assert!(err.to_string().contains("page_size"), "{}", err);
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = ClientConfig::from_toml_str("[api]\nbase_url = \"ftp://files.example\"\n")
            .expect_err("invalid");
        assert!(err.to_string().contains("http"), "{}", err);
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "[api]\nresource = \"contractors\"\ntimeout_secs = 5").expect("write");

        let cfg = ClientConfig::load(Some(file.path())).expect("load");
        assert_eq!(cfg.api.resource, "contractors");
        assert_eq!(cfg.api.timeout_secs, 5);
        assert_eq!(cfg.api.base_url, ApiConfig::default().base_url);
    }

    #[test]
    fn missing_explicit_file_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(ClientConfig::load(Some(&tmp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn configured_checkpoint_dir_is_used_and_created() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let wanted = tmp.path().join("bizdesk-drafts");
        let raw = format!("[drafts]\ncheckpoint_dir = {:?}\n", wanted.display().to_string());
        let cfg = ClientConfig::from_toml_str(&raw).expect("valid config");

        assert_eq!(cfg.checkpoint_dir().expect("resolve"), wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn unknown_log_level_falls_back_to_debug() {
        let cfg = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(cfg.level_filter(), log::LevelFilter::Debug);
    }
}
