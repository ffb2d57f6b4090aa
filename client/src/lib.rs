// bizdesk client core
// Main library entry point

pub mod api;
pub mod config;
pub mod list;
pub mod models;
pub mod utils;
pub mod wizard;

mod smoke;

use anyhow::Context;
use config::{ClientConfig, LoggingConfig};
use log::{error, info};
use std::path::{Path, PathBuf};

/// Initialize logging system with dual format (JSON + human-readable)
pub fn init_logging(cfg: &LoggingConfig, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("bizdesk-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("bizdesk-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(cfg.level_filter());

    if cfg.stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let line = utils::logging::render(
                        &timestamp_local.to_string(),
                        record,
                        &message.to_string(),
                        false,
                    );
                    out.finish(format_args!("{}", line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let line =
                        utils::logging::render(&timestamp_utc, record, &message.to_string(), true);
                    out.finish(format_args!("{}\n", line));
                })
                .chain(fern::log_file(&json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let line = utils::logging::render(
                        &timestamp_local.to_string(),
                        record,
                        &message.to_string(),
                        false,
                    );
                    out.finish(format_args!("{}\n", line));
                })
                .chain(fern::log_file(&txt_log_file)?),
        );

    dispatch
        .apply()
        .context("A global logger is already installed")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Load configuration and start logging. Failures here are reported on stderr because no
/// logger exists yet.
fn bootstrap(config_path: Option<&Path>) -> anyhow::Result<(ClientConfig, PathBuf)> {
    let cfg = ClientConfig::load(config_path)?;
    let log_dir = cfg.log_dir()?;
    if let Err(e) = init_logging(&cfg.logging, &log_dir) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
    info!(
        "[PHASE: initialization] bizdesk {} starting at {} (api={}, resource={})",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now(),
        utils::logging::mask_url_credentials(&cfg.api.base_url),
        cfg.api.resource
    );
    Ok((cfg, log_dir))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")
}

/// Non-interactive contract wizard smoke (deterministic, in-memory services).
/// Writes a transcript under the log directory and exits 0/1.
pub fn run_wizard_smoke(config_path: Option<&Path>) {
    let result = bootstrap(config_path).and_then(|(cfg, log_dir)| {
        let checkpoint_dir = cfg.checkpoint_dir()?;
        runtime()?.block_on(smoke::wizard_smoke(&log_dir, &checkpoint_dir))
    });

    match result {
        Ok(path) => {
            println!("Wizard smoke passed; transcript: {}", path.display());
        }
        Err(e) => {
            error!("[PHASE: smoke] [STEP: wizard] Smoke exited with error: {:?}", e);
            eprintln!("bizdesk error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Print one page of records from the configured record service.
pub fn run_list(config_path: Option<&Path>, page: u64) {
    let result = bootstrap(config_path)
        .and_then(|(cfg, _)| runtime()?.block_on(smoke::list_page(&cfg, page)));

    match result {
        Ok(rendered) => print!("{}", rendered),
        Err(e) => {
            error!("[PHASE: list] [STEP: fatal] Listing failed: {:?}", e);
            eprintln!("bizdesk error: {:#}", e);
            std::process::exit(1);
        }
    }
}
