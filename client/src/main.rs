use std::path::PathBuf;

const USAGE: &str = "Usage: bizdesk [--config <path>] (--wizard-smoke | --list [page])";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // --config <path> or --config=<path>
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .or_else(|| {
            args.iter()
                .find_map(|a| a.strip_prefix("--config="))
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });

    // Deterministic wizard proof run against in-memory services.
    // Writes `wizard_smoke_transcript.log` under the log directory and exits 0/1.
    if args.iter().any(|a| a == "--wizard-smoke") {
        bizdesk_client::run_wizard_smoke(config_path.as_deref());
        return;
    }

    // --list [page] (page defaults to 1)
    if let Some(i) = args.iter().position(|a| a == "--list") {
        let page = match args.get(i + 1).filter(|v| !v.starts_with("--")) {
            None => 1,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(p) => p,
                Err(_) => {
                    eprintln!("bizdesk: page must be a positive number, got '{}'", raw);
                    std::process::exit(2);
                }
            },
        };
        bizdesk_client::run_list(config_path.as_deref(), page);
        return;
    }

    eprintln!("{}", USAGE);
    std::process::exit(2);
}
