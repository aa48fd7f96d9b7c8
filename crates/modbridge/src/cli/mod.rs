//! CLI subcommand implementations for the modbridge binary.

pub mod check_login_cmd;
pub mod classify_cmd;
pub mod review_cmd;
pub mod run_cmd;
pub mod stats_cmd;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the defaults.
pub fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "modbridge=debug"
    } else {
        "modbridge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: failed to encode output: {e}"),
    }
}
