// Copyright 2026 Modbridge Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use modbridge::ledger::ModAction;
use modbridge::platform::Platform;

mod cli;

#[derive(Parser)]
#[command(
    name = "modbridge",
    about = "Modbridge: wiki and forum moderation queues, reviewed in Discord",
    version,
    after_help = "Configuration is read from the environment and from a .env file.\nRun 'modbridge <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,
    /// Move an automod-flagged wiki request to the manual review channel
    Review {
        /// Account request id (acrid)
        acrid: u64,
        /// Name recorded as the reviewer (defaults to the bot account)
        #[arg(long)]
        by: Option<String>,
    },
    /// Show how automod fared on already resolved requests
    Stats {
        /// Which decisions to evaluate
        #[arg(long, value_enum, default_value = "denied")]
        action: StatsAction,
    },
    /// Classify a piece of text with the automod rules
    Classify {
        /// Text to classify
        text: String,
    },
    /// Log in to a platform and report whether the session is valid
    CheckLogin {
        /// Platform to check (wiki or forum)
        platform: Platform,
        /// Discard any stored session first
        #[arg(long)]
        fresh: bool,
        /// Also enter the forum administration panel
        #[arg(long)]
        admin: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsAction {
    Approved,
    Denied,
}

impl From<StatsAction> for ModAction {
    fn from(action: StatsAction) -> Self {
        match action {
            StatsAction::Approved => ModAction::Approved,
            StatsAction::Denied => ModAction::Denied,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose, cli.json_logs);

    let result = match cli.command {
        Commands::Run => cli::run_cmd::run().await,
        Commands::Review { acrid, by } => cli::review_cmd::run(acrid, by.as_deref(), cli.json).await,
        Commands::Stats { action } => cli::stats_cmd::run(action.into(), cli.json).await,
        Commands::Classify { text } => cli::classify_cmd::run(&text, cli.json).await,
        Commands::CheckLogin {
            platform,
            fresh,
            admin,
        } => cli::check_login_cmd::run(platform, fresh, admin).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "modbridge", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = &result {
        if cli.json {
            cli::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
