//! Automod statistics over resolved requests.

use anyhow::{Context, Result};
use modbridge::config::{data_dir_from_env, LEDGER_FILE};
use modbridge::ledger::{Ledger, ModAction};
use modbridge::stats::AutomodStats;

pub async fn run(action: ModAction, json: bool) -> Result<()> {
    let path = data_dir_from_env().join(LEDGER_FILE);
    let ledger =
        Ledger::open(&path).with_context(|| format!("failed to open ledger {}", path.display()))?;
    let stats = AutomodStats::collect(&ledger, action)?;

    if json {
        super::print_json(&serde_json::json!({
            "stats": stats,
            "catch_rate": stats.catch_rate(),
        }));
    } else {
        println!("{}", stats.render());
    }
    Ok(())
}
