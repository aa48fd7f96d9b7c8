//! Run the automod classifier on a piece of text.

use anyhow::Result;
use modbridge::automod;

pub async fn run(text: &str, json: bool) -> Result<()> {
    let categories = automod::classify(text);

    if json {
        super::print_json(&serde_json::json!({
            "spam": !categories.is_empty(),
            "categories": categories,
        }));
    } else if categories.is_empty() {
        println!("  clean");
    } else {
        println!("  flagged: {}", automod::join_categories(&categories));
    }
    Ok(())
}
