//! `mstore stats`: a quick summary of what is indexed.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::StoreStats;
use crate::store::Store;

/// Query the store and print a summary.
pub async fn run_stats(store: &dyn Store) -> Result<()> {
    let stats = store.stats().await?;
    print!("{}", render(&stats, Utc::now()));
    Ok(())
}

fn render(stats: &StoreStats, now: DateTime<Utc>) -> String {
    let last_update = match stats.last_update {
        Some(ts) => format_relative(ts, now),
        None => "never".to_string(),
    };
    let avg_words = stats
        .avg_chunk_words
        .map(|w| format!("{:.1}", w))
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    out.push_str("Memory Store Stats\n");
    out.push_str("==================\n\n");
    out.push_str(&format!("  Documents:    {}\n", stats.documents));
    out.push_str(&format!("  Chunks:       {}\n", stats.chunks));
    out.push_str(&format!("  Avg words:    {}\n", avg_words));
    out.push_str(&format!("  Last update:  {}\n", last_update));
    out
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
