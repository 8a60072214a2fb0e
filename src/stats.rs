//! Store statistics and health overview.
//!
//! Summarizes what the chunk and explanation stores hold: record counts,
//! failure placeholders waiting for a rerun, and when each chunk was last
//! touched. Used by `marg status`.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::RecordStatus;
use crate::store;

/// Run the status command: load both stores and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let chunks = store::load_chunks(&config.store.path).await?;
    let explanations_path = config.store.explanations_path();
    let explanations = store::load_explanations(&explanations_path).await?;

    let last_update = chunks.iter().map(|r| r.updated_at).max();
    let failed_explanations = explanations
        .values()
        .filter(|r| r.status == RecordStatus::Failed)
        .count();

    println!("Marginalia — Store Status");
    println!("=========================");
    println!();
    println!("  Chunk store:   {}", config.store.path.display());
    println!("  Size:          {}", format_bytes(file_size(&config.store.path)));
    println!("  Chunks:        {}", chunks.len());
    println!("  Failed:        {}", chunks.failed_count());
    println!(
        "  Last update:   {}",
        last_update
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Explanations:  {}", explanations_path.display());
    println!("  Entries:       {}", explanations.len());
    println!("  Failed:        {}", failed_explanations);

    if !chunks.is_empty() {
        println!();
        println!("  By chunk:");
        println!("  {:>4}  {:<40} {:<10} {}", "#", "IDENTITY", "STATUS", "UPDATED");
        println!("  {}", "-".repeat(72));
        for (idx, record) in chunks.sorted_by_start().iter().enumerate() {
            println!(
                "  {:>4}  {:<40} {:<10} {}",
                idx + 1,
                record.identity,
                record.status.as_str(),
                format_relative(record.updated_at)
            );
        }
    }

    println!();
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    format_relative_to(ts, Utc::now())
}

fn format_relative_to(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_iso(ts);
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
        format_iso(ts)
    }
}

fn format_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_relative_to(now, now), "just now");
        assert_eq!(format_relative_to(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative_to(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_relative_to(now - Duration::days(2), now), "2 days ago");
        assert_eq!(
            format_relative_to(now - Duration::days(90), now),
            "2023-12-02 12:00"
        );
    }
}
