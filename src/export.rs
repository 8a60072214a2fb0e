//! Export the chunk store as JSON.
//!
//! Produces one JSON document with every chunk record, boundary fields
//! spelled out, ordered by start key. Useful for diffing runs or feeding
//! the outline into other tools.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::models::{ItemKey, RecordStatus};
use crate::store;

#[derive(Serialize)]
struct ExportData {
    chunks: Vec<ExportChunk>,
}

#[derive(Serialize)]
struct ExportChunk {
    identity: String,
    start: ItemKey,
    end: ItemKey,
    status: RecordStatus,
    structured_text: String,
    display_text: String,
    created_at: String,
    updated_at: String,
}

/// Export all chunk records as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let chunks = store::load_chunks(&config.store.path).await?;

    let data = ExportData {
        chunks: chunks
            .sorted_by_start()
            .into_iter()
            .map(|r| ExportChunk {
                identity: r.identity.clone(),
                start: r.start.clone(),
                end: r.end.clone(),
                status: r.status,
                structured_text: r.structured_text.clone(),
                display_text: r.display_text.clone(),
                created_at: r.created_at.to_rfc3339(),
                updated_at: r.updated_at.to_rfc3339(),
            })
            .collect(),
    };
    let count = data.chunks.len();
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} chunks to {}", count, path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
