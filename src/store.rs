//! Persisted chunk and explanation stores.
//!
//! Both stores live in their own SQLite file and are handled wholesale: the
//! whole table is read at the start of a run and the whole table is written
//! back at the end of a successful one.
//!
//! # Atomicity
//!
//! [`save_chunks`] writes into a sibling `*.tmp` file inside a single
//! transaction, closes the connection and only then renames the file over
//! the target. A reader either sees the previous store or the new one, never
//! a half-written table. An interrupted run leaves the last-good file alone.
//!
//! # Cold start vs. corruption
//!
//! A missing file is a normal cold start and loads as an empty store. A file
//! that exists but cannot be read is an error: treating it as empty would
//! silently regenerate everything.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::db;
use crate::migrate;
use crate::models::{
    ChunkIdentity, ChunkRecord, ExplanationRecord, ItemKey, RecordStatus, SequenceKey,
};

/// All persisted chunk records, keyed and iterated by typed identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    records: BTreeMap<ChunkIdentity, ChunkRecord>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ChunkRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or overwrite the record stored under its identity.
    pub fn insert(&mut self, record: ChunkRecord) -> Option<ChunkRecord> {
        self.records.insert(record.chunk_identity(), record)
    }

    pub fn get(&self, identity: &ChunkIdentity) -> Option<&ChunkRecord> {
        self.records.get(identity)
    }

    pub fn contains(&self, identity: &ChunkIdentity) -> bool {
        self.records.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in store-iteration order: ascending `(start, end)`.
    pub fn iter(&self) -> btree_map::Values<'_, ChunkIdentity, ChunkRecord> {
        self.records.values()
    }

    pub fn failed_count(&self) -> usize {
        self.iter().filter(|r| r.is_failed()).count()
    }

    /// Records sorted by `(start_group_key, start_sequence_key)`, then end.
    pub fn sorted_by_start(&self) -> Vec<&ChunkRecord> {
        self.iter().collect()
    }
}

/// Load the chunk store at `path`. A missing file yields an empty store.
pub async fn load_chunks(path: &Path) -> Result<ChunkStore> {
    if !path.exists() {
        debug!(path = %path.display(), "no chunk store yet; cold start");
        return Ok(ChunkStore::new());
    }

    let records = read_chunk_rows(path)
        .await
        .with_context(|| format!("Chunk store is unreadable: {}", path.display()))?;
    Ok(ChunkStore::from_records(records))
}

async fn read_chunk_rows(path: &Path) -> Result<Vec<ChunkRecord>> {
    let pool = db::open_existing(path).await?;
    let rows = sqlx::query(
        "SELECT identity, start_group_key, start_sequence_key, end_group_key, end_sequence_key, \
         structured_text, display_text, status, created_at, updated_at \
         FROM chunk_records ORDER BY start_group_key, start_sequence_key",
    )
    .fetch_all(&pool)
    .await;
    pool.close().await;

    rows?.iter().map(chunk_from_row).collect()
}

fn chunk_from_row(row: &SqliteRow) -> Result<ChunkRecord> {
    let identity: String = row.try_get("identity")?;
    Ok(ChunkRecord {
        start: item_key(row, "start_group_key", "start_sequence_key")?,
        end: item_key(row, "end_group_key", "end_sequence_key")?,
        structured_text: row.try_get("structured_text")?,
        display_text: row.try_get("display_text")?,
        status: status(row)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
        identity,
    })
}

/// Replace the chunk store at `path` with `store`, atomically.
pub async fn save_chunks(path: &Path, store: &ChunkStore) -> Result<()> {
    let tmp = temp_path(path);
    let pool = db::create_fresh(&tmp)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;

    let written = write_chunk_rows(&pool, store).await;
    pool.close().await;
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.context(format!("Failed to write chunk store {}", path.display())));
    }

    commit_file(&tmp, path)?;
    debug!(path = %path.display(), records = store.len(), "chunk store saved");
    Ok(())
}

async fn write_chunk_rows(pool: &SqlitePool, store: &ChunkStore) -> Result<()> {
    migrate::create_chunk_tables(pool).await?;

    let mut tx = pool.begin().await?;
    for record in store.sorted_by_start() {
        sqlx::query(
            r#"
            INSERT INTO chunk_records (identity, start_group_key, start_sequence_key, end_group_key,
                end_sequence_key, structured_text, display_text, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.identity)
        .bind(record.start.group_key)
        .bind(record.start.sequence_key.to_string())
        .bind(record.end.group_key)
        .bind(record.end.sequence_key.to_string())
        .bind(&record.structured_text)
        .bind(&record.display_text)
        .bind(record.status.as_str())
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Explanations keyed by item key string.
pub type ExplanationStore = BTreeMap<String, ExplanationRecord>;

pub async fn load_explanations(path: &Path) -> Result<ExplanationStore> {
    if !path.exists() {
        return Ok(ExplanationStore::new());
    }

    let records = read_explanation_rows(path)
        .await
        .with_context(|| format!("Explanation store is unreadable: {}", path.display()))?;
    Ok(records.into_iter().map(|r| (r.item_key(), r)).collect())
}

async fn read_explanation_rows(path: &Path) -> Result<Vec<ExplanationRecord>> {
    let pool = db::open_existing(path).await?;
    let rows = sqlx::query(
        "SELECT group_key, sequence_key, text, explanation, status, created_at, updated_at \
         FROM explanations ORDER BY item_key",
    )
    .fetch_all(&pool)
    .await;
    pool.close().await;

    rows?
        .iter()
        .map(|row| {
            Ok(ExplanationRecord {
                key: item_key(row, "group_key", "sequence_key")?,
                text: row.try_get("text")?,
                explanation: row.try_get("explanation")?,
                status: status(row)?,
                created_at: timestamp(row, "created_at")?,
                updated_at: timestamp(row, "updated_at")?,
            })
        })
        .collect()
}

pub async fn save_explanations(path: &Path, store: &ExplanationStore) -> Result<()> {
    let tmp = temp_path(path);
    let pool = db::create_fresh(&tmp)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;

    let written = write_explanation_rows(&pool, store).await;
    pool.close().await;
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.context(format!("Failed to write explanation store {}", path.display())));
    }

    commit_file(&tmp, path)
}

async fn write_explanation_rows(pool: &SqlitePool, store: &ExplanationStore) -> Result<()> {
    migrate::create_explanation_tables(pool).await?;

    let mut tx = pool.begin().await?;
    for record in store.values() {
        sqlx::query(
            r#"
            INSERT INTO explanations (item_key, group_key, sequence_key, text, explanation,
                status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.item_key())
        .bind(record.key.group_key)
        .bind(record.key.sequence_key.to_string())
        .bind(&record.text)
        .bind(&record.explanation)
        .bind(record.status.as_str())
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn commit_file(tmp: &Path, path: &Path) -> Result<()> {
    std::fs::rename(tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))
}

fn item_key(row: &SqliteRow, group_col: &str, sequence_col: &str) -> Result<ItemKey> {
    let group_key: i64 = row.try_get(group_col)?;
    let raw: String = row.try_get(sequence_col)?;
    let sequence_key =
        SequenceKey::parse(&raw).ok_or_else(|| anyhow!("empty {} in stored row", sequence_col))?;
    Ok(ItemKey::new(group_key, sequence_key))
}

fn status(row: &SqliteRow) -> Result<RecordStatus> {
    let raw: String = row.try_get("status")?;
    RecordStatus::parse(&raw).ok_or_else(|| anyhow!("unknown record status '{}'", raw))
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("{} out of range: {}", column, millis))
}
