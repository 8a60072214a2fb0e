//! Highlight input loading and normalization.
//!
//! Reads the JSON export produced by the upstream fetcher and turns each
//! highlight row into an [`InputItem`]. Rows whose chapter or sequence key
//! cannot be parsed are excluded and counted; they are never folded into a
//! neighbouring chunk with a wrong boundary.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::models::{DocumentMeta, GroupKey, InputItem, SequenceKey};

/// A highlight row as exported upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHighlight {
    #[serde(default, alias = "chapterUid")]
    pub chapter_uid: Value,
    #[serde(default, alias = "chapterName")]
    pub chapter_name: Option<String>,
    #[serde(default, alias = "markText", alias = "text")]
    pub mark_text: String,
    #[serde(default, alias = "reviewContent", alias = "annotation")]
    pub review: Option<String>,
    #[serde(default, alias = "createTime")]
    pub create_time: Value,
    #[serde(default, alias = "noteId")]
    pub note_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "categories")]
    pub category: Option<String>,
    #[serde(default)]
    pub highlights: Vec<RawHighlight>,
}

/// Normalized input ready for planning.
#[derive(Debug, Clone, Default)]
pub struct InputDocument {
    pub meta: DocumentMeta,
    pub items: Vec<InputItem>,
    /// Rows excluded because their ordering keys could not be parsed.
    pub skipped: usize,
}

pub fn load_input(path: &Path) -> Result<InputDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let raw: RawInput = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))?;
    Ok(normalize(raw))
}

pub fn normalize(raw: RawInput) -> InputDocument {
    let mut items = Vec::with_capacity(raw.highlights.len());
    let mut skipped = 0usize;

    for (row, highlight) in raw.highlights.into_iter().enumerate() {
        match to_input_item(highlight) {
            Some(item) => items.push(item),
            None => {
                skipped += 1;
                debug!(row, "skipping highlight with unparseable ordering key");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, "excluded highlights with unparseable ordering keys");
    }

    items.sort_by(|a, b| a.order(b));

    InputDocument {
        meta: DocumentMeta {
            title: raw.title.filter(|t| !t.trim().is_empty()),
            category: raw.category.filter(|c| !c.trim().is_empty()),
        },
        items,
        skipped,
    }
}

fn to_input_item(raw: RawHighlight) -> Option<InputItem> {
    let group_key = parse_group_key(&raw.chapter_uid)?;

    // A stable note id wins over the creation time.
    let sequence_key = raw
        .note_id
        .as_deref()
        .and_then(SequenceKey::parse)
        .or_else(|| value_to_string(&raw.create_time).and_then(|s| SequenceKey::parse(&s)))?;

    Some(InputItem {
        group_key,
        sequence_key,
        group_title: raw.chapter_name.filter(|t| !t.trim().is_empty()),
        text: raw.mark_text.trim().to_string(),
        annotation: raw
            .review
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

fn parse_group_key(value: &Value) -> Option<GroupKey> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(rows: Value) -> InputDocument {
        let raw: RawInput = serde_json::from_value(json!({
            "title": "Money",
            "categories": "Economics",
            "highlights": rows,
        }))
        .unwrap();
        normalize(raw)
    }

    #[test]
    fn parses_numbers_and_numeric_strings() {
        let d = doc(json!([
            {"chapter_uid": 2, "mark_text": "b", "create_time": 20},
            {"chapterUid": "1", "markText": "a", "createTime": "10"},
        ]));
        assert_eq!(d.skipped, 0);
        assert_eq!(d.items.len(), 2);
        assert_eq!(d.items[0].group_key, 1);
        assert_eq!(d.items[0].sequence_key, SequenceKey::Numeric(10));
        assert_eq!(d.meta.category.as_deref(), Some("Economics"));
    }

    #[test]
    fn note_id_preferred_over_create_time() {
        let d = doc(json!([
            {"chapter_uid": 1, "mark_text": "a", "create_time": 10, "note_id": "1_5-9"},
        ]));
        assert_eq!(
            d.items[0].sequence_key,
            SequenceKey::Text("1_5-9".to_string())
        );
    }

    #[test]
    fn unparseable_keys_are_skipped_and_counted() {
        let d = doc(json!([
            {"chapter_uid": "intro", "mark_text": "a", "create_time": 1},
            {"chapter_uid": 1, "mark_text": "b"},
            {"chapter_uid": null, "mark_text": "c", "create_time": 2},
            {"chapter_uid": 1, "mark_text": "d", "create_time": 3},
        ]));
        assert_eq!(d.skipped, 3);
        assert_eq!(d.items.len(), 1);
        assert_eq!(d.items[0].text, "d");
    }

    #[test]
    fn items_are_sorted_by_group_then_sequence() {
        let d = doc(json!([
            {"chapter_uid": 2, "mark_text": "c", "create_time": 1},
            {"chapter_uid": 1, "mark_text": "b", "create_time": 9},
            {"chapter_uid": 1, "mark_text": "a", "create_time": 3},
        ]));
        let texts: Vec<&str> = d.items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_review_becomes_none() {
        let d = doc(json!([
            {"chapter_uid": 1, "mark_text": "a", "create_time": 1, "review": "  "},
        ]));
        assert!(d.items[0].annotation.is_none());
    }
}
