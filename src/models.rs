//! Core data models used throughout Marginalia.
//!
//! These types represent the highlights, planned chunks, and persisted chunk
//! records that flow through the outline pipeline. Chunk boundaries are always
//! carried as typed fields; the composite identity string is a label only and
//! is never split back into its parts.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Chapter ordinal. Highlights are grouped and ordered by this key first.
pub type GroupKey = i64;

/// Secondary ordering key of a highlight, unique within its group.
///
/// Integer-looking raw values (creation timestamps) compare numerically,
/// anything else (stable note ids) lexicographically. Numeric keys sort
/// before textual ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum SequenceKey {
    Numeric(i64),
    Text(String),
}

impl SequenceKey {
    /// Parse a raw sequence value. Returns `None` for empty input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Some(SequenceKey::Numeric(n)),
            Err(_) => Some(SequenceKey::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKey::Numeric(n) => write!(f, "{}", n),
            SequenceKey::Text(s) => f.write_str(s),
        }
    }
}

/// Position of a single highlight: `(group_key, sequence_key)`.
///
/// Used both for chunk boundaries and as the StartKey that detects chunks
/// which grew or shrank from a fixed starting point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ItemKey {
    pub group_key: GroupKey,
    pub sequence_key: SequenceKey,
}

impl ItemKey {
    pub fn new(group_key: GroupKey, sequence_key: SequenceKey) -> Self {
        Self {
            group_key,
            sequence_key,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.group_key, self.sequence_key)
    }
}

/// The leading half of a [`ChunkIdentity`].
pub type StartKey = ItemKey;

/// One highlight after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct InputItem {
    pub group_key: GroupKey,
    pub sequence_key: SequenceKey,
    /// Chapter name, kept for prompt context and section headers.
    pub group_title: Option<String>,
    pub text: String,
    pub annotation: Option<String>,
}

impl InputItem {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.group_key, self.sequence_key.clone())
    }

    /// Only items with highlighted text count towards a chunk's size.
    pub fn is_qualifying(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Total order over items: `(group_key, sequence_key)` ascending.
    pub fn order(&self, other: &Self) -> Ordering {
        self.group_key
            .cmp(&other.group_key)
            .then_with(|| self.sequence_key.cmp(&other.sequence_key))
    }
}

/// Book-level metadata carried alongside the highlights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub category: Option<String>,
}

/// The four-field boundary tuple naming a chunk's position and extent.
///
/// Two identities are equal only when all four fields are. The string form
/// from [`ChunkIdentity::key`] can collide because sequence keys may contain
/// `-`, so it is never used for matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkIdentity {
    pub start: ItemKey,
    pub end: ItemKey,
}

impl ChunkIdentity {
    pub fn new(start: ItemKey, end: ItemKey) -> Self {
        Self { start, end }
    }

    /// Human-debuggable store key: `"{sg}-{ss}-{eg}-{es}"`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }

    pub fn start_key(&self) -> &StartKey {
        &self.start
    }
}

impl fmt::Display for ChunkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A contiguous run of input items planned as one unit of generation work.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub identity: ChunkIdentity,
    /// 1-based position in the planned sequence.
    pub ordinal: usize,
    /// Full ordered slice, including non-qualifying items.
    pub members: Vec<InputItem>,
}

impl ChunkPlan {
    pub fn key(&self) -> String {
        self.identity.key()
    }

    /// Key a generation job is filed under, unique within one plan.
    pub fn job_key(&self) -> String {
        format!("#{} {}", self.ordinal, self.key())
    }

    pub fn start_key(&self) -> &StartKey {
        self.identity.start_key()
    }

    pub fn qualifying_count(&self) -> usize {
        self.members.iter().filter(|i| i.is_qualifying()).count()
    }

    /// Distinct group keys in member order.
    pub fn group_keys(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = Vec::new();
        for item in &self.members {
            if keys.last() != Some(&item.group_key) {
                keys.push(item.group_key);
            }
        }
        keys
    }

    /// Chapter titles in member order, falling back to `Group {key}`.
    pub fn group_titles(&self) -> Vec<String> {
        self.group_keys()
            .into_iter()
            .map(|key| {
                self.members
                    .iter()
                    .filter(|i| i.group_key == key)
                    .find_map(|i| i.group_title.clone().filter(|t| !t.trim().is_empty()))
                    .unwrap_or_else(|| format!("Group {}", key))
            })
            .collect()
    }
}

/// Whether a stored record holds generated content or a failure placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Generated,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Generated => "generated",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "generated" => Some(RecordStatus::Generated),
            "failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

/// A persisted chunk result.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Display label, see [`ChunkIdentity::key`]. Never parsed or matched on.
    pub identity: String,
    pub start: ItemKey,
    pub end: ItemKey,
    /// Lightly structured form (Markdown).
    pub structured_text: String,
    /// Display markup form (HTML).
    pub display_text: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn start_key(&self) -> &StartKey {
        &self.start
    }

    pub fn chunk_identity(&self) -> ChunkIdentity {
        ChunkIdentity::new(self.start.clone(), self.end.clone())
    }

    pub fn is_failed(&self) -> bool {
        self.status == RecordStatus::Failed
    }
}

/// A persisted per-highlight explanation produced by the batch path.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationRecord {
    pub key: ItemKey,
    pub text: String,
    pub explanation: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExplanationRecord {
    /// Display key, `"{group}-{sequence}"`. Never parsed.
    pub fn item_key(&self) -> String {
        self.key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_key_parse() {
        assert_eq!(SequenceKey::parse("42"), Some(SequenceKey::Numeric(42)));
        assert_eq!(
            SequenceKey::parse(" 3_17-22 "),
            Some(SequenceKey::Text("3_17-22".to_string()))
        );
        assert_eq!(SequenceKey::parse("   "), None);
    }

    #[test]
    fn numeric_keys_compare_numerically() {
        let a = SequenceKey::parse("9").unwrap();
        let b = SequenceKey::parse("10").unwrap();
        assert!(a < b);
        assert!(b < SequenceKey::parse("a").unwrap());
    }

    #[test]
    fn identity_key_format() {
        let id = ChunkIdentity::new(
            ItemKey::new(1, SequenceKey::Text("n-1".into())),
            ItemKey::new(2, SequenceKey::Numeric(7)),
        );
        assert_eq!(id.key(), "1-n-1-2-7");
    }

    #[test]
    fn group_titles_fall_back() {
        let item = |g: i64, title: Option<&str>| InputItem {
            group_key: g,
            sequence_key: SequenceKey::Numeric(g),
            group_title: title.map(str::to_string),
            text: "x".into(),
            annotation: None,
        };
        let plan = ChunkPlan {
            identity: ChunkIdentity::new(item(1, None).key(), item(2, None).key()),
            ordinal: 1,
            members: vec![item(1, Some("Intro")), item(2, None)],
        };
        assert_eq!(plan.group_titles(), vec!["Intro", "Group 2"]);
        assert_eq!(plan.group_keys(), vec![1, 2]);
    }
}
