//! The one first-class domain object: `Entry`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::kind::Category;

/// A single vault entry: one markdown file + its derived DB row + vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub kind: String,
    pub category: Category,
    pub title: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, Value>,
    pub source: String,
    pub identity_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Input to `write_entry` / `capture_and_index`.
#[derive(Debug, Clone, Default)]
pub struct CaptureInput {
    pub kind: String,
    pub body: String,
    pub title: Option<String>,
    pub meta: BTreeMap<String, Value>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub folder: Option<String>,
    pub identity_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A patch applied by `update_entry_file`. `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub title: Option<Option<String>>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<BTreeMap<String, Value>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

/// An `Entry` plus its fused retrieval score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: Entry,
    pub score: f64,
}

pub const DEFAULT_SOURCE: &str = "claude-code";
