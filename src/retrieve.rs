//! Retrieve: hybrid ranked search over the index. Read-only — never writes
//! to the base table, FTS projection, or vector table.
//!
//! Fuses an FTS5 pass and a vector (`vault_vec`) pass, then applies a
//! category-aware recency decay. Grounded on the teacher's
//! `engine::search::{bm25_search, dense_search, rrf_fuse, hydrate_summaries}`
//! pipeline shape, adapted from reciprocal-rank fusion to the weighted-sum
//! fusion spec.md §4.4 calls for (`0.4 * fts + 0.6 * vector`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::embeddings::EmbeddingClient;
use crate::entry::{Entry, ScoredEntry};
use crate::errors::{is_fts_syntax_error, is_missing_vector_table_error, VaultResult};
use crate::kind::{normalize_kind, Category};
use crate::storage::VaultStore;

const FTS_WEIGHT: f64 = 0.4;
const VECTOR_WEIGHT: f64 = 0.6;
const FTS_LIMIT: i64 = 15;
const DEFAULT_DECAY_DAYS: f64 = 30.0;
const TAG_OVERFETCH_FACTOR: i64 = 10;

/// FTS5 metacharacters stripped from each query term before building the
/// `MATCH` expression, per spec.md §4.4's query-parsing rule.
const FTS_METACHARS: &[char] = &['*', '"', '(', ')', '-', ':', '^', '~', '{', '}'];

#[derive(Debug, Clone, Default)]
pub struct RetrieveFilters {
    pub kind: Option<String>,
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
    pub decay_days: f64,
}

impl RetrieveFilters {
    pub fn with_limit(limit: usize) -> Self {
        RetrieveFilters {
            limit,
            decay_days: DEFAULT_DECAY_DAYS,
            ..Default::default()
        }
    }
}

impl Default for RetrieveFilters {
    fn default() -> Self {
        RetrieveFilters {
            kind: None,
            category: None,
            tags: Vec::new(),
            since: None,
            until: None,
            limit: 10,
            offset: 0,
            decay_days: DEFAULT_DECAY_DAYS,
        }
    }
}

/// Builds the FTS5 `MATCH` expression from a raw query: split on whitespace,
/// strip metacharacters from each term, drop empties, AND the rest together.
/// Returns `None` when every term is empty (skip the FTS pass entirely).
fn build_fts_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .split_whitespace()
        .map(|term| term.chars().filter(|c| !FTS_METACHARS.contains(c)).collect::<String>())
        .filter(|term| !term.is_empty())
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

struct RawRow {
    id: String,
    kind: String,
    category: String,
    title: Option<String>,
    body: String,
    tags_json: String,
    meta_json: String,
    source: String,
    identity_key: Option<String>,
    expires_at: Option<String>,
    file_path: String,
    created_at: String,
}

fn row_to_entry(row: RawRow) -> VaultResult<Entry> {
    let category = match row.category.as_str() {
        "entity" => Category::Entity,
        "event" => Category::Event,
        _ => Category::Knowledge,
    };
    let tags: Vec<String> = serde_json::from_str(&row.tags_json)?;
    let meta: BTreeMap<String, Value> = serde_json::from_str(&row.meta_json)?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let expires_at = row
        .expires_at
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Ok(Entry {
        id: row.id,
        kind: row.kind,
        category,
        title: row.title,
        body: row.body,
        tags,
        meta,
        source: row.source,
        identity_key: row.identity_key,
        expires_at,
        file_path: row.file_path.into(),
        created_at,
    })
}

fn is_expired(entry: &Entry, now: DateTime<Utc>) -> bool {
    matches!(entry.expires_at, Some(t) if now >= t)
}

async fn fetch_rows_by_rowid(pool: &SqlitePool, rowids: &[i64]) -> VaultResult<BTreeMap<i64, Entry>> {
    if rowids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let placeholders = rowids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT rowid, id, kind, category, title, body, tags, meta, source, identity_key, expires_at, file_path, created_at
         FROM vault WHERE rowid IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (i64, String, String, String, Option<String>, String, String, String, String, Option<String>, Option<String>, String, String)>(&sql);
    for rowid in rowids {
        query = query.bind(rowid);
    }
    let rows = query.fetch_all(pool).await?;
    let mut out = BTreeMap::new();
    for (rowid, id, kind, category, title, body, tags_json, meta_json, source, identity_key, expires_at, file_path, created_at) in rows {
        let entry = row_to_entry(RawRow {
            id,
            kind,
            category,
            title,
            body,
            tags_json,
            meta_json,
            source,
            identity_key,
            expires_at,
            file_path,
            created_at,
        })?;
        out.insert(rowid, entry);
    }
    Ok(out)
}

fn passes_filters(entry: &Entry, filters: &RetrieveFilters, now: DateTime<Utc>) -> bool {
    if is_expired(entry, now) {
        return false;
    }
    if let Some(kind) = &filters.kind {
        if &entry.kind != kind {
            return false;
        }
    }
    if let Some(category) = filters.category {
        if entry.category.as_str() != category.as_str() {
            return false;
        }
    }
    if let Some(since) = filters.since {
        if entry.created_at < since {
            return false;
        }
    }
    if let Some(until) = filters.until {
        if entry.created_at > until {
            return false;
        }
    }
    true
}

async fn fts_pass(
    pool: &SqlitePool,
    normalized_query: &str,
    filters: &RetrieveFilters,
    now: DateTime<Utc>,
    min_candidates: i64,
) -> VaultResult<BTreeMap<i64, f64>> {
    let Some(match_expr) = build_fts_query(normalized_query) else {
        return Ok(BTreeMap::new());
    };

    let mut sql = String::from(
        "SELECT vault.rowid, bm25(vault_fts) as rank
         FROM vault_fts JOIN vault ON vault.rowid = vault_fts.rowid
         WHERE vault_fts MATCH ? AND (vault.expires_at IS NULL OR vault.expires_at > ?)",
    );
    if filters.kind.is_some() {
        sql.push_str(" AND vault.kind = ?");
    }
    if filters.category.is_some() {
        sql.push_str(" AND vault.category = ?");
    }
    if filters.since.is_some() {
        sql.push_str(" AND vault.created_at >= ?");
    }
    if filters.until.is_some() {
        sql.push_str(" AND vault.created_at <= ?");
    }
    sql.push_str(" ORDER BY rank LIMIT ?");

    let mut query = sqlx::query_as::<_, (i64, f64)>(&sql)
        .bind(&match_expr)
        .bind(now.to_rfc3339());
    if let Some(kind) = &filters.kind {
        query = query.bind(kind);
    }
    if let Some(category) = filters.category {
        query = query.bind(category.as_str());
    }
    if let Some(since) = filters.since {
        query = query.bind(since.to_rfc3339());
    }
    if let Some(until) = filters.until {
        query = query.bind(until.to_rfc3339());
    }
    // Raised above FTS_LIMIT when a tag filter is in play, so the
    // candidate pool fed into the later in-memory tag filter is large
    // enough that `TAG_OVERFETCH_FACTOR` isn't truncating a pool that was
    // already too small to begin with (spec.md §4.4/§8's tag-filter
    // invariant — see scenario §8.4).
    query = query.bind(FTS_LIMIT.max(min_candidates));

    let rows = match query.fetch_all(pool).await {
        Ok(rows) => rows,
        Err(e) if is_fts_syntax_error(&e) => {
            return Ok(BTreeMap::new());
        }
        Err(e) => {
            return Err(e.into());
        }
    };

    let max_rank = rows
        .iter()
        .map(|(_, rank)| rank.abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    Ok(rows
        .into_iter()
        .map(|(rowid, rank)| (rowid, (rank.abs() / max_rank) * FTS_WEIGHT))
        .collect())
}

async fn vector_pass(
    pool: &SqlitePool,
    embedder: &EmbeddingClient,
    raw_query: &str,
    filters: &RetrieveFilters,
    min_candidates: i64,
) -> VaultResult<BTreeMap<i64, f64>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vault_vec")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    if count == 0 {
        return Ok(BTreeMap::new());
    }

    // Same widening as `fts_pass`: a tag filter needs a bigger candidate
    // pool than the plain kind-scoped default before fusion/tag-filtering.
    let base_vec_limit: i64 = if filters.kind.is_some() { 30 } else { 15 };
    let vec_limit = base_vec_limit.max(min_candidates);

    let embeddings = embedder.embed_batch(&[raw_query.to_string()]).await?;
    let Some(query_vector) = embeddings.into_iter().next() else {
        return Ok(BTreeMap::new());
    };
    let payload = serde_json::to_string(&query_vector)?;

    let sql = "SELECT rowid, distance FROM vault_vec WHERE embedding MATCH ? AND k = ? ORDER BY distance ASC";
    let result = sqlx::query_as::<_, (i64, f64)>(sql)
        .bind(&payload)
        .bind(vec_limit)
        .fetch_all(pool)
        .await;

    let rows = match result {
        Ok(rows) => rows,
        Err(e) if is_missing_vector_table_error(&e) => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(rows
        .into_iter()
        .map(|(rowid, distance)| {
            let similarity = (1.0 - distance / 2.0).max(0.0);
            (rowid, similarity * VECTOR_WEIGHT)
        })
        .collect())
}

fn recency_decay(entry: &Entry, decay_days: f64, now: DateTime<Utc>) -> f64 {
    match entry.category {
        Category::Knowledge | Category::Entity => 1.0,
        Category::Event => {
            let age_days = (now - entry.created_at).num_seconds() as f64 / 86_400.0;
            1.0 / (1.0 + age_days.max(0.0) / decay_days.max(1.0))
        }
    }
}

/// `hybrid_search(query, filters) -> [ScoredEntry]`. See spec.md §4.4.
pub async fn hybrid_search(
    store: &VaultStore,
    embedder: &EmbeddingClient,
    query: &str,
    mut filters: RetrieveFilters,
) -> VaultResult<Vec<ScoredEntry>> {
    let pool = store.pool();
    let now = Utc::now();
    if let Some(kind) = &filters.kind {
        filters.kind = Some(normalize_kind(kind));
    }

    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let has_tag_filter = !filters.tags.is_empty();
    let overfetch_limit = if has_tag_filter {
        (filters.limit.max(1) * TAG_OVERFETCH_FACTOR as usize) + filters.offset
    } else {
        filters.limit + filters.offset
    };
    // Zero when there's no tag filter, so both passes fall back to their
    // plain defaults (FTS_LIMIT / base_vec_limit) exactly as before.
    let candidate_floor: i64 = if has_tag_filter { overfetch_limit as i64 } else { 0 };

    let fts_scores = fts_pass(pool, query, &filters, now, candidate_floor).await?;
    let vector_scores = vector_pass(pool, embedder, query, &filters, candidate_floor).await?;

    let mut fused: BTreeMap<i64, f64> = BTreeMap::new();
    for (rowid, score) in &fts_scores {
        *fused.entry(*rowid).or_insert(0.0) += score;
    }
    for (rowid, score) in &vector_scores {
        *fused.entry(*rowid).or_insert(0.0) += score;
    }

    if fused.is_empty() {
        return Ok(Vec::new());
    }

    let rowids: Vec<i64> = fused.keys().copied().collect();
    let entries = fetch_rows_by_rowid(pool, &rowids).await?;

    let mut scored: Vec<ScoredEntry> = fused
        .into_iter()
        .filter_map(|(rowid, base_score)| {
            let entry = entries.get(&rowid)?.clone();
            if !passes_filters(&entry, &filters, now) {
                return None;
            }
            let decay = recency_decay(&entry, filters.decay_days, now);
            Some(ScoredEntry {
                entry,
                score: base_score * decay,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(overfetch_limit);

    if has_tag_filter {
        let tag_set: std::collections::HashSet<&str> = filters.tags.iter().map(String::as_str).collect();
        scored.retain(|scored_entry| {
            scored_entry
                .entry
                .tags
                .iter()
                .any(|tag| tag_set.contains(tag.as_str()))
        });
    }

    let result = scored
        .into_iter()
        .skip(filters.offset)
        .take(filters.limit)
        .collect();
    Ok(result)
}

/// `list_context`: unscored listing by category/kind/tags, newest first.
/// Does not run FTS or vector passes.
pub async fn list_entries(
    store: &VaultStore,
    filters: RetrieveFilters,
) -> VaultResult<Vec<Entry>> {
    let pool = store.pool();
    let now = Utc::now();

    let has_tag_filter = !filters.tags.is_empty();
    let fetch_limit = if has_tag_filter {
        (filters.limit.max(1) * TAG_OVERFETCH_FACTOR as usize) + filters.offset
    } else {
        filters.limit + filters.offset
    };

    let mut sql = String::from(
        "SELECT id, kind, category, title, body, tags, meta, source, identity_key, expires_at, file_path, created_at
         FROM vault WHERE (expires_at IS NULL OR expires_at > ?)",
    );
    if filters.kind.is_some() {
        sql.push_str(" AND kind = ?");
    }
    if filters.category.is_some() {
        sql.push_str(" AND category = ?");
    }
    if filters.since.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if filters.until.is_some() {
        sql.push_str(" AND created_at <= ?");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, (String, String, String, Option<String>, String, String, String, String, Option<String>, Option<String>, String, String)>(&sql)
        .bind(now.to_rfc3339());
    if let Some(kind) = &filters.kind {
        query = query.bind(normalize_kind(kind));
    }
    if let Some(category) = filters.category {
        query = query.bind(category.as_str());
    }
    if let Some(since) = filters.since {
        query = query.bind(since.to_rfc3339());
    }
    if let Some(until) = filters.until {
        query = query.bind(until.to_rfc3339());
    }
    query = query.bind(fetch_limit as i64);

    let rows = query.fetch_all(pool).await?;
    let mut entries = Vec::with_capacity(rows.len());
    for (id, kind, category, title, body, tags_json, meta_json, source, identity_key, expires_at, file_path, created_at) in rows {
        entries.push(row_to_entry(RawRow {
            id,
            kind,
            category,
            title,
            body,
            tags_json,
            meta_json,
            source,
            identity_key,
            expires_at,
            file_path,
            created_at,
        })?);
    }

    if has_tag_filter {
        let tag_set: std::collections::HashSet<&str> = filters.tags.iter().map(String::as_str).collect();
        entries.retain(|entry| entry.tags.iter().any(|tag| tag_set.contains(tag.as_str())));
    }

    Ok(entries.into_iter().skip(filters.offset).take(filters.limit).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fts_query_strips_metacharacters() {
        assert_eq!(
            build_fts_query("synonym ranking").as_deref(),
            Some("\"synonym\" AND \"ranking\"")
        );
        assert_eq!(build_fts_query("***---"), None);
        assert_eq!(build_fts_query(""), None);
    }

    #[test]
    fn recency_decay_is_enduring_for_knowledge_and_entity() {
        let now = Utc::now();
        let mut entry = sample_entry(now);
        entry.category = Category::Knowledge;
        assert_eq!(recency_decay(&entry, 30.0, now), 1.0);
        entry.category = Category::Entity;
        assert_eq!(recency_decay(&entry, 30.0, now), 1.0);
    }

    #[test]
    fn recency_decay_shrinks_events_with_age() {
        let now = Utc::now();
        let mut entry = sample_entry(now);
        entry.category = Category::Event;
        entry.created_at = now - chrono::Duration::days(30);
        let decayed = recency_decay(&entry, 30.0, now);
        assert!((decayed - 0.5).abs() < 1e-9);
    }

    fn sample_entry(now: DateTime<Utc>) -> Entry {
        Entry {
            id: "01HX000000000000000000000".to_string(),
            kind: "insight".to_string(),
            category: Category::Knowledge,
            title: None,
            body: "x".to_string(),
            tags: vec![],
            meta: BTreeMap::new(),
            source: "claude-code".to_string(),
            identity_key: None,
            expires_at: None,
            file_path: "/vault/x.md".into(),
            created_at: now,
        }
    }
}
