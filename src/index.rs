//! Index: owns the database schema operations — single-entry upsert,
//! bulk reindex from the vault directory, and delete.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::Sqlite;
use tracing::warn;
use walkdir::WalkDir;

use crate::capture::scalar_extras_to_meta;
use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::entry::Entry;
use crate::errors::{VaultError, VaultResult};
use crate::frontmatter::{parse_frontmatter, split_title};
use crate::kind::{category_for_kind, Category};
use crate::paths::{folder_from_relative_path, is_ignored_dir, is_ignored_file, kind_from_relative_path};
use crate::storage::VaultStore;

const EMBED_BATCH_SIZE: usize = 32;

/// Idempotent upsert of a single entry into the index: base row, FTS
/// projection (via trigger), and vector.
///
/// The embedding is computed *before* any DB mutation and the row
/// upsert + vector write happen inside one transaction, so a failure at any
/// point (most commonly: the embedding server is unreachable) leaves the
/// index exactly as it was before the call — satisfying §5's linearizability
/// requirement that `capture_and_index` either sees everything or nothing
/// land. This single-row case doesn't need the two-transaction split
/// `reindex` uses for batched embeddings (see that function's doc comment);
/// one row's embedding is cheap enough to await before opening the only
/// transaction this function needs.
pub async fn index_entry(store: &VaultStore, embedder: &EmbeddingClient, entry: &Entry) -> VaultResult<()> {
    let pool = store.pool();
    let tags_json = serde_json::to_string(&entry.tags)?;
    let meta_json = serde_json::to_string(&entry.meta)?;
    let expires_at = entry.expires_at.map(|t| t.to_rfc3339());
    let file_path = entry.file_path.to_string_lossy().to_string();
    let created_at = entry.created_at.to_rfc3339();

    let embed_text = format!("{} {}", entry.title.clone().unwrap_or_default(), entry.body);
    let vectors = embedder.embed_batch(&[embed_text]).await?;
    let vector_json = match vectors.into_iter().next() {
        Some(vector) => Some(serde_json::to_string(&vector)?),
        None => None,
    };

    let mut tx = pool.begin().await?;

    let mut updated_by_identity = false;
    if matches!(entry.category, Category::Entity) {
        if let Some(identity_key) = &entry.identity_key {
            let result = sqlx::query(
                "UPDATE vault SET id=?, title=?, body=?, tags=?, meta=?, source=?, expires_at=?, file_path=?, created_at=?
                 WHERE kind=? AND identity_key=?",
            )
            .bind(&entry.id)
            .bind(&entry.title)
            .bind(&entry.body)
            .bind(&tags_json)
            .bind(&meta_json)
            .bind(&entry.source)
            .bind(&expires_at)
            .bind(&file_path)
            .bind(&created_at)
            .bind(&entry.kind)
            .bind(identity_key)
            .execute(&mut *tx)
            .await?;
            updated_by_identity = result.rows_affected() > 0;
        }
    }

    if !updated_by_identity {
        let insert_result = sqlx::query(
            "INSERT INTO vault (id, kind, category, title, body, tags, meta, source, identity_key, expires_at, file_path, created_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&entry.id)
        .bind(&entry.kind)
        .bind(entry.category.as_str())
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(&tags_json)
        .bind(&meta_json)
        .bind(&entry.source)
        .bind(&entry.identity_key)
        .bind(&expires_at)
        .bind(&file_path)
        .bind(&created_at)
        .execute(&mut *tx)
        .await;

        match insert_result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.kind() == ErrorKind::UniqueViolation => {
                sqlx::query(
                    "UPDATE vault SET id=?, kind=?, category=?, title=?, body=?, tags=?, meta=?, source=?, identity_key=?, expires_at=?, created_at=?
                     WHERE file_path=?",
                )
                .bind(&entry.id)
                .bind(&entry.kind)
                .bind(entry.category.as_str())
                .bind(&entry.title)
                .bind(&entry.body)
                .bind(&tags_json)
                .bind(&meta_json)
                .bind(&entry.source)
                .bind(&entry.identity_key)
                .bind(&expires_at)
                .bind(&created_at)
                .bind(&file_path)
                .execute(&mut *tx)
                .await?;
            }
            Err(other) => return Err(other.into()),
        }
    }

    let row_number: i64 = sqlx::query_scalar("SELECT rowid FROM vault WHERE file_path = ?")
        .bind(&file_path)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM vault_vec WHERE rowid = ?")
        .bind(row_number)
        .execute(&mut *tx)
        .await?;

    if let Some(json) = vector_json {
        sqlx::query("INSERT INTO vault_vec(rowid, embedding) VALUES (?, ?)")
            .bind(row_number)
            .bind(json)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// `delete_entry(id)`: delete vector, delete base row, unlink file.
pub async fn delete_entry(store: &VaultStore, id: &str) -> VaultResult<()> {
    let pool = store.pool();
    let row: Option<(i64, String)> = sqlx::query_as("SELECT rowid, file_path FROM vault WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some((row_number, file_path)) = row else {
        return Err(VaultError::NotFound(id.to_string()));
    };

    sqlx::query("DELETE FROM vault_vec WHERE rowid = ?")
        .bind(row_number)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM vault WHERE rowid = ?")
        .bind(row_number)
        .execute(pool)
        .await?;

    match tokio::fs::remove_file(&file_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReindexMode {
    #[default]
    FullSync,
    AddOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

struct WalkedFile {
    file_path: std::path::PathBuf,
    entry: Entry,
}

fn entry_from_raw(vault_dir: &Path, full_path: &Path, relative: &Path, raw: &str) -> VaultResult<Option<Entry>> {
    let Some(kind) = kind_from_relative_path(relative) else {
        return Ok(None);
    };
    let folder = folder_from_relative_path(relative);

    let (fm, rest) = parse_frontmatter(raw).map_err(|e| match e {
        VaultError::MalformedEntry { reason, .. } => VaultError::MalformedEntry {
            path: full_path.display().to_string(),
            reason,
        },
        other => other,
    })?;
    let (title, body) = split_title(&rest);

    let mut meta: BTreeMap<String, Value> = scalar_extras_to_meta(&fm.extra);
    if let Some(folder) = &folder {
        meta.insert("folder".to_string(), Value::String(folder.clone()));
    }

    let category = category_for_kind(&kind);
    let _ = vault_dir;
    Ok(Some(Entry {
        id: fm.id,
        kind,
        category,
        title,
        body,
        tags: fm.tags,
        meta,
        source: fm.source,
        identity_key: fm.identity_key,
        expires_at: fm.expires_at,
        file_path: full_path.to_path_buf(),
        created_at: fm.created,
    }))
}

fn walk_vault(vault_dir: &Path) -> Vec<WalkedFile> {
    let mut out = Vec::new();
    for dir_entry in WalkDir::new(vault_dir).into_iter().filter_map(|e| e.ok()) {
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let full_path = dir_entry.path();
        let Some(file_name) = full_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if full_path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if is_ignored_file(file_name) {
            continue;
        }
        let Ok(relative) = full_path.strip_prefix(vault_dir) else {
            continue;
        };
        let ignored = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .any(is_ignored_dir);
        if ignored {
            continue;
        }

        let raw = match std::fs::read_to_string(full_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %full_path.display(), error = %e, "failed to read vault file during reindex");
                continue;
            }
        };

        match entry_from_raw(vault_dir, full_path, relative, &raw) {
            Ok(Some(entry)) => out.push(WalkedFile {
                file_path: full_path.to_path_buf(),
                entry,
            }),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %full_path.display(), error = %e, "skipping malformed entry during reindex");
            }
        }
    }
    out
}

/// Bulk synchronization from the vault directory into the index. See
/// spec.md §4.3: inserts/updates/removals happen inside a single write
/// transaction; embeddings are computed outside it and written in a short
/// second transaction, to avoid holding a transaction open across an await
/// that may suspend for a meaningful amount of wall time.
pub async fn reindex(
    config: &Config,
    store: &VaultStore,
    embedder: &EmbeddingClient,
    mode: ReindexMode,
) -> VaultResult<ReindexStats> {
    if !config.vault_dir.exists() {
        return Ok(ReindexStats::default());
    }

    let walked = walk_vault(&config.vault_dir);
    let pool = store.pool();

    let mut stats = ReindexStats::default();
    let mut pending_embeds: Vec<(i64, String)> = Vec::new();
    let mut walked_paths: HashSet<String> = HashSet::new();

    let mut tx = pool.begin().await?;

    for walked_file in &walked {
        let file_path = walked_file.file_path.to_string_lossy().to_string();
        walked_paths.insert(file_path.clone());
        let entry = &walked_file.entry;

        let existing: Option<(i64, Option<String>, String, String, String)> = sqlx::query_as(
            "SELECT rowid, title, body, tags, meta FROM vault WHERE file_path = ?",
        )
        .bind(&file_path)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            None => {
                let tags_json = serde_json::to_string(&entry.tags)?;
                let meta_json = serde_json::to_string(&entry.meta)?;
                let expires_at = entry.expires_at.map(|t| t.to_rfc3339());
                let created_at = entry.created_at.to_rfc3339();

                // OR IGNORE tolerates copy-pasted frontmatter carrying a
                // duplicate `id`: the second file is skipped rather than
                // aborting the whole reindex transaction (spec.md §4.3).
                let insert_result = sqlx::query(
                    "INSERT OR IGNORE INTO vault (id, kind, category, title, body, tags, meta, source, identity_key, expires_at, file_path, created_at)
                     VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(&entry.id)
                .bind(&entry.kind)
                .bind(entry.category.as_str())
                .bind(&entry.title)
                .bind(&entry.body)
                .bind(&tags_json)
                .bind(&meta_json)
                .bind(&entry.source)
                .bind(&entry.identity_key)
                .bind(&expires_at)
                .bind(&file_path)
                .bind(&created_at)
                .execute(&mut *tx)
                .await?;

                if insert_result.rows_affected() == 0 {
                    warn!(path = %file_path, id = %entry.id, "skipping file with duplicate id during reindex");
                    stats.unchanged += 1;
                    continue;
                }

                let row_number: i64 = sqlx::query_scalar("SELECT rowid FROM vault WHERE file_path = ?")
                    .bind(&file_path)
                    .fetch_one(&mut *tx)
                    .await?;
                pending_embeds.push((row_number, format!("{} {}", entry.title.clone().unwrap_or_default(), entry.body)));
                stats.added += 1;
            }
            Some((row_number, old_title, old_body, old_tags_json, old_meta_json)) => {
                if mode == ReindexMode::AddOnly {
                    stats.unchanged += 1;
                    continue;
                }

                let new_tags_json = serde_json::to_string(&entry.tags)?;
                let new_meta_json = serde_json::to_string(&entry.meta)?;
                let title_or_body_changed = old_title != entry.title || old_body != entry.body;
                let changed = title_or_body_changed || old_tags_json != new_tags_json || old_meta_json != new_meta_json;

                if changed {
                    let expires_at = entry.expires_at.map(|t| t.to_rfc3339());
                    sqlx::query(
                        "UPDATE vault SET id=?, kind=?, category=?, title=?, body=?, tags=?, meta=?, source=?, identity_key=?, expires_at=?
                         WHERE rowid=?",
                    )
                    .bind(&entry.id)
                    .bind(&entry.kind)
                    .bind(entry.category.as_str())
                    .bind(&entry.title)
                    .bind(&entry.body)
                    .bind(&new_tags_json)
                    .bind(&new_meta_json)
                    .bind(&entry.source)
                    .bind(&entry.identity_key)
                    .bind(&expires_at)
                    .bind(row_number)
                    .execute(&mut *tx)
                    .await?;
                    stats.updated += 1;

                    if title_or_body_changed {
                        pending_embeds.push((row_number, format!("{} {}", entry.title.clone().unwrap_or_default(), entry.body)));
                    }
                } else {
                    stats.unchanged += 1;
                }
            }
        }
    }

    if mode == ReindexMode::FullSync {
        let all_rows: Vec<(i64, String)> = sqlx::query_as("SELECT rowid, file_path FROM vault")
            .fetch_all(&mut *tx)
            .await?;
        for (row_number, file_path) in all_rows {
            if !walked_paths.contains(&file_path) {
                sqlx::query("DELETE FROM vault_vec WHERE rowid = ?")
                    .bind(row_number)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM vault WHERE rowid = ?")
                    .bind(row_number)
                    .execute(&mut *tx)
                    .await?;
                stats.removed += 1;
            }
        }
    }

    tx.commit().await.map_err(|e| VaultError::ReindexFailed(Box::new(e.into())))?;

    if !pending_embeds.is_empty() {
        write_vectors(pool, embedder, &pending_embeds)
            .await
            .map_err(|e| VaultError::ReindexFailed(Box::new(e)))?;
    }

    Ok(stats)
}

async fn write_vectors(
    pool: &sqlx::SqlitePool,
    embedder: &EmbeddingClient,
    pending: &[(i64, String)],
) -> VaultResult<()> {
    for batch in pending.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        let mut tx: sqlx::Transaction<'_, Sqlite> = pool.begin().await?;
        for ((row_number, _), vector) in batch.iter().zip(vectors.into_iter()) {
            let json = serde_json::to_string(&vector)?;
            sqlx::query("DELETE FROM vault_vec WHERE rowid = ?")
                .bind(row_number)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO vault_vec(rowid, embedding) VALUES (?, ?)")
                .bind(row_number)
                .bind(json)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
    }
    Ok(())
}
