//! Database schema and connection pool.
//!
//! A single relational store: the `vault` base table, an FTS5 projection
//! kept in sync by triggers, and a `vec0` vector table keyed by the base
//! table's rowid. `user_version` is used as the schema version; if the
//! stored version is positive but below `CURRENT_SCHEMA_VERSION`, the caller
//! (see `Vault::open` in `src/vault.rs`) wipes the DB file and WAL/SHM
//! siblings and rebuilds from the markdown vault via reindex.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::VaultResult;

pub const CURRENT_SCHEMA_VERSION: i64 = 5;
pub const EMBEDDING_DIM: usize = 384;

static VEC_EXTENSION_INIT: OnceLock<()> = OnceLock::new();

fn init_sqlite_vec_once() {
    VEC_EXTENSION_INIT.get_or_init(|| {
        unsafe {
            type SqliteVecInitFn = unsafe extern "C" fn(
                *mut libsqlite3_sys::sqlite3,
                *mut *mut i8,
                *const libsqlite3_sys::sqlite3_api_routines,
            ) -> i32;
            libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                SqliteVecInitFn,
            >(
                sqlite_vec::sqlite3_vec_init as *const ()
            )));
        }
    });
}

#[derive(Clone)]
pub struct VaultStore {
    pool: SqlitePool,
}

/// Outcome of opening the store: whether schema bookkeeping determined the
/// on-disk index needs a full rebuild from the vault files.
pub struct OpenResult {
    pub store: VaultStore,
    pub needs_rebuild: bool,
}

impl VaultStore {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn open(db_path: &Path) -> VaultResult<OpenResult> {
        init_sqlite_vec_once();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA cache_size = -64000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        let stored_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;

        let needs_rebuild = stored_version > 0 && stored_version < CURRENT_SCHEMA_VERSION;

        if stored_version == 0 {
            run_schema(&pool).await?;
            ensure_vec_table(&pool, EMBEDDING_DIM).await?;
            sqlx::query(&format!("PRAGMA user_version = {CURRENT_SCHEMA_VERSION}"))
                .execute(&pool)
                .await?;
            info!("initialized fresh vault index at {}", db_path.display());
        } else if !needs_rebuild {
            run_schema(&pool).await?;
            ensure_vec_table(&pool, EMBEDDING_DIM).await?;
        }

        Ok(OpenResult {
            store: VaultStore { pool },
            needs_rebuild,
        })
    }

    /// Delete the DB file and any WAL/SHM siblings. Used when schema
    /// bookkeeping detects a version too old to migrate in place.
    pub fn wipe_files(db_path: &Path) -> VaultResult<()> {
        for suffix in ["", "-wal", "-shm"] {
            let candidate = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if candidate.exists() {
                std::fs::remove_file(&candidate)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn db_file_size(&self, db_path: &Path) -> u64 {
        tokio::fs::metadata(db_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

async fn run_schema(pool: &SqlitePool) -> VaultResult<()> {
    for statement in SCHEMA_SQL.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}

/// Dynamically sized `vec0` virtual table; dimension is fixed at 384 for
/// this crate but is looked up from `vault_meta` the way the teacher's
/// `ensure_vec_table` re-derives it, so an embedding-dim change is detected
/// rather than silently corrupting the index.
pub async fn ensure_vec_table(pool: &SqlitePool, dim: usize) -> VaultResult<()> {
    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM vault_meta WHERE key = 'embedding_dim'")
        .fetch_optional(pool)
        .await?;

    match stored {
        Some(value) => {
            let stored_dim: usize = value.parse().unwrap_or(dim);
            if stored_dim != dim {
                debug!(stored_dim, dim, "embedding dimension changed; vault_vec will be recreated");
                sqlx::query("DROP TABLE IF EXISTS vault_vec").execute(pool).await?;
                sqlx::query(&format!(
                    "CREATE VIRTUAL TABLE vault_vec USING vec0(embedding float[{dim}])"
                ))
                .execute(pool)
                .await?;
                sqlx::query("INSERT INTO vault_meta(key, value) VALUES ('embedding_dim', ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
                    .bind(dim.to_string())
                    .execute(pool)
                    .await?;
            }
        }
        None => {
            sqlx::query(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vault_vec USING vec0(embedding float[{dim}])"
            ))
            .execute(pool)
            .await?;
            sqlx::query("INSERT INTO vault_meta(key, value) VALUES ('embedding_dim', ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
                .bind(dim.to_string())
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS vault_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vault (
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT,
    body TEXT NOT NULL,
    tags TEXT NOT NULL,
    meta TEXT NOT NULL,
    source TEXT NOT NULL,
    identity_key TEXT,
    expires_at TEXT,
    file_path TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS vault_file_path_idx ON vault(file_path);
CREATE UNIQUE INDEX IF NOT EXISTS vault_id_idx ON vault(id);
CREATE INDEX IF NOT EXISTS vault_kind_idx ON vault(kind);
CREATE INDEX IF NOT EXISTS vault_category_idx ON vault(category);
CREATE INDEX IF NOT EXISTS vault_category_created_idx ON vault(category, created_at DESC);
CREATE UNIQUE INDEX IF NOT EXISTS vault_identity_idx ON vault(kind, identity_key) WHERE identity_key IS NOT NULL;

CREATE VIRTUAL TABLE IF NOT EXISTS vault_fts USING fts5(
    title, body, tags, kind,
    content='vault',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS vault_ai AFTER INSERT ON vault BEGIN
  INSERT INTO vault_fts(rowid, title, body, tags, kind)
  VALUES (new.rowid, new.title, new.body, new.tags, new.kind);
END;

CREATE TRIGGER IF NOT EXISTS vault_ad AFTER DELETE ON vault BEGIN
  INSERT INTO vault_fts(vault_fts, rowid, title, body, tags, kind)
  VALUES ('delete', old.rowid, old.title, old.body, old.tags, old.kind);
END;

CREATE TRIGGER IF NOT EXISTS vault_au AFTER UPDATE ON vault BEGIN
  INSERT INTO vault_fts(vault_fts, rowid, title, body, tags, kind)
  VALUES ('delete', old.rowid, old.title, old.body, old.tags, old.kind);
  INSERT INTO vault_fts(rowid, title, body, tags, kind)
  VALUES (new.rowid, new.title, new.body, new.tags, new.kind);
END;
"#;
