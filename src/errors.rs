use thiserror::Error;

/// Closed error taxonomy for the vault core. Every fallible operation in this
/// crate returns one of these variants; nothing else escapes a public API.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("kind '{0}' is an entity kind and requires an identity_key")]
    MissingIdentityKey(String),

    #[error("path escapes vault root: {0}")]
    PathEscape(String),

    #[error("malformed entry at {path}: {reason}")]
    MalformedEntry { path: String, reason: String },

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture rolled back: {0}")]
    CaptureRolledBack(Box<VaultError>),

    #[error("reindex failed: {0}")]
    ReindexFailed(Box<VaultError>),

    #[error("invalid row id: {0}")]
    InvalidRowId(String),

    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("missing data directory")]
    MissingDataDir,

    #[error("embedding error: {0}")]
    Embedding(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::InvalidInput(format!("invalid JSON: {err}"))
    }
}

/// FTS5 syntax errors on a user query are swallowed by the retrieve path
/// (malformed but survivable queries still return vector results).
pub(crate) fn is_fts_syntax_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("fts5: syntax error") || msg.contains("malformed match")
        }
        _ => false,
    }
}

/// "vector table missing" on a fresh vault is the other class the retrieve
/// path swallows.
pub(crate) fn is_missing_vector_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("no such table: vault_vec") || msg.contains("no such module: vec0")
        }
        _ => false,
    }
}
