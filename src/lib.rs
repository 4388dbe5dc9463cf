//! Context Vault: a persistent memory substrate for AI agents.
//!
//! Stores short, structured knowledge entries as markdown files on disk and
//! indexes them into a derived SQLite index with full-text and vector
//! search, so an agent can save, retrieve, list, update, and delete context
//! across otherwise stateless sessions. The vault files are the source of
//! truth; the database is a rebuildable derivative (see [`index::reindex`]).

pub mod capture;
pub mod config;
pub mod embeddings;
pub mod entry;
pub mod errors;
pub mod frontmatter;
pub mod ids;
pub mod index;
pub mod kind;
pub mod paths;
pub mod retrieve;
pub mod slug;
pub mod status;
pub mod storage;
pub mod vault;

pub use capture::{capture_and_index, update_entry_file, write_entry};
pub use config::{Config, ConfigOverrides};
pub use embeddings::{EmbeddingClient, EmbeddingSettings};
pub use entry::{CaptureInput, Entry, EntryPatch, ScoredEntry};
pub use errors::{VaultError, VaultResult};
pub use index::{delete_entry, index_entry, reindex, ReindexMode, ReindexStats};
pub use retrieve::{hybrid_search, list_entries, RetrieveFilters};
pub use status::{gather_vault_status, EmbeddingCoverage, VaultStatus};
pub use vault::Vault;

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
