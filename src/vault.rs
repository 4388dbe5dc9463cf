//! Public operation surface: `save_context`, `get_context`, `list_context`,
//! `delete_context`, `context_status`. A thin facade over capture/index/
//! retrieve/status, the way `KnowledgeEngine` fronts the teacher's
//! `engine::{save, get, search}` modules with one struct owning the pool,
//! embedder, and settings.

use crate::capture::capture_and_index;
use crate::config::{Config, ConfigOverrides};
use crate::embeddings::{EmbeddingClient, EmbeddingSettings};
use crate::entry::{CaptureInput, Entry, ScoredEntry};
use crate::errors::VaultResult;
use crate::index::{delete_entry, reindex, ReindexMode, ReindexStats};
use crate::retrieve::{hybrid_search, list_entries, RetrieveFilters};
use crate::status::{gather_vault_status, VaultStatus};
use crate::storage::VaultStore;

/// Owns the DB pool, embedding client, and resolved configuration. Cheap to
/// clone (the pool and embedder are both internally `Arc`-backed).
#[derive(Clone)]
pub struct Vault {
    config: Config,
    embedder: EmbeddingClient,
    store: VaultStore,
}

impl Vault {
    /// Open a vault, resolving configuration from the given overrides and
    /// environment variables. If the on-disk schema version is stale, wipes
    /// the DB and rebuilds it from the markdown files via `full_sync`
    /// reindex before returning.
    pub async fn open(overrides: ConfigOverrides, embedding: EmbeddingSettings) -> VaultResult<Self> {
        let config = Config::resolve(overrides)?;
        std::fs::create_dir_all(&config.vault_dir)?;
        Self::open_with_config(config, embedding).await
    }

    pub async fn open_with_config(config: Config, embedding: EmbeddingSettings) -> VaultResult<Self> {
        let mut open_result = VaultStore::open(&config.db_path).await?;
        let embedder = EmbeddingClient::new(&embedding);

        if open_result.needs_rebuild {
            tracing::warn!(
                path = %config.db_path.display(),
                "vault index schema is stale; rebuilding from vault files"
            );
            open_result.store.close().await;
            VaultStore::wipe_files(&config.db_path)?;
            open_result = VaultStore::open(&config.db_path).await?;
            reindex(&config, &open_result.store, &embedder, ReindexMode::FullSync).await?;
        }

        Ok(Vault {
            config,
            embedder,
            store: open_result.store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    /// `save_context`: capture a new entry (or upsert an entity) and index it
    /// transactionally, rolling back the file write on indexer failure.
    pub async fn save_context(&self, input: CaptureInput) -> VaultResult<Entry> {
        capture_and_index(&self.config, &self.store, &self.embedder, input).await
    }

    /// `get_context`: ranked hybrid search.
    pub async fn get_context(&self, query: &str, filters: RetrieveFilters) -> VaultResult<Vec<ScoredEntry>> {
        hybrid_search(&self.store, &self.embedder, query, filters).await
    }

    /// `list_context`: unscored listing with category/kind/tag filters.
    pub async fn list_context(&self, filters: RetrieveFilters) -> VaultResult<Vec<Entry>> {
        list_entries(&self.store, filters).await
    }

    /// `delete_context`: remove the vector, the base row, and unlink the file.
    pub async fn delete_context(&self, id: &str) -> VaultResult<()> {
        delete_entry(&self.store, id).await
    }

    /// `context_status`: vault/index health report.
    pub async fn context_status(&self) -> VaultResult<VaultStatus> {
        gather_vault_status(&self.config, &self.store).await
    }

    /// Bulk resynchronization of the index from the vault directory.
    pub async fn reindex(&self, mode: ReindexMode) -> VaultResult<ReindexStats> {
        reindex(&self.config, &self.store, &self.embedder, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_vault(root: &std::path::Path) -> Vault {
        let config = Config::at_root(root).unwrap();
        std::fs::create_dir_all(&config.vault_dir).unwrap();
        Vault::open_with_config(config, EmbeddingSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delete_context_surfaces_not_found() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path()).await;
        let err = vault.delete_context("nonexistent").await.unwrap_err();
        assert!(matches!(err, crate::errors::VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn reindex_on_missing_vault_dir_returns_zero_stats() {
        let dir = tempdir().unwrap();
        let config = Config::at_root(dir.path()).unwrap();
        // Don't create the vault dir.
        let open = VaultStore::open(&config.db_path).await.unwrap();
        let embedder = EmbeddingClient::new(&EmbeddingSettings::default());
        let stats = reindex(&config, &open.store, &embedder, ReindexMode::FullSync)
            .await
            .unwrap();
        assert_eq!(stats, ReindexStats::default());
    }
}
