//! Configuration collaborator. Resolution order is external to the core in
//! spirit — each field still follows the same override-chain pattern the
//! rest of the crate expects: explicit constructor value, then environment
//! variable, then a platform data directory.

use std::path::{Path, PathBuf};

use crate::errors::{VaultError, VaultResult};

/// Resolved configuration the vault core operates against. `last_override_source`
/// records the last resolution step that set *any* field (not per-field
/// provenance — see DESIGN.md's Open Question decision).
#[derive(Debug, Clone)]
pub struct Config {
    pub vault_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub last_override_source: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub vault_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

const VAULT_DIR_ENV: &str = "CONTEXT_VAULT_VAULT_DIR";
const DATA_DIR_ENV: &str = "CONTEXT_VAULT_DATA_DIR";

impl Config {
    pub fn resolve(overrides: ConfigOverrides) -> VaultResult<Config> {
        let mut last_override_source = "default".to_string();

        let vault_dir = if let Some(dir) = overrides.vault_dir {
            last_override_source = "explicit:vault_dir".to_string();
            dir
        } else if let Ok(dir) = std::env::var(VAULT_DIR_ENV) {
            last_override_source = format!("env:{VAULT_DIR_ENV}");
            PathBuf::from(dir)
        } else {
            default_data_root()?.join("vault")
        };

        let data_dir = if let Some(dir) = overrides.data_dir {
            last_override_source = "explicit:data_dir".to_string();
            dir
        } else if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            last_override_source = format!("env:{DATA_DIR_ENV}");
            PathBuf::from(dir)
        } else {
            default_data_root()?
        };

        let db_path = if let Some(path) = overrides.db_path {
            last_override_source = "explicit:db_path".to_string();
            path
        } else {
            data_dir.join("index.sqlite3")
        };

        Ok(Config {
            vault_dir,
            data_dir,
            db_path,
            last_override_source,
        })
    }

    /// Convenience constructor rooted at an arbitrary directory (tests, or
    /// an embedding application that wants everything under one root).
    pub fn at_root(root: impl AsRef<Path>) -> VaultResult<Config> {
        let root = root.as_ref();
        Ok(Config {
            vault_dir: root.join("vault"),
            data_dir: root.join("data"),
            db_path: root.join("data").join("index.sqlite3"),
            last_override_source: "explicit:root".to_string(),
        })
    }
}

fn default_data_root() -> VaultResult<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("context-vault"))
        .ok_or(VaultError::MissingDataDir)
}
