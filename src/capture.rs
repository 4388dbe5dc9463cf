//! Capture: writes one markdown file with frontmatter to a deterministic
//! path, and the `capture_and_index` coordinator that writes the file, then
//! indexes it, rolling back the file on indexer failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::config::Config;
use crate::entry::{CaptureInput, Entry, EntryPatch, DEFAULT_SOURCE};
use crate::errors::{VaultError, VaultResult};
use crate::frontmatter::{format_frontmatter, join_title, parse_frontmatter, split_title, FrontMatter};
use crate::kind::{category_for_kind, is_valid_kind_format, normalize_kind, Category};
use crate::paths::nested_entry_path;
use crate::slug::slugify;

const MAX_BODY_BYTES: usize = 100 * 1024;
const MAX_TITLE_CHARS: usize = 500;
const MAX_KIND_CHARS: usize = 64;
const MAX_TAG_CHARS: usize = 100;
const MAX_TAG_COUNT: usize = 20;
const MAX_META_BYTES: usize = 10 * 1024;
const MAX_SOURCE_CHARS: usize = 200;
const MAX_IDENTITY_KEY_CHARS: usize = 200;

fn invalid(msg: impl Into<String>) -> VaultError {
    VaultError::InvalidInput(msg.into())
}

fn validate_input(input: &CaptureInput) -> VaultResult<()> {
    if input.kind.trim().is_empty() {
        return Err(invalid("kind must not be empty"));
    }
    if input.kind.len() > MAX_KIND_CHARS {
        return Err(invalid(format!("kind exceeds {MAX_KIND_CHARS} chars")));
    }
    if input.body.trim().is_empty() {
        return Err(invalid("body must not be empty"));
    }
    if input.body.len() > MAX_BODY_BYTES {
        return Err(invalid(format!("body exceeds {MAX_BODY_BYTES} bytes")));
    }
    if let Some(title) = &input.title {
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(invalid(format!("title exceeds {MAX_TITLE_CHARS} chars")));
        }
    }
    if input.tags.len() > MAX_TAG_COUNT {
        return Err(invalid(format!("tag count exceeds {MAX_TAG_COUNT}")));
    }
    for tag in &input.tags {
        if tag.chars().count() > MAX_TAG_CHARS {
            return Err(invalid(format!("tag '{tag}' exceeds {MAX_TAG_CHARS} chars")));
        }
    }
    if let Some(source) = &input.source {
        if source.chars().count() > MAX_SOURCE_CHARS {
            return Err(invalid(format!("source exceeds {MAX_SOURCE_CHARS} chars")));
        }
    }
    if let Some(identity_key) = &input.identity_key {
        if identity_key.chars().count() > MAX_IDENTITY_KEY_CHARS {
            return Err(invalid(format!(
                "identity_key exceeds {MAX_IDENTITY_KEY_CHARS} chars"
            )));
        }
    }
    let meta_json = serde_json::to_string(&input.meta)?;
    if meta_json.len() > MAX_META_BYTES {
        return Err(invalid(format!("meta exceeds {MAX_META_BYTES} bytes")));
    }
    Ok(())
}

async fn atomic_write(path: &Path, contents: &str) -> VaultResult<()> {
    let dir = path.parent().ok_or_else(|| invalid("path has no parent directory"))?;
    tokio::fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("entry")
    ));
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn render_entry_text(entry: &Entry) -> String {
    let extra = meta_to_scalar_extras(&entry.meta);
    let fm = FrontMatter {
        id: entry.id.clone(),
        tags: entry.tags.clone(),
        source: entry.source.clone(),
        created: entry.created_at,
        identity_key: entry.identity_key.clone(),
        expires_at: entry.expires_at,
        extra,
    };
    let body_with_heading = join_title(entry.title.as_deref(), &entry.body);
    format!("{}\n\n{}\n", format_frontmatter(&fm), body_with_heading)
}

fn meta_to_scalar_extras(meta: &BTreeMap<String, Value>) -> BTreeMap<String, crate::frontmatter::ScalarValue> {
    use crate::frontmatter::ScalarValue;
    let mut out = BTreeMap::new();
    for (key, value) in meta {
        if key == "folder" {
            continue; // derived from on-disk location, never persisted
        }
        let scalar = match value {
            Value::String(s) => Some(ScalarValue::Str(s.clone())),
            Value::Number(n) => n.as_f64().map(ScalarValue::Num),
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            _ => None, // nested objects/arrays are not a supported scalar shape
        };
        if let Some(scalar) = scalar {
            out.insert(key.clone(), scalar);
        }
    }
    out
}

/// Inverse of `meta_to_scalar_extras`: a frontmatter's flat scalar `extra`
/// fields, read back as `meta` values. Used by reindex, which only has the
/// parsed frontmatter to work with, not an in-memory `meta` map.
pub fn scalar_extras_to_meta(
    extra: &BTreeMap<String, crate::frontmatter::ScalarValue>,
) -> BTreeMap<String, Value> {
    use crate::frontmatter::ScalarValue;
    extra
        .iter()
        .map(|(key, value)| {
            let json = match value {
                ScalarValue::Str(s) => Value::String(s.clone()),
                ScalarValue::Num(n) => serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                ScalarValue::Bool(b) => Value::Bool(*b),
            };
            (key.clone(), json)
        })
        .collect()
}

/// Reads an existing file's frontmatter, if present and parseable. Returns
/// `None` when the file doesn't exist; propagates a `MalformedEntry` error
/// when it exists but fails to parse (callers decide whether that's fatal).
async fn read_existing(path: &Path) -> VaultResult<Option<(FrontMatter, Option<String>, String)>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let (fm, rest) = parse_frontmatter(&raw).map_err(|e| match e {
                VaultError::MalformedEntry { reason, .. } => VaultError::MalformedEntry {
                    path: path.display().to_string(),
                    reason,
                },
                other => other,
            })?;
            let (title, body) = split_title(&rest);
            Ok(Some((fm, title, body)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn unique_path_with_suffix(base: PathBuf, id_tail: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("entry")
        .to_string();
    let parent = base.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    parent.join(format!("{stem}-{id_tail}.md"))
}

/// `write_entry(cfg, input) -> Entry`
pub async fn write_entry(config: &Config, input: CaptureInput) -> VaultResult<Entry> {
    validate_input(&input)?;

    let kind = normalize_kind(&input.kind);
    if !is_valid_kind_format(&kind) {
        return Err(invalid(format!(
            "kind '{kind}' must match ^[a-z][a-z0-9_-]*$"
        )));
    }
    let category = category_for_kind(&kind);
    if matches!(category, Category::Entity) && input.identity_key.is_none() {
        return Err(VaultError::MissingIdentityKey(kind));
    }

    let source = input.source.clone().unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    if matches!(category, Category::Entity) {
        let identity_key = input.identity_key.clone().expect("checked above");
        let slug = slugify(&identity_key);
        let file_path = nested_entry_path(&config.vault_dir, &kind, input.folder.as_deref(), &slug)?;

        let existing = read_existing(&file_path).await?;
        let (id, created_at) = match &existing {
            Some((fm, _, _)) => (fm.id.clone(), fm.created),
            None => (crate::ids::new_id(), Utc::now()),
        };

        let mut entry = Entry {
            id,
            kind,
            category,
            title: input.title,
            body: input.body,
            tags: input.tags,
            meta: input.meta,
            source,
            identity_key: Some(identity_key),
            expires_at: input.expires_at,
            file_path: file_path.clone(),
            created_at,
        };
        inject_folder_meta(&mut entry, &config.vault_dir);

        let text = render_entry_text(&entry);
        atomic_write(&file_path, &text).await?;
        return Ok(entry);
    }

    // Non-entity kinds: always a fresh entry, never an upsert.
    let id = crate::ids::new_id();
    let created_at = Utc::now();
    let slug_source = input.title.as_deref().unwrap_or(&id);
    let mut slug = slugify(slug_source);
    if slug.is_empty() {
        slug = slugify(&id);
    }

    let mut file_path = nested_entry_path(&config.vault_dir, &kind, input.folder.as_deref(), &slug)?;
    if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
        let tail = id.chars().rev().take(6).collect::<String>();
        file_path = unique_path_with_suffix(file_path, &tail);
    }

    let mut entry = Entry {
        id,
        kind,
        category,
        title: input.title,
        body: input.body,
        tags: input.tags,
        meta: input.meta,
        source,
        identity_key: None,
        expires_at: input.expires_at,
        file_path: file_path.clone(),
        created_at,
    };
    inject_folder_meta(&mut entry, &config.vault_dir);

    let text = render_entry_text(&entry);
    atomic_write(&file_path, &text).await?;
    Ok(entry)
}

/// Mirrors reindex's own `folder` derivation (`entry_from_raw` in
/// `index.rs`, via `paths::folder_from_relative_path`) at capture time, so a
/// freshly captured entry's in-memory `meta` already carries the same
/// `folder` value a subsequent `reindex(full_sync)` would derive from the
/// file's on-disk location. Without this, the first reindex after every
/// capture with a `folder` would see a `meta` diff and report a spurious
/// `updated` count. `folder` is still never written into frontmatter itself
/// (see `meta_to_scalar_extras`) — only the in-memory/indexed `meta` gains it.
fn inject_folder_meta(entry: &mut Entry, vault_dir: &Path) {
    if let Ok(relative) = entry.file_path.strip_prefix(vault_dir) {
        if let Some(folder) = crate::paths::folder_from_relative_path(relative) {
            entry.meta.insert("folder".to_string(), Value::String(folder));
        }
    }
}

/// `capture_and_index` orchestrator. The indexer is called directly rather
/// than passed in as a callback: the source's one caller made the
/// indirection pointless, so this crate imports `crate::index::index_entry`
/// and calls it inline.
pub async fn capture_and_index(
    config: &Config,
    store: &crate::storage::VaultStore,
    embedder: &crate::embeddings::EmbeddingClient,
    input: CaptureInput,
) -> VaultResult<Entry> {
    let is_entity_upsert = matches!(category_for_kind(&normalize_kind(&input.kind)), Category::Entity)
        && input.identity_key.is_some();

    let prospective_path = if is_entity_upsert {
        let kind = normalize_kind(&input.kind);
        let identity_key = input.identity_key.clone().unwrap();
        let slug = slugify(&identity_key);
        Some(nested_entry_path(&config.vault_dir, &kind, input.folder.as_deref(), &slug)?)
    } else {
        None
    };

    let previous_contents = match &prospective_path {
        Some(path) => tokio::fs::read_to_string(path).await.ok(),
        None => None,
    };

    let entry = write_entry(config, input).await?;

    match crate::index::index_entry(store, embedder, &entry).await {
        Ok(()) => Ok(entry),
        Err(index_err) => {
            match previous_contents {
                Some(contents) => {
                    let _ = atomic_write(&entry.file_path, &contents).await;
                }
                None => {
                    let _ = tokio::fs::remove_file(&entry.file_path).await;
                }
            }
            Err(VaultError::CaptureRolledBack(Box::new(index_err)))
        }
    }
}

/// Merges `patch` into the on-disk frontmatter and body, preserving `id`,
/// `created_at`, and `identity_key`. The caller is responsible for
/// re-indexing the returned entry.
pub async fn update_entry_file(existing: &Entry, patch: EntryPatch) -> VaultResult<Entry> {
    let mut updated = existing.clone();
    if let Some(title) = patch.title {
        updated.title = title;
    }
    if let Some(body) = patch.body {
        updated.body = body;
    }
    if let Some(tags) = patch.tags {
        updated.tags = tags;
    }
    if let Some(meta) = patch.meta {
        updated.meta = meta;
    }
    if let Some(expires_at) = patch.expires_at {
        updated.expires_at = expires_at;
    }

    if updated.body.trim().is_empty() {
        return Err(invalid("body must not be empty"));
    }

    let text = render_entry_text(&updated);
    atomic_write(&updated.file_path, &text).await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> Config {
        Config::at_root(root).unwrap()
    }

    #[tokio::test]
    async fn write_entry_rejects_empty_body() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = CaptureInput {
            kind: "insight".to_string(),
            body: "   ".to_string(),
            ..Default::default()
        };
        let err = write_entry(&config, input).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn write_entry_rejects_kind_with_invalid_format() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = CaptureInput {
            kind: "Foo Bar!".to_string(),
            body: "body".to_string(),
            ..Default::default()
        };
        let err = write_entry(&config, input).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn write_entry_requires_identity_key_for_entities() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = CaptureInput {
            kind: "contact".to_string(),
            body: "email: ada@example".to_string(),
            ..Default::default()
        };
        let err = write_entry(&config, input).await.unwrap_err();
        assert!(matches!(err, VaultError::MissingIdentityKey(_)));
    }

    #[tokio::test]
    async fn entity_upsert_preserves_id_and_created_at() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let first = write_entry(
            &config,
            CaptureInput {
                kind: "contact".to_string(),
                body: "email: ada@example".to_string(),
                identity_key: Some("ada".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let second = write_entry(
            &config,
            CaptureInput {
                kind: "contact".to_string(),
                body: "title: countess".to_string(),
                identity_key: Some("ada".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.file_path, second.file_path);

        let contents = tokio::fs::read_to_string(&second.file_path).await.unwrap();
        assert!(contents.contains("title: countess"));
        assert!(!contents.contains("email: ada@example"));
    }

    #[tokio::test]
    async fn insight_save_writes_expected_path() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let entry = write_entry(
            &config,
            CaptureInput {
                kind: "insight".to_string(),
                title: Some("Hybrid search wins".to_string()),
                body: "FTS alone misses synonyms".to_string(),
                tags: vec!["search".to_string(), "ranking".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(entry
            .file_path
            .ends_with("knowledge/insights/hybrid-search-wins.md"));
    }
}
