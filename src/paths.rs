//! Safe path join and vault directory layout.

use std::path::{Path, PathBuf};

use crate::errors::{VaultError, VaultResult};
use crate::kind::{category_for_kind, kind_to_path};

/// Files reindex ignores regardless of directory.
const IGNORED_FILES: &[&str] = &["README.md", "context.md", "memory.md"];

/// Join `root` with `relative`, rejecting any result whose resolved absolute
/// form escapes `root`. `relative` may contain `..` components as long as the
/// final path still lives under `root`; this isn't textual rejection of `..`,
/// it's rejection of the resolved destination.
pub fn safe_join(root: &Path, relative: &Path) -> VaultResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(escape_err(relative));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(escape_err(relative));
            }
        }
    }
    if !resolved.starts_with(root) {
        return Err(escape_err(relative));
    }
    Ok(resolved)
}

fn escape_err(relative: &Path) -> VaultError {
    VaultError::PathEscape(relative.display().to_string())
}

/// Whether a directory name under the vault root is skipped by reindex.
pub fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('_') || name == "projects" || name == "_archive"
}

pub fn is_ignored_file(name: &str) -> bool {
    IGNORED_FILES.contains(&name)
}

/// Deterministic nested path for an entry: `<vault>/<category>/<kind-dir>/<slug>.md`.
pub fn nested_entry_path(vault_dir: &Path, kind: &str, folder: Option<&str>, slug: &str) -> VaultResult<PathBuf> {
    let (category_dir, kind_dir) = kind_to_path(kind);
    let mut rel = PathBuf::from(category_dir).join(kind_dir);
    if let Some(folder) = folder {
        if !folder.is_empty() {
            rel = rel.join(folder);
        }
    }
    rel = rel.join(format!("{slug}.md"));
    safe_join(vault_dir, &rel)
}

/// True if `dir_name` is one of the three canonical top-level category
/// directories for the nested layout.
pub fn is_category_dir(dir_name: &str) -> bool {
    matches!(dir_name, "knowledge" | "entities" | "events")
}

/// Best-effort classification of a walked file's kind, from either the
/// nested (`<vault>/<category>/<kind-dir>/file.md`) or flat
/// (`<vault>/<kind-dir>/file.md`) layout. Returns `None` when the path
/// doesn't fit either accepted shape.
pub fn kind_from_relative_path(relative: &Path) -> Option<String> {
    let mut components: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    components.pop(); // filename
    if components.is_empty() {
        return None;
    }
    if is_category_dir(components[0]) {
        components.remove(0);
    }
    let kind_dir = components.first()?;
    Some(crate::kind::dir_to_kind(kind_dir))
}

/// `folder` is everything between the kind directory and the filename.
pub fn folder_from_relative_path(relative: &Path) -> Option<String> {
    let mut components: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    components.pop(); // filename
    if components.is_empty() {
        return None;
    }
    if is_category_dir(components[0]) {
        components.remove(0);
    }
    if components.is_empty() {
        return None;
    }
    components.remove(0); // kind dir
    if components.is_empty() {
        None
    } else {
        Some(components.join("/"))
    }
}

/// Sanity check used only to decide what the category_for_kind fallback does
/// with a path; kept alongside the layout helpers since both concerns read
/// the same walked path shape.
pub fn category_dir_matches(category_dir: &str, kind: &str) -> bool {
    category_for_kind(kind).dir_name() == category_dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_accepts_plain_relative_paths() {
        let root = Path::new("/vault");
        let joined = safe_join(root, Path::new("knowledge/insights/x.md")).unwrap();
        assert_eq!(joined, PathBuf::from("/vault/knowledge/insights/x.md"));
    }

    #[test]
    fn safe_join_rejects_escaping_paths() {
        let root = Path::new("/vault");
        let err = safe_join(root, Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, VaultError::PathEscape(_)));
    }

    #[test]
    fn safe_join_rejects_absolute_relative_component() {
        let root = Path::new("/vault");
        let err = safe_join(root, Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, VaultError::PathEscape(_)));
    }

    #[test]
    fn nested_entry_path_matches_category_and_kind_dir() {
        let path = nested_entry_path(Path::new("/vault"), "insight", None, "hybrid-search-wins").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/vault/knowledge/insights/hybrid-search-wins.md")
        );
    }

    #[test]
    fn kind_from_relative_path_handles_nested_and_flat() {
        assert_eq!(
            kind_from_relative_path(Path::new("knowledge/insights/x.md")).as_deref(),
            Some("insight")
        );
        assert_eq!(
            kind_from_relative_path(Path::new("insights/x.md")).as_deref(),
            Some("insight")
        );
    }

    #[test]
    fn folder_from_relative_path_extracts_subdir() {
        assert_eq!(
            folder_from_relative_path(Path::new("knowledge/insights/2025/x.md")).as_deref(),
            Some("2025")
        );
        assert_eq!(
            folder_from_relative_path(Path::new("knowledge/insights/x.md")),
            None
        );
    }

    #[test]
    fn ignored_names() {
        assert!(is_ignored_file("README.md"));
        assert!(is_ignored_dir("_archive"));
        assert!(is_ignored_dir("projects"));
        assert!(!is_ignored_dir("insights"));
    }
}
