//! Kind normalization and kind → category / kind ↔ directory mapping.
//!
//! Mirrors the shape of a stable kind classifier (canonical names, an
//! explicit static category table, lossy normalization that never errors)
//! rather than deriving category from string parsing ad hoc at call sites.

/// One of the three retrieval-relevant buckets a kind resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Knowledge,
    Entity,
    Event,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Knowledge => "knowledge",
            Category::Entity => "entity",
            Category::Event => "event",
        }
    }

    /// The on-disk top-level directory name for the nested layout, which
    /// differs from `as_str()` for entity/event (pluralized).
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Knowledge => "knowledge",
            Category::Entity => "entities",
            Category::Event => "events",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Category> {
        match value {
            "knowledge" => Some(Category::Knowledge),
            "entity" | "entities" => Some(Category::Entity),
            "event" | "events" => Some(Category::Event),
            _ => None,
        }
    }
}

const KNOWLEDGE_KINDS: &[&str] = &[
    "insight", "decision", "pattern", "prompt", "note", "document", "reference",
];
const ENTITY_KINDS: &[&str] = &["contact", "project", "tool", "source"];
const EVENT_KINDS: &[&str] = &["conversation", "message", "session", "task", "log"];

fn is_known_kind(kind: &str) -> bool {
    KNOWLEDGE_KINDS.contains(&kind) || ENTITY_KINDS.contains(&kind) || EVENT_KINDS.contains(&kind)
}

/// Normalize a raw kind string: lowercase/trim, then fold known plural forms
/// to their singular (`insights` → `insight`). Must be applied at exactly one
/// point on both the save and search paths so stored and queried kinds agree.
/// Unknown kinds pass through lowercased/trimmed, unchanged otherwise.
pub fn normalize_kind(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if is_known_kind(&lowered) {
        return lowered;
    }
    if let Some(singular) = lowered.strip_suffix('s') {
        if is_known_kind(singular) {
            return singular.to_string();
        }
    }
    lowered
}

/// Static kind → category mapping. Unknown kinds default to `knowledge`.
pub fn category_for_kind(kind: &str) -> Category {
    if ENTITY_KINDS.contains(&kind) {
        Category::Entity
    } else if EVENT_KINDS.contains(&kind) {
        Category::Event
    } else {
        // Known knowledge kinds and every unrecognized kind both land here.
        Category::Knowledge
    }
}

/// `kind_to_path("insight")` → `("knowledge", "insights")`.
pub fn kind_to_path(kind: &str) -> (&'static str, String) {
    let category = category_for_kind(kind);
    (category.dir_name(), pluralize(kind))
}

fn pluralize(kind: &str) -> String {
    if kind.ends_with('s') {
        kind.to_string()
    } else {
        format!("{kind}s")
    }
}

/// Inverts `kind_to_path`'s directory component: strips a trailing `s` when
/// the singular form is a known kind, else returns the directory name as-is
/// (supports custom/unknown kinds placed under an arbitrary directory name).
pub fn dir_to_kind(kind_dir: &str) -> String {
    if let Some(singular) = kind_dir.strip_suffix('s') {
        if is_known_kind(singular) {
            return singular.to_string();
        }
    }
    kind_dir.to_string()
}

static KIND_FORMAT_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

/// `^[a-z][a-z0-9_-]*$`
pub fn is_valid_kind_format(kind: &str) -> bool {
    KIND_FORMAT_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9_-]*$").expect("regex"))
        .is_match(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_plurals() {
        assert_eq!(normalize_kind("insights"), "insight");
        assert_eq!(normalize_kind("decisions"), "decision");
        assert_eq!(normalize_kind("Contacts"), "contact");
    }

    #[test]
    fn leaves_unknown_kinds_alone() {
        assert_eq!(normalize_kind("widget"), "widget");
        assert_eq!(normalize_kind("widgets"), "widgets");
    }

    #[test]
    fn category_mapping_matches_spec_table() {
        assert_eq!(category_for_kind("insight").as_str(), "knowledge");
        assert_eq!(category_for_kind("contact").as_str(), "entity");
        assert_eq!(category_for_kind("session").as_str(), "event");
        assert_eq!(category_for_kind("totally-unknown").as_str(), "knowledge");
    }

    #[test]
    fn kind_to_path_round_trips_through_dir_to_kind() {
        assert_eq!(kind_to_path("insight"), ("knowledge", "insights".to_string()));
        assert_eq!(kind_to_path("contact"), ("entities", "contacts".to_string()));
        assert_eq!(kind_to_path("session"), ("events", "sessions".to_string()));
        assert_eq!(dir_to_kind("insights"), "insight");
        assert_eq!(dir_to_kind("contacts"), "contact");
    }

    #[test]
    fn kind_format_validation() {
        assert!(is_valid_kind_format("insight"));
        assert!(is_valid_kind_format("my_kind-2"));
        assert!(!is_valid_kind_format("2cool"));
        assert!(!is_valid_kind_format("Insight"));
        assert!(!is_valid_kind_format(""));
    }
}
