//! Time-ordered, lexicographically sortable identifiers.
//!
//! A vault id is a 26-character ULID: the first 10 characters encode
//! milliseconds since the epoch (base32 Crockford), the remaining 16 are
//! random. Uniqueness only needs to hold within a single vault, so we rely on
//! `ulid`'s entropy rather than coordinating across processes.

use ulid::Ulid;

/// Generate a new id for a freshly captured entry.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Validate that a string looks like a vault id (26-char Crockford base32).
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 26 && id.parse::<Ulid>().is_ok()
}
