//! Filename-safe slug generation.

const MAX_SLUG_LEN: usize = 80;

/// Lowercase, collapse runs of non-alphanumerics to a single `-`, trim
/// leading/trailing `-`, and truncate to 80 chars.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = false;
    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('-');
    let truncated = if trimmed.len() > MAX_SLUG_LEN {
        let mut end = MAX_SLUG_LEN;
        while end > 0 && !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        &trimmed[..end]
    } else {
        trimmed
    };
    truncated.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_slugify() {
        assert_eq!(slugify("Hybrid search wins"), "hybrid-search-wins");
    }

    #[test]
    fn collapses_runs_and_trims() {
        assert_eq!(slugify("  --Weird!! Title??--  "), "weird-title");
    }

    #[test]
    fn truncates_to_80_chars() {
        let long = "a".repeat(200);
        let slug = slugify(&long);
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn empty_input_yields_empty_slug() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}
