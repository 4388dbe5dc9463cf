//! Frontmatter read/write.
//!
//! The format is a YAML-like block delimited by `---` lines, supporting only
//! single-line scalar values, inline arrays (`tags: [a, b]`), and
//! string/number/boolean scalars. Multi-line values and nested maps are not
//! supported. The writer only ever emits what it knows how to parse back, so
//! `parse_frontmatter(format_frontmatter(x)) == x` holds for any `x` built
//! from this module.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::errors::{VaultError, VaultResult};

/// A flat scalar value for a free-form meta key written into frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl ScalarValue {
    fn parse(raw: &str) -> ScalarValue {
        if raw == "true" {
            return ScalarValue::Bool(true);
        }
        if raw == "false" {
            return ScalarValue::Bool(false);
        }
        if let Ok(n) = raw.parse::<f64>() {
            return ScalarValue::Num(n);
        }
        ScalarValue::Str(unquote(raw))
    }

    fn render(&self) -> String {
        match self {
            ScalarValue::Str(s) => quote_if_needed(s),
            ScalarValue::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    pub id: String,
    pub tags: Vec<String>,
    pub source: String,
    pub created: DateTime<Utc>,
    pub identity_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Flat scalar meta fields, written back verbatim on round trip.
    /// `folder` is never stored here — it is derived from the file's
    /// on-disk location when reading, not persisted.
    pub extra: BTreeMap<String, ScalarValue>,
}

pub fn parse_frontmatter(raw: &str) -> VaultResult<(FrontMatter, String)> {
    let (block, body) = split_delimited(raw)?;
    let mut fields: BTreeMap<String, RawValue> = BTreeMap::new();
    for line in block.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(malformed(format!("unparseable line: {line}")));
        };
        let key = key.trim().to_string();
        let value = value.trim();
        let parsed = if value.starts_with('[') && value.ends_with(']') {
            RawValue::Array(parse_inline_array(value))
        } else {
            RawValue::Scalar(value.to_string())
        };
        fields.insert(key, parsed);
    }

    let id = take_scalar(&mut fields, "id").ok_or_else(|| malformed("missing field: id"))?;
    let source = take_scalar(&mut fields, "source").unwrap_or_else(|| "claude-code".to_string());
    let created_raw =
        take_scalar(&mut fields, "created").ok_or_else(|| malformed("missing field: created"))?;
    let created = DateTime::parse_from_rfc3339(&created_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| malformed(format!("invalid created timestamp: {e}")))?;
    let tags = match fields.remove("tags") {
        Some(RawValue::Array(items)) => items,
        Some(RawValue::Scalar(s)) if s.is_empty() => Vec::new(),
        Some(RawValue::Scalar(s)) => vec![unquote(&s)],
        None => Vec::new(),
    };
    let identity_key = take_scalar(&mut fields, "identity_key");
    let expires_at = take_scalar(&mut fields, "expires_at")
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| malformed(format!("invalid expires_at timestamp: {e}")))
        })
        .transpose()?;

    let mut extra = BTreeMap::new();
    for (key, value) in fields {
        match value {
            RawValue::Scalar(s) => {
                extra.insert(key, ScalarValue::parse(&s));
            }
            RawValue::Array(_) => {
                // Only `tags` supports array syntax; other arrays are not a
                // supported scalar shape and are dropped rather than erroring,
                // matching "multi-line values and nested maps are not
                // supported" for anything beyond the known fields.
            }
        }
    }

    Ok((
        FrontMatter {
            id,
            tags,
            source,
            created,
            identity_key,
            expires_at,
            extra,
        },
        body,
    ))
}

pub fn format_frontmatter(fm: &FrontMatter) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("id: {}\n", fm.id));
    out.push_str(&format!("tags: [{}]\n", fm.tags.join(", ")));
    out.push_str(&format!("source: {}\n", fm.source));
    out.push_str(&format!("created: {}\n", fm.created.to_rfc3339()));
    if let Some(key) = &fm.identity_key {
        out.push_str(&format!("identity_key: {key}\n"));
    }
    if let Some(expires_at) = &fm.expires_at {
        out.push_str(&format!("expires_at: {}\n", expires_at.to_rfc3339()));
    }
    for (key, value) in &fm.extra {
        out.push_str(&format!("{key}: {}\n", value.render()));
    }
    out.push_str("---");
    out
}

/// Splits a leading `# Title` markdown heading off the body, if present.
pub fn split_title(body_with_heading: &str) -> (Option<String>, String) {
    let trimmed = body_with_heading.trim_start_matches('\n');
    if let Some(rest) = trimmed.strip_prefix("# ") {
        let (title_line, remainder) = match rest.split_once('\n') {
            Some((t, r)) => (t, r),
            None => (rest, ""),
        };
        (
            Some(title_line.trim().to_string()),
            remainder.trim_start_matches('\n').to_string(),
        )
    } else {
        (None, trimmed.to_string())
    }
}

pub fn join_title(title: Option<&str>, body: &str) -> String {
    match title {
        Some(t) if !t.is_empty() => format!("# {t}\n\n{body}"),
        _ => body.to_string(),
    }
}

enum RawValue {
    Scalar(String),
    Array(Vec<String>),
}

fn take_scalar(fields: &mut BTreeMap<String, RawValue>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        RawValue::Scalar(s) => Some(unquote(&s)),
        RawValue::Array(items) => Some(items.join(",")),
    }
}

fn parse_inline_array(value: &str) -> Vec<String> {
    let inner = &value[1..value.len() - 1];
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|s| unquote(s.trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn quote_if_needed(s: &str) -> String {
    if s.is_empty() || s.contains(':') || s.contains('[') || s.contains('#') {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

fn split_delimited(raw: &str) -> VaultResult<(String, String)> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return Err(malformed("missing frontmatter delimiter"));
    }
    let mut lines = trimmed.lines();
    lines.next(); // opening ---
    let mut block_lines = Vec::new();
    for line in lines.by_ref() {
        if line.trim() == "---" {
            let body = lines.collect::<Vec<_>>().join("\n");
            return Ok((block_lines.join("\n"), body));
        }
        block_lines.push(line);
    }
    Err(malformed("unterminated frontmatter"))
}

fn malformed(reason: impl Into<String>) -> VaultError {
    VaultError::MalformedEntry {
        path: String::new(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> FrontMatter {
        FrontMatter {
            id: "01HX000000000000000000000".to_string(),
            tags: vec!["react".to_string(), "hooks".to_string()],
            source: "claude-code".to_string(),
            created: Utc.with_ymd_and_hms(2025, 6, 1, 12, 34, 56).unwrap(),
            identity_key: Some("stripe".to_string()),
            expires_at: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_supported_scalar_shapes() {
        let fm = sample();
        let text = format_frontmatter(&fm);
        let (parsed, _) = parse_frontmatter(&format!("{text}\n\nbody")).unwrap();
        assert_eq!(parsed, fm);
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        let err = parse_frontmatter("no frontmatter here").unwrap_err();
        assert!(matches!(err, VaultError::MalformedEntry { .. }));
    }

    #[test]
    fn unterminated_block_is_malformed() {
        let err = parse_frontmatter("---\nid: x\ncreated: 2025-01-01T00:00:00Z\n").unwrap_err();
        assert!(matches!(err, VaultError::MalformedEntry { .. }));
    }

    #[test]
    fn splits_leading_title_heading() {
        let (title, body) = split_title("# Optional Title\n\nBody text…");
        assert_eq!(title.as_deref(), Some("Optional Title"));
        assert_eq!(body, "Body text…");

        let (title, body) = split_title("No heading here");
        assert_eq!(title, None);
        assert_eq!(body, "No heading here");
    }
}
