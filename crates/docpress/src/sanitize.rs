//! Helpers for cleaning names before they touch the filesystem or traces.

use std::path::Path;

use crate::error::ValidationError;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing media roots.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client-supplied filename to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading dots are stripped.
pub fn sanitize_filename(name: &str) -> Result<String, ValidationError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            _ => None,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim_end_matches('_');
    if cleaned.is_empty() {
        return Err(ValidationError::InvalidFilename(name.to_string()));
    }
    Ok(cleaned.to_string())
}
