//! JSON Pointer handling (RFC 6901) for patch paths.
//!
//! Batch operations address tree positions with absolute pointers such
//! as `/Items/3/Description`. Within a segment, `~0` stands for `~` and
//! `~1` for `/`; a `~` followed by anything else is rejected. The
//! relaxed parser additionally accepts pointers without the leading
//! slash, which some remote runtimes emit.

use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JsonPointerError {
    #[error("json pointer must be absolute or empty")]
    NotAbsolute,
    #[error("invalid escape in pointer segment {segment:?}")]
    InvalidEscape { segment: String },
}

/// Decodes one raw pointer segment. Borrows when no escape is present.
pub fn unescape_component(raw: &str) -> Result<Cow<'_, str>, JsonPointerError> {
    if !raw.contains('~') {
        return Ok(Cow::Borrowed(raw));
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => {
                return Err(JsonPointerError::InvalidEscape {
                    segment: raw.to_string(),
                })
            }
        }
    }
    Ok(Cow::Owned(out))
}

/// Appends one decoded segment to a pointer string, escaping as needed.
pub fn push_component(pointer: &mut String, component: &str) {
    pointer.push('/');
    for c in component.chars() {
        match c {
            '~' => pointer.push_str("~0"),
            '/' => pointer.push_str("~1"),
            _ => pointer.push(c),
        }
    }
}

/// Parses an absolute pointer into decoded segments.
///
/// `""` is the whole document (no segments) and `"/"` is the single
/// empty-named segment, per RFC 6901.
pub fn parse_json_pointer(pointer: &str) -> Result<Vec<String>, JsonPointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(JsonPointerError::NotAbsolute);
    }
    pointer
        .split('/')
        .skip(1)
        .map(|raw| unescape_component(raw).map(Cow::into_owned))
        .collect()
}

/// Like [`parse_json_pointer`], but a missing leading slash is treated
/// as an implicit one instead of an error.
pub fn parse_json_pointer_relaxed(pointer: &str) -> Result<Vec<String>, JsonPointerError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        return parse_json_pointer(pointer);
    }
    pointer
        .split('/')
        .map(|raw| unescape_component(raw).map(Cow::into_owned))
        .collect()
}

/// Formats decoded segments back into an absolute pointer. No segments
/// yields `""`, the whole-document pointer.
pub fn format_json_pointer(path: &[String]) -> String {
    let mut out = String::with_capacity(path.iter().map(|s| s.len() + 1).sum());
    for component in path {
        push_component(&mut out, component);
    }
    out
}
