//! Media type tokens.
//!
//! Handlers name content types loosely: a full type (`text/html`), a file
//! extension (`png`, `.css`) or one of a few shorthands. Everything is resolved
//! to a canonical media type here, for both the response `Content-Type` setter
//! and request type matching.

use std::borrow::Cow;

const SHORTHANDS: &[(&str, &str)] = &[
    ("text", "text/plain"),
    ("html", "text/html"),
    ("json", "application/json"),
    ("bin", "application/octet-stream"),
    ("urlencoded", "application/x-www-form-urlencoded"),
    ("form", "application/x-www-form-urlencoded"),
    ("multipart", "multipart/*"),
];

/// Resolves a token to a media type, `None` when it is not recognised.
///
/// Tokens that already contain a `/` are returned unchanged.
pub(crate) fn lookup(token: &str) -> Option<Cow<'static, str>> {
    let token = token.trim();
    if token.contains('/') {
        return Some(Cow::Owned(token.to_ascii_lowercase()));
    }

    let token = token.trim_start_matches('.').to_ascii_lowercase();
    if let Some((_, media_type)) = SHORTHANDS.iter().find(|(name, _)| *name == token) {
        return Some(Cow::Borrowed(media_type));
    }

    mime_guess::from_ext(&token).first().map(|mime| Cow::Owned(mime.essence_str().to_owned()))
}

/// Types that carry text and get a default charset.
pub(crate) fn is_textual(essence: &str) -> bool {
    let essence = essence.to_ascii_lowercase();
    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json" | "application/javascript" | "application/xml" | "application/x-www-form-urlencoded"
        )
}

/// Matches an actual media type against an expected one that may use `*`
/// wildcards or a `*/*+suffix` pattern.
pub(crate) fn matches(expected: &str, actual: &str) -> bool {
    let (Some((expected_type, expected_sub)), Some((actual_type, actual_sub))) =
        (expected.split_once('/'), actual.split_once('/'))
    else {
        return false;
    };

    if expected_type != "*" && !expected_type.eq_ignore_ascii_case(actual_type) {
        return false;
    }

    match expected_sub.strip_prefix('*') {
        Some("") => true,
        Some(suffix) if suffix.starts_with('+') => {
            actual_sub.len() > suffix.len() && actual_sub.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase())
        }
        _ => expected_sub.eq_ignore_ascii_case(actual_sub),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_tokens() {
        assert_eq!(lookup("html").as_deref(), Some("text/html"));
        assert_eq!(lookup("text").as_deref(), Some("text/plain"));
        assert_eq!(lookup("json").as_deref(), Some("application/json"));
        assert_eq!(lookup("bin").as_deref(), Some("application/octet-stream"));
        assert_eq!(lookup(".png").as_deref(), Some("image/png"));
        assert_eq!(lookup("css").as_deref(), Some("text/css"));
        assert_eq!(lookup("Image/SVG+XML").as_deref(), Some("image/svg+xml"));
        assert_eq!(lookup("no-such-extension"), None);
    }

    #[test]
    fn textual_types() {
        assert!(is_textual("text/plain"));
        assert!(is_textual("application/json"));
        assert!(is_textual("application/vnd.api+json"));
        assert!(!is_textual("image/png"));
        assert!(!is_textual("application/octet-stream"));
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("text/*", "text/html"));
        assert!(matches("*/*", "image/png"));
        assert!(matches("*/*+json", "application/ld+json"));
        assert!(!matches("*/*+json", "application/json"));
        assert!(matches("application/json", "Application/JSON"));
        assert!(!matches("text/plain", "text/html"));
        assert!(!matches("multipart/*", "text/plain"));
    }
}
