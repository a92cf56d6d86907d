//! Location handling: mode resolution, embedded snapshots and export URLs
//!
//! A location looks like a browser URL:
//! `http://localhost:3000/#/overlay?cfg=<token>`. The fragment decides the
//! mode; the `cfg` parameter anywhere in the string carries a snapshot.

use std::fmt;

use crate::codec;
use crate::config::OverlayConfig;
use crate::constants::location::{DISPLAY_MARKER, SNAPSHOT_PARAM};

/// Role of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Editable dashboard, sole writer
    Control,
    /// Read-only overlay consumed by capture software
    Display,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Control => f.write_str("control"),
            Mode::Display => f.write_str("display"),
        }
    }
}

/// A location split into the parts export needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location<'a> {
    /// Scheme and authority, e.g. `http://localhost:3000` (may be empty)
    pub origin: &'a str,
    /// Path without query or fragment, always starting with `/`
    pub path: &'a str,
    /// Everything after `#`, if present
    pub fragment: Option<&'a str>,
}

impl<'a> Location<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let raw = raw.trim();
        let (before_fragment, fragment) = match raw.split_once('#') {
            Some((head, fragment)) => (head, Some(fragment)),
            None => (raw, None),
        };
        let without_query = before_fragment
            .split_once('?')
            .map_or(before_fragment, |(head, _)| head);

        let path_start = match without_query.find("://") {
            Some(scheme_end) => without_query[scheme_end + 3..]
                .find('/')
                .map(|idx| idx + scheme_end + 3),
            None => without_query.find('/'),
        };

        let (origin, path) = match path_start {
            Some(idx) => (&without_query[..idx], &without_query[idx..]),
            None => (without_query, "/"),
        };

        Self { origin, path, fragment }
    }
}

/// Decide the mode for a location
pub fn resolve_mode(location: &str) -> Mode {
    match Location::parse(location).fragment {
        Some(fragment) if fragment.starts_with(DISPLAY_MARKER) => Mode::Display,
        _ => Mode::Control,
    }
}

/// Raw snapshot token from anywhere in the location.
///
/// The whole string is searched so marker/token ordering variations still
/// resolve; the value runs until the next `&` or `#`.
pub fn snapshot_token(location: &str) -> Option<&str> {
    let needle = format!("{SNAPSHOT_PARAM}=");
    let mut search_from = 0;
    while let Some(found) = location[search_from..].find(&needle) {
        let start = search_from + found;
        let introduced = start > 0 && matches!(location.as_bytes()[start - 1], b'?' | b'&');
        let value_start = start + needle.len();
        if introduced {
            let rest = &location[value_start..];
            let end = rest.find(['&', '#']).unwrap_or(rest.len());
            let token = &rest[..end];
            return (!token.is_empty()).then_some(token);
        }
        search_from = value_start;
    }
    None
}

/// Decoded snapshot embedded in the location, if any
pub fn embedded_snapshot(location: &str) -> Option<OverlayConfig> {
    snapshot_token(location).and_then(codec::decode)
}

/// Absolute display URL carrying the record, for capture software
pub fn export_url(origin: &str, path: &str, config: &OverlayConfig) -> String {
    let path = if path.is_empty() { "/" } else { path };
    format!(
        "{origin}{path}#{DISPLAY_MARKER}?{SNAPSHOT_PARAM}={}",
        codec::encode(config)
    )
}

/// Export URL derived from the current location's origin and path
pub fn export_url_for(location: &str, config: &OverlayConfig) -> String {
    let parsed = Location::parse(location);
    export_url(parsed.origin, parsed.path, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldUpdate, Theme};

    #[test]
    fn test_resolve_mode() {
        assert_eq!(resolve_mode("http://localhost:3000/"), Mode::Control);
        assert_eq!(resolve_mode("http://localhost:3000/#/"), Mode::Control);
        assert_eq!(resolve_mode("http://localhost:3000/#/overlay"), Mode::Display);
        assert_eq!(resolve_mode("http://localhost:3000/app/#/overlay?cfg=abc"), Mode::Display);
        // Marker outside the fragment doesn't count
        assert_eq!(resolve_mode("http://localhost:3000/overlay"), Mode::Control);
        assert_eq!(resolve_mode(""), Mode::Control);
    }

    #[test]
    fn test_parse_location() {
        let parsed = Location::parse("https://example.com:8080/tools/overlay.html?x=1#/overlay?cfg=a");
        assert_eq!(parsed.origin, "https://example.com:8080");
        assert_eq!(parsed.path, "/tools/overlay.html");
        assert_eq!(parsed.fragment, Some("/overlay?cfg=a"));

        let bare = Location::parse("http://localhost:3000");
        assert_eq!(bare.origin, "http://localhost:3000");
        assert_eq!(bare.path, "/");
        assert_eq!(bare.fragment, None);
    }

    #[test]
    fn test_snapshot_token_positions() {
        assert_eq!(snapshot_token("http://h/#/overlay?cfg=abc"), Some("abc"));
        assert_eq!(snapshot_token("http://h/?cfg=abc#/overlay"), Some("abc"));
        assert_eq!(snapshot_token("http://h/#/overlay?x=1&cfg=abc&y=2"), Some("abc"));
        assert_eq!(snapshot_token("http://h/#/overlay?mycfg=abc"), None);
        assert_eq!(snapshot_token("http://h/#/overlay?cfg="), None);
        assert_eq!(snapshot_token("http://h/#/overlay"), None);
    }

    #[test]
    fn test_export_url_round_trips_through_location() {
        let config = OverlayConfig::default().with(FieldUpdate::Theme(Theme::Chatting));
        let url = export_url_for("http://localhost:3000/studio/#/", &config);

        assert!(url.starts_with("http://localhost:3000/studio/#/overlay?cfg="));
        assert_eq!(resolve_mode(&url), Mode::Display);
        assert_eq!(embedded_snapshot(&url), Some(config));
    }

    #[test]
    fn test_invalid_embedded_snapshot_is_absent() {
        assert_eq!(embedded_snapshot("http://h/#/overlay?cfg=!!!"), None);
    }
}
