//! Link-shape validation for submitted media URLs.
//!
//! Validation is prefix/shape-based, not existence-based: a syntactically
//! valid link to a nonexistent video passes here and fails later at
//! resolution. No side effects.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Allowed video-id charset and length.
static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9_-]{4,64}$").expect("video id pattern is valid")
});

/// The supported link shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlShape {
    /// `youtube.com/watch?v=<id>` canonical form.
    Watch,
    /// `youtu.be/<id>` short-link form.
    Short,
    /// `youtube.com/embed/<id>` embed form.
    Embed,
    /// `youtube.com/shorts/<id>` shorts form.
    Shorts,
}

impl std::fmt::Display for UrlShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Watch => write!(f, "watch"),
            Self::Short => write!(f, "short"),
            Self::Embed => write!(f, "embed"),
            Self::Shorts => write!(f, "shorts"),
        }
    }
}

/// A link that passed shape validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedUrl {
    /// The submitted text, trimmed.
    pub raw: String,
    /// Extracted video id.
    pub video_id: String,
    /// Which supported shape matched.
    pub shape: UrlShape,
}

/// Validate a submitted string against the enumerated supported link shapes.
///
/// Accepts the canonical watch form, the short-link form, the embed form,
/// and the shorts form, with optional scheme and optional `www.`/`m.`
/// host prefix.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the text matches no supported shape.
pub fn validate_url(text: &str) -> Result<ValidatedUrl> {
    let raw = text.trim();
    if raw.is_empty() {
        return Err(Error::InvalidUrl("empty input".to_string()));
    }

    let rest = strip_scheme_and_host_prefix(raw);

    let (shape, id) = if let Some(path) = rest.strip_prefix("youtu.be/") {
        (UrlShape::Short, first_path_segment(path))
    } else if let Some(path) = rest.strip_prefix("youtube.com/embed/") {
        (UrlShape::Embed, first_path_segment(path))
    } else if let Some(path) = rest.strip_prefix("youtube.com/shorts/") {
        (UrlShape::Shorts, first_path_segment(path))
    } else if let Some(query) = rest.strip_prefix("youtube.com/watch?") {
        (UrlShape::Watch, query_param(query, "v"))
    } else {
        return Err(Error::InvalidUrl(format!(
            "no recognized host/path pattern in '{raw}'"
        )));
    };

    match id {
        Some(id) if VIDEO_ID_RE.is_match(id) => Ok(ValidatedUrl {
            raw: raw.to_string(),
            video_id: id.to_string(),
            shape,
        }),
        _ => Err(Error::InvalidUrl(format!("missing or malformed video id in '{raw}'"))),
    }
}

/// Drop an optional `http(s)://` scheme and an optional `www.`/`m.` host
/// prefix, leaving `youtube.com/...` or `youtu.be/...`.
fn strip_scheme_and_host_prefix(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.strip_prefix("www.")
        .or_else(|| rest.strip_prefix("m."))
        .unwrap_or(rest)
}

/// First path segment, stopped at `/`, `?`, or `#`.
fn first_path_segment(path: &str) -> Option<&str> {
    let end = path.find(['/', '?', '#']).unwrap_or(path.len());
    let segment = &path[..end];
    (!segment.is_empty()).then_some(segment)
}

/// Value of a query parameter in an already scheme-stripped query string.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}
