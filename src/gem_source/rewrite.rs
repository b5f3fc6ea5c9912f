//! Prefix stripping that lets several sources share one HTTP entry point.

use std::{collections::HashMap, ops::Range};

use regex::Regex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid path pattern '{pattern}': {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// What a source mounts on.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    /// Literal text compared character for character. Regex metacharacters
    /// have no special meaning here.
    Prefix(String),
    /// Compiled pattern, always anchored at the start of the path.
    Pattern(Regex),
}

impl PathMatcher {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, PatternError> {
        Regex::new(&format!(r"\A(?:{pattern})"))
            .map(Self::Pattern)
            .map_err(|source| PatternError::Invalid {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Matches at position 0 of `haystack` only.
    pub fn find(&self, haystack: &str) -> Option<PathMatch> {
        match self {
            Self::Prefix(prefix) => haystack.starts_with(prefix.as_str()).then(|| PathMatch {
                span: 0..prefix.len(),
                text: prefix.clone(),
                captures: HashMap::new(),
            }),
            Self::Pattern(regex) => {
                let caps = regex.captures(haystack)?;
                let whole = caps.get(0)?;
                if whole.start() != 0 {
                    return None;
                }
                let captures = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                Some(PathMatch {
                    span: whole.range(),
                    text: whole.as_str().to_string(),
                    captures,
                })
            }
        }
    }
}

/// A successful match: the byte span, the matched text and named captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub span: Range<usize>,
    pub text: String,
    pub captures: HashMap<String, String>,
}

impl PathMatch {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// Strips the leading match of `matcher` from both `raw_uri` and
/// `decoded_path`.
///
/// Both strings must match before either is touched; otherwise both are left
/// as they were and `None` is returned. Each string loses its own match span,
/// so the two spans may differ in length when percent-encoding differs. The
/// returned match is the one found in `decoded_path`.
pub fn rewrite(
    raw_uri: &mut String,
    decoded_path: &mut String,
    matcher: &PathMatcher,
) -> Option<PathMatch> {
    let uri_match = matcher.find(raw_uri)?;
    let path_match = matcher.find(decoded_path)?;

    let before = raw_uri.clone();
    raw_uri.replace_range(uri_match.span, "");
    decoded_path.replace_range(path_match.span.clone(), "");
    info!(from = %before, to = %raw_uri, "rewriting request path");

    Some(path_match)
}
