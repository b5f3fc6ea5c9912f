use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use url::Url;

use super::env::RequestEnv;
use super::rewrite::{PathMatcher, PatternError};
use super::{Claim, SourceKind, claim};

/// One registered source and what it mounts on.
#[derive(Debug, Clone)]
struct SourceEntry {
    kind: SourceKind,
    matcher: Option<PathMatcher>,
}

impl SourceEntry {
    fn new(kind: SourceKind, matcher: Option<PathMatcher>) -> Self {
        Self { kind, matcher }
    }
}

/// Ordered, read-only list of sources. Order is dispatch priority: private
/// and explicit redirects are tried before the open upstreams.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
}

impl SourceRegistry {
    pub fn standard() -> Result<Self, PatternError> {
        Ok(Self {
            entries: vec![
                SourceEntry::new(SourceKind::Private, Some(PathMatcher::prefix("/private"))),
                SourceEntry::new(
                    SourceKind::Redirect,
                    Some(PathMatcher::pattern("/redirect/(?<upstream_url>[^/]+)")?),
                ),
                SourceEntry::new(
                    SourceKind::Upstream,
                    Some(PathMatcher::pattern("/upstream/(?<upstream_url>[^/]+)")?),
                ),
                SourceEntry::new(SourceKind::Rubygems, None),
            ],
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.entries.iter().map(|entry| entry.kind)
    }

    /// Offers `env` to each source in order. The first source that claims it
    /// wins; sources that decline leave `env` untouched.
    pub fn claim(&self, env: &mut RequestEnv, default_upstream: &Url) -> Option<Claim> {
        self.entries
            .iter()
            .find_map(|entry| claim(entry.kind, entry.matcher.as_ref(), env, default_upstream))
    }
}

static SOURCES: Lazy<RwLock<Option<Arc<SourceRegistry>>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide registry, built on first use and shared afterwards.
pub fn sources() -> Result<Arc<SourceRegistry>, PatternError> {
    if let Some(registry) = SOURCES.read().as_ref() {
        return Ok(Arc::clone(registry));
    }

    let mut slot = SOURCES.write();
    if let Some(registry) = slot.as_ref() {
        return Ok(Arc::clone(registry));
    }
    let registry = Arc::new(SourceRegistry::standard()?);
    *slot = Some(Arc::clone(&registry));
    Ok(registry)
}

/// Drops the process-wide registry so the next [`sources`] call rebuilds it.
/// Test harnesses only.
#[doc(hidden)]
pub fn reset_sources() {
    *SOURCES.write() = None;
}
