//! Dependency metadata providers.
//!
//! A provider answers "which versions of these gems exist and what do they
//! depend on". The gateway never interprets the records, it only encodes them.

mod private;
mod upstream;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

pub use private::PrivateIndex;
pub use upstream::{HttpUpstreams, UpstreamDependencies, UpstreamResolver};

/// One released version of a gem, in the shape of the RubyGems dependency API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub number: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// `[name, requirement]` pairs, e.g. `["rack", ">= 2.0"]`.
    #[serde(default)]
    pub dependencies: Vec<(String, String)>,
}

fn default_platform() -> String {
    "ruby".to_string()
}

/// Distinct gem names in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GemNameBatch {
    names: IndexSet<String>,
}

impl GemNameBatch {
    /// Parses a comma-separated list the way Bundler's server side always has:
    /// trailing empty segments are dropped, leading and interior ones count as
    /// a name. Repeated names keep their first position.
    pub fn parse(raw: &str) -> Self {
        let mut segments: Vec<&str> = raw.split(',').collect();
        while segments.last() == Some(&"") {
            segments.pop();
        }
        Self {
            names: segments.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Comma-joined form, as sent in a `gems=` query parameter.
    pub fn to_query_value(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }
}

impl<S: Into<String>> FromIterator<S> for GemNameBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Source of dependency records. Implementations must be safe to call from
/// many requests at once; any caching is theirs to synchronise.
#[async_trait]
pub trait DependencyProvider: Send + Sync {
    async fn fetch(&self, gems: &GemNameBatch) -> Result<Vec<DependencySpec>>;
}
