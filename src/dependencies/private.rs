use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{DependencyProvider, DependencySpec, GemNameBatch};

/// Dependency records for privately hosted gems, keyed by gem name.
#[derive(Debug, Clone, Default)]
pub struct PrivateIndex {
    gems: HashMap<String, Vec<DependencySpec>>,
}

impl PrivateIndex {
    pub fn new(specs: impl IntoIterator<Item = DependencySpec>) -> Self {
        let mut gems: HashMap<String, Vec<DependencySpec>> = HashMap::new();
        for spec in specs {
            gems.entry(spec.name.clone()).or_default().push(spec);
        }
        Self { gems }
    }

    /// Loads a JSON array of dependency records.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read private index {}", path.display()))?;
        let specs: Vec<DependencySpec> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid private index {}", path.display()))?;
        let index = Self::new(specs);
        tracing::info!(
            path = %path.display(),
            gems = index.gem_count(),
            "private index loaded"
        );
        Ok(index)
    }

    pub fn gem_count(&self) -> usize {
        self.gems.len()
    }
}

#[async_trait]
impl DependencyProvider for PrivateIndex {
    async fn fetch(&self, gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
        Ok(gems
            .iter()
            .filter_map(|name| self.gems.get(name))
            .flatten()
            .cloned()
            .collect())
    }
}
