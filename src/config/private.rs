use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrivateConfig {
    /// JSON file with dependency records for private gems.
    #[serde(default)]
    pub index: Option<PathBuf>,
}

impl PrivateConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if let Some(index) = self.index.as_mut()
            && index.is_relative()
        {
            *index = base_dir.join(&*index);
        }
    }
}
