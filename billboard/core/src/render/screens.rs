//! Display enumerators backed by configuration

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DisplayEnumerator, RenderError};
use crate::config::BillboardToml;
use crate::display::DisplayGeometry;

/// Fixed list of displays
#[derive(Clone, Debug)]
pub struct StaticEnumerator {
    screens: Vec<DisplayGeometry>,
}

impl StaticEnumerator {
    /// Enumerate exactly `screens`
    #[must_use]
    pub fn new(screens: Vec<DisplayGeometry>) -> Self {
        Self { screens }
    }
}

impl Default for StaticEnumerator {
    fn default() -> Self {
        Self::new(vec![DisplayGeometry::DEFAULT])
    }
}

#[async_trait]
impl DisplayEnumerator for StaticEnumerator {
    async fn list(&self) -> Result<Vec<DisplayGeometry>, RenderError> {
        Ok(self.screens.clone())
    }
}

/// Re-reads the `[[screens]]` table of a configuration file on every poll
///
/// Editing the file while the daemon runs acts like plugging displays in or
/// out. A file without `[[screens]]` yields one default screen.
#[derive(Clone, Debug)]
pub struct ConfigFileEnumerator {
    path: PathBuf,
}

impl ConfigFileEnumerator {
    /// Watch the configuration file at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path being read
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DisplayEnumerator for ConfigFileEnumerator {
    async fn list(&self) -> Result<Vec<DisplayGeometry>, RenderError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RenderError::Enumeration(format!("{}: {e}", self.path.display()))
        })?;
        let config = BillboardToml::from_toml_str(&content)
            .map_err(|e| RenderError::Enumeration(e.to_string()))?;
        Ok(config
            .screens
            .filter(|screens| !screens.is_empty())
            .unwrap_or_else(|| vec![DisplayGeometry::DEFAULT]))
    }
}
