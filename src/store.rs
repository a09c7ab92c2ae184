//! TOML file store for configuration the driver owns locally.
//!
//! The device keeps its own settings record; only backlash compensation lives
//! on the host side, so that is all this file holds:
//!
//! ```toml
//! [backlash]
//! enabled = true
//! steps = 50
//! ```

use anyhow::{Context, Result};
use focuserlink_core::capabilities::{BacklashConfig, ConfigStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    backlash: Option<BacklashConfig>,
}

/// [`ConfigStore`] backed by a TOML file.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    /// Store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", self.path.display()))
    }
}

impl ConfigStore for TomlConfigStore {
    fn load_backlash(&self) -> Result<Option<BacklashConfig>> {
        Ok(self.read()?.backlash)
    }

    fn save_backlash(&self, config: &BacklashConfig) -> Result<()> {
        let mut file = self.read()?;
        file.backlash = Some(*config);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(&file).context("Failed to serialize store")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), ?config, "Backlash configuration saved");
        Ok(())
    }
}
