//! Node configuration stored at `<dir>/rfs-config.json`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::metadata::HistoryPolicy;

const CONFIG_FILE: &str = "rfs-config.json";

/// Tunables of the synchronization core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfsConfig {
    /// Block size limits for signature generation
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Retention of version history
    #[serde(default)]
    pub history: HistoryPolicy,
    /// Signature sets kept in memory by the repository cache
    #[serde(default = "default_signature_cache_capacity")]
    pub signature_cache_capacity: usize,
}

fn default_signature_cache_capacity() -> usize {
    64
}

impl Default for RfsConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            history: HistoryPolicy::default(),
            signature_cache_capacity: default_signature_cache_capacity(),
        }
    }
}

impl RfsConfig {
    /// Load config from a directory; defaults when the file is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = Self::config_file_path(dir);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read rfs config from {:?}", config_path))?;
        let config: RfsConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse rfs config JSON")?;
        config
            .validate()
            .with_context(|| format!("Invalid rfs config in {:?}", config_path))?;
        Ok(config)
    }

    /// Save config to a directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        let config_path = Self::config_file_path(dir);
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.chunking.validate()?;
        if self.history.max_history_len == 0 {
            return Err(crate::error::SyncError::Config(
                "history.max_history_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn config_file_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }
}
