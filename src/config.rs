//! Emulator configuration, loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings shared by the Agent, every Process and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Host directory standing in for the legacy root `:`
    pub virtual_root: PathBuf,
    /// Ring user programs are loaded into
    pub user_ring: u8,
    /// Unshared pages a process starts with
    pub initial_unshared_pages: u32,
    /// Ceiling for `?MEMI`
    pub max_unshared_pages: u32,
    /// Reported by `?SINFO`
    pub system_name: String,
    /// Highest TID handed out by the Agent
    pub max_tasks: u32,
    /// Per-syscall debug logging for every task
    pub debug_logging: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            virtual_root: PathBuf::from("."),
            user_ring: 7,
            initial_unshared_pages: 16,
            max_unshared_pages: 256,
            system_name: "VSCOMPAT".to_string(),
            max_tasks: 255,
            debug_logging: false,
        }
    }
}

impl EmulatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Words in one ring segment large enough for the unshared ceiling.
    pub fn segment_words(&self) -> usize {
        (self.max_unshared_pages as usize).max(1) * crate::PAGE_WORDS
    }
}
