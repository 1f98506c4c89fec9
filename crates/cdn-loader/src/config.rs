// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Configuration module for the loader

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "cdn_loader.json";

const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

fn default_owner() -> String {
    "oblongboot".to_owned()
}

fn default_repo() -> String {
    "siteadmin".to_owned()
}

fn default_10800() -> u64 {
    3 * 60 * 60
}

fn default_10() -> u64 {
    10
}

fn default_entry_point() -> String {
    "main.py".to_owned()
}

fn default_launcher() -> Option<String> {
    Some("python3".to_owned())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderConfig {
    /// GitHub owner of the release repository
    #[serde(default = "default_owner")]
    pub repo_owner: String,

    /// GitHub repository publishing the bundles
    #[serde(default = "default_repo")]
    pub repo_name: String,

    /// Custom API base URL for testing (overrides default GitHub API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// How often to check for updates (seconds)
    #[serde(default = "default_10800")]
    pub check_interval_secs: u64,

    /// Control loop tick (seconds)
    #[serde(default = "default_10")]
    pub tick_interval_secs: u64,

    /// Grace period between SIGTERM and SIGKILL (seconds)
    #[serde(default = "default_10")]
    pub stop_timeout_secs: u64,

    /// Entry point inside a version directory
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Program that runs the entry point; `None` executes it directly
    #[serde(default = "default_launcher")]
    pub launcher: Option<String>,

    /// Delete a half-extracted version directory instead of moving it to
    /// `cdn-<version>.partial` for manual recovery
    #[serde(default)]
    pub cleanup_partial_extract: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_owner(),
            repo_name: default_repo(),
            api_base_url: None,
            check_interval_secs: default_10800(),
            tick_interval_secs: default_10(),
            stop_timeout_secs: default_10(),
            entry_point: default_entry_point(),
            launcher: default_launcher(),
            cleanup_partial_extract: false,
        }
    }
}

impl LoaderConfig {
    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Load the config from `path`, writing defaults when it does not exist
pub fn load_config(path: &Path) -> Result<LoaderConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LoaderError::Config(format!("Failed to parse config: {e}")))
    } else {
        let config = LoaderConfig::default();
        save_config(path, &config)?;
        Ok(config)
    }
}

pub fn save_config(path: &Path, config: &LoaderConfig) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}
