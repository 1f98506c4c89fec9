// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! GitHub release checker

use crate::config::LoaderConfig;
use crate::downloader::Downloader;
use crate::error::{LoaderError, Result};
use crate::version::{Version, version_from_tag};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = ".zip";

pub(crate) const USER_AGENT: &str = concat!("cdn-loader/", env!("CARGO_PKG_VERSION"));

/// GitHub release asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    /// Size in bytes, 0 when GitHub does not report it
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// Latest release as seen by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    pub version: Version,
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    pub fn new(tag_name: impl Into<String>, assets: Vec<ReleaseAsset>) -> Result<Self> {
        let tag_name = tag_name.into();
        let version = version_from_tag(&tag_name)?;
        Ok(Self {
            tag_name,
            version,
            assets,
        })
    }

    /// First asset that is a zip archive
    pub fn archive_asset(&self) -> Option<&ReleaseAsset> {
        self.assets
            .iter()
            .find(|a| a.name.ends_with(ARCHIVE_EXTENSION))
    }
}

/// Where releases come from. The update cycle only talks to this seam.
#[async_trait]
pub trait ReleaseSource {
    /// Describe the latest published release
    async fn latest_release(&self) -> Result<Release>;

    /// Download the release archive and extract it under `root`, returning
    /// the new version directory
    async fn download_and_extract(&self, release: &Release, root: &Path) -> Result<PathBuf>;
}

/// Release checker for a GitHub repository
#[derive(Debug, Clone)]
pub struct ReleaseChecker {
    client: reqwest::Client,
    url: String,
}

impl ReleaseChecker {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                LoaderError::ReleaseCheck(format!("Failed to build HTTP client: {e}"))
            })?;

        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            config.api_base_url().trim_end_matches('/'),
            config.repo_owner,
            config.repo_name
        );

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the latest release. One request, no retries.
    pub async fn latest(&self) -> Result<Release> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| LoaderError::ReleaseCheck(format!("Request failed: {e}")))?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            tracing::warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoaderError::ReleaseCheck(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        let release: GithubRelease = response
            .json()
            .await
            .map_err(|e| LoaderError::ReleaseCheck(format!("Failed to parse response: {e}")))?;

        Release::new(release.tag_name, release.assets)
    }
}

/// GitHub-backed [`ReleaseSource`]
#[derive(Debug, Clone)]
pub struct GithubReleases {
    checker: ReleaseChecker,
    downloader: Downloader,
}

impl GithubReleases {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        Ok(Self {
            checker: ReleaseChecker::new(config)?,
            downloader: Downloader::new(config.cleanup_partial_extract)?,
        })
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn latest_release(&self) -> Result<Release> {
        self.checker.latest().await
    }

    async fn download_and_extract(&self, release: &Release, root: &Path) -> Result<PathBuf> {
        self.downloader.download_and_extract(release, root).await
    }
}
