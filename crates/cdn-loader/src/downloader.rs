// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Release archive download and extraction

use crate::error::{LoaderError, Result};
use crate::release::{Release, USER_AGENT};
use crate::store;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appended to a version directory whose extraction failed
pub const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    cleanup_partial_extract: bool,
}

impl Downloader {
    pub fn new(cleanup_partial_extract: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LoaderError::Download(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cleanup_partial_extract,
        })
    }

    /// Fetch the release archive into `root` and unpack it as
    /// `cdn-<version>/`. The temporary archive is always removed.
    pub async fn download_and_extract(&self, release: &Release, root: &Path) -> Result<PathBuf> {
        let asset = release
            .archive_asset()
            .ok_or_else(|| LoaderError::NoArchiveAsset {
                tag: release.tag_name.clone(),
            })?;

        let dir_name = store::dir_name(&release.version);
        let temp_archive = root.join(format!("{dir_name}-temp.zip"));
        let extract_dir = root.join(&dir_name);

        tracing::info!("Downloading {} from {}", asset.name, asset.browser_download_url);
        let size_hint = (asset.size > 0).then_some(asset.size);
        if let Err(e) = self
            .download(&asset.browser_download_url, &temp_archive, size_hint)
            .await
        {
            remove_temp_archive(&temp_archive);
            return Err(e);
        }

        let result = extract_zip(&temp_archive, &extract_dir).await;
        remove_temp_archive(&temp_archive);

        if let Err(ref e) = result {
            tracing::error!("Error extracting {}: {e}", temp_archive.display());
            if extract_dir.exists() {
                if self.cleanup_partial_extract {
                    remove_partial(&extract_dir);
                } else {
                    set_aside_partial(&extract_dir);
                }
            }
        }

        result.map(|()| extract_dir)
    }

    /// Stream `url` to `dest`, drawing a progress bar. Returns bytes written.
    pub async fn download(&self, url: &str, dest: &Path, size_hint: Option<u64>) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoaderError::Download(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoaderError::Download(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let total = response.content_length().or(size_hint);
        let progress = progress_bar(total);

        let mut file = File::create(dest)?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                progress.abandon();
                LoaderError::Download(format!("Failed to read body: {e}"))
            })?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }
        file.flush()?;

        progress.finish_with_message("Download complete");
        tracing::info!("Downloaded {downloaded} bytes to {}", dest.display());
        Ok(downloaded)
    }
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {percent}% ({bytes}/{total_bytes}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            pb.set_style(style);
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("{spinner:.green} {bytes} downloaded {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb
        }
    }
}

fn remove_temp_archive(path: &Path) {
    if path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        tracing::warn!("Could not remove {}: {e}", path.display());
    }
}

fn remove_partial(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::info!("Removed partial {}", dir.display()),
        Err(e) => tracing::warn!("Could not remove partial {}: {e}", dir.display()),
    }
}

/// Path a half-extracted `cdn-<version>/` is moved to. The suffix keeps it
/// out of version discovery.
pub fn partial_dir(extract_dir: &Path) -> PathBuf {
    let mut name = extract_dir.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Keep a half-extracted directory for inspection without letting the next
/// scan treat it as an installed version
fn set_aside_partial(extract_dir: &Path) {
    let aside = partial_dir(extract_dir);
    if aside.exists()
        && let Err(e) = std::fs::remove_dir_all(&aside)
    {
        tracing::warn!("Could not remove stale {}: {e}", aside.display());
    }

    match std::fs::rename(extract_dir, &aside) {
        Ok(()) => tracing::info!("Kept partial extraction at {}", aside.display()),
        Err(e) => {
            tracing::warn!("Could not move {} aside: {e}", extract_dir.display());
            remove_partial(extract_dir);
        }
    }
}

/// Unpack a zip archive on the blocking pool and wait for it
pub async fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| LoaderError::Extract(format!("Failed to read zip archive: {e}")))?;
        std::fs::create_dir_all(&dest)?;
        zip.extract(&dest)
            .map_err(|e| LoaderError::Extract(format!("Failed to extract zip: {e}")))
    })
    .await
    .map_err(|e| LoaderError::Extract(format!("Extraction task failed: {e}")))?
}
