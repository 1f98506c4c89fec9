// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Installed version directories under the working root
//!
//! Each installed bundle lives in `cdn-<major>.<minor>.<patch>/`. Scanning is
//! kept side-effect free; pruning superseded bundles is a separate step that
//! [`discover_newest`] composes with the scan.

use crate::error::Result;
use crate::version::Version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DIR_PREFIX: &str = "cdn-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub version: Version,
    pub path: PathBuf,
}

/// Directory name for a version, e.g. `cdn-1.2.3`
pub fn dir_name(version: &Version) -> String {
    format!("{DIR_PREFIX}{version}")
}

/// Outcome of removing superseded version directories
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// List installed versions under `root`, newest first.
///
/// Entries whose names do not parse as `cdn-X.Y.Z` are ignored. A missing
/// root yields an empty list.
pub fn list_candidates(root: &Path) -> Result<Vec<InstalledVersion>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(version) = name
            .to_str()
            .and_then(|n| n.strip_prefix(DIR_PREFIX))
            .and_then(|v| v.parse::<Version>().ok())
        else {
            continue;
        };

        let path = entry.path();
        if path.is_dir() {
            candidates.push(InstalledVersion { version, path });
        }
    }

    candidates.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(candidates)
}

/// Delete every candidate except the first. Each removal is attempted
/// independently.
pub fn prune_superseded(candidates: &[InstalledVersion]) -> PruneReport {
    let mut report = PruneReport::default();
    for old in candidates.iter().skip(1) {
        match fs::remove_dir_all(&old.path) {
            Ok(()) => {
                tracing::info!("Cleaned up old version: {}", old.version);
                report.removed.push(old.path.clone());
            }
            Err(e) => {
                tracing::warn!("Could not remove {}: {e}", old.path.display());
                report.failed.push((old.path.clone(), e));
            }
        }
    }
    report
}

/// Find the newest installed version and prune every older one.
///
/// This mutates the disk. Scan errors are logged and treated as "nothing
/// installed".
pub fn discover_newest(root: &Path) -> Option<InstalledVersion> {
    let candidates = match list_candidates(root) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Could not scan {}: {e}", root.display());
            return None;
        }
    };

    prune_superseded(&candidates);
    candidates.into_iter().next()
}

/// Delete a version directory tree
pub fn remove_version(path: &Path) -> Result<()> {
    fs::remove_dir_all(path)?;
    Ok(())
}
