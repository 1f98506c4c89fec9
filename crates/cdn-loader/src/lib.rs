// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! cdn-loader - A self-updating process supervisor
//!
//! Keeps the newest installed `cdn-X.Y.Z` bundle running, pulls newer bundles
//! from GitHub Releases and carries configuration, the database and uploads
//! across version boundaries.

pub mod config;
pub mod downloader;
pub mod error;
pub mod migrate;
pub mod release;
pub mod store;
pub mod supervisor;
pub mod upgrader;
pub mod version;

pub use config::{LoaderConfig, load_config};
pub use error::LoaderError;
pub use release::{GithubReleases, Release, ReleaseSource};
pub use upgrader::{CycleOutcome, Upgrader};
pub use version::{Version, version_from_tag};
