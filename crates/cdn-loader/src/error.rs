// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the loader crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid version identifier: {0}")]
    InvalidVersion(String),

    #[error("release check failed: {0}")]
    ReleaseCheck(String),

    #[error("release {tag} has no .zip asset")]
    NoArchiveAsset { tag: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("no entry point at {}", .0.display())]
    MissingEntryPoint(PathBuf),

    #[error("process error: {0}")]
    Process(String),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
