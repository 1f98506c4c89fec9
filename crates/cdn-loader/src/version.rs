// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Version identifier parsing and ordering
//!
//! Versions are ranked by the integer obtained from concatenating their
//! components as decimal text, so `1.2.3` ranks as `123` and `1.10.0` as
//! `1100`. Installed bundles have always been compared this way and the
//! directory layout on existing hosts depends on it.

use crate::error::{LoaderError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
    rank: u64,
}

impl Version {
    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Concatenated-component value used for ordering
    pub fn rank(&self) -> u64 {
        self.rank
    }
}

fn parse_component(part: &str, whole: &str) -> Result<u32> {
    let well_formed = !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_digit())
        && (part == "0" || !part.starts_with('0'));
    if !well_formed {
        return Err(LoaderError::InvalidVersion(format!(
            "bad component {part:?} in {whole:?}"
        )));
    }
    part.parse::<u32>()
        .map_err(|_| LoaderError::InvalidVersion(format!("component out of range in {whole:?}")))
}

impl FromStr for Version {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(LoaderError::InvalidVersion(format!(
                "{s:?}, expected X.Y.Z"
            )));
        };

        let major = parse_component(major, s)?;
        let minor = parse_component(minor, s)?;
        let patch = parse_component(patch, s)?;

        let rank = format!("{major}{minor}{patch}")
            .parse::<u64>()
            .map_err(|_| LoaderError::InvalidVersion(format!("{s:?} is too large to rank")))?;

        Ok(Self {
            major,
            minor,
            patch,
            rank,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank).then_with(|| {
            (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse a release tag, tolerating a single leading "v"
pub fn version_from_tag(tag: &str) -> Result<Version> {
    tag.strip_prefix(['v', 'V']).unwrap_or(tag).parse()
}
