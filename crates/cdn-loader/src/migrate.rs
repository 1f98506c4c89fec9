// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Persistent state migration between version directories
//!
//! The state that survives an update is the `.env` configuration, the
//! `database.db` file and the `uploads/` tree. A snapshot copies the binary
//! parts into the holding area; a restore merges the configuration into the
//! new bundle and copies the rest back. Failures are collected rather than
//! raised: losing an upload is preferable to not relaunching.

use chrono::Local;
use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const ENV_FILE: &str = ".env";
pub const DATABASE_FILE: &str = "database.db";
pub const UPLOADS_DIR: &str = "uploads";
pub const HOLDING_AREA: &str = "cdn_backup_temp";

/// Ordered `.env` contents
pub type EnvMap = IndexMap<String, String>;

/// A non-blank, non-comment `.env` line that is not `key=value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_no: usize,
    pub content: String,
}

#[derive(Debug)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

#[derive(Debug)]
pub struct Snapshot {
    pub env: EnvMap,
    pub holding_area: PathBuf,
    pub skipped: Vec<SkippedLine>,
    pub failures: Vec<CopyFailure>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub env_written: bool,
    pub restored: Vec<PathBuf>,
    pub failures: Vec<CopyFailure>,
}

/// Parse `.env` text. Blank lines and `#` comments are ignored; anything else
/// without a `=` or with an empty key is skipped and reported.
pub fn parse_env(content: &str) -> (EnvMap, Vec<SkippedLine>) {
    let mut env = EnvMap::new();
    let mut skipped = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                env.insert(key.trim().to_owned(), value.trim().to_owned());
            }
            _ => skipped.push(SkippedLine {
                line_no: idx + 1,
                content: line.to_owned(),
            }),
        }
    }

    (env, skipped)
}

/// Render `.env` text with a last-updated header
pub fn render_env(env: &EnvMap) -> String {
    let mut out = format!(
        "# Last updated: {}\n\n# migrated from previous version\n",
        Local::now().to_rfc3339()
    );
    for (key, value) in env {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone)]
pub struct StateMigrator {
    holding_area: PathBuf,
}

impl StateMigrator {
    pub fn new(root: &Path) -> Self {
        Self {
            holding_area: root.join(HOLDING_AREA),
        }
    }

    pub fn holding_area(&self) -> &Path {
        &self.holding_area
    }

    /// Back up the persistent state of `version_dir` into a fresh holding area
    pub fn snapshot(&self, version_dir: &Path) -> Snapshot {
        let mut snapshot = Snapshot {
            env: EnvMap::new(),
            holding_area: self.holding_area.clone(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        if self.holding_area.exists()
            && let Err(error) = fs::remove_dir_all(&self.holding_area)
        {
            tracing::warn!("Could not clear stale holding area: {error}");
            snapshot.failures.push(CopyFailure {
                path: self.holding_area.clone(),
                error,
            });
        }
        if let Err(error) = fs::create_dir_all(&self.holding_area) {
            tracing::warn!("Could not create holding area: {error}");
            snapshot.failures.push(CopyFailure {
                path: self.holding_area.clone(),
                error,
            });
        }

        let env_path = version_dir.join(ENV_FILE);
        if env_path.exists() {
            match fs::read_to_string(&env_path) {
                Ok(content) => {
                    let (env, skipped) = parse_env(&content);
                    for line in &skipped {
                        tracing::debug!("Skipping malformed .env line {}", line.line_no);
                    }
                    snapshot.env = env;
                    snapshot.skipped = skipped;
                }
                Err(error) => {
                    tracing::warn!("Could not back up .env file: {error}");
                    snapshot.failures.push(CopyFailure {
                        path: env_path,
                        error,
                    });
                }
            }
        }

        let db = version_dir.join(DATABASE_FILE);
        if db.exists()
            && let Err(error) = fs::copy(&db, self.holding_area.join(DATABASE_FILE))
        {
            tracing::warn!("Could not back up {DATABASE_FILE}: {error}");
            snapshot.failures.push(CopyFailure { path: db, error });
        }

        let uploads = version_dir.join(UPLOADS_DIR);
        if uploads.is_dir() {
            copy_dir(
                &uploads,
                &self.holding_area.join(UPLOADS_DIR),
                &mut snapshot.failures,
            );
        }

        tracing::info!(
            "Backed up state from {} ({} settings)",
            version_dir.display(),
            snapshot.env.len()
        );
        snapshot
    }

    /// Reinject a snapshot into `version_dir`, then delete the holding area.
    ///
    /// Calling this again after the holding area is gone only rewrites the
    /// configuration.
    pub fn restore(&self, version_dir: &Path, snapshot: &Snapshot) -> RestoreReport {
        let mut report = RestoreReport::default();

        if !snapshot.env.is_empty() {
            let env_path = version_dir.join(ENV_FILE);
            let mut merged = match fs::read_to_string(&env_path) {
                Ok(content) => parse_env(&content).0,
                Err(_) => EnvMap::new(),
            };
            for (key, value) in &snapshot.env {
                merged.insert(key.clone(), value.clone());
            }

            match fs::write(&env_path, render_env(&merged)) {
                Ok(()) => report.env_written = true,
                Err(error) => {
                    tracing::error!("Error restoring .env file: {error}");
                    report.failures.push(CopyFailure {
                        path: env_path,
                        error,
                    });
                }
            }
        }

        let db_backup = snapshot.holding_area.join(DATABASE_FILE);
        if db_backup.exists() {
            let target = version_dir.join(DATABASE_FILE);
            match fs::copy(&db_backup, &target) {
                Ok(_) => report.restored.push(target),
                Err(error) => {
                    tracing::warn!("Could not restore {DATABASE_FILE}: {error}");
                    report.failures.push(CopyFailure {
                        path: db_backup,
                        error,
                    });
                }
            }
        }

        let uploads_backup = snapshot.holding_area.join(UPLOADS_DIR);
        if uploads_backup.is_dir() {
            let target = version_dir.join(UPLOADS_DIR);
            let before = report.failures.len();
            copy_dir(&uploads_backup, &target, &mut report.failures);
            if report.failures.len() == before {
                report.restored.push(target);
            }
        }

        remove_holding_area(&snapshot.holding_area);
        report
    }

    /// Drop a snapshot without restoring it
    pub fn discard(&self, snapshot: &Snapshot) {
        remove_holding_area(&snapshot.holding_area);
    }
}

fn remove_holding_area(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove holding area {}: {e}", path.display()),
    }
}

/// Recursively copy `src` into `dst`, merging with existing content.
/// Failures are recorded per entry and the walk continues.
fn copy_dir(src: &Path, dst: &Path, failures: &mut Vec<CopyFailure>) {
    if let Err(error) = fs::create_dir_all(dst) {
        failures.push(CopyFailure {
            path: dst.to_path_buf(),
            error,
        });
        return;
    }

    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(error) => {
            failures.push(CopyFailure {
                path: src.to_path_buf(),
                error,
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                failures.push(CopyFailure {
                    path: src.to_path_buf(),
                    error,
                });
                continue;
            }
        };
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir(&src_path, &dst_path, failures);
        } else if let Err(error) = fs::copy(&src_path, &dst_path) {
            tracing::warn!("Could not copy {}: {error}", src_path.display());
            failures.push(CopyFailure {
                path: src_path,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_of(dir: &Path) -> EnvMap {
        parse_env(&fs::read_to_string(dir.join(ENV_FILE)).unwrap()).0
    }

    #[test]
    fn test_parse_env() {
        let content = "# comment\n\nA=1\n  B = two  \nbroken line\n=nokey\nC=x=y\n";
        let (env, skipped) = parse_env(content);

        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("two"));
        assert_eq!(env.get("C").map(String::as_str), Some("x=y"));
        assert_eq!(env.len(), 3);
        assert_eq!(
            skipped,
            vec![
                SkippedLine {
                    line_no: 5,
                    content: "broken line".to_owned(),
                },
                SkippedLine {
                    line_no: 6,
                    content: "=nokey".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_render_env_header() {
        let mut env = EnvMap::new();
        env.insert("PORT".to_owned(), "8080".to_owned());
        let text = render_env(&env);
        assert!(text.starts_with("# Last updated: "));
        assert!(text.ends_with("PORT=8080\n"));
        assert_eq!(parse_env(&text).0, env);
    }

    #[test]
    fn test_snapshot_copies_state() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        fs::create_dir_all(old.join("uploads/img")).unwrap();
        fs::write(old.join(ENV_FILE), "SECRET=abc\n").unwrap();
        fs::write(old.join(DATABASE_FILE), b"db-bytes").unwrap();
        fs::write(old.join("uploads/img/a.png"), b"png").unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);

        assert_eq!(snapshot.holding_area, root.path().join(HOLDING_AREA));
        assert_eq!(snapshot.env.get("SECRET").map(String::as_str), Some("abc"));
        assert!(snapshot.failures.is_empty());
        assert_eq!(
            fs::read(snapshot.holding_area.join(DATABASE_FILE)).unwrap(),
            b"db-bytes"
        );
        assert!(snapshot.holding_area.join("uploads/img/a.png").exists());
    }

    #[test]
    fn test_snapshot_without_optional_artifacts() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        fs::create_dir_all(&old).unwrap();

        let snapshot = StateMigrator::new(root.path()).snapshot(&old);
        assert!(snapshot.env.is_empty());
        assert!(snapshot.failures.is_empty());
        assert!(snapshot.holding_area.exists());
    }

    #[test]
    fn test_snapshot_clears_stale_holding_area() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        fs::create_dir_all(&old).unwrap();
        let stale = root.path().join(HOLDING_AREA).join(DATABASE_FILE);
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"stale").unwrap();

        StateMigrator::new(root.path()).snapshot(&old);
        assert!(!stale.exists());
    }

    #[test]
    fn test_restore_merge_precedence() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        let new = root.path().join("cdn-1.1.0");
        fs::create_dir_all(&old).unwrap();
        fs::create_dir_all(&new).unwrap();
        fs::write(old.join(ENV_FILE), "b=3\nc=4\n").unwrap();
        fs::write(new.join(ENV_FILE), "# defaults\na=1\nb=2\n").unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);
        let report = migrator.restore(&new, &snapshot);

        assert!(report.env_written);
        let merged = env_of(&new);
        let pairs: Vec<(&str, &str)> = merged
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "3"), ("c", "4")]);
    }

    #[test]
    fn test_restore_copies_back_and_removes_holding_area() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        let new = root.path().join("cdn-1.1.0");
        fs::create_dir_all(old.join("uploads")).unwrap();
        fs::create_dir_all(new.join("uploads")).unwrap();
        fs::write(old.join(DATABASE_FILE), b"old-db").unwrap();
        fs::write(old.join("uploads/user.txt"), b"mine").unwrap();
        fs::write(new.join("uploads/bundled.txt"), b"shipped").unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);
        let report = migrator.restore(&new, &snapshot);

        assert!(report.failures.is_empty());
        assert!(!report.env_written);
        assert_eq!(fs::read(new.join(DATABASE_FILE)).unwrap(), b"old-db");
        assert!(new.join("uploads/user.txt").exists());
        assert!(new.join("uploads/bundled.txt").exists());
        assert!(!new.join(ENV_FILE).exists());
        assert!(!migrator.holding_area().exists());
    }

    #[test]
    fn test_restore_twice_is_noop() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        let new = root.path().join("cdn-1.1.0");
        fs::create_dir_all(&old).unwrap();
        fs::create_dir_all(&new).unwrap();
        fs::write(old.join(DATABASE_FILE), b"db").unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);
        migrator.restore(&new, &snapshot);
        let second = migrator.restore(&new, &snapshot);

        assert!(second.failures.is_empty());
        assert!(second.restored.is_empty());
        assert!(!migrator.holding_area().exists());
    }

    #[test]
    fn test_restore_records_copy_failure_and_still_cleans_up() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join(DATABASE_FILE), b"db").unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);
        // Target directory that does not exist
        let report = migrator.restore(&root.path().join("cdn-9.9.9"), &snapshot);

        assert_eq!(report.failures.len(), 1);
        assert!(!migrator.holding_area().exists());
    }

    #[test]
    fn test_discard() {
        let root = TempDir::new().unwrap();
        let old = root.path().join("cdn-1.0.0");
        fs::create_dir_all(&old).unwrap();

        let migrator = StateMigrator::new(root.path());
        let snapshot = migrator.snapshot(&old);
        assert!(migrator.holding_area().exists());
        migrator.discard(&snapshot);
        assert!(!migrator.holding_area().exists());
        migrator.discard(&snapshot);
    }
}
