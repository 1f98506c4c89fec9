// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Main upgrader that orchestrates the update cycle and the control loop

use crate::config::LoaderConfig;
use crate::migrate::{Snapshot, StateMigrator};
use crate::release::ReleaseSource;
use crate::store;
use crate::supervisor::ProcessSupervisor;
use crate::version::Version;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Marker file dropped by the webhook to request an immediate check
pub const UPDATE_FLAG: &str = "UPDATE_REQUESTED";

/// What a single update cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The release source could not be queried
    ReleaseUnavailable { launched: bool },
    UpToDate { version: Version, launched: bool },
    Updated {
        from: Option<Version>,
        to: Version,
        launched: bool,
    },
    /// Download or extraction failed; the previous version was relaunched
    /// when one exists
    DownloadFailed { fell_back: bool },
}

/// What a single control loop tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub checked: Option<CycleOutcome>,
    pub restarted: bool,
}

/// Drives version discovery, state migration and supervision for one root
#[derive(Debug)]
pub struct Upgrader<S> {
    root: PathBuf,
    source: S,
    supervisor: ProcessSupervisor,
    migrator: StateMigrator,
    check_interval: Duration,
    tick_interval: Duration,
}

impl<S: ReleaseSource> Upgrader<S> {
    pub fn new(root: &Path, config: &LoaderConfig, source: S) -> Self {
        Self {
            root: root.to_path_buf(),
            source,
            supervisor: ProcessSupervisor::new(
                &config.entry_point,
                config.launcher.as_deref(),
                config.stop_timeout(),
            ),
            migrator: StateMigrator::new(root),
            check_interval: config.check_interval(),
            tick_interval: config.tick_interval(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn supervisor_mut(&mut self) -> &mut ProcessSupervisor {
        &mut self.supervisor
    }

    /// Check for a newer release and move to it if there is one
    pub async fn check_and_update(&mut self) -> CycleOutcome {
        info!("Checking for updates...");
        let latest = self.source.latest_release().await;
        let installed = store::discover_newest(&self.root);

        // Backed up before we know whether an update is needed
        let snapshot = installed
            .as_ref()
            .map(|current| self.migrator.snapshot(&current.path));

        let release = match latest {
            Ok(release) => release,
            Err(e) => {
                warn!("Failed to check for updates: {e}");
                let launched = match installed {
                    Some(ref current) if !self.supervisor.is_alive() => {
                        self.launch(&current.path)
                    }
                    _ => false,
                };
                self.discard(snapshot);
                return CycleOutcome::ReleaseUnavailable { launched };
            }
        };

        if let Some(ref current) = installed
            && current.version == release.version
        {
            info!("Up to date (version {})", current.version);
            let launched = if self.supervisor.is_alive() {
                false
            } else {
                info!("Not running, launching...");
                self.launch(&current.path)
            };
            self.discard(snapshot);
            return CycleOutcome::UpToDate {
                version: current.version,
                launched,
            };
        }

        info!("New version available: {}", release.version);
        self.supervisor.stop().await;

        let new_dir = match self
            .source
            .download_and_extract(&release, &self.root)
            .await
        {
            Ok(dir) => dir,
            Err(e) => {
                error!("Download failed: {e}. Launching existing version if available...");
                let fell_back = match installed {
                    Some(ref current) => self.launch(&current.path),
                    None => false,
                };
                self.discard(snapshot);
                return CycleOutcome::DownloadFailed { fell_back };
            }
        };

        if let Some(ref old) = installed {
            if let Some(ref snapshot) = snapshot {
                let report = self.migrator.restore(&new_dir, snapshot);
                if !report.failures.is_empty() {
                    warn!(
                        "Restored state with {} failed item(s)",
                        report.failures.len()
                    );
                }
            }
            match store::remove_version(&old.path) {
                Ok(()) => info!("Removed old version: {}", old.version),
                Err(e) => warn!("Could not remove old version {}: {e}", old.version),
            }
        }

        info!("Updated to {}", release.version);
        let launched = self.launch(&new_dir);
        CycleOutcome::Updated {
            from: installed.map(|old| old.version),
            to: release.version,
            launched,
        }
    }

    /// Consume the update marker, returning whether it was present
    pub fn take_update_request(&self) -> bool {
        let flag = self.root.join(UPDATE_FLAG);
        if !flag.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_file(&flag) {
            warn!("Could not remove {}: {e}", flag.display());
        }
        true
    }

    /// One pass of the control loop
    pub async fn tick(&mut self, last_check: &mut Instant) -> TickReport {
        let mut report = TickReport::default();

        if self.take_update_request() {
            info!("Update flag detected from webhook, checking for updates...");
            report.checked = Some(self.check_and_update().await);
            *last_check = Instant::now();
        } else if last_check.elapsed() >= self.check_interval {
            report.checked = Some(self.check_and_update().await);
            *last_check = Instant::now();
        }

        if let Some(status) = self.supervisor.poll_exit() {
            warn!("Process died unexpectedly ({status}), restarting...");
            if let Some(newest) = store::discover_newest(&self.root) {
                report.restarted = self.launch(&newest.path);
            }
        }

        report
    }

    /// Run until `shutdown` resolves, then stop the child
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let outcome = self.check_and_update().await;
        info!("Initial check: {outcome:?}");
        let mut last_check = Instant::now();

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.tick_interval) => {}
            }
            self.tick(&mut last_check).await;
        }

        self.shutdown().await;
    }

    /// Stop the child and clear a pending update request
    pub async fn shutdown(&mut self) {
        info!("Shutting down...");
        self.supervisor.stop().await;

        let flag = self.root.join(UPDATE_FLAG);
        if flag.exists()
            && let Err(e) = std::fs::remove_file(&flag)
        {
            warn!("Could not remove {}: {e}", flag.display());
        }
    }

    fn launch(&mut self, version_dir: &Path) -> bool {
        match self.supervisor.launch(version_dir) {
            Ok(_) => true,
            Err(e) => {
                error!("Error launching: {e}");
                false
            }
        }
    }

    fn discard(&self, snapshot: Option<Snapshot>) {
        if let Some(snapshot) = snapshot {
            self.migrator.discard(&snapshot);
        }
    }
}
