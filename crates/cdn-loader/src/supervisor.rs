// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Process supervisor module for managing the application child process

use crate::error::{LoaderError, Result};
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Running,
    Stopping,
}

/// Owns the single supervised child process
#[derive(Debug)]
pub struct ProcessSupervisor {
    child: Option<Child>,
    state: ProcessState,
    entry_point: String,
    launcher: Option<String>,
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(entry_point: &str, launcher: Option<&str>, stop_timeout: Duration) -> Self {
        Self {
            child: None,
            state: ProcessState::Idle,
            entry_point: entry_point.to_owned(),
            launcher: launcher.map(str::to_owned),
            stop_timeout,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Start the application from `version_dir`, returning its PID
    pub fn launch(&mut self, version_dir: &Path) -> Result<u32> {
        if self.is_alive() {
            return Err(LoaderError::Process(format!(
                "already running (PID {})",
                self.pid().unwrap_or_default()
            )));
        }

        let entry = version_dir.join(&self.entry_point);
        if !entry.exists() {
            return Err(LoaderError::MissingEntryPoint(entry));
        }

        tracing::info!("Launching from {}", entry.display());

        let mut command = match self.launcher {
            Some(ref launcher) => {
                let mut cmd = Command::new(launcher);
                cmd.arg(&self.entry_point);
                cmd
            }
            None => Command::new(&entry),
        };
        let child = command
            .current_dir(version_dir)
            .spawn()
            .map_err(|e| LoaderError::Process(format!("Failed to launch {}: {e}", entry.display())))?;

        let pid = child.id();
        self.child = Some(child);
        self.state = ProcessState::Running;
        tracing::info!("Launched successfully (PID: {pid})");
        Ok(pid)
    }

    /// Graceful stop: SIGTERM, wait up to the stop timeout, then SIGKILL.
    /// A no-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.state = ProcessState::Idle;
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!("Process had already exited: {status}");
            self.state = ProcessState::Idle;
            return;
        }

        self.state = ProcessState::Stopping;
        tracing::info!("Stopping current instance (PID {})", child.id());
        request_termination(&child);

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    tracing::info!("Stopped successfully");
                    break;
                }
                Ok(None) if start.elapsed() < self.stop_timeout => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Ok(None) => {
                    tracing::warn!("Didn't stop gracefully, forcing");
                    force_kill(&mut child);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error waiting for child: {e}");
                    force_kill(&mut child);
                    break;
                }
            }
        }

        self.state = ProcessState::Idle;
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        match self.child {
            Some(ref mut child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Reap the child if it exited on its own, returning its status
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        let status = match self.child.as_mut()?.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Error polling child: {e}");
                return None;
            }
        };

        self.child = None;
        self.state = ProcessState::Idle;
        Some(status)
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::warn!("Failed to send SIGTERM: {e}");
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

fn force_kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!("Failed to kill child: {e}");
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to reap child: {e}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle(script: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("run.sh"), script).unwrap();
        dir
    }

    fn supervisor(timeout: Duration) -> ProcessSupervisor {
        ProcessSupervisor::new("run.sh", Some("sh"), timeout)
    }

    #[test]
    fn test_new_is_idle() {
        let mut sup = supervisor(Duration::from_secs(1));
        assert_eq!(sup.state(), ProcessState::Idle);
        assert!(!sup.is_alive());
        assert!(sup.pid().is_none());
        assert!(sup.poll_exit().is_none());
    }

    #[test]
    fn test_launch_missing_entry_point() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(Duration::from_secs(1));

        let result = sup.launch(dir.path());
        assert!(matches!(result, Err(LoaderError::MissingEntryPoint(_))));
        assert_eq!(sup.state(), ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_launch_uses_version_dir_as_cwd() {
        let dir = bundle("pwd > cwd.txt\nexec sleep 30\n");
        let mut sup = supervisor(Duration::from_secs(5));

        sup.launch(dir.path()).unwrap();
        assert_eq!(sup.state(), ProcessState::Running);

        let marker = dir.path().join("cwd.txt");
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let cwd = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(
            Path::new(cwd.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_launch_without_launcher_executes_entry_point() {
        use std::os::unix::fs::PermissionsExt;

        let dir = bundle("#!/bin/sh\necho direct > ran.txt\nexec sleep 30\n");
        let script = dir.path().join("run.sh");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut sup = ProcessSupervisor::new("run.sh", None, Duration::from_secs(5));

        sup.launch(dir.path()).unwrap();

        let marker = dir.path().join("ran.txt");
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "direct");
        assert!(sup.is_alive());

        sup.stop().await;
        assert!(!sup.is_alive());
    }

    #[tokio::test]
    async fn test_stop_graceful() {
        let dir = bundle("exec sleep 30\n");
        let mut sup = supervisor(Duration::from_secs(5));

        sup.launch(dir.path()).unwrap();
        assert!(sup.is_alive());

        let start = Instant::now();
        sup.stop().await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(sup.state(), ProcessState::Idle);
        assert!(!sup.is_alive());
    }

    #[tokio::test]
    async fn test_stop_forces_kill_after_timeout() {
        let dir = bundle("trap '' TERM\nwhile true; do sleep 1; done\n");
        let mut sup = supervisor(Duration::from_millis(500));

        sup.launch(dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.stop().await;

        assert_eq!(sup.state(), ProcessState::Idle);
        assert!(!sup.is_alive());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut sup = supervisor(Duration::from_secs(1));
        sup.stop().await;
        assert_eq!(sup.state(), ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_poll_exit_detects_unexpected_exit() {
        let dir = bundle("exit 3\n");
        let mut sup = supervisor(Duration::from_secs(1));
        sup.launch(dir.path()).unwrap();

        let mut status = None;
        for _ in 0..100 {
            status = sup.poll_exit();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(status.unwrap().code(), Some(3));
        assert_eq!(sup.state(), ProcessState::Idle);
        assert!(sup.pid().is_none());
    }

    #[tokio::test]
    async fn test_launch_while_running_is_refused() {
        let dir = bundle("exec sleep 30\n");
        let mut sup = supervisor(Duration::from_secs(5));
        let pid = sup.launch(dir.path()).unwrap();

        assert!(matches!(sup.launch(dir.path()), Err(LoaderError::Process(_))));
        assert_eq!(sup.pid(), Some(pid));

        sup.stop().await;
    }
}
