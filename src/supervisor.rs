//! Daemon lifecycle (C9): PID file locking, signal handling, and the
//! foreground/background split.
//!
//! States: `starting → ready → shutting_down → stopped`. This module owns
//! the parts of that lifecycle that don't belong to the HTTP servers
//! themselves — everything else (binding listeners, readiness) lives in
//! `main.rs`, which is the one place that can see both servers at once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;

/// Set on the re-exec'd child so it knows not to re-exec again.
pub const CHILD_MODE_ENV: &str = "ZEN_ROUTER_CHILD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    FatalStartup = 1,
    AlreadyRunning = 2,
    SignalledInt = 130,
    SignalledTerm = 143,
}

/// Holds the PID file open with an exclusive OS lock for the daemon's
/// lifetime; the lock (and the file) are released on drop.
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock, or fail with [`ExitCode::AlreadyRunning`] semantics
    /// if another live process already holds it.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        FileExt::try_lock_exclusive(&file)
            .map_err(|_| anyhow::anyhow!("already running: pid file {} is held by another process", path.display()))?;
        file.set_len(0)?;
        (&file).write_all(std::process::id().to_string().as_bytes())?;
        Ok(Self { file, path: path.to_path_buf() })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Interrupt => ExitCode::SignalledInt,
            Self::Terminate => ExitCode::SignalledTerm,
        }
    }
}

/// Waits for either SIGINT (ctrl-c) or SIGTERM. Mirrors the teacher's
/// `shutdown_signal` but reports which one fired so the process can choose
/// exit code 130 vs 143.
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    }
}

/// Grace period in-flight requests get before listeners are forcibly closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Re-exec this binary in background mode: detach stdio to `log_path`,
/// set [`CHILD_MODE_ENV`], and wait up to 5s for the child's status
/// endpoint to report ready before returning to the caller (the parent
/// CLI invocation).
pub async fn spawn_background(args: &[String], log_path: &Path, status_url: &str) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_file_err = log_file.try_clone()?;

    std::process::Command::new(exe)
        .args(args)
        .env(CHILD_MODE_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .spawn()?;

    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(status_url).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("daemon did not become ready within 5s");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub fn is_child_mode() -> bool {
    std::env::var(CHILD_MODE_ENV).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_lock_rejects_a_second_holder() {
        let dir = std::env::temp_dir().join(format!("zen-router-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("daemon.pid");
        let _lock = PidLock::acquire(&path).unwrap();
        assert!(PidLock::acquire(&path).is_err());
    }

    #[test]
    fn pid_lock_is_released_on_drop() {
        let dir = std::env::temp_dir().join(format!("zen-router-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("daemon.pid");
        {
            let _lock = PidLock::acquire(&path).unwrap();
        }
        let _second = PidLock::acquire(&path).unwrap();
    }

    #[test]
    fn shutdown_signal_maps_to_posix_exit_codes() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), ExitCode::SignalledInt);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), ExitCode::SignalledTerm);
    }
}
