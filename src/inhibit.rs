//! Keep the machine awake while a session is being driven.

use std::cell::{Cell, RefCell};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

pub trait SleepInhibitor {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Tracks the requested state without touching the system.
#[derive(Debug, Default)]
pub struct NoopInhibitor {
    active: bool,
}

impl NoopInhibitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SleepInhibitor for NoopInhibitor {
    fn start(&mut self) {
        self.active = true;
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Holds a platform inhibitor process (`systemd-inhibit` on Linux,
/// `caffeinate` on macOS) for as long as sleep must be prevented.
///
/// An inhibitor process that exits on its own is reaped the next time the
/// state is queried and is not respawned.
#[derive(Debug, Default)]
pub struct CommandInhibitor {
    child: RefCell<Option<Child>>,
    /// Spawning failed or the process died; do not retry on every activity
    unavailable: Cell<bool>,
}

impl CommandInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn command() -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("caffeinate");
            cmd.arg("-i");
            cmd
        } else {
            let mut cmd = Command::new("systemd-inhibit");
            cmd.args([
                "--what=idle:sleep",
                "--who=dialog-pilot",
                "--why=Driving an assistant CLI session",
                "--mode=block",
                "sleep",
                "infinity",
            ]);
            cmd
        }
    }

    fn spawn(&mut self, mut command: Command) {
        if self.child.get_mut().is_some() || self.unavailable.get() {
            return;
        }
        let spawned = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                info!("Sleep prevention started (pid {})", child.id());
                *self.child.get_mut() = Some(child);
            }
            Err(e) => {
                warn!("Failed to start sleep prevention: {}", e);
                self.unavailable.set(true);
            }
        }
    }
}

impl SleepInhibitor for CommandInhibitor {
    fn start(&mut self) {
        self.spawn(Self::command());
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.get_mut().take() else {
            return;
        };
        if let Err(e) = child.kill() {
            debug!("Failed to stop sleep inhibitor: {}", e);
        }
        let _ = child.wait();
        info!("Sleep prevention stopped");
    }

    fn is_active(&self) -> bool {
        let mut slot = self.child.borrow_mut();
        let Some(child) = slot.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("Sleep inhibitor exited unexpectedly ({})", status);
                *slot = None;
                self.unavailable.set(true);
                false
            }
            Err(e) => {
                debug!("Failed to poll sleep inhibitor: {}", e);
                true
            }
        }
    }
}

impl Drop for CommandInhibitor {
    fn drop(&mut self) {
        self.stop();
    }
}
