use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::{Duration, Instant};

use netlab_shared::errors::NetlabResult;
use nix::sys::signal::Signal;

use crate::runtime::constants::timing;
use crate::runtime::layout::ProcessRole;
use crate::util;

/// Reclaimable reference to a supervised process.
///
/// Works for processes we spawned directly (owned [`Child`], reaped with
/// `wait`) and for processes started on our behalf by a multiplexer
/// (PID only, reaped by their real parent).
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    role: ProcessRole,
    pid: u32,
    pid_file: PathBuf,
    /// Signals go to the whole process group led by `pid`.
    process_group: bool,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Handle for a process we spawned and own.
    pub fn from_child(
        label: impl Into<String>,
        role: ProcessRole,
        child: Child,
        pid_file: PathBuf,
        process_group: bool,
    ) -> Self {
        Self {
            label: label.into(),
            role,
            pid: child.id(),
            pid_file,
            process_group,
            child: Some(child),
        }
    }

    /// Handle for a process known by PID only.
    pub fn from_pid(
        label: impl Into<String>,
        role: ProcessRole,
        pid: u32,
        pid_file: PathBuf,
        process_group: bool,
    ) -> Self {
        Self {
            label: label.into(),
            role,
            pid,
            pid_file,
            process_group,
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn process_group(&self) -> bool {
        self.process_group
    }

    pub fn owns_child(&self) -> bool {
        self.child.is_some()
    }

    /// Whether the process is still running.
    ///
    /// An owned child that exited is reaped here.
    pub fn is_alive(&mut self) -> bool {
        if let Some(child) = self.child.as_mut() {
            return match child.try_wait() {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(_) => util::is_process_alive(self.pid),
            };
        }
        util::is_process_alive(self.pid)
    }

    /// Send `signal`. Returns `Ok(false)` if the process is already gone.
    pub fn signal(&self, signal: Signal) -> NetlabResult<bool> {
        util::signal(self.pid, self.process_group, signal)
    }

    /// Wait for the process to exit, up to `timeout`.
    ///
    /// Returns true if the process is gone.
    pub fn reap(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(timing::POLL_INTERVAL_MS);

        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll);
        }
    }
}
