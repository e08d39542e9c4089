use std::time::Duration;

use netlab_shared::errors::{NetlabError, NetlabResult};
use nix::sys::signal::Signal;

use super::ProcessHandle;
use crate::runtime::constants::timing;

/// A handle the registry refused, handed back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub error: NetlabError,
    pub handle: ProcessHandle,
}

impl Rejected {
    /// Kill and reap the refused process, returning the rejection error.
    pub fn reclaim(mut self) -> NetlabError {
        tracing::warn!(
            label = %self.handle.label(),
            pid = self.handle.pid(),
            "Killing process whose handle was rejected"
        );
        if let Err(e) = self.handle.signal(Signal::SIGKILL) {
            tracing::warn!(label = %self.handle.label(), "{}", e);
        }
        if !self
            .handle
            .reap(Duration::from_millis(timing::REAP_TIMEOUT_MS))
        {
            tracing::error!(
                label = %self.handle.label(),
                pid = self.handle.pid(),
                "Rejected process did not exit after SIGKILL"
            );
        }
        self.error
    }
}

/// Single authority for what was started during a run.
///
/// Append-only: handles are never removed before teardown, and a second
/// handle for the same PID or label is rejected.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    handles: Vec<ProcessHandle>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. A conflicting handle is given back untouched.
    pub fn register(&mut self, handle: ProcessHandle) -> Result<(), Rejected> {
        if let Some(existing) = self
            .handles
            .iter()
            .find(|h| h.pid() == handle.pid() || h.label() == handle.label())
        {
            let error = NetlabError::AlreadyExists(format!(
                "process handle '{}' (pid {}) conflicts with registered '{}' (pid {})",
                handle.label(),
                handle.pid(),
                existing.label(),
                existing.pid()
            ));
            return Err(Rejected { error, handle });
        }

        tracing::debug!(
            label = %handle.label(),
            pid = handle.pid(),
            role = %handle.role(),
            "Registered process handle"
        );
        self.handles.push(handle);
        Ok(())
    }

    /// Register the handle of a process that is already running.
    ///
    /// If the handle is rejected the process is killed and reaped before
    /// the error is returned, so nothing started stays unregistered.
    pub fn adopt(&mut self, handle: ProcessHandle) -> NetlabResult<()> {
        self.register(handle).map_err(Rejected::reclaim)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&ProcessHandle> {
        self.handles.iter().find(|h| h.label() == label)
    }

    pub(crate) fn get_mut(&mut self, label: &str) -> Option<&mut ProcessHandle> {
        self.handles.iter_mut().find(|h| h.label() == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.handles.iter()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.handles.iter().map(|h| h.pid()).collect()
    }

    /// Mutable access for teardown only.
    pub(crate) fn handles_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.handles
    }
}
