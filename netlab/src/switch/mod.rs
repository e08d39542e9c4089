//! Virtual switches, one process per network segment.

mod config;

pub use config::{render_rc, switch_args};

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use netlab_shared::errors::{NetlabError, NetlabResult};

use crate::controller::{ProcessHandle, ProcessRegistry, spawn_process};
use crate::runtime::constants::timing;
use crate::runtime::layout::{ProcessRole, WorkspaceLayout};
use crate::util;

/// An isolated broadcast domain realised by one switch process.
///
/// Immutable once started; destroyed only at teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSegment {
    pub id: String,
    /// Control socket nodes attach to.
    pub ctl: PathBuf,
    pub mgmt: PathBuf,
    pub capture: PathBuf,
    pub rc: PathBuf,
    pub pid_file: PathBuf,
}

impl NetworkSegment {
    pub fn new(id: &str, layout: &WorkspaceLayout) -> Self {
        Self {
            id: id.to_string(),
            ctl: layout.switch_ctl(id),
            mgmt: layout.switch_mgmt(id),
            capture: layout.switch_capture(id),
            rc: layout.switch_rc(id),
            pid_file: layout.pid_file(ProcessRole::Switch, id),
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", ProcessRole::Switch, self.id)
    }
}

/// Starts and tracks the switch of every segment.
pub struct SwitchSupervisor {
    binary: PathBuf,
    layout: WorkspaceLayout,
    ready_timeout: Duration,
    segments: BTreeMap<String, NetworkSegment>,
}

impl SwitchSupervisor {
    pub fn new(binary: PathBuf, layout: WorkspaceLayout, ready_timeout: Duration) -> Self {
        Self {
            binary,
            layout,
            ready_timeout,
            segments: BTreeMap::new(),
        }
    }

    pub fn segment(&self, id: &str) -> Option<&NetworkSegment> {
        self.segments.get(id)
    }

    pub fn segments(&self) -> impl Iterator<Item = &NetworkSegment> {
        self.segments.values()
    }

    /// Start the switch for segment `id`.
    ///
    /// The handle is registered before waiting for the control socket, so a
    /// switch that never becomes ready is still reclaimed at teardown.
    pub fn start_segment(
        &mut self,
        id: &str,
        registry: &mut ProcessRegistry,
    ) -> NetlabResult<&NetworkSegment> {
        if self.segments.contains_key(id) {
            return Err(NetlabError::AlreadyExists(format!(
                "segment '{}' already has a switch",
                id
            )));
        }

        let segment = NetworkSegment::new(id, &self.layout);

        std::fs::write(&segment.rc, render_rc(&segment.capture)).map_err(|e| {
            NetlabError::Storage(format!(
                "Failed to write switch rc {}: {}",
                segment.rc.display(),
                e
            ))
        })?;

        let log_path = self.layout.switch_log(id);
        let log = File::create(&log_path).map_err(|e| {
            NetlabError::Storage(format!("Failed to create {}: {}", log_path.display(), e))
        })?;
        let log_err = log.try_clone().map_err(|e| {
            NetlabError::Storage(format!("Failed to clone {}: {}", log_path.display(), e))
        })?;

        let child = spawn_process(
            &self.binary,
            switch_args(&segment),
            Stdio::from(log),
            Stdio::from(log_err),
        )?;
        let pid = child.id();

        let label = segment.label();
        let handle = ProcessHandle::from_child(
            label.as_str(),
            ProcessRole::Switch,
            child,
            segment.pid_file.clone(),
            true,
        );
        registry.adopt(handle)?;
        util::write_pid_file(&segment.pid_file, pid)?;

        tracing::info!(segment = %id, pid, "Switch started");

        self.wait_ready(&segment, &label, registry)?;

        Ok(self.segments.entry(id.to_string()).or_insert(segment))
    }

    /// Wait for the control socket, failing early if the switch exits.
    fn wait_ready(
        &self,
        segment: &NetworkSegment,
        label: &str,
        registry: &mut ProcessRegistry,
    ) -> NetlabResult<()> {
        let deadline = Instant::now() + self.ready_timeout;
        let poll = Duration::from_millis(timing::POLL_INTERVAL_MS);

        loop {
            if segment.ctl.exists() {
                tracing::debug!(segment = %segment.id, ctl = %segment.ctl.display(), "Switch ready");
                return Ok(());
            }

            let alive = registry
                .get_mut(label)
                .map(|h| h.is_alive())
                .unwrap_or(false);
            if !alive {
                return Err(NetlabError::Engine(format!(
                    "Switch for segment '{}' exited before creating {} (see {})",
                    segment.id,
                    segment.ctl.display(),
                    self.layout.switch_log(&segment.id).display()
                )));
            }

            if Instant::now() >= deadline {
                return Err(NetlabError::Engine(format!(
                    "Switch for segment '{}' did not create {} within {:?}",
                    segment.id,
                    segment.ctl.display(),
                    self.ready_timeout
                )));
            }

            std::thread::sleep(poll);
        }
    }
}
