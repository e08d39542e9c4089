//! Graduated teardown of a run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use netlab_shared::errors::{NetlabError, NetlabResult};
use nix::sys::signal::Signal;
use rayon::prelude::*;

use super::{ProcessHandle, ProcessRegistry};
use crate::mux::Multiplexer;
use crate::runtime::constants::timing;
use crate::runtime::workspace::Workspace;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Normal terminal state: the operator ended the interactive phase.
    Completed,
    /// Startup or supervision failed.
    Failed(String),
    /// A signal or the operator cut the run short.
    Interrupted(String),
}

impl RunOutcome {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, RunOutcome::Completed)
    }

    /// The error an abnormal outcome ends the run with.
    pub fn into_result(self) -> NetlabResult<()> {
        match self {
            RunOutcome::Completed => Ok(()),
            RunOutcome::Failed(reason) => Err(NetlabError::Engine(reason)),
            RunOutcome::Interrupted(reason) => Err(NetlabError::Interrupted(reason)),
        }
    }
}

/// Operator acknowledgment before tearing down an abnormal run.
pub trait OperatorPrompt: Send {
    fn acknowledge(&mut self, message: &str);
}

/// Logs the message and continues (headless runs, tests).
#[derive(Debug, Default)]
pub struct NoPrompt;

impl OperatorPrompt for NoPrompt {
    fn acknowledge(&mut self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// What teardown did.
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    /// Handles that received SIGTERM.
    pub signalled: Vec<String>,
    /// Handles that needed SIGKILL.
    pub killed: Vec<String>,
    /// Per-step failures; teardown continued past each of them.
    pub failures: Vec<String>,
    pub workspace_removed: bool,
    pub session_killed: bool,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns everything a run allocates and reclaims it exactly once.
///
/// Built the moment the workspace exists. If [`teardown`](Self::teardown)
/// is never called, `Drop` runs it with an abnormal outcome.
pub struct CleanupCoordinator {
    workspace: Workspace,
    registry: ProcessRegistry,
    multiplexer: Option<Arc<dyn Multiplexer>>,
    prompt: Box<dyn OperatorPrompt>,
    grace_period: Duration,
    reap_timeout: Duration,
    completed: bool,
    done: bool,
}

impl CleanupCoordinator {
    pub fn new(workspace: Workspace, prompt: Box<dyn OperatorPrompt>) -> Self {
        Self {
            workspace,
            registry: ProcessRegistry::new(),
            multiplexer: None,
            prompt,
            grace_period: Duration::from_millis(timing::GRACE_PERIOD_MS),
            reap_timeout: Duration::from_millis(timing::REAP_TIMEOUT_MS),
            completed: false,
            done: false,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Session to kill as the last teardown step.
    pub fn with_multiplexer(mut self, multiplexer: Arc<dyn Multiplexer>) -> Self {
        self.multiplexer = Some(multiplexer);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProcessRegistry {
        &mut self.registry
    }

    /// Record that the run reached its normal terminal state.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reclaim every handle, the workspace and the session.
    ///
    /// Runs once; later calls return an empty report.
    pub fn teardown(&mut self, outcome: &RunOutcome) -> TeardownReport {
        if self.done {
            return TeardownReport::default();
        }
        self.done = true;

        let mut report = TeardownReport::default();

        if outcome.is_abnormal() && !self.completed {
            let message = match outcome {
                RunOutcome::Failed(reason) => format!("netlab: run failed: {}", reason),
                RunOutcome::Interrupted(reason) => format!("netlab: run interrupted: {}", reason),
                RunOutcome::Completed => String::new(),
            };
            self.prompt.acknowledge(&message);
        }

        tracing::info!(
            handles = self.registry.len(),
            outcome = ?outcome,
            "Tearing down lab"
        );

        let handles = self.registry.handles_mut();

        // Graceful
        for handle in handles.iter_mut() {
            if !handle.is_alive() {
                continue;
            }
            match handle.signal(Signal::SIGTERM) {
                Ok(true) => report.signalled.push(handle.label().to_string()),
                Ok(false) => {}
                Err(e) => report
                    .failures
                    .push(format!("{}: SIGTERM failed: {}", handle.label(), e)),
            }
        }

        if !report.signalled.is_empty() {
            wait_all_exited(handles, self.grace_period);
        }

        // Escalate
        for handle in handles.iter_mut() {
            if !handle.is_alive() {
                continue;
            }
            match handle.signal(Signal::SIGKILL) {
                Ok(true) => {
                    tracing::warn!(label = %handle.label(), pid = handle.pid(), "Killed after grace period");
                    report.killed.push(handle.label().to_string());
                }
                Ok(false) => {}
                Err(e) => report
                    .failures
                    .push(format!("{}: SIGKILL failed: {}", handle.label(), e)),
            }
        }

        // Reap concurrently so one stuck process cannot hold up the rest
        let reap_timeout = self.reap_timeout;
        let stuck: Vec<String> = handles
            .par_iter_mut()
            .filter_map(|handle| {
                if handle.reap(reap_timeout) {
                    None
                } else {
                    Some(format!(
                        "{}: pid {} still alive after SIGKILL",
                        handle.label(),
                        handle.pid()
                    ))
                }
            })
            .collect();
        report.failures.extend(stuck);

        match self.workspace.destroy() {
            Ok(()) => report.workspace_removed = true,
            Err(e) => report.failures.push(e.to_string()),
        }

        if let Some(multiplexer) = &self.multiplexer {
            match multiplexer.kill_session() {
                Ok(()) => report.session_killed = multiplexer.session().is_some(),
                Err(e) => report.failures.push(e.to_string()),
            }
        }

        if report.is_clean() {
            tracing::info!(
                signalled = report.signalled.len(),
                killed = report.killed.len(),
                "Teardown complete"
            );
        } else {
            for failure in &report.failures {
                tracing::error!("Teardown: {}", failure);
            }
        }

        report
    }
}

impl Drop for CleanupCoordinator {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::warn!("Lab dropped without explicit teardown, cleaning up");
        let _ = self.teardown(&RunOutcome::Interrupted(
            "supervisor exited before teardown".into(),
        ));
    }
}

fn wait_all_exited(handles: &mut [ProcessHandle], timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(timing::POLL_INTERVAL_MS);

    while Instant::now() < deadline {
        if handles.iter_mut().all(|h| !h.is_alive()) {
            return;
        }
        std::thread::sleep(poll);
    }
}
