use std::path::{Path, PathBuf};

use netlab_shared::errors::{NetlabError, NetlabResult};

use super::{Multiplexer, PaneProcess};
use crate::controller::run_tool;

/// tmux session hosting one window per node.
#[derive(Debug, Clone)]
pub struct Tmux {
    binary: PathBuf,
    session: String,
}

impl Tmux {
    pub fn new(binary: PathBuf, session: impl Into<String>) -> Self {
        Self {
            binary,
            session: session.into(),
        }
    }

    /// Attach to the session the current process runs in (`$TMUX` set).
    pub fn current(binary: PathBuf) -> NetlabResult<Self> {
        if std::env::var_os("TMUX").is_none() {
            return Err(NetlabError::Multiplexer(
                "not running inside a tmux session".into(),
            ));
        }

        let session = run_tool(&binary, ["display-message", "-p", "#S"])
            .map_err(|e| NetlabError::Multiplexer(format!("Failed to query session: {}", e)))?;
        let session = session.trim();
        if session.is_empty() {
            return Err(NetlabError::Multiplexer(
                "tmux reported an empty session name".into(),
            ));
        }

        Ok(Self::new(binary, session))
    }
}

impl Multiplexer for Tmux {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn session(&self) -> Option<&str> {
        Some(&self.session)
    }

    fn open_window(&self, window: &str, script: &Path, _log: &Path) -> NetlabResult<PaneProcess> {
        let target = format!("{}:", self.session);
        let script = script.to_string_lossy();

        let out = run_tool(
            &self.binary,
            [
                "new-window",
                "-d",
                "-P",
                "-F",
                "#{pane_pid}",
                "-t",
                target.as_str(),
                "-n",
                window,
                &*script,
            ],
        )
        .map_err(|e| NetlabError::Multiplexer(format!("Failed to open window '{}': {}", window, e)))?;

        let pid = parse_pane_pid(&out)?;
        tracing::debug!(window, pid, session = %self.session, "Opened tmux window");

        Ok(PaneProcess { pid, child: None })
    }

    fn kill_session(&self) -> NetlabResult<()> {
        run_tool(&self.binary, ["kill-session", "-t", self.session.as_str()])
            .map(|_| ())
            .map_err(|e| {
                NetlabError::Multiplexer(format!(
                    "Failed to kill session '{}': {}",
                    self.session, e
                ))
            })
    }
}

fn parse_pane_pid(output: &str) -> NetlabResult<u32> {
    output.trim().parse::<u32>().map_err(|_| {
        NetlabError::Multiplexer(format!(
            "unexpected pane pid output: '{}'",
            output.trim()
        ))
    })
}
