//! Terminal multiplexer backends hosting node consoles.
//!
//! A run places each node in its own window of one session; teardown kills
//! the session last. Headless runs use [`Detached`], which starts the same
//! launch scripts as plain background process groups with output logged
//! to the workspace.

mod detached;
mod tmux;

pub use detached::Detached;
pub use tmux::Tmux;

use std::path::Path;
use std::process::Child;

use netlab_shared::errors::NetlabResult;

use crate::topology::LabPlan;

/// Process started in a multiplexer window.
#[derive(Debug)]
pub struct PaneProcess {
    /// Leader of the window's process group.
    pub pid: u32,
    /// Present when the backend spawned the process itself.
    pub child: Option<Child>,
}

pub trait Multiplexer: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Session hosting the run, if any.
    fn session(&self) -> Option<&str>;

    /// Start `script` in a new window called `window`.
    ///
    /// `log` receives the output when the backend has no terminal to show it on.
    fn open_window(&self, window: &str, script: &Path, log: &Path) -> NetlabResult<PaneProcess>;

    /// Terminate the session and every window still in it.
    fn kill_session(&self) -> NetlabResult<()>;
}

/// Operator help shown before the interactive phase.
pub fn help_text(plan: &LabPlan, mux: &dyn Multiplexer) -> String {
    let mut text = String::new();
    text.push_str("netlab: lab is running\n\n");

    match mux.session() {
        Some(session) => {
            text.push_str(&format!("Session: {}\n", session));
            text.push_str("  Ctrl-b n / Ctrl-b p   next / previous window\n");
            text.push_str("  Ctrl-b w              choose a window from a list\n");
            text.push_str("  Ctrl-b <number>       jump to window\n\n");
        }
        None => text.push_str("Nodes run detached; consoles are logged in the workspace.\n\n"),
    }

    text.push_str("Nodes:\n");
    for node in &plan.nodes {
        let segments: Vec<&str> = node.attachments.iter().map(|a| a.segment.as_str()).collect();
        text.push_str(&format!(
            "  {:<12} {:<9} {:<6} segments {}\n",
            node.name,
            node.flavor,
            node.role,
            segments.join(",")
        ));
    }

    text.push_str("\nInside a guest, 'poweroff' or 'reboot' acts on that node only.\n");
    text.push_str("Press Enter here to tear the lab down.\n");
    text
}
