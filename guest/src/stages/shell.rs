//! INTERACTIVE_SHELL: one login shell per pass, re-entered forever.

use std::path::PathBuf;
use std::time::Duration;

use netlab_shared::errors::NetlabResult;

use crate::fsm::{BootContext, Stage, Transition};
use crate::ops::{GuestOps, ShellSpec};

const SHELL: &str = "/bin/sh";
const RESPAWN_PAUSE: Duration = Duration::from_secs(1);

pub fn run<O: GuestOps>(ctx: &mut BootContext, ops: &mut O) -> NetlabResult<Transition> {
    ops.print(&banner(ctx));

    let spec = shell_spec(ctx);
    match ops.run_shell(&spec) {
        Ok(code) => tracing::debug!(code, "Shell exited"),
        Err(e) => tracing::warn!("{}", e),
    }

    ops.sleep(RESPAWN_PAUSE);
    ctx.shell_runs += 1;
    Ok(Transition::Continue(Stage::InteractiveShell))
}

fn shell_spec(ctx: &BootContext) -> ShellSpec {
    let params = ctx.params.as_ref();
    ShellSpec {
        program: PathBuf::from(SHELL),
        args: vec!["-l".to_string()],
        uid: params.and_then(|p| p.uid),
        gid: params.and_then(|p| p.gid),
        home: params
            .and_then(|p| p.home.clone())
            .unwrap_or_else(|| PathBuf::from("/")),
        path: super::shell_path(),
    }
}

fn banner(ctx: &BootContext) -> String {
    let node = ctx
        .params
        .as_ref()
        .map(|p| format!("{} ({})", p.node, p.role))
        .unwrap_or_else(|| "netlab node".to_string());
    let mut text = format!("\n{}\n", node);
    if ctx.is_degraded() {
        text.push_str(
            "WARNING: root filesystem is a read-only bind of the host root; \
             only exported directories are writable\n",
        );
    }
    text
}
