//! INTERACTIVE_SETUP: terminal size and power controls on the new console.

use std::path::Path;

use netlab_shared::errors::NetlabResult;

use crate::fsm::{BootContext, Stage, Transition};
use crate::mounts;
use crate::ops::GuestOps;
use crate::power;
use crate::terminal;

/// Nodes with boot parameters go through TOPOLOGY_CONFIG, which installs
/// the power controls when it is done.
pub fn run<O: GuestOps>(ctx: &mut BootContext, ops: &mut O) -> NetlabResult<Transition> {
    let (rows, cols) = terminal::negotiate(ops);
    if let Err(e) = ops.set_window_size(rows, cols) {
        tracing::warn!("{}", e);
    }
    tracing::debug!(rows, cols, "Terminal size");

    if ctx.params.is_some() {
        return Ok(Transition::Continue(Stage::TopologyConfig));
    }

    install_power_controls(ctx, ops)?;
    Ok(Transition::Continue(Stage::InteractiveShell))
}

/// Put request scripts in place of the system's power commands.
///
/// Regular files are covered with a bind mount. Symlinks (usually into an
/// init system's control tool) are replaced on a writable root and left
/// alone on a read-only one. Once installed, later calls do nothing.
pub fn install_power_controls<O: GuestOps>(ctx: &BootContext, ops: &mut O) -> NetlabResult<()> {
    let layout = super::run_layout();
    let bin = layout.bin_dir();
    let fifo = layout.power_fifo();

    if ops.exists(&bin.join(power::POWER_COMMANDS[0])) {
        tracing::debug!(dir = %bin.display(), "Power controls already installed");
        return Ok(());
    }

    ops.create_dir_all(&bin)?;
    for command in power::POWER_COMMANDS {
        let script = bin.join(command);
        let body = power::request_script(command, &fifo);
        ops.write_file(&script, &body, Some(0o755))?;

        for dir in super::SEARCH_PATH {
            let target = Path::new(dir).join(command);
            if ops.is_symlink(&target) {
                if ctx.is_degraded() {
                    tracing::warn!(
                        command = %target.display(),
                        "Symlinked power command on a read-only root, only PATH shadows it"
                    );
                    continue;
                }
                ops.remove_file(&target)?;
                ops.write_file(&target, &body, Some(0o755))?;
            } else if ops.exists(&target) {
                ops.mount(&mounts::bind(&script, &target))?;
            }
        }
    }

    tracing::debug!(dir = %bin.display(), fifo = %fifo.display(), "Power controls installed");
    Ok(())
}
