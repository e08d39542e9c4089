//! Power requests from interactive shells.
//!
//! Shells run as the operator, who cannot write `/proc/sysrq-trigger`.
//! `reboot`, `halt` and `poweroff` are replaced by scripts that write their
//! own name to a FIFO; the console supervisor, still root, reads it and
//! asks the kernel to stop.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use netlab_shared::errors::{NetlabError, NetlabResult};
use nix::errno::Errno;
use nix::sys::stat::Mode;

use crate::ops::{GuestOps, LinuxOps};

pub const SYSRQ_TRIGGER: &str = "/proc/sysrq-trigger";

/// Commands replaced by request scripts.
pub const POWER_COMMANDS: &[&str] = &["reboot", "halt", "poweroff"];

/// Any local user may file a request; only the supervisor reads them.
const FIFO_MODE: u32 = 0o622;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    PowerOff,
}

impl PowerAction {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "reboot" => Some(PowerAction::Reboot),
            "halt" | "poweroff" => Some(PowerAction::PowerOff),
            _ => None,
        }
    }

    /// sysrq key performing the action.
    pub fn sysrq_key(&self) -> char {
        match self {
            PowerAction::Reboot => 'b',
            PowerAction::PowerOff => 'o',
        }
    }
}

/// Body of the script standing in for `command`.
pub fn request_script(command: &str, fifo: &Path) -> String {
    format!("#!/bin/sh\necho {} > {}\n", command, fifo.display())
}

/// Act on one request line. Unknown requests are logged and ignored.
pub fn handle_request<O: GuestOps>(line: &str, ops: &mut O) -> NetlabResult<Option<PowerAction>> {
    let command = line.trim();
    let Some(action) = PowerAction::from_command(command) else {
        if !command.is_empty() {
            tracing::warn!(request = command, "Ignoring unknown power request");
        }
        return Ok(None);
    };

    tracing::warn!(request = command, "Stopping the node");
    let trigger = Path::new(SYSRQ_TRIGGER);
    // Emergency sync first
    ops.write_file(trigger, "s\n", None)?;
    ops.write_file(trigger, &format!("{}\n", action.sysrq_key()), None)?;
    Ok(Some(action))
}

/// Serve requests until the reader ends.
pub fn serve<R: BufRead, O: GuestOps>(reader: R, ops: &mut O) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if let Err(e) = handle_request(&line, ops) {
                    tracing::error!("{}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Power request channel closed: {}", e);
                break;
            }
        }
    }
}

/// Create the request FIFO and serve it from a background thread.
pub fn spawn_listener(fifo: &Path) -> NetlabResult<()> {
    match nix::unistd::mkfifo(fifo, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(e) => {
            return Err(NetlabError::Boot(format!(
                "Failed to create {}: {}",
                fifo.display(),
                e
            )));
        }
    }
    std::fs::set_permissions(fifo, std::fs::Permissions::from_mode(FIFO_MODE)).map_err(|e| {
        NetlabError::Boot(format!("Failed to chmod {}: {}", fifo.display(), e))
    })?;

    // Read-write keeps a writer open, so the reader never sees end of file
    let channel = OpenOptions::new()
        .read(true)
        .write(true)
        .open(fifo)
        .map_err(|e| NetlabError::Boot(format!("Failed to open {}: {}", fifo.display(), e)))?;

    std::thread::Builder::new()
        .name("power".into())
        .spawn(move || serve(BufReader::new(channel), &mut LinuxOps))
        .map_err(|e| NetlabError::Boot(format!("Failed to start power listener: {}", e)))?;

    tracing::debug!(fifo = %fifo.display(), "Serving power requests");
    Ok(())
}
