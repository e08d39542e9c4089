//! Process utilities: PID files, liveness checks and signal delivery.

use netlab_shared::errors::{NetlabError, NetlabResult};
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use std::path::Path;

/// Read PID from file.
///
/// The file contains a PID as a decimal string, optionally with a trailing newline.
pub fn read_pid_file(path: &Path) -> NetlabResult<u32> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NetlabError::Storage(format!("Failed to read PID file {}: {}", path.display(), e))
    })?;

    content.trim().parse::<u32>().map_err(|e| {
        NetlabError::Storage(format!(
            "Invalid PID in file {}: '{}' - {}",
            path.display(),
            content.trim(),
            e
        ))
    })
}

/// Write PID to file, newline terminated.
///
/// PID files are an introspection aid for operators; the registry keeps the
/// authoritative handle in memory.
pub fn write_pid_file(path: &Path, pid: u32) -> NetlabResult<()> {
    std::fs::write(path, format!("{}\n", pid)).map_err(|e| {
        NetlabError::Storage(format!("Failed to write PID file {}: {}", path.display(), e))
    })
}

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`. Zombies still count as existing; callers that own
/// the child should reap it instead of relying on this.
pub fn is_process_alive(pid: u32) -> bool {
    match to_pid(pid) {
        Some(pid) => kill(pid, None).is_ok(),
        None => false,
    }
}

/// Send a signal to a process group, or to a single process when
/// `process_group` is false.
///
/// `ESRCH` (already gone) is reported as `Ok(false)`.
pub fn signal(pid: u32, process_group: bool, sig: Signal) -> NetlabResult<bool> {
    let target = to_pid(pid)
        .ok_or_else(|| NetlabError::InvalidState(format!("refusing to signal pid {}", pid)))?;

    let result = if process_group {
        killpg(target, sig)
    } else {
        kill(target, sig)
    };

    match result {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(NetlabError::Engine(format!(
            "Failed to send {:?} to {} {}: {}",
            sig,
            if process_group { "process group" } else { "pid" },
            pid,
            e
        ))),
    }
}

/// Reject PIDs that would address more than one process (0, negatives after cast).
fn to_pid(pid: u32) -> Option<Pid> {
    let raw = i32::try_from(pid).ok()?;
    if raw <= 0 {
        return None;
    }
    Some(Pid::from_raw(raw))
}
