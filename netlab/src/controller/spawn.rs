//! Subprocess spawning for supervised processes and one-shot host tools.

use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use netlab_shared::errors::{NetlabError, NetlabResult};

/// Spawn a long-lived process as the leader of a new process group.
///
/// Stdin is detached so the child cannot steal the operator's terminal.
/// The child inherits `RUST_LOG`.
pub(crate) fn spawn_process<I, S>(
    binary: &Path,
    args: I,
    stdout: Stdio,
    stderr: Stdio,
) -> NetlabResult<Child>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0);

    cmd.spawn().map_err(|e| {
        NetlabError::Engine(format!(
            "Failed to spawn {}: {}",
            binary.display(),
            e
        ))
    })
}

/// Run a host tool to completion and return its stdout.
///
/// A non-zero exit is an error carrying the tool's stderr.
pub(crate) fn run_tool<I, S>(binary: &Path, args: I) -> NetlabResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            NetlabError::Engine(format!("Failed to run {}: {}", binary.display(), e))
        })?;

    if !output.status.success() {
        return Err(NetlabError::Engine(format!(
            "{} failed ({}): {}",
            binary.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
