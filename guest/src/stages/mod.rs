//! Boot stages. Each takes the context and returns the next transition.

pub mod privilege;
pub mod ramdisk;
pub mod setup;
pub mod shell;
pub mod topology;

use std::path::{Path, PathBuf};

use netlab_shared::layout::{GuestRunLayout, RamdiskLayout};

use crate::ops::GuestOps;

/// Directories searched for optional programs.
const SEARCH_PATH: &[&str] = &["/bin", "/sbin", "/usr/bin", "/usr/sbin"];

pub fn ramdisk_layout() -> RamdiskLayout {
    RamdiskLayout::default()
}

pub fn run_layout() -> GuestRunLayout {
    GuestRunLayout::default()
}

/// `PATH` for interactive shells, power-control replacements first.
pub fn shell_path() -> String {
    let mut dirs = vec![run_layout().bin_dir().to_string_lossy().into_owned()];
    dirs.extend(SEARCH_PATH.iter().map(|d| d.to_string()));
    dirs.join(":")
}

/// Locate an optional program.
pub fn find_program<O: GuestOps>(ops: &mut O, name: &str) -> Option<PathBuf> {
    SEARCH_PATH
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|path| ops.exists(path))
}

/// Start an optional daemon if its program is installed.
pub fn start_optional<O: GuestOps>(ops: &mut O, name: &str, args: &[&str]) -> bool {
    let Some(program) = find_program(ops, name) else {
        tracing::debug!(program = name, "Not installed, skipping");
        return false;
    };
    match ops.run(&program, args) {
        Ok(()) => {
            tracing::info!(program = name, "Started");
            true
        }
        Err(e) => {
            tracing::warn!(program = name, "{}", e);
            false
        }
    }
}

/// Whether a process with this command name is running.
pub fn is_running<O: GuestOps>(ops: &mut O, name: &str) -> bool {
    let Ok(entries) = ops.list_dir(Path::new("/proc")) else {
        return false;
    };
    entries
        .iter()
        .filter(|entry| entry.bytes().all(|b| b.is_ascii_digit()))
        .any(|pid| {
            let comm = Path::new("/proc").join(pid).join("comm");
            ops.read_file(&comm)
                .map(|text| text.trim() == name)
                .unwrap_or(false)
        })
}
