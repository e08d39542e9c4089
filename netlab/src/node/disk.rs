//! Appliance disk preparation.
//!
//! Each appliance boots from a private copy-on-write overlay on top of its
//! shared base image. The per-node seed configuration is written into the
//! overlay offline, before the emulator starts.

use std::ffi::OsStr;
use std::path::Path;

use netlab_shared::errors::{NetlabError, NetlabResult};

use crate::controller::run_tool;

/// Disk format of a base image, from its file extension. Unknown extensions are qcow2.
pub fn backing_format(base: &Path) -> &'static str {
    let extension = base
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("vmdk") => "vmdk",
        Some("raw") | Some("img") => "raw",
        Some("vdi") => "vdi",
        Some("vhdx") => "vhdx",
        Some("vpc") | Some("vhd") => "vpc",
        _ => "qcow2",
    }
}

/// Create a qcow2 overlay at `overlay` backed by `base` of format `base_format`.
pub fn create_overlay(
    qemu_img: &Path,
    base: &Path,
    base_format: &str,
    overlay: &Path,
) -> NetlabResult<()> {
    if !base.is_file() {
        return Err(NetlabError::NotFound(format!(
            "Appliance base image not found: {}",
            base.display()
        )));
    }

    tracing::debug!(
        base = %base.display(),
        format = base_format,
        overlay = %overlay.display(),
        "Creating appliance overlay"
    );

    run_tool(
        qemu_img,
        [
            OsStr::new("create"),
            OsStr::new("-f"),
            OsStr::new("qcow2"),
            OsStr::new("-F"),
            OsStr::new(base_format),
            OsStr::new("-b"),
            base.as_os_str(),
            overlay.as_os_str(),
        ],
    )
    .map_err(|e| {
        NetlabError::Storage(format!(
            "Failed to create overlay {}: {}",
            overlay.display(),
            e
        ))
    })?;

    Ok(())
}

/// Copy `seed` into the directory `dest` of the disk image `disk`.
pub fn inject_seed(injector: &Path, disk: &Path, seed: &Path, dest: &str) -> NetlabResult<()> {
    if !seed.is_file() {
        return Err(NetlabError::NotFound(format!(
            "Seed configuration not found: {}",
            seed.display()
        )));
    }

    run_tool(
        injector,
        [
            OsStr::new("-a"),
            disk.as_os_str(),
            seed.as_os_str(),
            OsStr::new(dest),
        ],
    )
    .map_err(|e| {
        NetlabError::Storage(format!(
            "Failed to inject {} into {}: {}",
            seed.display(),
            disk.display(),
            e
        ))
    })?;

    tracing::debug!(seed = %seed.display(), disk = %disk.display(), dest, "Injected seed");
    Ok(())
}
