//! Mount specifications used while assembling the guest root.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use crate::ops::MountSpec;

/// 9p options for every passthrough channel.
const NINEP_OPTIONS: &str = "trans=virtio,version=9p2000.L,msize=262144";

/// Kernel pseudo filesystems mounted first thing, moved into the new root later.
pub const PSEUDO_FILESYSTEMS: &[(&str, &str)] = &[
    ("proc", "/proc"),
    ("sysfs", "/sys"),
    ("devtmpfs", "/dev"),
];

pub fn pseudo(fstype: &str, target: &str) -> MountSpec {
    MountSpec {
        source: fstype.to_string(),
        target: PathBuf::from(target),
        fstype: Some(fstype.to_string()),
        flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        data: None,
    }
}

pub fn ninep(tag: &str, target: &Path, read_only: bool) -> MountSpec {
    let mut flags = MsFlags::empty();
    if read_only {
        flags |= MsFlags::MS_RDONLY;
    }
    MountSpec {
        source: tag.to_string(),
        target: target.to_path_buf(),
        fstype: Some("9p".into()),
        flags,
        data: Some(NINEP_OPTIONS.into()),
    }
}

pub fn tmpfs(target: &Path, mode: &str) -> MountSpec {
    MountSpec {
        source: "tmpfs".into(),
        target: target.to_path_buf(),
        fstype: Some("tmpfs".into()),
        flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        data: Some(format!("mode={}", mode)),
    }
}

pub fn overlay(lower: &Path, upper: &Path, work: &Path, target: &Path) -> MountSpec {
    MountSpec {
        source: "overlay".into(),
        target: target.to_path_buf(),
        fstype: Some("overlay".into()),
        flags: MsFlags::empty(),
        data: Some(format!(
            "lowerdir={},upperdir={},workdir={}",
            lower.display(),
            upper.display(),
            work.display()
        )),
    }
}

/// Read-only bind: a plain bind followed by a read-only remount.
pub fn read_only_bind(source: &Path, target: &Path) -> [MountSpec; 2] {
    let bind = MountSpec {
        source: source.to_string_lossy().into_owned(),
        target: target.to_path_buf(),
        fstype: None,
        flags: MsFlags::MS_BIND | MsFlags::MS_REC,
        data: None,
    };
    let remount = MountSpec {
        flags: MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        ..bind.clone()
    };
    [bind, remount]
}

/// Plain bind of a single file or directory.
pub fn bind(source: &Path, target: &Path) -> MountSpec {
    MountSpec {
        source: source.to_string_lossy().into_owned(),
        target: target.to_path_buf(),
        fstype: None,
        flags: MsFlags::MS_BIND,
        data: None,
    }
}

pub fn move_mount(source: &Path, target: &Path) -> MountSpec {
    MountSpec {
        source: source.to_string_lossy().into_owned(),
        target: target.to_path_buf(),
        fstype: None,
        flags: MsFlags::MS_MOVE,
        data: None,
    }
}

/// Whether the running kernel lists `overlay` in `/proc/filesystems`.
pub fn supports_overlay(filesystems: &str) -> bool {
    filesystems
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .any(|name| name == "overlay")
}
