//! Guest filesystem layout definitions.
//!
//! This module provides layout structs for the guest boot sequence:
//! - `RamdiskLayout`: staging directories used while the root is assembled
//! - `GuestRunLayout`: runtime directory inside the assembled root
//!
//! Lives in netlab-shared so the host can reason about the same paths
//! (for example when printing help text or debugging a boot).

use std::path::{Path, PathBuf};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Guest directory names.
pub mod dirs {
    /// Read-only host root export
    pub const LOWER: &str = "lower";

    /// Writable tmpfs holding overlay upper/ and work/
    pub const RW: &str = "rw";

    /// Overlayfs upper directory name
    pub const UPPER: &str = "upper";

    /// Overlayfs work directory name
    pub const WORK: &str = "work";

    /// Assembled root (switch target)
    pub const ROOT: &str = "root";

    /// Runtime directory name under /run
    pub const NETLAB: &str = "netlab";

    /// Power-control replacements
    pub const BIN: &str = "bin";
}

/// Ramdisk staging base path.
pub const RAMDISK_BASE: &str = "/mnt";

/// Runtime base path inside the assembled root.
pub const RUN_BASE: &str = "/run";

// ============================================================================
// RAMDISK LAYOUT (root assembly staging)
// ============================================================================

/// Staging layout used by the ramdisk stage.
///
/// ```text
/// {base}/
/// ├── lower/             # hostroot export, read-only
/// ├── rw/                # tmpfs
/// │   ├── upper/         # overlay upper (writable layer)
/// │   └── work/          # overlay work directory
/// └── root/              # assembled root, becomes /
/// ```
#[derive(Clone, Debug)]
pub struct RamdiskLayout {
    base: PathBuf,
}

impl RamdiskLayout {
    /// Create a ramdisk layout with the given base path.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Lower directory: {base}/lower
    pub fn lower_dir(&self) -> PathBuf {
        self.base.join(dirs::LOWER)
    }

    /// Writable tmpfs: {base}/rw
    pub fn rw_dir(&self) -> PathBuf {
        self.base.join(dirs::RW)
    }

    /// Upper directory: {base}/rw/upper
    pub fn upper_dir(&self) -> PathBuf {
        self.rw_dir().join(dirs::UPPER)
    }

    /// Work directory: {base}/rw/work
    pub fn work_dir(&self) -> PathBuf {
        self.rw_dir().join(dirs::WORK)
    }

    /// Assembled root: {base}/root
    pub fn root_dir(&self) -> PathBuf {
        self.base.join(dirs::ROOT)
    }

    /// Path inside the assembled root for an absolute guest path.
    pub fn in_root(&self, guest_path: &Path) -> PathBuf {
        let relative = guest_path.strip_prefix("/").unwrap_or(guest_path);
        self.root_dir().join(relative)
    }
}

impl Default for RamdiskLayout {
    fn default() -> Self {
        Self::new(RAMDISK_BASE)
    }
}

// ============================================================================
// GUEST RUN LAYOUT (/run/netlab)
// ============================================================================

/// Runtime layout inside the assembled root.
///
/// ```text
/// {run}/netlab/
/// ├── init           # copy of the init entrypoint, exec target after the root switch
/// ├── degraded       # present when the root is a read-only bind
/// ├── power          # FIFO of power requests, served by the console supervisor
/// └── bin/           # reboot/halt/poweroff replacements
/// ```
#[derive(Clone, Debug)]
pub struct GuestRunLayout {
    run: PathBuf,
}

impl GuestRunLayout {
    pub fn new(run: impl Into<PathBuf>) -> Self {
        Self { run: run.into() }
    }

    /// Runtime directory: {run}/netlab
    pub fn dir(&self) -> PathBuf {
        self.run.join(dirs::NETLAB)
    }

    /// Init copy: {run}/netlab/init
    pub fn init_path(&self) -> PathBuf {
        self.dir().join("init")
    }

    /// Degraded-root marker: {run}/netlab/degraded
    pub fn degraded_marker(&self) -> PathBuf {
        self.dir().join("degraded")
    }

    /// Power request FIFO: {run}/netlab/power
    pub fn power_fifo(&self) -> PathBuf {
        self.dir().join("power")
    }

    /// Power-control replacements: {run}/netlab/bin
    pub fn bin_dir(&self) -> PathBuf {
        self.dir().join(dirs::BIN)
    }
}

impl Default for GuestRunLayout {
    fn default() -> Self {
        Self::new(RUN_BASE)
    }
}
