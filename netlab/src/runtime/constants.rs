//! Constants for the netlab runtime
//!
//! Centralized location for hardcoded defaults, binary names and artifact names.

// Re-export shared constants
pub use netlab_shared::constants::{boot, cmdline, mount_tags};

/// Host binaries used when the lab settings do not override them.
pub mod binaries {
    pub const EMULATOR: &str = "qemu-system-x86_64";
    pub const SWITCH: &str = "vde_switch";
    pub const QEMU_IMG: &str = "qemu-img";
    pub const SEED_INJECTOR: &str = "virt-copy-in";
    pub const TOOLSET: &str = "busybox";
    pub const GUEST_INIT: &str = "netlab-init";
    pub const TMUX: &str = "tmux";
}

/// Virtual machine resource defaults
pub mod vm_defaults {
    /// Default number of vCPUs per node
    pub const DEFAULT_CPUS: u32 = 1;

    /// Default memory in MiB per node
    pub const DEFAULT_MEMORY_MIB: u32 = 256;

    /// Kernel modules requested in the root image by default
    pub const DEFAULT_MODULES: &[&str] = &[
        "9p",
        "9pnet_virtio",
        "virtio_pci",
        "virtio_net",
        "e1000",
        "overlay",
    ];

    /// Kernel command line prefix for generic guests
    pub const KERNEL_CMDLINE: &str = "console=ttyS0 panic=-1 quiet";
}

/// Lifecycle timing defaults
pub mod timing {
    /// Grace period between SIGTERM and SIGKILL at teardown
    pub const GRACE_PERIOD_MS: u64 = 3000;

    /// Upper bound on reaping owned children after SIGKILL
    pub const REAP_TIMEOUT_MS: u64 = 2000;

    /// How long to wait for a switch control socket to appear
    pub const SWITCH_READY_TIMEOUT_MS: u64 = 5000;

    /// Poll interval while waiting on startup conditions
    pub const POLL_INTERVAL_MS: u64 = 20;
}

/// Virtual NIC models per guest flavor
pub mod nic_models {
    pub const GENERIC: &str = "virtio-net-pci";
    pub const APPLIANCE: &str = "e1000";
}

/// Workspace naming
pub mod filenames {
    /// Prefix of the workspace directory and the multiplexer session
    pub const WORKSPACE_PREFIX: &str = "netlab-";

    /// Compressed root archive
    pub const ROOT_IMAGE: &str = "rootfs.cpio.gz";

    /// Staging directory for root image assembly
    pub const ROOTFS_STAGING: &str = "rootfs";
}
