//! Shared constants between host and guest
//!
//! These constants must be identical on both sides of the host-guest boundary.

/// 9p passthrough mount tags.
///
/// Each host directory is exported on its own channel so the guest can
/// mount them independently, each with its own access mode.
pub mod mount_tags {
    /// Host root filesystem (read-only, lower layer of the guest root)
    pub const HOST_ROOT: &str = "hostroot";

    /// Operator home directory (read-write)
    pub const HOME: &str = "hosthome";

    /// Lab working directory (read-write)
    pub const LAB_DIR: &str = "labdir";

    /// Run workspace (read-write)
    pub const WORKSPACE: &str = "workspace";

    /// Kernel module directory (read-only)
    pub const MODULES: &str = "modules";
}

/// Kernel command line keys carrying [`crate::BootParams`].
pub mod cmdline {
    /// Prefix shared by every netlab key on the kernel command line.
    pub const PREFIX: &str = "netlab.";

    pub const NODE: &str = "node";
    pub const ROLE: &str = "role";
    pub const ORDINAL: &str = "ordinal";
    pub const HOME: &str = "home";
    pub const LAB_DIR: &str = "labdir";
    pub const WORKSPACE: &str = "workspace";
    pub const MODULES: &str = "modules";
    pub const UID: &str = "uid";
    pub const GID: &str = "gid";
}

/// Guest boot constants.
pub mod boot {
    /// Environment variable carrying the handoff record across exec.
    pub const HANDOFF_ENV: &str = "NETLAB_BOOT_HANDOFF";

    /// Path of the init entrypoint inside the root archive.
    pub const INIT_PATH: &str = "/init";

    /// Module load manifest inside the root archive (one path per line, load order).
    pub const MODULE_MANIFEST: &str = "/etc/netlab/modules";

    /// Toolset binary inside the root archive.
    pub const TOOLSET_PATH: &str = "/bin/busybox";
}

/// Guest addressing plan applied by topology configuration.
pub mod addressing {
    /// Data-plane prefix, first three octets.
    pub const DATA_PLANE_PREFIX: [u8; 3] = [10, 0, 0];

    /// Prefix length of the data-plane subnet.
    pub const DATA_PLANE_PREFIX_LEN: u8 = 24;

    /// Host ordinals are offset by this value to keep router addresses low.
    pub const HOST_ORDINAL_OFFSET: u32 = 100;

    /// Gateway installed on host nodes.
    pub const DEFAULT_GATEWAY: &str = "10.0.0.1";
}
