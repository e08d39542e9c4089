use crate::runtime::constants::filenames;
use std::path::{Path, PathBuf};

/// Role of a supervised process, used in artifact names (`<role>-<id>.pid`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Switch,
    Node,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Switch => "switch",
            ProcessRole::Node => "node",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WORKSPACE LAYOUT (per-run artifacts)
// ============================================================================

/// Artifact paths inside a run workspace.
///
/// ```text
/// {root}/
/// ├── rootfs.cpio.gz          # root archive
/// ├── rootfs/                 # image staging (removed after archiving)
/// ├── switch-{id}.ctl         # switch control socket (directory)
/// ├── switch-{id}.mgmt        # switch management socket
/// ├── switch-{id}.rc          # switch configuration
/// ├── switch-{id}.pcap        # packet capture
/// ├── switch-{id}.pid
/// ├── switch-{id}.log         # switch output
/// ├── node-{name}.sh          # launch script
/// ├── node-{name}.pid
/// ├── node-{name}.console     # console socket
/// ├── node-{name}.monitor     # emulator monitor socket
/// ├── node-{name}.gdb         # debug protocol socket
/// ├── node-{name}.log         # output when no multiplexer hosts the node
/// ├── node-{name}.qcow2       # appliance overlay
/// └── node-{name}.seed/       # staged appliance seed
/// ```
#[derive(Clone, Debug)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_image(&self) -> PathBuf {
        self.root.join(filenames::ROOT_IMAGE)
    }

    pub fn rootfs_staging(&self) -> PathBuf {
        self.root.join(filenames::ROOTFS_STAGING)
    }

    /// PID file: {root}/{role}-{id}.pid
    pub fn pid_file(&self, role: ProcessRole, id: &str) -> PathBuf {
        self.artifact(role, id, "pid")
    }

    pub fn switch_ctl(&self, segment: &str) -> PathBuf {
        self.artifact(ProcessRole::Switch, segment, "ctl")
    }

    pub fn switch_mgmt(&self, segment: &str) -> PathBuf {
        self.artifact(ProcessRole::Switch, segment, "mgmt")
    }

    pub fn switch_rc(&self, segment: &str) -> PathBuf {
        self.artifact(ProcessRole::Switch, segment, "rc")
    }

    pub fn switch_capture(&self, segment: &str) -> PathBuf {
        self.artifact(ProcessRole::Switch, segment, "pcap")
    }

    pub fn switch_log(&self, segment: &str) -> PathBuf {
        self.artifact(ProcessRole::Switch, segment, "log")
    }

    pub fn node_script(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "sh")
    }

    pub fn node_console(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "console")
    }

    pub fn node_monitor(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "monitor")
    }

    pub fn node_gdb(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "gdb")
    }

    pub fn node_log(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "log")
    }

    pub fn node_disk(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "qcow2")
    }

    pub fn node_seed_dir(&self, node: &str) -> PathBuf {
        self.artifact(ProcessRole::Node, node, "seed")
    }

    fn artifact(&self, role: ProcessRole, id: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{}-{}.{}", role.as_str(), id, ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_layout_paths() {
        let layout = WorkspaceLayout::new("/tmp/netlab-abc");

        assert_eq!(
            layout.root_image(),
            PathBuf::from("/tmp/netlab-abc/rootfs.cpio.gz")
        );
        assert_eq!(
            layout.pid_file(ProcessRole::Switch, "1"),
            PathBuf::from("/tmp/netlab-abc/switch-1.pid")
        );
        assert_eq!(
            layout.pid_file(ProcessRole::Node, "r1"),
            PathBuf::from("/tmp/netlab-abc/node-r1.pid")
        );
        assert_eq!(
            layout.switch_ctl("core"),
            PathBuf::from("/tmp/netlab-abc/switch-core.ctl")
        );
        assert_eq!(
            layout.node_disk("sw1"),
            PathBuf::from("/tmp/netlab-abc/node-sw1.qcow2")
        );
    }
}
