//! Emulated nodes, one emulator process per node.

mod command;
mod disk;

pub use command::{BootMedia, EmulatorInvocation, Nic, Passthrough};
pub use disk::{backing_format, create_overlay, inject_seed};

use std::path::PathBuf;
use std::sync::Arc;

use netlab_shared::BootParams;
use netlab_shared::errors::{NetlabError, NetlabResult};

use crate::controller::{ProcessHandle, ProcessRegistry};
use crate::mux::Multiplexer;
use crate::runtime::constants::mount_tags;
use crate::runtime::layout::{ProcessRole, WorkspaceLayout};
use crate::runtime::options::LabOptions;
use crate::switch::SwitchSupervisor;
use crate::topology::{GuestFlavor, PlannedNode};
use crate::util;

/// Host paths and identity exported to generic guests.
#[derive(Debug, Clone)]
pub struct GuestExports {
    pub home: Option<PathBuf>,
    pub lab_dir: Option<PathBuf>,
    pub workspace: PathBuf,
    pub modules_dir: Option<PathBuf>,
    pub uid: u32,
    pub gid: u32,
}

impl GuestExports {
    /// 9p passthroughs in mount order. Host root always comes first.
    pub fn passthroughs(&self) -> Vec<Passthrough> {
        let mut exports = vec![Passthrough {
            tag: mount_tags::HOST_ROOT,
            host_path: PathBuf::from("/"),
            read_only: true,
        }];

        let optional = [
            (mount_tags::HOME, self.home.as_ref(), false),
            (mount_tags::LAB_DIR, self.lab_dir.as_ref(), false),
            (mount_tags::WORKSPACE, Some(&self.workspace), false),
            (mount_tags::MODULES, self.modules_dir.as_ref(), true),
        ];
        for (tag, path, read_only) in optional {
            if let Some(path) = path {
                exports.push(Passthrough {
                    tag,
                    host_path: path.clone(),
                    read_only,
                });
            }
        }
        exports
    }

    fn boot_params(&self, node: &PlannedNode) -> BootParams {
        let mut params = BootParams::new(node.name.clone(), node.role, node.ordinal);
        params.home = self.home.clone();
        params.lab_dir = self.lab_dir.clone();
        params.workspace = Some(self.workspace.clone());
        params.modules_dir = self.modules_dir.clone();
        params.uid = Some(self.uid);
        params.gid = Some(self.gid);
        params
    }
}

/// Starts every node of a lab in the multiplexer.
pub struct NodeSupervisor {
    options: LabOptions,
    layout: WorkspaceLayout,
    emulator: PathBuf,
    /// Kernel and root archive, required only when generic nodes exist.
    kernel: Option<PathBuf>,
    root_image: PathBuf,
    exports: GuestExports,
    multiplexer: Arc<dyn Multiplexer>,
}

impl NodeSupervisor {
    pub fn new(
        options: LabOptions,
        layout: WorkspaceLayout,
        emulator: PathBuf,
        kernel: Option<PathBuf>,
        root_image: PathBuf,
        exports: GuestExports,
        multiplexer: Arc<dyn Multiplexer>,
    ) -> Self {
        Self {
            options,
            layout,
            emulator,
            kernel,
            root_image,
            exports,
            multiplexer,
        }
    }

    /// Start all nodes in declaration order.
    ///
    /// A node that fails does not stop the others; every failure is
    /// collected into one [`NetlabError::NodeStart`].
    pub fn start_all(
        &self,
        nodes: &[PlannedNode],
        switches: &SwitchSupervisor,
        registry: &mut ProcessRegistry,
    ) -> NetlabResult<()> {
        let mut failures = Vec::new();

        for node in nodes {
            if let Err(e) = self.start_node(node, switches, registry) {
                tracing::error!(node = %node.name, error = %e, "Node failed to start");
                failures.push(format!("{}: {}", node.name, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NetlabError::NodeStart(failures))
        }
    }

    /// Start one node and register its handle. Returns the node's PID.
    pub fn start_node(
        &self,
        node: &PlannedNode,
        switches: &SwitchSupervisor,
        registry: &mut ProcessRegistry,
    ) -> NetlabResult<u32> {
        let invocation = self.invocation(node, switches)?;

        let script = self.layout.node_script(&node.name);
        util::write_executable_script(&script, &invocation.script())?;

        let pane = self.multiplexer.open_window(
            &node.name,
            &script,
            &self.layout.node_log(&node.name),
        )?;
        let pid = pane.pid;

        let label = format!("{}-{}", ProcessRole::Node, node.name);
        let pid_file = self.layout.pid_file(ProcessRole::Node, &node.name);
        let handle = match pane.child {
            Some(child) => {
                ProcessHandle::from_child(label, ProcessRole::Node, child, pid_file.clone(), true)
            }
            None => ProcessHandle::from_pid(label, ProcessRole::Node, pid, pid_file.clone(), true),
        };
        registry.adopt(handle)?;
        util::write_pid_file(&pid_file, pid)?;

        tracing::info!(
            node = %node.name,
            flavor = %node.flavor,
            pid,
            mux = self.multiplexer.name(),
            "Node started"
        );
        Ok(pid)
    }

    /// Compose the emulator invocation, preparing appliance disks on the way.
    pub fn invocation(
        &self,
        node: &PlannedNode,
        switches: &SwitchSupervisor,
    ) -> NetlabResult<EmulatorInvocation> {
        let mut nics = Vec::with_capacity(node.attachments.len());
        for attachment in &node.attachments {
            let segment = switches.segment(&attachment.segment).ok_or_else(|| {
                NetlabError::InvalidState(format!(
                    "node '{}' attaches to segment '{}' which has no switch",
                    node.name, attachment.segment
                ))
            })?;
            nics.push(Nic {
                ctl: segment.ctl.clone(),
                model: node.flavor.nic_model(),
                mac: attachment.mac.to_string(),
            });
        }

        let media = match node.flavor {
            GuestFlavor::Generic => self.generic_media(node)?,
            GuestFlavor::Appliance => self.appliance_media(node)?,
        };

        Ok(EmulatorInvocation {
            binary: self.emulator.clone(),
            name: node.name.clone(),
            memory_mib: self.options.memory_mib,
            cpus: self.options.cpus,
            kvm: self.options.kvm,
            nics,
            console: self.layout.node_console(&node.name),
            monitor: self.layout.node_monitor(&node.name),
            gdb: self.layout.node_gdb(&node.name),
            media,
        })
    }

    fn generic_media(&self, node: &PlannedNode) -> NetlabResult<BootMedia> {
        let kernel = self.kernel.clone().ok_or_else(|| {
            NetlabError::InvalidState(format!(
                "generic node '{}' needs a kernel but none was resolved",
                node.name
            ))
        })?;

        Ok(BootMedia::Generic {
            kernel,
            initrd: self.root_image.clone(),
            boot_args: self.exports.boot_params(node).to_cmdline()?,
            exports: self.exports.passthroughs(),
        })
    }

    fn appliance_media(&self, node: &PlannedNode) -> NetlabResult<BootMedia> {
        let base = node.image.as_ref().ok_or_else(|| {
            NetlabError::Config(format!("appliance node '{}' has no base image", node.name))
        })?;

        let qemu_img = util::find_binary(&self.options.qemu_img)?;
        let disk = self.layout.node_disk(&node.name);
        let format = self
            .options
            .appliance_format
            .as_deref()
            .unwrap_or_else(|| backing_format(base));
        create_overlay(&qemu_img, base, format, &disk)?;

        if let Some(seed) = &node.seed {
            let injector = util::find_binary(&self.options.seed_injector)?;
            inject_seed(&injector, &disk, seed, &self.options.seed_dest)?;
        }

        Ok(BootMedia::Appliance { disk })
    }
}
