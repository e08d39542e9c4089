//! Emulator invocation for one node.

use std::path::PathBuf;

use crate::runtime::constants::vm_defaults;

/// One virtual NIC wired to a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    /// Switch control socket.
    pub ctl: PathBuf,
    pub model: &'static str,
    pub mac: String,
}

/// Host directory exported to the guest over 9p.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passthrough {
    pub tag: &'static str,
    pub host_path: PathBuf,
    pub read_only: bool,
}

/// What the node boots from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMedia {
    /// Direct kernel boot into the netlab root archive.
    Generic {
        kernel: PathBuf,
        initrd: PathBuf,
        /// netlab boot parameters, appended to the base kernel command line.
        boot_args: String,
        exports: Vec<Passthrough>,
    },
    /// Private overlay of a vendor image.
    Appliance { disk: PathBuf },
}

/// Full emulator command line for a node.
#[derive(Debug, Clone)]
pub struct EmulatorInvocation {
    pub binary: PathBuf,
    pub name: String,
    pub memory_mib: u32,
    pub cpus: u32,
    pub kvm: bool,
    pub nics: Vec<Nic>,
    pub console: PathBuf,
    pub monitor: PathBuf,
    pub gdb: PathBuf,
    pub media: BootMedia,
}

impl EmulatorInvocation {
    /// Argument vector, binary first.
    pub fn argv(&self) -> Vec<String> {
        let mut args = vec![
            self.binary.to_string_lossy().into_owned(),
            "-name".to_string(),
            self.name.clone(),
            "-m".to_string(),
            self.memory_mib.to_string(),
            "-smp".to_string(),
            self.cpus.to_string(),
            "-nographic".to_string(),
        ];

        if self.kvm {
            args.push("-enable-kvm".to_string());
        }

        for (index, nic) in self.nics.iter().enumerate() {
            args.push("-netdev".to_string());
            args.push(format!("vde,id=net{},sock={}", index, nic.ctl.display()));
            args.push("-device".to_string());
            args.push(format!("{},netdev=net{},mac={}", nic.model, index, nic.mac));
        }

        args.push("-monitor".to_string());
        args.push(format!("unix:{},server,nowait", self.monitor.display()));
        args.push("-gdb".to_string());
        args.push(format!("unix:{},server,nowait", self.gdb.display()));

        args.push("-chardev".to_string());
        args.push(format!(
            "socket,id=console0,path={},server=on,wait=off",
            self.console.display()
        ));
        args.push("-device".to_string());
        args.push("virtio-serial".to_string());
        args.push("-device".to_string());
        args.push("virtconsole,chardev=console0".to_string());

        match &self.media {
            BootMedia::Generic {
                kernel,
                initrd,
                boot_args,
                exports,
            } => {
                args.push("-kernel".to_string());
                args.push(kernel.to_string_lossy().into_owned());
                args.push("-initrd".to_string());
                args.push(initrd.to_string_lossy().into_owned());
                args.push("-append".to_string());
                args.push(format!("{} {}", vm_defaults::KERNEL_CMDLINE, boot_args));

                for export in exports {
                    args.push("-virtfs".to_string());
                    let mut spec = format!(
                        "local,path={},mount_tag={},security_model=none,id={}",
                        export.host_path.display(),
                        export.tag,
                        export.tag
                    );
                    if export.read_only {
                        spec.push_str(",readonly=on");
                    }
                    args.push(spec);
                }
            }
            BootMedia::Appliance { disk } => {
                args.push("-drive".to_string());
                args.push(format!("file={},if=virtio,format=qcow2", disk.display()));
            }
        }

        args
    }

    /// Launch script body: `exec` the emulator so the script's PID is the emulator's.
    pub fn script(&self) -> String {
        format!("#!/bin/sh\nexec {}\n", crate::util::shell_join(self.argv()))
    }
}
