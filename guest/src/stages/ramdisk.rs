//! RAMDISK_INIT: assemble the root from host exports and switch into it.

use std::path::Path;

use netlab_shared::constants::{boot, mount_tags};
use netlab_shared::errors::NetlabResult;
use netlab_shared::BootParams;

use crate::fsm::{BootContext, RootStrategy, Stage, Transition};
use crate::ops::GuestOps;
use crate::{modules, mounts};

pub fn run<O: GuestOps>(ctx: &mut BootContext, ops: &mut O) -> NetlabResult<Transition> {
    for (fstype, target) in mounts::PSEUDO_FILESYSTEMS {
        ops.create_dir_all(Path::new(target))?;
        ops.mount(&mounts::pseudo(fstype, target))?;
    }

    let cmdline = ops.read_file(Path::new("/proc/cmdline"))?;
    let params = BootParams::parse(&cmdline)?;
    tracing::info!(node = %params.node, role = %params.role, ordinal = params.ordinal, "Booting");

    if let Err(e) = ops.set_hostname(&params.node) {
        tracing::warn!("{}", e);
    }

    modules::load_manifest(ops);

    let filesystems = ops.read_file(Path::new("/proc/filesystems"))?;
    let strategy = if mounts::supports_overlay(&filesystems) {
        RootStrategy::Overlay
    } else {
        RootStrategy::ReadOnlyBind
    };

    assemble_root(ops, strategy)?;
    bind_exports(ops, &params)?;
    prepare_run_dir(ops, strategy)?;

    let layout = super::ramdisk_layout();
    for (_, target) in mounts::PSEUDO_FILESYSTEMS {
        let target = Path::new(target);
        let moved = layout.in_root(target);
        ops.create_dir_all(&moved)?;
        ops.mount(&mounts::move_mount(target, &moved))?;
    }
    ops.switch_root(&layout.root_dir())?;

    ctx.params = Some(params);
    ctx.root = Some(strategy);
    Ok(Transition::Exec(Stage::PrivilegeDrop))
}

fn assemble_root<O: GuestOps>(ops: &mut O, strategy: RootStrategy) -> NetlabResult<()> {
    let layout = super::ramdisk_layout();
    let lower = layout.lower_dir();
    let root = layout.root_dir();

    ops.create_dir_all(&lower)?;
    ops.create_dir_all(&root)?;
    ops.mount(&mounts::ninep(mount_tags::HOST_ROOT, &lower, true))?;

    match strategy {
        RootStrategy::Overlay => {
            let rw = layout.rw_dir();
            ops.create_dir_all(&rw)?;
            ops.mount(&mounts::tmpfs(&rw, "0755"))?;
            ops.create_dir_all(&layout.upper_dir())?;
            ops.create_dir_all(&layout.work_dir())?;
            ops.mount(&mounts::overlay(
                &lower,
                &layout.upper_dir(),
                &layout.work_dir(),
                &root,
            ))?;
            tracing::info!("Root assembled as overlay");
        }
        RootStrategy::ReadOnlyBind => {
            tracing::warn!(
                "Kernel has no overlay support: root is a READ-ONLY bind of the host root, \
                 only the exported directories are writable"
            );
            for spec in mounts::read_only_bind(&lower, &root) {
                ops.mount(&spec)?;
            }
        }
    }
    Ok(())
}

/// Mount each host export at the host path it came from.
fn bind_exports<O: GuestOps>(ops: &mut O, params: &BootParams) -> NetlabResult<()> {
    let layout = super::ramdisk_layout();
    let exports = [
        (mount_tags::HOME, &params.home, false),
        (mount_tags::LAB_DIR, &params.lab_dir, false),
        (mount_tags::WORKSPACE, &params.workspace, false),
        (mount_tags::MODULES, &params.modules_dir, true),
    ];

    for (tag, path, read_only) in exports {
        let Some(path) = path else {
            continue;
        };
        let target = layout.in_root(path);
        ops.create_dir_all(&target)?;
        ops.mount(&mounts::ninep(tag, &target, read_only))?;
        tracing::debug!(tag, path = %path.display(), "Export mounted");
    }
    Ok(())
}

/// Fresh `/run` in the new root holding the init copy and the degraded marker.
fn prepare_run_dir<O: GuestOps>(ops: &mut O, strategy: RootStrategy) -> NetlabResult<()> {
    let layout = super::ramdisk_layout();
    let run = super::run_layout();

    let run_dir = layout.in_root(Path::new(netlab_shared::layout::RUN_BASE));
    ops.create_dir_all(&run_dir)?;
    ops.mount(&mounts::tmpfs(&run_dir, "0755"))?;
    ops.create_dir_all(&layout.in_root(&run.dir()))?;
    ops.copy_file(
        Path::new(boot::INIT_PATH),
        &layout.in_root(&run.init_path()),
        0o755,
    )?;

    if strategy == RootStrategy::ReadOnlyBind {
        ops.write_file(
            &layout.in_root(&run.degraded_marker()),
            "root filesystem is a read-only bind of the host root\n",
            Some(0o644),
        )?;
    }
    Ok(())
}
