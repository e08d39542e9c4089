//! Root image assembly.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use netlab_shared::constants::boot;
use netlab_shared::errors::{NetlabError, NetlabResult};

use super::{cpio, libraries, modules};
use crate::controller::run_tool;
use crate::runtime::options::LabOptions;
use crate::util;

/// Directories every root image starts with.
const SKELETON: &[&str] = &[
    "bin", "sbin", "usr/bin", "usr/sbin", "lib", "etc/netlab", "proc", "sys", "dev", "mnt",
    "run", "tmp", "root",
];

/// Host inputs of a root image.
#[derive(Debug, Clone)]
pub struct RootImageSources {
    /// Multi-call toolset binary (busybox).
    pub toolset: PathBuf,
    /// Guest boot entrypoint, installed as /init.
    pub init: PathBuf,
    pub ldd: PathBuf,
    pub modprobe: PathBuf,
    /// Kernel version whose modules are included; None skips modules.
    pub kernel_version: Option<String>,
    pub modules: Vec<String>,
}

impl RootImageSources {
    /// Resolve all inputs from lab settings. Fails if a required binary is missing.
    pub fn from_options(options: &LabOptions) -> NetlabResult<Self> {
        let kernel_version = match options.resolved_kernel_version() {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!("Kernel modules skipped: {}", e);
                None
            }
        };

        Ok(Self {
            toolset: util::find_binary(&options.toolset)?,
            init: util::find_binary(&options.guest_init)?,
            ldd: util::find_binary("ldd")?,
            modprobe: find_modprobe()?,
            kernel_version,
            modules: options.modules.clone(),
        })
    }
}

/// What went into an image.
#[derive(Debug, Clone, Default)]
pub struct BuiltImage {
    pub path: PathBuf,
    pub size: u64,
    pub applets: usize,
    pub libraries: Vec<PathBuf>,
    /// Module manifest, in load order.
    pub modules: Vec<PathBuf>,
    /// Requested modules left out because their chain did not resolve.
    pub skipped_modules: Vec<String>,
}

/// Builds the gzip-compressed newc root archive booted by generic nodes.
pub struct RootImageBuilder {
    sources: RootImageSources,
}

impl RootImageBuilder {
    pub fn new(sources: RootImageSources) -> Self {
        Self { sources }
    }

    /// Assemble the tree in `staging` and archive it to `output`.
    ///
    /// Staging is removed afterwards. Unresolvable modules only warn; a
    /// missing toolset, entrypoint or library fails the build.
    pub fn build(&self, staging: &Path, output: &Path) -> NetlabResult<BuiltImage> {
        tracing::info!(output = %output.display(), "Building root image");

        if staging.exists() {
            std::fs::remove_dir_all(staging).map_err(|e| {
                NetlabError::Image(format!("Failed to clear {}: {}", staging.display(), e))
            })?;
        }
        for dir in SKELETON {
            let path = staging.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| {
                NetlabError::Image(format!("Failed to create {}: {}", path.display(), e))
            })?;
        }

        let mut image = BuiltImage {
            path: output.to_path_buf(),
            ..Default::default()
        };

        image.applets = self.install_toolset(staging)?;
        image.libraries = self.install_libraries(staging)?;
        self.install_modules(staging, &mut image)?;
        self.install_init(staging)?;

        image.size = cpio::write_gzip_archive(staging, output)?;

        if let Err(e) = std::fs::remove_dir_all(staging) {
            tracing::warn!("Failed to remove image staging {}: {}", staging.display(), e);
        }

        tracing::info!(
            applets = image.applets,
            libraries = image.libraries.len(),
            modules = image.modules.len(),
            skipped = image.skipped_modules.len(),
            size = image.size,
            "Root image built"
        );
        Ok(image)
    }

    /// Install the toolset and one symlink per applet. Returns the applet count.
    fn install_toolset(&self, root: &Path) -> NetlabResult<usize> {
        let toolset = &self.sources.toolset;
        if !toolset.is_file() {
            return Err(NetlabError::Image(format!(
                "Toolset binary not found: {}",
                toolset.display()
            )));
        }

        let dest = in_root(root, boot::TOOLSET_PATH);
        copy_executable(toolset, &dest)?;

        let applets = match run_tool(toolset, ["--list-full"]) {
            Ok(list) if !list.trim().is_empty() => parse_applets(&list, true),
            _ => {
                tracing::debug!("Toolset has no --list-full, falling back to --list");
                let list = run_tool(toolset, ["--list"]).map_err(|e| {
                    NetlabError::Image(format!("Failed to list toolset applets: {}", e))
                })?;
                parse_applets(&list, false)
            }
        };

        let mut count = 0;
        for applet in applets {
            let link = root.join(&applet);
            if link == dest || link.exists() {
                continue;
            }
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    NetlabError::Image(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
            std::os::unix::fs::symlink(boot::TOOLSET_PATH, &link).map_err(|e| {
                NetlabError::Image(format!(
                    "Failed to link applet {}: {}",
                    applet.display(),
                    e
                ))
            })?;
            count += 1;
        }

        tracing::debug!(applets = count, "Installed toolset");
        Ok(count)
    }

    fn install_libraries(&self, root: &Path) -> NetlabResult<Vec<PathBuf>> {
        let closure = libraries::resolve_closure(
            &self.sources.ldd,
            &[self.sources.toolset.as_path(), self.sources.init.as_path()],
        )?;
        for library in &closure {
            libraries::install_at_host_path(root, library)?;
        }
        Ok(closure)
    }

    fn install_modules(&self, root: &Path, image: &mut BuiltImage) -> NetlabResult<()> {
        if let Some(kernel_version) = &self.sources.kernel_version {
            for module in &self.sources.modules {
                match self.install_chain(root, kernel_version, module) {
                    Ok(chain) => {
                        for path in chain {
                            if !image.modules.contains(&path) {
                                image.modules.push(path);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(module = %module, "Module left out of image: {}", e);
                        image.skipped_modules.push(module.clone());
                    }
                }
            }
        }

        let manifest = in_root(root, boot::MODULE_MANIFEST);
        let mut text = String::new();
        for path in &image.modules {
            text.push_str(&path.to_string_lossy());
            text.push('\n');
        }
        std::fs::write(&manifest, text).map_err(|e| {
            NetlabError::Image(format!("Failed to write {}: {}", manifest.display(), e))
        })
    }

    /// Install the whole chain or report why not.
    fn install_chain(
        &self,
        root: &Path,
        kernel_version: &str,
        module: &str,
    ) -> NetlabResult<Vec<PathBuf>> {
        let files = modules::resolve_chain(&self.sources.modprobe, kernel_version, module)?;
        files
            .iter()
            .map(|file| modules::install_module(root, file))
            .collect()
    }

    fn install_init(&self, root: &Path) -> NetlabResult<()> {
        let init = &self.sources.init;
        if !init.is_file() {
            return Err(NetlabError::Image(format!(
                "Boot entrypoint not found: {}",
                init.display()
            )));
        }
        copy_executable(init, &in_root(root, boot::INIT_PATH))
    }
}

/// Build a root image for `options` at `output`, staging in a private temp dir.
pub fn build_image(options: &LabOptions, output: &Path) -> NetlabResult<BuiltImage> {
    let sources = RootImageSources::from_options(options)?;
    let staging = tempfile::Builder::new()
        .prefix("netlab-rootfs-")
        .tempdir()
        .map_err(|e| NetlabError::Image(format!("Failed to create staging dir: {}", e)))?;

    RootImageBuilder::new(sources).build(&staging.path().join("rootfs"), output)
}

/// Applet paths relative to the image root.
///
/// `--list-full` prints paths (`usr/bin/env`); `--list` prints bare names,
/// which all go to `bin/`.
fn parse_applets(list: &str, full: bool) -> Vec<PathBuf> {
    list.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if full {
                PathBuf::from(line.trim_start_matches('/'))
            } else {
                Path::new("bin").join(line)
            }
        })
        .collect()
}

/// modprobe usually lives in sbin, which is not always on an operator's PATH.
fn find_modprobe() -> NetlabResult<PathBuf> {
    util::find_binary("modprobe").or_else(|e| {
        ["/sbin/modprobe", "/usr/sbin/modprobe"]
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or(e)
    })
}

fn in_root(root: &Path, guest_path: &str) -> PathBuf {
    root.join(guest_path.trim_start_matches('/'))
}

fn copy_executable(src: &Path, dest: &Path) -> NetlabResult<()> {
    std::fs::copy(src, dest).map_err(|e| {
        NetlabError::Image(format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dest.display(),
            e
        ))
    })?;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        NetlabError::Image(format!("Failed to chmod {}: {}", dest.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::write_executable_script;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        sources: RootImageSources,
        staging: PathBuf,
        output: PathBuf,
        host_lib: PathBuf,
    }

    /// Fake toolset, ldd and modprobe driven by shell scripts.
    fn fixture(applets: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools");
        let host = dir.path().join("host");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::create_dir_all(host.join("lib")).unwrap();

        let toolset = tools.join("busybox");
        write_executable_script(
            &toolset,
            &format!(
                "#!/bin/sh\n[ \"$1\" = --list-full ] && printf '{}'\nexit 0\n",
                applets.iter().map(|a| format!("{}\\n", a)).collect::<String>()
            ),
        )
        .unwrap();

        let init = tools.join("netlab-init");
        write_executable_script(&init, "#!/bin/sh\n").unwrap();

        let host_lib = host.join("lib/libfake.so.1");
        std::fs::write(&host_lib, b"lib").unwrap();
        let ldd = tools.join("ldd");
        write_executable_script(
            &ldd,
            &format!(
                "#!/bin/sh\necho \"\tlinux-vdso.so.1 (0x0)\"\necho \"\tlibfake.so.1 => {} (0x0)\"\n",
                host_lib.display()
            ),
        )
        .unwrap();

        let dep = host.join("lib/dep.ko");
        std::fs::write(&dep, b"dep").unwrap();
        let good = host.join("lib/good.ko.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"good").unwrap();
        std::fs::write(&good, encoder.finish().unwrap()).unwrap();

        let modprobe = tools.join("modprobe");
        write_executable_script(
            &modprobe,
            &format!(
                "#!/bin/sh\ncase \"$4\" in\n\
                 good) echo \"insmod {dep}\"; echo \"insmod {good}\";;\n\
                 also) echo \"insmod {dep}\";;\n\
                 core) echo \"builtin core\";;\n\
                 *) echo \"modprobe: FATAL: Module $4 not found\" >&2; exit 1;;\n\
                 esac\n",
                dep = dep.display(),
                good = good.display()
            ),
        )
        .unwrap();

        Fixture {
            staging: dir.path().join("ws/rootfs"),
            output: dir.path().join("ws/rootfs.cpio.gz"),
            sources: RootImageSources {
                toolset,
                init,
                ldd,
                modprobe,
                kernel_version: Some("6.1.0-test".into()),
                modules: vec!["good".into(), "missing".into(), "also".into(), "core".into()],
            },
            host_lib,
            _dir: dir,
        }
    }

    /// Build without archiving so the staging tree can be inspected.
    fn assemble(fixture: &Fixture) -> BuiltImage {
        let builder = RootImageBuilder::new(fixture.sources.clone());
        std::fs::create_dir_all(&fixture.staging).unwrap();
        for dir in SKELETON {
            std::fs::create_dir_all(fixture.staging.join(dir)).unwrap();
        }
        let mut image = BuiltImage::default();
        image.applets = builder.install_toolset(&fixture.staging).unwrap();
        image.libraries = builder.install_libraries(&fixture.staging).unwrap();
        builder.install_modules(&fixture.staging, &mut image).unwrap();
        builder.install_init(&fixture.staging).unwrap();
        image
    }

    #[test]
    fn test_applets_link_to_one_binary() {
        let applets = ["bin/sh", "bin/ls", "sbin/ip", "usr/bin/env", "sbin/mdev"];
        let fixture = fixture(&applets);
        let image = assemble(&fixture);

        assert_eq!(image.applets, applets.len());
        for applet in applets {
            let link = fixture.staging.join(applet);
            assert_eq!(
                std::fs::read_link(&link).unwrap(),
                PathBuf::from("/bin/busybox"),
                "{}",
                applet
            );
        }
    }

    #[test]
    fn test_unresolved_module_left_out_of_manifest() {
        let fixture = fixture(&["bin/sh"]);
        let image = assemble(&fixture);

        let manifest =
            std::fs::read_to_string(fixture.staging.join("etc/netlab/modules")).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();

        // dep first, good second, dep not repeated for "also"
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("dep.ko"));
        assert!(lines[1].ends_with("good.ko"));
        assert!(!manifest.contains("missing"));
        assert_eq!(image.skipped_modules, vec!["missing".to_string()]);

        let good = Path::new(lines[1]);
        let installed = fixture.staging.join(good.strip_prefix("/").unwrap());
        assert_eq!(std::fs::read(installed).unwrap(), b"good");
    }

    #[test]
    fn test_libraries_and_init_installed() {
        let fixture = fixture(&["bin/sh"]);
        let image = assemble(&fixture);

        assert_eq!(image.libraries, vec![fixture.host_lib.clone()]);
        let lib = fixture
            .staging
            .join(fixture.host_lib.strip_prefix("/").unwrap());
        assert!(lib.is_file());

        let mode = std::fs::metadata(fixture.staging.join("init"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_build_writes_archive_and_removes_staging() {
        let fixture = fixture(&["bin/sh"]);
        let builder = RootImageBuilder::new(fixture.sources.clone());

        let image = builder.build(&fixture.staging, &fixture.output).unwrap();

        assert!(fixture.output.is_file());
        assert!(image.size > 0);
        assert!(!fixture.staging.exists());
    }

    #[test]
    fn test_missing_toolset_is_fatal() {
        let mut fixture = fixture(&["bin/sh"]);
        fixture.sources.toolset = PathBuf::from("/nonexistent/busybox");
        let builder = RootImageBuilder::new(fixture.sources.clone());

        let err = builder.build(&fixture.staging, &fixture.output).unwrap_err();
        assert!(matches!(err, NetlabError::Image(_)));
    }

    #[test]
    fn test_parse_applets_short_list() {
        assert_eq!(
            parse_applets("ls\nsh\n", false),
            vec![PathBuf::from("bin/ls"), PathBuf::from("bin/sh")]
        );
    }
}
