//! Kernel module resolution for the root image.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use netlab_shared::errors::{NetlabError, NetlabResult};

use crate::controller::run_tool;

/// Files `modprobe --show-depends` would load, dependencies first.
///
/// `builtin` lines produce nothing; the module is part of the kernel.
pub fn parse_show_depends(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("insmod") => words.next().map(PathBuf::from),
                _ => None,
            }
        })
        .collect()
}

/// Dependency chain of `module` for kernel `kernel_version`.
pub fn resolve_chain(
    modprobe: &Path,
    kernel_version: &str,
    module: &str,
) -> NetlabResult<Vec<PathBuf>> {
    let output = run_tool(modprobe, ["--show-depends", "-S", kernel_version, module])
        .map_err(|e| NetlabError::Image(format!("cannot resolve module '{}': {}", module, e)))?;

    Ok(parse_show_depends(&output))
}

/// Copy a module file into `root` at its host path, decompressed.
///
/// Returns the guest path of the installed `.ko`.
pub fn install_module(root: &Path, source: &Path) -> NetlabResult<PathBuf> {
    let source_str = source.to_string_lossy();

    let (guest_path, bytes) = if let Some(stem) = source_str.strip_suffix(".zst") {
        let file = open(source)?;
        let bytes = zstd::stream::decode_all(file).map_err(|e| {
            NetlabError::Image(format!("Failed to decompress {}: {}", source.display(), e))
        })?;
        (PathBuf::from(stem), bytes)
    } else if let Some(stem) = source_str.strip_suffix(".gz") {
        let mut bytes = Vec::new();
        flate2::read::GzDecoder::new(open(source)?)
            .read_to_end(&mut bytes)
            .map_err(|e| {
                NetlabError::Image(format!("Failed to decompress {}: {}", source.display(), e))
            })?;
        (PathBuf::from(stem), bytes)
    } else if source_str.ends_with(".ko") {
        let bytes = std::fs::read(source).map_err(|e| {
            NetlabError::Image(format!("Failed to read {}: {}", source.display(), e))
        })?;
        (source.to_path_buf(), bytes)
    } else {
        return Err(NetlabError::Image(format!(
            "unsupported module format: {}",
            source.display()
        )));
    };

    let relative = guest_path.strip_prefix("/").unwrap_or(&guest_path);
    let dest = root.join(relative);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            NetlabError::Image(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(&dest, bytes).map_err(|e| {
        NetlabError::Image(format!("Failed to write {}: {}", dest.display(), e))
    })?;

    Ok(guest_path)
}

fn open(path: &Path) -> NetlabResult<File> {
    File::open(path)
        .map_err(|e| NetlabError::Image(format!("Failed to open {}: {}", path.display(), e)))
}
