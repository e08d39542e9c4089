//! Shared-library closure of the binaries installed in the root image.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use netlab_shared::errors::{NetlabError, NetlabResult};

/// Libraries listed by `ldd` output, in order.
///
/// A library reported as `not found` is an error.
pub fn parse_ldd(output: &str) -> NetlabResult<Vec<PathBuf>> {
    let mut libraries = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let path = match line.split_once("=>") {
            Some((name, target)) => {
                let target = target.trim();
                if target.starts_with("not found") {
                    return Err(NetlabError::Image(format!(
                        "Shared library {} not found",
                        name.trim()
                    )));
                }
                target.split_whitespace().next()
            }
            None => line.split_whitespace().next(),
        };

        // vdso and similar have no file
        if let Some(path) = path
            && path.starts_with('/')
        {
            libraries.push(PathBuf::from(path));
        }
    }

    Ok(libraries)
}

/// Resolve the combined, de-duplicated library closure of `binaries`.
pub fn resolve_closure(ldd: &Path, binaries: &[&Path]) -> NetlabResult<Vec<PathBuf>> {
    let mut closure: Vec<PathBuf> = Vec::new();

    for binary in binaries {
        let output = Command::new(ldd)
            .arg(binary)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                NetlabError::Image(format!("Failed to run {}: {}", ldd.display(), e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = format!("{}{}", stdout, stderr);

        if text.contains("not a dynamic executable") || text.contains("statically linked") {
            tracing::debug!(binary = %binary.display(), "Static binary, no libraries");
            continue;
        }
        if !output.status.success() {
            return Err(NetlabError::Image(format!(
                "{} {} failed: {}",
                ldd.display(),
                binary.display(),
                stderr.trim()
            )));
        }

        for library in parse_ldd(&stdout)? {
            if !closure.contains(&library) {
                closure.push(library);
            }
        }
    }

    Ok(closure)
}

/// Copy a host file to the same absolute path under `root`.
pub fn install_at_host_path(root: &Path, host_path: &Path) -> NetlabResult<PathBuf> {
    let relative = host_path.strip_prefix("/").unwrap_or(host_path);
    let dest = root.join(relative);

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            NetlabError::Image(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    std::fs::copy(host_path, &dest).map_err(|e| {
        NetlabError::Image(format!(
            "Failed to copy {} into image: {}",
            host_path.display(),
            e
        ))
    })?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LDD_OUTPUT: &str = "\tlinux-vdso.so.1 (0x00007ffc1c7f2000)
\tlibm.so.6 => /lib/x86_64-linux-gnu/libm.so.6 (0x00007f0e5a2e0000)
\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f0e5a0ff000)
\t/lib64/ld-linux-x86-64.so.2 (0x00007f0e5a3e9000)
";

    #[test]
    fn test_parse_ldd() {
        let libs = parse_ldd(LDD_OUTPUT).unwrap();
        assert_eq!(
            libs,
            vec![
                PathBuf::from("/lib/x86_64-linux-gnu/libm.so.6"),
                PathBuf::from("/lib/x86_64-linux-gnu/libc.so.6"),
                PathBuf::from("/lib64/ld-linux-x86-64.so.2"),
            ]
        );
    }

    #[test]
    fn test_parse_ldd_missing_library() {
        let err = parse_ldd("\tlibfoo.so.1 => not found\n").unwrap_err();
        assert!(matches!(err, NetlabError::Image(_)));
        assert!(err.to_string().contains("libfoo.so.1"));
    }

    #[test]
    fn test_install_at_host_path() {
        let src_dir = tempfile::tempdir().unwrap();
        let lib = src_dir.path().join("libfake.so.1");
        std::fs::write(&lib, b"lib").unwrap();
        let root = tempfile::tempdir().unwrap();

        let dest = install_at_host_path(root.path(), &lib).unwrap();

        assert!(dest.starts_with(root.path()));
        assert!(dest.ends_with(lib.strip_prefix("/").unwrap()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"lib");
    }
}
