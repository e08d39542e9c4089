//! Kernel modules baked into the root archive.

use std::path::{Path, PathBuf};

use netlab_shared::constants::boot;

use crate::ops::GuestOps;

/// Module paths in load order; blank lines and `#` comments are skipped.
pub fn parse_manifest(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Load every module in the manifest. Returns how many loaded.
///
/// A module that fails to load is logged and skipped; whatever depended on
/// it surfaces later as a failed mount.
pub fn load_manifest<O: GuestOps>(ops: &mut O) -> usize {
    let manifest = Path::new(boot::MODULE_MANIFEST);
    let text = match ops.read_file(manifest) {
        Ok(text) => text,
        Err(_) => {
            tracing::debug!("No module manifest");
            return 0;
        }
    };

    let mut loaded = 0;
    for module in parse_manifest(&text) {
        match ops.load_module(&module) {
            Ok(()) => loaded += 1,
            Err(e) => tracing::warn!(module = %module.display(), "{}", e),
        }
    }
    tracing::info!(loaded, "Kernel modules loaded");
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::fake::RecordingOps;

    #[test]
    fn test_parse_manifest() {
        let modules = parse_manifest("/lib/modules/6.1/a.ko\n\n# comment\n  /lib/modules/6.1/b.ko \n");
        assert_eq!(
            modules,
            vec![
                PathBuf::from("/lib/modules/6.1/a.ko"),
                PathBuf::from("/lib/modules/6.1/b.ko")
            ]
        );
    }

    #[test]
    fn test_load_in_manifest_order() {
        let mut ops =
            RecordingOps::default().with_file(boot::MODULE_MANIFEST, "/m/netfs.ko\n/m/9p.ko\n");

        assert_eq!(load_manifest(&mut ops), 2);
        assert_eq!(ops.calls, vec!["insmod /m/netfs.ko", "insmod /m/9p.ko"]);
    }

    #[test]
    fn test_missing_manifest_loads_nothing() {
        let mut ops = RecordingOps::default();
        assert_eq!(load_manifest(&mut ops), 0);
        assert!(ops.calls.is_empty());
    }
}
