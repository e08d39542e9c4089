//! Run workspace: the ephemeral directory owning every artifact of one run.

use std::path::{Path, PathBuf};

use netlab_shared::errors::{NetlabError, NetlabResult};
use tempfile::TempDir;

use crate::runtime::constants::filenames;
use crate::runtime::layout::WorkspaceLayout;

/// Exclusively-owned temporary directory for a lab run.
///
/// Created once at run start and destroyed once at teardown. The
/// underlying `TempDir` also removes the tree on drop, so a panic between
/// creation and teardown does not leak the directory.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Allocate a fresh `netlab-XXXXXX` directory under `base` (or the system temp dir).
    pub fn create(base: Option<&Path>) -> NetlabResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(filenames::WORKSPACE_PREFIX);

        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base).map_err(|e| {
                    NetlabError::Storage(format!(
                        "Failed to create workspace base {}: {}",
                        base.display(),
                        e
                    ))
                })?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| NetlabError::Storage(format!("Failed to create workspace: {}", e)))?;

        let path = dir.path().to_path_buf();
        tracing::info!(workspace = %path.display(), "Workspace created");

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.path)
    }

    /// Directory name, used to derive the multiplexer session name.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filenames::WORKSPACE_PREFIX.trim_end_matches('-').to_string())
    }

    pub fn is_destroyed(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the workspace recursively. Calling it again is a no-op.
    pub fn destroy(&mut self) -> NetlabResult<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        dir.close().map_err(|e| {
            NetlabError::Storage(format!(
                "Failed to remove workspace {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::info!(workspace = %self.path.display(), "Workspace removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_destroy_once() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(Some(base.path())).unwrap();
        let path = workspace.path().to_path_buf();

        assert!(path.is_dir());
        assert!(workspace.name().starts_with("netlab-"));

        std::fs::write(path.join("switch-1.pid"), "1\n").unwrap();
        std::fs::create_dir(path.join("switch-1.ctl")).unwrap();

        workspace.destroy().unwrap();
        assert!(!path.exists());
        assert!(workspace.is_destroyed());

        // Second destroy is a no-op
        workspace.destroy().unwrap();
    }

    #[test]
    fn test_create_fails_under_file() {
        let base = tempfile::tempdir().unwrap();
        let file = base.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();

        let result = Workspace::create(Some(&file));
        assert!(matches!(result, Err(NetlabError::Storage(_))));
    }

    #[test]
    fn test_drop_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let workspace = Workspace::create(Some(base.path())).unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
