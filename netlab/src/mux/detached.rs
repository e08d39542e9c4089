use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use netlab_shared::errors::{NetlabError, NetlabResult};

use super::{Multiplexer, PaneProcess};
use crate::controller::spawn_process;

/// Runs launch scripts as background process groups, no terminal attached.
#[derive(Debug, Default)]
pub struct Detached;

impl Detached {
    pub fn new() -> Self {
        Self
    }
}

impl Multiplexer for Detached {
    fn name(&self) -> &'static str {
        "detached"
    }

    fn session(&self) -> Option<&str> {
        None
    }

    fn open_window(&self, window: &str, script: &Path, log: &Path) -> NetlabResult<PaneProcess> {
        let out = File::create(log).map_err(|e| {
            NetlabError::Storage(format!("Failed to create log {}: {}", log.display(), e))
        })?;
        let err = out.try_clone().map_err(|e| {
            NetlabError::Storage(format!("Failed to clone log {}: {}", log.display(), e))
        })?;

        // Run through sh: the script may still be open for writing elsewhere
        let child = spawn_process(
            Path::new("/bin/sh"),
            [script.as_os_str()],
            Stdio::from(out),
            Stdio::from(err),
        )?;

        tracing::debug!(window, pid = child.id(), "Started detached window");

        Ok(PaneProcess {
            pid: child.id(),
            child: Some(child),
        })
    }

    fn kill_session(&self) -> NetlabResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::write_executable_script;

    #[test]
    fn test_open_window_logs_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("node-a.sh");
        let log = dir.path().join("node-a.log");
        write_executable_script(&script, "#!/bin/sh\necho started\n").unwrap();

        let mux = Detached::new();
        let pane = mux.open_window("a", &script, &log).unwrap();
        let mut child = pane.child.unwrap();
        let status = child.wait().unwrap();

        assert!(status.success());
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "started\n");
        assert!(mux.session().is_none());
        assert!(mux.kill_session().is_ok());
    }
}
