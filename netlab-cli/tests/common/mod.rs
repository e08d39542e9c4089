#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestContext {
    pub cmd: Command,
    pub dir: PathBuf,
    // Removed when the test ends
    _temp_dir: TempDir,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_netlab");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        // Keep log files out of the real home directory
        cmd.env("HOME", &self.dir);
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a lab file into the test directory and return its path.
    pub fn write_lab(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.join(name);
        std::fs::write(&path, body).expect("Failed to write lab file");
        path
    }
}

pub fn netlab() -> TestContext {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let dir = temp_dir.path().to_path_buf();

    let mut ctx = TestContext {
        cmd: Command::new(env!("CARGO_BIN_EXE_netlab")),
        dir,
        _temp_dir: temp_dir,
    };
    ctx.cmd = ctx.new_cmd();
    ctx
}
