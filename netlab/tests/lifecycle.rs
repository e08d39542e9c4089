//! Integration tests for the lab lifecycle (start, supervise, tear down).
//!
//! The switch and emulator are replaced by shell scripts: the fake switch
//! creates its control socket directory and sleeps, the fake emulator notes
//! its start in an event log and sleeps. The appliance disk tools only log.
//! Nodes run under the detached multiplexer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netlab::mux::Detached;
use netlab::util::{is_process_alive, read_pid_file};
use netlab::{Lab, LabFile, NetlabError, NoPrompt, RunOutcome};
use serial_test::serial;
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Isolated host environment with fake binaries and a workspace base.
struct TestContext {
    bin_dir: PathBuf,
    workspace_base: PathBuf,
    lab_dir: PathBuf,
    _temp_dir: TempDir, // Dropped after test
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let bin_dir = temp_dir.path().join("bin");
        let workspace_base = temp_dir.path().join("runs");
        let lab_dir = temp_dir.path().join("lab");
        for dir in [&bin_dir, &workspace_base, &lab_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }

        netlab::util::write_executable_script(
            &bin_dir.join("fake-switch"),
            "#!/bin/sh\nmkdir -p \"$2\"\nexec sleep 300\n",
        )
        .unwrap();
        let events = bin_dir.join("events");
        netlab::util::write_executable_script(
            &bin_dir.join("fake-emulator"),
            &format!("#!/bin/sh\necho emulator >> {}\nexec sleep 300\n", events.display()),
        )
        .unwrap();
        netlab::util::write_executable_script(
            &bin_dir.join("fake-qemu-img"),
            &format!(
                "#!/bin/sh\necho \"qemu-img $*\" >> {}\nfor last; do :; done\n: > \"$last\"\n",
                events.display()
            ),
        )
        .unwrap();
        netlab::util::write_executable_script(
            &bin_dir.join("fake-virt-copy-in"),
            &format!("#!/bin/sh\necho \"virt-copy-in $*\" >> {}\n", events.display()),
        )
        .unwrap();
        std::fs::write(bin_dir.join("vmlinuz"), b"kernel").unwrap();
        std::fs::write(bin_dir.join("rootfs.cpio.gz"), b"archive").unwrap();

        Self {
            bin_dir,
            workspace_base,
            lab_dir,
            _temp_dir: temp_dir,
        }
    }

    fn settings(&self, kernel: &Path) -> String {
        format!(
            "settings:
  emulator: {bin}/fake-emulator
  switch: {bin}/fake-switch
  kernel: {kernel}
  kernel_version: 0.0.0-netlab-test
  root_image: {bin}/rootfs.cpio.gz
  workspace_base: {base}
  qemu_img: {bin}/fake-qemu-img
  seed_injector: {bin}/fake-virt-copy-in
  kvm: false
  grace_period_ms: 500
",
            bin = self.bin_dir.display(),
            kernel = kernel.display(),
            base = self.workspace_base.display()
        )
    }

    fn lab(&self, nodes: &str) -> Result<Lab, NetlabError> {
        self.lab_with_kernel(nodes, &self.bin_dir.join("vmlinuz"))
    }

    fn lab_with_kernel(&self, nodes: &str, kernel: &Path) -> Result<Lab, NetlabError> {
        let yaml = format!("{}nodes:\n{}", self.settings(kernel), nodes);
        let file = LabFile::from_yaml(&yaml)?;
        Lab::from_file(file, Some(self.lab_dir.clone()))
    }

    fn workspace_count(&self) -> usize {
        std::fs::read_dir(&self.workspace_base).unwrap().count()
    }

    /// Lines of the event log once it has at least `count` of them.
    fn wait_for_events(&self, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let lines: Vec<String> = std::fs::read_to_string(self.bin_dir.join("events"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect();
            if lines.len() >= count || Instant::now() >= deadline {
                return lines;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

fn macs_in(script: &str) -> Vec<String> {
    script
        .split_whitespace()
        .filter_map(|word| word.split(",mac=").nth(1))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// START AND TEARDOWN
// ============================================================================

#[test]
#[serial]
fn two_nodes_on_one_segment_share_one_switch() {
    let ctx = TestContext::new();
    let lab = ctx
        .lab(
            "  - name: a
    segments: \"1\"
  - name: b
    role: router
    segments: \"1\"
",
        )
        .unwrap();

    let running = lab
        .start(Arc::new(Detached::new()), Box::new(NoPrompt))
        .unwrap();
    let layout = running.layout().clone();

    // One switch, two nodes
    assert_eq!(running.registry().len(), 3);
    assert!(running.registry().get("switch-1").is_some());
    assert!(running.registry().get("node-a").is_some());
    assert!(running.registry().get("node-b").is_some());
    assert!(layout.switch_ctl("1").exists());

    let ctl = layout.switch_ctl("1");
    let mut macs = Vec::new();
    for node in ["a", "b"] {
        let script = std::fs::read_to_string(layout.node_script(node)).unwrap();
        assert_eq!(script.matches("sock=").count(), 1, "{}", script);
        assert!(script.contains(&format!("sock={}", ctl.display())));
        macs.extend(macs_in(&script));

        let pid = read_pid_file(&layout.pid_file(netlab::runtime::layout::ProcessRole::Node, node))
            .unwrap();
        assert_eq!(running.registry().get(&format!("node-{}", node)).unwrap().pid(), pid);
    }
    assert_eq!(macs.len(), 2);
    assert_ne!(macs[0], macs[1]);

    let pids = running.registry().pids();
    assert!(pids.iter().all(|pid| is_process_alive(*pid)));

    let report = running.teardown(RunOutcome::Completed);

    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(report.workspace_removed);
    assert_eq!(report.signalled.len(), 3);
    assert!(!layout.root().exists());
    for pid in pids {
        assert!(!is_process_alive(pid), "pid {} survived teardown", pid);
    }
}

#[test]
#[serial]
fn dropping_running_lab_tears_down() {
    let ctx = TestContext::new();
    let lab = ctx
        .lab(
            "  - name: a
    segments: \"1,2\"
",
        )
        .unwrap();

    let running = lab
        .start(Arc::new(Detached::new()), Box::new(NoPrompt))
        .unwrap();
    let root = running.workspace_path().to_path_buf();
    let pids = running.registry().pids();
    assert_eq!(pids.len(), 3);

    drop(running);

    assert!(!root.exists());
    for pid in pids {
        assert!(!is_process_alive(pid));
    }
}

#[test]
#[serial]
fn appliance_boots_from_seeded_overlay() {
    let ctx = TestContext::new();
    let base = ctx.lab_dir.join("veos.vmdk");
    std::fs::write(&base, b"base image").unwrap();
    let seed = ctx.lab_dir.join("sw1.cfg");
    std::fs::write(&seed, "hostname sw1\n").unwrap();

    let lab = ctx
        .lab(&format!(
            "  - name: sw1
    flavor: appliance
    segments: \"1\"
    image: {}
    seed: {}
",
            base.display(),
            seed.display()
        ))
        .unwrap();

    let running = lab
        .start(Arc::new(Detached::new()), Box::new(NoPrompt))
        .unwrap();
    let layout = running.layout().clone();

    let overlay = layout.node_disk("sw1");
    assert!(overlay.starts_with(layout.root()));
    assert!(overlay.is_file());

    let script = std::fs::read_to_string(layout.node_script("sw1")).unwrap();
    assert!(
        script.contains(&format!("file={},if=virtio,format=qcow2", overlay.display())),
        "{}",
        script
    );
    assert!(!script.contains("-kernel"));
    assert!(script.contains("e1000,netdev=net0"));

    // Overlay first, then the seed goes into it, then the emulator starts
    let events = ctx.wait_for_events(3);
    assert_eq!(
        events,
        vec![
            format!(
                "qemu-img create -f qcow2 -F vmdk -b {} {}",
                base.display(),
                overlay.display()
            ),
            format!("virt-copy-in -a {} {} /", overlay.display(), seed.display()),
            "emulator".to_string(),
        ]
    );

    let report = running.teardown(RunOutcome::Completed);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(!overlay.exists());
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
#[serial]
fn unknown_flavor_rejected_before_any_process() {
    let ctx = TestContext::new();
    let result = ctx.lab(
        "  - name: a
    flavor: mainframe
    segments: \"1\"
",
    );

    match result {
        Err(NetlabError::Config(message)) => assert!(message.contains("mainframe")),
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(ctx.workspace_count(), 0);
}

#[test]
#[serial]
fn missing_kernel_fails_before_workspace_exists() {
    let ctx = TestContext::new();
    let lab = ctx
        .lab_with_kernel(
            "  - name: a
    segments: \"1\"
",
            &ctx.bin_dir.join("no-such-kernel"),
        )
        .unwrap();

    let err = lab
        .start(Arc::new(Detached::new()), Box::new(NoPrompt))
        .err()
        .unwrap();

    assert!(matches!(err, NetlabError::NotFound(_)));
    assert_eq!(ctx.workspace_count(), 0);
}

#[test]
#[serial]
fn failed_node_aborts_run_and_cleans_up() {
    let ctx = TestContext::new();
    let lab = ctx
        .lab(
            "  - name: a
    segments: \"1\"
  - name: sw1
    flavor: appliance
    segments: \"1\"
    image: missing-base.qcow2
",
        )
        .unwrap();

    let err = lab
        .start(Arc::new(Detached::new()), Box::new(NoPrompt))
        .err()
        .unwrap();

    match err {
        NetlabError::NodeStart(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("sw1:"), "{:?}", failures);
        }
        other => panic!("expected NodeStart, got {}", other),
    }
    assert_eq!(ctx.workspace_count(), 0);
}
