//! Configuration for a lab run.

use crate::runtime::constants::{binaries, timing, vm_defaults};
use netlab_shared::errors::{NetlabError, NetlabResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of a lab run.
///
/// Loaded from the `settings` section of the lab file; the CLI overrides
/// individual fields from flags and `NETLAB_*` environment variables.
/// Every field has a default so an empty section is valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabOptions {
    /// Emulator binary (name on PATH or path).
    #[serde(default = "default_emulator")]
    pub emulator: String,

    /// Virtual switch binary.
    #[serde(default = "default_switch")]
    pub switch: String,

    /// Disk image tool used to create appliance overlays.
    #[serde(default = "default_qemu_img")]
    pub qemu_img: String,

    /// Offline filesystem editor used to inject appliance seed files.
    #[serde(default = "default_seed_injector")]
    pub seed_injector: String,

    /// Toolset binary installed in the root image.
    #[serde(default = "default_toolset")]
    pub toolset: String,

    /// Guest init binary installed as /init.
    #[serde(default = "default_guest_init")]
    pub guest_init: String,

    /// Guest kernel image. Default: /boot/vmlinuz-<kernel_version>
    #[serde(default)]
    pub kernel: Option<PathBuf>,

    /// Kernel version used to resolve modules. Default: running host kernel.
    #[serde(default)]
    pub kernel_version: Option<String>,

    /// Kernel modules to include in the root image (dependencies are added).
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,

    /// Memory per node in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,

    /// vCPUs per node.
    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// Enable KVM acceleration.
    #[serde(default = "default_true")]
    pub kvm: bool,

    /// Directory under which the run workspace is created. Default: system temp dir.
    #[serde(default)]
    pub workspace_base: Option<PathBuf>,

    /// Prebuilt root archive; skips image assembly when set.
    #[serde(default)]
    pub root_image: Option<PathBuf>,

    /// Operator home exported to generic guests. Default: $HOME
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Lab working directory exported to generic guests. Default: lab file directory.
    #[serde(default)]
    pub lab_dir: Option<PathBuf>,

    /// Disk format of appliance base images. Default: from the file extension.
    #[serde(default)]
    pub appliance_format: Option<String>,

    /// Directory inside the appliance image receiving the seed file.
    #[serde(default = "default_seed_dest")]
    pub seed_dest: String,

    /// Grace period between SIGTERM and SIGKILL at teardown.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long to wait for each switch control socket.
    #[serde(default = "default_switch_ready_timeout_ms")]
    pub switch_ready_timeout_ms: u64,
}

fn default_emulator() -> String {
    binaries::EMULATOR.to_string()
}

fn default_switch() -> String {
    binaries::SWITCH.to_string()
}

fn default_qemu_img() -> String {
    binaries::QEMU_IMG.to_string()
}

fn default_seed_injector() -> String {
    binaries::SEED_INJECTOR.to_string()
}

fn default_toolset() -> String {
    binaries::TOOLSET.to_string()
}

fn default_guest_init() -> String {
    binaries::GUEST_INIT.to_string()
}

fn default_modules() -> Vec<String> {
    vm_defaults::DEFAULT_MODULES
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_memory_mib() -> u32 {
    vm_defaults::DEFAULT_MEMORY_MIB
}

fn default_cpus() -> u32 {
    vm_defaults::DEFAULT_CPUS
}

fn default_true() -> bool {
    true
}

fn default_seed_dest() -> String {
    "/".to_string()
}

fn default_grace_period_ms() -> u64 {
    timing::GRACE_PERIOD_MS
}

fn default_switch_ready_timeout_ms() -> u64 {
    timing::SWITCH_READY_TIMEOUT_MS
}

impl Default for LabOptions {
    fn default() -> Self {
        Self {
            emulator: default_emulator(),
            switch: default_switch(),
            qemu_img: default_qemu_img(),
            seed_injector: default_seed_injector(),
            toolset: default_toolset(),
            guest_init: default_guest_init(),
            kernel: None,
            kernel_version: None,
            modules: default_modules(),
            memory_mib: default_memory_mib(),
            cpus: default_cpus(),
            kvm: true,
            workspace_base: None,
            root_image: None,
            home: None,
            lab_dir: None,
            appliance_format: None,
            seed_dest: default_seed_dest(),
            grace_period_ms: default_grace_period_ms(),
            switch_ready_timeout_ms: default_switch_ready_timeout_ms(),
        }
    }
}

impl LabOptions {
    /// Kernel version for module resolution.
    pub fn resolved_kernel_version(&self) -> NetlabResult<String> {
        if let Some(version) = &self.kernel_version {
            return Ok(version.clone());
        }
        let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").map_err(|e| {
            NetlabError::NotFound(format!("Cannot determine host kernel version: {}", e))
        })?;
        Ok(release.trim().to_string())
    }

    /// Guest kernel image path.
    pub fn resolved_kernel(&self) -> NetlabResult<PathBuf> {
        if let Some(kernel) = &self.kernel {
            return Ok(kernel.clone());
        }
        Ok(PathBuf::from(format!(
            "/boot/vmlinuz-{}",
            self.resolved_kernel_version()?
        )))
    }

    /// Host module directory for the guest kernel.
    pub fn modules_dir(&self) -> NetlabResult<PathBuf> {
        Ok(PathBuf::from("/lib/modules").join(self.resolved_kernel_version()?))
    }

    pub fn resolved_home(&self) -> Option<PathBuf> {
        self.home.clone().or_else(dirs::home_dir)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn switch_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_ready_timeout_ms)
    }

    /// Validate settings that are independent of the host.
    pub fn validate(&self) -> NetlabResult<()> {
        if self.memory_mib < 64 {
            return Err(NetlabError::Config(format!(
                "memory_mib must be at least 64, got {}",
                self.memory_mib
            )));
        }
        if self.cpus == 0 {
            return Err(NetlabError::Config("cpus must be at least 1".into()));
        }
        if !self.seed_dest.starts_with('/') {
            return Err(NetlabError::Config(format!(
                "seed_dest must be an absolute guest path, got '{}'",
                self.seed_dest
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let options: LabOptions = serde_yaml::from_str("{}").unwrap();

        assert_eq!(options.emulator, "qemu-system-x86_64");
        assert_eq!(options.switch, "vde_switch");
        assert_eq!(options.memory_mib, 256);
        assert!(options.kvm);
        assert!(options.modules.iter().any(|m| m == "overlay"));
        assert_eq!(options.grace_period(), Duration::from_secs(3));
    }

    #[test]
    fn test_unknown_setting_rejected() {
        let result: Result<LabOptions, _> = serde_yaml::from_str("memroy_mib: 512");
        assert!(result.is_err());
    }

    #[test]
    fn test_kernel_defaults_to_version() {
        let options = LabOptions {
            kernel_version: Some("6.1.0-test".into()),
            ..Default::default()
        };

        assert_eq!(
            options.resolved_kernel().unwrap(),
            PathBuf::from("/boot/vmlinuz-6.1.0-test")
        );
        assert_eq!(
            options.modules_dir().unwrap(),
            PathBuf::from("/lib/modules/6.1.0-test")
        );
    }

    #[test]
    fn test_validate() {
        assert!(LabOptions::default().validate().is_ok());

        let small = LabOptions {
            memory_mib: 16,
            ..Default::default()
        };
        assert!(matches!(small.validate(), Err(NetlabError::Config(_))));

        let relative_seed = LabOptions {
            seed_dest: "mnt/flash".into(),
            ..Default::default()
        };
        assert!(relative_seed.validate().is_err());
    }
}
