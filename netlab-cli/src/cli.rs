use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use netlab::{Lab, LabOptions};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "netlab", version, about = "Ephemeral network emulation labs")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a lab and supervise it until the operator ends the run
    Run(commands::run::RunArgs),

    /// Validate a lab file and print the planned topology
    Plan(commands::plan::PlanArgs),

    /// Build the generic-node root image
    Image(commands::image::ImageArgs),
}

/// Flags shared by every subcommand. Each overrides the matching lab setting.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalFlags {
    /// Log filter (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "NETLAB_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emulator binary
    #[arg(long, global = true, env = "NETLAB_EMULATOR")]
    pub emulator: Option<String>,

    /// Virtual switch binary
    #[arg(long, global = true, env = "NETLAB_SWITCH")]
    pub switch: Option<String>,

    /// Guest kernel image
    #[arg(long, global = true, env = "NETLAB_KERNEL")]
    pub kernel: Option<PathBuf>,

    /// Prebuilt root image (skips the image build)
    #[arg(long, global = true, env = "NETLAB_ROOT_IMAGE")]
    pub root_image: Option<PathBuf>,

    /// Memory per node in MiB
    #[arg(long, global = true, env = "NETLAB_MEMORY_MIB")]
    pub memory_mib: Option<u32>,

    /// How long teardown waits after SIGTERM before SIGKILL, in milliseconds
    #[arg(long, global = true, env = "NETLAB_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,
}

impl GlobalFlags {
    pub fn apply(&self, options: &mut LabOptions) {
        if let Some(emulator) = &self.emulator {
            options.emulator = emulator.clone();
        }
        if let Some(switch) = &self.switch {
            options.switch = switch.clone();
        }
        if let Some(kernel) = &self.kernel {
            options.kernel = Some(kernel.clone());
        }
        if let Some(root_image) = &self.root_image {
            options.root_image = Some(root_image.clone());
        }
        if let Some(memory_mib) = self.memory_mib {
            options.memory_mib = memory_mib;
        }
        if let Some(grace_period_ms) = self.grace_period_ms {
            options.grace_period_ms = grace_period_ms;
        }
    }

    /// Load a lab file and apply flag overrides to its settings.
    pub fn load_lab(&self, path: &Path) -> anyhow::Result<Lab> {
        let mut lab = Lab::load(path)?;
        self.apply(lab.options_mut());
        lab.options().validate()?;
        Ok(lab)
    }
}

/// Log to stderr and to a daily file under `~/.netlab/logs`.
///
/// Falls back to stderr only when the log directory cannot be created.
pub fn init_logging(global: &GlobalFlags) -> Option<WorkerGuard> {
    let default_level = global.log_level.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = dirs::home_dir().map(|home| home.join(".netlab").join("logs"));
    match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, "netlab.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            netlab::util::register_to_tracing(non_blocking, env_filter);
            Some(guard)
        }
        _ => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .try_init();
            None
        }
    }
}
