//! netlab guest init.
//!
//! Runs as `/init` from the root archive, assembles the guest root from the
//! host exports and walks the boot state machine down to an interactive
//! shell. Later stages run in re-executed copies of this binary, resuming
//! from the handoff record in the environment.

#[cfg(not(target_os = "linux"))]
compile_error!("netlab guest init is Linux-only; build with a Linux target");

#[cfg(target_os = "linux")]
mod fsm;
#[cfg(target_os = "linux")]
mod modules;
#[cfg(target_os = "linux")]
mod mounts;
#[cfg(target_os = "linux")]
mod ops;
#[cfg(target_os = "linux")]
mod power;
#[cfg(target_os = "linux")]
mod stages;
#[cfg(target_os = "linux")]
mod terminal;

#[cfg(target_os = "linux")]
use std::os::unix::process::CommandExt;

#[cfg(target_os = "linux")]
use clap::Parser;
#[cfg(target_os = "linux")]
use netlab_shared::constants::boot;

/// netlab guest init
#[cfg(target_os = "linux")]
#[derive(Parser, Debug)]
#[command(author, version, about = "netlab guest init - boots a lab node")]
struct InitArgs {
    /// Handoff record to resume from (defaults to the environment)
    #[arg(long, env = boot::HANDOFF_ENV)]
    handoff: Option<String>,

    /// Shell started when the boot fails
    #[arg(long, default_value = "/bin/sh")]
    rescue_shell: String,
}

#[cfg(target_os = "linux")]
fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] netlab init panicked: {}", panic_info);
    }));

    if let Err(e) = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    // The kernel passes unknown boot words as arguments to init
    let args = InitArgs::try_parse().unwrap_or_else(|_| InitArgs {
        handoff: std::env::var(boot::HANDOFF_ENV).ok(),
        rescue_shell: "/bin/sh".into(),
    });

    let mut ops = ops::LinuxOps;
    match fsm::resume(args.handoff.as_deref(), &mut ops, None) {
        Ok((halt, _)) => tracing::error!(?halt, "Boot sequence stopped"),
        Err(e) => tracing::error!("Boot failed: {}", e),
    }

    // Keep the node reachable for inspection instead of panicking the kernel
    let err = std::process::Command::new(&args.rescue_shell)
        .env_remove(boot::HANDOFF_ENV)
        .exec();
    eprintln!("[ERROR] Failed to start {}: {}", args.rescue_shell, err);
    std::process::exit(1);
}
