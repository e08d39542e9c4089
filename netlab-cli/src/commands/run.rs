use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Args;
use netlab::mux::{Detached, Multiplexer, Tmux};
use netlab::{NoPrompt, OperatorPrompt, RunOutcome, TeardownReport};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Set in the re-executed process to the tmux session created for the run.
const SESSION_ENV: &str = "NETLAB_SESSION";

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Lab file describing the nodes
    pub lab: PathBuf,

    /// Run nodes in the background instead of tmux windows
    #[arg(long)]
    pub headless: bool,

    /// Do not wait for acknowledgment when the run ends abnormally
    #[arg(short, long)]
    pub yes: bool,

    /// Directory in which the run workspace is created
    #[arg(long, env = "NETLAB_WORKSPACE_BASE")]
    pub workspace_base: Option<PathBuf>,

    /// tmux binary
    #[arg(long, env = "NETLAB_TMUX", default_value = "tmux")]
    pub tmux: String,
}

/// Things that end the interactive phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabEvent {
    Enter,
    StdinClosed,
    Signal(i32),
}

pub fn execute(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    if !args.headless && std::env::var_os(SESSION_ENV).is_none() {
        return reexec_in_session(&args);
    }

    let mut lab = global.load_lab(&args.lab)?;
    if let Some(base) = &args.workspace_base {
        lab.options_mut().workspace_base = Some(base.clone());
    }

    let multiplexer: Arc<dyn Multiplexer> = if args.headless {
        Arc::new(Detached::new())
    } else {
        let binary = netlab::util::find_binary(&args.tmux)?;
        Arc::new(Tmux::current(binary)?)
    };

    let (tx, rx) = mpsc::channel();
    let events = Arc::new(Mutex::new(rx));
    let stdin_open = Arc::new(AtomicBool::new(true));
    watch_signals(tx.clone())?;
    watch_stdin(tx, stdin_open.clone());

    let prompt: Box<dyn OperatorPrompt> = if args.yes || args.headless {
        Box::new(NoPrompt)
    } else {
        Box::new(ChannelPrompt {
            events: events.clone(),
            stdin_open: stdin_open.clone(),
        })
    };

    let running = lab.start(multiplexer, prompt)?;
    println!("{}", running.help_text());
    tracing::info!(
        workspace = %running.workspace_path().display(),
        nodes = running.plan().nodes.len(),
        segments = running.plan().segments.len(),
        "Lab running"
    );

    let outcome = wait_for_end(&events);
    let report = running.teardown(outcome.clone());
    print_summary(&report);

    outcome.into_result()?;
    if !report.is_clean() {
        anyhow::bail!(
            "Teardown incomplete\nErrors:\n  {}",
            report.failures.join("\n  ")
        );
    }
    Ok(())
}

/// Start a dedicated tmux session whose control window runs this command again.
fn reexec_in_session(args: &RunArgs) -> anyhow::Result<()> {
    let tmux = netlab::util::find_binary(&args.tmux)?;
    let exe = std::env::current_exe().context("Failed to locate the netlab executable")?;
    let session = format!("netlab-{}", std::process::id());

    tracing::debug!(session = %session, "Starting tmux session");
    let status = std::process::Command::new(&tmux)
        .args(["new-session", "-s", &session, "-n", "control"])
        .arg(&exe)
        .args(std::env::args_os().skip(1))
        .env(SESSION_ENV, &session)
        .env_remove("TMUX")
        .status()
        .with_context(|| format!("Failed to run {}", tmux.display()))?;

    if !status.success() {
        anyhow::bail!("tmux session {} exited with {}", session, status);
    }
    Ok(())
}

fn watch_signals(tx: Sender<LabEvent>) -> anyhow::Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to install signal handlers")?;
    std::thread::spawn(move || {
        for signal in signals.forever() {
            if tx.send(LabEvent::Signal(signal)).is_err() {
                break;
            }
        }
    });
    Ok(())
}

fn watch_stdin(tx: Sender<LabEvent>, stdin_open: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    stdin_open.store(false, Ordering::SeqCst);
                    let _ = tx.send(LabEvent::StdinClosed);
                    break;
                }
                Ok(_) => {
                    if tx.send(LabEvent::Enter).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Block until the operator presses Enter or a signal arrives.
fn wait_for_end(events: &Mutex<Receiver<LabEvent>>) -> RunOutcome {
    let events = match events.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    loop {
        match events.recv() {
            Ok(LabEvent::Enter) => return RunOutcome::Completed,
            Ok(LabEvent::StdinClosed) => {
                tracing::debug!("stdin closed, waiting for a signal to end the run");
            }
            Ok(LabEvent::Signal(signal)) => {
                return RunOutcome::Interrupted(format!("received {}", signal_name(signal)));
            }
            Err(_) => return RunOutcome::Interrupted("event channel closed".into()),
        }
    }
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "signal",
    }
}

/// Waits for Enter on the shared event channel; a further signal also counts.
struct ChannelPrompt {
    events: Arc<Mutex<Receiver<LabEvent>>>,
    stdin_open: Arc<AtomicBool>,
}

impl OperatorPrompt for ChannelPrompt {
    fn acknowledge(&mut self, message: &str) {
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{}", message);

        if !self.stdin_open.load(Ordering::SeqCst) {
            tracing::warn!("stdin closed, tearing down without acknowledgment");
            return;
        }
        let _ = writeln!(stderr, "Press Enter to tear the lab down.");

        let events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Any event acknowledges; a closed channel means nobody can answer.
        let _ = events.recv();
    }
}

/// The session may already be gone when this runs, so write errors are ignored.
fn print_summary(report: &TeardownReport) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(
        stderr,
        "Stopped {} process(es), {} killed after the grace period; workspace {}",
        report.signalled.len(),
        report.killed.len(),
        if report.workspace_removed {
            "removed"
        } else {
            "NOT removed"
        }
    );
    for failure in &report.failures {
        let _ = writeln!(stderr, "  {}", failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_completes_run() {
        let (tx, rx) = mpsc::channel();
        tx.send(LabEvent::StdinClosed).unwrap();
        tx.send(LabEvent::Enter).unwrap();

        assert_eq!(wait_for_end(&Mutex::new(rx)), RunOutcome::Completed);
    }

    #[test]
    fn test_signal_interrupts_run() {
        let (tx, rx) = mpsc::channel();
        tx.send(LabEvent::Signal(SIGTERM)).unwrap();

        assert_eq!(
            wait_for_end(&Mutex::new(rx)),
            RunOutcome::Interrupted("received SIGTERM".into())
        );
    }

    #[test]
    fn test_prompt_returns_when_stdin_closed() {
        let (_tx, rx) = mpsc::channel();
        let mut prompt = ChannelPrompt {
            events: Arc::new(Mutex::new(rx)),
            stdin_open: Arc::new(AtomicBool::new(false)),
        };

        prompt.acknowledge("run failed");
    }
}
