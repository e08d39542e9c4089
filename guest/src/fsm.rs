//! Boot state machine.
//!
//! ```text
//! RAMDISK_INIT --exec--> PRIVILEGE_DROP --exec--> INTERACTIVE_SETUP
//!     --> [TOPOLOGY_CONFIG] --> INTERACTIVE_SHELL --> INTERACTIVE_SHELL ...
//! ```
//!
//! `Exec` transitions replace the process; the stage to resume and the
//! [`BootContext`] travel in the [`Handoff`] record through the
//! environment.

use std::fmt;
use std::str::FromStr;

use netlab_shared::constants::boot;
use netlab_shared::errors::{NetlabError, NetlabResult};
use netlab_shared::BootParams;
use serde::{Deserialize, Serialize};

use crate::ops::{GuestOps, LoginSession};
use crate::stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RamdiskInit,
    PrivilegeDrop,
    InteractiveSetup,
    TopologyConfig,
    InteractiveShell,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RamdiskInit => "RAMDISK_INIT",
            Stage::PrivilegeDrop => "PRIVILEGE_DROP",
            Stage::InteractiveSetup => "INTERACTIVE_SETUP",
            Stage::TopologyConfig => "TOPOLOGY_CONFIG",
            Stage::InteractiveShell => "INTERACTIVE_SHELL",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = NetlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAMDISK_INIT" => Ok(Stage::RamdiskInit),
            "PRIVILEGE_DROP" => Ok(Stage::PrivilegeDrop),
            "INTERACTIVE_SETUP" => Ok(Stage::InteractiveSetup),
            "TOPOLOGY_CONFIG" => Ok(Stage::TopologyConfig),
            "INTERACTIVE_SHELL" => Ok(Stage::InteractiveShell),
            other => Err(NetlabError::Config(format!("unknown boot stage '{}'", other))),
        }
    }
}

/// How the root filesystem was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootStrategy {
    /// Host root as the lower layer of an overlay with a tmpfs upper.
    Overlay,
    /// Read-only bind of the host root; nothing outside the exports is writable.
    ReadOnlyBind,
}

/// State carried from stage to stage, across process replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootContext {
    pub params: Option<BootParams>,
    pub root: Option<RootStrategy>,
    pub session: Option<LoginSession>,
    /// Completed interactive shell sessions.
    #[serde(default)]
    pub shell_runs: u32,
}

impl BootContext {
    pub fn is_degraded(&self) -> bool {
        self.root == Some(RootStrategy::ReadOnlyBind)
    }

    pub fn params(&self) -> NetlabResult<&BootParams> {
        self.params
            .as_ref()
            .ok_or_else(|| NetlabError::Boot("boot parameters missing from context".into()))
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run the next stage in this process.
    Continue(Stage),
    /// Replace the process and resume at the stage.
    Exec(Stage),
}

/// Record passed across exec in [`boot::HANDOFF_ENV`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Handoff {
    pub stage: String,
    pub context: BootContext,
}

impl Handoff {
    pub fn encode(stage: Stage, context: &BootContext) -> NetlabResult<String> {
        let record = Handoff {
            stage: stage.as_str().to_string(),
            context: context.clone(),
        };
        serde_json::to_string(&record)
            .map_err(|e| NetlabError::Boot(format!("Failed to encode handoff: {}", e)))
    }

    pub fn decode(text: &str) -> NetlabResult<(Stage, BootContext)> {
        let record: Handoff = serde_json::from_str(text).map_err(|e| {
            NetlabError::Config(format!("malformed {}: {}", boot::HANDOFF_ENV, e))
        })?;
        let stage = record.stage.parse()?;
        Ok((stage, record.context))
    }
}

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// The process was handed over to a new image resuming at the stage.
    Replaced(Stage),
    /// The step limit was reached before running the stage.
    StepLimit(Stage),
}

/// Run a single stage.
pub fn step<O: GuestOps>(
    stage: Stage,
    ctx: &mut BootContext,
    ops: &mut O,
) -> NetlabResult<Transition> {
    tracing::debug!(stage = %stage, "Entering boot stage");
    match stage {
        Stage::RamdiskInit => stages::ramdisk::run(ctx, ops),
        Stage::PrivilegeDrop => stages::privilege::run(ctx, ops),
        Stage::InteractiveSetup => stages::setup::run(ctx, ops),
        Stage::TopologyConfig => stages::topology::run(ctx, ops),
        Stage::InteractiveShell => stages::shell::run(ctx, ops),
    }
}

/// Drive stages until the process is replaced.
///
/// `max_steps` bounds the number of stages run; `None` runs until an
/// `Exec` transition or an error.
pub fn drive<O: GuestOps>(
    mut stage: Stage,
    mut ctx: BootContext,
    ops: &mut O,
    max_steps: Option<usize>,
) -> NetlabResult<(Halt, BootContext)> {
    let mut steps = 0usize;
    loop {
        if max_steps.is_some_and(|max| steps >= max) {
            return Ok((Halt::StepLimit(stage), ctx));
        }
        steps += 1;

        match step(stage, &mut ctx, ops)? {
            Transition::Continue(next) => stage = next,
            Transition::Exec(next) => {
                let handoff = Handoff::encode(next, &ctx)?;
                let program = stages::run_layout().init_path();
                tracing::info!(stage = %next, program = %program.display(), "Handing over");
                ops.exec_init(&program, &handoff, ctx.session.as_ref())?;
                return Ok((Halt::Replaced(next), ctx));
            }
        }
    }
}

/// Resume from a handoff record, or start a fresh boot without one.
///
/// A record naming an unknown stage is rejected before any effect.
pub fn resume<O: GuestOps>(
    handoff: Option<&str>,
    ops: &mut O,
    max_steps: Option<usize>,
) -> NetlabResult<(Halt, BootContext)> {
    let (stage, ctx) = match handoff {
        Some(text) => Handoff::decode(text)?,
        None => (Stage::RamdiskInit, BootContext::default()),
    };
    drive(stage, ctx, ops, max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::fake::RecordingOps;
    use netlab_shared::NodeRole;

    fn shell_context() -> BootContext {
        let mut params = BootParams::new("h1", NodeRole::Host, 1);
        params.uid = Some(1000);
        params.gid = Some(1000);
        params.home = Some("/home/alice".into());
        BootContext {
            params: Some(params),
            root: Some(RootStrategy::Overlay),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_stage_halts_before_any_effect() {
        let mut ops = RecordingOps::default();
        let handoff = r#"{"stage":"KERNEL_PANIC","context":{"params":null,"root":null,"session":null}}"#;

        let err = resume(Some(handoff), &mut ops, None).unwrap_err();

        assert!(matches!(err, NetlabError::Config(_)));
        assert!(err.to_string().contains("KERNEL_PANIC"));
        assert!(ops.calls.is_empty());
    }

    #[test]
    fn test_malformed_handoff_halts_before_any_effect() {
        let mut ops = RecordingOps::default();

        let err = resume(Some("not json"), &mut ops, None).unwrap_err();

        assert!(matches!(err, NetlabError::Config(_)));
        assert!(ops.calls.is_empty());
    }

    #[test]
    fn test_shell_reentered_n_times() {
        let mut ops = RecordingOps::default();
        let n = 5;

        let (halt, ctx) = drive(Stage::InteractiveShell, shell_context(), &mut ops, Some(n)).unwrap();

        assert_eq!(halt, Halt::StepLimit(Stage::InteractiveShell));
        assert_eq!(ctx.shell_runs, n as u32);
        assert_eq!(ops.shells.len(), n);
        assert!(ops.shells.iter().all(|s| s.uid == Some(1000) && s.args == ["-l"]));
        assert_eq!(
            ops.calls.iter().filter(|c| *c == "sleep 1000ms").count(),
            n
        );
        assert!(ops.execs.is_empty());
    }

    #[test]
    fn test_handoff_roundtrip_keeps_context() {
        let ctx = shell_context();
        let text = Handoff::encode(Stage::PrivilegeDrop, &ctx).unwrap();

        let (stage, decoded) = Handoff::decode(&text).unwrap();

        assert_eq!(stage, Stage::PrivilegeDrop);
        assert_eq!(decoded, ctx);
    }

    #[test]
    fn test_stage_names_parse_back() {
        for stage in [
            Stage::RamdiskInit,
            Stage::PrivilegeDrop,
            Stage::InteractiveSetup,
            Stage::TopologyConfig,
            Stage::InteractiveShell,
        ] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }
}
