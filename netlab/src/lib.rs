//! netlab: ephemeral multi-node network emulation labs.
//!
//! A lab is a set of virtual switches (one per segment) and emulated
//! nodes wired to them, described in a small YAML file:
//!
//! ```no_run
//! use std::sync::Arc;
//! use netlab::{Lab, NoPrompt, RunOutcome, mux::Detached};
//!
//! # fn main() -> netlab::NetlabResult<()> {
//! let lab = Lab::load(std::path::Path::new("lab.yaml"))?;
//! let running = lab.start(Arc::new(Detached::new()), Box::new(NoPrompt))?;
//! println!("{}", running.help_text());
//! let report = running.teardown(RunOutcome::Completed);
//! assert!(report.workspace_removed);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod mux;
pub mod node;
pub mod rootfs;
pub mod runtime;
pub mod switch;
pub mod topology;
pub mod util;

pub use controller::{
    CleanupCoordinator, NoPrompt, OperatorPrompt, ProcessHandle, ProcessRegistry, RunOutcome,
    TeardownReport,
};
pub use netlab_shared::{BootParams, NetlabError, NetlabResult, NodeRole};
pub use runtime::options::LabOptions;
pub use runtime::{Lab, RunningLab};
pub use topology::{GuestFlavor, LabFile, LabPlan, PlannedNode};
