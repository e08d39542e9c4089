//! Process supervision: handles, the registry that owns them, and the
//! coordinator that reclaims everything at the end of a run.
//!
//! Every switch and node process gets exactly one [`ProcessHandle`],
//! registered before the call that started it returns. The
//! [`CleanupCoordinator`] is the only consumer of the registry and runs
//! exactly once, either explicitly or from `Drop`.

mod cleanup;
mod handle;
mod registry;
mod spawn;

pub use cleanup::{CleanupCoordinator, NoPrompt, OperatorPrompt, RunOutcome, TeardownReport};
pub use handle::ProcessHandle;
pub use registry::{ProcessRegistry, Rejected};
pub(crate) use spawn::{run_tool, spawn_process};
