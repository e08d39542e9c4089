//! Error type shared by the host orchestrator and the guest init.
//!
//! Variants follow the failure classes of a lab run:
//! - [`NetlabError::Config`]: malformed topology or settings, rejected before start
//! - [`NetlabError::Image`]: root image assembly failed
//! - [`NetlabError::Engine`] / [`NetlabError::Storage`]: switch or node start failed
//! - [`NetlabError::NodeStart`]: one or more nodes failed, others may still be running
//! - [`NetlabError::Boot`]: fatal inside a guest
//! - [`NetlabError::Interrupted`]: operator or signal cut the run short

use thiserror::Error;

/// Result alias used across all netlab crates.
pub type NetlabResult<T> = Result<T, NetlabError>;

#[derive(Debug, Error)]
pub enum NetlabError {
    /// Invalid topology declaration or settings.
    #[error("config: {0}")]
    Config(String),

    /// A required host binary, file or resource is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem operation failed (workspace, PID files, overlays).
    #[error("storage: {0}")]
    Storage(String),

    /// Root image assembly failed.
    #[error("image: {0}")]
    Image(String),

    /// Starting or controlling an emulator or switch process failed.
    #[error("engine: {0}")]
    Engine(String),

    /// Multiplexer (terminal session) operation failed.
    #[error("multiplexer: {0}")]
    Multiplexer(String),

    /// Resource registered twice (segment, handle).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// One or more nodes failed to start.
    #[error("{} node(s) failed to start:\n  {}", .0.len(), .0.join("\n  "))]
    NodeStart(Vec<String>),

    /// Fatal error during guest boot.
    #[error("boot: {0}")]
    Boot(String),

    /// Run interrupted by a signal or the operator.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Anything else.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<String> for NetlabError {
    fn from(message: String) -> Self {
        NetlabError::Internal(message)
    }
}

impl From<&str> for NetlabError {
    fn from(message: &str) -> Self {
        NetlabError::Internal(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_start_lists_every_failure() {
        let err = NetlabError::NodeStart(vec![
            "r1: overlay failed".to_string(),
            "r2: seed injection failed".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 node(s) failed to start"));
        assert!(text.contains("r1: overlay failed"));
        assert!(text.contains("r2: seed injection failed"));
    }

    #[test]
    fn test_string_converts_to_internal() {
        let err: NetlabError = "boom".into();
        assert!(matches!(err, NetlabError::Internal(ref m) if m == "boom"));
    }
}
