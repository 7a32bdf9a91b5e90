//! Managed process plumbing
//!
//! - [`launcher`]: platform-neutral child creation with captured output
//! - [`manager`]: ownership of the managed process set, start/stop/status
//! - [`pidfile`]: the persisted PID record locating a detached supervisor

pub mod launcher;
pub mod manager;
pub mod pidfile;

pub use manager::ProcessManager;
pub use pidfile::PidRecord;

use thiserror::Error;

/// Errors raised by process lifecycle operations
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Bad executable, workdir, or permissions at start time
    #[error("Failed to launch {name}: {reason}")]
    LaunchFailed { name: String, reason: String },

    /// A critical process exited outside of a requested stop
    #[error("Process {name} exited unexpectedly")]
    UnexpectedExit { name: String },

    /// Named process is not in the managed set
    #[error("Unknown process: {name}")]
    NotManaged { name: String },

    /// Health probe never succeeded within its timeout
    #[error("Health probe failed for {name}: {detail}")]
    ProbeFailed { name: String, detail: String },

    /// Signalling a PID failed
    #[error("Failed to signal {name}: {detail}")]
    Signal { name: String, detail: String },

    /// PID record on disk is unreadable or stale
    #[error("Invalid PID record: {detail}")]
    PidRecord { detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Whether the restart policy applies. Launch and signalling failures
    /// need operator attention; exits and probe timeouts are retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedExit { .. } | Self::ProbeFailed { .. }
        )
    }
}
