//! Persisted supervisor identity
//!
//! The detached supervisor writes a JSON PID record so a later console
//! invocation can find it (and the services it launched) for status and
//! shutdown. Written atomically via temp file + rename; a record whose
//! supervisor PID is no longer alive is stale and treated as absent.
//!
//! A sibling `shutdown.signal` file carries the shutdown request across
//! the console/supervisor process boundary.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProcessError;

/// On-disk record of a running supervisor and its services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidRecord {
    /// PID of the detached supervisor process
    pub supervisor_pid: u32,

    /// Service name to PID, as of the last launch
    pub services: HashMap<String, u32>,

    /// When the record was written
    pub started_at: DateTime<Utc>,
}

impl PidRecord {
    pub fn new(supervisor_pid: u32, services: HashMap<String, u32>) -> Self {
        Self {
            supervisor_pid,
            services,
            started_at: Utc::now(),
        }
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<(), ProcessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| ProcessError::PidRecord {
            detail: e.to_string(),
        })?;

        let tmp = path.with_extension("pid.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), pid = self.supervisor_pid, "PID record written");
        Ok(())
    }

    /// Read a record; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, ProcessError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = serde_json::from_str(&content).map_err(|e| ProcessError::PidRecord {
            detail: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(record))
    }

    /// Load only if the recorded supervisor is still alive; a stale
    /// record is deleted on the way out.
    pub fn load_live(path: &Path) -> Result<Option<Self>, ProcessError> {
        match Self::load(path)? {
            Some(record) if is_alive(record.supervisor_pid) => Ok(Some(record)),
            Some(record) => {
                tracing::info!(
                    pid = record.supervisor_pid,
                    "Stale PID record removed"
                );
                remove(path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Delete the record (idempotent)
    pub fn remove(path: &Path) -> Result<(), ProcessError> {
        remove(path)
    }
}

fn remove(path: &Path) -> Result<(), ProcessError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether a PID refers to a live process
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal;
        use nix::unistd::Pid;

        // Null signal probes existence without affecting the process;
        // EPERM still means it exists
        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Request shutdown of a detached supervisor by touching the signal file
pub fn request_shutdown(signal_path: &Path) -> Result<(), ProcessError> {
    if let Some(parent) = signal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(signal_path, Utc::now().to_rfc3339())?;
    Ok(())
}

/// Whether a shutdown request is pending
#[must_use]
pub fn shutdown_requested(signal_path: &Path) -> bool {
    signal_path.exists()
}

/// Consume a shutdown request (idempotent)
pub fn clear_shutdown_signal(signal_path: &Path) -> Result<(), ProcessError> {
    remove(signal_path)
}
