//! Process manager
//!
//! Exclusive owner of the managed process set and its OS handles. The
//! supervisor (and console commands) drive processes only through this
//! interface; nothing else touches a `Child` or raw PID.
//!
//! Handles come in two flavors: a `Child` we spawned ourselves, or a bare
//! PID adopted from an earlier launch (the detached supervisor re-attaches
//! to services the console started before it existed).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::process::Child;

use crate::models::{ManagedProcess, ProcessState, ServiceDef};

use super::{launcher, pidfile, ProcessError};

enum ProcessHandle {
    /// Spawned by us; can be awaited and reaped
    Owned(Child),

    /// Adopted from a PID record; alive-checks and signals only
    Attached(u32),
}

/// Owner of the managed process set
pub struct ProcessManager {
    processes: HashMap<String, ManagedProcess>,
    handles: HashMap<String, ProcessHandle>,
    /// Launch order, preserved for ordered shutdown (reversed)
    order: Vec<String>,
}

impl ProcessManager {
    pub fn new(defs: Vec<ServiceDef>) -> Self {
        let order: Vec<String> = defs.iter().map(|d| d.name.clone()).collect();
        let processes = defs
            .into_iter()
            .map(|def| (def.name.clone(), ManagedProcess::new(def)))
            .collect();
        Self {
            processes,
            handles: HashMap::new(),
            order,
        }
    }

    /// Launch one service by name and confirm its PID is alive
    pub async fn start(&mut self, name: &str) -> Result<u32, ProcessError> {
        let process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| ProcessError::NotManaged {
                name: name.to_string(),
            })?;

        if matches!(
            process.state,
            ProcessState::Starting | ProcessState::Running
        ) {
            return process.pid.ok_or_else(|| ProcessError::UnexpectedExit {
                name: name.to_string(),
            });
        }

        // A fresh launch out of Crashed/Stopped starts the lifecycle over
        if !process.state.can_transition_to(ProcessState::Starting) {
            *process = ManagedProcess::new(process.def.clone());
        }
        process.state = ProcessState::Starting;

        let child = match launcher::spawn(&process.def) {
            Ok(child) => child,
            Err(e) => {
                process.state = ProcessState::Stopped;
                return Err(e);
            }
        };
        let Some(pid) = child.id() else {
            process.state = ProcessState::Stopped;
            return Err(ProcessError::LaunchFailed {
                name: name.to_string(),
                reason: "exited before a PID could be read".to_string(),
            });
        };

        process.pid = Some(pid);
        self.handles
            .insert(name.to_string(), ProcessHandle::Owned(child));

        // Confirm the PID survived the first instant before declaring Running
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !self.check_alive(name).await {
            let process = self.processes.get_mut(name).ok_or_else(|| {
                ProcessError::NotManaged {
                    name: name.to_string(),
                }
            })?;
            process.state = ProcessState::Stopped;
            process.pid = None;
            return Err(ProcessError::LaunchFailed {
                name: name.to_string(),
                reason: "exited immediately after launch".to_string(),
            });
        }

        if let Some(process) = self.processes.get_mut(name) {
            process.state = ProcessState::Running;
        }
        Ok(pid)
    }

    /// Launch every managed service in definition order
    pub async fn start_all(&mut self) -> Result<(), ProcessError> {
        for name in self.order.clone() {
            self.start(&name).await?;
        }
        Ok(())
    }

    /// Adopt an already-running PID for a named service
    pub fn attach(&mut self, name: &str, pid: u32) -> Result<(), ProcessError> {
        let process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| ProcessError::NotManaged {
                name: name.to_string(),
            })?;

        if pidfile::is_alive(pid) {
            process.pid = Some(pid);
            process.state = ProcessState::Running;
            self.handles
                .insert(name.to_string(), ProcessHandle::Attached(pid));
            tracing::info!(name, pid, "Attached to running process");
        } else {
            process.pid = None;
            process.state = ProcessState::Stopped;
            tracing::warn!(name, pid, "Recorded PID is gone, not attaching");
        }
        Ok(())
    }

    /// Poll whether the process behind a name is still alive.
    ///
    /// Owned children are reaped here when they have exited, so no
    /// zombies accumulate between supervisor ticks.
    pub async fn check_alive(&mut self, name: &str) -> bool {
        match self.handles.get_mut(name) {
            Some(ProcessHandle::Owned(child)) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::debug!(name, %status, "Process exited");
                    false
                }
                Err(e) => {
                    tracing::warn!(name, error = %e, "try_wait failed");
                    false
                }
            },
            Some(ProcessHandle::Attached(pid)) => pidfile::is_alive(*pid),
            None => false,
        }
    }

    /// Politely stop one process, escalating to SIGKILL after the
    /// timeout. Idempotent: stopping a stopped process is a no-op.
    pub async fn stop(&mut self, name: &str, graceful_timeout: Duration) -> Result<(), ProcessError> {
        let Some(handle) = self.handles.remove(name) else {
            return Ok(());
        };

        if let Some(process) = self.processes.get_mut(name) {
            process.state = ProcessState::Stopping;
        }

        match handle {
            ProcessHandle::Owned(child) => {
                stop_owned(name, child, graceful_timeout).await?;
            }
            ProcessHandle::Attached(pid) => {
                stop_attached(name, pid, graceful_timeout).await?;
            }
        }

        if let Some(process) = self.processes.get_mut(name) {
            process.state = ProcessState::Stopped;
            process.pid = None;
        }
        tracing::info!(name, "Process stopped");
        Ok(())
    }

    /// TCP readiness probe: retry connects until success or timeout
    pub async fn probe_tcp(
        &self,
        name: &str,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        let addr = format!("{host}:{port}");
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match TcpStream::connect(&addr).await {
                Ok(_) => {
                    tracing::info!(name, %addr, "Health probe succeeded");
                    return Ok(());
                }
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    return Err(ProcessError::ProbeFailed {
                        name: name.to_string(),
                        detail: format!("{addr}: {e}"),
                    });
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
            }
        }
    }

    /// Apply an FSM transition; invalid transitions are rejected
    pub fn transition(&mut self, name: &str, next: ProcessState) -> Result<(), ProcessError> {
        let process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| ProcessError::NotManaged {
                name: name.to_string(),
            })?;

        if !process.state.can_transition_to(next) {
            tracing::warn!(
                name,
                from = %process.state,
                to = %next,
                "Rejected invalid state transition"
            );
            return Ok(());
        }

        tracing::debug!(name, from = %process.state, to = %next, "State transition");
        process.state = next;
        if next == ProcessState::Restarting {
            process.restart_count += 1;
            process.last_restart_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Snapshot of one process
    pub fn get(&self, name: &str) -> Option<&ManagedProcess> {
        self.processes.get(name)
    }

    /// Snapshot of the whole set, in launch order
    pub fn status(&self) -> Vec<ManagedProcess> {
        self.order
            .iter()
            .filter_map(|name| self.processes.get(name))
            .cloned()
            .collect()
    }

    /// Current PIDs of live entries
    pub fn pids(&self) -> HashMap<String, u32> {
        self.processes
            .iter()
            .filter_map(|(name, p)| p.pid.map(|pid| (name.clone(), pid)))
            .collect()
    }

    /// Names in reverse launch order, for shutdown
    pub fn shutdown_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Number of processes currently holding a live handle
    pub async fn live_count(&mut self) -> usize {
        let names: Vec<String> = self.handles.keys().cloned().collect();
        let mut live = 0;
        for name in names {
            if self.check_alive(&name).await {
                live += 1;
            }
        }
        live
    }
}

async fn stop_owned(
    name: &str,
    mut child: Child,
    graceful_timeout: Duration,
) -> Result<(), ProcessError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => {
                    return Err(ProcessError::Signal {
                        name: name.to_string(),
                        detail: e.to_string(),
                    })
                }
            }

            if tokio::time::timeout(graceful_timeout, child.wait())
                .await
                .is_ok()
            {
                return Ok(());
            }
            tracing::warn!(name, "Graceful timeout elapsed, sending SIGKILL");
        }
    }

    child.kill().await?;
    child.wait().await?;
    Ok(())
}

async fn stop_attached(
    name: &str,
    pid: u32,
    graceful_timeout: Duration,
) -> Result<(), ProcessError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);
        match signal::kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => return Ok(()),
            Err(e) => {
                return Err(ProcessError::Signal {
                    name: name.to_string(),
                    detail: e.to_string(),
                })
            }
        }

        // No Child handle, so poll for exit instead of waiting
        let deadline = tokio::time::Instant::now() + graceful_timeout;
        while tokio::time::Instant::now() < deadline {
            if !pidfile::is_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(name, pid, "Graceful timeout elapsed, sending SIGKILL");
        match signal::kill(nix_pid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::Signal {
                name: name.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (name, pid, graceful_timeout);
        Ok(())
    }
}
