//! Process supervision loop
//!
//! Single-threaded fixed-tick loop and sole driver of process state
//! transitions. Each tick it polls liveness of the managed set, applies
//! the restart policy to anything degraded, and honors shutdown requests
//! (terminating signal or the on-disk signal file left by a console).
//!
//! The loop owns the [`ProcessManager`] outright; nothing else holds a
//! reference to it, so process bookkeeping has no races by construction.

pub mod policy;
pub mod shutdown;

pub use policy::{AttemptHistory, RestartDecision, RestartPolicy};
pub use shutdown::{shutdown_all, ShutdownReport};

use std::collections::HashMap;
use std::time::Instant;

use crate::config::Config;
use crate::models::ProcessState;
use crate::process::{pidfile, PidRecord, ProcessManager};
use crate::store::{LogEvent, LogStore};

/// The supervision control loop
pub struct Supervisor {
    config: Config,
    manager: ProcessManager,
    policy: RestartPolicy,
    histories: HashMap<String, AttemptHistory>,
    /// Degraded processes wait out their cooldown before a restart
    cooldown_until: HashMap<String, Instant>,
    log: LogStore,
}

impl Supervisor {
    pub fn new(config: Config, manager: ProcessManager, log: LogStore) -> Self {
        let policy = RestartPolicy::new(
            config.restart_window(),
            config.supervisor.max_restart_attempts,
            config.restart_cooldown(),
        );
        Self {
            config,
            manager,
            policy,
            histories: HashMap::new(),
            cooldown_until: HashMap::new(),
            log,
        }
    }

    /// Run until a shutdown request arrives, then execute ordered
    /// graceful shutdown and clear the persisted identity.
    pub async fn run(mut self) -> crate::error::Result<()> {
        self.write_pid_record()?;
        self.record_event(LogEvent::info("supervisor", "Supervisor started"));

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        #[cfg(unix)]
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            #[cfg(unix)]
            let stop = tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = tokio::signal::ctrl_c() => true,
                _ = term.recv() => true,
            };

            #[cfg(not(unix))]
            let stop = tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = tokio::signal::ctrl_c() => true,
            };

            if stop {
                break;
            }
        }

        self.record_event(LogEvent::info("supervisor", "Shutdown requested"));
        let report = shutdown_all(&mut self.manager, self.config.graceful_timeout()).await;
        self.record_event(LogEvent::info(
            "supervisor",
            format!("Shutdown complete ({} stopped)", report.stopped),
        ));

        PidRecord::remove(&self.config.paths.pid_file())?;
        pidfile::clear_shutdown_signal(&self.config.paths.shutdown_signal())?;
        Ok(())
    }

    /// One health-check pass. Returns true when shutdown was requested,
    /// either through the signal file or because a critical process
    /// exhausted its restart budget: a crashed critical process leaves
    /// the suite unusable, so the whole stack comes down with it.
    async fn tick(&mut self) -> bool {
        if pidfile::shutdown_requested(&self.config.paths.shutdown_signal()) {
            return true;
        }

        let snapshot = self.manager.status();
        let mut record_changed = false;
        let mut critical_crashed = false;

        for process in snapshot {
            let name = process.def.name.clone();
            match process.state {
                ProcessState::Running => {
                    if !self.manager.check_alive(&name).await {
                        self.on_unexpected_exit(&name, process.def.critical).await;
                    }
                }
                ProcessState::Degraded if process.def.critical => {
                    if self.try_restart(&name).await {
                        record_changed = true;
                    }
                    if self.manager.get(&name).map(|p| p.state) == Some(ProcessState::Crashed) {
                        self.record_event(LogEvent::error(
                            "supervisor",
                            format!("Critical process {name} crashed, stopping the suite"),
                        ));
                        critical_crashed = true;
                    }
                }
                _ => {}
            }
        }

        if record_changed {
            if let Err(e) = self.write_pid_record() {
                tracing::warn!(error = %e, "Could not refresh PID record");
            }
        }
        critical_crashed
    }

    async fn on_unexpected_exit(&mut self, name: &str, critical: bool) {
        tracing::warn!(name, critical, "Process exited unexpectedly");
        let _ = self.manager.transition(name, ProcessState::Degraded);

        if critical {
            self.record_event(LogEvent::warn(
                name,
                "Unexpected exit, restart pending",
            ));
            self.cooldown_until
                .insert(name.to_string(), Instant::now() + self.policy.cooldown());
        } else {
            // Optional processes are left stopped
            self.record_event(LogEvent::info(name, "Optional process exited, leaving stopped"));
            let _ = self.manager.transition(name, ProcessState::Stopping);
            let _ = self.manager.transition(name, ProcessState::Stopped);
        }
    }

    /// Attempt a restart of a degraded process once its cooldown has
    /// elapsed. Returns true when the PID set changed.
    async fn try_restart(&mut self, name: &str) -> bool {
        if let Some(until) = self.cooldown_until.get(name) {
            if Instant::now() < *until {
                return false;
            }
        }
        self.cooldown_until.remove(name);

        let history = self.histories.entry(name.to_string()).or_default();
        match self.policy.decide(history) {
            RestartDecision::GiveUp => {
                let _ = self.manager.transition(name, ProcessState::Crashed);
                tracing::error!(
                    name,
                    "Restart limit exceeded, giving up; operator intervention required"
                );
                self.record_event(LogEvent::error(
                    name,
                    "Crashed: restart limit exceeded, no further automatic restarts",
                ));
                false
            }
            RestartDecision::Restart => {
                history.record();
                let _ = self.manager.transition(name, ProcessState::Restarting);
                tracing::info!(name, "Restarting process");

                match self.manager.start(name).await {
                    Ok(pid) => {
                        if name == "web" {
                            self.probe_web(name).await;
                        }
                        self.record_event(LogEvent::info(
                            name,
                            format!("Restarted with pid {pid}"),
                        ));
                        true
                    }
                    Err(e) => {
                        tracing::warn!(name, error = %e, "Restart failed");
                        self.record_event(LogEvent::warn(name, format!("Restart failed: {e}")));
                        // Failed launch lands in Stopped; walk it back to
                        // Degraded so the next tick re-applies the policy
                        let _ = self.manager.transition(name, ProcessState::Starting);
                        let _ = self.manager.transition(name, ProcessState::Degraded);
                        self.cooldown_until
                            .insert(name.to_string(), Instant::now() + self.policy.cooldown());
                        false
                    }
                }
            }
        }
    }

    async fn probe_web(&mut self, name: &str) {
        let result = self
            .manager
            .probe_tcp(
                name,
                &self.config.web.host,
                self.config.web.port,
                self.config.probe_timeout(),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(name, error = %e, "Health probe failed after restart");
            let _ = self.manager.transition(name, ProcessState::Degraded);
            self.cooldown_until
                .insert(name.to_string(), Instant::now() + self.policy.cooldown());
        }
    }

    fn write_pid_record(&self) -> crate::error::Result<()> {
        let record = PidRecord::new(std::process::id(), self.manager.pids());
        record.save(&self.config.paths.pid_file())?;
        Ok(())
    }

    fn record_event(&self, event: LogEvent) {
        if let Err(e) = self.log.append(&event) {
            tracing::warn!(error = %e, "Could not persist event");
        }
    }
}
