//! `stop`: request shutdown from the detached supervisor and wait it out

use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::process::{pidfile, PidRecord, ProcessManager};
use crate::supervisor;

pub async fn run(config: Config) -> Result<()> {
    let pid_path = config.paths.pid_file();
    let Some(record) = PidRecord::load_live(&pid_path)? else {
        println!("Not running");
        return Ok(());
    };

    pidfile::request_shutdown(&config.paths.shutdown_signal())?;
    println!(
        "Shutdown requested (supervisor pid {})",
        record.supervisor_pid
    );

    // The supervisor notices within one tick and runs ordered shutdown;
    // give it the full graceful budget plus slack before forcing
    let budget = config.tick_interval() + config.graceful_timeout() + Duration::from_secs(5);
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if !pidfile::is_alive(record.supervisor_pid) {
            println!("Stopped");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    // Supervisor is stuck: take over, stop its services directly
    tracing::warn!(
        pid = record.supervisor_pid,
        "Supervisor did not shut down in time, forcing"
    );
    let mut manager = ProcessManager::new(config.resolved_services());
    for (name, pid) in &record.services {
        let _ = manager.attach(name, *pid);
    }
    supervisor::shutdown_all(&mut manager, config.graceful_timeout()).await;

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(
            Pid::from_raw(record.supervisor_pid as i32),
            Signal::SIGKILL,
        );
    }

    PidRecord::remove(&pid_path)?;
    pidfile::clear_shutdown_signal(&config.paths.shutdown_signal())?;

    if manager.live_count().await > 0 {
        bail!("Some processes are still alive after forced shutdown");
    }
    println!("Stopped (forced)");
    Ok(())
}
