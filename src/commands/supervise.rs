//! `supervise` (hidden): the detached control loop process
//!
//! Spawned by `start` with its own process group so the console can exit
//! freely. Re-attaches to the services recorded in the PID record, then
//! runs the supervisor loop until shutdown.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::process::{PidRecord, ProcessManager};
use crate::store::LogStore;
use crate::supervisor::Supervisor;

pub async fn run(config: Config) -> Result<()> {
    let mut manager = ProcessManager::new(config.resolved_services());

    // The console writes the PID record just after spawning us; wait
    // briefly for it, then adopt the recorded service PIDs
    if let Some(record) = wait_for_record(&config).await? {
        for (name, pid) in &record.services {
            if let Err(e) = manager.attach(name, *pid) {
                tracing::warn!(name = %name, error = %e, "Could not attach");
            }
        }
    } else {
        tracing::info!("No PID record found, supervising a fresh launch");
        manager
            .start_all()
            .await
            .context("Failed to start services")?;
    }

    let log = LogStore::open(config.paths.log_db())?;
    log.prune_to_max_size(config.logging.log_max_size_mb)?;

    let supervisor = Supervisor::new(config, manager, log);
    supervisor.run().await?;
    Ok(())
}

async fn wait_for_record(config: &Config) -> Result<Option<PidRecord>> {
    let path = config.paths.pid_file();
    for _ in 0..20 {
        if let Some(record) = PidRecord::load(&path)? {
            return Ok(Some(record));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Ok(None)
}
