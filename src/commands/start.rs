//! `start`: bring the whole stack up and hand off to a detached supervisor

use std::process::Stdio;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::convert::{self, WorkerContext};
use crate::process::{PidRecord, ProcessManager};
use crate::store::{ContentStore, LogEvent, LogStore};

pub async fn run(config: Config) -> Result<()> {
    let pid_path = config.paths.pid_file();
    if let Some(record) = PidRecord::load_live(&pid_path)? {
        println!(
            "Already running (supervisor pid {})",
            record.supervisor_pid
        );
        return Ok(());
    }
    // A leftover shutdown request must not kill the stack we are starting
    crate::process::pidfile::clear_shutdown_signal(&config.paths.shutdown_signal())?;

    // Initial scan runs to completion before any service starts, so the
    // web server never serves from an empty or stale store
    let store = std::sync::Arc::new(ContentStore::open(config.paths.content_db())?);
    let ctx = std::sync::Arc::new(WorkerContext::from_config(&config, store)?);
    let report = convert::initial_scan(&ctx)
        .await
        .context("Initial content scan failed")?;
    println!(
        "Initial scan: {} stored, {} unchanged, {} failures",
        report.pages_stored, report.pages_unchanged, report.failures
    );
    drop(ctx);

    let mut manager = ProcessManager::new(config.resolved_services());
    manager.start_all().await.context("Failed to start services")?;

    manager
        .probe_tcp(
            "web",
            &config.web.host,
            config.web.port,
            config.probe_timeout(),
        )
        .await
        .context("Web server did not become healthy")?;

    let supervisor_pid = spawn_supervisor(&config)?;
    let record = PidRecord::new(supervisor_pid, manager.pids());
    record.save(&pid_path)?;

    let log = LogStore::open(config.paths.log_db())?;
    log.append(&LogEvent::info("console", "Stack started"))?;

    println!("Started {} services, supervisor pid {supervisor_pid}", manager.pids().len());
    Ok(())
}

/// Launch `siteward supervise` detached from this console: own process
/// group, output discarded (it logs to the event store), never awaited.
fn spawn_supervisor(config: &Config) -> Result<u32> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;

    let mut command = std::process::Command::new(exe);
    command
        .arg("supervise")
        .env(
            "SITEWARD_CONTENT_ROOT",
            &config.paths.content_root,
        )
        .env("SITEWARD_OUTPUT_DIR", &config.paths.output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().context("Failed to spawn supervisor")?;
    Ok(child.id())
}
