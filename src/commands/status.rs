//! `status`: report supervisor/service liveness and recent events

use anyhow::Result;

use crate::config::Config;
use crate::process::{pidfile, PidRecord};
use crate::store::{ContentStore, LogStore};

pub async fn run(config: Config, service: Option<String>) -> Result<()> {
    let Some(record) = PidRecord::load_live(&config.paths.pid_file())? else {
        println!("Not running");
        return Ok(());
    };

    println!(
        "Supervisor: pid {} (since {})",
        record.supervisor_pid,
        record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let mut names: Vec<&String> = record
        .services
        .keys()
        .filter(|name| service.as_ref().map_or(true, |s| s == *name))
        .collect();
    names.sort();

    if names.is_empty() {
        if let Some(service) = &service {
            println!("No such service: {service}");
        }
    }
    for name in names {
        let pid = record.services[name];
        let state = if pidfile::is_alive(pid) {
            "running"
        } else {
            "stopped"
        };
        println!("  {name:<12} {state:<8} pid {pid}");
    }

    if let Ok(store) = ContentStore::open(config.paths.content_db()) {
        println!("Pages stored: {}", store.count()?);
    }

    let log = LogStore::open(config.paths.log_db())?;
    let events = log.recent(config.logging.log_history_count)?;
    if !events.is_empty() {
        println!("Recent events:");
        for event in events {
            println!(
                "  {} [{:>5}] {}: {}",
                event.timestamp.format("%H:%M:%S"),
                event.level,
                event.component,
                event.message
            );
        }
    }

    Ok(())
}
