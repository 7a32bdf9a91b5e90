//! Ordered graceful shutdown
//!
//! Sequence: the reverse proxy is asked to quit through its own graceful
//! mechanism first (so in-flight HTTP requests drain), then every other
//! process is stopped in reverse launch order with SIGTERM, escalating to
//! SIGKILL after the per-process timeout. Shutdown always completes; a
//! process that had to be force-killed is a warning, not an error.

use std::time::Duration;

use crate::process::{launcher, pidfile, ProcessManager};

/// Result counts for a completed shutdown
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub failed: usize,
}

/// Stop every managed process. Never fails as a whole: individual stop
/// errors are logged and counted, the sequence continues.
pub async fn shutdown_all(
    manager: &mut ProcessManager,
    graceful_timeout: Duration,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    // Phase 1: proxy drains connections through its own quit command
    if manager.get("proxy").is_some() {
        quit_proxy(manager, graceful_timeout).await;
    }

    // Phase 2: everything else, newest first
    for name in manager.shutdown_order() {
        match manager.stop(&name, graceful_timeout).await {
            Ok(()) => report.stopped += 1,
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Stop failed during shutdown");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        stopped = report.stopped,
        failed = report.failed,
        "Shutdown complete"
    );
    report
}

/// Ask the reverse proxy to quit gracefully via its control command
/// (`nginx ... -s quit`), then wait for the PID to disappear. Falls
/// through silently; phase 2 covers a proxy that ignored the request.
async fn quit_proxy(manager: &mut ProcessManager, graceful_timeout: Duration) {
    let Some(process) = manager.get("proxy") else {
        return;
    };
    let Some(pid) = process.pid else {
        return;
    };
    let def = process.def.clone();

    let mut args = def.args.clone();
    args.push("-s".to_string());
    args.push("quit".to_string());
    let result = launcher::run_once(&def.name, &def.command, &args, Some(&def.workdir)).await;

    match result {
        Ok(output) if output.status.success() => {
            let deadline = tokio::time::Instant::now() + graceful_timeout;
            while tokio::time::Instant::now() < deadline {
                if !pidfile::is_alive(pid) {
                    tracing::info!("Proxy quit gracefully");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tracing::warn!("Proxy ignored quit request");
        }
        Ok(output) => {
            tracing::warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Proxy quit command failed"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not run proxy quit command");
        }
    }
}
