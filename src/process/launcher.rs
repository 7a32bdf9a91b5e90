//! Child process creation
//!
//! Spawns a service with captured stdout/stderr. Each output line is
//! forwarded to tracing under the `proc` target so service output
//! lands in the same log stream as our own. Children get their own
//! process group so a console Ctrl-C does not tear down the stack the
//! supervisor is meant to keep alive.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::models::ServiceDef;

use super::ProcessError;

/// Spawn a service per its definition
pub fn spawn(def: &ServiceDef) -> Result<Child, ProcessError> {
    let mut command = Command::new(&def.command);
    command
        .args(&def.args)
        .current_dir(&def.workdir)
        .envs(def.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| ProcessError::LaunchFailed {
        name: def.name.clone(),
        reason: e.to_string(),
    })?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(def.name.clone(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(def.name.clone(), "stderr", stderr);
    }

    tracing::info!(
        name = %def.name,
        command = %def.command,
        pid = child.id(),
        "Process launched"
    );
    Ok(child)
}

/// Run a helper command to completion with captured output.
///
/// For one-shot invocations (media converter runs, the proxy's quit
/// command) rather than managed services. Output lines land under the
/// `proc` target like everything else; the caller inspects the status.
pub async fn run_once<I, S>(
    name: &str,
    program: impl AsRef<OsStr>,
    args: I,
    workdir: Option<&Path>,
) -> std::io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    let output = command.output().await?;
    for (stream, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        for line in String::from_utf8_lossy(bytes).lines() {
            tracing::info!(target: "proc", name = %name, stream, "{line}");
        }
    }
    Ok(output)
}

fn forward_output(name: String, stream: &'static str, reader: impl AsyncRead + Unpin + Send + 'static) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "proc", name = %name, stream, "{line}");
        }
    });
}
