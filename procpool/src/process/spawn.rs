//! Launching OS processes from a [`ProcessSpec`].
//!
//! Every process gets piped stdin, stdout and stderr; nothing is inherited
//! from the pool's own process.

use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handle::ManagedProcess;
use crate::error::{PoolError, Result};
use crate::models::ProcessSpec;

/// Build the command for `spec` without spawning it.
pub(crate) fn build_command(spec: &ProcessSpec) -> Command {
    let mut cmd = Command::new(&spec.command);

    // Add arguments
    cmd.args(&spec.args);

    // Set working directory
    if let Some(ref dir) = spec.cwd {
        cmd.current_dir(dir);
    }

    // Handle environment
    if spec.clear_env {
        cmd.env_clear();
    }

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    // Configure stdio
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // A dropped handle must not leave the child running.
    cmd.kill_on_drop(true);

    cmd
}

/// Spawn `spec` and wrap it in a [`ManagedProcess`].
///
/// The output pipes start draining immediately; `cancel` stops them early.
pub(crate) fn launch(
    id: &str,
    spec: ProcessSpec,
    serial: u64,
    backlog_capacity: usize,
    cancel: &CancellationToken,
) -> Result<ManagedProcess> {
    debug!(id, command = %spec.command, args = ?spec.args, "Spawning process");

    let child = build_command(&spec)
        .spawn()
        .map_err(|source| PoolError::Launch {
            id: id.to_string(),
            command: spec.command.clone(),
            source,
        })?;

    Ok(ManagedProcess::new(
        id.to_string(),
        spec,
        serial,
        child,
        backlog_capacity,
        cancel,
    ))
}
