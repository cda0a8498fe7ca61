//! Spawning and terminating the bridge executable.

use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use nmble_config::Config;
use tracing::{debug, warn};

use super::XPORT_TARGET;
use crate::errors::TransportError;

/// Time a closing bridge gets to exit on its own before it is killed.
const EXIT_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// A freshly spawned bridge with its stdio handles detached.
pub(super) struct SpawnedBridge {
    pub(super) child: Child,
    pub(super) stdin: ChildStdin,
    pub(super) stdout: ChildStdout,
}

fn capture_failed(command: &str, stream: &str) -> TransportError {
    TransportError::Spawn {
        command: command.to_string(),
        source: std::io::Error::other(format!("failed to capture {stream}")),
    }
}

/// Starts the configured bridge with piped stdin and stdout.
pub(super) fn spawn_bridge(config: &Config) -> Result<SpawnedBridge, TransportError> {
    let command_name = config.bridge_command().to_string();

    debug!(
        target: XPORT_TARGET,
        command = %command_name,
        args = ?config.bridge_args(),
        "spawning bridge process"
    );

    let mut child = Command::new(config.bridge_command().as_std_path())
        .args(config.bridge_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| TransportError::Spawn {
            command: command_name.clone(),
            source,
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| capture_failed(&command_name, "stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| capture_failed(&command_name, "stdout"))?;

    debug!(target: XPORT_TARGET, pid = child.id(), "bridge process spawned");

    Ok(SpawnedBridge {
        child,
        stdin,
        stdout,
    })
}

fn kill_after_grace_period(child: &mut Child) {
    thread::sleep(EXIT_GRACE_PERIOD);
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(
                target: XPORT_TARGET,
                ?status,
                "bridge exited during grace period"
            );
        }
        Ok(None) | Err(_) => {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Waits briefly for the bridge to exit after its stdin closed, then kills it.
pub(super) fn terminate_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: XPORT_TARGET, ?status, "bridge exited");
        }
        Ok(None) => {
            warn!(
                target: XPORT_TARGET,
                "bridge did not exit gracefully, waiting before killing"
            );
            kill_after_grace_period(child);
        }
        Err(error) => {
            warn!(
                target: XPORT_TARGET,
                error = %error,
                "failed to check bridge status, waiting before killing"
            );
            kill_after_grace_period(child);
        }
    }
}
