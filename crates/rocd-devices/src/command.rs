//! Helpers for shelling out to backend control programs.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::BackendError;

fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run a control command, discarding its output.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<(), BackendError> {
    let line = render(program, args);
    debug!(command = %line, "running command");

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| BackendError::CommandFailed {
            command: line.clone(),
            reason: err.to_string(),
        })?;

    if !status.success() {
        return Err(BackendError::CommandFailed {
            command: line,
            reason: format!("exited with {status}"),
        });
    }

    Ok(())
}

/// Run a control command and collect its standard output.
pub(crate) async fn output(program: &str, args: &[&str]) -> Result<Vec<u8>, BackendError> {
    let line = render(program, args);
    debug!(command = %line, "running command");

    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|err| BackendError::CommandFailed {
            command: line.clone(),
            reason: err.to_string(),
        })?;

    if !out.status.success() {
        return Err(BackendError::CommandFailed {
            command: line,
            reason: format!("exited with {}", out.status),
        });
    }

    Ok(out.stdout)
}
