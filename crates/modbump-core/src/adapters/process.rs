//! Thin wrapper around `tokio::process` for the CLI-backed adapters.

use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::domain::{BumpError, BumpResult};

/// Run `cmd` to completion and capture its output. `label` names the
/// command in errors and logs; arguments are never logged because they
/// may carry credentials.
pub(crate) async fn output(mut cmd: Command, label: &str) -> BumpResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = %label, "running");
    cmd.output().await.map_err(|e| BumpError::Command {
        command: label.to_string(),
        detail: format!("failed to start: {e}"),
    })
}

/// Like [`output`] but a non-zero exit is an error. Returns stdout.
pub(crate) async fn checked(cmd: Command, label: &str) -> BumpResult<String> {
    let out = output(cmd, label).await?;
    if !out.status.success() {
        return Err(failure(label, &out));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

pub(crate) fn failure(label: &str, out: &Output) -> BumpError {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let detail = match stderr.trim() {
        "" => format!("exited with {}", out.status),
        msg => msg.to_string(),
    };
    BumpError::Command {
        command: label.to_string(),
        detail,
    }
}
