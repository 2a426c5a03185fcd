//! Cancellable subprocess execution
//!
//! Wraps `tokio::process::Command` so every external tool invocation honors
//! the item's cancellation token: on cancel the child is killed and awaited
//! with a short grace period before the call returns.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for a killed child to be reaped
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Longest stderr snippet propagated into error messages
const STDERR_SNIPPET_LEN: usize = 400;

/// Run a command to completion, failing on non-zero exit with a stderr
/// snippet in the error. Cancellation kills the child.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    current_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    debug!(program, ?args, "Spawning subprocess");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.with_context(|| format!("failed waiting for {program}"))?
        }
        _ = cancel.cancelled() => {
            // kill_on_drop reaps the child; give it a moment before returning
            tokio::time::sleep(KILL_GRACE).await;
            warn!(program, "Subprocess cancelled");
            bail!("{program} cancelled");
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet: String = stderr.chars().take(STDERR_SNIPPET_LEN).collect();
        bail!(
            "{program} exited with {}: {}",
            output.status,
            snippet.trim()
        );
    }

    Ok(output.stdout)
}

/// Whether a program is present on PATH.
pub async fn is_on_path(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
