//! Running external audio tools (ffmpeg, players, system voices).

use std::ffi::OsStr;
use std::process::Stdio;

use parley_core::error::{ParleyError, Result};

/// Run `program` with `args` to completion.
///
/// Stdout is discarded; a non-zero exit status becomes an error carrying the
/// tail of stderr. `wrap` picks the error variant for the calling subsystem.
pub async fn run<I, S>(program: &str, args: I, wrap: fn(String) -> ParleyError) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| wrap(format!("Failed to start {}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();
    Err(wrap(format!("{} exited with {}: {}", program, output.status, detail)))
}
