use std::{
    ffi::OsStr,
    io,
    process::{ExitStatus, Output, Stdio},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::process::Command;

use crate::util::format_duration;

pub mod faststart;
pub mod probe;

pub use faststart::{FfmpegFastStart, VideoTransformer};
pub use probe::{AspectRatio, FfprobeProber, VideoProber};

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),
    #[error("process did not finish within {}", format_duration(*.0))]
    Timeout(Duration),
    #[error("process failed with status {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Runs an ffmpeg / ffprobe process to completion, killing it if it exceeds `time_limit`.
///
/// A successful exit with output on stderr is logged as a warning but still returned as success,
/// callers have to validate stdout themselves.
pub async fn run_media_tool<I, A>(
    program: &OsStr,
    args: I,
    time_limit: Duration,
) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("Spawning media tool command {:?}", &command);
    let start_time = Instant::now();
    let output = match tokio::time::timeout(time_limit, command.output()).await {
        Ok(output) => output.map_err(ToolError::Spawn)?,
        // the child is killed when the output future is dropped
        Err(_) => return Err(ToolError::Timeout(time_limit)),
    };

    let program = program.to_string_lossy();
    if !output.status.success() {
        return Err(ToolError::Failed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if !output.stderr.is_empty() {
        log::warn!(
            "{program} reported errors but finished successfully, proceeding: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    log::debug!(
        "{program} finished in {}",
        format_duration(start_time.elapsed())
    );
    Ok(output)
}
