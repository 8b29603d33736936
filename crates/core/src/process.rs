//! Child process execution with captured output.
//!
//! [`run_process`] is used by the worker runtime to run the quantification
//! executable and by the local container backend to run `docker`. Both
//! need the same thing: spawn, collect stdout and stderr as one interleaved
//! stream, wait with an optional deadline, and report the exit status and
//! elapsed time.

use std::io::{PipeReader, Read};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Maximum bytes of output kept (10 MiB). The rest is read and discarded so
/// the child never blocks or sees a closed pipe.
pub const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Errors from spawning or waiting on a child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to create output pipe for {program}: {source}")]
    Pipe {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {elapsed_ms}ms")]
    Timeout { program: String, elapsed_ms: u64 },
}

/// What a finished child process produced.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Stdout and stderr in the order the child wrote them, capped at
    /// [`MAX_OUTPUT_BYTES`].
    pub combined: Vec<u8>,
    /// Bytes read past the cap and discarded.
    pub dropped_bytes: u64,
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The combined output as lossy UTF-8, for log lines.
    pub fn combined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }
}

/// Spawn `cmd`, capture its output and wait for it to exit.
///
/// Stdin is closed and both output streams share one pipe. With a
/// `timeout`, the child is killed once it elapses and
/// [`ProcessError::Timeout`] is returned.
pub async fn run_process(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let pipe_error = |source| ProcessError::Pipe {
        program: program.clone(),
        source,
    };

    let (reader, writer) = std::io::pipe().map_err(pipe_error)?;
    let stderr_writer = writer.try_clone().map_err(pipe_error)?;

    cmd.stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        .kill_on_drop(true);

    let start = Instant::now();
    let spawned = cmd.spawn();
    // The command keeps its configured stdio. Replacing it closes the
    // parent's write ends so the reader sees EOF once the child exits.
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let mut child = spawned.map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output_task = tokio::task::spawn_blocking(move || read_capped(reader));

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => waited,
            Err(_) => {
                return Err(ProcessError::Timeout {
                    program,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        },
        None => child.wait().await,
    }
    .map_err(|source| ProcessError::Wait {
        program: program.clone(),
        source,
    })?;

    let elapsed = start.elapsed();
    let (combined, dropped_bytes) = output_task.await.unwrap_or_default();
    if dropped_bytes > 0 {
        tracing::warn!(
            program = %program,
            kept_bytes = combined.len(),
            dropped_bytes,
            "Process output truncated"
        );
    }

    tracing::debug!(
        program = %program,
        exit_code = status.code().unwrap_or(-1),
        elapsed_ms = elapsed.as_millis() as u64,
        "Process exited"
    );

    Ok(ProcessOutput {
        combined,
        dropped_bytes,
        exit_code: status.code().unwrap_or(-1),
        elapsed,
    })
}

/// Keep the first [`MAX_OUTPUT_BYTES`] and drain the rest to EOF.
fn read_capped(mut reader: PipeReader) -> (Vec<u8>, u64) {
    let mut buf = Vec::new();
    let _ = (&mut reader).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf);
    let dropped = std::io::copy(&mut reader, &mut std::io::sink()).unwrap_or(0);
    (buf, dropped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
