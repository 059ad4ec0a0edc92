// CommandRunner (§4.8): spawns a phase's shell command and supervises it —
// draining output on a fixed cadence, fanning it out to the registered
// output handlers, and polling stop-condition checkers that can preempt the
// subprocess.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::Result;
use crate::output_handlers::OutputHandler;
use crate::stop_conditions::{StopConditionChecker, StopEvent};

/// Read in 8 KiB chunks per non-blocking drain attempt; large enough that a
/// chatty phase doesn't need many ticks to catch up, small enough that a
/// single drain never blocks the poll loop noticeably.
const DRAIN_CHUNK: usize = 8 * 1024;

pub struct CommandRunner {
    output_polling_interval: Duration,
    /// Set by the process-wide SIGTERM handler (§5: "the runner installs a
    /// handler that kills the subprocess").
    terminate: Arc<AtomicBool>,
}

impl CommandRunner {
    pub fn new(output_polling_interval: Duration, terminate: Arc<AtomicBool>) -> Self {
        Self { output_polling_interval, terminate }
    }

    /// Runs `command` to completion (or until a stop condition or SIGTERM
    /// preempts it), returning `(exit_code, stop_event, exit_reason)` with
    /// the exit code already normalized modulo 256 (§4.7).
    pub async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
        cwd: &Path,
        output_handlers: &[Arc<dyn OutputHandler>],
        stop_checkers: &[Arc<dyn StopConditionChecker>],
    ) -> Result<(i32, Option<StopEvent>, String)> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().expect("stdout piped at spawn");
        let mut stderr = child.stderr.take().expect("stderr piped at spawn");

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    self.drain_once(&mut stdout, &mut stderr, output_handlers, stop_checkers).await;
                    return Ok(self.normalize(status, None, String::new()));
                }
                _ = tokio::time::sleep(self.output_polling_interval) => {
                    self.drain_once(&mut stdout, &mut stderr, output_handlers, stop_checkers).await;

                    if self.terminate.load(Ordering::SeqCst) {
                        let _ = child.start_kill();
                        let status = child.wait().await?;
                        return Ok(self.normalize(status, None, "terminated by SIGTERM".to_string()));
                    }

                    for checker in stop_checkers {
                        if let Some((event, reason)) = checker.check().await {
                            post_line(&reason, output_handlers).await;
                            let _ = child.start_kill();
                            let status = child.wait().await?;
                            return Ok(self.normalize(status, Some(event), reason));
                        }
                    }
                }
            }
        }
    }

    async fn drain_once(
        &self,
        stdout: &mut tokio::process::ChildStdout,
        stderr: &mut tokio::process::ChildStderr,
        output_handlers: &[Arc<dyn OutputHandler>],
        stop_checkers: &[Arc<dyn StopConditionChecker>],
    ) {
        let mut drained = drain_pipe(stdout, output_handlers).await;
        drained |= drain_pipe(stderr, output_handlers).await;
        if drained {
            for checker in stop_checkers {
                checker.on_output();
            }
        }
    }

    fn normalize(&self, status: std::process::ExitStatus, event: Option<StopEvent>, reason: String) -> (i32, Option<StopEvent>, String) {
        let raw = raw_exit_code(status);
        let normalized = raw.rem_euclid(256);
        let reason = if !reason.is_empty() {
            reason
        } else if normalized == 0 {
            "Normal exit".to_string()
        } else {
            format!("Unknown error rc={normalized}")
        };
        (normalized, event, reason)
    }
}

#[cfg(unix)]
fn raw_exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // Python's subprocess convention (and the original agent): a signal-killed
    // process reports the *negative* signal number before the mod-256 wrap,
    // so SIGKILL (-9) normalizes to 247, not 137.
    status.code().unwrap_or_else(|| status.signal().map(|s| -s).unwrap_or(-1))
}

#[cfg(not(unix))]
fn raw_exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Non-blocking drain: reads whatever is immediately available without
/// waiting for more, decoding lossily so invalid UTF-8 never aborts a job
/// (§4.8).
async fn drain_pipe<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, handlers: &[Arc<dyn OutputHandler>]) -> bool {
    let mut buf = [0u8; DRAIN_CHUNK];
    let mut any = false;
    loop {
        match tokio::time::timeout(Duration::from_millis(0), reader.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                any = true;
                let text = String::from_utf8_lossy(&buf[..n]);
                for handler in handlers {
                    handler.on_output(&text).await;
                }
            }
            Ok(Err(_)) => break,
        }
    }
    any
}

async fn post_line(reason: &str, handlers: &[Arc<dyn OutputHandler>]) {
    let line = format!("{reason}\n");
    for handler in handlers {
        handler.on_output(&line).await;
    }
}
