//! Out-of-process execution of generated artifacts.
//!
//! A timing artifact writes exactly one thing to stderr: either elapsed
//! seconds as a decimal number, or a fault record of four newline-separated
//! fields `severity`, `message`, `file`, `line` (exiting with `severity`).
//! Anything else means the artifact and the runner disagree on the protocol.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::error::{ConfigError, ExecutionError, Result, SnippetFault};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Spawn retries when the kernel reports the artifact as still open for
/// writing. A freshly cached file can briefly be held by a writer fd that a
/// concurrently forked child inherited.
const SPAWN_BUSY_RETRIES: u32 = 5;

#[cfg(unix)]
const ETXTBSY: i32 = 26;

/// What a single timing run reported.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    /// Elapsed seconds for the whole loop.
    Sample(f64),
    Fault(SnippetFault),
}

/// Interpret a timing artifact's stderr. `None` if it is neither a number
/// nor a four-field fault record.
pub fn classify(output: &str) -> Option<ExecutionOutcome> {
    if let Ok(seconds) = output.trim().parse::<f64>() {
        if seconds.is_finite() {
            return Some(ExecutionOutcome::Sample(seconds));
        }
    }

    let fields: Vec<&str> = output.split('\n').collect();
    let [severity, message, file, line] = fields.as_slice() else {
        return None;
    };
    Some(ExecutionOutcome::Fault(SnippetFault {
        severity: severity.trim().parse().ok()?,
        message: (*message).to_string(),
        file: (*file).to_string(),
        line: line.trim().parse().ok()?,
    }))
}

/// Real output of a whole artifact.
#[derive(Clone, Debug, Serialize)]
pub struct WholeOutput {
    pub path: PathBuf,
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(
    handle: Option<JoinHandle<io::Result<Vec<u8>>>>,
    path: &Path,
) -> std::result::Result<String, ExecutionError> {
    let read_err = |source: io::Error| ExecutionError::Read {
        path: path.to_path_buf(),
        source,
    };
    let Some(handle) = handle else {
        return Err(read_err(io::Error::other("stream was not captured")));
    };
    let bytes = handle
        .join()
        .map_err(|_| read_err(io::Error::other("reader thread panicked")))?
        .map_err(read_err)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Runs artifacts as child processes, one at a time.
#[derive(Clone, Debug, Default)]
pub struct Runner {
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new().with_timeout(config.timeout())
    }

    /// Mean elapsed seconds over `repetitions` runs of a timing artifact.
    ///
    /// Stops at the first fault, which is returned as-is.
    pub fn measure(&self, timing_path: &Path, repetitions: u32) -> Result<f64> {
        if repetitions == 0 {
            return Err(ConfigError::ZeroRepetitions.into());
        }

        let mut total = 0.0;
        for rep in 0..repetitions {
            match self.run_once(timing_path)? {
                ExecutionOutcome::Sample(seconds) => {
                    debug!(path = %timing_path.display(), rep, seconds, "timing sample");
                    total += seconds;
                }
                ExecutionOutcome::Fault(fault) => return Err(fault.into()),
            }
        }
        Ok(total / f64::from(repetitions))
    }

    /// Run a timing artifact once and classify what it wrote.
    pub fn run_once(&self, timing_path: &Path) -> Result<ExecutionOutcome> {
        let mut child = self.spawn(timing_path, Stdio::null())?;
        let stderr = child.stderr.take().map(drain);
        let status = self.wait(&mut child, timing_path)?;
        let output = join_drain(stderr, timing_path)?;

        let outcome = classify(&output).ok_or_else(|| ExecutionError::MalformedOutput {
            path: timing_path.to_path_buf(),
            output: output.clone(),
        })?;

        match &outcome {
            ExecutionOutcome::Fault(fault) if status.code() != Some(fault.severity) => {
                warn!(
                    path = %timing_path.display(),
                    code = ?status.code(),
                    severity = fault.severity,
                    "fault severity does not match exit code"
                );
            }
            ExecutionOutcome::Sample(_) if !status.success() => {
                warn!(
                    path = %timing_path.display(),
                    code = ?status.code(),
                    "artifact reported a timing but exited unsuccessfully"
                );
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Run a whole artifact once and hand back everything it printed.
    pub fn capture_whole(&self, whole_path: &Path) -> Result<WholeOutput> {
        let mut child = self.spawn(whole_path, Stdio::piped())?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let status = self.wait(&mut child, whole_path)?;

        Ok(WholeOutput {
            path: whole_path.to_path_buf(),
            status: status.code(),
            stdout: join_drain(stdout, whole_path)?,
            stderr: join_drain(stderr, whole_path)?,
        })
    }

    fn spawn(&self, path: &Path, stdout: Stdio) -> std::result::Result<Child, ExecutionError> {
        let mut command = Command::new(path);
        command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped());

        let mut attempt = 0;
        loop {
            match command.spawn() {
                Ok(child) => return Ok(child),
                #[cfg(unix)]
                Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_BUSY_RETRIES => {
                    attempt += 1;
                    thread::sleep(POLL_INTERVAL * attempt);
                }
                Err(source) => {
                    return Err(ExecutionError::Spawn {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    fn wait(&self, child: &mut Child, path: &Path) -> std::result::Result<ExitStatus, ExecutionError> {
        let wait_err = |source: io::Error| ExecutionError::Wait {
            path: path.to_path_buf(),
            source,
        };

        let Some(timeout) = self.timeout else {
            return child.wait().map_err(wait_err);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                // Kill errors mean the child already exited; reap either way.
                let _ = child.kill();
                let _ = child.wait();
                warn!(path = %path.display(), ?timeout, "artifact timed out");
                return Err(ExecutionError::Timeout {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}
