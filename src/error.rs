//! Error taxonomy for the harness.
//!
//! Every failure surfaced by [`crate::profiler::Profiler::profile`] is one of
//! four kinds, and each kind is passed through unchanged so a caller can tell
//! a broken snippet apart from a broken environment.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("loop count must be in (0, {max}], got {got}")]
    LoopCountOutOfRange { got: u64, max: u64 },

    #[error("repetitions must be at least 1")]
    ZeroRepetitions,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// Runtime fault reported by a snippet's own fault handler inside the child
/// process. The four fields are kept exactly as the child printed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetFault {
    pub severity: i32,
    pub message: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SnippetFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snippet fault (severity {}): {} in {} on line {}",
            self.severity, self.message, self.file, self.line
        )
    }
}

impl std::error::Error for SnippetFault {}

/// The child process could not be run, or broke the output protocol.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read error stream of {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {path}: {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} did not finish within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("{path} wrote neither a timing nor a 4-field fault: {output:?}")]
    MalformedOutput { path: PathBuf, output: String },
}

/// Top-level error returned by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to write artifact {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    SnippetFault(#[from] SnippetFault),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl HarnessError {
    /// Process exit status for the CLI:
    /// - 2: invalid configuration
    /// - 3: artifact cache not writable
    /// - 4: snippet raised a fault
    /// - 5: child process could not be run
    pub fn code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::CacheWrite { .. } => 3,
            Self::SnippetFault(_) => 4,
            Self::Execution(_) => 5,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_fault_display_keeps_fields() {
        let fault = SnippetFault {
            severity: 2,
            message: "Division by zero".to_string(),
            file: "/tmp/php-time-abc".to_string(),
            line: 12,
        };
        let text = HarnessError::from(fault).to_string();
        assert!(text.contains("severity 2"));
        assert!(text.contains("Division by zero"));
        assert!(text.contains("/tmp/php-time-abc"));
        assert!(text.contains("line 12"));
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let config = HarnessError::from(ConfigError::ZeroRepetitions);
        let exec = HarnessError::from(ExecutionError::Timeout {
            path: PathBuf::from("x"),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(config.code(), 2);
        assert_eq!(exec.code(), 5);
    }
}
