use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod profiler;
pub mod runner;
pub mod schema;

pub use builder::{PhpCompiler, SnippetCompiler};
pub use cache::{ArtifactCache, ArtifactDescriptor, ArtifactKind, CacheStatus};
pub use config::HarnessConfig;
pub use error::{ConfigError, ExecutionError, HarnessError, SnippetFault};
pub use profiler::{Profiler, RunResult};
pub use runner::{ExecutionOutcome, Runner, WholeOutput};

/// How the timing loop is placed in the generated artifact.
#[derive(
    Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Wrapping {
    /// Setup, loop and teardown run inside an isolated function scope, so the
    /// harness temporaries never share a scope with the snippet's variables.
    Scoped,
    /// Everything runs at the top level of the script.
    #[default]
    Flat,
}

impl Wrapping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Wrapping::Scoped => "scoped",
            Wrapping::Flat => "flat",
        }
    }
}
