//! Ranks snippets against each other.
//!
//! Artifacts for all snippets are resolved first (in parallel, they are
//! independent files), then every snippet is timed one after another so
//! measurements never compete for the CPU.

use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builder::SnippetCompiler;
use crate::cache::{ArtifactCache, ArtifactKind};
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::runner::Runner;

/// Ranked measurement for one snippet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub snippet: String,
    pub timing_path: PathBuf,
    pub whole_path: PathBuf,
    /// Mean elapsed seconds of one timing run.
    pub mean_time: f64,
    /// Fastest mean divided by this mean, rounded to two decimals.
    pub ratio: f64,
}

/// `min_time / mean_time` rounded to two decimals. A zero mean (below
/// clock resolution) is treated as tied with the fastest.
pub fn ratio(min_time: f64, mean_time: f64) -> f64 {
    if mean_time <= 0.0 {
        return 1.0;
    }
    (min_time / mean_time * 100.0).round() / 100.0
}

pub struct Profiler<C> {
    cache: ArtifactCache<C>,
}

impl<C: SnippetCompiler> Profiler<C> {
    pub fn new(cache: ArtifactCache<C>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ArtifactCache<C> {
        &self.cache
    }

    /// Time every snippet and return them fastest first.
    ///
    /// Fails on the first error in input order; no partial results are
    /// returned.
    pub fn profile<S>(&self, config: &HarnessConfig, snippets: &[S]) -> Result<Vec<RunResult>>
    where
        S: AsRef<str> + Sync,
    {
        if snippets.is_empty() {
            return Ok(Vec::new());
        }

        let resolved: Vec<Result<(PathBuf, PathBuf)>> = snippets
            .par_iter()
            .map(|snippet| {
                let snippet = snippet.as_ref();
                let timing = self
                    .cache
                    .get_or_create(ArtifactKind::Timing, snippet, config)?;
                let whole = self
                    .cache
                    .get_or_create(ArtifactKind::Whole, snippet, config)?;
                Ok((timing, whole))
            })
            .collect();
        let artifacts = resolved.into_iter().collect::<Result<Vec<_>>>()?;

        let runner = Runner::from_config(config);
        let mut times = Vec::with_capacity(snippets.len());
        for (snippet, (timing_path, _)) in snippets.iter().zip(&artifacts) {
            let snippet: &str = snippet.as_ref();
            let mean_time = runner.measure(timing_path, config.repetitions())?;
            info!(snippet, mean_time, "snippet measured");
            times.push(mean_time);
        }

        let min_time = times.iter().copied().fold(f64::INFINITY, f64::min);

        let mut results: Vec<RunResult> = snippets
            .iter()
            .zip(artifacts)
            .zip(times)
            .map(|((snippet, (timing_path, whole_path)), mean_time)| RunResult {
                snippet: snippet.as_ref().to_string(),
                timing_path,
                whole_path,
                mean_time,
                ratio: ratio(min_time, mean_time),
            })
            .collect();

        // Stable: equal times keep input order.
        results.sort_by(|a, b| a.mean_time.total_cmp(&b.mean_time));
        Ok(results)
    }
}
