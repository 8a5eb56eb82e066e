use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::profiler::RunResult;
use crate::Wrapping;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub bench_version: String,
    pub timestamp_utc: String,
    pub cache_dir: String,
}

/// Settings the results were measured under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub set_up: String,
    pub tear_down: String,
    pub loop_count: u64,
    pub wrapping: Wrapping,
    pub repetitions: u32,
    pub timeout_ms: Option<u64>,
}

impl From<&HarnessConfig> for ConfigSummary {
    fn from(cfg: &HarnessConfig) -> Self {
        Self {
            set_up: cfg.set_up().to_string(),
            tear_down: cfg.tear_down().to_string(),
            loop_count: cfg.loop_count(),
            wrapping: cfg.wrapping(),
            repetitions: cfg.repetitions(),
            timeout_ms: cfg.timeout().map(|t| t.as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReport {
    pub run: RunMeta,
    pub config: ConfigSummary,
    /// Fastest first.
    pub results: Vec<RunResult>,
}

impl ProfileReport {
    /// Plain-text ranking, one snippet per line.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>4}  {:>14}  {:>6}  snippet\n",
            "rank", "mean (s)", "ratio"
        ));
        for (i, r) in self.results.iter().enumerate() {
            out.push_str(&format!(
                "{:>4}  {:>14.9}  {:>6.2}  {}\n",
                i + 1,
                r.mean_time,
                r.ratio,
                r.snippet.replace('\n', " ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn report() -> ProfileReport {
        let cfg = HarnessConfig::new()
            .with_loop_count(1000)
            .unwrap()
            .with_wrapping(Wrapping::Scoped)
            .with_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        ProfileReport {
            run: RunMeta {
                schema_version: SCHEMA_VERSION,
                bench_version: "0.0.0".to_string(),
                timestamp_utc: "unix:0".to_string(),
                cache_dir: "/tmp".to_string(),
            },
            config: ConfigSummary::from(&cfg),
            results: vec![
                RunResult {
                    snippet: "$x = 1 + 1;".to_string(),
                    timing_path: PathBuf::from("/tmp/php-time-a"),
                    whole_path: PathBuf::from("/tmp/php-whole-a"),
                    mean_time: 0.001,
                    ratio: 1.0,
                },
                RunResult {
                    snippet: "$x = sqrt(4);".to_string(),
                    timing_path: PathBuf::from("/tmp/php-time-b"),
                    whole_path: PathBuf::from("/tmp/php-whole-b"),
                    mean_time: 0.002,
                    ratio: 0.5,
                },
            ],
        }
    }

    #[test]
    fn test_config_summary_json_shape() {
        let json = serde_json::to_value(&report().config).unwrap();
        assert_eq!(json["loop_count"], 1000);
        assert_eq!(json["wrapping"], "scoped");
        assert_eq!(json["repetitions"], 10);
        assert_eq!(json["timeout_ms"], 2000);
    }

    #[test]
    fn test_results_serialize_in_rank_order() {
        let json = serde_json::to_value(report()).unwrap();
        let results = json["results"].as_array().unwrap();
        assert_eq!(results[0]["snippet"], "$x = 1 + 1;");
        assert_eq!(results[1]["ratio"], 0.5);
        assert_eq!(results[1]["timing_path"], "/tmp/php-time-b");
    }

    #[test]
    fn test_table_lists_each_snippet() {
        let table = report().to_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("1.00") && lines[1].ends_with("$x = 1 + 1;"));
        assert!(lines[2].contains("0.50") && lines[2].ends_with("$x = sqrt(4);"));
    }
}
