use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use snipbench::schema::{ConfigSummary, ProfileReport, RunMeta, SCHEMA_VERSION};
use snipbench::{
    ArtifactCache, ArtifactKind, HarnessConfig, HarnessError, PhpCompiler, Profiler, Runner,
    Wrapping,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Format {
    #[default]
    Json,
    Table,
}

/// Settings shared by every snippet in a run.
#[derive(ClapArgs, Debug)]
struct HarnessArgs {
    /// Code run once before the timing loop.
    #[arg(long, default_value = "")]
    set_up: String,

    /// Code run once after the timing loop.
    #[arg(long, default_value = "")]
    tear_down: String,

    /// Iterations of the timing loop, 1..=1000000.
    #[arg(long, default_value_t = snipbench::config::DEFAULT_LOOP_COUNT)]
    loop_count: u64,

    /// Run the timing loop inside an isolated function scope, or inline.
    #[arg(long, value_enum, default_value_t = Wrapping::Flat)]
    wrapping: Wrapping,

    /// Independent process runs averaged per snippet.
    #[arg(long, default_value_t = snipbench::config::DEFAULT_REPETITIONS)]
    repetitions: u32,

    /// Kill a run that takes longer than this many milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

impl HarnessArgs {
    fn to_config(&self) -> Result<HarnessConfig, HarnessError> {
        Ok(HarnessConfig::new()
            .with_set_up(self.set_up.clone())
            .with_tear_down(self.tear_down.clone())
            .with_loop_count(self.loop_count)?
            .with_wrapping(self.wrapping)
            .with_repetitions(self.repetitions)?
            .with_timeout(self.timeout_ms.map(Duration::from_millis))?)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time each snippet and rank them, fastest first.
    Profile {
        /// Snippets to compare.
        #[arg(value_name = "SNIPPET")]
        snippets: Vec<String>,

        /// Read additional snippets from a file, one per line.
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        #[command(flatten)]
        harness: HarnessArgs,
    },

    /// Run a snippet once, untimed, and show what it prints.
    Output {
        #[arg(value_name = "SNIPPET")]
        snippet: String,

        #[command(flatten)]
        harness: HarnessArgs,
    },

    /// Delete cached artifacts.
    Clean,
}

#[derive(Parser, Debug)]
#[command(name = "snipbench")]
#[command(about = "Rank code snippets by out-of-process timing (JSON output)")]
struct Args {
    /// Artifact cache directory. Defaults to the system temp dir.
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Where to write the report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("no snippets given")]
    NoSnippets,
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Harness(e) => e.exit_code(),
            CliError::Io(_) => ExitCode::from(1),
            CliError::NoSnippets => ExitCode::from(2),
        }
    }
}

fn now_utc() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("unix:{secs}")
}

fn read_snippets(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    // `lines()` already drops a trailing `\r`; the rest of the line is kept
    // verbatim since it is the snippet's identity.
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

fn emit(out: Option<&Path>, text: &str) -> io::Result<()> {
    match out {
        Some(path) => fs::write(path, text),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let cache = match &args.cache_dir {
        Some(dir) => ArtifactCache::new(dir, PhpCompiler),
        None => ArtifactCache::in_temp_dir(PhpCompiler),
    };

    match args.cmd {
        Command::Profile {
            mut snippets,
            file,
            format,
            harness,
        } => {
            let config = harness.to_config()?;
            if let Some(path) = file {
                snippets.extend(read_snippets(&path)?);
            }
            if snippets.is_empty() {
                return Err(CliError::NoSnippets);
            }

            info!(count = snippets.len(), "profiling snippets");
            let profiler = Profiler::new(cache);
            let results = profiler.profile(&config, &snippets)?;

            let report = ProfileReport {
                run: RunMeta {
                    schema_version: SCHEMA_VERSION,
                    bench_version: env!("CARGO_PKG_VERSION").to_string(),
                    timestamp_utc: now_utc(),
                    cache_dir: profiler.cache().dir().display().to_string(),
                },
                config: ConfigSummary::from(&config),
                results,
            };

            let text = match format {
                Format::Json => serde_json::to_string_pretty(&report).map_err(io::Error::other)?,
                Format::Table => report.to_table(),
            };
            emit(args.out.as_deref(), &text)?;
        }
        Command::Output { snippet, harness } => {
            let config = harness.to_config()?;
            let path = cache.get_or_create(ArtifactKind::Whole, &snippet, &config)?;
            let output = Runner::from_config(&config).capture_whole(&path)?;
            let json = serde_json::to_string_pretty(&output).map_err(io::Error::other)?;
            emit(args.out.as_deref(), &json)?;
        }
        Command::Clean => {
            let removed = cache.purge()?;
            eprintln!("Removed {removed} cached artifacts from {}", cache.dir().display());
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snipbench=info")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}
