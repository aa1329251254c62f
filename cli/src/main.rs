use std::fs;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use authbench_kernel::backend::MemoryBackend;
use authbench_kernel::config::BenchConfig;
use authbench_kernel::log::FileVersionLog;
use authbench_kernel::workload::WorkloadReader;
use authbench_kernel::{
    run_benchmark, BackendError, BackendOptions, BackendRegistry, BenchPlan, ErrorCategory, Mode,
    ReplayError, Version,
};

const EXIT_USAGE: u8 = 1;
const EXIT_INPUT: u8 = 2;
const EXIT_BACKEND: u8 = 3;
const EXIT_OUTPUT: u8 = 4;

/// Authenticated key-value store benchmark harness
#[derive(Parser, Debug)]
#[command(name = "authbench")]
#[command(about = "Replay workload traces against versioned authenticated stores", long_about = None)]
struct Cli {
    /// Backend engine: journal, or memory (init only, nothing survives the process)
    backend: String,

    #[arg(value_enum)]
    mode: BenchMode,

    /// Backend storage directory
    db_path: PathBuf,

    /// Workload trace, one `0x`-prefixed hex key per line
    workload: PathBuf,

    /// Version chain log
    version_log: PathBuf,

    /// Backend cache budget in MiB
    cache_size_mb: usize,

    /// Operations per batch
    batch_size: usize,

    /// Random filler bytes per written value (init, put)
    value_size: Option<usize>,

    /// Number of versions to create before stopping (put)
    versions: Option<usize>,

    /// Path to benchmark config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BenchMode {
    Init,
    Put,
    Get,
    Vget,
}

fn usage(msg: &str) -> ReplayError {
    ReplayError::InvalidPlan(msg.to_string())
}

fn resolve_mode(cli: &Cli) -> Result<Mode, ReplayError> {
    let value_size = || {
        cli.value_size
            .ok_or_else(|| usage("init and put require <VALUE_SIZE>"))
    };

    Ok(match cli.mode {
        BenchMode::Init => Mode::Init {
            value_size: value_size()?,
        },
        BenchMode::Put => Mode::Put {
            value_size: value_size()?,
            versions: cli
                .versions
                .ok_or_else(|| usage("put requires <VERSIONS>"))?,
        },
        BenchMode::Get => Mode::Get,
        BenchMode::Vget => Mode::VersionedGet,
    })
}

/// The memory engine starts empty in every process, so only init can use it.
fn check_backend(backend: &str, mode: &Mode) -> Result<(), ReplayError> {
    if backend == MemoryBackend::NAME && !matches!(mode, Mode::Init { .. }) {
        return Err(usage(&format!(
            "backend `{backend}` keeps no state between runs and supports init only"
        )));
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<BenchConfig, ReplayError> {
    let Some(path) = path else {
        return Ok(BenchConfig::default());
    };
    let data = fs::read_to_string(path)
        .map_err(|e| usage(&format!("config {}: {e}", path.display())))?;
    serde_json::from_str(&data).map_err(|e| usage(&format!("config {}: {e}", path.display())))
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ReplayError>().map(ReplayError::category) {
        Some(ErrorCategory::Input) => EXIT_INPUT,
        Some(ErrorCategory::Backend) => EXIT_BACKEND,
        Some(ErrorCategory::Output) => EXIT_OUTPUT,
        Some(ErrorCategory::Usage) | None => EXIT_USAGE,
    }
}

fn run(cli: Cli) -> Result<()> {
    // ----------------------------
    // Load config and plan
    // ----------------------------
    let config = load_config(cli.config.as_ref())?;
    let mode = resolve_mode(&cli)?;
    check_backend(&cli.backend, &mode)?;
    let plan = BenchPlan::with_config(mode, cli.batch_size, &config);

    // ----------------------------
    // Open backend
    // ----------------------------
    let registry = BackendRegistry::builtin();
    let opts = BackendOptions::new(&cli.db_path, cli.cache_size_mb);
    let mut backend = registry
        .open(&cli.backend, &opts)
        .map_err(ReplayError::from)
        .with_context(|| format!("opening backend at {}", cli.db_path.display()))?;

    // ----------------------------
    // Version log and workload
    // ----------------------------
    let mut log = match mode {
        Mode::Init { .. } => FileVersionLog::create(&cli.version_log),
        Mode::Put { .. } => FileVersionLog::open_append(&cli.version_log),
        Mode::Get | Mode::VersionedGet => Ok(FileVersionLog::open_read(&cli.version_log)),
    }
    .map_err(ReplayError::from)?;
    let workload = WorkloadReader::open(&cli.workload).map_err(ReplayError::from)?;

    // ----------------------------
    // Run benchmark
    // ----------------------------
    let mut out = BufWriter::new(io::stdout().lock());
    let summary = run_benchmark(backend.as_mut(), &plan, workload, &mut log, &mut out)?;

    // ----------------------------
    // Output
    // ----------------------------
    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| ReplayError::Output(e.into()))?;
        fs::write(path, json)
            .map_err(ReplayError::Output)
            .with_context(|| format!("writing summary {}", path.display()))?;
        info!(path = %path.display(), run_id = %summary.run_id, "summary written");
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = exit_code(&err);
            if code == EXIT_USAGE {
                eprintln!("{}", Cli::command().render_usage());
            }
            ExitCode::from(code)
        }
    }
}
