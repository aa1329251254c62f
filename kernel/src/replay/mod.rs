// Benchmark Replay Engine
//
// Replays a workload trace against a backend under one of four
// policies (init, put, get, vget). All four share one driver loop;
// they differ only in what an operation does, what sealing a batch
// does, and how the backend is repositioned afterwards.

use std::io::{self, Write};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::backend::{AuthBackend, BackendError};
use crate::batch::{BatchController, BatchState};
use crate::config::BenchConfig;
use crate::log::{VersionLogError, VersionStore};
use crate::metrics::{MetricsCollector, RunSummary};
use crate::version::Version;
use crate::workload::{Operation, WorkloadError, WorkloadReader};

pub mod sampler;
pub mod value;

use sampler::VersionSampler;
use value::ValueGenerator;

/// Benchmark mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bulk load from genesis into a fresh version log.
    Init { value_size: usize },

    /// Sequential writes on top of the latest version, stopping after
    /// `versions` committed batches.
    Put { value_size: usize, versions: usize },

    /// Point reads against the latest version.
    Get,

    /// Point reads against versions sampled from the whole chain.
    VersionedGet,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Init { .. } => "init",
            Mode::Put { .. } => "put",
            Mode::Get => "get",
            Mode::VersionedGet => "vget",
        }
    }
}

/// Everything a run needs besides its inputs and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchPlan {
    pub mode: Mode,
    pub batch_size: usize,
    pub vget_rate: f64,
    pub seed: Option<u64>,
    pub cold_start: bool,
}

impl BenchPlan {
    pub fn new(mode: Mode, batch_size: usize) -> Self {
        Self::with_config(mode, batch_size, &BenchConfig::default())
    }

    pub fn with_config(mode: Mode, batch_size: usize, config: &BenchConfig) -> Self {
        Self {
            mode,
            batch_size,
            vget_rate: config.vget_rate,
            seed: config.seed,
            cold_start: config.cold_start,
        }
    }

    fn validate(&self) -> Result<(), ReplayError> {
        if self.batch_size == 0 {
            return Err(ReplayError::InvalidPlan("batch size must be positive".into()));
        }
        if let Mode::Put { versions: 0, .. } = self.mode {
            return Err(ReplayError::InvalidPlan("version count must be positive".into()));
        }
        if self.mode == Mode::VersionedGet && !(self.vget_rate.is_finite() && self.vget_rate > 0.0)
        {
            return Err(ReplayError::InvalidPlan(format!(
                "vget rate must be positive, got {}",
                self.vget_rate
            )));
        }
        Ok(())
    }
}

/// Coarse error classes surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Usage,
    Input,
    Backend,
    Output,
}

/// Errors that abort a benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid benchmark plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    VersionLog(#[from] VersionLogError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("writing output")]
    Output(#[from] io::Error),
}

impl ReplayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReplayError::InvalidPlan(_) => ErrorCategory::Usage,
            ReplayError::Backend(BackendError::UnknownBackend { .. }) => ErrorCategory::Usage,
            ReplayError::Workload(_) | ReplayError::VersionLog(_) => ErrorCategory::Input,
            ReplayError::Backend(_) => ErrorCategory::Backend,
            ReplayError::Output(_) => ErrorCategory::Output,
        }
    }
}

/// Per-mode state.
enum Step {
    Init(ValueGenerator),
    Put(ValueGenerator),
    Get {
        latest: Version,
    },
    VersionedGet {
        history: Vec<Version>,
        sampler: VersionSampler,
    },
}

struct Driver<'a> {
    backend: &'a mut dyn AuthBackend,
    log: &'a mut dyn VersionStore,
    out: &'a mut dyn Write,
    metrics: MetricsCollector,
    rng: StdRng,
    step: Step,
}

impl<'a> Driver<'a> {
    /// Load history and position the backend at the starting version.
    fn prepare(
        backend: &'a mut dyn AuthBackend,
        plan: &BenchPlan,
        log: &'a mut dyn VersionStore,
        out: &'a mut dyn Write,
    ) -> Result<Self, ReplayError> {
        let step = match plan.mode {
            Mode::Init { value_size } => Step::Init(ValueGenerator::new(value_size)),
            Mode::Put { value_size, .. } => {
                let latest = log.load_all()?[0];
                backend.open(&latest)?;
                Step::Put(ValueGenerator::new(value_size))
            }
            Mode::Get => {
                let latest = log.load_all()?[0];
                backend.open(&latest)?;
                Step::Get { latest }
            }
            Mode::VersionedGet => {
                let history = log.load_all()?;
                let sampler = VersionSampler::new(plan.vget_rate, history.len()).ok_or_else(
                    || ReplayError::InvalidPlan(format!("bad vget rate {}", plan.vget_rate)),
                )?;
                Step::VersionedGet { history, sampler }
            }
        };

        if plan.cold_start {
            backend.reopen()?;
        }

        let rng = match plan.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            backend = backend.name(),
            mode = plan.mode.name(),
            batch_size = plan.batch_size,
            start = %backend.version(),
            "benchmark starting"
        );

        Ok(Self {
            backend,
            log,
            out,
            metrics: MetricsCollector::new(plan.mode.name()),
            rng,
            step,
        })
    }

    /// Apply one operation, timing only the backend calls.
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        let elapsed = match &mut self.step {
            Step::Init(values) | Step::Put(values) => {
                let value = values.next_value(&mut self.rng);
                let start = Instant::now();
                self.backend.set(&op.key, &value)?;
                start.elapsed()
            }
            Step::Get { .. } => {
                let start = Instant::now();
                self.backend.get(&op.key)?;
                start.elapsed()
            }
            Step::VersionedGet { history, sampler } => {
                let target = history[sampler.sample(&mut self.rng)];
                let start = Instant::now();
                if target != self.backend.version() {
                    self.backend.open(&target)?;
                }
                self.backend.get(&op.key)?;
                start.elapsed()
            }
        };
        self.metrics.observe(elapsed);
        Ok(())
    }

    /// Seal the open batch. Write modes commit and log the new version.
    fn seal(&mut self) -> Result<Option<Version>, ReplayError> {
        if !matches!(self.step, Step::Init(_) | Step::Put(_)) {
            return Ok(None);
        }

        let start = Instant::now();
        let root = self.backend.commit()?;
        self.metrics.observe(start.elapsed());
        self.metrics.count_commit();

        self.log.append(&root)?;
        if let Step::Init(_) = self.step {
            writeln!(self.out, "commit {root}")?;
        }
        debug!(%root, commits = self.metrics.commits(), "batch committed");
        Ok(Some(root))
    }

    fn report(&mut self, ops: usize) -> Result<(), ReplayError> {
        let report = self.metrics.finish_batch(ops);
        writeln!(self.out, "{report}")?;
        self.backend.print_stats(self.out)?;
        Ok(())
    }

    /// Reposition the backend before the next batch.
    fn resume(&mut self, sealed: Option<Version>) -> Result<(), ReplayError> {
        match (&self.step, sealed) {
            (Step::Put(_), Some(root)) => self.backend.open(&root)?,
            (Step::Get { latest }, _) => self.backend.open(latest)?,
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<RunSummary, ReplayError> {
        let final_version = self.backend.version();
        if let Step::Init(_) = self.step {
            writeln!(self.out, "final root {final_version}")?;
        }
        self.out.flush()?;

        let summary = self.metrics.summary(self.backend.name(), final_version);
        info!(
            ops = summary.total_ops,
            batches = summary.batches,
            commits = summary.commits,
            throughput = summary.throughput,
            "benchmark finished"
        );
        Ok(summary)
    }
}

/// Replay `workload` against `backend` according to `plan`.
///
/// Init and put append every committed version to `log`; get and vget
/// only read it. Benchmark lines are written to `out`.
pub fn run_benchmark(
    backend: &mut dyn AuthBackend,
    plan: &BenchPlan,
    workload: WorkloadReader,
    log: &mut dyn VersionStore,
    out: &mut dyn Write,
) -> Result<RunSummary, ReplayError> {
    plan.validate()?;

    let cap = match plan.mode {
        Mode::Put { versions, .. } => Some(versions),
        _ => None,
    };
    let mut batches = BatchController::new(plan.batch_size, cap);
    let mut driver = Driver::prepare(backend, plan, log, out)?;

    for op in workload {
        driver.apply(&op?)?;

        if batches.record() == BatchState::Committing {
            let ops = batches.pending();
            let sealed = driver.seal()?;
            driver.report(ops)?;
            if !batches.sealed() {
                info!(batches = batches.sealed_batches(), "version cap reached");
                break;
            }
            driver.resume(sealed)?;
        }
    }

    if let Some(ops) = batches.take_partial() {
        driver.seal()?;
        driver.report(ops)?;
    }

    driver.finish()
}
