// Authbench Kernel
//
// Trace-driven benchmark engine for versioned, authenticated
// key-value stores.

pub mod backend;
pub mod batch;
pub mod config;
pub mod log;
pub mod metrics;
pub mod replay;
pub mod version;
pub mod workload;

pub use backend::{AuthBackend, BackendError, BackendOptions, BackendRegistry};
pub use replay::{run_benchmark, BenchPlan, ErrorCategory, Mode, ReplayError};
pub use version::{Version, GENESIS};
