// Benchmark Configuration
//
// Optional tuning knobs loaded from JSON. Anything not set in the file
// takes its default.

use serde::{Deserialize, Serialize};

fn default_vget_rate() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Rate of the exponential distribution used to pick historical
    /// versions. Higher rates concentrate reads on recent versions.
    #[serde(default = "default_vget_rate")]
    pub vget_rate: f64,

    /// Seed for value filler and version sampling. Drawn from entropy
    /// when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Reopen the backend once before the first measured operation.
    #[serde(default)]
    pub cold_start: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            vget_rate: default_vget_rate(),
            seed: None,
            cold_start: false,
        }
    }
}
