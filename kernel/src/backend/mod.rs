// Backend Contract
//
// Capability interface every storage engine under test implements.
// The harness only drives engines through this trait.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::version::Version;

pub mod journal;
pub mod memory;
pub mod merkle;

pub use journal::JournalBackend;
pub use memory::MemoryBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown backend `{name}` (known: {})", known.join(", "))]
    UnknownBackend { name: String, known: Vec<String> },

    #[error("version {0} not found")]
    VersionNotFound(Version),

    #[error("cannot switch versions with {0} staged writes")]
    PendingWrites(usize),

    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("storage i/o: {0}")]
    Io(#[from] io::Error),
}

/// Settings passed to a backend factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub path: PathBuf,
    pub cache_bytes: usize,
}

impl BackendOptions {
    pub fn new(path: impl Into<PathBuf>, cache_mb: usize) -> Self {
        Self {
            path: path.into(),
            cache_bytes: cache_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// Engine-internal counters, reported as `name=value` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendStats {
    pub counters: Vec<(&'static str, u64)>,
    pub ratios: Vec<(&'static str, f64)>,
}

impl BackendStats {
    pub fn counter(mut self, name: &'static str, value: u64) -> Self {
        self.counters.push((name, value));
        self
    }

    /// Adds `hits / (hits + misses)`, or 0 when nothing was counted.
    pub fn ratio(mut self, name: &'static str, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        self.ratios.push((name, ratio));
        self
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

impl fmt::Display for BackendStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.counters {
            write!(f, " {name}={value}")?;
        }
        for (name, value) in &self.ratios {
            write!(f, " {name}={value:.3}")?;
        }
        Ok(())
    }
}

/// A versioned, authenticated key-value store under test.
///
/// The handle is always positioned at exactly one version. Reads and
/// writes address that version until the next `open` or `commit`.
pub trait AuthBackend {
    fn name(&self) -> &'static str;

    /// Reposition the handle at `version`.
    ///
    /// Fails if the version is unknown or if writes are staged.
    fn open(&mut self, version: &Version) -> Result<(), BackendError>;

    /// Point read at the current version, including staged writes.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    /// Stage a write. Not visible in the version until `commit`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError>;

    /// Persist staged writes and move to the resulting version.
    fn commit(&mut self) -> Result<Version, BackendError>;

    /// Version of the currently open state.
    fn version(&self) -> Version;

    /// Close and reopen the underlying storage at the same version.
    fn reopen(&mut self) -> Result<(), BackendError>;

    fn stats(&self) -> BackendStats;

    fn print_stats(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "stats {}{}", self.name(), self.stats())
    }
}

/// Constructor registered under a backend name.
pub type BackendFactory = fn(&BackendOptions) -> Result<Box<dyn AuthBackend>, BackendError>;

/// Name-to-factory table of the engines this harness can drive.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in reference engines.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(MemoryBackend::NAME, |_| Ok(Box::new(MemoryBackend::new())));
        registry.register(JournalBackend::NAME, |opts| {
            Ok(Box::new(JournalBackend::open(opts)?))
        });
        registry
    }

    /// Register a factory, replacing any previous one under `name`.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Construct the backend registered under `name`.
    pub fn open(
        &self,
        name: &str,
        opts: &BackendOptions,
    ) -> Result<Box<dyn AuthBackend>, BackendError> {
        match self.factories.get(name) {
            Some(factory) => factory(opts),
            None => Err(BackendError::UnknownBackend {
                name: name.to_string(),
                known: self.names().into_iter().map(String::from).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_reported() {
        let registry = BackendRegistry::builtin();
        let opts = BackendOptions::new("/nonexistent", 1);

        let err = registry.open("leveldb", &opts).err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("leveldb"), "{msg}");
        assert!(msg.contains("journal, memory"), "{msg}");
    }

    #[test]
    fn builtin_registry_constructs_engines() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BackendRegistry::builtin();
        assert_eq!(registry.names(), vec!["journal", "memory"]);

        let opts = BackendOptions::new(dir.path().join("db"), 4);
        let journal = registry.open("journal", &opts).unwrap();
        assert_eq!(journal.name(), "journal");
        assert!(journal.version().is_genesis());

        let memory = registry.open("memory", &opts).unwrap();
        assert_eq!(memory.name(), "memory");
    }

    #[test]
    fn custom_factory_can_be_registered() {
        let mut registry = BackendRegistry::new();
        assert!(registry.names().is_empty());

        registry.register("mem2", |_| Ok(Box::new(MemoryBackend::new())));
        let opts = BackendOptions::new("unused", 0);
        assert!(registry.open("mem2", &opts).is_ok());
    }

    #[test]
    fn stats_line_formats_counters_and_ratios() {
        let stats = BackendStats::default()
            .counter("gets", 4)
            .ratio("hit_ratio", 3, 1);
        assert_eq!(stats.to_string(), " gets=4 hit_ratio=0.750");
        assert_eq!(stats.get("gets"), Some(4));

        let mut out = Vec::new();
        MemoryBackend::new().print_stats(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("stats memory gets=0"), "{line}");
    }

    #[test]
    fn cache_size_is_converted_to_bytes() {
        assert_eq!(BackendOptions::new("db", 2).cache_bytes, 2 * 1024 * 1024);
    }
}
