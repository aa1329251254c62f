// In-memory reference engine.
//
// Every committed state is kept as an immutable sorted map shared by
// root, so any historical version can be reopened.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::merkle::state_root;
use super::{AuthBackend, BackendError, BackendStats};
use crate::version::{Version, GENESIS};

type State = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default)]
struct Counters {
    gets: u64,
    hits: u64,
    sets: u64,
    commits: u64,
    opens: u64,
    reopens: u64,
}

#[derive(Debug)]
pub struct MemoryBackend {
    versions: HashMap<Version, Arc<State>>,
    current: Version,
    state: Arc<State>,
    staged: State,
    counters: Counters,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        let empty = Arc::new(State::new());
        let mut versions = HashMap::new();
        versions.insert(GENESIS, empty.clone());
        Self {
            versions,
            current: GENESIS,
            state: empty,
            staged: State::new(),
            counters: Counters::default(),
        }
    }
}

impl AuthBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn open(&mut self, version: &Version) -> Result<(), BackendError> {
        if !self.staged.is_empty() {
            return Err(BackendError::PendingWrites(self.staged.len()));
        }
        let state = self
            .versions
            .get(version)
            .ok_or(BackendError::VersionNotFound(*version))?;
        self.state = state.clone();
        self.current = *version;
        self.counters.opens += 1;
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.counters.gets += 1;
        let value = self
            .staged
            .get(key)
            .or_else(|| self.state.get(key))
            .cloned();
        if value.is_some() {
            self.counters.hits += 1;
        }
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.counters.sets += 1;
        self.staged.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn commit(&mut self) -> Result<Version, BackendError> {
        self.counters.commits += 1;
        if self.staged.is_empty() {
            return Ok(self.current);
        }

        let mut next = (*self.state).clone();
        next.append(&mut self.staged);
        let root = state_root(&next);

        let next = self
            .versions
            .entry(root)
            .or_insert_with(|| Arc::new(next))
            .clone();
        self.state = next;
        self.current = root;
        debug!(%root, keys = self.state.len(), "memory commit");
        Ok(root)
    }

    fn version(&self) -> Version {
        self.current
    }

    fn reopen(&mut self) -> Result<(), BackendError> {
        self.counters.reopens += 1;
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        let c = &self.counters;
        BackendStats::default()
            .counter("gets", c.gets)
            .counter("sets", c.sets)
            .counter("commits", c.commits)
            .counter("opens", c.opens)
            .counter("reopens", c.reopens)
            .counter("versions", self.versions.len() as u64)
            .ratio("get_hit_ratio", c.hits, c.gets - c.hits)
    }
}
