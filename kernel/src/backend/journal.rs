// On-disk delta-journal reference engine.
//
// Each commit appends the batch's writes as one record chained to its
// parent version. Reads walk the chain from the open version back to
// genesis, so older data costs more chain steps than recent data.
//
// Record layout (little-endian):
//
//   body_len u32 | root [32] | parent [32] | count u32 |
//   count x (klen u32 | key | vlen u32 | value)
//
// Entries are stored in key order. The root is Keccak-256 over
// `parent || entries`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use sha3::{Digest, Keccak256};
use tracing::{debug, info};

use super::{AuthBackend, BackendError, BackendOptions, BackendStats};
use crate::version::{Version, GENESIS, VERSION_LEN};

const JOURNAL_FILE: &str = "journal";
const LEN_PREFIX: u64 = 4;
const RECORD_HEADER: usize = VERSION_LEN * 2 + 4;
/// Approximate bytes charged per read-cache slot when sizing it.
const READ_CACHE_SLOT: usize = 1024;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Copy)]
struct RecordMeta {
    parent: Version,
    offset: u64,
    len: u32,
}

#[derive(Debug)]
struct Delta {
    parent: Version,
    entries: Entries,
    bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    gets: u64,
    read_cache_hits: u64,
    delta_hits: u64,
    delta_misses: u64,
    chain_steps: u64,
    bytes_read: u64,
    commits: u64,
    opens: u64,
    reopens: u64,
}

pub struct JournalBackend {
    path: PathBuf,
    file: File,
    tail: u64,
    index: HashMap<Version, RecordMeta>,
    current: Version,
    staged: Entries,
    deltas: LruCache<Version, Arc<Delta>>,
    delta_bytes: usize,
    cache_bytes: usize,
    reads: LruCache<Vec<u8>, Option<Vec<u8>>>,
    counters: Counters,
}

fn chain_root(parent: &Version, entries: &Entries) -> Version {
    let mut hasher = Keccak256::new();
    hasher.update(parent.as_bytes());
    for (key, value) in entries {
        hasher.update((key.len() as u32).to_le_bytes());
        hasher.update(key);
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value);
    }
    Version(hasher.finalize().into())
}

fn encode_record(root: &Version, parent: &Version, entries: &Entries) -> Vec<u8> {
    let mut body = Vec::with_capacity(RECORD_HEADER);
    body.extend_from_slice(root.as_bytes());
    body.extend_from_slice(parent.as_bytes());
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (key, value) in entries {
        body.extend_from_slice(&(key.len() as u32).to_le_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(&(value.len() as u32).to_le_bytes());
        body.extend_from_slice(value);
    }

    let mut record = Vec::with_capacity(body.len() + LEN_PREFIX as usize);
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    record.extend_from_slice(&body);
    record
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32, BackendError> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| BackendError::Corrupt(format!("record truncated at byte {pos}")))?;
    *pos += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_bytes(buf: &[u8], pos: &mut usize, len: usize) -> Result<Vec<u8>, BackendError> {
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| BackendError::Corrupt(format!("record truncated at byte {pos}")))?;
    *pos += len;
    Ok(bytes.to_vec())
}

fn decode_body(body: &[u8]) -> Result<(Version, Delta), BackendError> {
    let mut pos = 0;
    let root = Version::from_slice(&take_bytes(body, &mut pos, VERSION_LEN)?)
        .ok_or_else(|| BackendError::Corrupt("bad root".into()))?;
    let parent = Version::from_slice(&take_bytes(body, &mut pos, VERSION_LEN)?)
        .ok_or_else(|| BackendError::Corrupt("bad parent".into()))?;
    let count = take_u32(body, &mut pos)?;

    let mut entries = Entries::new();
    for _ in 0..count {
        let klen = take_u32(body, &mut pos)? as usize;
        let key = take_bytes(body, &mut pos, klen)?;
        let vlen = take_u32(body, &mut pos)? as usize;
        let value = take_bytes(body, &mut pos, vlen)?;
        entries.insert(key, value);
    }

    Ok((
        root,
        Delta {
            parent,
            entries,
            bytes: body.len(),
        },
    ))
}

/// Scan the journal and index every record by root.
fn scan(file: &File) -> Result<(HashMap<Version, RecordMeta>, u64), BackendError> {
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut index = HashMap::new();
    let mut offset = 0u64;
    while offset < len {
        if len - offset < LEN_PREFIX + RECORD_HEADER as u64 {
            return Err(BackendError::Corrupt(format!(
                "truncated record header at offset {offset}"
            )));
        }
        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix)?;
        let body_len = u32::from_le_bytes(prefix);
        if (body_len as usize) < RECORD_HEADER || offset + LEN_PREFIX + body_len as u64 > len {
            return Err(BackendError::Corrupt(format!(
                "truncated record at offset {offset}"
            )));
        }

        let mut header = [0u8; RECORD_HEADER];
        reader.read_exact(&mut header)?;
        reader.seek_relative(body_len as i64 - RECORD_HEADER as i64)?;

        let root = Version::from_slice(&header[..VERSION_LEN])
            .ok_or_else(|| BackendError::Corrupt("bad root".into()))?;
        let parent = Version::from_slice(&header[VERSION_LEN..VERSION_LEN * 2])
            .ok_or_else(|| BackendError::Corrupt("bad parent".into()))?;
        index.insert(
            root,
            RecordMeta {
                parent,
                offset: offset + LEN_PREFIX,
                len: body_len,
            },
        );
        offset += LEN_PREFIX + body_len as u64;
    }
    Ok((index, offset))
}

impl JournalBackend {
    pub const NAME: &'static str = "journal";

    /// Open (or create) the journal under `opts.path`, positioned at genesis.
    pub fn open(opts: &BackendOptions) -> Result<Self, BackendError> {
        fs::create_dir_all(&opts.path)?;
        let path = opts.path.join(JOURNAL_FILE);
        let file = Self::open_file(&path)?;
        let (index, tail) = scan(&file)?;
        info!(path = %path.display(), versions = index.len(), "journal opened");

        Ok(Self {
            path,
            file,
            tail,
            index,
            current: GENESIS,
            staged: Entries::new(),
            deltas: LruCache::unbounded(),
            delta_bytes: 0,
            cache_bytes: opts.cache_bytes,
            reads: LruCache::new(Self::read_cache_slots(opts.cache_bytes)),
            counters: Counters::default(),
        })
    }

    fn open_file(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
    }

    fn read_cache_slots(cache_bytes: usize) -> NonZeroUsize {
        NonZeroUsize::new(cache_bytes / READ_CACHE_SLOT).unwrap_or(NonZeroUsize::MIN)
    }

    /// Number of committed versions in the journal, genesis excluded.
    pub fn version_count(&self) -> usize {
        self.index.len()
    }

    fn load_delta(&mut self, version: &Version) -> Result<Arc<Delta>, BackendError> {
        if let Some(delta) = self.deltas.get(version) {
            self.counters.delta_hits += 1;
            return Ok(delta.clone());
        }
        self.counters.delta_misses += 1;

        let meta = *self
            .index
            .get(version)
            .ok_or(BackendError::VersionNotFound(*version))?;
        let mut body = vec![0u8; meta.len as usize];
        self.file.seek(SeekFrom::Start(meta.offset))?;
        self.file.read_exact(&mut body)?;
        self.counters.bytes_read += body.len() as u64;

        let (root, delta) = decode_body(&body)?;
        if root != *version || delta.parent != meta.parent {
            return Err(BackendError::Corrupt(format!(
                "record at offset {} does not match index entry {version}",
                meta.offset
            )));
        }

        let delta = Arc::new(delta);
        self.delta_bytes += delta.bytes;
        self.deltas.put(*version, delta.clone());
        while self.delta_bytes > self.cache_bytes {
            match self.deltas.pop_lru() {
                Some((_, evicted)) => self.delta_bytes -= evicted.bytes,
                None => break,
            }
        }
        Ok(delta)
    }

    fn resolve(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let mut cursor = self.current;
        while !cursor.is_genesis() {
            let delta = self.load_delta(&cursor)?;
            self.counters.chain_steps += 1;
            if let Some(value) = delta.entries.get(key) {
                return Ok(Some(value.clone()));
            }
            cursor = delta.parent;
        }
        Ok(None)
    }
}

impl AuthBackend for JournalBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn open(&mut self, version: &Version) -> Result<(), BackendError> {
        if !self.staged.is_empty() {
            return Err(BackendError::PendingWrites(self.staged.len()));
        }
        if !version.is_genesis() && !self.index.contains_key(version) {
            return Err(BackendError::VersionNotFound(*version));
        }
        self.current = *version;
        self.reads.clear();
        self.counters.opens += 1;
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.counters.gets += 1;
        if let Some(value) = self.staged.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.reads.get(key) {
            self.counters.read_cache_hits += 1;
            return Ok(value.clone());
        }

        let value = self.resolve(key)?;
        self.reads.put(key.to_vec(), value.clone());
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.staged.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn commit(&mut self) -> Result<Version, BackendError> {
        self.counters.commits += 1;
        if self.staged.is_empty() {
            return Ok(self.current);
        }

        let entries = std::mem::take(&mut self.staged);
        let parent = self.current;
        let root = chain_root(&parent, &entries);

        if !self.index.contains_key(&root) {
            let record = encode_record(&root, &parent, &entries);
            self.file.write_all(&record)?;
            self.file.sync_data()?;

            self.index.insert(
                root,
                RecordMeta {
                    parent,
                    offset: self.tail + LEN_PREFIX,
                    len: (record.len() as u64 - LEN_PREFIX) as u32,
                },
            );
            self.tail += record.len() as u64;
        }

        self.current = root;
        self.reads.clear();
        debug!(%root, %parent, writes = entries.len(), "journal commit");
        Ok(root)
    }

    fn version(&self) -> Version {
        self.current
    }

    fn reopen(&mut self) -> Result<(), BackendError> {
        self.file = Self::open_file(&self.path)?;
        let (index, tail) = scan(&self.file)?;
        self.index = index;
        self.tail = tail;
        self.deltas.clear();
        self.delta_bytes = 0;
        self.reads.clear();
        self.counters.reopens += 1;
        debug!(path = %self.path.display(), "journal reopened");
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        let c = &self.counters;
        BackendStats::default()
            .counter("gets", c.gets)
            .counter("read_cache_hits", c.read_cache_hits)
            .counter("delta_hits", c.delta_hits)
            .counter("delta_misses", c.delta_misses)
            .counter("chain_steps", c.chain_steps)
            .counter("bytes_read", c.bytes_read)
            .counter("commits", c.commits)
            .counter("opens", c.opens)
            .counter("reopens", c.reopens)
            .counter("versions", self.index.len() as u64)
            .ratio("delta_hit_ratio", c.delta_hits, c.delta_misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(dir: &tempfile::TempDir, cache_mb: usize) -> BackendOptions {
        BackendOptions::new(dir.path().join("db"), cache_mb)
    }

    fn journal_len(dir: &tempfile::TempDir) -> u64 {
        fs::metadata(dir.path().join("db").join(JOURNAL_FILE))
            .unwrap()
            .len()
    }

    #[test]
    fn versions_survive_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (v1, v2) = {
            let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
            db.set(b"a", b"1").unwrap();
            db.set(b"b", b"1").unwrap();
            let v1 = db.commit().unwrap();
            db.set(b"a", b"2").unwrap();
            let v2 = db.commit().unwrap();
            (v1, v2)
        };

        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
        assert_eq!(db.version_count(), 2);
        assert!(db.version().is_genesis());

        db.open(&v2).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"b").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"c").unwrap(), None);

        db.open(&v1).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn root_chains_on_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
        db.set(b"k", b"v").unwrap();
        let v1 = db.commit().unwrap();
        db.set(b"k", b"v").unwrap();
        let v2 = db.commit().unwrap();
        assert_ne!(v1, v2);
        assert_ne!(v1, GENESIS);
    }

    #[test]
    fn empty_commit_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
        db.set(b"k", b"v").unwrap();
        let v1 = db.commit().unwrap();
        let len = journal_len(&dir);

        assert_eq!(db.commit().unwrap(), v1);
        assert_eq!(journal_len(&dir), len);
    }

    #[test]
    fn unknown_version_and_pending_writes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();

        let err = db.open(&Version([3; 32])).unwrap_err();
        assert!(matches!(err, BackendError::VersionNotFound(_)));

        db.set(b"k", b"v").unwrap();
        let err = db.open(&GENESIS).unwrap_err();
        assert!(matches!(err, BackendError::PendingWrites(1)));
    }

    #[test]
    fn truncated_journal_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
            db.set(b"k", b"v").unwrap();
            db.commit().unwrap();
        }
        let path = dir.path().join("db").join(JOURNAL_FILE);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let err = JournalBackend::open(&opts(&dir, 1)).err().unwrap();
        assert!(matches!(err, BackendError::Corrupt(_)), "{err}");
    }

    #[test]
    fn reopen_drops_caches_but_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
        db.set(b"k", b"v").unwrap();
        let v1 = db.commit().unwrap();

        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.stats().get("read_cache_hits"), Some(1));
        assert_eq!(db.stats().get("delta_misses"), Some(1));

        db.reopen().unwrap();
        assert_eq!(db.version(), v1);
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.stats().get("delta_misses"), Some(2));
        assert_eq!(db.stats().get("reopens"), Some(1));
    }

    #[test]
    fn older_data_costs_more_chain_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 1)).unwrap();
        db.set(b"old", b"1").unwrap();
        db.commit().unwrap();
        for i in 0u8..4 {
            db.set(&[i], b"x").unwrap();
            db.commit().unwrap();
        }

        db.get(b"old").unwrap();
        assert_eq!(db.stats().get("chain_steps"), Some(5));
    }

    #[test]
    fn zero_cache_budget_still_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JournalBackend::open(&opts(&dir, 0)).unwrap();
        db.set(b"k", b"v").unwrap();
        let v1 = db.commit().unwrap();

        for _ in 0..3 {
            db.open(&v1).unwrap();
            assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        }
        assert_eq!(db.stats().get("delta_hits"), Some(0));
        assert_eq!(db.stats().get("delta_misses"), Some(3));
    }
}
