// Version Chain Log
//
// Flat file of concatenated 32-byte version identifiers. Init runs
// recreate it, Put runs extend it, read benchmarks only load it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::version::{Version, VERSION_LEN};

pub mod store;

pub use store::VersionStore;

#[derive(Debug, thiserror::Error)]
pub enum VersionLogError {
    #[error("version log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("version log {path} is corrupt: length {len} is not a multiple of 32")]
    Corrupt { path: PathBuf, len: u64 },

    #[error("version log {0} was opened read-only")]
    ReadOnly(PathBuf),
}

/// File-backed version chain log.
#[derive(Debug)]
pub struct FileVersionLog {
    path: PathBuf,
    writer: Option<File>,
}

impl FileVersionLog {
    /// Create a fresh log, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, VersionLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| VersionLogError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Some(file),
        })
    }

    /// Open a log for appending. Existing versions are kept.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, VersionLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| VersionLogError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Some(file),
        })
    }

    /// Open a log for reading only. The file need not exist.
    pub fn open_read(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }
}

impl VersionStore for FileVersionLog {
    fn append(&mut self, version: &Version) -> Result<(), VersionLogError> {
        let file = self
            .writer
            .as_mut()
            .ok_or_else(|| VersionLogError::ReadOnly(self.path.clone()))?;

        file.write_all(version.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|source| VersionLogError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!(%version, path = %self.path.display(), "version appended");
        Ok(())
    }

    fn load_in_order(&self) -> Result<Vec<Version>, VersionLogError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(VersionLogError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if bytes.len() % VERSION_LEN != 0 {
            return Err(VersionLogError::Corrupt {
                path: self.path.clone(),
                len: bytes.len() as u64,
            });
        }

        Ok(bytes
            .chunks_exact(VERSION_LEN)
            .filter_map(Version::from_slice)
            .collect())
    }
}

/// In-memory version log with the same contract as the file log.
#[derive(Debug, Default)]
pub struct InMemoryVersionLog {
    versions: Vec<Version>,
}

impl InMemoryVersionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl VersionStore for InMemoryVersionLog {
    fn append(&mut self, version: &Version) -> Result<(), VersionLogError> {
        self.versions.push(*version);
        Ok(())
    }

    fn load_in_order(&self) -> Result<Vec<Version>, VersionLogError> {
        Ok(self.versions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::GENESIS;

    fn v(n: u8) -> Version {
        Version([n; 32])
    }

    #[test]
    fn load_all_returns_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions");

        let mut log = FileVersionLog::create(&path).unwrap();
        for n in 1..=4 {
            log.append(&v(n)).unwrap();
        }

        let loaded = FileVersionLog::open_read(&path).load_all().unwrap();
        assert_eq!(loaded, vec![v(4), v(3), v(2), v(1)]);
        assert_eq!(fs::metadata(&path).unwrap().len(), 4 * 32);
    }

    #[test]
    fn missing_file_loads_as_genesis_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileVersionLog::open_read(dir.path().join("absent"));

        assert!(log.load_in_order().unwrap().is_empty());
        assert_eq!(log.load_all().unwrap(), vec![GENESIS]);
    }

    #[test]
    fn create_truncates_and_append_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions");

        let mut log = FileVersionLog::create(&path).unwrap();
        log.append(&v(1)).unwrap();
        log.append(&v(2)).unwrap();
        drop(log);

        let mut log = FileVersionLog::open_append(&path).unwrap();
        log.append(&v(3)).unwrap();
        assert_eq!(log.load_in_order().unwrap(), vec![v(1), v(2), v(3)]);
        drop(log);

        let log = FileVersionLog::create(&path).unwrap();
        assert_eq!(log.load_all().unwrap(), vec![GENESIS]);
    }

    #[test]
    fn misaligned_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions");
        fs::write(&path, [7u8; 40]).unwrap();

        let err = FileVersionLog::open_read(&path).load_all().unwrap_err();
        assert!(matches!(err, VersionLogError::Corrupt { len: 40, .. }));
    }

    #[test]
    fn read_only_log_rejects_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileVersionLog::open_read(dir.path().join("versions"));

        let err = log.append(&v(1)).unwrap_err();
        assert!(matches!(err, VersionLogError::ReadOnly(_)));
    }

    #[test]
    fn in_memory_log_matches_file_contract() {
        let mut log = InMemoryVersionLog::new();
        assert_eq!(log.load_all().unwrap(), vec![GENESIS]);

        log.append(&v(1)).unwrap();
        log.append(&v(2)).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.load_all().unwrap(), vec![v(2), v(1)]);
    }
}
