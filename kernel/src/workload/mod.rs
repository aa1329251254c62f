// Workload Reader
//
// Streams operation records from a newline-delimited trace. The first
// whitespace-separated field of each line is a `0x`-prefixed hex key;
// the remaining fields are carried along untouched.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use tracing::warn;

/// One record of a workload trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// 1-based line number in the trace.
    pub line: u64,
    pub key: Vec<u8>,
    pub args: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("workload {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: no key field")]
    MissingKey { line: u64 },

    #[error("line {line}: key `{key}` has no 0x prefix")]
    MissingPrefix { line: u64, key: String },

    #[error("line {line}: key `{key}` is not valid hex: {source}")]
    InvalidHex {
        line: u64,
        key: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Parse a single trace line.
pub fn parse_line(line_no: u64, text: &str) -> Result<Operation, WorkloadError> {
    let mut fields = text.split_whitespace();
    let raw = fields
        .next()
        .ok_or(WorkloadError::MissingKey { line: line_no })?;

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| WorkloadError::MissingPrefix {
            line: line_no,
            key: raw.to_string(),
        })?;

    let key = hex::decode(digits).map_err(|source| WorkloadError::InvalidHex {
        line: line_no,
        key: raw.to_string(),
        source,
    })?;

    Ok(Operation {
        line: line_no,
        key,
        args: fields.map(str::to_string).collect(),
    })
}

/// Lazy, forward-only reader over a workload trace.
pub struct WorkloadReader {
    lines: Lines<Box<dyn BufRead>>,
    path: Option<PathBuf>,
    line_no: u64,
}

impl WorkloadReader {
    /// Open a trace file. A missing file yields an empty workload.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkloadError> {
        let path = path.as_ref().to_path_buf();
        let source = Self::open_source(&path)?;
        Ok(Self {
            lines: source.lines(),
            path: Some(path),
            line_no: 0,
        })
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        let source: Box<dyn BufRead> = Box::new(reader);
        Self {
            lines: source.lines(),
            path: None,
            line_no: 0,
        }
    }

    /// Restart a file-backed reader from its first line.
    ///
    /// In-memory readers cannot be rewound and are left untouched.
    pub fn rewind(&mut self) -> Result<(), WorkloadError> {
        if let Some(path) = &self.path {
            self.lines = Self::open_source(path)?.lines();
            self.line_no = 0;
        }
        Ok(())
    }

    fn open_source(path: &Path) -> Result<Box<dyn BufRead>, WorkloadError> {
        match File::open(path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "workload file not found, replaying nothing");
                Ok(Box::new(io::empty()))
            }
            Err(source) => Err(WorkloadError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl Iterator for WorkloadReader {
    type Item = Result<Operation, WorkloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        self.line_no += 1;
        let line_no = self.line_no;

        Some(match line {
            Ok(text) => parse_line(line_no, &text),
            Err(source) => Err(WorkloadError::Io {
                path: self.path.clone().unwrap_or_default(),
                source,
            }),
        })
    }
}
