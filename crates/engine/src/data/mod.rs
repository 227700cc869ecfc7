//! Data pools
//!
//! A data pool is the lazily read sequence of input lines a job checks.
//! Pools are resumable: [`DataPool::lines`] starts after `skip` lines so a
//! restarted job does not reprocess what it already consumed.

mod file;
mod list;
mod range;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use file::FileDataPool;
pub use list::ListDataPool;
pub use range::{InfiniteDataPool, RangeDataPool};

/// Lines produced by a pool; an `Err` ends the run as failed
pub type DataLines = Box<dyn Iterator<Item = Result<String, DataPoolError>> + Send>;

/// Data pool errors
#[derive(Debug, thiserror::Error)]
pub enum DataPoolError {
    /// The backing file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Range parameters are unusable
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

impl DataPoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A resumable sequence of input lines
pub trait DataPool: Send + Sync {
    /// Number of lines, `None` when the pool is infinite or uncounted
    fn total(&self) -> Option<u64>;

    /// Lines starting after the first `skip`
    fn lines(&self, skip: u64) -> Result<DataLines, DataPoolError>;

    /// Re-read the underlying source
    fn reload(&mut self) -> Result<(), DataPoolError>;

    /// Short name of the pool kind, for logs
    fn kind(&self) -> &'static str;
}

/// Serializable description of a data pool, stored in job options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataPoolSpec {
    /// Lines given inline
    List { lines: Vec<String> },
    /// One line per line of a text file
    File { path: PathBuf },
    /// Generated numbers
    Range {
        start: i64,
        amount: u64,
        #[serde(default = "default_step")]
        step: i64,
        #[serde(default)]
        pad: bool,
    },
    /// Empty lines forever, for bots that need no input
    Infinite,
}

fn default_step() -> i64 {
    1
}

impl Default for DataPoolSpec {
    fn default() -> Self {
        Self::List { lines: Vec::new() }
    }
}

impl DataPoolSpec {
    /// Instantiate the pool
    pub fn build(&self) -> Result<Box<dyn DataPool>, DataPoolError> {
        Ok(match self {
            Self::List { lines } => Box::new(ListDataPool::new(lines.clone())),
            Self::File { path } => Box::new(FileDataPool::open(path)?),
            Self::Range {
                start,
                amount,
                step,
                pad,
            } => Box::new(RangeDataPool::new(*start, *amount, *step, *pad)?),
            Self::Infinite => Box::new(InfiniteDataPool),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(pool: &dyn DataPool, skip: u64) -> Vec<String> {
        pool.lines(skip)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_spec_deserialization() {
        let spec: DataPoolSpec =
            serde_json::from_str(r#"{"type": "range", "start": 1, "amount": 3}"#).unwrap();
        assert_eq!(
            spec,
            DataPoolSpec::Range {
                start: 1,
                amount: 3,
                step: 1,
                pad: false
            }
        );

        let pool = spec.build().unwrap();
        assert_eq!(pool.kind(), "range");
        assert_eq!(collect(pool.as_ref(), 0), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_build_list() {
        let spec = DataPoolSpec::List {
            lines: vec!["a".into(), "b".into()],
        };
        let pool = spec.build().unwrap();
        assert_eq!(pool.total(), Some(2));
        assert_eq!(collect(pool.as_ref(), 1), vec!["b"]);
    }

    #[test]
    fn test_build_missing_file() {
        let spec = DataPoolSpec::File {
            path: "/nonexistent/combos.txt".into(),
        };
        assert!(matches!(spec.build(), Err(DataPoolError::Io { .. })));
    }
}
