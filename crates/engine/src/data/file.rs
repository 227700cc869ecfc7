use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{DataLines, DataPool, DataPoolError};

/// Text file read line by line
///
/// The line count is taken when the pool is opened or reloaded; lines are
/// streamed lazily on every run.
#[derive(Debug, Clone)]
pub struct FileDataPool {
    path: PathBuf,
    total: u64,
}

impl FileDataPool {
    /// Open a file and count its lines
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataPoolError> {
        let path = path.as_ref().to_path_buf();
        let total = count_lines(&path)?;
        debug!(path = %path.display(), total, "Opened data file");
        Ok(Self { path, total })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn count_lines(path: &Path) -> Result<u64, DataPoolError> {
    let file = File::open(path).map_err(|e| DataPoolError::io(path, e))?;
    let mut total = 0;
    for line in BufReader::new(file).lines() {
        line.map_err(|e| DataPoolError::io(path, e))?;
        total += 1;
    }
    Ok(total)
}

impl DataPool for FileDataPool {
    fn total(&self) -> Option<u64> {
        Some(self.total)
    }

    fn lines(&self, skip: u64) -> Result<DataLines, DataPoolError> {
        let file = File::open(&self.path).map_err(|e| DataPoolError::io(&self.path, e))?;
        let path = self.path.clone();
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);

        Ok(Box::new(
            BufReader::new(file)
                .lines()
                .skip(skip)
                .map(move |line| line.map_err(|e| DataPoolError::io(&path, e))),
        ))
    }

    fn reload(&mut self) -> Result<(), DataPoolError> {
        self.total = count_lines(&self.path)?;
        debug!(path = %self.path.display(), total = self.total, "Reloaded data file");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
