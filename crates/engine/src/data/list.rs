use std::sync::Arc;

use super::{DataLines, DataPool, DataPoolError};

/// In-memory lines
#[derive(Debug, Clone)]
pub struct ListDataPool {
    lines: Arc<[String]>,
}

impl ListDataPool {
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl DataPool for ListDataPool {
    fn total(&self) -> Option<u64> {
        Some(self.lines.len() as u64)
    }

    fn lines(&self, skip: u64) -> Result<DataLines, DataPoolError> {
        let lines = Arc::clone(&self.lines);
        let start = usize::try_from(skip).unwrap_or(usize::MAX).min(lines.len());
        Ok(Box::new((start..lines.len()).map(move |i| Ok(lines[i].clone()))))
    }

    fn reload(&mut self) -> Result<(), DataPoolError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "list"
    }
}
