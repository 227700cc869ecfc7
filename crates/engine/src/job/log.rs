//! Per-job log buffer

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use super::JobId;

/// Severity of a job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogEntry {
    pub time: DateTime<Utc>,
    pub level: JobLogLevel,
    pub message: String,
}

/// Bounded log of the most recent job messages
///
/// Every entry is also emitted as a `tracing` event tagged with the job id.
#[derive(Debug)]
pub struct JobLog {
    job_id: JobId,
    capacity: usize,
    entries: Mutex<VecDeque<JobLogEntry>>,
}

impl JobLog {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(job_id: JobId, capacity: usize) -> Self {
        Self {
            job_id,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(job_id = %self.job_id, "{}", message);
        self.push(JobLogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.job_id, "{}", message);
        self.push(JobLogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(job_id = %self.job_id, "{}", message);
        self.push(JobLogLevel::Error, message);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<JobLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, level: JobLogLevel, message: String) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JobLogEntry {
            time: Utc::now(),
            level,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_keeps_most_recent_entries() {
        let log = JobLog::new(Uuid::now_v7(), 3);
        for i in 0..5 {
            log.info(format!("message {i}"));
        }
        log.warn("no proxies");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "message 3");
        assert_eq!(entries[2].level, JobLogLevel::Warn);
    }
}
