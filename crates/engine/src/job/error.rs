use std::time::Duration;

use super::status::JobStatus;
use super::JobId;
use crate::data::DataPoolError;
use crate::executor::ExecutorError;
use crate::proxy::ProxyError;

/// Job errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Operation not allowed in the current status
    #[error("job is {actual} but the operation requires {}", join_statuses(.required))]
    RequiredStatus {
        required: Vec<JobStatus>,
        actual: JobStatus,
    },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Data(#[from] DataPoolError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn join_statuses(statuses: &[JobStatus]) -> String {
    let names: Vec<String> = statuses.iter().map(ToString::to_string).collect();
    match names.as_slice() {
        [] => "nothing".to_string(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_status_message() {
        let err = JobError::RequiredStatus {
            required: vec![JobStatus::Idle, JobStatus::Waiting, JobStatus::Running],
            actual: JobStatus::Stopping,
        };
        assert_eq!(
            err.to_string(),
            "job is stopping but the operation requires idle, waiting or running"
        );
    }
}
