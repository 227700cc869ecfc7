use serde::{Deserialize, Serialize};

use super::error::JobError;

/// Job lifecycle status
///
/// ```text
/// Idle ─start─► [Waiting] ─► Starting ─► Running ─pause─► Pausing ─► Paused
///                                           ▲                          │
///                                           └──── Resuming ◄──resume───┘
/// Running / Paused ─stop or abort─► Stopping ─► Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    /// Start condition not met yet
    Waiting,
    /// Loading proxies and launching the executor
    Starting,
    Running,
    Pausing,
    Paused,
    /// Draining (stop) or unwinding (abort) the in-flight checks
    Stopping,
    Resuming,
}

impl JobStatus {
    /// Fail with [`JobError::RequiredStatus`] unless the status is one of `allowed`
    pub fn require(self, allowed: &[JobStatus]) -> Result<(), JobError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(JobError::RequiredStatus {
                required: allowed.to_vec(),
                actual: self,
            })
        }
    }

    /// Whether a run is in progress (anything but `Idle`)
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Resuming => "resuming",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        assert!(JobStatus::Running.require(&[JobStatus::Running]).is_ok());

        let err = JobStatus::Idle
            .require(&[JobStatus::Running, JobStatus::Paused])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "job is idle but the operation requires running or paused"
        );
    }

    #[test]
    fn test_is_active() {
        assert!(!JobStatus::Idle.is_active());
        assert!(JobStatus::Waiting.is_active());
        assert!(JobStatus::Stopping.is_active());
    }
}
