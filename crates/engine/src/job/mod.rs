//! Multi-run jobs
//!
//! This module provides:
//! - [`MultiRunJob`] - The operator-facing job: lifecycle, counters, hits
//! - [`MultiRunJobOptions`] - The durable options record of a job
//! - [`JobManager`] - Registry of jobs keyed by id
//!
//! # Per-line policy
//!
//! | Outcome   | Counter           | Proxy      | Next                                  |
//! |-----------|-------------------|------------|---------------------------------------|
//! | `Success` | hits              | working    | stored in the hit outputs             |
//! | `Custom`  | custom            | working    | stored if `store_custom_hits`         |
//! | `Fail`    | fails             | working    | done                                  |
//! | `Ban`     | bans              | banned     | retried with another proxy            |
//! | `Retry`   | retries           | unchanged  | retried                               |
//! | `Error`   | errors            | unchanged  | done, or retried with `retry_errors`  |
//!
//! A line whose bans plus retries exceed `ban_loop_evasion` is given up and
//! counted as a fail.

mod check;
mod error;
mod log;
mod manager;
mod multi_run;
mod options;
mod stats;
mod status;

/// Job identifier
pub type JobId = uuid::Uuid;

pub use error::JobError;
pub use log::{JobLog, JobLogEntry, JobLogLevel};
pub use manager::JobManager;
pub use multi_run::{MultiRunJob, MultiRunJobBuilder};
pub use options::{JobProxyMode, MultiRunJobOptions, NoValidProxyBehaviour, StartCondition};
pub use stats::{CpmTracker, DataStats, JobSnapshot};
pub use status::JobStatus;
