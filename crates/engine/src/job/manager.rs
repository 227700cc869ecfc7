//! Registry of jobs keyed by id

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use super::error::JobError;
use super::multi_run::MultiRunJob;
use super::options::MultiRunJobOptions;
use super::stats::JobSnapshot;
use super::status::JobStatus;
use super::JobId;
use crate::bot::BotRunner;

/// Owns every job of a process
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: DashMap<JobId, MultiRunJob>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a job with a fresh id
    pub fn create(
        &self,
        options: MultiRunJobOptions,
        bot: Arc<dyn BotRunner>,
    ) -> Result<MultiRunJob, JobError> {
        let job = MultiRunJob::new(options, bot)?;
        self.insert(job.clone());
        Ok(job)
    }

    /// Register a job built elsewhere
    pub fn insert(&self, job: MultiRunJob) {
        info!(job_id = %job.id(), "Job registered");
        self.jobs.insert(job.id(), job);
    }

    pub fn get(&self, id: JobId) -> Result<MultiRunJob, JobError> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(JobError::NotFound(id))
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshots of all jobs
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(|entry| entry.value().snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove an idle job
    pub fn remove(&self, id: JobId) -> Result<MultiRunJob, JobError> {
        let job = self.get(id)?;
        job.status().require(&[JobStatus::Idle])?;

        self.jobs
            .remove_if(&id, |_, job| job.status() == JobStatus::Idle)
            .map(|(_, job)| {
                info!(job_id = %id, "Job removed");
                job
            })
            .ok_or_else(|| JobError::RequiredStatus {
                required: vec![JobStatus::Idle],
                actual: job.status(),
            })
    }

    /// Abort every running job, e.g. on shutdown
    pub async fn abort_all(&self) -> usize {
        let jobs: Vec<MultiRunJob> = self.jobs.iter().map(|e| e.value().clone()).collect();
        let mut aborted = 0;
        for job in jobs {
            if !job.status().is_active() {
                continue;
            }
            match job.abort().await {
                Ok(()) => aborted += 1,
                Err(e) => warn!(job_id = %job.id(), error = %e, "Failed to abort job"),
            }
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{BotContext, BotError, BotResult};
    use crate::data::DataPoolSpec;
    use crate::proxy::Proxy;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowBot;

    #[async_trait]
    impl BotRunner for SlowBot {
        async fn run(
            &self,
            _line: &str,
            _proxy: Option<&Proxy>,
            ctx: &BotContext,
        ) -> Result<BotResult, BotError> {
            tokio::select! {
                _ = ctx.cancelled() => Err(BotError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(50)) => Ok(BotResult::fail()),
            }
        }
    }

    fn options() -> MultiRunJobOptions {
        MultiRunJobOptions::new().with_data_pool(DataPoolSpec::Range {
            start: 0,
            amount: 100,
            step: 1,
            pad: false,
        })
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let manager = JobManager::new();
        let job = manager.create(options(), Arc::new(SlowBot)).unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(job.id()).unwrap().id(), job.id());
        assert_eq!(manager.list()[0].total, Some(100));

        manager.remove(job.id()).unwrap();
        assert!(manager.is_empty());
        assert!(matches!(manager.get(job.id()), Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_running_job_is_rejected() {
        let manager = JobManager::new();
        let job = manager.create(options(), Arc::new(SlowBot)).unwrap();
        job.start().await.unwrap();

        assert!(matches!(
            manager.remove(job.id()),
            Err(JobError::RequiredStatus { .. })
        ));

        assert_eq!(manager.abort_all().await, 1);
        job.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert!(manager.remove(job.id()).is_ok());
    }
}
