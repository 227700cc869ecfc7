//! Multi-run job
//!
//! Runs one bot over every line of a data pool through the work executor,
//! with proxies, retries, hit outputs and the lifecycle state machine
//! operators interact with.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::check::{CheckFailure, CheckOutput, Checker, DataLine};
use super::error::JobError;
use super::log::{JobLog, JobLogEntry};
use super::options::{MultiRunJobOptions, StartCondition};
use super::stats::{estimate_eta, CpmTracker, DataStats, JobSnapshot};
use super::status::JobStatus;
use super::JobId;
use crate::bot::{BotOutcome, BotRunner};
use crate::data::{DataLines, DataPool};
use crate::executor::{
    Completion, ExecutorConfig, ExecutorEvent, ExecutorInput, ItemError, ResultDetails,
    RunSummary, WorkError, WorkExecutor,
};
use crate::hits::{Hit, HitKind, HitOutput};
use crate::proxy::{ProxyPool, ProxySource};

type JobExecutor = WorkExecutor<DataLine, CheckOutput>;

/// Builder for [`MultiRunJob`]
///
/// Data pool, proxy sources and hit outputs come from the options; the
/// builder can add programmatic ones on top.
pub struct MultiRunJobBuilder {
    options: MultiRunJobOptions,
    bot: Arc<dyn BotRunner>,
    id: Option<JobId>,
    data_pool: Option<Box<dyn DataPool>>,
    proxy_pool: Option<Arc<ProxyPool>>,
    proxy_sources: Vec<Arc<dyn ProxySource>>,
    hit_outputs: Vec<Arc<dyn HitOutput>>,
    log_capacity: usize,
}

impl MultiRunJobBuilder {
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    /// Use this pool instead of the one described by the options
    pub fn with_data_pool(mut self, pool: Box<dyn DataPool>) -> Self {
        self.data_pool = Some(pool);
        self
    }

    /// Use this proxy pool instead of an empty one configured from the options
    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxy_pool = Some(pool);
        self
    }

    /// Add a proxy source next to the ones in the options
    pub fn with_proxy_source(mut self, source: Arc<dyn ProxySource>) -> Self {
        self.proxy_sources.push(source);
        self
    }

    /// Add a hit output next to the ones in the options
    pub fn with_hit_output(mut self, output: Arc<dyn HitOutput>) -> Self {
        self.hit_outputs.push(output);
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<MultiRunJob, JobError> {
        let id = self.id.unwrap_or_else(Uuid::now_v7);
        let data_pool = match self.data_pool {
            Some(pool) => pool,
            None => self.options.data_pool.build()?,
        };
        let proxy_pool = self
            .proxy_pool
            .unwrap_or_else(|| Arc::new(ProxyPool::new(self.options.proxy_pool.clone())));
        let counters = RunCounters::new(data_pool.total(), self.options.consumed());
        let (status, _) = watch::channel(JobStatus::Idle);

        debug!(job_id = %id, data_pool = data_pool.kind(), "Job created");

        Ok(MultiRunJob {
            inner: Arc::new(JobInner {
                id,
                bot: self.bot,
                options: RwLock::new(self.options),
                status,
                control: tokio::sync::Mutex::new(()),
                data_pool: Mutex::new(data_pool),
                proxy_pool,
                extra_sources: self.proxy_sources,
                extra_outputs: self.hit_outputs,
                counters: Mutex::new(counters),
                executor: Mutex::new(None),
                run: Mutex::new(None),
                requested: Mutex::new(None),
                waiting_for_proxies: Arc::new(AtomicUsize::new(0)),
                log: Arc::new(JobLog::new(id, self.log_capacity)),
            }),
        })
    }
}

/// A job that checks every line of a data pool with a bot
///
/// Cloning gives another handle to the same job.
///
/// # Example
///
/// ```ignore
/// let job = MultiRunJob::builder(options, Arc::new(MyBot)).build()?;
/// job.start().await?;
/// job.change_bots(50).await?;
/// job.pause().await?;
/// job.resume().await?;
/// let snapshot = job.wait_idle(Duration::from_secs(600)).await?;
/// ```
#[derive(Clone)]
pub struct MultiRunJob {
    inner: Arc<JobInner>,
}

struct JobInner {
    id: JobId,
    bot: Arc<dyn BotRunner>,
    options: RwLock<MultiRunJobOptions>,
    status: watch::Sender<JobStatus>,
    /// Serializes lifecycle operations and run phase transitions
    control: tokio::sync::Mutex<()>,
    data_pool: Mutex<Box<dyn DataPool>>,
    proxy_pool: Arc<ProxyPool>,
    extra_sources: Vec<Arc<dyn ProxySource>>,
    extra_outputs: Vec<Arc<dyn HitOutput>>,
    counters: Mutex<RunCounters>,
    executor: Mutex<Option<Arc<JobExecutor>>>,
    run: Mutex<Option<RunHandle>>,
    /// How the operator asked the current run to end
    requested: Mutex<Option<Completion>>,
    waiting_for_proxies: Arc<AtomicUsize>,
    log: Arc<JobLog>,
}

struct RunHandle {
    /// Fired by abort, by stop while waiting, and when the run ends
    cancel: CancellationToken,
    /// Fired by `skip_wait` and `trigger`
    start_now: CancellationToken,
}

/// Counters of the current (or last) run, only written by the run task
struct RunCounters {
    stats: DataStats,
    cpm: CpmTracker,
    total: Option<u64>,
    skip: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_completion: Option<Completion>,
}

impl RunCounters {
    fn new(total: Option<u64>, skip: u64) -> Self {
        Self {
            stats: DataStats::default(),
            cpm: CpmTracker::new(),
            total,
            skip,
            started_at: None,
            finished_at: None,
            last_completion: None,
        }
    }
}

impl MultiRunJob {
    pub fn builder(options: MultiRunJobOptions, bot: Arc<dyn BotRunner>) -> MultiRunJobBuilder {
        MultiRunJobBuilder {
            options,
            bot,
            id: None,
            data_pool: None,
            proxy_pool: None,
            proxy_sources: Vec::new(),
            hit_outputs: Vec::new(),
            log_capacity: JobLog::DEFAULT_CAPACITY,
        }
    }

    /// Create a job straight from its options
    pub fn new(options: MultiRunJobOptions, bot: Arc<dyn BotRunner>) -> Result<Self, JobError> {
        Self::builder(options, bot).build()
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn status(&self) -> JobStatus {
        self.inner.status()
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }

    /// Current options, including the advanced `skip`
    pub fn options(&self) -> MultiRunJobOptions {
        self.inner.options.read().clone()
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.inner.proxy_pool
    }

    /// Recent job log entries, oldest first
    pub fn logs(&self) -> Vec<JobLogEntry> {
        self.inner.log.entries()
    }

    /// Start a run
    ///
    /// Returns once the run is scheduled; the job then goes through `Waiting`
    /// (if a start condition is set) and `Starting` to `Running`.
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn start(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Idle])?;

        let options = inner.options.read().clone();
        if options.uses_proxies()
            && options.proxy_sources.is_empty()
            && inner.extra_sources.is_empty()
            && inner.proxy_pool.is_empty()
        {
            return Err(JobError::InvalidOptions(
                "proxies are enabled but there is no proxy source".to_string(),
            ));
        }

        let (lines, total) = {
            let pool = inner.data_pool.lock();
            (pool.lines(options.skip)?, pool.total())
        };

        *inner.counters.lock() = RunCounters::new(total, options.consumed());
        *inner.requested.lock() = None;

        let cancel = CancellationToken::new();
        let start_now = CancellationToken::new();
        *inner.run.lock() = Some(RunHandle {
            cancel: cancel.clone(),
            start_now: start_now.clone(),
        });

        inner.set_status(match options.start_condition {
            StartCondition::Immediate => JobStatus::Starting,
            _ => JobStatus::Waiting,
        });
        inner.log.info(format!(
            "Started with {} bots, skip {}, total {}",
            options.bots,
            options.skip,
            total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
        ));

        tokio::spawn(Arc::clone(inner).run(options, lines, total, cancel, start_now));
        Ok(())
    }

    /// Stop handing out new lines; in-flight checks keep running
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn pause(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Running])?;

        inner.set_status(JobStatus::Pausing);
        if let Some(executor) = inner.executor() {
            if let Err(e) = executor.pause() {
                inner.set_status(JobStatus::Running);
                return Err(e.into());
            }
        }
        inner.set_status(JobStatus::Paused);
        inner.log.info("Paused");
        Ok(())
    }

    /// Continue from where the job was paused
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn resume(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Paused])?;

        inner.set_status(JobStatus::Resuming);
        if let Some(executor) = inner.executor() {
            if let Err(e) = executor.resume() {
                inner.set_status(JobStatus::Paused);
                return Err(e.into());
            }
        }
        inner.set_status(JobStatus::Running);
        inner.log.info("Resumed");
        Ok(())
    }

    /// Soft stop: let in-flight checks finish, then go idle
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn stop(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        let status = inner.status();
        status.require(&[JobStatus::Running, JobStatus::Paused, JobStatus::Waiting])?;

        if let Some(executor) = inner.executor() {
            executor.stop()?;
        }
        *inner.requested.lock() = Some(Completion::Stopped);
        if status == JobStatus::Waiting {
            inner.cancel_run();
        }

        inner.set_status(JobStatus::Stopping);
        inner.log.info("Stopping");
        Ok(())
    }

    /// Hard stop: cancel in-flight checks and go idle as soon as they unwind
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn abort(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Waiting,
            JobStatus::Starting,
            JobStatus::Stopping,
        ])?;

        *inner.requested.lock() = Some(Completion::Aborted);
        inner.cancel_run();
        if let Some(executor) = inner.executor() {
            // The executor may already be draining its last items
            if let Err(e) = executor.abort() {
                debug!(job_id = %inner.id, error = %e, "Executor did not accept abort");
            }
        }

        inner.set_status(JobStatus::Stopping);
        inner.log.info("Aborting");
        Ok(())
    }

    /// Change the number of concurrent bots, also while running
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn change_bots(&self, bots: usize) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[
            JobStatus::Idle,
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Paused,
        ])?;

        inner.options.write().bots = bots;
        if let Some(executor) = inner.executor() {
            executor.set_concurrency(bots);
        }
        inner.log.info(format!("Bots changed to {bots}"));
        Ok(())
    }

    /// Start a waiting job now
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn skip_wait(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Waiting])?;

        inner.release_start();
        inner.log.info("Start wait skipped");
        Ok(())
    }

    /// Satisfy a `Trigger` start condition
    #[instrument(skip(self), fields(job_id = %self.id()))]
    pub async fn trigger(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Waiting])?;

        if inner.options.read().start_condition != StartCondition::Trigger {
            return Err(JobError::InvalidOptions(
                "the job does not wait for a trigger".to_string(),
            ));
        }
        inner.release_start();
        inner.log.info("Start triggered");
        Ok(())
    }

    /// Re-read the data pool's source, e.g. after the file changed on disk
    pub async fn reload_data(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.status().require(&[JobStatus::Idle])?;

        let reloading = Arc::clone(inner);
        let total = tokio::task::spawn_blocking(move || {
            let mut pool = reloading.data_pool.lock();
            pool.reload().map(|()| pool.total())
        })
        .await??;
        inner.counters.lock().total = total;
        inner.log.info("Data pool reloaded");
        Ok(())
    }

    /// Reload the proxy sources now
    pub async fn reload_proxies(&self) -> Result<usize, JobError> {
        let sources = self.inner.sources(&self.inner.options.read());
        let count = self.inner.proxy_pool.reload(&sources).await?;
        self.inner.log.info(format!("Reloaded {count} proxies"));
        Ok(count)
    }

    /// Wait until the job is idle again and return the final snapshot
    pub async fn wait_idle(&self, timeout: Duration) -> Result<JobSnapshot, JobError> {
        let mut status = self.inner.status.subscribe();
        tokio::time::timeout(timeout, async move {
            // The sender lives as long as the job, so the channel never closes
            let _ = status.wait_for(|s| *s == JobStatus::Idle).await;
        })
        .await
        .map_err(|_| JobError::Timeout(timeout))?;

        Ok(self.snapshot())
    }

    /// Consistent view of the job's counters and status
    pub fn snapshot(&self) -> JobSnapshot {
        let inner = &self.inner;
        let status = inner.status();
        let (name, bots, skip, uses_proxies) = {
            let options = inner.options.read();
            (
                options.name.clone(),
                options.bots,
                options.skip,
                options.uses_proxies(),
            )
        };
        let active_bots = inner.executor().map_or(0, |e| e.state().active);

        let counters = inner.counters.lock();
        let stats = counters.stats;
        let cpm = counters.cpm.cpm(Instant::now());
        let consumed = counters.skip + stats.tested;
        let to_check = counters.total.map(|total| total.saturating_sub(consumed));
        let progress = counters.total.map(|total| match total {
            0 => 1.0,
            total => (consumed as f64 / total as f64).min(1.0),
        });
        let elapsed = counters.started_at.map(|started| {
            (counters.finished_at.unwrap_or_else(Utc::now) - started)
                .to_std()
                .unwrap_or_default()
        });
        let eta = if status.is_active() {
            estimate_eta(to_check, cpm)
        } else {
            None
        };

        JobSnapshot {
            id: inner.id,
            name,
            status,
            bots,
            active_bots,
            stats,
            total: counters.total,
            skip,
            to_check,
            progress,
            cpm,
            elapsed,
            eta,
            proxies: uses_proxies.then(|| inner.proxy_pool.stats()),
            waiting_for_proxies: inner.waiting_for_proxies.load(Ordering::SeqCst),
            started_at: counters.started_at,
            finished_at: counters.finished_at,
            last_completion: counters.last_completion.clone(),
        }
    }
}

impl std::fmt::Debug for MultiRunJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiRunJob")
            .field("id", &self.inner.id)
            .field("status", &self.inner.status())
            .finish_non_exhaustive()
    }
}

impl JobInner {
    fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: JobStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(job_id = %self.id, from = %previous, to = %status, "Job status changed");
        }
    }

    fn executor(&self) -> Option<Arc<JobExecutor>> {
        self.executor.lock().clone()
    }

    fn cancel_run(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            run.cancel.cancel();
        }
    }

    fn release_start(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            run.start_now.cancel();
        }
    }

    fn requested_completion(&self) -> Completion {
        self.requested.lock().clone().unwrap_or(Completion::Aborted)
    }

    fn sources(&self, options: &MultiRunJobOptions) -> Vec<Arc<dyn ProxySource>> {
        options
            .proxy_sources
            .iter()
            .map(|spec| spec.build())
            .chain(self.extra_sources.iter().cloned())
            .collect()
    }

    fn outputs(&self, options: &MultiRunJobOptions) -> Vec<Arc<dyn HitOutput>> {
        options
            .hit_outputs
            .iter()
            .map(|spec| spec.build())
            .chain(self.extra_outputs.iter().cloned())
            .collect()
    }

    async fn run(
        self: Arc<Self>,
        options: MultiRunJobOptions,
        lines: DataLines,
        total: Option<u64>,
        cancel: CancellationToken,
        start_now: CancellationToken,
    ) {
        let summary = self
            .drive(&options, lines, total, &cancel, &start_now)
            .await;
        self.finish(summary).await;
    }

    async fn drive(
        self: &Arc<Self>,
        options: &MultiRunJobOptions,
        lines: DataLines,
        total: Option<u64>,
        cancel: &CancellationToken,
        start_now: &CancellationToken,
    ) -> RunSummary {
        if !self
            .wait_for_start(&options.start_condition, cancel, start_now)
            .await
        {
            return unstarted(self.requested_completion(), options);
        }

        {
            let _control = self.control.lock().await;
            if cancel.is_cancelled() {
                return unstarted(self.requested_completion(), options);
            }
            self.set_status(JobStatus::Starting);
        }

        let uses_proxies = options.uses_proxies();
        let sources = self.sources(options);
        if uses_proxies && !sources.is_empty() {
            let reloaded = tokio::select! {
                _ = cancel.cancelled() => return unstarted(self.requested_completion(), options),
                reloaded = self.proxy_pool.reload(&sources) => reloaded,
            };
            match reloaded {
                Ok(count) => self.log.info(format!("Loaded {count} proxies")),
                Err(e) if self.proxy_pool.is_empty() => {
                    self.log.error(format!("No proxies could be loaded: {e}"));
                    return unstarted(
                        Completion::Failed(format!("no proxies could be loaded: {e}")),
                        options,
                    );
                }
                Err(e) => self.log.warn(format!("Proxy reload failed, keeping the current list: {e}")),
            }
        }

        let checker = Arc::new(Checker {
            job_id: self.id,
            bot: Arc::clone(&self.bot),
            proxies: uses_proxies.then(|| Arc::clone(&self.proxy_pool)),
            sources: sources.clone(),
            behaviour: options.no_valid_proxy_behaviour,
            wait_interval: options.proxy_wait_interval,
            ban_loop_evasion: options.ban_loop_evasion,
            retry_errors: options.retry_errors,
            waiting: Arc::clone(&self.waiting_for_proxies),
        });

        let config = ExecutorConfig::new(options.bots).with_name(format!("job-{}", self.id));
        let executor = Arc::new(WorkExecutor::new(
            config,
            move |line: DataLine, cancel: CancellationToken| Arc::clone(&checker).check(line, cancel),
        ));

        let skip = options.skip;
        let items = lines.enumerate().map(move |(i, line)| {
            line.map(|line| DataLine {
                index: skip + i as u64,
                line,
            })
            .map_err(WorkError::from)
        });
        let mut input = ExecutorInput::new(items)
            .starting_at(skip)
            .excluding(options.completed_ahead.iter().copied());
        if let Some(total) = total {
            input = input.with_total(total);
        }

        let events = {
            let _control = self.control.lock().await;
            if cancel.is_cancelled() {
                return unstarted(self.requested_completion(), options);
            }
            // Bots may have changed while waiting
            executor.set_concurrency(self.options.read().bots);
            let events = match executor.start(input) {
                Ok(events) => events,
                Err(e) => return unstarted(Completion::Failed(e.to_string()), options),
            };
            *self.executor.lock() = Some(Arc::clone(&executor));
            self.counters.lock().started_at = Some(Utc::now());
            self.set_status(JobStatus::Running);
            events
        };
        self.log.info("Running");

        if uses_proxies {
            if let Some(interval) = options.periodic_proxy_reload {
                self.spawn_proxy_reload(interval, sources, cancel.clone());
            }
        }

        let outputs = self.outputs(options);
        self.consume(events, options, &outputs).await
    }

    async fn wait_for_start(
        &self,
        condition: &StartCondition,
        cancel: &CancellationToken,
        start_now: &CancellationToken,
    ) -> bool {
        let delay = match condition {
            StartCondition::Immediate => return true,
            StartCondition::At { time } => Some((*time - Utc::now()).to_std().unwrap_or_default()),
            StartCondition::After { delay } => Some(*delay),
            StartCondition::Trigger => None,
        };

        match delay {
            Some(delay) => self.log.info(format!("Waiting {}s before starting", delay.as_secs())),
            None => self.log.info("Waiting for a trigger"),
        }

        let timer = async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = start_now.cancelled() => true,
            _ = timer => true,
        }
    }

    fn spawn_proxy_reload(
        self: &Arc<Self>,
        interval: Duration,
        sources: Vec<Arc<dyn ProxySource>>,
        cancel: CancellationToken,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match inner.proxy_pool.reload(&sources).await {
                        Ok(count) => debug!(job_id = %inner.id, count, "Periodic proxy reload"),
                        Err(e) => inner.log.warn(format!("Periodic proxy reload failed: {e}")),
                    },
                }
            }
        });
    }

    /// Single writer of the run counters
    async fn consume(
        &self,
        mut events: mpsc::UnboundedReceiver<ExecutorEvent<DataLine, CheckOutput>>,
        options: &MultiRunJobOptions,
        outputs: &[Arc<dyn HitOutput>],
    ) -> RunSummary {
        while let Some(event) = events.recv().await {
            match event {
                ExecutorEvent::Result(details) => self.record_result(details, options, outputs).await,
                ExecutorEvent::Error(item) => self.record_error(item),
                ExecutorEvent::Progress(_) => {}
                ExecutorEvent::Completed(summary) => return summary,
            }
        }

        RunSummary {
            processed: self.counters.lock().stats.tested,
            ..unstarted(
                Completion::Failed("executor event stream closed".to_string()),
                options,
            )
        }
    }

    async fn record_result(
        &self,
        details: ResultDetails<DataLine, CheckOutput>,
        options: &MultiRunJobOptions,
        outputs: &[Arc<dyn HitOutput>],
    ) {
        let ResultDetails { input, output, .. } = details;

        let kind = {
            let mut guard = self.counters.lock();
            let counters = &mut *guard;
            counters.cpm.record(Instant::now());

            let stats = &mut counters.stats;
            stats.tested += 1;
            stats.bans += u64::from(output.bans);
            stats.retries += u64::from(output.retries);

            match &output.outcome {
                BotOutcome::Success => {
                    stats.hits += 1;
                    Some(HitKind::Success)
                }
                BotOutcome::Custom(name) => {
                    stats.custom += 1;
                    options
                        .store_custom_hits
                        .then(|| HitKind::Custom(name.clone()))
                }
                BotOutcome::Error => {
                    stats.errors += 1;
                    None
                }
                BotOutcome::Fail | BotOutcome::Ban | BotOutcome::Retry => {
                    stats.fails += 1;
                    if output.evaded {
                        stats.evaded += 1;
                    }
                    None
                }
            }
        };

        if let Some(reason) = &output.reason {
            self.log.warn(format!("Line {} skipped: {}", input.index, reason));
        }

        let Some(kind) = kind else {
            return;
        };

        let mut hit = Hit::new(self.id, input.line, kind).with_captured(output.captured);
        if let Some(proxy) = output.proxy {
            hit = hit.with_proxy(proxy);
        }

        for sink in outputs {
            if let Err(e) = sink.store(&hit).await {
                self.log.warn(format!("Hit output {} failed: {e}", sink.name()));
            }
        }
    }

    fn record_error(&self, item: ItemError<DataLine>) {
        let (bans, retries) = item
            .error
            .downcast_ref::<CheckFailure>()
            .map_or((0, 0), |failure| (failure.bans, failure.retries));

        {
            let mut guard = self.counters.lock();
            let counters = &mut *guard;
            counters.cpm.record(Instant::now());
            counters.stats.tested += 1;
            counters.stats.errors += 1;
            counters.stats.bans += u64::from(bans);
            counters.stats.retries += u64::from(retries);
        }

        self.log
            .warn(format!("Line {} failed: {:#}", item.input.index, item.error));
    }

    async fn finish(&self, summary: RunSummary) {
        let RunSummary {
            completion,
            processed,
            resume_at,
            completed_ahead,
        } = summary;
        let _control = self.control.lock().await;

        if let Some(run) = self.run.lock().take() {
            run.cancel.cancel();
        }
        *self.executor.lock() = None;

        let (skip, ahead) = {
            let mut options = self.options.write();
            if matches!(completion, Completion::Stopped | Completion::Aborted) {
                options.skip = resume_at;
                options.completed_ahead = completed_ahead;
            }
            (options.skip, options.completed_ahead.len())
        };

        {
            let mut counters = self.counters.lock();
            counters.finished_at = Some(Utc::now());
            counters.last_completion = Some(completion.clone());
        }

        self.set_status(JobStatus::Idle);
        match &completion {
            Completion::Failed(reason) => self.log.error(format!("Run failed: {reason}")),
            _ if ahead > 0 => self.log.info(format!(
                "Run {completion} after {processed} lines, next start resumes at line {skip} \
                 passing over {ahead} lines already checked"
            )),
            _ => self.log.info(format!(
                "Run {completion} after {processed} lines, next start resumes at line {skip}"
            )),
        }
        info!(job_id = %self.id, completion = %completion, processed, "Job idle");
    }
}

/// Summary of a run that never reached the executor; the resume position is unchanged
fn unstarted(completion: Completion, options: &MultiRunJobOptions) -> RunSummary {
    RunSummary {
        completion,
        processed: 0,
        resume_at: options.skip,
        completed_ahead: options.completed_ahead.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{BotContext, BotError, BotResult};
    use crate::data::ListDataPool;
    use crate::hits::MemoryHitOutput;
    use crate::proxy::Proxy;
    use async_trait::async_trait;

    struct ParityBot;

    #[async_trait]
    impl BotRunner for ParityBot {
        async fn run(
            &self,
            line: &str,
            _proxy: Option<&Proxy>,
            _ctx: &BotContext,
        ) -> Result<BotResult, BotError> {
            let n: u64 = line
                .parse()
                .map_err(|_| BotError::Other(format!("not a number: {line}")))?;
            Ok(if n % 2 == 0 {
                BotResult::success().with_capture("n", line)
            } else {
                BotResult::fail()
            })
        }
    }

    fn job(lines: Vec<String>, options: MultiRunJobOptions) -> (MultiRunJob, Arc<MemoryHitOutput>) {
        let hits = Arc::new(MemoryHitOutput::new());
        let job = MultiRunJob::builder(options, Arc::new(ParityBot))
            .with_data_pool(Box::new(ListDataPool::new(lines)))
            .with_hit_output(hits.clone())
            .build()
            .unwrap();
        (job, hits)
    }

    fn numbers(count: u64) -> Vec<String> {
        (0..count).map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let (job, hits) = job(numbers(20), MultiRunJobOptions::new().with_bots(4));
        job.start().await.unwrap();

        let snapshot = job.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert_eq!(snapshot.stats.tested, 20);
        assert_eq!(snapshot.stats.hits, 10);
        assert_eq!(snapshot.stats.fails, 10);
        assert_eq!(snapshot.to_check, Some(0));
        assert_eq!(snapshot.progress, Some(1.0));
        assert_eq!(snapshot.last_completion, Some(Completion::Finished));
        assert_eq!(hits.len(), 10);
        assert_eq!(job.options().skip, 0);
    }

    #[tokio::test]
    async fn test_bot_errors_are_counted() {
        let mut lines = numbers(4);
        lines.push("not-a-number".to_string());
        let (job, _) = job(lines, MultiRunJobOptions::new());

        job.start().await.unwrap();
        let snapshot = job.wait_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(snapshot.stats.tested, 5);
        assert_eq!(snapshot.stats.errors, 1);
        assert!(job.logs().iter().any(|e| e.message.contains("not a number")));
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let (job, _) = job(numbers(1), MultiRunJobOptions::new());

        assert!(matches!(
            job.pause().await,
            Err(JobError::RequiredStatus {
                actual: JobStatus::Idle,
                ..
            })
        ));
        assert!(job.resume().await.is_err());
        assert!(job.stop().await.is_err());
        assert!(job.abort().await.is_err());
        assert!(job.skip_wait().await.is_err());
        assert!(job.change_bots(3).await.is_ok());
        assert_eq!(job.options().bots, 3);
    }

    #[tokio::test]
    async fn test_start_requires_proxy_source() {
        let (job, _) = job(numbers(1), MultiRunJobOptions::new().with_use_proxies(true));
        assert!(matches!(job.start().await, Err(JobError::InvalidOptions(_))));
        assert_eq!(job.status(), JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_trigger_start() {
        let options = MultiRunJobOptions::new().with_start_condition(StartCondition::Trigger);
        let (job, _) = job(numbers(3), options);

        job.start().await.unwrap();
        assert_eq!(job.status(), JobStatus::Waiting);
        assert!(job.start().await.is_err());

        job.trigger().await.unwrap();
        let snapshot = job.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(snapshot.stats.tested, 3);
    }

    #[tokio::test]
    async fn test_stop_while_waiting() {
        let options = MultiRunJobOptions::new().with_start_condition(StartCondition::After {
            delay: Duration::from_secs(3600),
        });
        let (job, _) = job(numbers(3), options);

        job.start().await.unwrap();
        assert!(matches!(job.trigger().await, Err(JobError::InvalidOptions(_))));

        job.stop().await.unwrap();
        let snapshot = job.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(snapshot.stats.tested, 0);
        assert_eq!(snapshot.last_completion, Some(Completion::Stopped));
    }

    #[tokio::test]
    async fn test_restart_runs_again() {
        let (job, hits) = job(numbers(6), MultiRunJobOptions::new().with_bots(2));

        job.start().await.unwrap();
        job.wait_idle(Duration::from_secs(5)).await.unwrap();
        job.start().await.unwrap();
        let snapshot = job.wait_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(snapshot.stats.tested, 6);
        assert_eq!(hits.len(), 6);
    }
}
