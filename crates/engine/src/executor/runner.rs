//! Work executor
//!
//! Drives one async work function over an input sequence with a bounded,
//! runtime-adjustable number of concurrent workers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::cursor::ResumeCursor;
use super::event::{
    Completion, ExecutorEvent, ItemError, Progress, ResultDetails, RunSummary, WorkError, WorkItem,
};
use super::input::ExecutorInput;
use super::slots::{Slot, SlotGate};

/// Work function type: receives an input and a cancellation token for the run
pub type WorkFn<I, O> = Arc<
    dyn Fn(I, CancellationToken) -> BoxFuture<'static, Result<O, WorkError>> + Send + Sync,
>;

type Items<I> = Box<dyn Iterator<Item = Result<I, WorkError>> + Send>;

/// Inputs buffered ahead of the coordinator by the blocking reader
const READ_AHEAD: usize = 64;

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Name used in log fields
    pub name: String,

    /// Initial number of concurrent workers
    pub concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "executor".to_string(),
            concurrency: 1,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with the given concurrency
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Set the name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the initial concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Executor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    /// No run in progress; `start` is allowed
    Idle,
    /// Dispatching items
    Running,
    /// Not acquiring new slots; in-flight items keep running
    Paused,
    /// No new items are pulled; in-flight items drain
    Stopping,
    /// In-flight items were told to cancel
    Aborting,
}

impl std::fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Aborting => write!(f, "aborting"),
        }
    }
}

/// Point-in-time view of the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorState {
    pub status: ExecutorStatus,
    pub total: Option<u64>,
    pub processed: u64,
    pub active: usize,
    pub target: usize,
    pub skip: u64,
}

/// Executor errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Operation not allowed in the current status
    #[error("cannot {operation} while the executor is {status}")]
    IllegalState {
        operation: &'static str,
        status: ExecutorStatus,
    },

    /// The caller's wait elapsed; the run keeps going
    #[error("timed out after {0:?} waiting for the run to complete")]
    Timeout(Duration),

    /// Waiting on an executor that never ran
    #[error("no run has been started")]
    NeverStarted,
}

struct RunCounters {
    processed: AtomicU64,
    total: Option<u64>,
    skip: u64,
    cursor: Mutex<ResumeCursor>,
}

impl RunCounters {
    fn new(total: Option<u64>, skip: u64, cursor: ResumeCursor) -> Self {
        Self {
            processed: AtomicU64::new(0),
            total,
            skip,
            cursor: Mutex::new(cursor),
        }
    }
}

struct RunControl {
    stop: CancellationToken,
    abort: CancellationToken,
}

/// Bounded-concurrency executor over a sequence of inputs
///
/// The input cursor is advanced by a single coordinator task, one item per
/// granted slot. Each item runs on its own task; its result is reported and
/// counted before its slot is released.
///
/// # Example
///
/// ```ignore
/// let executor = WorkExecutor::new(ExecutorConfig::new(3), |line: String, cancel| async move {
///     tokio::select! {
///         _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled")),
///         len = check(&line) => Ok(len),
///     }
/// });
///
/// let events = executor.start(ExecutorInput::from_vec(lines))?;
/// executor.set_concurrency(10);
/// executor.pause()?;
/// executor.resume()?;
/// let summary = executor.wait_completion(Duration::from_secs(60)).await?;
/// ```
pub struct WorkExecutor<I, O> {
    config: ExecutorConfig,
    work: WorkFn<I, O>,
    gate: Arc<SlotGate>,
    status: Arc<RwLock<ExecutorStatus>>,
    counters: Mutex<Arc<RunCounters>>,
    control: Mutex<Option<RunControl>>,
    completion: Arc<watch::Sender<Option<RunSummary>>>,
}

impl<I, O> WorkExecutor<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Create an executor around a work function
    pub fn new<F, Fut>(config: ExecutorConfig, work: F) -> Self
    where
        F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkError>> + Send + 'static,
    {
        let work: WorkFn<I, O> =
            Arc::new(move |input: I, cancel: CancellationToken| work(input, cancel).boxed());
        let (completion, _) = watch::channel(None);

        Self {
            gate: Arc::new(SlotGate::new(config.concurrency)),
            config,
            work,
            status: Arc::new(RwLock::new(ExecutorStatus::Idle)),
            counters: Mutex::new(Arc::new(RunCounters::new(None, 0, ResumeCursor::default()))),
            control: Mutex::new(None),
            completion: Arc::new(completion),
        }
    }

    /// Start a run over `input`
    ///
    /// Returns the event stream of this run. `Completed` is its last message.
    #[instrument(skip(self, input), fields(executor = %self.config.name))]
    pub fn start(
        &self,
        input: ExecutorInput<I>,
    ) -> Result<mpsc::UnboundedReceiver<ExecutorEvent<I, O>>, ExecutorError> {
        let mut status = self.status.write();
        require(*status, "start", &[ExecutorStatus::Idle])?;

        let ExecutorInput {
            items,
            total,
            skip,
            offset,
            completed,
        } = input;

        let start = offset + skip;
        let passed = completed.range(start..).count() as u64;
        let cursor = ResumeCursor::new(start, completed);
        let counters = Arc::new(RunCounters::new(total, start + passed, cursor));
        *self.counters.lock() = Arc::clone(&counters);

        let abort = CancellationToken::new();
        let stop = abort.child_token();
        *self.control.lock() = Some(RunControl {
            stop: stop.clone(),
            abort: abort.clone(),
        });

        self.completion.send_replace(None);
        self.gate.resume();
        *status = ExecutorStatus::Running;
        drop(status);

        let (events, events_rx) = mpsc::unbounded_channel();
        let run = RunContext {
            name: self.config.name.clone(),
            work: Arc::clone(&self.work),
            gate: Arc::clone(&self.gate),
            status: Arc::clone(&self.status),
            completion: Arc::clone(&self.completion),
            counters,
            events,
            stop,
            abort,
        };

        info!(
            concurrency = self.gate.target(),
            total = ?total,
            skip,
            offset,
            passed,
            "Starting run"
        );

        tokio::spawn(run.coordinate(items, skip, offset));
        Ok(events_rx)
    }

    /// Change the number of concurrent workers
    ///
    /// Growing takes effect immediately. Shrinking never interrupts in-flight
    /// items; the active count drains to the new limit as they finish.
    #[instrument(skip(self), fields(executor = %self.config.name))]
    pub fn set_concurrency(&self, concurrency: usize) {
        let previous = self.gate.target();
        self.gate.set_target(concurrency);
        info!(previous, concurrency, "Concurrency changed");
    }

    /// Stop acquiring new slots; in-flight items run to completion
    #[instrument(skip(self), fields(executor = %self.config.name))]
    pub fn pause(&self) -> Result<(), ExecutorError> {
        let mut status = self.status.write();
        require(*status, "pause", &[ExecutorStatus::Running])?;

        self.gate.pause();
        *status = ExecutorStatus::Paused;
        info!(active = self.gate.active(), "Run paused");
        Ok(())
    }

    /// Resume acquiring slots from the saved input position
    #[instrument(skip(self), fields(executor = %self.config.name))]
    pub fn resume(&self) -> Result<(), ExecutorError> {
        let mut status = self.status.write();
        require(*status, "resume", &[ExecutorStatus::Paused])?;

        self.gate.resume();
        *status = ExecutorStatus::Running;
        info!("Run resumed");
        Ok(())
    }

    /// Soft stop: pull no more input, let in-flight items finish
    #[instrument(skip(self), fields(executor = %self.config.name))]
    pub fn stop(&self) -> Result<(), ExecutorError> {
        let mut status = self.status.write();
        require(
            *status,
            "stop",
            &[ExecutorStatus::Running, ExecutorStatus::Paused],
        )?;

        if let Some(control) = self.control.lock().as_ref() {
            control.stop.cancel();
        }
        *status = ExecutorStatus::Stopping;
        info!(active = self.gate.active(), "Stopping run");
        Ok(())
    }

    /// Hard stop: signal cancellation to in-flight items and complete as soon as they unwind
    #[instrument(skip(self), fields(executor = %self.config.name))]
    pub fn abort(&self) -> Result<(), ExecutorError> {
        let mut status = self.status.write();
        require(
            *status,
            "abort",
            &[
                ExecutorStatus::Running,
                ExecutorStatus::Paused,
                ExecutorStatus::Stopping,
            ],
        )?;

        if let Some(control) = self.control.lock().as_ref() {
            control.abort.cancel();
        }
        *status = ExecutorStatus::Aborting;
        info!(active = self.gate.active(), "Aborting run");
        Ok(())
    }

    /// Wait until the current (or last) run completes
    ///
    /// A timeout only bounds the caller's wait, the run keeps going.
    pub async fn wait_completion(&self, timeout: Duration) -> Result<RunSummary, ExecutorError> {
        let mut rx = self.completion.subscribe();
        if rx.borrow().is_none() && self.status() == ExecutorStatus::Idle {
            return Err(ExecutorError::NeverStarted);
        }

        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|summary| summary.clone())
        })
        .await;

        match waited {
            Ok(Some(summary)) => Ok(summary),
            Ok(None) => Err(ExecutorError::NeverStarted),
            Err(_) => Err(ExecutorError::Timeout(timeout)),
        }
    }

    /// Get current status
    pub fn status(&self) -> ExecutorStatus {
        *self.status.read()
    }

    /// Get a snapshot of the executor counters
    pub fn state(&self) -> ExecutorState {
        let status = self.status();
        let counters = Arc::clone(&self.counters.lock());

        ExecutorState {
            status,
            total: counters.total,
            processed: counters.processed.load(Ordering::SeqCst),
            active: self.gate.active(),
            target: self.gate.target(),
            skip: counters.skip,
        }
    }

    /// Summary of the last completed run
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.completion.borrow().clone()
    }
}

fn require(
    status: ExecutorStatus,
    operation: &'static str,
    allowed: &[ExecutorStatus],
) -> Result<(), ExecutorError> {
    if allowed.contains(&status) {
        Ok(())
    } else {
        Err(ExecutorError::IllegalState { operation, status })
    }
}

/// State shared by the coordinator and the workers of one run
struct RunContext<I, O> {
    name: String,
    work: WorkFn<I, O>,
    gate: Arc<SlotGate>,
    status: Arc<RwLock<ExecutorStatus>>,
    completion: Arc<watch::Sender<Option<RunSummary>>>,
    counters: Arc<RunCounters>,
    events: mpsc::UnboundedSender<ExecutorEvent<I, O>>,
    stop: CancellationToken,
    abort: CancellationToken,
}

impl<I, O> RunContext<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    async fn coordinate(self, items: Items<I>, skip: u64, offset: u64) {
        let run = Arc::new(self);
        let mut items = read_ahead(items);
        let mut index = offset;
        let mut failure: Option<WorkError> = None;
        let mut exhausted = false;
        let mut interrupted = false;

        for _ in 0..skip {
            match run.pull(&mut items).await {
                Pull::Item(_) => index += 1,
                Pull::Failed(e) => {
                    failure = Some(e);
                    break;
                }
                Pull::Exhausted => {
                    exhausted = true;
                    break;
                }
                Pull::Interrupted => {
                    interrupted = true;
                    break;
                }
            }
        }

        if failure.is_none() && !exhausted && !interrupted {
            'dispatch: loop {
                let Some(slot) = run.gate.acquire(&run.stop).await else {
                    debug!(executor = %run.name, "Coordinator interrupted");
                    break;
                };

                let item = loop {
                    match run.pull(&mut items).await {
                        Pull::Item(input) => {
                            let item = WorkItem { input, index };
                            index += 1;
                            if run.counters.cursor.lock().is_complete(item.index) {
                                continue;
                            }
                            break item;
                        }
                        Pull::Failed(e) => {
                            failure = Some(e);
                            break 'dispatch;
                        }
                        Pull::Exhausted => {
                            exhausted = true;
                            break 'dispatch;
                        }
                        Pull::Interrupted => break 'dispatch,
                    }
                };

                tokio::spawn(Arc::clone(&run).execute(item, slot));
            }
        }
        drop(items);

        run.gate.wait_idle().await;

        let completion = match failure {
            Some(e) => {
                error!(executor = %run.name, error = %e, "Input source failed, run terminated");
                Completion::Failed(format!("{e:#}"))
            }
            None if run.abort.is_cancelled() => Completion::Aborted,
            None if exhausted => Completion::Finished,
            None => Completion::Stopped,
        };

        let (resume_at, completed_ahead) = {
            let cursor = run.counters.cursor.lock();
            (cursor.position(), cursor.ahead())
        };
        let summary = RunSummary {
            completion,
            processed: run.counters.processed.load(Ordering::SeqCst),
            resume_at,
            completed_ahead,
        };

        info!(
            executor = %run.name,
            completion = %summary.completion,
            processed = summary.processed,
            resume_at = summary.resume_at,
            "Run completed"
        );

        // Publish before going idle so a restart cannot be overwritten by this summary
        {
            let mut status = run.status.write();
            run.completion.send_replace(Some(summary.clone()));
            *status = ExecutorStatus::Idle;
        }
        let _ = run.events.send(ExecutorEvent::Completed(summary));
    }

    /// Next input, unless the run was stopped first
    async fn pull(&self, items: &mut mpsc::Receiver<Result<I, WorkError>>) -> Pull<I> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Pull::Interrupted,
            item = items.recv() => match item {
                Some(Ok(input)) => Pull::Item(input),
                Some(Err(e)) => Pull::Failed(e),
                None => Pull::Exhausted,
            },
        }
    }

    async fn execute(self: Arc<Self>, item: WorkItem<I>, slot: Slot) {
        let WorkItem { input, index } = item;
        let cancel = self.abort.child_token();

        let work = Arc::clone(&self.work);
        let argument = input.clone();
        let token = cancel.clone();
        let result = AssertUnwindSafe(async move { work(argument, token).await })
            .catch_unwind()
            .await;

        let event = match result {
            Ok(Ok(output)) => ExecutorEvent::Result(ResultDetails {
                input,
                output,
                index,
            }),
            Ok(Err(e)) if cancel.is_cancelled() => {
                debug!(executor = %self.name, index, error = %e, "Item cancelled");
                return;
            }
            Ok(Err(e)) => {
                debug!(executor = %self.name, index, error = %e, "Item failed");
                ExecutorEvent::Error(ItemError {
                    input,
                    index,
                    error: e,
                })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(executor = %self.name, index, "Work function panicked: {}", message);
                ExecutorEvent::Error(ItemError {
                    input,
                    index,
                    error: anyhow::anyhow!("work function panicked: {message}"),
                })
            }
        };

        let processed = self.counters.processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.cursor.lock().complete(index);
        let _ = self.events.send(event);
        let _ = self.events.send(ExecutorEvent::Progress(Progress {
            processed,
            skip: self.counters.skip,
            total: self.counters.total,
        }));

        drop(slot);
    }
}

enum Pull<I> {
    Item(I),
    Failed(WorkError),
    Exhausted,
    Interrupted,
}

/// Drive the input iterator on a blocking thread
///
/// Sources such as files do synchronous reads; the coordinator only awaits
/// the bounded channel. The reader ends after the first error or once the
/// receiver is dropped.
fn read_ahead<I: Send + 'static>(items: Items<I>) -> mpsc::Receiver<Result<I, WorkError>> {
    let (tx, rx) = mpsc::channel(READ_AHEAD);
    tokio::task::spawn_blocking(move || {
        for item in items {
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
