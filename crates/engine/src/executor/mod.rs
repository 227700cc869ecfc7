//! Generic bounded-concurrency work executor
//!
//! This module provides:
//! - [`WorkExecutor`] - Runs an async work function over a sequence of inputs
//! - [`SlotGate`] - Counting slots whose limit can change while held slots are in flight
//! - [`ExecutorEvent`] - Result, error, progress and completion messages of a run
//! - [`ResumeCursor`] - Lowest unfinished position of a run, for resuming after an interruption
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkExecutor                           │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  Coordinator (single input cursor)                    │   │
//! │  │  acquire slot ─► pull next input ─► spawn worker      │   │
//! │  └──────────────────────────┬───────────────────────────┘   │
//! │                             │                                │
//! │                             ▼                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         SlotGate (target, active, paused)            │    │
//! │  │  [Worker 1] [Worker 2] [Worker 3] ... [Worker N]     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                             │                                │
//! │                             ▼                                │
//! │             events: Result | Error | Progress | Completed    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use multirun_engine::executor::{ExecutorConfig, ExecutorEvent, ExecutorInput, WorkExecutor};
//!
//! let executor = WorkExecutor::new(ExecutorConfig::new(10), |n: u64, _cancel| async move {
//!     Ok(n % 2 == 0)
//! });
//!
//! let mut events = executor.start(ExecutorInput::from_vec((0..100).collect()))?;
//! while let Some(event) = events.recv().await {
//!     if let ExecutorEvent::Completed(summary) = event {
//!         println!("done: {:?}", summary);
//!     }
//! }
//! ```

mod cursor;
mod event;
mod input;
mod runner;
mod slots;

pub use cursor::ResumeCursor;
pub use event::{
    Completion, ExecutorEvent, ItemError, Progress, ResultDetails, RunSummary, WorkError, WorkItem,
};
pub use input::ExecutorInput;
pub use runner::{
    ExecutorConfig, ExecutorError, ExecutorState, ExecutorStatus, WorkExecutor, WorkFn,
};
pub use slots::{Slot, SlotGate};
