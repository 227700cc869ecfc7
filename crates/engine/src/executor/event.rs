//! Work items and the events emitted by a run

use serde::{Deserialize, Serialize};

/// Error returned by a work function for a single item
pub type WorkError = anyhow::Error;

/// An input value and its position in the input sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<I> {
    pub input: I,
    pub index: u64,
}

/// Output of one completed work item
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDetails<I, O> {
    pub input: I,
    pub output: O,
    pub index: u64,
}

/// A work function failure for one item
#[derive(Debug)]
pub struct ItemError<I> {
    pub input: I,
    pub index: u64,
    pub error: WorkError,
}

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items processed in this run
    pub processed: u64,
    /// Items skipped before the first dispatch
    pub skip: u64,
    /// Size of the input sequence including skipped items, if known
    pub total: Option<u64>,
}

impl Progress {
    /// Fraction of the input sequence consumed, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(((self.skip + self.processed) as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum Completion {
    /// The input sequence was exhausted
    Finished,
    /// A soft stop drained the in-flight items
    Stopped,
    /// An abort cancelled the in-flight items
    Aborted,
    /// The coordinator failed (e.g. the input source broke)
    Failed(String),
}

impl Completion {
    /// Whether the run ended before the input was exhausted
    pub fn is_interrupted(&self) -> bool {
        !matches!(self, Self::Finished)
    }
}

impl std::fmt::Display for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Stopped => write!(f, "stopped"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Final summary of a run, carried by the completion event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub completion: Completion,
    pub processed: u64,
    /// Lowest index that was not completed; a rerun should start here
    pub resume_at: u64,
    /// Indices above `resume_at` that were completed and need no rerun
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_ahead: Vec<u64>,
}

/// Messages emitted by a run, in this order per item: `Result` or `Error`, then `Progress`.
/// `Completed` is always the last message of a run and is sent exactly once.
#[derive(Debug)]
pub enum ExecutorEvent<I, O> {
    Result(ResultDetails<I, O>),
    Error(ItemError<I>),
    Progress(Progress),
    Completed(RunSummary),
}
