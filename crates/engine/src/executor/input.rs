//! Input sequence handed to a run

use std::collections::BTreeSet;

use super::event::WorkError;

type Items<I> = Box<dyn Iterator<Item = Result<I, WorkError>> + Send>;

/// A lazily consumed input sequence
///
/// `skip` discards that many items before the first dispatch. `offset` declares
/// that the source was already advanced past that many items, which only shifts
/// item indices and progress accounting. `completed` lists indices past the
/// skip that an earlier run already finished; they are passed over.
pub struct ExecutorInput<I> {
    pub(crate) items: Items<I>,
    pub(crate) total: Option<u64>,
    pub(crate) skip: u64,
    pub(crate) offset: u64,
    pub(crate) completed: BTreeSet<u64>,
}

impl<I: Send + 'static> ExecutorInput<I> {
    /// Wrap a fallible iterator; an `Err` item ends the run as failed
    pub fn new<T>(items: T) -> Self
    where
        T: Iterator<Item = Result<I, WorkError>> + Send + 'static,
    {
        Self {
            items: Box::new(items),
            total: None,
            skip: 0,
            offset: 0,
            completed: BTreeSet::new(),
        }
    }

    /// Wrap an infallible iterator
    pub fn from_items<T>(items: T) -> Self
    where
        T: IntoIterator<Item = I>,
        T::IntoIter: Send + 'static,
    {
        Self::new(items.into_iter().map(Ok))
    }

    /// Wrap a vector; the total is known up front
    pub fn from_vec(items: Vec<I>) -> Self {
        let total = items.len() as u64;
        Self::from_items(items).with_total(total)
    }

    /// Declare the size of the whole sequence (including skipped items)
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Discard the first `skip` items before dispatching
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Declare that the source already starts after `offset` items
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Pass over items at these indices without running them
    pub fn excluding(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.completed.extend(indices);
        self
    }
}

impl<I> std::fmt::Debug for ExecutorInput<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorInput")
            .field("total", &self.total)
            .field("skip", &self.skip)
            .field("offset", &self.offset)
            .field("completed", &self.completed.len())
            .finish_non_exhaustive()
    }
}
