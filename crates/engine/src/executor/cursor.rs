//! Resume position of a run

use std::collections::BTreeSet;

/// Tracks which positions of the input sequence have been completed
///
/// `next` is the lowest position not completed yet. Completions that arrive
/// out of order above it are kept in `ahead` until the gap below them closes,
/// so the set stays as small as the number of items in flight plus any
/// positions that were cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeCursor {
    next: u64,
    ahead: BTreeSet<u64>,
}

impl ResumeCursor {
    /// Start at `position`, treating `done` positions as already completed
    pub fn new(position: u64, done: impl IntoIterator<Item = u64>) -> Self {
        let mut cursor = Self {
            next: position,
            ahead: BTreeSet::new(),
        };
        for index in done {
            cursor.complete(index);
        }
        cursor
    }

    /// Mark one position as completed
    pub fn complete(&mut self, index: u64) {
        if index == self.next {
            self.next += 1;
            while self.ahead.remove(&self.next) {
                self.next += 1;
            }
        } else if index > self.next {
            self.ahead.insert(index);
        }
    }

    /// Whether `index` needs no more work
    pub fn is_complete(&self, index: u64) -> bool {
        index < self.next || self.ahead.contains(&index)
    }

    /// Lowest position that still needs work
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Completed positions above [`position`](Self::position), ascending
    pub fn ahead(&self) -> Vec<u64> {
        self.ahead.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_completion_advances() {
        let mut cursor = ResumeCursor::new(5, []);
        cursor.complete(5);
        cursor.complete(6);
        assert_eq!(cursor.position(), 7);
        assert!(cursor.ahead().is_empty());
    }

    #[test]
    fn test_gap_holds_position() {
        let mut cursor = ResumeCursor::new(0, []);
        for index in [0, 2, 4, 6] {
            cursor.complete(index);
        }
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.ahead(), vec![2, 4, 6]);
        assert!(cursor.is_complete(0));
        assert!(cursor.is_complete(4));
        assert!(!cursor.is_complete(3));

        cursor.complete(1);
        assert_eq!(cursor.position(), 3);
        assert_eq!(cursor.ahead(), vec![4, 6]);
    }

    #[test]
    fn test_done_positions_below_start_ignored() {
        let cursor = ResumeCursor::new(4, [1, 4, 5, 8]);
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.ahead(), vec![8]);
    }
}
