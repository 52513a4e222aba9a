//! Ledger indices, ranges and the processing cursor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number of a closed ledger.
pub type LedgerIndex = u32;

/// Half-open ledger interval `(start, end]`.
///
/// `start` is the last ledger that was already processed, `end` is the
/// newly closed ledger. A range with `start == end` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerRange {
    /// Exclusive lower bound (last processed ledger).
    pub start: LedgerIndex,
    /// Inclusive upper bound (newly closed ledger).
    pub end: LedgerIndex,
}

impl LedgerRange {
    /// Create a range. `end` is clamped so it never precedes `start`.
    pub fn new(start: LedgerIndex, end: LedgerIndex) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Whether `index` lies in `(start, end]`.
    #[inline]
    pub fn contains(&self, index: LedgerIndex) -> bool {
        index > self.start && index <= self.end
    }

    /// Number of ledgers covered by the range.
    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for LedgerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

/// What the cursor decided for a newly observed ledger index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// First observation: the cursor now points at this index, nothing to scan.
    Baseline(LedgerIndex),
    /// Scan this range, then advance the cursor to `range.end`.
    Scan(LedgerRange),
    /// Index is not ahead of the cursor (duplicate or replayed notification).
    Stale {
        cursor: LedgerIndex,
        observed: LedgerIndex,
    },
}

/// Last fully processed ledger index.
///
/// Unset until the first ledger-closed notification, which only sets the
/// baseline. The cursor never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCursor {
    last: Option<LedgerIndex>,
}

impl LedgerCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last processed ledger, `None` before the baseline is set.
    #[inline]
    pub fn last(&self) -> Option<LedgerIndex> {
        self.last
    }

    #[inline]
    pub fn is_unset(&self) -> bool {
        self.last.is_none()
    }

    /// Classify a newly closed ledger index.
    ///
    /// Only the baseline case mutates the cursor; a `Scan` step must be
    /// followed by [`advance`](Self::advance) once the scan has finished.
    pub fn observe(&mut self, index: LedgerIndex) -> CursorStep {
        match self.last {
            None => {
                self.last = Some(index);
                CursorStep::Baseline(index)
            }
            Some(cursor) if index <= cursor => CursorStep::Stale {
                cursor,
                observed: index,
            },
            Some(cursor) => CursorStep::Scan(LedgerRange::new(cursor, index)),
        }
    }

    /// Move the cursor forward to `index`. Never moves it backwards.
    pub fn advance(&mut self, index: LedgerIndex) {
        self.last = Some(self.last.map_or(index, |last| last.max(index)));
    }
}
