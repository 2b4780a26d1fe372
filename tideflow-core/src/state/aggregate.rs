use super::*;

/// Incremental aggregation over one `(key, window)` accumulator.
///
/// The accumulator is updated per element, so only `O(1)` state is kept
/// per window instead of the element list.
///
/// # Merge precondition
///
/// `merge` must be associative and commutative. Increments fold records
/// into partition-local accumulators and re-merge the partials at the
/// commit barrier, in no particular order; a non-commutative merge
/// produces nondeterministic results. This is a caller contract the
/// engine cannot check.
pub trait Aggregate<IN, ACC, OUT>: Send + Sync {
    /// Create a fresh accumulator for a new `(key, window)` entry.
    fn create_accumulator(&self) -> ACC;
    /// Fold one element into the accumulator.
    fn add(&self, acc: &mut ACC, element: &IN);
    /// Merge a partial accumulator into `acc`.
    fn merge(&self, acc: &mut ACC, other: ACC);
    /// Compute the current result without consuming the accumulator;
    /// update and complete modes re-read still-open windows.
    fn result(&self, acc: &ACC) -> OUT;
}
