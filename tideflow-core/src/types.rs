use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. Used to represent no upper bound.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// Unique, monotonically increasing identifier for one committed increment.
pub type IncrementId = u64;

/// Identifier of a registered source.
pub type SourceId = String;

/// Source-scoped position marker.
///
/// Opaque to everything except the source that issued it; the engine only
/// relies on total ordering. Offsets committed for a source are
/// non-decreasing and gap-free relative to what was consumed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Offset(pub u64);

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A half-open offset interval `[begin, end)` pulled in one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub begin: Offset,
    pub end: Offset,
}

impl OffsetRange {
    pub fn new(begin: Offset, end: Offset) -> Self {
        Self { begin, end }
    }

    /// Return true if the range contains no offsets.
    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// Number of offsets covered by this range.
    pub fn len(&self) -> u64 {
        self.end.0.saturating_sub(self.begin.0)
    }
}

impl std::fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// A record in the stream, carrying user data and optional event time.
///
/// Records without an event time are stamped with processing time when the
/// batch is assembled, so downstream windowing always sees a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record<T> {
    pub value: T,
    pub event_time: Option<EventTime>,
}

impl<T> Record<T> {
    /// Create a record with no event time.
    pub fn new(value: T) -> Self {
        Self {
            value,
            event_time: None,
        }
    }

    /// Create a record with an explicit event time.
    pub fn with_event_time(value: T, event_time: EventTime) -> Self {
        Self {
            value,
            event_time: Some(event_time),
        }
    }
}

/// The records pulled between two offset snapshots, for one increment.
///
/// Immutable once formed; owned by the increment that pulled it and
/// discarded when the increment ends.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Offset range pulled from each source this increment.
    pub ranges: BTreeMap<SourceId, OffsetRange>,
    pub records: Vec<Record<T>>,
}

impl<T> Batch<T> {
    pub fn new(ranges: BTreeMap<SourceId, OffsetRange>, records: Vec<Record<T>>) -> Self {
        Self { ranges, records }
    }

    /// Return true if no source produced records this increment.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Trait bound for types that can flow through the engine.
/// All user data, key, and accumulator types must satisfy this.
pub trait StreamData: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

// Blanket implementation: any type satisfying the bounds is StreamData.
impl<T> StreamData for T where T: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_range_len_and_empty() {
        let range = OffsetRange::new(Offset(10), Offset(10));
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);

        let range = OffsetRange::new(Offset(10), Offset(25));
        assert!(!range.is_empty());
        assert_eq!(range.len(), 15);
    }

    #[test]
    fn test_record_event_time() {
        let rec = Record::new("hello");
        assert_eq!(rec.event_time, None);

        let rec = Record::with_event_time("hello", 999);
        assert_eq!(rec.event_time, Some(999));
        assert_eq!(rec.value, "hello");
    }

    #[test]
    fn test_batch_empty() {
        let mut ranges = BTreeMap::new();
        ranges.insert(
            "events".to_string(),
            OffsetRange::new(Offset(0), Offset(0)),
        );
        let batch: Batch<i32> = Batch::new(ranges, Vec::new());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_stream_data_trait() {
        // Verify common types satisfy StreamData.
        fn assert_stream_data<T: StreamData>() {}
        assert_stream_data::<i64>();
        assert_stream_data::<String>();
        assert_stream_data::<(String, i64)>();
        assert_stream_data::<Vec<u8>>();
    }
}
