use super::*;

/// Owns the watermark and decides when a window's result is final.
///
/// The watermark is `max(event time seen) - allowed_lateness` and never
/// regresses, for any input ordering. Open windows are indexed by end
/// timestamp in a `BTreeMap`, so closing on watermark advance is a range
/// drain rather than a scan of all state.
///
/// Without a configured watermark (no event-time extractor) the manager
/// never closes windows and never classifies records as late; state then
/// only grows, which the state store surfaces as an operational warning.
#[derive(Debug)]
pub struct WindowManager {
    spec: WindowSpec,
    allowed_lateness_ms: i64,
    watermark_enabled: bool,
    /// Maximum event time observed across all increments.
    max_event_time: EventTime,
    watermark: EventTime,
    /// Open windows indexed by end timestamp.
    pending: BTreeMap<EventTime, BTreeSet<TimeWindow>>,
    late_dropped: u64,
}

impl WindowManager {
    pub fn new(spec: WindowSpec, allowed_lateness: Duration, watermark_enabled: bool) -> Self {
        Self {
            spec,
            allowed_lateness_ms: allowed_lateness.as_millis() as i64,
            watermark_enabled,
            max_event_time: EVENT_TIME_MIN,
            watermark: EVENT_TIME_MIN,
            pending: BTreeMap::new(),
            late_dropped: 0,
        }
    }

    /// Current watermark; `EVENT_TIME_MIN` until the first event arrives.
    pub fn watermark(&self) -> EventTime {
        self.watermark
    }

    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    /// Return true if every window for an event at `event_time` has closed.
    pub fn is_late(&self, event_time: EventTime) -> bool {
        self.watermark_enabled && self.spec.latest_window_end(event_time) <= self.watermark
    }

    /// Record that `n` late records were dropped (or routed) this increment.
    pub fn add_late_dropped(&mut self, n: u64) {
        self.late_dropped += n;
    }

    /// Track a window that received data, so it can be closed later.
    pub fn observe(&mut self, window: TimeWindow) {
        self.pending.entry(window.end).or_default().insert(window);
    }

    /// Fold the batch's maximum event time into the watermark.
    ///
    /// `watermark = max(watermark, max_event_time - allowed_lateness)`;
    /// the max() keeps it monotone even if a later batch has an earlier
    /// maximum. Returns the (possibly unchanged) watermark.
    pub fn advance(&mut self, batch_max_event_time: EventTime) -> EventTime {
        if !self.watermark_enabled || batch_max_event_time == EVENT_TIME_MIN {
            return self.watermark;
        }
        if batch_max_event_time > self.max_event_time {
            self.max_event_time = batch_max_event_time;
            let candidate = self.max_event_time - self.allowed_lateness_ms;
            if candidate > self.watermark {
                self.watermark = candidate;
            }
        }
        self.watermark
    }

    /// Drain every open window whose end is at or below the watermark.
    ///
    /// Drained windows are final: their rows may be emitted (append mode)
    /// and their state evicted. Returned in ascending end order.
    pub fn take_closed(&mut self) -> Vec<TimeWindow> {
        if !self.watermark_enabled {
            return Vec::new();
        }
        let due: Vec<EventTime> = self
            .pending
            .range(..=self.watermark)
            .map(|(end, _)| *end)
            .collect();

        let mut closed = Vec::new();
        for end in due {
            if let Some(windows) = self.pending.remove(&end) {
                closed.extend(windows);
            }
        }
        closed
    }

    /// Number of windows still open.
    pub fn open_window_count(&self) -> usize {
        self.pending.values().map(|w| w.len()).sum()
    }

    /// Rebuild from a recovered checkpoint: the persisted watermark plus
    /// the windows present in the restored state store.
    pub fn restore(&mut self, watermark: EventTime, windows: impl IntoIterator<Item = TimeWindow>) {
        self.watermark = watermark;
        if watermark > EVENT_TIME_MIN {
            // The watermark formula implies the max event time seen.
            self.max_event_time = watermark.saturating_add(self.allowed_lateness_ms);
        }
        self.pending.clear();
        for window in windows {
            self.observe(window);
        }
    }
}
