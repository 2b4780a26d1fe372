use super::*;

/// Event-time window assignment: `floor(t, size, slide)`.
///
/// Tumbling windows are the `slide == size` special case; under sliding
/// configuration an event belongs to `ceil(size / slide)` overlapping
/// windows. Windows are aligned to multiples of `slide` from epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    size_ms: i64,
    slide_ms: i64,
}

impl WindowSpec {
    /// Fixed-size, non-overlapping windows.
    pub fn tumbling(size: Duration) -> Self {
        let size_ms = size.as_millis() as i64;
        Self {
            size_ms,
            slide_ms: size_ms,
        }
    }

    /// Fixed-size windows advancing every `slide`; overlapping when
    /// `slide < size`.
    pub fn sliding(size: Duration, slide: Duration) -> Self {
        Self {
            size_ms: size.as_millis() as i64,
            slide_ms: slide.as_millis() as i64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_ms <= 0 {
            return Err(EngineError::InvalidConfig(
                "window size must be positive".to_string(),
            ));
        }
        if self.slide_ms <= 0 || self.slide_ms > self.size_ms {
            return Err(EngineError::InvalidConfig(format!(
                "window slide must be in (0, size]: size={}ms slide={}ms",
                self.size_ms, self.slide_ms
            )));
        }
        Ok(())
    }

    /// Return the windows containing an event at `timestamp`, newest first.
    pub fn assign(&self, timestamp: EventTime) -> Vec<TimeWindow> {
        // Walk back from the last slide-aligned start until no window
        // covers the timestamp.
        let last_start = timestamp - timestamp.rem_euclid(self.slide_ms);
        let mut windows = Vec::with_capacity((self.size_ms / self.slide_ms) as usize);
        let mut start = last_start;
        while start > timestamp - self.size_ms {
            windows.push(TimeWindow::new(start, start + self.size_ms));
            start -= self.slide_ms;
        }
        windows
    }

    /// End of the latest window containing `timestamp`.
    ///
    /// An event is late exactly when this is at or below the watermark:
    /// every window it belongs to has already closed.
    pub fn latest_window_end(&self, timestamp: EventTime) -> EventTime {
        let last_start = timestamp - timestamp.rem_euclid(self.slide_ms);
        last_start + self.size_ms
    }
}
