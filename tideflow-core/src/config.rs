//! Engine configuration.
//!
//! One explicit struct enumerating every recognized option, validated
//! eagerly at start-up. There is no dynamic option bag: an unsupported
//! combination fails `validate()` before the engine thread spawns.

use std::time::Duration;

use crate::error::{EngineError, Result};

/// When the next increment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Run an increment every `interval`, or as soon as the previous one
    /// finishes, whichever is later. Increments never overlap.
    FixedInterval(Duration),
    /// Run exactly one increment over all currently-available data, then
    /// stop.
    Once,
    /// Low-latency mode: records are folded as they are polled, and the
    /// checkpoint/emission protocol runs at fixed epoch boundaries instead
    /// of batch boundaries.
    Continuous(Duration),
}

/// Which rows of the result table are (re-)emitted each increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// A window's row is emitted exactly once, when the window closes.
    Append,
    /// Any (key, window) whose aggregate changed this increment is
    /// re-emitted, including still-open windows.
    Update,
    /// The full current result table is re-emitted every increment.
    /// Requires bounded state, i.e. a configured watermark.
    Complete,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Append => write!(f, "append"),
            OutputMode::Update => write!(f, "update"),
            OutputMode::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for OutputMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(OutputMode::Append),
            "update" => Ok(OutputMode::Update),
            "complete" => Ok(OutputMode::Complete),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown output mode '{other}' (expected append|update|complete)"
            ))),
        }
    }
}

/// What happens to a record whose windows have all already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LateDataPolicy {
    /// Drop the record and count it. The default.
    #[default]
    DropAndCount,
    /// Count the record and route it to a side buffer the caller can drain.
    SideOutput,
}

/// Validated engine configuration.
///
/// `watermark_enabled` is derived from whether an event-time extractor was
/// configured; without one the engine runs on processing time, state never
/// shrinks, and `Complete` output is rejected.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub trigger: TriggerMode,
    pub output_mode: OutputMode,
    pub allowed_lateness: Duration,
    pub watermark_enabled: bool,
    pub late_policy: LateDataPolicy,
    pub partition_count: usize,
    /// Skip increments where no source produced data, so the checkpoint
    /// directory is not flooded with empty manifests. `Once` always runs
    /// its single increment.
    pub skip_empty_increments: bool,
    /// Published checkpoints retained before purge.
    pub checkpoint_retention: usize,
    pub source_retries: u32,
    /// Base delay for exponential source backoff (doubles per attempt).
    pub source_backoff: Duration,
    pub sink_retries: u32,
    /// State entry count that triggers the one-shot unbounded-growth
    /// warning when no watermark is configured.
    pub state_warn_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::Once,
            output_mode: OutputMode::Append,
            allowed_lateness: Duration::ZERO,
            watermark_enabled: false,
            late_policy: LateDataPolicy::default(),
            partition_count: 1,
            skip_empty_increments: true,
            checkpoint_retention: 3,
            source_retries: 5,
            source_backoff: Duration::from_millis(50),
            sink_retries: 3,
            state_warn_threshold: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn with_trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    pub fn with_allowed_lateness(mut self, allowed_lateness: Duration) -> Self {
        self.allowed_lateness = allowed_lateness;
        self
    }

    pub fn with_late_policy(mut self, late_policy: LateDataPolicy) -> Self {
        self.late_policy = late_policy;
        self
    }

    pub fn with_partition_count(mut self, partition_count: usize) -> Self {
        self.partition_count = partition_count;
        self
    }

    pub fn with_checkpoint_retention(mut self, checkpoint_retention: usize) -> Self {
        self.checkpoint_retention = checkpoint_retention.max(1);
        self
    }

    /// Reject unsupported combinations before the engine starts.
    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(EngineError::InvalidConfig(
                "partition_count must be greater than 0".to_string(),
            ));
        }
        if let TriggerMode::FixedInterval(interval) = self.trigger {
            if interval.is_zero() {
                return Err(EngineError::InvalidConfig(
                    "fixed-interval trigger requires a non-zero interval".to_string(),
                ));
            }
        }
        if let TriggerMode::Continuous(epoch) = self.trigger {
            if epoch.is_zero() {
                return Err(EngineError::InvalidConfig(
                    "continuous trigger requires a non-zero epoch duration".to_string(),
                ));
            }
        }
        if self.output_mode == OutputMode::Complete && !self.watermark_enabled {
            return Err(EngineError::UnsupportedOutputMode(
                "complete mode requires bounded state: configure a watermark column".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_complete_without_watermark_rejected() {
        let config = EngineConfig::default().with_output_mode(OutputMode::Complete);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOutputMode(_)));
    }

    #[test]
    fn test_complete_with_watermark_accepted() {
        let mut config = EngineConfig::default().with_output_mode(OutputMode::Complete);
        config.watermark_enabled = true;
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let config = EngineConfig::default().with_partition_count(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config =
            EngineConfig::default().with_trigger(TriggerMode::FixedInterval(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_mode_parse() {
        assert_eq!("append".parse::<OutputMode>().unwrap(), OutputMode::Append);
        assert_eq!("update".parse::<OutputMode>().unwrap(), OutputMode::Update);
        assert_eq!(
            "complete".parse::<OutputMode>().unwrap(),
            OutputMode::Complete
        );
        assert!("other".parse::<OutputMode>().is_err());
    }
}
