//! # Tideflow API
//!
//! User-facing facade over [`tideflow_core`]: build a streaming query with
//! [`QueryBuilder`], start it, and control it through [`StreamingQuery`].
//!
//! ```no_run
//! use std::time::Duration;
//! use tideflow_api::{AggregateRegistry, QueryBuilder};
//! use tideflow_core::config::{OutputMode, TriggerMode};
//! use tideflow_core::output::MemorySink;
//! use tideflow_core::source::MemorySource;
//! use tideflow_core::window::WindowSpec;
//!
//! let source: MemorySource<(String, i64)> = MemorySource::new();
//! let sink: MemorySink<String, i64> = MemorySink::new();
//! let registry = AggregateRegistry::default();
//!
//! let query = QueryBuilder::new("clicks-per-user")
//!     .source("clicks", source)
//!     .key_by(|event: &(String, i64)| event.0.clone())
//!     .watermark(|event: &(String, i64)| event.1, Duration::from_secs(60))
//!     .window(WindowSpec::tumbling(Duration::from_secs(300)))
//!     .trigger(TriggerMode::FixedInterval(Duration::from_secs(10)))
//!     .output_mode(OutputMode::Append)
//!     .aggregate_named(&registry, "count", |_event| 0)
//!     .unwrap()
//!     .start(sink)
//!     .unwrap();
//!
//! query.stop(Duration::from_secs(30)).unwrap();
//! ```

mod aggregate;
mod query;

pub use aggregate::*;
pub use query::*;
