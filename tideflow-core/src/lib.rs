//! # Tideflow Core
//!
//! Core runtime for the Tideflow micro-batch stream processing engine.
//!
//! Tideflow treats an unbounded input as a growing table: a
//! [`TriggerScheduler`](trigger::TriggerScheduler) decides when the next
//! increment runs, the engine pulls new offset ranges from its sources,
//! folds the records into keyed, windowed aggregate state, emits results
//! according to the active output mode, and atomically checkpoints
//! `{offsets, watermark, state}` so a restart resumes exactly where the
//! previous process left off.
//!
//! This crate provides the engine building blocks:
//!
//! - [`types`] — Core data types: [`Record`](types::Record),
//!   [`Batch`](types::Batch), [`Offset`](types::Offset),
//!   [`OffsetRange`](types::OffsetRange), and the
//!   [`StreamData`](types::StreamData) trait bound.
//! - [`config`] — The validated [`EngineConfig`](config::EngineConfig),
//!   [`TriggerMode`](config::TriggerMode), and
//!   [`OutputMode`](config::OutputMode).
//! - [`source`] — The [`SourceAdapter`](source::SourceAdapter) contract and
//!   the [`OffsetTracker`](source::OffsetTracker).
//! - [`window`] — Window assignment, watermark bookkeeping, and late-data
//!   policy: [`WindowManager`](window::WindowManager).
//! - [`state`] — Keyed `(key, window)` accumulator state:
//!   [`StateStore`](state::StateStore) and the
//!   [`Aggregate`](state::Aggregate) merge contract.
//! - [`checkpoint`] — Stage-then-publish checkpointing:
//!   [`CheckpointManager`](checkpoint::CheckpointManager).
//! - [`trigger`] — Increment scheduling and the engine state machine.
//! - [`output`] — Output-mode-aware emission and the
//!   [`Sink`](output::Sink) contract.
//! - [`engine`] — The assembled increment loop:
//!   [`StreamEngine`](engine::StreamEngine) and
//!   [`EngineHandle`](engine::EngineHandle).

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod partition;
pub mod source;
pub mod state;
pub mod trigger;
pub mod types;
pub mod window;
