//! Stage-then-publish checkpointing.
//!
//! A checkpoint is the engine's only unit of recovery: one immutable
//! manifest `{increment_id, offsets, watermark, state}`. The manifest is
//! first written to a staging name, flushed durably, and only then
//! published with an atomic rename-style swap — so a crash mid-write is
//! indistinguishable from "checkpoint never happened" and recovery always
//! resumes from the last fully published manifest.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{EventTime, IncrementId, Offset, SourceId, EVENT_TIME_MIN};

mod manager;
mod manifest;
mod storage;

pub use manager::*;
pub use manifest::*;
pub use storage::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
