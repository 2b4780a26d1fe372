use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::types::{EventTime, EVENT_TIME_MIN};

mod assigner;
mod manager;
mod primitives;

pub use assigner::*;
pub use manager::*;
pub use primitives::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
