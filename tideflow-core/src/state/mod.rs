use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{EventTime, StreamData};
use crate::window::TimeWindow;

mod aggregate;
mod store;

pub use aggregate::*;
pub use store::*;

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
