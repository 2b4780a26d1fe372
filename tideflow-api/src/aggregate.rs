//! Built-in aggregates and the name-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use tideflow_core::error::{EngineError, Result};
use tideflow_core::state::Aggregate;

/// The built-in numeric aggregates, all over extracted `i64` values.
///
/// Count ignores the value; sum/min/max fold it. Every variant's merge is
/// associative and commutative, as the engine's re-merging of partition
/// deltas requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAggregate {
    Count,
    Sum,
    Min,
    Max,
}

impl Aggregate<i64, i64, i64> for BuiltinAggregate {
    fn create_accumulator(&self) -> i64 {
        match self {
            BuiltinAggregate::Count | BuiltinAggregate::Sum => 0,
            BuiltinAggregate::Min => i64::MAX,
            BuiltinAggregate::Max => i64::MIN,
        }
    }

    fn add(&self, acc: &mut i64, element: &i64) {
        match self {
            BuiltinAggregate::Count => *acc += 1,
            BuiltinAggregate::Sum => *acc += element,
            BuiltinAggregate::Min => *acc = (*acc).min(*element),
            BuiltinAggregate::Max => *acc = (*acc).max(*element),
        }
    }

    fn merge(&self, acc: &mut i64, other: i64) {
        match self {
            BuiltinAggregate::Count | BuiltinAggregate::Sum => *acc += other,
            BuiltinAggregate::Min => *acc = (*acc).min(other),
            BuiltinAggregate::Max => *acc = (*acc).max(other),
        }
    }

    fn result(&self, acc: &i64) -> i64 {
        *acc
    }
}

/// Name-keyed registry of aggregates.
///
/// Names resolve at query build time, so a typo is a start-up error
/// carrying the known names — never a mid-stream surprise. Custom
/// aggregates with the same `i64` signature can be registered alongside
/// the built-ins.
pub struct AggregateRegistry {
    entries: HashMap<String, Arc<dyn Aggregate<i64, i64, i64>>>,
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry.register("count", Arc::new(BuiltinAggregate::Count));
        registry.register("sum", Arc::new(BuiltinAggregate::Sum));
        registry.register("min", Arc::new(BuiltinAggregate::Min));
        registry.register("max", Arc::new(BuiltinAggregate::Max));
        registry
    }
}

impl AggregateRegistry {
    pub fn register(&mut self, name: &str, aggregate: Arc<dyn Aggregate<i64, i64, i64>>) {
        self.entries.insert(name.to_string(), aggregate);
    }

    /// Registered names, sorted, for error messages and discovery.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Aggregate<i64, i64, i64>>> {
        self.entries.get(name).cloned().ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "unknown aggregate '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }
}

/// Adapts an `i64` aggregate to arbitrary record types through a value
/// extractor, so `aggregate_named` works against any stream.
pub struct MappedAggregate<T> {
    inner: Arc<dyn Aggregate<i64, i64, i64>>,
    value_fn: Arc<dyn Fn(&T) -> i64 + Send + Sync>,
}

impl<T> MappedAggregate<T> {
    pub fn new(
        inner: Arc<dyn Aggregate<i64, i64, i64>>,
        value_fn: Arc<dyn Fn(&T) -> i64 + Send + Sync>,
    ) -> Self {
        Self { inner, value_fn }
    }
}

impl<T: Send + Sync> Aggregate<T, i64, i64> for MappedAggregate<T> {
    fn create_accumulator(&self) -> i64 {
        self.inner.create_accumulator()
    }

    fn add(&self, acc: &mut i64, element: &T) {
        self.inner.add(acc, &(self.value_fn)(element));
    }

    fn merge(&self, acc: &mut i64, other: i64) {
        self.inner.merge(acc, other);
    }

    fn result(&self, acc: &i64) -> i64 {
        self.inner.result(acc)
    }
}
