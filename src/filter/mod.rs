//! Predicates over log entries and the stage that applies them.

pub mod filtered;
pub mod level_filter;
pub mod regex_filter;
pub mod string_filter;

pub use filtered::{FilterOptions, FilteredLogSource};
pub use level_filter::LevelFilter;
pub use regex_filter::RegexFilter;
pub use string_filter::SubstringFilter;

use crate::buffer::column::RAW_CONTENT;
use crate::buffer::{Column, LogEntry};
use std::sync::Arc;

/// Trait for extensible filtering.
///
/// Implementations must be deterministic: an entry whose content did not
/// change is never re-evaluated.
pub trait Filter: Send + Sync {
    fn matches(&self, entry: &LogEntry<'_>) -> bool;

    /// Columns `matches` looks at
    fn columns(&self) -> Vec<&'static Column> {
        vec![&RAW_CONTENT]
    }

    fn description(&self) -> String;
}

/// Matches when every inner filter does; an empty list matches everything.
pub struct AndFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl AndFilter {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }
}

impl Filter for AndFilter {
    fn matches(&self, entry: &LogEntry<'_>) -> bool {
        self.filters.iter().all(|f| f.matches(entry))
    }

    fn columns(&self) -> Vec<&'static Column> {
        let mut columns: Vec<&'static Column> = Vec::new();
        for column in self.filters.iter().flat_map(|f| f.columns()) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    fn description(&self) -> String {
        let parts: Vec<String> = self.filters.iter().map(|f| f.description()).collect();
        format!("({})", parts.join(" and "))
    }
}

pub struct NotFilter {
    inner: Arc<dyn Filter>,
}

impl NotFilter {
    pub fn new(inner: Arc<dyn Filter>) -> Self {
        Self { inner }
    }
}

impl Filter for NotFilter {
    fn matches(&self, entry: &LogEntry<'_>) -> bool {
        !self.inner.matches(entry)
    }

    fn columns(&self) -> Vec<&'static Column> {
        self.inner.columns()
    }

    fn description(&self) -> String {
        format!("not {}", self.inner.description())
    }
}
