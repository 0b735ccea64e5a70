//! The contract every pipeline stage implements.

pub mod error;
pub mod memory;
pub mod properties;

pub use error::{EmptyReason, SourceError};
pub use memory::InMemoryLogSource;
pub use properties::{Percentage, Properties, SharedProperties};

use crate::buffer::{Column, ColumnValues, LogBuffer, SingleColumnBuffer};
use crate::notify::LogSourceListener;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// A contiguous, half-open range of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Section {
    pub index: usize,
    pub count: usize,
}

impl Section {
    pub const fn new(index: usize, count: usize) -> Self {
        Self { index, count }
    }

    /// One past the last row
    pub const fn end(&self) -> usize {
        self.index + self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.index && row < self.end()
    }

    pub fn rows(&self) -> Range<usize> {
        self.index..self.end()
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}..#{}", self.index, self.end())
    }
}

/// Rows to read: a section or an explicit, possibly scattered index list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rows<'a> {
    Section(Section),
    Indices(&'a [usize]),
}

impl<'a> Rows<'a> {
    pub fn len(&self) -> usize {
        match self {
            Rows::Section(section) => section.count,
            Rows::Indices(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source row for position `i` of the request
    pub fn get(&self, i: usize) -> Option<usize> {
        match self {
            Rows::Section(section) => (i < section.count).then(|| section.index + i),
            Rows::Indices(indices) => indices.get(i).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + 'a {
        let rows = *self;
        (0..rows.len()).filter_map(move |i| rows.get(i))
    }
}

impl From<Section> for Rows<'_> {
    fn from(section: Section) -> Self {
        Rows::Section(section)
    }
}

impl<'a> From<&'a [usize]> for Rows<'a> {
    fn from(indices: &'a [usize]) -> Self {
        Rows::Indices(indices)
    }
}

impl<'a> From<&'a Vec<usize>> for Rows<'a> {
    fn from(indices: &'a Vec<usize>) -> Self {
        Rows::Indices(indices)
    }
}

/// Where a read may get its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Only what is already cached; never touches the disk
    FromCache,
    /// Like `FromCache`, but schedules the misses to be read in the background
    FetchForLater,
    /// Block up to `max_wait` for missing data
    AllowRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub mode: QueryMode,
    pub max_wait: Duration,
}

impl QueryOptions {
    /// Used by stages pulling from their upstream on a scheduler worker.
    ///
    /// Never blocks: misses come back with an empty INDEX and are read in
    /// the background, so the stage retries them on a later run.
    pub const BACKGROUND: QueryOptions = QueryOptions::fetch_for_later();

    /// Wait used when nothing else is asked for
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

    pub const fn allow_read(max_wait: Duration) -> Self {
        Self {
            mode: QueryMode::AllowRead,
            max_wait,
        }
    }

    pub const fn from_cache() -> Self {
        Self {
            mode: QueryMode::FromCache,
            max_wait: Duration::ZERO,
        }
    }

    pub const fn fetch_for_later() -> Self {
        Self {
            mode: QueryMode::FetchForLater,
            max_wait: Duration::ZERO,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::allow_read(Self::DEFAULT_MAX_WAIT)
    }
}

/// A randomly addressable, incrementally growing sequence of log entries.
///
/// Reads never fail: whatever cannot be delivered is filled with the column
/// default. Changes are pushed to listeners as [`crate::notify::Modification`]s.
pub trait LogSource: Send + Sync {
    /// Columns this source can fill
    fn columns(&self) -> Vec<&'static Column>;

    /// Register `listener`; it immediately receives a Reset followed by an
    /// Append covering the rows that already exist.
    fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize);

    fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>);

    /// Snapshot of all properties, published atomically
    fn properties(&self) -> Properties;

    /// Fill `dest[dest_index..dest_index + rows.len()]` with `column` of `rows`.
    ///
    /// Rows out of range, rows that could not be read within the wait, and
    /// unknown columns come back as the column default. When content could
    /// not be delivered for a row, its INDEX comes back empty as well, so a
    /// caller asking for INDEX alongside content can tell the two apart.
    fn get_column(
        &self,
        rows: &Rows<'_>,
        column: &'static Column,
        dest: &mut ColumnValues,
        dest_index: usize,
        options: QueryOptions,
    );

    /// Fill every column `dest` declares, row by row like [`LogSource::get_column`].
    fn get_entries(&self, rows: &Rows<'_>, dest: &mut dyn LogBuffer, dest_index: usize, options: QueryOptions) {
        fill_entries_by_column(self, rows, dest, dest_index, options);
    }

    /// Stop background work and drop all state; the source reads as empty
    /// afterwards.
    fn dispose(&self);

    fn count(&self) -> usize {
        self.properties().log_entry_count
    }

    fn has_column(&self, column: &Column) -> bool {
        self.columns().iter().any(|c| *c == column)
    }
}

/// `get_entries` in terms of `get_column`, one column at a time.
pub fn fill_entries_by_column<S: LogSource + ?Sized>(
    source: &S,
    rows: &Rows<'_>,
    dest: &mut dyn LogBuffer,
    dest_index: usize,
    options: QueryOptions,
) {
    let offered = source.columns();
    let columns = dest.columns().to_vec();
    let section = Section::new(dest_index, rows.len());
    for column in columns {
        if !offered.contains(&column) {
            dest.fill_default(column, section);
            continue;
        }
        let mut values = ColumnValues::new(column, rows.len());
        source.get_column(rows, column, &mut values, 0, options);
        dest.write_from(column, dest_index, &values, Section::new(0, rows.len()));
    }
}

/// `get_column` in terms of `get_entries`, for stages that read whole rows.
pub fn fill_column_by_entries<S: LogSource + ?Sized>(
    source: &S,
    rows: &Rows<'_>,
    column: &'static Column,
    dest: &mut ColumnValues,
    dest_index: usize,
    options: QueryOptions,
) {
    let mut buffer = SingleColumnBuffer::new(column, dest);
    source.get_entries(rows, &mut buffer, dest_index, options);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_bounds() {
        let section = Section::new(3, 2);
        assert_eq!(section.end(), 5);
        assert!(section.contains(4));
        assert!(!section.contains(5));
        assert_eq!(section.rows().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_rows_from_section_and_indices() {
        let section: Rows<'_> = Section::new(10, 3).into();
        assert_eq!(section.iter().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(section.get(3), None);

        let list = vec![7, 2, 9];
        let indices: Rows<'_> = (&list).into();
        assert_eq!(indices.len(), 3);
        assert_eq!(indices.get(1), Some(2));
        assert_eq!(indices.iter().collect::<Vec<_>>(), list);
    }
}
