//! Columnar log buffers.
//!
//! [`LogBuffer`] is the destination of every read in the pipeline. The
//! growable [`LogBufferArray`] owns its storage; the views in [`view`] adapt
//! another buffer (fewer columns, a row window, or a single column vector)
//! without copying.

pub mod array;
pub mod column;
pub mod entry;
pub mod view;

pub use array::LogBufferArray;
pub use column::{Column, ColumnValues, Value};
pub use entry::LogEntry;
pub use view::{ColumnSubsetView, SectionView, SingleColumnBuffer};

use crate::source::Section;

/// An ordered collection of rows sharing one column set
pub trait LogBuffer {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn columns(&self) -> &[&'static Column];

    fn contains(&self, column: &Column) -> bool {
        self.columns().iter().any(|c| *c == column)
    }

    /// Cell value, `None` if the buffer lacks the column or the row.
    fn value(&self, column: &Column, row: usize) -> Option<Value>;

    /// Borrow a text cell without cloning it.
    fn text(&self, column: &Column, row: usize) -> Option<&str>;

    /// Copy `rows` of `column` into `dest` starting at `dest_index`.
    fn read_into(&self, column: &Column, rows: Section, dest: &mut ColumnValues, dest_index: usize) -> bool;

    /// Copy `src_rows` of `src` into this buffer starting at row `dest_index`.
    fn write_from(&mut self, column: &Column, dest_index: usize, src: &ColumnValues, src_rows: Section) -> bool;

    fn set_value(&mut self, column: &Column, row: usize, value: Value) -> bool;

    fn fill_default(&mut self, column: &Column, rows: Section);

    /// Default every column of `rows`.
    fn fill_all_default(&mut self, rows: Section) {
        let columns = self.columns().to_vec();
        for column in columns {
            self.fill_default(column, rows);
        }
    }
}

/// Row accessor over any buffer.
pub fn entry(buffer: &dyn LogBuffer, row: usize) -> LogEntry<'_> {
    LogEntry::new(buffer, row)
}
