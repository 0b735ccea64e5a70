//! Column descriptors and typed column storage.
//!
//! A [`Column`] only names a column and carries its default; the cells live
//! in a [`ColumnValues`] vector of the matching type, so moving data between
//! stages never allocates per cell (text aside).

use crate::parse::Level;
use crate::source::Section;
use chrono::NaiveDateTime;
use std::fmt;

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A row index or id, `None` when unknown / not retrieved
    Index(Option<usize>),
    Integer(i64),
    Text(String),
    Timestamp(Option<NaiveDateTime>),
    Level(Level),
}

impl Value {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Index(index) => *index,
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(timestamp) => *timestamp,
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<Level> {
        match self {
            Value::Level(level) => Some(*level),
            _ => None,
        }
    }
}

/// Immutable descriptor of a named, typed column.
///
/// Columns compare by name; the well-known ones are statics in this module
/// and are passed around as `&'static Column`.
pub struct Column {
    name: &'static str,
    default: Value,
}

impl Column {
    pub const fn new(name: &'static str, default: Value) -> Self {
        Self { name, default }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Column {}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Column({})", self.name)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Index of the row within the source that produced it
pub static INDEX: Column = Column::new("index", Value::Index(None));
/// Index of the row in the bottom-most (file) source
pub static ORIGINAL_INDEX: Column = Column::new("original_index", Value::Index(None));
/// Index of the row in the immediate upstream source
pub static SOURCE_INDEX: Column = Column::new("source_index", Value::Index(None));
/// Index of the logical (possibly multi-line) entry a row belongs to
pub static LOG_ENTRY_INDEX: Column = Column::new("log_entry_index", Value::Index(None));
/// 1-based line number, 0 when unknown
pub static LINE_NUMBER: Column = Column::new("line_number", Value::Integer(0));
/// Number of physical lines a row spans
pub static LINE_COUNT: Column = Column::new("line_count", Value::Integer(0));
/// Byte offset of the line start in the file, -1 when unknown
pub static LINE_OFFSET_IN_BYTES: Column = Column::new("line_offset_in_bytes", Value::Integer(-1));
pub static RAW_CONTENT: Column = Column::new("raw_content", Value::Text(String::new()));
pub static TIMESTAMP: Column = Column::new("timestamp", Value::Timestamp(None));
pub static LOG_LEVEL: Column = Column::new("log_level", Value::Level(Level::None));
/// Which source of a merge a row came from
pub static SOURCE_ID: Column = Column::new("source_id", Value::Index(None));

/// All columns this crate knows about
pub fn well_known() -> [&'static Column; 11] {
    [
        &INDEX,
        &ORIGINAL_INDEX,
        &SOURCE_INDEX,
        &LOG_ENTRY_INDEX,
        &LINE_NUMBER,
        &LINE_COUNT,
        &LINE_OFFSET_IN_BYTES,
        &RAW_CONTENT,
        &TIMESTAMP,
        &LOG_LEVEL,
        &SOURCE_ID,
    ]
}

/// Typed cells of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Index(Vec<Option<usize>>),
    Integer(Vec<i64>),
    Text(Vec<String>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    Level(Vec<Level>),
}

impl ColumnValues {
    /// Storage for `len` cells of `column`, all set to its default.
    pub fn new(column: &Column, len: usize) -> Self {
        match column.default_value() {
            Value::Index(default) => ColumnValues::Index(vec![*default; len]),
            Value::Integer(default) => ColumnValues::Integer(vec![*default; len]),
            Value::Text(default) => ColumnValues::Text(vec![default.clone(); len]),
            Value::Timestamp(default) => ColumnValues::Timestamp(vec![*default; len]),
            Value::Level(default) => ColumnValues::Level(vec![*default; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Index(values) => values.len(),
            ColumnValues::Integer(values) => values.len(),
            ColumnValues::Text(values) => values.len(),
            ColumnValues::Timestamp(values) => values.len(),
            ColumnValues::Level(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow (with defaults) or shrink to `len` cells.
    pub fn resize(&mut self, column: &Column, len: usize) {
        let current = self.len();
        if len <= current {
            self.truncate(len);
            return;
        }
        let tail = ColumnValues::new(column, len - current);
        self.append(tail);
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            ColumnValues::Index(values) => values.truncate(len),
            ColumnValues::Integer(values) => values.truncate(len),
            ColumnValues::Text(values) => values.truncate(len),
            ColumnValues::Timestamp(values) => values.truncate(len),
            ColumnValues::Level(values) => values.truncate(len),
        }
    }

    fn append(&mut self, other: ColumnValues) {
        match (self, other) {
            (ColumnValues::Index(a), ColumnValues::Index(b)) => a.extend(b),
            (ColumnValues::Integer(a), ColumnValues::Integer(b)) => a.extend(b),
            (ColumnValues::Text(a), ColumnValues::Text(b)) => a.extend(b),
            (ColumnValues::Timestamp(a), ColumnValues::Timestamp(b)) => a.extend(b),
            (ColumnValues::Level(a), ColumnValues::Level(b)) => a.extend(b),
            _ => {}
        }
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            ColumnValues::Index(values) => values.get(index).map(|v| Value::Index(*v)),
            ColumnValues::Integer(values) => values.get(index).map(|v| Value::Integer(*v)),
            ColumnValues::Text(values) => values.get(index).map(|v| Value::Text(v.clone())),
            ColumnValues::Timestamp(values) => values.get(index).map(|v| Value::Timestamp(*v)),
            ColumnValues::Level(values) => values.get(index).map(|v| Value::Level(*v)),
        }
    }

    /// Store `value` at `index`; false if out of range or of another type.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match (self, value) {
            (ColumnValues::Index(values), Value::Index(v)) => set_cell(values, index, v),
            (ColumnValues::Integer(values), Value::Integer(v)) => set_cell(values, index, v),
            (ColumnValues::Text(values), Value::Text(v)) => set_cell(values, index, v),
            (ColumnValues::Timestamp(values), Value::Timestamp(v)) => set_cell(values, index, v),
            (ColumnValues::Level(values), Value::Level(v)) => set_cell(values, index, v),
            _ => false,
        }
    }

    /// Reset the cells of `section` to the column default.
    pub fn fill_default(&mut self, column: &Column, section: Section) {
        let end = section.end().min(self.len());
        let start = section.index.min(end);
        match (self, column.default_value()) {
            (ColumnValues::Index(values), Value::Index(d)) => values[start..end].fill(*d),
            (ColumnValues::Integer(values), Value::Integer(d)) => values[start..end].fill(*d),
            (ColumnValues::Text(values), Value::Text(d)) => values[start..end].fill(d.clone()),
            (ColumnValues::Timestamp(values), Value::Timestamp(d)) => {
                values[start..end].fill(*d)
            }
            (ColumnValues::Level(values), Value::Level(d)) => values[start..end].fill(*d),
            _ => {}
        }
    }

    /// Copy `src_section` of `src` to `dest_index..` of self.
    ///
    /// Cells that would land past the end are dropped; returns false when
    /// the two columns hold different types.
    pub fn copy_from(&mut self, dest_index: usize, src: &ColumnValues, src_section: Section) -> bool {
        match (self, src) {
            (ColumnValues::Index(d), ColumnValues::Index(s)) => copy_cells(d, dest_index, s, src_section),
            (ColumnValues::Integer(d), ColumnValues::Integer(s)) => copy_cells(d, dest_index, s, src_section),
            (ColumnValues::Text(d), ColumnValues::Text(s)) => copy_cells(d, dest_index, s, src_section),
            (ColumnValues::Timestamp(d), ColumnValues::Timestamp(s)) => {
                copy_cells(d, dest_index, s, src_section)
            }
            (ColumnValues::Level(d), ColumnValues::Level(s)) => copy_cells(d, dest_index, s, src_section),
            _ => false,
        }
    }

    pub fn as_index(&self) -> Option<&[Option<usize>]> {
        match self {
            ColumnValues::Index(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_index_mut(&mut self) -> Option<&mut Vec<Option<usize>>> {
        match self {
            ColumnValues::Index(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&[i64]> {
        match self {
            ColumnValues::Integer(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_integer_mut(&mut self) -> Option<&mut Vec<i64>> {
        match self {
            ColumnValues::Integer(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            ColumnValues::Text(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            ColumnValues::Text(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&[Option<NaiveDateTime>]> {
        match self {
            ColumnValues::Timestamp(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_timestamp_mut(&mut self) -> Option<&mut Vec<Option<NaiveDateTime>>> {
        match self {
            ColumnValues::Timestamp(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<&[Level]> {
        match self {
            ColumnValues::Level(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_level_mut(&mut self) -> Option<&mut Vec<Level>> {
        match self {
            ColumnValues::Level(values) => Some(values),
            _ => None,
        }
    }
}

fn set_cell<T>(values: &mut [T], index: usize, value: T) -> bool {
    match values.get_mut(index) {
        Some(cell) => {
            *cell = value;
            true
        }
        None => false,
    }
}

fn copy_cells<T: Clone>(dest: &mut [T], dest_index: usize, src: &[T], src_section: Section) -> bool {
    let src_end = src_section.end().min(src.len());
    let src_start = src_section.index.min(src_end);
    let available = dest.len().saturating_sub(dest_index);
    let count = (src_end - src_start).min(available);
    if count > 0 {
        dest[dest_index..dest_index + count].clone_from_slice(&src[src_start..src_start + count]);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_storage_uses_column_default() {
        let offsets = ColumnValues::new(&LINE_OFFSET_IN_BYTES, 3);
        assert_eq!(offsets, ColumnValues::Integer(vec![-1, -1, -1]));

        let content = ColumnValues::new(&RAW_CONTENT, 2);
        assert_eq!(content.as_text().unwrap(), &[String::new(), String::new()]);
    }

    #[test]
    fn test_columns_compare_by_name() {
        let custom = Column::new("raw_content", Value::Text(String::new()));
        assert_eq!(custom, RAW_CONTENT);
        assert_ne!(INDEX, ORIGINAL_INDEX);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut values = ColumnValues::new(&INDEX, 2);
        assert!(!values.set(0, Value::Text("x".into())));
        assert!(values.set(1, Value::Index(Some(7))));
        assert!(!values.set(5, Value::Index(Some(1))));
        assert_eq!(values.get(1), Some(Value::Index(Some(7))));
    }

    #[test]
    fn test_fill_default_only_touches_section() {
        let mut values = ColumnValues::Integer(vec![1, 2, 3, 4]);
        values.fill_default(&LINE_NUMBER, Section::new(1, 2));
        assert_eq!(values, ColumnValues::Integer(vec![1, 0, 0, 4]));
    }

    #[test]
    fn test_fill_default_clamps_to_length() {
        let mut values = ColumnValues::Integer(vec![1, 2]);
        values.fill_default(&LINE_NUMBER, Section::new(1, 10));
        assert_eq!(values, ColumnValues::Integer(vec![1, 0]));
    }

    #[test]
    fn test_copy_from_drops_overflow() {
        let src = ColumnValues::Text(vec!["a".into(), "b".into(), "c".into()]);
        let mut dest = ColumnValues::new(&RAW_CONTENT, 3);
        assert!(dest.copy_from(1, &src, Section::new(0, 3)));
        assert_eq!(dest.as_text().unwrap(), &["", "a", "b"]);
    }

    #[test]
    fn test_copy_from_mismatched_types() {
        let src = ColumnValues::Integer(vec![1]);
        let mut dest = ColumnValues::new(&RAW_CONTENT, 1);
        assert!(!dest.copy_from(0, &src, Section::new(0, 1)));
    }

    #[test]
    fn test_resize_grows_with_defaults() {
        let mut values = ColumnValues::Level(vec![Level::Error]);
        values.resize(&LOG_LEVEL, 3);
        assert_eq!(values.as_level().unwrap(), &[Level::Error, Level::None, Level::None]);
        values.resize(&LOG_LEVEL, 1);
        assert_eq!(values.len(), 1);
    }
}
