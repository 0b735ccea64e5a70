use super::column::{
    Column, Value, INDEX, LINE_COUNT, LINE_NUMBER, LOG_ENTRY_INDEX, LOG_LEVEL, ORIGINAL_INDEX,
    RAW_CONTENT, SOURCE_ID, SOURCE_INDEX, TIMESTAMP,
};
use super::LogBuffer;
use crate::parse::Level;
use chrono::NaiveDateTime;

/// One row of a buffer.
///
/// `try_get` tells "not retrieved" (the buffer lacks the column) apart from
/// a retrieved value; `get` and the typed helpers fall back to defaults.
#[derive(Clone, Copy)]
pub struct LogEntry<'a> {
    buffer: &'a dyn LogBuffer,
    row: usize,
}

impl<'a> LogEntry<'a> {
    pub fn new(buffer: &'a dyn LogBuffer, row: usize) -> Self {
        Self { buffer, row }
    }

    /// Row position within the buffer
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn contains(&self, column: &Column) -> bool {
        self.buffer.contains(column)
    }

    pub fn try_get(&self, column: &Column) -> Option<Value> {
        self.buffer.value(column, self.row)
    }

    pub fn get(&self, column: &Column) -> Value {
        self.try_get(column)
            .unwrap_or_else(|| column.default_value().clone())
    }

    pub fn raw_content(&self) -> &'a str {
        self.buffer.text(&RAW_CONTENT, self.row).unwrap_or("")
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.get(&TIMESTAMP).as_timestamp()
    }

    pub fn level(&self) -> Level {
        self.get(&LOG_LEVEL).as_level().unwrap_or_default()
    }

    pub fn index(&self) -> Option<usize> {
        self.get(&INDEX).as_index()
    }

    pub fn original_index(&self) -> Option<usize> {
        self.get(&ORIGINAL_INDEX).as_index()
    }

    pub fn source_index(&self) -> Option<usize> {
        self.get(&SOURCE_INDEX).as_index()
    }

    pub fn source_id(&self) -> Option<usize> {
        self.get(&SOURCE_ID).as_index()
    }

    pub fn log_entry_index(&self) -> Option<usize> {
        self.get(&LOG_ENTRY_INDEX).as_index()
    }

    pub fn line_number(&self) -> i64 {
        self.get(&LINE_NUMBER).as_integer().unwrap_or(0)
    }

    pub fn line_count(&self) -> i64 {
        self.get(&LINE_COUNT).as_integer().unwrap_or(0)
    }
}

impl std::fmt::Debug for LogEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for column in self.buffer.columns() {
            map.entry(&column.name(), &self.get(column));
        }
        map.finish()
    }
}
