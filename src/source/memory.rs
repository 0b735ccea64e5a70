use super::{LogSource, Percentage, Properties, QueryOptions, Rows, Section};
use crate::buffer::column::{
    INDEX, LINE_NUMBER, LOG_ENTRY_INDEX, LOG_LEVEL, ORIGINAL_INDEX, RAW_CONTENT, TIMESTAMP,
};
use crate::buffer::{Column, ColumnValues, LogBuffer, LogBufferArray, Value};
use crate::notify::{ListenerCollection, LogSourceListener};
use crate::parse::Level;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A source whose rows live in memory and change only when told to.
///
/// Every mutation is reported to listeners immediately. Used to feed
/// derived stages in tests and to hold generated entries.
pub struct InMemoryLogSource {
    rows: RwLock<LogBufferArray>,
    properties: RwLock<Properties>,
    listeners: ListenerCollection,
}

impl InMemoryLogSource {
    pub fn new() -> Self {
        Self::with_columns(&[&RAW_CONTENT, &TIMESTAMP, &LOG_LEVEL])
    }

    /// `INDEX`, `ORIGINAL_INDEX`, `LOG_ENTRY_INDEX` and `LINE_NUMBER` are
    /// always offered and computed from the row position.
    pub fn with_columns(columns: &[&'static Column]) -> Self {
        Self {
            rows: RwLock::new(LogBufferArray::new(columns, 0)),
            properties: RwLock::new(Properties {
                percentage_processed: Percentage::HUNDRED,
                ..Properties::default()
            }),
            listeners: ListenerCollection::new(),
        }
    }

    /// Append a row; cells not given keep their column default.
    pub fn add(&self, cells: &[(&Column, Value)]) -> usize {
        let mut rows = self.rows.write();
        let row = rows.push_default();
        for (column, value) in cells {
            rows.set_value(column, row, value.clone());
        }
        let count = rows.len();
        drop(rows);
        self.notify_count(count);
        row
    }

    pub fn add_line(&self, raw: &str, timestamp: Option<NaiveDateTime>, level: Level) -> usize {
        self.add(&[
            (&RAW_CONTENT, Value::Text(raw.to_string())),
            (&TIMESTAMP, Value::Timestamp(timestamp)),
            (&LOG_LEVEL, Value::Level(level)),
        ])
    }

    /// Replace the content of existing rows from `first` on, as if a file
    /// had been rewritten there.
    pub fn invalidate_from(&self, first: usize) {
        let count = self.rows.read().len();
        self.listeners.invalidate(first);
        self.notify_count(count);
    }

    pub fn set_value(&self, column: &Column, row: usize, value: Value) {
        self.rows.write().set_value(column, row, value);
        self.invalidate_from(row);
    }

    pub fn remove_from(&self, first: usize) {
        let mut rows = self.rows.write();
        rows.truncate(first);
        let count = rows.len();
        drop(rows);
        self.listeners.invalidate(first);
        self.notify_count(count);
    }

    pub fn clear(&self) {
        self.rows.write().clear();
        self.properties.write().log_entry_count = 0;
        self.listeners.reset();
    }

    pub fn set_percentage(&self, percentage: Percentage) {
        self.properties.write().percentage_processed = percentage;
    }

    fn notify_count(&self, count: usize) {
        self.properties.write().log_entry_count = count;
        self.listeners.on_read(count);
        self.listeners.flush();
    }
}

impl Default for InMemoryLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSource for InMemoryLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        let mut columns = vec![&INDEX, &ORIGINAL_INDEX, &LOG_ENTRY_INDEX, &LINE_NUMBER];
        for &column in self.rows.read().columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) {
        self.listeners.add_listener(listener, max_wait, max_count);
    }

    fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>) {
        self.listeners.remove_listener(listener);
    }

    fn properties(&self) -> Properties {
        self.properties.read().clone()
    }

    fn get_column(
        &self,
        rows: &Rows<'_>,
        column: &'static Column,
        dest: &mut ColumnValues,
        dest_index: usize,
        _options: QueryOptions,
    ) {
        let buffer = self.rows.read();
        let count = buffer.len();
        for (i, row) in rows.iter().enumerate() {
            let target = dest_index + i;
            if row >= count {
                dest.fill_default(column, Section::new(target, 1));
                continue;
            }
            let value = if *column == INDEX || *column == ORIGINAL_INDEX || *column == LOG_ENTRY_INDEX {
                Value::Index(Some(row))
            } else if *column == LINE_NUMBER {
                Value::Integer(row as i64 + 1)
            } else {
                buffer
                    .value(column, row)
                    .unwrap_or_else(|| column.default_value().clone())
            };
            dest.set(target, value);
        }
    }

    fn dispose(&self) {
        self.rows.write().clear();
        *self.properties.write() = Properties::default();
        self.listeners.clear();
    }
}
