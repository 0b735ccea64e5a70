use super::{LogEntryParser, ParsedLine};
use crate::buffer::column::{INDEX, LOG_LEVEL, RAW_CONTENT, TIMESTAMP};
use crate::buffer::{Column, ColumnValues, LogBuffer, LogBufferArray, Value};
use crate::notify::LogSourceListener;
use crate::source::{fill_column_by_entries, LogSource, Properties, QueryOptions, Rows, Section};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Panics logged before further ones are only counted
const MAX_LOGGED_PANICS: usize = 10;

/// Adds `TIMESTAMP` and `LOG_LEVEL` to a raw line source.
///
/// Parsing happens on read, so this stage has no state and no unit of its
/// own: row numbering, properties and notifications are the upstream's.
pub struct ParsingLogSource {
    upstream: RwLock<Option<Arc<dyn LogSource>>>,
    parser: Arc<dyn LogEntryParser>,
    panics: AtomicUsize,
}

impl ParsingLogSource {
    pub fn new(upstream: Arc<dyn LogSource>, parser: Arc<dyn LogEntryParser>) -> Self {
        Self {
            upstream: RwLock::new(Some(upstream)),
            parser,
            panics: AtomicUsize::new(0),
        }
    }

    fn upstream(&self) -> Option<Arc<dyn LogSource>> {
        self.upstream.read().clone()
    }

    fn parse(&self, raw: &str) -> ParsedLine {
        let parser = &self.parser;
        match catch_unwind(AssertUnwindSafe(|| parser.parse(raw))) {
            Ok(parsed) => parsed,
            Err(_) => {
                let panics = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
                if panics <= MAX_LOGGED_PANICS {
                    warn!(panics, "entry parser panicked, treating line as unparsed");
                }
                ParsedLine::default()
            }
        }
    }
}

impl LogSource for ParsingLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        let mut columns = self.upstream().map(|u| u.columns()).unwrap_or_default();
        for column in [&TIMESTAMP, &LOG_LEVEL] {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) {
        if let Some(upstream) = self.upstream() {
            upstream.add_listener(listener, max_wait, max_count);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>) {
        if let Some(upstream) = self.upstream() {
            upstream.remove_listener(listener);
        }
    }

    fn properties(&self) -> Properties {
        self.upstream().map(|u| u.properties()).unwrap_or_default()
    }

    fn get_column(
        &self,
        rows: &Rows<'_>,
        column: &'static Column,
        dest: &mut ColumnValues,
        dest_index: usize,
        options: QueryOptions,
    ) {
        fill_column_by_entries(self, rows, column, dest, dest_index, options);
    }

    fn get_entries(&self, rows: &Rows<'_>, dest: &mut dyn LogBuffer, dest_index: usize, options: QueryOptions) {
        let Some(upstream) = self.upstream() else {
            dest.fill_all_default(Section::new(dest_index, rows.len()));
            return;
        };
        let wants_timestamp = dest.contains(&TIMESTAMP);
        let wants_level = dest.contains(&LOG_LEVEL);
        if !wants_timestamp && !wants_level {
            upstream.get_entries(rows, dest, dest_index, options);
            return;
        }

        let mut columns: Vec<&'static Column> = dest
            .columns()
            .iter()
            .copied()
            .filter(|c| **c != TIMESTAMP && **c != LOG_LEVEL)
            .collect();
        columns.extend([&INDEX, &RAW_CONTENT]);
        let mut lines = LogBufferArray::new(&columns, rows.len());
        upstream.get_entries(rows, &mut lines, 0, options);
        lines.copy_to(dest, dest_index);

        for entry in lines.entries() {
            let parsed = match entry.index() {
                Some(_) => self.parse(entry.raw_content()),
                None => ParsedLine::default(),
            };
            let target = dest_index + entry.row();
            if wants_timestamp {
                dest.set_value(&TIMESTAMP, target, Value::Timestamp(parsed.timestamp));
            }
            if wants_level {
                dest.set_value(&LOG_LEVEL, target, Value::Level(parsed.level));
            }
        }
    }

    fn dispose(&self) {
        self.upstream.write().take();
    }

    fn count(&self) -> usize {
        self.upstream().map_or(0, |u| u.count())
    }
}
