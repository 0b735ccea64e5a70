//! Groups physical lines into logical entries.
//!
//! A line without its own timestamp continues the entry above it, which is
//! how stack traces and wrapped messages end up as one row.

use crate::buffer::column::{
    INDEX, LINE_COUNT, LINE_NUMBER, LOG_ENTRY_INDEX, LOG_LEVEL, ORIGINAL_INDEX, RAW_CONTENT,
    SOURCE_INDEX, TIMESTAMP,
};
use crate::buffer::{Column, ColumnValues, LogBuffer, LogBufferArray, Value};
use crate::notify::{ListenerCollection, LogSourceListener, Modification, QueueListener};
use crate::parse::Level;
use crate::scheduler::{TaskHandle, TaskScheduler, UnitWaker};
use crate::source::{
    fill_column_by_entries, LogSource, Percentage, Properties, QueryOptions, Rows, Section,
    SharedProperties,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upstream lines classified per run
const BATCH_SIZE: usize = 1000;
/// Delay before retrying lines the upstream could not deliver yet
const RETRY_DELAY: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_WAIT: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_COUNT: usize = 10_000;

/// Columns answered from the entry index alone
static INDEX_COLUMNS: [&Column; 6] = [
    &INDEX,
    &LOG_ENTRY_INDEX,
    &ORIGINAL_INDEX,
    &SOURCE_INDEX,
    &LINE_COUNT,
    &LINE_NUMBER,
];

#[derive(Debug, Clone)]
pub struct MultiLineOptions {
    /// A line carrying a level also starts a new entry
    pub level_starts_entry: bool,
    pub idle_interval: Duration,
}

impl Default for MultiLineOptions {
    fn default() -> Self {
        Self {
            level_starts_entry: false,
            idle_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogicalEntry {
    first_line: usize,
    line_count: usize,
}

impl LogicalEntry {
    fn lines(&self) -> std::ops::Range<usize> {
        self.first_line..self.first_line + self.line_count
    }
}

#[derive(Debug, Default)]
struct EntryIndex {
    entries: Vec<LogicalEntry>,
    /// Logical entry of every processed physical line
    line_entries: Vec<usize>,
}

impl EntryIndex {
    fn clear(&mut self) {
        self.entries.clear();
        self.line_entries.clear();
    }

    /// Forget physical lines from `first_line` on. Returns the first entry
    /// whose content changed, if any.
    fn truncate_lines(&mut self, first_line: usize) -> Option<usize> {
        let &entry = self.line_entries.get(first_line)?;
        self.line_entries.truncate(first_line);
        let logical = &mut self.entries[entry];
        if logical.first_line == first_line {
            self.entries.truncate(entry);
        } else {
            logical.line_count = first_line - logical.first_line;
            self.entries.truncate(entry + 1);
        }
        Some(entry)
    }

    fn push_line(&mut self, line: usize, starts_entry: bool) -> Option<usize> {
        match self.entries.last_mut() {
            Some(last) if !starts_entry => {
                last.line_count += 1;
                self.line_entries.push(self.entries.len() - 1);
                Some(self.entries.len() - 1)
            }
            _ => {
                self.entries.push(LogicalEntry {
                    first_line: line,
                    line_count: 1,
                });
                self.line_entries.push(self.entries.len() - 1);
                None
            }
        }
    }
}

struct Shared {
    upstream: Arc<dyn LogSource>,
    index: RwLock<EntryIndex>,
    properties: SharedProperties,
    listeners: ListenerCollection,
}

/// Private state of the aggregation unit
struct AggregateUnit {
    shared: Arc<Shared>,
    modifications: Receiver<(usize, Modification)>,
    /// Upstream rows announced so far
    known: usize,
    /// Upstream rows classified so far
    processed: usize,
    options: MultiLineOptions,
    properties: Properties,
}

impl AggregateUnit {
    fn run(&mut self) -> Duration {
        while let Ok((_, modification)) = self.modifications.try_recv() {
            self.apply(modification);
        }

        let mut stalled = false;
        let mut extended: Option<usize> = None;
        if self.processed < self.known {
            let count = (self.known - self.processed).min(BATCH_SIZE);
            let mut lines = LogBufferArray::new(&[&INDEX, &TIMESTAMP, &LOG_LEVEL], count);
            self.shared.upstream.get_entries(
                &Section::new(self.processed, count).into(),
                &mut lines,
                0,
                QueryOptions::BACKGROUND,
            );

            let mut index = self.shared.index.write();
            let reported_entries = index.entries.len();
            for entry in lines.entries() {
                if entry.index().is_none() {
                    stalled = true;
                    break;
                }
                let starts_entry = entry.timestamp().is_some()
                    || (self.options.level_starts_entry && entry.level() != Level::None);
                if let Some(continued) = index.push_line(self.processed, starts_entry) {
                    if continued < reported_entries {
                        extended = Some(extended.map_or(continued, |e| e.min(continued)));
                    }
                }
                self.processed += 1;
            }
        }

        if let Some(entry) = extended {
            self.shared.listeners.invalidate(entry);
        }
        let count = self.shared.index.read().entries.len();
        self.publish(count);
        self.shared.listeners.on_read(count);

        if stalled {
            RETRY_DELAY
        } else if self.processed < self.known {
            Duration::ZERO
        } else {
            self.options.idle_interval
        }
    }

    fn apply(&mut self, modification: Modification) {
        match modification {
            Modification::Reset => {
                self.shared.index.write().clear();
                self.known = 0;
                self.processed = 0;
                self.shared.listeners.reset();
            }
            Modification::Invalidate(section) => {
                self.known = section.index;
                if self.processed > section.index {
                    self.processed = section.index;
                    let changed = self.shared.index.write().truncate_lines(section.index);
                    if let Some(entry) = changed {
                        self.shared.listeners.invalidate(entry);
                    }
                }
            }
            Modification::Append(section) => {
                self.known = section.end();
            }
        }
    }

    fn publish(&mut self, count: usize) {
        let upstream = self.shared.upstream.properties();
        let own = Percentage::of(self.processed as u64, self.known as u64);
        self.properties = Properties {
            log_entry_count: count,
            percentage_processed: own.times(upstream.percentage_processed),
            ..upstream
        };
        self.shared.properties.publish(&self.properties);
    }
}

/// Log source whose rows are logical entries of an upstream line source.
///
/// Each entry starts at a line that carries a timestamp (or, optionally, a
/// level) and takes every following line that does not. When a continuation
/// line attaches to an entry listeners already know, that entry is
/// invalidated and announced again.
pub struct MultiLineLogSource {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    task: TaskHandle,
    upstream_listener: Arc<dyn LogSourceListener>,
    disposed: AtomicBool,
}

impl MultiLineLogSource {
    pub fn new(scheduler: &Arc<TaskScheduler>, upstream: Arc<dyn LogSource>, options: MultiLineOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        let listener = QueueListener::new(0, sender);
        let shared = Arc::new(Shared {
            upstream: Arc::clone(&upstream),
            index: RwLock::new(EntryIndex::default()),
            properties: SharedProperties::default(),
            listeners: ListenerCollection::new(),
        });

        let mut unit = AggregateUnit {
            shared: Arc::clone(&shared),
            modifications: receiver,
            known: 0,
            processed: 0,
            options,
            properties: Properties::default(),
        };
        // Registered first so the unit's first run already sees the upstream.
        let upstream_listener: Arc<dyn LogSourceListener> = listener.clone();
        upstream.add_listener(Arc::clone(&upstream_listener), UPSTREAM_MAX_WAIT, UPSTREAM_MAX_COUNT);
        let task = scheduler.start_periodic("multiline", move || unit.run());
        listener.wake_on_modification(UnitWaker::new(scheduler, &task));

        Self {
            shared,
            scheduler: Arc::clone(scheduler),
            task,
            upstream_listener,
            disposed: AtomicBool::new(false),
        }
    }

    /// Logical entry each physical line belongs to, `None` for lines not
    /// processed yet.
    pub fn entry_index_of_lines(&self, lines: &[usize]) -> Vec<Option<usize>> {
        let index = self.shared.index.read();
        lines
            .iter()
            .map(|&line| index.line_entries.get(line).copied())
            .collect()
    }

    /// Physical lines making up entry `row`
    pub fn lines_of(&self, row: usize) -> Option<std::ops::Range<usize>> {
        self.shared.index.read().entries.get(row).map(LogicalEntry::lines)
    }

    fn fill_from_first_lines(
        &self,
        entries: &[Option<LogicalEntry>],
        columns: &[&'static Column],
        dest: &mut dyn LogBuffer,
        dest_index: usize,
        retrieved: &mut [bool],
        options: QueryOptions,
    ) {
        let present: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].is_some()).collect();
        let first_lines: Vec<usize> = present
            .iter()
            .filter_map(|&i| entries[i].map(|e| e.first_line))
            .collect();

        let mut fetch = vec![&INDEX];
        fetch.extend_from_slice(columns);
        let mut lines = LogBufferArray::new(&fetch, first_lines.len());
        self.shared
            .upstream
            .get_entries(&Rows::Indices(&first_lines), &mut lines, 0, options);

        for (k, &i) in present.iter().enumerate() {
            if lines.entry(k).index().is_none() {
                retrieved[i] = false;
            }
            for &column in columns {
                if let Some(values) = lines.column(column) {
                    dest.write_from(column, dest_index + i, values, Section::new(k, 1));
                }
            }
        }
    }

    fn fill_raw_content(
        &self,
        entries: &[Option<LogicalEntry>],
        dest: &mut dyn LogBuffer,
        dest_index: usize,
        retrieved: &mut [bool],
        options: QueryOptions,
    ) {
        let all_lines: Vec<usize> = entries.iter().flatten().flat_map(LogicalEntry::lines).collect();
        let mut lines = LogBufferArray::new(&[&INDEX, &RAW_CONTENT], all_lines.len());
        self.shared
            .upstream
            .get_entries(&Rows::Indices(&all_lines), &mut lines, 0, options);

        let mut next = 0;
        for (i, entry) in entries.iter().enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            let range = next..next + entry.line_count;
            next = range.end;
            if range.clone().any(|k| lines.entry(k).index().is_none()) {
                retrieved[i] = false;
                continue;
            }
            let content = range
                .map(|k| lines.entry(k).raw_content())
                .collect::<Vec<_>>()
                .join("\n");
            dest.set_value(&RAW_CONTENT, dest_index + i, Value::Text(content));
        }
    }
}

impl LogSource for MultiLineLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        let mut columns: Vec<&'static Column> = INDEX_COLUMNS.to_vec();
        for column in self.shared.upstream.columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) {
        self.shared.listeners.add_listener(listener, max_wait, max_count);
    }

    fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>) {
        self.shared.listeners.remove_listener(listener);
    }

    fn properties(&self) -> Properties {
        self.shared.properties.snapshot()
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
        let entries: Vec<Option<LogicalEntry>> = {
            let index = self.shared.index.read();
            rows.iter().map(|row| index.entries.get(row).copied()).collect()
        };
        dest.fill_all_default(Section::new(dest_index, entries.len()));
        let mut retrieved: Vec<bool> = entries.iter().map(Option::is_some).collect();

        let upstream_columns = self.shared.upstream.columns();
        let first_line_columns: Vec<&'static Column> = dest
            .columns()
            .iter()
            .copied()
            .filter(|c| !INDEX_COLUMNS.contains(c) && *c != &RAW_CONTENT && upstream_columns.contains(c))
            .collect();
        if !first_line_columns.is_empty() {
            self.fill_from_first_lines(&entries, &first_line_columns, dest, dest_index, &mut retrieved, options);
        }
        if dest.contains(&RAW_CONTENT) {
            self.fill_raw_content(&entries, dest, dest_index, &mut retrieved, options);
        }

        let columns = dest.columns().to_vec();
        for (i, (row, entry)) in rows.iter().zip(&entries).enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            let target = dest_index + i;
            for &column in &columns {
                let value = if *column == INDEX {
                    Value::Index(retrieved[i].then_some(row))
                } else if *column == LOG_ENTRY_INDEX {
                    Value::Index(Some(row))
                } else if *column == ORIGINAL_INDEX || *column == SOURCE_INDEX {
                    Value::Index(Some(entry.first_line))
                } else if *column == LINE_COUNT {
                    Value::Integer(entry.line_count as i64)
                } else if *column == LINE_NUMBER {
                    Value::Integer(entry.first_line as i64 + 1)
                } else {
                    continue;
                };
                dest.set_value(column, target, value);
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.upstream.remove_listener(&self.upstream_listener);
        self.scheduler.stop_periodic(&self.task);
        self.shared.index.write().clear();
        self.shared.properties.clear();
        self.shared.listeners.clear();
        debug!("disposed multi-line source");
    }
}

impl Drop for MultiLineLogSource {
    fn drop(&mut self) {
        self.dispose();
    }
}
