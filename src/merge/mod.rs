//! Time-ordered merging of several sources into one.

pub mod index;

pub use index::{MergeIndex, MergedEntry};

use crate::buffer::column::{INDEX, LINE_NUMBER, LOG_ENTRY_INDEX, SOURCE_ID, SOURCE_INDEX, TIMESTAMP};
use crate::buffer::{Column, ColumnValues, LogBuffer, LogBufferArray, Value};
use crate::notify::{ListenerCollection, LogSourceListener, Modification, QueueListener};
use crate::scheduler::{TaskHandle, TaskScheduler, UnitWaker};
use crate::source::{
    fill_column_by_entries, LogSource, Percentage, Properties, QueryOptions, Rows, Section,
    SharedProperties,
};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upstream rows merged per source and run
const BATCH_SIZE: usize = 1000;
const RETRY_DELAY: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_WAIT: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_COUNT: usize = 10_000;

static OWN_COLUMNS: [&Column; 6] = [&INDEX, &LINE_NUMBER, &LOG_ENTRY_INDEX, &SOURCE_ID, &SOURCE_INDEX, &TIMESTAMP];

/// What happens to rows that carry no timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UntimestampedPolicy {
    /// Left out and counted in `excluded_entries`
    #[default]
    Exclude,
    /// Placed after the newest row merged so far
    AppendAtTail,
}

impl UntimestampedPolicy {
    pub const NAMES: [&'static str; 2] = ["exclude", "append-at-tail"];
}

impl FromStr for UntimestampedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclude" => Ok(Self::Exclude),
            "append-at-tail" => Ok(Self::AppendAtTail),
            other => Err(format!("unknown untimestamped policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub untimestamped: UntimestampedPolicy,
    pub idle_interval: Duration,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            untimestamped: UntimestampedPolicy::default(),
            idle_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default)]
struct SourceProgress {
    known: usize,
    processed: usize,
    /// Source rows left out, ascending
    excluded: Vec<usize>,
}

impl SourceProgress {
    fn rewind(&mut self, to: usize) {
        self.processed = self.processed.min(to);
        let keep = self.excluded.partition_point(|&row| row < to);
        self.excluded.truncate(keep);
    }
}

struct Shared {
    sources: Vec<Arc<dyn LogSource>>,
    index: RwLock<MergeIndex>,
    properties: SharedProperties,
    listeners: ListenerCollection,
}

struct MergeUnit {
    shared: Arc<Shared>,
    modifications: Receiver<(usize, Modification)>,
    progress: Vec<SourceProgress>,
    options: MergeOptions,
    /// Newest timestamp merged so far
    latest: Option<NaiveDateTime>,
    properties: Properties,
}

impl MergeUnit {
    fn run(&mut self) -> Duration {
        let mut first_changed: Option<usize> = None;
        while let Ok((source, modification)) = self.modifications.try_recv() {
            if let Some(row) = self.apply(source, modification) {
                first_changed = Some(first_changed.map_or(row, |r| r.min(row)));
            }
        }

        let mut stalled = false;
        let mut new_entries = Vec::new();
        for source in 0..self.shared.sources.len() {
            stalled |= self.pull(source, &mut new_entries);
        }
        if !new_entries.is_empty() {
            if let Some(row) = self.shared.index.write().insert(new_entries) {
                first_changed = Some(first_changed.map_or(row, |r| r.min(row)));
            }
        }

        if let Some(row) = first_changed {
            self.shared.listeners.invalidate(row);
        }
        let count = self.shared.index.read().len();
        self.publish(count);
        self.shared.listeners.on_read(count);

        let pending = self.progress.iter().any(|p| p.processed < p.known);
        if stalled {
            RETRY_DELAY
        } else if pending {
            Duration::ZERO
        } else {
            self.options.idle_interval
        }
    }

    /// Returns the first merged row affected.
    fn apply(&mut self, source: usize, modification: Modification) -> Option<usize> {
        let progress = &mut self.progress[source];
        let first_removed = match modification {
            Modification::Reset => {
                *progress = SourceProgress::default();
                self.shared.index.write().remove_from(source, 0)
            }
            Modification::Invalidate(section) => {
                progress.known = section.index;
                if progress.processed <= section.index {
                    return None;
                }
                progress.rewind(section.index);
                self.shared.index.write().remove_from(source, section.index)
            }
            Modification::Append(section) => {
                progress.known = section.end();
                return None;
            }
        };
        if first_removed.is_some() {
            self.latest = self.latest.min(self.shared.index.read().last_sort_timestamp());
        }
        first_removed
    }

    /// Read the next batch of `source`. Returns true when a row could not
    /// be delivered yet.
    fn pull(&mut self, source: usize, new_entries: &mut Vec<MergedEntry>) -> bool {
        let progress = &mut self.progress[source];
        if progress.processed >= progress.known {
            return false;
        }
        let count = (progress.known - progress.processed).min(BATCH_SIZE);
        let mut rows = LogBufferArray::new(&[&INDEX, &TIMESTAMP], count);
        self.shared.sources[source].get_entries(
            &Section::new(progress.processed, count).into(),
            &mut rows,
            0,
            QueryOptions::BACKGROUND,
        );

        for entry in rows.entries() {
            if entry.index().is_none() {
                return true;
            }
            let source_index = progress.processed;
            progress.processed += 1;

            let timestamp = entry.timestamp();
            let sort_timestamp = match (timestamp, self.options.untimestamped) {
                (Some(timestamp), _) => {
                    self.latest = self.latest.max(Some(timestamp));
                    Some(timestamp)
                }
                (None, UntimestampedPolicy::AppendAtTail) => self.latest,
                (None, UntimestampedPolicy::Exclude) => {
                    progress.excluded.push(source_index);
                    continue;
                }
            };
            new_entries.push(MergedEntry {
                sort_timestamp,
                timestamp,
                source,
                source_index,
            });
        }
        false
    }

    fn publish(&mut self, count: usize) {
        let upstream: Vec<Properties> = self.shared.sources.iter().map(|s| s.properties()).collect();
        let known: usize = self.progress.iter().map(|p| p.known).sum();
        let processed: usize = self.progress.iter().map(|p| p.processed).sum();
        let upstream_percentage = upstream
            .iter()
            .map(|p| p.percentage_processed)
            .fold(Percentage::HUNDRED, |a, b| if b < a { b } else { a });

        let sizes: Vec<u64> = upstream.iter().filter_map(|p| p.size).collect();
        self.properties = Properties {
            log_entry_count: count,
            size: (!sizes.is_empty()).then(|| sizes.iter().sum()),
            created: upstream.iter().filter_map(|p| p.created).min(),
            last_modified: upstream.iter().filter_map(|p| p.last_modified).max(),
            empty_reason: if upstream.iter().all(|p| p.empty_reason.is_some()) {
                upstream.first().and_then(|p| p.empty_reason)
            } else {
                None
            },
            percentage_processed: Percentage::of(processed as u64, known as u64).times(upstream_percentage),
            excluded_entries: self.progress.iter().map(|p| p.excluded.len()).sum(),
            ..Properties::default()
        };
        self.shared.properties.publish(&self.properties);
    }
}

/// One time-ordered view over several sources.
///
/// Rows are kept ordered by timestamp, ties broken by the source's position
/// in the list and then by the row's index within its source. A row that
/// arrives late with an earlier timestamp is inserted in place and every
/// row after it is invalidated.
pub struct MergedLogSource {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    task: TaskHandle,
    upstream_listeners: Vec<Arc<dyn LogSourceListener>>,
    disposed: AtomicBool,
}

impl MergedLogSource {
    pub fn new(scheduler: &Arc<TaskScheduler>, sources: Vec<Arc<dyn LogSource>>, options: MergeOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            sources,
            index: RwLock::new(MergeIndex::new()),
            properties: SharedProperties::default(),
            listeners: ListenerCollection::new(),
        });

        let queue_listeners: Vec<Arc<QueueListener>> = (0..shared.sources.len())
            .map(|tag| QueueListener::new(tag, sender.clone()))
            .collect();
        let mut upstream_listeners: Vec<Arc<dyn LogSourceListener>> = Vec::new();
        for (source, listener) in shared.sources.iter().zip(&queue_listeners) {
            let listener: Arc<dyn LogSourceListener> = listener.clone();
            source.add_listener(Arc::clone(&listener), UPSTREAM_MAX_WAIT, UPSTREAM_MAX_COUNT);
            upstream_listeners.push(listener);
        }

        let mut unit = MergeUnit {
            shared: Arc::clone(&shared),
            modifications: receiver,
            progress: shared.sources.iter().map(|_| SourceProgress::default()).collect(),
            options,
            latest: None,
            properties: Properties::default(),
        };
        let task = scheduler.start_periodic("merge", move || unit.run());
        for listener in &queue_listeners {
            listener.wake_on_modification(UnitWaker::new(scheduler, &task));
        }

        Self {
            shared,
            scheduler: Arc::clone(scheduler),
            task,
            upstream_listeners,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn sources(&self) -> &[Arc<dyn LogSource>] {
        &self.shared.sources
    }

    /// (source id, row within that source) of merged row `row`
    pub fn origin_of(&self, row: usize) -> Option<(usize, usize)> {
        self.shared.index.read().get(row).map(|e| (e.source, e.source_index))
    }

    /// Columns every source offers, beyond the ones computed here
    fn shared_columns(&self) -> Vec<&'static Column> {
        let mut sources = self.shared.sources.iter();
        let Some(first) = sources.next() else {
            return Vec::new();
        };
        let mut columns: Vec<&'static Column> = first
            .columns()
            .into_iter()
            .filter(|c| !OWN_COLUMNS.contains(c))
            .collect();
        for source in sources {
            let offered = source.columns();
            columns.retain(|c| offered.contains(c));
        }
        columns
    }

    /// Fetch `columns` of the given merged rows from their sources.
    fn fill_from_sources(
        &self,
        entries: &[Option<MergedEntry>],
        columns: &[&'static Column],
        dest: &mut dyn LogBuffer,
        dest_index: usize,
        retrieved: &mut [bool],
        options: QueryOptions,
    ) {
        for source in 0..self.shared.sources.len() {
            let positions: Vec<usize> = (0..entries.len())
                .filter(|&i| entries[i].is_some_and(|e| e.source == source))
                .collect();
            if positions.is_empty() {
                continue;
            }
            let source_rows: Vec<usize> = positions
                .iter()
                .filter_map(|&i| entries[i].map(|e| e.source_index))
                .collect();

            let mut fetch = vec![&INDEX];
            fetch.extend_from_slice(columns);
            let mut rows = LogBufferArray::new(&fetch, source_rows.len());
            self.shared.sources[source].get_entries(&Rows::Indices(&source_rows), &mut rows, 0, options);

            for (k, &i) in positions.iter().enumerate() {
                if rows.entry(k).index().is_none() {
                    retrieved[i] = false;
                }
                for &column in columns {
                    if let Some(values) = rows.column(column) {
                        dest.write_from(column, dest_index + i, values, Section::new(k, 1));
                    }
                }
            }
        }
    }
}

impl LogSource for MergedLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        let mut columns = OWN_COLUMNS.to_vec();
        columns.extend(self.shared_columns());
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
        let entries: Vec<Option<MergedEntry>> = {
            let index = self.shared.index.read();
            rows.iter().map(|row| index.get(row)).collect()
        };
        dest.fill_all_default(Section::new(dest_index, entries.len()));
        let mut retrieved: Vec<bool> = entries.iter().map(Option::is_some).collect();

        let shared_columns = self.shared_columns();
        let fetched: Vec<&'static Column> = dest
            .columns()
            .iter()
            .copied()
            .filter(|c| shared_columns.contains(c))
            .collect();
        if !fetched.is_empty() {
            self.fill_from_sources(&entries, &fetched, dest, dest_index, &mut retrieved, options);
        }

        let columns = dest.columns().to_vec();
        for (i, (row, entry)) in rows.iter().zip(&entries).enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            for &column in &columns {
                let value = if *column == INDEX {
                    Value::Index(retrieved[i].then_some(row))
                } else if *column == LOG_ENTRY_INDEX {
                    Value::Index(Some(row))
                } else if *column == LINE_NUMBER {
                    Value::Integer(row as i64 + 1)
                } else if *column == SOURCE_ID {
                    Value::Index(Some(entry.source))
                } else if *column == SOURCE_INDEX {
                    Value::Index(Some(entry.source_index))
                } else if *column == TIMESTAMP {
                    Value::Timestamp(entry.timestamp)
                } else {
                    continue;
                };
                dest.set_value(column, dest_index + i, value);
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (source, listener) in self.shared.sources.iter().zip(&self.upstream_listeners) {
            source.remove_listener(listener);
        }
        self.scheduler.stop_periodic(&self.task);
        self.shared.index.write().clear();
        self.shared.properties.clear();
        self.shared.listeners.clear();
        debug!(sources = self.shared.sources.len(), "disposed merged source");
    }
}

impl Drop for MergedLogSource {
    fn drop(&mut self) {
        self.dispose();
    }
}
