use super::Filter;
use crate::buffer::column::{INDEX, SOURCE_INDEX};
use crate::buffer::{Column, ColumnValues, LogBuffer, LogBufferArray, LogEntry, Value};
use crate::notify::{ListenerCollection, LogSourceListener, Modification, QueueListener};
use crate::scheduler::{TaskHandle, TaskScheduler, UnitWaker};
use crate::source::{
    fill_column_by_entries, LogSource, Percentage, Properties, QueryOptions, Rows, Section,
    SharedProperties,
};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_DELAY: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_WAIT: Duration = Duration::from_millis(10);
const UPSTREAM_MAX_COUNT: usize = 10_000;
const MAX_LOGGED_PANICS: usize = 10;

#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Upstream rows evaluated per run
    pub batch_size: usize,
    pub idle_interval: Duration,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            idle_interval: Duration::from_millis(100),
        }
    }
}

struct Shared {
    upstream: Arc<dyn LogSource>,
    filter: RwLock<Arc<dyn Filter>>,
    /// Set by `set_filter`, consumed by the unit
    filter_changed: AtomicBool,
    /// Upstream row of every filtered row, ascending
    index: RwLock<Vec<usize>>,
    properties: SharedProperties,
    listeners: ListenerCollection,
    panics: AtomicUsize,
}

impl Shared {
    fn evaluate(&self, filter: &dyn Filter, entry: &LogEntry<'_>) -> bool {
        match catch_unwind(AssertUnwindSafe(|| filter.matches(entry))) {
            Ok(matched) => matched,
            Err(_) => {
                let panics = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
                if panics <= MAX_LOGGED_PANICS {
                    warn!(panics, filter = %filter.description(), "filter panicked, treating entry as no match");
                }
                false
            }
        }
    }
}

struct FilterUnit {
    shared: Arc<Shared>,
    modifications: Receiver<(usize, Modification)>,
    known: usize,
    processed: usize,
    options: FilterOptions,
    properties: Properties,
}

impl FilterUnit {
    fn run(&mut self) -> Duration {
        if self.shared.filter_changed.swap(false, Ordering::SeqCst) {
            self.shared.index.write().clear();
            self.processed = 0;
            self.shared.listeners.reset();
        }
        while let Ok((_, modification)) = self.modifications.try_recv() {
            self.apply(modification);
        }

        let stalled = self.process();
        let count = self.shared.index.read().len();
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
                    let mut index = self.shared.index.write();
                    let first = index.partition_point(|&row| row < section.index);
                    index.truncate(first);
                    drop(index);
                    self.shared.listeners.invalidate(first);
                }
            }
            Modification::Append(section) => {
                self.known = section.end();
            }
        }
    }

    /// Evaluate the next batch. Returns true when a row could not be
    /// delivered yet.
    fn process(&mut self) -> bool {
        if self.processed >= self.known {
            return false;
        }
        let filter = Arc::clone(&*self.shared.filter.read());
        let mut columns = vec![&INDEX];
        columns.extend(filter.columns());
        let count = (self.known - self.processed).min(self.options.batch_size);
        let mut rows = LogBufferArray::new(&columns, count);
        self.shared.upstream.get_entries(
            &Section::new(self.processed, count).into(),
            &mut rows,
            0,
            QueryOptions::BACKGROUND,
        );

        let mut matched = Vec::new();
        let mut stalled = false;
        for entry in rows.entries() {
            if entry.index().is_none() {
                stalled = true;
                break;
            }
            if self.shared.evaluate(filter.as_ref(), &entry) {
                matched.push(self.processed);
            }
            self.processed += 1;
        }
        self.shared.index.write().extend(matched);
        stalled
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

/// The rows of an upstream source that match a [`Filter`].
///
/// Keeps a dense table from filtered row to upstream row. New upstream rows
/// are evaluated in order; an upstream invalidation drops the affected
/// suffix of the table and evaluates those rows again.
pub struct FilteredLogSource {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    task: TaskHandle,
    upstream_listener: Arc<dyn LogSourceListener>,
    disposed: AtomicBool,
}

impl FilteredLogSource {
    pub fn new(
        scheduler: &Arc<TaskScheduler>,
        upstream: Arc<dyn LogSource>,
        filter: Arc<dyn Filter>,
        options: FilterOptions,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let listener = QueueListener::new(0, sender);
        let shared = Arc::new(Shared {
            upstream: Arc::clone(&upstream),
            filter: RwLock::new(filter),
            filter_changed: AtomicBool::new(false),
            index: RwLock::new(Vec::new()),
            properties: SharedProperties::default(),
            listeners: ListenerCollection::new(),
            panics: AtomicUsize::new(0),
        });

        let upstream_listener: Arc<dyn LogSourceListener> = listener.clone();
        upstream.add_listener(Arc::clone(&upstream_listener), UPSTREAM_MAX_WAIT, UPSTREAM_MAX_COUNT);

        let mut unit = FilterUnit {
            shared: Arc::clone(&shared),
            modifications: receiver,
            known: 0,
            processed: 0,
            options,
            properties: Properties::default(),
        };
        let task = scheduler.start_periodic("filter", move || unit.run());
        listener.wake_on_modification(UnitWaker::new(scheduler, &task));

        Self {
            shared,
            scheduler: Arc::clone(scheduler),
            task,
            upstream_listener,
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the predicate. Listeners see a Reset and then the rows
    /// matching the new filter.
    pub fn set_filter(&self, filter: Arc<dyn Filter>) {
        debug!(filter = %filter.description(), "filter replaced");
        *self.shared.filter.write() = filter;
        self.shared.filter_changed.store(true, Ordering::SeqCst);
        self.scheduler.wake(&self.task);
    }

    pub fn filter(&self) -> Arc<dyn Filter> {
        Arc::clone(&*self.shared.filter.read())
    }

    /// Upstream row behind filtered row `row`
    pub fn source_index_of(&self, row: usize) -> Option<usize> {
        self.shared.index.read().get(row).copied()
    }
}

impl LogSource for FilteredLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        let mut columns = self.shared.upstream.columns();
        for column in [&INDEX, &SOURCE_INDEX] {
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
        let source_rows: Vec<Option<usize>> = {
            let index = self.shared.index.read();
            rows.iter().map(|row| index.get(row).copied()).collect()
        };
        dest.fill_all_default(Section::new(dest_index, source_rows.len()));

        let present: Vec<usize> = (0..source_rows.len()).filter(|&i| source_rows[i].is_some()).collect();
        if present.is_empty() {
            return;
        }
        let upstream_rows: Vec<usize> = source_rows.iter().flatten().copied().collect();

        let upstream_columns = self.shared.upstream.columns();
        let mut fetch: Vec<&'static Column> = vec![&INDEX];
        fetch.extend(
            dest.columns()
                .iter()
                .copied()
                .filter(|c| *c != &INDEX && *c != &SOURCE_INDEX && upstream_columns.contains(c)),
        );
        let mut fetched = LogBufferArray::new(&fetch, upstream_rows.len());
        self.shared
            .upstream
            .get_entries(&Rows::Indices(&upstream_rows), &mut fetched, 0, options);

        let requested: Vec<usize> = rows.iter().collect();
        for (k, &i) in present.iter().enumerate() {
            let target = dest_index + i;
            for &column in &fetch[1..] {
                if let Some(values) = fetched.column(column) {
                    dest.write_from(column, target, values, Section::new(k, 1));
                }
            }
            let retrieved = fetched.entry(k).index().is_some();
            dest.set_value(&INDEX, target, Value::Index(retrieved.then_some(requested[i])));
            dest.set_value(&SOURCE_INDEX, target, Value::Index(Some(upstream_rows[k])));
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
        debug!("disposed filtered source");
    }
}

impl Drop for FilteredLogSource {
    fn drop(&mut self) {
        self.dispose();
    }
}
