//! A text file exposed as a log source, one row per line.
//!
//! Two units run on the shared scheduler. The scan unit polls the file,
//! records where every line starts and reports growth, truncation and
//! deletion. The read unit serves queued [`ReadRequest`]s through a single
//! file handle and fills the [`LineCache`]. Only line offsets are kept in
//! memory; content is read on demand.

use super::line_cache::{LineCache, DEFAULT_CAPACITY};
use super::line_offsets::{line_ends, LineScanner, ScanOutcome, SCAN_BUDGET};
use super::open_shared;
use super::request::{ReadRequest, RequestRows};
use crate::buffer::column::{
    INDEX, LINE_NUMBER, LINE_OFFSET_IN_BYTES, LOG_ENTRY_INDEX, ORIGINAL_INDEX, RAW_CONTENT,
};
use crate::buffer::{Column, ColumnValues, LogBuffer, Value};
use crate::cancel::CancelToken;
use crate::detect::{Encoding, Fingerprint};
use crate::notify::{ListenerCollection, LogSourceListener};
use crate::scheduler::{TaskHandle, TaskScheduler, UnitWaker};
use crate::source::{
    fill_column_by_entries, LogSource, Percentage, Properties, QueryMode, QueryOptions, Rows,
    Section, SharedProperties, SourceError,
};
use crate::watcher::FileWatcher;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// How often the read unit looks for requests nobody woke it for
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(10);

/// Longest unterminated last line that is read in full
const MAX_TAIL_LENGTH: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StreamingOptions {
    pub encoding: Encoding,
    pub scan_interval: Duration,
    pub read_interval: Duration,
    pub line_cache_capacity: usize,
    /// Wake the scan unit on file system events in addition to polling
    pub watch: bool,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            read_interval: DEFAULT_READ_INTERVAL,
            line_cache_capacity: DEFAULT_CAPACITY,
            watch: true,
        }
    }
}

/// State shared between the source handle and its two units
struct Shared {
    path: PathBuf,
    encoding: Encoding,
    line_starts: RwLock<Vec<u64>>,
    properties: SharedProperties,
    listeners: ListenerCollection,
    requests: Mutex<VecDeque<Arc<ReadRequest>>>,
    cache: Mutex<LineCache>,
    cancel: CancelToken,
}

struct ReadLine {
    content: String,
    /// A line terminator was read; the content cannot grow anymore
    terminated: bool,
}

impl Shared {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// Read the lines a request asks for, `None` for rows not indexed.
    fn serve(&self, file: &mut BufReader<File>, rows: &RequestRows) -> io::Result<Vec<Option<ReadLine>>> {
        let spans: Vec<Option<(u64, Option<u64>)>> = {
            let starts = self.line_starts.read();
            rows.iter()
                .map(|row| starts.get(row).map(|&start| (start, starts.get(row + 1).copied())))
                .collect()
        };

        let mut position = None;
        let mut lines = Vec::with_capacity(spans.len());
        for span in spans {
            let Some((start, end)) = span else {
                lines.push(None);
                continue;
            };
            if position != Some(start) {
                file.seek(SeekFrom::Start(start))?;
            }
            let mut bytes = Vec::new();
            let terminated = match end {
                Some(end) => {
                    file.by_ref().take(end - start).read_to_end(&mut bytes)?;
                    position = Some(start + bytes.len() as u64);
                    true
                }
                None => {
                    file.by_ref().take(MAX_TAIL_LENGTH).read_to_end(&mut bytes)?;
                    position = None;
                    // The file may have grown past what was indexed.
                    match line_ends(&bytes, self.encoding).first() {
                        Some(&line_end) => {
                            bytes.truncate(line_end);
                            true
                        }
                        None => false,
                    }
                }
            };
            let content = self
                .encoding
                .decode(self.encoding.strip_line_terminator(&bytes));
            lines.push(Some(ReadLine { content, terminated }));
        }
        Ok(lines)
    }
}

/// Private state of the scan unit
struct ScanUnit {
    shared: Arc<Shared>,
    scanner: LineScanner,
    fingerprint: Option<Fingerprint>,
    complete: bool,
    properties: Properties,
    interval: Duration,
}

impl ScanUnit {
    fn run(&mut self) -> Duration {
        if self.shared.cancel.is_cancelled() {
            return self.interval;
        }
        let path = self.shared.path.clone();

        let fingerprint = match Fingerprint::of(&path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return self.fail(e),
        };
        if let Some(reason) = self.properties.empty_reason.take() {
            info!(path = %path.display(), %reason, "source is available again");
        }

        if fingerprint.size < self.scanner.scanned_to() {
            info!(
                path = %path.display(),
                size = fingerprint.size,
                scanned = self.scanner.scanned_to(),
                "file shrank, reading it from the start"
            );
            self.restart();
        }

        if self.fingerprint != Some(fingerprint) || !self.complete {
            let mut file = match open_shared(&path) {
                Ok(file) => file,
                Err(e) => return self.fail(SourceError::from_io(&path, e)),
            };
            let outcome = match self.scanner.scan(&mut file, fingerprint.size, SCAN_BUDGET, &self.shared.cancel) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to scan file, retrying");
                    return self.interval;
                }
            };
            self.complete = outcome.complete;
            self.apply(outcome);
        }
        self.fingerprint = Some(fingerprint);

        let count = self.shared.line_starts.read().len();
        let properties = &mut self.properties;
        properties.log_entry_count = count;
        properties.size = Some(fingerprint.size);
        properties.created = fingerprint.created;
        properties.last_modified = fingerprint.modified;
        properties.encoding = Some(self.shared.encoding);
        properties.percentage_processed = Percentage::of(self.scanner.scanned_to(), fingerprint.size);
        self.shared.properties.publish(properties);
        self.shared.listeners.on_read(count);

        if self.complete {
            self.interval
        } else {
            Duration::ZERO
        }
    }

    fn apply(&mut self, outcome: ScanOutcome) {
        let mut starts = self.shared.line_starts.write();
        let changed_row = match starts.len() {
            rows if outcome.tail_changed && rows > 0 => Some(rows - 1),
            _ => None,
        };
        if let Some(row) = changed_row {
            self.shared.cache.lock().invalidate_from(row);
        }
        starts.extend(outcome.new_lines);
        drop(starts);

        if let Some(row) = changed_row {
            self.shared.listeners.invalidate(row);
        }
    }

    /// Forget everything and start from the first byte again.
    fn restart(&mut self) {
        self.shared.line_starts.write().clear();
        self.shared.cache.lock().clear();
        self.scanner.reset();
        self.fingerprint = None;
        self.complete = false;
        self.shared.listeners.reset();
    }

    fn fail(&mut self, err: SourceError) -> Duration {
        let Some(reason) = err.empty_reason() else {
            debug!(error = %err, "transient error, retrying on next poll");
            return self.interval;
        };
        if self.properties.empty_reason != Some(reason) {
            info!(error = %err, "source unavailable");
        }
        self.restart();
        self.properties = Properties::error(Some(self.shared.name()), reason);
        self.properties.encoding = Some(self.shared.encoding);
        self.shared.properties.publish(&self.properties);
        self.shared.listeners.on_read(0);
        self.interval
    }
}

/// Private state of the read unit
struct ReadUnit {
    shared: Arc<Shared>,
    interval: Duration,
}

impl ReadUnit {
    fn run(&mut self) -> Duration {
        let pending: Vec<Arc<ReadRequest>> = self.shared.requests.lock().drain(..).collect();
        if pending.is_empty() {
            return self.interval;
        }

        let mut file = match open_shared(&self.shared.path) {
            Ok(file) => BufReader::new(file),
            Err(e) => {
                debug!(path = %self.shared.path.display(), error = %e, "cannot open file for reading");
                for request in pending {
                    request.complete(Vec::new());
                }
                return self.interval;
            }
        };

        for request in pending {
            if self.shared.cancel.is_cancelled() {
                request.cancel();
                continue;
            }
            if !request.is_pending() {
                continue;
            }
            let shared = &self.shared;
            // Taken before `serve` snapshots the offsets; the scan unit
            // invalidates the cache while holding the offsets write lock.
            let generation = shared.cache.lock().generation();
            let result = catch_unwind(AssertUnwindSafe(|| shared.serve(&mut file, request.rows())));
            let lines = match result {
                Ok(Ok(lines)) => lines,
                Ok(Err(e)) => {
                    warn!(path = %self.shared.path.display(), error = %e, "failed to read lines");
                    Vec::new()
                }
                Err(_) => {
                    error!(path = %self.shared.path.display(), "panic while reading lines");
                    Vec::new()
                }
            };

            let content = store_lines(&mut self.shared.cache.lock(), request.rows(), lines, generation);
            request.complete(content);
        }
        Duration::ZERO
    }
}

/// Cache what a read returned and hand back the content for the request.
///
/// Rows invalidated since `generation` were read from offsets that no
/// longer hold; they are dropped and reported as not retrieved.
fn store_lines(
    cache: &mut LineCache,
    rows: &RequestRows,
    lines: Vec<Option<ReadLine>>,
    generation: u64,
) -> Vec<Option<String>> {
    let stale_from = cache.stale_from(generation).unwrap_or(usize::MAX);
    if stale_from != usize::MAX {
        debug!(from = stale_from, "lines changed while reading, dropping them");
    }
    rows.iter()
        .zip(lines)
        .map(|(row, line)| {
            let line = line.filter(|_| row < stale_from)?;
            if line.terminated {
                cache.put(row, line.content.clone());
            } else {
                cache.put_open(row, line.content.clone());
            }
            Some(line.content)
        })
        .collect()
}

/// Log source over a growing text file.
///
/// Rows are lines. A last line without terminator is already a row; when it
/// grows, listeners see an Invalidate for it followed by an Append.
pub struct StreamingTextLogSource {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    scan_task: TaskHandle,
    read_task: TaskHandle,
    watcher: Mutex<Option<FileWatcher>>,
}

impl StreamingTextLogSource {
    pub fn new(scheduler: &Arc<TaskScheduler>, path: impl Into<PathBuf>, options: StreamingOptions) -> Self {
        let path = path.into();
        let shared = Arc::new(Shared {
            path: path.clone(),
            encoding: options.encoding,
            line_starts: RwLock::new(Vec::new()),
            properties: SharedProperties::new(Properties {
                name: Some(path.display().to_string()),
                encoding: Some(options.encoding),
                ..Properties::default()
            }),
            listeners: ListenerCollection::new(),
            requests: Mutex::new(VecDeque::new()),
            cache: Mutex::new(LineCache::new(options.line_cache_capacity)),
            cancel: CancelToken::new(),
        });

        let mut scan = ScanUnit {
            shared: Arc::clone(&shared),
            scanner: LineScanner::new(options.encoding),
            fingerprint: None,
            complete: false,
            properties: Properties {
                name: Some(shared.name()),
                ..Properties::default()
            },
            interval: options.scan_interval,
        };
        let scan_task = scheduler.start_periodic(&format!("scan {}", path.display()), move || scan.run());

        let mut read = ReadUnit {
            shared: Arc::clone(&shared),
            interval: options.read_interval,
        };
        let read_task = scheduler.start_periodic(&format!("read {}", path.display()), move || read.run());

        let watcher = if options.watch {
            let waker = UnitWaker::new(scheduler, &scan_task);
            match FileWatcher::new(&path, move || waker.wake()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot watch file, relying on polling");
                    None
                }
            }
        } else {
            None
        };

        Self {
            shared,
            scheduler: Arc::clone(scheduler),
            scan_task,
            read_task,
            watcher: Mutex::new(watcher),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn encoding(&self) -> Encoding {
        self.shared.encoding
    }

    /// Content of `rows`, `None` where it is neither cached nor could be read
    /// under `options`.
    fn read_lines(&self, rows: &Rows<'_>, options: QueryOptions) -> Vec<Option<String>> {
        let count = self.shared.line_starts.read().len();
        let mut lines = vec![None; rows.len()];
        let mut misses = Vec::new();
        {
            let mut cache = self.shared.cache.lock();
            for (i, row) in rows.iter().enumerate() {
                if row >= count {
                    continue;
                }
                match cache.get(row) {
                    Some(content) => lines[i] = Some(content.to_string()),
                    None => misses.push(i),
                }
            }
        }
        if misses.is_empty() || options.mode == QueryMode::FromCache {
            return lines;
        }

        let request = match rows {
            Rows::Section(section) if misses.len() == count.min(section.end()).saturating_sub(section.index) => {
                ReadRequest::contiguous(Section::new(section.index, misses.len()))
            }
            _ => ReadRequest::fragmented(misses.iter().filter_map(|&i| rows.get(i)).collect()),
        };
        self.shared.requests.lock().push_back(Arc::clone(&request));
        self.scheduler.wake(&self.read_task);

        if options.mode == QueryMode::FetchForLater {
            return lines;
        }
        if let Some(read) = request.wait(options.max_wait) {
            for (line, &i) in read.into_iter().zip(&misses) {
                lines[i] = line;
            }
        }
        lines
    }
}

impl LogSource for StreamingTextLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        vec![
            &INDEX,
            &ORIGINAL_INDEX,
            &LOG_ENTRY_INDEX,
            &LINE_NUMBER,
            &LINE_OFFSET_IN_BYTES,
            &RAW_CONTENT,
        ]
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
        let columns = dest.columns().to_vec();
        let mut lines = if dest.contains(&RAW_CONTENT) {
            Some(self.read_lines(rows, options))
        } else {
            None
        };

        let starts = self.shared.line_starts.read();
        for (i, row) in rows.iter().enumerate() {
            let target = dest_index + i;
            let offset = starts.get(row).copied();
            let content = lines.as_mut().and_then(|lines| lines[i].take());
            let retrieved = offset.is_some() && (lines.is_none() || content.is_some());
            let mut content = content;

            for &column in &columns {
                let value = if *column == INDEX {
                    Value::Index(retrieved.then_some(row))
                } else if *column == ORIGINAL_INDEX || *column == LOG_ENTRY_INDEX {
                    Value::Index(offset.map(|_| row))
                } else if *column == LINE_NUMBER {
                    Value::Integer(offset.map_or(0, |_| row as i64 + 1))
                } else if *column == LINE_OFFSET_IN_BYTES {
                    Value::Integer(offset.map_or(-1, |o| o as i64))
                } else if *column == RAW_CONTENT {
                    Value::Text(content.take().unwrap_or_default())
                } else {
                    column.default_value().clone()
                };
                dest.set_value(column, target, value);
            }
        }
    }

    fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        self.watcher.lock().take();
        self.scheduler.stop_periodic(&self.scan_task);
        self.scheduler.stop_periodic(&self.read_task);
        for request in self.shared.requests.lock().drain(..) {
            request.cancel();
        }
        self.shared.line_starts.write().clear();
        self.shared.cache.lock().clear();
        self.shared.properties.clear();
        self.shared.listeners.clear();
        debug!(path = %self.shared.path.display(), "disposed streaming source");
    }
}

impl Drop for StreamingTextLogSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogBufferArray;
    use crate::source::EmptyReason;
    use crate::test_utils::{append, read_all_content, scheduler, wait_for_complete, wait_until, CollectingListener};
    use std::fs;
    use tempfile::TempDir;

    fn options() -> StreamingOptions {
        StreamingOptions {
            scan_interval: Duration::from_millis(10),
            watch: false,
            ..StreamingOptions::default()
        }
    }

    fn open(path: &Path) -> StreamingTextLogSource {
        StreamingTextLogSource::new(&scheduler(), path, options())
    }

    fn wait_for_count(source: &StreamingTextLogSource, count: usize) -> bool {
        wait_until(|| source.count() == count && source.properties().percentage_processed.is_complete())
    }

    fn read(source: &StreamingTextLogSource, rows: Rows<'_>, options: QueryOptions) -> LogBufferArray {
        let mut buffer = LogBufferArray::new(&[&INDEX, &LINE_NUMBER, &LINE_OFFSET_IN_BYTES, &RAW_CONTENT], rows.len());
        source.get_entries(&rows, &mut buffer, 0, options);
        buffer
    }

    #[test]
    fn test_empty_file_is_complete_with_no_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.log");
        fs::write(&path, "").unwrap();

        let source = open(&path);
        assert!(wait_for_complete(&source));
        let properties = source.properties();
        assert_eq!(properties.log_entry_count, 0);
        assert_eq!(properties.size, Some(0));
        assert_eq!(properties.empty_reason, None);
    }

    #[test]
    fn test_reads_every_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "first\nsecond\r\nthird\n").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 3));
        assert_eq!(read_all_content(&source), vec!["first", "second", "third"]);

        let buffer = read(&source, Section::new(0, 3).into(), QueryOptions::default());
        assert_eq!(buffer.entry(1).line_number(), 2);
        assert_eq!(buffer.value(&LINE_OFFSET_IN_BYTES, 2), Some(Value::Integer(14)));
    }

    #[test]
    fn test_partial_last_line_is_invalidated_when_extended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "A\r\nB\r\nC").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 3));
        assert_eq!(read_all_content(&source), vec!["A", "B", "C"]);

        let listener = CollectingListener::new();
        source.add_listener(listener.clone(), Duration::ZERO, 1000);
        assert!(wait_until(|| listener.model().count == 3));

        append(&path, "C\n");
        assert!(wait_until(|| {
            let model = listener.model();
            model.count == 3 && model.invalidations.contains(&Section::new(2, 1))
        }));
        assert!(wait_until(|| read_all_content(&source) == vec!["A", "B", "CC"]));
    }

    #[test]
    fn test_appended_lines_are_announced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\n").unwrap();

        let source = open(&path);
        let listener = CollectingListener::new();
        source.add_listener(listener.clone(), Duration::ZERO, 1000);
        assert!(wait_until(|| listener.model().count == 1));

        append(&path, "two\nthree\n");
        assert!(wait_until(|| listener.model().count == 3));
        assert!(listener.model().invalidations.is_empty());
    }

    #[test]
    fn test_truncation_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let source = open(&path);
        let listener = CollectingListener::new();
        source.add_listener(listener.clone(), Duration::ZERO, 1000);
        assert!(wait_until(|| listener.model().count == 3));

        fs::write(&path, "x\n").unwrap();
        assert!(wait_until(|| {
            let model = listener.model();
            model.count == 1 && model.resets >= 2
        }));
        assert!(wait_until(|| read_all_content(&source) == vec!["x"]));
    }

    #[test]
    fn test_missing_file_reports_reason_until_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.log");

        let source = open(&path);
        assert!(wait_until(|| source.properties().empty_reason == Some(EmptyReason::SourceDoesNotExist)));
        let properties = source.properties();
        assert_eq!(properties.log_entry_count, 0);
        assert!(properties.percentage_processed.is_complete());
        assert_eq!(properties.size, None);

        fs::write(&path, "hello\n").unwrap();
        assert!(wait_for_count(&source, 1));
        assert_eq!(source.properties().empty_reason, None);
    }

    #[test]
    fn test_deleted_file_empties_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\ntwo\n").unwrap();

        let source = open(&path);
        let listener = CollectingListener::new();
        source.add_listener(listener.clone(), Duration::ZERO, 1000);
        assert!(wait_until(|| listener.model().count == 2));

        fs::remove_file(&path).unwrap();
        assert!(wait_until(|| source.properties().empty_reason == Some(EmptyReason::SourceDoesNotExist)));
        assert!(wait_until(|| listener.model().count == 0));
        assert_eq!(source.count(), 0);
    }

    #[test]
    fn test_utf16_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.log");
        let mut data = vec![0xFF, 0xFE];
        for unit in "héllo\nwörld\n".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&path, data).unwrap();

        let options = StreamingOptions {
            encoding: Encoding::Utf16Le,
            ..options()
        };
        let source = StreamingTextLogSource::new(&scheduler(), &path, options);
        assert!(wait_for_count(&source, 2));
        assert_eq!(read_all_content(&source), vec!["héllo", "wörld"]);
    }

    #[test]
    fn test_fragmented_read_and_out_of_range_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\nc\n").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 3));

        let rows = [2, 0, 7];
        let buffer = read(&source, Rows::Indices(&rows), QueryOptions::default());
        assert_eq!(buffer.text(&RAW_CONTENT, 0), Some("c"));
        assert_eq!(buffer.text(&RAW_CONTENT, 1), Some("a"));
        assert_eq!(buffer.text(&RAW_CONTENT, 2), Some(""));
        assert_eq!(buffer.entry(0).index(), Some(2));
        assert_eq!(buffer.entry(2).index(), None);
        assert_eq!(buffer.entry(2).line_number(), 0);
    }

    #[test]
    fn test_cache_only_reads_do_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\n").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 2));

        let section: Rows<'_> = Section::new(0, 2).into();
        let cold = read(&source, section, QueryOptions::from_cache());
        assert_eq!(cold.text(&RAW_CONTENT, 0), Some(""));
        assert_eq!(cold.entry(0).index(), None);

        read(&source, section, QueryOptions::default());
        let warm = read(&source, section, QueryOptions::from_cache());
        assert_eq!(warm.text(&RAW_CONTENT, 1), Some("b"));
        assert_eq!(warm.entry(1).index(), Some(1));
    }

    #[test]
    fn test_fetch_for_later_fills_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\n").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 2));

        let section: Rows<'_> = Section::new(0, 2).into();
        let first = read(&source, section, QueryOptions::fetch_for_later());
        assert_eq!(first.entry(0).index(), None);

        assert!(wait_until(|| {
            let buffer = read(&source, section, QueryOptions::from_cache());
            buffer.text(&RAW_CONTENT, 0) == Some("a") && buffer.text(&RAW_CONTENT, 1) == Some("b")
        }));
    }

    #[test]
    fn test_fetch_for_later_delivers_unterminated_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "A\r\nB\r\nC").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 3));

        let section: Rows<'_> = Section::new(0, 3).into();
        read(&source, section, QueryOptions::fetch_for_later());
        assert!(wait_until(|| {
            let buffer = read(&source, section, QueryOptions::from_cache());
            buffer.entry(2).index() == Some(2) && buffer.text(&RAW_CONTENT, 2) == Some("C")
        }));

        append(&path, "D\n");
        assert!(wait_until(|| {
            read(&source, section, QueryOptions::fetch_for_later());
            let buffer = read(&source, section, QueryOptions::from_cache());
            buffer.text(&RAW_CONTENT, 2) == Some("CD")
        }));
    }

    fn read_line(content: &str, terminated: bool) -> Option<ReadLine> {
        Some(ReadLine {
            content: content.to_string(),
            terminated,
        })
    }

    #[test]
    fn test_store_lines_caches_terminated_and_open_lines() {
        let mut cache = LineCache::new(10);
        let generation = cache.generation();
        let rows = RequestRows::Contiguous(Section::new(0, 2));

        let content = store_lines(&mut cache, &rows, vec![read_line("a", true), read_line("b", false)], generation);
        assert_eq!(content, vec![Some("a".to_string()), Some("b".to_string())]);
        assert_eq!(cache.get(0), Some("a"));
        assert_eq!(cache.get(1), Some("b"));
    }

    #[test]
    fn test_store_lines_drops_lines_read_before_a_reset() {
        let mut cache = LineCache::new(10);
        let generation = cache.generation();
        let rows = RequestRows::Contiguous(Section::new(0, 2));

        // Truncation clears the cache while the read is in flight
        cache.clear();
        let content = store_lines(&mut cache, &rows, vec![read_line("old", true), read_line("tail", false)], generation);
        assert_eq!(content, vec![None, None]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_lines_keeps_rows_before_an_invalidated_tail() {
        let mut cache = LineCache::new(10);
        let generation = cache.generation();
        let rows = RequestRows::Fragmented(vec![0, 1, 2]);

        cache.invalidate_from(2);
        let lines = vec![read_line("a", true), read_line("b", true), read_line("c", false)];
        let content = store_lines(&mut cache, &rows, lines, generation);
        assert_eq!(content, vec![Some("a".to_string()), Some("b".to_string()), None]);
        assert_eq!(cache.get(1), Some("b"));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_index_only_reads_need_no_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\n").unwrap();

        let source = open(&path);
        assert!(wait_for_count(&source, 2));

        let mut values = ColumnValues::new(&INDEX, 2);
        source.get_column(&Section::new(0, 2).into(), &INDEX, &mut values, 0, QueryOptions::from_cache());
        assert_eq!(values.as_index(), Some(&[Some(0), Some(1)][..]));
    }

    #[test]
    fn test_dispose_empties_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\n").unwrap();

        let scheduler = scheduler();
        let source = StreamingTextLogSource::new(&scheduler, &path, options());
        assert!(wait_for_count(&source, 2));

        source.dispose();
        assert_eq!(source.count(), 0);
        assert_eq!(source.properties(), Properties::default());
        assert_eq!(scheduler.task_count(), 0);
        assert!(read_all_content(&source).is_empty());
    }
}
