//! Opening a log file: detection plus the line, parsing and multi-line
//! stages behind one [`LogSource`].

use crate::buffer::column::{INDEX, LINE_NUMBER, LOG_LEVEL, RAW_CONTENT, TIMESTAMP};
use crate::buffer::{Column, ColumnValues, LogBuffer};
use crate::detect::{Encoding, FileFormatDetector, FormatMatcher, LogFileFormat, PlainTextMatcher, DEFAULT_PROBE_SIZE};
use crate::multiline::{MultiLineLogSource, MultiLineOptions};
use crate::notify::{ListenerCollection, LogSourceListener, Modification};
use crate::parse::{GenericTextParser, LogEntryParser, ParsingLogSource};
use crate::reader::{StreamingOptions, StreamingTextLogSource};
use crate::scheduler::{TaskHandle, TaskScheduler};
use crate::source::{LogSource, Properties, QueryOptions, Rows, Section};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const INNER_MAX_WAIT: Duration = Duration::from_millis(10);
const INNER_MAX_COUNT: usize = 10_000;

#[derive(Clone)]
pub struct FileSourceOptions {
    /// Format to assume instead of asking the matcher
    pub format_hint: Option<LogFileFormat>,
    pub matcher: Arc<dyn FormatMatcher>,
    /// Forces an encoding over both the format's and the sniffed one
    pub overwritten_encoding: Option<Encoding>,
    pub default_encoding: Encoding,
    pub probe_size: usize,
    /// Parser for every pipeline; `None` builds a fresh generic one each time
    pub parser: Option<Arc<dyn LogEntryParser>>,
    /// `None` leaves physical lines as rows
    pub multiline: Option<MultiLineOptions>,
    /// Scan, read, cache and watch settings of the line stage
    pub streaming: StreamingOptions,
}

impl Default for FileSourceOptions {
    fn default() -> Self {
        Self {
            format_hint: None,
            matcher: Arc::new(PlainTextMatcher),
            overwritten_encoding: None,
            default_encoding: Encoding::Utf8,
            probe_size: DEFAULT_PROBE_SIZE,
            parser: None,
            multiline: Some(MultiLineOptions::default()),
            streaming: StreamingOptions::default(),
        }
    }
}

/// The stages currently reading the file
struct Pipeline {
    format: LogFileFormat,
    encoding: Encoding,
    detected_encoding: Option<Encoding>,
    /// Bottom first
    stages: Vec<Arc<dyn LogSource>>,
    forwarder: Arc<dyn LogSourceListener>,
}

impl Pipeline {
    fn top(&self) -> Option<&Arc<dyn LogSource>> {
        self.stages.last()
    }

    fn dispose(&self) {
        if let Some(top) = self.top() {
            top.remove_listener(&self.forwarder);
        }
        for stage in self.stages.iter().rev() {
            stage.dispose();
        }
    }
}

struct Shared {
    path: PathBuf,
    pipeline: RwLock<Option<Pipeline>>,
    /// Bumped on every rebuild; forwarders of older pipelines go quiet
    generation: AtomicU64,
    listeners: ListenerCollection,
}

impl Shared {
    fn top(&self) -> Option<Arc<dyn LogSource>> {
        self.pipeline.read().as_ref().and_then(|p| p.top().cloned())
    }
}

/// Relays the modifications of the current pipeline's top stage.
struct Forwarder {
    shared: Arc<Shared>,
    generation: u64,
}

impl LogSourceListener for Forwarder {
    fn on_modified(&self, modification: Modification) {
        if self.shared.generation.load(Ordering::SeqCst) != self.generation {
            return;
        }
        match modification {
            Modification::Reset => self.shared.listeners.reset(),
            Modification::Invalidate(section) => self.shared.listeners.invalidate(section.index),
            Modification::Append(section) => self.shared.listeners.on_read(section.end()),
        }
    }
}

struct DetectUnit {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    detector: FileFormatDetector,
    options: FileSourceOptions,
}

impl DetectUnit {
    fn run(&mut self) -> Duration {
        let (format, detected_encoding) = match self.detector.detect(&self.shared.path) {
            Ok(detection) => (
                self.options.format_hint.clone().unwrap_or(detection.format),
                detection.detected_encoding,
            ),
            Err(e) => {
                debug!(path = %self.shared.path.display(), error = %e, "detection failed");
                if self.shared.pipeline.read().is_none() {
                    let format = self.options.format_hint.clone().unwrap_or_else(LogFileFormat::plain_text);
                    self.rebuild(format, None);
                }
                self.shared.listeners.tick();
                return self.options.streaming.scan_interval;
            }
        };

        let encoding = self.resolve_encoding(&format, detected_encoding);
        let unchanged = self
            .shared
            .pipeline
            .read()
            .as_ref()
            .is_some_and(|p| p.format == format && p.encoding == encoding);
        if unchanged {
            if let Some(pipeline) = self.shared.pipeline.write().as_mut() {
                pipeline.detected_encoding = detected_encoding;
            }
        } else {
            self.rebuild(format, detected_encoding);
        }
        self.shared.listeners.tick();
        self.options.streaming.scan_interval
    }

    fn resolve_encoding(&self, format: &LogFileFormat, detected: Option<Encoding>) -> Encoding {
        self.options
            .overwritten_encoding
            .or(format.encoding)
            .or(detected)
            .unwrap_or(self.options.default_encoding)
    }

    fn rebuild(&mut self, format: LogFileFormat, detected_encoding: Option<Encoding>) {
        let encoding = self.resolve_encoding(&format, detected_encoding);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let old = self.shared.pipeline.write().take();
        if let Some(old) = old {
            info!(
                path = %self.shared.path.display(),
                format = %format.name,
                %encoding,
                "format or encoding changed, rebuilding"
            );
            old.dispose();
        }
        self.shared.listeners.reset();

        let streaming = StreamingOptions {
            encoding,
            ..self.options.streaming.clone()
        };
        let lines: Arc<dyn LogSource> = Arc::new(StreamingTextLogSource::new(&self.scheduler, &self.shared.path, streaming));
        let parser = self
            .options
            .parser
            .clone()
            .unwrap_or_else(|| Arc::new(GenericTextParser::new()));
        let parsed: Arc<dyn LogSource> = Arc::new(ParsingLogSource::new(Arc::clone(&lines), parser));
        let mut stages = vec![lines, Arc::clone(&parsed)];
        if let Some(multiline) = &self.options.multiline {
            let entries: Arc<dyn LogSource> =
                Arc::new(MultiLineLogSource::new(&self.scheduler, parsed, multiline.clone()));
            stages.push(entries);
        }

        let forwarder: Arc<dyn LogSourceListener> = Arc::new(Forwarder {
            shared: Arc::clone(&self.shared),
            generation,
        });
        let pipeline = Pipeline {
            format,
            encoding,
            detected_encoding,
            stages,
            forwarder: Arc::clone(&forwarder),
        };
        let top = pipeline.top().cloned();
        *self.shared.pipeline.write() = Some(pipeline);
        if let Some(top) = top {
            top.add_listener(forwarder, INNER_MAX_WAIT, INNER_MAX_COUNT);
        }
    }
}

/// A log file opened for tailing.
///
/// A detector unit re-checks format and encoding whenever the file's
/// fingerprint changes. When either differs from what the current stages
/// were built for, they are replaced and listeners see a Reset.
pub struct FileLogSource {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    task: TaskHandle,
    disposed: AtomicBool,
    name: Mutex<Option<String>>,
}

impl FileLogSource {
    /// Start tailing `path`. A missing file is not an error: the source
    /// stays empty and reports why until the file appears.
    pub fn open(scheduler: &Arc<TaskScheduler>, path: impl Into<PathBuf>, options: FileSourceOptions) -> Self {
        let path = path.into();
        let shared = Arc::new(Shared {
            path: path.clone(),
            pipeline: RwLock::new(None),
            generation: AtomicU64::new(0),
            listeners: ListenerCollection::new(),
        });
        let detector = FileFormatDetector::new(Arc::clone(&options.matcher), options.probe_size, options.default_encoding);
        let mut unit = DetectUnit {
            shared: Arc::clone(&shared),
            scheduler: Arc::clone(scheduler),
            detector,
            options,
        };
        // The first pipeline exists before `open` returns.
        unit.run();
        let task = scheduler.start_periodic(&format!("detect {}", path.display()), move || unit.run());

        Self {
            shared,
            scheduler: Arc::clone(scheduler),
            task,
            disposed: AtomicBool::new(false),
            name: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Display name used in properties instead of the path
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = Some(name.into());
    }

    pub fn format(&self) -> Option<LogFileFormat> {
        self.shared.pipeline.read().as_ref().map(|p| p.format.clone())
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.shared.pipeline.read().as_ref().map(|p| p.encoding)
    }
}

impl LogSource for FileLogSource {
    fn columns(&self) -> Vec<&'static Column> {
        match self.shared.top() {
            Some(top) => top.columns(),
            None => vec![&INDEX, &LINE_NUMBER, &RAW_CONTENT, &TIMESTAMP, &LOG_LEVEL],
        }
    }

    fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) {
        self.shared.listeners.add_listener(listener, max_wait, max_count);
    }

    fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>) {
        self.shared.listeners.remove_listener(listener);
    }

    fn properties(&self) -> Properties {
        let pipeline = self.shared.pipeline.read();
        let Some(pipeline) = pipeline.as_ref() else {
            return Properties::default();
        };
        let mut properties = pipeline.top().map(|t| t.properties()).unwrap_or_default();
        properties.format = Some(pipeline.format.name.clone());
        properties.encoding = Some(pipeline.encoding);
        properties.detected_encoding = pipeline.detected_encoding;
        if let Some(name) = self.name.lock().clone() {
            properties.name = Some(name);
        }
        properties
    }

    fn get_column(
        &self,
        rows: &Rows<'_>,
        column: &'static Column,
        dest: &mut ColumnValues,
        dest_index: usize,
        options: QueryOptions,
    ) {
        match self.shared.top() {
            Some(top) => top.get_column(rows, column, dest, dest_index, options),
            None => dest.fill_default(column, Section::new(dest_index, rows.len())),
        }
    }

    fn get_entries(&self, rows: &Rows<'_>, dest: &mut dyn LogBuffer, dest_index: usize, options: QueryOptions) {
        match self.shared.top() {
            Some(top) => top.get_entries(rows, dest, dest_index, options),
            None => dest.fill_all_default(Section::new(dest_index, rows.len())),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop_periodic(&self.task);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let pipeline = self.shared.pipeline.write().take();
        if let Some(pipeline) = pipeline {
            pipeline.dispose();
        }
        self.shared.listeners.clear();
        debug!(path = %self.shared.path.display(), "disposed file source");
    }
}

impl Drop for FileLogSource {
    fn drop(&mut self) {
        self.dispose();
    }
}
