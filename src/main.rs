use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tailsource::buffer::column::{LOG_LEVEL, RAW_CONTENT, SOURCE_ID};
use tailsource::buffer::{Column, LogBufferArray};
use tailsource::config::{load_for_cli, PipelineConfig};
use tailsource::file_source::{FileLogSource, FileSourceOptions};
use tailsource::filter::{AndFilter, Filter, FilterOptions, FilteredLogSource, LevelFilter, RegexFilter, SubstringFilter};
use tailsource::merge::{MergeOptions, MergedLogSource, UntimestampedPolicy};
use tailsource::multiline::MultiLineOptions;
use tailsource::notify::{Modification, QueueListener};
use tailsource::parse::Level;
use tailsource::reader::StreamingOptions;
use tailsource::scheduler::TaskScheduler;
use tailsource::source::{LogSource, QueryOptions, Section};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// How long the printer waits for a modification before re-checking progress
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// The newest row is held back until the source was quiet this long
const SETTLE_TIME: Duration = Duration::from_millis(200);
const LISTENER_MAX_WAIT: Duration = Duration::from_millis(50);
const LISTENER_MAX_COUNT: usize = 1000;
/// Rows fetched per read when printing
const PRINT_BATCH: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "tailsource")]
#[command(version)]
#[command(about = "Print, merge and filter live log files", long_about = None)]
struct Args {
    /// Log files to read; several files are merged by timestamp
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Only print entries containing this text
    #[arg(long, value_name = "PATTERN")]
    filter: Option<String>,

    /// Treat --filter as a regular expression
    #[arg(long, requires = "filter")]
    regex: bool,

    /// Match --filter case-sensitively
    #[arg(long, requires = "filter")]
    case_sensitive: bool,

    /// Only print entries of this level (repeatable)
    #[arg(long = "level", value_name = "LEVEL")]
    levels: Vec<Level>,

    /// Print physical lines instead of grouping continuation lines
    #[arg(long)]
    no_multiline: bool,

    /// What to do with untimestamped rows when merging: exclude or append-at-tail
    #[arg(long, value_name = "POLICY")]
    untimestamped: Option<UntimestampedPolicy>,

    /// Keep printing new rows as the files grow
    #[arg(short, long)]
    follow: bool,

    /// Config file to use instead of the discovered one
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Display names and paths of the files to open
fn resolve_inputs(args: &Args, config: &PipelineConfig) -> Result<Vec<(String, PathBuf)>> {
    if !args.files.is_empty() {
        return Ok(args
            .files
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                (name, path.clone())
            })
            .collect());
    }
    if config.sources.is_empty() {
        bail!("no log files given and no sources configured\n\nUsage: tailsource <FILE>...");
    }
    for source in config.sources.iter().filter(|s| !s.exists) {
        debug!(name = %source.name, path = %source.path.display(), "configured source does not exist yet");
    }
    Ok(config
        .sources
        .iter()
        .map(|s| (s.name.clone(), s.path.clone()))
        .collect())
}

fn file_options(args: &Args, config: &PipelineConfig) -> Result<FileSourceOptions> {
    let matcher = config.format_matcher().context("invalid format header pattern")?;
    let multiline = (config.multiline && !args.no_multiline).then(|| MultiLineOptions {
        level_starts_entry: config.level_starts_entry,
        ..MultiLineOptions::default()
    });
    Ok(FileSourceOptions {
        matcher: Arc::new(matcher),
        default_encoding: config.default_encoding,
        probe_size: config.probe_size,
        multiline,
        streaming: StreamingOptions {
            encoding: config.default_encoding,
            scan_interval: config.scan_interval,
            read_interval: config.read_interval,
            line_cache_capacity: config.line_cache_capacity,
            watch: config.watch && args.follow,
        },
        ..FileSourceOptions::default()
    })
}

fn build_filter(args: &Args) -> Result<Option<Arc<dyn Filter>>> {
    let mut filters: Vec<Arc<dyn Filter>> = Vec::new();
    if let Some(pattern) = &args.filter {
        if args.regex {
            let filter = RegexFilter::new(pattern, args.case_sensitive)
                .with_context(|| format!("invalid regex `{}`", pattern))?;
            filters.push(Arc::new(filter));
        } else {
            filters.push(Arc::new(SubstringFilter::new(pattern, args.case_sensitive)));
        }
    }
    if !args.levels.is_empty() {
        filters.push(Arc::new(LevelFilter::new(args.levels.iter().copied())));
    }
    Ok(match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(Arc::new(AndFilter::new(filters)) as Arc<dyn Filter>),
    })
}

/// Writes rows of the top source to stdout as they become known.
struct Printer<'a> {
    source: &'a dyn LogSource,
    names: &'a [String],
    merged: bool,
    columns: Vec<&'static Column>,
    /// Rows the consumer knows about
    known: usize,
    printed: usize,
}

impl<'a> Printer<'a> {
    fn new(source: &'a dyn LogSource, names: &'a [String], merged: bool) -> Self {
        let mut columns = vec![&RAW_CONTENT, &LOG_LEVEL];
        if merged {
            columns.push(&SOURCE_ID);
        }
        Self {
            source,
            names,
            merged,
            columns,
            known: 0,
            printed: 0,
        }
    }

    fn apply(&mut self, modification: Modification) {
        match modification {
            Modification::Reset => {
                if self.printed > 0 {
                    debug!("source was reset; printing from the start again");
                }
                self.known = 0;
                self.printed = 0;
            }
            Modification::Invalidate(section) => {
                if section.index < self.printed {
                    debug!(from = section.index, "printed rows changed; printing them again");
                    self.printed = section.index;
                }
                self.known = self.known.min(section.index);
            }
            Modification::Append(section) => self.known = section.end(),
        }
    }

    /// Print everything up to `ready`.
    fn print_until(&mut self, ready: usize, out: &mut impl Write) -> io::Result<()> {
        while self.printed < ready {
            let count = (ready - self.printed).min(PRINT_BATCH);
            let mut buffer = LogBufferArray::new(&self.columns, count);
            self.source.get_entries(
                &Section::new(self.printed, count).into(),
                &mut buffer,
                0,
                QueryOptions::allow_read(QueryOptions::DEFAULT_MAX_WAIT),
            );
            for entry in buffer.entries() {
                let line = paint(entry.raw_content(), entry.level());
                if self.merged {
                    let name = entry
                        .source_id()
                        .and_then(|id| self.names.get(id))
                        .map(String::as_str)
                        .unwrap_or("?");
                    writeln!(out, "{} {}", format!("[{}]", name).as_str().cyan(), line)?;
                } else {
                    writeln!(out, "{}", line)?;
                }
            }
            self.printed += count;
        }
        out.flush()
    }
}

fn paint(content: &str, level: Level) -> colored::ColoredString {
    match level {
        Level::Fatal => content.red().bold(),
        Level::Error => content.red(),
        Level::Warning => content.yellow(),
        Level::Debug | Level::Trace => content.dimmed(),
        Level::Info | Level::None => content.normal(),
    }
}

/// Print modifications of the printer's source as they arrive.
///
/// Without `follow` this returns once the source is fully processed and
/// every row it has was printed.
fn pump(
    printer: &mut Printer<'_>,
    receiver: &Receiver<(usize, Modification)>,
    follow: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    let top = printer.source;
    let mut last_change = Instant::now();
    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok((_, modification)) => {
                printer.apply(modification);
                while let Ok((_, modification)) = receiver.try_recv() {
                    printer.apply(modification);
                }
                last_change = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        let complete = top.properties().percentage_processed.is_complete();
        let settled = complete || last_change.elapsed() >= SETTLE_TIME;
        let ready = if settled {
            printer.known
        } else {
            printer.known.saturating_sub(1)
        };
        printer.print_until(ready, out)?;

        if !follow && complete && printer.printed == printer.known && printer.known == top.count() {
            return Ok(());
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = load_for_cli(args.config.as_deref())?;
    if let Some(policy) = args.untimestamped {
        config.untimestamped = policy;
    }

    let inputs = resolve_inputs(&args, &config)?;
    let options = file_options(&args, &config)?;
    let filter = build_filter(&args)?;

    let scheduler = Arc::new(TaskScheduler::new(config.workers).context("failed to start worker threads")?);

    // Bottom first, disposed in reverse
    let mut stages: Vec<Arc<dyn LogSource>> = Vec::new();
    let mut files: Vec<Arc<dyn LogSource>> = Vec::new();
    let mut names = Vec::new();
    for (name, path) in inputs {
        let source = FileLogSource::open(&scheduler, path, options.clone());
        source.set_name(name.clone());
        files.push(Arc::new(source));
        names.push(name);
    }
    stages.extend(files.iter().cloned());

    let merged = files.len() > 1;
    let mut top = if merged {
        let merge = MergeOptions {
            untimestamped: config.untimestamped,
            ..MergeOptions::default()
        };
        let merge_source: Arc<dyn LogSource> = Arc::new(MergedLogSource::new(&scheduler, files, merge));
        stages.push(Arc::clone(&merge_source));
        merge_source
    } else {
        files.remove(0)
    };
    if let Some(filter) = filter {
        debug!(filter = %filter.description(), "filtering");
        let filtered: Arc<dyn LogSource> =
            Arc::new(FilteredLogSource::new(&scheduler, top, filter, FilterOptions::default()));
        stages.push(Arc::clone(&filtered));
        top = filtered;
    }

    let (sender, receiver) = mpsc::channel();
    top.add_listener(QueueListener::new(0, sender), LISTENER_MAX_WAIT, LISTENER_MAX_COUNT);

    let mut printer = Printer::new(top.as_ref(), &names, merged);
    let stdout = io::stdout();
    let result = pump(&mut printer, &receiver, args.follow, &mut stdout.lock());

    for (name, file) in names.iter().zip(&stages) {
        if let Some(reason) = file.properties().empty_reason {
            warn!(source = %name, %reason, "source is empty");
        }
    }
    for stage in stages.iter().rev() {
        stage.dispose();
    }

    match result {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("failed to write to stdout"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    /// Print a single file the way `run` does without `--follow`.
    fn print_file(content: &'static str) -> String {
        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("app.log");
            fs::write(&path, content).unwrap();

            let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
            let options = FileSourceOptions {
                streaming: StreamingOptions {
                    scan_interval: Duration::from_millis(10),
                    watch: false,
                    ..StreamingOptions::default()
                },
                multiline: Some(MultiLineOptions {
                    idle_interval: Duration::from_millis(10),
                    ..MultiLineOptions::default()
                }),
                ..FileSourceOptions::default()
            };
            let source = FileLogSource::open(&scheduler, &path, options);
            let (sender, receiver) = mpsc::channel();
            source.add_listener(QueueListener::new(0, sender), LISTENER_MAX_WAIT, LISTENER_MAX_COUNT);

            let names = vec!["app.log".to_string()];
            let mut printer = Printer::new(&source, &names, false);
            let mut out = Vec::new();
            let result = pump(&mut printer, &receiver, false, &mut out);
            source.dispose();
            let _ = done.send(result.map(|_| String::from_utf8_lossy(&out).into_owned()));
        });
        finished
            .recv_timeout(Duration::from_secs(10))
            .expect("printing did not finish")
            .unwrap()
    }

    #[test]
    fn test_exits_after_unterminated_last_line() {
        let output = print_file("2024-01-15 10:30:00 INFO first\n2024-01-15 10:30:01 WARN last");
        assert!(output.contains("first"));
        assert!(output.contains("last"));
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_exits_after_untimestamped_lines() {
        let output = print_file("A\r\nB\r\nC");
        assert_eq!(output.lines().count(), 3);
        assert!(output.contains('C'));
    }
}
