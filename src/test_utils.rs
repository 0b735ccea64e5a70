use crate::notify::{LogSourceListener, Modification};
use crate::scheduler::TaskScheduler;
use crate::source::{LogSource, QueryOptions, Section};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Listener that records every modification it receives.
#[derive(Default)]
pub struct CollectingListener {
    modifications: Mutex<Vec<Modification>>,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything received since the last call.
    pub fn take(&self) -> Vec<Modification> {
        std::mem::take(&mut *self.modifications.lock())
    }

    pub fn snapshot(&self) -> Vec<Modification> {
        self.modifications.lock().clone()
    }

    /// Row count a consumer would arrive at by applying everything received.
    pub fn model(&self) -> RowCountModel {
        let mut model = RowCountModel::default();
        for modification in self.snapshot() {
            model.apply(modification);
        }
        model
    }
}

impl LogSourceListener for CollectingListener {
    fn on_modified(&self, modification: Modification) {
        self.modifications.lock().push(modification);
    }
}

/// What a consumer knows about a source, built from modifications only.
///
/// Panics when an Append does not start at the known count, which is the
/// contract every source must uphold.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RowCountModel {
    pub count: usize,
    pub resets: usize,
    pub invalidations: Vec<Section>,
}

impl RowCountModel {
    pub fn apply(&mut self, modification: Modification) {
        match modification {
            Modification::Reset => {
                self.count = 0;
                self.resets += 1;
            }
            Modification::Invalidate(section) => {
                assert_eq!(
                    section.end(),
                    self.count,
                    "invalidation {} must cover the tail of {} rows",
                    section,
                    self.count
                );
                self.count = section.index;
                self.invalidations.push(section);
            }
            Modification::Append(section) => {
                assert_eq!(
                    section.index, self.count,
                    "append {} must start at the known count {}",
                    section, self.count
                );
                self.count = section.end();
            }
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn scheduler() -> Arc<TaskScheduler> {
    Arc::new(TaskScheduler::new(2).expect("failed to start scheduler"))
}

/// Wait until `source` has processed everything it can see.
pub fn wait_for_complete(source: &dyn LogSource) -> bool {
    wait_until(|| source.properties().percentage_processed.is_complete())
}

pub fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Raw content of every row, read with a long wait.
pub fn read_all_content(source: &dyn LogSource) -> Vec<String> {
    use crate::buffer::{column::RAW_CONTENT, ColumnValues};
    use crate::source::Rows;

    let count = source.count();
    let mut values = ColumnValues::new(&RAW_CONTENT, count);
    source.get_column(
        &Rows::Section(Section::new(0, count)),
        &RAW_CONTENT,
        &mut values,
        0,
        QueryOptions::allow_read(Duration::from_secs(5)),
    );
    values.as_text().map(<[String]>::to_vec).unwrap_or_default()
}
