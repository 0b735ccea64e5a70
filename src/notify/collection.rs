use super::{same_listener, LogSourceListener, ListenerNotifier};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// The listener registry of one source
#[derive(Default)]
pub struct ListenerCollection {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    notifiers: Vec<ListenerNotifier>,
    count: usize,
}

impl ListenerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It is told Reset, then one Append covering the
    /// rows that already exist.
    pub fn add_listener(&self, listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) {
        let mut inner = self.inner.lock();
        if inner.notifiers.iter().any(|n| same_listener(n.listener(), &listener)) {
            return;
        }
        let mut notifier = ListenerNotifier::new(listener, max_wait, max_count);
        notifier.flush(inner.count);
        inner.notifiers.push(notifier);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LogSourceListener>) {
        self.inner
            .lock()
            .notifiers
            .retain(|n| !same_listener(n.listener(), listener));
    }

    /// The source now holds `count` rows.
    pub fn on_read(&self, count: usize) {
        let mut inner = self.inner.lock();
        inner.count = count;
        for notifier in &mut inner.notifiers {
            notifier.on_read(count);
        }
    }

    /// Rows from `first` on changed; the source now holds `first` rows until
    /// the next [`ListenerCollection::on_read`].
    pub fn invalidate(&self, first: usize) {
        let mut inner = self.inner.lock();
        inner.count = inner.count.min(first);
        for notifier in &mut inner.notifiers {
            notifier.invalidate(first);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.count = 0;
        for notifier in &mut inner.notifiers {
            notifier.reset();
        }
    }

    /// Deliver appends whose batching delay ran out without a new read.
    pub fn tick(&self) {
        let mut inner = self.inner.lock();
        let count = inner.count;
        for notifier in &mut inner.notifiers {
            notifier.on_read(count);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Report pending rows to every listener now.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let count = inner.count;
        for notifier in &mut inner.notifiers {
            notifier.flush(count);
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.notifiers.clear();
        inner.count = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
