use super::{LogSourceListener, Modification};
use crate::source::Section;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Batches the changes of one source for one listener.
///
/// Tracks how many rows the listener has been told about. Appends are held
/// back until `max_count` rows are pending or `max_wait` has passed since
/// the last report; Reset and Invalidate go out immediately.
pub struct ListenerNotifier {
    listener: Arc<dyn LogSourceListener>,
    max_wait: Duration,
    max_count: usize,
    reported: usize,
    last_report: Option<Instant>,
}

impl ListenerNotifier {
    /// Creating a notifier sends the listener its initial Reset.
    pub fn new(listener: Arc<dyn LogSourceListener>, max_wait: Duration, max_count: usize) -> Self {
        listener.on_modified(Modification::Reset);
        Self {
            listener,
            max_wait,
            max_count: max_count.max(1),
            reported: 0,
            last_report: None,
        }
    }

    pub fn listener(&self) -> &Arc<dyn LogSourceListener> {
        &self.listener
    }

    /// Rows the listener currently knows about
    pub fn reported(&self) -> usize {
        self.reported
    }

    /// The source now has `count` rows.
    pub fn on_read(&mut self, count: usize) {
        if count < self.reported {
            self.invalidate(count);
        }

        while count - self.reported >= self.max_count {
            self.append(self.max_count);
        }

        let pending = count - self.reported;
        let due = self
            .last_report
            .map_or(true, |at| at.elapsed() >= self.max_wait);
        if pending > 0 && due {
            self.append(pending);
        }
    }

    /// Report every pending row regardless of age.
    pub fn flush(&mut self, count: usize) {
        if count < self.reported {
            self.invalidate(count);
        }
        let pending = count - self.reported;
        if pending > 0 {
            self.append(pending);
        }
    }

    /// Rows from `first` on are stale.
    ///
    /// Rows the listener was never told about need no Invalidate.
    pub fn invalidate(&mut self, first: usize) {
        if first >= self.reported {
            return;
        }
        let section = Section::new(first, self.reported - first);
        self.listener.on_modified(Modification::Invalidate(section));
        self.reported = first;
    }

    /// All rows are gone. A listener that knows no rows is not told again.
    pub fn reset(&mut self) {
        if self.reported == 0 {
            return;
        }
        self.listener.on_modified(Modification::Reset);
        self.reported = 0;
        self.last_report = Some(Instant::now());
    }

    fn append(&mut self, count: usize) {
        let section = Section::new(self.reported, count);
        self.listener.on_modified(Modification::Append(section));
        self.reported += count;
        self.last_report = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CollectingListener;
    use std::thread;

    fn notifier(max_wait: Duration, max_count: usize) -> (Arc<CollectingListener>, ListenerNotifier) {
        let listener = CollectingListener::new();
        let notifier = ListenerNotifier::new(listener.clone(), max_wait, max_count);
        (listener, notifier)
    }

    #[test]
    fn test_construction_sends_reset() {
        let (listener, _notifier) = notifier(Duration::ZERO, 1);
        assert_eq!(listener.take(), vec![Modification::Reset]);
    }

    #[test]
    fn test_appends_in_chunks_of_max_count() {
        let (listener, mut notifier) = notifier(Duration::from_secs(3600), 1000);
        listener.take();

        notifier.on_read(2500);

        assert_eq!(
            listener.take(),
            vec![
                Modification::Append(Section::new(0, 1000)),
                Modification::Append(Section::new(1000, 1000)),
            ]
        );
        assert_eq!(notifier.reported(), 2000);
    }

    #[test]
    fn test_first_partial_batch_is_reported_immediately() {
        let (listener, mut notifier) = notifier(Duration::from_secs(3600), 1000);
        listener.take();

        notifier.on_read(3);

        assert_eq!(listener.take(), vec![Modification::Append(Section::new(0, 3))]);
    }

    #[test]
    fn test_partial_batch_waits_for_max_wait() {
        let (listener, mut notifier) = notifier(Duration::from_millis(20), 100);
        notifier.on_read(1);
        listener.take();

        notifier.on_read(5);
        assert!(listener.take().is_empty());

        thread::sleep(Duration::from_millis(30));
        notifier.on_read(5);
        assert_eq!(listener.take(), vec![Modification::Append(Section::new(1, 4))]);
    }

    #[test]
    fn test_flush_reports_pending_rows() {
        let (listener, mut notifier) = notifier(Duration::from_secs(3600), 100);
        notifier.on_read(1);
        listener.take();

        notifier.flush(7);

        assert_eq!(listener.take(), vec![Modification::Append(Section::new(1, 6))]);
    }

    #[test]
    fn test_reset_is_not_repeated() {
        let (listener, mut notifier) = notifier(Duration::ZERO, 10);
        notifier.on_read(4);
        listener.take();

        notifier.reset();
        notifier.reset();

        assert_eq!(listener.take(), vec![Modification::Reset]);
        assert_eq!(notifier.reported(), 0);
    }

    #[test]
    fn test_invalidate_truncates_and_rows_are_appended_again() {
        let (listener, mut notifier) = notifier(Duration::ZERO, 100);
        notifier.on_read(10);
        listener.take();

        notifier.invalidate(8);
        notifier.on_read(12);

        assert_eq!(
            listener.take(),
            vec![
                Modification::Invalidate(Section::new(8, 2)),
                Modification::Append(Section::new(8, 4)),
            ]
        );
    }

    #[test]
    fn test_invalidate_of_unreported_rows_is_silent() {
        let (listener, mut notifier) = notifier(Duration::from_secs(3600), 100);
        notifier.on_read(2);
        listener.take();

        notifier.invalidate(5);

        assert!(listener.take().is_empty());
        assert_eq!(notifier.reported(), 2);
    }

    #[test]
    fn test_shrinking_count_invalidates() {
        let (listener, mut notifier) = notifier(Duration::ZERO, 100);
        notifier.on_read(5);
        listener.take();

        notifier.on_read(3);

        assert_eq!(listener.take(), vec![Modification::Invalidate(Section::new(3, 2))]);
    }
}
