//! Change notification between stages.
//!
//! Changes travel as plain [`Modification`] values. A source keeps a
//! [`ListenerCollection`]; every registered listener gets its own
//! [`ListenerNotifier`] that batches appends by size and age.

pub mod collection;
pub mod notifier;

pub use collection::ListenerCollection;
pub use notifier::ListenerNotifier;

use crate::scheduler::UnitWaker;
use crate::source::Section;
use parking_lot::Mutex;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// What changed in a source since the listener's last notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modification {
    /// Everything the listener knows is gone
    Reset,
    /// The rows from `section.index` on are stale. The listener's row count
    /// drops to `section.index`; rows that still exist are announced again
    /// by a following Append.
    Invalidate(Section),
    /// `section.count` new rows starting at the listener's current count
    Append(Section),
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modification::Reset => f.write_str("Reset"),
            Modification::Invalidate(section) => write!(f, "Invalidate {}", section),
            Modification::Append(section) => write!(f, "Append {}", section),
        }
    }
}

/// Receives modifications of a source.
///
/// Called on the source's own worker, possibly with internal locks held:
/// implementations must return quickly and must not call back into the source.
pub trait LogSourceListener: Send + Sync {
    fn on_modified(&self, modification: Modification);
}

impl LogSourceListener for Mutex<Sender<Modification>> {
    fn on_modified(&self, modification: Modification) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.lock().send(modification);
    }
}

/// Forwards modifications of one upstream, tagged with its position, into
/// a stage's queue and wakes the stage's unit.
pub struct QueueListener {
    tag: usize,
    sender: Mutex<Sender<(usize, Modification)>>,
    waker: Mutex<Option<UnitWaker>>,
}

impl QueueListener {
    pub fn new(tag: usize, sender: Sender<(usize, Modification)>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            sender: Mutex::new(sender),
            waker: Mutex::new(None),
        })
    }

    /// Wake this unit whenever a modification arrives.
    pub fn wake_on_modification(&self, waker: UnitWaker) {
        *self.waker.lock() = Some(waker);
    }
}

impl LogSourceListener for QueueListener {
    fn on_modified(&self, modification: Modification) {
        if self.sender.lock().send((self.tag, modification)).is_err() {
            return;
        }
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.wake();
        }
    }
}

/// Identity comparison for listener handles
pub fn same_listener(a: &Arc<dyn LogSourceListener>, b: &Arc<dyn LogSourceListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_queue_listener_tags_modifications() {
        let (tx, rx) = mpsc::channel();
        let listener = QueueListener::new(3, tx);
        listener.on_modified(Modification::Append(Section::new(0, 2)));

        assert_eq!(rx.try_recv().unwrap(), (3, Modification::Append(Section::new(0, 2))));
    }

    #[test]
    fn test_same_listener_compares_identity() {
        let (tx, _rx) = mpsc::channel();
        let a: Arc<dyn LogSourceListener> = Arc::new(Mutex::new(tx.clone()));
        let b: Arc<dyn LogSourceListener> = Arc::new(Mutex::new(tx));
        assert!(same_listener(&a, &a.clone()));
        assert!(!same_listener(&a, &b));
    }

    #[test]
    fn test_display() {
        assert_eq!(Modification::Append(Section::new(2, 3)).to_string(), "Append #2..#5");
        assert_eq!(Modification::Reset.to_string(), "Reset");
    }
}
