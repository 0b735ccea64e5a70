use crate::source::Section;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rows a read request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRows {
    Contiguous(Section),
    Fragmented(Vec<usize>),
}

impl RequestRows {
    pub fn len(&self) -> usize {
        match self {
            RequestRows::Contiguous(section) => section.count,
            RequestRows::Fragmented(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            RequestRows::Contiguous(section) => Box::new(section.rows()),
            RequestRows::Fragmented(rows) => Box::new(rows.iter().copied()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug)]
struct State {
    status: Status,
    lines: Vec<Option<String>>,
}

/// A batch of lines queued for the read unit of a streaming source.
///
/// The reader completes it, the caller waits for it. Whichever of
/// [`complete`](Self::complete) and a timed out [`wait`](Self::wait) gets
/// the lock first decides the outcome; results arriving after a
/// cancellation are dropped.
#[derive(Debug)]
pub struct ReadRequest {
    rows: RequestRows,
    state: Mutex<State>,
    done: Condvar,
}

impl ReadRequest {
    pub fn new(rows: RequestRows) -> Arc<Self> {
        Arc::new(Self {
            rows,
            state: Mutex::new(State {
                status: Status::Pending,
                lines: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    pub fn contiguous(section: Section) -> Arc<Self> {
        Self::new(RequestRows::Contiguous(section))
    }

    pub fn fragmented(rows: Vec<usize>) -> Arc<Self> {
        Self::new(RequestRows::Fragmented(rows))
    }

    pub fn rows(&self) -> &RequestRows {
        &self.rows
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().status == Status::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().status == Status::Cancelled
    }

    /// Store the lines read, one per requested row.
    ///
    /// Returns false when the request was already cancelled or completed.
    pub fn complete(&self, lines: Vec<Option<String>>) -> bool {
        let mut state = self.state.lock();
        if state.status != Status::Pending {
            return false;
        }
        state.status = Status::Completed;
        state.lines = lines;
        self.done.notify_all();
        true
    }

    /// Give up on the request; later results are discarded.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.status == Status::Pending {
            state.status = Status::Cancelled;
            self.done.notify_all();
        }
    }

    /// Block until the request completes or `timeout` passes.
    ///
    /// On timeout the request is cancelled and `None` returned.
    pub fn wait(&self, timeout: Duration) -> Option<Vec<Option<String>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.status == Status::Pending {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match state.status {
            Status::Completed => Some(std::mem::take(&mut state.lines)),
            Status::Pending => {
                state.status = Status::Cancelled;
                None
            }
            Status::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rows_iterate_in_order() {
        let contiguous = RequestRows::Contiguous(Section::new(3, 2));
        assert_eq!(contiguous.iter().collect::<Vec<_>>(), vec![3, 4]);

        let fragmented = RequestRows::Fragmented(vec![7, 1]);
        assert_eq!(fragmented.iter().collect::<Vec<_>>(), vec![7, 1]);
        assert_eq!(fragmented.len(), 2);
    }

    #[test]
    fn test_wait_returns_completed_lines() {
        let request = ReadRequest::contiguous(Section::new(0, 1));
        let reader = request.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            reader.complete(vec![Some("line".to_string())])
        });

        let lines = request.wait(Duration::from_secs(5));
        assert_eq!(lines, Some(vec![Some("line".to_string())]));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_timeout_cancels_and_discards_late_result() {
        let request = ReadRequest::fragmented(vec![0]);
        assert_eq!(request.wait(Duration::from_millis(10)), None);
        assert!(request.is_cancelled());
        assert!(!request.complete(vec![Some("late".to_string())]));
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let request = ReadRequest::fragmented(vec![0]);
        let other = request.clone();
        let handle = thread::spawn(move || other.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        request.cancel();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_complete_only_once() {
        let request = ReadRequest::fragmented(vec![0]);
        assert!(request.complete(vec![None]));
        assert!(!request.complete(vec![Some("again".to_string())]));
        assert!(!request.is_pending());
    }
}
