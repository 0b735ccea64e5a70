//! Shared pool that runs periodic units of work.
//!
//! Every pipeline stage registers one or more units here instead of owning a
//! thread. A unit returns how long to wait before its next run;
//! `Duration::ZERO` means "I did work, run me again right away".

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Delay applied to a unit after it panicked
const PANIC_RETRY_DELAY: Duration = Duration::from_millis(100);

type Unit = Box<dyn FnMut() -> Duration + Send>;

thread_local! {
    static CURRENT_TASK: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Handle to a unit registered with [`TaskScheduler::start_periodic`]
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Wakes one unit without keeping its scheduler alive
#[derive(Clone)]
pub struct UnitWaker {
    scheduler: Weak<TaskScheduler>,
    handle: TaskHandle,
}

impl UnitWaker {
    pub fn new(scheduler: &Arc<TaskScheduler>, handle: &TaskHandle) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
            handle: handle.clone(),
        }
    }

    pub fn wake(&self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.wake(&self.handle);
        }
    }
}

struct Slot {
    name: Arc<str>,
    /// None while the unit is executing on a worker
    unit: Option<Unit>,
    running: bool,
    stopped: bool,
    wake_requested: bool,
    /// Sequence number of the queue entry that is allowed to run this unit
    due: u64,
}

#[derive(Default)]
struct State {
    tasks: HashMap<u64, Slot>,
    queue: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    next_id: u64,
    next_seq: u64,
    shutdown: bool,
}

impl State {
    fn schedule(&mut self, id: u64, at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(slot) = self.tasks.get_mut(&id) {
            slot.due = seq;
            self.queue.push(Reverse((at, seq, id)));
        }
    }
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
    run_finished: Condvar,
}

/// Fixed-size worker pool executing periodic units
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
}

impl TaskScheduler {
    /// Start a scheduler with `workers` threads (at least one).
    pub fn new(workers: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            work_available: Condvar::new(),
            run_finished: Condvar::new(),
        });

        let mut handles = Vec::new();
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("tailsource-worker-{}", i))
                .spawn(move || worker_loop(shared))?;
            handles.push(handle);
        }
        let worker_ids = handles.iter().map(|h| h.thread().id()).collect();

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
            worker_ids,
        })
    }

    /// Register a unit; its first run happens as soon as a worker is free.
    pub fn start_periodic<F>(&self, name: &str, unit: F) -> TaskHandle
    where
        F: FnMut() -> Duration + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name);
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.insert(
            id,
            Slot {
                name: Arc::clone(&name),
                unit: Some(Box::new(unit)),
                running: false,
                stopped: false,
                wake_requested: false,
                due: 0,
            },
        );
        state.schedule(id, Instant::now());
        drop(state);
        self.shared.work_available.notify_one();

        debug!(task = %name, "started periodic unit");
        TaskHandle { id, name }
    }

    /// Run an idle unit right away instead of waiting for its delay.
    ///
    /// If the unit is currently executing it is re-run as soon as it returns.
    pub fn wake(&self, handle: &TaskHandle) {
        let mut state = self.shared.state.lock();
        let Some(slot) = state.tasks.get_mut(&handle.id) else {
            return;
        };
        if slot.stopped {
            return;
        }
        if slot.running {
            slot.wake_requested = true;
            return;
        }
        state.schedule(handle.id, Instant::now());
        drop(state);
        self.shared.work_available.notify_one();
    }

    /// Remove a unit.
    ///
    /// Blocks until an in-flight run of the unit has returned, except when
    /// called from inside that very unit.
    pub fn stop_periodic(&self, handle: &TaskHandle) {
        let mut state = self.shared.state.lock();
        let Some(slot) = state.tasks.get_mut(&handle.id) else {
            return;
        };
        slot.stopped = true;

        if !slot.running {
            let removed = state.tasks.remove(&handle.id);
            MutexGuard::unlocked(&mut state, || drop(removed));
            debug!(task = %handle.name, "stopped periodic unit");
            return;
        }

        if CURRENT_TASK.with(|current| current.get()) == Some(handle.id) {
            return;
        }

        while state
            .tasks
            .get(&handle.id)
            .is_some_and(|slot| slot.running)
        {
            self.shared.run_finished.wait(&mut state);
        }
        debug!(task = %handle.name, "stopped periodic unit");
    }

    /// Number of registered units
    pub fn task_count(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_available.notify_all();

        if self.worker_ids.contains(&thread::current().id()) {
            return;
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }

        let Some(&Reverse((at, seq, id))) = state.queue.peek() else {
            shared.work_available.wait(&mut state);
            continue;
        };
        if at > Instant::now() {
            shared.work_available.wait_until(&mut state, at);
            continue;
        }
        state.queue.pop();

        let Some(slot) = state.tasks.get_mut(&id) else {
            continue;
        };
        if slot.due != seq || slot.stopped || slot.running {
            continue;
        }
        let Some(mut unit) = slot.unit.take() else {
            continue;
        };
        slot.running = true;
        slot.wake_requested = false;
        let name = Arc::clone(&slot.name);

        let delay = MutexGuard::unlocked(&mut state, || {
            CURRENT_TASK.with(|current| current.set(Some(id)));
            let result = catch_unwind(AssertUnwindSafe(&mut unit));
            CURRENT_TASK.with(|current| current.set(None));
            match result {
                Ok(delay) => delay,
                Err(_) => {
                    error!(task = %name, "periodic unit panicked, retrying later");
                    PANIC_RETRY_DELAY
                }
            }
        });

        let mut retired = None;
        match state.tasks.get_mut(&id) {
            Some(slot) if !slot.stopped => {
                slot.running = false;
                slot.unit = Some(unit);
                let at = if slot.wake_requested || delay.is_zero() {
                    Instant::now()
                } else {
                    Instant::now() + delay
                };
                slot.wake_requested = false;
                state.schedule(id, at);
            }
            _ => {
                state.tasks.remove(&id);
                retired = Some(unit);
                debug!(task = %name, "retired periodic unit");
            }
        }
        shared.run_finished.notify_all();

        // Dropping a unit may release the last reference to its stage.
        if retired.is_some() {
            MutexGuard::unlocked(&mut state, || drop(retired));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_unit_runs_repeatedly() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler.start_periodic("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        });

        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 10));
        scheduler.stop_periodic(&handle);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_stop_prevents_further_runs() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler.start_periodic("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Duration::from_millis(1)
        });

        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 2));
        scheduler.stop_periodic(&handle);
        let after_stop = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_wake_runs_idle_unit_early() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler.start_periodic("sleepy", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Duration::from_secs(3600)
        });

        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 1));
        scheduler.wake(&handle);
        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 2));
        scheduler.stop_periodic(&handle);
    }

    #[test]
    fn test_panicking_unit_is_retried() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler.start_periodic("panics", move || {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            if run == 0 {
                panic!("first run fails");
            }
            Duration::from_millis(1)
        });

        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 2));
        scheduler.stop_periodic(&handle);
    }

    #[test]
    fn test_stop_from_inside_unit() {
        let scheduler = Arc::new(TaskScheduler::new(1).unwrap());
        let slot: Arc<Mutex<Option<TaskHandle>>> = Arc::new(Mutex::new(None));
        let runs = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::downgrade(&scheduler);
        let inner_slot = Arc::clone(&slot);
        let counter = Arc::clone(&runs);
        let handle = scheduler.start_periodic("self-stopping", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if let (Some(scheduler), Some(handle)) =
                (inner_scheduler.upgrade(), inner_slot.lock().clone())
            {
                scheduler.stop_periodic(&handle);
            }
            Duration::ZERO
        });
        *slot.lock() = Some(handle);

        assert!(wait_for(|| scheduler.task_count() == 0));
        let total = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), total);
    }
}
