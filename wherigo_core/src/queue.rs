//! Single-worker FIFO runner for calls into game logic.
//!
//! Jobs run one at a time on a dedicated thread in submission order. The
//! worker is started lazily on the first submission and parks while idle.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;
type BusyListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    running: bool,
    busy: bool,
    closed: bool,
    worker_alive: bool,
    worker_id: Option<ThreadId>,
}

struct QueueShared {
    state: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    listeners: Mutex<Vec<BusyListener>>,
    published: Mutex<bool>,
    yield_delay: Duration,
}

pub struct ExecutionQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionQueue {
    pub fn new(yield_delay: Duration) -> Self {
        ExecutionQueue {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState::default()),
                wake: Condvar::new(),
                idle: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                published: Mutex::new(false),
                yield_delay,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Enqueues `job` and returns immediately.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let needs_worker = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EngineError::QueueClosed);
            }
            state.jobs.push_back(Box::new(job));
            state.busy = true;
            let needs_worker = !state.worker_alive;
            if needs_worker {
                state.worker_alive = true;
            } else {
                self.shared.wake.notify_one();
            }
            needs_worker
        };
        self.shared.publish_busy();
        if needs_worker {
            self.spawn_worker()?;
        }
        Ok(())
    }

    fn spawn_worker(&self) -> Result<()> {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("wherigo-exec".to_string())
            .spawn(move || worker_loop(shared));
        match spawned {
            Ok(handle) => {
                let previous = self.worker.lock().replace(handle);
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
                Ok(())
            }
            Err(err) => {
                self.shared.state.lock().worker_alive = false;
                Err(EngineError::Io(err))
            }
        }
    }

    /// Blocks until the queue is empty and the worker idle.
    pub fn drain_and_wait(&self) -> Result<()> {
        self.wait_idle(None)
    }

    /// Like [`ExecutionQueue::drain_and_wait`] but gives up after `timeout`.
    pub fn drain_and_wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_idle(Some(timeout))
    }

    fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock();
        if state.worker_id == Some(thread::current().id()) {
            return Err(EngineError::DrainFromWorker);
        }
        while !state.closed && (state.running || !state.jobs.is_empty()) {
            match deadline {
                Some(deadline) => {
                    if self.shared.idle.wait_until(&mut state, deadline).timed_out()
                        && (state.running || !state.jobs.is_empty())
                    {
                        return Err(EngineError::DrainTimeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.shared.idle.wait(&mut state),
            }
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().busy
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// True when called from inside a running job.
    pub fn is_worker_thread(&self) -> bool {
        self.shared.state.lock().worker_id == Some(thread::current().id())
    }

    /// Registers a callback fired whenever the aggregate busy state flips.
    /// Listeners run on the thread that caused the flip and must not submit.
    pub fn on_busy_changed(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Arc::new(listener));
    }

    /// Closes the queue, drops pending jobs and joins the worker. A job that
    /// is already running finishes first.
    pub fn dispose(&self) {
        let (dropped, own_worker) = {
            let mut state = self.shared.state.lock();
            let dropped = std::mem::take(&mut state.jobs);
            state.closed = true;
            state.busy = false;
            self.shared.wake.notify_all();
            self.shared.idle.notify_all();
            (dropped, state.worker_id == Some(thread::current().id()))
        };
        if !dropped.is_empty() {
            debug!("execution queue dropped {} pending job(s)", dropped.len());
        }
        drop(dropped);
        self.shared.publish_busy();
        if own_worker {
            return;
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("execution queue worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl QueueShared {
    /// Reports the current busy state to listeners if it differs from what
    /// they last saw. Serialised so listeners always observe alternating
    /// transitions.
    fn publish_busy(&self) {
        let mut published = self.published.lock();
        let busy = self.state.lock().busy;
        if *published == busy {
            return;
        }
        *published = busy;
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(busy);
        }
    }
}

fn worker_loop(shared: Arc<QueueShared>) {
    shared.state.lock().worker_id = Some(thread::current().id());
    let mut chained = false;
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.closed {
                    state.worker_alive = false;
                    state.worker_id = None;
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    state.running = true;
                    break job;
                }
                chained = false;
                let went_idle = state.busy;
                state.busy = false;
                shared.idle.notify_all();
                if went_idle {
                    drop(state);
                    shared.publish_busy();
                    state = shared.state.lock();
                    continue;
                }
                shared.wake.wait(&mut state);
            }
        };

        if chained && !shared.yield_delay.is_zero() {
            thread::sleep(shared.yield_delay);
        }
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("execution queue job panicked");
        }
        chained = true;

        let mut state = shared.state.lock();
        state.running = false;
        if state.jobs.is_empty() {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionQueue;
    use crate::error::EngineError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["A", "B", "C"] {
            let log = log.clone();
            queue.submit(move || log.lock().push(name)).expect("submit");
        }
        queue.drain_and_wait().expect("drain");
        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
    }

    #[test]
    fn drain_waits_for_running_job() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        queue
            .submit(move || {
                std::thread::sleep(Duration::from_millis(50));
                flag.store(1, Ordering::SeqCst);
            })
            .expect("submit");
        queue.drain_and_wait().expect("drain");
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_from_worker_fails_fast() {
        let queue = Arc::new(ExecutionQueue::new(Duration::ZERO));
        let (tx, rx) = mpsc::channel();
        let inner = queue.clone();
        queue
            .submit(move || {
                let outcome = inner.drain_and_wait();
                tx.send(matches!(outcome, Err(EngineError::DrainFromWorker)))
                    .expect("send");
            })
            .expect("submit");
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("job ran"));
        queue.drain_and_wait().expect("drain");
    }

    #[test]
    fn drain_timeout_reports_stuck_job() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        queue
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .expect("submit");
        let outcome = queue.drain_and_wait_timeout(Duration::from_millis(30));
        assert!(matches!(outcome, Err(EngineError::DrainTimeout(_))));
        release_tx.send(()).expect("release");
        queue.drain_and_wait().expect("drain");
    }

    #[test]
    fn busy_listener_fires_on_transitions_only() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        queue.on_busy_changed(move |busy| sink.lock().push(busy));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        queue
            .submit(move || {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            })
            .expect("submit");
        queue.submit(|| {}).expect("submit");
        queue.submit(|| {}).expect("submit");
        gate_tx.send(()).expect("open gate");
        queue.drain_and_wait().expect("drain");
        for _ in 0..100 {
            if transitions.lock().len() >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*transitions.lock(), vec![true, false]);
    }

    #[test]
    fn dispose_discards_pending_and_closes() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let first = log.clone();
        queue
            .submit(move || {
                started_tx.send(()).expect("signal start");
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                first.lock().push("A");
            })
            .expect("submit");
        for name in ["B", "C"] {
            let log = log.clone();
            queue.submit(move || log.lock().push(name)).expect("submit");
        }
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first job started");
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = gate_tx.send(());
        });
        queue.dispose();
        releaser.join().expect("releaser");
        assert_eq!(*log.lock(), vec!["A"]);
        assert!(matches!(queue.submit(|| {}), Err(EngineError::QueueClosed)));
        queue.dispose();
        assert!(queue.is_closed());
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let queue = ExecutionQueue::new(Duration::ZERO);
        let ran = Arc::new(AtomicUsize::new(0));
        queue.submit(|| panic!("script host bug")).expect("submit");
        let counter = ran.clone();
        queue
            .submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
        queue.drain_and_wait().expect("drain");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
