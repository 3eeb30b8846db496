//! Host-side clocks mirroring running script timers.
//!
//! Each running `ZTimer` gets a thread that wakes every tick, writes the
//! timer's `Elapsed`/`Remaining` fields through the guard, and hands the timer
//! to a fire callback once `Remaining` reaches zero.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::objects::Timer;

pub(crate) type FireCallback = Arc<dyn Fn(Timer) + Send + Sync>;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps up to `tick`; true once stopped.
    fn wait(&self, tick: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, tick);
        }
        *stopped
    }
}

struct TimerHandle {
    generation: u64,
    signal: Arc<StopSignal>,
}

type Handles = Arc<Mutex<HashMap<i64, TimerHandle>>>;

pub(crate) struct TimerRegistry {
    timers: Handles,
    generation: AtomicU64,
    tick: Duration,
}

impl TimerRegistry {
    pub(crate) fn new(tick: Duration) -> Self {
        TimerRegistry {
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            tick,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub(crate) fn is_running(&self, index: i64) -> bool {
        self.timers.lock().contains_key(&index)
    }

    /// Starts (or restarts) the clock for `timer` from its current
    /// `Remaining`/`Elapsed` fields.
    pub(crate) fn start(&self, timer: Timer, on_fire: FireCallback) -> Result<()> {
        let Some(index) = timer.index() else {
            warn!("timer without an index cannot be scheduled");
            return Ok(());
        };
        let clock = Clock {
            remaining: timer.remaining()?,
            elapsed: timer.elapsed()?,
            tick: self.tick,
            signal: Arc::new(StopSignal::default()),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        };

        let previous = self.timers.lock().insert(
            index,
            TimerHandle {
                generation: clock.generation,
                signal: clock.signal.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.signal.stop();
        }

        let timers = self.timers.clone();
        let remaining = clock.remaining;
        let spawned = thread::Builder::new()
            .name(format!("wherigo-timer-{index}"))
            .spawn(move || clock.run(index, timer, timers, on_fire));
        if let Err(err) = spawned {
            self.timers.lock().remove(&index);
            return Err(err.into());
        }
        debug!("timer #{index} started with {remaining:?} remaining");
        Ok(())
    }

    /// Removes the timer from the registry and stops its clock. Idempotent;
    /// the clock thread is signalled, not joined.
    pub(crate) fn stop(&self, index: i64) {
        let handle = self.timers.lock().remove(&index);
        if let Some(handle) = handle {
            handle.signal.stop();
            debug!("timer #{index} stopped");
        }
    }

    pub(crate) fn stop_all(&self) {
        let handles: Vec<TimerHandle> = self
            .timers
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.signal.stop();
        }
    }
}

struct Clock {
    remaining: Duration,
    elapsed: Duration,
    tick: Duration,
    signal: Arc<StopSignal>,
    generation: u64,
}

impl Clock {
    fn run(self, index: i64, timer: Timer, timers: Handles, on_fire: FireCallback) {
        let started = Instant::now();
        let fired = loop {
            if self.signal.wait(self.tick) {
                break false;
            }
            let since = started.elapsed();
            let remaining = self.remaining.saturating_sub(since);
            let elapsed = self.elapsed.saturating_add(since.min(self.remaining));
            if self.signal.is_stopped() {
                break false;
            }
            let container = timer.container();
            let written = container
                .set("Elapsed", elapsed.as_secs_f64())
                .and_then(|()| container.set("Remaining", remaining.as_secs_f64()));
            if let Err(err) = written {
                debug!("timer #{index} clock stopped: {err}");
                break false;
            }
            if container.guard().is_disposed() {
                break false;
            }
            if remaining.is_zero() {
                break true;
            }
        };

        {
            let mut timers = timers.lock();
            if timers
                .get(&index)
                .is_some_and(|handle| handle.generation == self.generation)
            {
                timers.remove(&index);
            }
        }
        if fired {
            on_fire(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TimerRegistry;
    use crate::data::ObjectFactory;
    use crate::lua_host::{GuardPolicy, LuaGuard};
    use crate::objects::Timer;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn timer(duration: f64) -> Timer {
        let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
        let script = format!(
            "return {{ ClassName = 'ZTimer', ObjIndex = 4, Duration = {duration}, \
             Remaining = {duration}, Elapsed = 0 }}"
        );
        let table = guard.load(script.as_bytes(), "timer").expect("chunk");
        let factory = ObjectFactory::new(guard);
        let table = table[0].as_table().expect("table").clone();
        match factory.resolve(&table).expect("resolve") {
            crate::objects::Entity::Timer(timer) => timer,
            other => panic!("expected timer, got {other:?}"),
        }
    }

    #[test]
    fn clock_fires_once_remaining_reaches_zero() {
        let registry = TimerRegistry::new(Duration::from_millis(5));
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        registry
            .start(
                timer(0.02),
                Arc::new(move |timer: Timer| {
                    let _ = tx.lock().send(timer.index());
                }),
            )
            .expect("start");
        let fired = rx.recv_timeout(Duration::from_secs(5)).expect("fired");
        assert_eq!(fired, Some(4));
        assert!(!registry.is_running(4));
    }

    #[test]
    fn stopped_clock_never_fires() {
        let registry = TimerRegistry::new(Duration::from_millis(5));
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        registry
            .start(
                timer(60.0),
                Arc::new(move |timer: Timer| {
                    let _ = tx.lock().send(timer.index());
                }),
            )
            .expect("start");
        assert_eq!(registry.len(), 1);
        registry.stop(4);
        registry.stop(4);
        assert_eq!(registry.len(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
