use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use wherigo_core::{EngineError, ExecutionQueue, GuardPolicy, LuaGuard, ScriptValue};

#[test]
fn interpreter_access_is_mutually_exclusive() {
    let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
    guard.set_global("counter", 0_i64).expect("seed");
    let inside = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let guard = guard.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    guard
                        .with_lua(|lua| {
                            assert!(!inside.swap(true, Ordering::SeqCst), "overlapping access");
                            let counter: i64 = lua.globals().get("counter")?;
                            thread::yield_now();
                            lua.globals().set("counter", counter + 1)?;
                            inside.store(false, Ordering::SeqCst);
                            Ok(())
                        })
                        .expect("increment");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let counter = guard.global("counter").expect("read");
    assert_eq!(counter.as_f64(), Some(400.0));
}

#[test]
fn nested_access_on_one_thread_is_allowed() {
    let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
    let inner = guard.clone();
    let hook = guard
        .create_function(move |_| {
            let value = inner.global("answer")?;
            Ok(vec![value])
        })
        .expect("hook");
    guard.set_global("lookup", hook).expect("publish");
    guard.set_global("answer", 42_i64).expect("seed");
    let results = guard.load(b"return lookup()", "nested").expect("call");
    assert_eq!(results.first().and_then(ScriptValue::as_f64), Some(42.0));
}

#[test]
fn per_producer_order_survives_concurrent_submission() {
    let queue = Arc::new(ExecutionQueue::new(Duration::ZERO));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let queue = queue.clone();
            let seen = seen.clone();
            thread::spawn(move || {
                for step in 0..25 {
                    let seen = seen.clone();
                    queue
                        .submit(move || seen.lock().push((producer, step)))
                        .expect("submit");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }
    queue.drain_and_wait().expect("drain");

    let seen = seen.lock();
    assert_eq!(seen.len(), 100);
    for producer in 0..4 {
        let steps: Vec<i32> = seen
            .iter()
            .filter(|(owner, _)| *owner == producer)
            .map(|(_, step)| *step)
            .collect();
        assert_eq!(steps, (0..25).collect::<Vec<_>>());
    }
}

#[test]
fn drain_is_a_barrier_for_other_threads() {
    let queue = Arc::new(ExecutionQueue::new(Duration::ZERO));
    let finished = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let finished = finished.clone();
        queue
            .submit(move || {
                thread::sleep(Duration::from_millis(2));
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
    }

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                queue.drain_and_wait().expect("drain");
                finished.load(Ordering::SeqCst)
            })
        })
        .collect();
    for waiter in waiters {
        assert_eq!(waiter.join().expect("waiter"), 10);
    }
}

#[test]
fn draining_from_a_job_is_refused() {
    let queue = Arc::new(ExecutionQueue::new(Duration::ZERO));
    let outcome = Arc::new(Mutex::new(None));
    let inner = queue.clone();
    let slot = outcome.clone();
    queue
        .submit(move || {
            *slot.lock() = Some(inner.drain_and_wait());
        })
        .expect("submit");
    queue.drain_and_wait().expect("drain");
    let outcome = outcome.lock().take().expect("job ran");
    assert!(matches!(outcome, Err(EngineError::DrainFromWorker)));
}
