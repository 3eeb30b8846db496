//! Boundary contracts the host application implements.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Sender};
use std::thread;

use log::error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::ObjectGraph;

/// A WGS84 position.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

/// Supplies cartridge payloads. Parsing the container format lives outside
/// the core.
pub trait CartridgeResources: Send + Sync {
    /// Compiled (or source) script run at `Init`.
    fn script(&self) -> anyhow::Result<Vec<u8>>;

    /// Raw bytes of the media object with the given index, if present.
    fn media(&self, index: i64) -> anyhow::Result<Option<Vec<u8>>>;

    /// Chunk name used in interpreter error messages.
    fn chunk_name(&self) -> String {
        "cartridge".to_string()
    }
}

/// Persists and restores the object graph. Only ever called once the
/// interpreter-side `OnSync` / before `OnRestore` hooks have settled.
pub trait SaveSerializer: Send + Sync {
    fn save(&self, graph: &ObjectGraph, out: &mut dyn Write) -> anyhow::Result<()>;

    fn restore(&self, graph: &ObjectGraph, input: &mut dyn Read) -> anyhow::Result<()>;
}

/// Geospatial primitives.
pub trait GeoMath: Send + Sync {
    /// Distance in meters and initial bearing in degrees from `from` to `to`.
    fn vector(&self, from: GeoPoint, to: GeoPoint) -> (f64, f64);

    /// Whether `point` lies inside the closed polygon.
    fn contains(&self, polygon: &[GeoPoint], point: GeoPoint) -> bool;

    /// Distance and bearing from `point` to the nearest polygon edge.
    fn vector_to_polygon(&self, polygon: &[GeoPoint], point: GeoPoint) -> (f64, f64) {
        polygon
            .iter()
            .map(|vertex| self.vector(point, *vertex))
            .min_by(|left, right| left.0.total_cmp(&right.0))
            .unwrap_or((f64::INFINITY, 0.0))
    }
}

pub type UiCallback = Box<dyn FnOnce() + Send + 'static>;

/// "Run this on the UI-affine thread."
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, callback: UiCallback);
}

/// Runs callbacks immediately on the calling thread. Suitable for headless
/// hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, callback: UiCallback) {
        callback();
    }
}

/// Owns a dedicated dispatch thread; callbacks run there in order.
pub struct ThreadDispatcher {
    sender: Mutex<Option<Sender<UiCallback>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadDispatcher {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<UiCallback>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for callback in rx {
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
                        error!("ui callback panicked");
                    }
                }
            })?;
        Ok(ThreadDispatcher {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops accepting callbacks and waits for the queued ones to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("ui dispatch thread panicked");
            }
        }
    }
}

impl UiDispatcher for ThreadDispatcher {
    fn dispatch(&self, callback: UiCallback) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                if sender.send(callback).is_err() {
                    error!("ui dispatch thread is gone; callback dropped");
                }
            }
            None => log::debug!("ui dispatcher shut down; callback dropped"),
        }
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{ThreadDispatcher, UiDispatcher};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn thread_dispatcher_preserves_order() {
        let dispatcher = ThreadDispatcher::spawn("ui-test").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for value in 0..5 {
            let tx = tx.clone();
            dispatcher.dispatch(Box::new(move || tx.send(value).expect("send")));
        }
        let seen: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("callback ran"))
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        dispatcher.shutdown();
    }
}
