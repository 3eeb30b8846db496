#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use wherigo_core::{
    CartridgeResources, Engine, EngineConfig, EngineEvent, GeoMath, GeoPoint, HostServices,
    InlineDispatcher, ObjectGraph, SaveSerializer,
};

pub struct ScriptResources(pub &'static str);

impl CartridgeResources for ScriptResources {
    fn script(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }

    fn media(&self, index: i64) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(Some(format!("media-{index}").into_bytes()))
    }

    fn chunk_name(&self) -> String {
        "test.lua".to_string()
    }
}

/// Coordinates are planar meters.
pub struct FlatGeo;

impl GeoMath for FlatGeo {
    fn vector(&self, from: GeoPoint, to: GeoPoint) -> (f64, f64) {
        let dx = to.longitude - from.longitude;
        let dy = to.latitude - from.latitude;
        (
            (dx * dx + dy * dy).sqrt(),
            dx.atan2(dy).to_degrees().rem_euclid(360.0),
        )
    }

    fn contains(&self, polygon: &[GeoPoint], point: GeoPoint) -> bool {
        let mut inside = false;
        let mut j = polygon.len().wrapping_sub(1);
        for i in 0..polygon.len() {
            let (a, b) = (polygon[i], polygon[j]);
            if (a.latitude > point.latitude) != (b.latitude > point.latitude)
                && point.longitude
                    < (b.longitude - a.longitude) * (point.latitude - a.latitude)
                        / (b.latitude - a.latitude)
                        + a.longitude
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn vector_to_polygon(&self, polygon: &[GeoPoint], point: GeoPoint) -> (f64, f64) {
        let mut best = (f64::INFINITY, 0.0);
        for (i, a) in polygon.iter().enumerate() {
            let b = polygon[(i + 1) % polygon.len()];
            let (dx, dy) = (b.longitude - a.longitude, b.latitude - a.latitude);
            let length = dx * dx + dy * dy;
            let t = if length == 0.0 {
                0.0
            } else {
                (((point.longitude - a.longitude) * dx + (point.latitude - a.latitude) * dy)
                    / length)
                    .clamp(0.0, 1.0)
            };
            let nearest = GeoPoint {
                latitude: a.latitude + t * dy,
                longitude: a.longitude + t * dx,
                altitude: 0.0,
            };
            let vector = self.vector(point, nearest);
            if vector.0 < best.0 {
                best = vector;
            }
        }
        best
    }
}

/// Writes the number of live objects; restore only checks it matches.
pub struct CountingSerializer;

impl SaveSerializer for CountingSerializer {
    fn save(&self, graph: &ObjectGraph, out: &mut dyn Write) -> anyhow::Result<()> {
        write!(out, "{}", graph.objects()?.len())?;
        Ok(())
    }

    fn restore(&self, graph: &ObjectGraph, input: &mut dyn Read) -> anyhow::Result<()> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        let saved: usize = text.trim().parse().context("object count")?;
        anyhow::ensure!(saved == graph.objects()?.len(), "object count drifted");
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            timer_tick_ms: 10,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let engine = Engine::new(
            config,
            HostServices {
                dispatcher: Arc::new(InlineDispatcher),
                geo: Arc::new(FlatGeo),
                serializer: Arc::new(CountingSerializer),
            },
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(move |event| sink.lock().push(event.clone()));
        Harness { engine, events }
    }

    pub fn loaded(script: &'static str) -> Self {
        let harness = Self::new();
        harness
            .engine
            .init(Arc::new(ScriptResources(script)))
            .expect("cartridge loads");
        harness
    }

    pub fn playing(script: &'static str) -> Self {
        let harness = Self::loaded(script);
        harness.engine.start().expect("cartridge starts");
        harness
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Polls until an event matches or five seconds pass.
    pub fn wait_for(&self, matches: impl Fn(&EngineEvent) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.events.lock().iter().any(&matches) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}
