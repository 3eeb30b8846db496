use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use super::timers::TimerRegistry;
use crate::data::{downcast, Container, ObjectFactory};
use crate::error::{EngineError, Result};
use crate::host::{CartridgeResources, GeoPoint};
use crate::lua_host::{LuaGuard, ScriptValue};
use crate::objects::{Cartridge, Entity, EntityKind, Thing};
use crate::queue::ExecutionQueue;

/// Everything bound to one loaded cartridge: the interpreter, its identity
/// cache, the execution queue and the running timer clocks.
pub(crate) struct Session {
    pub(crate) guard: LuaGuard,
    pub(crate) factory: Arc<ObjectFactory>,
    pub(crate) queue: ExecutionQueue,
    pub(crate) timers: TimerRegistry,
    pub(crate) resources: Arc<dyn CartridgeResources>,
}

/// Receives the outcome of a queued job.
#[derive(Clone, Default)]
pub(crate) struct JobSlot(Arc<Mutex<Option<Result<()>>>>);

impl JobSlot {
    fn fill(&self, outcome: Result<()>) {
        *self.0.lock() = Some(outcome);
    }

    /// Outcome of the job. A job that never ran reports disposal.
    pub(crate) fn take(&self) -> Result<()> {
        self.0.lock().take().unwrap_or(Err(EngineError::Disposed))
    }
}

impl Session {
    pub(crate) fn cartridge(&self) -> Result<Cartridge> {
        self.factory.cartridge().ok_or(EngineError::NotFound(0))
    }

    pub(crate) fn player(&self) -> Result<Thing> {
        self.factory.player().ok_or(EngineError::NotFound(-1))
    }

    /// Queues `job` on the execution queue. Failures are logged when the job
    /// runs and also stored in the returned slot.
    pub(crate) fn submit<F>(self: &Arc<Self>, name: &'static str, job: F) -> Result<JobSlot>
    where
        F: FnOnce(&Session) -> Result<()> + Send + 'static,
    {
        let slot = JobSlot::default();
        let outcome_slot = slot.clone();
        let session = Arc::downgrade(self);
        self.queue.submit(move || {
            let outcome = match session.upgrade() {
                Some(session) => panic::catch_unwind(AssertUnwindSafe(|| job(&session)))
                    .unwrap_or_else(|payload| {
                        Err(EngineError::JobPanicked {
                            job: name,
                            message: panic_message(payload.as_ref()),
                        })
                    }),
                None => Err(EngineError::Disposed),
            };
            match &outcome {
                Err(err) if err.is_disposed() => debug!("{name} skipped: {err}"),
                Err(err) => warn!("{name} failed: {err}"),
                Ok(()) => {}
            }
            outcome_slot.fill(outcome);
        })?;
        Ok(slot)
    }

    /// Live payload table of an object (`Wherigo.RawFields`). Writes through
    /// it are not reported as attribute changes.
    pub(crate) fn raw_fields(&self, entity: &Entity) -> Result<Option<Container>> {
        let ScriptValue::Table(module) = self.guard.global("Wherigo")? else {
            return Ok(None);
        };
        let ScriptValue::Function(raw_fields) = self.guard.get(&module, "RawFields")? else {
            return Ok(None);
        };
        let results = self.guard.call(&raw_fields, &[ScriptValue::from(entity)])?;
        Ok(results.into_iter().find_map(|value| match value {
            ScriptValue::Table(table) => Some(self.factory.container(table)),
            _ => None,
        }))
    }

    /// A fresh script-side `ZonePoint` for `point`.
    pub(crate) fn zone_point(&self, point: GeoPoint) -> Result<ScriptValue> {
        let ScriptValue::Table(module) = self.guard.global("Wherigo")? else {
            return Err(EngineError::NotCallable("Wherigo.ZonePoint".to_string()));
        };
        let ScriptValue::Function(constructor) = self.guard.get(&module, "ZonePoint")? else {
            return Err(EngineError::NotCallable("Wherigo.ZonePoint".to_string()));
        };
        let results = self.guard.call(
            &constructor,
            &[
                point.latitude.into(),
                point.longitude.into(),
                point.altitude.into(),
            ],
        )?;
        Ok(results.into_iter().next().unwrap_or_default())
    }

    /// Stops clocks, discards queued work and drops the interpreter.
    pub(crate) fn shutdown(&self) {
        self.timers.stop_all();
        self.queue.dispose();
        if let Err(err) = self.guard.dispose() {
            debug!("interpreter released with its last handle: {err}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The live object graph as seen by a save-state serializer.
pub struct ObjectGraph {
    session: Arc<Session>,
    cartridge: Cartridge,
    player: Thing,
}

impl ObjectGraph {
    pub(crate) fn new(session: Arc<Session>) -> Result<Self> {
        let cartridge = session.cartridge()?;
        let player = session.player()?;
        Ok(ObjectGraph {
            session,
            cartridge,
            player,
        })
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn player(&self) -> &Thing {
        &self.player
    }

    /// Every indexed object except the cartridge itself, in index order.
    pub fn objects(&self) -> Result<Vec<Entity>> {
        let mut objects: Vec<Entity> = self
            .cartridge
            .all_objects()?
            .into_iter()
            .filter(|entity| entity.index().is_some_and(|index| index > 0))
            .collect();
        objects.sort_by_key(|entity| entity.index());
        Ok(objects)
    }

    pub fn resolve(&self, index: i64) -> Result<Option<Entity>> {
        self.session.factory.try_resolve_by_index(index)
    }

    pub fn get_typed<T: EntityKind>(&self, index: i64) -> Result<T> {
        downcast(self.session.factory.resolve_by_index(index)?)
    }

    /// Raw field table of `entity`; see `Wherigo.RawFields`.
    pub fn fields(&self, entity: &Entity) -> Result<Option<Container>> {
        self.session.raw_fields(entity)
    }

    pub fn zone_point(&self, point: GeoPoint) -> Result<ScriptValue> {
        self.session.zone_point(point)
    }

    /// Re-parents `entity` through the script's own `MoveTo`, keeping
    /// inventories consistent.
    pub fn move_to(&self, entity: &Entity, owner: Option<&Entity>) -> Result<()> {
        let owner = owner.map(ScriptValue::from).unwrap_or_default();
        entity.container().call_bound("MoveTo", &[owner])?;
        Ok(())
    }
}
