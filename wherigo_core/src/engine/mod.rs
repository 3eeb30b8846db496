//! Lifecycle state machine and event hub for one cartridge session.

mod config;
mod events;
mod hooks;
mod session;
mod timers;
mod views;

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

pub use config::{DeviceInfo, EngineConfig};
pub use events::{DialogEntry, EngineEvent, EntityRef, MessageBoxRequest, Screen};
pub use session::ObjectGraph;

use session::Session;
use timers::FireCallback;
use views::{PlayState, View, ALL_VIEWS};

use crate::data::ObjectFactory;
use crate::error::{EngineError, Result};
use crate::host::{CartridgeResources, GeoMath, GeoPoint, SaveSerializer, UiDispatcher};
use crate::lua_host::{LuaGuard, ScriptValue, TableRef, WHERIGO_LIBRARY};
use crate::objects::{
    Cartridge, Command, Entity, EntityKind, Input, Media, Task, Thing, Timer, Zone,
};
use crate::queue::ExecutionQueue;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Playing,
    Stopping,
    Saving,
    Restoring,
    Disposed,
}

impl EngineState {
    fn has_interpreter(self) -> bool {
        !matches!(
            self,
            EngineState::Uninitialized | EngineState::Initializing | EngineState::Disposed
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Implementations of the host-side contracts the engine calls out to.
#[derive(Clone)]
pub struct HostServices {
    pub dispatcher: Arc<dyn UiDispatcher>,
    pub geo: Arc<dyn GeoMath>,
    pub serializer: Arc<dyn SaveSerializer>,
}

type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

pub(crate) struct EngineShared {
    config: EngineConfig,
    services: HostServices,
    state: Mutex<EngineState>,
    session: RwLock<Option<Arc<Session>>>,
    play: Mutex<PlayState>,
    listeners: Mutex<Vec<Listener>>,
}

/// Player runtime for one cartridge at a time.
///
/// Lifecycle calls block until the script side has settled; everything the
/// script raises in the meantime reaches subscribers through the host's UI
/// dispatcher.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(config: EngineConfig, services: HostServices) -> Engine {
        Engine {
            shared: Arc::new(EngineShared {
                config,
                services,
                state: Mutex::new(EngineState::Uninitialized),
                session: RwLock::new(None),
                play: Mutex::new(PlayState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    pub fn subscribe(&self, listener: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Arc::new(listener));
    }

    /// Loads the cartridge payload into a fresh interpreter.
    pub fn init(&self, resources: Arc<dyn CartridgeResources>) -> Result<()> {
        self.shared.begin(
            &[EngineState::Uninitialized],
            EngineState::Initializing,
            "Uninitialized",
        )?;
        let session = match self.shared.load_session(resources) {
            Ok(session) => session,
            Err(err) => {
                error!("cartridge failed to load: {err}");
                let _ = self
                    .shared
                    .settle(EngineState::Initializing, EngineState::Uninitialized);
                return Err(err);
            }
        };
        *self.shared.session.write() = Some(session.clone());
        if let Err(err) = self
            .shared
            .settle(EngineState::Initializing, EngineState::Initialized)
        {
            self.shared.session.write().take();
            session.shutdown();
            return Err(err);
        }
        Ok(())
    }

    /// Runs the cartridge's `Start` and enters `Playing`.
    pub fn start(&self) -> Result<()> {
        self.shared.begin(
            &[EngineState::Initialized],
            EngineState::Starting,
            "Initialized",
        )?;
        let outcome = self.shared.run_lifecycle("Start");
        match outcome {
            Ok(()) => {
                self.shared
                    .settle(EngineState::Starting, EngineState::Playing)?;
                self.shared.invalidate(&ALL_VIEWS);
                let location = self.shared.play.lock().location;
                if let Some(location) = location {
                    self.shared.submit_zone_update(location)?;
                }
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .shared
                    .settle(EngineState::Starting, EngineState::Initialized);
                Err(err)
            }
        }
    }

    /// Stops every timer, then runs the cartridge's `Stop`.
    pub fn stop(&self) -> Result<()> {
        self.shared
            .begin(&[EngineState::Playing], EngineState::Stopping, "Playing")?;
        if let Ok(session) = self.shared.session() {
            session.timers.stop_all();
        }
        let outcome = self.shared.run_lifecycle("Stop");
        self.shared
            .settle(EngineState::Stopping, EngineState::Initialized)?;
        outcome
    }

    /// Runs `OnSync`, then hands the settled object graph to the serializer.
    pub fn save(&self, out: &mut dyn Write) -> Result<()> {
        self.shared
            .begin(&[EngineState::Playing], EngineState::Saving, "Playing")?;
        let outcome = self.shared.run_lifecycle("OnSync").and_then(|()| {
            let graph = ObjectGraph::new(self.shared.session()?)?;
            self.shared
                .services
                .serializer
                .save(&graph, out)
                .map_err(EngineError::Serializer)
        });
        self.shared.settle(EngineState::Saving, EngineState::Playing)?;
        if outcome.is_ok() {
            info!("session saved");
        }
        outcome
    }

    /// Restores a saved object graph, runs `OnRestore` and resumes play.
    pub fn restore(&self, input: &mut dyn Read) -> Result<()> {
        let previous = self.shared.begin(
            &[EngineState::Initialized, EngineState::Playing],
            EngineState::Restoring,
            "Initialized or Playing",
        )?;
        let outcome = self.shared.restore_session(input);
        match outcome {
            Ok(()) => {
                self.shared
                    .settle(EngineState::Restoring, EngineState::Playing)?;
                info!("session restored");
                Ok(())
            }
            Err(err) => {
                let _ = self.shared.settle(EngineState::Restoring, previous);
                Err(err)
            }
        }
    }

    /// Tears the session down. Safe to call repeatedly and from any state.
    pub fn dispose(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            if *state == EngineState::Disposed {
                return;
            }
            std::mem::replace(&mut *state, EngineState::Disposed)
        };
        info!("engine {previous} -> Disposed");
        let session = self.shared.session.write().take();
        if let Some(session) = session {
            session.shutdown();
        }
        *self.shared.play.lock() = PlayState::default();
        self.shared.raise(EngineEvent::StateChanged {
            from: previous,
            to: EngineState::Disposed,
        });
    }

    /// Blocks until every queued game action has run.
    pub fn drain_and_wait(&self) -> Result<()> {
        let session = self.shared.session()?;
        self.shared.drain(&session)
    }

    pub fn cartridge(&self) -> Result<Cartridge> {
        self.shared.session()?.cartridge()
    }

    pub fn player(&self) -> Result<Thing> {
        self.shared.session()?.player()
    }

    pub fn get_entity(&self, index: i64) -> Result<Entity> {
        self.shared.session()?.factory.resolve_by_index(index)
    }

    pub fn try_get_entity(&self, index: i64) -> Result<Option<Entity>> {
        self.shared.session()?.factory.try_resolve_by_index(index)
    }

    pub fn get_typed<T: EntityKind>(&self, index: i64) -> Result<T> {
        self.shared.session()?.factory.get_typed(index)
    }

    /// Payload bytes of the `ZMedia` object with this index.
    pub fn get_media(&self, index: i64) -> Result<Option<Vec<u8>>> {
        let session = self.shared.session()?;
        let media: Media = session.factory.get_typed(index)?;
        session
            .resources
            .media(media.index().unwrap_or(index))
            .map_err(EngineError::Resources)
    }

    /// Moves the player and, while playing, queues a zone-state update.
    /// Before a cartridge is loaded only the host-side position is kept.
    pub fn refresh_location(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        accuracy: f64,
    ) -> Result<()> {
        let actual = self.state();
        if actual == EngineState::Disposed {
            return Err(EngineError::InvalidState {
                actual,
                expected: "any state before Dispose",
            });
        }
        let point = GeoPoint {
            latitude,
            longitude,
            altitude,
        };
        {
            let mut play = self.shared.play.lock();
            play.location = Some(point);
            play.accuracy = accuracy;
            play.invalidate(&[View::Objects]);
        }
        let Ok(session) = self.shared.session() else {
            return Ok(());
        };
        let location = session.zone_point(point)?;
        session
            .player()?
            .container()
            .set("ObjectLocation", location)?;
        if self.state() == EngineState::Playing {
            self.shared.submit_zone_update(point)?;
        }
        Ok(())
    }

    pub fn refresh_heading(&self, degrees: f64) {
        self.shared.play.lock().heading = degrees.rem_euclid(360.0);
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.shared.play.lock().location
    }

    pub fn accuracy(&self) -> f64 {
        self.shared.play.lock().accuracy
    }

    pub fn heading(&self) -> f64 {
        self.shared.play.lock().heading
    }

    /// Distance in meters and bearing in degrees from the player to `entity`.
    /// `None` without a player position or when `entity` has no location.
    pub fn vector_from_player(&self, entity: &Entity) -> Result<Option<(f64, f64)>> {
        let Some(from) = self.location() else {
            return Ok(None);
        };
        let geo = self.shared.geo();
        let target = match entity {
            Entity::Zone(zone) => {
                let polygon = views::zone_polygon(zone)?;
                if geo.contains(&polygon, from) {
                    return Ok(Some((0.0, 0.0)));
                }
                return Ok(Some(geo.vector_to_polygon(&polygon, from)));
            }
            Entity::ZonePoint(point) => point.to_point()?,
            Entity::Thing(thing) => match thing.location()? {
                Some(point) => point.to_point()?,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(geo.vector(from, target)))
    }

    /// Active, visible tasks in declaration order.
    pub fn active_visible_tasks(&self) -> Result<Vec<Task>> {
        let session = self.shared.session()?;
        self.shared
            .memoized(|play| &mut play.tasks, || views::active_visible_tasks(&session))
    }

    pub fn active_visible_zones(&self) -> Result<Vec<Zone>> {
        let session = self.shared.session()?;
        self.shared
            .memoized(|play| &mut play.zones, || views::active_visible_zones(&session))
    }

    /// Visible things the player carries.
    pub fn visible_inventory(&self) -> Result<Vec<Thing>> {
        let session = self.shared.session()?;
        self.shared
            .memoized(|play| &mut play.inventory, || views::visible_inventory(&session))
    }

    /// Visible things in zones the player is in or near.
    pub fn visible_objects(&self) -> Result<Vec<Thing>> {
        let session = self.shared.session()?;
        let zones = self.active_visible_zones()?;
        self.shared.memoized(
            |play| &mut play.objects,
            || views::visible_objects(&session, &zones),
        )
    }

    /// Queues `command` (optionally aimed at `target`).
    pub fn execute_command(&self, command: &Command, target: Option<&Entity>) -> Result<()> {
        let session = self.shared.playing_session()?;
        let command = command.clone();
        let target = target.map(ScriptValue::from).unwrap_or_default();
        session.submit("command", move |_| {
            command.container().call_bound("Exec", &[target])?;
            Ok(())
        })?;
        Ok(())
    }

    /// Queues the input's `OnGetInput` with the player's answer.
    pub fn answer_input(&self, input: &Input, answer: &str) -> Result<()> {
        let session = self.shared.playing_session()?;
        let input = input.clone();
        let answer = ScriptValue::from(answer);
        session.submit("input answer", move |_| {
            if let Some(handler) = input.container().get_provider("OnGetInput")? {
                handler.invoke(&[answer])?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Queues a message box callback. `None` reports a dismissed box.
    pub fn answer_message_box(
        &self,
        request: &MessageBoxRequest,
        button: Option<usize>,
    ) -> Result<()> {
        let Some(callback) = request.callback.clone() else {
            return Ok(());
        };
        let session = self.shared.playing_session()?;
        let action = button
            .map(|button| ScriptValue::from(format!("Button{}", button + 1)))
            .unwrap_or_default();
        session.submit("message box callback", move |_| {
            callback.invoke(&[action])?;
            Ok(())
        })?;
        Ok(())
    }

    /// Queues `entity:<name>()` if the entity defines such a handler.
    pub fn call_event(&self, entity: &Entity, name: &str) -> Result<()> {
        let session = self.shared.session()?;
        let entity = entity.clone();
        let name = name.to_string();
        session.submit("event", move |_| {
            if let Some(handler) = entity.container().get_provider(&name)? {
                handler.invoke(&[])?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl EngineShared {
    /// Moves into a transient state when the current state is allowed.
    fn begin(
        &self,
        allowed: &[EngineState],
        next: EngineState,
        expected: &'static str,
    ) -> Result<EngineState> {
        let previous = {
            let mut state = self.state.lock();
            let actual = *state;
            if !allowed.contains(&actual) {
                return Err(EngineError::InvalidState { actual, expected });
            }
            *state = next;
            actual
        };
        info!("engine {previous} -> {next}");
        self.raise(EngineEvent::StateChanged {
            from: previous,
            to: next,
        });
        Ok(previous)
    }

    /// Leaves a transient state. Fails if something else (disposal) moved the
    /// engine on in the meantime.
    fn settle(&self, from: EngineState, to: EngineState) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != from {
                return Err(if *state == EngineState::Disposed {
                    EngineError::Disposed
                } else {
                    EngineError::InvalidState {
                        actual: *state,
                        expected: "a lifecycle operation in flight",
                    }
                });
            }
            *state = to;
        }
        info!("engine {from} -> {to}");
        self.raise(EngineEvent::StateChanged { from, to });
        Ok(())
    }

    fn session(&self) -> Result<Arc<Session>> {
        let actual = *self.state.lock();
        if !actual.has_interpreter() {
            return Err(EngineError::InvalidState {
                actual,
                expected: "Initialized or Playing",
            });
        }
        self.session.read().clone().ok_or(EngineError::Disposed)
    }

    fn playing_session(&self) -> Result<Arc<Session>> {
        let actual = *self.state.lock();
        if actual != EngineState::Playing {
            return Err(EngineError::InvalidState {
                actual,
                expected: "Playing",
            });
        }
        self.session()
    }

    fn geo(&self) -> &dyn GeoMath {
        self.services.geo.as_ref()
    }

    fn drain(&self, session: &Session) -> Result<()> {
        match self.config.drain_timeout() {
            Some(timeout) => session.queue.drain_and_wait_timeout(timeout),
            None => session.queue.drain_and_wait(),
        }
    }

    /// Queues a cartridge lifecycle method and waits for it.
    fn run_lifecycle(&self, method: &'static str) -> Result<()> {
        let session = self.session.read().clone().ok_or(EngineError::Disposed)?;
        let slot = session.submit(method, move |session| {
            session.cartridge()?.container().call_bound(method, &[])?;
            Ok(())
        })?;
        self.drain(&session)?;
        slot.take()
    }

    fn submit_zone_update(self: &Arc<Self>, point: GeoPoint) -> Result<()> {
        let session = self.session()?;
        let engine = Arc::downgrade(self);
        session.submit("zone update", move |session| {
            let Some(engine) = engine.upgrade() else {
                return Err(EngineError::Disposed);
            };
            views::update_zones(session, engine.geo(), point)
        })?;
        Ok(())
    }

    fn load_session(self: &Arc<Self>, resources: Arc<dyn CartridgeResources>) -> Result<Arc<Session>> {
        let guard = LuaGuard::new(self.config.guard_policy())?;
        let session = Arc::new(Session {
            factory: ObjectFactory::new(guard.clone()),
            guard,
            queue: ExecutionQueue::new(self.config.queue_yield_delay()),
            timers: timers::TimerRegistry::new(self.config.timer_tick()),
            resources,
        });
        let engine = Arc::downgrade(self);
        session.queue.on_busy_changed(move |busy| {
            if let Some(engine) = engine.upgrade() {
                engine.raise(EngineEvent::BusyChanged { busy });
            }
        });
        if let Err(err) = self.prepare(&session) {
            session.shutdown();
            return Err(err);
        }
        Ok(session)
    }

    fn prepare(self: &Arc<Self>, session: &Arc<Session>) -> Result<()> {
        let guard = &session.guard;
        hooks::install(session, &Arc::downgrade(self))?;
        self.seed_env(session)?;

        let library = guard.compile(WHERIGO_LIBRARY.as_bytes(), "Wherigo")?;
        let package = table_value(guard.global("package")?, "package")?;
        let preload = table_value(guard.get(&package, "preload")?, "package.preload")?;
        guard.set(&preload, "Wherigo", library)?;
        let module = guard.load(b"return require 'Wherigo'", "bootstrap")?;
        let module = table_value(module.into_iter().next().unwrap_or_default(), "Wherigo")?;

        let player = table_value(guard.get(&module, "Player")?, "Wherigo.Player")?;
        let player = session.factory.bootstrap_player(player)?;
        if let Some(fields) = session.raw_fields(&Entity::Thing(player))? {
            fields.set("Name", self.config.player_name.as_str())?;
        }

        let script = session.resources.script().map_err(EngineError::Resources)?;
        let results = guard.load(&script, &session.resources.chunk_name())?;
        let cartridge = self.find_cartridge(session, results)?;
        let cartridge = session.factory.bootstrap_cartridge(cartridge)?;
        info!(
            "loaded cartridge {:?} with {} objects",
            cartridge.name().unwrap_or_default(),
            cartridge.all_objects().map(|all| all.len()).unwrap_or_default()
        );
        Ok(())
    }

    /// The payload's return value, or failing that the global it assigned the
    /// cartridge to.
    fn find_cartridge(&self, session: &Session, results: Vec<ScriptValue>) -> Result<TableRef> {
        let is_cartridge = |table: &TableRef| -> Result<bool> {
            Ok(session.guard.get(table, "ClassName")?.as_str() == Some("ZCartridge"))
        };
        for value in results {
            if let ScriptValue::Table(table) = value {
                if is_cartridge(&table)? {
                    return Ok(table);
                }
            }
        }
        let ScriptValue::Table(globals) = session.guard.global("_G")? else {
            return Err(EngineError::NotFound(0));
        };
        for pair in session.guard.pairs(&globals) {
            if let (_, ScriptValue::Table(table)) = pair? {
                if is_cartridge(&table)? {
                    return Ok(table);
                }
            }
        }
        Err(EngineError::NotFound(0))
    }

    fn seed_env(&self, session: &Session) -> Result<()> {
        let device = &self.config.device;
        let env = session.guard.create_table()?;
        let fields: [(&str, ScriptValue); 8] = [
            ("Platform", device.platform.as_str().into()),
            ("Device", device.device.as_str().into()),
            ("DeviceID", device.device_id.as_str().into()),
            ("Version", device.version.as_str().into()),
            ("Language", device.language.as_str().into()),
            ("CartFilename", session.resources.chunk_name().into()),
            ("PathSep", "/".into()),
            ("Downloaded", 0_i64.into()),
        ];
        for (key, value) in fields {
            session.guard.set(&env, key, value)?;
        }
        session.guard.set_global("Env", env)
    }

    fn restore_session(&self, input: &mut dyn Read) -> Result<()> {
        let session = self.session.read().clone().ok_or(EngineError::Disposed)?;
        self.drain(&session)?;
        session.timers.stop_all();
        let graph = ObjectGraph::new(session.clone())?;
        self.services
            .serializer
            .restore(&graph, input)
            .map_err(EngineError::Serializer)?;
        self.invalidate(&ALL_VIEWS);
        let slot = session.submit("OnRestore", move |session| {
            session.cartridge()?.container().call_bound("OnRestore", &[])?;
            Ok(())
        })?;
        self.drain(&session)?;
        slot.take()?;

        for entity in graph.objects()? {
            if let Entity::Timer(timer) = entity {
                if timer.running()? {
                    session.timers.start(timer, self.fire_callback(&session))?;
                }
            }
        }
        Ok(())
    }

    /// Called by a timer clock once it runs out. The fire is marshaled to the
    /// UI thread, which queues the script-side `Tick`.
    fn fire_callback(&self, session: &Arc<Session>) -> FireCallback {
        let dispatcher = self.services.dispatcher.clone();
        let session = Arc::downgrade(session);
        Arc::new(move |timer: Timer| {
            let session = session.clone();
            dispatcher.dispatch(Box::new(move || {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let submitted = session.submit("timer tick", move |_| {
                    timer.container().call_bound("Tick", &[])?;
                    Ok(())
                });
                if let Err(err) = submitted {
                    debug!("timer tick dropped: {err}");
                }
            }));
        })
    }

    fn invalidate(&self, views: &[View]) {
        self.play.lock().invalidate(views);
    }

    /// Reads a memoized view, computing it outside the lock on a miss. A
    /// result computed across an invalidation is returned but not stored.
    fn memoized<T: Clone>(
        &self,
        slot: fn(&mut PlayState) -> &mut Option<Vec<T>>,
        compute: impl FnOnce() -> Result<Vec<T>>,
    ) -> Result<Vec<T>> {
        let generation = {
            let mut play = self.play.lock();
            if let Some(cached) = slot(&mut play) {
                return Ok(cached.clone());
            }
            play.generation
        };
        let value = compute()?;
        let mut play = self.play.lock();
        if play.generation == generation {
            *slot(&mut play) = Some(value.clone());
        }
        Ok(value)
    }

    /// Delivers `event` to subscribers on the UI thread.
    fn raise(&self, event: EngineEvent) {
        self.notify(Vec::new(), event);
    }

    /// Raises per-object property notifications, then `event`, on the UI
    /// thread.
    fn notify(&self, changed: Vec<(Entity, String)>, event: EngineEvent) {
        let listeners = self.listeners.lock().clone();
        self.services.dispatcher.dispatch(Box::new(move || {
            for (entity, property) in &changed {
                entity.notify_property_changed(property);
            }
            for listener in &listeners {
                listener(&event);
            }
        }));
    }
}

fn table_value(value: ScriptValue, what: &str) -> Result<TableRef> {
    match value {
        ScriptValue::Table(table) => Ok(table),
        _ => {
            warn!("{what} is not a table");
            Err(EngineError::NotCallable(what.to_string()))
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, EngineState, Session};
    use crate::objects::Entity;

    #[test]
    fn engine_handles_cross_threads() {
        fn check<T: Send + Sync>() {}
        check::<Engine>();
        check::<Entity>();
        check::<Session>();
    }

    #[test]
    fn only_loaded_states_expose_the_interpreter() {
        assert!(!EngineState::Uninitialized.has_interpreter());
        assert!(!EngineState::Initializing.has_interpreter());
        assert!(!EngineState::Disposed.has_interpreter());
        assert!(EngineState::Initialized.has_interpreter());
        assert!(EngineState::Saving.has_interpreter());
    }
}
