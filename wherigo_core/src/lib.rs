//! Runtime core for playing Wherigo cartridges: a guarded Lua interpreter, a
//! typed view of the script's object graph and the lifecycle engine that
//! drives it.

pub mod data;
pub mod engine;
pub mod error;
pub mod host;
pub mod lua_host;
pub mod objects;
pub mod queue;

pub use data::{Container, FromScript, ObjectFactory, Provider};
pub use engine::{
    DeviceInfo, DialogEntry, Engine, EngineConfig, EngineEvent, EngineState, EntityRef,
    HostServices, MessageBoxRequest, ObjectGraph, Screen,
};
pub use error::{EngineError, Result};
pub use host::{
    CartridgeResources, GeoMath, GeoPoint, InlineDispatcher, SaveSerializer, ThreadDispatcher,
    UiCallback, UiDispatcher,
};
pub use lua_host::{GuardPolicy, LuaGuard, ScriptValue};
pub use objects::{
    Cartridge, ClassTag, Command, Distance, DistanceUnit, Entity, EntityKind, Input, InputKind,
    Media, MediaKind, Task, TaskState, Thing, Timer, TimerKind, Zone, ZonePoint, ZoneState,
};
pub use queue::ExecutionQueue;
