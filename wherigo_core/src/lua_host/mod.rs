//! Interpreter access: the guarded Lua instance, value marshaling and table
//! enumeration. Nothing outside this module touches `mlua` types directly.

mod cursor;
mod guard;
mod value;

pub use cursor::TableCursor;
pub use guard::{GuardPolicy, LuaGuard};
pub use value::{enum_value, FunctionRef, ScriptEnum, ScriptValue, TableRef, ValueShape};

/// The runtime library cartridges `require "Wherigo"`.
pub(crate) const WHERIGO_LIBRARY: &str = include_str!("wherigo.lua");
