use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use mlua::{Function, Lua, LuaOptions, MultiValue, Result as LuaResult, StdLib, Table, Value};
use parking_lot::ReentrantMutex;
use serde::Deserialize;

use super::cursor::TableCursor;
use super::value::{
    args_to_lua, from_lua, results_from_lua, to_lua, FunctionRef, ScriptValue, TableRef,
    ValueShape,
};
use crate::error::{EngineError, Result};

const NEXT_KEY: &str = "wherigo.next";
const PINS_KEY: &str = "wherigo.pins";

/// Exception policy applied at the interpreter boundary.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
    /// Surface interpreter faults to the caller instead of a default value.
    pub rethrow_faults: bool,
    /// Surface access after disposal instead of tolerating it.
    pub rethrow_disposed: bool,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        GuardPolicy {
            rethrow_faults: true,
            rethrow_disposed: false,
        }
    }
}

struct GuardShared {
    lua: ReentrantMutex<RefCell<Option<Lua>>>,
    disposed: AtomicBool,
    rethrow_faults: AtomicBool,
    rethrow_disposed: AtomicBool,
}

/// Serialises every touch of the single interpreter instance.
///
/// The lock is re-entrant so host hooks invoked from inside a script call can
/// read the object graph on the same thread without deadlocking.
#[derive(Clone)]
pub struct LuaGuard {
    shared: Arc<GuardShared>,
}

impl LuaGuard {
    pub fn new(policy: GuardPolicy) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        let next: Function = lua.globals().get("next")?;
        lua.set_named_registry_value(NEXT_KEY, next)?;
        lua.set_named_registry_value(PINS_KEY, lua.create_table()?)?;
        Ok(LuaGuard {
            shared: Arc::new(GuardShared {
                lua: ReentrantMutex::new(RefCell::new(Some(lua))),
                disposed: AtomicBool::new(false),
                rethrow_faults: AtomicBool::new(policy.rethrow_faults),
                rethrow_disposed: AtomicBool::new(policy.rethrow_disposed),
            }),
        })
    }

    pub fn policy(&self) -> GuardPolicy {
        GuardPolicy {
            rethrow_faults: self.shared.rethrow_faults.load(Ordering::Relaxed),
            rethrow_disposed: self.shared.rethrow_disposed.load(Ordering::Relaxed),
        }
    }

    pub fn set_policy(&self, policy: GuardPolicy) {
        self.shared
            .rethrow_faults
            .store(policy.rethrow_faults, Ordering::Relaxed);
        self.shared
            .rethrow_disposed
            .store(policy.rethrow_disposed, Ordering::Relaxed);
    }

    /// Runs `f` with exclusive access to the interpreter. Errors are returned
    /// untouched; see [`LuaGuard::absorb`] for the tolerant variant.
    ///
    /// Once disposed, no access reaches the interpreter. If disposal happened
    /// while a call was on the stack, the outermost access drops it on exit.
    pub fn with_lua<R>(&self, f: impl FnOnce(&Lua) -> LuaResult<R>) -> Result<R> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(EngineError::Disposed);
        }
        let lock = self.shared.lua.lock();
        let result = {
            let slot = lock.try_borrow().map_err(|_| EngineError::InterpreterBusy)?;
            let lua = slot.as_ref().ok_or(EngineError::Disposed)?;
            f(lua).map_err(EngineError::from)
        };
        if self.shared.disposed.load(Ordering::Acquire) {
            release(&lock);
        }
        result
    }

    /// Applies the exception policy to an interpreter result.
    pub fn absorb<R: Default>(&self, result: Result<R>) -> Result<R> {
        match result {
            Ok(value) => Ok(value),
            Err(EngineError::Disposed) => {
                if self.shared.rethrow_disposed.load(Ordering::Relaxed) {
                    Err(EngineError::Disposed)
                } else {
                    debug!("interpreter access after disposal ignored");
                    Ok(R::default())
                }
            }
            Err(err @ (EngineError::Lua(_) | EngineError::InterpreterBusy)) => {
                if self.shared.rethrow_faults.load(Ordering::Relaxed) {
                    Err(err)
                } else {
                    warn!("interpreter fault suppressed: {err}");
                    Ok(R::default())
                }
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Drops the interpreter. Safe to call repeatedly, including from inside
    /// a host function: access stops at once and the interpreter itself is
    /// dropped when the running call unwinds.
    pub fn dispose(&self) -> Result<()> {
        let first = !self.shared.disposed.swap(true, Ordering::AcqRel);
        let lock = self.shared.lua.lock();
        if !release(&lock) && first {
            debug!("interpreter disposal deferred until the running call returns");
        }
        Ok(())
    }

    pub fn get(&self, table: &TableRef, key: &str) -> Result<ScriptValue> {
        self.absorb(self.with_lua(|lua| {
            let value: Value = table.table(lua)?.get(key)?;
            from_lua(lua, value)
        }))
    }

    /// Reads `key` as `shape`, falling back to `Nil` when absent or mistyped.
    pub fn get_as(&self, table: &TableRef, key: &str, shape: ValueShape) -> Result<ScriptValue> {
        Ok(self.get(table, key)?.coerce(shape))
    }

    pub fn get_index(&self, table: &TableRef, index: i64) -> Result<ScriptValue> {
        self.absorb(self.with_lua(|lua| {
            let value: Value = table.table(lua)?.get(index)?;
            from_lua(lua, value)
        }))
    }

    pub fn set(&self, table: &TableRef, key: &str, value: impl Into<ScriptValue>) -> Result<()> {
        let value = value.into();
        self.absorb(self.with_lua(|lua| table.table(lua)?.set(key, to_lua(lua, &value)?)))
    }

    pub fn global(&self, name: &str) -> Result<ScriptValue> {
        self.absorb(self.with_lua(|lua| {
            let value: Value = lua.globals().get(name)?;
            from_lua(lua, value)
        }))
    }

    pub fn set_global(&self, name: &str, value: impl Into<ScriptValue>) -> Result<()> {
        let value = value.into();
        self.absorb(self.with_lua(|lua| lua.globals().set(name, to_lua(lua, &value)?)))
    }

    pub fn call(&self, function: &FunctionRef, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
        self.absorb(self.with_lua(|lua| {
            let results: MultiValue = function.function(lua)?.call(args_to_lua(lua, args)?)?;
            results_from_lua(lua, results)
        }))
    }

    /// Calls `table[name](table, args...)`. A missing or non-callable field is
    /// a hard error regardless of policy.
    pub fn call_method(
        &self,
        table: &TableRef,
        name: &str,
        args: &[ScriptValue],
    ) -> Result<Vec<ScriptValue>> {
        let function = match self.get(table, name)? {
            ScriptValue::Function(function) => function,
            _ => return Err(EngineError::NotCallable(name.to_string())),
        };
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(ScriptValue::Table(table.clone()));
        full.extend_from_slice(args);
        self.call(&function, &full)
    }

    /// Loads and runs a chunk (source or precompiled), returning its results.
    pub fn load(&self, bytes: &[u8], name: &str) -> Result<Vec<ScriptValue>> {
        self.with_lua(|lua| {
            let results = lua.load(bytes).set_name(name).eval::<MultiValue>()?;
            results_from_lua(lua, results)
        })
    }

    /// Compiles a chunk without running it.
    pub fn compile(&self, bytes: &[u8], name: &str) -> Result<FunctionRef> {
        let value = self.with_lua(|lua| {
            let function = lua.load(bytes).set_name(name).into_function()?;
            from_lua(lua, Value::Function(function))
        })?;
        match value {
            ScriptValue::Function(function) => Ok(function),
            _ => Err(EngineError::Lua(mlua::Error::RuntimeError(format!(
                "chunk {name} did not compile to a function"
            )))),
        }
    }

    pub fn create_table(&self) -> Result<TableRef> {
        let value = self.with_lua(|lua| {
            let table = lua.create_table()?;
            from_lua(lua, Value::Table(table))
        })?;
        match value {
            ScriptValue::Table(table) => Ok(table),
            _ => Err(EngineError::Lua(mlua::Error::RuntimeError(
                "table creation failed".to_string(),
            ))),
        }
    }

    /// Wraps a host closure as a Lua function. Arguments and results cross the
    /// boundary as [`ScriptValue`]s.
    pub fn create_function<F>(&self, hook: F) -> Result<FunctionRef>
    where
        F: Fn(Vec<ScriptValue>) -> Result<Vec<ScriptValue>> + Send + 'static,
    {
        let value = self.with_lua(|lua| {
            let function = lua.create_function(move |lua, args: MultiValue| {
                let args = results_from_lua(lua, args)?;
                let results = hook(args).map_err(EngineError::into_lua)?;
                args_to_lua(lua, &results)
            })?;
            from_lua(lua, Value::Function(function))
        })?;
        match value {
            ScriptValue::Function(function) => Ok(function),
            _ => Err(EngineError::Lua(mlua::Error::RuntimeError(
                "function creation failed".to_string(),
            ))),
        }
    }

    /// Marks `table` as owned by the host for the rest of the session.
    pub fn pin(&self, table: &TableRef, slot: i64) -> Result<()> {
        self.absorb(self.with_lua(|lua| {
            let pins: Table = lua.named_registry_value(PINS_KEY)?;
            pins.raw_set(slot, table.table(lua)?)
        }))
    }

    pub fn is_pinned(&self, slot: i64) -> Result<bool> {
        self.absorb(self.with_lua(|lua| {
            let pins: Table = lua.named_registry_value(PINS_KEY)?;
            Ok(!matches!(pins.raw_get::<_, Value>(slot)?, Value::Nil))
        }))
    }

    /// Enumerates `table`, re-acquiring the lock for every step.
    pub fn pairs(&self, table: &TableRef) -> TableCursor {
        TableCursor::new(self.clone(), table.clone())
    }

    /// One `next(table, key)` step. `None` once the table is exhausted.
    pub(crate) fn next_pair(
        &self,
        table: &TableRef,
        key: &ScriptValue,
    ) -> Result<Option<(ScriptValue, ScriptValue)>> {
        self.with_lua(|lua| {
            let next: Function = lua.named_registry_value(NEXT_KEY)?;
            let (key, value): (Value, Value) = next.call((table.table(lua)?, to_lua(lua, key)?))?;
            if matches!(key, Value::Nil) {
                return Ok(None);
            }
            Ok(Some((from_lua(lua, key)?, from_lua(lua, value)?)))
        })
    }

    /// Releases registry slots whose [`TableRef`]s were dropped.
    pub fn expire_unused(&self) {
        let _ = self.with_lua(|lua| {
            lua.expire_registry_values();
            Ok(())
        });
    }

    pub fn same_table(&self, left: &TableRef, right: &TableRef) -> Result<bool> {
        self.absorb(self.with_lua(|lua| {
            Ok(left.table(lua)?.to_pointer() == right.table(lua)?.to_pointer())
        }))
    }
}

/// Drops the interpreter unless a borrow is still live on this thread.
/// Returns false while a call is in progress.
fn release(cell: &RefCell<Option<Lua>>) -> bool {
    let lua = match cell.try_borrow_mut() {
        Ok(mut slot) => slot.take(),
        Err(_) => return false,
    };
    if lua.is_some() {
        debug!("interpreter disposed");
    }
    drop(lua);
    true
}

#[cfg(test)]
mod tests {
    use super::{GuardPolicy, LuaGuard};
    use crate::error::EngineError;
    use crate::lua_host::value::{ScriptValue, ValueShape};

    fn guard() -> LuaGuard {
        LuaGuard::new(GuardPolicy::default()).expect("interpreter")
    }

    #[test]
    fn typed_reads_default_on_wrong_shape() {
        let guard = guard();
        guard
            .load(b"obj = { Name = 'Lamp', Visible = true }", "test")
            .expect("chunk runs");
        let obj = guard.global("obj").expect("global");
        let table = obj.as_table().expect("table").clone();
        let name = guard.get_as(&table, "Name", ValueShape::Boolean).expect("read");
        assert!(name.is_nil());
        let visible = guard.get_as(&table, "Visible", ValueShape::Boolean).expect("read");
        assert_eq!(visible.as_bool(), Some(true));
    }

    #[test]
    fn call_method_prepends_self() {
        let guard = guard();
        guard
            .load(
                b"obj = { Count = 2 }\nfunction obj:Add(n) self.Count = self.Count + n return self.Count end",
                "test",
            )
            .expect("chunk runs");
        let table = guard.global("obj").expect("global");
        let table = table.as_table().expect("table");
        let results = guard
            .call_method(table, "Add", &[ScriptValue::from(3_i64)])
            .expect("call");
        assert_eq!(results[0].as_f64(), Some(5.0));
    }

    #[test]
    fn call_method_on_missing_field_is_hard_error() {
        let guard = guard();
        guard.set_policy(GuardPolicy {
            rethrow_faults: false,
            rethrow_disposed: false,
        });
        let table = guard.create_table().expect("table");
        let err = guard.call_method(&table, "Missing", &[]).unwrap_err();
        assert!(matches!(err, EngineError::NotCallable(name) if name == "Missing"));
    }

    #[test]
    fn faults_are_suppressed_when_policy_allows() {
        let guard = guard();
        guard.load(b"function boom() error('bad') end", "test").expect("chunk");
        let boom = guard.global("boom").expect("global");
        let boom = boom.as_function().expect("function").clone();
        assert!(guard.call(&boom, &[]).is_err());
        guard.set_policy(GuardPolicy {
            rethrow_faults: false,
            rethrow_disposed: false,
        });
        assert!(guard.call(&boom, &[]).expect("suppressed").is_empty());
    }

    #[test]
    fn disposal_is_tolerated_unless_rethrown() {
        let guard = guard();
        let table = guard.create_table().expect("table");
        guard.dispose().expect("dispose");
        guard.dispose().expect("second dispose is a no-op");
        assert!(guard.is_disposed());
        assert!(guard.get(&table, "Name").expect("tolerated").is_nil());
        guard.set_policy(GuardPolicy {
            rethrow_faults: true,
            rethrow_disposed: true,
        });
        assert!(guard.get(&table, "Name").unwrap_err().is_disposed());
    }

    #[test]
    fn disposal_from_a_host_function_cuts_off_access() {
        let guard = guard();
        guard.set_policy(GuardPolicy {
            rethrow_faults: true,
            rethrow_disposed: true,
        });
        let inner = guard.clone();
        let quit = guard
            .create_function(move |_| {
                inner.dispose()?;
                Ok(vec![ScriptValue::from(inner.global("Name").is_err())])
            })
            .expect("hook");
        guard.set_global("quit", quit).expect("install");
        guard.set_global("Name", "Live").expect("name");
        let results = guard.load(b"return quit()", "test").expect("chunk");
        assert_eq!(results[0].as_bool(), Some(true));
        assert!(guard.is_disposed());
        assert!(guard.global("Name").unwrap_err().is_disposed());
        assert!(guard.with_lua(|_| Ok(())).unwrap_err().is_disposed());
    }

    #[test]
    fn host_functions_can_reenter_the_guard() {
        let guard = guard();
        let inner = guard.clone();
        let hook = guard
            .create_function(move |args| {
                let table = args[0].as_table().expect("table arg").clone();
                let name = inner.get(&table, "Name")?;
                Ok(vec![name])
            })
            .expect("hook");
        guard.set_global("read_name", hook).expect("install");
        let results = guard
            .load(b"return read_name({ Name = 'Zone A' })", "test")
            .expect("chunk");
        assert_eq!(results[0].as_str(), Some("Zone A"));
    }

    #[test]
    fn lists_become_fresh_tables() {
        let guard = guard();
        guard
            .load(b"function count(t) return #t end", "test")
            .expect("chunk");
        let count = guard.global("count").expect("global");
        let count = count.as_function().expect("function").clone();
        let results = guard
            .call(&count, &[ScriptValue::from(vec!["a", "b", "c"])])
            .expect("call");
        assert_eq!(results[0].as_f64(), Some(3.0));
    }

    #[test]
    fn pins_are_recorded_by_slot() {
        let guard = guard();
        let table = guard.create_table().expect("table");
        assert!(!guard.is_pinned(7).expect("lookup"));
        guard.pin(&table, 7).expect("pin");
        assert!(guard.is_pinned(7).expect("lookup"));
    }
}
