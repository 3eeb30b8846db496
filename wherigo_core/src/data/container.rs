use std::str::FromStr;
use std::sync::{Arc, Weak};

use super::factory::ObjectFactory;
use super::provider::Provider;
use crate::error::{EngineError, Result};
use crate::lua_host::{LuaGuard, ScriptValue, TableRef, ValueShape};
use crate::objects::{Entity, EntityKind};

/// Typed view over one interpreter table.
#[derive(Clone)]
pub struct Container {
    table: TableRef,
    guard: LuaGuard,
    factory: Weak<ObjectFactory>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").field("table", &self.table).finish()
    }
}

/// Conversion from a raw script value in the context of a container.
pub trait FromScript: Sized {
    fn from_script(value: ScriptValue, context: &Container) -> Option<Self>;
}

impl Container {
    pub(crate) fn new(table: TableRef, guard: LuaGuard, factory: Weak<ObjectFactory>) -> Self {
        Container {
            table,
            guard,
            factory,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn guard(&self) -> &LuaGuard {
        &self.guard
    }

    pub(crate) fn factory(&self) -> Result<Arc<ObjectFactory>> {
        self.factory.upgrade().ok_or(EngineError::Disposed)
    }

    pub fn get(&self, key: &str) -> Result<ScriptValue> {
        self.guard.get(&self.table, key)
    }

    pub fn set(&self, key: &str, value: impl Into<ScriptValue>) -> Result<()> {
        self.guard.set(&self.table, key, value)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self
            .guard
            .get_as(&self.table, key, ValueShape::Boolean)?
            .as_bool())
    }

    pub fn get_double(&self, key: &str) -> Result<Option<f64>> {
        Ok(self
            .guard
            .get_as(&self.table, key, ValueShape::Number)?
            .as_f64())
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_double(key)?.map(|value| value as i64))
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.guard.get(&self.table, key)? {
            ScriptValue::String(text) => Ok(Some(text)),
            ScriptValue::Number(number) => Ok(Some(format_number(number))),
            _ => Ok(None),
        }
    }

    /// Parses a string (or numeric) field into a host enum.
    pub fn get_enum<E: FromStr>(&self, key: &str) -> Result<Option<E>> {
        Ok(self
            .get_string(key)?
            .and_then(|text| E::from_str(text.trim()).ok()))
    }

    pub fn get_container(&self, key: &str) -> Result<Option<Container>> {
        Ok(match self.guard.get_as(&self.table, key, ValueShape::Table)? {
            ScriptValue::Table(table) => Some(self.wrap(table)),
            _ => None,
        })
    }

    pub fn get_provider(&self, key: &str) -> Result<Option<Provider>> {
        Ok(
            match self.guard.get_as(&self.table, key, ValueShape::Function)? {
                ScriptValue::Function(function) => Some(Provider::new(
                    function,
                    Some(self.table.clone()),
                    self.guard.clone(),
                    self.factory.clone(),
                )),
                _ => None,
            },
        )
    }

    /// Snapshot of the values stored under `key`, array entries in index
    /// order first. Entries that do not convert to `T` are skipped.
    pub fn get_list<T: FromScript>(&self, key: &str) -> Result<Vec<T>> {
        let Some(list) = self.get_container(key)? else {
            return Ok(Vec::new());
        };
        Ok(list
            .values()?
            .into_iter()
            .filter_map(|value| T::from_script(value, self))
            .collect())
    }

    /// All values of this table, array part first in index order.
    pub fn values(&self) -> Result<Vec<ScriptValue>> {
        let mut indexed = Vec::new();
        let mut keyed = Vec::new();
        for pair in self.guard.pairs(&self.table) {
            let (key, value) = pair?;
            match key {
                ScriptValue::Number(position) => indexed.push((position, value)),
                _ => keyed.push(value),
            }
        }
        indexed.sort_by(|left, right| left.0.total_cmp(&right.0));
        let mut values: Vec<ScriptValue> = indexed.into_iter().map(|(_, value)| value).collect();
        values.extend(keyed);
        Ok(values)
    }

    /// String-keyed entries of this table. Values are not resolved.
    pub fn entries(&self) -> Result<Vec<(String, ScriptValue)>> {
        let mut entries = Vec::new();
        for pair in self.guard.pairs(&self.table) {
            if let (ScriptValue::String(key), value) = pair? {
                entries.push((key, value));
            }
        }
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(entries)
    }

    /// Resolves the table under `key` through the identity factory.
    pub fn get_entity<T: EntityKind>(&self, key: &str) -> Result<Option<T>> {
        let ScriptValue::Table(table) = self.guard.get_as(&self.table, key, ValueShape::Table)?
        else {
            return Ok(None);
        };
        let entity = self.factory()?.resolve(&table)?;
        downcast(entity).map(Some)
    }

    /// Resolves every table under `key`; entities of other kinds are skipped.
    pub fn get_entity_list<T: EntityKind>(&self, key: &str) -> Result<Vec<T>> {
        let Some(list) = self.get_container(key)? else {
            return Ok(Vec::new());
        };
        let factory = self.factory()?;
        let mut entities = Vec::new();
        for value in list.values()? {
            if let ScriptValue::Table(table) = value {
                if let Some(entity) = T::from_entity(factory.resolve(&table)?) {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }

    /// Calls `self[name](self, args...)`.
    pub fn call_bound(&self, name: &str, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
        self.guard.call_method(&self.table, name, args)
    }

    pub fn class_name(&self) -> Result<Option<String>> {
        self.get_string("ClassName")
    }

    pub fn obj_index(&self) -> Result<Option<i64>> {
        self.get_int("ObjIndex")
    }

    pub fn same_table(&self, other: &Container) -> Result<bool> {
        self.guard.same_table(&self.table, &other.table)
    }

    pub(crate) fn wrap(&self, table: TableRef) -> Container {
        Container::new(table, self.guard.clone(), self.factory.clone())
    }
}

pub(crate) fn downcast<T: EntityKind>(entity: Entity) -> Result<T> {
    let index = entity.index().unwrap_or_default();
    let actual = entity.type_name().to_string();
    T::from_entity(entity).ok_or(EngineError::TypeMismatch {
        index,
        requested: T::NAME,
        actual,
    })
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

impl FromScript for ScriptValue {
    fn from_script(value: ScriptValue, _context: &Container) -> Option<Self> {
        Some(value)
    }
}

impl FromScript for bool {
    fn from_script(value: ScriptValue, _context: &Container) -> Option<Self> {
        value.as_bool()
    }
}

impl FromScript for f64 {
    fn from_script(value: ScriptValue, _context: &Container) -> Option<Self> {
        value.coerce(ValueShape::Number).as_f64()
    }
}

impl FromScript for i64 {
    fn from_script(value: ScriptValue, _context: &Container) -> Option<Self> {
        value.coerce(ValueShape::Number).as_f64().map(|number| number as i64)
    }
}

impl FromScript for String {
    fn from_script(value: ScriptValue, _context: &Container) -> Option<Self> {
        match value {
            ScriptValue::String(text) => Some(text),
            ScriptValue::Number(number) => Some(format_number(number)),
            _ => None,
        }
    }
}

impl FromScript for Container {
    fn from_script(value: ScriptValue, context: &Container) -> Option<Self> {
        match value {
            ScriptValue::Table(table) => Some(context.wrap(table)),
            _ => None,
        }
    }
}

impl FromScript for Provider {
    fn from_script(value: ScriptValue, context: &Container) -> Option<Self> {
        match value {
            ScriptValue::Function(function) => Some(Provider::new(
                function,
                None,
                context.guard.clone(),
                context.factory.clone(),
            )),
            _ => None,
        }
    }
}
