use std::fmt;
use std::sync::Arc;

use mlua::{Lua, RegistryKey, Result as LuaResult, Value};

/// Registry-backed reference to a Lua table.
///
/// Holding one keeps the table alive; dropping the last clone lets the
/// interpreter collect it again on the next registry sweep.
#[derive(Clone)]
pub struct TableRef(Arc<RegistryKey>);

/// Registry-backed reference to a Lua function.
#[derive(Clone)]
pub struct FunctionRef(Arc<RegistryKey>);

impl TableRef {
    pub(crate) fn key(&self) -> &RegistryKey {
        &self.0
    }

    pub(crate) fn table<'lua>(&self, lua: &'lua Lua) -> LuaResult<mlua::Table<'lua>> {
        lua.registry_value(&self.0)
    }
}

impl FunctionRef {
    pub(crate) fn function<'lua>(&self, lua: &'lua Lua) -> LuaResult<mlua::Function<'lua>> {
        lua.registry_value(&self.0)
    }
}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableRef({:?})", self.0)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({:?})", self.0)
    }
}

/// Host-side mirror of the Lua values the engine cares about.
///
/// `List` only travels host -> interpreter and is materialised as a fresh
/// array table.
#[derive(Debug, Clone, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Table(TableRef),
    Function(FunctionRef),
    List(Vec<ScriptValue>),
}

/// Shapes a field can be requested as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueShape {
    Boolean,
    Number,
    String,
    Table,
    Function,
}

impl ScriptValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn shape(&self) -> Option<ValueShape> {
        match self {
            ScriptValue::Nil => None,
            ScriptValue::Boolean(_) => Some(ValueShape::Boolean),
            ScriptValue::Number(_) => Some(ValueShape::Number),
            ScriptValue::String(_) => Some(ValueShape::String),
            ScriptValue::Table(_) | ScriptValue::List(_) => Some(ValueShape::Table),
            ScriptValue::Function(_) => Some(ValueShape::Function),
        }
    }

    /// Keeps the value when it has the requested shape, otherwise yields the
    /// shape's default (`Nil`). Numeric strings are accepted as numbers the
    /// same way Lua coerces them.
    pub fn coerce(self, shape: ValueShape) -> ScriptValue {
        match (shape, self) {
            (ValueShape::Number, ScriptValue::String(text)) => text
                .trim()
                .parse::<f64>()
                .map(ScriptValue::Number)
                .unwrap_or_default(),
            (shape, value) if value.shape() == Some(shape) => value,
            _ => ScriptValue::Nil,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            ScriptValue::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            ScriptValue::Function(function) => Some(function),
            _ => None,
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Boolean(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Number(value as f64)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Number(f64::from(value))
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<TableRef> for ScriptValue {
    fn from(value: TableRef) -> Self {
        ScriptValue::Table(value)
    }
}

impl From<FunctionRef> for ScriptValue {
    fn from(value: FunctionRef) -> Self {
        ScriptValue::Function(value)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(values: Vec<T>) -> Self {
        ScriptValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Host enums that cross into the interpreter by name.
pub trait ScriptEnum {
    fn script_name(&self) -> &'static str;
}

pub fn enum_value<E: ScriptEnum>(value: &E) -> ScriptValue {
    ScriptValue::String(value.script_name().to_string())
}

pub(crate) fn to_lua<'lua>(lua: &'lua Lua, value: &ScriptValue) -> LuaResult<Value<'lua>> {
    Ok(match value {
        ScriptValue::Nil => Value::Nil,
        ScriptValue::Boolean(flag) => Value::Boolean(*flag),
        ScriptValue::Number(number) => Value::Number(*number),
        ScriptValue::String(text) => Value::String(lua.create_string(text)?),
        ScriptValue::Table(table) => Value::Table(table.table(lua)?),
        ScriptValue::Function(function) => Value::Function(function.function(lua)?),
        ScriptValue::List(items) => {
            let table = lua.create_table()?;
            for (offset, item) in items.iter().enumerate() {
                table.raw_set(offset + 1, to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

pub(crate) fn from_lua(lua: &Lua, value: Value) -> LuaResult<ScriptValue> {
    Ok(match value {
        Value::Nil => ScriptValue::Nil,
        Value::Boolean(flag) => ScriptValue::Boolean(flag),
        Value::Integer(number) => ScriptValue::Number(number as f64),
        Value::Number(number) => ScriptValue::Number(number),
        Value::String(text) => ScriptValue::String(text.to_string_lossy().into_owned()),
        Value::Table(table) => {
            ScriptValue::Table(TableRef(Arc::new(lua.create_registry_value(table)?)))
        }
        Value::Function(function) => {
            ScriptValue::Function(FunctionRef(Arc::new(lua.create_registry_value(function)?)))
        }
        _ => ScriptValue::Nil,
    })
}

pub(crate) fn args_to_lua<'lua>(
    lua: &'lua Lua,
    args: &[ScriptValue],
) -> LuaResult<mlua::MultiValue<'lua>> {
    let values = args
        .iter()
        .map(|arg| to_lua(lua, arg))
        .collect::<LuaResult<Vec<_>>>()?;
    Ok(mlua::MultiValue::from_vec(values))
}

pub(crate) fn results_from_lua(lua: &Lua, values: mlua::MultiValue) -> LuaResult<Vec<ScriptValue>> {
    values
        .into_iter()
        .map(|value| from_lua(lua, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ScriptValue, ValueShape};

    #[test]
    fn coerce_defaults_on_wrong_shape() {
        let value = ScriptValue::from("north");
        assert!(value.coerce(ValueShape::Boolean).is_nil());
    }

    #[test]
    fn coerce_accepts_numeric_strings() {
        let value = ScriptValue::from(" 12.5 ");
        assert_eq!(value.coerce(ValueShape::Number).as_f64(), Some(12.5));
    }

    #[test]
    fn option_and_vec_conversions() {
        assert!(ScriptValue::from(None::<bool>).is_nil());
        match ScriptValue::from(vec![1_i64, 2, 3]) {
            ScriptValue::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }
}
