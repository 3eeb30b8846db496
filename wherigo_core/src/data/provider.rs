use std::sync::Weak;

use super::container::Container;
use super::factory::ObjectFactory;
use crate::error::Result;
use crate::lua_host::{FunctionRef, LuaGuard, ScriptValue, TableRef};

/// Callable view over one interpreter function, optionally bound to a `self`
/// table that is prepended to every call.
#[derive(Clone)]
pub struct Provider {
    function: FunctionRef,
    this: Option<TableRef>,
    guard: LuaGuard,
    factory: Weak<ObjectFactory>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("function", &self.function)
            .field("bound", &self.this.is_some())
            .finish()
    }
}

impl Provider {
    pub(crate) fn new(
        function: FunctionRef,
        this: Option<TableRef>,
        guard: LuaGuard,
        factory: Weak<ObjectFactory>,
    ) -> Self {
        Provider {
            function,
            this,
            guard,
            factory,
        }
    }

    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    /// Same function bound to a different receiver.
    pub fn bind(&self, this: Option<TableRef>) -> Provider {
        Provider {
            this,
            ..self.clone()
        }
    }

    pub fn invoke(&self, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if let Some(this) = &self.this {
            full.push(ScriptValue::Table(this.clone()));
        }
        full.extend_from_slice(args);
        self.guard.call(&self.function, &full)
    }

    /// First result that is a table, wrapped as a container.
    pub fn invoke_container(&self, args: &[ScriptValue]) -> Result<Option<Container>> {
        Ok(self.invoke(args)?.into_iter().find_map(|value| match value {
            ScriptValue::Table(table) => Some(Container::new(
                table,
                self.guard.clone(),
                self.factory.clone(),
            )),
            _ => None,
        }))
    }
}

impl From<Provider> for ScriptValue {
    fn from(provider: Provider) -> Self {
        ScriptValue::Function(provider.function)
    }
}

impl From<Container> for ScriptValue {
    fn from(container: Container) -> Self {
        ScriptValue::Table(container.table().clone())
    }
}

impl From<&Container> for ScriptValue {
    fn from(container: &Container) -> Self {
        ScriptValue::Table(container.table().clone())
    }
}
