use super::{entity_kind, Entity};
use crate::error::Result;

entity_kind!(
    /// An action offered on a thing. Commands are value objects without an
    /// index, so each lookup yields a fresh handle.
    Command,
    Command
);

impl Command {
    /// Key under which the owner declared the command (`On<Name>` handler).
    pub fn key(&self) -> Result<String> {
        Ok(self.container().get_string("Name")?.unwrap_or_default())
    }

    pub fn text(&self) -> Result<String> {
        Ok(self.container().get_string("Text")?.unwrap_or_default())
    }

    pub fn enabled(&self) -> Result<bool> {
        Ok(self.container().get_bool("Enabled")?.unwrap_or(false))
    }

    /// Whether the command needs a second object to act on.
    pub fn takes_target(&self) -> Result<bool> {
        Ok(self.container().get_bool("CmdWith")?.unwrap_or(false))
    }

    pub fn works_with_all(&self) -> Result<bool> {
        Ok(self.container().get_bool("WorksWithAll")?.unwrap_or(false))
    }

    pub fn works_with(&self) -> Result<Vec<Entity>> {
        self.container().get_entity_list("WorksWithList")
    }

    pub fn owner(&self) -> Result<Option<Entity>> {
        self.container().get_entity("Owner")
    }
}
