use super::{entity_kind, ClassTag, Command, Entity, ZonePoint};
use crate::error::Result;

entity_kind!(
    /// An item or character. The player is the `ZCharacter` with index -1.
    Thing,
    Thing
);

impl Thing {
    pub fn is_character(&self) -> bool {
        self.class() == ClassTag::Character
    }

    pub fn is_player(&self) -> bool {
        self.index().is_some_and(|index| index < 0)
    }

    /// Enabled commands, in declaration order.
    pub fn commands(&self) -> Result<Vec<Command>> {
        let mut enabled = Vec::new();
        for command in self.container().get_entity_list::<Command>("Commands")? {
            if command.enabled()? {
                enabled.push(command);
            }
        }
        Ok(enabled)
    }

    pub fn inventory(&self) -> Result<Vec<Thing>> {
        self.container().get_entity_list("Inventory")
    }

    /// The zone or thing currently holding this one.
    pub fn owner(&self) -> Result<Option<Entity>> {
        self.container().get_entity("Container")
    }

    pub fn location(&self) -> Result<Option<ZonePoint>> {
        self.container().get_entity("ObjectLocation")
    }

    pub fn locked(&self) -> Result<bool> {
        Ok(self.container().get_bool("Locked")?.unwrap_or(false))
    }
}
