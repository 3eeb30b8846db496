use super::{entity_kind, Entity, ZonePoint};
use crate::error::Result;

entity_kind!(
    /// The cartridge singleton (`ObjIndex == 0`).
    Cartridge,
    Cartridge
);

impl Cartridge {
    pub fn starting_location(&self) -> Result<Option<ZonePoint>> {
        self.container().get_entity("StartingLocation")
    }

    pub fn completion_code(&self) -> Result<String> {
        Ok(self
            .container()
            .get_string("CompletionCode")?
            .unwrap_or_default())
    }

    pub fn complete(&self) -> Result<bool> {
        Ok(self.container().get_bool("Complete")?.unwrap_or(false))
    }

    /// Every indexed object the cartridge declared, in index order.
    pub fn all_objects(&self) -> Result<Vec<Entity>> {
        self.container().get_entity_list("AllZObjects")
    }
}
