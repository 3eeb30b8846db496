use std::str::FromStr;

use super::{entity_kind, Distance, Thing, ZonePoint};
use crate::error::Result;
use crate::lua_host::ScriptEnum;

entity_kind!(Zone, Zone);

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ZoneState {
    Inside,
    Proximity,
    Distant,
    NotInRange,
}

impl FromStr for ZoneState {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "Inside" => Ok(ZoneState::Inside),
            "Proximity" => Ok(ZoneState::Proximity),
            "Distant" => Ok(ZoneState::Distant),
            "NotInRange" => Ok(ZoneState::NotInRange),
            _ => Err(()),
        }
    }
}

impl ScriptEnum for ZoneState {
    fn script_name(&self) -> &'static str {
        match self {
            ZoneState::Inside => "Inside",
            ZoneState::Proximity => "Proximity",
            ZoneState::Distant => "Distant",
            ZoneState::NotInRange => "NotInRange",
        }
    }
}

impl Zone {
    pub fn state(&self) -> Result<ZoneState> {
        Ok(self
            .container()
            .get_enum("State")?
            .unwrap_or(ZoneState::NotInRange))
    }

    pub fn points(&self) -> Result<Vec<ZonePoint>> {
        self.container().get_entity_list("Points")
    }

    pub fn original_point(&self) -> Result<Option<ZonePoint>> {
        self.container().get_entity("OriginalPoint")
    }

    pub fn proximity_range(&self) -> Result<Option<Distance>> {
        self.container().get_entity("ProximityRange")
    }

    pub fn distance_range(&self) -> Result<Option<Distance>> {
        self.container().get_entity("DistanceRange")
    }

    pub fn inventory(&self) -> Result<Vec<Thing>> {
        self.container().get_entity_list("Inventory")
    }
}
