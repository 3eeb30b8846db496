use std::str::FromStr;

use super::entity_kind;
use crate::error::Result;
use crate::host::GeoPoint;
use crate::lua_host::ScriptEnum;

entity_kind!(
    /// A coordinate value (`Wherigo.ZonePoint`). Never cached.
    ZonePoint,
    ZonePoint
);

entity_kind!(
    /// A length value (`Wherigo.Distance`), stored in meters. Never cached.
    Distance,
    Distance
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Feet,
    Miles,
    NauticalMiles,
}

impl DistanceUnit {
    pub fn meters_per_unit(self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Kilometers => 1000.0,
            DistanceUnit::Feet => 0.3048,
            DistanceUnit::Miles => 1609.344,
            DistanceUnit::NauticalMiles => 1852.0,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "m" | "meters" => DistanceUnit::Meters,
            "km" | "kilometers" => DistanceUnit::Kilometers,
            "ft" | "feet" => DistanceUnit::Feet,
            "mi" | "miles" => DistanceUnit::Miles,
            "nauticalmiles" => DistanceUnit::NauticalMiles,
            _ => return Err(()),
        })
    }
}

impl ScriptEnum for DistanceUnit {
    fn script_name(&self) -> &'static str {
        match self {
            DistanceUnit::Meters => "meters",
            DistanceUnit::Kilometers => "kilometers",
            DistanceUnit::Feet => "feet",
            DistanceUnit::Miles => "miles",
            DistanceUnit::NauticalMiles => "nauticalmiles",
        }
    }
}

impl ZonePoint {
    pub fn latitude(&self) -> Result<f64> {
        Ok(self.container().get_double("latitude")?.unwrap_or_default())
    }

    pub fn longitude(&self) -> Result<f64> {
        Ok(self.container().get_double("longitude")?.unwrap_or_default())
    }

    pub fn altitude(&self) -> Result<f64> {
        Ok(self.container().get_double("altitude")?.unwrap_or_default())
    }

    pub fn to_point(&self) -> Result<GeoPoint> {
        Ok(GeoPoint {
            latitude: self.latitude()?,
            longitude: self.longitude()?,
            altitude: self.altitude()?,
        })
    }
}

impl Distance {
    pub fn meters(&self) -> Result<f64> {
        Ok(self.container().get_double("value")?.unwrap_or_default())
    }

    pub fn value_in(&self, unit: DistanceUnit) -> Result<f64> {
        Ok(self.meters()? / unit.meters_per_unit())
    }
}

#[cfg(test)]
mod tests {
    use super::DistanceUnit;

    #[test]
    fn units_parse_case_insensitively() {
        assert_eq!("Feet".parse::<DistanceUnit>(), Ok(DistanceUnit::Feet));
        assert_eq!("km".parse::<DistanceUnit>(), Ok(DistanceUnit::Kilometers));
        assert!("furlongs".parse::<DistanceUnit>().is_err());
    }
}
