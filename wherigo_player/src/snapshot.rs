//! JSON save states.
//!
//! A snapshot records, per object, its scalar fields, the index of the object
//! holding it and (for things) its location. Functions and tables other than
//! those relations are left to the cartridge's own `OnSync`/`OnRestore`.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use wherigo_core::{Entity, GeoPoint, ObjectGraph, ScriptValue};

const FORMAT_VERSION: u32 = 1;

/// Keys the runtime owns; restoring them would corrupt identity.
const RESERVED: &[&str] = &["ClassName", "ObjIndex"];

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    objects: BTreeMap<i64, ObjectRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectRecord {
    class: String,
    fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<GeoPoint>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSnapshot;

impl JsonSnapshot {
    fn entities(graph: &ObjectGraph) -> Result<Vec<Entity>> {
        let mut entities = vec![
            Entity::Cartridge(graph.cartridge().clone()),
            Entity::Thing(graph.player().clone()),
        ];
        entities.extend(graph.objects()?);
        Ok(entities)
    }

    fn record(graph: &ObjectGraph, entity: &Entity) -> Result<ObjectRecord> {
        let mut fields = Map::new();
        if let Some(raw) = graph.fields(entity)? {
            for (key, value) in raw.entries()? {
                if RESERVED.contains(&key.as_str()) {
                    continue;
                }
                if let Some(value) = to_json(&value) {
                    fields.insert(key, value);
                }
            }
        }
        let (container, location) = match entity {
            Entity::Thing(thing) => (
                thing.owner()?.and_then(|owner| owner.index()),
                thing.location()?.map(|point| point.to_point()).transpose()?,
            ),
            _ => (None, None),
        };
        Ok(ObjectRecord {
            class: entity.class().to_string(),
            fields,
            container,
            location,
        })
    }

    fn apply(graph: &ObjectGraph, entity: &Entity, record: &ObjectRecord) -> Result<()> {
        let Some(raw) = graph.fields(entity)? else {
            return Ok(());
        };
        for (key, value) in &record.fields {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            match from_json(value) {
                Some(value) => raw.set(key, value)?,
                None => debug!("skipping non-scalar field {key}"),
            }
        }
        if let Some(location) = record.location {
            raw.set("ObjectLocation", graph.zone_point(location)?)?;
        }
        Ok(())
    }
}

impl wherigo_core::SaveSerializer for JsonSnapshot {
    fn save(&self, graph: &ObjectGraph, out: &mut dyn Write) -> Result<()> {
        let mut objects = BTreeMap::new();
        for entity in Self::entities(graph)? {
            let Some(index) = entity.index() else {
                continue;
            };
            objects.insert(index, Self::record(graph, &entity)?);
        }
        let snapshot = Snapshot {
            version: FORMAT_VERSION,
            objects,
        };
        serde_json::to_writer_pretty(&mut *out, &snapshot).context("writing snapshot")?;
        out.flush()?;
        Ok(())
    }

    fn restore(&self, graph: &ObjectGraph, input: &mut dyn Read) -> Result<()> {
        let snapshot: Snapshot = serde_json::from_reader(input).context("parsing snapshot")?;
        anyhow::ensure!(
            snapshot.version == FORMAT_VERSION,
            "unsupported snapshot version {}",
            snapshot.version
        );

        let mut restored = Vec::new();
        for (&index, record) in &snapshot.objects {
            let Some(entity) = graph.resolve(index)? else {
                warn!("snapshot object #{index} does not exist in this cartridge");
                continue;
            };
            if entity.class().to_string() != record.class {
                warn!(
                    "snapshot object #{index} is a {} but the cartridge has a {}",
                    record.class,
                    entity.class()
                );
                continue;
            }
            Self::apply(graph, &entity, record)?;
            restored.push((entity, record.container));
        }

        for (entity, container) in restored {
            if !matches!(entity, Entity::Thing(_)) {
                continue;
            }
            let owner = match container {
                Some(index) => graph.resolve(index)?,
                None => None,
            };
            graph.move_to(&entity, owner.as_ref())?;
        }
        Ok(())
    }
}

fn to_json(value: &ScriptValue) -> Option<Value> {
    match value {
        ScriptValue::Boolean(flag) => Some(Value::Bool(*flag)),
        ScriptValue::Number(number) => Number::from_f64(*number).map(Value::Number),
        ScriptValue::String(text) => Some(Value::String(text.clone())),
        _ => None,
    }
}

fn from_json(value: &Value) -> Option<ScriptValue> {
    match value {
        Value::Bool(flag) => Some(ScriptValue::Boolean(*flag)),
        Value::Number(number) => number.as_f64().map(ScriptValue::Number),
        Value::String(text) => Some(ScriptValue::String(text.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{from_json, to_json};
    use serde_json::json;
    use wherigo_core::ScriptValue;

    #[test]
    fn only_scalars_cross_into_json() {
        assert_eq!(to_json(&ScriptValue::Boolean(true)), Some(json!(true)));
        assert_eq!(to_json(&ScriptValue::from("lamp")), Some(json!("lamp")));
        assert_eq!(to_json(&ScriptValue::Number(f64::NAN)), None);
        assert_eq!(to_json(&ScriptValue::Nil), None);
        assert!(matches!(
            from_json(&json!(2.5)),
            Some(ScriptValue::Number(number)) if number == 2.5
        ));
        assert!(from_json(&json!({ "nested": 1 })).is_none());
    }
}
