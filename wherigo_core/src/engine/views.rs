//! Derived views over the object graph and the player's position.

use log::debug;

use super::session::Session;
use crate::error::Result;
use crate::host::{GeoMath, GeoPoint};
use crate::lua_host::enum_value;
use crate::objects::{ClassTag, Entity, Task, Thing, Zone, ZoneState};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum View {
    Tasks,
    Zones,
    Inventory,
    Objects,
}

pub(crate) const ALL_VIEWS: [View; 4] = [View::Tasks, View::Zones, View::Inventory, View::Objects];

/// Session-scoped mutable state owned by the engine's play lock.
#[derive(Default)]
pub(crate) struct PlayState {
    pub(crate) location: Option<GeoPoint>,
    pub(crate) accuracy: f64,
    pub(crate) heading: f64,
    pub(crate) generation: u64,
    pub(crate) tasks: Option<Vec<Task>>,
    pub(crate) zones: Option<Vec<Zone>>,
    pub(crate) inventory: Option<Vec<Thing>>,
    pub(crate) objects: Option<Vec<Thing>>,
}

impl PlayState {
    pub(crate) fn invalidate(&mut self, views: &[View]) {
        if views.is_empty() {
            return;
        }
        for view in views {
            match view {
                View::Tasks => self.tasks = None,
                View::Zones => self.zones = None,
                View::Inventory => self.inventory = None,
                View::Objects => self.objects = None,
            }
        }
        self.generation += 1;
    }
}

/// Views whose membership depends on `property` of an object of `class`.
pub(crate) fn affected_views(class: ClassTag, property: &str) -> &'static [View] {
    let membership = matches!(property, "Active" | "Visible");
    match class {
        ClassTag::Task if membership => &[View::Tasks],
        ClassTag::Zone if membership => &[View::Zones, View::Objects],
        ClassTag::Item | ClassTag::Character if membership => &[View::Inventory, View::Objects],
        _ => &[],
    }
}

pub(crate) fn active_visible_tasks(session: &Session) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for entity in session.cartridge()?.all_objects()? {
        if let Entity::Task(task) = entity {
            if task.active()? && task.visible()? {
                tasks.push(task);
            }
        }
    }
    Ok(tasks)
}

pub(crate) fn active_visible_zones(session: &Session) -> Result<Vec<Zone>> {
    let mut zones = Vec::new();
    for entity in session.cartridge()?.all_objects()? {
        if let Entity::Zone(zone) = entity {
            if zone.active()? && zone.visible()? {
                zones.push(zone);
            }
        }
    }
    Ok(zones)
}

pub(crate) fn visible_inventory(session: &Session) -> Result<Vec<Thing>> {
    let mut things = Vec::new();
    for thing in session.player()?.inventory()? {
        if thing.visible()? {
            things.push(thing);
        }
    }
    Ok(things)
}

/// Visible things lying in zones the player is inside of or close to.
pub(crate) fn visible_objects(session: &Session, zones: &[Zone]) -> Result<Vec<Thing>> {
    let mut things = Vec::new();
    for zone in zones {
        if !matches!(zone.state()?, ZoneState::Inside | ZoneState::Proximity) {
            continue;
        }
        for thing in zone.inventory()? {
            if !thing.is_player() && thing.visible()? {
                things.push(thing);
            }
        }
    }
    Ok(things)
}

/// Proximity classification of `point` against a zone polygon.
/// A negative `distant_range` means the zone is never out of range.
pub(crate) fn classify(
    geo: &dyn GeoMath,
    polygon: &[GeoPoint],
    point: GeoPoint,
    proximity_range: f64,
    distant_range: f64,
) -> ZoneState {
    if polygon.len() >= 3 && geo.contains(polygon, point) {
        return ZoneState::Inside;
    }
    let (distance, _) = geo.vector_to_polygon(polygon, point);
    if distance <= proximity_range {
        ZoneState::Proximity
    } else if distant_range < 0.0 || distance <= distant_range {
        ZoneState::Distant
    } else {
        ZoneState::NotInRange
    }
}

pub(crate) fn zone_polygon(zone: &Zone) -> Result<Vec<GeoPoint>> {
    zone.points()?.iter().map(|point| point.to_point()).collect()
}

/// Recomputes every active zone's state for `point`, running `Zone:SetState`
/// where it changed. Executes on the queue worker.
pub(crate) fn update_zones(session: &Session, geo: &dyn GeoMath, point: GeoPoint) -> Result<()> {
    for entity in session.cartridge()?.all_objects()? {
        let Entity::Zone(zone) = entity else {
            continue;
        };
        if !zone.active()? {
            continue;
        }
        let proximity = match zone.proximity_range()? {
            Some(range) => range.meters()?,
            None => 0.0,
        };
        let distant = match zone.distance_range()? {
            Some(range) => range.meters()?,
            None => -1.0,
        };
        let state = classify(geo, &zone_polygon(&zone)?, point, proximity, distant);
        if state != zone.state()? {
            debug!("zone #{:?} is now {state:?}", zone.index());
            zone.container().call_bound("SetState", &[enum_value(&state)])?;
        }
    }
    Ok(())
}
