use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;

use super::container::{downcast, Container};
use super::provider::Provider;
use crate::error::{EngineError, Result};
use crate::lua_host::{FunctionRef, LuaGuard, ScriptValue, TableRef, ValueShape};
use crate::objects::{Cartridge, ClassTag, Entity, EntityKind, Thing};

#[derive(Default)]
struct Singletons {
    cartridge: Option<Cartridge>,
    player: Option<Thing>,
}

/// Maps script tables to long-lived, identity-stable host entities.
///
/// Indices below zero are the player, index zero the cartridge; both are
/// installed by the `bootstrap_*` methods and never enter the cache. Every
/// other indexed table is cached and pinned for the session; tables without
/// an index are value types and get a fresh wrapper on every lookup.
pub struct ObjectFactory {
    guard: LuaGuard,
    this: Weak<ObjectFactory>,
    cache: Mutex<BTreeMap<i64, Entity>>,
    singletons: Mutex<Singletons>,
}

impl ObjectFactory {
    pub fn new(guard: LuaGuard) -> Arc<Self> {
        Arc::new_cyclic(|this| ObjectFactory {
            guard,
            this: this.clone(),
            cache: Mutex::new(BTreeMap::new()),
            singletons: Mutex::new(Singletons::default()),
        })
    }

    pub fn guard(&self) -> &LuaGuard {
        &self.guard
    }

    pub fn container(&self, table: TableRef) -> Container {
        Container::new(table, self.guard.clone(), self.this.clone())
    }

    pub fn provider(&self, function: FunctionRef, this: Option<TableRef>) -> Provider {
        Provider::new(function, this, self.guard.clone(), self.this.clone())
    }

    /// Installs the player singleton. Runs before the cartridge payload so
    /// events raised while it loads can already refer to the player.
    pub fn bootstrap_player(&self, table: TableRef) -> Result<Thing> {
        let class = self
            .guard
            .get_as(&table, "ClassName", ValueShape::String)?
            .as_str()
            .and_then(|name| name.parse::<ClassTag>().ok())
            .unwrap_or(ClassTag::Character);
        let player = match Entity::build(self.container(table), class, Some(-1)) {
            Entity::Thing(player) => player,
            other => {
                return Err(EngineError::TypeMismatch {
                    index: -1,
                    requested: Thing::NAME,
                    actual: other.type_name().to_string(),
                })
            }
        };
        self.singletons.lock().player = Some(player.clone());
        Ok(player)
    }

    /// Installs the cartridge singleton captured from the payload.
    pub fn bootstrap_cartridge(&self, table: TableRef) -> Result<Cartridge> {
        let cartridge = match Entity::build(self.container(table), ClassTag::Cartridge, Some(0)) {
            Entity::Cartridge(cartridge) => cartridge,
            other => {
                return Err(EngineError::TypeMismatch {
                    index: 0,
                    requested: Cartridge::NAME,
                    actual: other.type_name().to_string(),
                })
            }
        };
        self.singletons.lock().cartridge = Some(cartridge.clone());
        Ok(cartridge)
    }

    pub fn cartridge(&self) -> Option<Cartridge> {
        self.singletons.lock().cartridge.clone()
    }

    pub fn player(&self) -> Option<Thing> {
        self.singletons.lock().player.clone()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Host entity for `table`, creating and caching it on first sight.
    pub fn resolve(&self, table: &TableRef) -> Result<Entity> {
        let class = self.live_class(table)?;
        let index = self
            .guard
            .get_as(table, "ObjIndex", ValueShape::Number)?
            .as_f64()
            .map(|index| index as i64);

        let Some(index) = index else {
            return Ok(Entity::build(self.container(table.clone()), class, None));
        };
        if index < 0 {
            return self.player().map(Entity::Thing).ok_or(EngineError::NotFound(index));
        }
        if index == 0 {
            return self
                .cartridge()
                .map(Entity::Cartridge)
                .ok_or(EngineError::NotFound(index));
        }

        let cached = self.cache.lock().get(&index).cloned();
        if let Some(entity) = cached {
            return check_class(entity, index, class);
        }

        let entity = Entity::build(self.container(table.clone()), class, Some(index));
        self.guard.pin(table, index)?;
        let entity = self
            .cache
            .lock()
            .entry(index)
            .or_insert(entity)
            .clone();
        debug!("cached {} #{index}", entity.class());
        check_class(entity, index, class)
    }

    /// Resolves a script value when it is a table; `None` otherwise.
    pub fn resolve_value(&self, value: &ScriptValue) -> Result<Option<Entity>> {
        match value {
            ScriptValue::Table(table) => self.resolve(table).map(Some),
            _ => Ok(None),
        }
    }

    pub fn resolve_by_index(&self, index: i64) -> Result<Entity> {
        self.try_resolve_by_index(index)?
            .ok_or(EngineError::NotFound(index))
    }

    /// Best-effort lookup: `Ok(None)` when no such object exists.
    pub fn try_resolve_by_index(&self, index: i64) -> Result<Option<Entity>> {
        if index < 0 {
            return Ok(self.player().map(Entity::Thing));
        }
        if index == 0 {
            return Ok(self.cartridge().map(Entity::Cartridge));
        }
        let cached = self.cache.lock().get(&index).cloned();
        if let Some(entity) = cached {
            let live = self.live_class(entity.container().table())?;
            return check_class(entity, index, live).map(Some);
        }
        let Some(cartridge) = self.cartridge() else {
            return Ok(None);
        };
        let Some(all) = cartridge.container().get_container("AllZObjects")? else {
            return Ok(None);
        };
        match self.guard.get_index(all.table(), index)? {
            ScriptValue::Table(table) => self.resolve(&table).map(Some),
            _ => Ok(None),
        }
    }

    /// Class tag currently declared by the script table.
    fn live_class(&self, table: &TableRef) -> Result<ClassTag> {
        let class_name = self
            .guard
            .get_as(table, "ClassName", ValueShape::String)?
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        class_name
            .parse::<ClassTag>()
            .map_err(|_| EngineError::UnknownClass(class_name))
    }

    /// Typed lookup; a known index of another kind is a mismatch error.
    pub fn get_typed<T: EntityKind>(&self, index: i64) -> Result<T> {
        downcast(self.resolve_by_index(index)?)
    }
}

fn check_class(entity: Entity, index: i64, live: ClassTag) -> Result<Entity> {
    if entity.class() == live {
        Ok(entity)
    } else {
        Err(EngineError::ClassMismatch {
            index,
            cached: entity.class().to_string(),
            live: live.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectFactory;
    use crate::error::EngineError;
    use crate::lua_host::{GuardPolicy, LuaGuard, ScriptValue};
    use crate::objects::{Entity, Thing, Zone};

    fn factory_with(script: &str) -> std::sync::Arc<ObjectFactory> {
        let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
        guard.load(script.as_bytes(), "test").expect("chunk");
        let factory = ObjectFactory::new(guard.clone());
        let cart = guard.global("cart").expect("cart");
        let player = guard.global("player").expect("player");
        factory
            .bootstrap_player(player.as_table().expect("player table").clone())
            .expect("player");
        factory
            .bootstrap_cartridge(cart.as_table().expect("cart table").clone())
            .expect("cartridge");
        factory
    }

    const GRAPH: &str = r#"
        cart = { ClassName = "ZCartridge", ObjIndex = 0 }
        player = { ClassName = "ZCharacter", ObjIndex = -1, Name = "Player" }
        lamp = { ClassName = "ZItem", ObjIndex = 7, Name = "Lamp" }
        park = { ClassName = "Zone", ObjIndex = 8, Name = "Park" }
        point = { ClassName = "ZonePoint", latitude = 1, longitude = 2 }
        cart.AllZObjects = { [0] = cart, [7] = lamp, [8] = park }
    "#;

    #[test]
    fn indexed_tables_resolve_to_one_instance() {
        let factory = factory_with(GRAPH);
        let first = factory.resolve_by_index(7).expect("lamp");
        let second = factory.resolve_by_index(7).expect("lamp again");
        assert!(first.ptr_eq(&second));
        assert_eq!(factory.cached_count(), 1);
        assert!(factory.guard().is_pinned(7).expect("pin lookup"));
    }

    #[test]
    fn singletons_bypass_the_cache() {
        let factory = factory_with(GRAPH);
        let player = factory.resolve_by_index(-1).expect("player");
        let cart = factory.resolve_by_index(0).expect("cartridge");
        assert!(matches!(player, Entity::Thing(ref thing) if thing.is_player()));
        assert!(matches!(cart, Entity::Cartridge(_)));
        assert_eq!(factory.cached_count(), 0);
        assert!(!factory.guard().is_pinned(0).expect("pin lookup"));
    }

    #[test]
    fn value_types_are_never_cached() {
        let factory = factory_with(GRAPH);
        let point = factory.guard().global("point").expect("point");
        let first = factory.resolve_value(&point).expect("resolve").expect("entity");
        let second = factory.resolve_value(&point).expect("resolve").expect("entity");
        assert!(!first.ptr_eq(&second));
        assert_eq!(factory.cached_count(), 0);
    }

    #[test]
    fn typed_lookup_reports_both_types() {
        let factory = factory_with(GRAPH);
        assert!(factory.get_typed::<Thing>(7).is_ok());
        match factory.get_typed::<Zone>(7) {
            Err(EngineError::TypeMismatch {
                index,
                requested,
                actual,
            }) => {
                assert_eq!(index, 7);
                assert_eq!(requested, "Zone");
                assert_eq!(actual, "Thing");
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn class_drift_is_a_hard_error() {
        let factory = factory_with(GRAPH);
        factory.resolve_by_index(7).expect("lamp");
        factory
            .guard()
            .load(b"lamp.ClassName = 'ZTask'", "drift")
            .expect("chunk");
        let lamp = factory.guard().global("lamp").expect("lamp");
        let err = factory.resolve_value(&lamp).unwrap_err();
        assert!(matches!(err, EngineError::ClassMismatch { index: 7, .. }));
    }

    #[test]
    fn class_drift_is_caught_by_index_lookups() {
        let factory = factory_with(GRAPH);
        factory.resolve_by_index(7).expect("lamp");
        factory
            .guard()
            .load(b"lamp.ClassName = 'ZTask'", "drift")
            .expect("chunk");
        assert!(matches!(
            factory.resolve_by_index(7),
            Err(EngineError::ClassMismatch { index: 7, .. })
        ));
        assert!(matches!(
            factory.try_resolve_by_index(7),
            Err(EngineError::ClassMismatch { index: 7, .. })
        ));
    }

    #[test]
    fn missing_index_has_a_quiet_variant() {
        let factory = factory_with(GRAPH);
        assert!(matches!(
            factory.resolve_by_index(99),
            Err(EngineError::NotFound(99))
        ));
        assert!(factory.try_resolve_by_index(99).expect("lookup").is_none());
    }

    #[test]
    fn unknown_class_is_rejected() {
        let factory = factory_with(GRAPH);
        let odd = factory
            .guard()
            .load(b"return { ClassName = 'Spaceship', ObjIndex = 12 }", "odd")
            .expect("chunk");
        let err = factory
            .resolve_value(odd.first().unwrap_or(&ScriptValue::Nil))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownClass(name) if name == "Spaceship"));
    }
}
