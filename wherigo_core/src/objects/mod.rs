//! Host-side entity types backed by script tables.
//!
//! Every concrete kind is a cheap handle around a shared [`WherigoObject`];
//! identity is the `Arc` pointer, so two handles from the identity cache for
//! the same index compare equal with [`Entity::ptr_eq`].

mod cartridge;
mod command;
mod input;
mod media;
mod task;
mod thing;
mod timer;
mod values;
mod zone;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::Container;
use crate::error::Result;

pub use cartridge::Cartridge;
pub use command::Command;
pub use input::{Input, InputKind};
pub use media::{Media, MediaKind, MediaResource};
pub use task::{Task, TaskState};
pub use thing::Thing;
pub use timer::{Timer, TimerKind};
pub use values::{Distance, DistanceUnit, ZonePoint};
pub use zone::{Zone, ZoneState};

/// Script class names understood by the factory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ClassTag {
    Cartridge,
    Character,
    Item,
    Task,
    Timer,
    Input,
    Media,
    Zone,
    Command,
    ReciprocalCommand,
    ZonePoint,
    Distance,
}

impl ClassTag {
    pub fn script_name(self) -> &'static str {
        match self {
            ClassTag::Cartridge => "ZCartridge",
            ClassTag::Character => "ZCharacter",
            ClassTag::Item => "ZItem",
            ClassTag::Task => "ZTask",
            ClassTag::Timer => "ZTimer",
            ClassTag::Input => "ZInput",
            ClassTag::Media => "ZMedia",
            ClassTag::Zone => "Zone",
            ClassTag::Command => "ZCommand",
            ClassTag::ReciprocalCommand => "ZReciprocalCommand",
            ClassTag::ZonePoint => "ZonePoint",
            ClassTag::Distance => "Distance",
        }
    }
}

impl FromStr for ClassTag {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value {
            "ZCartridge" => ClassTag::Cartridge,
            "ZCharacter" => ClassTag::Character,
            "ZItem" => ClassTag::Item,
            "ZTask" => ClassTag::Task,
            "ZTimer" => ClassTag::Timer,
            "ZInput" => ClassTag::Input,
            "ZMedia" => ClassTag::Media,
            "Zone" => ClassTag::Zone,
            "ZCommand" => ClassTag::Command,
            "ZReciprocalCommand" => ClassTag::ReciprocalCommand,
            "ZonePoint" => ClassTag::ZonePoint,
            "Distance" => ClassTag::Distance,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for ClassTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script_name())
    }
}

type PropertyListener = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared by every handle to one script entity.
pub struct WherigoObject {
    container: Container,
    class: ClassTag,
    index: Option<i64>,
    listeners: Mutex<Vec<PropertyListener>>,
}

impl WherigoObject {
    fn new(container: Container, class: ClassTag, index: Option<i64>) -> Self {
        WherigoObject {
            container,
            class,
            index,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn class(&self) -> ClassTag {
        self.class
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.container.get_string("Name")?.unwrap_or_default())
    }

    pub fn description(&self) -> Result<String> {
        Ok(self
            .container
            .get_string("Description")?
            .unwrap_or_default())
    }

    pub fn visible(&self) -> Result<bool> {
        Ok(self.container.get_bool("Visible")?.unwrap_or(false))
    }

    pub fn active(&self) -> Result<bool> {
        Ok(self.container.get_bool("Active")?.unwrap_or(false))
    }

    pub fn media(&self) -> Result<Option<Media>> {
        self.container.get_entity("Media")
    }

    pub fn icon(&self) -> Result<Option<Media>> {
        self.container.get_entity("Icon")
    }

    /// Subscribes to per-object property change notifications.
    pub fn on_property_changed(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub(crate) fn notify_property_changed(&self, property: &str) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(property);
        }
    }
}

impl fmt::Debug for WherigoObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WherigoObject")
            .field("class", &self.class)
            .field("index", &self.index)
            .finish()
    }
}

/// Implemented by every typed handle so lookups can request a concrete kind.
pub trait EntityKind: Sized + Clone {
    const NAME: &'static str;

    fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! entity_kind {
    ($(#[$meta:meta])* $name:ident, $variant:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name(pub(crate) std::sync::Arc<crate::objects::WherigoObject>);

        impl std::ops::Deref for $name {
            type Target = crate::objects::WherigoObject;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl $name {
            pub fn ptr_eq(&self, other: &Self) -> bool {
                std::sync::Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl crate::objects::EntityKind for $name {
            const NAME: &'static str = stringify!($name);

            fn from_entity(entity: crate::objects::Entity) -> Option<Self> {
                match entity {
                    crate::objects::Entity::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl From<$name> for crate::objects::Entity {
            fn from(value: $name) -> Self {
                crate::objects::Entity::$variant(value)
            }
        }

        impl From<&$name> for crate::lua_host::ScriptValue {
            fn from(value: &$name) -> Self {
                crate::lua_host::ScriptValue::Table(value.container().table().clone())
            }
        }
    };
}
pub(crate) use entity_kind;

/// Any host entity, dispatched on its script class.
#[derive(Clone, Debug)]
pub enum Entity {
    Cartridge(Cartridge),
    Thing(Thing),
    Task(Task),
    Timer(Timer),
    Input(Input),
    Media(Media),
    Zone(Zone),
    Command(Command),
    ZonePoint(ZonePoint),
    Distance(Distance),
}

impl Entity {
    pub(crate) fn build(container: Container, class: ClassTag, index: Option<i64>) -> Entity {
        let object = Arc::new(WherigoObject::new(container, class, index));
        match class {
            ClassTag::Cartridge => Entity::Cartridge(Cartridge(object)),
            ClassTag::Character | ClassTag::Item => Entity::Thing(Thing(object)),
            ClassTag::Task => Entity::Task(Task(object)),
            ClassTag::Timer => Entity::Timer(Timer(object)),
            ClassTag::Input => Entity::Input(Input(object)),
            ClassTag::Media => Entity::Media(Media(object)),
            ClassTag::Zone => Entity::Zone(Zone(object)),
            ClassTag::Command | ClassTag::ReciprocalCommand => Entity::Command(Command(object)),
            ClassTag::ZonePoint => Entity::ZonePoint(ZonePoint(object)),
            ClassTag::Distance => Entity::Distance(Distance(object)),
        }
    }

    pub fn object(&self) -> &Arc<WherigoObject> {
        match self {
            Entity::Cartridge(value) => &value.0,
            Entity::Thing(value) => &value.0,
            Entity::Task(value) => &value.0,
            Entity::Timer(value) => &value.0,
            Entity::Input(value) => &value.0,
            Entity::Media(value) => &value.0,
            Entity::Zone(value) => &value.0,
            Entity::Command(value) => &value.0,
            Entity::ZonePoint(value) => &value.0,
            Entity::Distance(value) => &value.0,
        }
    }

    pub fn class(&self) -> ClassTag {
        self.object().class()
    }

    pub fn index(&self) -> Option<i64> {
        self.object().index()
    }

    pub fn container(&self) -> &Container {
        self.object().container()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::Cartridge(_) => Cartridge::NAME,
            Entity::Thing(_) => Thing::NAME,
            Entity::Task(_) => Task::NAME,
            Entity::Timer(_) => Timer::NAME,
            Entity::Input(_) => Input::NAME,
            Entity::Media(_) => Media::NAME,
            Entity::Zone(_) => Zone::NAME,
            Entity::Command(_) => Command::NAME,
            Entity::ZonePoint(_) => ZonePoint::NAME,
            Entity::Distance(_) => Distance::NAME,
        }
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(self.object(), other.object())
    }
}

impl std::ops::Deref for Entity {
    type Target = WherigoObject;

    fn deref(&self) -> &Self::Target {
        self.object()
    }
}

impl EntityKind for Entity {
    const NAME: &'static str = "WherigoObject";

    fn from_entity(entity: Entity) -> Option<Self> {
        Some(entity)
    }
}

impl From<&Entity> for crate::lua_host::ScriptValue {
    fn from(entity: &Entity) -> Self {
        crate::lua_host::ScriptValue::Table(entity.container().table().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::ClassTag;

    #[test]
    fn class_tags_round_trip_their_script_names() {
        for tag in [
            ClassTag::Cartridge,
            ClassTag::Character,
            ClassTag::Item,
            ClassTag::Zone,
            ClassTag::ReciprocalCommand,
        ] {
            assert_eq!(tag.script_name().parse::<ClassTag>(), Ok(tag));
        }
        assert!("Thing".parse::<ClassTag>().is_err());
    }
}
