use serde::Serialize;

use super::EngineState;
use crate::data::Provider;
use crate::objects::{Entity, ZoneState};

/// Serializable snapshot of the entity an event is about. Hosts look the live
/// entity up again through `Engine::get_entity` when they need more.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub index: Option<i64>,
    pub class: String,
    pub name: String,
}

impl EntityRef {
    pub(crate) fn of(entity: &Entity) -> EntityRef {
        EntityRef {
            index: entity.index(),
            class: entity.class().to_string(),
            name: entity.name().unwrap_or_default(),
        }
    }
}

/// Screens a cartridge may ask the host to bring up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Screen {
    Main,
    Inventory,
    Item,
    Location,
    Task,
    Detail,
}

impl Screen {
    pub fn from_code(code: i64) -> Option<Screen> {
        Some(match code {
            0 => Screen::Main,
            1 => Screen::Inventory,
            2 => Screen::Item,
            3 => Screen::Location,
            4 => Screen::Task,
            5 => Screen::Detail,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageBoxRequest {
    pub text: String,
    pub media: Option<EntityRef>,
    pub buttons: Vec<String>,
    #[serde(skip)]
    pub(crate) callback: Option<Provider>,
}

impl MessageBoxRequest {
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DialogEntry {
    pub text: String,
    pub media: Option<EntityRef>,
}

/// Everything the engine tells its host. Delivered through the UI dispatcher.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        from: EngineState,
        to: EngineState,
    },
    AttributeChanged {
        object: EntityRef,
        property: String,
    },
    InventoryChanged {
        object: EntityRef,
        from: Option<EntityRef>,
        to: Option<EntityRef>,
    },
    ZoneStateChanged {
        zone: EntityRef,
        state: ZoneState,
    },
    CommandChanged {
        owner: Option<EntityRef>,
    },
    CartridgeCompleted,
    SaveRequested {
        close: bool,
    },
    InputRequested {
        input: EntityRef,
    },
    MessageBoxRequested(MessageBoxRequest),
    DialogRequested {
        entries: Vec<DialogEntry>,
    },
    ScreenRequested {
        screen: Screen,
        object: Option<EntityRef>,
    },
    StatusTextRequested {
        text: String,
    },
    SyncRequested,
    PlayMediaRequested {
        media: EntityRef,
    },
    StopSoundsRequested,
    AlertRequested,
    LogMessage {
        level: String,
        text: String,
    },
    /// Game logic started or stopped running on the execution queue.
    BusyChanged {
        busy: bool,
    },
}

/// Maps a script log level (`Wherigo.LOGDEBUG` .. `LOGERROR`) to the facade.
pub(crate) fn script_log_level(code: i64) -> log::Level {
    match code {
        150 => log::Level::Debug,
        151 | 152 => log::Level::Info,
        153 => log::Level::Warn,
        154 => log::Level::Error,
        _ => log::Level::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::{script_log_level, EngineEvent, EntityRef, Screen};

    #[test]
    fn events_serialize_with_a_tag() {
        let event = EngineEvent::AttributeChanged {
            object: EntityRef {
                index: Some(3),
                class: "ZTask".to_string(),
                name: "Find the key".to_string(),
            },
            property: "Complete".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["event"], "attribute_changed");
        assert_eq!(json["object"]["index"], 3);
        assert_eq!(json["property"], "Complete");
    }

    #[test]
    fn screen_codes_follow_the_script_constants() {
        assert_eq!(Screen::from_code(0), Some(Screen::Main));
        assert_eq!(Screen::from_code(5), Some(Screen::Detail));
        assert_eq!(Screen::from_code(9), None);
        assert_eq!(script_log_level(154), log::Level::Error);
    }
}
