//! Host functions published to scripts as the `WIGInternal` table.
//!
//! Every hook runs on whichever thread is executing script code, with the
//! interpreter guard already held. Handlers only resolve objects, update
//! engine state and hand events to the UI dispatcher; they never wait on the
//! execution queue.

use std::sync::{Arc, Weak};

use log::{debug, error, log};

use super::events::{script_log_level, DialogEntry, EngineEvent, EntityRef, MessageBoxRequest, Screen};
use super::session::Session;
use super::views::{affected_views, zone_polygon, View};
use super::EngineShared;
use crate::data::{downcast, Container};
use crate::error::{EngineError, Result};
use crate::lua_host::{ScriptValue, TableRef};
use crate::objects::{ClassTag, Command, Entity, EntityKind, Input, Media, Timer, Zone, ZonePoint};

struct HookContext {
    session: Arc<Session>,
    engine: Arc<EngineShared>,
}

type Handler = fn(&HookContext, &[ScriptValue]) -> Result<Vec<ScriptValue>>;

const HOOKS: &[(&str, Handler)] = &[
    ("AttributeChangedEvent", attribute_changed),
    ("InventoryEvent", inventory_changed),
    ("ZoneStateChangedEvent", zone_state_changed),
    ("CommandChangedEvent", command_changed),
    ("TimerStarted", timer_started),
    ("TimerStopped", timer_stopped),
    ("GetInput", get_input),
    ("MessageBox", message_box),
    ("Dialog", dialog),
    ("ShowScreen", show_screen),
    ("ShowStatusText", show_status_text),
    ("PlayAudio", play_audio),
    ("NotifyOS", notify_os),
    ("LogMessage", log_message),
    ("RequestSync", request_sync),
    ("VectorToPoint", vector_to_point),
    ("VectorToZone", vector_to_zone),
    ("IsPointInZone", is_point_in_zone),
];

/// Builds `WIGInternal` and publishes it as a global.
pub(crate) fn install(session: &Arc<Session>, engine: &Weak<EngineShared>) -> Result<TableRef> {
    let table = session.guard.create_table()?;
    for &(name, handler) in HOOKS {
        let weak_session = Arc::downgrade(session);
        let engine = engine.clone();
        let function = session.guard.create_function(move |args| {
            let (Some(session), Some(engine)) = (weak_session.upgrade(), engine.upgrade()) else {
                debug!("{name} raised during teardown");
                return Ok(Vec::new());
            };
            match handler(&HookContext { session, engine }, &args) {
                Ok(results) => Ok(results),
                Err(err @ (EngineError::Disposed | EngineError::NotFound(_))) => {
                    debug!("{name} ignored: {err}");
                    Ok(Vec::new())
                }
                Err(err) => {
                    error!("{name} handler failed: {err}");
                    Ok(Vec::new())
                }
            }
        })?;
        session.guard.set(&table, name, function)?;
    }
    session.guard.set_global("WIGInternal", table.clone())?;
    Ok(table)
}

impl HookContext {
    fn resolve(&self, value: Option<&ScriptValue>) -> Result<Option<Entity>> {
        match value {
            Some(value) => self.session.factory.resolve_value(value),
            None => Ok(None),
        }
    }

    fn entity_ref(&self, value: Option<&ScriptValue>) -> Result<Option<EntityRef>> {
        Ok(self.resolve(value)?.as_ref().map(EntityRef::of))
    }

    fn container(&self, value: Option<&ScriptValue>) -> Option<Container> {
        match value {
            Some(ScriptValue::Table(table)) => Some(self.session.factory.container(table.clone())),
            _ => None,
        }
    }

    fn point(&self, value: Option<&ScriptValue>) -> Result<Option<ZonePoint>> {
        match self.resolve(value)? {
            Some(entity) => Ok(ZonePoint::from_entity(entity)),
            None => Ok(None),
        }
    }

    fn zone(&self, value: Option<&ScriptValue>) -> Result<Option<Zone>> {
        match self.resolve(value)? {
            Some(entity) => downcast(entity).map(Some),
            None => Ok(None),
        }
    }
}

fn text_arg(args: &[ScriptValue], position: usize) -> String {
    match args.get(position) {
        Some(ScriptValue::String(text)) => text.clone(),
        Some(ScriptValue::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn attribute_changed(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(entity) = ctx.resolve(args.first())? else {
        return Ok(Vec::new());
    };
    let property = text_arg(args, 1);
    ctx.engine.invalidate(affected_views(entity.class(), &property));

    let completed = entity.class() == ClassTag::Cartridge
        && property == "Complete"
        && entity.container().get_bool("Complete")?.unwrap_or(false);
    let event = if completed {
        EngineEvent::CartridgeCompleted
    } else {
        EngineEvent::AttributeChanged {
            object: EntityRef::of(&entity),
            property: property.clone(),
        }
    };
    ctx.engine.notify(vec![(entity, property)], event);
    Ok(Vec::new())
}

fn inventory_changed(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(entity) = ctx.resolve(args.first())? else {
        return Ok(Vec::new());
    };
    let from = ctx.resolve(args.get(1))?;
    let to = ctx.resolve(args.get(2))?;
    ctx.engine.invalidate(&[View::Inventory, View::Objects]);

    let event = EngineEvent::InventoryChanged {
        object: EntityRef::of(&entity),
        from: from.as_ref().map(EntityRef::of),
        to: to.as_ref().map(EntityRef::of),
    };
    let mut changed = vec![(entity, "Container".to_string())];
    changed.extend(from.into_iter().map(|owner| (owner, "Inventory".to_string())));
    changed.extend(to.into_iter().map(|owner| (owner, "Inventory".to_string())));
    ctx.engine.notify(changed, event);
    Ok(Vec::new())
}

fn zone_state_changed(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(zone) = ctx.zone(args.first())? else {
        return Ok(Vec::new());
    };
    ctx.engine.invalidate(&[View::Zones, View::Objects]);
    let event = EngineEvent::ZoneStateChanged {
        zone: EntityRef::of(&Entity::Zone(zone.clone())),
        state: zone.state()?,
    };
    ctx.engine.notify(vec![(Entity::Zone(zone), "State".to_string())], event);
    Ok(Vec::new())
}

fn command_changed(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(entity) = ctx.resolve(args.first())? else {
        return Ok(Vec::new());
    };
    let command: Command = downcast(entity)?;
    let owner = command.owner()?;
    let event = EngineEvent::CommandChanged {
        owner: owner.as_ref().map(EntityRef::of),
    };
    let changed = owner
        .into_iter()
        .map(|owner| (owner, "Commands".to_string()))
        .collect();
    ctx.engine.notify(changed, event);
    Ok(Vec::new())
}

fn timer_started(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(entity) = ctx.resolve(args.first())? else {
        return Ok(Vec::new());
    };
    let timer: Timer = downcast(entity)?;
    ctx.session
        .timers
        .start(timer, ctx.engine.fire_callback(&ctx.session))?;
    Ok(Vec::new())
}

fn timer_stopped(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    if let Some(index) = ctx.resolve(args.first())?.and_then(|entity| entity.index()) {
        ctx.session.timers.stop(index);
    }
    Ok(Vec::new())
}

fn get_input(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(entity) = ctx.resolve(args.first())? else {
        return Ok(Vec::new());
    };
    let input: Input = downcast(entity)?;
    ctx.engine.raise(EngineEvent::InputRequested {
        input: EntityRef::of(&Entity::Input(input)),
    });
    Ok(Vec::new())
}

fn message_box(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(request) = ctx.container(args.first()) else {
        return Ok(Vec::new());
    };
    let media: Option<Media> = request.get_entity("Media")?;
    let callback = match request.get("Callback")? {
        ScriptValue::Function(function) => Some(ctx.session.factory.provider(function, None)),
        _ => None,
    };
    let mut buttons: Vec<String> = request.get_list("Buttons")?;
    if buttons.is_empty() {
        buttons.push("OK".to_string());
    }
    ctx.engine
        .raise(EngineEvent::MessageBoxRequested(MessageBoxRequest {
            text: request.get_string("Text")?.unwrap_or_default(),
            media: media.map(|media| EntityRef::of(&Entity::Media(media))),
            buttons,
            callback,
        }));
    Ok(Vec::new())
}

fn dialog(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let Some(list) = ctx.container(args.first()) else {
        return Ok(Vec::new());
    };
    let mut entries = Vec::new();
    for value in list.values()? {
        let Some(entry) = ctx.container(Some(&value)) else {
            continue;
        };
        let media: Option<Media> = entry.get_entity("Media")?;
        entries.push(DialogEntry {
            text: entry.get_string("Text")?.unwrap_or_default(),
            media: media.map(|media| EntityRef::of(&Entity::Media(media))),
        });
    }
    ctx.engine.raise(EngineEvent::DialogRequested { entries });
    Ok(Vec::new())
}

fn show_screen(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let code = args.first().and_then(ScriptValue::as_f64).unwrap_or(0.0) as i64;
    let Some(screen) = Screen::from_code(code) else {
        debug!("unknown screen {code}");
        return Ok(Vec::new());
    };
    let object = ctx.entity_ref(args.get(1))?;
    ctx.engine.raise(EngineEvent::ScreenRequested { screen, object });
    Ok(Vec::new())
}

fn show_status_text(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    ctx.engine.raise(EngineEvent::StatusTextRequested {
        text: text_arg(args, 0),
    });
    Ok(Vec::new())
}

fn play_audio(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    if let Some(media) = ctx.entity_ref(args.first())? {
        ctx.engine.raise(EngineEvent::PlayMediaRequested { media });
    }
    Ok(Vec::new())
}

fn notify_os(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let command = text_arg(args, 0);
    let event = match command.as_str() {
        "SaveClose" => EngineEvent::SaveRequested { close: true },
        "StopSound" => EngineEvent::StopSoundsRequested,
        "Alert" => EngineEvent::AlertRequested,
        other => {
            debug!("unsupported OS command {other:?}");
            return Ok(Vec::new());
        }
    };
    ctx.engine.raise(event);
    Ok(Vec::new())
}

fn log_message(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let text = text_arg(args, 0);
    let code = args.get(1).and_then(ScriptValue::as_f64).unwrap_or(152.0) as i64;
    let level = script_log_level(code);
    log!(target: "wherigo::script", level, "{text}");
    ctx.engine.raise(EngineEvent::LogMessage {
        level: level.as_str().to_ascii_lowercase(),
        text,
    });
    Ok(Vec::new())
}

fn request_sync(ctx: &HookContext, _args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    ctx.engine.raise(EngineEvent::SyncRequested);
    Ok(Vec::new())
}

fn vector_to_point(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let (Some(from), Some(to)) = (ctx.point(args.first())?, ctx.point(args.get(1))?) else {
        return Ok(Vec::new());
    };
    let (distance, bearing) = ctx.engine.geo().vector(from.to_point()?, to.to_point()?);
    Ok(vec![distance.into(), bearing.into()])
}

fn vector_to_zone(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let (Some(point), Some(zone)) = (ctx.point(args.first())?, ctx.zone(args.get(1))?) else {
        return Ok(Vec::new());
    };
    let polygon = zone_polygon(&zone)?;
    let point = point.to_point()?;
    let geo = ctx.engine.geo();
    let (distance, bearing) = if geo.contains(&polygon, point) {
        (0.0, 0.0)
    } else {
        geo.vector_to_polygon(&polygon, point)
    };
    Ok(vec![distance.into(), bearing.into()])
}

fn is_point_in_zone(ctx: &HookContext, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
    let (Some(point), Some(zone)) = (ctx.point(args.first())?, ctx.zone(args.get(1))?) else {
        return Ok(vec![false.into()]);
    };
    let inside = ctx
        .engine
        .geo()
        .contains(&zone_polygon(&zone)?, point.to_point()?);
    Ok(vec![inside.into()])
}
