use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::info;
use wherigo_core::{
    Engine, EngineConfig, EngineEvent, HostServices, Input, Thing, ThreadDispatcher,
};

mod geo;
mod resources;
mod snapshot;

use geo::SphericalGeo;
use resources::DirectoryResources;
use snapshot::JsonSnapshot;

/// Headless Wherigo player: loads a cartridge script, plays it and prints
/// every engine event as one JSON line.
#[derive(Parser, Debug)]
#[command(about = "Headless Wherigo cartridge player", version)]
struct Args {
    /// Cartridge script (Lua source or compiled chunk)
    script: PathBuf,

    /// Directory holding media files named `<object index>.<ext>`
    #[arg(long)]
    media_dir: Option<PathBuf>,

    /// JSON file with engine configuration overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name given to the player object
    #[arg(long)]
    player_name: Option<String>,

    /// Player latitude in degrees
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Player longitude in degrees
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// GPS accuracy in meters
    #[arg(long, default_value_t = 5.0)]
    accuracy: f64,

    /// Resume from a JSON snapshot instead of starting fresh
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Write a JSON snapshot after the session ran
    #[arg(long)]
    save: Option<PathBuf>,

    /// Command to execute, as `<object index>:<command name>`; repeatable
    #[arg(long = "command", value_name = "INDEX:NAME")]
    commands: Vec<String>,

    /// Answer for an input, as `<input index>=<text>`; repeatable
    #[arg(long = "answer", value_name = "INDEX=TEXT")]
    answers: Vec<String>,

    /// Run the cartridge's Stop before exiting
    #[arg(long)]
    stop: bool,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut config = load_config(args.config.as_ref())?;
    if let Some(name) = &args.player_name {
        config.player_name = name.clone();
    }

    let dispatcher = Arc::new(ThreadDispatcher::spawn("wherigo-ui").context("spawning ui thread")?);
    let engine = Engine::new(
        config,
        HostServices {
            dispatcher: dispatcher.clone(),
            geo: Arc::new(SphericalGeo),
            serializer: Arc::new(JsonSnapshot),
        },
    );
    engine.subscribe(print_event);

    let outcome = play(&engine, &args);
    engine.dispose();
    dispatcher.shutdown();
    outcome
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn play(engine: &Engine, args: &Args) -> Result<()> {
    let resources = DirectoryResources::new(args.script.clone(), args.media_dir.clone())?;
    engine
        .init(Arc::new(resources))
        .context("loading cartridge")?;

    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        engine
            .refresh_location(latitude, longitude, 0.0, args.accuracy)
            .context("setting initial location")?;
    }

    match &args.restore {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            engine
                .restore(&mut BufReader::new(file))
                .context("restoring snapshot")?;
            if let Some(location) = engine.location() {
                engine.refresh_location(
                    location.latitude,
                    location.longitude,
                    location.altitude,
                    engine.accuracy(),
                )?;
            }
        }
        None => engine.start().context("starting cartridge")?,
    }
    engine.drain_and_wait()?;

    for request in &args.commands {
        run_command(engine, request).with_context(|| format!("running command {request:?}"))?;
    }
    for request in &args.answers {
        answer_input(engine, request).with_context(|| format!("answering {request:?}"))?;
    }

    let tasks = engine.active_visible_tasks()?;
    info!("{} active task(s)", tasks.len());

    if let Some(path) = &args.save {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        engine.save(&mut out).context("saving snapshot")?;
        out.flush()?;
    }
    if args.stop {
        engine.stop().context("stopping cartridge")?;
    }
    Ok(())
}

fn run_command(engine: &Engine, request: &str) -> Result<()> {
    let (index, name) = request
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <index>:<command>"))?;
    let index: i64 = index.trim().parse().context("object index")?;
    let thing: Thing = engine.get_typed(index)?;
    let mut command = None;
    for candidate in thing.commands()? {
        if candidate.key()? == name {
            command = Some(candidate);
            break;
        }
    }
    let Some(command) = command else {
        bail!("object #{index} has no enabled command {name:?}");
    };
    engine.execute_command(&command, None)?;
    engine.drain_and_wait()?;
    Ok(())
}

fn answer_input(engine: &Engine, request: &str) -> Result<()> {
    let (index, answer) = request
        .split_once('=')
        .ok_or_else(|| anyhow!("expected <index>=<text>"))?;
    let index: i64 = index.trim().parse().context("input index")?;
    let input: Input = engine.get_typed(index)?;
    engine.answer_input(&input, answer)?;
    engine.drain_and_wait()?;
    Ok(())
}

fn print_event(event: &EngineEvent) {
    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(err) => {
            log::error!("event not serializable: {err}");
            return;
        }
    };
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    if writeln!(stdout, "{line}").and_then(|()| stdout.flush()).is_err() {
        log::debug!("stdout closed");
    }
}
