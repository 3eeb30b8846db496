use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde_json::Value;
use tempfile::tempdir;

const CARTRIDGE: &str = r#"
require "Wherigo"
cart = Wherigo.ZCartridge()
cart.Name = "Smoke"

square = Wherigo.Zone{
  Cartridge = cart,
  Name = "Square",
  Points = {
    Wherigo.ZonePoint(47.0, 8.0), Wherigo.ZonePoint(47.0, 8.001),
    Wherigo.ZonePoint(47.001, 8.001), Wherigo.ZonePoint(47.001, 8.0),
  },
}

bell = Wherigo.ZItem{
  Cartridge = cart,
  Name = "Bell",
  Container = square,
  Commands = { Ring = Wherigo.ZCommand{ Text = "Ring" } },
}
bell.Rung = 0

ring_it = Wherigo.ZTask(cart)
ring_it.Name = "Ring the bell"

function square:OnEnter()
  Wherigo.ShowStatusText("entered " .. square.Name)
end

function bell:OnRing()
  bell.Rung = bell.Rung + 1
  ring_it.Complete = true
  Wherigo.LogMessage("ding", Wherigo.LOGINFO)
end

return cart
"#;

fn run(args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_wherigo_player"))
        .args(args)
        .output()
        .context("running wherigo_player")?;
    anyhow::ensure!(
        output.status.success(),
        "player failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

fn events(output: &Output) -> Result<Vec<Value>> {
    String::from_utf8(output.stdout.clone())?
        .lines()
        .map(|line| serde_json::from_str(line).context("event line is json"))
        .collect()
}

fn has_event(events: &[Value], kind: &str, check: impl Fn(&Value) -> bool) -> bool {
    events
        .iter()
        .any(|event| event["event"] == kind && check(event))
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn plays_saves_and_restores_a_cartridge() -> Result<()> {
    let dir = tempdir()?;
    let script = dir.path().join("smoke.lua");
    fs::write(&script, CARTRIDGE)?;
    let save = dir.path().join("save.json");

    let output = run(&[
        path_arg(&script),
        "--latitude",
        "47.0005",
        "--longitude",
        "8.0005",
        "--command",
        "2:Ring",
        "--save",
        path_arg(&save),
    ])?;
    let first = events(&output)?;
    assert!(has_event(&first, "state_changed", |event| event["to"] == "Playing"));
    assert!(has_event(&first, "zone_state_changed", |event| event["state"]
        == "Inside"));
    assert!(has_event(&first, "status_text_requested", |event| event["text"]
        == "entered Square"));
    assert!(has_event(&first, "log_message", |event| event["text"] == "ding"));

    let snapshot: Value = serde_json::from_str(&fs::read_to_string(&save)?)?;
    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["objects"]["2"]["fields"]["Rung"], 1.0);
    assert_eq!(snapshot["objects"]["2"]["container"], 1);
    assert_eq!(snapshot["objects"]["3"]["fields"]["Complete"], true);

    let output = run(&[
        path_arg(&script),
        "--restore",
        path_arg(&save),
        "--command",
        "2:Ring",
        "--save",
        path_arg(&save),
    ])?;
    let second = events(&output)?;
    assert!(has_event(&second, "state_changed", |event| event["to"] == "Restoring"));
    let snapshot: Value = serde_json::from_str(&fs::read_to_string(&save)?)?;
    assert_eq!(snapshot["objects"]["2"]["fields"]["Rung"], 2.0);
    Ok(())
}

#[test]
fn unknown_command_fails_the_run() -> Result<()> {
    let dir = tempdir()?;
    let script = dir.path().join("smoke.lua");
    fs::write(&script, CARTRIDGE)?;
    let output = Command::new(env!("CARGO_BIN_EXE_wherigo_player"))
        .args([path_arg(&script), "--command", "2:Kick"])
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Kick"));
    Ok(())
}
