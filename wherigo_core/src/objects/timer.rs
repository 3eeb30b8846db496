use std::str::FromStr;
use std::time::Duration;

use super::entity_kind;
use crate::error::Result;
use crate::lua_host::ScriptEnum;

entity_kind!(Timer, Timer);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Countdown,
    Interval,
}

impl FromStr for TimerKind {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "countdown" => Ok(TimerKind::Countdown),
            "interval" => Ok(TimerKind::Interval),
            _ => Err(()),
        }
    }
}

impl ScriptEnum for TimerKind {
    fn script_name(&self) -> &'static str {
        match self {
            TimerKind::Countdown => "Countdown",
            TimerKind::Interval => "Interval",
        }
    }
}

impl Timer {
    pub fn kind(&self) -> Result<TimerKind> {
        Ok(self
            .container()
            .get_enum("Type")?
            .unwrap_or(TimerKind::Countdown))
    }

    pub fn duration(&self) -> Result<Duration> {
        Ok(seconds(self.container().get_double("Duration")?))
    }

    pub fn remaining(&self) -> Result<Duration> {
        Ok(seconds(self.container().get_double("Remaining")?))
    }

    pub fn elapsed(&self) -> Result<Duration> {
        Ok(seconds(self.container().get_double("Elapsed")?))
    }

    pub fn running(&self) -> Result<bool> {
        Ok(self.container().get_bool("Running")?.unwrap_or(false))
    }
}

/// Script seconds as a duration. Negative and NaN read as zero, values past
/// the representable range saturate.
fn seconds(value: Option<f64>) -> Duration {
    Duration::try_from_secs_f64(value.unwrap_or_default().max(0.0)).unwrap_or(Duration::MAX)
}
