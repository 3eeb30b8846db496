use std::time::Duration;

use serde::Deserialize;

use crate::lua_host::GuardPolicy;

/// Identity of the device running the player; copied into the script-side
/// `Env` table at `Init`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub platform: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
    pub language: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            platform: std::env::consts::OS.to_string(),
            device: "Desktop".to_string(),
            device_id: "wherigo-player".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rethrow_faults: bool,
    pub rethrow_disposed: bool,
    pub queue_yield_delay_ms: u64,
    pub timer_tick_ms: u64,
    /// Upper bound for lifecycle barriers. `None` waits forever.
    pub drain_timeout_ms: Option<u64>,
    pub player_name: String,
    pub device: DeviceInfo,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rethrow_faults: true,
            rethrow_disposed: false,
            queue_yield_delay_ms: 1,
            timer_tick_ms: 1000,
            drain_timeout_ms: None,
            player_name: "Player".to_string(),
            device: DeviceInfo::default(),
        }
    }
}

impl EngineConfig {
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            rethrow_faults: self.rethrow_faults,
            rethrow_disposed: self.rethrow_disposed,
        }
    }

    pub fn queue_yield_delay(&self) -> Duration {
        Duration::from_millis(self.queue_yield_delay_ms)
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use std::time::Duration;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "timer_tick_ms": 50, "device": { "language": "de" } }"#)
                .expect("config parses");
        assert_eq!(config.timer_tick(), Duration::from_millis(50));
        assert!(config.rethrow_faults);
        assert!(!config.rethrow_disposed);
        assert_eq!(config.drain_timeout(), None);
        assert_eq!(config.device.language, "de");
        assert_eq!(config.device.device, "Desktop");
        assert_eq!(config.player_name, "Player");
    }
}
