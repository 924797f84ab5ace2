use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    relay::{RelaySchedule, MAX_OVERRIDE_HOLD_MS},
    retry::{DEFAULT_RETRY_INTERVAL_MS, MIN_RETRY_INTERVAL_MS},
    sensors::{DEFAULT_UPDATE_INTERVAL_MS, MIN_UPDATE_INTERVAL_MS},
    timer::Millis,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub name: String,
    pub schedule: RelaySchedule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenhouseConfig {
    pub sensor_update_interval_ms: Millis,
    pub mqtt_retry_interval_ms: Millis,
    pub max_override_hold_ms: Millis,
    pub relays: Vec<RelayConfig>,
}

impl Default for GreenhouseConfig {
    fn default() -> Self {
        Self {
            sensor_update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            mqtt_retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_override_hold_ms: MAX_OVERRIDE_HOLD_MS,
            relays: default_relays(),
        }
    }
}

fn default_relays() -> Vec<RelayConfig> {
    vec![
        RelayConfig {
            name: "circulation".to_string(),
            schedule: RelaySchedule::AlwaysOn,
        },
        RelayConfig {
            name: "grow-light".to_string(),
            schedule: RelaySchedule::Daily {
                on_hour: 6,
                off_hour: 20,
            },
        },
    ]
}

impl GreenhouseConfig {
    pub fn sanitize(&mut self) {
        self.sensor_update_interval_ms = self.sensor_update_interval_ms.max(MIN_UPDATE_INTERVAL_MS);
        self.mqtt_retry_interval_ms = self.mqtt_retry_interval_ms.max(MIN_RETRY_INTERVAL_MS);
        self.max_override_hold_ms = self.max_override_hold_ms.clamp(1, MAX_OVERRIDE_HOLD_MS);

        for relay in &mut self.relays {
            if let RelaySchedule::Daily { on_hour, off_hour } = &mut relay.schedule {
                *on_hour = (*on_hour).min(23);
                *off_hour = (*off_hour).min(23);
            }
        }

        if self.relays.is_empty() {
            self.relays = default_relays();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "greenhouse-controller".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub greenhouse: GreenhouseConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            greenhouse: GreenhouseConfig::default(),
            network: NetworkConfig::default(),
            timezone: default_timezone(),
        }
    }
}

impl RuntimeConfig {
    /// Parses and sanitizes a runtime config document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut runtime: RuntimeConfig = serde_json::from_str(raw)?;
        runtime.greenhouse.sanitize();
        Ok(runtime)
    }
}
