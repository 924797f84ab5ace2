use serde::Serialize;

use crate::{
    relay::{OverrideMode, RelaySchedule},
    sensors::SensorSnapshot,
};

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub channel: usize,
    pub name: String,
    pub on: bool,
    #[serde(rename = "override")]
    pub override_mode: OverrideMode,
    #[serde(rename = "overrideRemainingMs")]
    pub override_remaining_ms: u32,
    pub schedule: RelaySchedule,
}

#[derive(Debug, Clone, Serialize)]
pub struct GreenhouseStatus {
    pub version: &'static str,
    pub uptime: String,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    pub sensors: SensorSnapshot,
    #[serde(rename = "sensorsOk")]
    pub sensors_ok: bool,
    #[serde(rename = "sensorUpdateIntervalMs")]
    pub sensor_update_interval_ms: u32,
    pub relays: Vec<RelayStatus>,
    #[serde(rename = "mqttConnected")]
    pub mqtt_connected: bool,
    #[serde(rename = "mqttRetryInMs")]
    pub mqtt_retry_in_ms: u32,
}

/// Uptime as `Nd HH:MM:SS`.
pub fn format_uptime(uptime_ms: u64) -> String {
    let total_secs = uptime_ms / 1_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
}

pub fn relay_state_str(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
