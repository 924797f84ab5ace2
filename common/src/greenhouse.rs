use crate::{
    config::GreenhouseConfig,
    relay::{RelayError, RelayOutput, RelayScheduleEngine},
    retry::ConnectivityRetryPolicy,
    sensors::{SensorPort, SensorStatus, SensorStatusAggregator},
    timer::Millis,
    types::{format_uptime, GreenhouseStatus, RelayStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub status: SensorStatus,
    pub sensors_updated: bool,
    pub changed_relays: Vec<usize>,
    pub publish_due: bool,
}

/// Owns every core component and advances them in order on each tick:
/// sensors, then relays, then the publish decision.
#[derive(Debug, Clone)]
pub struct Greenhouse {
    sensors: SensorStatusAggregator,
    relays: RelayScheduleEngine,
    link: ConnectivityRetryPolicy,
    publish_pending: bool,
}

impl Greenhouse {
    pub fn new(config: &GreenhouseConfig) -> Self {
        Self {
            sensors: SensorStatusAggregator::new(config.sensor_update_interval_ms),
            relays: RelayScheduleEngine::new(&config.relays, config.max_override_hold_ms),
            link: ConnectivityRetryPolicy::new(config.mqtt_retry_interval_ms),
            publish_pending: false,
        }
    }

    /// Asks the next tick to publish even if nothing changes during it. Used
    /// for relay changes made outside the tick (overrides, schedule edits).
    pub fn request_publish(&mut self) {
        self.publish_pending = true;
    }

    pub fn sensors(&self) -> &SensorStatusAggregator {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut SensorStatusAggregator {
        &mut self.sensors
    }

    pub fn relays(&self) -> &RelayScheduleEngine {
        &self.relays
    }

    pub fn relays_mut(&mut self) -> &mut RelayScheduleEngine {
        &mut self.relays
    }

    pub fn link(&self) -> &ConnectivityRetryPolicy {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ConnectivityRetryPolicy {
        &mut self.link
    }

    pub fn get_sensors_status(&self) -> SensorStatus {
        self.sensors.status()
    }

    pub fn is_relay_on(&self, channel: usize) -> Result<bool, RelayError> {
        self.relays.is_relay_on(channel)
    }

    pub fn tick<S, R>(
        &mut self,
        now: Millis,
        hour: Option<u32>,
        sensors: &mut S,
        relays: &mut R,
    ) -> TickReport
    where
        S: SensorPort + ?Sized,
        R: RelayOutput + ?Sized,
    {
        let update = self.sensors.poll(now, sensors);
        let changed_relays = self.relays.update_all(hour, now, relays);
        let sensors_updated = update.is_some();
        let pending = std::mem::take(&mut self.publish_pending);
        let publish_due = self.link.is_connected()
            && (sensors_updated || pending || !changed_relays.is_empty());

        TickReport {
            status: self.sensors.status(),
            sensors_updated,
            changed_relays,
            publish_due,
        }
    }

    pub fn status(&self, now: Millis, uptime_ms: u64) -> GreenhouseStatus {
        let relays = self
            .relays
            .channels()
            .iter()
            .enumerate()
            .map(|(channel, relay)| RelayStatus {
                channel,
                name: relay.name().to_string(),
                on: relay.is_on(),
                override_mode: relay.override_mode(),
                override_remaining_ms: relay.override_remaining_ms(now),
                schedule: relay.schedule(),
            })
            .collect();

        GreenhouseStatus {
            version: env!("CARGO_PKG_VERSION"),
            uptime: format_uptime(uptime_ms),
            uptime_ms,
            sensors: self.sensors.snapshot(),
            sensors_ok: self.sensors.status().is_all_ok(),
            sensor_update_interval_ms: self.sensors.update_interval(),
            relays,
            mqtt_connected: self.link.is_connected(),
            mqtt_retry_in_ms: self.link.next_attempt_in(now),
        }
    }
}
