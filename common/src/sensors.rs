use serde::Serialize;
use thiserror::Error;

use crate::timer::{Millis, MonotonicTimer};

pub const DEFAULT_UPDATE_INTERVAL_MS: Millis = 5 * 60 * 1000;

/// Fastest sensor polling accepted from configuration or the API.
pub const MIN_UPDATE_INTERVAL_MS: Millis = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor did not respond")]
    NotResponding,
    #[error("sensor bus error: {0}")]
    Bus(String),
    #[error("sensor returned an implausible reading")]
    InvalidReading,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempHumidity {
    pub humidity: f32,
    pub temperature_c: f32,
}

/// Synchronous sensor reads supplied by the board.
pub trait SensorPort {
    fn read_temp_humidity(&mut self) -> Result<TempHumidity, SensorError>;

    fn read_lux(&mut self) -> Result<u32, SensorError>;
}

/// Per-subsystem health bits from the most recent update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct SensorStatus(u8);

impl SensorStatus {
    pub const NONE: Self = Self(0);
    pub const TEMPHUM_OK: Self = Self(0x01);
    pub const LIGHT_OK: Self = Self(0x02);
    pub const ALL: Self = Self(0x03);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_all_ok(self) -> bool {
        self == Self::ALL
    }

    pub fn is_total_failure(self) -> bool {
        self == Self::NONE
    }

    fn set(&mut self, flag: Self, ok: bool) {
        if ok {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub humidity: f32,
    pub temperature: f32,
    pub lux: u32,
    pub status: SensorStatus,
}

/// Samples the sensors no more often than the update interval and keeps the
/// last good value of each subsystem.
#[derive(Debug, Clone)]
pub struct SensorStatusAggregator {
    update_timer: MonotonicTimer,
    humidity: f32,
    temperature_c: f32,
    lux: u32,
    status: SensorStatus,
}

impl Default for SensorStatusAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL_MS)
    }
}

impl SensorStatusAggregator {
    pub fn new(update_interval_ms: Millis) -> Self {
        Self {
            update_timer: MonotonicTimer::new(update_interval_ms),
            humidity: 0.0,
            temperature_c: 0.0,
            lux: 0,
            status: SensorStatus::NONE,
        }
    }

    /// Reads the sensors when the interval has passed; otherwise returns the
    /// previous mask untouched.
    pub fn update_sensors<P: SensorPort + ?Sized>(
        &mut self,
        now: Millis,
        port: &mut P,
    ) -> SensorStatus {
        self.poll(now, port).unwrap_or(self.status)
    }

    /// Like [`update_sensors`](Self::update_sensors) but returns `None` when
    /// the interval gate skipped the read.
    pub fn poll<P: SensorPort + ?Sized>(
        &mut self,
        now: Millis,
        port: &mut P,
    ) -> Option<SensorStatus> {
        if !self.update_timer.is_it_time(now) {
            return None;
        }
        self.update_timer.reset(now);

        match port.read_temp_humidity().and_then(validate_temp_humidity) {
            Ok(reading) => {
                self.humidity = reading.humidity;
                self.temperature_c = reading.temperature_c;
                self.status.set(SensorStatus::TEMPHUM_OK, true);
            }
            Err(_) => self.status.set(SensorStatus::TEMPHUM_OK, false),
        }

        match port.read_lux() {
            Ok(lux) => {
                self.lux = lux;
                self.status.set(SensorStatus::LIGHT_OK, true);
            }
            Err(_) => self.status.set(SensorStatus::LIGHT_OK, false),
        }

        Some(self.status)
    }

    /// Makes the next poll read the sensors regardless of the interval.
    pub fn request_update(&mut self) {
        self.update_timer.clear();
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    /// Last good temperature in °C; stale unless `TEMPHUM_OK` is set.
    pub fn get_temp(&self) -> f32 {
        self.temperature_c
    }

    pub fn get_hum(&self) -> f32 {
        self.humidity
    }

    pub fn get_lux(&self) -> u32 {
        self.lux
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            humidity: self.humidity,
            temperature: self.temperature_c,
            lux: self.lux,
            status: self.status,
        }
    }

    pub fn update_interval(&self) -> Millis {
        self.update_timer.delay()
    }

    pub fn set_update_interval(&mut self, interval_ms: Millis) {
        self.update_timer.set_delay(interval_ms);
    }
}

fn validate_temp_humidity(reading: TempHumidity) -> Result<TempHumidity, SensorError> {
    if !reading.temperature_c.is_finite()
        || !reading.humidity.is_finite()
        || !(0.0..=100.0).contains(&reading.humidity)
    {
        return Err(SensorError::InvalidReading);
    }
    Ok(reading)
}
