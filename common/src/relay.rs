use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::RelayConfig,
    timer::{Millis, MonotonicTimer},
};

/// Longest a manual override may hold a relay before the schedule resumes.
pub const MAX_OVERRIDE_HOLD_MS: Millis = 60 * 60 * 1000;

/// Raw on-hour value meaning "always on".
pub const ALWAYS_ON: i8 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay channel {0} does not exist")]
    UnknownChannel(usize),
    #[error("hour {0} is outside 0-23")]
    InvalidHour(i8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RelaySchedule {
    AlwaysOn,
    Daily {
        #[serde(rename = "onHour")]
        on_hour: u8,
        #[serde(rename = "offHour")]
        off_hour: u8,
    },
}

impl RelaySchedule {
    /// Builds a schedule from raw hour values where `on == ALWAYS_ON` means
    /// always on and `off` is then ignored.
    pub fn from_raw_hours(on: i8, off: i8) -> Result<Self, RelayError> {
        if on == ALWAYS_ON {
            return Ok(Self::AlwaysOn);
        }
        let on_hour = Self::checked_hour(on)?;
        let off_hour = Self::checked_hour(off)?;
        Ok(Self::Daily { on_hour, off_hour })
    }

    /// Desired state at hour `hour`, or `None` when the hour is not a valid
    /// clock reading.
    pub fn is_on_at_hour(self, hour: u32) -> Option<bool> {
        if hour > 23 {
            return None;
        }
        let on = match self {
            Self::AlwaysOn => true,
            Self::Daily { on_hour, off_hour } => {
                let (on_hour, off_hour) = (on_hour as u32, off_hour as u32);
                if on_hour < off_hour {
                    on_hour <= hour && hour < off_hour
                } else {
                    // Window crosses midnight.
                    hour >= on_hour || hour < off_hour
                }
            }
        };
        Some(on)
    }

    /// Next instant at which the scheduled state flips.
    pub fn next_change(self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let Self::Daily { on_hour, off_hour } = self else {
            return None;
        };
        if on_hour == off_hour {
            return None;
        }

        let mut best: Option<DateTime<FixedOffset>> = None;
        for day_offset in 0..=1 {
            let date = now.date_naive() + Duration::days(day_offset);
            for hour in [on_hour, off_hour] {
                let Some(naive) = date.and_hms_opt(hour as u32, 0, 0) else {
                    continue;
                };
                let Some(candidate) = now.offset().from_local_datetime(&naive).single() else {
                    continue;
                };
                if candidate <= now {
                    continue;
                }
                if best.map(|current| candidate < current).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn checked_hour(hour: i8) -> Result<u8, RelayError> {
        if (0..=23).contains(&hour) {
            Ok(hour as u8)
        } else {
            Err(RelayError::InvalidHour(hour))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideMode {
    None,
    ForceOn,
    ForceOff,
}

impl OverrideMode {
    pub fn forced(on: bool) -> Self {
        if on {
            Self::ForceOn
        } else {
            Self::ForceOff
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ForceOn => "FORCE_ON",
            Self::ForceOff => "FORCE_OFF",
        }
    }

    fn forced_state(self) -> Option<bool> {
        match self {
            Self::None => None,
            Self::ForceOn => Some(true),
            Self::ForceOff => Some(false),
        }
    }
}

/// Physical relay outputs, driven only on state transitions.
pub trait RelayOutput {
    fn set_relay(&mut self, channel: usize, on: bool);
}

#[derive(Debug, Clone)]
pub struct RelayChannel {
    name: String,
    schedule: RelaySchedule,
    override_mode: OverrideMode,
    override_timer: MonotonicTimer,
    on: bool,
}

impl RelayChannel {
    fn new(config: &RelayConfig, max_hold_ms: Millis) -> Self {
        Self {
            name: config.name.clone(),
            schedule: config.schedule,
            override_mode: OverrideMode::None,
            override_timer: MonotonicTimer::new(max_hold_ms),
            on: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> RelaySchedule {
        self.schedule
    }

    pub fn override_mode(&self) -> OverrideMode {
        self.override_mode
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn is_overridden(&self) -> bool {
        self.override_mode != OverrideMode::None
    }

    pub fn override_remaining_ms(&self, now: Millis) -> Millis {
        if self.is_overridden() {
            self.override_timer.remaining(now)
        } else {
            0
        }
    }

    fn clear_override(&mut self) -> bool {
        let was_overridden = self.is_overridden();
        self.override_mode = OverrideMode::None;
        self.override_timer.clear();
        was_overridden
    }
}

/// Per-channel override/schedule state machine. Channels share nothing.
#[derive(Debug, Clone)]
pub struct RelayScheduleEngine {
    channels: Vec<RelayChannel>,
    max_override_hold_ms: Millis,
}

impl RelayScheduleEngine {
    pub fn new(relays: &[RelayConfig], max_override_hold_ms: Millis) -> Self {
        Self {
            channels: relays
                .iter()
                .map(|config| RelayChannel::new(config, max_override_hold_ms))
                .collect(),
            max_override_hold_ms,
        }
    }

    pub fn channels(&self) -> &[RelayChannel] {
        &self.channels
    }

    pub fn channel(&self, channel: usize) -> Result<&RelayChannel, RelayError> {
        self.channels
            .get(channel)
            .ok_or(RelayError::UnknownChannel(channel))
    }

    pub fn is_relay_on(&self, channel: usize) -> Result<bool, RelayError> {
        Ok(self.channel(channel)?.on)
    }

    pub fn override_mode(&self, channel: usize) -> Result<OverrideMode, RelayError> {
        Ok(self.channel(channel)?.override_mode)
    }

    pub fn override_remaining_ms(
        &self,
        channel: usize,
        now: Millis,
    ) -> Result<Millis, RelayError> {
        Ok(self.channel(channel)?.override_remaining_ms(now))
    }

    pub fn set_schedule(
        &mut self,
        channel: usize,
        schedule: RelaySchedule,
    ) -> Result<(), RelayError> {
        self.channel_mut(channel)?.schedule = schedule;
        Ok(())
    }

    /// Forces `channel` to `forced_on` for `hold_ms` (the maximum hold when
    /// `None`, clamped to it otherwise). The output follows immediately.
    /// Returns the hold actually applied.
    pub fn set_override<O: RelayOutput + ?Sized>(
        &mut self,
        channel: usize,
        forced_on: bool,
        hold_ms: Option<Millis>,
        now: Millis,
        output: &mut O,
    ) -> Result<Millis, RelayError> {
        let hold_ms = hold_ms
            .unwrap_or(self.max_override_hold_ms)
            .min(self.max_override_hold_ms);

        let relay = self.channel_mut(channel)?;
        relay.override_mode = OverrideMode::forced(forced_on);
        relay.override_timer.set_delay(hold_ms);
        relay.override_timer.reset(now);

        if relay.on != forced_on {
            relay.on = forced_on;
            output.set_relay(channel, forced_on);
        }
        Ok(hold_ms)
    }

    /// Ends an override early. The schedule takes over on the next update.
    pub fn cancel_override(&mut self, channel: usize) -> Result<bool, RelayError> {
        Ok(self.channel_mut(channel)?.clear_override())
    }

    /// Re-evaluates one channel and drives its output if the state changed.
    ///
    /// An expired override reverts to the schedule within the same call.
    /// `hour` outside 0-23 (or `None`) holds the previous scheduled state.
    pub fn update_relay<O: RelayOutput + ?Sized>(
        &mut self,
        channel: usize,
        hour: Option<u32>,
        now: Millis,
        output: &mut O,
    ) -> Result<bool, RelayError> {
        let relay = self.channel_mut(channel)?;

        if relay.is_overridden() && relay.override_timer.is_it_time(now) {
            relay.clear_override();
        }

        let desired = match relay.override_mode.forced_state() {
            Some(forced) => Some(forced),
            None => hour.and_then(|hour| relay.schedule.is_on_at_hour(hour)),
        };

        let Some(desired) = desired else {
            return Ok(false);
        };
        if desired == relay.on {
            return Ok(false);
        }

        relay.on = desired;
        output.set_relay(channel, desired);
        Ok(true)
    }

    /// Updates every channel, returning the indices that changed.
    pub fn update_all<O: RelayOutput + ?Sized>(
        &mut self,
        hour: Option<u32>,
        now: Millis,
        output: &mut O,
    ) -> Vec<usize> {
        (0..self.channels.len())
            .filter(|&channel| self.update_relay(channel, hour, now, output).unwrap_or(false))
            .collect()
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut RelayChannel, RelayError> {
        self.channels
            .get_mut(channel)
            .ok_or(RelayError::UnknownChannel(channel))
    }
}
