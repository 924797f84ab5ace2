use greenhouse_common::{relay_state_str, RelayOutput, SensorError, SensorPort, TempHumidity};
use tracing::info;

/// Host stand-in for the DHT and light sensors.
///
/// Hardware integration point: a board build replaces these readings with
/// the real bus drivers. `light_fault_every` makes every Nth light read fail
/// so the degraded paths can be exercised on a desk.
#[derive(Debug, Default)]
pub struct SimulatedSensors {
    reads: u64,
    light_fault_every: Option<u64>,
}

impl SimulatedSensors {
    pub fn new(light_fault_every: Option<u64>) -> Self {
        Self {
            reads: 0,
            light_fault_every: light_fault_every.filter(|every| *every > 0),
        }
    }
}

impl SensorPort for SimulatedSensors {
    fn read_temp_humidity(&mut self) -> Result<TempHumidity, SensorError> {
        self.reads = self.reads.saturating_add(1);
        Ok(TempHumidity {
            humidity: 55.0 + (self.reads % 6) as f32 * 1.5,
            temperature_c: 21.0 + (self.reads % 8) as f32 * 0.25,
        })
    }

    fn read_lux(&mut self) -> Result<u32, SensorError> {
        if let Some(every) = self.light_fault_every {
            if self.reads % every == 0 {
                return Err(SensorError::NotResponding);
            }
        }
        Ok(400 + (self.reads % 10) as u32 * 35)
    }
}

/// Relay bank that records the commanded state and logs each transition.
#[derive(Debug)]
pub struct LoggedRelays {
    states: Vec<bool>,
}

impl LoggedRelays {
    pub fn new(channels: usize) -> Self {
        Self {
            states: vec![false; channels],
        }
    }

    pub fn states(&self) -> &[bool] {
        &self.states
    }
}

impl RelayOutput for LoggedRelays {
    fn set_relay(&mut self, channel: usize, on: bool) {
        if let Some(state) = self.states.get_mut(channel) {
            *state = on;
        }
        info!("relay {channel} -> {}", relay_state_str(on));
    }
}
