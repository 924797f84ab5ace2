pub mod config;
pub mod greenhouse;
pub mod relay;
pub mod retry;
pub mod sensors;
pub mod timer;
pub mod topics;
pub mod types;

pub use config::{ConfigError, GreenhouseConfig, NetworkConfig, RelayConfig, RuntimeConfig};
pub use greenhouse::{Greenhouse, TickReport};
pub use relay::{
    OverrideMode, RelayChannel, RelayError, RelayOutput, RelaySchedule, RelayScheduleEngine,
    ALWAYS_ON, MAX_OVERRIDE_HOLD_MS,
};
pub use retry::{ConnectivityRetryPolicy, MIN_RETRY_INTERVAL_MS};
pub use sensors::{
    SensorError, SensorPort, SensorSnapshot, SensorStatus, SensorStatusAggregator, TempHumidity,
    MIN_UPDATE_INTERVAL_MS,
};
pub use timer::{Clock, ManualClock, Millis, MonotonicTimer, SystemClock, Ticks};
pub use topics::*;
pub use types::{format_uptime, relay_state_str, GreenhouseStatus, RelayStatus};
