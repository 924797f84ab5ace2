use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use greenhouse_common::{
    relay_command_channel, relay_state_str, relay_state_topic, Clock, ConnectivityRetryPolicy,
    Greenhouse, GreenhouseStatus, Millis, RelayError, RelaySchedule, RuntimeConfig,
    SensorSnapshot, SystemClock, TickReport, ALWAYS_ON, MIN_UPDATE_INTERVAL_MS,
    TOPIC_CMD_RELAY_FILTER, TOPIC_SENSORS_STATE, TOPIC_STATUS,
};

use crate::board::{LoggedRelays, SimulatedSensors};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const CONTROL_TICK: Duration = Duration::from_secs(1);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);
// Wall clock readings before this year mean time was never synced.
const MIN_SYNCED_YEAR: i32 = 2024;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<Controller>>,
    timezone: Tz,
    mqtt: AsyncClient,
}

/// Everything the tick loop mutates, behind one lock.
struct Controller {
    greenhouse: Greenhouse,
    sensors: SimulatedSensors,
    relays: LoggedRelays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayCommand {
    Force { on: bool, minutes: Option<u32> },
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    ConnAck,
    Traffic,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkTransition {
    Unchanged,
    Connected,
    Lost,
    AttemptFailed,
}

struct Telemetry {
    sensors: SensorSnapshot,
    relays: Vec<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: &'static str,
    date: Option<String>,
    time: Option<String>,
    hour: Option<u32>,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: GreenhouseStatus,
    clock: TimeStatus,
    outputs: Vec<bool>,
    #[serde(rename = "nextScheduleChangeEpoch")]
    next_schedule_change_epoch: Vec<Option<i64>>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });

    let timezone_name = std::env::var("GREENHOUSE_TZ").unwrap_or(runtime.timezone.clone());
    let timezone = timezone_name.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone '{timezone_name}', falling back to UTC");
        Tz::UTC
    });

    let light_fault_every = std::env::var("SIM_LIGHT_FAULT_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok());

    let controller = Controller {
        greenhouse: Greenhouse::new(&runtime.greenhouse),
        sensors: SimulatedSensors::new(light_fault_every),
        relays: LoggedRelays::new(runtime.greenhouse.relays.len()),
    };
    info!(
        "greenhouse core ready: {} relays, sensor interval {} ms, retry interval {} ms",
        runtime.greenhouse.relays.len(),
        runtime.greenhouse.sensor_update_interval_ms,
        runtime.greenhouse.mqtt_retry_interval_ms,
    );

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options =
        MqttOptions::new(runtime.network.client_id.clone(), mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(MQTT_KEEP_ALIVE);
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        timezone,
        mqtt,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/time", get(handle_get_time))
        .route("/api/relay", post(handle_set_relay))
        .route("/api/relay/schedule", put(handle_put_relay_schedule))
        .route("/api/sensors/interval", post(handle_set_sensor_interval))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

impl Controller {
    fn tick(&mut self, now: Millis, hour: Option<u32>) -> TickReport {
        let previous = self.greenhouse.get_sensors_status();
        let report = self
            .greenhouse
            .tick(now, hour, &mut self.sensors, &mut self.relays);

        if report.sensors_updated && report.status != previous {
            if report.status.is_all_ok() {
                info!("sensors healthy (mask {:#04x})", report.status.bits());
            } else {
                warn!(
                    "sensor status degraded (mask {:#04x}), keeping last good values",
                    report.status.bits()
                );
            }
        }
        report
    }

    fn apply_relay_command(
        &mut self,
        channel: usize,
        command: RelayCommand,
        now: Millis,
        hour: Option<u32>,
    ) -> Result<bool, RelayError> {
        let was_on = self.greenhouse.is_relay_on(channel)?;
        match command {
            RelayCommand::Force { on, minutes } => {
                let hold_ms = minutes.map(|minutes| minutes.saturating_mul(60_000));
                let applied = self.greenhouse.relays_mut().set_override(
                    channel,
                    on,
                    hold_ms,
                    now,
                    &mut self.relays,
                )?;
                info!(
                    "relay {channel} forced {} for {} min",
                    relay_state_str(on),
                    applied / 60_000
                );
            }
            RelayCommand::Auto => {
                if self.greenhouse.relays_mut().cancel_override(channel)? {
                    info!("relay {channel} override cancelled");
                }
                self.greenhouse
                    .relays_mut()
                    .update_relay(channel, hour, now, &mut self.relays)?;
            }
        }
        self.note_change(channel, was_on)
    }

    fn set_schedule(
        &mut self,
        channel: usize,
        schedule: RelaySchedule,
        now: Millis,
        hour: Option<u32>,
    ) -> Result<bool, RelayError> {
        let was_on = self.greenhouse.is_relay_on(channel)?;
        self.greenhouse
            .relays_mut()
            .set_schedule(channel, schedule)?;
        info!("relay {channel} schedule set to {schedule:?}");
        self.greenhouse
            .relays_mut()
            .update_relay(channel, hour, now, &mut self.relays)?;
        self.note_change(channel, was_on)
    }

    /// Queues telemetry for the next tick when `channel` flipped outside it.
    fn note_change(&mut self, channel: usize, was_on: bool) -> Result<bool, RelayError> {
        let changed = self.greenhouse.is_relay_on(channel)? != was_on;
        if changed {
            self.greenhouse.request_publish();
        }
        Ok(changed)
    }

    fn telemetry(&self) -> Telemetry {
        Telemetry {
            sensors: self.greenhouse.sensors().snapshot(),
            relays: self
                .greenhouse
                .relays()
                .channels()
                .iter()
                .map(|relay| relay.is_on())
                .collect(),
        }
    }
}

impl Telemetry {
    fn messages(&self) -> Vec<(String, Vec<u8>)> {
        let mut messages = Vec::with_capacity(self.relays.len() + 1);
        match serde_json::to_vec(&self.sensors) {
            Ok(body) => messages.push((TOPIC_SENSORS_STATE.to_string(), body)),
            Err(err) => warn!("sensor snapshot serialization failed: {err}"),
        }
        for (channel, on) in self.relays.iter().enumerate() {
            messages.push((
                relay_state_topic(channel),
                relay_state_str(*on).as_bytes().to_vec(),
            ));
        }
        messages
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            let (connected, due) = {
                let controller = app_state.controller.lock().await;
                let link = controller.greenhouse.link();
                (link.is_connected(), link.should_retry_now(SystemClock.now()))
            };

            if !connected && !due {
                tokio::time::sleep(CONTROL_TICK).await;
                continue;
            }

            let event = eventloop.poll().await;
            let outcome = match &event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => PollOutcome::ConnAck,
                Ok(_) => PollOutcome::Traffic,
                Err(_) => PollOutcome::Failed,
            };

            if outcome != PollOutcome::Traffic {
                let (transition, retry_in_s) = {
                    let mut controller = app_state.controller.lock().await;
                    let link = controller.greenhouse.link_mut();
                    let transition = record_poll_outcome(link, outcome, SystemClock.now());
                    (transition, link.interval() / 1_000)
                };

                match (transition, &event) {
                    (LinkTransition::Connected, _) => {
                        let telemetry = app_state.controller.lock().await.telemetry();
                        info!("mqtt connected");
                        on_connected(&app_state.mqtt, &telemetry);
                    }
                    (LinkTransition::Lost, Err(err)) => warn!("mqtt link lost: {err}"),
                    (LinkTransition::AttemptFailed, Err(err)) => {
                        warn!("mqtt connect attempt failed: {err}; retrying in {retry_in_s} s")
                    }
                    _ => {}
                }
            }

            if let Ok(Event::Incoming(Incoming::Publish(message))) = &event {
                if let Err(err) =
                    handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                {
                    warn!("mqtt message handling error: {err:#}");
                }
            }
        }
    });
}

/// Folds one event loop poll into the retry policy.
fn record_poll_outcome(
    link: &mut ConnectivityRetryPolicy,
    outcome: PollOutcome,
    now: Millis,
) -> LinkTransition {
    match outcome {
        PollOutcome::ConnAck => {
            link.on_attempt_result(true, now);
            LinkTransition::Connected
        }
        PollOutcome::Traffic => LinkTransition::Unchanged,
        PollOutcome::Failed if link.is_connected() => {
            link.on_disconnect_detected(now);
            LinkTransition::Lost
        }
        PollOutcome::Failed => {
            link.on_attempt_result(false, now);
            LinkTransition::AttemptFailed
        }
    }
}

/// Runs inside the event loop task, so requests are queued without awaiting.
fn on_connected(mqtt: &AsyncClient, telemetry: &Telemetry) {
    if let Err(err) = mqtt.try_subscribe(TOPIC_CMD_RELAY_FILTER, QoS::AtMostOnce) {
        warn!("relay command subscribe failed: {err}");
    }
    if let Err(err) = mqtt.try_publish(TOPIC_STATUS, QoS::AtLeastOnce, true, "online") {
        warn!("status publish failed: {err}");
    }
    for (topic, body) in telemetry.messages() {
        if let Err(err) = mqtt.try_publish(topic, QoS::AtLeastOnce, true, body) {
            warn!("telemetry publish failed: {err}");
        }
    }
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_TICK);

        loop {
            interval.tick().await;
            let now = SystemClock.now();
            let hour = local_now(&app_state.timezone).map(|local| local.hour());

            let telemetry = {
                let mut controller = app_state.controller.lock().await;
                let report = controller.tick(now, hour);
                if !report.changed_relays.is_empty() {
                    debug!("relays changed this tick: {:?}", report.changed_relays);
                }
                report.publish_due.then(|| controller.telemetry())
            };

            if let Some(telemetry) = telemetry {
                for (topic, body) in telemetry.messages() {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(topic, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("telemetry publish failed: {err}");
                    }
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let Some(channel) = relay_command_channel(topic) else {
        return Ok(());
    };
    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let command = parse_relay_payload(message).map_err(anyhow::Error::msg)?;

    let now = SystemClock.now();
    let hour = local_now(&app_state.timezone).map(|local| local.hour());
    let changed = app_state
        .controller
        .lock()
        .await
        .apply_relay_command(channel, command, now, hour)?;
    debug!("relay {channel} command {command:?} over mqtt (changed: {changed})");
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = SystemClock.now();
    let local = local_now(&state.timezone);

    let controller = state.controller.lock().await;
    let next_schedule_change_epoch = controller
        .greenhouse
        .relays()
        .channels()
        .iter()
        .map(|relay| {
            local
                .and_then(|local| relay.schedule().next_change(local))
                .map(|change| change.timestamp())
        })
        .collect();

    Json(StatusResponse {
        status: controller.greenhouse.status(now, uptime_ms()),
        clock: time_status(&state.timezone, local),
        outputs: controller.relays.states().to_vec(),
        next_schedule_change_epoch,
    })
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    Json(time_status(&state.timezone, local_now(&state.timezone)))
}

async fn handle_set_relay(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(channel) = params
        .get("channel")
        .and_then(|value| value.parse::<usize>().ok())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'channel' parameter",
        );
    };
    let Some(mode) = params.get("state") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'state' parameter");
    };

    let command = match parse_relay_command(mode, params.get("minutes").map(String::as_str)) {
        Ok(command) => command,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let now = SystemClock.now();
    let hour = local_now(&state.timezone).map(|local| local.hour());
    let result = {
        let mut controller = state.controller.lock().await;
        controller.apply_relay_command(channel, command, now, hour)
    };
    if let Err(err) = result {
        return error_response(StatusCode::NOT_FOUND, &err.to_string());
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_put_relay_schedule(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(channel) = params
        .get("channel")
        .and_then(|value| value.parse::<usize>().ok())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'channel' parameter",
        );
    };
    let Some(on) = params.get("on").and_then(|value| value.parse::<i8>().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'on' hour");
    };
    let off = match params.get("off").map(|value| value.parse::<i8>()) {
        Some(Ok(off)) => off,
        Some(Err(_)) => return error_response(StatusCode::BAD_REQUEST, "Invalid 'off' hour"),
        None if on == ALWAYS_ON => ALWAYS_ON,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing 'off' hour"),
    };

    let schedule = match RelaySchedule::from_raw_hours(on, off) {
        Ok(schedule) => schedule,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let now = SystemClock.now();
    let hour = local_now(&state.timezone).map(|local| local.hour());
    let result = {
        let mut controller = state.controller.lock().await;
        controller.set_schedule(channel, schedule, now, hour)
    };
    if let Err(err) = result {
        return error_response(StatusCode::NOT_FOUND, &err.to_string());
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_sensor_interval(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("ms") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'ms' parameter");
    };
    let Some(interval_ms) = value
        .parse::<Millis>()
        .ok()
        .filter(|ms| *ms >= MIN_UPDATE_INTERVAL_MS)
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid interval (minimum 1000 ms)",
        );
    };

    {
        let mut controller = state.controller.lock().await;
        controller
            .greenhouse
            .sensors_mut()
            .set_update_interval(interval_ms);
    }
    info!("sensor update interval set to {interval_ms} ms");

    handle_get_status(State(state)).await.into_response()
}

/// Parses `on`, `off` or `auto` with an optional hold in minutes.
fn parse_relay_command(mode: &str, minutes: Option<&str>) -> Result<RelayCommand, &'static str> {
    let minutes = match minutes {
        None => None,
        Some(value) => match value.trim().parse::<u32>() {
            Ok(minutes) if minutes > 0 => Some(minutes),
            _ => return Err("Invalid minutes value"),
        },
    };

    match mode.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(RelayCommand::Force { on: true, minutes }),
        "off" => Ok(RelayCommand::Force { on: false, minutes }),
        "auto" if minutes.is_none() => Ok(RelayCommand::Auto),
        "auto" => Err("'auto' does not take a duration"),
        _ => Err("Invalid relay state. Use 'on', 'off' or 'auto'"),
    }
}

/// MQTT form: `<state> [minutes]`.
fn parse_relay_payload(message: &str) -> Result<RelayCommand, &'static str> {
    let mut parts = message.split_whitespace();
    let mode = parts.next().unwrap_or_default();
    let minutes = parts.next();
    if parts.next().is_some() {
        return Err("Unexpected trailing relay command arguments");
    }
    parse_relay_command(mode, minutes)
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("GREENHOUSE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./greenhouse.json"));

    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => RuntimeConfig::from_json(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn local_now(timezone: &Tz) -> Option<DateTime<FixedOffset>> {
    let utc = Utc::now();
    if utc.year() < MIN_SYNCED_YEAR {
        return None;
    }
    let local = utc.with_timezone(timezone);
    Some(local.with_timezone(&local.offset().fix()))
}

fn time_status(timezone: &Tz, local: Option<DateTime<FixedOffset>>) -> TimeStatus {
    TimeStatus {
        time_synced: local.is_some(),
        timezone: timezone.name(),
        date: local.map(|now| now.format("%Y-%m-%d").to_string()),
        time: local.map(|now| now.format("%H:%M:%S").to_string()),
        hour: local.map(|now| now.hour()),
        now_epoch: Utc::now().timestamp(),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn uptime_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use greenhouse_common::{GreenhouseConfig, OverrideMode, RelayConfig};

    use super::*;

    fn controller() -> Controller {
        let config = GreenhouseConfig {
            relays: vec![
                RelayConfig {
                    name: "vent".to_string(),
                    schedule: RelaySchedule::AlwaysOn,
                },
                RelayConfig {
                    name: "lamp".to_string(),
                    schedule: RelaySchedule::Daily {
                        on_hour: 6,
                        off_hour: 20,
                    },
                },
            ],
            ..GreenhouseConfig::default()
        };
        Controller {
            greenhouse: Greenhouse::new(&config),
            sensors: SimulatedSensors::new(None),
            relays: LoggedRelays::new(config.relays.len()),
        }
    }

    #[test]
    fn parses_relay_commands() {
        assert_eq!(
            parse_relay_command("ON", None),
            Ok(RelayCommand::Force {
                on: true,
                minutes: None
            })
        );
        assert_eq!(
            parse_relay_command("off", Some("15")),
            Ok(RelayCommand::Force {
                on: false,
                minutes: Some(15)
            })
        );
        assert_eq!(parse_relay_command(" auto ", None), Ok(RelayCommand::Auto));
        assert!(parse_relay_command("auto", Some("5")).is_err());
        assert!(parse_relay_command("on", Some("0")).is_err());
        assert!(parse_relay_command("toggle", None).is_err());
    }

    #[test]
    fn parses_mqtt_payloads() {
        assert_eq!(
            parse_relay_payload("on 30"),
            Ok(RelayCommand::Force {
                on: true,
                minutes: Some(30)
            })
        );
        assert_eq!(parse_relay_payload("auto"), Ok(RelayCommand::Auto));
        assert!(parse_relay_payload("").is_err());
        assert!(parse_relay_payload("on 30 extra").is_err());
    }

    #[test]
    fn forced_command_overrides_and_auto_restores() {
        let mut controller = controller();
        controller.tick(1_000, Some(22));
        assert_eq!(controller.relays.states(), &[true, false]);

        controller
            .apply_relay_command(
                1,
                RelayCommand::Force {
                    on: true,
                    minutes: Some(5),
                },
                2_000,
                Some(22),
            )
            .unwrap();
        assert_eq!(controller.relays.states(), &[true, true]);
        assert_eq!(
            controller.greenhouse.relays().override_mode(1),
            Ok(OverrideMode::ForceOn)
        );
        assert_eq!(
            controller.greenhouse.relays().override_remaining_ms(1, 2_000),
            Ok(300_001)
        );

        controller
            .apply_relay_command(1, RelayCommand::Auto, 3_000, Some(22))
            .unwrap();
        assert_eq!(controller.relays.states(), &[true, false]);
        assert_eq!(
            controller.greenhouse.relays().override_mode(1),
            Ok(OverrideMode::None)
        );
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let mut controller = controller();
        assert_eq!(
            controller.apply_relay_command(7, RelayCommand::Auto, 1, Some(3)),
            Err(RelayError::UnknownChannel(7))
        );
    }

    #[test]
    fn schedule_change_applies_immediately() {
        let mut controller = controller();
        controller.tick(1_000, Some(22));

        controller
            .set_schedule(
                1,
                RelaySchedule::Daily {
                    on_hour: 20,
                    off_hour: 6,
                },
                2_000,
                Some(22),
            )
            .unwrap();
        assert_eq!(controller.relays.states(), &[true, true]);
    }

    #[test]
    fn out_of_tick_relay_change_is_published() {
        let mut controller = controller();
        controller
            .greenhouse
            .link_mut()
            .on_attempt_result(true, 500);
        assert!(controller.tick(1_000, Some(22)).publish_due);

        let changed = controller
            .apply_relay_command(
                1,
                RelayCommand::Force {
                    on: true,
                    minutes: Some(5),
                },
                2_000,
                Some(22),
            )
            .unwrap();
        assert!(changed);

        let report = controller.tick(3_000, Some(22));
        assert!(report.changed_relays.is_empty());
        assert!(report.publish_due);
        assert!(!controller.tick(4_000, Some(22)).publish_due);

        let repeated = controller
            .apply_relay_command(
                1,
                RelayCommand::Force {
                    on: true,
                    minutes: None,
                },
                5_000,
                Some(22),
            )
            .unwrap();
        assert!(!repeated);
        assert!(!controller.tick(6_000, Some(22)).publish_due);
    }

    #[test]
    fn schedule_change_reports_flip() {
        let mut controller = controller();
        controller.tick(1_000, Some(12));

        let unchanged = controller
            .set_schedule(
                1,
                RelaySchedule::Daily {
                    on_hour: 8,
                    off_hour: 18,
                },
                2_000,
                Some(12),
            )
            .unwrap();
        assert!(!unchanged);

        let changed = controller
            .set_schedule(
                1,
                RelaySchedule::Daily {
                    on_hour: 13,
                    off_hour: 18,
                },
                3_000,
                Some(12),
            )
            .unwrap();
        assert!(changed);
        assert_eq!(controller.relays.states(), &[true, false]);
    }

    #[test]
    fn poll_outcomes_drive_the_retry_policy() {
        let mut link = ConnectivityRetryPolicy::new(5_000);

        assert_eq!(
            record_poll_outcome(&mut link, PollOutcome::Failed, 100),
            LinkTransition::AttemptFailed
        );
        assert!(!link.is_connected());
        assert!(!link.should_retry_now(5_100));
        assert!(link.should_retry_now(5_101));

        assert_eq!(
            record_poll_outcome(&mut link, PollOutcome::ConnAck, 5_200),
            LinkTransition::Connected
        );
        assert!(link.is_connected());

        assert_eq!(
            record_poll_outcome(&mut link, PollOutcome::Traffic, 6_000),
            LinkTransition::Unchanged
        );
        assert!(link.is_connected());

        assert_eq!(
            record_poll_outcome(&mut link, PollOutcome::Failed, 7_000),
            LinkTransition::Lost
        );
        assert!(!link.is_connected());
        assert!(!link.should_retry_now(12_000));
        assert!(link.should_retry_now(12_001));
    }

    #[test]
    fn telemetry_lists_every_relay() {
        let mut controller = controller();
        controller.tick(1_000, Some(8));

        let topics: Vec<String> = controller
            .telemetry()
            .messages()
            .into_iter()
            .map(|(topic, _)| topic)
            .collect();
        assert_eq!(
            topics,
            vec![
                TOPIC_SENSORS_STATE.to_string(),
                relay_state_topic(0),
                relay_state_topic(1),
            ]
        );
    }
}
