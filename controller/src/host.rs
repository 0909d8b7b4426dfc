use std::{
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use hvac_common::{
    celsius_to_fahrenheit, fahrenheit_to_celsius, ChangeEvent, ConfigError, DegreeUnit, FanMode,
    Mode, SettingsStore, Status, ThermostatLogic, TOPIC_CMD_FAN, TOPIC_CMD_MODE, TOPIC_CMD_TARGET,
    TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_TEMP,
};

const KEY_MODE: &str = "mode";
const KEY_FAN: &str = "fan";
const KEY_TARGET: &str = "target_temp";
const KEY_DEGREES: &str = "degrees";
const KEY_BRIGHTNESS: &str = "normal_brightness";

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

// Lock order is engine before store, never the reverse: engine mutations
// call into the store through the status sink while the engine lock is
// held.
#[derive(Clone)]
struct AppState {
    logic: Arc<Mutex<ThermostatLogic>>,
    store: Arc<StdMutex<SettingsStore>>,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    #[serde(rename = "currentTemp")]
    current_temp: Option<f32>,
    #[serde(rename = "targetTemp")]
    target_temp: f32,
    mode: &'static str,
    fan: &'static str,
    status: &'static str,
    #[serde(rename = "fanRunning")]
    fan_running: bool,
    degrees: &'static str,
}

#[derive(Debug, Deserialize)]
struct TargetUpdate {
    // Interpreted in the current display unit.
    target: f32,
}

#[derive(Debug, Deserialize)]
struct ModeUpdate {
    mode: Mode,
}

#[derive(Debug, Deserialize)]
struct FanUpdate {
    fan: FanMode,
}

#[derive(Debug, Deserialize)]
struct DisplayUpdate {
    degrees: DegreeUnit,
    #[serde(default)]
    brightness: Option<u8>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("HVAC_DATA_DIR").unwrap_or_else(|_| "./.hvac".to_string());
    let mut store = SettingsStore::open(&data_dir);
    store.set_default_resolver(|key| default_setting(key).to_string());
    if !store.is_durable() {
        warn!("running without durable settings; nothing will survive a restart");
    }

    let mode = restore_enum(&mut store, KEY_MODE, Mode::Automatic);
    let fan = restore_enum(&mut store, KEY_FAN, FanMode::Automatic);
    let target = restore_target(&mut store);

    let store = Arc::new(StdMutex::new(store));

    let mut logic = ThermostatLogic::new();
    let sink_store = store.clone();
    logic.set_status_sink(Box::new(move |status: Status, fan_running: bool| {
        let mut store = sink_store.lock().expect("settings store lock poisoned");
        store.log_status_change(status, fan_running, Utc::now().timestamp_millis());
    }));
    logic.subscribe(|event| match event {
        ChangeEvent::Status {
            status,
            fan_running,
        } => info!("status: {status}, fan {}", on_off(*fan_running)),
        other => debug!("engine change: {other:?}"),
    });
    logic.set_mode(mode);
    logic.set_fan_mode(fan);
    logic.set_target_temperature(target);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("hvac-controller", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        logic: Arc::new(Mutex::new(logic)),
        store,
        mqtt,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/target", post(handle_set_target))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/fan", post(handle_set_fan))
        .route("/api/display", put(handle_put_display))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_MODE,
        TOPIC_CMD_FAN,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let payload = serde_json::to_vec(&build_status_payload(&app_state).await);
            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    match topic.as_str() {
        TOPIC_SENSOR_TEMP => {
            let temp_c = parse_finite(message).context("bad sensor temperature")?;
            {
                app_state
                    .logic
                    .lock()
                    .await
                    .set_current_temperature(temp_c);
            }
            let mut store = app_state.store.lock().expect("settings store lock poisoned");
            store.log_temperature_sample(temp_c, Utc::now().timestamp_millis());
        }
        TOPIC_CMD_TARGET => {
            let target = parse_finite(message).context("bad target command")?;
            apply_target_celsius(app_state, target).await;
        }
        TOPIC_CMD_MODE => {
            let mode: Mode = message.parse()?;
            apply_mode(app_state, mode).await;
        }
        TOPIC_CMD_FAN => {
            let fan: FanMode = message.parse()?;
            apply_fan(app_state, fan).await;
        }
        other => debug!("ignoring message on topic {other}"),
    }

    Ok(())
}

// Values are parsed off the wire, so NaN and the infinities are
// representable; the engine does not validate its input domain.
fn parse_finite(message: &str) -> anyhow::Result<f32> {
    let value: f32 = message.parse()?;
    anyhow::ensure!(value.is_finite(), "non finite value {value}");
    Ok(value)
}

async fn apply_target_celsius(app_state: &AppState, target_c: f32) {
    let changed = app_state
        .logic
        .lock()
        .await
        .set_target_temperature(target_c);

    if changed {
        let mut store = app_state.store.lock().expect("settings store lock poisoned");
        store.set(KEY_TARGET, format!("{}", target_c.round()));
    }
}

async fn apply_mode(app_state: &AppState, mode: Mode) {
    let changed = app_state.logic.lock().await.set_mode(mode);

    if changed {
        let mut store = app_state.store.lock().expect("settings store lock poisoned");
        store.set(KEY_MODE, mode.as_str());
    }
}

async fn apply_fan(app_state: &AppState, fan: FanMode) {
    let changed = app_state.logic.lock().await.set_fan_mode(fan);

    if changed {
        let mut store = app_state.store.lock().expect("settings store lock poisoned");
        store.set(KEY_FAN, fan.as_str());
    }
}

async fn build_status_payload(app_state: &AppState) -> StatusPayload {
    let (current, target, mode, fan, status, fan_running) = {
        let logic = app_state.logic.lock().await;
        (
            logic.current_temperature(),
            logic.target_temperature(),
            logic.mode(),
            logic.fan_mode(),
            logic.status(),
            logic.fan_status(),
        )
    };

    let degrees = display_unit(app_state);

    StatusPayload {
        current_temp: current.map(|value| display_temp(value, degrees)),
        target_temp: display_temp(target, degrees),
        mode: mode.as_str(),
        fan: fan.as_str(),
        status: status.as_str(),
        fan_running,
        degrees: degrees.as_str(),
    }
}

fn display_unit(app_state: &AppState) -> DegreeUnit {
    let raw = {
        let mut store = app_state.store.lock().expect("settings store lock poisoned");
        store.get(KEY_DEGREES)
    };
    raw.parse().unwrap_or_else(|err: ConfigError| {
        warn!("ignoring persisted display unit: {err}");
        DegreeUnit::Celsius
    })
}

fn display_temp(celsius: f32, unit: DegreeUnit) -> f32 {
    match unit {
        DegreeUnit::Celsius => celsius,
        DegreeUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(build_status_payload(&state).await)
}

async fn handle_set_target(
    State(state): State<AppState>,
    Json(update): Json<TargetUpdate>,
) -> impl IntoResponse {
    if !update.target.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "target must be a finite number");
    }

    let target_c = match display_unit(&state) {
        DegreeUnit::Celsius => update.target,
        DegreeUnit::Fahrenheit => fahrenheit_to_celsius(update.target),
    };
    apply_target_celsius(&state, target_c).await;

    Json(build_status_payload(&state).await).into_response()
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Json(update): Json<ModeUpdate>,
) -> impl IntoResponse {
    apply_mode(&state, update.mode).await;
    Json(build_status_payload(&state).await)
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Json(update): Json<FanUpdate>,
) -> impl IntoResponse {
    apply_fan(&state, update.fan).await;
    Json(build_status_payload(&state).await)
}

async fn handle_put_display(
    State(state): State<AppState>,
    Json(update): Json<DisplayUpdate>,
) -> impl IntoResponse {
    {
        let mut store = state.store.lock().expect("settings store lock poisoned");
        store.with_transaction(|store| {
            store.set(KEY_DEGREES, update.degrees.as_str());
            if let Some(brightness) = update.brightness {
                store.set(KEY_BRIGHTNESS, brightness.to_string());
            }
        });
    }

    // Display-only change; the engine state is untouched but observers
    // need to re-render.
    state.logic.lock().await.force_refresh();

    Json(build_status_payload(&state).await)
}

fn default_setting(key: &str) -> &'static str {
    match key {
        KEY_MODE => "auto",
        KEY_FAN => "auto",
        KEY_TARGET => "20",
        KEY_DEGREES => "c",
        KEY_BRIGHTNESS => "100",
        _ => "",
    }
}

fn restore_enum<T>(store: &mut SettingsStore, key: &str, fallback: T) -> T
where
    T: std::str::FromStr<Err = ConfigError> + Copy,
{
    let raw = store.get(key);
    match raw.parse() {
        Ok(value) => value,
        Err(err) => {
            warn!("ignoring persisted value for {key:?}: {err}");
            fallback
        }
    }
}

fn restore_target(store: &mut SettingsStore) -> f32 {
    let raw = store.get(KEY_TARGET);
    match raw.parse::<f32>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            let err = ConfigError::InvalidNumber(raw, KEY_TARGET.to_string());
            warn!("ignoring persisted setpoint: {err}");
            20.0
        }
    }
}

fn on_off(running: bool) -> &'static str {
    if running {
        "on"
    } else {
        "off"
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
