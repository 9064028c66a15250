mod broker;
mod chat;
mod config;
mod control;
mod dispatch;
mod display;
mod policy;
mod pump;
mod sensors;
mod state;
mod status;
mod tank;
mod web;

use anyhow::{Context, Result};
use std::env;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use broker::MqttPublisher;
use chat::{ChatTransport, Telegram};
use config::Config;
use control::{ControlLoop, Devices, Timing};
use display::LogDisplay;
use pump::{Pump, PumpRelay};
use sensors::{DistanceSensor, EnvironmentSource};
use state::ControllerState;
use status::Topics;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Supervisor: any escape from the loop is a cold restart ──────
    loop {
        match run_once(&cfg).await {
            Ok(()) => warn!("controller stopped"),
            Err(e) => error!(error = %format!("{e:#}"), "controller failed"),
        }
        sleep(cfg.restart_pause()).await;
        info!("restarting controller");
    }
}

/// Build every component from scratch and run until the control loop dies.
async fn run_once(cfg: &Config) -> Result<()> {
    // ── Pump (forced off before anything else can fail) ─────────────
    let relay = PumpRelay::new(cfg.pins.pump, cfg.pins.pump_active_low)
        .context("failed to initialise pump relay")?;
    let state = ControllerState::new(
        Pump::new(relay),
        cfg.calibration(),
        cfg.watering_config(),
        cfg.limits(),
        cfg.telegram.allowed_chat_ids.iter().copied(),
    );

    // ── Chat ────────────────────────────────────────────────────────
    let chat: Option<Box<dyn ChatTransport>> = if cfg.chat_enabled() {
        let telegram = Telegram::new(
            &cfg.telegram.api_base,
            cfg.telegram.bot_token.trim(),
            cfg.telegram.poll_timeout_sec,
            cfg.telegram.request_timeout_sec,
        )?;
        Some(Box::new(telegram))
    } else {
        warn!("no bot token configured, chat channel disabled");
        None
    };

    // ── Devices + broker ────────────────────────────────────────────
    let devices = Devices {
        distance: distance_sensor(cfg)?,
        environment: environment_source(),
        display: Box::new(LogDisplay::new()),
        publisher: Box::new(MqttPublisher::start(
            &cfg.mqtt.host,
            cfg.mqtt.port,
            &cfg.mqtt.client_id,
        )),
        chat,
    };
    let topics = Topics::new(&cfg.mqtt.topic_prefix, &state.calibration);

    // ── HTTP control ────────────────────────────────────────────────
    let (queue, requests) = mpsc::channel(web::QUEUE_DEPTH);
    let listener = web::bind(&cfg.http.bind).await?;
    let app = web::router(queue, cfg.reply_timeout());
    let server = tokio::spawn(async move {
        if let Err(e) = web::serve(listener, app).await {
            error!(error = %format!("{e:#}"), "http server stopped");
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let control = ControlLoop::new(
        state,
        devices,
        topics,
        requests,
        Timing {
            tick: cfg.tick(),
            error_pause: cfg.loop_error_pause(),
        },
    );
    let outcome = tokio::spawn(control.run()).await;
    server.abort();
    outcome.context("control loop task ended")
}

#[cfg(feature = "gpio")]
fn distance_sensor(cfg: &Config) -> Result<Box<dyn DistanceSensor + Send>> {
    let sensor = sensors::Ultrasonic::new(cfg.pins.trigger, cfg.pins.echo)
        .context("failed to initialise distance sensor")?;
    Ok(Box::new(sensor))
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn distance_sensor(_cfg: &Config) -> Result<Box<dyn DistanceSensor + Send>> {
    info!("using simulated tank");
    Ok(Box::new(sensors::SimTank::new()))
}

#[cfg(not(any(feature = "sim", feature = "gpio")))]
fn distance_sensor(_cfg: &Config) -> Result<Box<dyn DistanceSensor + Send>> {
    warn!("no distance sensor in this build");
    Ok(Box::new(sensors::Unfitted))
}

#[cfg(feature = "sim")]
fn environment_source() -> Box<dyn EnvironmentSource + Send> {
    Box::new(sensors::SimWeather::new())
}

#[cfg(not(feature = "sim"))]
fn environment_source() -> Box<dyn EnvironmentSource + Send> {
    Box::new(sensors::Unfitted)
}
