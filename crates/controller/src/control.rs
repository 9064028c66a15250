//! The control loop: the single owner of controller state.
//!
//! One tick reads the sensors, classifies the tank, refreshes the display
//! and the broker, runs the watering policy, then serves the chat channel
//! and at most one queued HTTP request.  Queued notices are broadcast as
//! soon as each step that can produce them is done.

use std::time::Duration;

use anyhow::{bail, Result};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::{self, Publisher};
use crate::chat::{self, ChatTransport};
use crate::dispatch::{self, CommandSource};
use crate::display::StatusDisplay;
use crate::policy;
use crate::sensors::{DistanceSensor, EnvironmentSource};
use crate::state::{ControllerState, EnvironmentReading, Notice};
use crate::status::{self, Topics};
use crate::web::HttpRequest;

pub struct Devices {
    pub distance: Box<dyn DistanceSensor + Send>,
    pub environment: Box<dyn EnvironmentSource + Send>,
    pub display: Box<dyn StatusDisplay + Send>,
    pub publisher: Box<dyn Publisher + Send>,
    /// `None` when no bot token is configured.
    pub chat: Option<Box<dyn ChatTransport>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub tick: Duration,
    pub error_pause: Duration,
}

pub struct ControlLoop {
    state: ControllerState,
    devices: Devices,
    topics: Topics,
    http: mpsc::Receiver<HttpRequest>,
    timing: Timing,
}

/// Read both environment devices; a failure blanks only its own fields.
pub fn sample_environment(source: &mut dyn EnvironmentSource) -> EnvironmentReading {
    let mut reading = EnvironmentReading::default();
    match source.read_climate() {
        Ok(c) => {
            reading.temperature_c = Some(c.temperature_c);
            reading.humidity_pct = Some(c.humidity_pct);
        }
        Err(e) => warn!(error = %e, "sensor: temperature/humidity unavailable"),
    }
    match source.read_pressure() {
        Ok(p) => reading.pressure_hpa = Some(p),
        Err(e) => warn!(error = %e, "sensor: pressure unavailable"),
    }
    reading
}

impl ControlLoop {
    /// Queues the online announcement for the first tick.
    pub fn new(
        mut state: ControllerState,
        devices: Devices,
        topics: Topics,
        http: mpsc::Receiver<HttpRequest>,
        timing: Timing,
    ) -> Self {
        state.outbox.push(Notice::Online);
        Self {
            state,
            devices,
            topics,
            http,
            timing,
        }
    }

    pub async fn run(mut self) {
        info!(
            tick_ms = self.timing.tick.as_millis() as u64,
            chat = self.devices.chat.is_some(),
            "control loop running"
        );
        loop {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            if let Err(e) = self.tick(now).await {
                error!(error = %format!("{e:#}"), "tick failed");
                sleep(self.timing.error_pause).await;
            }
            sleep(self.timing.tick).await;
        }
    }

    /// One pass at wall-clock time `now` (unix seconds).
    pub async fn tick(&mut self, now: i64) -> Result<()> {
        // ── Sense ───────────────────────────────────────────────────
        self.devices.distance.observe_pump(self.state.pump.is_on());
        let distance = match self.devices.distance.measure_cm() {
            Ok(cm) => Some(cm),
            Err(e) => {
                warn!(error = %e, "sensor: distance unavailable");
                None
            }
        };
        let environment = sample_environment(self.devices.environment.as_mut());
        let reading = self.state.calibration.classify(distance);
        self.state.record_readings(reading, environment);

        info!(
            tank = %reading,
            temperature_c = ?environment.temperature_c,
            humidity_pct = ?environment.humidity_pct,
            pressure_hpa = ?environment.pressure_hpa,
            pump = self.state.pump.is_on(),
            auto = self.state.watering.auto_enabled,
            "tick"
        );
        debug!(
            relay_energized = self.state.pump.relay_energized(),
            uptime_sec = self.state.uptime_secs(),
            "tick detail"
        );

        // ── Report ──────────────────────────────────────────────────
        self.devices
            .display
            .show(&status::display_lines(&reading, self.state.watering.auto_enabled));
        let messages = status::publications(&self.topics, &reading, &environment);
        broker::publish_all(self.devices.publisher.as_mut(), &messages);

        // ── Policy ──────────────────────────────────────────────────
        if let Some(hold_for) = policy::begin(&mut self.state, reading.supply, now) {
            self.flush().await;
            policy::hold(hold_for).await;
            policy::finish_cycle(&mut self.state, now);
        }
        self.flush().await;

        // ── Commands ────────────────────────────────────────────────
        self.poll_chat().await;
        let served = self.service_http();
        self.flush().await;
        served
    }

    /// Handle this tick's chat messages.  A failed poll is dropped; the
    /// next tick polls afresh.
    async fn poll_chat(&mut self) {
        let Some(chat) = self.devices.chat.as_mut() else {
            return;
        };
        let messages = match chat.poll().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "chat: poll failed");
                return;
            }
        };
        for message in messages {
            let Some(command) = dispatch::parse_chat(&message.text) else {
                debug!(chat_id = message.chat_id, text = %message.text, "chat: ignoring message");
                continue;
            };
            let source = CommandSource::Chat {
                chat_id: message.chat_id,
            };
            let outcome = dispatch::dispatch(&mut self.state, &source, command);
            if let Some(reply) = outcome.reply(&source) {
                if let Err(e) = chat.send(message.chat_id, &reply).await {
                    warn!(chat_id = message.chat_id, error = %format!("{e:#}"), "chat: reply failed");
                }
            }
        }
    }

    /// Answer at most one queued HTTP request.  Fails once the server side
    /// of the queue is gone.
    fn service_http(&mut self) -> Result<()> {
        let request = match self.http.try_recv() {
            Ok(request) => request,
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => bail!("http request queue closed"),
        };
        if request.reply.is_closed() {
            debug!(
                remote_addr = %request.remote_addr,
                command = ?request.command,
                "http: caller gave up, request discarded"
            );
            return Ok(());
        }
        let source = CommandSource::Http {
            remote_addr: request.remote_addr,
        };
        let outcome = dispatch::dispatch(&mut self.state, &source, request.command);
        let body = outcome.reply(&source).unwrap_or_default();
        if request.reply.send(body).is_err() {
            debug!(remote_addr = %request.remote_addr, "http: caller went away before the answer");
        }
        Ok(())
    }

    /// Broadcast queued notices to every allow-listed chat.
    async fn flush(&mut self) {
        if self.state.outbox.is_empty() {
            return;
        }
        let notices = self.state.outbox.drain();
        let Some(chat) = self.devices.chat.as_deref() else {
            for notice in &notices {
                info!(%notice, "notice (chat disabled)");
            }
            return;
        };
        let chat_ids: Vec<i64> = self.state.allowed_chats.iter().copied().collect();
        for notice in notices {
            chat::broadcast(chat, &chat_ids, &notice.to_string()).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
