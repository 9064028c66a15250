use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use crate::pump::Pump;
use crate::tank::{Calibration, TankReading};

/// Sent to every allow-listed chat at boot and in reply to `/start`.
pub const HELP_TEXT: &str = "🤖 *Water System Online!*\n\
Available Commands:\n\
/status - Show all sensor values\n\
/tank - Show tank level\n\
/setwater <sec> - Set watering interval\n\
/setduration <sec> - Set pump on duration\n\
/autoon - Enable automatic watering\n\
/autooff - Disable automatic watering\n\
/pumpon - Turn the pump on\n\
/pumpoff - Turn the pump off\n";

// ---------------------------------------------------------------------------
// Notices (broadcast to every allow-listed chat)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Online,
    PumpStarted,
    PumpStopped,
    TankLow,
    IntervalSet(u64),
    DurationSet(u64),
    AutoEnabled,
    AutoDisabled,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str(HELP_TEXT),
            Self::PumpStarted => f.write_str("💧 Pump ON — watering started."),
            Self::PumpStopped => f.write_str("✔ Pump OFF — watering stopped."),
            Self::TankLow => f.write_str("⚠️ *Tank LOW!* Please refill the water tank."),
            Self::IntervalSet(sec) => write!(f, "⏱ Interval set to {sec} sec"),
            Self::DurationSet(sec) => write!(f, "💧 Duration set to {sec} sec"),
            Self::AutoEnabled => f.write_str("🔄 Automatic watering ENABLED"),
            Self::AutoDisabled => f.write_str("⛔ Automatic watering DISABLED"),
        }
    }
}

/// Notices queued by state changes, waiting for the control loop to
/// broadcast them.
#[derive(Debug, Default)]
pub struct Outbox {
    notices: Vec<Notice>,
}

impl Outbox {
    pub fn push(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WateringConfig {
    pub interval_sec: u64,
    pub duration_sec: u64,
    pub auto_enabled: bool,
}

/// Upper bounds applied to interval/duration commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_interval_sec: u64,
    pub max_duration_sec: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WateringClock {
    /// Unix seconds at which the last automatic cycle started.  Only a
    /// completed cycle moves it.
    pub last_cycle_epoch: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub pressure_hpa: Option<f32>,
}

pub struct ControllerState {
    pub started_at: Instant,
    pub calibration: Calibration,
    pub limits: Limits,
    pub allowed_chats: BTreeSet<i64>,
    pub watering: WateringConfig,
    pub clock: WateringClock,
    pub low_alert_sent: bool,
    pub pump: Pump,
    /// Most recent tick's readings, kept for on-demand queries only.
    pub tank: Option<TankReading>,
    pub environment: EnvironmentReading,
    pub outbox: Outbox,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ControllerState {
    pub fn new(
        pump: Pump,
        calibration: Calibration,
        watering: WateringConfig,
        limits: Limits,
        allowed_chats: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            calibration,
            limits,
            allowed_chats: allowed_chats.into_iter().collect(),
            watering,
            clock: WateringClock::default(),
            low_alert_sent: false,
            pump,
            tank: None,
            environment: EnvironmentReading::default(),
            outbox: Outbox::default(),
        }
    }

    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.contains(&chat_id)
    }

    /// Replace the last-known cache with this tick's readings.  Absent
    /// fields overwrite older values rather than leaving them in place.
    pub fn record_readings(&mut self, tank: TankReading, environment: EnvironmentReading) {
        self.tank = Some(tank);
        self.environment = environment;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
