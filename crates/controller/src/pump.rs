//! Pump relay control. The `gpio` feature gates the real rppal driver;
//! without it, a mock relay records the level and logs it.
//!
//! [`Pump`] is the only owner of the on/off flag.  Transitions are
//! idempotent and every real transition queues exactly one notice.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::state::{Notice, Outbox};

// ---------------------------------------------------------------------------
// Real relay (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct PumpRelay {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl PumpRelay {
    pub fn new(pin_num: u8, active_low: bool) -> Result<Self> {
        let pin = Gpio::new()?.get(pin_num)?.into_output();
        let mut relay = Self { pin, active_low };
        // Fail-safe: ensure "OFF" at startup
        relay.set(false);
        info!(gpio = pin_num, active_low, "pump relay initialised");
        Ok(relay)
    }

    pub fn set(&mut self, on: bool) {
        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    pub fn energized(&self) -> bool {
        self.pin.is_set_high() != self.active_low
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development — no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PumpRelay {
    energized: bool,
}

#[cfg(not(feature = "gpio"))]
impl PumpRelay {
    pub fn new(pin_num: u8, _active_low: bool) -> Result<Self> {
        info!(gpio = pin_num, "[mock-gpio] pump relay registered (not wired)");
        Ok(Self { energized: false })
    }

    pub fn set(&mut self, on: bool) {
        self.energized = on;
        info!("[mock-gpio] pump relay set {}", if on { "ON" } else { "OFF" });
    }

    pub fn energized(&self) -> bool {
        self.energized
    }
}

// ---------------------------------------------------------------------------
// Actuator
// ---------------------------------------------------------------------------

pub struct Pump {
    relay: PumpRelay,
    is_on: bool,
}

impl Pump {
    /// Take ownership of the relay and force it off.  This happens once per
    /// boot, before any configuration is consulted, and is silent.
    pub fn new(mut relay: PumpRelay) -> Self {
        relay.set(false);
        info!("pump forced OFF at startup");
        Self {
            relay,
            is_on: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn turn_on(&mut self, outbox: &mut Outbox) {
        if self.is_on {
            return;
        }
        self.relay.set(true);
        self.is_on = true;
        info!("pump ON");
        outbox.push(Notice::PumpStarted);
    }

    pub fn turn_off(&mut self, outbox: &mut Outbox) {
        if !self.is_on {
            return;
        }
        self.relay.set(false);
        self.is_on = false;
        info!("pump OFF");
        outbox.push(Notice::PumpStopped);
    }

    /// Level actually driven on the relay output.
    pub fn relay_energized(&self) -> bool {
        self.relay.energized()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
