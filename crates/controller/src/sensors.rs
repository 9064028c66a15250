//! Sensor sources sampled once per tick.
//!
//! The control loop only sees the [`DistanceSensor`] and
//! [`EnvironmentSource`] traits.  With the `gpio` feature the distance comes
//! from an HC-SR04 style trigger/echo sensor; with `sim` (the default) both
//! sources are simulated.  Every read is fallible on its own so one dead
//! sensor never blanks the others.

use anyhow::Result;

#[cfg(not(feature = "sim"))]
use anyhow::anyhow;

/// Measures the distance from the sensor down to the water surface.
pub trait DistanceSensor {
    fn measure_cm(&mut self) -> Result<f32>;

    /// Told every tick whether the pump is running.  Only simulators care.
    fn observe_pump(&mut self, _running: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// Temperature/humidity come from one device, pressure from another; they
/// fail independently.
pub trait EnvironmentSource {
    fn read_climate(&mut self) -> Result<Climate>;
    fn read_pressure(&mut self) -> Result<f32>;
}

/// Speed of sound, cm per µs, at roughly 20 °C.
const SOUND_CM_PER_US: f32 = 0.0343;

/// Convert an echo pulse width to a one-way distance.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
pub fn echo_to_cm(echo_us: f32) -> f32 {
    echo_us * SOUND_CM_PER_US / 2.0
}

// ---------------------------------------------------------------------------
// Real ultrasonic sensor (production — requires rppal + Raspberry Pi)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
mod hw {
    use std::time::{Duration, Instant};

    use anyhow::{bail, Result};
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use tracing::info;

    use super::{echo_to_cm, DistanceSensor};

    const TRIGGER_PULSE: Duration = Duration::from_micros(10);
    const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

    pub struct Ultrasonic {
        trigger: OutputPin,
        echo: InputPin,
    }

    impl Ultrasonic {
        pub fn new(trigger_pin: u8, echo_pin: u8) -> Result<Self> {
            let gpio = Gpio::new()?;
            let mut trigger = gpio.get(trigger_pin)?.into_output();
            trigger.set_low();
            let echo = gpio.get(echo_pin)?.into_input();
            info!(trigger = trigger_pin, echo = echo_pin, "ultrasonic sensor initialised");
            Ok(Self { trigger, echo })
        }
    }

    impl DistanceSensor for Ultrasonic {
        fn measure_cm(&mut self) -> Result<f32> {
            self.trigger.set_high();
            std::thread::sleep(TRIGGER_PULSE);
            self.trigger.set_low();

            let armed = Instant::now();
            while self.echo.is_low() {
                if armed.elapsed() > ECHO_TIMEOUT {
                    bail!("no echo within {ECHO_TIMEOUT:?}");
                }
            }
            let rise = Instant::now();
            while self.echo.is_high() {
                if rise.elapsed() > ECHO_TIMEOUT {
                    bail!("echo held high past {ECHO_TIMEOUT:?}");
                }
            }

            let width_us = rise.elapsed().as_secs_f32() * 1_000_000.0;
            if width_us <= 0.0 {
                bail!("zero-width echo");
            }
            Ok(echo_to_cm(width_us))
        }
    }
}

#[cfg(feature = "gpio")]
pub use hw::Ultrasonic;

// ---------------------------------------------------------------------------
// Simulated tank and weather (development — no hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "sim")]
mod sim {
    use anyhow::{bail, Result};

    use super::{Climate, DistanceSensor, EnvironmentSource};

    /// Water surface distance with slow evaporation, a faster drop while the
    /// pump runs, an automatic refill once the tank is drained, and the
    /// occasional missed echo.
    pub struct SimTank {
        distance_cm: f32,
        pumping: bool,
        dropout_prob: f32,
    }

    const FULL_CM: f32 = 2.5;
    const DRAINED_CM: f32 = 9.0;
    const EVAPORATION_CM: f32 = 0.002;
    const PUMP_DRAW_CM: f32 = 0.05;

    impl SimTank {
        pub fn new() -> Self {
            Self {
                distance_cm: 3.0 + fastrand::f32() * 3.0,
                pumping: false,
                dropout_prob: 0.02,
            }
        }

        #[cfg(test)]
        fn with(distance_cm: f32, dropout_prob: f32) -> Self {
            Self {
                distance_cm,
                pumping: false,
                dropout_prob,
            }
        }
    }

    impl DistanceSensor for SimTank {
        fn measure_cm(&mut self) -> Result<f32> {
            let draw = if self.pumping { PUMP_DRAW_CM } else { 0.0 };
            self.distance_cm += EVAPORATION_CM + draw;
            if self.distance_cm > DRAINED_CM {
                // Someone refilled it.
                self.distance_cm = FULL_CM;
            }

            if fastrand::f32() < self.dropout_prob {
                bail!("simulated echo timeout");
            }
            let noise = (fastrand::f32() - 0.5) * 0.1;
            Ok((self.distance_cm + noise).max(0.0))
        }

        fn observe_pump(&mut self, running: bool) {
            self.pumping = running;
        }
    }

    /// Random-walk temperature, humidity and pressure.  The climate sensor
    /// fails now and then, like a real DHT22.
    pub struct SimWeather {
        temperature_c: f32,
        humidity_pct: f32,
        pressure_hpa: f32,
        climate_dropout_prob: f32,
    }

    fn step(value: &mut f32, sigma: f32, min: f32, max: f32) {
        *value = (*value + (fastrand::f32() - 0.5) * 2.0 * sigma).clamp(min, max);
    }

    impl SimWeather {
        pub fn new() -> Self {
            Self {
                temperature_c: 27.0,
                humidity_pct: 65.0,
                pressure_hpa: 1009.0,
                climate_dropout_prob: 0.05,
            }
        }
    }

    impl EnvironmentSource for SimWeather {
        fn read_climate(&mut self) -> Result<Climate> {
            step(&mut self.temperature_c, 0.05, 15.0, 40.0);
            step(&mut self.humidity_pct, 0.2, 20.0, 100.0);
            if fastrand::f32() < self.climate_dropout_prob {
                bail!("simulated checksum failure");
            }
            Ok(Climate {
                temperature_c: self.temperature_c,
                humidity_pct: self.humidity_pct,
            })
        }

        fn read_pressure(&mut self) -> Result<f32> {
            step(&mut self.pressure_hpa, 0.05, 980.0, 1040.0);
            Ok(self.pressure_hpa)
        }
    }

}

#[cfg(feature = "sim")]
pub use sim::{SimTank, SimWeather};

// ---------------------------------------------------------------------------
// Unfitted
// ---------------------------------------------------------------------------

/// Stand-in for hardware the build has no driver for; every read fails.
#[cfg(not(feature = "sim"))]
pub struct Unfitted;

#[cfg(not(feature = "sim"))]
impl EnvironmentSource for Unfitted {
    fn read_climate(&mut self) -> Result<Climate> {
        Err(anyhow!("no climate sensor driver in this build"))
    }

    fn read_pressure(&mut self) -> Result<f32> {
        Err(anyhow!("no pressure sensor driver in this build"))
    }
}

#[cfg(not(any(feature = "sim", feature = "gpio")))]
impl DistanceSensor for Unfitted {
    fn measure_cm(&mut self) -> Result<f32> {
        Err(anyhow!("no distance sensor driver in this build"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
