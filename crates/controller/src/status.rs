//! Formatting of the current readings for the display, the broker and the
//! on-demand `status` / `tank` queries.

use std::fmt::Write as _;

use crate::state::{ControllerState, EnvironmentReading};
use crate::tank::{Calibration, TankReading, TankStatus};

/// Broker topics, one per published quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// `water_status` (label) in banded mode, `water_percent` otherwise.
    pub tank: String,
    pub distance: String,
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
}

impl Topics {
    pub fn new(prefix: &str, calibration: &Calibration) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let tank = match calibration {
            Calibration::Banded(_) => "water_status",
            Calibration::Percentage { .. } => "water_percent",
        };
        Self {
            tank: format!("{prefix}/{tank}"),
            distance: format!("{prefix}/water_cm"),
            temperature: format!("{prefix}/temperature"),
            humidity: format!("{prefix}/humidity"),
            pressure: format!("{prefix}/pressure"),
        }
    }
}

fn or_na(value: Option<f32>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "n/a".to_string(),
    }
}

/// `Tank: MID (5.2 cm)`; `Tank: n/a` before the first tick.
pub fn tank_text(tank: Option<&TankReading>) -> String {
    match tank {
        Some(reading) => format!("Tank: {reading}"),
        None => "Tank: n/a".to_string(),
    }
}

/// Full snapshot for the `status` command.
pub fn status_text(state: &ControllerState) -> String {
    let env = &state.environment;
    let mut out = String::new();
    let _ = writeln!(out, "Temp: {}°C", or_na(env.temperature_c, 1));
    let _ = writeln!(out, "Humidity: {}%", or_na(env.humidity_pct, 0));
    let _ = writeln!(out, "Pressure: {} hPa", or_na(env.pressure_hpa, 1));
    let _ = writeln!(out, "{}", tank_text(state.tank.as_ref()));
    let _ = writeln!(out, "Interval: {}s", state.watering.interval_sec);
    let _ = writeln!(out, "Duration: {}s", state.watering.duration_sec);
    let _ = writeln!(out, "Pump: {}", on_off(state.pump.is_on()));
    let _ = write!(
        out,
        "Auto-Watering: {}",
        on_off(state.watering.auto_enabled)
    );
    out
}

/// Two 16-column lines for the character display.
pub fn display_lines(tank: &TankReading, auto_enabled: bool) -> [String; 2] {
    [
        format!("Tank:{}", tank.status),
        format!("Auto:{}", on_off(auto_enabled)),
    ]
}

/// `(topic, payload)` pairs for this tick.  Absent values are not
/// published; the tank topic is always present.
pub fn publications(
    topics: &Topics,
    tank: &TankReading,
    env: &EnvironmentReading,
) -> Vec<(String, String)> {
    let tank_payload = match tank.status {
        TankStatus::Level(level) => level.to_string(),
        TankStatus::Percent(Some(pct)) => pct.to_string(),
        TankStatus::Percent(None) => "UNKNOWN".to_string(),
    };

    let mut out = vec![(topics.tank.clone(), tank_payload)];
    let optional = [
        (&topics.distance, tank.distance_cm, 1),
        (&topics.temperature, env.temperature_c, 1),
        (&topics.humidity, env.humidity_pct, 0),
        (&topics.pressure, env.pressure_hpa, 1),
    ];
    for (topic, value, decimals) in optional {
        if let Some(v) = value {
            out.push((topic.clone(), format!("{v:.decimals$}")));
        }
    }
    out
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tank::{Bands, DEFAULT_LOW_THRESHOLD_PCT};

    fn banded() -> Calibration {
        Calibration::Banded(Bands::default())
    }

    #[test]
    fn topics_follow_calibration() {
        let t = Topics::new("/aupp/group1/", &banded());
        assert_eq!(t.tank, "/aupp/group1/water_status");
        assert_eq!(t.distance, "/aupp/group1/water_cm");

        let pct = Calibration::Percentage {
            empty_cm: 20.0,
            full_cm: 4.0,
            low_threshold_pct: DEFAULT_LOW_THRESHOLD_PCT,
        };
        assert_eq!(Topics::new("tank", &pct).tank, "tank/water_percent");
    }

    #[test]
    fn tank_text_before_first_reading() {
        assert_eq!(tank_text(None), "Tank: n/a");
    }

    #[test]
    fn tank_text_with_reading() {
        let reading = banded().classify(Some(5.24));
        assert_eq!(tank_text(Some(&reading)), "Tank: MID (5.2 cm)");
    }

    #[test]
    fn display_lines_show_status_and_auto() {
        let reading = banded().classify(None);
        assert_eq!(
            display_lines(&reading, true),
            ["Tank:UNKNOWN".to_string(), "Auto:ON".to_string()]
        );
    }

    #[test]
    fn publications_skip_absent_values() {
        let topics = Topics::new("p", &banded());
        let reading = banded().classify(None);
        let env = EnvironmentReading {
            temperature_c: Some(24.56),
            humidity_pct: None,
            pressure_hpa: Some(1008.31),
        };

        let pubs = publications(&topics, &reading, &env);
        assert_eq!(
            pubs,
            vec![
                ("p/water_status".to_string(), "UNKNOWN".to_string()),
                ("p/temperature".to_string(), "24.6".to_string()),
                ("p/pressure".to_string(), "1008.3".to_string()),
            ]
        );
    }

    #[test]
    fn publications_percent_payload_is_bare_number() {
        let cal = Calibration::Percentage {
            empty_cm: 20.0,
            full_cm: 4.0,
            low_threshold_pct: DEFAULT_LOW_THRESHOLD_PCT,
        };
        let topics = Topics::new("p", &cal);
        let pubs = publications(&topics, &cal.classify(Some(12.0)), &EnvironmentReading::default());
        assert_eq!(pubs[0], ("p/water_percent".to_string(), "50".to_string()));
        assert_eq!(pubs[1], ("p/water_cm".to_string(), "12.0".to_string()));
    }
}
