//! TOML config file loading, environment overrides, and validation.
//!
//! Every section has defaults, so an empty file describes a working
//! controller with chat disabled.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::state::{Limits, WateringConfig};
use crate::tank::{Band, Bands, Calibration, DEFAULT_LOW_THRESHOLD_PCT};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub pins: PinConfig,
    pub tank: TankConfig,
    pub watering: WateringSection,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub allowed_chat_ids: Vec<i64>,
    pub api_base: String,
    pub poll_timeout_sec: u64,
    pub request_timeout_sec: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chat_ids: Vec::new(),
            api_base: "https://api.telegram.org".into(),
            poll_timeout_sec: 1,
            request_timeout_sec: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".into(),
            port: 1883,
            client_id: "tank-controller".into(),
            topic_prefix: "/aupp/group1".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub reply_timeout_sec: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            reply_timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub trigger: u8,
    pub echo: u8,
    pub pump: u8,
    pub pump_active_low: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            trigger: 27,
            echo: 26,
            pump: 13,
            pump_active_low: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankMode {
    Banded,
    Percentage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    pub mode: TankMode,
    /// `[min_cm, max_cm]`, inclusive.
    pub low: [f32; 2],
    pub mid: [f32; 2],
    pub high: [f32; 2],
    pub empty_cm: f32,
    pub full_cm: f32,
    pub low_threshold_pct: u8,
}

impl Default for TankConfig {
    fn default() -> Self {
        let bands = Bands::default();
        Self {
            mode: TankMode::Banded,
            low: [bands.low.min_cm, bands.low.max_cm],
            mid: [bands.mid.min_cm, bands.mid.max_cm],
            high: [bands.high.min_cm, bands.high.max_cm],
            empty_cm: 20.0,
            full_cm: 4.0,
            low_threshold_pct: DEFAULT_LOW_THRESHOLD_PCT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WateringSection {
    pub interval_sec: u64,
    pub duration_sec: u64,
    pub auto_enabled: bool,
    pub max_interval_sec: u64,
    pub max_duration_sec: u64,
}

impl Default for WateringSection {
    fn default() -> Self {
        Self {
            interval_sec: 3600,
            duration_sec: 5,
            auto_enabled: false,
            max_interval_sec: 7 * 24 * 3600,
            max_duration_sec: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub loop_error_pause_ms: u64,
    pub restart_pause_sec: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 200,
            loop_error_pause_ms: 500,
            restart_pause_sec: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_pins(&mut errors);
        self.validate_tank(&mut errors);
        self.validate_watering(&mut errors);
        self.validate_services(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<u8> = HashSet::new();
        let pins = [
            ("trigger", self.pins.trigger),
            ("echo", self.pins.echo),
            ("pump", self.pins.pump),
        ];
        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins.{name}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("pins.{name}: {pin} is already used by another pin"));
            }
        }
    }

    fn validate_tank(&self, errors: &mut Vec<String>) {
        let t = &self.tank;
        match t.mode {
            TankMode::Banded => {
                let named = [("low", t.low), ("mid", t.mid), ("high", t.high)];
                for (name, [min, max]) in named {
                    if !(min.is_finite() && max.is_finite()) || min < 0.0 {
                        errors.push(format!(
                            "tank.{name}: [{min}, {max}] must be finite and non-negative"
                        ));
                    } else if min > max {
                        errors.push(format!("tank.{name}: min {min} exceeds max {max}"));
                    }
                }
                let bands = [
                    ("low", Band::new(t.low[0], t.low[1])),
                    ("mid", Band::new(t.mid[0], t.mid[1])),
                    ("high", Band::new(t.high[0], t.high[1])),
                ];
                for (i, (a, band_a)) in bands.iter().enumerate() {
                    for (b, band_b) in &bands[i + 1..] {
                        if band_a.overlaps(band_b) {
                            errors.push(format!("tank: {a} and {b} bands overlap"));
                        }
                    }
                }
                // Sensor looks down: high water = short distance.
                if !(t.high[1] < t.mid[0] && t.mid[1] < t.low[0]) {
                    errors.push("tank: bands must run high < mid < low by distance".into());
                }
            }
            TankMode::Percentage => {
                if !(t.empty_cm.is_finite() && t.full_cm.is_finite()) || t.full_cm < 0.0 {
                    errors.push("tank: empty_cm and full_cm must be finite and non-negative".into());
                } else if t.full_cm >= t.empty_cm {
                    errors.push(format!(
                        "tank: full_cm ({}) must be less than empty_cm ({})",
                        t.full_cm, t.empty_cm
                    ));
                }
                if t.low_threshold_pct > 100 {
                    errors.push(format!(
                        "tank: low_threshold_pct {} out of range [0, 100]",
                        t.low_threshold_pct
                    ));
                }
            }
        }
    }

    fn validate_watering(&self, errors: &mut Vec<String>) {
        let w = &self.watering;
        if w.max_interval_sec == 0 {
            errors.push("watering.max_interval_sec must be positive".into());
        }
        if w.max_duration_sec == 0 {
            errors.push("watering.max_duration_sec must be positive".into());
        }
        if w.interval_sec == 0 || w.interval_sec > w.max_interval_sec {
            errors.push(format!(
                "watering.interval_sec {} out of range [1, {}]",
                w.interval_sec, w.max_interval_sec
            ));
        }
        if w.duration_sec == 0 || w.duration_sec > w.max_duration_sec {
            errors.push(format!(
                "watering.duration_sec {} out of range [1, {}]",
                w.duration_sec, w.max_duration_sec
            ));
        }
    }

    fn validate_services(&self, errors: &mut Vec<String>) {
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".into());
        }
        if self.http.bind.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("http.bind '{}' is not a socket address", self.http.bind));
        }
        if self.http.reply_timeout_sec == 0 {
            errors.push("http.reply_timeout_sec must be positive".into());
        }
        if self.timing.tick_ms == 0 {
            errors.push("timing.tick_ms must be positive".into());
        }
        if self.chat_enabled() && self.telegram.allowed_chat_ids.is_empty() {
            errors.push("telegram.allowed_chat_ids is empty but a bot token is set".into());
        }
    }
}

// ---------------------------------------------------------------------------
// Derived runtime values
// ---------------------------------------------------------------------------

impl Config {
    pub fn chat_enabled(&self) -> bool {
        !self.telegram.bot_token.trim().is_empty()
    }

    pub fn calibration(&self) -> Calibration {
        let t = &self.tank;
        match t.mode {
            TankMode::Banded => Calibration::Banded(Bands {
                low: Band::new(t.low[0], t.low[1]),
                mid: Band::new(t.mid[0], t.mid[1]),
                high: Band::new(t.high[0], t.high[1]),
            }),
            TankMode::Percentage => Calibration::Percentage {
                empty_cm: t.empty_cm,
                full_cm: t.full_cm,
                low_threshold_pct: t.low_threshold_pct,
            },
        }
    }

    pub fn watering_config(&self) -> WateringConfig {
        WateringConfig {
            interval_sec: self.watering.interval_sec,
            duration_sec: self.watering.duration_sec,
            auto_enabled: self.watering.auto_enabled,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_interval_sec: self.watering.max_interval_sec,
            max_duration_sec: self.watering.max_duration_sec,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.timing.tick_ms)
    }

    pub fn loop_error_pause(&self) -> Duration {
        Duration::from_millis(self.timing.loop_error_pause_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_secs(self.timing.restart_pause_sec)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.http.reply_timeout_sec)
    }

    /// Apply overrides from an environment lookup.  Unparseable values are
    /// ignored with a warning.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            match port.parse() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable MQTT_PORT"),
            }
        }
        if let Some(bind) = lookup("HTTP_BIND") {
            self.http.bind = bind;
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, apply environment overrides, and validate a TOML config
/// file.  A missing file means all defaults.
pub fn load(path: &str) -> Result<Config> {
    let mut config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(%path, "config file not found, using defaults");
            Config::default()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };
    config.apply_env(|key| env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        chat = config.chat_enabled(),
        allowed_chats = config.telegram.allowed_chat_ids.len(),
        mode = ?config.tank.mode,
        auto = config.watering.auto_enabled,
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    fn percentage_config() -> Config {
        let mut cfg = Config::default();
        cfg.tank.mode = TankMode::Percentage;
        cfg
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.chat_enabled());
        assert_eq!(config.mqtt.host, "broker.hivemq.com");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "/aupp/group1");
        assert_eq!(config.http.bind, "0.0.0.0:8080");
        assert_eq!(config.pins.pump, 13);
        assert_eq!(config.watering.interval_sec, 3600);
        assert_eq!(config.watering.duration_sec, 5);
        assert!(!config.watering.auto_enabled);
        assert_eq!(config.timing.tick_ms, 200);
        assert_eq!(config.calibration(), Calibration::default());
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[telegram]
bot_token = "123:abc"
allowed_chat_ids = [1128192910, -1001]

[mqtt]
host = "10.0.0.5"
topic_prefix = "/farm/tank"

[http]
bind = "127.0.0.1:9000"

[pins]
trigger = 23
echo = 24
pump = 17
pump_active_low = true

[tank]
mode = "percentage"
empty_cm = 30.0
full_cm = 5.0
low_threshold_pct = 20

[watering]
interval_sec = 600
duration_sec = 10
auto_enabled = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert!(config.chat_enabled());
        assert_eq!(config.telegram.allowed_chat_ids, vec![1_128_192_910, -1001]);
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.pins.pump_active_low);
        assert_eq!(
            config.calibration(),
            Calibration::Percentage {
                empty_cm: 30.0,
                full_cm: 5.0,
                low_threshold_pct: 20
            }
        );
        assert_eq!(
            config.watering_config(),
            WateringConfig {
                interval_sec: 600,
                duration_sec: 10,
                auto_enabled: true
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_mode() {
        let res: Result<Config, _> = toml::from_str("[tank]\nmode = \"sonar\"\n");
        assert!(res.is_err());
    }

    // -- Environment overrides --------------------------------------------

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("999:xyz".into()),
            "MQTT_HOST" => Some("localhost".into()),
            "MQTT_PORT" => Some("1884".into()),
            "HTTP_BIND" => Some("127.0.0.1:8081".into()),
            _ => None,
        });
        assert_eq!(cfg.telegram.bot_token, "999:xyz");
        assert_eq!(cfg.mqtt.host, "localhost");
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.http.bind, "127.0.0.1:8081");
    }

    #[test]
    fn env_bad_port_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| (key == "MQTT_PORT").then(|| "eighty".to_string()));
        assert_eq!(cfg.mqtt.port, 1883);
    }

    // -- Pins -------------------------------------------------------------

    #[test]
    fn gpio_pin_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.pins.pump = 1;
        assert_validation_err(&cfg, "pins.pump: 1 is not a valid BCM GPIO pin");
        cfg.pins.pump = 28;
        assert_validation_err(&cfg, "pins.pump: 28 is not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_boundaries_accepted() {
        let mut cfg = Config::default();
        cfg.pins.trigger = 2;
        cfg.pins.pump = 27;
        cfg.validate().unwrap();
    }

    #[test]
    fn duplicate_pins_rejected() {
        let mut cfg = Config::default();
        cfg.pins.echo = cfg.pins.trigger;
        assert_validation_err(&cfg, "already used by another pin");
    }

    // -- Tank -------------------------------------------------------------

    #[test]
    fn overlapping_bands_rejected() {
        let mut cfg = Config::default();
        cfg.tank.mid = [4.0, 7.8];
        assert_validation_err(&cfg, "tank: low and mid bands overlap");
    }

    #[test]
    fn misordered_bands_rejected() {
        let mut cfg = Config::default();
        cfg.tank.low = [2.0, 3.0];
        cfg.tank.high = [7.6, 8.6];
        assert_validation_err(&cfg, "bands must run high < mid < low");
    }

    #[test]
    fn inverted_band_rejected() {
        let mut cfg = Config::default();
        cfg.tank.high = [3.9, 2.0];
        assert_validation_err(&cfg, "tank.high: min 3.9 exceeds max 2");
    }

    #[test]
    fn percentage_full_must_be_below_empty() {
        let mut cfg = percentage_config();
        cfg.tank.full_cm = 25.0;
        assert_validation_err(&cfg, "full_cm (25) must be less than empty_cm (20)");
    }

    #[test]
    fn percentage_ignores_band_values() {
        let mut cfg = percentage_config();
        cfg.tank.mid = [9.0, 1.0];
        cfg.validate().unwrap();
    }

    #[test]
    fn threshold_over_100_rejected() {
        let mut cfg = percentage_config();
        cfg.tank.low_threshold_pct = 101;
        assert_validation_err(&cfg, "low_threshold_pct 101");
    }

    // -- Watering ---------------------------------------------------------

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.watering.interval_sec = 0;
        assert_validation_err(&cfg, "watering.interval_sec 0 out of range");
    }

    #[test]
    fn duration_over_max_rejected() {
        let mut cfg = Config::default();
        cfg.watering.duration_sec = 601;
        assert_validation_err(&cfg, "watering.duration_sec 601 out of range [1, 600]");
    }

    #[test]
    fn limits_follow_config() {
        let cfg = Config::default();
        assert_eq!(
            cfg.limits(),
            Limits {
                max_interval_sec: 604_800,
                max_duration_sec: 600
            }
        );
    }

    // -- Services ---------------------------------------------------------

    #[test]
    fn token_without_allow_list_rejected() {
        let mut cfg = Config::default();
        cfg.telegram.bot_token = "123:abc".into();
        assert_validation_err(&cfg, "allowed_chat_ids is empty");
    }

    #[test]
    fn bad_bind_rejected() {
        let mut cfg = Config::default();
        cfg.http.bind = "localhost".into();
        assert_validation_err(&cfg, "http.bind 'localhost'");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.pins.trigger = 0;
        cfg.watering.duration_sec = 0;
        cfg.mqtt.host = " ".into();
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "{msg}");
        assert!(msg.contains("pins.trigger"), "{msg}");
        assert!(msg.contains("watering.duration_sec"), "{msg}");
        assert!(msg.contains("mqtt.host is empty"), "{msg}");
    }

    // -- Load ---------------------------------------------------------------

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = load("/nonexistent/tank-controller.toml").unwrap();
        assert_eq!(cfg.watering.interval_sec, 3600);
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let path = std::env::temp_dir().join(format!("tank-cfg-{}.toml", std::process::id()));
        std::fs::write(&path, "[watering]\ninterval_sec = \"soon\"\n").unwrap();
        let err = load(path.to_str().unwrap()).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(format!("{err:#}").contains("failed to parse config"), "{err:#}");
    }
}
