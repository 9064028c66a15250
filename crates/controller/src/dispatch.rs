//! Command dispatch for both control channels.
//!
//! Chat text and HTTP paths are parsed into the same [`Command`] set and
//! run against the controller state by [`dispatch`].  Authorization happens
//! here: a chat sender must be allow-listed, HTTP callers are trusted.
//! Mutations queue a broadcast notice; replies are rendered per channel by
//! [`Outcome::reply`].

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::state::{ControllerState, Notice, HELP_TEXT};
use crate::status;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Chat { chat_id: i64 },
    Http { remote_addr: SocketAddr },
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat { chat_id } => write!(f, "chat:{chat_id}"),
            Self::Http { remote_addr } => write!(f, "http:{remote_addr}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Tank,
    /// Raw, unvalidated argument.
    SetWaterInterval(String),
    /// Raw, unvalidated argument.
    SetWaterDuration(String),
    PumpOn,
    PumpOff,
    AutoOn,
    AutoOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Unauthorized sender: no reply, no state change.
    Dropped,
    Help,
    Status(String),
    Tank(String),
    IntervalSet(u64),
    DurationSet(u64),
    InvalidInterval,
    InvalidDuration,
    PumpOn,
    PumpOff,
    AutoOn,
    AutoOff,
}

impl Outcome {
    /// Reply text for the channel that issued the command.
    pub fn reply(&self, source: &CommandSource) -> Option<String> {
        let chat = matches!(source, CommandSource::Chat { .. });
        let text = match self {
            Self::Dropped => return None,
            Self::Help => HELP_TEXT.to_string(),
            Self::Status(text) | Self::Tank(text) => text.clone(),
            Self::IntervalSet(sec) if chat => format!("Interval set to {sec} sec"),
            Self::IntervalSet(_) => "Interval updated".to_string(),
            Self::DurationSet(sec) if chat => format!("Duration set to {sec} sec"),
            Self::DurationSet(_) => "Duration updated".to_string(),
            Self::InvalidInterval if chat => "Usage: /setwater <seconds>".to_string(),
            Self::InvalidInterval => "Invalid interval".to_string(),
            Self::InvalidDuration if chat => "Usage: /setduration <seconds>".to_string(),
            Self::InvalidDuration => "Invalid duration".to_string(),
            Self::PumpOn => "Pump ON".to_string(),
            Self::PumpOff => "Pump OFF".to_string(),
            Self::AutoOn if chat => Notice::AutoEnabled.to_string(),
            Self::AutoOn => "Auto watering ON".to_string(),
            Self::AutoOff if chat => Notice::AutoDisabled.to_string(),
            Self::AutoOff => "Auto watering OFF".to_string(),
        };
        Some(text)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a chat message.  Case-insensitive; accepts Telegram's
/// `/command@botname` form.  Returns `None` for anything unrecognised.
pub fn parse_chat(text: &str) -> Option<Command> {
    let lowered = text.trim().to_lowercase();
    let mut parts = lowered.split_whitespace();
    let head = parts.next()?;
    let head = head.split('@').next().unwrap_or(head);
    let arg = parts.collect::<Vec<_>>().join(" ");

    let cmd = match head {
        "/start" | "/help" => Command::Help,
        "/status" => Command::Status,
        "/tank" => Command::Tank,
        "/setwater" => Command::SetWaterInterval(arg),
        "/setduration" => Command::SetWaterDuration(arg),
        "/pumpon" | "/pump_on" => Command::PumpOn,
        "/pumpoff" | "/pump_off" => Command::PumpOff,
        "/autoon" | "/auto_on" => Command::AutoOn,
        "/autooff" | "/auto_off" => Command::AutoOff,
        _ => return None,
    };
    Some(cmd)
}

/// Digits only, strictly positive, at most `max`.  Rejects signs,
/// whitespace and overflow.
pub fn parse_seconds(raw: &str, max: u64) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = raw.parse().ok()?;
    (1..=max).contains(&value).then_some(value)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(state: &mut ControllerState, source: &CommandSource, command: Command) -> Outcome {
    if let CommandSource::Chat { chat_id } = source {
        if !state.is_allowed(*chat_id) {
            debug!(chat_id, "dropping command from chat outside the allow-list");
            return Outcome::Dropped;
        }
    }

    info!(%source, ?command, "command received");

    match command {
        Command::Help => Outcome::Help,
        Command::Status => Outcome::Status(status::status_text(state)),
        Command::Tank => Outcome::Tank(status::tank_text(state.tank.as_ref())),
        Command::SetWaterInterval(raw) => {
            match parse_seconds(&raw, state.limits.max_interval_sec) {
                Some(sec) => {
                    state.watering.interval_sec = sec;
                    info!(interval_sec = sec, %source, "config: interval updated");
                    state.outbox.push(Notice::IntervalSet(sec));
                    Outcome::IntervalSet(sec)
                }
                None => {
                    warn!(arg = %raw, %source, "config: rejected interval");
                    Outcome::InvalidInterval
                }
            }
        }
        Command::SetWaterDuration(raw) => {
            match parse_seconds(&raw, state.limits.max_duration_sec) {
                Some(sec) => {
                    state.watering.duration_sec = sec;
                    info!(duration_sec = sec, %source, "config: duration updated");
                    state.outbox.push(Notice::DurationSet(sec));
                    Outcome::DurationSet(sec)
                }
                None => {
                    warn!(arg = %raw, %source, "config: rejected duration");
                    Outcome::InvalidDuration
                }
            }
        }
        // Manual override: straight to the actuator, bypassing the policy.
        Command::PumpOn => {
            state.pump.turn_on(&mut state.outbox);
            Outcome::PumpOn
        }
        Command::PumpOff => {
            state.pump.turn_off(&mut state.outbox);
            Outcome::PumpOff
        }
        Command::AutoOn => {
            state.watering.auto_enabled = true;
            info!(%source, "auto: automatic watering ENABLED");
            state.outbox.push(Notice::AutoEnabled);
            Outcome::AutoOn
        }
        Command::AutoOff => {
            state.watering.auto_enabled = false;
            info!(%source, "auto: automatic watering DISABLED");
            state.outbox.push(Notice::AutoDisabled);
            Outcome::AutoOff
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- parse_chat -----------------------------------------------------------

    #[test]
    fn parse_chat_simple_commands() {
        assert_eq!(parse_chat("/status"), Some(Command::Status));
        assert_eq!(parse_chat("/tank"), Some(Command::Tank));
        assert_eq!(parse_chat("/start"), Some(Command::Help));
        assert_eq!(parse_chat("/help"), Some(Command::Help));
        assert_eq!(parse_chat("/pumpon"), Some(Command::PumpOn));
        assert_eq!(parse_chat("/pumpoff"), Some(Command::PumpOff));
    }

    #[test]
    fn parse_chat_auto_aliases() {
        assert_eq!(parse_chat("/autoon"), Some(Command::AutoOn));
        assert_eq!(parse_chat("/auto_on"), Some(Command::AutoOn));
        assert_eq!(parse_chat("/autooff"), Some(Command::AutoOff));
        assert_eq!(parse_chat("/auto_off"), Some(Command::AutoOff));
    }

    #[test]
    fn parse_chat_is_case_insensitive_and_trims() {
        assert_eq!(parse_chat("  /STATUS \n"), Some(Command::Status));
        assert_eq!(
            parse_chat("/SetWater 120"),
            Some(Command::SetWaterInterval("120".into()))
        );
    }

    #[test]
    fn parse_chat_bot_suffix() {
        assert_eq!(parse_chat("/tank@water_bot"), Some(Command::Tank));
    }

    #[test]
    fn parse_chat_keeps_raw_argument() {
        assert_eq!(
            parse_chat("/setduration"),
            Some(Command::SetWaterDuration(String::new()))
        );
        assert_eq!(
            parse_chat("/setduration 5 6"),
            Some(Command::SetWaterDuration("5 6".into()))
        );
    }

    #[test]
    fn parse_chat_unknown() {
        assert_eq!(parse_chat("hello"), None);
        assert_eq!(parse_chat(""), None);
        assert_eq!(parse_chat("/reboot"), None);
    }

    // -- parse_seconds --------------------------------------------------------

    #[test]
    fn parse_seconds_accepts_digits() {
        assert_eq!(parse_seconds("120", 1000), Some(120));
        assert_eq!(parse_seconds("0007", 1000), Some(7));
    }

    #[test]
    fn parse_seconds_rejects_non_digits() {
        for raw in ["", "abc", "-1", "+5", " 5", "5 ", "1.5", "1e3", "٣"] {
            assert_eq!(parse_seconds(raw, 1000), None, "{raw:?} should be rejected");
        }
    }

    #[test]
    fn parse_seconds_rejects_zero_over_max_and_overflow() {
        assert_eq!(parse_seconds("0", 1000), None);
        assert_eq!(parse_seconds("1001", 1000), None);
        assert_eq!(parse_seconds("99999999999999999999999", u64::MAX), None);
    }

    // -- Outcome::reply ---------------------------------------------------------

    #[test]
    fn replies_differ_per_channel() {
        let chat = CommandSource::Chat { chat_id: 1 };
        let http = CommandSource::Http {
            remote_addr: "10.0.0.2:5555".parse().unwrap(),
        };
        assert_eq!(
            Outcome::IntervalSet(120).reply(&chat).as_deref(),
            Some("Interval set to 120 sec")
        );
        assert_eq!(
            Outcome::IntervalSet(120).reply(&http).as_deref(),
            Some("Interval updated")
        );
        assert_eq!(
            Outcome::InvalidDuration.reply(&chat).as_deref(),
            Some("Usage: /setduration <seconds>")
        );
        assert_eq!(
            Outcome::InvalidDuration.reply(&http).as_deref(),
            Some("Invalid duration")
        );
        assert_eq!(Outcome::Dropped.reply(&chat), None);
    }
}
