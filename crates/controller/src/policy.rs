//! Auto-watering policy: decides once per tick whether to start a watering
//! cycle or to stop the pump because the tank is low.
//!
//! ## State machine
//!
//! ```text
//! Idle ──[auto on, supply sufficient, interval elapsed]──▶ Cycling
//!  ▲                                                          │
//!  └─────────────────────[duration_sec elapsed]───────────────┘
//!
//! any ──[auto on, supply LOW]──▶ Idle  (pump forced off + low-tank alert)
//! ```
//!
//! `Cycling` is not a stored state: the cycle holds the control loop for
//! its whole duration (see [`hold`]), so no other tick step can observe it.
//! An UNKNOWN supply never touches the pump; a manual `pumpon` stays in
//! effect until a confirmed-low reading or a manual `pumpoff`.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::state::{ControllerState, Notice, WateringClock, WateringConfig};
use crate::tank::Supply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Auto-watering is off; the pump is left alone.
    Disabled,
    /// Tank confirmed low: stop the pump and alert.
    ForceOff,
    /// Sensor gave nothing trustworthy: do not water, do not stop.
    SkipUnknown,
    /// Interval not yet elapsed.
    Wait { remaining_sec: i64 },
    StartCycle,
}

/// Pure decision for one tick.
pub fn decide(
    supply: Supply,
    watering: &WateringConfig,
    clock: &WateringClock,
    now: i64,
) -> Decision {
    if !watering.auto_enabled {
        return Decision::Disabled;
    }
    match supply {
        Supply::Low => Decision::ForceOff,
        Supply::Unknown => Decision::SkipUnknown,
        Supply::Sufficient => {
            let elapsed = now.saturating_sub(clock.last_cycle_epoch);
            let interval = i64::try_from(watering.interval_sec).unwrap_or(i64::MAX);
            if elapsed >= interval {
                Decision::StartCycle
            } else {
                Decision::Wait {
                    remaining_sec: interval - elapsed,
                }
            }
        }
    }
}

/// Apply the non-blocking part of this tick's decision.  Returns the hold
/// duration when a cycle was started; the caller must then [`hold`] and
/// [`finish_cycle`].
pub fn begin(state: &mut ControllerState, supply: Supply, now: i64) -> Option<Duration> {
    if supply != Supply::Low {
        state.low_alert_sent = false;
    }
    match decide(supply, &state.watering, &state.clock, now) {
        Decision::Disabled => None,
        Decision::ForceOff => {
            warn!("auto: tank LOW, watering stopped");
            state.pump.turn_off(&mut state.outbox);
            // One alert per low episode, not one per tick.
            if !state.low_alert_sent {
                state.outbox.push(Notice::TankLow);
                state.low_alert_sent = true;
            }
            None
        }
        Decision::SkipUnknown => {
            debug!("auto: tank UNKNOWN, skipping watering");
            None
        }
        Decision::Wait { remaining_sec } => {
            debug!(remaining_sec, "auto: interval not elapsed");
            None
        }
        Decision::StartCycle => {
            info!(
                duration_sec = state.watering.duration_sec,
                "auto: watering cycle started"
            );
            state.pump.turn_on(&mut state.outbox);
            Some(Duration::from_secs(state.watering.duration_sec))
        }
    }
}

/// Hold the pump on for the cycle.  This deliberately blocks the control
/// loop: no commands, HTTP requests or sensor updates are serviced until it
/// returns, and nothing can cancel it.
pub async fn hold(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// End a cycle started at `started_at`.
pub fn finish_cycle(state: &mut ControllerState, started_at: i64) {
    state.pump.turn_off(&mut state.outbox);
    state.clock.last_cycle_epoch = started_at;
    info!(last_cycle_epoch = started_at, "auto: watering cycle complete");
}

// ===========================================================================
// Tests
// ===========================================================================
