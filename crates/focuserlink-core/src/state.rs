//! Cached logical state of a connected focuser.
//!
//! All of this is created when the handshake succeeds, refreshed by every
//! poll tick and discarded at disconnect. The device, not the driver, is
//! authoritative: nothing here survives a reconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical focuser state, mutated only by successful protocol exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocuserState {
    /// Current absolute position in motor steps
    pub absolute_position_steps: i64,
    /// Steps left in the motion in progress
    pub steps_remaining: i64,
    /// Upper travel limit in steps
    pub max_position_steps: i64,
    /// Motor direction reversed
    pub reversed: bool,
    /// Step size in micrometres
    pub step_size_microns: f64,
    /// Temperature compensation rate in steps per °C
    pub compensation_steps_per_degree: f64,
    /// Temperature compensation trigger threshold in steps
    pub compensation_threshold_steps: i64,
    /// Device applies temperature compensation on its own
    pub compensation_auto_enabled: bool,
    /// Hand controller enabled
    pub manual_controller_enabled: bool,
    /// Last compensation delta reported by the device
    pub last_compensation_delta_steps: i64,
}

impl FocuserState {
    /// Position in millimetres derived from the step count and step size.
    pub fn position_mm(&self) -> f64 {
        self.absolute_position_steps as f64 * self.step_size_microns / 1000.0
    }
}

/// Pending backlash "return trip".
///
/// `pending` is set when a move is issued with pre-compensation and cleared
/// when the correction is issued, so at most one correction is outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklashObligation {
    /// Backlash compensation active for new moves
    pub enabled: bool,
    /// Signed overshoot in steps; its sign selects the compensated direction
    pub signed_steps: i64,
    /// A correction move is owed once the current move completes
    pub pending: bool,
}

/// Environmental sensor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    /// Air temperature in °C
    pub temperature_c: f64,
    /// Relative humidity in %
    pub humidity_pct: f64,
    /// Dew point in °C
    pub dew_point_c: f64,
    /// The status record reported a connected sensor
    pub sensor_present: bool,
}

/// Motion state machine position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    /// No move outstanding
    #[default]
    Idle,
    /// A move (user or corrective) is in progress
    Moving,
    /// A pre-compensated move is in progress and a correction is owed
    MovingWithPendingBacklash,
}

/// Status of a user-facing property group.
///
/// For settings-like groups anything other than `Ok` means the cached values
/// are not confirmed by the device and the poller re-reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyState {
    /// Nothing requested yet
    #[default]
    Idle,
    /// Confirmed by the device
    Ok,
    /// Written or moving, confirmation pending
    Busy,
    /// Last request failed
    Alert,
}

impl PropertyState {
    /// Whether the cached values are confirmed by the device.
    pub fn is_fresh(self) -> bool {
        self == PropertyState::Ok
    }
}

/// States of each property group exposed to users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStates {
    /// Absolute/relative position
    pub motion: PropertyState,
    /// Step size, compensation rate/threshold, max position, reverse
    pub settings: PropertyState,
    /// Auto/manual compensation mode
    pub compensation_mode: PropertyState,
    /// Hand controller on/off
    pub manual_controller: PropertyState,
    /// Compensate-now trigger
    pub compensate_now: PropertyState,
}

/// Poll health, so consumers can tell fresh telemetry from cached telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryHealth {
    /// Time of the last successful status query
    pub last_success: Option<DateTime<Utc>>,
    /// Status queries failed since the last success
    pub consecutive_failures: u32,
}

impl TelemetryHealth {
    /// Record a successful status query at `now`.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
    }

    /// Record a failed status query.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Whether the last successful status is younger than `max_age`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_success {
            Some(at) => now - at <= max_age,
            None => false,
        }
    }
}

/// Everything the driver publishes after a poll tick or command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocuserSnapshot {
    /// Logical focuser state
    pub state: FocuserState,
    /// Position in millimetres
    pub position_mm: f64,
    /// Environmental sensor reading
    pub environment: EnvironmentReading,
    /// Backlash configuration and pending correction
    pub backlash: BacklashObligation,
    /// Motion state machine
    pub motion: MotionState,
    /// Per-group property states
    pub groups: GroupStates,
    /// Poll health
    pub telemetry: TelemetryHealth,
}
