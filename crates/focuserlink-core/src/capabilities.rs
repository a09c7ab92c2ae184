//! Capability traits at the seams between the driver and its host.
//!
//! The driver never inherits from a device framework. It depends on three
//! narrow collaborators and exposes one capability:
//!
//! - [`ConnectionProvider`]: hands out a byte-stream session
//! - [`ConfigStore`]: persists/restores locally owned configuration (backlash)
//! - [`Focuser`]: what a host can ask of a connected focuser
//!
//! Publication of logical state happens through the driver's broadcast
//! subscription rather than a trait.

use crate::error::FocuserResult;
use crate::serial::DynSerial;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Direction of a relative move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusDirection {
    /// Towards position 0
    Inward,
    /// Towards the maximum position
    Outward,
}

/// Temperature compensation mode stored in the settings record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationMode {
    /// Device compensates on its own
    Auto,
    /// Compensation only on request
    Manual,
}

/// Focuser settings group written in one settings-record patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocuserSettings {
    /// Step size in micrometres
    pub step_size_microns: f64,
    /// Compensation rate in steps per °C
    pub compensation_steps_per_degree: f64,
    /// Compensation trigger threshold in steps
    pub compensation_threshold_steps: i64,
}

/// Backlash configuration owned by the driver rather than the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklashConfig {
    /// Compensation active
    pub enabled: bool,
    /// Signed overshoot in steps
    pub steps: i64,
}

/// Provides the byte-stream session for one connection.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open the stream. Called once per connect.
    async fn open(&self) -> anyhow::Result<DynSerial>;

    /// Human-readable description for logs (e.g. the device path).
    fn describe(&self) -> String;
}

/// Persists the configuration the driver owns locally.
pub trait ConfigStore: Send + Sync {
    /// Load the saved backlash configuration, if any.
    fn load_backlash(&self) -> anyhow::Result<Option<BacklashConfig>>;

    /// Save the backlash configuration.
    fn save_backlash(&self, config: &BacklashConfig) -> anyhow::Result<()>;
}

/// Focuser control capability.
///
/// Every method drives at most a few strictly sequential exchanges and
/// returns once the device has answered (or the read budget has elapsed).
/// Motion completion is observed by polling, not by these calls.
#[async_trait]
pub trait Focuser: Send + Sync {
    /// Move to an absolute position in steps.
    async fn move_absolute(&self, target: i64) -> FocuserResult<()>;

    /// Move by `steps` in `direction`.
    async fn move_relative(&self, direction: FocusDirection, steps: i64) -> FocuserResult<()>;

    /// Stop motion and abandon any pending backlash correction.
    async fn abort(&self) -> FocuserResult<()>;

    /// Redefine the current position without moving.
    async fn sync(&self, ticks: i64) -> FocuserResult<()>;

    /// Set the maximum position (persisted on the device).
    async fn set_max_position(&self, ticks: i64) -> FocuserResult<()>;

    /// Reverse the motor direction (persisted on the device).
    async fn set_reversed(&self, reversed: bool) -> FocuserResult<()>;

    /// Set the signed backlash overshoot used by the next moves.
    async fn set_backlash(&self, steps: i64) -> FocuserResult<()>;

    /// Enable or disable backlash compensation for the next moves.
    async fn set_backlash_enabled(&self, enabled: bool) -> FocuserResult<()>;
}
