//! Connected-session state guarded by the driver's session mutex.
//!
//! Holding the session lock is what grants access to the link, so the
//! poller and user commands are serialized for the full duration of their
//! exchanges, multi-step ones included.

use crate::link::{Expect, LineLink};
use crate::motion::{MotionController, MovePlan};
use crate::protocol::Command;
use crate::record::{SettingsRecord, StatusRecord};
use focuserlink_core::capabilities::BacklashConfig;
use focuserlink_core::error::{FocuserError, FocuserResult};
use focuserlink_core::state::{
    EnvironmentReading, FocuserSnapshot, FocuserState, GroupStates, MotionState, PropertyState,
    TelemetryHealth,
};

#[derive(Default)]
pub(crate) struct Session {
    pub(crate) link: Option<LineLink>,
    pub(crate) state: FocuserState,
    pub(crate) environment: EnvironmentReading,
    pub(crate) motion: MotionController,
    pub(crate) groups: GroupStates,
    pub(crate) telemetry: TelemetryHealth,
}

impl Session {
    /// Fresh session around an open link. Every group starts stale.
    pub(crate) fn open(link: LineLink, backlash: BacklashConfig) -> Self {
        Self {
            link: Some(link),
            motion: MotionController::new(backlash),
            ..Default::default()
        }
    }

    pub(crate) fn link(&mut self) -> FocuserResult<&mut LineLink> {
        self.link.as_mut().ok_or(FocuserError::NotConnected)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Drop the link and every cached value, keeping the backlash
    /// configuration for the next session.
    pub(crate) fn reset(&mut self) -> Option<LineLink> {
        let backlash = self.motion.backlash_config();
        let link = self.link.take();
        *self = Self {
            motion: MotionController::new(backlash),
            ..Default::default()
        };
        link
    }

    pub(crate) fn apply_status(&mut self, status: &StatusRecord) {
        self.state.absolute_position_steps = status.position;
        self.state.steps_remaining = status.steps_to_go;
        if let Some(environment) = status.environment {
            self.environment = environment;
        }
        // last reading is kept, but only a non-zero sensor type counts as live
        if let Some(sensor_type) = status.sensor_type {
            self.environment.sensor_present = sensor_type > 0;
        }
        if let Some(delta) = status.compensation_delta {
            self.state.last_compensation_delta_steps = delta;
            self.groups.compensate_now = if delta > 0 {
                PropertyState::Ok
            } else {
                PropertyState::Idle
            };
        }
    }

    pub(crate) fn apply_settings(&mut self, settings: &SettingsRecord) {
        self.state.max_position_steps = settings.max_position;
        self.state.reversed = settings.reversed;
        self.state.step_size_microns = settings.step_size_microns;
        self.state.compensation_steps_per_degree = settings.compensation_steps_per_degree;
        self.state.compensation_threshold_steps = settings.compensation_threshold_steps;
        self.state.compensation_auto_enabled = settings.compensation_auto;
        self.groups.settings = PropertyState::Ok;
        self.groups.compensation_mode = PropertyState::Ok;
    }

    /// Motion group follows the controller: busy until it is idle again.
    pub(crate) fn refresh_motion_group(&mut self) {
        self.groups.motion = match self.motion.state() {
            MotionState::Idle if self.groups.motion == PropertyState::Alert => PropertyState::Alert,
            MotionState::Idle => PropertyState::Ok,
            MotionState::Moving | MotionState::MovingWithPendingBacklash => PropertyState::Busy,
        };
    }

    /// Send a planned move and commit it to the motion controller once the
    /// device accepted it.
    pub(crate) async fn issue_move(&mut self, plan: &MovePlan, acknowledge: bool) -> FocuserResult<()> {
        let command = Command::move_absolute(plan.ticks());
        let expect = if acknowledge {
            Expect::Response
        } else {
            Expect::Nothing
        };

        let link = self.link()?;
        match link.exchange(&command, expect).await {
            Ok(_) => {
                self.motion.commit(plan);
                self.groups.motion = PropertyState::Busy;
                tracing::debug!(
                    requested = plan.target,
                    adjusted = plan.adjusted,
                    kind = ?plan.kind,
                    "Move accepted"
                );
                Ok(())
            }
            Err(e) => {
                self.motion.fail();
                self.groups.motion = PropertyState::Alert;
                Err(e.into())
            }
        }
    }

    pub(crate) fn snapshot(&self) -> FocuserSnapshot {
        FocuserSnapshot {
            state: self.state.clone(),
            position_mm: self.state.position_mm(),
            environment: self.environment,
            backlash: self.motion.backlash(),
            motion: self.motion.state(),
            groups: self.groups,
            telemetry: self.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn test_status_without_sensor_keeps_environment() {
        let mut session = Session::default();
        session.environment.temperature_c = 4.5;
        let status = StatusRecord::decode(&Record::parse("q:100:0:0:0:0:0:0:0")).unwrap();
        session.apply_status(&status);
        assert_eq!(session.state.absolute_position_steps, 100);
        assert_eq!(session.environment.temperature_c, 4.5);
        assert_eq!(session.groups.compensate_now, PropertyState::Idle);
    }

    #[test]
    fn test_sensor_unplugged_clears_presence() {
        let mut session = Session::default();
        let live = StatusRecord::decode(&Record::parse("q:1234:0:1.47:1:2.12:45.1:-12.81:1")).unwrap();
        session.apply_status(&live);
        assert!(session.environment.sensor_present);
        assert_eq!(session.environment.humidity_pct, 45.1);

        let gone = StatusRecord::decode(&Record::parse("q:1234:0:1.47:0:0:0:0:1")).unwrap();
        session.apply_status(&gone);
        assert!(!session.environment.sensor_present);
        assert_eq!(session.environment.humidity_pct, 45.1);

        let short = StatusRecord::decode(&Record::parse("q:1234:0")).unwrap();
        session.environment.sensor_present = true;
        session.apply_status(&short);
        assert!(session.environment.sensor_present);
    }

    #[test]
    fn test_positive_compensation_delta_marks_compensate_now_ok() {
        let mut session = Session::default();
        let status = StatusRecord::decode(&Record::parse("q:1:0:0:0:0:0:0:7")).unwrap();
        session.apply_status(&status);
        assert_eq!(session.state.last_compensation_delta_steps, 7);
        assert_eq!(session.groups.compensate_now, PropertyState::Ok);
    }

    #[test]
    fn test_reset_keeps_backlash_configuration() {
        let mut session = Session::default();
        session.motion.set_backlash(40);
        session.motion.set_backlash_enabled(true);
        session.state.absolute_position_steps = 900;
        session.groups.settings = PropertyState::Ok;

        assert!(session.reset().is_none());
        assert_eq!(session.state, FocuserState::default());
        assert_eq!(session.groups, GroupStates::default());
        assert_eq!(
            session.motion.backlash_config(),
            BacklashConfig {
                enabled: true,
                steps: 40
            }
        );
    }

    #[test]
    fn test_link_required() {
        let mut session = Session::default();
        assert!(matches!(session.link(), Err(FocuserError::NotConnected)));
    }
}
