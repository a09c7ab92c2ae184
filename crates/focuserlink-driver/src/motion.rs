//! Backlash-compensated absolute positioning.
//!
//! The controller is pure state: it plans moves, is told when the device
//! accepted one ([`MotionController::commit`]) and is fed every status poll
//! ([`MotionController::observe`]). The driver does the I/O in between, so
//! nothing here changes unless the device confirmed it.
//!
//! Backlash sequence for a move in the compensated direction:
//!
//! ```text
//! plan(target)            -> R:0:<target + offset>, pending = true
//! poll: steps_to_go == 0  -> pending = false, R:0:<position - offset>
//! poll: steps_to_go == 0  -> Idle
//! ```
//!
//! The move in flight is tagged with its commanded target and whether it is
//! a correction, so the completion of a correction never triggers another
//! one, and a zero steps-to-go report that arrives before the device started
//! moving is not mistaken for completion.

use focuserlink_core::capabilities::{BacklashConfig, FocusDirection};
use focuserlink_core::error::{FocuserError, FocuserResult};
use focuserlink_core::state::{BacklashObligation, MotionState};

/// Zero steps-to-go polls tolerated before an unstarted move is considered done.
pub const MAX_UNSTARTED_POLLS: u32 = 4;

/// Origin of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Requested by a user
    User,
    /// Backlash return trip
    Correction,
}

/// A move ready to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    /// Logical target
    pub target: i64,
    /// Target actually commanded, overshoot included
    pub adjusted: i64,
    /// Whether the overshoot was applied
    pub compensated: bool,
    /// Origin of the move
    pub kind: MoveKind,
}

impl MovePlan {
    /// Commanded target as the wire's unsigned tick count.
    pub fn ticks(&self) -> u32 {
        u32::try_from(self.adjusted).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    target: i64,
    kind: MoveKind,
    motion_seen: bool,
    unstarted_polls: u32,
}

/// Motion state machine with backlash obligation.
#[derive(Debug, Clone, Default)]
pub struct MotionController {
    state: MotionState,
    backlash: BacklashObligation,
    in_flight: Option<InFlight>,
}

impl MotionController {
    /// Controller with restored backlash configuration.
    pub fn new(config: BacklashConfig) -> Self {
        Self {
            state: MotionState::Idle,
            backlash: BacklashObligation {
                enabled: config.enabled,
                signed_steps: config.steps,
                pending: false,
            },
            in_flight: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Backlash configuration and pending flag.
    pub fn backlash(&self) -> BacklashObligation {
        self.backlash
    }

    /// Backlash configuration for persistence.
    pub fn backlash_config(&self) -> BacklashConfig {
        BacklashConfig {
            enabled: self.backlash.enabled,
            steps: self.backlash.signed_steps,
        }
    }

    /// Set the signed overshoot. Takes effect on the next move.
    pub fn set_backlash(&mut self, steps: i64) {
        self.backlash.signed_steps = steps;
    }

    /// Enable or disable compensation. Takes effect on the next move.
    pub fn set_backlash_enabled(&mut self, enabled: bool) {
        self.backlash.enabled = enabled;
    }

    /// Plan a move to `target` from `current` within `0..=max`.
    ///
    /// When compensation is enabled and the travel direction matches the
    /// sign of the overshoot, the commanded target is `target + overshoot`.
    /// Any target, adjusted or not, outside the travel range rejects the
    /// whole move.
    pub fn plan_absolute(&self, target: i64, current: i64, max: i64) -> FocuserResult<MovePlan> {
        if target < 0 || target > max {
            return Err(FocuserError::OutOfRange {
                target,
                adjusted: target,
                max,
            });
        }

        let offset = self.backlash.signed_steps;
        let compensate = self.backlash.enabled && offset != 0 && (target > current) == (offset > 0);
        if !compensate {
            return Ok(MovePlan {
                target,
                adjusted: target,
                compensated: false,
                kind: MoveKind::User,
            });
        }

        let adjusted = target + offset;
        if adjusted < 0 || adjusted > max {
            return Err(FocuserError::OutOfRange {
                target,
                adjusted,
                max,
            });
        }

        Ok(MovePlan {
            target,
            adjusted,
            compensated: true,
            kind: MoveKind::User,
        })
    }

    /// Plan a relative move by resolving it to an absolute target.
    pub fn plan_relative(
        &self,
        direction: FocusDirection,
        steps: i64,
        current: i64,
        max: i64,
    ) -> FocuserResult<MovePlan> {
        let target = match direction {
            FocusDirection::Inward => current - steps,
            FocusDirection::Outward => current + steps,
        };
        self.plan_absolute(target, current, max)
    }

    /// Record that the device accepted `plan`.
    ///
    /// A user move replaces any pending obligation rather than stacking a
    /// second correction.
    pub fn commit(&mut self, plan: &MovePlan) {
        if plan.kind == MoveKind::User {
            self.backlash.pending = plan.compensated;
        }
        self.in_flight = Some(InFlight {
            target: plan.adjusted,
            kind: plan.kind,
            motion_seen: false,
            unstarted_polls: 0,
        });
        self.state = if self.backlash.pending {
            MotionState::MovingWithPendingBacklash
        } else {
            MotionState::Moving
        };
    }

    /// Record that sending a move failed. The move and any obligation tied
    /// to the previous one are dropped.
    pub fn fail(&mut self) {
        self.in_flight = None;
        self.backlash.pending = false;
        self.state = MotionState::Idle;
    }

    /// Abort: back to `Idle`, correction abandoned.
    pub fn abort(&mut self) {
        self.fail();
    }

    /// Feed one status observation. Returns the correction move to send
    /// when a pre-compensated move has just completed.
    ///
    /// `pending` is cleared here, before the correction is even sent, so an
    /// interrupted correction is never retried.
    pub fn observe(&mut self, position: i64, steps_to_go: i64, max: i64) -> Option<MovePlan> {
        if steps_to_go != 0 {
            match self.in_flight.as_mut() {
                Some(flight) => flight.motion_seen = true,
                None => self.state = MotionState::Moving,
            }
            return None;
        }

        let Some(mut flight) = self.in_flight.take() else {
            self.state = MotionState::Idle;
            return None;
        };

        let completed = flight.motion_seen
            || position == flight.target
            || flight.unstarted_polls >= MAX_UNSTARTED_POLLS;
        if !completed {
            flight.unstarted_polls += 1;
            self.in_flight = Some(flight);
            return None;
        }

        if flight.kind == MoveKind::User && self.backlash.pending {
            self.backlash.pending = false;
            let target = position - self.backlash.signed_steps;
            if (0..=max).contains(&target) {
                // stays Moving until the correction is committed or fails
                self.state = MotionState::Moving;
                return Some(MovePlan {
                    target,
                    adjusted: target,
                    compensated: false,
                    kind: MoveKind::Correction,
                });
            }
            tracing::warn!(correction = target, max, "Backlash correction outside travel range, skipped");
        }

        self.state = MotionState::Idle;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(steps: i64) -> MotionController {
        MotionController::new(BacklashConfig {
            enabled: true,
            steps,
        })
    }

    #[test]
    fn test_compensated_move_and_correction() {
        let mut motion = controller(50);

        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        assert_eq!(plan.adjusted, 5050);
        assert!(plan.compensated);
        motion.commit(&plan);
        assert_eq!(motion.state(), MotionState::MovingWithPendingBacklash);
        assert!(motion.backlash().pending);

        assert_eq!(motion.observe(4500, 550, 10000), None);

        let correction = motion.observe(5050, 0, 10000).unwrap();
        assert_eq!(correction.kind, MoveKind::Correction);
        assert_eq!(correction.adjusted, 5000);
        assert!(!motion.backlash().pending);

        motion.commit(&correction);
        assert_eq!(motion.state(), MotionState::Moving);
        assert_eq!(motion.observe(5020, 30, 10000), None);
        assert_eq!(motion.observe(5000, 0, 10000), None);
        assert_eq!(motion.state(), MotionState::Idle);
    }

    #[test]
    fn test_opposite_direction_is_not_compensated() {
        let motion = controller(50);
        let plan = motion.plan_absolute(3000, 4000, 10000).unwrap();
        assert_eq!(plan.adjusted, 3000);
        assert!(!plan.compensated);

        let inward = controller(-50);
        let plan = inward.plan_absolute(3000, 4000, 10000).unwrap();
        assert_eq!(plan.adjusted, 2950);
        assert!(plan.compensated);
    }

    #[test]
    fn test_disabled_backlash_sends_target() {
        let mut motion = controller(50);
        motion.set_backlash_enabled(false);
        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        assert_eq!(plan.adjusted, 5000);
        motion.commit(&plan);
        assert_eq!(motion.state(), MotionState::Moving);
        assert!(!motion.backlash().pending);
    }

    #[test]
    fn test_out_of_range_adjusted_target_is_rejected_not_clamped() {
        let motion = controller(50);
        for target in 9951..=10000 {
            let err = motion.plan_absolute(target, 0, 10000).unwrap_err();
            match err {
                FocuserError::OutOfRange { adjusted, max, .. } => {
                    assert_eq!(adjusted, target + 50);
                    assert_eq!(max, 10000);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(motion.plan_absolute(9950, 0, 10000).is_ok());

        let inward = controller(-50);
        for target in 0..50 {
            assert!(inward.plan_absolute(target, 5000, 10000).is_err());
        }
    }

    #[test]
    fn test_target_outside_travel_is_rejected() {
        let motion = controller(0);
        assert!(motion.plan_absolute(-1, 0, 100).is_err());
        assert!(motion.plan_absolute(101, 0, 100).is_err());
        assert!(motion
            .plan_relative(FocusDirection::Inward, 20, 10, 100)
            .is_err());
    }

    #[test]
    fn test_relative_move_resolves_to_absolute() {
        let motion = controller(0);
        let plan = motion
            .plan_relative(FocusDirection::Outward, 250, 1000, 10000)
            .unwrap();
        assert_eq!(plan.target, 1250);
        let plan = motion
            .plan_relative(FocusDirection::Inward, 250, 1000, 10000)
            .unwrap();
        assert_eq!(plan.target, 750);
    }

    #[test]
    fn test_new_move_replaces_pending_obligation() {
        let mut motion = controller(50);
        let first = motion.plan_absolute(5000, 4000, 10000).unwrap();
        motion.commit(&first);
        assert!(motion.backlash().pending);

        // opposite direction: obligation dropped, not stacked
        let second = motion.plan_absolute(3000, 4500, 10000).unwrap();
        motion.commit(&second);
        assert!(!motion.backlash().pending);
        assert_eq!(motion.observe(3000, 0, 10000), None);
        assert_eq!(motion.state(), MotionState::Idle);
    }

    #[test]
    fn test_at_most_one_correction_for_any_move_sequence() {
        let targets = [5000, 6000, 5500, 7000, 2000, 2100, 9000, 8000];
        for start in 0..targets.len() {
            let mut motion = controller(50);
            let mut position = 4000;
            let mut corrections = 0;
            for &target in targets.iter().cycle().skip(start).take(12) {
                let plan = motion.plan_absolute(target, position, 10000).unwrap();
                motion.commit(&plan);
                position = plan.adjusted;
                let mut next = motion.observe(position, 0, 10000);
                while let Some(correction) = next {
                    corrections += 1;
                    assert!(!motion.backlash().pending);
                    motion.commit(&correction);
                    position = correction.adjusted;
                    next = motion.observe(position, 0, 10000);
                }
                assert_eq!(motion.state(), MotionState::Idle);
            }
            let outward = targets
                .iter()
                .cycle()
                .skip(start)
                .take(12)
                .fold((4000, 0), |(pos, n), &t| (t, n + usize::from(t > pos)));
            assert_eq!(corrections, outward.1);
        }
    }

    #[test]
    fn test_unstarted_move_is_not_completed_early() {
        let mut motion = controller(50);
        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        motion.commit(&plan);

        // device has not started yet: still at the old position
        assert_eq!(motion.observe(4000, 0, 10000), None);
        assert!(motion.backlash().pending);
        assert_eq!(motion.state(), MotionState::MovingWithPendingBacklash);
    }

    #[test]
    fn test_never_started_move_gives_up_after_limit() {
        let mut motion = controller(0);
        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        motion.commit(&plan);
        for _ in 0..MAX_UNSTARTED_POLLS {
            assert_eq!(motion.observe(4000, 0, 10000), None);
            assert_eq!(motion.state(), MotionState::Moving);
        }
        assert_eq!(motion.observe(4000, 0, 10000), None);
        assert_eq!(motion.state(), MotionState::Idle);
    }

    #[test]
    fn test_abort_clears_obligation() {
        let mut motion = controller(50);
        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        motion.commit(&plan);
        motion.abort();
        assert_eq!(motion.state(), MotionState::Idle);
        assert!(!motion.backlash().pending);
        assert_eq!(motion.observe(4700, 0, 10000), None);
    }

    #[test]
    fn test_interrupted_move_still_triggers_single_correction() {
        let mut motion = controller(50);
        let plan = motion.plan_absolute(5000, 4000, 10000).unwrap();
        motion.commit(&plan);
        assert_eq!(motion.observe(4500, 300, 10000), None);

        // stopped short (e.g. hand controller), motion was seen
        let correction = motion.observe(4800, 0, 10000).unwrap();
        assert_eq!(correction.adjusted, 4750);
        motion.commit(&correction);
        assert_eq!(motion.observe(4760, 0, 10000), None);
        assert_eq!(motion.observe(4750, 0, 10000), None);
        assert_eq!(motion.state(), MotionState::Idle);
    }

    #[test]
    fn test_external_motion_is_reported_as_moving() {
        let mut motion = controller(0);
        assert_eq!(motion.observe(100, 20, 1000), None);
        assert_eq!(motion.state(), MotionState::Moving);
        assert_eq!(motion.observe(120, 0, 1000), None);
        assert_eq!(motion.state(), MotionState::Idle);
    }
}
