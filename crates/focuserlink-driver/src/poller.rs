//! Telemetry poll tick.
//!
//! One tick is the status query, then the settings query if the settings or
//! compensation-mode group is stale, then the hand-controller query if that
//! group is stale. Failures are logged and swallowed; the next tick retries.
//! The health counters in [`TelemetryHealth`] tell consumers whether the
//! cached values are still fresh.
//!
//! [`TelemetryHealth`]: focuserlink_core::state::TelemetryHealth

use crate::protocol::Command;
use crate::record::{ManualRecord, StatusRecord};
use crate::session::Session;
use crate::settings::read_settings;
use chrono::Utc;
use focuserlink_core::error::FocuserError;
use focuserlink_core::state::PropertyState;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The status query succeeded
    pub status_ok: bool,
    /// The settings record was re-read
    pub settings_refreshed: bool,
    /// The hand-controller flag was re-read
    pub manual_refreshed: bool,
    /// A backlash correction move was sent
    pub correction_sent: bool,
    /// Exchanges that failed during the tick
    pub failures: u32,
}

/// Run one tick against `session`.
///
/// Each step runs regardless of how the previous one went, so a failed status
/// query does not keep stale settings or hand-controller groups from being
/// re-read.
pub(crate) async fn tick(session: &mut Session, acknowledge_moves: bool) -> TickReport {
    let mut report = TickReport::default();
    if !session.is_connected() {
        return report;
    }

    match query_status(session).await {
        Ok(status) => {
            session.telemetry.record_success(Utc::now());
            session.apply_status(&status);
            report.status_ok = true;

            let max = session.state.max_position_steps;
            if let Some(correction) = session
                .motion
                .observe(status.position, status.steps_to_go, max)
            {
                match session.issue_move(&correction, acknowledge_moves).await {
                    Ok(()) => {
                        tracing::info!(target_steps = correction.adjusted, "Backlash correction sent");
                        report.correction_sent = true;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Backlash correction move failed");
                        report.failures += 1;
                    }
                }
            }
            session.refresh_motion_group();
        }
        Err(e) => {
            session.telemetry.record_failure();
            tracing::warn!(
                error = %e,
                consecutive_failures = session.telemetry.consecutive_failures,
                "Status poll failed"
            );
            report.failures += 1;
        }
    }

    if !session.groups.settings.is_fresh() || !session.groups.compensation_mode.is_fresh() {
        match refresh_settings(session).await {
            Ok(()) => report.settings_refreshed = true,
            Err(e) => {
                tracing::warn!(error = %e, "Settings poll failed");
                report.failures += 1;
            }
        }
    }

    if !session.groups.manual_controller.is_fresh() {
        match refresh_manual(session).await {
            Ok(()) => report.manual_refreshed = true,
            Err(e) => {
                tracing::warn!(error = %e, "Hand controller poll failed");
                report.failures += 1;
            }
        }
    }

    report
}

async fn query_status(session: &mut Session) -> Result<StatusRecord, FocuserError> {
    let record = session.link()?.query(&Command::status()).await?;
    Ok(StatusRecord::decode(&record)?)
}

async fn refresh_settings(session: &mut Session) -> Result<(), FocuserError> {
    let settings = read_settings(session.link()?).await?;
    session.apply_settings(&settings);
    Ok(())
}

async fn refresh_manual(session: &mut Session) -> Result<(), FocuserError> {
    let record = session.link()?.query(&Command::read_manual()).await?;
    let manual = ManualRecord::decode(&record)?;
    session.state.manual_controller_enabled = manual.enabled;
    session.groups.manual_controller = PropertyState::Ok;
    Ok(())
}
