//! FocuserLink session driver.
//!
//! [`FocuserLinkDriver`] owns one connected session: the line link, the cached
//! logical state, the motion controller and the poll task. It is cheap to
//! clone; clones share the session.
//!
//! The poll task starts with the session unless
//! [`DriverOptions::poll_on_connect`] is off. It only holds a weak reference
//! to the session: once every driver handle is dropped the link is closed and
//! the task ends on its next tick.
//!
//! # Example
//!
//! ```rust,ignore
//! let driver = FocuserLinkDriver::connect(&provider, DriverOptions::default(), None).await?;
//! driver.poll_once().await?;
//! driver.move_absolute(5000).await?;
//!
//! let mut rx = driver.subscribe();
//! while let Ok(snapshot) = rx.recv().await {
//!     println!("{}", snapshot.state.absolute_position_steps);
//! }
//! ```

use crate::link::LineLink;
use crate::poller::{self, TickReport};
use crate::protocol::{
    Command, Verb, COMPENSATION_CYCLE_SECS, HANDSHAKE_SIGNATURE, POLL_INTERVAL, RESPONSE_TIMEOUT,
};
use crate::record::{encode_flag, encode_hundredths, SettingsField};
use crate::session::Session;
use crate::settings::{self, SettingsPatch};
use async_trait::async_trait;
use focuserlink_core::capabilities::{
    BacklashConfig, CompensationMode, ConfigStore, ConnectionProvider, FocusDirection, Focuser,
    FocuserSettings,
};
use focuserlink_core::error::{FocuserError, FocuserResult};
use focuserlink_core::state::{
    FocuserSnapshot, FocuserState, GroupStates, MotionState, PropertyState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

/// Link and poll parameters for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Read budget for one response
    pub response_timeout: Duration,
    /// Window for discarding stale input around an exchange, in ms
    pub drain_ms: u64,
    /// Poll cadence
    pub poll_interval: Duration,
    /// Wait for the device to echo move commands
    pub move_ack: bool,
    /// Start the poll task as soon as the handshake succeeds
    pub poll_on_connect: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            drain_ms: LineLink::DEFAULT_DRAIN_MS,
            poll_interval: POLL_INTERVAL,
            move_ack: true,
            poll_on_connect: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SettingsGroup {
    Focuser,
    CompensationMode,
}

impl SettingsGroup {
    fn select(self, groups: &mut GroupStates) -> &mut PropertyState {
        match self {
            SettingsGroup::Focuser => &mut groups.settings,
            SettingsGroup::CompensationMode => &mut groups.compensation_mode,
        }
    }
}

async fn tick_and_publish(
    session: &Mutex<Session>,
    state_tx: &broadcast::Sender<FocuserSnapshot>,
    move_ack: bool,
) -> FocuserResult<TickReport> {
    let mut session = session.lock().await;
    if !session.is_connected() {
        return Err(FocuserError::NotConnected);
    }
    let report = poller::tick(&mut session, move_ack).await;
    // no subscribers is fine
    state_tx.send(session.snapshot()).ok();
    Ok(report)
}

/// Driver for one FocuserLink focuser.
#[derive(Clone)]
pub struct FocuserLinkDriver {
    session: Arc<Mutex<Session>>,
    options: DriverOptions,
    store: Option<Arc<dyn ConfigStore>>,
    state_tx: broadcast::Sender<FocuserSnapshot>,
    poll_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
    description: String,
}

impl FocuserLinkDriver {
    /// Open the stream, verify the handshake, restore the backlash
    /// configuration and start polling. Cached state starts empty with every
    /// group stale; the first poll fills it from the device.
    #[instrument(skip_all, fields(device = %provider.describe()), err)]
    pub async fn connect(
        provider: &dyn ConnectionProvider,
        options: DriverOptions,
        store: Option<Arc<dyn ConfigStore>>,
    ) -> FocuserResult<Self> {
        let description = provider.describe();
        let port = provider
            .open()
            .await
            .map_err(|e| FocuserError::Connection(format!("{}: {:#}", description, e)))?;
        let mut link = LineLink::with_timeouts(port, options.response_timeout, options.drain_ms);

        // the port is dropped with `link` on every early return
        let answer = link.query(&Command::handshake()).await?.render();
        if !answer.starts_with(HANDSHAKE_SIGNATURE) {
            return Err(FocuserError::UnrecognizedDevice(answer));
        }

        let backlash = match store.as_ref().map(|s| s.load_backlash()).transpose() {
            Ok(saved) => saved.flatten().unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore backlash configuration, using defaults");
                BacklashConfig::default()
            }
        };

        let (state_tx, _) = broadcast::channel(16);
        tracing::info!(device = %description, ?backlash, "FocuserLink connected");

        let driver = Self {
            session: Arc::new(Mutex::new(Session::open(link, backlash))),
            options,
            store,
            state_tx,
            poll_task: Arc::new(parking_lot::Mutex::new(None)),
            description,
        };
        if driver.options.poll_on_connect {
            driver.start_polling();
        }
        Ok(driver)
    }

    /// Options the session was opened with.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Subscribe to snapshots published after every poll tick and command.
    pub fn subscribe(&self) -> broadcast::Receiver<FocuserSnapshot> {
        self.state_tx.subscribe()
    }

    /// Current cached snapshot.
    pub async fn snapshot(&self) -> FocuserSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Whether the session still holds the link.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_connected()
    }

    fn publish(&self, session: &Session) {
        // no subscribers is fine
        self.state_tx.send(session.snapshot()).ok();
    }

    /// Run one poll tick and publish the result.
    pub async fn poll_once(&self) -> FocuserResult<TickReport> {
        tick_and_publish(&self.session, &self.state_tx, self.options.move_ack).await
    }

    /// Spawn the fixed-cadence poll task. Does nothing if it already runs.
    pub fn start_polling(&self) {
        let mut slot = self.poll_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let session = Arc::downgrade(&self.session);
        let state_tx = self.state_tx.clone();
        let move_ack = self.options.move_ack;
        let interval = self.options.poll_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = session.upgrade() else {
                    tracing::debug!("Driver dropped, poll task stopping");
                    break;
                };
                if let Err(e) = tick_and_publish(&shared, &state_tx, move_ack).await {
                    tracing::debug!(error = %e, "Poll task stopping");
                    break;
                }
            }
        }));
        tracing::debug!(?interval, "Polling started");
    }

    /// Whether the poll task is running.
    pub fn is_polling(&self) -> bool {
        self.poll_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the poll task.
    pub fn stop_polling(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
            tracing::debug!("Polling stopped");
        }
    }

    /// Stop polling, release the stream and discard all cached state.
    #[instrument(skip(self), fields(device = %self.description))]
    pub async fn disconnect(&self) {
        self.stop_polling();
        let mut session = self.session.lock().await;
        if session.reset().is_some() {
            tracing::info!("FocuserLink disconnected");
        }
        self.publish(&session);
    }

    /// Move to an absolute position in steps, applying backlash
    /// pre-compensation when the travel direction calls for it.
    #[instrument(skip(self), err)]
    pub async fn move_absolute(&self, target: i64) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        session.link()?;
        let current = session.state.absolute_position_steps;
        let max = session.state.max_position_steps;

        let plan = match session.motion.plan_absolute(target, current, max) {
            Ok(plan) => plan,
            Err(e) => {
                session.groups.motion = PropertyState::Alert;
                self.publish(&session);
                return Err(e);
            }
        };

        let result = session.issue_move(&plan, self.options.move_ack).await;
        self.publish(&session);
        result
    }

    /// Move by `steps` inward or outward.
    #[instrument(skip(self), err)]
    pub async fn move_relative(&self, direction: FocusDirection, steps: i64) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        session.link()?;
        let current = session.state.absolute_position_steps;
        let max = session.state.max_position_steps;

        let plan = match session.motion.plan_relative(direction, steps, current, max) {
            Ok(plan) => plan,
            Err(e) => {
                session.groups.motion = PropertyState::Alert;
                self.publish(&session);
                return Err(e);
            }
        };

        let result = session.issue_move(&plan, self.options.move_ack).await;
        self.publish(&session);
        result
    }

    /// Wait until the motion controller is idle again, backlash correction
    /// included, and return the settled snapshot. Starts the poll task if it
    /// is not running; completion is only ever observed through polling.
    #[instrument(skip(self), err)]
    pub async fn wait_until_settled(&self, limit: Duration) -> FocuserResult<FocuserSnapshot> {
        self.start_polling();
        // subscribed before the first check so no tick is missed
        let mut rx = self.subscribe();
        let settled = async {
            loop {
                {
                    let session = self.session.lock().await;
                    if !session.is_connected() {
                        return Err(FocuserError::NotConnected);
                    }
                    if session.motion.state() == MotionState::Idle {
                        return Ok(session.snapshot());
                    }
                }
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Err(FocuserError::NotConnected),
                }
            }
        };
        tokio::time::timeout(limit, settled)
            .await
            .map_err(|_| FocuserError::NotSettled(limit))?
    }

    /// Stop motion. The motion controller returns to idle and any pending
    /// backlash correction is abandoned even if the device did not answer.
    #[instrument(skip(self), err)]
    pub async fn abort(&self) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        let result = match session.link() {
            Ok(link) => link.query(&Command::abort()).await.map(|_| ()).map_err(FocuserError::from),
            Err(e) => Err(e),
        };
        session.motion.abort();
        session.groups.motion = if result.is_ok() {
            PropertyState::Ok
        } else {
            PropertyState::Alert
        };
        self.publish(&session);
        result
    }

    /// Redefine the current position as `ticks` without moving.
    #[instrument(skip(self), err)]
    pub async fn sync(&self, ticks: i64) -> FocuserResult<()> {
        let wire = u32::try_from(ticks).map_err(|_| {
            FocuserError::Config(format!("sync position {} is not a valid tick count", ticks))
        })?;
        let mut session = self.session.lock().await;
        session.link()?.query(&Command::sync(wire)).await?;
        session.state.absolute_position_steps = ticks;
        self.publish(&session);
        Ok(())
    }

    /// Set the signed backlash overshoot for the next moves.
    #[instrument(skip(self), err)]
    pub async fn set_backlash(&self, steps: i64) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        session.motion.set_backlash(steps);
        let config = session.motion.backlash_config();
        self.publish(&session);
        drop(session);
        self.save_backlash(&config)
    }

    /// Enable or disable backlash compensation for the next moves.
    #[instrument(skip(self), err)]
    pub async fn set_backlash_enabled(&self, enabled: bool) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        session.motion.set_backlash_enabled(enabled);
        let config = session.motion.backlash_config();
        self.publish(&session);
        drop(session);
        self.save_backlash(&config)
    }

    fn save_backlash(&self, config: &BacklashConfig) -> FocuserResult<()> {
        match &self.store {
            Some(store) => store
                .save_backlash(config)
                .map_err(|e| FocuserError::Store(format!("{:#}", e))),
            None => Ok(()),
        }
    }

    /// Set the maximum travel in steps.
    #[instrument(skip(self), err)]
    pub async fn set_max_position(&self, ticks: i64) -> FocuserResult<()> {
        if ticks < 0 {
            return Err(FocuserError::Config(format!("max position {} is negative", ticks)));
        }
        let edits = SettingsPatch::new().set(SettingsField::MaxPosition, ticks.to_string());
        self.write_settings(SettingsGroup::Focuser, edits, |state| {
            state.max_position_steps = ticks;
        })
        .await
    }

    /// Reverse the motor direction.
    #[instrument(skip(self), err)]
    pub async fn set_reversed(&self, reversed: bool) -> FocuserResult<()> {
        let edits = SettingsPatch::new().set(SettingsField::Reversed, encode_flag(reversed));
        self.write_settings(SettingsGroup::Focuser, edits, |state| {
            state.reversed = reversed;
        })
        .await
    }

    /// Write step size, compensation rate and trigger threshold in one
    /// settings patch. The compensation cycle is always written as 30 s.
    #[instrument(skip(self), err)]
    pub async fn set_focuser_settings(&self, settings: FocuserSettings) -> FocuserResult<()> {
        let edits = SettingsPatch::new()
            .set(SettingsField::StepSize, encode_hundredths(settings.step_size_microns))
            .set(
                SettingsField::CompensationStep,
                encode_hundredths(settings.compensation_steps_per_degree),
            )
            .set(SettingsField::CompensationCycle, COMPENSATION_CYCLE_SECS.to_string())
            .set(
                SettingsField::CompensationTrigger,
                settings.compensation_threshold_steps.to_string(),
            );
        self.write_settings(SettingsGroup::Focuser, edits, |state| {
            state.step_size_microns = settings.step_size_microns;
            state.compensation_steps_per_degree = settings.compensation_steps_per_degree;
            state.compensation_threshold_steps = settings.compensation_threshold_steps;
        })
        .await
    }

    /// Select automatic or on-request temperature compensation.
    #[instrument(skip(self), err)]
    pub async fn set_compensation_mode(&self, mode: CompensationMode) -> FocuserResult<()> {
        let auto = mode == CompensationMode::Auto;
        let edits = SettingsPatch::new().set(SettingsField::CompensationAuto, encode_flag(auto));
        self.write_settings(SettingsGroup::CompensationMode, edits, |state| {
            state.compensation_auto_enabled = auto;
        })
        .await
    }

    /// Patch the settings record and, only once the write is echoed, apply
    /// the change to the cached state. The group is re-read next tick.
    async fn write_settings<F>(
        &self,
        group: SettingsGroup,
        edits: SettingsPatch,
        apply: F,
    ) -> FocuserResult<()>
    where
        F: FnOnce(&mut FocuserState) + Send,
    {
        let mut session = self.session.lock().await;
        let link = session.link()?;
        let result = settings::patch(link, Verb::ReadSettings, Verb::WriteSettings, &edits).await;

        match result {
            Ok(()) => {
                apply(&mut session.state);
                *group.select(&mut session.groups) = PropertyState::Busy;
            }
            Err(_) => *group.select(&mut session.groups) = PropertyState::Alert,
        }
        self.publish(&session);
        result.map_err(FocuserError::from)
    }

    /// Enable or disable the hand controller.
    #[instrument(skip(self), err)]
    pub async fn set_manual_controller(&self, enabled: bool) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        let result = session.link()?.query(&Command::set_manual(enabled)).await;
        session.groups.manual_controller = if result.is_ok() {
            PropertyState::Busy
        } else {
            PropertyState::Alert
        };
        self.publish(&session);
        result.map(|_| ()).map_err(FocuserError::from)
    }

    /// Ask the device to apply temperature compensation now, using the
    /// cached trigger threshold.
    #[instrument(skip(self), err)]
    pub async fn compensate_now(&self) -> FocuserResult<()> {
        let mut session = self.session.lock().await;
        let threshold = session.state.compensation_threshold_steps;
        let threshold = u16::try_from(threshold).map_err(|_| {
            FocuserError::Config(format!("compensation threshold {} out of range", threshold))
        })?;

        let result = session.link()?.query(&Command::compensate_now(threshold)).await;
        session.groups.compensate_now = if result.is_ok() {
            PropertyState::Busy
        } else {
            PropertyState::Alert
        };
        self.publish(&session);
        result.map(|_| ()).map_err(FocuserError::from)
    }
}

#[async_trait]
impl Focuser for FocuserLinkDriver {
    async fn move_absolute(&self, target: i64) -> FocuserResult<()> {
        FocuserLinkDriver::move_absolute(self, target).await
    }

    async fn move_relative(&self, direction: FocusDirection, steps: i64) -> FocuserResult<()> {
        FocuserLinkDriver::move_relative(self, direction, steps).await
    }

    async fn abort(&self) -> FocuserResult<()> {
        FocuserLinkDriver::abort(self).await
    }

    async fn sync(&self, ticks: i64) -> FocuserResult<()> {
        FocuserLinkDriver::sync(self, ticks).await
    }

    async fn set_max_position(&self, ticks: i64) -> FocuserResult<()> {
        FocuserLinkDriver::set_max_position(self, ticks).await
    }

    async fn set_reversed(&self, reversed: bool) -> FocuserResult<()> {
        FocuserLinkDriver::set_reversed(self, reversed).await
    }

    async fn set_backlash(&self, steps: i64) -> FocuserResult<()> {
        FocuserLinkDriver::set_backlash(self, steps).await
    }

    async fn set_backlash_enabled(&self, enabled: bool) -> FocuserResult<()> {
        FocuserLinkDriver::set_backlash_enabled(self, enabled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::{self, MockConnection, MockDeviceHarness};
    use focuserlink_core::state::MotionState;

    fn test_options() -> DriverOptions {
        DriverOptions {
            response_timeout: Duration::from_millis(150),
            drain_ms: 1,
            poll_interval: Duration::from_millis(20),
            move_ack: true,
            poll_on_connect: false,
        }
    }

    async fn connected(backlash_steps: i64) -> (FocuserLinkDriver, MockDeviceHarness) {
        let (port, mut device) = mock_serial::new();
        let provider = MockConnection::new(port);
        let script = tokio::spawn(async move {
            device.exchange("#", "#:FocuserLink").await;
            device.exchange("q", "q:4000:0").await;
            device.exchange("u", "u:0:0:0:10000:0:500:125:30:10:0").await;
            device.exchange("f", "f:0").await;
            device
        });

        let driver = FocuserLinkDriver::connect(&provider, test_options(), None)
            .await
            .unwrap();
        driver.poll_once().await.unwrap();
        if backlash_steps != 0 {
            driver.set_backlash(backlash_steps).await.unwrap();
            driver.set_backlash_enabled(true).await.unwrap();
        }
        (driver, script.await.unwrap())
    }

    #[tokio::test]
    async fn test_out_of_range_move_sends_nothing() {
        let (driver, mut device) = connected(50).await;
        let err = driver.move_absolute(9990).await.unwrap_err();
        assert!(matches!(
            err,
            FocuserError::OutOfRange {
                target: 9990,
                adjusted: 10040,
                max: 10000
            }
        ));
        assert!(device.is_quiet(Duration::from_millis(30)).await);
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.groups.motion, PropertyState::Alert);
        assert_eq!(snapshot.motion, MotionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_move_stays_idle() {
        let (driver, mut device) = connected(50).await;
        let script = tokio::spawn(async move {
            device.exchange("R:0:5050", "q:").await;
            device
        });
        assert!(driver.move_absolute(5000).await.is_err());
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.motion, MotionState::Idle);
        assert!(!snapshot.backlash.pending);
        assert_eq!(snapshot.groups.motion, PropertyState::Alert);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_clears_pending_even_without_answer() {
        let (driver, mut device) = connected(50).await;
        let script = tokio::spawn(async move {
            device.exchange("R:0:5050", "R:").await;
            device.expect_command("H").await;
            device
        });

        driver.move_absolute(5000).await.unwrap();
        assert!(driver.snapshot().await.backlash.pending);

        assert!(driver.abort().await.is_err());
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.motion, MotionState::Idle);
        assert!(!snapshot.backlash.pending);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_fire_and_forget_moves() {
        let (port, mut device) = mock_serial::new();
        let provider = MockConnection::new(port);
        let options = DriverOptions {
            move_ack: false,
            ..test_options()
        };
        let script = tokio::spawn(async move {
            device.exchange("#", "#:FocuserLink").await;
            device.exchange("q", "q:0:0").await;
            device.exchange("u", "u:0:0:0:10000:0:500:125:30:10:0").await;
            device.exchange("f", "f:0").await;
            device.expect_command("R:0:2500").await;
            device
        });

        let driver = FocuserLinkDriver::connect(&provider, options, None).await.unwrap();
        driver.poll_once().await.unwrap();
        driver.move_absolute(2500).await.unwrap();
        assert_eq!(driver.snapshot().await.motion, MotionState::Moving);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_toggle_marks_flag_stale() {
        let (driver, mut device) = connected(0).await;
        let script = tokio::spawn(async move {
            device.exchange("F:1", "F:").await;
            device.exchange("q", "q:4000:0").await;
            device.exchange("f", "f:1").await;
            device
        });

        driver.set_manual_controller(true).await.unwrap();
        assert_eq!(
            driver.snapshot().await.groups.manual_controller,
            PropertyState::Busy
        );
        let report = driver.poll_once().await.unwrap();
        assert!(report.manual_refreshed);
        let snapshot = driver.snapshot().await;
        assert!(snapshot.state.manual_controller_enabled);
        assert_eq!(snapshot.groups.manual_controller, PropertyState::Ok);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_compensate_now_uses_cached_threshold() {
        let (driver, mut device) = connected(0).await;
        let script = tokio::spawn(async move {
            device.exchange("S:10", "S:").await;
            device
        });
        driver.compensate_now().await.unwrap();
        assert_eq!(
            driver.snapshot().await.groups.compensate_now,
            PropertyState::Busy
        );
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_redefines_position_without_moving() {
        let (driver, mut device) = connected(50).await;
        let script = tokio::spawn(async move {
            device.exchange("P:7000", "P:").await;
            device
        });
        driver.sync(7000).await.unwrap();
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.state.absolute_position_steps, 7000);
        assert_eq!(snapshot.motion, MotionState::Idle);
        let mut device = script.await.unwrap();

        assert!(matches!(driver.sync(-1).await, Err(FocuserError::Config(_))));
        assert!(device.is_quiet(Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn test_max_position_updates_after_confirmation() {
        let (driver, mut device) = connected(0).await;
        let script = tokio::spawn(async move {
            device.exchange("u", "u:0:0:0:10000:0:500:125:30:10:0").await;
            device
                .exchange("U:0:0:0:20000:0:500:125:30:10:0:", "U:")
                .await;
            device
        });
        driver.set_max_position(20000).await.unwrap();
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.state.max_position_steps, 20000);
        assert_eq!(snapshot.groups.settings, PropertyState::Busy);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_reversed_write_failure_marks_alert() {
        let (driver, mut device) = connected(0).await;
        let script = tokio::spawn(async move {
            device.exchange("u", "u:0:0:0:10000:0:500:125:30:10:0").await;
            device
                .exchange("U:0:0:0:10000:1:500:125:30:10:0:", "q:")
                .await;
            device
        });
        assert!(driver.set_reversed(true).await.is_err());
        let snapshot = driver.snapshot().await;
        assert!(!snapshot.state.reversed);
        assert_eq!(snapshot.groups.settings, PropertyState::Alert);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_settled_gives_up_after_limit() {
        let (driver, mut device) = connected(0).await;
        let script = tokio::spawn(async move {
            device.exchange("R:0:5000", "R:").await;
            device
        });
        driver.move_absolute(5000).await.unwrap();
        let _device = script.await.unwrap();

        let err = driver
            .wait_until_settled(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, FocuserError::NotSettled(_)));
        assert_eq!(driver.snapshot().await.motion, MotionState::Moving);
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn test_wait_until_settled_returns_at_once_when_idle() {
        let (driver, _device) = connected(0).await;
        let snapshot = driver
            .wait_until_settled(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(snapshot.motion, MotionState::Idle);
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_resets_state() {
        let (driver, _device) = connected(0).await;
        driver.disconnect().await;
        assert!(!driver.is_connected().await);
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.state, FocuserState::default());
        assert!(matches!(
            driver.move_absolute(10).await,
            Err(FocuserError::NotConnected)
        ));
        assert!(matches!(driver.poll_once().await, Err(FocuserError::NotConnected)));
    }
}
