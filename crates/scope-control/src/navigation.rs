//! Stage navigation: physical-unit moves, soft limits and position tracking.
//!
//! The motion device works in raw microstep counts. This controller owns the
//! conversion between those counts and millimetres (radians for theta):
//!
//! ```text
//! usteps (stage direction)  = round(mm / mm_per_ustep)
//! raw count sent to device  = usteps * movement_sign
//! position (mm)             = raw * movement_sign * unit_per_count
//! ```
//!
//! `unit_per_count` is the encoder step when one is configured, otherwise the
//! microstep size. Microstep-level moves ([`move_usteps`](NavigationController::move_usteps),
//! [`move_to_usteps`](NavigationController::move_to_usteps)) are expressed in stage
//! direction, so callers that step through Z never deal with the sign.

use crate::wait::{wait_till_idle, Deadline};
use parking_lot::RwLock;
use scope_core::capabilities::StageDriver;
use scope_core::config::StageConfig;
use scope_core::error::{OutOfRangeError, ScopeResult};
use scope_core::events::{EventBus, ScopeEvent};
use scope_core::types::{Axis, DeviceReport, HomeTarget, LimitCode, LimitSide, Position, RawPosition};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct NavigationState {
    raw: RawPosition,
    position: Position,
    /// Physical soft limits in mm, keyed by physical side.
    soft_limits: HashMap<(Axis, LimitSide), f64>,
    joystick_button_action: bool,
}

/// Converts between physical units and device counts and drives the stage.
pub struct NavigationController {
    stage: Arc<dyn StageDriver>,
    config: StageConfig,
    events: EventBus,
    state: RwLock<NavigationState>,
}

impl NavigationController {
    pub fn new(stage: Arc<dyn StageDriver>, config: StageConfig, events: EventBus) -> Self {
        Self {
            stage,
            config,
            events,
            state: RwLock::new(NavigationState {
                joystick_button_action: true,
                ..NavigationState::default()
            }),
        }
    }

    pub fn stage(&self) -> &Arc<dyn StageDriver> {
        &self.stage
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    fn sign(&self, axis: Axis) -> i64 {
        i64::from(self.config.axis(axis).movement_sign)
    }

    /// Travel of one microstep: mm for linear axes, rad for theta.
    pub fn mm_per_ustep(&self, axis: Axis) -> f64 {
        let cfg = self.config.axis(axis);
        match axis {
            Axis::Theta => 2.0 * PI / cfg.usteps_per_rev(),
            _ => cfg.screw_pitch_mm / cfg.usteps_per_rev(),
        }
    }

    /// Physical size of one reported position count.
    fn unit_per_count(&self, axis: Axis) -> f64 {
        self.config
            .axis(axis)
            .encoder_step_size
            .unwrap_or_else(|| self.mm_per_ustep(axis))
    }

    /// Microsteps in stage direction for a physical distance.
    pub fn mm_to_usteps(&self, axis: Axis, mm: f64) -> i64 {
        (mm / self.mm_per_ustep(axis)).round() as i64
    }

    pub fn usteps_to_mm(&self, axis: Axis, usteps: i64) -> f64 {
        usteps as f64 * self.mm_per_ustep(axis)
    }

    /// Physical coordinate of a raw device count.
    pub fn counts_to_mm(&self, axis: Axis, raw: i64) -> f64 {
        (raw * self.sign(axis)) as f64 * self.unit_per_count(axis)
    }

    // -------------------------------------------------------------------------
    // Motion
    // -------------------------------------------------------------------------

    /// Relative move of `mm` (rad for theta).
    pub async fn move_relative(&self, axis: Axis, mm: f64) -> ScopeResult<()> {
        let usteps = self.mm_to_usteps(axis, mm);
        debug!(axis = %axis, mm, usteps, "Relative move");
        self.move_usteps(axis, usteps).await
    }

    /// Absolute move to `mm` (rad for theta).
    pub async fn move_absolute(&self, axis: Axis, mm: f64) -> ScopeResult<()> {
        let usteps = self.mm_to_usteps(axis, mm);
        debug!(axis = %axis, mm, usteps, "Absolute move");
        self.move_to_usteps(axis, usteps).await
    }

    /// Absolute XY move, X first.
    pub async fn move_to(&self, x_mm: f64, y_mm: f64) -> ScopeResult<()> {
        self.move_absolute(Axis::X, x_mm).await?;
        self.move_absolute(Axis::Y, y_mm).await
    }

    /// Relative move in microsteps, stage direction.
    pub async fn move_usteps(&self, axis: Axis, usteps: i64) -> ScopeResult<()> {
        self.stage.move_usteps(axis, usteps * self.sign(axis)).await?;
        Ok(())
    }

    /// Absolute move in microsteps, stage direction.
    pub async fn move_to_usteps(&self, axis: Axis, usteps: i64) -> ScopeResult<()> {
        self.stage
            .move_to_usteps(axis, usteps * self.sign(axis))
            .await?;
        Ok(())
    }

    pub async fn home(&self, target: HomeTarget) -> ScopeResult<()> {
        info!(target = ?target, "Homing");
        self.stage.home(target).await?;
        Ok(())
    }

    /// Declare the current position of `axis` as zero.
    pub async fn zero(&self, axis: Axis) -> ScopeResult<()> {
        self.stage.zero(axis).await?;
        Ok(())
    }

    /// Program a soft limit at a physical coordinate.
    ///
    /// With a negative movement sign the physical positive limit is the
    /// device's negative limit, and vice versa.
    pub async fn set_soft_limit(&self, axis: Axis, side: LimitSide, mm: f64) -> ScopeResult<()> {
        let sign = self.sign(axis);
        let device_side = if sign > 0 { side } else { side.opposite() };
        let Some(code) = LimitCode::new(axis, device_side) else {
            warn!(axis = %axis, "Axis has no soft-limit register");
            return Ok(());
        };
        let usteps = self.mm_to_usteps(axis, mm) * sign;
        self.stage.set_limit(code, usteps).await?;
        self.state.write().soft_limits.insert((axis, side), mm);
        debug!(axis = %axis, side = ?side, mm, device_side = ?device_side, usteps, "Soft limit set");
        Ok(())
    }

    pub fn soft_limit(&self, axis: Axis, side: LimitSide) -> Option<f64> {
        self.state.read().soft_limits.get(&(axis, side)).copied()
    }

    /// Fail without moving when `target_mm` lies beyond the soft limit in the direction of travel.
    fn check_bounds(&self, axis: Axis, current_mm: f64, target_mm: f64) -> ScopeResult<()> {
        let side = if target_mm > current_mm {
            LimitSide::Positive
        } else {
            LimitSide::Negative
        };
        let Some(limit_mm) = self.soft_limit(axis, side) else {
            return Ok(());
        };
        let beyond = match side {
            LimitSide::Positive => target_mm > limit_mm,
            LimitSide::Negative => target_mm < limit_mm,
        };
        if beyond {
            return Err(OutOfRangeError {
                axis,
                current_mm,
                target_mm,
                limit_mm,
            }
            .into());
        }
        Ok(())
    }

    /// Relative move that refuses to cross a programmed soft limit.
    pub async fn move_relative_bounded(&self, axis: Axis, mm: f64) -> ScopeResult<()> {
        let current = self.refresh_position().await?.axis_mm(axis);
        self.check_bounds(axis, current, current + mm)?;
        self.move_relative(axis, mm).await
    }

    /// Absolute move that refuses to cross a programmed soft limit.
    pub async fn move_absolute_bounded(&self, axis: Axis, mm: f64) -> ScopeResult<()> {
        let current = self.refresh_position().await?.axis_mm(axis);
        self.check_bounds(axis, current, mm)?;
        self.move_absolute(axis, mm).await
    }

    // -------------------------------------------------------------------------
    // Position tracking
    // -------------------------------------------------------------------------

    /// Fold a device report into the cached position and publish it.
    pub fn update_position(&self, report: &DeviceReport) -> Position {
        let raw = report.position;
        let position = Position {
            x_mm: self.counts_to_mm(Axis::X, raw.x),
            y_mm: self.counts_to_mm(Axis::Y, raw.y),
            z_mm: self.counts_to_mm(Axis::Z, raw.z),
            theta_rad: self.counts_to_mm(Axis::Theta, raw.theta),
        };
        let joystick_enabled = {
            let mut state = self.state.write();
            state.raw = raw;
            state.position = position;
            state.joystick_button_action
        };
        self.events.publish(ScopeEvent::PositionUpdated(position));
        if report.external_input_activated && joystick_enabled {
            info!("External input activated");
            self.events.publish(ScopeEvent::ExternalInputActivated);
        }
        position
    }

    /// Read the device position and update the cache.
    pub async fn refresh_position(&self) -> ScopeResult<Position> {
        let raw = self.stage.raw_position().await?;
        Ok(self.update_position(&DeviceReport {
            position: raw,
            external_input_activated: false,
        }))
    }

    /// Spawn a task folding every device report into the cache.
    pub fn spawn_position_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut reports = self.stage.subscribe_reports();
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match reports.recv().await {
                    Ok(report) => {
                        let Some(nav) = this.upgrade() else { break };
                        nav.update_position(&report);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Position listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Position listener stopped");
        })
    }

    /// Last known position.
    pub fn position(&self) -> Position {
        self.state.read().position
    }

    /// Last known Z in microsteps, stage direction.
    pub fn z_usteps(&self) -> i64 {
        self.usteps(Axis::Z)
    }

    /// Microstep position of `axis` in stage direction.
    ///
    /// Axes with an encoder report encoder counts; those are converted
    /// through their physical position.
    pub fn usteps(&self, axis: Axis) -> i64 {
        let raw = self.state.read().raw.get(axis);
        if self.config.axis(axis).encoder_step_size.is_some() {
            self.mm_to_usteps(axis, self.counts_to_mm(axis, raw))
        } else {
            raw * self.sign(axis)
        }
    }

    pub fn set_joystick_button_action(&self, enabled: bool) {
        self.state.write().joystick_button_action = enabled;
    }

    pub fn joystick_button_action(&self) -> bool {
        self.state.read().joystick_button_action
    }

    // -------------------------------------------------------------------------
    // Waiting
    // -------------------------------------------------------------------------

    fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.config.sleep_time_s)
    }

    /// Wait for the device to go idle, then refresh the cached position.
    pub async fn wait_till_idle(&self) -> ScopeResult<()> {
        wait_till_idle(self.stage.as_ref(), self.poll_interval(), None).await?;
        self.refresh_position().await?;
        Ok(())
    }

    /// As [`wait_till_idle`](Self::wait_till_idle), failing once `deadline` passes.
    pub async fn wait_till_idle_until(&self, deadline: &Deadline) -> ScopeResult<()> {
        wait_till_idle(self.stage.as_ref(), self.poll_interval(), Some(deadline)).await?;
        self.refresh_position().await?;
        Ok(())
    }

    /// Relative move followed by a wait.
    pub async fn step(&self, axis: Axis, usteps: i64) -> ScopeResult<()> {
        self.move_usteps(axis, usteps).await?;
        self.wait_till_idle().await
    }
}

/// Per-axis access on [`Position`].
trait AxisCoordinate {
    fn axis_mm(&self, axis: Axis) -> f64;
}

impl AxisCoordinate for Position {
    fn axis_mm(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x_mm,
            Axis::Y => self.y_mm,
            Axis::Z => self.z_mm,
            Axis::Theta => self.theta_rad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::error::ScopeError;
    use scope_driver_mock::{MockMicrocontroller, MotionCommand};

    fn controller() -> (Arc<MockMicrocontroller>, NavigationController) {
        let mcu = Arc::new(MockMicrocontroller::new());
        let nav = NavigationController::new(mcu.clone(), StageConfig::default(), EventBus::new());
        (mcu, nav)
    }

    #[tokio::test]
    async fn encoder_counts_read_back_as_microsteps() {
        let mcu = Arc::new(MockMicrocontroller::new());
        let mut config = StageConfig::default();
        // one encoder count per two microsteps
        config.z.encoder_step_size = Some(2.0 * 0.3 / 51200.0);
        let nav = NavigationController::new(mcu.clone(), config, EventBus::new());

        mcu.move_usteps(Axis::Z, -100).await.unwrap();
        nav.refresh_position().await.unwrap();

        assert_eq!(nav.z_usteps(), 200);
        assert_eq!(nav.usteps(Axis::Z), 200);
        assert!((nav.position().z_mm - nav.usteps_to_mm(Axis::Z, 200)).abs() < 1e-12);
    }

    #[test]
    fn step_sizes_follow_drive_train() {
        let (_, nav) = controller();
        // 2.54 mm / (256 * 200)
        assert!((nav.mm_per_ustep(Axis::X) - 2.54 / 51200.0).abs() < 1e-15);
        assert_eq!(nav.mm_to_usteps(Axis::X, 2.54), 51200);
        assert_eq!(nav.mm_to_usteps(Axis::Z, 0.3), 51200);
        assert!((nav.mm_per_ustep(Axis::Theta) - 2.0 * PI / 3200.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn negative_sign_flips_device_direction() {
        let (mcu, nav) = controller();
        nav.move_relative(Axis::Z, 0.003).await.unwrap();
        assert_eq!(
            mcu.commands_for(Axis::Z),
            vec![MotionCommand::MoveRelative {
                axis: Axis::Z,
                usteps: -512
            }]
        );
        let pos = nav.refresh_position().await.unwrap();
        assert!((pos.z_mm - 0.003).abs() < 1e-9);
        assert_eq!(nav.z_usteps(), 512);
    }

    #[tokio::test]
    async fn soft_limit_mirrors_on_negative_sign() {
        let (mcu, nav) = controller();
        nav.set_soft_limit(Axis::Z, LimitSide::Positive, 6.0)
            .await
            .unwrap();
        let mirrored = LimitCode::new(Axis::Z, LimitSide::Negative).unwrap();
        assert_eq!(mcu.limit(mirrored), Some(-nav.mm_to_usteps(Axis::Z, 6.0)));

        nav.set_soft_limit(Axis::X, LimitSide::Positive, 10.0)
            .await
            .unwrap();
        let direct = LimitCode::new(Axis::X, LimitSide::Positive).unwrap();
        assert_eq!(mcu.limit(direct), Some(nav.mm_to_usteps(Axis::X, 10.0)));
    }

    #[tokio::test]
    async fn bounded_move_rejects_without_moving() {
        let (mcu, nav) = controller();
        nav.set_soft_limit(Axis::X, LimitSide::Positive, 5.0)
            .await
            .unwrap();
        mcu.clear_commands();

        let err = nav.move_absolute_bounded(Axis::X, 6.0).await.unwrap_err();
        match err {
            ScopeError::OutOfRange(e) => {
                assert_eq!(e.axis, Axis::X);
                assert_eq!(e.limit_mm, 5.0);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert!(mcu.commands().is_empty());

        nav.move_relative_bounded(Axis::X, 4.0).await.unwrap();
        assert_eq!(mcu.commands().len(), 1);
        // moving away from the limit is always allowed
        nav.move_relative_bounded(Axis::X, -20.0).await.unwrap();
    }

    #[tokio::test]
    async fn joystick_events_respect_enable_flag() {
        let mcu = Arc::new(MockMicrocontroller::new());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let nav = NavigationController::new(mcu.clone(), StageConfig::default(), events);

        let pressed = DeviceReport {
            position: RawPosition::default(),
            external_input_activated: true,
        };
        nav.set_joystick_button_action(false);
        nav.update_position(&pressed);
        assert!(matches!(rx.recv().await.unwrap(), ScopeEvent::PositionUpdated(_)));
        assert!(rx.try_recv().is_err());

        nav.set_joystick_button_action(true);
        nav.update_position(&pressed);
        assert!(matches!(rx.recv().await.unwrap(), ScopeEvent::PositionUpdated(_)));
        assert!(matches!(rx.recv().await.unwrap(), ScopeEvent::ExternalInputActivated));
    }

    #[tokio::test]
    async fn listener_tracks_reports() {
        let mcu = Arc::new(MockMicrocontroller::new());
        let nav = Arc::new(NavigationController::new(
            mcu.clone(),
            StageConfig::default(),
            EventBus::new(),
        ));
        let handle = nav.spawn_position_listener();
        nav.move_absolute(Axis::Y, 1.27).await.unwrap();
        for _ in 0..50 {
            if (nav.position().y_mm - 1.27).abs() < 1e-9 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!((nav.position().y_mm - 1.27).abs() < 1e-9);
        handle.abort();
    }
}
