//! Mock motion/illumination microcontroller.

use crate::common::{ErrorConfig, MockMode};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use scope_core::capabilities::{HardwareTrigger, IlluminationDriver, StageDriver};
use scope_core::types::{Axis, DeviceReport, HomeTarget, LimitCode, LimitSide, RawPosition};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

const DRIVER_TYPE: &str = "mock_microcontroller";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the mock microcontroller.
#[derive(Debug, Clone, Deserialize)]
pub struct MockMicrocontrollerConfig {
    /// Travel speed in Realistic mode, microsteps per second (default: 200000)
    #[serde(default = "default_speed")]
    pub usteps_per_second: f64,

    /// Settling time added to every timed command in ms (default: 5)
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Busy polls reported after each command in Instant mode (default: 0)
    #[serde(default)]
    pub busy_polls_per_command: u32,
}

fn default_speed() -> f64 {
    200_000.0
}
fn default_settle() -> u64 {
    5
}

impl Default for MockMicrocontrollerConfig {
    fn default() -> Self {
        Self {
            usteps_per_second: default_speed(),
            settle_ms: default_settle(),
            busy_polls_per_command: 0,
        }
    }
}

// =============================================================================
// Command log
// =============================================================================

/// Motion command as received by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    MoveRelative { axis: Axis, usteps: i64 },
    MoveAbsolute { axis: Axis, usteps: i64 },
    Home(HomeTarget),
    Zero(Axis),
    SetLimit { code: LimitCode, usteps: i64 },
}

impl MotionCommand {
    pub fn axis(&self) -> Option<Axis> {
        match self {
            MotionCommand::MoveRelative { axis, .. }
            | MotionCommand::MoveAbsolute { axis, .. }
            | MotionCommand::Zero(axis) => Some(*axis),
            MotionCommand::SetLimit { code, .. } => Some(code.axis),
            MotionCommand::Home(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    busy_polls_remaining: u32,
    busy_until: Option<Instant>,
    stalled: bool,
    limits: HashMap<LimitCode, i64>,
    illumination_on: bool,
    illumination: Option<(u32, f64)>,
    led_matrix: Option<(u32, f64, f64, f64)>,
    af_laser_on: bool,
    hardware_triggers: u64,
    last_trigger_on_time_us: u64,
    strobe_delay_us: u32,
    commands: Vec<MotionCommand>,
}

/// Read-only view of the simulated stage position, for scene models.
#[derive(Clone, Debug)]
pub struct PositionProbe {
    position: Arc<Mutex<RawPosition>>,
}

impl PositionProbe {
    pub fn raw(&self) -> RawPosition {
        *self.position.lock()
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct MockMicrocontrollerBuilder {
    config: MockMicrocontrollerConfig,
    mode: MockMode,
    error_config: ErrorConfig,
    initial_position: RawPosition,
}

impl MockMicrocontrollerBuilder {
    pub fn new() -> Self {
        Self {
            config: MockMicrocontrollerConfig::default(),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
            initial_position: RawPosition::default(),
        }
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(mut self, config: MockMicrocontrollerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn busy_polls(mut self, polls: u32) -> Self {
        self.config.busy_polls_per_command = polls;
        self
    }

    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    pub fn initial_position(mut self, position: RawPosition) -> Self {
        self.initial_position = position;
        self
    }

    pub fn build(self) -> MockMicrocontroller {
        let (report_tx, _) = broadcast::channel(64);
        MockMicrocontroller {
            config: self.config,
            mode: self.mode,
            error_config: self.error_config,
            position: Arc::new(Mutex::new(self.initial_position)),
            state: Mutex::new(ControllerState::default()),
            report_tx,
        }
    }
}

impl Default for MockMicrocontrollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// MockMicrocontroller
// =============================================================================

/// Simulated motion and illumination controller.
///
/// Keeps raw microstep counters per axis, applies programmed soft limits,
/// reports busy according to its [`MockMode`], and logs every motion command
/// so tests can assert on the exact sequence sent by the controllers.
///
/// # Example
///
/// ```rust,ignore
/// let mcu = MockMicrocontroller::builder().busy_polls(2).build();
/// mcu.move_usteps(Axis::X, 1000).await?;
/// assert!(mcu.is_busy().await?);
/// ```
pub struct MockMicrocontroller {
    config: MockMicrocontrollerConfig,
    mode: MockMode,
    error_config: ErrorConfig,
    position: Arc<Mutex<RawPosition>>,
    state: Mutex<ControllerState>,
    report_tx: broadcast::Sender<DeviceReport>,
}

impl MockMicrocontroller {
    /// Instant-mode controller at the origin.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockMicrocontrollerBuilder {
        MockMicrocontrollerBuilder::new()
    }

    pub fn probe(&self) -> PositionProbe {
        PositionProbe {
            position: Arc::clone(&self.position),
        }
    }

    /// Every motion command received so far, oldest first.
    pub fn commands(&self) -> Vec<MotionCommand> {
        self.state.lock().commands.clone()
    }

    /// Motion commands that target `axis`.
    pub fn commands_for(&self, axis: Axis) -> Vec<MotionCommand> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.axis() == Some(axis))
            .copied()
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Keep reporting busy until [`resume`](Self::resume) is called.
    pub fn stall(&self) {
        tracing::debug!("MockMicrocontroller: stalled");
        self.state.lock().stalled = true;
    }

    pub fn resume(&self) {
        self.state.lock().stalled = false;
    }

    /// Set a raw counter directly, as if the stage had been pushed by hand.
    pub fn set_raw(&self, axis: Axis, usteps: i64) {
        *self.position.lock().get_mut(axis) = usteps;
    }

    /// Simulate the joystick button.
    pub fn press_joystick_button(&self) {
        self.publish_report(true);
    }

    pub fn limit(&self, code: LimitCode) -> Option<i64> {
        self.state.lock().limits.get(&code).copied()
    }

    pub fn illumination_on(&self) -> bool {
        self.state.lock().illumination_on
    }

    pub fn last_illumination(&self) -> Option<(u32, f64)> {
        self.state.lock().illumination
    }

    pub fn last_led_matrix(&self) -> Option<(u32, f64, f64, f64)> {
        self.state.lock().led_matrix
    }

    pub fn af_laser_on(&self) -> bool {
        self.state.lock().af_laser_on
    }

    pub fn hardware_trigger_count(&self) -> u64 {
        self.state.lock().hardware_triggers
    }

    pub fn last_trigger_on_time_us(&self) -> u64 {
        self.state.lock().last_trigger_on_time_us
    }

    pub fn strobe_delay_us(&self) -> u32 {
        self.state.lock().strobe_delay_us
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, operation)?;
        Ok(())
    }

    fn clamp_to_limits(&self, state: &ControllerState, axis: Axis, target: i64) -> i64 {
        let mut clamped = target;
        if let Some(code) = LimitCode::new(axis, LimitSide::Positive) {
            if let Some(&upper) = state.limits.get(&code) {
                clamped = clamped.min(upper);
            }
        }
        if let Some(code) = LimitCode::new(axis, LimitSide::Negative) {
            if let Some(&lower) = state.limits.get(&code) {
                clamped = clamped.max(lower);
            }
        }
        clamped
    }

    /// Mark the device busy for a command covering `distance` microsteps.
    fn start_busy(&self, state: &mut ControllerState, distance: i64) {
        state.busy_polls_remaining = self.config.busy_polls_per_command;
        if self.mode.is_timed() {
            let travel = distance.unsigned_abs() as f64 / self.config.usteps_per_second.max(1.0);
            let duration = Duration::from_secs_f64(travel) + Duration::from_millis(self.config.settle_ms);
            state.busy_until = Some(Instant::now() + duration);
        }
    }

    fn apply_move(&self, command: MotionCommand, axis: Axis, target: i64) -> i64 {
        let mut state = self.state.lock();
        let mut position = self.position.lock();
        let current = position.get(axis);
        let reached = self.clamp_to_limits(&state, axis, target);
        if reached != target {
            tracing::debug!(
                axis = %axis,
                target,
                reached,
                "MockMicrocontroller: move clamped by soft limit"
            );
        }
        *position.get_mut(axis) = reached;
        state.commands.push(command);
        self.start_busy(&mut state, reached - current);
        reached
    }

    fn publish_report(&self, external_input_activated: bool) {
        let report = DeviceReport {
            position: *self.position.lock(),
            external_input_activated,
        };
        let _ = self.report_tx.send(report);
    }
}

impl Default for MockMicrocontroller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageDriver for MockMicrocontroller {
    async fn move_usteps(&self, axis: Axis, usteps: i64) -> Result<()> {
        self.check("move")?;
        let current = self.position.lock().get(axis);
        let reached = self.apply_move(
            MotionCommand::MoveRelative { axis, usteps },
            axis,
            current + usteps,
        );
        tracing::debug!(axis = %axis, usteps, reached, "MockMicrocontroller: relative move");
        self.publish_report(false);
        Ok(())
    }

    async fn move_to_usteps(&self, axis: Axis, usteps: i64) -> Result<()> {
        self.check("move")?;
        let reached = self.apply_move(MotionCommand::MoveAbsolute { axis, usteps }, axis, usteps);
        tracing::debug!(axis = %axis, usteps, reached, "MockMicrocontroller: absolute move");
        self.publish_report(false);
        Ok(())
    }

    async fn home(&self, target: HomeTarget) -> Result<()> {
        self.check("home")?;
        let axes: &[Axis] = match target {
            HomeTarget::X => &[Axis::X],
            HomeTarget::Y => &[Axis::Y],
            HomeTarget::Z => &[Axis::Z],
            HomeTarget::Xy => &[Axis::X, Axis::Y],
        };
        {
            let mut state = self.state.lock();
            let mut position = self.position.lock();
            let mut travel = 0;
            for &axis in axes {
                travel = travel.max(position.get(axis).abs());
                *position.get_mut(axis) = 0;
            }
            state.commands.push(MotionCommand::Home(target));
            self.start_busy(&mut state, travel);
        }
        tracing::debug!(target = ?target, "MockMicrocontroller: homed");
        self.publish_report(false);
        Ok(())
    }

    async fn zero(&self, axis: Axis) -> Result<()> {
        self.check("zero")?;
        {
            let mut state = self.state.lock();
            *self.position.lock().get_mut(axis) = 0;
            state.commands.push(MotionCommand::Zero(axis));
            self.start_busy(&mut state, 0);
        }
        self.publish_report(false);
        Ok(())
    }

    async fn set_limit(&self, code: LimitCode, usteps: i64) -> Result<()> {
        self.check("set_limit")?;
        let mut state = self.state.lock();
        state.limits.insert(code, usteps);
        state.commands.push(MotionCommand::SetLimit { code, usteps });
        tracing::debug!(code = ?code, usteps, "MockMicrocontroller: soft limit set");
        Ok(())
    }

    async fn is_busy(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.stalled {
            return Ok(true);
        }
        if state.busy_polls_remaining > 0 {
            state.busy_polls_remaining -= 1;
            return Ok(true);
        }
        if let Some(until) = state.busy_until {
            if Instant::now() < until {
                return Ok(true);
            }
            state.busy_until = None;
        }
        Ok(false)
    }

    async fn raw_position(&self) -> Result<RawPosition> {
        Ok(*self.position.lock())
    }

    fn subscribe_reports(&self) -> broadcast::Receiver<DeviceReport> {
        self.report_tx.subscribe()
    }
}

#[async_trait]
impl IlluminationDriver for MockMicrocontroller {
    async fn turn_on_illumination(&self) -> Result<()> {
        self.check("illumination")?;
        self.state.lock().illumination_on = true;
        Ok(())
    }

    async fn turn_off_illumination(&self) -> Result<()> {
        self.check("illumination")?;
        self.state.lock().illumination_on = false;
        Ok(())
    }

    async fn set_illumination(&self, source: u32, intensity: f64) -> Result<()> {
        self.check("illumination")?;
        self.state.lock().illumination = Some((source, intensity));
        Ok(())
    }

    async fn set_illumination_led_matrix(&self, source: u32, r: f64, g: f64, b: f64) -> Result<()> {
        self.check("illumination")?;
        self.state.lock().led_matrix = Some((source, r, g, b));
        Ok(())
    }

    async fn set_af_laser(&self, on: bool) -> Result<()> {
        self.check("af_laser")?;
        self.state.lock().af_laser_on = on;
        Ok(())
    }
}

#[async_trait]
impl HardwareTrigger for MockMicrocontroller {
    async fn send_hardware_trigger(
        &self,
        control_illumination: bool,
        illumination_on_time_us: u64,
    ) -> Result<()> {
        self.check("trigger")?;
        let mut state = self.state.lock();
        state.hardware_triggers += 1;
        state.last_trigger_on_time_us = if control_illumination {
            illumination_on_time_us
        } else {
            0
        };
        Ok(())
    }

    async fn set_strobe_delay_us(&self, strobe_delay_us: u32) -> Result<()> {
        self.check("strobe")?;
        self.state.lock().strobe_delay_us = strobe_delay_us;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    #[tokio::test]
    async fn relative_and_absolute_moves_update_counters() {
        let mcu = MockMicrocontroller::new();
        mcu.move_usteps(Axis::X, 1500).await.unwrap();
        mcu.move_usteps(Axis::X, -500).await.unwrap();
        mcu.move_to_usteps(Axis::Z, -42).await.unwrap();

        let raw = mcu.raw_position().await.unwrap();
        assert_eq!(raw.x, 1000);
        assert_eq!(raw.z, -42);
        assert_eq!(mcu.commands().len(), 3);
        assert_eq!(
            mcu.commands_for(Axis::Z),
            vec![MotionCommand::MoveAbsolute {
                axis: Axis::Z,
                usteps: -42
            }]
        );
    }

    #[tokio::test]
    async fn soft_limits_clamp_motion() {
        let mcu = MockMicrocontroller::new();
        let upper = LimitCode::new(Axis::Y, LimitSide::Positive).unwrap();
        let lower = LimitCode::new(Axis::Y, LimitSide::Negative).unwrap();
        mcu.set_limit(upper, 1000).await.unwrap();
        mcu.set_limit(lower, -200).await.unwrap();

        mcu.move_usteps(Axis::Y, 5000).await.unwrap();
        assert_eq!(mcu.raw_position().await.unwrap().y, 1000);
        mcu.move_to_usteps(Axis::Y, -900).await.unwrap();
        assert_eq!(mcu.raw_position().await.unwrap().y, -200);
        assert_eq!(mcu.limit(upper), Some(1000));
    }

    #[tokio::test]
    async fn busy_polls_count_down() {
        let mcu = MockMicrocontroller::builder().busy_polls(2).build();
        mcu.move_usteps(Axis::X, 10).await.unwrap();
        assert!(mcu.is_busy().await.unwrap());
        assert!(mcu.is_busy().await.unwrap());
        assert!(!mcu.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn stall_keeps_busy_until_resumed() {
        let mcu = MockMicrocontroller::new();
        mcu.stall();
        for _ in 0..10 {
            assert!(mcu.is_busy().await.unwrap());
        }
        mcu.resume();
        assert!(!mcu.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn realistic_mode_busy_for_travel_time() {
        let mcu = MockMicrocontroller::builder()
            .mode(MockMode::Realistic)
            .config(MockMicrocontrollerConfig {
                usteps_per_second: 1000.0,
                settle_ms: 0,
                busy_polls_per_command: 0,
            })
            .build();
        mcu.move_usteps(Axis::X, 500).await.unwrap();
        assert!(mcu.is_busy().await.unwrap());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(mcu.is_busy().await.unwrap());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!mcu.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn home_and_zero() {
        let mcu = MockMicrocontroller::builder()
            .initial_position(RawPosition {
                x: 100,
                y: 200,
                z: 300,
                theta: 0,
            })
            .build();
        mcu.home(HomeTarget::Xy).await.unwrap();
        let raw = mcu.raw_position().await.unwrap();
        assert_eq!((raw.x, raw.y, raw.z), (0, 0, 300));
        mcu.zero(Axis::Z).await.unwrap();
        assert_eq!(mcu.raw_position().await.unwrap().z, 0);
    }

    #[tokio::test]
    async fn reports_are_broadcast() {
        let mcu = MockMicrocontroller::new();
        let mut rx = mcu.subscribe_reports();
        mcu.move_usteps(Axis::Z, 7).await.unwrap();
        let report = rx.recv().await.unwrap();
        assert_eq!(report.position.z, 7);
        assert!(!report.external_input_activated);

        mcu.press_joystick_button();
        assert!(rx.recv().await.unwrap().external_input_activated);
    }

    #[tokio::test]
    async fn illumination_and_trigger_state() {
        let mcu = MockMicrocontroller::new();
        mcu.set_illumination(11, 35.0).await.unwrap();
        mcu.set_illumination_led_matrix(0, 0.2, 0.2, 0.2).await.unwrap();
        mcu.turn_on_illumination().await.unwrap();
        mcu.send_hardware_trigger(true, 20_000).await.unwrap();
        mcu.set_af_laser(true).await.unwrap();

        assert!(mcu.illumination_on());
        assert_eq!(mcu.last_illumination(), Some((11, 35.0)));
        assert_eq!(mcu.last_led_matrix(), Some((0, 0.2, 0.2, 0.2)));
        assert_eq!(mcu.hardware_trigger_count(), 1);
        assert_eq!(mcu.last_trigger_on_time_us(), 20_000);
        assert!(mcu.af_laser_on());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let mcu = MockMicrocontroller::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "move",
                count: 1,
            }))
            .build();
        assert!(mcu.move_usteps(Axis::X, 1).await.is_ok());
        let err = mcu.move_usteps(Axis::X, 1).await.unwrap_err();
        assert!(err.to_string().contains("move refused after 1 calls"));
        assert_eq!(mcu.raw_position().await.unwrap().x, 1);
    }
}
