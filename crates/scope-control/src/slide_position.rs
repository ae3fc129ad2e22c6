//! Loading/scanning transitions of the slide holder.
//!
//! A transition stops live view, optionally retracts the objective, homes the
//! XY stage when needed and drives to the configured position. All waits share
//! one wall-clock budget; a stage that is still busy when it runs out is
//! stopped and reported as a [`ScopeError::HardwareTimeout`].

use crate::live::LiveController;
use crate::navigation::NavigationController;
use crate::wait::Deadline;
use parking_lot::Mutex;
use scope_core::arbiter::{Owner, ResourceArbiter};
use scope_core::config::SlideConfig;
use scope_core::error::{ScopeError, ScopeResult};
use scope_core::events::{EventBus, ScopeEvent};
use scope_core::types::{Axis, HomeTarget, SlidePosition};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Default)]
struct SlideState {
    position: SlidePosition,
    homing_done: bool,
    /// Z to return to after a retraction, stage-direction microsteps.
    retracted_from_z_usteps: Option<i64>,
}

pub struct SlidePositionController {
    navigation: Arc<NavigationController>,
    live: LiveController,
    arbiter: ResourceArbiter,
    events: EventBus,
    config: SlideConfig,
    state: Mutex<SlideState>,
}

impl SlidePositionController {
    pub fn new(
        navigation: Arc<NavigationController>,
        live: LiveController,
        arbiter: ResourceArbiter,
        events: EventBus,
        config: SlideConfig,
    ) -> Self {
        Self {
            navigation,
            live,
            arbiter,
            events,
            config,
            state: Mutex::new(SlideState::default()),
        }
    }

    pub fn slide_position(&self) -> SlidePosition {
        self.state.lock().position
    }

    pub fn is_homed(&self) -> bool {
        self.state.lock().homing_done
    }

    pub fn objective_retracted(&self) -> bool {
        self.state.lock().retracted_from_z_usteps.is_some()
    }

    /// Start the move to the loading position in the background.
    pub fn move_to_loading(self: &Arc<Self>) -> JoinHandle<ScopeResult<()>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.transition(SlidePosition::Loading).await })
    }

    /// Start the move to the scanning position in the background.
    pub fn move_to_scanning(self: &Arc<Self>) -> JoinHandle<ScopeResult<()>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.transition(SlidePosition::Scanning).await })
    }

    /// Move to the loading position and wait for the transition.
    pub async fn move_to_loading_position(self: &Arc<Self>) -> ScopeResult<()> {
        join_transition(self.move_to_loading()).await
    }

    /// Move to the scanning position and wait for the transition.
    pub async fn move_to_scanning_position(self: &Arc<Self>) -> ScopeResult<()> {
        join_transition(self.move_to_scanning()).await
    }

    #[instrument(skip(self))]
    pub async fn transition(&self, target: SlidePosition) -> ScopeResult<()> {
        let operation = match target {
            SlidePosition::Loading => "slide loading",
            SlidePosition::Scanning => "slide scanning",
            SlidePosition::Unknown => {
                return Err(ScopeError::Configuration(
                    "cannot move to an unknown slide position".into(),
                ))
            }
        };

        let was_live = self.live.is_live();
        if was_live {
            self.live.stop_live().await?;
        }
        let guard = match self.arbiter.try_acquire(Owner::SlidePositioning) {
            Ok(guard) => guard,
            Err(e) => {
                if was_live {
                    self.live.start_live().await?;
                }
                return Err(e);
            }
        };

        let deadline = Deadline::start(
            operation,
            Duration::from_secs_f64(self.config.switching_timeout_s),
        );
        let result = match target {
            SlidePosition::Loading => self.run_loading(&deadline).await,
            _ => self.run_scanning(&deadline).await,
        };

        if let Err(e @ ScopeError::HardwareTimeout { .. }) = &result {
            error!(error = %e, "Stage did not settle, stopping XY motion");
            self.stop_xy().await;
        }
        drop(guard);

        match &result {
            Ok(()) => {
                self.state.lock().position = target;
                info!(position = ?target, elapsed = ?deadline.elapsed(), "Slide position reached");
                self.events.publish(ScopeEvent::SlidePositionChanged(target));
            }
            Err(_) => self.state.lock().position = SlidePosition::Unknown,
        }

        let fatal = matches!(&result, Err(e) if e.is_fatal());
        if was_live && !fatal {
            self.live.start_live().await?;
        }
        result
    }

    async fn run_loading(&self, deadline: &Deadline) -> ScopeResult<()> {
        if self.config.retract_objective_before_moving {
            self.retract_objective(deadline).await?;
        }
        self.move_xy(self.config.loading_x_mm, self.config.loading_y_mm, deadline)
            .await
    }

    async fn run_scanning(&self, deadline: &Deadline) -> ScopeResult<()> {
        if self.config.retract_objective_before_moving {
            self.retract_objective(deadline).await?;
        }
        self.move_xy(self.config.scanning_x_mm, self.config.scanning_y_mm, deadline)
            .await?;
        self.restore_objective(deadline).await
    }

    async fn retract_objective(&self, deadline: &Deadline) -> ScopeResult<()> {
        if self.objective_retracted() {
            return Ok(());
        }
        let nav = &self.navigation;
        let z_usteps = nav.z_usteps();
        info!(
            to_mm = self.config.objective_retracted_pos_mm,
            "Retracting objective"
        );
        nav.move_absolute(Axis::Z, self.config.objective_retracted_pos_mm)
            .await?;
        nav.wait_till_idle_until(deadline).await?;
        self.state.lock().retracted_from_z_usteps = Some(z_usteps);
        Ok(())
    }

    /// Return Z from below so the last approach takes up backlash.
    async fn restore_objective(&self, deadline: &Deadline) -> ScopeResult<()> {
        let Some(z_usteps) = self.state.lock().retracted_from_z_usteps else {
            return Ok(());
        };
        let nav = &self.navigation;
        let backlash = nav.config().z_backlash_usteps();
        nav.move_to_usteps(Axis::Z, z_usteps - backlash).await?;
        nav.wait_till_idle_until(deadline).await?;
        nav.move_usteps(Axis::Z, backlash).await?;
        nav.wait_till_idle_until(deadline).await?;
        self.state.lock().retracted_from_z_usteps = None;
        info!("Objective restored");
        Ok(())
    }

    async fn move_xy(&self, x_mm: f64, y_mm: f64, deadline: &Deadline) -> ScopeResult<()> {
        let nav = &self.navigation;
        let needs_homing = !self.is_homed() || self.config.homing_every_time;
        if !needs_homing {
            nav.move_absolute(Axis::Y, y_mm).await?;
            nav.wait_till_idle_until(deadline).await?;
            nav.move_absolute(Axis::X, x_mm).await?;
            return nav.wait_till_idle_until(deadline).await;
        }

        if self.config.home_x_and_y_separately {
            for (axis, target, mm) in [(Axis::X, HomeTarget::X, x_mm), (Axis::Y, HomeTarget::Y, y_mm)] {
                nav.home(target).await?;
                nav.wait_till_idle_until(deadline).await?;
                nav.zero(axis).await?;
                nav.move_absolute(axis, mm).await?;
                nav.wait_till_idle_until(deadline).await?;
            }
        } else {
            nav.home(HomeTarget::Xy).await?;
            nav.wait_till_idle_until(deadline).await?;
            nav.zero(Axis::X).await?;
            nav.zero(Axis::Y).await?;
            nav.move_absolute(Axis::X, x_mm).await?;
            nav.wait_till_idle_until(deadline).await?;
            nav.move_absolute(Axis::Y, y_mm).await?;
            nav.wait_till_idle_until(deadline).await?;
        }
        self.state.lock().homing_done = true;
        Ok(())
    }

    /// A zero-length move interrupts whatever the axis is doing.
    async fn stop_xy(&self) {
        for axis in [Axis::X, Axis::Y] {
            if let Err(e) = self.navigation.move_usteps(axis, 0).await {
                warn!(axis = %axis, error = %e, "Failed to stop axis");
            }
        }
    }
}

async fn join_transition(task: JoinHandle<ScopeResult<()>>) -> ScopeResult<()> {
    task.await
        .map_err(|e| ScopeError::Device(anyhow::anyhow!("slide transition task failed: {e}")))?
}
