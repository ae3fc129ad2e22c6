//! Contrast autofocus.
//!
//! The scan approaches the bottom of a symmetric Z window from below so
//! every plane is reached in the same motor direction:
//!
//! ```text
//!  z0 + offset  ┬  ... scan: step +dz, snap, score
//!               │
//!  z0           ┼  start
//!               │
//!  z0 - offset  ┴◀─┐ +backlash
//!                  │
//!  z0 - offset - backlash
//! ```
//!
//! Afterwards the stage returns below the window, takes up backlash again and
//! steps up to the best plane.

use crate::devices::ImagingDevices;
use crate::focus_map::FocusMap;
use crate::focus_measure::focus_score;
use crate::imaging::GrayImage;
use parking_lot::Mutex;
use scope_core::arbiter::{Owner, ResourceArbiter};
use scope_core::config::AutofocusConfig;
use scope_core::error::{ScopeError, ScopeResult};
use scope_core::events::ScopeEvent;
use scope_core::types::{Axis, FocusOperator, TriggerMode};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Immutable inputs of one autofocus pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AutofocusParams {
    pub n_planes: u32,
    pub delta_z_um: f64,
    pub crop_width: u32,
    pub crop_height: u32,
    pub operator: FocusOperator,
    pub stop_threshold: f64,
    pub trigger_mode: TriggerMode,
}

impl AutofocusParams {
    pub fn from_config(config: &AutofocusConfig, trigger_mode: TriggerMode) -> Self {
        Self {
            n_planes: config.n_planes,
            delta_z_um: config.delta_z_um,
            crop_width: config.crop_width,
            crop_height: config.crop_height,
            operator: config.focus_operator,
            stop_threshold: config.stop_threshold,
            trigger_mode,
        }
    }
}

/// `(z_step_index, score)` pairs of one pass, in acquisition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FocusSeries {
    pub points: Vec<(usize, f64)>,
}

impl FocusSeries {
    pub fn push(&mut self, step: usize, score: f64) {
        self.points.push((step, score));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Highest-scoring step; the first one wins ties.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.points.iter().copied().fold(None, |best, (step, score)| match best {
            Some((_, s)) if s >= score => best,
            _ => Some((step, score)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutofocusOutcome {
    pub best_index: usize,
    pub series: FocusSeries,
    /// Best plane was the first or last scanned; the optimum may lie outside.
    pub at_range_edge: bool,
    /// Z came from the focus map rather than a scan.
    pub from_focus_map: bool,
}

/// Run one contrast autofocus pass.
///
/// Task-level function: the caller owns the camera and stage. Used directly by
/// the acquisition and wrapped by [`AutofocusController::autofocus`].
pub async fn run_contrast_autofocus(
    devices: &ImagingDevices,
    params: &AutofocusParams,
) -> ScopeResult<AutofocusOutcome> {
    let nav = &devices.navigation;
    let dz = nav.mm_to_usteps(Axis::Z, params.delta_z_um / 1000.0);
    if dz == 0 || params.n_planes == 0 {
        return Err(ScopeError::Configuration(format!(
            "autofocus needs at least one plane and a step of one microstep (n = {}, dz = {} um)",
            params.n_planes, params.delta_z_um
        )));
    }
    let n = params.n_planes as usize;
    let backlash = nav.config().z_backlash_usteps();
    let offset = dz * (n / 2) as i64;
    debug!(n, dz, offset, backlash, "Contrast autofocus starting");

    nav.step(Axis::Z, -(backlash + offset)).await?;
    nav.step(Axis::Z, backlash).await?;

    let mut series = FocusSeries::default();
    let mut running_max = f64::MIN;
    let mut steps_moved: i64 = 0;
    for i in 0..n {
        nav.step(Axis::Z, dz).await?;
        steps_moved += 1;

        let Some(frame) = devices.snap(params.trigger_mode).await? else {
            warn!(step = i, "No frame during autofocus, skipping plane");
            continue;
        };
        let frame = devices.process(&frame, Some((params.crop_width, params.crop_height)));
        let score = focus_score(params.operator, &GrayImage::from_frame(&frame));
        devices
            .events
            .publish(ScopeEvent::ImageToDisplay(Arc::new(frame)));
        devices.events.publish(ScopeEvent::FocusScore { step: i, score });
        debug!(step = i, score, "Focus score");

        series.push(i, score);
        running_max = running_max.max(score);
        if score < running_max * params.stop_threshold {
            debug!(step = i, "Score fell below threshold, stopping scan");
            break;
        }
    }

    nav.step(Axis::Z, -(backlash + steps_moved * dz)).await?;
    nav.step(Axis::Z, backlash).await?;

    let Some((best_index, best_score)) = series.best() else {
        // back to where we started
        nav.step(Axis::Z, offset).await?;
        return Err(ScopeError::FrameUnavailable(
            "no frames delivered during autofocus".into(),
        ));
    };
    nav.step(Axis::Z, (best_index as i64 + 1) * dz).await?;

    let at_range_edge = best_index == 0 || best_index == n - 1;
    if at_range_edge {
        warn!(
            best_index,
            n, "Best focus at the edge of the scanned range; the optimum may lie outside"
        );
    }
    info!(best_index, best_score, planes = series.len(), "Autofocus complete");
    devices.events.publish(ScopeEvent::AutofocusFinished {
        best_index,
        at_range_edge,
    });
    Ok(AutofocusOutcome {
        best_index,
        series,
        at_range_edge,
        from_focus_map: false,
    })
}

#[derive(Debug)]
struct AutofocusSettings {
    n_planes: u32,
    delta_z_um: f64,
    focus_map: Option<FocusMap>,
    use_focus_map: bool,
}

/// Standalone autofocus: brackets a pass with live-view hand-off and
/// resource ownership.
pub struct AutofocusController {
    devices: ImagingDevices,
    arbiter: ResourceArbiter,
    config: AutofocusConfig,
    settings: Mutex<AutofocusSettings>,
}

impl AutofocusController {
    pub fn new(devices: ImagingDevices, arbiter: ResourceArbiter, config: AutofocusConfig) -> Self {
        let settings = AutofocusSettings {
            n_planes: config.n_planes,
            delta_z_um: config.delta_z_um,
            focus_map: None,
            use_focus_map: false,
        };
        Self {
            devices,
            arbiter,
            config,
            settings: Mutex::new(settings),
        }
    }

    pub fn set_n_planes(&self, n: u32) {
        self.settings.lock().n_planes = n.max(1);
    }

    pub fn set_delta_z_um(&self, delta_z_um: f64) {
        self.settings.lock().delta_z_um = delta_z_um;
    }

    /// Snapshot of the parameters the next pass will use.
    pub fn params(&self) -> AutofocusParams {
        let settings = self.settings.lock();
        let mut params = AutofocusParams::from_config(&self.config, self.devices.live.trigger_mode());
        params.n_planes = settings.n_planes;
        params.delta_z_um = settings.delta_z_um;
        params
    }

    pub fn set_focus_map(&self, map: FocusMap) {
        self.settings.lock().focus_map = Some(map);
    }

    pub fn clear_focus_map(&self) {
        let mut settings = self.settings.lock();
        settings.focus_map = None;
        settings.use_focus_map = false;
    }

    pub fn focus_map(&self) -> Option<FocusMap> {
        self.settings.lock().focus_map
    }

    /// Use the focus map instead of scanning. Fails when no map is set.
    pub fn set_use_focus_map(&self, enabled: bool) -> ScopeResult<()> {
        let mut settings = self.settings.lock();
        if enabled && settings.focus_map.is_none() {
            return Err(ScopeError::Calibration("no focus map has been generated".into()));
        }
        settings.use_focus_map = enabled;
        Ok(())
    }

    /// Focus at the current XY position.
    #[instrument(skip(self))]
    pub async fn autofocus(&self) -> ScopeResult<AutofocusOutcome> {
        let map = {
            let settings = self.settings.lock();
            settings.focus_map.filter(|_| settings.use_focus_map)
        };
        match map {
            Some(map) => self.move_to_focus_map(&map).await,
            None => self.scan().await,
        }
    }

    async fn move_to_focus_map(&self, map: &FocusMap) -> ScopeResult<AutofocusOutcome> {
        let nav = &self.devices.navigation;
        let position = nav.refresh_position().await?;
        let z_mm = map.z_at(position.x_mm, position.y_mm);
        info!(x_mm = position.x_mm, y_mm = position.y_mm, z_mm, "Moving to focus map plane");
        nav.move_absolute(Axis::Z, z_mm).await?;
        nav.wait_till_idle().await?;
        Ok(AutofocusOutcome {
            best_index: 0,
            series: FocusSeries::default(),
            at_range_edge: false,
            from_focus_map: true,
        })
    }

    async fn scan(&self) -> ScopeResult<AutofocusOutcome> {
        if let Some(held_by) = self.arbiter.holder().filter(|o| *o != Owner::Live) {
            return Err(ScopeError::ResourceBusy {
                requested: Owner::Autofocus,
                held_by,
            });
        }
        let live = &self.devices.live;
        let camera = &self.devices.camera;
        let was_live = live.is_live();
        let callback_was_enabled = camera.callback_enabled();
        if was_live {
            live.stop_live().await?;
        }
        camera.disable_callback().await?;

        let guard = match self.arbiter.try_acquire(Owner::Autofocus) {
            Ok(guard) => guard,
            Err(e) => {
                self.restore(was_live, callback_was_enabled).await?;
                return Err(e);
            }
        };

        let params = self.params();
        let devices = self.devices.clone();
        let result = tokio::spawn(async move { run_contrast_autofocus(&devices, &params).await })
            .await
            .map_err(|e| ScopeError::Device(anyhow::anyhow!("autofocus task failed: {e}")))
            .and_then(|outcome| outcome);
        drop(guard);

        self.restore(was_live, callback_was_enabled).await?;
        result
    }

    async fn restore(&self, was_live: bool, callback_was_enabled: bool) -> ScopeResult<()> {
        let camera = &self.devices.camera;
        if callback_was_enabled {
            camera.stop_streaming().await?;
            camera.enable_callback().await?;
            camera.start_streaming().await?;
        }
        if was_live {
            self.devices.live.start_live().await?;
        }
        Ok(())
    }

    /// Autofocus at three XY points and fit a focus map through the results.
    #[instrument(skip(self))]
    pub async fn generate_focus_map(&self, points: [(f64, f64); 3]) -> ScopeResult<FocusMap> {
        let nav = &self.devices.navigation;
        let mut focused = [(0.0, 0.0, 0.0); 3];
        for (slot, (x_mm, y_mm)) in focused.iter_mut().zip(points) {
            nav.move_to(x_mm, y_mm).await?;
            nav.wait_till_idle().await?;
            self.scan().await?;
            let position = nav.refresh_position().await?;
            *slot = (x_mm, y_mm, position.z_mm);
        }
        let map = FocusMap::from_points(focused)?;
        info!(a = map.a, b = map.b, c = map.c, "Focus map generated");
        self.set_focus_map(map);
        Ok(map)
    }
}
