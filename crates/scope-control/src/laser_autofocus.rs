//! Reflection (laser) autofocus.
//!
//! A laser reflected off the sample interface lands on a dedicated focus
//! camera; its column shifts linearly with defocus. After calibration the
//! controller converts that shift into a Z displacement and corrects it.

use crate::imaging::GrayImage;
use crate::navigation::NavigationController;
use crate::spot::{find_spot_location, SpotDetection};
use parking_lot::Mutex;
use scope_core::arbiter::{Owner, ResourceArbiter, ResourceGuard};
use scope_core::capabilities::{Camera, Microcontroller};
use scope_core::config::LaserAfConfig;
use scope_core::data::Frame;
use scope_core::error::{ScopeError, ScopeResult};
use scope_core::events::{EventBus, ScopeEvent};
use scope_core::limits::{FALLBACK_PIXEL_TO_UM, ROI_X_ALIGN, ROI_Y_ALIGN};
use scope_core::types::{Axis, Roi, TriggerMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Calibration of the focus camera. Cached on disk between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserAfCalibration {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_to_um: f64,
    /// Spot column at the reference plane, relative to the crop.
    pub x_reference: f64,
    pub has_two_interfaces: bool,
    pub use_glass_top: bool,
    pub spot_spacing_px: Option<f64>,
}

impl LaserAfCalibration {
    pub fn save(&self, path: &Path) -> ScopeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = ?path, "Laser AF calibration cached");
        Ok(())
    }

    pub fn load(path: &Path) -> ScopeResult<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Result of one correction move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserAfMove {
    pub moved_um: f64,
    /// Target minus the displacement measured after the move.
    pub residual_um: f64,
    pub within_window: bool,
}

#[derive(Debug, Default)]
struct LaserAfState {
    calibration: Option<LaserAfCalibration>,
    last_frame: Option<Frame>,
}

fn align_down(value: u32, step: u32) -> u32 {
    (value / step) * step
}

pub struct LaserAutofocusController {
    camera: Arc<dyn Camera>,
    microcontroller: Arc<dyn Microcontroller>,
    navigation: Arc<NavigationController>,
    arbiter: ResourceArbiter,
    events: EventBus,
    config: LaserAfConfig,
    state: Mutex<LaserAfState>,
}

impl LaserAutofocusController {
    pub fn new(
        camera: Arc<dyn Camera>,
        microcontroller: Arc<dyn Microcontroller>,
        navigation: Arc<NavigationController>,
        arbiter: ResourceArbiter,
        events: EventBus,
        config: LaserAfConfig,
    ) -> Self {
        Self {
            camera,
            microcontroller,
            navigation,
            arbiter,
            events,
            config,
            state: Mutex::new(LaserAfState::default()),
        }
    }

    /// Take the shared camera/stage for a standalone laser-AF operation.
    ///
    /// Not needed inside an acquisition, which already owns them.
    pub fn claim(&self) -> ScopeResult<ResourceGuard> {
        self.arbiter.try_acquire(Owner::LaserAutofocus)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().calibration.is_some()
    }

    pub fn calibration(&self) -> Option<LaserAfCalibration> {
        self.state.lock().calibration.clone()
    }

    /// Most recent focus-camera frame, kept for failure diagnostics.
    pub fn last_frame(&self) -> Option<Frame> {
        self.state.lock().last_frame.clone()
    }

    fn detection(&self) -> SpotDetection {
        SpotDetection {
            threshold: self.config.spot_threshold,
            two_interfaces: self.config.has_two_interfaces,
            use_glass_top: self.config.use_glass_top,
            min_peak_distance: self.config.min_peak_distance_px as usize,
        }
    }

    async fn prepare_camera(&self) -> ScopeResult<()> {
        self.camera.set_trigger_mode(TriggerMode::Software).await?;
        if !self.camera.is_streaming() {
            self.camera.start_streaming().await?;
        }
        Ok(())
    }

    /// Average spot position over `averaging_n` frames, in current-ROI pixels.
    async fn spot_centroid(&self) -> ScopeResult<(f64, f64)> {
        let detection = self.detection();
        let (mut sum_x, mut sum_y, mut found) = (0.0, 0.0, 0u32);
        let mut spacing = None;
        let mut last_error = None;
        for _ in 0..self.config.averaging_n {
            self.camera.send_trigger().await?;
            let Some(frame) = self.camera.read_frame().await? else {
                debug!("Focus camera delivered no frame");
                continue;
            };
            let image = GrayImage::from_frame(&frame);
            self.state.lock().last_frame = Some(frame);
            match find_spot_location(&image, &detection) {
                Ok(spot) => {
                    sum_x += spot.x;
                    sum_y += spot.y;
                    found += 1;
                    spacing = spot.spacing_px.or(spacing);
                }
                Err(e) => {
                    warn!(error = %e, "Spot detection failed");
                    last_error = Some(e);
                }
            }
        }
        if found == 0 {
            return Err(match last_error {
                Some(e) => ScopeError::Calibration(e.to_string()),
                None => ScopeError::FrameUnavailable(format!(
                    "focus camera delivered none of {} frames",
                    self.config.averaging_n
                )),
            });
        }
        if spacing.is_some() {
            if let Some(cal) = self.state.lock().calibration.as_mut() {
                cal.spot_spacing_px = spacing;
            }
        }
        let n = f64::from(found);
        Ok((sum_x / n, sum_y / n))
    }

    async fn spot_centroid_with_laser(&self) -> ScopeResult<(f64, f64)> {
        self.microcontroller.set_af_laser(true).await?;
        let result = self.spot_centroid().await;
        self.microcontroller.set_af_laser(false).await?;
        result
    }

    fn store(&self, calibration: LaserAfCalibration) -> ScopeResult<LaserAfCalibration> {
        if let Some(path) = &self.config.cache_path {
            calibration.save(path)?;
        }
        self.state.lock().calibration = Some(calibration.clone());
        Ok(calibration)
    }

    /// Calibrate from known values. `x_reference` is in full-sensor pixels.
    pub async fn initialize_manual(
        &self,
        x_offset: u32,
        y_offset: u32,
        width: u32,
        height: u32,
        pixel_to_um: f64,
        x_reference: f64,
    ) -> ScopeResult<LaserAfCalibration> {
        let (sensor_w, sensor_h) = self.camera.sensor_size();
        let width = align_down(width.min(sensor_w), ROI_X_ALIGN).max(ROI_X_ALIGN);
        let height = align_down(height.min(sensor_h), ROI_Y_ALIGN).max(ROI_Y_ALIGN);
        let x_offset = align_down(x_offset.min(sensor_w.saturating_sub(width)), ROI_X_ALIGN);
        let y_offset = align_down(y_offset.min(sensor_h.saturating_sub(height)), ROI_Y_ALIGN);

        self.prepare_camera().await?;
        self.camera
            .set_roi(Roi {
                x_offset,
                y_offset,
                width,
                height,
            })
            .await?;

        let calibration = LaserAfCalibration {
            x_offset,
            y_offset,
            width,
            height,
            pixel_to_um,
            x_reference: x_reference - f64::from(x_offset),
            has_two_interfaces: self.config.has_two_interfaces,
            use_glass_top: self.config.use_glass_top,
            spot_spacing_px: None,
        };
        info!(
            x_offset,
            y_offset,
            width,
            height,
            pixel_to_um,
            x_reference = calibration.x_reference,
            "Laser AF initialized"
        );
        self.store(calibration)
    }

    /// Locate the spot, crop around it and measure the pixel scale by moving Z.
    #[instrument(skip(self))]
    pub async fn initialize_auto(&self) -> ScopeResult<LaserAfCalibration> {
        let (sensor_w, sensor_h) = self.camera.sensor_size();
        self.prepare_camera().await?;
        self.camera
            .set_roi(Roi {
                x_offset: 0,
                y_offset: 0,
                width: sensor_w,
                height: sensor_h,
            })
            .await?;
        self.camera
            .set_exposure_time_ms(self.config.focus_camera_exposure_ms)
            .await?;
        self.camera
            .set_analog_gain(self.config.focus_camera_analog_gain)
            .await?;

        let (x, y) = self.spot_centroid_with_laser().await?;
        debug!(x, y, "Spot found on full sensor");
        let x_offset = (x - f64::from(self.config.crop_width) / 2.0).max(0.0) as u32;
        let y_offset = (y - f64::from(self.config.crop_height) / 2.0).max(0.0) as u32;
        self.initialize_manual(
            x_offset,
            y_offset,
            self.config.crop_width,
            self.config.crop_height,
            1.0,
            x,
        )
        .await?;

        self.microcontroller.set_af_laser(true).await?;
        let measured = self.calibration_sweep().await;
        self.microcontroller.set_af_laser(false).await?;
        let (x0, x1) = measured?;

        let shift = x1 - x0;
        let pixel_to_um = if shift.abs() < f64::EPSILON {
            warn!("Spot did not move during calibration, using fallback scale");
            FALLBACK_PIXEL_TO_UM
        } else {
            self.config.calibration_distance_um / shift
        };

        let mut calibration = self
            .calibration()
            .ok_or_else(|| ScopeError::Calibration("calibration lost during initialization".into()))?;
        calibration.pixel_to_um = pixel_to_um;
        calibration.x_reference = x1;
        info!(pixel_to_um, x_reference = x1, "Laser AF calibrated");
        self.store(calibration)
    }

    /// Spot column at `-d` (approached from below) and at the starting plane.
    async fn calibration_sweep(&self) -> ScopeResult<(f64, f64)> {
        let d_mm = self.config.calibration_distance_um / 1000.0;
        let nav = &self.navigation;
        nav.move_relative(Axis::Z, -3.0 * d_mm).await?;
        nav.wait_till_idle().await?;
        nav.move_relative(Axis::Z, 2.0 * d_mm).await?;
        nav.wait_till_idle().await?;
        let (x0, _) = self.spot_centroid().await?;
        nav.move_relative(Axis::Z, d_mm).await?;
        nav.wait_till_idle().await?;
        let (x1, _) = self.spot_centroid().await?;
        Ok((x0, x1))
    }

    /// Restore a cached calibration, if one exists.
    pub async fn load_cache(&self) -> ScopeResult<Option<LaserAfCalibration>> {
        let Some(path) = &self.config.cache_path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let cached = LaserAfCalibration::load(path)?;
        let mut calibration = self
            .initialize_manual(
                cached.x_offset,
                cached.y_offset,
                cached.width,
                cached.height,
                cached.pixel_to_um,
                cached.x_reference + f64::from(cached.x_offset),
            )
            .await?;
        calibration.spot_spacing_px = cached.spot_spacing_px;
        self.state.lock().calibration = Some(calibration.clone());
        info!(path = ?path, "Laser AF calibration restored from cache");
        Ok(Some(calibration))
    }

    fn require_calibration(&self) -> ScopeResult<LaserAfCalibration> {
        self.calibration()
            .ok_or_else(|| ScopeError::Calibration("laser autofocus is not initialized".into()))
    }

    /// Current defocus in µm relative to the reference plane.
    pub async fn measure_displacement(&self) -> ScopeResult<f64> {
        let calibration = self.require_calibration()?;
        let (x, _) = self.spot_centroid_with_laser().await?;
        let displacement = (x - calibration.x_reference) * calibration.pixel_to_um;
        debug!(x, displacement_um = displacement, "Laser AF displacement");
        self.events
            .publish(ScopeEvent::LaserAfDisplacement(displacement));
        Ok(displacement)
    }

    /// Move Z so the measured displacement becomes `target_um`.
    pub async fn move_to_target(&self, target_um: f64) -> ScopeResult<LaserAfMove> {
        let current = self.measure_displacement().await?;
        let range = self.config.range_um;
        let delta = (target_um - current).clamp(-range, range);
        if delta != target_um - current {
            warn!(requested = target_um - current, delta, "Laser AF correction clamped");
        }
        self.navigation
            .move_relative(Axis::Z, delta / 1000.0)
            .await?;
        self.navigation.wait_till_idle().await?;

        let after = self.measure_displacement().await?;
        let residual = target_um - after;
        let within_window = residual.abs() <= self.config.success_window_um;
        if !within_window {
            warn!(residual_um = residual, "Laser AF residual outside success window");
        }
        Ok(LaserAfMove {
            moved_um: delta,
            residual_um: residual,
            within_window,
        })
    }

    /// Make the current plane the reference.
    pub async fn set_reference(&self) -> ScopeResult<f64> {
        self.require_calibration()?;
        let (x, _) = self.spot_centroid_with_laser().await?;
        let calibration = {
            let mut state = self.state.lock();
            let Some(cal) = state.calibration.as_mut() else {
                return Err(ScopeError::Calibration(
                    "laser autofocus is not initialized".into(),
                ));
            };
            cal.x_reference = x;
            cal.clone()
        };
        if let Some(path) = &self.config.cache_path {
            calibration.save(path)?;
        }
        info!(x_reference = x, "Laser AF reference set");
        self.events.publish(ScopeEvent::LaserAfDisplacement(0.0));
        Ok(x)
    }
}
